//! Analyses feeding the schedule primitives.

pub mod access;
pub mod affine;
pub mod region;

pub use access::{nth_access, AccessKind};
pub use affine::AffineExpr;
pub use region::{infer_region, Interval, IterDomain, Region};
