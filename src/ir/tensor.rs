//! Tensors, buffers and the tags attached to them.
//!
//! Tensors and buffers live in the module arena and are referenced from the
//! tree by id. Many nodes may reference the same tensor, so rebinding a
//! tensor's buffer is visible everywhere at once.

use serde::{Serialize, Deserialize};
use std::fmt;
use std::str::FromStr;

/// Suffix naming the reduction-initialization companion of a tensor.
pub const REDUCE_INIT_SUFFIX: &str = "__reduce_init";

/// Index of a tensor in the module arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TensorId(pub u32);

impl TensorId {
    pub fn index(self) -> usize { self.0 as usize }
}

/// Index of a buffer in the module arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BufferId(pub u32);

impl BufferId {
    pub fn index(self) -> usize { self.0 as usize }
}

/// Element type of tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Int,
    Float,
    Double,
}

/// Where a buffer physically resides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryScope {
    /// Device global memory
    Global,
    /// Memory shared by the threads of a block
    Shared,
    /// Per-thread local memory
    Local,
    /// Per-thread registers
    Register,
}

impl MemoryScope {
    /// Per-thread scopes, where over-allocation is expensive.
    pub fn is_thread_private(self) -> bool {
        matches!(self, MemoryScope::Local | MemoryScope::Register)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MemoryScope::Global => "global",
            MemoryScope::Shared => "shared",
            MemoryScope::Local => "local",
            MemoryScope::Register => "register",
        }
    }
}

impl fmt::Display for MemoryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(MemoryScope::Global),
            "shared" => Ok(MemoryScope::Shared),
            "local" => Ok(MemoryScope::Local),
            "register" => Ok(MemoryScope::Register),
            other => Err(format!("unknown memory scope `{}`", other)),
        }
    }
}

/// Device the synthesized code is meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceApi {
    #[default]
    Host,
    Gpu,
}

impl fmt::Display for DeviceApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceApi::Host => write!(f, "host"),
            DeviceApi::Gpu => write!(f, "gpu"),
        }
    }
}

/// A named array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    pub name: String,
    pub shape: Vec<i64>,
    pub dtype: ElementType,
    /// Bound buffer, if any
    pub buffer: Option<BufferId>,
}

impl Tensor {
    pub fn new(name: impl Into<String>, shape: Vec<i64>, dtype: ElementType) -> Self {
        Self { name: name.into(), shape, dtype, buffer: None }
    }

    pub fn ndims(&self) -> usize { self.shape.len() }

    /// Name of the reduction-initialization companion of this tensor.
    pub fn reduce_init_name(&self) -> String {
        format!("{}{}", self.name, REDUCE_INIT_SUFFIX)
    }
}

/// A named memory region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Buffer {
    pub name: String,
    pub scope: MemoryScope,
    /// Declared extents
    pub shape: Vec<i64>,
    /// Device stamp for buffers allocated by a schedule primitive
    pub device: Option<DeviceApi>,
}

impl Buffer {
    pub fn new(name: impl Into<String>, scope: MemoryScope, shape: Vec<i64>) -> Self {
        Self { name: name.into(), scope, shape, device: None }
    }

    /// Number of elements held by the buffer.
    pub fn numel(&self) -> i64 {
        self.shape.iter().product()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_parse() {
        assert_eq!("shared".parse::<MemoryScope>(), Ok(MemoryScope::Shared));
        assert_eq!(MemoryScope::Local.to_string(), "local");
        assert!("texture".parse::<MemoryScope>().is_err());
    }

    #[test]
    fn test_thread_private() {
        assert!(MemoryScope::Local.is_thread_private());
        assert!(MemoryScope::Register.is_thread_private());
        assert!(!MemoryScope::Shared.is_thread_private());
    }

    #[test]
    fn test_reduce_init_name() {
        let t = Tensor::new("C", vec![4, 4], ElementType::Float);
        assert_eq!(t.reduce_init_name(), "C__reduce_init");
    }
}
