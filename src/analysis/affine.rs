//! Affine expressions over named loop and iteration variables.
//!
//! An affine expression is a linear combination of variables plus a constant:
//! `aff(x) = c0 + c1*x1 + c2*x2 + ... + cn*xn`

use crate::ir::module::Module;
use crate::ir::node::{BinaryOp, NodeId, NodeKind};
use num_integer::Integer;
use serde::{Serialize, Deserialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, Sub, Neg};

/// An affine expression: constant + sum(coeff[v] * v)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffineExpr {
    /// Constant term
    pub constant: i64,
    /// Non-zero coefficients by variable name
    pub terms: BTreeMap<String, i64>,
}

impl AffineExpr {
    /// Create a zero expression.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Create a constant expression.
    pub fn constant(value: i64) -> Self {
        Self { constant: value, terms: BTreeMap::new() }
    }

    /// Create an expression for a single variable.
    pub fn var(name: impl Into<String>) -> Self {
        let mut terms = BTreeMap::new();
        terms.insert(name.into(), 1);
        Self { constant: 0, terms }
    }

    /// Build the affine form of an IR expression, if it has one.
    pub fn from_node(module: &Module, id: NodeId) -> Option<Self> {
        match module.kind(id) {
            NodeKind::IntImm(v) => Some(Self::constant(*v)),
            NodeKind::Var(name) => Some(Self::var(name.clone())),
            NodeKind::Binary { op, lhs, rhs } => {
                let l = Self::from_node(module, *lhs)?;
                let r = Self::from_node(module, *rhs)?;
                match op {
                    BinaryOp::Add => Some(l + r),
                    BinaryOp::Sub => Some(l - r),
                    BinaryOp::Mul => match (l.as_constant(), r.as_constant()) {
                        (Some(c), _) => Some(r.scale(c)),
                        (_, Some(c)) => Some(l.scale(c)),
                        _ => None,
                    },
                    BinaryOp::Div => l.floor_div(r.as_constant()?),
                    BinaryOp::Mod | BinaryOp::Min | BinaryOp::Max => {
                        match (l.as_constant(), r.as_constant()) {
                            (Some(a), Some(b)) => fold_constant(*op, a, b).map(Self::constant),
                            _ => None,
                        }
                    }
                }
            }
            _ => None,
        }
    }

    /// Check if this is a constant expression.
    pub fn is_constant(&self) -> bool {
        self.terms.is_empty()
    }

    /// Get the constant value if this is a constant expression.
    pub fn as_constant(&self) -> Option<i64> {
        if self.is_constant() {
            Some(self.constant)
        } else {
            None
        }
    }

    /// Get coefficient for a variable.
    pub fn coeff(&self, name: &str) -> i64 {
        self.terms.get(name).copied().unwrap_or(0)
    }

    /// Variables with a non-zero coefficient.
    pub fn vars(&self) -> impl Iterator<Item = &str> {
        self.terms.keys().map(String::as_str)
    }

    pub fn mentions(&self, name: &str) -> bool {
        self.terms.contains_key(name)
    }

    fn add_term(&mut self, name: &str, coeff: i64) {
        let entry = self.terms.entry(name.to_string()).or_insert(0);
        *entry += coeff;
        if *entry == 0 {
            self.terms.remove(name);
        }
    }

    /// Scale the expression by a constant.
    pub fn scale(&self, factor: i64) -> Self {
        if factor == 0 {
            return Self::zero();
        }
        Self {
            constant: self.constant * factor,
            terms: self.terms.iter().map(|(v, &c)| (v.clone(), c * factor)).collect(),
        }
    }

    /// Floor division by a constant; exact only when every coefficient and
    /// the constant are divisible.
    pub fn floor_div(&self, divisor: i64) -> Option<Self> {
        if divisor == 0 {
            return None;
        }
        if self.constant % divisor != 0 || self.terms.values().any(|c| c % divisor != 0) {
            return None;
        }
        Some(Self {
            constant: self.constant / divisor,
            terms: self.terms.iter().map(|(v, &c)| (v.clone(), c / divisor)).collect(),
        })
    }

    /// Replace variable `name` with `value`.
    pub fn substitute(&self, name: &str, value: &AffineExpr) -> Self {
        match self.terms.get(name) {
            None => self.clone(),
            Some(&c) => {
                let mut rest = self.clone();
                rest.terms.remove(name);
                rest + value.scale(c)
            }
        }
    }

    /// Split into the part over `vars` and the remainder.
    pub fn split(&self, vars: &[String]) -> (AffineExpr, AffineExpr) {
        let mut inner = AffineExpr::zero();
        let mut outer = AffineExpr::constant(self.constant);
        for (v, &c) in &self.terms {
            if vars.iter().any(|x| x == v) {
                inner.add_term(v, c);
            } else {
                outer.add_term(v, c);
            }
        }
        (inner, outer)
    }

    /// Bounds of the expression given closed bounds per variable.
    /// Returns `None` if some variable has no bounds.
    pub fn bounds<F>(&self, mut range: F) -> Option<(i64, i64)>
    where
        F: FnMut(&str) -> Option<(i64, i64)>,
    {
        let mut lo = self.constant;
        let mut hi = self.constant;
        for (v, &c) in &self.terms {
            let (vmin, vmax) = range(v)?;
            if c >= 0 {
                lo += c * vmin;
                hi += c * vmax;
            } else {
                lo += c * vmax;
                hi += c * vmin;
            }
        }
        Some((lo, hi))
    }

    /// Get GCD of all coefficients.
    pub fn gcd(&self) -> i64 {
        let g = self.terms.values().fold(self.constant.abs(), |g, c| g.gcd(&c.abs()));
        if g == 0 { 1 } else { g }
    }
}

/// Evaluate a binary operator on constants. Division and modulo round
/// toward negative infinity.
pub fn fold_constant(op: BinaryOp, a: i64, b: i64) -> Option<i64> {
    match op {
        BinaryOp::Add => Some(a + b),
        BinaryOp::Sub => Some(a - b),
        BinaryOp::Mul => Some(a * b),
        BinaryOp::Div if b != 0 => Some(Integer::div_floor(&a, &b)),
        BinaryOp::Mod if b != 0 => Some(Integer::mod_floor(&a, &b)),
        BinaryOp::Min => Some(a.min(b)),
        BinaryOp::Max => Some(a.max(b)),
        _ => None,
    }
}

impl Add for AffineExpr {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        let mut result = self;
        result.constant += other.constant;
        for (v, c) in &other.terms {
            result.add_term(v, *c);
        }
        result
    }
}

impl Sub for AffineExpr {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        self + other.scale(-1)
    }
}

impl Neg for AffineExpr {
    type Output = Self;

    fn neg(self) -> Self {
        self.scale(-1)
    }
}

impl fmt::Display for AffineExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        for (v, &c) in &self.terms {
            match c {
                1 => parts.push(v.clone()),
                -1 => parts.push(format!("-{}", v)),
                _ => parts.push(format!("{}*{}", c, v)),
            }
        }
        if self.constant != 0 || parts.is_empty() {
            parts.push(self.constant.to_string());
        }
        write!(f, "{}", parts.join(" + ").replace("+ -", "- "))
    }
}
