//! Pointwise expressions over trial proxies.
//!
//! An [`Expr`] is an immutable DAG; cloning shares nodes. Shapes are checked
//! when nodes are built, so every expression that exists has a valid shape.

mod compile;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use smallvec::smallvec;
use thiserror::Error;

use crate::proxy::{Dims, TrialProxy};

pub use compile::{
    format_f64, proxy_accessor, step_var, CompiledExpr, CompiledStep, GraphCompiler, StepCompiler,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExprError {
    #[error("shape mismatch in {op}: {lhs:?} vs {rhs:?}")]
    ShapeMismatch {
        op: &'static str,
        lhs: Vec<usize>,
        rhs: Vec<usize>,
    },
    #[error("component {index} out of range for dimension {dimension}")]
    ComponentOutOfRange { index: usize, dimension: usize },
    #[error("vector entry {index} must be scalar, got shape {dims:?}")]
    NonScalarEntry { index: usize, dims: Vec<usize> },
    #[error("vector must have at least one entry")]
    EmptyVector,
    #[error("proxy '{name}' is not a trial proxy of this operator")]
    UnboundProxy { name: String },
}

pub type ExprResult<T> = Result<T, ExprError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Abs,
    Sqrt,
    Exp,
    Log,
    Sin,
    Cos,
    Tan,
}

impl UnaryOp {
    pub fn apply(self, x: f64) -> f64 {
        match self {
            UnaryOp::Neg => -x,
            UnaryOp::Abs => x.abs(),
            UnaryOp::Sqrt => x.sqrt(),
            UnaryOp::Exp => x.exp(),
            UnaryOp::Log => x.ln(),
            UnaryOp::Sin => x.sin(),
            UnaryOp::Cos => x.cos(),
            UnaryOp::Tan => x.tan(),
        }
    }

    pub(crate) fn c_expr(self, arg: &str) -> String {
        match self {
            UnaryOp::Neg => format!("-({arg})"),
            UnaryOp::Abs => format!("fabs({arg})"),
            UnaryOp::Sqrt => format!("sqrt({arg})"),
            UnaryOp::Exp => format!("exp({arg})"),
            UnaryOp::Log => format!("log({arg})"),
            UnaryOp::Sin => format!("sin({arg})"),
            UnaryOp::Cos => format!("cos({arg})"),
            UnaryOp::Tan => format!("tan({arg})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Min,
    Max,
}

impl BinaryOp {
    pub fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            BinaryOp::Add => lhs + rhs,
            BinaryOp::Sub => lhs - rhs,
            BinaryOp::Mul => lhs * rhs,
            BinaryOp::Div => lhs / rhs,
            BinaryOp::Pow => lhs.powf(rhs),
            BinaryOp::Min => lhs.min(rhs),
            BinaryOp::Max => lhs.max(rhs),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Pow => "pow",
            BinaryOp::Min => "min",
            BinaryOp::Max => "max",
        }
    }

    pub(crate) fn c_expr(self, lhs: &str, rhs: &str) -> String {
        match self {
            BinaryOp::Add => format!("({lhs}) + ({rhs})"),
            BinaryOp::Sub => format!("({lhs}) - ({rhs})"),
            BinaryOp::Mul => format!("({lhs}) * ({rhs})"),
            BinaryOp::Div => format!("({lhs}) / ({rhs})"),
            BinaryOp::Pow => format!("pow({lhs}, {rhs})"),
            BinaryOp::Min => format!("fmin({lhs}, {rhs})"),
            BinaryOp::Max => format!("fmax({lhs}, {rhs})"),
        }
    }
}

#[derive(Debug)]
pub enum ExprNode {
    Proxy(TrialProxy),
    Constant(f64),
    /// Assembles scalar entries into a vector.
    Vector(Vec<Expr>),
    /// Extracts one flattened component.
    Component { input: Expr, index: usize },
    Unary { op: UnaryOp, input: Expr },
    /// Elementwise; a scalar operand broadcasts.
    Binary { op: BinaryOp, lhs: Expr, rhs: Expr },
    Inner { lhs: Expr, rhs: Expr },
}

#[derive(Debug)]
struct ExprInner {
    node: ExprNode,
    dims: Dims,
}

#[derive(Debug, Clone)]
pub struct Expr {
    inner: Arc<ExprInner>,
}

impl Expr {
    fn from_node(node: ExprNode, dims: Dims) -> Self {
        Self {
            inner: Arc::new(ExprInner { node, dims }),
        }
    }

    pub fn proxy(proxy: &TrialProxy) -> Self {
        Self::from_node(
            ExprNode::Proxy(proxy.clone()),
            Dims::from_slice(proxy.dimensions()),
        )
    }

    pub fn constant(value: f64) -> Self {
        Self::from_node(ExprNode::Constant(value), Dims::new())
    }

    pub fn vector(entries: Vec<Expr>) -> ExprResult<Self> {
        if entries.is_empty() {
            return Err(ExprError::EmptyVector);
        }
        for (index, entry) in entries.iter().enumerate() {
            if !entry.is_scalar() {
                return Err(ExprError::NonScalarEntry {
                    index,
                    dims: entry.dimensions().to_vec(),
                });
            }
        }
        let len = entries.len();
        Ok(Self::from_node(ExprNode::Vector(entries), smallvec![len]))
    }

    pub fn component(&self, index: usize) -> ExprResult<Self> {
        let dimension = self.dimension();
        if index >= dimension {
            return Err(ExprError::ComponentOutOfRange { index, dimension });
        }
        Ok(Self::from_node(
            ExprNode::Component {
                input: self.clone(),
                index,
            },
            Dims::new(),
        ))
    }

    pub fn unary(&self, op: UnaryOp) -> Self {
        Self::from_node(
            ExprNode::Unary {
                op,
                input: self.clone(),
            },
            self.inner.dims.clone(),
        )
    }

    pub fn binary(&self, op: BinaryOp, rhs: &Expr) -> ExprResult<Self> {
        let dims = if self.dimensions() == rhs.dimensions() || rhs.is_scalar() {
            self.inner.dims.clone()
        } else if self.is_scalar() {
            rhs.inner.dims.clone()
        } else {
            return Err(ExprError::ShapeMismatch {
                op: op.name(),
                lhs: self.dimensions().to_vec(),
                rhs: rhs.dimensions().to_vec(),
            });
        };
        Ok(Self::from_node(
            ExprNode::Binary {
                op,
                lhs: self.clone(),
                rhs: rhs.clone(),
            },
            dims,
        ))
    }

    pub fn inner(&self, rhs: &Expr) -> ExprResult<Self> {
        if self.dimensions() != rhs.dimensions() {
            return Err(ExprError::ShapeMismatch {
                op: "inner",
                lhs: self.dimensions().to_vec(),
                rhs: rhs.dimensions().to_vec(),
            });
        }
        Ok(Self::from_node(
            ExprNode::Inner {
                lhs: self.clone(),
                rhs: rhs.clone(),
            },
            Dims::new(),
        ))
    }

    pub fn add(&self, rhs: &Expr) -> ExprResult<Self> {
        self.binary(BinaryOp::Add, rhs)
    }

    pub fn sub(&self, rhs: &Expr) -> ExprResult<Self> {
        self.binary(BinaryOp::Sub, rhs)
    }

    pub fn mul(&self, rhs: &Expr) -> ExprResult<Self> {
        self.binary(BinaryOp::Mul, rhs)
    }

    pub fn div(&self, rhs: &Expr) -> ExprResult<Self> {
        self.binary(BinaryOp::Div, rhs)
    }

    pub fn pow(&self, rhs: &Expr) -> ExprResult<Self> {
        self.binary(BinaryOp::Pow, rhs)
    }

    pub fn min(&self, rhs: &Expr) -> ExprResult<Self> {
        self.binary(BinaryOp::Min, rhs)
    }

    pub fn max(&self, rhs: &Expr) -> ExprResult<Self> {
        self.binary(BinaryOp::Max, rhs)
    }

    pub fn neg(&self) -> Self {
        self.unary(UnaryOp::Neg)
    }

    pub fn abs(&self) -> Self {
        self.unary(UnaryOp::Abs)
    }

    pub fn sqrt(&self) -> Self {
        self.unary(UnaryOp::Sqrt)
    }

    pub fn exp(&self) -> Self {
        self.unary(UnaryOp::Exp)
    }

    pub fn log(&self) -> Self {
        self.unary(UnaryOp::Log)
    }

    pub fn sin(&self) -> Self {
        self.unary(UnaryOp::Sin)
    }

    pub fn cos(&self) -> Self {
        self.unary(UnaryOp::Cos)
    }

    pub fn tan(&self) -> Self {
        self.unary(UnaryOp::Tan)
    }

    pub fn node(&self) -> &ExprNode {
        &self.inner.node
    }

    pub fn dimensions(&self) -> &[usize] {
        &self.inner.dims
    }

    /// Number of scalar output components.
    pub fn dimension(&self) -> usize {
        self.inner.dims.iter().product()
    }

    pub fn is_scalar(&self) -> bool {
        self.inner.dims.is_empty()
    }

    /// Stable identity of the shared node, valid while `self` is alive.
    pub(crate) fn node_key(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    fn children(&self) -> Vec<&Expr> {
        match &self.inner.node {
            ExprNode::Proxy(_) | ExprNode::Constant(_) => Vec::new(),
            ExprNode::Vector(entries) => entries.iter().collect(),
            ExprNode::Component { input, .. } | ExprNode::Unary { input, .. } => vec![input],
            ExprNode::Binary { lhs, rhs, .. } | ExprNode::Inner { lhs, rhs } => vec![lhs, rhs],
        }
    }

    /// Proxies referenced by the expression, in first-visit order.
    pub fn proxies(&self) -> Vec<TrialProxy> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        self.collect_proxies(&mut seen, &mut out);
        out
    }

    fn collect_proxies(&self, seen: &mut HashSet<usize>, out: &mut Vec<TrialProxy>) {
        if !seen.insert(self.node_key()) {
            return;
        }
        if let ExprNode::Proxy(proxy) = &self.inner.node {
            if !out.contains(proxy) {
                out.push(proxy.clone());
            }
        }
        for child in self.children() {
            child.collect_proxies(seen, out);
        }
    }

    /// Evaluates the expression at one point.
    ///
    /// `lookup(proxy, comp)` supplies the value of component `comp` of `proxy`.
    /// Shared nodes are evaluated once.
    pub fn evaluate<F>(&self, lookup: F) -> Vec<f64>
    where
        F: Fn(&TrialProxy, usize) -> f64,
    {
        let mut memo = HashMap::new();
        self.evaluate_memo(&lookup, &mut memo)
    }

    fn evaluate_memo<F>(&self, lookup: &F, memo: &mut HashMap<usize, Vec<f64>>) -> Vec<f64>
    where
        F: Fn(&TrialProxy, usize) -> f64,
    {
        if let Some(values) = memo.get(&self.node_key()) {
            return values.clone();
        }
        let values = match &self.inner.node {
            ExprNode::Proxy(proxy) => (0..proxy.dimension())
                .map(|comp| lookup(proxy, comp))
                .collect(),
            ExprNode::Constant(value) => vec![*value],
            ExprNode::Vector(entries) => entries
                .iter()
                .map(|entry| entry.evaluate_memo(lookup, memo)[0])
                .collect(),
            ExprNode::Component { input, index } => {
                vec![input.evaluate_memo(lookup, memo)[*index]]
            }
            ExprNode::Unary { op, input } => input
                .evaluate_memo(lookup, memo)
                .into_iter()
                .map(|x| op.apply(x))
                .collect(),
            ExprNode::Binary { op, lhs, rhs } => {
                let a = lhs.evaluate_memo(lookup, memo);
                let b = rhs.evaluate_memo(lookup, memo);
                (0..self.dimension())
                    .map(|c| op.apply(a[broadcast(c, a.len())], b[broadcast(c, b.len())]))
                    .collect()
            }
            ExprNode::Inner { lhs, rhs } => {
                let a = lhs.evaluate_memo(lookup, memo);
                let b = rhs.evaluate_memo(lookup, memo);
                vec![a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()]
            }
        };
        memo.insert(self.node_key(), values.clone());
        values
    }
}

/// Index into an operand of length `len`; scalars broadcast.
pub(crate) fn broadcast(comp: usize, len: usize) -> usize {
    if len == 1 {
        0
    } else {
        comp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_broadcasts_scalars() {
        let u = TrialProxy::new("u", &[3]);
        let scaled = Expr::constant(2.0).mul(&Expr::proxy(&u)).unwrap();
        assert_eq!(scaled.dimensions(), &[3]);
        let values = scaled.evaluate(|_, comp| comp as f64 + 1.0);
        assert_eq!(values, vec![2.0, 4.0, 6.0]);
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let u = Expr::proxy(&TrialProxy::new("u", &[2]));
        let v = Expr::proxy(&TrialProxy::new("v", &[3]));
        assert!(matches!(
            u.add(&v),
            Err(ExprError::ShapeMismatch { op: "add", .. })
        ));
        assert!(matches!(
            u.inner(&v),
            Err(ExprError::ShapeMismatch { op: "inner", .. })
        ));
    }

    #[test]
    fn vector_requires_scalar_entries() {
        let u = Expr::proxy(&TrialProxy::new("u", &[2]));
        assert_eq!(Expr::vector(Vec::new()).unwrap_err(), ExprError::EmptyVector);
        assert!(matches!(
            Expr::vector(vec![Expr::constant(1.0), u]),
            Err(ExprError::NonScalarEntry { index: 1, .. })
        ));
    }

    #[test]
    fn component_checks_range() {
        let u = Expr::proxy(&TrialProxy::new("u", &[2, 2]));
        assert!(u.component(3).is_ok());
        assert_eq!(
            u.component(4).unwrap_err(),
            ExprError::ComponentOutOfRange {
                index: 4,
                dimension: 4
            }
        );
    }

    #[test]
    fn proxies_are_listed_once_in_visit_order() {
        let u = TrialProxy::new("u", &[2]);
        let p = TrialProxy::scalar("p");
        let ue = Expr::proxy(&u);
        let expr = ue
            .inner(&ue)
            .unwrap()
            .add(&Expr::proxy(&p))
            .unwrap()
            .mul(&Expr::proxy(&u).component(0).unwrap())
            .unwrap();
        assert_eq!(expr.proxies(), vec![u, p]);
    }

    #[test]
    fn evaluates_inner_product_and_math() {
        let u = TrialProxy::new("u", &[2]);
        let ue = Expr::proxy(&u);
        let norm = ue.inner(&ue).unwrap().sqrt();
        let values = norm.evaluate(|_, comp| if comp == 0 { 3.0 } else { 4.0 });
        assert_eq!(values, vec![5.0]);
    }
}
