//! Pointwise expression operators evaluated over batches of integration points.
//!
//! The crate holds the host-side model: expressions over trial proxies, the
//! step compiler that lowers them to code fragments, the proxy offset
//! resolver, vectors and device views, the [`LinearOperator`] capability and
//! the type-keyed registry that maps host operators to device counterparts.

pub mod error;
pub mod expr;
pub mod linalg;
pub mod operator;
pub mod proxy;
pub mod registry;
pub mod vector;

pub use error::{OperatorError, OperatorResult};
pub use expr::{Expr, ExprError, ExprResult};
pub use linalg::LinearOperator;
pub use operator::ApplyIntegrationPoints;
pub use proxy::{Dims, ProxyOffsetTable, TrialProxy};
pub use vector::{DeviceView, DeviceViewMut, HostVector, MemorySpace, Vector};
