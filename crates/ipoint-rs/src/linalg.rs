use std::any::Any;

use crate::error::{OperatorError, OperatorResult};
use crate::vector::Vector;

/// Matrix-free linear operator `y = A x`.
///
/// Host operators and their device counterparts both implement this, so
/// callers holding a `&dyn LinearOperator` need not know which one they have.
pub trait LinearOperator: Send + Sync {
    fn height(&self) -> usize;

    fn width(&self) -> usize;

    /// Overwrites `y` with the operator applied to `x`.
    fn apply(&self, x: &dyn Vector, y: &mut dyn Vector) -> OperatorResult<()>;

    /// Stable key used by the device-creator registry.
    fn type_tag(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;
}

/// Fails with `GeometryMismatch` unless `x` has `width` and `y` has `height`
/// entries.
pub fn check_apply_geometry(
    op: &dyn LinearOperator,
    x: &dyn Vector,
    y: &dyn Vector,
) -> OperatorResult<()> {
    if x.len() != op.width() {
        return Err(OperatorError::GeometryMismatch {
            what: "input",
            expected: op.width(),
            actual: x.len(),
        });
    }
    if y.len() != op.height() {
        return Err(OperatorError::GeometryMismatch {
            what: "output",
            expected: op.height(),
            actual: y.len(),
        });
    }
    Ok(())
}

/// Recovers the concrete operator behind a trait object.
pub fn downcast_operator<T: 'static>(op: &dyn LinearOperator) -> OperatorResult<&T> {
    op.as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| OperatorError::OperatorTypeMismatch {
            type_tag: op.type_tag().to_string(),
            expected: std::any::type_name::<T>(),
        })
}
