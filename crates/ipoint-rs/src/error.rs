use thiserror::Error;

use crate::expr::ExprError;
use crate::vector::MemorySpace;

/// Failure raised while building or applying an operator.
#[derive(Debug, Error)]
pub enum OperatorError {
    #[error(transparent)]
    Expr(#[from] ExprError),
    #[error("kernel source generation failed: {message}")]
    Codegen { message: String },
    #[error("device build failed: {message}")]
    Build {
        message: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("failed to link compiled module: {message}")]
    Link { message: String },
    #[error("{what} has length {actual}, operator expects {expected}")]
    GeometryMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{what} vector is not resident in {space} memory")]
    Residency {
        what: &'static str,
        space: MemorySpace,
    },
    #[error("device fault (code {code}): {message}")]
    DeviceFault { code: i32, message: String },
    #[error("no device counterpart registered for operator type '{type_tag}'")]
    NoDeviceCounterpart { type_tag: String },
    #[error("operator '{type_tag}' is not a {expected}")]
    OperatorTypeMismatch {
        type_tag: String,
        expected: &'static str,
    },
}

impl OperatorError {
    pub fn codegen(message: impl Into<String>) -> Self {
        OperatorError::Codegen {
            message: message.into(),
        }
    }

    pub fn build(
        message: impl Into<String>,
        status: Option<i32>,
        stderr: impl Into<String>,
    ) -> Self {
        OperatorError::Build {
            message: message.into(),
            status,
            stderr: stderr.into(),
        }
    }

    pub fn link(message: impl Into<String>) -> Self {
        OperatorError::Link {
            message: message.into(),
        }
    }

    pub fn device_fault(code: i32, message: impl Into<String>) -> Self {
        OperatorError::DeviceFault {
            code,
            message: message.into(),
        }
    }

    pub fn is_build(&self) -> bool {
        matches!(self, OperatorError::Build { .. })
    }

    pub fn is_link(&self) -> bool {
        matches!(self, OperatorError::Link { .. })
    }
}

/// Convenience alias for results returned by operator routines.
pub type OperatorResult<T> = Result<T, OperatorError>;
