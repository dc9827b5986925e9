use std::fmt;

use smtguard_native::{ErrorCode, NativeError};

/// Which kind of lifecycle object an operation was attempted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Context,
    Solver,
    Optimizer,
    Model,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Context => write!(f, "context"),
            ObjectKind::Solver => write!(f, "solver"),
            ObjectKind::Optimizer => write!(f, "optimizer"),
            ObjectKind::Model => write!(f, "model"),
        }
    }
}

/// Errors from the safe engine layer.
#[derive(Debug, Clone)]
pub enum SolverError {
    /// A native allocation returned a null handle.
    ConstructionFailure(String),
    /// The engine's error state was non-OK right after a call.
    NativeOperation { code: ErrorCode, message: String },
    /// The object (or the context owning it) has been disposed or invalidated.
    UseAfterDispose(ObjectKind),
    /// An operation was invoked out of the required order.
    StateSequence(String),
    /// An evaluated expression is not a constant of the requested kind.
    ValueExtraction(String),
    /// The engine refused to evaluate an expression under a model.
    EvaluationFailure(String),
    /// Null handle or mismatched operand shape.
    Argument(String),
    /// No context is installed in the current thread's ambient scope.
    NoAmbientContext,
}

impl SolverError {
    /// True for the lifecycle-misuse shape, whichever object was touched.
    pub fn is_use_after_dispose(&self) -> bool {
        matches!(self, SolverError::UseAfterDispose(_))
    }

    /// Native error code, if this error came from the engine.
    pub fn native_code(&self) -> Option<ErrorCode> {
        match self {
            SolverError::NativeOperation { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<NativeError> for SolverError {
    fn from(err: NativeError) -> Self {
        SolverError::NativeOperation {
            code: err.code,
            message: err.message,
        }
    }
}

impl fmt::Display for SolverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolverError::ConstructionFailure(what) => write!(f, "Failed to create native {what}"),
            SolverError::NativeOperation { code, message } => {
                write!(f, "Native engine error {code}: {message}")
            }
            SolverError::UseAfterDispose(kind) => write!(f, "Use of disposed {kind}"),
            SolverError::StateSequence(msg) => write!(f, "Invalid operation order: {msg}"),
            SolverError::ValueExtraction(msg) => write!(f, "Cannot extract value: {msg}"),
            SolverError::EvaluationFailure(msg) => write!(f, "Model evaluation failed: {msg}"),
            SolverError::Argument(msg) => write!(f, "Invalid argument: {msg}"),
            SolverError::NoAmbientContext => write!(f, "No ambient context on this thread"),
        }
    }
}

impl std::error::Error for SolverError {}

impl PartialEq for SolverError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SolverError::ConstructionFailure(a), SolverError::ConstructionFailure(b)) => a == b,
            (
                SolverError::NativeOperation { code: ca, message: ma },
                SolverError::NativeOperation { code: cb, message: mb },
            ) => ca == cb && ma == mb,
            (SolverError::UseAfterDispose(a), SolverError::UseAfterDispose(b)) => a == b,
            (SolverError::StateSequence(a), SolverError::StateSequence(b)) => a == b,
            (SolverError::ValueExtraction(a), SolverError::ValueExtraction(b)) => a == b,
            (SolverError::EvaluationFailure(a), SolverError::EvaluationFailure(b)) => a == b,
            (SolverError::Argument(a), SolverError::Argument(b)) => a == b,
            (SolverError::NoAmbientContext, SolverError::NoAmbientContext) => true,
            _ => false,
        }
    }
}

impl Eq for SolverError {}
