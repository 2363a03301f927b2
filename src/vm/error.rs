//! Error types for the workflow virtual machine
//!
//! Errors are grouped by how the caller is expected to react: structural
//! errors are defects of the workflow definition, state errors are misuse of
//! the machine, business errors crash the machine instance.

use std::sync::Arc;
use thiserror::Error;

/// Top-level machine error
#[derive(Debug, Clone, Error)]
pub enum VmError {
    /// The workflow definition is broken
    #[error("Structural error: {0}")]
    Structural(#[from] StructuralError),

    /// The machine was used in a way its current state does not allow
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Unknown breakpoint name
    #[error("Breakpoint '{0}' not found")]
    NotFound(String),

    /// A business activity failed; the machine is crashed
    #[error("Business activity failed: {0:#}")]
    Business(Arc<anyhow::Error>),

    /// The operation observed a cancellation request
    #[error("Operation cancelled")]
    Cancelled,

    /// Persisted document could not be encoded or decoded
    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),

    /// Activity type registry failure
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl VmError {
    /// Wrap an arbitrary activity failure.
    ///
    /// Errors that already are a [`VmError`] keep their category; everything
    /// else counts as a business failure.
    pub fn from_activity(error: anyhow::Error) -> Self {
        match error.downcast::<VmError>() {
            Ok(vm_error) => vm_error,
            Err(other) => VmError::Business(Arc::new(other)),
        }
    }

    /// Whether this error leaves the machine crashed.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, VmError::Cancelled | VmError::NotFound(_))
    }
}

/// Workflow definition defects. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    /// A composite asked for a child it does not have
    #[error("Broken workflow: activity '{activity}' has no child with index {index}")]
    ChildOutOfRange {
        /// Activity type of the parent
        activity: String,
        /// Requested child index
        index: usize,
    },

    /// The activity is not part of the current stack path
    #[error("Activity '{0}' was not found in the stack")]
    NotOnStack(String),

    /// Two breakpoints in one tree share a name
    #[error("Duplicate breakpoint name '{0}' in workflow tree")]
    DuplicateBreakpoint(String),

    /// The persisted stack does not match the tree shape
    #[error("Invalid persisted stack: {0}")]
    InvalidDocument(String),
}

/// Misuse of the machine or of the variable store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// Variable lookup failed
    #[error("Variable '{0}' is not defined")]
    NotDefined(String),

    /// Variable already bound in the current frame
    #[error("Variable '{0}' already defined")]
    AlreadyDefined(String),

    /// Variable holds a value of another kind
    #[error("Variable '{name}' is not {expected}")]
    TypeMismatch {
        /// Variable name
        name: String,
        /// Kind requested by the accessor
        expected: &'static str,
    },

    /// Value cannot survive a preserve/restore round trip
    #[error("Variable '{0}' holds a non-finite number, which cannot be persisted")]
    NotPersistable(String),

    /// Pop on an empty stack
    #[error("Stack underflow")]
    StackUnderflow,

    /// The stack is empty and holds no current frame
    #[error("Stack is empty")]
    EmptyStack,

    /// Stack operation requested by a non-composite activity
    #[error("Activity '{0}' is not composite and cannot manipulate the stack")]
    NotComposite(String),

    /// A composite issued more than one push/pop in one invocation
    #[error("Activity '{0}' already requested a stack operation in this invocation")]
    StackOpAlreadyRequested(String),

    /// A breakpoint tried to leave the stack before being resumed
    #[error("Breakpoint '{0}' is not resumed")]
    BreakpointNotResumed(String),

    /// `tick` was called while another tick was outstanding
    #[error("The method 'tick' cannot be called in parallel")]
    ReentrantTick,

    /// The machine crashed and cannot make further progress
    #[error("Workflow machine is crashed: {0}")]
    Crashed(String),

    /// Operation requires a paused machine
    #[error("Workflow machine is not paused")]
    NotPaused,

    /// Operation not allowed in the invoker's current status
    #[error("Workflow invoker is {0} and can't be executed")]
    InvalidStatus(String),

    /// A delay period was not positive
    #[error("Delay period should be at least 1 ms")]
    InvalidDelay,
}

/// Persisted document encoding failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistError {
    /// JSON encoding failed
    #[error("Document encoding failed: {0}")]
    Encoding(String),

    /// JSON decoding failed
    #[error("Document decoding failed: {0}")]
    Decoding(String),
}

/// Activity type registry failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Type id registered twice
    #[error("Activity type '{0}' already registered")]
    DuplicateType(String),

    /// Type id missing from the registry
    #[error("Activity type '{0}' is not registered")]
    UnknownType(String),

    /// Constructor rejected the persisted options
    #[error("Constructor of '{type_id}' failed: {detail}")]
    ConstructionFailed {
        /// Type id being constructed
        type_id: String,
        /// Constructor error message
        detail: String,
    },
}

/// Convenience result alias for machine operations
pub type VmResult<T> = std::result::Result<T, VmError>;

/// Convenience result alias for document encoding
pub type PersistResult<T> = std::result::Result<T, PersistError>;
