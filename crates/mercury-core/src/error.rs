//! Error types for mercury-core.

use thiserror::Error;

use crate::ids::CellHandle;

/// Result type for mercury-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in mercury-core.
///
/// Everything except [`Error::Handler`], [`Error::HostRejected`] and
/// [`Error::Proxy`] signals a mistake in the kernel integration and is
/// returned to the caller as-is.
#[derive(Debug, Error)]
pub enum Error {
    /// An execution was driven through an illegal state transition.
    #[error("illegal state: {0}")]
    IllegalState(&'static str),

    /// A controller with the same extension and id is already registered.
    #[error("notebook controller with id '{0}' already exists")]
    DuplicateController(String),

    /// A live execution already exists for the target.
    #[error("duplicate execution for {0}")]
    DuplicateExecution(String),

    /// A notebook execution was requested while cells of the notebook run.
    #[error("cannot start a notebook execution for {0} while cell executions are running")]
    ExecutionOverlap(String),

    /// The controller is not associated with the notebook.
    #[error("notebook controller '{controller}' is not associated with notebook {notebook}")]
    NotAssociated { controller: String, notebook: String },

    /// The cell was removed from its notebook.
    #[error("cannot execute cell {0} that has been removed from its notebook")]
    CellRemoved(CellHandle),

    /// The cell does not belong to the notebook being executed.
    #[error("invalid cell {0} for this execution")]
    InvalidCell(CellHandle),

    /// The notebook is unknown to the document collaborator.
    #[error("notebook not found: {0}")]
    DocumentNotFound(String),

    /// The controller was disposed or rejected by the host.
    #[error("notebook controller '{0}' is disposed")]
    ControllerDisposed(String),

    /// A handle does not address a live object.
    #[error("unknown handle: {0}")]
    UnknownHandle(u32),

    /// A kernel callback failed while serving a request that expects an
    /// answer.
    #[error("kernel handler failed: {0}")]
    Handler(String),

    /// The host declined a request.
    #[error("host rejected request: {0}")]
    HostRejected(String),

    /// The proxy channel to the host failed.
    #[error("proxy error: {0}")]
    Proxy(String),
}

impl Error {
    /// Whether this error is the result of a kernel integration bug, as
    /// opposed to a failure of the host side.
    pub fn is_invariant_violation(&self) -> bool {
        !matches!(
            self,
            Error::Handler(_) | Error::HostRejected(_) | Error::Proxy(_)
        )
    }
}
