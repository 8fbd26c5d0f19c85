//! Callbacks a kernel installs on its controller.

use futures::future::BoxFuture;

use crate::documents::{NotebookCell, NotebookDocument};
use crate::execute::CancellationToken;
use crate::protocol::KernelSourceAction;

use super::controller::KernelController;

/// Future returned by kernel callbacks. Errors are logged and recorded by
/// the registry, never sent back to the host.
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<()>>;

/// Runs a batch of cells.
///
/// Called once per inbound execute request with the cells in request order.
/// The handler creates executions through the controller it is given.
pub trait ExecuteHandler: Send + Sync {
    fn execute(
        &self,
        cells: Vec<NotebookCell>,
        notebook: NotebookDocument,
        controller: KernelController,
    ) -> HandlerFuture;
}

impl<F> ExecuteHandler for F
where
    F: Fn(Vec<NotebookCell>, NotebookDocument, KernelController) -> HandlerFuture + Send + Sync,
{
    fn execute(
        &self,
        cells: Vec<NotebookCell>,
        notebook: NotebookDocument,
        controller: KernelController,
    ) -> HandlerFuture {
        self(cells, notebook, controller)
    }
}

/// Interrupts whatever the kernel is running for a notebook.
pub trait InterruptHandler: Send + Sync {
    fn interrupt(&self, notebook: NotebookDocument) -> HandlerFuture;
}

impl<F> InterruptHandler for F
where
    F: Fn(NotebookDocument) -> HandlerFuture + Send + Sync,
{
    fn interrupt(&self, notebook: NotebookDocument) -> HandlerFuture {
        self(notebook)
    }
}

/// Offers actions for finding or installing kernels of a notebook type.
pub trait KernelSourceActionProvider: Send + Sync {
    fn provide_actions(
        &self,
        token: CancellationToken,
    ) -> BoxFuture<'static, anyhow::Result<Vec<KernelSourceAction>>>;

    /// Whether the provider signals changes to its action list.
    fn emits_changes(&self) -> bool {
        false
    }
}

/// Which callback failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerOperation {
    Execute,
    Interrupt,
}

impl std::fmt::Display for HandlerOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerOperation::Execute => write!(f, "execute"),
            HandlerOperation::Interrupt => write!(f, "interrupt"),
        }
    }
}

/// A kernel callback that returned an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    pub controller_id: String,
    pub operation: HandlerOperation,
    pub message: String,
}
