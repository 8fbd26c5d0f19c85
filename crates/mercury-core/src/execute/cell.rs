//! Cell-scoped execution task.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::collector::{Flushed, UpdateCollector};
use crate::config::KernelConfig;
use crate::documents::{NotebookCell, NotebookDocument};
use crate::error::{Error, Result};
use crate::ids::{CellHandle, ExecutionHandle};
use crate::protocol::{CellExecuteUpdate, CellExecutionComplete, HostMessage};
use crate::proxy::HostProxy;

use super::context::CancellationToken;
use super::error::{ExecutionError, serialize_error};
use super::output::{CellOutput, OutputItem, dedupe_items, dedupe_outputs};

/// Lifecycle of an execution. Only `Init → Started → Resolved` is legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Init,
    Started,
    Resolved,
}

/// Hook run once, when an execution resolves.
pub(crate) type ResolveHook = Box<dyn FnOnce() + Send>;

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

/// One run of one cell.
///
/// Created through
/// [`KernelController::create_notebook_cell_execution`](crate::KernelController::create_notebook_cell_execution).
/// Output and timing updates are batched through an [`UpdateCollector`];
/// [`end`](Self::end) flushes the batch and sends the terminal record
/// directly.
#[derive(Clone)]
pub struct CellExecution {
    inner: Arc<CellExecutionInner>,
}

struct CellExecutionInner {
    handle: ExecutionHandle,
    cell: NotebookCell,
    document: NotebookDocument,
    proxy: Arc<dyn HostProxy>,
    collector: UpdateCollector<CellExecuteUpdate>,
    token: CancellationToken,
    progress: Mutex<Progress>,
}

struct Progress {
    state: ExecutionState,
    execution_order: Option<u32>,
    on_resolved: Option<ResolveHook>,
}

impl std::fmt::Debug for CellExecution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellExecution")
            .field("handle", &self.inner.handle)
            .field("cell", &self.inner.cell.handle())
            .field("state", &self.state())
            .finish()
    }
}

impl CellExecution {
    /// Create the execution and announce it to the host.
    pub(crate) fn new(
        handle: ExecutionHandle,
        controller_id: &str,
        cell: NotebookCell,
        document: NotebookDocument,
        proxy: Arc<dyn HostProxy>,
        config: &KernelConfig,
        on_resolved: ResolveHook,
    ) -> Self {
        proxy.notify(HostMessage::CreateExecution {
            execution: handle,
            controller_id: controller_id.to_string(),
            notebook: document.uri().to_string(),
            cell: cell.handle(),
        });

        let sink_proxy = proxy.clone();
        let collector = UpdateCollector::new(config.flush_delay, move |updates| {
            sink_proxy.notify(HostMessage::UpdateExecution {
                execution: handle,
                updates,
            });
        });

        Self {
            inner: Arc::new(CellExecutionInner {
                handle,
                cell,
                document,
                proxy,
                collector,
                token: CancellationToken::new(),
                progress: Mutex::new(Progress {
                    state: ExecutionState::Init,
                    execution_order: None,
                    on_resolved: Some(on_resolved),
                }),
            }),
        }
    }

    fn progress(&self) -> MutexGuard<'_, Progress> {
        self.inner
            .progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn handle(&self) -> ExecutionHandle {
        self.inner.handle
    }

    pub fn cell(&self) -> &NotebookCell {
        &self.inner.cell
    }

    pub fn state(&self) -> ExecutionState {
        self.progress().state
    }

    /// Cancellation signal for the kernel to observe.
    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    /// Request cancellation. Does not change the state; the kernel still
    /// has to call [`end`](Self::end).
    pub fn cancel(&self) {
        self.inner.token.cancel();
    }

    pub fn execution_order(&self) -> Option<u32> {
        self.progress().execution_order
    }

    /// Set the execution order. Allowed in any state.
    pub fn set_execution_order(&self, order: Option<u32>) -> Flushed {
        let mut progress = self.progress();
        progress.execution_order = order;
        self.inner.collector.submit(CellExecuteUpdate::ExecutionState {
            execution_order: order,
            run_start_time: None,
        })
    }

    /// Mark the execution as started. `start_time` defaults to now.
    pub fn start(&self, start_time: Option<u64>) -> Result<Flushed> {
        let mut progress = self.progress();
        if progress.state != ExecutionState::Init {
            return Err(Error::IllegalState("cannot call start again"));
        }
        progress.state = ExecutionState::Started;
        Ok(self.inner.collector.submit(CellExecuteUpdate::ExecutionState {
            execution_order: None,
            run_start_time: Some(start_time.unwrap_or_else(now_millis)),
        }))
    }

    /// Resolve the execution.
    ///
    /// Pending updates are flushed first so the terminal record is never
    /// delayed by the batching window, then the record is sent directly.
    pub fn end(
        &self,
        success: Option<bool>,
        end_time: Option<u64>,
        error: Option<&ExecutionError>,
    ) -> Result<()> {
        let on_resolved = {
            let mut progress = self.progress();
            match progress.state {
                ExecutionState::Init => {
                    return Err(Error::IllegalState("must call start before end"));
                }
                ExecutionState::Resolved => {
                    return Err(Error::IllegalState("cannot call end twice"));
                }
                ExecutionState::Started => {}
            }
            progress.state = ExecutionState::Resolved;
            progress.on_resolved.take()
        };

        self.inner.collector.flush();
        self.inner.proxy.notify(HostMessage::CompleteExecution {
            execution: self.inner.handle,
            complete: CellExecutionComplete {
                run_end_time: Some(end_time.unwrap_or_else(now_millis)),
                last_run_success: success,
                error: serialize_error(error),
            },
        });

        if let Some(hook) = on_resolved {
            hook();
        }
        Ok(())
    }

    /// Remove all outputs of the target cell.
    pub fn clear_output(&self, target: Option<&NotebookCell>) -> Result<Flushed> {
        self.replace_output(Vec::new(), target)
    }

    /// Replace all outputs of the target cell (this execution's cell by
    /// default).
    pub fn replace_output(
        &self,
        outputs: Vec<CellOutput>,
        target: Option<&NotebookCell>,
    ) -> Result<Flushed> {
        self.submit_outputs(outputs, target, false)
    }

    /// Append outputs to the target cell.
    pub fn append_output(
        &self,
        outputs: Vec<CellOutput>,
        target: Option<&NotebookCell>,
    ) -> Result<Flushed> {
        self.submit_outputs(outputs, target, true)
    }

    /// Replace the items of an existing output.
    pub fn replace_output_items(&self, items: Vec<OutputItem>, output_id: &str) -> Result<Flushed> {
        self.submit_items(items, output_id, false)
    }

    /// Append items to an existing output.
    pub fn append_output_items(&self, items: Vec<OutputItem>, output_id: &str) -> Result<Flushed> {
        self.submit_items(items, output_id, true)
    }

    fn submit_outputs(
        &self,
        outputs: Vec<CellOutput>,
        target: Option<&NotebookCell>,
        append: bool,
    ) -> Result<Flushed> {
        let progress = self.progress();
        verify_started(progress.state)?;
        let cell = self.target_cell(target)?;
        Ok(self.inner.collector.submit(CellExecuteUpdate::Output {
            cell,
            append,
            outputs: dedupe_outputs(outputs),
        }))
    }

    fn submit_items(&self, items: Vec<OutputItem>, output_id: &str, append: bool) -> Result<Flushed> {
        let progress = self.progress();
        verify_started(progress.state)?;
        Ok(self.inner.collector.submit(CellExecuteUpdate::OutputItems {
            output_id: output_id.to_string(),
            append,
            items: dedupe_items(items),
        }))
    }

    /// Outputs may target any live cell of the same notebook.
    fn target_cell(&self, target: Option<&NotebookCell>) -> Result<CellHandle> {
        let Some(target) = target else {
            return Ok(self.inner.cell.handle());
        };
        let same_notebook = target.notebook_uri() == self.inner.document.uri();
        if same_notebook && self.inner.document.cell(target.handle()).is_some() {
            Ok(target.handle())
        } else {
            Err(Error::InvalidCell(target.handle()))
        }
    }
}

fn verify_started(state: ExecutionState) -> Result<()> {
    match state {
        ExecutionState::Init => Err(Error::IllegalState(
            "must call start before modifying output",
        )),
        ExecutionState::Resolved => Err(Error::IllegalState("cannot modify output after resolve")),
        ExecutionState::Started => Ok(()),
    }
}
