//! Kernel controllers: the public handle of one registered kernel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config::KernelConfig;
use crate::documents::{NotebookCell, NotebookDocument, NotebookDocuments, NotebookSurface};
use crate::error::{Error, Result};
use crate::execute::ledger::ExecutionLedger;
use crate::execute::{CellExecution, NotebookExecution};
use crate::ids::{HandleAllocator, KernelHandle};
use crate::protocol::{HostMessage, KernelDescriptor};
use crate::proxy::HostProxy;
use crate::variables::VariableProvider;

use super::handlers::{ExecuteHandler, InterruptHandler};
use super::registry::RegistryShared;

/// Buffer of the selection and message subscriptions. Slow subscribers
/// lose the oldest events.
const EVENT_CAPACITY: usize = 64;

/// How strongly a kernel claims a notebook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotebookAffinity {
    Default = 1,
    Preferred = 2,
}

/// The host selected or deselected a kernel for a notebook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotebookSelection {
    pub notebook: String,
    pub selected: bool,
}

/// A message a renderer sent to the kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub surface: Option<NotebookSurface>,
    pub message: serde_json::Value,
}

/// Handle of one registered kernel.
///
/// Cheap to clone. Created by
/// [`KernelRegistry::create_controller`](crate::KernelRegistry::create_controller)
/// and alive until [`dispose`](Self::dispose).
#[derive(Clone)]
pub struct KernelController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    handle: KernelHandle,
    id: String,
    extension_id: String,
    proxy: Arc<dyn HostProxy>,
    documents: Arc<dyn NotebookDocuments>,
    ids: Arc<HandleAllocator>,
    ledger: Arc<ExecutionLedger>,
    config: KernelConfig,
    registry: Weak<RegistryShared>,
    state: Mutex<ControllerState>,
    /// Incremented by every metadata change; only the newest deferred sync
    /// sends.
    sync_token: AtomicU64,
    selection: broadcast::Sender<NotebookSelection>,
    messages: broadcast::Sender<ReceivedMessage>,
}

struct ControllerState {
    descriptor: KernelDescriptor,
    dirty: bool,
    associated: FxHashSet<String>,
    disposed: bool,
    /// The host rejected the registration.
    inert: bool,
    execute_handler: Arc<dyn ExecuteHandler>,
    interrupt_handler: Option<Arc<dyn InterruptHandler>>,
    variable_provider: Option<Arc<dyn VariableProvider>>,
}

impl std::fmt::Debug for KernelController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelController")
            .field("handle", &self.inner.handle)
            .field("id", &self.inner.id)
            .finish()
    }
}

impl KernelController {
    pub(crate) fn new(
        handle: KernelHandle,
        descriptor: KernelDescriptor,
        execute_handler: Arc<dyn ExecuteHandler>,
        shared: &Arc<RegistryShared>,
    ) -> Self {
        let (selection, _) = broadcast::channel(EVENT_CAPACITY);
        let (messages, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(ControllerInner {
                handle,
                id: descriptor.id.clone(),
                extension_id: descriptor.extension_id.clone(),
                proxy: shared.proxy.clone(),
                documents: shared.documents.clone(),
                ids: shared.ids.clone(),
                ledger: shared.ledger.clone(),
                config: shared.config.clone(),
                registry: Arc::downgrade(shared),
                state: Mutex::new(ControllerState {
                    descriptor,
                    dirty: false,
                    associated: FxHashSet::default(),
                    disposed: false,
                    inert: false,
                    execute_handler,
                    interrupt_handler: None,
                    variable_provider: None,
                }),
                sync_token: AtomicU64::new(0),
                selection,
                messages,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ControllerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn handle(&self) -> KernelHandle {
        self.inner.handle
    }

    /// Global id, `"{extension}/{local id}"`.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn extension_id(&self) -> &str {
        &self.inner.extension_id
    }

    /// Snapshot of the current metadata.
    pub fn descriptor(&self) -> KernelDescriptor {
        self.state().descriptor.clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.state().disposed
    }

    /// Whether the host rejected this kernel.
    pub fn is_inert(&self) -> bool {
        self.state().inert
    }

    /// Whether the host currently has this kernel selected for `notebook`.
    pub fn is_associated(&self, notebook: &str) -> bool {
        self.state().associated.contains(notebook)
    }

    // Metadata

    pub fn set_label(&self, label: impl Into<String>) {
        let label = label.into();
        self.update_descriptor(|d| d.label = label);
    }

    pub fn set_detail(&self, detail: Option<String>) {
        self.update_descriptor(|d| d.detail = detail);
    }

    pub fn set_description(&self, description: Option<String>) {
        self.update_descriptor(|d| d.description = description);
    }

    pub fn set_supported_languages(&self, languages: Vec<String>) {
        self.update_descriptor(|d| d.supported_languages = languages);
    }

    /// Declared by the kernel rather than derived from its handlers.
    pub fn set_supports_execution_order(&self, supported: bool) {
        self.update_descriptor(|d| d.supports_execution_order = supported);
    }

    pub fn set_execute_handler(&self, handler: impl ExecuteHandler + 'static) {
        self.state().execute_handler = Arc::new(handler);
    }

    /// Install or remove the interrupt handler. Kept in sync with
    /// `supports_interrupt`.
    pub fn set_interrupt_handler(&self, handler: Option<Arc<dyn InterruptHandler>>) {
        let supported = handler.is_some();
        self.state().interrupt_handler = handler;
        self.update_descriptor(|d| d.supports_interrupt = supported);
    }

    /// Install or remove the variable provider. Kept in sync with
    /// `has_variable_provider`.
    pub fn set_variable_provider(&self, provider: Option<Arc<dyn VariableProvider>>) {
        let present = provider.is_some();
        self.state().variable_provider = provider;
        self.update_descriptor(|d| d.has_variable_provider = present);
    }

    pub(crate) fn execute_handler(&self) -> Arc<dyn ExecuteHandler> {
        self.state().execute_handler.clone()
    }

    pub(crate) fn interrupt_handler(&self) -> Option<Arc<dyn InterruptHandler>> {
        self.state().interrupt_handler.clone()
    }

    pub(crate) fn variable_provider(&self) -> Option<Arc<dyn VariableProvider>> {
        self.state().variable_provider.clone()
    }

    fn update_descriptor(&self, update: impl FnOnce(&mut KernelDescriptor)) {
        {
            let mut state = self.state();
            update(&mut state.descriptor);
            state.dirty = true;
        }
        self.schedule_sync();
    }

    /// Defer the metadata sync by one scheduler turn so a run of setters
    /// produces a single `UpdateKernel`.
    fn schedule_sync(&self) {
        let token = self.inner.sync_token.fetch_add(1, Ordering::AcqRel) + 1;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let inner = Arc::downgrade(&self.inner);
                runtime.spawn(async move {
                    tokio::task::yield_now().await;
                    let Some(inner) = inner.upgrade() else { return };
                    if inner.sync_token.load(Ordering::Acquire) == token {
                        KernelController { inner }.flush_metadata();
                    }
                });
            }
            Err(_) => self.flush_metadata(),
        }
    }

    /// Send pending metadata changes now.
    pub fn flush_metadata(&self) {
        let descriptor = {
            let mut state = self.state();
            if !state.dirty || state.disposed || state.inert {
                return;
            }
            state.dirty = false;
            state.descriptor.clone()
        };
        self.inner.proxy.notify(HostMessage::UpdateKernel {
            handle: self.inner.handle,
            descriptor,
        });
    }

    // Executions

    fn ensure_live(&self) -> Result<()> {
        let state = self.state();
        if state.disposed || state.inert {
            return Err(Error::ControllerDisposed(self.inner.id.clone()));
        }
        Ok(())
    }

    fn ensure_associated(&self, notebook: &str) -> Result<()> {
        if self.is_associated(notebook) {
            Ok(())
        } else {
            Err(Error::NotAssociated {
                controller: self.inner.id.clone(),
                notebook: notebook.to_string(),
            })
        }
    }

    /// Create an execution for one cell.
    ///
    /// Fails if the controller is disposed, the cell was removed, the
    /// notebook is not associated with this kernel, or the cell already has
    /// a live execution. The execution leaves the live set when it resolves.
    pub fn create_notebook_cell_execution(&self, cell: &NotebookCell) -> Result<CellExecution> {
        self.ensure_live()?;
        if cell.is_removed() {
            return Err(Error::CellRemoved(cell.handle()));
        }
        let uri = cell.notebook_uri();
        self.ensure_associated(uri)?;
        let document = self
            .inner
            .documents
            .document(uri)
            .ok_or_else(|| Error::DocumentNotFound(uri.to_string()))?;

        let key = (uri.to_string(), cell.handle());
        let ledger = Arc::downgrade(&self.inner.ledger);
        let resolved_key = key.clone();
        self.inner.ledger.insert_cell(key, || {
            let handle = self.inner.ids.next_execution();
            tracing::debug!(execution = %handle, cell = %cell.handle(), "creating cell execution");
            CellExecution::new(
                handle,
                &self.inner.id,
                cell.clone(),
                document,
                self.inner.proxy.clone(),
                &self.inner.config,
                Box::new(move || {
                    if let Some(ledger) = ledger.upgrade() {
                        ledger.remove_cell(&resolved_key);
                    }
                }),
            )
        })
    }

    /// Create an execution spanning a whole notebook.
    ///
    /// Same preconditions as cell executions, and no cell of the notebook
    /// may be executing.
    pub fn create_notebook_execution(
        &self,
        notebook: &NotebookDocument,
    ) -> Result<NotebookExecution> {
        self.ensure_live()?;
        self.ensure_associated(notebook.uri())?;

        let uri = notebook.uri().to_string();
        let ledger = Arc::downgrade(&self.inner.ledger);
        self.inner.ledger.insert_notebook(notebook.uri(), || {
            let handle = self.inner.ids.next_execution();
            tracing::debug!(execution = %handle, notebook = %uri, "creating notebook execution");
            NotebookExecution::new(
                handle,
                &self.inner.id,
                notebook.clone(),
                self.inner.proxy.clone(),
                Box::new(move || {
                    if let Some(ledger) = ledger.upgrade() {
                        ledger.remove_notebook(&uri);
                    }
                }),
            )
        })
    }

    // Host interaction

    /// Tell the host how strongly this kernel claims `notebook`.
    pub fn update_notebook_affinity(&self, notebook: &NotebookDocument, affinity: NotebookAffinity) {
        self.inner.proxy.notify(HostMessage::UpdateNotebookPriority {
            handle: self.inner.handle,
            notebook: notebook.uri().to_string(),
            priority: Some(affinity as u32),
        });
    }

    /// Send a message to the renderers of this kernel, optionally to one
    /// surface only. Resolves to whether the host delivered it.
    ///
    /// The message is enqueued before this returns.
    pub fn post_message(
        &self,
        message: serde_json::Value,
        surface: Option<&NotebookSurface>,
    ) -> BoxFuture<'static, Result<bool>> {
        if let Err(err) = self.ensure_live() {
            return future::ready(Err(err)).boxed();
        }
        let surface = surface
            .and_then(|surface| self.inner.documents.surface(&surface.id))
            .map(|surface| surface.id);
        self.inner.proxy.request(HostMessage::PostMessage {
            handle: self.inner.handle,
            surface,
            message,
        })
    }

    /// Tell the host that the variables of `notebook` changed. Ignored
    /// without a variable provider.
    pub fn notify_variables_changed(&self, notebook: &NotebookDocument) {
        if self.state().variable_provider.is_none() {
            return;
        }
        self.inner.proxy.notify(HostMessage::VariablesUpdated {
            notebook: notebook.uri().to_string(),
        });
    }

    /// Subscribe to selection changes.
    pub fn selected_notebooks(&self) -> broadcast::Receiver<NotebookSelection> {
        self.inner.selection.subscribe()
    }

    /// Subscribe to messages from renderers.
    pub fn received_messages(&self) -> broadcast::Receiver<ReceivedMessage> {
        self.inner.messages.subscribe()
    }

    pub(crate) fn set_association(&self, notebook: &str, selected: bool) {
        let changed = {
            let mut state = self.state();
            if selected {
                state.associated.insert(notebook.to_string())
            } else {
                state.associated.remove(notebook)
            }
        };
        if !changed {
            return;
        }
        // No subscribers is fine.
        let _ = self.inner.selection.send(NotebookSelection {
            notebook: notebook.to_string(),
            selected,
        });
    }

    pub(crate) fn receive_message(&self, surface: Option<NotebookSurface>, message: serde_json::Value) {
        let _ = self.inner.messages.send(ReceivedMessage { surface, message });
    }

    pub(crate) fn mark_inert(&self) {
        self.state().inert = true;
    }

    /// Unregister the kernel. Idempotent.
    ///
    /// Running executions are left alone; the kernel may still end them.
    pub fn dispose(&self) {
        let inert = {
            let mut state = self.state();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.inert
        };
        if let Some(registry) = self.inner.registry.upgrade() {
            registry.remove_controller(self.inner.handle);
        }
        // A rejected kernel was never known to the host.
        if !inert {
            self.inner.proxy.notify(HostMessage::RemoveKernel {
                handle: self.inner.handle,
            });
        }
        tracing::debug!(kernel = %self.inner.id, "disposed kernel controller");
    }
}
