//! Per-process directory of kernels and the entry point for host calls.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use rustc_hash::FxHashMap;

use crate::config::KernelConfig;
use crate::documents::{NotebookDocument, NotebookDocuments};
use crate::error::{Error, Result};
use crate::execute::CancellationToken;
use crate::execute::ledger::ExecutionLedger;
use crate::ids::{
    CellHandle, DetectionTaskHandle, HandleAllocator, KernelHandle, SourceActionProviderHandle,
};
use crate::protocol::{HostMessage, KernelDescriptor, KernelSourceAction};
use crate::proxy::HostProxy;
use crate::variables::{VariablePager, VariableRequest};

use super::controller::KernelController;
use super::handlers::{
    ExecuteHandler, HandlerFailure, HandlerOperation, KernelSourceActionProvider,
};
use super::sources::{KernelDetectionTask, KernelSourceActionRegistration};

/// Registry of every kernel, detection task and source action provider in
/// the process.
///
/// All inbound host calls enter here. Calls addressing a handle that no
/// longer exists are dropped with a trace log, since the object was
/// disposed while the call was in flight. The one exception is
/// [`provide_kernel_source_actions`](Self::provide_kernel_source_actions),
/// whose caller expects an answer.
#[derive(Clone)]
pub struct KernelRegistry {
    shared: Arc<RegistryShared>,
}

pub(crate) struct RegistryShared {
    pub(crate) proxy: Arc<dyn HostProxy>,
    pub(crate) documents: Arc<dyn NotebookDocuments>,
    pub(crate) ids: Arc<HandleAllocator>,
    pub(crate) ledger: Arc<ExecutionLedger>,
    pub(crate) config: KernelConfig,
    pager: VariablePager,
    state: Mutex<RegistryState>,
    failures: Mutex<Vec<HandlerFailure>>,
}

#[derive(Default)]
struct RegistryState {
    controllers: FxHashMap<KernelHandle, KernelController>,
    detection_tasks: FxHashMap<DetectionTaskHandle, KernelDetectionTask>,
    source_action_providers: FxHashMap<SourceActionProviderHandle, KernelSourceActionRegistration>,
}

impl RegistryShared {
    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn remove_controller(&self, handle: KernelHandle) {
        self.state().controllers.remove(&handle);
    }

    pub(crate) fn remove_detection_task(&self, handle: DetectionTaskHandle) {
        self.state().detection_tasks.remove(&handle);
    }

    pub(crate) fn remove_source_action_provider(&self, handle: SourceActionProviderHandle) {
        self.state().source_action_providers.remove(&handle);
    }
}

impl KernelRegistry {
    pub fn new(
        proxy: Arc<dyn HostProxy>,
        documents: Arc<dyn NotebookDocuments>,
        config: KernelConfig,
    ) -> Self {
        let ids = Arc::new(HandleAllocator::new());
        Self {
            shared: Arc::new(RegistryShared {
                proxy,
                documents,
                pager: VariablePager::new(config.variable_page_size, ids.clone()),
                ids,
                ledger: Arc::new(ExecutionLedger::default()),
                config,
                state: Mutex::new(RegistryState::default()),
                failures: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.shared.config
    }

    pub fn controller(&self, handle: KernelHandle) -> Option<KernelController> {
        self.shared.state().controllers.get(&handle).cloned()
    }

    pub fn controllers(&self) -> Vec<KernelController> {
        self.shared.state().controllers.values().cloned().collect()
    }

    /// Number of cell executions that have not resolved yet.
    pub fn live_cell_executions(&self) -> usize {
        self.shared.ledger.live_cells()
    }

    fn lookup(&self, handle: KernelHandle) -> Option<KernelController> {
        let controller = self.controller(handle);
        if controller.is_none() {
            tracing::trace!(kernel = %handle, "no controller for handle, ignoring call");
        }
        controller
    }

    fn lookup_document(&self, uri: &str) -> Option<NotebookDocument> {
        let document = self.shared.documents.document(uri);
        if document.is_none() {
            tracing::trace!(notebook = %uri, "notebook is gone, ignoring call");
        }
        document
    }

    /// Register a kernel.
    ///
    /// The registration is sent to the host as a request. If the host
    /// rejects it, the controller is marked inert: it stays registered but
    /// refuses to create executions.
    pub fn create_controller(
        &self,
        extension_id: &str,
        local_id: &str,
        notebook_type: &str,
        label: &str,
        handler: impl ExecuteHandler + 'static,
    ) -> Result<KernelController> {
        let id = format!("{}/{}", extension_id, local_id);
        let descriptor = KernelDescriptor {
            id: id.clone(),
            extension_id: extension_id.to_string(),
            notebook_type: notebook_type.to_string(),
            label: label.to_string(),
            detail: None,
            description: None,
            supported_languages: Vec::new(),
            supports_execution_order: false,
            supports_interrupt: false,
            has_variable_provider: false,
        };

        let controller = {
            let mut state = self.shared.state();
            if state.controllers.values().any(|c| c.id() == id) {
                return Err(Error::DuplicateController(id));
            }
            let handle = self.shared.ids.next_kernel();
            let controller =
                KernelController::new(handle, descriptor.clone(), Arc::new(handler), &self.shared);
            state.controllers.insert(handle, controller.clone());
            controller
        };

        tracing::debug!(kernel = %id, handle = %controller.handle(), "registering kernel");
        let verdict = self.shared.proxy.request(HostMessage::AddKernel {
            handle: controller.handle(),
            descriptor,
        });

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let pending = controller.clone();
                runtime.spawn(async move { settle_registration(&pending, verdict.await) });
            }
            Err(_) => match verdict.now_or_never() {
                Some(verdict) => settle_registration(&controller, verdict),
                None => tracing::debug!(kernel = %id, "no runtime to await the host verdict"),
            },
        }

        Ok(controller)
    }

    /// Start a detection task for `notebook_type`.
    pub fn create_detection_task(&self, extension_id: &str, notebook_type: &str) -> KernelDetectionTask {
        let handle = self.shared.ids.next_detection_task();
        let task = KernelDetectionTask::new(handle, extension_id, notebook_type, &self.shared);
        self.shared
            .state()
            .detection_tasks
            .insert(handle, task.clone());
        self.shared.proxy.notify(HostMessage::AddKernelDetectionTask {
            handle,
            notebook_type: notebook_type.to_string(),
        });
        task
    }

    /// Register a source action provider for `notebook_type`.
    pub fn register_kernel_source_action_provider(
        &self,
        extension_id: &str,
        notebook_type: &str,
        provider: impl KernelSourceActionProvider + 'static,
    ) -> KernelSourceActionRegistration {
        let handle = self.shared.ids.next_source_action_provider();
        let emits_changes = provider.emits_changes();
        let registration = KernelSourceActionRegistration::new(
            handle,
            extension_id,
            Arc::new(provider),
            &self.shared,
        );
        self.shared
            .state()
            .source_action_providers
            .insert(handle, registration.clone());
        self.shared
            .proxy
            .notify(HostMessage::AddKernelSourceActionProvider {
                handle,
                notebook_type: notebook_type.to_string(),
                emits_changes,
            });
        registration
    }

    /// Dispose everything `extension_id` registered.
    pub fn dispose_extension(&self, extension_id: &str) {
        let (controllers, tasks, providers) = {
            let state = self.shared.state();
            (
                state
                    .controllers
                    .values()
                    .filter(|c| c.extension_id() == extension_id)
                    .cloned()
                    .collect::<Vec<_>>(),
                state
                    .detection_tasks
                    .values()
                    .filter(|t| t.extension_id() == extension_id)
                    .cloned()
                    .collect::<Vec<_>>(),
                state
                    .source_action_providers
                    .values()
                    .filter(|p| p.extension_id() == extension_id)
                    .cloned()
                    .collect::<Vec<_>>(),
            )
        };
        tracing::debug!(
            extension = %extension_id,
            controllers = controllers.len(),
            detection_tasks = tasks.len(),
            providers = providers.len(),
            "disposing extension"
        );
        controllers.iter().for_each(KernelController::dispose);
        tasks.iter().for_each(KernelDetectionTask::dispose);
        providers
            .iter()
            .for_each(KernelSourceActionRegistration::dispose);
    }

    /// Drain the recorded handler failures.
    pub fn take_handler_failures(&self) -> Vec<HandlerFailure> {
        std::mem::take(
            &mut *self
                .shared
                .failures
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    fn record_failure(&self, controller: &KernelController, operation: HandlerOperation, err: anyhow::Error) {
        let message = format!("{:#}", err);
        tracing::error!(kernel = %controller.id(), %operation, error = %message, "kernel handler failed");
        self.shared
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(HandlerFailure {
                controller_id: controller.id().to_string(),
                operation,
                message,
            });
    }

    // Inbound calls

    /// The host selected (or deselected) a kernel for a notebook.
    pub fn associate_notebook(&self, handle: KernelHandle, notebook: &str, selected: bool) {
        if let Some(controller) = self.lookup(handle) {
            controller.set_association(notebook, selected);
        }
    }

    /// Run cells. Handles that no longer resolve to a cell are skipped; the
    /// rest reach the execute handler in one ordered batch.
    pub async fn execute_cells(&self, handle: KernelHandle, notebook: &str, cells: &[CellHandle]) {
        let Some(controller) = self.lookup(handle) else { return };
        let Some(document) = self.lookup_document(notebook) else { return };

        let cells: Vec<_> = cells
            .iter()
            .filter_map(|&cell| document.cell(cell))
            .collect();
        tracing::debug!(kernel = %controller.id(), cells = cells.len(), "executing cells");

        let handler = controller.execute_handler();
        if let Err(err) = handler.execute(cells, document, controller.clone()).await {
            self.record_failure(&controller, HandlerOperation::Execute, err);
        }
    }

    /// Cancel cells.
    ///
    /// With an interrupt handler the whole notebook is interrupted (and a
    /// live notebook execution is terminated when cells are named).
    /// Without one, each named cell's execution token is cancelled.
    pub async fn cancel_cells(&self, handle: KernelHandle, notebook: &str, cells: &[CellHandle]) {
        let Some(controller) = self.lookup(handle) else { return };
        let Some(document) = self.lookup_document(notebook) else { return };

        match controller.interrupt_handler() {
            Some(interrupt) => {
                if !cells.is_empty() {
                    if let Some(execution) = self.shared.ledger.notebook(notebook) {
                        execution.force_terminate();
                    }
                }
                tracing::debug!(kernel = %controller.id(), notebook, "interrupting");
                if let Err(err) = interrupt.interrupt(document).await {
                    self.record_failure(&controller, HandlerOperation::Interrupt, err);
                }
            }
            None => {
                for &cell in cells {
                    if let Some(execution) = self.shared.ledger.cell(&(notebook.to_string(), cell)) {
                        execution.cancel();
                    }
                }
            }
        }
    }

    /// Stream one page of variables. Returns the number sent.
    pub async fn provide_variables(
        &self,
        handle: KernelHandle,
        notebook: &str,
        request: VariableRequest,
        token: CancellationToken,
    ) -> usize {
        let Some(controller) = self.lookup(handle) else { return 0 };
        let Some(provider) = controller.variable_provider() else {
            tracing::trace!(kernel = %controller.id(), "kernel has no variable provider");
            return 0;
        };
        let Some(document) = self.lookup_document(notebook) else { return 0 };

        self.shared
            .pager
            .provide(
                request,
                document,
                provider.as_ref(),
                controller.extension_id(),
                self.shared.proxy.as_ref(),
                token,
            )
            .await
    }

    /// A renderer sent a message to a kernel.
    pub fn accept_message(
        &self,
        handle: KernelHandle,
        surface: Option<&str>,
        message: serde_json::Value,
    ) {
        let Some(controller) = self.lookup(handle) else { return };
        let surface = surface.and_then(|id| self.shared.documents.surface(id));
        controller.receive_message(surface, message);
    }

    /// Ask a source action provider for its actions.
    pub async fn provide_kernel_source_actions(
        &self,
        handle: SourceActionProviderHandle,
        token: CancellationToken,
    ) -> Result<Vec<KernelSourceAction>> {
        let registration = self
            .shared
            .state()
            .source_action_providers
            .get(&handle)
            .cloned()
            .ok_or(Error::UnknownHandle(handle.get()))?;

        registration
            .provider()
            .provide_actions(token)
            .await
            .map_err(|err| Error::Handler(format!("{:#}", err)))
    }
}

fn settle_registration(controller: &KernelController, verdict: Result<bool>) {
    let reason = match verdict {
        Ok(true) => return,
        Ok(false) => "host declined".to_string(),
        Err(err) => err.to_string(),
    };
    tracing::warn!(kernel = %controller.id(), %reason, "host rejected kernel, marking it inert");
    controller.mark_inert();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::DocumentStore;
    use crate::execute::ExecutionState;
    use crate::kernel::handlers::HandlerFuture;
    use crate::kernel::NotebookSelection;
    use crate::proxy::RecordingProxy;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const NOTEBOOK: &str = "file:///a.ipynb";

    struct Fixture {
        proxy: Arc<RecordingProxy>,
        store: Arc<DocumentStore>,
        registry: KernelRegistry,
    }

    fn fixture_with(proxy: RecordingProxy) -> Fixture {
        let proxy = Arc::new(proxy);
        let store = Arc::new(DocumentStore::new());
        store.open(NOTEBOOK, "jupyter-notebook", 3);
        let registry = KernelRegistry::new(proxy.clone(), store.clone(), KernelConfig::default());
        Fixture {
            proxy,
            store,
            registry,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(RecordingProxy::new())
    }

    fn noop(_: Vec<crate::NotebookCell>, _: NotebookDocument, _: KernelController) -> HandlerFuture {
        Box::pin(async { anyhow::Ok(()) })
    }

    #[tokio::test]
    async fn test_duplicate_controller_rejected() {
        let f = fixture();
        f.registry
            .create_controller("ext", "k", "jupyter-notebook", "K", noop)
            .unwrap();
        let err = f
            .registry
            .create_controller("ext", "k", "jupyter-notebook", "K again", noop)
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateController(id) if id == "ext/k"));

        // Same local id under another extension is fine.
        f.registry
            .create_controller("other", "k", "jupyter-notebook", "K", noop)
            .unwrap();
        assert_eq!(f.registry.controllers().len(), 2);
    }

    #[tokio::test]
    async fn test_rejected_controller_is_inert() {
        let f = fixture_with(RecordingProxy::rejecting_kernels());
        let controller = f
            .registry
            .create_controller("ext", "k", "jupyter-notebook", "K", noop)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(controller.is_inert());
        f.registry
            .associate_notebook(controller.handle(), NOTEBOOK, true);
        let cell = f.store.cell(NOTEBOOK, CellHandle::new(0)).unwrap();
        assert!(matches!(
            controller.create_notebook_cell_execution(&cell),
            Err(Error::ControllerDisposed(_))
        ));

        // Never known to the host, so disposal sends nothing.
        f.proxy.take();
        controller.dispose();
        assert!(f.proxy.take().is_empty());
        assert!(f.registry.controller(controller.handle()).is_none());
    }

    #[tokio::test]
    async fn test_execution_preconditions() {
        let f = fixture();
        let controller = f
            .registry
            .create_controller("ext", "k", "jupyter-notebook", "K", noop)
            .unwrap();
        let cell = f.store.cell(NOTEBOOK, CellHandle::new(1)).unwrap();

        assert!(matches!(
            controller.create_notebook_cell_execution(&cell),
            Err(Error::NotAssociated { .. })
        ));

        f.registry
            .associate_notebook(controller.handle(), NOTEBOOK, true);
        let execution = controller.create_notebook_cell_execution(&cell).unwrap();
        assert!(matches!(
            controller.create_notebook_cell_execution(&cell),
            Err(Error::DuplicateExecution(_))
        ));
        assert_eq!(f.registry.live_cell_executions(), 1);

        execution.start(None).unwrap();
        execution.end(Some(true), None, None).unwrap();
        assert_eq!(f.registry.live_cell_executions(), 0);
        let again = controller.create_notebook_cell_execution(&cell).unwrap();
        assert_eq!(again.state(), ExecutionState::Init);
        assert_ne!(again.handle(), execution.handle());

        let document = f.store.document(NOTEBOOK).unwrap();
        document.remove_cell(CellHandle::new(2));
        let removed = f.store.cell(NOTEBOOK, CellHandle::new(0)).unwrap();
        document.remove_cell(CellHandle::new(0));
        assert!(matches!(
            controller.create_notebook_cell_execution(&removed),
            Err(Error::CellRemoved(_))
        ));

        controller.dispose();
        assert!(matches!(
            controller.create_notebook_cell_execution(&cell),
            Err(Error::ControllerDisposed(_))
        ));
    }

    #[tokio::test]
    async fn test_notebook_execution_excludes_cell_executions() {
        let f = fixture();
        let controller = f
            .registry
            .create_controller("ext", "k", "jupyter-notebook", "K", noop)
            .unwrap();
        f.registry
            .associate_notebook(controller.handle(), NOTEBOOK, true);
        let document = f.store.document(NOTEBOOK).unwrap();
        let cell = document.cell(CellHandle::new(0)).unwrap();

        let running = controller.create_notebook_cell_execution(&cell).unwrap();
        assert!(matches!(
            controller.create_notebook_execution(&document),
            Err(Error::ExecutionOverlap(_))
        ));
        running.start(None).unwrap();
        running.end(None, None, None).unwrap();

        let whole = controller.create_notebook_execution(&document).unwrap();
        assert!(matches!(
            controller.create_notebook_execution(&document),
            Err(Error::DuplicateExecution(_))
        ));
        whole.start().unwrap();
        whole.end().unwrap();
        controller.create_notebook_execution(&document).unwrap();
    }

    #[tokio::test]
    async fn test_metadata_changes_coalesce() {
        let f = fixture();
        let controller = f
            .registry
            .create_controller("ext", "k", "jupyter-notebook", "K", noop)
            .unwrap();
        f.proxy.take();

        controller.set_label("Python 3");
        controller.set_detail(Some("venv".to_string()));
        controller.set_supported_languages(vec!["python".to_string()]);
        tokio::time::sleep(Duration::from_millis(5)).await;

        let updates: Vec<_> = f
            .proxy
            .take()
            .into_iter()
            .filter_map(|msg| match msg {
                HostMessage::UpdateKernel { descriptor, .. } => Some(descriptor),
                _ => None,
            })
            .collect();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].label, "Python 3");
        assert_eq!(updates[0].detail.as_deref(), Some("venv"));
        assert_eq!(updates[0].supported_languages, vec!["python".to_string()]);

        controller.flush_metadata();
        assert!(f.proxy.take().is_empty(), "nothing dirty after sync");
    }

    #[tokio::test]
    async fn test_capabilities_mirror_handlers() {
        let f = fixture();
        let controller = f
            .registry
            .create_controller("ext", "k", "jupyter-notebook", "K", noop)
            .unwrap();
        let interrupt: Arc<dyn crate::InterruptHandler> =
            Arc::new(|_: NotebookDocument| -> HandlerFuture { Box::pin(async { anyhow::Ok(()) }) });
        controller.set_interrupt_handler(Some(interrupt));
        assert!(controller.descriptor().supports_interrupt);
        controller.set_interrupt_handler(None);
        assert!(!controller.descriptor().supports_interrupt);
        assert!(!controller.descriptor().has_variable_provider);

        // Execution order is declared, not derived.
        assert!(!controller.descriptor().supports_execution_order);
        controller.set_supports_execution_order(true);
        assert!(controller.descriptor().supports_execution_order);
    }

    #[tokio::test]
    async fn test_selection_events() {
        let f = fixture();
        let controller = f
            .registry
            .create_controller("ext", "k", "jupyter-notebook", "K", noop)
            .unwrap();
        let mut selections = controller.selected_notebooks();

        f.registry
            .associate_notebook(controller.handle(), NOTEBOOK, true);
        f.registry
            .associate_notebook(controller.handle(), NOTEBOOK, true);
        f.registry
            .associate_notebook(controller.handle(), NOTEBOOK, false);

        assert_eq!(
            selections.try_recv().unwrap(),
            NotebookSelection {
                notebook: NOTEBOOK.to_string(),
                selected: true
            }
        );
        assert!(!selections.try_recv().unwrap().selected);
        assert!(selections.try_recv().is_err());
        assert!(!controller.is_associated(NOTEBOOK));
    }

    #[tokio::test]
    async fn test_unknown_handles_are_ignored() {
        let f = fixture();
        let missing = KernelHandle::new(42);
        f.registry.associate_notebook(missing, NOTEBOOK, true);
        f.registry
            .execute_cells(missing, NOTEBOOK, &[CellHandle::new(0)])
            .await;
        f.registry.cancel_cells(missing, NOTEBOOK, &[]).await;
        f.registry
            .accept_message(missing, None, serde_json::json!({}));
        assert!(f.proxy.take().is_empty());

        let err = f
            .registry
            .provide_kernel_source_actions(SourceActionProviderHandle::new(9), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownHandle(9)));
    }

    #[tokio::test]
    async fn test_execute_failures_are_recorded() {
        let f = fixture();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let handler = move |cells: Vec<crate::NotebookCell>,
                            _: NotebookDocument,
                            _: KernelController|
              -> HandlerFuture {
            seen.fetch_add(cells.len(), Ordering::SeqCst);
            Box::pin(async { Err::<(), _>(anyhow::anyhow!("kernel died")) })
        };
        let controller = f
            .registry
            .create_controller("ext", "k", "jupyter-notebook", "K", handler)
            .unwrap();

        f.registry
            .execute_cells(
                controller.handle(),
                NOTEBOOK,
                &[CellHandle::new(0), CellHandle::new(99), CellHandle::new(2)],
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2, "missing cells are skipped");
        let failures = f.registry.take_handler_failures();
        assert_eq!(
            failures,
            vec![HandlerFailure {
                controller_id: "ext/k".to_string(),
                operation: HandlerOperation::Execute,
                message: "kernel died".to_string(),
            }]
        );
        assert!(f.registry.take_handler_failures().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_without_interrupt_cancels_tokens() {
        let f = fixture();
        let controller = f
            .registry
            .create_controller("ext", "k", "jupyter-notebook", "K", noop)
            .unwrap();
        f.registry
            .associate_notebook(controller.handle(), NOTEBOOK, true);
        let first = controller
            .create_notebook_cell_execution(&f.store.cell(NOTEBOOK, CellHandle::new(0)).unwrap())
            .unwrap();
        let second = controller
            .create_notebook_cell_execution(&f.store.cell(NOTEBOOK, CellHandle::new(1)).unwrap())
            .unwrap();

        f.registry
            .cancel_cells(controller.handle(), NOTEBOOK, &[CellHandle::new(0)])
            .await;

        assert!(first.token().is_cancelled());
        assert!(!second.token().is_cancelled());
        assert_eq!(first.state(), ExecutionState::Init);
    }

    #[tokio::test]
    async fn test_cancel_with_interrupt_terminates_notebook_execution() {
        let f = fixture();
        let controller = f
            .registry
            .create_controller("ext", "k", "jupyter-notebook", "K", noop)
            .unwrap();
        let interrupts = Arc::new(AtomicUsize::new(0));
        let counter = interrupts.clone();
        let interrupt: Arc<dyn crate::InterruptHandler> =
            Arc::new(move |_: NotebookDocument| -> HandlerFuture {
                counter.fetch_add(1, Ordering::SeqCst);
                Box::pin(async { Err::<(), _>(anyhow::anyhow!("interrupt not delivered")) })
            });
        controller.set_interrupt_handler(Some(interrupt));
        f.registry
            .associate_notebook(controller.handle(), NOTEBOOK, true);

        let document = f.store.document(NOTEBOOK).unwrap();
        let whole = controller.create_notebook_execution(&document).unwrap();
        whole.start().unwrap();

        f.registry
            .cancel_cells(controller.handle(), NOTEBOOK, &[CellHandle::new(0)])
            .await;

        assert_eq!(interrupts.load(Ordering::SeqCst), 1);
        assert_eq!(whole.state(), ExecutionState::Resolved);
        assert!(whole.token().is_cancelled());
        assert_eq!(f.registry.take_handler_failures().len(), 1);
        controller.create_notebook_execution(&document).unwrap();
    }

    #[tokio::test]
    async fn test_messages_round_trip_through_surfaces() {
        let f = fixture();
        let controller = f
            .registry
            .create_controller("ext", "k", "jupyter-notebook", "K", noop)
            .unwrap();
        let surface = f.store.open_surface(NOTEBOOK);
        let mut inbox = controller.received_messages();

        f.registry.accept_message(
            controller.handle(),
            Some(&surface.id),
            serde_json::json!({"ping": 1}),
        );
        let received = inbox.try_recv().unwrap();
        assert_eq!(received.surface, Some(surface.clone()));
        assert_eq!(received.message["ping"], 1);

        f.registry
            .accept_message(controller.handle(), Some("closed"), serde_json::json!(null));
        assert_eq!(inbox.try_recv().unwrap().surface, None);

        f.proxy.take();
        let delivered = controller
            .post_message(serde_json::json!({"pong": 1}), Some(&surface))
            .await
            .unwrap();
        assert!(delivered);
        let messages = f.proxy.take();
        assert!(matches!(
            &messages[0],
            HostMessage::PostMessage { surface: Some(id), .. } if *id == surface.id
        ));
    }

    struct StaticActions;

    impl KernelSourceActionProvider for StaticActions {
        fn provide_actions(
            &self,
            _token: CancellationToken,
        ) -> BoxFuture<'static, anyhow::Result<Vec<KernelSourceAction>>> {
            Box::pin(async { anyhow::Ok(vec![KernelSourceAction::new("Install Python")]) })
        }

        fn emits_changes(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_source_action_provider_lifecycle() {
        let f = fixture();
        let registration =
            f.registry
                .register_kernel_source_action_provider("ext", "jupyter-notebook", StaticActions);
        let actions = f
            .registry
            .provide_kernel_source_actions(registration.handle(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(actions[0].label, "Install Python");

        registration.fire_changed();
        registration.dispose();
        registration.fire_changed();

        let messages = f.proxy.take();
        assert_eq!(
            messages,
            vec![
                HostMessage::AddKernelSourceActionProvider {
                    handle: registration.handle(),
                    notebook_type: "jupyter-notebook".to_string(),
                    emits_changes: true,
                },
                HostMessage::EmitKernelSourceActionsChange {
                    handle: registration.handle()
                },
                HostMessage::RemoveKernelSourceActionProvider {
                    handle: registration.handle()
                },
            ]
        );
        assert!(
            f.registry
                .provide_kernel_source_actions(registration.handle(), CancellationToken::new())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_dispose_extension_tears_everything_down() {
        let f = fixture();
        let kernel = f
            .registry
            .create_controller("ext", "k", "jupyter-notebook", "K", noop)
            .unwrap();
        let other = f
            .registry
            .create_controller("other", "k", "jupyter-notebook", "K", noop)
            .unwrap();
        let task = f.registry.create_detection_task("ext", "jupyter-notebook");
        f.proxy.take();

        f.registry.dispose_extension("ext");

        assert!(kernel.is_disposed());
        assert!(!other.is_disposed());
        assert!(task.is_disposed());
        let messages = f.proxy.take();
        assert!(messages.contains(&HostMessage::RemoveKernel {
            handle: kernel.handle()
        }));
        assert!(messages.contains(&HostMessage::RemoveKernelDetectionTask {
            handle: task.handle()
        }));
        assert_eq!(messages.len(), 2);

        kernel.dispose();
        task.dispose();
        assert!(f.proxy.take().is_empty(), "disposal is idempotent");
    }
}
