//! Integration tests for variable paging through the registry.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use tokio::sync::mpsc;

use mercury_core::{
    CancellationToken, DocumentStore, HandlerFuture, HostMessage, KernelConfig, KernelController,
    KernelRegistry, NotebookCell, NotebookDocument, Variable, VariableId, VariableProvider,
    VariableRecord, VariableRequest, VariablesRequestKind, VariablesResult,
};

mod common;
use common::RecordingProxy;

const NOTEBOOK: &str = "file:///work/vars.ipynb";

fn noop(_: Vec<NotebookCell>, _: NotebookDocument, _: KernelController) -> HandlerFuture {
    Box::pin(async { anyhow::Ok(()) })
}

/// A provider with a fixed number of variables at every level.
fn finite_provider(count: usize) -> Arc<dyn VariableProvider> {
    Arc::new(
        move |_: NotebookDocument,
              parent: Option<Variable>,
              _: VariablesRequestKind,
              start: usize,
              _: CancellationToken|
              -> BoxStream<'static, VariablesResult> {
            let prefix = parent.map(|p| format!("{}.", p.name)).unwrap_or_default();
            stream::iter(start..count)
                .map(move |i| VariablesResult {
                    variable: Variable::new(format!("{prefix}x{i}"), i.to_string()).with_type("int"),
                    has_named_children: true,
                    indexed_children_count: 0,
                })
                .boxed()
        },
    )
}

fn setup(page_size: usize) -> (KernelRegistry, KernelController, Arc<RecordingProxy>) {
    let proxy = Arc::new(RecordingProxy::new());
    let store = Arc::new(DocumentStore::new());
    store.open(NOTEBOOK, "jupyter-notebook", 1);
    let registry = KernelRegistry::new(
        proxy.clone(),
        store,
        KernelConfig::default().with_variable_page_size(page_size),
    );
    let controller = registry
        .create_controller("ext", "k", "jupyter-notebook", "K", noop)
        .unwrap();
    (registry, controller, proxy)
}

fn root(request_id: &str) -> VariableRequest {
    VariableRequest {
        request_id: request_id.to_string(),
        parent: None,
        kind: VariablesRequestKind::Named,
        start: 0,
    }
}

fn child(request_id: &str, parent: VariableId) -> VariableRequest {
    VariableRequest {
        parent: Some(parent),
        ..root(request_id)
    }
}

fn received(proxy: &RecordingProxy, request_id: &str) -> Vec<VariableRecord> {
    proxy
        .messages()
        .into_iter()
        .filter_map(|msg| match msg {
            HostMessage::ReceiveVariable { request_id: id, variable } if id == request_id => {
                Some(variable)
            }
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_page_ceiling_of_one_hundred() {
    let (registry, controller, proxy) = setup(100);
    controller.set_variable_provider(Some(finite_provider(250)));

    let sent = registry
        .provide_variables(controller.handle(), NOTEBOOK, root("r1"), CancellationToken::new())
        .await;

    assert_eq!(sent, 100);
    let records = received(&proxy, "r1");
    assert_eq!(records.len(), 100);
    assert_eq!(records[0].name, "x0");
    assert_eq!(records[99].name, "x99");
    assert_eq!(records[0].type_name.as_deref(), Some("int"));
    assert!(records.iter().all(|r| r.extension_id == "ext"));

    // Paging continues from an offset.
    let sent = registry
        .provide_variables(
            controller.handle(),
            NOTEBOOK,
            VariableRequest {
                start: 200,
                ..root("r2")
            },
            CancellationToken::new(),
        )
        .await;
    assert_eq!(sent, 50);
}

#[tokio::test]
async fn test_root_request_invalidates_children() {
    let (registry, controller, proxy) = setup(100);
    controller.set_variable_provider(Some(finite_provider(3)));

    registry
        .provide_variables(controller.handle(), NOTEBOOK, root("r1"), CancellationToken::new())
        .await;
    let old = received(&proxy, "r1")[2].id;

    let sent = registry
        .provide_variables(controller.handle(), NOTEBOOK, child("c1", old), CancellationToken::new())
        .await;
    assert_eq!(sent, 3);
    assert_eq!(received(&proxy, "c1")[0].name, "x2.x0");

    registry
        .provide_variables(controller.handle(), NOTEBOOK, root("r2"), CancellationToken::new())
        .await;
    let sent = registry
        .provide_variables(controller.handle(), NOTEBOOK, child("c2", old), CancellationToken::new())
        .await;
    assert_eq!(sent, 0);
    assert!(received(&proxy, "c2").is_empty());
}

#[tokio::test]
async fn test_cancel_after_k_items() {
    let (registry, controller, proxy) = setup(100);
    let (tx, rx) = mpsc::unbounded_channel::<VariablesResult>();
    let rx = Arc::new(tokio::sync::Mutex::new(Some(rx)));
    let provider: Arc<dyn VariableProvider> = Arc::new(
        move |_: NotebookDocument,
              _: Option<Variable>,
              _: VariablesRequestKind,
              _: usize,
              _: CancellationToken|
              -> BoxStream<'static, VariablesResult> {
            let rx = rx.clone();
            stream::unfold(rx, |rx| async move {
                let item = rx.lock().await.as_mut()?.recv().await?;
                Some((item, rx))
            })
            .boxed()
        },
    );
    controller.set_variable_provider(Some(provider));

    let token = CancellationToken::new();
    let request = {
        let registry = registry.clone();
        let token = token.clone();
        let handle = controller.handle();
        tokio::spawn(async move {
            registry
                .provide_variables(handle, NOTEBOOK, root("r1"), token)
                .await
        })
    };

    for i in 0..3 {
        tx.send(VariablesResult::leaf(Variable::new(format!("v{i}"), "")))
            .unwrap();
    }
    while received(&proxy, "r1").len() < 3 {
        tokio::task::yield_now().await;
    }

    token.cancel();
    let _ = tx.send(VariablesResult::leaf(Variable::new("late", "")));
    let sent = request.await.unwrap();

    assert_eq!(sent, 3);
    let names: Vec<String> = received(&proxy, "r1").into_iter().map(|r| r.name).collect();
    assert_eq!(names, vec!["v0", "v1", "v2"]);
}

#[tokio::test]
async fn test_kernel_without_provider_is_silent() {
    let (registry, controller, proxy) = setup(100);
    proxy.take();

    let sent = registry
        .provide_variables(controller.handle(), NOTEBOOK, root("r1"), CancellationToken::new())
        .await;
    assert_eq!(sent, 0);

    controller.notify_variables_changed(&NotebookDocument::new(NOTEBOOK, "jupyter-notebook"));
    assert!(proxy.take().is_empty());

    controller.set_variable_provider(Some(finite_provider(1)));
    controller.notify_variables_changed(&NotebookDocument::new(NOTEBOOK, "jupyter-notebook"));
    assert!(proxy.messages().contains(&HostMessage::VariablesUpdated {
        notebook: NOTEBOOK.to_string()
    }));
}
