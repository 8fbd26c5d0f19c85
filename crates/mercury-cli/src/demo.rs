//! A built-in kernel for trying the host without an extension.
//!
//! The echo kernel writes one text output per cell, stamps execution
//! order, and exposes a small variable tree with a large indexed list so
//! paging is visible.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use mercury_core::{
    CancellationToken, CellOutput, ExecuteHandler, ExecutionError, HandlerFuture,
    InterruptHandler, KernelController, KernelRegistry, NotebookCell, NotebookDocument,
    OutputItem, Variable, VariableProvider, VariablesRequestKind, VariablesResult,
};
use rustc_hash::FxHashMap;

pub const EXTENSION_ID: &str = "mercury.demo";
pub const NOTEBOOK_TYPE: &str = "jupyter-notebook";

/// Entries in the `numbers` variable.
const NUMBERS_LEN: u64 = 1000;

/// Time each cell "runs" for, long enough for an interrupt to land.
const CELL_RUN_TIME: Duration = Duration::from_millis(20);

/// Script replayed by `mercury demo`.
pub const DEMO_SCRIPT: &str = r#"
{"type":"open_notebook","uri":"file:///demo.ipynb","cells":3}
{"type":"associate_notebook","handle":0,"notebook":"file:///demo.ipynb","selected":true}
{"type":"execute_cells","handle":0,"notebook":"file:///demo.ipynb","cells":[0,1,2]}
{"type":"wait"}
{"type":"execute_cells","handle":0,"notebook":"file:///demo.ipynb","cells":[1]}
{"type":"sleep","ms":5}
{"type":"cancel_cells","handle":0,"notebook":"file:///demo.ipynb","cells":[1]}
{"type":"wait"}
{"type":"provide_variables","request_id":"vars-root","handle":0,"notebook":"file:///demo.ipynb","parent":null,"kind":"named"}
{"type":"wait"}
{"type":"provide_variables","request_id":"vars-numbers","handle":0,"notebook":"file:///demo.ipynb","parent":2,"kind":"indexed","start":0}
{"type":"wait"}
{"type":"accept_message","handle":0,"surface":null,"message":{"command":"ping"}}
"#;

/// Echo kernel state shared between its handlers.
#[derive(Clone, Default)]
pub struct EchoKernel {
    order: Arc<AtomicU32>,
    running: Arc<Mutex<FxHashMap<String, Vec<CancellationToken>>>>,
}

impl EchoKernel {
    fn track(&self, notebook: &str, token: CancellationToken) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(notebook.to_string())
            .or_default()
            .push(token);
    }

    fn untrack(&self, notebook: &str) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tokens) = running.get_mut(notebook) {
            tokens.retain(|token| !token.is_cancelled());
            if tokens.is_empty() {
                running.remove(notebook);
            }
        }
    }

    async fn run_cell(&self, controller: &KernelController, cell: &NotebookCell) -> anyhow::Result<()> {
        let execution = controller.create_notebook_cell_execution(cell)?;
        let token = execution.token().clone();
        self.track(cell.notebook_uri(), token.clone());

        execution.start(Some(now_millis()))?;
        let order = self.order.fetch_add(1, Ordering::Relaxed) + 1;
        execution.set_execution_order(Some(order));

        let interrupted = tokio::select! {
            biased;
            _ = token.cancelled() => true,
            _ = tokio::time::sleep(CELL_RUN_TIME) => false,
        };

        if interrupted {
            let error = ExecutionError::new("KeyboardInterrupt", "execution interrupted");
            execution.end(Some(false), Some(now_millis()), Some(&error))?;
        } else {
            execution.replace_output(
                vec![CellOutput::new(vec![OutputItem::text(format!(
                    "cell {} ran as [{}]",
                    cell.handle(),
                    order
                ))])],
                None,
            )?;
            execution.end(Some(true), Some(now_millis()), None)?;
        }

        token.cancel();
        self.untrack(cell.notebook_uri());
        Ok(())
    }
}

impl ExecuteHandler for EchoKernel {
    fn execute(
        &self,
        cells: Vec<NotebookCell>,
        _notebook: NotebookDocument,
        controller: KernelController,
    ) -> HandlerFuture {
        let kernel = self.clone();
        Box::pin(async move {
            for cell in &cells {
                kernel.run_cell(&controller, cell).await?;
            }
            anyhow::Ok(())
        })
    }
}

impl InterruptHandler for EchoKernel {
    fn interrupt(&self, notebook: NotebookDocument) -> HandlerFuture {
        let tokens = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(notebook.uri())
            .unwrap_or_default();
        tracing::info!(notebook = %notebook.uri(), running = tokens.len(), "interrupting");
        for token in tokens {
            token.cancel();
        }
        Box::pin(async { anyhow::Ok(()) })
    }
}

impl VariableProvider for EchoKernel {
    fn provide_variables(
        &self,
        _notebook: NotebookDocument,
        parent: Option<Variable>,
        kind: VariablesRequestKind,
        start: usize,
        _token: CancellationToken,
    ) -> BoxStream<'static, VariablesResult> {
        match (parent, kind) {
            (None, _) => stream::iter(vec![
                VariablesResult::leaf(Variable::new("answer", "42").with_type("int")),
                VariablesResult::leaf(Variable::new("greeting", "'hello'").with_type("str")),
                VariablesResult {
                    variable: Variable::new("numbers", format!("[0, 1, 4, ... ({NUMBERS_LEN} items)]"))
                        .with_type("list"),
                    has_named_children: false,
                    indexed_children_count: NUMBERS_LEN,
                },
            ])
            .skip(start)
            .boxed(),
            (Some(parent), VariablesRequestKind::Indexed) if parent.name == "numbers" => {
                stream::iter(start as u64..NUMBERS_LEN)
                    .map(|i| {
                        VariablesResult::leaf(
                            Variable::new(format!("[{i}]"), (i * i).to_string()).with_type("int"),
                        )
                    })
                    .boxed()
            }
            _ => stream::empty().boxed(),
        }
    }
}

/// Register the echo kernel with every handler installed.
pub fn register(registry: &KernelRegistry) -> mercury_core::Result<KernelController> {
    let kernel = EchoKernel::default();
    let controller =
        registry.create_controller(EXTENSION_ID, "echo", NOTEBOOK_TYPE, "Echo", kernel.clone())?;
    controller.set_description(Some("Echoes each cell back as text".to_string()));
    controller.set_supports_execution_order(true);
    controller.set_interrupt_handler(Some(Arc::new(kernel.clone())));
    controller.set_variable_provider(Some(Arc::new(kernel)));
    Ok(controller)
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(results: Vec<VariablesResult>) -> Vec<String> {
        results.into_iter().map(|r| r.variable.name).collect()
    }

    #[tokio::test]
    async fn test_top_level_variables() {
        let kernel = EchoKernel::default();
        let results: Vec<_> = kernel
            .provide_variables(
                NotebookDocument::new("file:///a.ipynb", NOTEBOOK_TYPE),
                None,
                VariablesRequestKind::Named,
                0,
                CancellationToken::new(),
            )
            .collect()
            .await;
        assert_eq!(names(results.clone()), vec!["answer", "greeting", "numbers"]);
        assert_eq!(results[2].indexed_children_count, NUMBERS_LEN);
    }

    #[tokio::test]
    async fn test_indexed_children_from_offset() {
        let kernel = EchoKernel::default();
        let results: Vec<_> = kernel
            .provide_variables(
                NotebookDocument::new("file:///a.ipynb", NOTEBOOK_TYPE),
                Some(Variable::new("numbers", "")),
                VariablesRequestKind::Indexed,
                998,
                CancellationToken::new(),
            )
            .collect()
            .await;
        assert_eq!(names(results.clone()), vec!["[998]", "[999]"]);
        assert_eq!(results[1].variable.value, "998001");
    }

    #[tokio::test]
    async fn test_interrupt_cancels_running_cells() {
        let kernel = EchoKernel::default();
        let token = CancellationToken::new();
        kernel.track("file:///a.ipynb", token.clone());

        kernel
            .interrupt(NotebookDocument::new("file:///a.ipynb", NOTEBOOK_TYPE))
            .await
            .unwrap();
        assert!(token.is_cancelled());
        assert!(kernel.running.lock().unwrap().is_empty());
    }
}
