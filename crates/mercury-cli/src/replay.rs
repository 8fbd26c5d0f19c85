//! Replay command implementation for Mercury CLI.
//!
//! Feeds a script of inbound calls to a host running the demo kernel and
//! prints every outbound message as one JSON line on stdout. Requests the
//! kernel makes of the host are accepted.
//!
//! A script is JSON lines. Each line is either an [`InboundCall`] or one of
//! the [`Directive`]s below. Blank lines and lines starting with `//` are
//! skipped.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Context;
use mercury_core::{CellHandle, DocumentStore, NotebookDocuments};
use mercury_host::{HostConfig, InboundCall, KernelHost, OutboundEnvelope};
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::colors;
use crate::demo;

/// Script steps that act on the document model or the replay itself.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Directive {
    /// Open a notebook with `cells` cells, handles `0..cells`.
    OpenNotebook {
        uri: String,
        #[serde(default = "default_notebook_type")]
        notebook_type: String,
        cells: u32,
    },

    /// Remove one cell from an open notebook.
    RemoveCell { uri: String, cell: CellHandle },

    /// Close a notebook.
    CloseNotebook { uri: String },

    /// Pause the script.
    Sleep { ms: u64 },

    /// Wait for every call issued so far to be answered.
    Wait,
}

fn default_notebook_type() -> String {
    demo::NOTEBOOK_TYPE.to_string()
}

/// One line of a replay script.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Step {
    Directive(Directive),
    Call(InboundCall),
}

/// Parse a JSON-lines script.
pub fn parse_script(text: &str) -> anyhow::Result<Vec<Step>> {
    text.lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with("//"))
        .map(|(line_no, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("line {}: not a call or directive: {}", line_no, line))
        })
        .collect()
}

/// Read a script from a file, or from stdin when `path` is `-`.
pub async fn read_script(path: &str) -> anyhow::Result<String> {
    if path == "-" {
        let mut text = String::new();
        tokio::io::stdin()
            .read_to_string(&mut text)
            .await
            .context("failed to read script from stdin")?;
        return Ok(text);
    }

    let path = Path::new(path);
    if !path.exists() {
        anyhow::bail!("Script not found: {}", path.display());
    }
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))
}

/// Outcome of a replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub steps: usize,
    pub messages: usize,
    pub failures: usize,
}

/// Run `steps` against a fresh host and print the traffic.
pub async fn run(steps: Vec<Step>, config: &HostConfig) -> anyhow::Result<ReplaySummary> {
    let store = Arc::new(DocumentStore::new());
    let (host, outbound) = KernelHost::start(store.clone(), config)?;
    let (stop, stopped) = oneshot::channel();
    let messages = Arc::new(AtomicUsize::new(0));
    let transport = tokio::spawn(transport(outbound, stopped, messages.clone()));

    let controller = demo::register(&host.registry)?;
    tracing::debug!(kernel = %controller.id(), handle = %controller.handle(), "demo kernel registered");

    let mut in_flight: Vec<JoinHandle<()>> = Vec::new();
    let step_count = steps.len();
    for (index, step) in steps.into_iter().enumerate() {
        match step {
            Step::Directive(directive) => {
                apply(&store, directive, &mut in_flight).await;
            }
            Step::Call(call) => {
                let mailbox = host.handle.clone();
                in_flight.push(tokio::spawn(async move {
                    match mailbox.call(call).await {
                        Ok(reply) => print_line(&serde_json::json!({ "step": index, "reply": reply })),
                        Err(err) => tracing::warn!(step = index, error = %err, "call was not answered"),
                    }
                }));
            }
        }
    }
    wait_all(&mut in_flight).await;

    // Let the last batches leave the collectors.
    tokio::time::sleep(Duration::from_millis(config.flush_delay_ms) * 2).await;

    let failures = host.registry.take_handler_failures();
    for failure in &failures {
        eprintln!(
            "{}warning:{} {} handler of {} failed: {}",
            colors::YELLOW,
            colors::RESET,
            failure.operation,
            failure.controller_id,
            failure.message
        );
    }

    controller.dispose();
    host.shutdown().await;
    // The transport may already be gone if the channel closed.
    let _ = stop.send(());
    transport.await.context("transport task failed")?;

    Ok(ReplaySummary {
        steps: step_count,
        messages: messages.load(Ordering::Relaxed),
        failures: failures.len(),
    })
}

async fn apply(store: &DocumentStore, directive: Directive, in_flight: &mut Vec<JoinHandle<()>>) {
    match directive {
        Directive::OpenNotebook {
            uri,
            notebook_type,
            cells,
        } => {
            store.open(&uri, &notebook_type, cells);
        }
        Directive::RemoveCell { uri, cell } => {
            let removed = store.document(&uri).and_then(|doc| doc.remove_cell(cell));
            if removed.is_none() {
                tracing::warn!(notebook = %uri, %cell, "no such cell to remove");
            }
        }
        Directive::CloseNotebook { uri } => {
            if store.close(&uri).is_none() {
                tracing::warn!(notebook = %uri, "no such notebook to close");
            }
        }
        Directive::Sleep { ms } => tokio::time::sleep(Duration::from_millis(ms)).await,
        Directive::Wait => wait_all(in_flight).await,
    }
}

async fn wait_all(in_flight: &mut Vec<JoinHandle<()>>) {
    for task in in_flight.drain(..) {
        if let Err(err) = task.await {
            tracing::warn!(error = %err, "call task ended abnormally");
        }
    }
}

/// Print outbound messages and accept every request until told to stop,
/// then drain what is left.
async fn transport(
    mut outbound: mpsc::UnboundedReceiver<OutboundEnvelope>,
    mut stop: oneshot::Receiver<()>,
    messages: Arc<AtomicUsize>,
) {
    let deliver = |envelope: OutboundEnvelope| {
        print_line(&envelope.message);
        messages.fetch_add(1, Ordering::Relaxed);
        envelope.respond(true);
    };

    loop {
        tokio::select! {
            biased;
            envelope = outbound.recv() => match envelope {
                Some(envelope) => deliver(envelope),
                None => return,
            },
            _ = &mut stop => break,
        }
    }

    while let Ok(envelope) = outbound.try_recv() {
        deliver(envelope);
    }
}

fn print_line(value: &impl serde::Serialize) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{}", line),
        Err(err) => tracing::warn!(error = %err, "failed to encode outbound message"),
    }
}

/// Execute the replay command.
pub async fn execute(script: &str, config: &HostConfig) -> anyhow::Result<()> {
    let text = read_script(script).await?;
    replay_text(&text, config).await
}

/// Parse and replay a script held in memory.
pub async fn replay_text(text: &str, config: &HostConfig) -> anyhow::Result<()> {
    let steps = parse_script(text)?;
    let summary = run(steps, config).await?;

    let color = if summary.failures == 0 {
        colors::GREEN
    } else {
        colors::RED
    };
    eprintln!(
        "{}{}Replayed{} {} steps {}({} host messages, {} handler failures){}",
        colors::BOLD,
        color,
        colors::RESET,
        summary.steps,
        colors::DIM,
        summary.messages,
        summary.failures,
        colors::RESET
    );
    Ok(())
}
