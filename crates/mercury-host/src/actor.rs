//! The registry mailbox.
//!
//! One [`RegistryActor`] owns the dispatch of inbound calls for one
//! [`KernelRegistry`]. Association, message receipt, cancellation and
//! request cancellation are applied inline, in mailbox order. Execution,
//! variable and source action requests run as their own tasks so a slow
//! kernel never holds up the mailbox.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use mercury_core::{CancellationToken, KernelRegistry, VariableRequest};
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{HostError, HostResult};
use crate::protocol::{InboundCall, InboundReply};

struct Envelope {
    call: InboundCall,
    reply: Option<oneshot::Sender<InboundReply>>,
}

/// Tokens of in-flight cancellable requests, by correlation id.
///
/// Each entry carries the generation it was registered under, so a request
/// that finishes after its id was reused leaves the newer entry alone.
#[derive(Clone, Default)]
struct PendingRequests {
    tokens: Arc<Mutex<FxHashMap<String, (u64, CancellationToken)>>>,
    generation: Arc<AtomicU64>,
}

impl PendingRequests {
    fn lock(&self) -> MutexGuard<'_, FxHashMap<String, (u64, CancellationToken)>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, request_id: &str) -> (u64, CancellationToken) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let previous = self
            .lock()
            .insert(request_id.to_string(), (generation, token.clone()));
        if let Some((_, previous)) = previous {
            tracing::warn!(request = %request_id, "request id reused, cancelling the older request");
            previous.cancel();
        }
        (generation, token)
    }

    fn finish(&self, request_id: &str, generation: u64) {
        let mut tokens = self.lock();
        if tokens.get(request_id).is_some_and(|(current, _)| *current == generation) {
            tokens.remove(request_id);
        }
    }

    fn cancel(&self, request_id: &str) {
        match self.lock().remove(request_id) {
            Some((_, token)) => token.cancel(),
            None => tracing::trace!(request = %request_id, "no such request, nothing to cancel"),
        }
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Sender side of the registry mailbox.
#[derive(Clone)]
pub struct RegistryHandle {
    tx: mpsc::Sender<Envelope>,
    pending: PendingRequests,
}

impl RegistryHandle {
    /// Enqueue a call without waiting for it to be handled.
    pub async fn cast(&self, call: InboundCall) -> HostResult<()> {
        self.tx
            .send(Envelope { call, reply: None })
            .await
            .map_err(|_| HostError::MailboxClosed)
    }

    /// Enqueue a call and wait until it has been fully handled.
    pub async fn call(&self, call: InboundCall) -> HostResult<InboundReply> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Envelope {
                call,
                reply: Some(reply),
            })
            .await
            .map_err(|_| HostError::MailboxClosed)?;
        response.await.map_err(|_| HostError::MailboxClosed)
    }

    /// Number of cancellable requests still running.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }
}

/// Receiver side of the registry mailbox.
pub struct RegistryActor {
    registry: KernelRegistry,
    rx: mpsc::Receiver<Envelope>,
    pending: PendingRequests,
}

impl RegistryActor {
    /// Spawn the actor on the current runtime.
    pub fn spawn(registry: KernelRegistry, mailbox_capacity: usize) -> (RegistryHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(mailbox_capacity.max(1));
        let pending = PendingRequests::default();
        let actor = RegistryActor {
            registry,
            rx,
            pending: pending.clone(),
        };
        let task = tokio::spawn(actor.run());
        (RegistryHandle { tx, pending }, task)
    }

    async fn run(mut self) {
        tracing::debug!("registry actor started");
        while let Some(envelope) = self.rx.recv().await {
            self.dispatch(envelope).await;
        }
        tracing::debug!("registry mailbox closed, actor stopping");
    }

    async fn dispatch(&mut self, envelope: Envelope) {
        let Envelope { call, reply } = envelope;
        tracing::debug!(?call, "inbound call");

        match call {
            InboundCall::AssociateNotebook {
                handle,
                notebook,
                selected,
            } => {
                self.registry.associate_notebook(handle, &notebook, selected);
                respond(reply, InboundReply::Done);
            }
            InboundCall::AcceptMessage {
                handle,
                surface,
                message,
            } => {
                self.registry
                    .accept_message(handle, surface.as_deref(), message);
                respond(reply, InboundReply::Done);
            }
            InboundCall::CancelCells {
                handle,
                notebook,
                cells,
            } => {
                self.registry.cancel_cells(handle, &notebook, &cells).await;
                respond(reply, InboundReply::Done);
            }
            InboundCall::CancelRequest { request_id } => {
                self.pending.cancel(&request_id);
                respond(reply, InboundReply::Done);
            }
            InboundCall::ExecuteCells {
                handle,
                notebook,
                cells,
            } => {
                let registry = self.registry.clone();
                tokio::spawn(async move {
                    registry.execute_cells(handle, &notebook, &cells).await;
                    respond(reply, InboundReply::Done);
                });
            }
            InboundCall::ProvideVariables {
                request_id,
                handle,
                notebook,
                parent,
                kind,
                start,
            } => {
                let (generation, token) = self.pending.register(&request_id);
                let registry = self.registry.clone();
                let pending = self.pending.clone();
                tokio::spawn(async move {
                    let request = VariableRequest {
                        request_id: request_id.clone(),
                        parent,
                        kind,
                        start,
                    };
                    let count = registry
                        .provide_variables(handle, &notebook, request, token)
                        .await;
                    pending.finish(&request_id, generation);
                    respond(reply, InboundReply::VariablesProvided { count });
                });
            }
            InboundCall::ProvideKernelSourceActions { request_id, handle } => {
                let (generation, token) = self.pending.register(&request_id);
                let registry = self.registry.clone();
                let pending = self.pending.clone();
                tokio::spawn(async move {
                    let result = registry.provide_kernel_source_actions(handle, token).await;
                    pending.finish(&request_id, generation);
                    let answer = match result {
                        Ok(actions) => InboundReply::KernelSourceActions { actions },
                        Err(err) => InboundReply::Error {
                            message: err.to_string(),
                        },
                    };
                    respond(reply, answer);
                });
            }
        }
    }
}

fn respond(reply: Option<oneshot::Sender<InboundReply>>, answer: InboundReply) {
    if let Some(reply) = reply {
        // The caller may have stopped waiting.
        let _ = reply.send(answer);
    }
}
