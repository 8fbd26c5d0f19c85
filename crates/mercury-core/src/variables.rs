//! Paged, cancellable variable introspection.
//!
//! A kernel exposes its variables through a [`VariableProvider`], which
//! returns a lazy stream. The [`VariablePager`] pulls from that stream one
//! item at a time and pushes each item to the host as soon as it arrives,
//! until the stream ends, the request is cancelled, or the page ceiling is
//! reached.
//!
//! Every streamed variable gets a fresh [`VariableId`] and is cached so the
//! host can later ask for its children. The cache is dropped at the start of
//! each root request; ids handed out before that are dead afterwards.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use futures::stream::BoxStream;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::documents::NotebookDocument;
use crate::execute::CancellationToken;
use crate::ids::{HandleAllocator, VariableId};
use crate::protocol::HostMessage;
use crate::proxy::HostProxy;

/// Which children of a variable are requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariablesRequestKind {
    Named,
    Indexed,
}

/// A variable as reported by a kernel.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub value: String,
    pub expression: Option<String>,
    pub type_name: Option<String>,
    pub interfaces: Option<Vec<String>>,
    pub language: Option<String>,
}

impl Variable {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            ..Self::default()
        }
    }

    pub fn with_type(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }
}

/// One item yielded by a [`VariableProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariablesResult {
    pub variable: Variable,
    pub has_named_children: bool,
    pub indexed_children_count: u64,
}

impl VariablesResult {
    /// A leaf variable without children.
    pub fn leaf(variable: Variable) -> Self {
        Self {
            variable,
            has_named_children: false,
            indexed_children_count: 0,
        }
    }
}

/// A streamed variable as the host receives it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableRecord {
    pub id: VariableId,
    pub name: String,
    pub value: String,
    #[serde(rename = "type")]
    pub type_name: Option<String>,
    pub interfaces: Option<Vec<String>>,
    pub language: Option<String>,
    pub expression: Option<String>,
    pub has_named_children: bool,
    pub indexed_children_count: u64,
    pub extension_id: String,
}

/// Source of a kernel's variables.
///
/// The returned stream may be infinite; it is only polled as far as the
/// pager needs.
pub trait VariableProvider: Send + Sync {
    fn provide_variables(
        &self,
        notebook: NotebookDocument,
        parent: Option<Variable>,
        kind: VariablesRequestKind,
        start: usize,
        token: CancellationToken,
    ) -> BoxStream<'static, VariablesResult>;
}

impl<F> VariableProvider for F
where
    F: Fn(
            NotebookDocument,
            Option<Variable>,
            VariablesRequestKind,
            usize,
            CancellationToken,
        ) -> BoxStream<'static, VariablesResult>
        + Send
        + Sync,
{
    fn provide_variables(
        &self,
        notebook: NotebookDocument,
        parent: Option<Variable>,
        kind: VariablesRequestKind,
        start: usize,
        token: CancellationToken,
    ) -> BoxStream<'static, VariablesResult> {
        self(notebook, parent, kind, start, token)
    }
}

/// One inbound variable request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableRequest {
    /// Correlation id echoed on every streamed item.
    pub request_id: String,
    /// `None` for a root request.
    pub parent: Option<VariableId>,
    pub kind: VariablesRequestKind,
    pub start: usize,
}

/// Streams variables from providers to the host, one page per request.
pub struct VariablePager {
    page_size: usize,
    ids: Arc<HandleAllocator>,
    cache: Mutex<FxHashMap<VariableId, Variable>>,
}

impl VariablePager {
    pub fn new(page_size: usize, ids: Arc<HandleAllocator>) -> Self {
        Self {
            page_size,
            ids,
            cache: Mutex::new(FxHashMap::default()),
        }
    }

    fn cache(&self) -> MutexGuard<'_, FxHashMap<VariableId, Variable>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of variables that can currently be expanded.
    pub fn cached(&self) -> usize {
        self.cache().len()
    }

    /// Serve one request. Returns the number of variables sent.
    ///
    /// Cancellation stops the enumeration silently and keeps the cache.
    pub async fn provide(
        &self,
        request: VariableRequest,
        notebook: NotebookDocument,
        provider: &dyn VariableProvider,
        extension_id: &str,
        proxy: &dyn HostProxy,
        token: CancellationToken,
    ) -> usize {
        let parent = match request.parent {
            None => {
                self.cache().clear();
                None
            }
            Some(id) => match self.cache().get(&id).cloned() {
                Some(parent) => Some(parent),
                None => {
                    tracing::trace!(variable = %id, "parent variable is gone, dropping request");
                    return 0;
                }
            },
        };

        let mut stream = provider.provide_variables(
            notebook,
            parent,
            request.kind,
            request.start,
            token.clone(),
        );

        let mut sent = 0;
        while sent < self.page_size && !token.is_cancelled() {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                next = stream.next() => next,
            };
            let Some(result) = next else { break };
            if token.is_cancelled() {
                break;
            }

            let id = self.ids.next_variable();
            self.cache().insert(id, result.variable.clone());
            let variable = result.variable;
            proxy.notify(HostMessage::ReceiveVariable {
                request_id: request.request_id.clone(),
                variable: VariableRecord {
                    id,
                    name: variable.name,
                    value: variable.value,
                    type_name: variable.type_name,
                    interfaces: variable.interfaces,
                    language: variable.language,
                    expression: variable.expression,
                    has_named_children: result.has_named_children,
                    indexed_children_count: result.indexed_children_count,
                    extension_id: extension_id.to_string(),
                },
            });
            sent += 1;
        }

        tracing::debug!(request = %request.request_id, sent, "variable request finished");
        sent
    }
}
