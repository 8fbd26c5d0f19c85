//! Notebook-scoped execution task.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::documents::NotebookDocument;
use crate::error::{Error, Result};
use crate::ids::ExecutionHandle;
use crate::protocol::HostMessage;
use crate::proxy::HostProxy;

use super::cell::{ExecutionState, ResolveHook};
use super::context::CancellationToken;

/// A run of a whole notebook, spanning whatever cell executions the kernel
/// performs in between. Carries no output of its own.
#[derive(Clone)]
pub struct NotebookExecution {
    inner: Arc<NotebookExecutionInner>,
}

struct NotebookExecutionInner {
    handle: ExecutionHandle,
    document: NotebookDocument,
    proxy: Arc<dyn HostProxy>,
    token: CancellationToken,
    progress: Mutex<Progress>,
}

struct Progress {
    state: ExecutionState,
    on_resolved: Option<ResolveHook>,
}

impl std::fmt::Debug for NotebookExecution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotebookExecution")
            .field("handle", &self.inner.handle)
            .field("notebook", &self.inner.document.uri())
            .field("state", &self.state())
            .finish()
    }
}

impl NotebookExecution {
    pub(crate) fn new(
        handle: ExecutionHandle,
        controller_id: &str,
        document: NotebookDocument,
        proxy: Arc<dyn HostProxy>,
        on_resolved: ResolveHook,
    ) -> Self {
        proxy.notify(HostMessage::CreateNotebookExecution {
            execution: handle,
            controller_id: controller_id.to_string(),
            notebook: document.uri().to_string(),
        });
        Self {
            inner: Arc::new(NotebookExecutionInner {
                handle,
                document,
                proxy,
                token: CancellationToken::new(),
                progress: Mutex::new(Progress {
                    state: ExecutionState::Init,
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

    pub fn notebook(&self) -> &NotebookDocument {
        &self.inner.document
    }

    pub fn state(&self) -> ExecutionState {
        self.progress().state
    }

    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    pub fn start(&self) -> Result<()> {
        let mut progress = self.progress();
        if progress.state != ExecutionState::Init {
            return Err(Error::IllegalState("cannot call start again"));
        }
        progress.state = ExecutionState::Started;
        self.inner.proxy.notify(HostMessage::BeginNotebookExecution {
            execution: self.inner.handle,
        });
        Ok(())
    }

    pub fn end(&self) -> Result<()> {
        {
            let progress = self.progress();
            match progress.state {
                ExecutionState::Init => {
                    return Err(Error::IllegalState("must call start before end"));
                }
                ExecutionState::Resolved => {
                    return Err(Error::IllegalState("cannot call end twice"));
                }
                ExecutionState::Started => {}
            }
        }
        self.resolve();
        Ok(())
    }

    /// Cancel and resolve the execution from whatever state it is in.
    ///
    /// Used when the host asks to cancel a notebook that is being run as a
    /// whole; the kernel's later `end` call then fails harmlessly.
    pub fn force_terminate(&self) {
        self.inner.token.cancel();
        if self.state() != ExecutionState::Resolved {
            tracing::debug!(execution = %self.inner.handle, "force-terminating notebook execution");
            self.resolve();
        }
    }

    fn resolve(&self) {
        let on_resolved = {
            let mut progress = self.progress();
            if progress.state == ExecutionState::Resolved {
                return;
            }
            progress.state = ExecutionState::Resolved;
            progress.on_resolved.take()
        };
        self.inner
            .proxy
            .notify(HostMessage::CompleteNotebookExecution {
                execution: self.inner.handle,
            });
        if let Some(hook) = on_resolved {
            hook();
        }
    }
}
