//! Mercury kernel host.
//!
//! Connects a [`KernelRegistry`] to a host process.
//!
//! # Architecture
//!
//! The host side consists of:
//! - **Protocol**: Inbound calls ([`InboundCall`]) and their replies
//! - **Actor**: The per-registry mailbox dispatching inbound calls
//! - **Proxy**: A channel-backed [`HostProxy`](mercury_core::HostProxy)
//!   carrying outbound [`HostMessage`](mercury_core::HostMessage)s
//! - **Config**: [`HostConfig`], loadable from JSON

pub mod actor;
pub mod config;
pub mod error;
pub mod protocol;
pub mod proxy;

use std::sync::Arc;

use mercury_core::{KernelRegistry, NotebookDocuments};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use actor::{RegistryActor, RegistryHandle};
pub use config::HostConfig;
pub use error::{HostError, HostResult};
pub use protocol::{InboundCall, InboundReply};
pub use proxy::{ChannelProxy, OutboundEnvelope};

/// A running registry with its mailbox.
pub struct KernelHost {
    /// Registry kernels register with.
    pub registry: KernelRegistry,
    /// Mailbox for inbound calls.
    pub handle: RegistryHandle,
    actor: JoinHandle<()>,
}

impl KernelHost {
    /// Build the registry and spawn its actor. Must be called inside a tokio
    /// runtime.
    ///
    /// Returns the host together with the outbound channel, which yields
    /// messages in call order. The transport owns draining it.
    pub fn start(
        documents: Arc<dyn NotebookDocuments>,
        config: &HostConfig,
    ) -> HostResult<(Self, mpsc::UnboundedReceiver<OutboundEnvelope>)> {
        config.validate()?;
        let (proxy, outbound) = ChannelProxy::new();
        let registry = KernelRegistry::new(Arc::new(proxy), documents, config.kernel_config());
        let (handle, actor) = RegistryActor::spawn(registry.clone(), config.mailbox_capacity);
        tracing::debug!(?config, "kernel host started");
        let host = Self {
            registry,
            handle,
            actor,
        };
        Ok((host, outbound))
    }

    /// Stop accepting calls and wait for the mailbox to drain.
    ///
    /// Tasks already spawned for executions keep running.
    pub async fn shutdown(self) {
        let Self { handle, actor, .. } = self;
        drop(handle);
        if let Err(err) = actor.await {
            tracing::warn!(error = %err, "registry actor ended abnormally");
        }
    }
}
