//! Kernel detection tasks and kernel source action providers.
//!
//! Both are registrations the host tracks by handle. Disposal sends the
//! matching removal message once and unregisters from the registry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::ids::{DetectionTaskHandle, SourceActionProviderHandle};
use crate::protocol::HostMessage;
use crate::proxy::HostProxy;

use super::handlers::KernelSourceActionProvider;
use super::registry::RegistryShared;

/// Tells the host that kernels for a notebook type are being discovered.
#[derive(Clone)]
pub struct KernelDetectionTask {
    inner: Arc<DetectionTaskInner>,
}

struct DetectionTaskInner {
    handle: DetectionTaskHandle,
    extension_id: String,
    notebook_type: String,
    proxy: Arc<dyn HostProxy>,
    registry: Weak<RegistryShared>,
    disposed: AtomicBool,
}

impl KernelDetectionTask {
    pub(crate) fn new(
        handle: DetectionTaskHandle,
        extension_id: &str,
        notebook_type: &str,
        shared: &Arc<RegistryShared>,
    ) -> Self {
        Self {
            inner: Arc::new(DetectionTaskInner {
                handle,
                extension_id: extension_id.to_string(),
                notebook_type: notebook_type.to_string(),
                proxy: shared.proxy.clone(),
                registry: Arc::downgrade(shared),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn handle(&self) -> DetectionTaskHandle {
        self.inner.handle
    }

    pub fn extension_id(&self) -> &str {
        &self.inner.extension_id
    }

    pub fn notebook_type(&self) -> &str {
        &self.inner.notebook_type
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// End the task. Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.inner.registry.upgrade() {
            registry.remove_detection_task(self.inner.handle);
        }
        self.inner
            .proxy
            .notify(HostMessage::RemoveKernelDetectionTask {
                handle: self.inner.handle,
            });
    }
}

/// A registered [`KernelSourceActionProvider`].
#[derive(Clone)]
pub struct KernelSourceActionRegistration {
    inner: Arc<RegistrationInner>,
}

struct RegistrationInner {
    handle: SourceActionProviderHandle,
    extension_id: String,
    provider: Arc<dyn KernelSourceActionProvider>,
    proxy: Arc<dyn HostProxy>,
    registry: Weak<RegistryShared>,
    disposed: AtomicBool,
}

impl KernelSourceActionRegistration {
    pub(crate) fn new(
        handle: SourceActionProviderHandle,
        extension_id: &str,
        provider: Arc<dyn KernelSourceActionProvider>,
        shared: &Arc<RegistryShared>,
    ) -> Self {
        Self {
            inner: Arc::new(RegistrationInner {
                handle,
                extension_id: extension_id.to_string(),
                provider,
                proxy: shared.proxy.clone(),
                registry: Arc::downgrade(shared),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn handle(&self) -> SourceActionProviderHandle {
        self.inner.handle
    }

    pub fn extension_id(&self) -> &str {
        &self.inner.extension_id
    }

    pub(crate) fn provider(&self) -> Arc<dyn KernelSourceActionProvider> {
        self.inner.provider.clone()
    }

    /// Tell the host the provider's actions changed. Ignored after disposal
    /// and for providers that do not emit changes.
    pub fn fire_changed(&self) {
        if self.inner.disposed.load(Ordering::Acquire) {
            return;
        }
        if !self.inner.provider.emits_changes() {
            tracing::trace!(provider = %self.inner.handle, "provider does not emit changes");
            return;
        }
        self.inner
            .proxy
            .notify(HostMessage::EmitKernelSourceActionsChange {
                handle: self.inner.handle,
            });
    }

    /// Unregister the provider. Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.inner.registry.upgrade() {
            registry.remove_source_action_provider(self.inner.handle);
        }
        self.inner
            .proxy
            .notify(HostMessage::RemoveKernelSourceActionProvider {
                handle: self.inner.handle,
            });
    }
}
