//! Process-local handles and their allocator.
//!
//! Handles identify objects across the process boundary and are distinct
//! from any domain identifier. All counters live in one [`HandleAllocator`]
//! owned by the registry and shared with the objects it creates.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident($repr:ty)) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub(crate) $repr);

        impl $name {
            pub fn new(id: $repr) -> Self {
                Self(id)
            }

            pub fn get(&self) -> $repr {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

handle_type!(
    /// Handle of a registered kernel controller.
    KernelHandle(u32)
);
handle_type!(
    /// Handle of a cell or notebook execution.
    ExecutionHandle(u32)
);
handle_type!(
    /// Handle of a cell within its notebook, assigned by the host.
    CellHandle(u32)
);
handle_type!(
    /// Handle of a kernel detection task.
    DetectionTaskHandle(u32)
);
handle_type!(
    /// Handle of a kernel source action provider.
    SourceActionProviderHandle(u32)
);
handle_type!(
    /// Ephemeral identifier of a streamed variable.
    VariableId(u64)
);

/// Monotonic allocator for every handle kind the registry hands out.
#[derive(Debug, Default)]
pub struct HandleAllocator {
    kernels: AtomicU32,
    executions: AtomicU32,
    detection_tasks: AtomicU32,
    source_action_providers: AtomicU32,
    variables: AtomicU64,
}

impl HandleAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_kernel(&self) -> KernelHandle {
        KernelHandle(self.kernels.fetch_add(1, Ordering::Relaxed))
    }

    pub fn next_execution(&self) -> ExecutionHandle {
        ExecutionHandle(self.executions.fetch_add(1, Ordering::Relaxed))
    }

    pub fn next_detection_task(&self) -> DetectionTaskHandle {
        DetectionTaskHandle(self.detection_tasks.fetch_add(1, Ordering::Relaxed))
    }

    pub fn next_source_action_provider(&self) -> SourceActionProviderHandle {
        SourceActionProviderHandle(self.source_action_providers.fetch_add(1, Ordering::Relaxed))
    }

    pub fn next_variable(&self) -> VariableId {
        VariableId(self.variables.fetch_add(1, Ordering::Relaxed))
    }
}
