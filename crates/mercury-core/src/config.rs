//! Tunables for the kernel subsystem.

use std::time::Duration;

/// Default batching window for execution updates.
pub const DEFAULT_FLUSH_DELAY: Duration = Duration::from_millis(10);

/// Default maximum number of variables streamed per request.
pub const DEFAULT_VARIABLE_PAGE_SIZE: usize = 100;

/// Configuration shared by the registry and everything it creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelConfig {
    /// Window after which a pending batch of execution updates is flushed.
    pub flush_delay: Duration,

    /// Page ceiling for a single variable request.
    pub variable_page_size: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            flush_delay: DEFAULT_FLUSH_DELAY,
            variable_page_size: DEFAULT_VARIABLE_PAGE_SIZE,
        }
    }
}

impl KernelConfig {
    /// Config with a different flush window.
    pub fn with_flush_delay(self, flush_delay: Duration) -> Self {
        Self {
            flush_delay,
            ..self
        }
    }

    /// Config with a different variable page ceiling.
    pub fn with_variable_page_size(self, variable_page_size: usize) -> Self {
        Self {
            variable_page_size,
            ..self
        }
    }
}
