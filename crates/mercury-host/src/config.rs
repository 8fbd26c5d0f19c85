//! Host configuration.

use std::path::Path;
use std::time::Duration;

use mercury_core::KernelConfig;
use mercury_core::config::{DEFAULT_FLUSH_DELAY, DEFAULT_VARIABLE_PAGE_SIZE};
use serde::{Deserialize, Serialize};

use crate::error::{HostError, HostResult};

fn default_flush_delay_ms() -> u64 {
    DEFAULT_FLUSH_DELAY.as_millis() as u64
}

fn default_variable_page_size() -> usize {
    DEFAULT_VARIABLE_PAGE_SIZE
}

fn default_mailbox_capacity() -> usize {
    256
}

/// Host configuration, loadable from JSON. Missing fields take defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Batching window for execution updates, in milliseconds.
    #[serde(default = "default_flush_delay_ms")]
    pub flush_delay_ms: u64,

    /// Maximum variables streamed per request.
    #[serde(default = "default_variable_page_size")]
    pub variable_page_size: usize,

    /// Inbound calls buffered before senders wait.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            flush_delay_ms: default_flush_delay_ms(),
            variable_page_size: default_variable_page_size(),
            mailbox_capacity: default_mailbox_capacity(),
        }
    }
}

impl HostConfig {
    /// Load and validate a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> HostResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| HostError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> HostResult<()> {
        if self.variable_page_size == 0 {
            return Err(HostError::Config(
                "variable_page_size must be at least 1".to_string(),
            ));
        }
        if self.mailbox_capacity == 0 {
            return Err(HostError::Config(
                "mailbox_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The part of the configuration the kernel registry consumes.
    pub fn kernel_config(&self) -> KernelConfig {
        KernelConfig::default()
            .with_flush_delay(Duration::from_millis(self.flush_delay_ms))
            .with_variable_page_size(self.variable_page_size)
    }
}
