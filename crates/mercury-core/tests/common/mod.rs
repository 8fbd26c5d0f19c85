//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::future::{self, BoxFuture};
use mercury_core::{HostMessage, HostProxy};

/// A host that accepts every request and records every message.
#[derive(Debug, Default)]
pub struct RecordingProxy {
    messages: Mutex<Vec<HostMessage>>,
}

impl RecordingProxy {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<HostMessage>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn messages(&self) -> Vec<HostMessage> {
        self.lock().clone()
    }

    /// Drain the recorded messages.
    pub fn take(&self) -> Vec<HostMessage> {
        std::mem::take(&mut *self.lock())
    }

    pub fn count(&self, predicate: impl Fn(&HostMessage) -> bool) -> usize {
        self.lock().iter().filter(|msg| predicate(msg)).count()
    }
}

impl HostProxy for RecordingProxy {
    fn notify(&self, message: HostMessage) {
        self.lock().push(message);
    }

    fn request(&self, message: HostMessage) -> BoxFuture<'static, mercury_core::Result<bool>> {
        self.lock().push(message);
        Box::pin(future::ready(Ok(true)))
    }
}
