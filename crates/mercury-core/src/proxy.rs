//! The outbound seam to the host process.

use futures::future::BoxFuture;

use crate::error::Result;
use crate::protocol::HostMessage;

/// Reliable, ordered channel to the host.
///
/// Both methods must enqueue the message before returning so that messages
/// reach the host in call order, whether or not a reply is awaited.
pub trait HostProxy: Send + Sync {
    /// Fire-and-forget call.
    fn notify(&self, message: HostMessage);

    /// Request/response call. Resolves to the host's verdict; a rejection is
    /// either `Ok(false)` or [`Error::HostRejected`](crate::Error::HostRejected).
    fn request(&self, message: HostMessage) -> BoxFuture<'static, Result<bool>>;
}

#[cfg(test)]
pub(crate) use recording::RecordingProxy;

#[cfg(test)]
mod recording {
    use std::sync::{Mutex, MutexGuard, PoisonError};

    use futures::future::{self, BoxFuture};

    use super::HostProxy;
    use crate::error::{Error, Result};
    use crate::protocol::HostMessage;

    /// A [`HostProxy`] that records every message and answers requests from
    /// a fixed policy.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingProxy {
        messages: Mutex<Vec<HostMessage>>,
        reject_kernels: bool,
    }

    impl RecordingProxy {
        pub fn new() -> Self {
            Self::default()
        }

        /// A proxy whose host rejects every `AddKernel` request.
        pub fn rejecting_kernels() -> Self {
            Self {
                reject_kernels: true,
                ..Self::default()
            }
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

        fn request(&self, message: HostMessage) -> BoxFuture<'static, Result<bool>> {
            let verdict = match &message {
                HostMessage::AddKernel { descriptor, .. } if self.reject_kernels => Err(
                    Error::HostRejected(format!("kernel '{}' is not allowed", descriptor.id)),
                ),
                _ => Ok(true),
            };
            self.lock().push(message);
            Box::pin(future::ready(verdict))
        }
    }
}
