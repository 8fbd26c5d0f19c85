//! Channel-backed [`HostProxy`].
//!
//! Every outbound message is pushed onto one unbounded channel, so the
//! order the transport sees is the order of the calls. Requests carry a
//! oneshot for the host's verdict.

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use mercury_core::{Error, HostMessage, HostProxy};
use tokio::sync::{mpsc, oneshot};

/// One outbound message, with a reply slot when it is a request.
#[derive(Debug)]
pub struct OutboundEnvelope {
    pub message: HostMessage,
    reply: Option<oneshot::Sender<bool>>,
}

impl OutboundEnvelope {
    /// Whether the sender waits for a verdict.
    pub fn expects_reply(&self) -> bool {
        self.reply.is_some()
    }

    /// Answer a request. No-op for notifications.
    pub fn respond(self, accepted: bool) {
        if let Some(reply) = self.reply {
            let _ = reply.send(accepted);
        }
    }
}

/// A [`HostProxy`] feeding an in-process channel.
#[derive(Debug, Clone)]
pub struct ChannelProxy {
    tx: mpsc::UnboundedSender<OutboundEnvelope>,
}

impl ChannelProxy {
    /// Create the proxy and the receiving end the transport drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl HostProxy for ChannelProxy {
    fn notify(&self, message: HostMessage) {
        let envelope = OutboundEnvelope {
            message,
            reply: None,
        };
        if let Err(mpsc::error::SendError(envelope)) = self.tx.send(envelope) {
            tracing::warn!(message = ?envelope.message, "host channel closed, dropping message");
        }
    }

    fn request(&self, message: HostMessage) -> BoxFuture<'static, mercury_core::Result<bool>> {
        let (reply, verdict) = oneshot::channel();
        let envelope = OutboundEnvelope {
            message,
            reply: Some(reply),
        };
        if self.tx.send(envelope).is_err() {
            return future::ready(Err(Error::Proxy("host channel closed".to_string()))).boxed();
        }
        async move {
            verdict
                .await
                .map_err(|_| Error::Proxy("host dropped the request".to_string()))
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mercury_core::KernelHandle;

    #[tokio::test]
    async fn test_request_resolves_with_verdict() {
        let (proxy, mut rx) = ChannelProxy::new();
        proxy.notify(HostMessage::RemoveKernel {
            handle: KernelHandle::new(0),
        });
        let pending = proxy.request(HostMessage::RemoveKernel {
            handle: KernelHandle::new(1),
        });

        let first = rx.recv().await.unwrap();
        assert!(!first.expects_reply());
        let second = rx.recv().await.unwrap();
        assert!(second.expects_reply());
        second.respond(false);

        assert!(!pending.await.unwrap());
    }

    #[tokio::test]
    async fn test_closed_channel_fails_requests() {
        let (proxy, rx) = ChannelProxy::new();
        drop(rx);
        proxy.notify(HostMessage::RemoveKernel {
            handle: KernelHandle::new(0),
        });
        let err = proxy
            .request(HostMessage::RemoveKernel {
                handle: KernelHandle::new(1),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Proxy(_)));
    }

    #[tokio::test]
    async fn test_dropped_envelope_fails_request() {
        let (proxy, mut rx) = ChannelProxy::new();
        let pending = proxy.request(HostMessage::RemoveKernel {
            handle: KernelHandle::new(1),
        });
        drop(rx.recv().await.unwrap());
        assert!(pending.await.is_err());
    }
}
