//! Cooperative cancellation for executions and variable requests.
//!
//! Executions, variable requests and source action requests all share
//! [`CancellationToken`]. Cancelling any clone is visible to every holder,
//! and cancellation may be requested before an execution starts.
//!
//! ```
//! use mercury_core::CancellationToken;
//!
//! let token = CancellationToken::new();
//! let clone = token.clone();
//!
//! assert!(!token.is_cancelled());
//! clone.cancel();
//! assert!(token.is_cancelled());
//! ```

pub use tokio_util::sync::CancellationToken;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_before_wait_resolves() {
        let token = CancellationToken::new();
        token.cancel();
        token.cancelled().await;
    }

    #[tokio::test]
    async fn test_cancel_wakes_clone() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });

        tokio::task::yield_now().await;
        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("waiter should wake")
            .unwrap();
    }
}
