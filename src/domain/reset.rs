//! Gateway reset signal.
//!
//! When listing shared volumes fails, the control loop asks the gateway to
//! drop its connection and credentials. The signal never blocks the sender
//! and holds at most one pending request; further requests while one is
//! pending are dropped.

use tokio::sync::mpsc;

/// Sending half, held by the control loop.
#[derive(Debug, Clone)]
pub struct GatewayReset {
    tx: mpsc::Sender<()>,
}

/// Receiving half, held by the gateway.
#[derive(Debug)]
pub struct ResetListener {
    rx: mpsc::Receiver<()>,
}

/// Create a connected reset signal pair.
pub fn reset_channel() -> (GatewayReset, ResetListener) {
    let (tx, rx) = mpsc::channel(1);
    (GatewayReset { tx }, ResetListener { rx })
}

impl GatewayReset {
    /// Request a reset. Returns `false` if one was already pending or the
    /// listener is gone.
    pub fn request(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }
}

impl ResetListener {
    /// Wait for the next reset request. `None` once every sender is dropped.
    pub async fn recv(&mut self) -> Option<()> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_reset_coalesces_pending_requests() {
        let (reset, mut listener) = reset_channel();

        assert!(reset.request());
        assert!(!reset.request());
        assert!(!reset.clone().request());

        assert_eq!(listener.recv().await, Some(()));

        // slot free again
        assert!(reset.request());
        assert_eq!(listener.recv().await, Some(()));

        let nothing = tokio::time::timeout(Duration::from_millis(20), listener.recv()).await;
        assert!(nothing.is_err());
    }

    #[test]
    fn test_listener_woken_by_request() {
        let (reset, mut listener) = reset_channel();
        let mut recv = tokio_test::task::spawn(listener.recv());

        tokio_test::assert_pending!(recv.poll());
        assert!(reset.request());
        assert!(recv.is_woken());
        tokio_test::assert_ready_eq!(recv.poll(), Some(()));
    }

    #[tokio::test]
    async fn test_reset_without_listener_does_not_block() {
        let (reset, listener) = reset_channel();
        drop(listener);

        assert!(!reset.request());
    }

    #[tokio::test]
    async fn test_listener_ends_when_senders_dropped() {
        let (reset, mut listener) = reset_channel();
        drop(reset);

        assert_eq!(listener.recv().await, None);
    }
}
