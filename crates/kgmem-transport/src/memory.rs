//! In-memory carrier pair for tests and in-process hosts.

use kgmem_types::{Carrier, CarrierError};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, watch, Mutex};

/// One end of an in-memory duplex; frames sent here arrive at the peer's `recv`.
pub struct ChannelCarrier {
    tx: std::sync::Mutex<Option<mpsc::UnboundedSender<String>>>,
    rx: Mutex<mpsc::UnboundedReceiver<String>>,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl ChannelCarrier {
    /// Connected pair: (client end, host end).
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (Self::new(a_tx, b_rx), Self::new(b_tx, a_rx))
    }

    fn new(tx: mpsc::UnboundedSender<String>, rx: mpsc::UnboundedReceiver<String>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            tx: std::sync::Mutex::new(Some(tx)),
            rx: Mutex::new(rx),
            closed: AtomicBool::new(false),
            shutdown,
        }
    }
}

#[async_trait::async_trait]
impl Carrier for ChannelCarrier {
    fn kind(&self) -> &'static str {
        "channel"
    }

    async fn send(&self, message: String) -> Result<(), CarrierError> {
        let guard = self.tx.lock().map_err(|_| CarrierError::Closed)?;
        match guard.as_ref() {
            Some(tx) => tx.send(message).map_err(|_| CarrierError::Closed),
            None => Err(CarrierError::Closed),
        }
    }

    async fn recv(&self) -> Result<Option<String>, CarrierError> {
        let mut shutdown = self.shutdown.subscribe();
        if self.closed.load(Ordering::Acquire) {
            return Ok(None);
        }
        let mut rx = self.rx.lock().await;
        tokio::select! {
            msg = rx.recv() => Ok(msg),
            _ = shutdown.changed() => Ok(None),
        }
    }

    async fn close(&self) -> Result<(), CarrierError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            if let Ok(mut guard) = self.tx.lock() {
                guard.take();
            }
            let _ = self.shutdown.send(true);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn frames_cross_the_pair() {
        let (a, b) = ChannelCarrier::pair();
        a.send("ping".into()).await.unwrap();
        assert_eq!(b.recv().await.unwrap().as_deref(), Some("ping"));
        b.send("pong".into()).await.unwrap();
        assert_eq!(a.recv().await.unwrap().as_deref(), Some("pong"));
    }

    #[tokio::test]
    async fn close_wakes_a_blocked_recv_and_ends_the_peer() {
        let (a, b) = ChannelCarrier::pair();
        let a = Arc::new(a);
        let waiter = {
            let a = Arc::clone(&a);
            tokio::spawn(async move { a.recv().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        a.close().await.unwrap();
        assert_eq!(waiter.await.unwrap().unwrap(), None);
        assert_eq!(b.recv().await.unwrap(), None);
        assert!(matches!(a.send("late".into()).await, Err(CarrierError::Closed)));
    }
}
