use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use coterie_types::Signal;
use tokio::sync::{mpsc, Mutex};

use crate::error::{SignalError, SignalResult};

const DEFAULT_QUEUE_DEPTH: usize = 256;
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// In-process pub/sub hub. Every agent (CEO, a worker role, the supervisor)
/// registers once at startup and gets back a receiver for its own inbox;
/// anyone holding a `SignalBus` handle can address a signal to that agent
/// by name. A full inbox blocks the sender for up to `SEND_TIMEOUT` before
/// giving up — a slow consumer should not be able to wedge the whole bus
/// indefinitely, but a momentary backlog shouldn't drop a signal either.
#[derive(Clone)]
pub struct SignalBus {
    inboxes: Arc<Mutex<HashMap<String, mpsc::Sender<Signal>>>>,
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalBus {
    pub fn new() -> Self {
        Self { inboxes: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Registers `name` as a signal recipient, returning its inbox receiver.
    /// Re-registering the same name replaces its sender, so a restarted
    /// worker can simply register again under the same role name.
    pub async fn register(&self, name: impl Into<String>) -> mpsc::Receiver<Signal> {
        let (tx, rx) = mpsc::channel(DEFAULT_QUEUE_DEPTH);
        self.inboxes.lock().await.insert(name.into(), tx);
        rx
    }

    pub async fn deregister(&self, name: &str) {
        self.inboxes.lock().await.remove(name);
    }

    /// Delivers `signal` to `signal.target`'s inbox. Errors if the target
    /// was never registered, its receiver was dropped, or its queue stayed
    /// full past `SEND_TIMEOUT`.
    pub async fn send(&self, signal: Signal) -> SignalResult<()> {
        let target = signal.target.clone();
        let sender = {
            let inboxes = self.inboxes.lock().await;
            inboxes.get(&target).cloned()
        };
        let Some(sender) = sender else {
            return Err(SignalError::UnknownTarget(target));
        };

        match tokio::time::timeout(SEND_TIMEOUT, sender.send(signal)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SignalError::ChannelClosed(target)),
            Err(_) => {
                tracing::warn!(target = %target, "signal bus send timed out on a full queue");
                Err(SignalError::SendTimeout { target })
            }
        }
    }

    /// Best-effort delivery to every currently registered recipient except
    /// `sender_name`. Used for shutdown broadcasts; individual failures are
    /// logged, not propagated, so one dead worker can't block the others.
    pub async fn broadcast(&self, signal_type: coterie_types::SignalType, sender_name: &str, payload: serde_json::Value) {
        let targets: Vec<String> = {
            let inboxes = self.inboxes.lock().await;
            inboxes.keys().filter(|k| k.as_str() != sender_name).cloned().collect()
        };
        for target in targets {
            let signal = Signal::new(signal_type, sender_name, target.clone(), payload.clone());
            if let Err(err) = self.send(signal).await {
                tracing::warn!(target = %target, error = %err, "broadcast signal delivery failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coterie_types::SignalType;

    #[tokio::test]
    async fn send_delivers_to_registered_target() {
        let bus = SignalBus::new();
        let mut rx = bus.register("worker-1").await;
        bus.send(Signal::heartbeat("supervisor", "worker-1", 123, "idle")).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.signal_type, SignalType::Heartbeat);
    }

    #[tokio::test]
    async fn send_to_unknown_target_errors() {
        let bus = SignalBus::new();
        let err = bus.send(Signal::shutdown("ceo", "ghost")).await.unwrap_err();
        assert!(matches!(err, SignalError::UnknownTarget(_)));
    }

    #[tokio::test]
    async fn broadcast_skips_the_sender_itself() {
        let bus = SignalBus::new();
        let mut a = bus.register("a").await;
        let _b = bus.register("b").await;
        bus.broadcast(SignalType::Shutdown, "a", serde_json::Value::Null).await;
        assert!(a.try_recv().is_err(), "sender must not receive its own broadcast");
    }
}
