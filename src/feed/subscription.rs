use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::common::{Message, MessageBody, MessageId, SubscriptionError, TransportError};

pub type BatchCallback = Box<dyn Fn(Vec<Message>) + Send + Sync>;
pub type ErrorCallback = Box<dyn Fn(SubscriptionError) + Send + Sync>;

/// Push side of the backing log.
///
/// Batches are ascending by `(created_at, id)`. The source may replay its
/// tail on subscribe, so consumers must tolerate ids they have already seen.
pub trait LiveSubscription: Send + Sync {
    fn subscribe(&self, on_batch: BatchCallback, on_error: ErrorCallback) -> Result<SubscriptionHandle, TransportError>;
}

/// Write side of the backing log. The appended message reaches readers only
/// through their live subscription.
#[async_trait]
pub trait MessageAppender: Send + Sync {
    async fn append_message(
        &self,
        sender_id: &str,
        sender_display_name: &str,
        body: MessageBody,
    ) -> Result<MessageId, TransportError>;
}

struct Callbacks {
    on_batch: BatchCallback,
    on_error: ErrorCallback,
}

/// Hands batches from a transport task to the subscriber's callbacks until
/// the subscription is cancelled.
///
/// Callbacks run while the gate lock is held, so once `close` has returned
/// no callback is running and none will start.
#[derive(Clone)]
pub struct DeliveryGate {
    callbacks: Arc<Mutex<Option<Callbacks>>>,
}

impl DeliveryGate {
    pub fn new(on_batch: BatchCallback, on_error: ErrorCallback) -> Self {
        Self {
            callbacks: Arc::new(Mutex::new(Some(Callbacks { on_batch, on_error }))),
        }
    }

    /// Returns `false` once the gate is closed.
    pub fn deliver(&self, batch: Vec<Message>) -> bool {
        let guard = self.callbacks.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(callbacks) => {
                (callbacks.on_batch)(batch);
                true
            }
            None => false,
        }
    }

    /// Reports `error` and closes the gate; an error ends the subscription.
    pub fn fail(&self, error: SubscriptionError) {
        let mut guard = self.callbacks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(callbacks) = guard.take() {
            (callbacks.on_error)(error);
        }
    }

    pub fn close(&self) {
        let mut guard = self.callbacks.lock().unwrap_or_else(PoisonError::into_inner);
        guard.take();
    }

    pub fn is_open(&self) -> bool {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// Owner of one live subscription.
pub struct SubscriptionHandle {
    gate: DeliveryGate,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub fn new(gate: DeliveryGate, task: Option<JoinHandle<()>>) -> Self {
        Self { gate, task }
    }

    /// Stops delivery. No callback runs after this returns.
    pub fn cancel(mut self) {
        self.shutdown();
    }

    pub fn is_active(&self) -> bool {
        self.gate.is_open()
    }

    fn shutdown(&mut self) {
        self.gate.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_gate() -> (DeliveryGate, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let batches = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        let batch_count = batches.clone();
        let error_count = errors.clone();
        let gate = DeliveryGate::new(
            Box::new(move |batch: Vec<Message>| {
                batch_count.fetch_add(batch.len().max(1), Ordering::SeqCst);
            }),
            Box::new(move |_: SubscriptionError| {
                error_count.fetch_add(1, Ordering::SeqCst);
            }),
        );
        (gate, batches, errors)
    }

    #[test]
    fn cancelled_handle_stops_delivery() {
        let (gate, batches, _) = counting_gate();
        let handle = SubscriptionHandle::new(gate.clone(), None);
        assert!(gate.deliver(Vec::new()));
        assert!(handle.is_active());

        handle.cancel();
        assert!(!gate.deliver(Vec::new()));
        assert_eq!(batches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failure_is_reported_once_and_closes_gate() {
        let (gate, _, errors) = counting_gate();
        gate.fail(SubscriptionError::Closed);
        gate.fail(SubscriptionError::Closed);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert!(!gate.is_open());
    }

    #[test]
    fn dropping_handle_closes_gate() {
        let (gate, _, _) = counting_gate();
        drop(SubscriptionHandle::new(gate.clone(), None));
        assert!(!gate.is_open());
    }
}
