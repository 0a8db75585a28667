//! Per-task, ordered event delivery to stream subscribers.
//!
//! One producer (the engine) fans events out to any number of subscribers.
//! Each subscriber has its own bounded buffer; when a subscriber falls
//! behind, thinking deltas are dropped first, then sub-warning log events.
//! Structural events are never dropped — the publisher suspends instead,
//! which is the engine's back-pressure point.

use crate::event::WorkflowEvent;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

const DEFAULT_BUFFER_SIZE: usize = 256;

struct Subscriber {
    tx: mpsc::Sender<WorkflowEvent>,
    /// Internal observers (metrics, memory) do not count toward the
    /// disconnect detection that pauses a task.
    counts_for_presence: bool,
}

struct TaskChannel {
    subscribers: Mutex<Vec<Subscriber>>,
    ever_subscribed: AtomicBool,
}

impl TaskChannel {
    fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            ever_subscribed: AtomicBool::new(false),
        }
    }
}

/// Process-wide registry of per-task event channels.
pub struct EventStreamManager {
    channels: DashMap<String, Arc<TaskChannel>>,
    buffer_size: usize,
}

impl Default for EventStreamManager {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStreamManager {
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            channels: DashMap::new(),
            buffer_size: buffer_size.max(1),
        }
    }

    fn channel(&self, task_id: &str) -> Arc<TaskChannel> {
        self.channels
            .entry(task_id.to_string())
            .or_insert_with(|| Arc::new(TaskChannel::new()))
            .clone()
    }

    /// Ensure a channel exists for the task.
    pub fn register(&self, task_id: &str) {
        self.channel(task_id);
    }

    /// Attach a new subscriber and return its event receiver.
    pub fn subscribe(&self, task_id: &str) -> mpsc::Receiver<WorkflowEvent> {
        self.attach(task_id, true)
    }

    /// Attach an internal observer: it receives every event but is ignored
    /// by the disconnect detection.
    pub fn subscribe_observer(&self, task_id: &str) -> mpsc::Receiver<WorkflowEvent> {
        self.attach(task_id, false)
    }

    fn attach(&self, task_id: &str, counts_for_presence: bool) -> mpsc::Receiver<WorkflowEvent> {
        let channel = self.channel(task_id);
        let (tx, rx) = mpsc::channel(self.buffer_size);
        if counts_for_presence {
            channel.ever_subscribed.store(true, Ordering::SeqCst);
        }
        channel.subscribers.lock().push(Subscriber {
            tx,
            counts_for_presence,
        });
        rx
    }

    /// Deliver an event to every live subscriber of the task.
    ///
    /// Droppable events are discarded for subscribers whose buffer is full;
    /// structural events wait for buffer space.
    pub async fn publish(&self, task_id: &str, event: WorkflowEvent) {
        let channel = self.channel(task_id);
        let senders: Vec<mpsc::Sender<WorkflowEvent>> = channel
            .subscribers
            .lock()
            .iter()
            .map(|s| s.tx.clone())
            .collect();
        if senders.is_empty() {
            return;
        }

        let mut any_closed = false;
        for tx in &senders {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(ev)) => {
                    if ev.is_structural() {
                        if tx.send(ev).await.is_err() {
                            any_closed = true;
                        }
                    }
                    // Deltas and low-priority logs are dropped for this
                    // subscriber; the totals arrive with the completion event.
                }
                Err(mpsc::error::TrySendError::Closed(_)) => any_closed = true,
            }
        }

        if any_closed {
            channel.subscribers.lock().retain(|s| !s.tx.is_closed());
        }
    }

    /// Whether a channel exists for the task (a run is active or pending).
    pub fn is_registered(&self, task_id: &str) -> bool {
        self.channels.contains_key(task_id)
    }

    /// Whether the task currently has at least one live external subscriber.
    pub fn has_live_subscriber(&self, task_id: &str) -> bool {
        self.channels
            .get(task_id)
            .map(|c| {
                c.subscribers
                    .lock()
                    .iter()
                    .any(|s| s.counts_for_presence && !s.tx.is_closed())
            })
            .unwrap_or(false)
    }

    /// True once an external subscriber attached and has since disconnected,
    /// with no replacement. The engine uses this to auto-pause after the
    /// current stage completes. Internal observers are ignored.
    pub fn subscriber_lost(&self, task_id: &str) -> bool {
        match self.channels.get(task_id) {
            Some(c) => {
                c.ever_subscribed.load(Ordering::SeqCst)
                    && !c
                        .subscribers
                        .lock()
                        .iter()
                        .any(|s| s.counts_for_presence && !s.tx.is_closed())
            }
            None => false,
        }
    }

    /// Drop the task's channel after its terminal event has been delivered.
    pub fn close(&self, task_id: &str) {
        self.channels.remove(task_id);
    }

    /// Cheap per-task publishing handle for agents.
    pub fn emitter(self: &Arc<Self>, task_id: &str, stage: &str) -> EventEmitter {
        EventEmitter {
            manager: Arc::clone(self),
            task_id: task_id.to_string(),
            stage: stage.to_string(),
        }
    }
}

/// Publishing handle scoped to one task and the stage currently executing.
#[derive(Clone)]
pub struct EventEmitter {
    manager: Arc<EventStreamManager>,
    task_id: String,
    stage: String,
}

impl EventEmitter {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// The same handle, re-scoped to another stage name.
    pub fn for_stage(&self, stage: &str) -> EventEmitter {
        EventEmitter {
            manager: Arc::clone(&self.manager),
            task_id: self.task_id.clone(),
            stage: stage.to_string(),
        }
    }

    pub async fn publish(&self, event: WorkflowEvent) {
        self.manager.publish(&self.task_id, event).await;
    }

    pub async fn progress(&self, message: impl Into<String>, progress: Option<f64>) {
        self.publish(WorkflowEvent::StageProgress {
            stage: self.stage.clone(),
            message: message.into(),
            progress,
        })
        .await;
    }

    pub async fn log(&self, level: crate::event::LogLevel, message: impl Into<String>) {
        self.publish(WorkflowEvent::log(level, self.stage.clone(), message))
            .await;
    }

    pub async fn thinking_started(&self) {
        self.publish(WorkflowEvent::ThinkingStarted {
            stage: self.stage.clone(),
        })
        .await;
    }

    pub async fn thinking_delta(&self, delta: String, total_chars: usize, elapsed_ms: u64) {
        self.publish(WorkflowEvent::ThinkingInProgress {
            stage: self.stage.clone(),
            delta,
            total_chars,
            elapsed_ms,
        })
        .await;
    }

    pub async fn thinking_completed(&self, summary: String, total_chars: usize, elapsed_ms: u64) {
        self.publish(WorkflowEvent::ThinkingCompleted {
            stage: self.stage.clone(),
            summary,
            total_chars,
            elapsed_ms,
        })
        .await;
    }

    pub async fn thinking_interrupted(&self, reason: impl Into<String>) {
        self.publish(WorkflowEvent::ThinkingInterrupted {
            stage: self.stage.clone(),
            reason: reason.into(),
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::LogLevel;
    use serde_json::json;

    fn structural(n: usize) -> WorkflowEvent {
        WorkflowEvent::StageProgress {
            stage: "coding".into(),
            message: format!("step {n}"),
            progress: None,
        }
    }

    #[tokio::test]
    async fn events_arrive_in_publish_order() {
        let manager = Arc::new(EventStreamManager::new());
        let mut rx = manager.subscribe("t1");

        for n in 0..10 {
            manager.publish("t1", structural(n)).await;
        }
        for n in 0..10 {
            match rx.recv().await.unwrap() {
                WorkflowEvent::StageProgress { message, .. } => {
                    assert_eq!(message, format!("step {n}"));
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn deltas_dropped_when_subscriber_full() {
        let manager = Arc::new(EventStreamManager::with_buffer_size(2));
        let mut rx = manager.subscribe("t1");

        manager.publish("t1", structural(0)).await;
        manager.publish("t1", structural(1)).await;
        // Buffer is now full; deltas and debug logs must be discarded
        // without blocking the publisher.
        manager
            .publish(
                "t1",
                WorkflowEvent::ThinkingInProgress {
                    stage: "coding".into(),
                    delta: "x".into(),
                    total_chars: 1,
                    elapsed_ms: 1,
                },
            )
            .await;
        manager
            .publish("t1", WorkflowEvent::log(LogLevel::Debug, "coding", "noise"))
            .await;

        // Drain: only the two structural events were buffered.
        assert!(matches!(
            rx.recv().await.unwrap(),
            WorkflowEvent::StageProgress { .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            WorkflowEvent::StageProgress { .. }
        ));
        manager.publish("t1", structural(2)).await;
        assert!(matches!(
            rx.recv().await.unwrap(),
            WorkflowEvent::StageProgress { .. }
        ));
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive_events() {
        let manager = Arc::new(EventStreamManager::new());
        let mut a = manager.subscribe("t1");
        let mut b = manager.subscribe("t1");

        manager
            .publish("t1", WorkflowEvent::FinalResult { results: json!({}) })
            .await;

        assert!(a.recv().await.unwrap().is_terminal());
        assert!(b.recv().await.unwrap().is_terminal());
    }

    #[tokio::test]
    async fn observers_do_not_mask_subscriber_loss() {
        let manager = Arc::new(EventStreamManager::new());
        let mut observer = manager.subscribe_observer("t1");
        assert!(!manager.has_live_subscriber("t1"));
        assert!(!manager.subscriber_lost("t1"));

        let rx = manager.subscribe("t1");
        assert!(manager.has_live_subscriber("t1"));
        drop(rx);
        // The observer is still attached, but the external subscriber is gone.
        assert!(manager.subscriber_lost("t1"));

        manager.publish("t1", structural(0)).await;
        assert!(matches!(
            observer.recv().await.unwrap(),
            WorkflowEvent::StageProgress { .. }
        ));
    }

    #[tokio::test]
    async fn subscriber_loss_is_observable() {
        let manager = Arc::new(EventStreamManager::new());
        manager.register("t1");
        assert!(!manager.subscriber_lost("t1"));

        let rx = manager.subscribe("t1");
        assert!(manager.has_live_subscriber("t1"));
        drop(rx);
        assert!(manager.subscriber_lost("t1"));

        // A new subscriber clears the condition.
        let _rx2 = manager.subscribe("t1");
        assert!(!manager.subscriber_lost("t1"));
    }

    #[tokio::test]
    async fn emitter_scopes_stage() {
        let manager = Arc::new(EventStreamManager::new());
        let mut rx = manager.subscribe("t1");
        let emitter = manager.emitter("t1", "planning");
        emitter.progress("drafting", Some(0.5)).await;

        match rx.recv().await.unwrap() {
            WorkflowEvent::StageProgress { stage, progress, .. } => {
                assert_eq!(stage, "planning");
                assert_eq!(progress, Some(0.5));
            }
            other => panic!("unexpected event {other:?}"),
        }

        let coder = emitter.for_stage("coding");
        assert_eq!(coder.stage(), "coding");
    }
}
