//! Event stream multiplexer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use powblocs_observe::{KeyedTopic, Subscription};
use powblocs_task::TaskEvent;
use tokio::sync::mpsc;
use tracing::trace;

/// Buffers events per task and fans them out to observers.
///
/// Observers of a task always receive the complete current sequence, in
/// emission order. Sequences of different tasks never interfere. Observers
/// may read the stream from a callback but must not append to it.
pub struct EventStream {
  streams: Mutex<HashMap<String, Vec<TaskEvent>>>,
  /// Held across append-then-notify so observers see sequences grow in order.
  publish: Mutex<()>,
  topics: KeyedTopic<String, [TaskEvent]>,
}

impl EventStream {
  pub fn new() -> Self {
    Self {
      streams: Mutex::new(HashMap::new()),
      publish: Mutex::new(()),
      topics: KeyedTopic::new(),
    }
  }

  /// Append an event to the task's sequence and notify its observers.
  pub fn append(
    &self,
    task_id: &str,
    event_name: impl Into<String>,
    data: serde_json::Value,
  ) -> TaskEvent {
    let _publish = self.publish_guard();
    let (event, sequence) = {
      let mut streams = self.lock();
      let events = streams.entry(task_id.to_string()).or_default();
      let event = TaskEvent {
        task_id: task_id.to_string(),
        sequence: events.len() as u64,
        event_name: event_name.into(),
        data,
        timestamp: Utc::now(),
      };
      events.push(event.clone());
      (event, events.clone())
    };

    trace!(
      task_id = %task_id,
      event_name = %event.event_name,
      sequence = event.sequence,
      "event appended"
    );
    self.topics.publish(&task_id.to_string(), &sequence);

    event
  }

  /// Observe a task's sequence.
  ///
  /// The observer is called immediately with the current sequence (possibly
  /// empty) and again after every append or clear.
  ///
  /// Every call happens while the stream's publish lock is held, so the
  /// observer must not `append`, `clear`, or `subscribe` on this stream.
  /// Use [`subscribe_channel`](Self::subscribe_channel) to react with further
  /// writes.
  pub fn subscribe<F>(&self, task_id: &str, observer: F) -> Subscription
  where
    F: Fn(&[TaskEvent]) + Send + Sync + 'static,
  {
    let observer = Arc::new(observer);
    let registered = observer.clone();

    let _publish = self.publish_guard();
    let subscription = self
      .topics
      .subscribe(task_id.to_string(), move |events: &[TaskEvent]| {
        (*registered)(events)
      });
    let current = self.events(task_id);
    (*observer)(&current);

    subscription
  }

  /// Like [`subscribe`](Self::subscribe), but delivers sequences over a channel.
  pub fn subscribe_channel(
    &self,
    task_id: &str,
  ) -> (Subscription, mpsc::UnboundedReceiver<Vec<TaskEvent>>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let subscription = self.subscribe(task_id, move |events: &[TaskEvent]| {
      let _ = sender.send(events.to_vec());
    });
    (subscription, receiver)
  }

  /// Current sequence for a task.
  pub fn events(&self, task_id: &str) -> Vec<TaskEvent> {
    self.lock().get(task_id).cloned().unwrap_or_default()
  }

  /// Drop a task's sequence and notify its observers with an empty one.
  ///
  /// Sequence numbers start again from 0 afterwards.
  pub fn clear(&self, task_id: &str) {
    let _publish = self.publish_guard();
    self.lock().remove(task_id);
    let empty: &[TaskEvent] = &[];
    self.topics.publish(&task_id.to_string(), empty);
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<TaskEvent>>> {
    self.streams.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn publish_guard(&self) -> MutexGuard<'_, ()> {
    self.publish.lock().unwrap_or_else(|e| e.into_inner())
  }
}

impl Default for EventStream {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::{Value, json};

  type Seen = Arc<Mutex<Vec<Vec<Value>>>>;

  fn record(stream: &EventStream, task_id: &str) -> (Subscription, Seen) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let subscription = stream.subscribe(task_id, move |events: &[TaskEvent]| {
      sink
        .lock()
        .unwrap()
        .push(events.iter().map(|e| e.data.clone()).collect());
    });
    (subscription, seen)
  }

  #[test]
  fn test_subscribe_replays_current_sequence() {
    let stream = EventStream::new();
    stream.append("t3", "progress", json!({"progress": 0}));
    stream.append("t3", "progress", json!({"progress": 1}));

    let (_subscription, seen) = record(&stream, "t3");
    assert_eq!(
      *seen.lock().unwrap(),
      vec![vec![json!({"progress": 0}), json!({"progress": 1})]]
    );

    stream.clear("t3");
    assert_eq!(seen.lock().unwrap().last(), Some(&vec![]));
    assert!(stream.events("t3").is_empty());
  }

  #[test]
  fn test_appends_grow_monotonically() {
    let stream = EventStream::new();
    let (_subscription, seen) = record(&stream, "t1");

    for i in 0..5 {
      stream.append("t1", "tick", json!(i));
    }

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 6);
    for (n, sequence) in seen.iter().enumerate() {
      let expected: Vec<Value> = (0..n).map(|i| json!(i)).collect();
      assert_eq!(sequence, &expected);
    }
  }

  #[test]
  fn test_sequence_numbers_and_names() {
    let stream = EventStream::new();
    let first = stream.append("t1", "start", json!(null));
    let second = stream.append("t1", "progress", json!({"progress": 0.5}));

    assert_eq!(first.sequence, 0);
    assert_eq!(second.sequence, 1);
    assert_eq!(second.event_name, "progress");
    assert_eq!(second.task_id, "t1");
    assert!(second.timestamp >= first.timestamp);
  }

  #[test]
  fn test_tasks_do_not_interfere() {
    let stream = EventStream::new();
    let (_a, seen_a) = record(&stream, "a");
    let (_b, seen_b) = record(&stream, "b");

    stream.append("a", "x", json!(1));
    stream.append("b", "x", json!(2));
    stream.clear("a");

    assert_eq!(*seen_a.lock().unwrap(), vec![vec![], vec![json!(1)], vec![]]);
    assert_eq!(*seen_b.lock().unwrap(), vec![vec![], vec![json!(2)]]);
    assert_eq!(stream.events("b").len(), 1);
  }

  #[tokio::test]
  async fn test_subscribe_channel() {
    let stream = EventStream::new();
    stream.append("t1", "progress", json!(0));
    let (_subscription, mut receiver) = stream.subscribe_channel("t1");
    stream.append("t1", "progress", json!(1));

    assert_eq!(receiver.recv().await.unwrap().len(), 1);
    assert_eq!(receiver.recv().await.unwrap().len(), 2);
  }
}
