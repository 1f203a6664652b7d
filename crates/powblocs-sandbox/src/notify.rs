//! Host notifications and notifiers.
//!
//! Hosts push state changes and events to the bridge through a
//! [`HostNotifier`] handed to them at construction.

use powblocs_task::{EventReport, StateReport};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Something the sandbox host wants the bridge to know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HostNotification {
  /// A task changed state.
  StateChanged(StateReport),
  /// A running task emitted an event.
  Event(EventReport),
}

impl HostNotification {
  pub fn task_id(&self) -> &str {
    match self {
      Self::StateChanged(report) => &report.task_id,
      Self::Event(report) => &report.task_id,
    }
  }
}

/// Receives notifications from a sandbox host.
pub trait HostNotifier: Send + Sync + 'static {
  fn notify(&self, notification: HostNotification);
}

/// A notifier that discards everything.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl HostNotifier for NoopNotifier {
  fn notify(&self, _notification: HostNotification) {}
}

/// A notifier that forwards to an unbounded channel.
///
/// The supervisor drains the receiving end in arrival order. Unbounded so a
/// chatty script never blocks the host on a slow consumer.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<HostNotification>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<HostNotification>) -> Self {
    Self { sender }
  }

  /// Create a notifier together with the receiver it feeds.
  pub fn channel() -> (Self, mpsc::UnboundedReceiver<HostNotification>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Self::new(sender), receiver)
  }
}

impl HostNotifier for ChannelNotifier {
  fn notify(&self, notification: HostNotification) {
    // Ignore send errors - receiver may have been dropped
    let _ = self.sender.send(notification);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[tokio::test]
  async fn test_channel_notifier_preserves_order() {
    let (notifier, mut receiver) = ChannelNotifier::channel();
    notifier.notify(HostNotification::Event(EventReport::new("t1", 1, "a", json!(1))));
    notifier.notify(HostNotification::StateChanged(StateReport::running("t1", 1)));

    assert!(matches!(receiver.recv().await, Some(HostNotification::Event(_))));
    assert!(matches!(
      receiver.recv().await,
      Some(HostNotification::StateChanged(_))
    ));
  }

  #[test]
  fn test_send_after_receiver_dropped_is_ignored() {
    let (notifier, receiver) = ChannelNotifier::channel();
    drop(receiver);
    notifier.notify(HostNotification::StateChanged(StateReport::stopped("t1", 1)));
  }

  #[test]
  fn test_notification_wire_format() {
    let notification: HostNotification = serde_json::from_value(json!({
      "kind": "state_changed",
      "task_id": "t1",
      "attempt": 1,
      "state": "completed",
      "return_value": {"x": 1}
    }))
    .unwrap();

    assert_eq!(notification.task_id(), "t1");
    assert_eq!(
      notification,
      HostNotification::StateChanged(StateReport::completed("t1", 1, json!({"x": 1})))
    );
  }
}
