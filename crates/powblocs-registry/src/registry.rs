//! Task registry implementation.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use powblocs_observe::{KeyedTopic, Subscription, Topic};
use powblocs_task::Task;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::RegistryError;

#[derive(Default)]
struct Tasks {
  by_id: HashMap<String, Task>,
  /// Task ids in creation order.
  order: Vec<String>,
}

impl Tasks {
  fn snapshot(&self) -> Vec<Task> {
    self
      .order
      .iter()
      .filter_map(|id| self.by_id.get(id).cloned())
      .collect()
  }
}

/// Owns every task record and notifies observers of changes.
///
/// All mutations are serialized: an observer always receives a complete
/// record, and observers of the same task see changes in the order they were
/// applied. Observers are called without the record lock held, so they may
/// read from the registry, but they must not mutate it from inside the
/// callback.
pub struct TaskRegistry {
  tasks: Mutex<Tasks>,
  /// Held across mutate-then-notify so notifications keep mutation order.
  publish: Mutex<()>,
  task_topics: KeyedTopic<String, Task>,
  all_topic: Topic<[Task]>,
}

impl TaskRegistry {
  pub fn new() -> Self {
    Self {
      tasks: Mutex::new(Tasks::default()),
      publish: Mutex::new(()),
      task_topics: KeyedTopic::new(),
      all_topic: Topic::new(),
    }
  }

  /// Insert a new task in the `running` state.
  pub fn create_task(
    &self,
    id: impl Into<String>,
    code: impl Into<String>,
    action_name: Option<String>,
    action_input: Option<serde_json::Value>,
  ) -> Result<Task, RegistryError> {
    let id = id.into();
    debug_assert!(!id.is_empty(), "task ids must not be empty");

    let _publish = self.publish_guard();
    let (task, all) = {
      let mut tasks = self.lock();
      if tasks.by_id.contains_key(&id) {
        return Err(RegistryError::AlreadyExists { task_id: id });
      }

      let task = Task::new(id.clone(), code, action_name, action_input);
      tasks.by_id.insert(id.clone(), task.clone());
      tasks.order.push(id);
      (task, tasks.snapshot())
    };

    debug!(task_id = %task.id(), "task created");
    self.all_topic.publish(&all);

    Ok(task)
  }

  /// Read a copy of a task.
  pub fn get_task(&self, id: &str) -> Option<Task> {
    self.lock().by_id.get(id).cloned()
  }

  /// All tasks, in creation order.
  pub fn list_tasks(&self) -> Vec<Task> {
    self.lock().snapshot()
  }

  pub fn len(&self) -> usize {
    self.lock().by_id.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Apply `update` to the task record and republish it if anything changed.
  ///
  /// Returns `None` (and logs) when the task is unknown: host reports can
  /// race with task removal, so this is not treated as an error.
  pub fn update_task<F, R>(&self, id: &str, update: F) -> Option<R>
  where
    F: FnOnce(&mut Task) -> R,
  {
    let _publish = self.publish_guard();
    let (output, changed) = {
      let mut tasks = self.lock();
      let Some(task) = tasks.by_id.get_mut(id) else {
        warn!(task_id = %id, "update for unknown task ignored");
        return None;
      };

      let before = task.clone();
      let output = update(task);
      let after = task.clone();
      let changed = if after != before {
        Some((after, tasks.snapshot()))
      } else {
        None
      };
      (output, changed)
    };

    if let Some((task, all)) = changed {
      self.task_topics.publish(&task.id().to_string(), &task);
      self.all_topic.publish(&all);
    }

    Some(output)
  }

  /// Observe changes to one task.
  ///
  /// The observer is not called on subscription, only on later changes.
  /// Subscribing to an unknown task returns an inactive subscription.
  ///
  /// The observer runs on the mutating thread while the registry's publish
  /// lock is held. Calling [`update_task`](Self::update_task) or
  /// [`clear_completed`](Self::clear_completed) from inside it deadlocks;
  /// use [`subscribe_channel`](Self::subscribe_channel) to react with further
  /// mutations.
  pub fn subscribe<F>(&self, id: &str, observer: F) -> Subscription
  where
    F: Fn(&Task) + Send + Sync + 'static,
  {
    // The record lock keeps clear_completed from removing the task between
    // the lookup and the registration.
    let tasks = self.lock();
    if !tasks.by_id.contains_key(id) {
      debug!(task_id = %id, "subscription to unknown task is a no-op");
      return Subscription::noop();
    }
    self.task_topics.subscribe(id.to_string(), observer)
  }

  /// Like [`subscribe`](Self::subscribe), but delivers updates over a channel.
  ///
  /// For an unknown task the receiver is already closed.
  pub fn subscribe_channel(&self, id: &str) -> (Subscription, mpsc::UnboundedReceiver<Task>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let subscription = self.subscribe(id, move |task: &Task| {
      let _ = sender.send(task.clone());
    });
    (subscription, receiver)
  }

  /// Observe every change to any task, receiving the whole collection.
  ///
  /// Same reentrancy rule as [`subscribe`](Self::subscribe): the observer
  /// must not mutate the registry.
  pub fn subscribe_all<F>(&self, observer: F) -> Subscription
  where
    F: Fn(&[Task]) + Send + Sync + 'static,
  {
    self.all_topic.subscribe(observer)
  }

  /// Remove terminal tasks that nobody is observing individually.
  ///
  /// Returns how many tasks were removed.
  pub fn clear_completed(&self) -> usize {
    self.remove_completed().len()
  }

  /// Like [`clear_completed`](Self::clear_completed), returning the removed
  /// ids so per-task state kept elsewhere can be dropped too.
  pub fn remove_completed(&self) -> Vec<String> {
    let _publish = self.publish_guard();
    let (removed, all) = {
      let mut tasks = self.lock();
      let removed: Vec<String> = tasks
        .order
        .iter()
        .filter(|id| tasks.by_id.get(*id).is_some_and(Task::is_terminal))
        .filter(|id| self.task_topics.observer_count(*id) == 0)
        .cloned()
        .collect();

      for id in &removed {
        tasks.by_id.remove(id);
      }
      tasks.order.retain(|id| !removed.contains(id));
      (removed, tasks.snapshot())
    };

    if !removed.is_empty() {
      debug!(removed = removed.len(), "cleared terminal tasks");
      self.all_topic.publish(&all);
    }

    removed
  }

  fn lock(&self) -> MutexGuard<'_, Tasks> {
    self.tasks.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn publish_guard(&self) -> MutexGuard<'_, ()> {
    self.publish.lock().unwrap_or_else(|e| e.into_inner())
  }
}

impl Default for TaskRegistry {
  fn default() -> Self {
    Self::new()
  }
}
