//! Topics partitioned by key.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard};

use crate::subscription::Subscription;
use crate::topic::Topic;

/// One [`Topic`] per key, created on first subscription.
///
/// Publishing to a key nobody subscribed to is a no-op. Topics whose
/// observers have all gone away are pruned on the next subscription.
pub struct KeyedTopic<K, T: ?Sized> {
  topics: Mutex<HashMap<K, Topic<T>>>,
}

impl<K, T> KeyedTopic<K, T>
where
  K: Eq + Hash,
  T: ?Sized + 'static,
{
  pub fn new() -> Self {
    Self {
      topics: Mutex::new(HashMap::new()),
    }
  }

  pub fn subscribe<F>(&self, key: K, observer: F) -> Subscription
  where
    F: Fn(&T) + Send + Sync + 'static,
  {
    // Subscribe under the map lock so a concurrent prune can't orphan the topic.
    let mut topics = self.lock();
    topics.retain(|_, topic| topic.observer_count() > 0);
    topics.entry(key).or_default().subscribe(observer)
  }

  pub fn publish(&self, key: &K, value: &T) {
    let topic = self.lock().get(key).cloned();
    if let Some(topic) = topic {
      topic.publish(value);
    }
  }

  /// Number of live observers for `key`.
  pub fn observer_count(&self, key: &K) -> usize {
    self
      .lock()
      .get(key)
      .map(Topic::observer_count)
      .unwrap_or(0)
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<K, Topic<T>>> {
    self.topics.lock().unwrap_or_else(|e| e.into_inner())
  }
}

impl<K, T> Default for KeyedTopic<K, T>
where
  K: Eq + Hash,
  T: ?Sized + 'static,
{
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;

  #[test]
  fn test_keys_are_isolated() {
    let topics = KeyedTopic::<String, str>::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = seen.clone();
    let _a = topics.subscribe("a".to_string(), move |v: &str| {
      sink.lock().unwrap().push(format!("a:{v}"))
    });
    let sink = seen.clone();
    let _b = topics.subscribe("b".to_string(), move |v: &str| {
      sink.lock().unwrap().push(format!("b:{v}"))
    });

    topics.publish(&"a".to_string(), "1");
    topics.publish(&"b".to_string(), "2");
    topics.publish(&"c".to_string(), "3");

    assert_eq!(*seen.lock().unwrap(), vec!["a:1", "b:2"]);
  }

  #[test]
  fn test_concurrent_subscribers_are_never_pruned() {
    let topics = Arc::new(KeyedTopic::<usize, usize>::new());

    let handles: Vec<_> = (0..8)
      .map(|worker| {
        let topics = topics.clone();
        std::thread::spawn(move || {
          for round in 0..200 {
            let key = worker * 1_000 + round;
            let seen = Arc::new(Mutex::new(Vec::new()));
            let sink = seen.clone();
            let subscription = topics.subscribe(key, move |v: &usize| {
              sink.lock().unwrap().push(*v)
            });
            topics.publish(&key, &round);
            assert_eq!(*seen.lock().unwrap(), vec![round], "key {key} lost its observer");
            drop(subscription);
          }
        })
      })
      .collect();

    for handle in handles {
      handle.join().unwrap();
    }
  }

  #[test]
  fn test_observer_count_tracks_subscriptions() {
    let topics = KeyedTopic::<&'static str, i32>::new();
    let key = "task";
    assert_eq!(topics.observer_count(&key), 0);

    let first = topics.subscribe(key, |_: &i32| {});
    let second = topics.subscribe(key, |_: &i32| {});
    assert_eq!(topics.observer_count(&key), 2);

    drop(first);
    assert_eq!(topics.observer_count(&key), 1);
    second.unsubscribe();
    assert_eq!(topics.observer_count(&key), 0);
  }
}
