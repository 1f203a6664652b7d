//! Single-channel fan-out.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::mpsc;

use crate::subscription::Subscription;

/// A registered callback.
pub type Observer<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Observers<T: ?Sized> {
  next_id: u64,
  entries: Vec<(u64, Observer<T>)>,
}

/// Fans values out to a set of observers.
///
/// Cloning a topic yields another handle to the same observer set.
pub struct Topic<T: ?Sized> {
  observers: Arc<Mutex<Observers<T>>>,
}

impl<T: ?Sized + 'static> Topic<T> {
  pub fn new() -> Self {
    Self {
      observers: Arc::new(Mutex::new(Observers {
        next_id: 0,
        entries: Vec::new(),
      })),
    }
  }

  /// Register `observer` for every future [`publish`](Self::publish).
  pub fn subscribe<F>(&self, observer: F) -> Subscription
  where
    F: Fn(&T) + Send + Sync + 'static,
  {
    let id = {
      let mut observers = lock(&self.observers);
      let id = observers.next_id;
      observers.next_id += 1;
      let observer: Observer<T> = Arc::new(observer);
      observers.entries.push((id, observer));
      id
    };

    let weak: Weak<Mutex<Observers<T>>> = Arc::downgrade(&self.observers);
    Subscription::new(move || {
      if let Some(observers) = weak.upgrade() {
        lock(&observers).entries.retain(|(entry_id, _)| *entry_id != id);
      }
    })
  }

  /// Call every observer with `value`, in subscription order.
  pub fn publish(&self, value: &T) {
    // Snapshot so observers run without the lock held.
    let snapshot: Vec<Observer<T>> = lock(&self.observers)
      .entries
      .iter()
      .map(|(_, observer)| observer.clone())
      .collect();

    for observer in snapshot {
      observer(value);
    }
  }

  pub fn observer_count(&self) -> usize {
    lock(&self.observers).entries.len()
  }
}

impl<T> Topic<T>
where
  T: ?Sized + ToOwned + 'static,
  T::Owned: Send + 'static,
{
  /// Subscribe through an unbounded channel instead of a callback.
  ///
  /// Each published value is cloned into the channel. Useful for async
  /// consumers that want to `.recv().await` updates.
  pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<T::Owned>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let subscription = self.subscribe(move |value: &T| {
      // Ignore send errors - receiver may have been dropped
      let _ = sender.send(T::to_owned(value));
    });
    (subscription, receiver)
  }
}

impl<T: ?Sized + 'static> Default for Topic<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T: ?Sized> Clone for Topic<T> {
  fn clone(&self) -> Self {
    Self {
      observers: self.observers.clone(),
    }
  }
}

fn lock<T: ?Sized>(observers: &Mutex<Observers<T>>) -> MutexGuard<'_, Observers<T>> {
  observers.lock().unwrap_or_else(|e| e.into_inner())
}
