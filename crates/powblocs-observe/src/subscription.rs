//! Subscription guards.

/// Keeps an observer registered until dropped.
#[must_use = "dropping a Subscription immediately unsubscribes the observer"]
pub struct Subscription {
  cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
  pub(crate) fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
    Self {
      cancel: Some(Box::new(cancel)),
    }
  }

  /// A subscription that was never registered anywhere.
  pub fn noop() -> Self {
    Self { cancel: None }
  }

  /// Whether this guard is attached to a live registration.
  pub fn is_active(&self) -> bool {
    self.cancel.is_some()
  }

  /// Deregister the observer now.
  pub fn unsubscribe(mut self) {
    self.cancel_now();
  }

  fn cancel_now(&mut self) {
    if let Some(cancel) = self.cancel.take() {
      cancel();
    }
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.cancel_now();
  }
}

impl std::fmt::Debug for Subscription {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Subscription")
      .field("active", &self.is_active())
      .finish()
  }
}
