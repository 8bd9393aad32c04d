use std::fmt;
use std::sync::{Mutex, PoisonError};

type Teardown = Box<dyn FnOnce() + Send>;

/// Handle returned by every `subscribe`-style call.
///
/// Dropping the handle leaves the listener registered; call
/// [`Subscription::unsubscribe`] (or fire the signal passed at subscribe
/// time) to remove it.
#[derive(Default)]
pub struct Subscription {
    teardown: Mutex<Vec<Teardown>>,
}

impl Subscription {
    pub fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        Subscription {
            teardown: Mutex::new(vec![Box::new(teardown)]),
        }
    }

    /// A handle that owns nothing.
    pub fn noop() -> Self {
        Subscription::default()
    }

    /// Combine two handles; unsubscribing the result tears down both.
    pub fn join(self, other: Subscription) -> Subscription {
        let mut teardown = self.into_teardown();
        teardown.extend(other.into_teardown());
        Subscription {
            teardown: Mutex::new(teardown),
        }
    }

    /// Remove the listener(s). Idempotent.
    pub fn unsubscribe(&self) {
        let teardown: Vec<Teardown> = self
            .teardown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for remove in teardown {
            remove();
        }
    }

    pub fn is_active(&self) -> bool {
        !self
            .teardown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    fn into_teardown(self) -> Vec<Teardown> {
        self.teardown
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
