//! Change listeners attached to a handle.

use std::fmt;
use std::sync::{Arc, Weak};
use tracing::trace;

/// Called on the owning thread after its handle observes a change.
pub trait ChangeListener: Send + Sync {
    /// Invoked once per notification pass.
    fn on_change(&self);
}

impl<F> ChangeListener for F
where
    F: Fn() + Send + Sync,
{
    fn on_change(&self) {
        self();
    }
}

/// Receipt for a listener registration.
///
/// The registration does not keep the listener alive. Once the caller drops
/// its last `Arc`, the registration is pruned on the next notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerToken(u64);

struct Registration {
    token: ListenerToken,
    listener: Weak<dyn ChangeListener>,
}

fn same_listener(a: &Arc<dyn ChangeListener>, b: &Arc<dyn ChangeListener>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a).cast::<()>(),
        Arc::as_ptr(b).cast::<()>(),
    )
}

/// Weak listener registrations for one handle.
#[derive(Default)]
pub(crate) struct ListenerList {
    next_token: u64,
    registrations: Vec<Registration>,
}

impl ListenerList {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` unless it is already registered.
    ///
    /// Adding the same listener twice returns the original token.
    pub(crate) fn add(&mut self, listener: &Arc<dyn ChangeListener>) -> ListenerToken {
        let existing = self.registrations.iter().find(|registration| {
            registration
                .listener
                .upgrade()
                .is_some_and(|live| same_listener(&live, listener))
        });
        if let Some(registration) = existing {
            return registration.token;
        }

        self.next_token += 1;
        let token = ListenerToken(self.next_token);
        self.registrations.push(Registration {
            token,
            listener: Arc::downgrade(listener),
        });
        token
    }

    /// Removes the registration of `listener`. Returns whether one existed.
    pub(crate) fn remove(&mut self, listener: &Arc<dyn ChangeListener>) -> bool {
        let position = self.registrations.iter().position(|registration| {
            registration
                .listener
                .upgrade()
                .is_some_and(|live| same_listener(&live, listener))
        });
        match position {
            Some(index) => {
                self.registrations.remove(index);
                true
            }
            None => false,
        }
    }

    /// Removes the registration behind `token`. Returns whether one existed.
    pub(crate) fn remove_token(&mut self, token: ListenerToken) -> bool {
        let before = self.registrations.len();
        self.registrations.retain(|registration| registration.token != token);
        self.registrations.len() != before
    }

    pub(crate) fn clear(&mut self) {
        self.registrations.clear();
    }

    /// Returns the number of registrations, including dead ones not yet pruned.
    pub(crate) fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Collects the live listeners and prunes the dead registrations.
    ///
    /// The caller invokes the returned listeners after releasing any lock
    /// on the handle, so a listener may call back into the store.
    pub(crate) fn live(&mut self) -> Vec<Arc<dyn ChangeListener>> {
        let mut live = Vec::with_capacity(self.registrations.len());
        let before = self.registrations.len();
        self.registrations
            .retain(|registration| match registration.listener.upgrade() {
                Some(listener) => {
                    live.push(listener);
                    true
                }
                None => false,
            });

        let pruned = before - self.registrations.len();
        if pruned > 0 {
            trace!(pruned, "pruned dead listener registrations");
        }
        live
    }
}

impl fmt::Debug for ListenerList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerList")
            .field("registrations", &self.registrations.len())
            .finish()
    }
}

/// Invokes each listener in registration order.
pub(crate) fn notify_all(listeners: &[Arc<dyn ChangeListener>]) {
    for listener in listeners {
        listener.on_change();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, Arc<dyn ChangeListener>) {
        let count = Arc::new(AtomicUsize::new(0));
        let listener: Arc<dyn ChangeListener> = {
            let count = Arc::clone(&count);
            Arc::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        (count, listener)
    }

    #[test]
    fn add_is_idempotent() {
        let mut list = ListenerList::new();
        let (_, listener) = counter();

        let first = list.add(&listener);
        let second = list.add(&listener);
        assert_eq!(first, second);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn remove_by_identity() {
        let mut list = ListenerList::new();
        let (_, a) = counter();
        let (_, b) = counter();

        list.add(&a);
        list.add(&b);
        assert!(list.remove(&a));
        assert!(!list.remove(&a));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn remove_by_token() {
        let mut list = ListenerList::new();
        let (_, a) = counter();

        let token = list.add(&a);
        assert!(list.remove_token(token));
        assert!(!list.remove_token(token));
    }

    #[test]
    fn live_invokes_and_prunes_dead() {
        let mut list = ListenerList::new();
        let (count, kept) = counter();
        let (_, dropped) = counter();

        list.add(&kept);
        list.add(&dropped);
        drop(dropped);
        assert_eq!(list.len(), 2);

        let live = list.live();
        notify_all(&live);

        assert_eq!(live.len(), 1);
        assert_eq!(list.len(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dead_registration_does_not_block_readd() {
        let mut list = ListenerList::new();
        let (_, first) = counter();
        list.add(&first);
        drop(first);

        let (_, second) = counter();
        list.add(&second);
        assert_eq!(list.live().len(), 1);
    }

    #[test]
    fn clear_removes_everything() {
        let mut list = ListenerList::new();
        let (_, a) = counter();
        list.add(&a);
        list.clear();
        assert_eq!(list.len(), 0);
    }
}
