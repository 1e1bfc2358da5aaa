//! Cooperative cancellation shared by the training loop and producers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cloneable stop flag.
///
/// Producers check it between decode operations; the trainer checks it at
/// the top of every iteration. A child token observes its parent's stop but
/// can also be stopped on its own.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    flag: Arc<AtomicBool>,
    parent: Option<Arc<AtomicBool>>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that is stopped when either it or `self` is stopped.
    pub fn child(&self) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(Arc::clone(&self.flag)),
        }
    }

    /// Request a stop. Idempotent.
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self
                .parent
                .as_ref()
                .is_some_and(|p| p.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let token = StopToken::new();
        let clone = token.clone();
        assert!(!clone.is_stopped());
        token.stop();
        assert!(clone.is_stopped(), "clone must observe stop on original");
    }

    #[test]
    fn test_child_follows_parent_but_not_reverse() {
        let parent = StopToken::new();
        let child = parent.child();

        child.stop();
        assert!(child.is_stopped());
        assert!(!parent.is_stopped(), "stopping child must not stop parent");

        let other = parent.child();
        parent.stop();
        assert!(other.is_stopped(), "child must observe parent stop");
    }
}
