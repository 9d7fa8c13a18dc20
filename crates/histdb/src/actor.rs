//! Acting-user source.
//!
//! The engine asks an [`ActorSource`] for the current actor id each time it
//! writes a history row. The id is opaque to the engine.

use std::fmt;

/// Supplies the acting user id recorded with each history row.
pub trait ActorSource: Send + Sync {
    /// Current actor id, or `None` for anonymous/system writes.
    fn current_actor(&self) -> Option<i64>;
}

/// Always reports the same actor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FixedActor(pub Option<i64>);

impl ActorSource for FixedActor {
    fn current_actor(&self) -> Option<i64> {
        self.0
    }
}

/// Adapts a closure (e.g. a session lookup) into an [`ActorSource`].
pub struct FnActor<F>(pub F);

impl<F> ActorSource for FnActor<F>
where
    F: Fn() -> Option<i64> + Send + Sync,
{
    fn current_actor(&self) -> Option<i64> {
        (self.0)()
    }
}

impl<F> fmt::Debug for FnActor<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnActor(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI64, Ordering};

    #[test]
    fn fixed_actor() {
        assert_eq!(FixedActor(Some(7)).current_actor(), Some(7));
        assert_eq!(FixedActor::default().current_actor(), None);
    }

    #[test]
    fn fn_actor_is_consulted_each_time() {
        let current = Arc::new(AtomicI64::new(1));
        let seen = Arc::clone(&current);
        let actor = FnActor(move || Some(seen.load(Ordering::SeqCst)));
        assert_eq!(actor.current_actor(), Some(1));
        current.store(2, Ordering::SeqCst);
        assert_eq!(actor.current_actor(), Some(2));
    }
}
