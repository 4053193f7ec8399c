//! Process-wide keyword model registry.
//!
//! A read-mostly mapping from actor name to its published keywords, plus a
//! subscription API. Callbacks are invoked synchronously by `publish` (the
//! transport's entry point into this registry) and must be short and
//! re-entrant — per the design notes, state mutated inside a callback must
//! be synchronized with whatever else touches it, since callbacks may fire
//! from any concurrent context.
//!
//! Subscriptions are released through a [`Subscription`] guard rather than
//! an explicit `unsubscribe` call: dropping the guard removes the callback,
//! so a thread's normal exit path (including an early return on error)
//! cannot leak a subscription. This is the "ticketed lease" pattern called
//! for in the design notes, in place of the source's addCallback/
//! removeCallback-plus-GC idiom.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

/// A snapshot of one keyword update, handed to every subscribed callback.
#[derive(Debug, Clone)]
pub struct KeyVar {
    pub actor: String,
    pub keyword: String,
    pub values: Vec<String>,
}

pub type Callback = Arc<dyn Fn(&KeyVar) + Send + Sync>;

#[derive(Default)]
struct ActorModel {
    keywords: HashMap<String, Vec<String>>,
    subscribers: HashMap<String, Vec<(u64, Callback)>>,
}

#[derive(Default)]
struct Inner {
    actors: RwLock<HashMap<String, ActorModel>>,
    next_id: AtomicU64,
}

/// Cloneable handle to the process-wide registry.
#[derive(Clone, Default)]
pub struct KeywordRegistry {
    inner: Arc<Inner>,
}

impl KeywordRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotently begins tracking `actor`. Safe to call more than once;
    /// a second call on an already-known actor is a no-op.
    pub fn add_model(&self, actor: &str) {
        self.inner
            .actors
            .write()
            .entry(actor.to_owned())
            .or_default();
    }

    pub fn add_models(&self, actors: impl IntoIterator<Item = impl AsRef<str>>) {
        for actor in actors {
            self.add_model(actor.as_ref());
        }
    }

    /// Transport entry point: records the new value and fires every
    /// subscriber for `(actor, keyword)`, synchronously.
    pub fn publish(&self, actor: &str, keyword: &str, values: Vec<String>) {
        let callbacks = {
            let mut actors = self.inner.actors.write();
            let model = actors.entry(actor.to_owned()).or_default();
            model.keywords.insert(keyword.to_owned(), values.clone());
            model
                .subscribers
                .get(keyword)
                .map(|subs| subs.iter().map(|(_, cb)| cb.clone()).collect::<Vec<_>>())
                .unwrap_or_default()
        };

        let keyvar = KeyVar {
            actor: actor.to_owned(),
            keyword: keyword.to_owned(),
            values,
        };
        for callback in callbacks {
            callback(&keyvar);
        }
    }

    pub fn current(&self, actor: &str, keyword: &str) -> Option<Vec<String>> {
        self.inner
            .actors
            .read()
            .get(actor)
            .and_then(|model| model.keywords.get(keyword))
            .cloned()
    }

    /// Subscribes `callback` to `(actor, keyword)` updates, returning a
    /// guard that removes the subscription when dropped.
    pub fn subscribe(
        &self,
        actor: &str,
        keyword: &str,
        callback: Callback,
    ) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .actors
            .write()
            .entry(actor.to_owned())
            .or_default()
            .subscribers
            .entry(keyword.to_owned())
            .or_default()
            .push((id, callback));

        Subscription {
            registry: Arc::downgrade(&self.inner),
            actor: actor.to_owned(),
            keyword: keyword.to_owned(),
            id,
        }
    }

    /// Number of live subscriptions, for the callback-lifecycle invariant.
    #[cfg(test)]
    fn subscription_count(&self) -> usize {
        self.inner
            .actors
            .read()
            .values()
            .flat_map(|model| model.subscribers.values())
            .map(|subs| subs.len())
            .sum()
    }
}

/// Scoped lease on one keyword subscription. Dropping it unsubscribes.
pub struct Subscription {
    registry: Weak<Inner>,
    actor: String,
    keyword: String,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            if let Some(model) = inner.actors.write().get_mut(&self.actor) {
                if let Some(subs) = model.subscribers.get_mut(&self.keyword) {
                    subs.retain(|(existing, _)| *existing != self.id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn add_model_is_idempotent() {
        let registry = KeywordRegistry::new();
        registry.add_model("enu_sm1");
        registry.add_model("enu_sm1");
        assert_eq!(registry.inner.actors.read().len(), 1);
    }

    #[test]
    fn publish_reaches_subscribers_with_current_value() {
        let registry = KeywordRegistry::new();
        let seen = Arc::new(AtomicBool::new(false));
        let seen2 = seen.clone();
        let _sub = registry.subscribe(
            "enu_sm1",
            "shutters",
            Arc::new(move |kv: &KeyVar| {
                if kv.values == vec!["open".to_string()] {
                    seen2.store(true, Ordering::SeqCst);
                }
            }),
        );
        registry.publish("enu_sm1", "shutters", vec!["open".to_string()]);
        assert!(seen.load(Ordering::SeqCst));
        assert_eq!(
            registry.current("enu_sm1", "shutters"),
            Some(vec!["open".to_string()])
        );
    }

    #[test]
    fn dropping_subscription_guard_releases_it() {
        let registry = KeywordRegistry::new();
        let sub = registry.subscribe("ccd_b1", "exposureState", Arc::new(|_| {}));
        assert_eq!(registry.subscription_count(), 1);
        drop(sub);
        assert_eq!(registry.subscription_count(), 0);
    }

    #[test]
    fn unsubscribe_is_per_subscription_not_per_keyword() {
        let registry = KeywordRegistry::new();
        let a = registry.subscribe("ccd_b1", "exposureState", Arc::new(|_| {}));
        let _b = registry.subscribe("ccd_b1", "exposureState", Arc::new(|_| {}));
        drop(a);
        assert_eq!(registry.subscription_count(), 1);
    }
}
