//! Explicit name-keyed registries.
//!
//! Codecs, framer builders and transports are registered by protocol or
//! transport name and looked up at call time, never cached at startup, so
//! a registration made at runtime takes effect on the next call. The
//! registry is an owned object passed by reference (dependency injection)
//! rather than package-level mutable state, which keeps tests free of
//! global reset logic.

use std::sync::Arc;

use dashmap::DashMap;

/// A name-keyed registry of trait objects. Last registration wins.
pub struct NamedRegistry<T: ?Sized> {
    entries: DashMap<String, Arc<T>>,
}

impl<T: ?Sized> NamedRegistry<T> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Registers `value` under `name`, replacing any previous entry.
    pub fn register(&self, name: &str, value: Arc<T>) {
        self.entries.insert(name.to_owned(), value);
    }

    /// Looks up the current entry for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<T>> {
        self.entries.get(name).map(|entry| Arc::clone(&entry))
    }

    /// Removes the entry for `name`.
    pub fn deregister(&self, name: &str) {
        self.entries.remove(name);
    }

    /// Names currently registered.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }
}

impl<T: ?Sized> Default for NamedRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter: Send + Sync {
        fn greet(&self) -> &'static str;
    }

    struct Hello;
    impl Greeter for Hello {
        fn greet(&self) -> &'static str {
            "hello"
        }
    }

    struct Hey;
    impl Greeter for Hey {
        fn greet(&self) -> &'static str {
            "hey"
        }
    }

    #[test]
    fn lookup_by_name() {
        let registry: NamedRegistry<dyn Greeter> = NamedRegistry::new();
        registry.register("en", Arc::new(Hello));

        assert_eq!(registry.get("en").unwrap().greet(), "hello");
        assert!(registry.get("fr").is_none());
    }

    #[test]
    fn last_registration_wins() {
        let registry: NamedRegistry<dyn Greeter> = NamedRegistry::new();
        registry.register("en", Arc::new(Hello));
        registry.register("en", Arc::new(Hey));

        assert_eq!(registry.get("en").unwrap().greet(), "hey");
    }
}
