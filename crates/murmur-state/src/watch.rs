//! State change watchers
//!
//! A watcher binds a key pattern to a handler. All handlers whose pattern
//! matches an accepted change fire, in registration order, once per change.

use std::fmt;

/// Key pattern a watcher subscribes to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchPattern {
    /// One exact key
    Exact(String),
    /// Every key
    Any,
}

impl WatchPattern {
    /// The original library spells the match-all pattern "*".
    pub fn parse(pattern: &str) -> Self {
        if pattern == "*" {
            WatchPattern::Any
        } else {
            WatchPattern::Exact(pattern.to_string())
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            WatchPattern::Exact(k) => k == key,
            WatchPattern::Any => true,
        }
    }
}

/// Change handler: (key, new value, old value if the key existed).
pub type WatchHandler = Box<dyn FnMut(&str, &str, Option<&str>)>;

/// Registry of (pattern, handler) pairs in registration order.
#[derive(Default)]
pub struct WatcherRegistry {
    watchers: Vec<(WatchPattern, WatchHandler)>,
}

impl WatcherRegistry {
    pub fn new() -> Self {
        WatcherRegistry::default()
    }

    pub fn register(&mut self, pattern: WatchPattern, handler: WatchHandler) {
        self.watchers.push((pattern, handler));
    }

    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }

    /// Fire every matching handler for one accepted change.
    pub fn dispatch(&mut self, key: &str, value: &str, old: Option<&str>) {
        for (pattern, handler) in self.watchers.iter_mut() {
            if pattern.matches(key) {
                handler(key, value, old);
            }
        }
    }
}

impl fmt::Debug for WatcherRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatcherRegistry")
            .field("count", &self.watchers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_pattern_parse() {
        assert_eq!(WatchPattern::parse("*"), WatchPattern::Any);
        assert_eq!(
            WatchPattern::parse("led"),
            WatchPattern::Exact("led".into())
        );
    }

    #[test]
    fn test_dispatch_order_and_matching() {
        let mut registry = WatcherRegistry::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let l = log.clone();
        registry.register(
            WatchPattern::Exact("led".into()),
            Box::new(move |_, v, _| l.borrow_mut().push(format!("exact:{v}"))),
        );
        let l = log.clone();
        registry.register(
            WatchPattern::Any,
            Box::new(move |k, v, _| l.borrow_mut().push(format!("any:{k}={v}"))),
        );

        registry.dispatch("led", "1", None);
        registry.dispatch("count", "5", Some("4"));

        assert_eq!(
            *log.borrow(),
            vec!["exact:1", "any:led=1", "any:count=5"]
        );
    }
}
