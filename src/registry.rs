//! Handler registry: an append-only table of `(name, kind, function, tag)`
//! entries built once at startup and never mutated while serving (spec.md
//! §3 "Handler entry", §4.5 "Handler registry").

use crate::reply::CallHandle;
use tracing::warn;

/// Distinguishes REST's HTTP verbs; `Any` covers raw-TCP, plain HTTP and
/// JSON-RPC registrations, none of which carry a verb of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    Any,
    Get,
    Put,
    Post,
    Delete,
}

/// A registered callback: receives the call handle and its registration
/// tag, and must produce exactly one reply via the reply API before
/// returning (spec.md §4.5 "callback contract").
pub type HandlerFn = fn(&mut CallHandle, tag: usize);

struct Entry {
    name: String,
    kind: MethodKind,
    handler: HandlerFn,
    tag: usize,
}

/// Fixed-capacity, append-only handler table (spec.md §4.5). Lookup is a
/// linear scan by `(name, kind)` — the table is small enough in practice
/// (bounded by `Config::max_callbacks`) that a hash map buys nothing over
/// cache-friendly linear scan, matching spec.md §4.5's stated approach.
pub struct HandlerRegistry {
    entries: Vec<Entry>,
    capacity: usize,
}

impl HandlerRegistry {
    pub fn new(capacity: usize) -> Self {
        Self { entries: Vec::with_capacity(capacity), capacity }
    }

    /// Appends a handler. Once `capacity` is reached, further registrations
    /// are silently ignored per spec.md §4.5 — a `tracing::warn!` is
    /// emitted, which is ambient logging rather than a behavior change.
    pub fn register(&mut self, name: &str, kind: MethodKind, handler: HandlerFn, tag: usize) {
        if self.entries.len() >= self.capacity {
            warn!(name, capacity = self.capacity, "handler registry full, dropping registration");
            return;
        }
        self.entries.push(Entry { name: name.to_string(), kind, handler, tag });
    }

    pub fn lookup(&self, name: &str, kind: MethodKind) -> Option<(HandlerFn, usize)> {
        self.entries
            .iter()
            .find(|e| e.name == name && (e.kind == kind || e.kind == MethodKind::Any || kind == MethodKind::Any))
            .map(|e| (e.handler, e.tag))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_call: &mut CallHandle, _tag: usize) {}

    #[test]
    fn lookup_finds_registered_handler() {
        let mut registry = HandlerRegistry::new(4);
        registry.register("sum", MethodKind::Any, noop, 7);
        let (_, tag) = registry.lookup("sum", MethodKind::Any).unwrap();
        assert_eq!(tag, 7);
    }

    #[test]
    fn lookup_misses_unknown_name() {
        let registry = HandlerRegistry::new(4);
        assert!(registry.lookup("missing", MethodKind::Any).is_none());
    }

    #[test]
    fn overflow_registrations_are_dropped() {
        let mut registry = HandlerRegistry::new(1);
        registry.register("a", MethodKind::Any, noop, 1);
        registry.register("b", MethodKind::Any, noop, 2);
        assert_eq!(registry.len(), 1);
        assert!(registry.lookup("b", MethodKind::Any).is_none());
    }

    #[test]
    fn rest_verb_distinguishes_same_name() {
        let mut registry = HandlerRegistry::new(4);
        registry.register("/books/{id}", MethodKind::Get, noop, 1);
        registry.register("/books/{id}", MethodKind::Delete, noop, 2);
        assert_eq!(registry.lookup("/books/{id}", MethodKind::Get).unwrap().1, 1);
        assert_eq!(registry.lookup("/books/{id}", MethodKind::Delete).unwrap().1, 2);
    }
}
