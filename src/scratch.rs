//! Per-worker scratch space: a JSON decode buffer reused across requests
//! rather than reallocated per call (spec.md §3 "Scratch space").
//!
//! Lifetime is the worker's lifetime; never shared across workers. The
//! engine owns one [`ScratchSpace`] per worker thread in a `ScratchArray`
//! indexed by worker index (spec.md §4.6 "scratch array" / §5 "Per-thread
//! scratch"). Each slot is wrapped in a `Mutex` purely to stay `Sync`
//! without `unsafe` — access is always by the one worker that owns that
//! index, so the lock is never contended.

use crate::errors::CoreError;
use serde_json::Value;
use std::sync::Mutex;

/// One worker's reusable decode target. `tree` holds whatever was decoded
/// last; re-decoding overwrites it in place instead of allocating a new
/// top-level container where `serde_json` allows it.
#[derive(Default)]
pub struct ScratchSpace {
    tree: Value,
}

impl ScratchSpace {
    pub fn new() -> Self {
        Self { tree: Value::Null }
    }

    /// Decodes `bytes` into the scratch tree, returning a reference to it.
    pub fn decode(&mut self, bytes: &[u8]) -> Result<&Value, CoreError> {
        self.tree = serde_json::from_slice(bytes)?;
        Ok(&self.tree)
    }

    pub fn tree(&self) -> &Value {
        &self.tree
    }

    pub fn reset(&mut self) {
        self.tree = Value::Null;
    }
}

/// The engine-owned array of per-worker scratch spaces (spec.md §4.6).
pub struct ScratchArray {
    slots: Vec<Mutex<ScratchSpace>>,
}

impl ScratchArray {
    pub fn new(worker_count: usize) -> Self {
        let slots = (0..worker_count).map(|_| Mutex::new(ScratchSpace::new())).collect();
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Runs `f` against the scratch space owned by `worker_index`.
    pub fn with_scratch<R>(&self, worker_index: usize, f: impl FnOnce(&mut ScratchSpace) -> R) -> R {
        let mut guard = self.slots[worker_index]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_overwrites_previous_tree() {
        let mut scratch = ScratchSpace::new();
        scratch.decode(br#"{"a":1}"#).unwrap();
        assert_eq!(scratch.tree()["a"], 1);

        scratch.decode(br#"[1,2,3]"#).unwrap();
        assert!(scratch.tree().is_array());
    }

    #[test]
    fn array_indexes_by_worker() {
        let array = ScratchArray::new(2);
        array.with_scratch(0, |s| s.decode(br#"{"x":1}"#).unwrap());
        array.with_scratch(1, |s| s.decode(br#"{"x":2}"#).unwrap());

        array.with_scratch(0, |s| assert_eq!(s.tree()["x"], 1));
        array.with_scratch(1, |s| assert_eq!(s.tree()["x"], 2));
    }
}
