//! Canonicalising cache for character names.
//!
//! Names arrive on every firehose message, mostly repeating the same few
//! hundred speakers. [`NameInterner`] hands out shared [`CharacterName`]
//! handles so equal names point at one allocation. The cache only holds
//! `Weak` references: an entry dies when its last handle drops and is swept
//! once the map grows past its high-water mark.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Weak;

use parking_lot::Mutex;

use crate::types::{CharacterName, NameData};

const INITIAL_HIGH_WATER: usize = 1024;

pub struct NameInterner {
    inner: Mutex<InternTable>,
}

struct InternTable {
    entries: HashMap<Box<str>, Weak<NameData>>,
    high_water: usize,
}

impl NameInterner {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(InternTable {
                entries: HashMap::new(),
                high_water: INITIAL_HIGH_WATER,
            }),
        }
    }

    /// Return the shared handle for `name`, creating it if no live handle
    /// exists. The first spelling seen wins as the display form.
    pub fn intern(&self, name: &str) -> CharacterName {
        let data = NameData::new(name);
        let fresh = CharacterName::from_shared(Arc::new(data));

        let mut table = self.inner.lock();
        if let Some(existing) = table.entries.get(fresh.folded()).and_then(Weak::upgrade) {
            return CharacterName::from_shared(existing);
        }

        table
            .entries
            .insert(fresh.folded().into(), fresh.downgrade());

        if table.entries.len() > table.high_water {
            table.sweep();
            // Grow the mark so a cache full of live names is not swept on
            // every insert.
            table.high_water = (table.entries.len() * 2).max(INITIAL_HIGH_WATER);
        }

        fresh
    }

    /// Drop entries whose last handle has gone away. Returns how many were
    /// removed.
    pub fn sweep(&self) -> usize {
        self.inner.lock().sweep()
    }

    /// Number of entries currently held, including dead ones not yet swept.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl InternTable {
    fn sweep(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, weak| weak.strong_count() > 0);
        before - self.entries.len()
    }
}

impl Default for NameInterner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_names_share_allocation() {
        let interner = NameInterner::new();
        let a = interner.intern("Alice");
        let b = interner.intern("ALICE");
        assert!(a.ptr_eq(&b));
        assert_eq!(b.as_str(), "Alice");
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn test_dead_entries_are_swept() {
        let interner = NameInterner::new();
        let keep = interner.intern("Keeper");
        {
            let _gone = interner.intern("Transient");
        }
        assert_eq!(interner.len(), 2);
        assert_eq!(interner.sweep(), 1);
        assert_eq!(interner.len(), 1);

        // A dropped name is re-created on demand.
        let again = interner.intern("transient");
        assert_eq!(again.as_str(), "transient");
        assert!(interner.intern("keeper").ptr_eq(&keep));
    }

    #[test]
    fn test_high_water_triggers_sweep() {
        let interner = NameInterner::new();
        for i in 0..(INITIAL_HIGH_WATER + 10) {
            let _ = interner.intern(&format!("name-{i}"));
        }
        assert!(interner.len() < INITIAL_HIGH_WATER);
    }
}
