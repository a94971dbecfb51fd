//! Identity-keyed table of the facts currently known to a session.

use std::collections::BTreeMap;

use crate::error::{FactError, FactResult};
use crate::fact::{Fact, FactId};

/// The fact base of one session.
///
/// Facts are owned here; tokens and activations only refer to them by id.
/// Every mutation is validated before anything changes, so a rejected call
/// leaves the store untouched.
#[derive(Debug, Clone, Default)]
pub struct FactStore {
    facts: BTreeMap<FactId, Fact>,
}

impl FactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: FactId) -> Option<&Fact> {
        self.facts.get(&id)
    }

    pub fn contains(&self, id: FactId) -> bool {
        self.facts.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Iterate facts in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Fact> {
        self.facts.values()
    }

    /// Check that `fact` could be inserted.
    pub fn check_insert(&self, fact: &Fact) -> FactResult<()> {
        if self.facts.contains_key(&fact.id) {
            return Err(FactError::Duplicate { id: fact.id });
        }
        Ok(())
    }

    /// Check that `fact` could replace its stored version, returning the stored one.
    pub fn check_update(&self, fact: &Fact) -> FactResult<&Fact> {
        let stored = self
            .facts
            .get(&fact.id)
            .ok_or(FactError::Unknown { id: fact.id })?;
        if stored.fact_type != fact.fact_type {
            return Err(FactError::TypeChanged {
                id: fact.id,
                stored: stored.fact_type.to_string(),
                requested: fact.fact_type.to_string(),
            });
        }
        Ok(stored)
    }

    /// Check that `id` could be retracted, returning the stored fact.
    pub fn check_retract(&self, id: FactId) -> FactResult<&Fact> {
        self.facts.get(&id).ok_or(FactError::Unknown { id })
    }

    pub fn insert(&mut self, fact: Fact) -> FactResult<()> {
        self.check_insert(&fact)?;
        self.facts.insert(fact.id, fact);
        Ok(())
    }

    /// Replace the stored version of `fact`, returning the old one.
    pub fn replace(&mut self, fact: Fact) -> FactResult<Fact> {
        self.check_update(&fact)?;
        let id = fact.id;
        self.facts
            .insert(id, fact)
            .ok_or(FactError::Unknown { id })
    }

    pub fn remove(&mut self, id: FactId) -> FactResult<Fact> {
        self.facts.remove(&id).ok_or(FactError::Unknown { id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(raw: u64) -> Fact {
        Fact::new(FactId::new(raw).unwrap(), "Thing").with("n", raw as i64)
    }

    #[test]
    fn insert_rejects_duplicates() {
        let mut store = FactStore::new();
        store.insert(fact(1)).unwrap();

        let err = store.insert(fact(1)).unwrap_err();
        assert!(matches!(err, FactError::Duplicate { .. }));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn replace_returns_old_version() {
        let mut store = FactStore::new();
        let f = fact(1);
        store.insert(f.clone()).unwrap();

        let old = store.replace(f.with("n", 10_i64)).unwrap();
        assert_eq!(old.get("n").as_int(), Some(1));
        assert_eq!(store.get(f.id).unwrap().get("n").as_int(), Some(10));
    }

    #[test]
    fn replace_rejects_unknown_and_type_change() {
        let mut store = FactStore::new();
        assert!(matches!(
            store.replace(fact(9)).unwrap_err(),
            FactError::Unknown { .. }
        ));

        store.insert(fact(1)).unwrap();
        let other_type = Fact::new(FactId::new(1).unwrap(), "Other");
        assert!(matches!(
            store.replace(other_type).unwrap_err(),
            FactError::TypeChanged { .. }
        ));
        assert_eq!(store.get(FactId::new(1).unwrap()).unwrap().fact_type.as_str(), "Thing");
    }

    #[test]
    fn remove_unknown_fails() {
        let mut store = FactStore::new();
        store.insert(fact(1)).unwrap();
        store.remove(FactId::new(1).unwrap()).unwrap();
        assert!(store.is_empty());
        assert!(matches!(
            store.remove(FactId::new(1).unwrap()).unwrap_err(),
            FactError::Unknown { .. }
        ));
    }
}
