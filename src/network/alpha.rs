//! Alpha stage: per fact-type single-fact filters.
//!
//! The [`AlphaIndex`] routes a fact to the alpha nodes registered for its
//! type. Each [`AlphaNode`] remembers which facts currently pass its test,
//! which is what turns a fact modification into the right interior delta:
//! a change in outcome becomes an assert or a retract, an unchanged passing
//! outcome becomes a modify.

use std::collections::{HashMap, HashSet};

use crate::error::NetworkResult;
use crate::fact::{Fact, FactId, FactType};
use crate::token::Element;

use super::condition::FactTest;
use super::{Delta, ElementDelta, NodeId, invariant};

pub struct AlphaNode {
    fact_type: FactType,
    test: Option<FactTest>,
    memory: HashSet<FactId>,
}

impl AlphaNode {
    pub fn new(fact_type: FactType, test: Option<FactTest>) -> Self {
        Self {
            fact_type,
            test,
            memory: HashSet::new(),
        }
    }

    pub(crate) fn blank(&self) -> Self {
        Self::new(self.fact_type.clone(), self.test.clone())
    }

    pub fn fact_type(&self) -> &FactType {
        &self.fact_type
    }

    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    fn passes(&self, fact: &Fact) -> bool {
        self.test.as_ref().is_none_or(|test| test(fact))
    }

    pub(crate) fn on_assert(&mut self, id: NodeId, fact: &Fact) -> NetworkResult<Option<ElementDelta>> {
        if self.memory.contains(&fact.id) {
            return Err(invariant(id, format!("{} asserted twice", fact.id)));
        }
        if !self.passes(fact) {
            return Ok(None);
        }
        self.memory.insert(fact.id);
        Ok(Some(Delta::Assert(Element::Fact(fact.id))))
    }

    /// Classify a modification by comparing the remembered outcome for the
    /// old version with the test outcome for the new one.
    pub(crate) fn on_modify(&mut self, fact: &Fact) -> Option<ElementDelta> {
        let before = self.memory.contains(&fact.id);
        let after = self.passes(fact);
        let element = Element::Fact(fact.id);
        match (before, after) {
            (true, true) => Some(Delta::Modify(element)),
            (true, false) => {
                self.memory.remove(&fact.id);
                Some(Delta::Retract(element))
            }
            (false, true) => {
                self.memory.insert(fact.id);
                Some(Delta::Assert(element))
            }
            (false, false) => None,
        }
    }

    pub(crate) fn on_retract(&mut self, fact: &Fact) -> Option<ElementDelta> {
        self.memory
            .remove(&fact.id)
            .then_some(Delta::Retract(Element::Fact(fact.id)))
    }
}

impl std::fmt::Debug for AlphaNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlphaNode")
            .field("fact_type", &self.fact_type)
            .field("filtered", &self.test.is_some())
            .field("memory", &self.memory.len())
            .finish()
    }
}

/// Fact-type dispatch table.
#[derive(Debug, Clone, Default)]
pub struct AlphaIndex {
    by_type: HashMap<FactType, Vec<NodeId>>,
}

impl AlphaIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&mut self, fact_type: FactType, node: NodeId) {
        self.by_type.entry(fact_type).or_default().push(node);
    }

    /// Alpha nodes interested in `fact_type`, in registration order.
    pub fn nodes_for(&self, fact_type: &FactType) -> &[NodeId] {
        self.by_type.get(fact_type).map_or(&[], |v| v.as_slice())
    }

}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn node() -> NodeId {
        NodeId::new(0)
    }

    fn valid_only() -> AlphaNode {
        AlphaNode::new(
            FactType::new("Thing"),
            Some(Arc::new(|f: &Fact| {
                f.get("status").as_str().is_some_and(|s| s.starts_with("Valid"))
            })),
        )
    }

    fn thing(status: &str) -> Fact {
        Fact::new(FactId::new(1).unwrap(), "Thing").with("status", status)
    }

    #[test]
    fn assert_only_passing_facts() {
        let mut alpha = valid_only();
        assert!(alpha.on_assert(node(), &thing("Invalid")).unwrap().is_none());
        assert!(alpha.is_empty());

        let mut alpha = valid_only();
        let delta = alpha.on_assert(node(), &thing("Valid")).unwrap();
        assert!(matches!(delta, Some(Delta::Assert(_))));
        assert_eq!(alpha.len(), 1);
    }

    #[test]
    fn modify_translates_outcome_changes() {
        let mut alpha = valid_only();
        alpha.on_assert(node(), &thing("Valid")).unwrap();

        assert!(matches!(alpha.on_modify(&thing("Valid too")), Some(Delta::Modify(_))));
        assert!(matches!(alpha.on_modify(&thing("Invalid")), Some(Delta::Retract(_))));
        assert!(alpha.on_modify(&thing("Still invalid")).is_none());
        assert!(matches!(alpha.on_modify(&thing("Valid again")), Some(Delta::Assert(_))));
    }

    #[test]
    fn retract_only_remembered_facts() {
        let mut alpha = valid_only();
        alpha.on_assert(node(), &thing("Invalid")).unwrap();
        assert!(alpha.on_retract(&thing("Invalid")).is_none());

        alpha.on_assert(node(), &thing("Valid")).unwrap();
        assert!(matches!(alpha.on_retract(&thing("Valid")), Some(Delta::Retract(_))));
        assert!(alpha.is_empty());
    }

    #[test]
    fn index_dispatches_by_type() {
        let mut index = AlphaIndex::new();
        index.register(FactType::new("A"), NodeId::new(1));
        index.register(FactType::new("A"), NodeId::new(2));
        index.register(FactType::new("B"), NodeId::new(3));

        assert_eq!(index.nodes_for(&FactType::new("A")), &[NodeId::new(1), NodeId::new(2)]);
        assert!(index.nodes_for(&FactType::new("C")).is_empty());
    }
}
