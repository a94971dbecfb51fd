//! Group-by node: partitions facts by a key into groups.
//!
//! The node emits one element per non-empty group. A group's identity
//! ([`GroupId`]) is fixed when the group is created and depends only on its
//! key, so members joining or leaving surface downstream as modifications of
//! the same element. Group contents live in a [`GroupTable`] shared by the
//! whole network, so views handed to conditions always reflect current
//! membership.

use std::collections::HashMap;

use crate::error::NetworkResult;
use crate::fact::{Fact, FactId, Value};
use crate::store::FactStore;
use crate::token::Element;

use super::condition::GroupKey;
use super::{Delta, ElementDelta, NodeId, invariant};

/// Identity of a live group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(u64);

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "group:{}", self.0)
    }
}

/// A key and the facts currently assigned to it, in insertion order.
#[derive(Debug, Clone)]
pub struct Group {
    key: Value,
    members: Vec<FactId>,
}

impl Group {
    pub fn key(&self) -> &Value {
        &self.key
    }

    pub fn members(&self) -> &[FactId] {
        &self.members
    }
}

/// Storage for every live group in a network.
#[derive(Debug, Clone, Default)]
pub struct GroupTable {
    groups: HashMap<GroupId, Group>,
    next: u64,
}

impl GroupTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(&id)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    fn create(&mut self, key: Value, first: FactId) -> GroupId {
        self.next += 1;
        let id = GroupId(self.next);
        self.groups.insert(
            id,
            Group {
                key,
                members: vec![first],
            },
        );
        id
    }

    /// Drop a group once its retraction has been propagated.
    pub(crate) fn remove(&mut self, id: GroupId) {
        self.groups.remove(&id);
    }
}

pub struct GroupByNode {
    key_fn: GroupKey,
    by_key: HashMap<Value, GroupId>,
    membership: HashMap<FactId, GroupId>,
}

impl GroupByNode {
    pub fn new(key_fn: GroupKey) -> Self {
        Self {
            key_fn,
            by_key: HashMap::new(),
            membership: HashMap::new(),
        }
    }

    pub(crate) fn blank(&self) -> Self {
        Self::new(self.key_fn.clone())
    }

    /// Number of live groups owned by this node.
    pub fn group_count(&self) -> usize {
        self.by_key.len()
    }

    pub fn member_count(&self) -> usize {
        self.membership.len()
    }

    pub(crate) fn activate(
        &mut self,
        id: NodeId,
        delta: ElementDelta,
        store: &FactStore,
        groups: &mut GroupTable,
    ) -> NetworkResult<Vec<ElementDelta>> {
        let element = delta.item();
        let Element::Fact(fact_id) = element else {
            return Err(invariant(id, format!("group-by received {element}, expected a fact")));
        };
        match delta {
            Delta::Assert(_) => {
                let fact = current(id, store, fact_id)?;
                self.assert(id, fact, groups)
            }
            Delta::Retract(_) => self.retract(id, fact_id, groups),
            Delta::Modify(_) => {
                let fact = current(id, store, fact_id)?;
                self.modify(id, fact, groups)
            }
        }
    }

    fn assert(
        &mut self,
        id: NodeId,
        fact: &Fact,
        groups: &mut GroupTable,
    ) -> NetworkResult<Vec<ElementDelta>> {
        if self.membership.contains_key(&fact.id) {
            return Err(invariant(id, format!("{} grouped twice", fact.id)));
        }
        let key = (self.key_fn)(fact);
        Ok(vec![self.join_group(id, fact.id, key, groups)?])
    }

    fn retract(
        &mut self,
        id: NodeId,
        fact_id: FactId,
        groups: &mut GroupTable,
    ) -> NetworkResult<Vec<ElementDelta>> {
        Ok(vec![self.leave_group(id, fact_id, groups)?])
    }

    /// A member changed. Same key: its group is modified. New key: the fact
    /// leaves its old group first and joins the new one second.
    fn modify(
        &mut self,
        id: NodeId,
        fact: &Fact,
        groups: &mut GroupTable,
    ) -> NetworkResult<Vec<ElementDelta>> {
        let group_id = self
            .membership
            .get(&fact.id)
            .copied()
            .ok_or_else(|| invariant(id, format!("modify of ungrouped {}", fact.id)))?;
        let old_key = groups
            .get(group_id)
            .map(|g| g.key.clone())
            .ok_or_else(|| invariant(id, format!("{group_id} missing from table")))?;
        let new_key = (self.key_fn)(fact);

        if old_key == new_key {
            return Ok(vec![Delta::Modify(Element::Group(group_id))]);
        }
        tracing::trace!(node = id.index(), fact = %fact.id, from = %old_key, to = %new_key, "fact moves group");
        let left = self.leave_group(id, fact.id, groups)?;
        let joined = self.join_group(id, fact.id, new_key, groups)?;
        Ok(vec![left, joined])
    }

    fn join_group(
        &mut self,
        id: NodeId,
        fact_id: FactId,
        key: Value,
        groups: &mut GroupTable,
    ) -> NetworkResult<ElementDelta> {
        let delta = match self.by_key.get(&key) {
            Some(&group_id) => {
                let group = groups
                    .groups
                    .get_mut(&group_id)
                    .ok_or_else(|| invariant(id, format!("{group_id} missing from table")))?;
                group.members.push(fact_id);
                self.membership.insert(fact_id, group_id);
                Delta::Modify(Element::Group(group_id))
            }
            None => {
                let group_id = groups.create(key.clone(), fact_id);
                self.by_key.insert(key, group_id);
                self.membership.insert(fact_id, group_id);
                Delta::Assert(Element::Group(group_id))
            }
        };
        Ok(delta)
    }

    /// Remove a member. An emptied group is unregistered here; its contents
    /// stay in the table until the retraction has been propagated.
    fn leave_group(
        &mut self,
        id: NodeId,
        fact_id: FactId,
        groups: &mut GroupTable,
    ) -> NetworkResult<ElementDelta> {
        let group_id = self
            .membership
            .remove(&fact_id)
            .ok_or_else(|| invariant(id, format!("retract of ungrouped {fact_id}")))?;
        let group = groups
            .groups
            .get_mut(&group_id)
            .ok_or_else(|| invariant(id, format!("{group_id} missing from table")))?;
        group.members.retain(|m| *m != fact_id);

        if group.members.is_empty() {
            self.by_key.remove(&group.key);
            Ok(Delta::Retract(Element::Group(group_id)))
        } else {
            Ok(Delta::Modify(Element::Group(group_id)))
        }
    }
}

fn current<'s>(id: NodeId, store: &'s FactStore, fact_id: FactId) -> NetworkResult<&'s Fact> {
    store
        .get(fact_id)
        .ok_or_else(|| invariant(id, format!("{fact_id} missing from store")))
}

impl std::fmt::Debug for GroupByNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupByNode")
            .field("groups", &self.by_key.len())
            .field("members", &self.membership.len())
            .finish()
    }
}
