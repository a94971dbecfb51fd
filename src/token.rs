//! Tokens: immutable partial matches flowing through the beta network.
//!
//! A token extends its parent token by exactly one [`Element`]. Tokens live
//! in a [`TokenArena`] and point at their parent by index, so lineage is a
//! tree of integer links with no ownership cycles. A token's parent never
//! changes after creation.

use crate::error::{NetworkError, NetworkResult};
use crate::fact::{Fact, FactId, Value};
use crate::network::NodeId;
use crate::network::group::{GroupId, GroupTable};
use crate::store::FactStore;

/// Index of a token in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenId(u32);

impl TokenId {
    /// The empty token every left input chain starts from.
    pub const ROOT: TokenId = TokenId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for TokenId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// One position of a token: a single fact, or a group produced by a group-by node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Element {
    Fact(FactId),
    Group(GroupId),
}

impl std::fmt::Display for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Element::Fact(id) => write!(f, "{id}"),
            Element::Group(id) => write!(f, "{id}"),
        }
    }
}

#[derive(Debug, Clone)]
struct TokenData {
    parent: Option<TokenId>,
    element: Option<Element>,
    /// Node that created the token and is responsible for freeing it.
    owner: Option<NodeId>,
    len: usize,
}

/// Arena of live tokens with slot reuse.
#[derive(Debug, Clone)]
pub struct TokenArena {
    slots: Vec<Option<TokenData>>,
    free: Vec<u32>,
    live: usize,
}

impl TokenArena {
    pub fn new() -> Self {
        Self {
            slots: vec![Some(TokenData {
                parent: None,
                element: None,
                owner: None,
                len: 0,
            })],
            free: Vec::new(),
            live: 1,
        }
    }

    /// Create a child of `parent` extended by `element`, owned by `owner`.
    pub fn extend(&mut self, parent: TokenId, element: Element, owner: NodeId) -> TokenId {
        let len = self.len_of(parent) + 1;
        let data = TokenData {
            parent: Some(parent),
            element: Some(element),
            owner: Some(owner),
            len,
        };
        self.live += 1;
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot as usize] = Some(data);
                TokenId(slot)
            }
            None => {
                self.slots.push(Some(data));
                TokenId((self.slots.len() - 1) as u32)
            }
        }
    }

    /// Release a token slot. The root is never released.
    pub fn free(&mut self, id: TokenId) {
        if id == TokenId::ROOT {
            return;
        }
        if let Some(slot) = self.slots.get_mut(id.index()) {
            if slot.take().is_some() {
                self.free.push(id.0);
                self.live -= 1;
            }
        }
    }

    pub fn contains(&self, id: TokenId) -> bool {
        self.slots.get(id.index()).is_some_and(|s| s.is_some())
    }

    pub fn owner(&self, id: TokenId) -> Option<NodeId> {
        self.data(id).and_then(|d| d.owner)
    }

    pub fn parent(&self, id: TokenId) -> Option<TokenId> {
        self.data(id).and_then(|d| d.parent)
    }

    /// Number of elements bound by the token.
    pub fn len_of(&self, id: TokenId) -> usize {
        self.data(id).map_or(0, |d| d.len)
    }

    /// Number of live tokens, root included.
    pub fn live(&self) -> usize {
        self.live
    }

    /// Elements of a token in binding order (oldest ancestor first).
    pub fn elements(&self, id: TokenId) -> Vec<Element> {
        let mut out = Vec::with_capacity(self.len_of(id));
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let Some(data) = self.data(current) else { break };
            if let Some(element) = data.element {
                out.push(element);
            }
            cursor = data.parent;
        }
        out.reverse();
        out
    }

    /// Whether `element` appears anywhere in the token's lineage.
    pub fn binds(&self, id: TokenId, element: Element) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let Some(data) = self.data(current) else { return false };
            if data.element == Some(element) {
                return true;
            }
            cursor = data.parent;
        }
        false
    }

    fn data(&self, id: TokenId) -> Option<&TokenData> {
        self.slots.get(id.index()).and_then(|s| s.as_ref())
    }
}

impl Default for TokenArena {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Read-only views handed to predicates and key functions
// ---------------------------------------------------------------------------

/// A read-only view of a group: its key and current members in insertion order.
#[derive(Debug, Clone)]
pub struct GroupView<'a> {
    pub key: &'a Value,
    pub members: Vec<&'a Fact>,
}

impl GroupView<'_> {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// A resolved element.
#[derive(Debug, Clone)]
pub enum ElementRef<'a> {
    Fact(&'a Fact),
    Group(GroupView<'a>),
}

impl<'a> ElementRef<'a> {
    pub fn as_fact(&self) -> Option<&'a Fact> {
        match self {
            ElementRef::Fact(f) => Some(f),
            ElementRef::Group(_) => None,
        }
    }

    pub fn as_group(&self) -> Option<&GroupView<'a>> {
        match self {
            ElementRef::Group(g) => Some(g),
            ElementRef::Fact(_) => None,
        }
    }
}

/// A resolved token: the facts and groups it binds, in pattern order.
#[derive(Debug, Clone)]
pub struct Tuple<'a> {
    elements: Vec<ElementRef<'a>>,
}

impl<'a> Tuple<'a> {
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ElementRef<'a>> {
        self.elements.get(index)
    }

    /// The fact bound at `index`, if that position holds a fact.
    pub fn fact(&self, index: usize) -> Option<&'a Fact> {
        self.elements.get(index).and_then(|e| e.as_fact())
    }

    /// The group bound at `index`, if that position holds a group.
    pub fn group(&self, index: usize) -> Option<&GroupView<'a>> {
        self.elements.get(index).and_then(|e| e.as_group())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ElementRef<'a>> {
        self.elements.iter()
    }
}

/// Resolves ids to the facts and groups they currently denote.
#[derive(Clone, Copy)]
pub struct Resolver<'a> {
    pub store: &'a FactStore,
    pub groups: &'a GroupTable,
    pub tokens: &'a TokenArena,
}

impl<'a> Resolver<'a> {
    pub fn element(&self, element: Element) -> NetworkResult<ElementRef<'a>> {
        match element {
            Element::Fact(id) => self
                .store
                .get(id)
                .map(ElementRef::Fact)
                .ok_or_else(|| dangling(format!("token references missing {id}"))),
            Element::Group(id) => {
                let group = self
                    .groups
                    .get(id)
                    .ok_or_else(|| dangling(format!("token references missing {id}")))?;
                let members = group
                    .members()
                    .iter()
                    .map(|m| {
                        self.store
                            .get(*m)
                            .ok_or_else(|| dangling(format!("{id} holds missing {m}")))
                    })
                    .collect::<NetworkResult<Vec<_>>>()?;
                Ok(ElementRef::Group(GroupView {
                    key: group.key(),
                    members,
                }))
            }
        }
    }

    pub fn tuple(&self, token: TokenId) -> NetworkResult<Tuple<'a>> {
        let elements = self
            .tokens
            .elements(token)
            .into_iter()
            .map(|e| self.element(e))
            .collect::<NetworkResult<Vec<_>>>()?;
        Ok(Tuple { elements })
    }
}

fn dangling(message: String) -> NetworkError {
    NetworkError::InvariantViolation {
        node: usize::MAX,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(i: usize) -> NodeId {
        NodeId::new(i)
    }

    fn fact(raw: u64) -> Element {
        Element::Fact(FactId::new(raw).unwrap())
    }

    #[test]
    fn lineage_is_ordered_oldest_first() {
        let mut arena = TokenArena::new();
        let a = arena.extend(TokenId::ROOT, fact(1), node(1));
        let b = arena.extend(a, fact(2), node(2));

        assert_eq!(arena.elements(b), vec![fact(1), fact(2)]);
        assert_eq!(arena.len_of(b), 2);
        assert_eq!(arena.parent(b), Some(a));
        assert_eq!(arena.owner(b), Some(node(2)));
        assert!(arena.binds(b, fact(1)));
        assert!(!arena.binds(a, fact(2)));
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut arena = TokenArena::new();
        let a = arena.extend(TokenId::ROOT, fact(1), node(1));
        assert_eq!(arena.live(), 2);

        arena.free(a);
        assert!(!arena.contains(a));
        assert_eq!(arena.live(), 1);

        let b = arena.extend(TokenId::ROOT, fact(2), node(1));
        assert_eq!(a, b);
        assert_eq!(arena.elements(b), vec![fact(2)]);
    }

    #[test]
    fn root_is_never_freed() {
        let mut arena = TokenArena::new();
        arena.free(TokenId::ROOT);
        assert!(arena.contains(TokenId::ROOT));
        assert!(arena.elements(TokenId::ROOT).is_empty());
    }
}
