//! Join node: combines a left token stream with a right element stream.
//!
//! Every (token, element) pair accepted by the [`JoinCondition`] produces a
//! child token. The node remembers which pairs produced which child, so a
//! retraction on either side removes exactly the children built from it
//! without re-evaluating any condition.

use std::collections::HashMap;

use crate::error::NetworkResult;
use crate::fact::Value;
use crate::token::{Element, TokenArena, TokenId};

use super::condition::JoinCondition;
use super::memory::{Links, Memory};
use super::{Delta, ElementDelta, Env, NodeId, TokenDelta, invariant, partition};

#[derive(Debug)]
pub struct JoinNode {
    condition: JoinCondition,
    left: Memory<TokenId>,
    right: Memory<Element>,
    children: HashMap<(TokenId, Element), TokenId>,
    pairs: Links<TokenId, Element>,
}

impl JoinNode {
    pub fn new(condition: JoinCondition) -> Self {
        Self {
            condition,
            left: Memory::new(),
            right: Memory::new(),
            children: HashMap::new(),
            pairs: Links::new(),
        }
    }

    pub(crate) fn blank(&self) -> Self {
        Self::new(self.condition.clone())
    }

    pub fn left_len(&self) -> usize {
        self.left.len()
    }

    pub fn right_len(&self) -> usize {
        self.right.len()
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub(crate) fn left_activate(
        &mut self,
        id: NodeId,
        delta: TokenDelta,
        env: &mut Env<'_>,
    ) -> NetworkResult<Vec<TokenDelta>> {
        match delta {
            Delta::Assert(token) => self.left_assert(id, token, env),
            Delta::Modify(token) => self.left_modify(id, token, env),
            Delta::Retract(token) => self.left_retract(id, token),
        }
    }

    pub(crate) fn right_activate(
        &mut self,
        id: NodeId,
        delta: ElementDelta,
        env: &mut Env<'_>,
    ) -> NetworkResult<Vec<TokenDelta>> {
        match delta {
            Delta::Assert(element) => self.right_assert(id, element, env),
            Delta::Modify(element) => self.right_modify(id, element, env),
            Delta::Retract(element) => self.right_retract(id, element),
        }
    }

    // -----------------------------------------------------------------------
    // Left side
    // -----------------------------------------------------------------------

    fn left_assert(
        &mut self,
        id: NodeId,
        token: TokenId,
        env: &mut Env<'_>,
    ) -> NetworkResult<Vec<TokenDelta>> {
        if self.left.contains(token) {
            return Err(invariant(id, format!("{token} asserted twice on the left")));
        }
        let (key, matches) = self.left_matches(token, env)?;
        self.left.insert(token, key);
        Ok(matches
            .into_iter()
            .map(|element| Delta::Assert(self.link(id, token, element, env.tokens)))
            .collect())
    }

    fn left_retract(&mut self, id: NodeId, token: TokenId) -> NetworkResult<Vec<TokenDelta>> {
        if self.left.remove(token).is_none() {
            return Err(invariant(id, format!("retract of unknown left {token}")));
        }
        let elements = self.pairs.unlink_left(token);
        let mut out = Vec::with_capacity(elements.len());
        for element in elements {
            out.push(Delta::Retract(self.orphan(id, token, element)?));
        }
        Ok(out)
    }

    /// Re-evaluate a token whose facts changed upstream. Children that still
    /// hold are forwarded as modifications; the rest are retracted or created.
    fn left_modify(
        &mut self,
        id: NodeId,
        token: TokenId,
        env: &mut Env<'_>,
    ) -> NetworkResult<Vec<TokenDelta>> {
        if !self.left.contains(token) {
            return Err(invariant(id, format!("modify of unknown left {token}")));
        }
        let (key, matches) = self.left_matches(token, env)?;
        self.left.rekey(token, key);

        let old = self.pairs.rights_of(token);
        let (gone, kept, added) = partition(&old, &matches);

        let mut out = Vec::with_capacity(gone.len() + kept.len() + added.len());
        for element in gone {
            out.push(Delta::Retract(self.unlink(id, token, element)?));
        }
        for element in kept {
            out.push(Delta::Modify(self.child(id, token, element)?));
        }
        for element in added {
            out.push(Delta::Assert(self.link(id, token, element, env.tokens)));
        }
        Ok(out)
    }

    fn left_matches(
        &self,
        token: TokenId,
        env: &Env<'_>,
    ) -> NetworkResult<(Value, Vec<Element>)> {
        let resolver = env.resolver();
        let tuple = resolver.tuple(token)?;
        let key = self.condition.left_key(&tuple);
        let mut matches = Vec::new();
        for element in self.right.bucket(&key) {
            if self.condition.accepts(&tuple, &resolver.element(element)?) {
                matches.push(element);
            }
        }
        Ok((key, matches))
    }

    // -----------------------------------------------------------------------
    // Right side
    // -----------------------------------------------------------------------

    fn right_assert(
        &mut self,
        id: NodeId,
        element: Element,
        env: &mut Env<'_>,
    ) -> NetworkResult<Vec<TokenDelta>> {
        if self.right.contains(element) {
            return Err(invariant(id, format!("{element} asserted twice on the right")));
        }
        let (key, matches) = self.right_matches(element, env)?;
        self.right.insert(element, key);
        Ok(matches
            .into_iter()
            .map(|token| Delta::Assert(self.link(id, token, element, env.tokens)))
            .collect())
    }

    fn right_retract(&mut self, id: NodeId, element: Element) -> NetworkResult<Vec<TokenDelta>> {
        if self.right.remove(element).is_none() {
            return Err(invariant(id, format!("retract of unknown right {element}")));
        }
        let tokens = self.pairs.unlink_right(element);
        let mut out = Vec::with_capacity(tokens.len());
        for token in tokens {
            out.push(Delta::Retract(self.orphan(id, token, element)?));
        }
        Ok(out)
    }

    fn right_modify(
        &mut self,
        id: NodeId,
        element: Element,
        env: &mut Env<'_>,
    ) -> NetworkResult<Vec<TokenDelta>> {
        if !self.right.contains(element) {
            return Err(invariant(id, format!("modify of unknown right {element}")));
        }
        let (key, matches) = self.right_matches(element, env)?;
        self.right.rekey(element, key);

        let old = self.pairs.lefts_of(element);
        let (gone, kept, added) = partition(&old, &matches);

        let mut out = Vec::with_capacity(gone.len() + kept.len() + added.len());
        for token in gone {
            out.push(Delta::Retract(self.unlink(id, token, element)?));
        }
        for token in kept {
            out.push(Delta::Modify(self.child(id, token, element)?));
        }
        for token in added {
            out.push(Delta::Assert(self.link(id, token, element, env.tokens)));
        }
        Ok(out)
    }

    fn right_matches(
        &self,
        element: Element,
        env: &Env<'_>,
    ) -> NetworkResult<(Value, Vec<TokenId>)> {
        let resolver = env.resolver();
        let resolved = resolver.element(element)?;
        let key = self.condition.right_key(&resolved);
        let mut matches = Vec::new();
        for token in self.left.bucket(&key) {
            if self.condition.accepts(&resolver.tuple(token)?, &resolved) {
                matches.push(token);
            }
        }
        Ok((key, matches))
    }

    // -----------------------------------------------------------------------
    // Child bookkeeping
    // -----------------------------------------------------------------------

    fn link(
        &mut self,
        id: NodeId,
        token: TokenId,
        element: Element,
        tokens: &mut TokenArena,
    ) -> TokenId {
        let child = tokens.extend(token, element, id);
        self.children.insert((token, element), child);
        self.pairs.link(token, element);
        child
    }

    fn unlink(&mut self, id: NodeId, token: TokenId, element: Element) -> NetworkResult<TokenId> {
        self.pairs.unlink(token, element);
        self.orphan(id, token, element)
    }

    /// Take the child of a pair whose link is already gone.
    fn orphan(&mut self, id: NodeId, token: TokenId, element: Element) -> NetworkResult<TokenId> {
        self.children
            .remove(&(token, element))
            .ok_or_else(|| invariant(id, format!("no child for ({token}, {element})")))
    }

    fn child(&self, id: NodeId, token: TokenId, element: Element) -> NetworkResult<TokenId> {
        self.children
            .get(&(token, element))
            .copied()
            .ok_or_else(|| invariant(id, format!("no child for ({token}, {element})")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetworkError;
    use crate::network::fixture::{Fixture, node, same_key};

    /// Delta kind and the element each child token adds.
    fn summary(fx: &Fixture, out: &[TokenDelta]) -> Vec<(&'static str, Option<Element>)> {
        out.iter()
            .map(|d| {
                let kind = match d {
                    Delta::Assert(_) => "assert",
                    Delta::Modify(_) => "modify",
                    Delta::Retract(_) => "retract",
                };
                (kind, fx.last(d.item()))
            })
            .collect()
    }

    #[test]
    fn pairs_only_matching_keys() {
        let mut fx = Fixture::new();
        let mut join = JoinNode::new(same_key());
        let a = fx.fact(10, "a");
        let b = fx.fact(11, "b");
        join.right_activate(node(), Delta::Assert(a), &mut fx.env()).unwrap();
        join.right_activate(node(), Delta::Assert(b), &mut fx.env()).unwrap();

        let t = fx.token(1, "a");
        let out = join.left_activate(node(), Delta::Assert(t), &mut fx.env()).unwrap();
        assert_eq!(summary(&fx, &out), vec![("assert", Some(a))]);
        assert_eq!(join.child_count(), 1);
    }

    #[test]
    fn left_modify_retracts_keeps_and_adds() {
        let mut fx = Fixture::new();
        let mut join = JoinNode::new(JoinCondition::always().and(|t, e| {
            let left = t.fact(0).map(|f| f.get("key").clone());
            let right = e.as_fact().map(|f| f.get("key").clone());
            left == right || right.as_ref().and_then(|v| v.as_str()) == Some("any")
        }));
        let a1 = fx.fact(10, "a");
        let any = fx.fact(11, "any");
        let b1 = fx.fact(12, "b");
        for e in [a1, any, b1] {
            join.right_activate(node(), Delta::Assert(e), &mut fx.env()).unwrap();
        }
        let t = fx.token(1, "a");
        join.left_activate(node(), Delta::Assert(t), &mut fx.env()).unwrap();
        assert_eq!(join.child_count(), 2);

        fx.rekey(1, "b");
        let out = join.left_activate(node(), Delta::Modify(t), &mut fx.env()).unwrap();
        assert_eq!(
            summary(&fx, &out),
            vec![("retract", Some(a1)), ("modify", Some(any)), ("assert", Some(b1))]
        );
        assert_eq!(join.child_count(), 2);
    }

    #[test]
    fn right_retract_removes_only_its_children() {
        let mut fx = Fixture::new();
        let mut join = JoinNode::new(same_key());
        let t1 = fx.token(1, "a");
        let t2 = fx.token(2, "a");
        join.left_activate(node(), Delta::Assert(t1), &mut fx.env()).unwrap();
        join.left_activate(node(), Delta::Assert(t2), &mut fx.env()).unwrap();
        let e1 = fx.fact(10, "a");
        let e2 = fx.fact(11, "a");
        join.right_activate(node(), Delta::Assert(e1), &mut fx.env()).unwrap();
        join.right_activate(node(), Delta::Assert(e2), &mut fx.env()).unwrap();
        assert_eq!(join.child_count(), 4);

        let out = join.right_activate(node(), Delta::Retract(e1), &mut fx.env()).unwrap();
        let parents: Vec<_> = out.iter().map(|d| fx.tokens.parent(d.item())).collect();
        assert_eq!(parents, vec![Some(t1), Some(t2)]);
        assert!(out.iter().all(|d| matches!(d, Delta::Retract(_))));
        assert_eq!(join.child_count(), 2);
        assert_eq!(join.right_len(), 1);

        let err = join
            .right_activate(node(), Delta::Retract(e1), &mut fx.env())
            .unwrap_err();
        assert!(matches!(err, NetworkError::InvariantViolation { .. }));
    }

    #[test]
    fn left_retract_then_reassert_links_again() {
        let mut fx = Fixture::new();
        let mut join = JoinNode::new(JoinCondition::always());
        let e = fx.fact(10, "x");
        join.right_activate(node(), Delta::Assert(e), &mut fx.env()).unwrap();
        let t = fx.token(1, "a");
        join.left_activate(node(), Delta::Assert(t), &mut fx.env()).unwrap();

        let out = join.left_activate(node(), Delta::Retract(t), &mut fx.env()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(join.child_count(), 0);
        assert_eq!(join.left_len(), 0);

        let out = join.left_activate(node(), Delta::Assert(t), &mut fx.env()).unwrap();
        assert_eq!(summary(&fx, &out), vec![("assert", Some(e))]);
    }
}
