//! Negative (and positive) existential join.
//!
//! Each left token carries a counter of right elements currently matching
//! it, its blockers. Under [`Quantifier::Not`] a token is visible downstream
//! iff the counter is zero; under [`Quantifier::Exists`] iff it is at least
//! one. Only transitions across that boundary are propagated:
//!
//! | event                 | `Not`                  | `Exists`               |
//! |-----------------------|------------------------|------------------------|
//! | left assert, count 0  | assert                 | nothing                |
//! | left assert, count >0 | nothing                | assert                 |
//! | blocker added, 0 → 1  | retract                | assert                 |
//! | blocker removed, 1 → 0| assert                 | retract                |
//! | left retract, visible | retract                | retract                |
//!
//! A right-side modify can move one element in and out of the blocker sets
//! of many tokens at once. The net change per token is computed first and
//! every hiding transition is emitted before any revealing one.

use std::collections::HashMap;

use crate::error::NetworkResult;
use crate::fact::Value;
use crate::token::{Element, TokenId};

use super::condition::JoinCondition;
use super::memory::{Links, Memory};
use super::{Delta, ElementDelta, Env, NodeId, TokenDelta, invariant, partition};

/// Which counter values make a left token visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    /// Visible while no right element matches.
    Not,
    /// Visible while at least one right element matches.
    Exists,
}

impl Quantifier {
    fn visible(self, blockers: usize) -> bool {
        match self {
            Quantifier::Not => blockers == 0,
            Quantifier::Exists => blockers > 0,
        }
    }
}

#[derive(Debug)]
pub struct NotNode {
    quantifier: Quantifier,
    condition: JoinCondition,
    left: Memory<TokenId>,
    right: Memory<Element>,
    /// Blocker counter per left token.
    counters: HashMap<TokenId, usize>,
    /// Which elements each token counts, in the order they started matching.
    blocks: Links<TokenId, Element>,
}

impl NotNode {
    pub fn new(quantifier: Quantifier, condition: JoinCondition) -> Self {
        Self {
            quantifier,
            condition,
            left: Memory::new(),
            right: Memory::new(),
            counters: HashMap::new(),
            blocks: Links::new(),
        }
    }

    pub(crate) fn blank(&self) -> Self {
        Self::new(self.quantifier, self.condition.clone())
    }

    pub fn quantifier(&self) -> Quantifier {
        self.quantifier
    }

    pub fn left_len(&self) -> usize {
        self.left.len()
    }

    pub fn right_len(&self) -> usize {
        self.right.len()
    }

    /// Current blocker count of a left token, `None` if the token is unknown.
    pub fn blocker_count(&self, token: TokenId) -> Option<usize> {
        self.counters.get(&token).copied()
    }

    /// Number of left tokens currently propagated downstream.
    pub fn visible_count(&self) -> usize {
        self.counters
            .values()
            .filter(|c| self.quantifier.visible(**c))
            .count()
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
        let count = matches.len();
        for element in matches {
            self.blocks.link(token, element);
        }
        self.counters.insert(token, count);

        Ok(if self.quantifier.visible(count) {
            vec![Delta::Assert(token)]
        } else {
            Vec::new()
        })
    }

    fn left_retract(&mut self, id: NodeId, token: TokenId) -> NetworkResult<Vec<TokenDelta>> {
        if self.left.remove(token).is_none() {
            return Err(invariant(id, format!("retract of unknown left {token}")));
        }
        let count = self
            .counters
            .remove(&token)
            .ok_or_else(|| invariant(id, format!("{token} has no blocker counter")))?;
        self.blocks.unlink_left(token);

        Ok(if self.quantifier.visible(count) {
            vec![Delta::Retract(token)]
        } else {
            Vec::new()
        })
    }

    /// Recount a token whose facts changed upstream.
    fn left_modify(
        &mut self,
        id: NodeId,
        token: TokenId,
        env: &mut Env<'_>,
    ) -> NetworkResult<Vec<TokenDelta>> {
        let before = self
            .counters
            .get(&token)
            .copied()
            .ok_or_else(|| invariant(id, format!("modify of unknown left {token}")))?;
        let (key, matches) = self.left_matches(token, env)?;
        self.left.rekey(token, key);

        let old = self.blocks.rights_of(token);
        let (gone, _, added) = partition(&old, &matches);
        for element in gone {
            self.blocks.unlink(token, element);
        }
        for element in added {
            self.blocks.link(token, element);
        }
        let after = matches.len();
        self.counters.insert(token, after);

        let out = match (self.quantifier.visible(before), self.quantifier.visible(after)) {
            (true, true) => vec![Delta::Modify(token)],
            (true, false) => vec![Delta::Retract(token)],
            (false, true) => vec![Delta::Assert(token)],
            (false, false) => Vec::new(),
        };
        Ok(out)
    }

    fn left_matches(&self, token: TokenId, env: &Env<'_>) -> NetworkResult<(Value, Vec<Element>)> {
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

        let mut out = Vec::new();
        for token in matches {
            if let Some(delta) = self.block(id, token, element)? {
                out.push(delta);
            }
        }
        Ok(out)
    }

    fn right_retract(&mut self, id: NodeId, element: Element) -> NetworkResult<Vec<TokenDelta>> {
        if self.right.remove(element).is_none() {
            return Err(invariant(id, format!("retract of unknown right {element}")));
        }
        let mut out = Vec::new();
        for token in self.blocks.unlink_right(element) {
            if let Some(delta) = self.unblock(id, token, element)? {
                out.push(delta);
            }
        }
        Ok(out)
    }

    /// An element changed: every token it stopped matching loses a blocker
    /// and every token it started matching gains one.
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

        let old = self.blocks.lefts_of(element);
        let (gone, _, added) = partition(&old, &matches);

        let mut hide = Vec::new();
        let mut reveal = Vec::new();
        for token in gone {
            if let Some(delta) = self.unblock(id, token, element)? {
                sort_delta(delta, &mut hide, &mut reveal);
            }
        }
        for token in added {
            if let Some(delta) = self.block(id, token, element)? {
                sort_delta(delta, &mut hide, &mut reveal);
            }
        }
        hide.extend(reveal);
        Ok(hide)
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
    // Counter transitions
    // -----------------------------------------------------------------------

    /// Count `element` as a blocker of `token`.
    fn block(
        &mut self,
        id: NodeId,
        token: TokenId,
        element: Element,
    ) -> NetworkResult<Option<TokenDelta>> {
        let counter = self
            .counters
            .get_mut(&token)
            .ok_or_else(|| invariant(id, format!("{token} has no blocker counter")))?;
        let before = *counter;
        *counter += 1;
        self.blocks.link(token, element);
        Ok(self.transition(token, before, before + 1))
    }

    /// Stop counting `element` as a blocker of `token`. The pair may already
    /// be unlinked when the element is going away entirely.
    fn unblock(
        &mut self,
        id: NodeId,
        token: TokenId,
        element: Element,
    ) -> NetworkResult<Option<TokenDelta>> {
        let counter = self
            .counters
            .get_mut(&token)
            .ok_or_else(|| invariant(id, format!("{token} has no blocker counter")))?;
        let before = *counter;
        let Some(after) = before.checked_sub(1) else {
            tracing::error!(node = id.index(), %token, %element, "blocker counter underflow");
            return Err(invariant(
                id,
                format!("blocker counter of {token} would go negative removing {element}"),
            ));
        };
        *counter = after;
        self.blocks.unlink(token, element);
        Ok(self.transition(token, before, after))
    }

    fn transition(&self, token: TokenId, before: usize, after: usize) -> Option<TokenDelta> {
        match (self.quantifier.visible(before), self.quantifier.visible(after)) {
            (true, false) => Some(Delta::Retract(token)),
            (false, true) => Some(Delta::Assert(token)),
            _ => None,
        }
    }
}

fn sort_delta(delta: TokenDelta, hide: &mut Vec<TokenDelta>, reveal: &mut Vec<TokenDelta>) {
    match delta {
        Delta::Retract(_) => hide.push(delta),
        _ => reveal.push(delta),
    }
}
