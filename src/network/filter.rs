//! Filter node: keeps the tokens that satisfy a test over the whole tuple.
//!
//! Typically sits after a group-by join to express conditions on the group
//! itself, such as a minimum member count.

use std::collections::HashSet;

use crate::error::NetworkResult;
use crate::token::TokenId;

use super::condition::TupleTest;
use super::{Delta, Env, NodeId, TokenDelta, invariant};

pub struct FilterNode {
    test: TupleTest,
    seen: HashSet<TokenId>,
    passing: HashSet<TokenId>,
}

impl FilterNode {
    pub fn new(test: TupleTest) -> Self {
        Self {
            test,
            seen: HashSet::new(),
            passing: HashSet::new(),
        }
    }

    pub(crate) fn blank(&self) -> Self {
        Self::new(self.test.clone())
    }

    pub fn passing_count(&self) -> usize {
        self.passing.len()
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    pub(crate) fn activate(
        &mut self,
        id: NodeId,
        delta: TokenDelta,
        env: &Env<'_>,
    ) -> NetworkResult<Vec<TokenDelta>> {
        let out = match delta {
            Delta::Assert(token) => {
                if !self.seen.insert(token) {
                    return Err(invariant(id, format!("{token} asserted twice")));
                }
                if self.check(token, env)? {
                    self.passing.insert(token);
                    vec![Delta::Assert(token)]
                } else {
                    Vec::new()
                }
            }
            Delta::Retract(token) => {
                if !self.seen.remove(&token) {
                    return Err(invariant(id, format!("retract of unknown {token}")));
                }
                if self.passing.remove(&token) {
                    vec![Delta::Retract(token)]
                } else {
                    Vec::new()
                }
            }
            Delta::Modify(token) => {
                if !self.seen.contains(&token) {
                    return Err(invariant(id, format!("modify of unknown {token}")));
                }
                let was = self.passing.contains(&token);
                let now = self.check(token, env)?;
                match (was, now) {
                    (true, true) => vec![Delta::Modify(token)],
                    (true, false) => {
                        self.passing.remove(&token);
                        vec![Delta::Retract(token)]
                    }
                    (false, true) => {
                        self.passing.insert(token);
                        vec![Delta::Assert(token)]
                    }
                    (false, false) => Vec::new(),
                }
            }
        };
        Ok(out)
    }

    fn check(&self, token: TokenId, env: &Env<'_>) -> NetworkResult<bool> {
        let tuple = env.resolver().tuple(token)?;
        Ok((self.test)(&tuple))
    }
}

impl std::fmt::Debug for FilterNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterNode")
            .field("seen", &self.seen.len())
            .field("passing", &self.passing.len())
            .finish()
    }
}
