//! The agenda: activations waiting to fire, in conflict-resolution order.
//!
//! Terminal nodes feed token deltas in through [`Agenda::apply`]. The agenda
//! tracks every `(rule, token)` pair it has seen until the token is
//! retracted, so it can tell a re-derivation of a pending or fired match
//! from a new one.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::NetworkResult;
use crate::network::{Delta, NodeId, TokenDelta, invariant};
use crate::rule::RuleId;
use crate::token::TokenId;

/// Conflict-resolution strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgendaOrder {
    /// Oldest activation first.
    #[default]
    Fifo,
    /// Newest activation first.
    Lifo,
    /// Highest rule salience first, oldest first within a salience.
    Salience,
}

impl std::fmt::Display for AgendaOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgendaOrder::Fifo => f.write_str("fifo"),
            AgendaOrder::Lifo => f.write_str("lifo"),
            AgendaOrder::Salience => f.write_str("salience"),
        }
    }
}

/// A rule match waiting to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Activation {
    pub rule: RuleId,
    pub token: TokenId,
    /// Position in activation-time order.
    pub seq: u64,
}

type QueueKey = (i64, i64);

#[derive(Debug, Clone, Copy)]
enum Status {
    Pending(QueueKey),
    Fired,
}

#[derive(Debug, Clone)]
pub struct Agenda {
    order: AgendaOrder,
    requeue_on_modify: bool,
    /// Salience per rule, indexed by `RuleId`.
    salience: Vec<i32>,
    queue: BTreeMap<QueueKey, Activation>,
    status: HashMap<(RuleId, TokenId), Status>,
    next_seq: u64,
}

impl Agenda {
    pub fn new(order: AgendaOrder, requeue_on_modify: bool, salience: Vec<i32>) -> Self {
        Self {
            order,
            requeue_on_modify,
            salience,
            queue: BTreeMap::new(),
            status: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn order(&self) -> AgendaOrder {
        self.order
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Pending activations in firing order.
    pub fn pending(&self) -> impl Iterator<Item = &Activation> {
        self.queue.values()
    }

    /// Take the next activation and remember it as fired.
    pub fn pop(&mut self) -> Option<Activation> {
        let (_, activation) = self.queue.pop_first()?;
        self.status
            .insert((activation.rule, activation.token), Status::Fired);
        Some(activation)
    }

    /// Apply a token delta that reached the terminal `node` of `rule`.
    pub(crate) fn apply(&mut self, node: NodeId, rule: RuleId, delta: TokenDelta) -> NetworkResult<()> {
        match delta {
            Delta::Assert(token) => {
                if self.status.contains_key(&(rule, token)) {
                    tracing::trace!(%rule, %token, "activation already known");
                    return Ok(());
                }
                self.enqueue(rule, token);
            }
            Delta::Retract(token) => match self.status.remove(&(rule, token)) {
                Some(Status::Pending(key)) => {
                    self.queue.remove(&key);
                    tracing::trace!(%rule, %token, "activation cancelled");
                }
                Some(Status::Fired) => {}
                None => {
                    return Err(invariant(node, format!("retract of unknown activation {token}")));
                }
            },
            Delta::Modify(token) => match self.status.get(&(rule, token)) {
                Some(Status::Pending(_)) => {}
                Some(Status::Fired) => {
                    if self.requeue_on_modify {
                        self.enqueue(rule, token);
                    }
                }
                None => {
                    return Err(invariant(node, format!("modify of unknown activation {token}")));
                }
            },
        }
        Ok(())
    }

    fn enqueue(&mut self, rule: RuleId, token: TokenId) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let key = self.key(rule, seq);
        self.queue.insert(key, Activation { rule, token, seq });
        self.status.insert((rule, token), Status::Pending(key));
        tracing::trace!(%rule, %token, seq, "activation queued");
    }

    fn key(&self, rule: RuleId, seq: u64) -> QueueKey {
        let seq = seq as i64;
        match self.order {
            AgendaOrder::Fifo => (0, seq),
            AgendaOrder::Lifo => (0, -seq),
            AgendaOrder::Salience => {
                let salience = self.salience.get(rule.index()).copied().unwrap_or(0);
                (-i64::from(salience), seq)
            }
        }
    }
}
