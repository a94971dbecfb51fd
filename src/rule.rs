//! Rules as seen by the engine: a name, a salience and an opaque action.
//!
//! The conditions of a rule live in the network; by the time a rule fires,
//! its action receives a [`Match`], an owned snapshot of the facts and
//! groups bound by the activation's token taken at firing time.

use std::sync::Arc;

use serde::Serialize;

use crate::fact::{Fact, Value};
use crate::session::ActionContext;
use crate::token::{ElementRef, TokenId, Tuple};

/// Index of a rule within its network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleId(u32);

impl RuleId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rule:{}", self.0)
    }
}

/// Error type rule actions may return.
pub type ActionError = Box<dyn std::error::Error + Send + Sync>;

/// Result type of a rule action.
pub type ActionResult = std::result::Result<(), ActionError>;

/// A rule action. It may mutate the session through the [`ActionContext`].
pub type Action = dyn Fn(&mut ActionContext<'_>, &Match) -> ActionResult + Send + Sync;

pub struct Rule {
    name: String,
    salience: i32,
    action: Arc<Action>,
}

impl Rule {
    pub fn new<F>(name: impl Into<String>, action: F) -> Self
    where
        F: Fn(&mut ActionContext<'_>, &Match) -> ActionResult + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            salience: 0,
            action: Arc::new(action),
        }
    }

    /// Higher salience fires first when the agenda orders by salience.
    pub fn with_salience(mut self, salience: i32) -> Self {
        self.salience = salience;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn salience(&self) -> i32 {
        self.salience
    }

    pub(crate) fn execute(&self, ctx: &mut ActionContext<'_>, m: &Match) -> ActionResult {
        (self.action)(ctx, m)
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("salience", &self.salience)
            .finish()
    }
}

/// Snapshot of a group bound by a match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupMatch {
    pub key: Value,
    pub members: Vec<Fact>,
}

impl GroupMatch {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// One bound position of a match.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Binding {
    Fact(Fact),
    Group(GroupMatch),
}

/// The facts and groups an activation binds, in pattern order.
#[derive(Debug, Clone, Serialize)]
pub struct Match {
    pub rule: String,
    #[serde(skip)]
    pub token: TokenId,
    pub bindings: Vec<Binding>,
}

impl Match {
    pub(crate) fn from_tuple(rule: &str, token: TokenId, tuple: &Tuple<'_>) -> Self {
        let bindings = tuple
            .iter()
            .map(|element| match element {
                ElementRef::Fact(fact) => Binding::Fact((*fact).clone()),
                ElementRef::Group(group) => Binding::Group(GroupMatch {
                    key: group.key.clone(),
                    members: group.members.iter().map(|f| (*f).clone()).collect(),
                }),
            })
            .collect();
        Self {
            rule: rule.to_string(),
            token,
            bindings,
        }
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn fact(&self, index: usize) -> Option<&Fact> {
        match self.bindings.get(index)? {
            Binding::Fact(fact) => Some(fact),
            Binding::Group(_) => None,
        }
    }

    pub fn group(&self, index: usize) -> Option<&GroupMatch> {
        match self.bindings.get(index)? {
            Binding::Group(group) => Some(group),
            Binding::Fact(_) => None,
        }
    }
}
