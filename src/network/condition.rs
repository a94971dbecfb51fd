//! Opaque conditions supplied when a network is built.
//!
//! The engine never inspects these callables; it only invokes them with
//! read-only views of the facts involved. They must be pure: the same
//! inputs have to produce the same answer for the lifetime of a session.

use std::sync::Arc;

use crate::fact::{Fact, Value};
use crate::token::{ElementRef, Tuple};

/// Single-fact test used by alpha nodes.
pub type FactTest = Arc<dyn Fn(&Fact) -> bool + Send + Sync>;

/// Whole-token test used by filter nodes.
pub type TupleTest = Arc<dyn Fn(&Tuple<'_>) -> bool + Send + Sync>;

/// Key extracted from the left (token) side of a binary node.
pub type TupleKey = Arc<dyn Fn(&Tuple<'_>) -> Value + Send + Sync>;

/// Key extracted from the right (element) side of a binary node.
pub type ElementKey = Arc<dyn Fn(&ElementRef<'_>) -> Value + Send + Sync>;

/// Residual test over a (token, element) pair.
pub type PairTest = Arc<dyn Fn(&Tuple<'_>, &ElementRef<'_>) -> bool + Send + Sync>;

/// Group key extracted from a fact by group-by nodes.
pub type GroupKey = Arc<dyn Fn(&Fact) -> Value + Send + Sync>;

/// How a binary node decides that a token and an element belong together.
///
/// An equality key pair lets both memories be hash-indexed; the residual
/// test runs only on pairs whose keys already agree. With neither, every
/// pair matches.
#[derive(Clone, Default)]
pub struct JoinCondition {
    key: Option<(TupleKey, ElementKey)>,
    test: Option<PairTest>,
}

impl JoinCondition {
    /// Match every pair (a cross product).
    pub fn always() -> Self {
        Self::default()
    }

    /// Match pairs whose extracted keys are equal.
    pub fn equal<L, R>(left: L, right: R) -> Self
    where
        L: Fn(&Tuple<'_>) -> Value + Send + Sync + 'static,
        R: Fn(&ElementRef<'_>) -> Value + Send + Sync + 'static,
    {
        Self {
            key: Some((Arc::new(left), Arc::new(right))),
            test: None,
        }
    }

    /// Match pairs accepted by an arbitrary test. Evaluated by linear scan.
    pub fn test<F>(test: F) -> Self
    where
        F: Fn(&Tuple<'_>, &ElementRef<'_>) -> bool + Send + Sync + 'static,
    {
        Self {
            key: None,
            test: Some(Arc::new(test)),
        }
    }

    /// Add a residual test on top of the existing condition.
    pub fn and<F>(self, test: F) -> Self
    where
        F: Fn(&Tuple<'_>, &ElementRef<'_>) -> bool + Send + Sync + 'static,
    {
        let test: PairTest = match self.test {
            Some(previous) => Arc::new(move |t: &Tuple<'_>, e: &ElementRef<'_>| {
                previous(t, e) && test(t, e)
            }),
            None => Arc::new(test),
        };
        Self {
            key: self.key,
            test: Some(test),
        }
    }

    pub fn is_indexed(&self) -> bool {
        self.key.is_some()
    }

    pub(crate) fn left_key(&self, tuple: &Tuple<'_>) -> Value {
        self.key.as_ref().map_or(Value::Null, |(left, _)| left(tuple))
    }

    pub(crate) fn right_key(&self, element: &ElementRef<'_>) -> Value {
        self.key
            .as_ref()
            .map_or(Value::Null, |(_, right)| right(element))
    }

    /// Residual test; callers only pass pairs taken from the same key bucket.
    pub(crate) fn accepts(&self, tuple: &Tuple<'_>, element: &ElementRef<'_>) -> bool {
        self.test.as_ref().is_none_or(|test| test(tuple, element))
    }
}

impl std::fmt::Debug for JoinCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinCondition")
            .field("indexed", &self.key.is_some())
            .field("test", &self.test.is_some())
            .finish()
    }
}
