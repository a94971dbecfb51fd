//! Ready-made networks for two reference rules.
//!
//! Both operate on facts of types `FactType1`..`FactType3`, whose
//! `TestProperty` is considered valid when it starts with `"Valid"`:
//!
//! - [`grouping`]: valid `FactType1` facts grouped by `TestProperty`; fires
//!   once per group with more than one member.
//! - [`negation`]: fires for every valid `FactType1` fact for which no valid
//!   `FactType2` and no valid `FactType3` fact has a `JoinProperty` equal to
//!   its `TestProperty`.

use crate::error::NetworkResult;
use crate::fact::{Fact, Value};
use crate::network::{JoinCondition, Network, NetworkBuilder};
use crate::rule::{ActionResult, Match, Rule};
use crate::session::ActionContext;

pub const FACT_TYPE_1: &str = "FactType1";
pub const FACT_TYPE_2: &str = "FactType2";
pub const FACT_TYPE_3: &str = "FactType3";

pub const TEST_PROPERTY: &str = "TestProperty";
pub const JOIN_PROPERTY: &str = "JoinProperty";

pub const GROUPING_RULE: &str = "valid facts sharing a value";
pub const NEGATION_RULE: &str = "valid fact without valid referrers";

pub fn is_valid(fact: &Fact) -> bool {
    fact.get(TEST_PROPERTY)
        .as_str()
        .is_some_and(|s| s.starts_with("Valid"))
}

/// One `FactType1` pattern grouped by `TestProperty`, plus a group size test.
pub fn grouping<F>(action: F) -> NetworkResult<Network>
where
    F: Fn(&mut ActionContext<'_>, &Match) -> ActionResult + Send + Sync + 'static,
{
    let mut b = NetworkBuilder::new();
    let root = b.root();
    let valid = b.alpha_where(FACT_TYPE_1, is_valid);
    let groups = b.group_by(valid, |f| f.get(TEST_PROPERTY).clone())?;
    let grouped = b.join(root, groups, JoinCondition::always())?;
    let shared = b.filter(grouped, |t| t.group(0).is_some_and(|g| g.len() > 1))?;
    b.terminal(shared, Rule::new(GROUPING_RULE, action))?;
    Ok(b.build())
}

/// One `FactType1` pattern followed by two negated patterns joined on
/// `JoinProperty == FactType1.TestProperty`.
pub fn negation<F>(action: F) -> NetworkResult<Network>
where
    F: Fn(&mut ActionContext<'_>, &Match) -> ActionResult + Send + Sync + 'static,
{
    let mut b = NetworkBuilder::new();
    let root = b.root();
    let first = b.alpha_where(FACT_TYPE_1, is_valid);
    let second = b.alpha_where(FACT_TYPE_2, is_valid);
    let third = b.alpha_where(FACT_TYPE_3, is_valid);

    let bound = b.join(root, first, JoinCondition::always())?;
    let no_second = b.not(bound, second, referrer())?;
    let no_third = b.not(no_second, third, referrer())?;
    b.terminal(no_third, Rule::new(NEGATION_RULE, action))?;
    Ok(b.build())
}

/// `element.JoinProperty == token[0].TestProperty`
fn referrer() -> JoinCondition {
    JoinCondition::equal(
        |t| t.fact(0).map_or(Value::Null, |f| f.get(TEST_PROPERTY).clone()),
        |e| e.as_fact().map_or(Value::Null, |f| f.get(JOIN_PROPERTY).clone()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::FactId;

    #[test]
    fn validity_is_a_prefix_test() {
        let id = FactId::new(1).unwrap();
        assert!(is_valid(&Fact::new(id, FACT_TYPE_1).with(TEST_PROPERTY, "Valid 1")));
        assert!(!is_valid(&Fact::new(id, FACT_TYPE_1).with(TEST_PROPERTY, "Invalid")));
        assert!(!is_valid(&Fact::new(id, FACT_TYPE_1)));
    }

    #[test]
    fn catalog_topologies() {
        let grouping = grouping(|_, _| Ok(())).unwrap();
        // root, alpha, group-by, join, filter, terminal
        assert_eq!(grouping.node_count(), 6);
        assert_eq!(grouping.rules()[0].name(), GROUPING_RULE);

        let negation = negation(|_, _| Ok(())).unwrap();
        assert_eq!(negation.node_count(), 8);
        let dot = negation.to_dot();
        assert!(dot.contains("not"));
        assert!(dot.contains(FACT_TYPE_3));
    }
}
