//! The session: one fact base, one network state, one agenda.
//!
//! Every mutation is checked against the fact store first, so an identity
//! error leaves the session untouched. Accepted mutations are propagated to
//! quiescence before the call returns. [`Session::fire`] drains the agenda,
//! running one action at a time; whatever an action changes is propagated
//! before the next activation is taken.
//!
//! A session is not internally synchronized. Independent sessions share
//! nothing and may run on different threads.

use std::collections::HashSet;

use crate::agenda::Agenda;
use crate::config::SessionConfig;
use crate::error::{FactError, NetworkError, NetworkResult, ReteResult, SessionError, SessionResult};
use crate::fact::{Fact, FactId};
use crate::network::{Network, NetworkStats, Propagation};
use crate::rule::Match;
use crate::store::FactStore;

#[derive(Debug)]
pub struct Session {
    network: Network,
    store: FactStore,
    agenda: Agenda,
    config: SessionConfig,
    poisoned: bool,
}

impl Session {
    /// Start a session over `network`.
    ///
    /// Rules whose first condition is a negation become active here, before
    /// any fact is inserted. `network` may be freshly built or a clone of any
    /// other session's network; clones carry no match state.
    pub fn new(network: Network, config: SessionConfig) -> ReteResult<Self> {
        let salience = network.rules().iter().map(|r| r.salience()).collect();
        let agenda = Agenda::new(config.agenda_order, config.requeue_on_modify, salience);
        let mut session = Self {
            network,
            store: FactStore::new(),
            agenda,
            config,
            poisoned: false,
        };
        let primed = {
            let mut cx = Propagation {
                store: &session.store,
                agenda: &mut session.agenda,
            };
            session.network.prime(&mut cx)
        };
        session.guard(primed)?;
        tracing::info!(
            nodes = session.network.node_count(),
            rules = session.network.rules().len(),
            agenda_order = %session.config.agenda_order,
            "session created"
        );
        Ok(session)
    }

    pub fn with_defaults(network: Network) -> ReteResult<Self> {
        Self::new(network, SessionConfig::default())
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    pub fn insert(&mut self, fact: Fact) -> ReteResult<()> {
        self.ensure_usable()?;
        self.store.check_insert(&fact)?;
        let id = fact.id;
        self.store.insert(fact.clone())?;
        tracing::debug!(fact = %id, fact_type = %fact.fact_type, "insert");
        let result = {
            let mut cx = Propagation {
                store: &self.store,
                agenda: &mut self.agenda,
            };
            self.network.assert_fact(&fact, &mut cx)
        };
        self.guard(result)
    }

    /// Replace the attributes of a known fact. Identity and type are kept.
    pub fn update(&mut self, fact: Fact) -> ReteResult<()> {
        self.ensure_usable()?;
        self.store.check_update(&fact)?;
        self.store.replace(fact.clone())?;
        tracing::debug!(fact = %fact.id, fact_type = %fact.fact_type, "update");
        let result = {
            let mut cx = Propagation {
                store: &self.store,
                agenda: &mut self.agenda,
            };
            self.network.modify_fact(&fact, &mut cx)
        };
        self.guard(result)
    }

    /// Remove a fact, returning its last version.
    pub fn retract(&mut self, id: FactId) -> ReteResult<Fact> {
        self.ensure_usable()?;
        let fact = self.store.check_retract(id)?.clone();
        tracing::debug!(fact = %id, fact_type = %fact.fact_type, "retract");
        // Downstream nodes still resolve the fact while its removal propagates.
        let result = {
            let mut cx = Propagation {
                store: &self.store,
                agenda: &mut self.agenda,
            };
            self.network.retract_fact(&fact, &mut cx)
        };
        self.guard(result)?;
        Ok(self.store.remove(id)?)
    }

    pub fn insert_all(&mut self, facts: impl IntoIterator<Item = Fact>) -> ReteResult<()> {
        self.ensure_usable()?;
        let facts: Vec<Fact> = facts.into_iter().collect();
        if self.config.validate_batches {
            let mut seen = HashSet::new();
            for fact in &facts {
                self.store.check_insert(fact)?;
                if !seen.insert(fact.id) {
                    return Err(FactError::Duplicate { id: fact.id }.into());
                }
            }
        }
        for fact in facts {
            self.insert(fact)?;
        }
        Ok(())
    }

    pub fn update_all(&mut self, facts: impl IntoIterator<Item = Fact>) -> ReteResult<()> {
        self.ensure_usable()?;
        let facts: Vec<Fact> = facts.into_iter().collect();
        if self.config.validate_batches {
            for fact in &facts {
                self.store.check_update(fact)?;
            }
        }
        for fact in facts {
            self.update(fact)?;
        }
        Ok(())
    }

    pub fn retract_all(&mut self, ids: impl IntoIterator<Item = FactId>) -> ReteResult<Vec<Fact>> {
        self.ensure_usable()?;
        let ids: Vec<FactId> = ids.into_iter().collect();
        if self.config.validate_batches {
            let mut seen = HashSet::new();
            for &id in &ids {
                self.store.check_retract(id)?;
                // A second retract of the same id would find nothing.
                if !seen.insert(id) {
                    return Err(FactError::Unknown { id }.into());
                }
            }
        }
        ids.into_iter().map(|id| self.retract(id)).collect()
    }

    // -----------------------------------------------------------------------
    // Firing
    // -----------------------------------------------------------------------

    /// Fire pending activations until the agenda is empty or an action halts.
    ///
    /// Returns the number of activations fired. An action error stops the
    /// loop; the activation that failed counts as fired and is not retried.
    pub fn fire(&mut self) -> ReteResult<usize> {
        self.ensure_usable()?;
        let mut fired = 0;
        loop {
            if let Some(limit) = self.config.max_firings {
                if fired >= limit && !self.agenda.is_empty() {
                    return Err(SessionError::FiringLimit { limit }.into());
                }
            }
            let Some(activation) = self.agenda.pop() else {
                break;
            };
            let rule = match self.network.rule(activation.rule) {
                Some(rule) => rule.clone(),
                None => {
                    let err = NetworkError::InvalidWiring {
                        message: format!("activation for unknown {}", activation.rule),
                    };
                    return self.guard(Err(err));
                }
            };
            let snapshot = self
                .network
                .resolver(&self.store)
                .tuple(activation.token)
                .map(|tuple| Match::from_tuple(rule.name(), activation.token, &tuple));
            let matched = self.guard(snapshot)?;

            tracing::debug!(rule = rule.name(), token = %activation.token, "firing");
            let mut ctx = ActionContext {
                session: self,
                halted: false,
            };
            let outcome = rule.execute(&mut ctx, &matched);
            let halted = ctx.halted;

            if let Err(source) = outcome {
                tracing::warn!(rule = rule.name(), fired, error = %source, "rule action failed");
                return Err(SessionError::Action {
                    rule: rule.name().to_string(),
                    fired,
                    source,
                }
                .into());
            }
            self.ensure_usable()?;
            fired += 1;
            if halted {
                tracing::debug!(rule = rule.name(), fired, "halted by action");
                break;
            }
        }
        Ok(fired)
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    pub fn fact(&self, id: FactId) -> Option<&Fact> {
        self.store.get(id)
    }

    pub fn facts(&self) -> impl Iterator<Item = &Fact> {
        self.store.iter()
    }

    pub fn agenda_len(&self) -> usize {
        self.agenda.len()
    }

    /// Rule names of the pending activations, in firing order.
    pub fn pending(&self) -> Vec<&str> {
        self.agenda
            .pending()
            .filter_map(|a| self.network.rule(a.rule))
            .map(|rule| rule.name())
            .collect()
    }

    /// Snapshots of the pending activations, in firing order.
    pub fn pending_matches(&self) -> ReteResult<Vec<Match>> {
        let resolver = self.network.resolver(&self.store);
        let mut out = Vec::with_capacity(self.agenda.len());
        for activation in self.agenda.pending() {
            let Some(rule) = self.network.rule(activation.rule) else {
                continue;
            };
            let tuple = resolver.tuple(activation.token)?;
            out.push(Match::from_tuple(rule.name(), activation.token, &tuple));
        }
        Ok(out)
    }

    pub fn stats(&self) -> NetworkStats {
        self.network.stats()
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn ensure_usable(&self) -> SessionResult<()> {
        if self.poisoned {
            return Err(SessionError::Poisoned);
        }
        Ok(())
    }

    /// Surface a propagation error, poisoning the session.
    fn guard<T>(&mut self, result: NetworkResult<T>) -> ReteResult<T> {
        result.map_err(|err| {
            self.poisoned = true;
            tracing::error!(error = %err, "propagation failed; session poisoned");
            err.into()
        })
    }
}

/// What a rule action can do to the session that fired it.
///
/// Mutations go through the same checks and propagation as calls on the
/// session itself, and have fully propagated when they return.
pub struct ActionContext<'s> {
    session: &'s mut Session,
    halted: bool,
}

impl ActionContext<'_> {
    pub fn insert(&mut self, fact: Fact) -> ReteResult<()> {
        self.session.insert(fact)
    }

    pub fn update(&mut self, fact: Fact) -> ReteResult<()> {
        self.session.update(fact)
    }

    pub fn retract(&mut self, id: FactId) -> ReteResult<Fact> {
        self.session.retract(id)
    }

    /// Current version of a fact.
    pub fn fact(&self, id: FactId) -> Option<&Fact> {
        self.session.fact(id)
    }

    /// Stop the current `fire()` once this action returns.
    pub fn halt(&mut self) {
        self.halted = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agenda::AgendaOrder;
    use crate::error::ReteError;
    use crate::network::{JoinCondition, NetworkBuilder};
    use crate::rule::Rule;
    use std::sync::{Arc, Mutex};

    fn id(n: u64) -> FactId {
        FactId::new(n).unwrap()
    }

    /// One rule matching every `Item` fact, recording the ids it fires for.
    fn single_pattern(log: Arc<Mutex<Vec<u64>>>) -> Network {
        let mut b = NetworkBuilder::new();
        let root = b.root();
        let items = b.alpha("Item");
        let join = b.join(root, items, JoinCondition::always()).unwrap();
        b.terminal(
            join,
            Rule::new("item", move |_, m| {
                let fact = m.fact(0).ok_or("unbound fact")?;
                log.lock().unwrap().push(fact.id.get());
                Ok(())
            }),
        )
        .unwrap();
        b.build()
    }

    fn item(n: u64) -> Fact {
        Fact::new(id(n), "Item").with("n", n as i64)
    }

    #[test]
    fn fires_once_per_match() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut session = Session::with_defaults(single_pattern(log.clone())).unwrap();
        session.insert(item(1)).unwrap();
        session.insert(item(2)).unwrap();
        assert_eq!(session.agenda_len(), 2);
        assert_eq!(session.pending(), vec!["item", "item"]);

        assert_eq!(session.fire().unwrap(), 2);
        assert_eq!(session.fire().unwrap(), 0);
        assert_eq!(*log.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn identity_errors_leave_state_unchanged() {
        let mut session = Session::with_defaults(single_pattern(Arc::default())).unwrap();
        session.insert(item(1)).unwrap();

        let err = session.insert(item(1)).unwrap_err();
        assert!(matches!(err, ReteError::Fact(FactError::Duplicate { .. })));
        let err = session.retract(id(9)).unwrap_err();
        assert!(matches!(err, ReteError::Fact(FactError::Unknown { .. })));
        let err = session.update(Fact::new(id(1), "Other")).unwrap_err();
        assert!(matches!(err, ReteError::Fact(FactError::TypeChanged { .. })));

        assert_eq!(session.agenda_len(), 1);
        assert_eq!(session.facts().count(), 1);
        assert!(!session.is_poisoned());
    }

    #[test]
    fn batch_is_validated_before_applying() {
        let mut session = Session::with_defaults(single_pattern(Arc::default())).unwrap();
        let err = session
            .insert_all(vec![item(1), item(2), item(1)])
            .unwrap_err();
        assert!(matches!(err, ReteError::Fact(FactError::Duplicate { .. })));
        assert_eq!(session.facts().count(), 0);
        assert_eq!(session.agenda_len(), 0);

        session.insert_all(vec![item(1), item(2)]).unwrap();
        assert!(session.retract_all(vec![id(1), id(1)]).is_err());
        assert_eq!(session.facts().count(), 2);
        assert_eq!(session.retract_all(vec![id(2), id(1)]).unwrap().len(), 2);
        assert_eq!(session.agenda_len(), 0);
    }

    #[test]
    fn unvalidated_batch_applies_prefix() {
        let config = SessionConfig {
            validate_batches: false,
            ..SessionConfig::default()
        };
        let mut session = Session::new(single_pattern(Arc::default()), config).unwrap();
        assert!(session.insert_all(vec![item(1), item(1)]).is_err());
        assert_eq!(session.facts().count(), 1);
    }

    #[test]
    fn retract_cancels_pending_activation() {
        let mut session = Session::with_defaults(single_pattern(Arc::default())).unwrap();
        session.insert(item(1)).unwrap();
        let removed = session.retract(id(1)).unwrap();
        assert_eq!(removed.get("n"), &crate::fact::Value::Int(1));
        assert_eq!(session.agenda_len(), 0);
        assert_eq!(session.fire().unwrap(), 0);
    }

    #[test]
    fn update_requeues_fired_activation() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut session = Session::with_defaults(single_pattern(log.clone())).unwrap();
        session.insert(item(1)).unwrap();
        session.fire().unwrap();
        session.update(item(1).with("n", 10_i64)).unwrap();
        assert_eq!(session.fire().unwrap(), 1);

        let config = SessionConfig {
            requeue_on_modify: false,
            ..SessionConfig::default()
        };
        let mut session = Session::new(single_pattern(log), config).unwrap();
        session.insert(item(1)).unwrap();
        session.fire().unwrap();
        session.update(item(1).with("n", 10_i64)).unwrap();
        assert_eq!(session.fire().unwrap(), 0);
    }

    #[test]
    fn action_mutations_propagate_before_next_firing() {
        let mut b = NetworkBuilder::new();
        let root = b.root();
        let items = b.alpha("Item");
        let join = b.join(root, items, JoinCondition::always()).unwrap();
        b.terminal(
            join,
            Rule::new("chain", |ctx, m| {
                let n = m.fact(0).and_then(|f| f.get("n").as_int()).ok_or("no n")?;
                if n < 3 {
                    let next = n as u64 + 1;
                    ctx.insert(Fact::new(id(next), "Item").with("n", next as i64))?;
                }
                Ok(())
            }),
        )
        .unwrap();
        let mut session = Session::with_defaults(b.build()).unwrap();
        session.insert(item(1)).unwrap();
        assert_eq!(session.fire().unwrap(), 3);
        assert_eq!(session.facts().count(), 3);
    }

    #[test]
    fn action_error_reports_prior_firings() {
        let mut b = NetworkBuilder::new();
        let root = b.root();
        let items = b.alpha("Item");
        let join = b.join(root, items, JoinCondition::always()).unwrap();
        b.terminal(
            join,
            Rule::new("picky", |_, m| {
                let n = m.fact(0).and_then(|f| f.get("n").as_int()).unwrap_or(0);
                if n == 2 {
                    return Err("two is not allowed".into());
                }
                Ok(())
            }),
        )
        .unwrap();
        let mut session = Session::with_defaults(b.build()).unwrap();
        session.insert_all(vec![item(1), item(2), item(3)]).unwrap();

        let err = session.fire().unwrap_err();
        match err {
            ReteError::Session(SessionError::Action { rule, fired, .. }) => {
                assert_eq!(rule, "picky");
                assert_eq!(fired, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        // The failed activation is consumed; the rest still fire.
        assert_eq!(session.fire().unwrap(), 1);
    }

    #[test]
    fn halt_and_firing_limit() {
        let mut b = NetworkBuilder::new();
        let root = b.root();
        let items = b.alpha("Item");
        let join = b.join(root, items, JoinCondition::always()).unwrap();
        b.terminal(
            join,
            Rule::new("halting", |ctx, _| {
                ctx.halt();
                Ok(())
            }),
        )
        .unwrap();
        let network = b.build();

        let mut session = Session::with_defaults(network.clone()).unwrap();
        session.insert_all(vec![item(1), item(2)]).unwrap();
        assert_eq!(session.fire().unwrap(), 1);
        assert_eq!(session.agenda_len(), 1);

        let config = SessionConfig {
            max_firings: Some(1),
            ..SessionConfig::default()
        };
        let mut session = Session::new(single_pattern(Arc::default()), config).unwrap();
        session.insert_all(vec![item(1), item(2)]).unwrap();
        let err = session.fire().unwrap_err();
        assert!(matches!(
            err,
            ReteError::Session(SessionError::FiringLimit { limit: 1 })
        ));
        assert_eq!(session.fire().unwrap(), 1);
    }

    #[test]
    fn salience_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut b = NetworkBuilder::new();
        let root = b.root();
        let items = b.alpha("Item");
        let join = b.join(root, items, JoinCondition::always()).unwrap();
        for (name, salience) in [("low", 0), ("high", 5)] {
            let order = order.clone();
            b.terminal(
                join,
                Rule::new(name, move |_, m| {
                    order.lock().unwrap().push(m.rule.clone());
                    Ok(())
                })
                .with_salience(salience),
            )
            .unwrap();
        }
        let config = SessionConfig {
            agenda_order: AgendaOrder::Salience,
            ..SessionConfig::default()
        };
        let mut session = Session::new(b.build(), config).unwrap();
        session.insert(item(1)).unwrap();
        session.fire().unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["high", "low"]);
    }

    #[test]
    fn clone_of_a_used_network_starts_empty() {
        let mut first = Session::with_defaults(single_pattern(Arc::default())).unwrap();
        first.insert_all(vec![item(1), item(2)]).unwrap();

        let mut second = Session::with_defaults(first.network().clone()).unwrap();
        assert_eq!(second.agenda_len(), 0);
        second.insert(item(1)).unwrap();
        assert!(!second.is_poisoned());
        assert_eq!(second.agenda_len(), 1);
        assert_eq!(second.fire().unwrap(), 1);

        assert_eq!(first.agenda_len(), 2);
        assert_eq!(first.stats().live_tokens, 3);
    }

    #[test]
    fn invariant_violation_poisons_the_session() {
        let mut session = Session::with_defaults(single_pattern(Arc::default())).unwrap();
        session.insert(item(1)).unwrap();

        // Feed a fact into the network behind the store's back.
        let stray = item(2);
        session
            .network
            .assert_fact(
                &stray,
                &mut Propagation {
                    store: &session.store,
                    agenda: &mut session.agenda,
                },
            )
            .unwrap_err();

        let err = session.insert(stray).unwrap_err();
        assert!(matches!(
            err,
            ReteError::Network(NetworkError::InvariantViolation { .. })
        ));
        assert!(session.is_poisoned());

        for err in [
            session.insert(item(3)).unwrap_err(),
            session.update(item(1)).unwrap_err(),
            session.retract(id(1)).map(|_| ()).unwrap_err(),
            session.fire().map(|_| ()).unwrap_err(),
        ] {
            assert!(matches!(err, ReteError::Session(SessionError::Poisoned)));
        }
    }
}
