//! The discrimination network: alpha filters feeding a graph of beta nodes.
//!
//! A [`Network`] is a compiled topology plus the incremental state of every
//! node in it. Fact mutations enter through the alpha stage and travel as
//! [`Delta`]s along the graph edges:
//!
//! - **Alpha** and **group-by** nodes emit element deltas into right inputs.
//! - **Join**, **not/exists** and **filter** nodes emit token deltas into
//!   left inputs.
//! - **Terminal** nodes turn token deltas into agenda changes.
//!
//! Propagation is synchronous and depth-first: a node updates its own state
//! before forwarding anything, so no successor ever sees a delta ahead of
//! the state change that produced it. A token is freed by the node that
//! created it once its retraction has reached every successor.
//!
//! The wiring lives in a `petgraph` graph whose node weights carry the node
//! state; edge weights record which input of the target an edge feeds.

pub mod alpha;
pub mod builder;
pub mod condition;
pub mod filter;
pub mod group;
pub mod join;
pub mod memory;
pub mod not;

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;

use petgraph::dot::Dot;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;

use crate::agenda::Agenda;
use crate::error::{NetworkError, NetworkResult};
use crate::fact::Fact;
use crate::rule::{Rule, RuleId};
use crate::store::FactStore;
use crate::token::{Element, Resolver, TokenArena, TokenId};

use alpha::{AlphaIndex, AlphaNode};
use filter::FilterNode;
use group::{GroupByNode, GroupTable};
use join::JoinNode;
use not::NotNode;

pub use builder::NetworkBuilder;
pub use condition::JoinCondition;
pub use not::Quantifier;

/// Handle of a node in the network graph.
pub type NodeId = NodeIndex;

/// A change travelling along one edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delta<T> {
    Assert(T),
    Modify(T),
    Retract(T),
}

impl<T: Copy> Delta<T> {
    /// The token or element the delta is about.
    pub fn item(&self) -> T {
        match self {
            Delta::Assert(t) | Delta::Modify(t) | Delta::Retract(t) => *t,
        }
    }
}

pub type TokenDelta = Delta<TokenId>;
pub type ElementDelta = Delta<Element>;

/// Which input of the target node an edge feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Input {
    Left,
    Right,
}

impl std::fmt::Display for Input {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Input::Left => f.write_str("left"),
            Input::Right => f.write_str("right"),
        }
    }
}

/// Final node of a rule.
#[derive(Debug, Clone)]
pub struct TerminalNode {
    pub rule: RuleId,
}

#[derive(Debug)]
pub(crate) enum Node {
    /// Source of the empty token.
    Root,
    Alpha(AlphaNode),
    Join(JoinNode),
    Not(NotNode),
    GroupBy(GroupByNode),
    Filter(FilterNode),
    Terminal(TerminalNode),
}

impl Node {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Node::Root => "root",
            Node::Alpha(_) => "alpha",
            Node::Join(_) => "join",
            Node::Not(n) if n.quantifier() == Quantifier::Exists => "exists",
            Node::Not(_) => "not",
            Node::GroupBy(_) => "group-by",
            Node::Filter(_) => "filter",
            Node::Terminal(_) => "terminal",
        }
    }

    /// The same node with empty memories.
    pub(crate) fn blank(&self) -> Node {
        match self {
            Node::Root => Node::Root,
            Node::Alpha(n) => Node::Alpha(n.blank()),
            Node::Join(n) => Node::Join(n.blank()),
            Node::Not(n) => Node::Not(n.blank()),
            Node::GroupBy(n) => Node::GroupBy(n.blank()),
            Node::Filter(n) => Node::Filter(n.blank()),
            Node::Terminal(t) => Node::Terminal(t.clone()),
        }
    }

    /// Whether the node emits token deltas (and so may feed left inputs).
    pub(crate) fn emits_tokens(&self) -> bool {
        matches!(
            self,
            Node::Root | Node::Join(_) | Node::Not(_) | Node::Filter(_)
        )
    }

    /// Whether the node emits element deltas (and so may feed right inputs).
    pub(crate) fn emits_elements(&self) -> bool {
        matches!(self, Node::Alpha(_) | Node::GroupBy(_))
    }
}

/// Borrowed state a beta node needs while handling one delta.
pub(crate) struct Env<'a> {
    pub store: &'a FactStore,
    pub groups: &'a GroupTable,
    pub tokens: &'a mut TokenArena,
}

impl<'a> Env<'a> {
    fn new(store: &'a FactStore, groups: &'a GroupTable, tokens: &'a mut TokenArena) -> Self {
        Self {
            store,
            groups,
            tokens,
        }
    }

    pub fn resolver(&self) -> Resolver<'_> {
        Resolver {
            store: self.store,
            groups: self.groups,
            tokens: &*self.tokens,
        }
    }
}

/// Where a propagation reads facts from and writes activations to.
pub(crate) struct Propagation<'a> {
    pub store: &'a FactStore,
    pub agenda: &'a mut Agenda,
}

enum Output {
    Tokens(Vec<TokenDelta>),
    Elements(Vec<ElementDelta>),
}

/// Memory sizes of one node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStats {
    pub node: usize,
    pub kind: &'static str,
    /// Left memory size, or alpha memory size.
    pub left: usize,
    /// Right memory size, or member count for group-by nodes.
    pub right: usize,
    /// Tokens, groups or passing tokens currently produced.
    pub output: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkStats {
    pub nodes: Vec<NodeStats>,
    /// Live tokens, the root token included.
    pub live_tokens: usize,
    pub live_groups: usize,
}

/// A compiled network together with the incremental state of its nodes.
///
/// Cloning copies the compiled topology only: the clone starts with empty
/// memories, no tokens but the root and no groups, whatever state the
/// original has accumulated. This is how independent sessions share rules.
#[derive(Debug)]
pub struct Network {
    graph: DiGraph<Node, Input>,
    root: NodeId,
    /// Outgoing edges per node, in wiring order.
    successors: Vec<Vec<(NodeId, Input)>>,
    alpha: AlphaIndex,
    tokens: TokenArena,
    groups: GroupTable,
    rules: Vec<Arc<Rule>>,
    primed: bool,
}

impl Network {
    pub(crate) fn from_parts(
        graph: DiGraph<Node, Input>,
        root: NodeId,
        alpha: AlphaIndex,
        rules: Vec<Arc<Rule>>,
    ) -> Self {
        let mut successors = vec![Vec::new(); graph.node_count()];
        // Edge indices grow with insertion, so this keeps wiring order.
        for edge in graph.edge_indices() {
            if let Some((source, target)) = graph.edge_endpoints(edge) {
                successors[source.index()].push((target, graph[edge]));
            }
        }
        Self {
            graph,
            root,
            successors,
            alpha,
            tokens: TokenArena::new(),
            groups: GroupTable::new(),
            rules,
            primed: false,
        }
    }

    pub fn is_primed(&self) -> bool {
        self.primed
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn rules(&self) -> &[Arc<Rule>] {
        &self.rules
    }

    pub fn rule(&self, id: RuleId) -> Option<&Arc<Rule>> {
        self.rules.get(id.index())
    }

    pub fn alpha_index(&self) -> &AlphaIndex {
        &self.alpha
    }

    /// Resolve tokens of this network against a fact store.
    pub fn resolver<'a>(&'a self, store: &'a FactStore) -> Resolver<'a> {
        Resolver {
            store,
            groups: &self.groups,
            tokens: &self.tokens,
        }
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Deliver the root token to every node fed by the root.
    ///
    /// Happens once per network, when the first session adopts it; rules that
    /// start with a negation can be active before any fact exists.
    pub(crate) fn prime(&mut self, cx: &mut Propagation<'_>) -> NetworkResult<()> {
        if self.primed {
            return Ok(());
        }
        self.primed = true;
        self.forward_tokens(self.root, vec![Delta::Assert(TokenId::ROOT)], cx)
    }

    pub(crate) fn assert_fact(&mut self, fact: &Fact, cx: &mut Propagation<'_>) -> NetworkResult<()> {
        for alpha in self.alpha.nodes_for(&fact.fact_type).to_vec() {
            let delta = match &mut self.graph[alpha] {
                Node::Alpha(node) => node.on_assert(alpha, fact)?,
                other => return Err(not_alpha(alpha, other)),
            };
            if let Some(delta) = delta {
                self.forward_elements(alpha, vec![delta], cx)?;
            }
        }
        Ok(())
    }

    /// Propagate a fact whose stored version has already been replaced.
    pub(crate) fn modify_fact(&mut self, fact: &Fact, cx: &mut Propagation<'_>) -> NetworkResult<()> {
        for alpha in self.alpha.nodes_for(&fact.fact_type).to_vec() {
            let delta = match &mut self.graph[alpha] {
                Node::Alpha(node) => node.on_modify(fact),
                other => return Err(not_alpha(alpha, other)),
            };
            if let Some(delta) = delta {
                self.forward_elements(alpha, vec![delta], cx)?;
            }
        }
        Ok(())
    }

    /// Propagate the removal of a fact that is still present in the store.
    pub(crate) fn retract_fact(&mut self, fact: &Fact, cx: &mut Propagation<'_>) -> NetworkResult<()> {
        for alpha in self.alpha.nodes_for(&fact.fact_type).to_vec() {
            let delta = match &mut self.graph[alpha] {
                Node::Alpha(node) => node.on_retract(fact),
                other => return Err(not_alpha(alpha, other)),
            };
            if let Some(delta) = delta {
                self.forward_elements(alpha, vec![delta], cx)?;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    fn forward_tokens(
        &mut self,
        from: NodeId,
        deltas: Vec<TokenDelta>,
        cx: &mut Propagation<'_>,
    ) -> NetworkResult<()> {
        for delta in deltas {
            for i in 0..self.successors[from.index()].len() {
                let (target, input) = self.successors[from.index()][i];
                if input != Input::Left {
                    return Err(NetworkError::InvalidWiring {
                        message: format!("node {} sends tokens into a right input", from.index()),
                    });
                }
                self.activate_left(target, delta, cx)?;
            }
            if let Delta::Retract(token) = delta {
                if self.tokens.owner(token) == Some(from) {
                    self.tokens.free(token);
                }
            }
        }
        Ok(())
    }

    fn forward_elements(
        &mut self,
        from: NodeId,
        deltas: Vec<ElementDelta>,
        cx: &mut Propagation<'_>,
    ) -> NetworkResult<()> {
        for delta in deltas {
            for i in 0..self.successors[from.index()].len() {
                let (target, input) = self.successors[from.index()][i];
                if input != Input::Right {
                    return Err(NetworkError::InvalidWiring {
                        message: format!("node {} sends elements into a left input", from.index()),
                    });
                }
                self.activate_right(target, delta, cx)?;
            }
            if let Delta::Retract(Element::Group(group)) = delta {
                self.groups.remove(group);
            }
        }
        Ok(())
    }

    fn activate_left(
        &mut self,
        target: NodeId,
        delta: TokenDelta,
        cx: &mut Propagation<'_>,
    ) -> NetworkResult<()> {
        let Network {
            graph,
            tokens,
            groups,
            ..
        } = &mut *self;
        let node = &mut graph[target];
        tracing::trace!(node = target.index(), kind = node.kind(), ?delta, "left activation");
        let out = match node {
            Node::Join(node) => {
                node.left_activate(target, delta, &mut Env::new(cx.store, groups, tokens))?
            }
            Node::Not(node) => {
                node.left_activate(target, delta, &mut Env::new(cx.store, groups, tokens))?
            }
            Node::Filter(node) => node.activate(target, delta, &Env::new(cx.store, groups, tokens))?,
            Node::Terminal(node) => return cx.agenda.apply(target, node.rule, delta),
            other => {
                return Err(NetworkError::InvalidWiring {
                    message: format!("{} node {} has no left input", other.kind(), target.index()),
                });
            }
        };
        self.forward_tokens(target, out, cx)
    }

    fn activate_right(
        &mut self,
        target: NodeId,
        delta: ElementDelta,
        cx: &mut Propagation<'_>,
    ) -> NetworkResult<()> {
        let Network {
            graph,
            tokens,
            groups,
            ..
        } = &mut *self;
        let node = &mut graph[target];
        tracing::trace!(node = target.index(), kind = node.kind(), ?delta, "right activation");
        let out = match node {
            Node::Join(node) => Output::Tokens(node.right_activate(
                target,
                delta,
                &mut Env::new(cx.store, groups, tokens),
            )?),
            Node::Not(node) => Output::Tokens(node.right_activate(
                target,
                delta,
                &mut Env::new(cx.store, groups, tokens),
            )?),
            Node::GroupBy(node) => Output::Elements(node.activate(target, delta, cx.store, groups)?),
            other => {
                return Err(NetworkError::InvalidWiring {
                    message: format!("{} node {} has no right input", other.kind(), target.index()),
                });
            }
        };
        match out {
            Output::Tokens(deltas) => self.forward_tokens(target, deltas, cx),
            Output::Elements(deltas) => self.forward_elements(target, deltas, cx),
        }
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    pub fn stats(&self) -> NetworkStats {
        let nodes = self
            .graph
            .node_indices()
            .map(|id| {
                let node = &self.graph[id];
                let (left, right, output) = match node {
                    Node::Root => (1, 0, 1),
                    Node::Alpha(n) => (n.len(), 0, n.len()),
                    Node::Join(n) => (n.left_len(), n.right_len(), n.child_count()),
                    Node::Not(n) => (n.left_len(), n.right_len(), n.visible_count()),
                    Node::GroupBy(n) => (0, n.member_count(), n.group_count()),
                    Node::Filter(n) => (n.seen_count(), 0, n.passing_count()),
                    Node::Terminal(_) => (0, 0, 0),
                };
                NodeStats {
                    node: id.index(),
                    kind: node.kind(),
                    left,
                    right,
                    output,
                }
            })
            .collect();
        NetworkStats {
            nodes,
            live_tokens: self.tokens.live(),
            live_groups: self.groups.len(),
        }
    }

    /// Render the topology in Graphviz DOT format.
    pub fn to_dot(&self) -> String {
        let labelled = self.graph.map(
            |id, node| match node {
                Node::Alpha(n) => format!("#{} alpha {}", id.index(), n.fact_type()),
                Node::Terminal(t) => {
                    let name = self.rule(t.rule).map_or("?", |r| r.name());
                    format!("#{} terminal {}", id.index(), name)
                }
                other => format!("#{} {}", id.index(), other.kind()),
            },
            |_, input| *input,
        );
        format!("{}", Dot::new(&labelled))
    }
}

impl Clone for Network {
    fn clone(&self) -> Self {
        let graph = self.graph.map(|_, node| node.blank(), |_, input| *input);
        Self::from_parts(graph, self.root, self.alpha.clone(), self.rules.clone())
    }
}

pub(crate) fn invariant(node: NodeId, message: String) -> NetworkError {
    NetworkError::InvariantViolation {
        node: node.index(),
        message,
    }
}

fn not_alpha(id: NodeId, node: &Node) -> NetworkError {
    NetworkError::InvalidWiring {
        message: format!("alpha index points at {} node {}", node.kind(), id.index()),
    }
}

/// Split `old` and `new` into (only in old, in both, only in new), keeping
/// the order of the list each item is taken from.
pub(crate) fn partition<T: Copy + Eq + Hash>(old: &[T], new: &[T]) -> (Vec<T>, Vec<T>, Vec<T>) {
    let in_old: HashSet<T> = old.iter().copied().collect();
    let in_new: HashSet<T> = new.iter().copied().collect();
    let gone = old.iter().filter(|x| !in_new.contains(x)).copied().collect();
    let kept = old.iter().filter(|x| in_new.contains(x)).copied().collect();
    let added = new.iter().filter(|x| !in_old.contains(x)).copied().collect();
    (gone, kept, added)
}

/// Scaffolding for driving single nodes by hand in unit tests.
#[cfg(test)]
pub(crate) mod fixture {
    use super::*;
    use crate::fact::{FactId, Value};

    pub const KEY: &str = "key";

    pub fn node() -> NodeId {
        NodeId::new(1)
    }

    pub fn id(raw: u64) -> FactId {
        FactId::new(raw).unwrap()
    }

    /// Tokens and elements match when their first fact agrees on `KEY`.
    pub fn same_key() -> JoinCondition {
        JoinCondition::equal(
            |t| t.fact(0).map_or(Value::Null, |f| f.get(KEY).clone()),
            |e| e.as_fact().map_or(Value::Null, |f| f.get(KEY).clone()),
        )
    }

    /// A fact store, group table and token arena a node can run against.
    pub struct Fixture {
        pub store: FactStore,
        pub groups: GroupTable,
        pub tokens: TokenArena,
    }

    impl Fixture {
        pub fn new() -> Self {
            Self {
                store: FactStore::new(),
                groups: GroupTable::new(),
                tokens: TokenArena::new(),
            }
        }

        /// Store a `Thing` fact with the given key.
        pub fn fact(&mut self, raw: u64, key: &str) -> Element {
            self.store
                .insert(Fact::new(id(raw), "Thing").with(KEY, key))
                .unwrap();
            Element::Fact(id(raw))
        }

        /// Replace the key of a stored fact.
        pub fn rekey(&mut self, raw: u64, key: &str) {
            self.store
                .replace(Fact::new(id(raw), "Thing").with(KEY, key))
                .unwrap();
        }

        /// Store a fact and wrap it in a one-element token.
        pub fn token(&mut self, raw: u64, key: &str) -> TokenId {
            let element = self.fact(raw, key);
            self.tokens.extend(TokenId::ROOT, element, NodeId::new(0))
        }

        pub fn env(&mut self) -> Env<'_> {
            Env::new(&self.store, &self.groups, &mut self.tokens)
        }

        /// Last element bound by a token.
        pub fn last(&self, token: TokenId) -> Option<Element> {
            self.tokens.elements(token).last().copied()
        }
    }
}
