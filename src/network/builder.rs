//! Construction of a [`Network`] from nodes and wiring.
//!
//! Compiling rule definitions into a topology happens outside this crate;
//! the builder is the boundary it targets. Each method adds one node, wires
//! it to its inputs, and checks that the inputs can feed it.

use std::sync::Arc;

use petgraph::graph::DiGraph;

use crate::error::{NetworkError, NetworkResult};
use crate::fact::{Fact, FactType, Value};
use crate::rule::{Rule, RuleId};
use crate::token::Tuple;

use super::alpha::{AlphaIndex, AlphaNode};
use super::condition::JoinCondition;
use super::filter::FilterNode;
use super::group::GroupByNode;
use super::join::JoinNode;
use super::not::{NotNode, Quantifier};
use super::{Input, Network, Node, NodeId, TerminalNode};

pub struct NetworkBuilder {
    graph: DiGraph<Node, Input>,
    root: NodeId,
    alpha: AlphaIndex,
    rules: Vec<Arc<Rule>>,
}

impl NetworkBuilder {
    pub fn new() -> Self {
        let mut graph = DiGraph::new();
        let root = graph.add_node(Node::Root);
        Self {
            graph,
            root,
            alpha: AlphaIndex::new(),
            rules: Vec::new(),
        }
    }

    /// The source of the empty token; first patterns of a rule join against it.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Accept every fact of `fact_type`.
    pub fn alpha(&mut self, fact_type: impl Into<FactType>) -> NodeId {
        self.add_alpha(AlphaNode::new(fact_type.into(), None))
    }

    /// Accept facts of `fact_type` that satisfy `test`.
    pub fn alpha_where<F>(&mut self, fact_type: impl Into<FactType>, test: F) -> NodeId
    where
        F: Fn(&Fact) -> bool + Send + Sync + 'static,
    {
        self.add_alpha(AlphaNode::new(fact_type.into(), Some(Arc::new(test))))
    }

    fn add_alpha(&mut self, node: AlphaNode) -> NodeId {
        let fact_type = node.fact_type().clone();
        let id = self.graph.add_node(Node::Alpha(node));
        self.alpha.register(fact_type, id);
        id
    }

    /// Join tokens from `left` with elements from `right`.
    pub fn join(
        &mut self,
        left: NodeId,
        right: NodeId,
        condition: JoinCondition,
    ) -> NetworkResult<NodeId> {
        self.check_binary(left, right, &condition)?;
        Ok(self.add_binary(Node::Join(JoinNode::new(condition)), left, right))
    }

    /// Pass tokens from `left` while no element from `right` matches them.
    pub fn not(
        &mut self,
        left: NodeId,
        right: NodeId,
        condition: JoinCondition,
    ) -> NetworkResult<NodeId> {
        self.check_binary(left, right, &condition)?;
        let node = Node::Not(NotNode::new(Quantifier::Not, condition));
        Ok(self.add_binary(node, left, right))
    }

    /// Pass tokens from `left` while at least one element from `right` matches them.
    pub fn exists(
        &mut self,
        left: NodeId,
        right: NodeId,
        condition: JoinCondition,
    ) -> NetworkResult<NodeId> {
        self.check_binary(left, right, &condition)?;
        let node = Node::Not(NotNode::new(Quantifier::Exists, condition));
        Ok(self.add_binary(node, left, right))
    }

    /// Group the facts passing alpha node `source` by `key`.
    pub fn group_by<F>(&mut self, source: NodeId, key: F) -> NetworkResult<NodeId>
    where
        F: Fn(&Fact) -> Value + Send + Sync + 'static,
    {
        match self.node(source)? {
            Node::Alpha(_) => {}
            other => {
                return Err(NetworkError::InvalidWiring {
                    message: format!(
                        "group-by input must be an alpha node, got {} node {}",
                        other.kind(),
                        source.index()
                    ),
                });
            }
        }
        let id = self
            .graph
            .add_node(Node::GroupBy(GroupByNode::new(Arc::new(key))));
        self.graph.add_edge(source, id, Input::Right);
        Ok(id)
    }

    /// Keep the tokens from `left` that satisfy `test`.
    pub fn filter<F>(&mut self, left: NodeId, test: F) -> NetworkResult<NodeId>
    where
        F: Fn(&Tuple<'_>) -> bool + Send + Sync + 'static,
    {
        self.check_left(left)?;
        let id = self
            .graph
            .add_node(Node::Filter(FilterNode::new(Arc::new(test))));
        self.graph.add_edge(left, id, Input::Left);
        Ok(id)
    }

    /// Close a rule: tokens reaching this node become activations of `rule`.
    pub fn terminal(&mut self, left: NodeId, rule: Rule) -> NetworkResult<RuleId> {
        self.check_left(left)?;
        let rule_id = RuleId::new(self.rules.len());
        self.rules.push(Arc::new(rule));
        let id = self
            .graph
            .add_node(Node::Terminal(TerminalNode { rule: rule_id }));
        self.graph.add_edge(left, id, Input::Left);
        Ok(rule_id)
    }

    pub fn build(self) -> Network {
        tracing::debug!(
            nodes = self.graph.node_count(),
            rules = self.rules.len(),
            "network built"
        );
        Network::from_parts(self.graph, self.root, self.alpha, self.rules)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    fn node(&self, id: NodeId) -> NetworkResult<&Node> {
        self.graph
            .node_weight(id)
            .ok_or(NetworkError::UnknownNode { node: id.index() })
    }

    fn check_left(&self, left: NodeId) -> NetworkResult<()> {
        let node = self.node(left)?;
        if !node.emits_tokens() {
            return Err(NetworkError::InvalidWiring {
                message: format!(
                    "{} node {} cannot feed a left input",
                    node.kind(),
                    left.index()
                ),
            });
        }
        Ok(())
    }

    fn check_binary(
        &self,
        left: NodeId,
        right: NodeId,
        condition: &JoinCondition,
    ) -> NetworkResult<()> {
        self.check_left(left)?;
        let node = self.node(right)?;
        if !node.emits_elements() {
            return Err(NetworkError::InvalidWiring {
                message: format!(
                    "{} node {} cannot feed a right input",
                    node.kind(),
                    right.index()
                ),
            });
        }
        if left == self.root && condition.is_indexed() {
            return Err(NetworkError::InvalidWiring {
                message: "the root token binds nothing to index on; use a test condition".into(),
            });
        }
        Ok(())
    }

    fn add_binary(&mut self, node: Node, left: NodeId, right: NodeId) -> NodeId {
        let id = self.graph.add_node(node);
        self.graph.add_edge(left, id, Input::Left);
        self.graph.add_edge(right, id, Input::Right);
        id
    }
}

impl Default for NetworkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::Rule;

    fn noop(name: &str) -> Rule {
        Rule::new(name, |_, _| Ok(()))
    }

    #[test]
    fn rejects_alpha_on_left() {
        let mut b = NetworkBuilder::new();
        let a = b.alpha("A");
        let c = b.alpha("B");
        let err = b.join(a, c, JoinCondition::always()).unwrap_err();
        assert!(matches!(err, NetworkError::InvalidWiring { .. }));
    }

    #[test]
    fn rejects_join_on_right() {
        let mut b = NetworkBuilder::new();
        let root = b.root();
        let a = b.alpha("A");
        let j = b.join(root, a, JoinCondition::always()).unwrap();
        let err = b.not(j, j, JoinCondition::always()).unwrap_err();
        assert!(matches!(err, NetworkError::InvalidWiring { .. }));
    }

    #[test]
    fn rejects_indexed_root_join() {
        let mut b = NetworkBuilder::new();
        let root = b.root();
        let a = b.alpha("A");
        let cond = JoinCondition::equal(|_| Value::Null, |_| Value::Null);
        assert!(b.join(root, a, cond).is_err());
    }

    #[test]
    fn group_by_requires_alpha_source() {
        let mut b = NetworkBuilder::new();
        let root = b.root();
        let a = b.alpha("A");
        let g = b.group_by(a, |f| f.get("k").clone()).unwrap();
        assert!(b.group_by(g, |_| Value::Null).is_err());
        assert!(b.group_by(root, |_| Value::Null).is_err());
    }

    #[test]
    fn terminals_register_rules_in_order() {
        let mut b = NetworkBuilder::new();
        let root = b.root();
        let a = b.alpha("A");
        let j = b.join(root, a, JoinCondition::always()).unwrap();
        let first = b.terminal(j, noop("first")).unwrap();
        let second = b.terminal(j, noop("second")).unwrap();
        let network = b.build();

        assert_eq!(first.index(), 0);
        assert_eq!(second.index(), 1);
        assert_eq!(network.rule(second).unwrap().name(), "second");
        assert!(network.to_dot().contains("terminal first"));
    }

    #[test]
    fn unknown_node_is_reported() {
        let mut b = NetworkBuilder::new();
        let err = b.filter(NodeId::new(42), |_| true).unwrap_err();
        assert!(matches!(err, NetworkError::UnknownNode { node: 42 }));
    }
}
