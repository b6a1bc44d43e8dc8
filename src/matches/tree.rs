//! Arena-based match tree built from a trial's match expression.
//!
//! The tree is rebuilt for every evaluation and never persisted; node ids are
//! unique per build (the counter lives in the builder, keeping construction
//! reentrant).

use indexmap::IndexMap;
use strum_macros::Display;

use crate::matches::schema::MatchExpr;

/// Kind of one tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum NodeKind {
    And,
    Or,
    Genomic,
    Clinical,
}

/// One node in the arena.
#[derive(Debug, Clone)]
pub struct Node {
    /// Unique id within this tree.
    pub node_id: u32,
    /// Aggregation or leaf kind.
    pub kind: NodeKind,
    /// Criteria map; present on leaves only.
    pub criteria: Option<IndexMap<String, serde_json::Value>>,
    /// Arena index of the parent, `None` for the root.
    pub parent: Option<usize>,
    /// Arena indices of the children, in expression order.
    pub children: Vec<usize>,
}

impl Node {
    /// Whether this node is a leaf (carries criteria).
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Genomic | NodeKind::Clinical)
    }
}

/// The parsed, traversable form of a match expression.
#[derive(Debug, Clone)]
pub struct MatchTree {
    nodes: Vec<Node>,
    root: usize,
}

impl MatchTree {
    /// Build a tree from a match expression via breadth-first expansion.
    ///
    /// Every `and`/`or` list entry becomes a child node; leaf criteria maps
    /// attach directly.  Mixed leaf/aggregate entries in one list and
    /// nested `and`/`or` children are all preserved.
    pub fn build(expr: &MatchExpr) -> Self {
        let mut nodes = Vec::new();
        let mut next_id = 0u32;

        let root = push_node(&mut nodes, &mut next_id, expr, None);
        let mut queue = std::collections::VecDeque::from([(root, expr)]);
        while let Some((idx, expr)) = queue.pop_front() {
            let children = match expr {
                MatchExpr::And(children) | MatchExpr::Or(children) => children,
                MatchExpr::Genomic(_) | MatchExpr::Clinical(_) => continue,
            };
            for child in children {
                let child_idx = push_node(&mut nodes, &mut next_id, child, Some(idx));
                nodes[idx].children.push(child_idx);
                queue.push_back((child_idx, child));
            }
        }

        Self { nodes, root }
    }

    /// Arena index of the root node.
    pub fn root(&self) -> usize {
        self.root
    }

    /// All nodes in arena order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Access one node by arena index.
    pub fn node(&self, idx: usize) -> &Node {
        &self.nodes[idx]
    }

    /// Number of leaf nodes.
    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|node| node.is_leaf()).count()
    }

    /// Arena indices in post-order (children before parents); evaluating in
    /// this order guarantees child results are available at each aggregate.
    pub fn post_order(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(self.root, false)];
        while let Some((idx, expanded)) = stack.pop() {
            if expanded {
                order.push(idx);
            } else {
                stack.push((idx, true));
                for &child in self.nodes[idx].children.iter().rev() {
                    stack.push((child, false));
                }
            }
        }
        order
    }
}

fn push_node(
    nodes: &mut Vec<Node>,
    next_id: &mut u32,
    expr: &MatchExpr,
    parent: Option<usize>,
) -> usize {
    let (kind, criteria) = match expr {
        MatchExpr::And(_) => (NodeKind::And, None),
        MatchExpr::Or(_) => (NodeKind::Or, None),
        MatchExpr::Genomic(criteria) => (NodeKind::Genomic, Some(criteria.clone())),
        MatchExpr::Clinical(criteria) => (NodeKind::Clinical, Some(criteria.clone())),
    };
    let node_id = *next_id;
    *next_id += 1;
    nodes.push(Node {
        node_id,
        kind,
        criteria,
        parent,
        children: Vec::new(),
    });
    nodes.len() - 1
}
