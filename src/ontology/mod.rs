//! Tumor type ontology (OncoTree-style hierarchy) and diagnosis expansion.
//!
//! Trials phrase diagnosis criteria in terms of ontology labels; patient
//! records carry concrete leaf diagnoses.  Matching therefore needs to expand
//! a label into itself plus all of its descendants, and to resolve the two
//! reserved "all solid" / "all liquid" tokens into subtree unions resp.
//! complements.

use std::collections::BTreeSet;
use std::io::Read;

use serde::{Deserialize, Serialize};

/// Reserved token for "all solid tumors" in trial tumor type criteria.
pub const TOKEN_ALL_SOLID: &str = "_SOLID_";
/// Reserved token for "all liquid tumors" in trial tumor type criteria.
pub const TOKEN_ALL_LIQUID: &str = "_LIQUID_";

/// The subtree roots that together make up the "liquid" tumor types.
const LIQUID_ROOTS: &[&str] = &["Lymph", "Blood"];

/// One node in the tumor type hierarchy.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OncoTreeNode {
    /// Ontology code, e.g. `MEL`.
    pub code: String,
    /// Human-readable label, e.g. `Melanoma`; this is what patient records
    /// carry in their diagnosis field.
    pub text: String,
    /// Child nodes.
    #[serde(default)]
    pub children: Vec<OncoTreeNode>,
}

/// Result of resolving one diagnosis criterion value.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosisExpansion {
    /// The expanded set of labels to match records against.
    pub labels: Vec<String>,
    /// Whether the criterion was negated (`!label`); negated expansions are
    /// applied as exclusion (`not in`) rather than inclusion queries.
    pub negated: bool,
}

/// The loaded tumor type hierarchy.
#[derive(Debug, Clone, Default)]
pub struct OncoTree {
    roots: Vec<OncoTreeNode>,
}

impl OncoTree {
    /// Construct from already-parsed root nodes.
    pub fn new(roots: Vec<OncoTreeNode>) -> Self {
        Self { roots }
    }

    /// Load the hierarchy from a JSON array of root nodes.
    pub fn from_json_reader(reader: impl Read) -> Result<Self, anyhow::Error> {
        let roots: Vec<OncoTreeNode> = serde_json::from_reader(reader)?;
        Ok(Self::new(roots))
    }

    /// All labels in the hierarchy.
    pub fn all_labels(&self) -> BTreeSet<String> {
        let mut result = BTreeSet::new();
        for root in &self.roots {
            collect_labels(root, &mut result);
        }
        result
    }

    /// Expand a label into itself plus all descendant labels.
    ///
    /// An unknown label expands to the empty set; this is a curation data
    /// quality signal (ontology drift), not a system fault, so it is logged
    /// as a warning instead of failing the segment.
    pub fn expand(&self, label: &str) -> Vec<String> {
        for root in &self.roots {
            if let Some(node) = find_node(root, label) {
                let mut result = BTreeSet::new();
                collect_labels(node, &mut result);
                return result.into_iter().collect();
            }
        }
        tracing::warn!("unknown ontology label {:?}, expanding to nothing", label);
        Vec::new()
    }

    /// Union of the "Lymph" and "Blood" subtrees.
    pub fn liquid_labels(&self) -> BTreeSet<String> {
        let mut result = BTreeSet::new();
        for root_label in LIQUID_ROOTS {
            for root in &self.roots {
                if let Some(node) = find_node(root, root_label) {
                    collect_labels(node, &mut result);
                }
            }
        }
        result
    }

    /// Complement of the liquid subtrees over the whole hierarchy.
    pub fn solid_labels(&self) -> BTreeSet<String> {
        let liquid = self.liquid_labels();
        self.all_labels()
            .into_iter()
            .filter(|label| !liquid.contains(label))
            .collect()
    }

    /// Resolve one diagnosis criterion value (possibly `!`-negated, possibly
    /// one of the reserved tokens) into its expansion.
    pub fn resolve(&self, value: &str) -> DiagnosisExpansion {
        let (negated, label) = match value.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, value),
        };

        let labels = match label {
            TOKEN_ALL_LIQUID => self.liquid_labels().into_iter().collect(),
            TOKEN_ALL_SOLID => self.solid_labels().into_iter().collect(),
            _ => self.expand(label),
        };

        DiagnosisExpansion { labels, negated }
    }
}

fn find_node<'a>(node: &'a OncoTreeNode, label: &str) -> Option<&'a OncoTreeNode> {
    if node.text == label {
        return Some(node);
    }
    node.children
        .iter()
        .find_map(|child| find_node(child, label))
}

fn collect_labels(node: &OncoTreeNode, out: &mut BTreeSet<String>) {
    out.insert(node.text.clone());
    for child in &node.children {
        collect_labels(child, out);
    }
}
