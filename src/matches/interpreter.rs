//! Post-order evaluation of a match tree against the patient record store.
//!
//! Leaves execute translated queries; `and` nodes intersect and `or` nodes
//! union the resulting sample id sets.  Alongside the sets, per-sample
//! explanatory genomic match records are collected so that every match can be
//! shown with the alteration that produced it.

use std::collections::BTreeSet;

use indexmap::IndexMap;

use crate::matches::schema::{GenomicRecord, MatchType, CATEGORY_SIGNATURE, CATEGORY_SV};
use crate::matches::store::PatientStore;
use crate::matches::translate::{strip_negation, TranslatedLeaf, Translator};
use crate::matches::tree::{MatchTree, NodeKind};
use crate::matches::EngineError;

/// One per-sample explanation of why a genomic leaf matched.
///
/// Field names mirror the record vocabulary, lower-cased for output.
#[derive(Debug, Clone, PartialEq)]
pub struct GenomicMatch {
    /// Sample the explanation belongs to.
    pub sample_id: String,
    /// Clinical id; present for record-backed matches, resolved from the
    /// sample index by the assembler otherwise.
    pub clinical_id: Option<String>,
    /// Matched genomic record id; `None` for negative matches, which by
    /// definition have no single record to point at.
    pub genomic_id: Option<String>,
    /// Variant-level vs gene-level match.
    pub match_type: MatchType,
    /// Human-readable alteration description; `!`-prefixed for negative
    /// matches.
    pub genomic_alteration: String,
    pub true_hugo_symbol: Option<String>,
    pub true_protein_change: Option<String>,
    pub true_variant_classification: Option<String>,
    pub variant_category: Option<String>,
    pub cnv_call: Option<String>,
    pub mmr_status: Option<String>,
    pub tier: Option<i64>,
    pub wildtype: Option<bool>,
    pub allele_fraction: Option<f64>,
}

/// Result of evaluating one match tree.
#[derive(Debug, Clone, Default)]
pub struct EvalOutcome {
    /// Sample ids matched by the root expression.
    pub sample_ids: BTreeSet<String>,
    /// Genomic explanations per matched sample, aggregated across all
    /// contributing leaves.
    pub genomic_by_sample: IndexMap<String, Vec<GenomicMatch>>,
}

/// Per-node evaluation state.
#[derive(Debug, Clone, Default)]
struct NodeOutcome {
    sample_ids: BTreeSet<String>,
    genomic_info: Vec<GenomicMatch>,
}

/// Evaluates match trees against one store using one translator.
pub struct TreeEvaluator<'a> {
    translator: &'a Translator<'a>,
    store: &'a dyn PatientStore,
}

impl<'a> TreeEvaluator<'a> {
    /// Construct with the given translator and store.
    pub fn new(translator: &'a Translator<'a>, store: &'a dyn PatientStore) -> Self {
        Self { translator, store }
    }

    /// Evaluate the tree, returning the root's sample set and the aggregated
    /// per-sample genomic explanations.
    pub fn evaluate(&self, tree: &MatchTree) -> Result<EvalOutcome, anyhow::Error> {
        let mut outcomes: Vec<Option<NodeOutcome>> = vec![None; tree.nodes().len()];

        for idx in tree.post_order() {
            let node = tree.node(idx);
            let outcome = match node.kind {
                NodeKind::Genomic => self.eval_genomic(node.criteria.as_ref().ok_or_else(
                    || EngineError::MalformedExpression("genomic node without criteria".into()),
                )?)?,
                NodeKind::Clinical => self.eval_clinical(node.criteria.as_ref().ok_or_else(
                    || EngineError::MalformedExpression("clinical node without criteria".into()),
                )?)?,
                NodeKind::And | NodeKind::Or => {
                    combine(node.kind, &node.children, &mut outcomes)
                }
            };
            tracing::trace!(
                "node {} ({}) matched {} samples",
                node.node_id,
                node.kind,
                outcome.sample_ids.len()
            );
            outcomes[idx] = Some(outcome);
        }

        let root = outcomes[tree.root()]
            .take()
            .expect("root evaluated in post-order");

        let mut genomic_by_sample: IndexMap<String, Vec<GenomicMatch>> = IndexMap::new();
        for info in root.genomic_info {
            if root.sample_ids.contains(&info.sample_id) {
                genomic_by_sample
                    .entry(info.sample_id.clone())
                    .or_default()
                    .push(info);
            }
        }

        Ok(EvalOutcome {
            sample_ids: root.sample_ids,
            genomic_by_sample,
        })
    }

    fn eval_genomic(
        &self,
        criteria: &IndexMap<String, serde_json::Value>,
    ) -> Result<NodeOutcome, anyhow::Error> {
        let leaf = self.translator.translate_genomic(criteria)?;
        let records = self
            .store
            .find_genomic(&leaf.query)
            .map_err(|e| EngineError::StoreQuery(e.to_string()))?;
        let positive: BTreeSet<String> =
            records.iter().map(|r| r.sample_id.clone()).collect();

        if leaf.negated {
            // Run the positive form and subtract from the universe of known
            // samples; the explanation is synthesized from the criteria since
            // there is no record describing what a patient does not have.
            let sample_ids: BTreeSet<String> = self
                .store
                .distinct_sample_ids()
                .map_err(|e| EngineError::StoreQuery(e.to_string()))?
                .difference(&positive)
                .cloned()
                .collect();
            let genomic_info = sample_ids
                .iter()
                .map(|sample_id| negative_match(sample_id, criteria, &leaf))
                .collect();
            Ok(NodeOutcome {
                sample_ids,
                genomic_info,
            })
        } else {
            let genomic_info = records
                .iter()
                .map(|record| positive_match(record, &leaf))
                .collect();
            Ok(NodeOutcome {
                sample_ids: positive,
                genomic_info,
            })
        }
    }

    fn eval_clinical(
        &self,
        criteria: &IndexMap<String, serde_json::Value>,
    ) -> Result<NodeOutcome, anyhow::Error> {
        let leaf = self.translator.translate_clinical(criteria)?;
        let records = self
            .store
            .find_clinical(&leaf.query)
            .map_err(|e| EngineError::StoreQuery(e.to_string()))?;
        Ok(NodeOutcome {
            sample_ids: records.into_iter().map(|r| r.sample_id).collect(),
            genomic_info: Vec::new(),
        })
    }
}

/// Aggregate child outcomes by intersection (`and`) or union (`or`).
fn combine(
    kind: NodeKind,
    children: &[usize],
    outcomes: &mut [Option<NodeOutcome>],
) -> NodeOutcome {
    let mut sample_ids: Option<BTreeSet<String>> = None;
    let mut genomic_info = Vec::new();

    for &child in children {
        let child_outcome = outcomes[child]
            .take()
            .expect("children evaluated before parents in post-order");
        sample_ids = Some(match (sample_ids, kind) {
            (None, _) => child_outcome.sample_ids,
            (Some(acc), NodeKind::And) => acc
                .intersection(&child_outcome.sample_ids)
                .cloned()
                .collect(),
            (Some(acc), _) => acc.union(&child_outcome.sample_ids).cloned().collect(),
        });
        genomic_info.extend(child_outcome.genomic_info);
    }

    let sample_ids = sample_ids.unwrap_or_default();
    genomic_info.retain(|info| sample_ids.contains(&info.sample_id));
    NodeOutcome {
        sample_ids,
        genomic_info,
    }
}

/// Build the explanation for one matched genomic record.
fn positive_match(record: &GenomicRecord, leaf: &TranslatedLeaf) -> GenomicMatch {
    let match_type = if leaf.variant_level {
        MatchType::Variant
    } else {
        MatchType::Gene
    };
    GenomicMatch {
        sample_id: record.sample_id.clone(),
        clinical_id: Some(record.clinical_id.clone()),
        genomic_id: Some(record.genomic_id.clone()),
        match_type,
        genomic_alteration: format_genomic_alteration(record),
        true_hugo_symbol: record.true_hugo_symbol.clone(),
        true_protein_change: record.true_protein_change.clone(),
        true_variant_classification: record.true_variant_classification.clone(),
        variant_category: record.variant_category.clone(),
        cnv_call: record.cnv_call.clone(),
        mmr_status: record.mmr_status.clone(),
        tier: record.tier,
        wildtype: record.wildtype,
        allele_fraction: record.allele_fraction,
    }
}

/// Synthesize the explanation for a negative leaf from its criteria.
fn negative_match(
    sample_id: &str,
    criteria: &IndexMap<String, serde_json::Value>,
    leaf: &TranslatedLeaf,
) -> GenomicMatch {
    let get = |key: &str| {
        criteria
            .get(key)
            .and_then(|v| v.as_str())
            .map(|v| strip_negation(v).1.to_owned())
    };
    let gene = get("hugo_symbol");
    let protein = get("protein_change").or_else(|| get("wildcard_protein_change"));
    let cnv = get("cnv_call");

    let mut alteration = String::from("!");
    if let Some(gene) = &gene {
        alteration.push_str(gene);
    }
    if let Some(protein) = &protein {
        alteration.push(' ');
        alteration.push_str(protein);
    } else if let Some(cnv) = &cnv {
        alteration.push(' ');
        alteration.push_str(cnv);
    }

    GenomicMatch {
        sample_id: sample_id.to_owned(),
        clinical_id: None,
        genomic_id: None,
        match_type: if leaf.variant_level {
            MatchType::Variant
        } else {
            MatchType::Gene
        },
        genomic_alteration: alteration,
        true_hugo_symbol: gene,
        true_protein_change: protein,
        true_variant_classification: None,
        variant_category: None,
        cnv_call: cnv,
        mmr_status: None,
        tier: None,
        wildtype: None,
        allele_fraction: None,
    }
}

/// Human-readable description of a matched genomic record.
fn format_genomic_alteration(record: &GenomicRecord) -> String {
    if let Some(mmr) = &record.mmr_status {
        if record.variant_category.as_deref() == Some(CATEGORY_SIGNATURE)
            || record.true_hugo_symbol.is_none()
        {
            return mmr.clone();
        }
    }

    let mut alteration = record.true_hugo_symbol.clone().unwrap_or_default();
    if let Some(protein) = &record.true_protein_change {
        if !alteration.is_empty() {
            alteration.push(' ');
        }
        alteration.push_str(protein);
    } else if let Some(cnv) = &record.cnv_call {
        if !alteration.is_empty() {
            alteration.push(' ');
        }
        alteration.push_str(cnv);
    } else if record.variant_category.as_deref() == Some(CATEGORY_SV) {
        if !alteration.is_empty() {
            alteration.push(' ');
        }
        alteration.push_str("Structural Variation");
    }

    if record.wildtype == Some(true) {
        alteration = format!("wt {}", alteration);
    }
    alteration
}
