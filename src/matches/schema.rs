//! Supporting code for trial and patient record definition.

use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::matches::query::{FieldLookup, Value};
use crate::ontology::{TOKEN_ALL_LIQUID, TOKEN_ALL_SOLID};

/// Record-vocabulary value for the mutation variant category.
pub const CATEGORY_MUTATION: &str = "MUTATION";
/// Record-vocabulary value for the copy number variant category.
pub const CATEGORY_CNV: &str = "CNV";
/// Record-vocabulary value for the structural variant category.
pub const CATEGORY_SV: &str = "SV";
/// Record-vocabulary value for the mutational signature category.
pub const CATEGORY_SIGNATURE: &str = "SIGNATURE";

/// A nested match expression as embedded in trial documents.
///
/// Exactly one of the four keys is present per node object; serde's external
/// tagging enforces this at parse time, so a malformed node (zero or multiple
/// keys) is rejected before any evaluation starts.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum MatchExpr {
    /// All sub-expressions must match (set intersection).
    And(Vec<MatchExpr>),
    /// Any sub-expression must match (set union).
    Or(Vec<MatchExpr>),
    /// Leaf: genomic attribute constraints.
    Genomic(IndexMap<String, serde_json::Value>),
    /// Leaf: clinical attribute constraints.
    Clinical(IndexMap<String, serde_json::Value>),
}

/// The treatment segment level that carried a match expression.
#[derive(
    Serialize, Deserialize, Display, EnumString, PartialEq, Eq, Debug, Clone, Copy, Hash,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MatchLevel {
    Step,
    Arm,
    Dose,
}

/// Accrual status of a trial segment as seen by one match record.
#[derive(
    Serialize, Deserialize, Display, EnumString, PartialEq, Eq, Debug, Clone, Copy, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AccrualStatus {
    Open,
    #[default]
    Closed,
}

/// Whether a match was made on a specific variant or only on the gene.
#[derive(Serialize, Deserialize, Display, PartialEq, Eq, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MatchType {
    Variant,
    Gene,
}

/// Cancer type specificity of a trial relative to a matched sample.
#[derive(Serialize, Deserialize, Display, PartialEq, Eq, Debug, Clone, Copy, Default)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CancerTypeMatch {
    #[default]
    Specific,
    AllSolid,
    AllLiquid,
}

/// Patient vital status.
#[derive(Serialize, Deserialize, Display, PartialEq, Eq, Debug, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum VitalStatus {
    #[default]
    Alive,
    Deceased,
}

/// One clinical record, keyed by sample identifier.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ClinicalRecord {
    /// Sample identifier (one sequencing result).
    pub sample_id: String,
    /// Clinical identifier (one patient-encounter record).
    pub clinical_id: String,
    /// Medical record number.
    pub mrn: String,
    /// Diagnosis label from the tumor type ontology.
    pub oncotree_primary_diagnosis_name: String,
    /// Vital status; deceased patients never rank as showable.
    #[serde(default)]
    pub vital_status: VitalStatus,
    /// Birth date, target of `age_numerical` criteria.
    pub birth_date: NaiveDate,
    /// Patient gender, if recorded.
    #[serde(default)]
    pub gender: Option<String>,
    /// Ordering physician name.
    #[serde(default)]
    pub ord_physician_name: Option<String>,
    /// Ordering physician email.
    #[serde(default)]
    pub ord_physician_email: Option<String>,
    /// Date of the sequencing report.
    #[serde(default)]
    pub report_date: Option<NaiveDate>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

impl FieldLookup for ClinicalRecord {
    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "SAMPLE_ID" => Some(Value::String(self.sample_id.clone())),
            "CLINICAL_ID" => Some(Value::String(self.clinical_id.clone())),
            "MRN" => Some(Value::String(self.mrn.clone())),
            "ONCOTREE_PRIMARY_DIAGNOSIS_NAME" => {
                Some(Value::String(self.oncotree_primary_diagnosis_name.clone()))
            }
            "VITAL_STATUS" => Some(Value::String(self.vital_status.to_string())),
            "BIRTH_DATE" => Some(Value::Date(self.birth_date)),
            "GENDER" => self.gender.clone().map(Value::String),
            _ => None,
        }
    }
}

/// One genomic record; always references exactly one clinical record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct GenomicRecord {
    /// Identifier of this genomic record.
    pub genomic_id: String,
    /// Sample this variant call belongs to.
    pub sample_id: String,
    /// Clinical record this variant call belongs to.
    pub clinical_id: String,
    /// Gene symbol.
    #[serde(default)]
    pub true_hugo_symbol: Option<String>,
    /// Protein change, e.g. `p.V600E`.
    #[serde(default)]
    pub true_protein_change: Option<String>,
    /// Variant classification, e.g. `Missense_Mutation`.
    #[serde(default)]
    pub true_variant_classification: Option<String>,
    /// Variant category: `MUTATION`, `CNV`, `SV` or `SIGNATURE`.
    #[serde(default)]
    pub variant_category: Option<String>,
    /// CNV call, e.g. `High level amplification`.
    #[serde(default)]
    pub cnv_call: Option<String>,
    /// Explicit wildtype assertion; wildtype calls are queried out by default.
    #[serde(default)]
    pub wildtype: Option<bool>,
    /// Clinical significance tier (1..4), 1 being most actionable.
    #[serde(default)]
    pub tier: Option<i64>,
    /// Exon of the transcript carrying the variant.
    #[serde(default)]
    pub true_transcript_exon: Option<i64>,
    /// cDNA change, e.g. `c.1799T>A`.
    #[serde(default)]
    pub cdna_change: Option<String>,
    /// Allele fraction of the variant call.
    #[serde(default)]
    pub allele_fraction: Option<f64>,
    /// Normalized mismatch repair / microsatellite status.
    #[serde(default)]
    pub mmr_status: Option<String>,
    /// Free-text commentary carrying structural variant partner genes.
    #[serde(default)]
    pub structural_variant_comment: Option<String>,
}

impl FieldLookup for GenomicRecord {
    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "GENOMIC_ID" => Some(Value::String(self.genomic_id.clone())),
            "SAMPLE_ID" => Some(Value::String(self.sample_id.clone())),
            "CLINICAL_ID" => Some(Value::String(self.clinical_id.clone())),
            "TRUE_HUGO_SYMBOL" => self.true_hugo_symbol.clone().map(Value::String),
            "TRUE_PROTEIN_CHANGE" => self.true_protein_change.clone().map(Value::String),
            "TRUE_VARIANT_CLASSIFICATION" => {
                self.true_variant_classification.clone().map(Value::String)
            }
            "VARIANT_CATEGORY" => self.variant_category.clone().map(Value::String),
            "CNV_CALL" => self.cnv_call.clone().map(Value::String),
            "WILDTYPE" => self.wildtype.map(Value::Bool),
            "TIER" => self.tier.map(Value::Int),
            "TRUE_TRANSCRIPT_EXON" => self.true_transcript_exon.map(Value::Int),
            "CDNA_CHANGE" => self.cdna_change.clone().map(Value::String),
            "MMR_STATUS" => self.mmr_status.clone().map(Value::String),
            "STRUCTURAL_VARIANT_COMMENT" => {
                self.structural_variant_comment.clone().map(Value::String)
            }
            _ => None,
        }
    }
}

/// A trial document as provided by trial curation; the engine only reads it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Trial {
    /// Protocol number, e.g. `17-251`.
    pub protocol_no: String,
    /// Summary metadata (status, tumor types, coordinating center).
    #[serde(rename = "_summary", default)]
    pub summary: TrialSummary,
    /// The treatment hierarchy carrying the match expressions.
    #[serde(default)]
    pub treatment_list: TreatmentList,
}

/// Trial summary metadata.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct TrialSummary {
    /// Coordinating center, defaulting to "unknown" if absent.
    #[serde(default)]
    pub coordinating_center: Option<String>,
    /// Computed tumor type summary; may contain the reserved all-solid /
    /// all-liquid tokens.
    #[serde(default)]
    pub tumor_types: Vec<String>,
    /// Accrual status entries; the first one is authoritative.
    #[serde(default)]
    pub status: Vec<SummaryStatus>,
}

/// One entry of the trial summary status list.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct SummaryStatus {
    pub value: String,
}

/// The top of the treatment hierarchy.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct TreatmentList {
    #[serde(default)]
    pub step: Vec<Step>,
}

/// A treatment step; may carry its own match expression and contain arms.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Step {
    pub step_internal_id: i64,
    pub step_code: String,
    #[serde(default)]
    pub step_suspended: Option<String>,
    #[serde(rename = "match", default)]
    pub match_clauses: Vec<MatchExpr>,
    #[serde(default)]
    pub arm: Vec<Arm>,
}

/// A treatment arm within a step.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Arm {
    pub arm_internal_id: i64,
    pub arm_code: String,
    #[serde(default)]
    pub arm_suspended: Option<String>,
    #[serde(rename = "match", default)]
    pub match_clauses: Vec<MatchExpr>,
    #[serde(default)]
    pub dose_level: Vec<Dose>,
}

/// A dose level within an arm.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Dose {
    pub level_internal_id: i64,
    pub level_code: String,
    #[serde(default)]
    pub level_suspended: Option<String>,
    #[serde(rename = "match", default)]
    pub match_clauses: Vec<MatchExpr>,
}

/// Interpret a curation suspended flag (`"Y"` / `"N"` / absent).
pub fn is_suspended(flag: Option<&String>) -> bool {
    flag.map(|value| {
        let value = value.trim();
        value.eq_ignore_ascii_case("y") || value.eq_ignore_ascii_case("yes")
    })
    .unwrap_or(false)
}

impl Trial {
    /// Whether the trial as a whole is open to accrual.
    pub fn is_open(&self) -> bool {
        self.summary
            .status
            .first()
            .map(|status| status.value.trim().eq_ignore_ascii_case("open to accrual"))
            .unwrap_or(false)
    }

    /// Cancer type specificity derived from the tumor type summary.
    pub fn cancer_type_match(&self) -> CancerTypeMatch {
        let tumor_types = &self.summary.tumor_types;
        if tumor_types.iter().any(|t| t == TOKEN_ALL_SOLID) {
            CancerTypeMatch::AllSolid
        } else if tumor_types.iter().any(|t| t == TOKEN_ALL_LIQUID) {
            CancerTypeMatch::AllLiquid
        } else {
            CancerTypeMatch::Specific
        }
    }

    /// Coordinating center from the summary, `"unknown"` if absent.
    pub fn coordinating_center(&self) -> String {
        self.summary
            .coordinating_center
            .clone()
            .unwrap_or_else(|| "unknown".to_owned())
    }
}

/// One flat trial match row: a (sample, matched variant, trial segment)
/// combination, ready for ranking and persistence.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrialMatchRecord {
    /// Sample identifier of the matched patient sample.
    pub sample_id: String,
    /// Clinical identifier resolved via the per-run sample index.
    pub clinical_id: String,
    /// Medical record number.
    pub mrn: String,
    /// Matched genomic record, if the match was variant-backed.
    pub genomic_id: Option<String>,
    /// Protocol number of the trial.
    pub protocol_no: String,
    /// Level of the segment that matched (step/arm/dose).
    pub match_level: MatchLevel,
    /// Internal id of the matched segment, as string.
    pub internal_id: String,
    /// Curation code of the matched segment.
    pub code: String,
    /// Accrual status of the matched segment.
    pub trial_accrual_status: AccrualStatus,
    /// Human-readable description of the matched alteration.
    pub genomic_alteration: String,
    /// Variant-level vs gene-level match; `None` for clinical-only matches.
    pub match_type: Option<MatchType>,
    /// Cancer type specificity classification.
    pub cancer_type_match: CancerTypeMatch,
    /// Coordinating center of the trial.
    pub coordinating_center: String,
    /// Patient vital status at assembly time.
    pub vital_status: VitalStatus,
    /// Selected genomic fields for display.
    pub true_hugo_symbol: Option<String>,
    pub true_protein_change: Option<String>,
    pub true_variant_classification: Option<String>,
    pub variant_category: Option<String>,
    pub cnv_call: Option<String>,
    pub mmr_status: Option<String>,
    pub tier: Option<i64>,
    pub wildtype: Option<bool>,
    pub allele_fraction: Option<f64>,
    /// Selected clinical fields for display.
    pub oncotree_primary_diagnosis_name: String,
    pub ord_physician_name: Option<String>,
    pub ord_physician_email: Option<String>,
    pub report_date: Option<NaiveDate>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Dense display rank within the sample, `-1` for excluded records.
    pub sort_order: i32,
}
