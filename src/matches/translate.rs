//! Translation of leaf criteria into store query fragments.
//!
//! Trials phrase constraints in their own vocabulary (`hugo_symbol`,
//! `Copy Number Variation`, ...); patient records use the record vocabulary
//! (`TRUE_HUGO_SYMBOL`, `CNV`, ...).  The mapping between the two is data
//! driven and injected as an immutable [`MappingConfig`].

use chrono::{Datelike, NaiveDate};
use indexmap::IndexMap;
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};

use crate::matches::query::{Constraint, Query, Value};
use crate::matches::EngineError;
use crate::ontology::OncoTree;

/// Trial-vocabulary field/value mapping tables plus gene synonyms.
///
/// Loaded once at startup and shared read-only; "rebuild the default mapping"
/// is a bootstrap concern outside of the engine.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MappingConfig {
    /// Trial field name to record field name.
    #[serde(default)]
    pub field_map: IndexMap<String, String>,
    /// Per trial field: trial value to record value.
    #[serde(default)]
    pub value_map: IndexMap<String, IndexMap<String, String>>,
    /// Gene symbol synonyms, expanded into structural variant text search.
    #[serde(default)]
    pub gene_synonyms: IndexMap<String, Vec<String>>,
}

impl Default for MappingConfig {
    fn default() -> Self {
        let field_map = IndexMap::from(
            [
                ("hugo_symbol", "TRUE_HUGO_SYMBOL"),
                ("protein_change", "TRUE_PROTEIN_CHANGE"),
                ("wildcard_protein_change", "TRUE_PROTEIN_CHANGE"),
                ("cdna_change", "CDNA_CHANGE"),
                ("variant_classification", "TRUE_VARIANT_CLASSIFICATION"),
                ("variant_category", "VARIANT_CATEGORY"),
                ("cnv_call", "CNV_CALL"),
                ("wildtype", "WILDTYPE"),
                ("exon", "TRUE_TRANSCRIPT_EXON"),
                ("mmr_status", "MMR_STATUS"),
                ("ms_status", "MMR_STATUS"),
                ("oncotree_primary_diagnosis", "ONCOTREE_PRIMARY_DIAGNOSIS_NAME"),
                ("age_numerical", "BIRTH_DATE"),
                ("gender", "GENDER"),
            ]
            .map(|(k, v)| (k.to_owned(), v.to_owned())),
        );

        let mmr_map = IndexMap::from(
            [
                ("MMR-Proficient", "Proficient (MMR-P / MSS)"),
                ("MMR-Deficient", "Deficient (MMR-D / MSI-H)"),
                ("MSI-H", "Deficient (MMR-D / MSI-H)"),
                ("MSI-L", "Proficient (MMR-P / MSS)"),
                ("MSS", "Proficient (MMR-P / MSS)"),
            ]
            .map(|(k, v)| (k.to_owned(), v.to_owned())),
        );

        let value_map = IndexMap::from([
            (
                "variant_category".to_owned(),
                IndexMap::from(
                    [
                        ("Mutation", "MUTATION"),
                        ("Copy Number Variation", "CNV"),
                        ("Structural Variation", "SV"),
                        ("Mutational Signature", "SIGNATURE"),
                    ]
                    .map(|(k, v)| (k.to_owned(), v.to_owned())),
                ),
            ),
            (
                "cnv_call".to_owned(),
                IndexMap::from(
                    [
                        ("High Amplification", "High level amplification"),
                        ("Homozygous Deletion", "Homozygous deletion"),
                        ("Heterozygous Deletion", "Heterozygous deletion"),
                        ("Low Amplification", "Gain"),
                    ]
                    .map(|(k, v)| (k.to_owned(), v.to_owned())),
                ),
            ),
            ("mmr_status".to_owned(), mmr_map.clone()),
            ("ms_status".to_owned(), mmr_map),
        ]);

        let gene_synonyms = IndexMap::from([(
            "ABL1".to_owned(),
            vec!["ABL".to_owned(), "JTK7".to_owned()],
        )]);

        Self {
            field_map,
            value_map,
            gene_synonyms,
        }
    }
}

impl MappingConfig {
    /// Map a trial field name to the record field name; unknown fields pass
    /// through unchanged (best effort, logged).
    pub fn map_field(&self, field: &str) -> String {
        match self.field_map.get(field) {
            Some(mapped) => mapped.clone(),
            None => {
                tracing::warn!(
                    "{}, passing through",
                    EngineError::UnknownField(field.to_owned())
                );
                field.to_owned()
            }
        }
    }

    /// Map a trial value for the given trial field; unmapped values pass
    /// through unchanged.
    pub fn map_value(&self, field: &str, value: &str) -> String {
        self.value_map
            .get(field)
            .and_then(|table| table.get(value))
            .cloned()
            .unwrap_or_else(|| value.to_owned())
    }
}

/// The translated form of one whole leaf criteria map.
#[derive(Debug, Clone)]
pub struct TranslatedLeaf {
    /// The positive-form query fragment (conjunction over all criteria).
    pub query: Query,
    /// Whether any criterion was negated; negated leaves are evaluated by
    /// running the positive form and subtracting from the sample universe.
    pub negated: bool,
    /// Whether the leaf concerns structural variants (free text search).
    pub structural: bool,
    /// Whether a specific protein or cDNA change was part of the criteria.
    pub variant_level: bool,
}

/// Translates leaf criteria into query fragments.
#[derive(Debug)]
pub struct Translator<'a> {
    config: &'a MappingConfig,
    ontology: &'a OncoTree,
    /// Reference date for `age_numerical` arithmetic ("now" in production,
    /// fixed in tests).
    reference_date: NaiveDate,
}

impl<'a> Translator<'a> {
    /// Construct with the given mapping, ontology and reference date.
    pub fn new(config: &'a MappingConfig, ontology: &'a OncoTree, reference_date: NaiveDate) -> Self {
        Self {
            config,
            ontology,
            reference_date,
        }
    }

    /// Translate a genomic leaf's criteria map into its positive-form query.
    pub fn translate_genomic(
        &self,
        criteria: &IndexMap<String, serde_json::Value>,
    ) -> Result<TranslatedLeaf, EngineError> {
        // Structural variant leaves rewrite the gene criterion into a text
        // search, so that has to be known before translating the fields.
        let structural = criteria
            .get("variant_category")
            .and_then(|value| value.as_str())
            .map(|value| strip_negation(value).1 == "Structural Variation")
            .unwrap_or(false);

        let mut clauses = Vec::new();
        let mut negated = false;
        let mut variant_level = false;
        let mut has_wildtype = false;

        for (field, value) in criteria {
            let (neg, value) = split_criterion_value(value);
            negated |= neg;

            match field.as_str() {
                "variant_category" => {
                    let value = as_string(field, &value)?;
                    if value == "Any Variation" {
                        clauses.push(Query::Any(vec![
                            Query::clause(
                                self.config.map_field(field),
                                Constraint::Eq(Value::from(
                                    crate::matches::schema::CATEGORY_MUTATION,
                                )),
                            ),
                            Query::clause(
                                self.config.map_field(field),
                                Constraint::Eq(Value::from(crate::matches::schema::CATEGORY_CNV)),
                            ),
                        ]));
                    } else {
                        clauses.push(Query::clause(
                            self.config.map_field(field),
                            Constraint::Eq(Value::String(self.config.map_value(field, &value))),
                        ));
                    }
                }
                "wildcard_protein_change" => {
                    let value = as_string(field, &value)?;
                    clauses.push(Query::clause(
                        self.config.map_field(field),
                        wildcard_protein_constraint(&value)?,
                    ));
                    variant_level = true;
                }
                "protein_change" | "cdna_change" => {
                    let value = as_string(field, &value)?;
                    clauses.push(Query::clause(
                        self.config.map_field(field),
                        Constraint::Eq(Value::String(value)),
                    ));
                    variant_level = true;
                }
                "hugo_symbol" if structural => {
                    let value = as_string(field, &value)?;
                    clauses.push(self.structural_gene_query(&value)?);
                }
                "wildtype" => {
                    has_wildtype = true;
                    clauses.push(Query::clause(
                        self.config.map_field(field),
                        Constraint::Eq(as_bool(field, &value)?),
                    ));
                }
                "exon" => {
                    clauses.push(Query::clause(
                        self.config.map_field(field),
                        Constraint::Eq(as_int(field, &value)?),
                    ));
                }
                _ => {
                    let value = as_string(field, &value)?;
                    clauses.push(Query::clause(
                        self.config.map_field(field),
                        Constraint::Eq(Value::String(self.config.map_value(field, &value))),
                    ));
                }
            }
        }

        // Wildtype calls are queried out by default; only an explicit
        // `wildtype` criterion lifts the exclusion.
        if !has_wildtype {
            clauses.push(Query::Any(vec![
                Query::clause("WILDTYPE", Constraint::Eq(Value::Bool(false))),
                Query::clause("WILDTYPE", Constraint::Exists(false)),
            ]));
        }

        Ok(TranslatedLeaf {
            query: Query::All(clauses),
            negated,
            structural,
            variant_level,
        })
    }

    /// Translate a clinical leaf's criteria map.
    ///
    /// Diagnosis negation resolves to a literal exclusion query over the
    /// ontology expansion; no subtract semantics apply on the clinical side.
    pub fn translate_clinical(
        &self,
        criteria: &IndexMap<String, serde_json::Value>,
    ) -> Result<TranslatedLeaf, EngineError> {
        let mut clauses = Vec::new();

        for (field, value) in criteria {
            match field.as_str() {
                "oncotree_primary_diagnosis" => {
                    let value = as_string(field, value)?;
                    let expansion = self.ontology.resolve(&value);
                    if expansion.labels.is_empty() {
                        // Curation data quality signal, not a system fault.
                        tracing::warn!(
                            "{}, criterion will match nothing",
                            EngineError::UnknownOntologyLabel(value.clone())
                        );
                    }
                    let constraint = if expansion.negated {
                        Constraint::NotIn(expansion.labels)
                    } else {
                        Constraint::In(expansion.labels)
                    };
                    clauses.push(Query::clause(self.config.map_field(field), constraint));
                }
                "age_numerical" => {
                    let value = as_string(field, value)?;
                    clauses.push(Query::clause(
                        self.config.map_field(field),
                        self.age_constraint(&value)?,
                    ));
                }
                _ => {
                    let (_, value) = split_criterion_value(value);
                    let value = as_string(field, &value)?;
                    clauses.push(Query::clause(
                        self.config.map_field(field),
                        Constraint::Eq(Value::String(self.config.map_value(field, &value))),
                    ));
                }
            }
        }

        Ok(TranslatedLeaf {
            query: Query::All(clauses),
            negated: false,
            structural: false,
            variant_level: false,
        })
    }

    /// Build the case-insensitive free text search over the structural
    /// variant comment for one gene plus its known synonyms.
    fn structural_gene_query(&self, gene: &str) -> Result<Query, EngineError> {
        let mut genes = vec![gene.to_owned()];
        if let Some(synonyms) = self.config.gene_synonyms.get(gene) {
            genes.extend(synonyms.iter().cloned());
        }

        let mut clauses = Vec::new();
        for gene in &genes {
            let escaped = regex::escape(gene);
            // Word-boundary-safe so that partial gene name collisions
            // (e.g. ABL1 inside RABL1) do not match.
            let pattern = format!(
                "(.*\\W{g}\\W.*)|(^{g}\\W.*)|(.*\\W{g}$)",
                g = escaped
            );
            let re = RegexBuilder::new(&pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| {
                    EngineError::MalformedExpression(format!(
                        "cannot build structural variant pattern for {:?}: {}",
                        gene, e
                    ))
                })?;
            clauses.push(Query::clause(
                "STRUCTURAL_VARIANT_COMMENT",
                Constraint::Matches(re),
            ));
        }
        Ok(Query::Any(clauses))
    }

    /// Translate an `age_numerical` value (e.g. `">=18"`, `"<0.5"`) into a
    /// birth date comparison relative to the reference date.
    ///
    /// The fractional part denotes months in twelfths: `0.5` is six months.
    fn age_constraint(&self, value: &str) -> Result<Constraint, EngineError> {
        let (op, rest) = if let Some(rest) = value.strip_prefix(">=") {
            (">=", rest)
        } else if let Some(rest) = value.strip_prefix("<=") {
            ("<=", rest)
        } else if let Some(rest) = value.strip_prefix('>') {
            (">", rest)
        } else if let Some(rest) = value.strip_prefix('<') {
            ("<", rest)
        } else {
            return Err(EngineError::MalformedExpression(format!(
                "age_numerical value {:?} lacks a comparison operator",
                value
            )));
        };

        let age: f64 = rest.trim().parse().map_err(|_| {
            EngineError::MalformedExpression(format!("cannot parse age value {:?}", rest))
        })?;
        let years = age.trunc() as i32;
        let months = (age.fract() * 12.0).round() as i32;
        let bound = subtract_months(self.reference_date, years * 12 + months);

        // An age lower bound is an upper bound on the birth date and vice
        // versa, so the operators flip.
        Ok(match op {
            ">=" => Constraint::Lte(Value::Date(bound)),
            "<=" => Constraint::Gte(Value::Date(bound)),
            ">" => Constraint::Lt(Value::Date(bound)),
            "<" => Constraint::Gt(Value::Date(bound)),
            _ => unreachable!(),
        })
    }
}

/// Strip a leading `!` from a criterion string value, reporting whether it
/// was present.
pub fn strip_negation(value: &str) -> (bool, &str) {
    match value.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, value),
    }
}

/// Split one criterion JSON value into (negated, positive value).
///
/// Negation is only encoded on string values; all other types pass through.
fn split_criterion_value(value: &serde_json::Value) -> (bool, serde_json::Value) {
    match value.as_str() {
        Some(s) => {
            let (neg, positive) = strip_negation(s);
            (neg, serde_json::Value::String(positive.to_owned()))
        }
        None => (false, value.clone()),
    }
}

fn as_string(field: &str, value: &serde_json::Value) -> Result<String, EngineError> {
    value.as_str().map(|s| s.to_owned()).ok_or_else(|| {
        EngineError::MalformedExpression(format!(
            "criterion {:?} expects a string value, got {}",
            field, value
        ))
    })
}

fn as_bool(field: &str, value: &serde_json::Value) -> Result<Value, EngineError> {
    match value {
        serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
        serde_json::Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
        serde_json::Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
        _ => Err(EngineError::MalformedExpression(format!(
            "criterion {:?} expects a boolean value, got {}",
            field, value
        ))),
    }
}

fn as_int(field: &str, value: &serde_json::Value) -> Result<Value, EngineError> {
    match value {
        serde_json::Value::Number(n) => n.as_i64().map(Value::Int).ok_or_else(|| {
            EngineError::MalformedExpression(format!(
                "criterion {:?} expects an integer value, got {}",
                field, value
            ))
        }),
        serde_json::Value::String(s) => s.parse().map(Value::Int).map_err(|_| {
            EngineError::MalformedExpression(format!(
                "criterion {:?} expects an integer value, got {:?}",
                field, s
            ))
        }),
        _ => Err(EngineError::MalformedExpression(format!(
            "criterion {:?} expects an integer value, got {}",
            field, value
        ))),
    }
}

/// The "starts with `p.<prefix>` plus one uppercase letter" constraint for
/// `wildcard_protein_change` criteria.
fn wildcard_protein_constraint(prefix: &str) -> Result<Constraint, EngineError> {
    let pattern = format!("^{}[A-Z]", regex::escape(prefix));
    let re = RegexBuilder::new(&pattern).build().map_err(|e| {
        EngineError::MalformedExpression(format!(
            "cannot build wildcard protein pattern for {:?}: {}",
            prefix, e
        ))
    })?;
    Ok(Constraint::Matches(re))
}

/// Subtract a number of months from a date, carrying over year boundaries
/// and clamping the day to the target month's length.
fn subtract_months(date: NaiveDate, months: i32) -> NaiveDate {
    let total = date.year() * 12 + date.month0() as i32 - months;
    let year = total.div_euclid(12);
    let month0 = total.rem_euclid(12) as u32;
    let mut day = date.day();
    loop {
        if let Some(result) = NaiveDate::from_ymd_opt(year, month0 + 1, day) {
            return result;
        }
        day -= 1;
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use crate::matches::query::{eval_query, Constraint, Query, Value};
    use crate::matches::schema::GenomicRecord;
    use crate::ontology::OncoTree;

    use super::*;

    fn reference_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 3, 15).expect("valid date")
    }

    fn criteria(entries: &[(&str, serde_json::Value)]) -> IndexMap<String, serde_json::Value> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn braf_mutation_record() -> GenomicRecord {
        GenomicRecord {
            genomic_id: "G1".to_owned(),
            sample_id: "S1".to_owned(),
            clinical_id: "C1".to_owned(),
            true_hugo_symbol: Some("BRAF".to_owned()),
            true_protein_change: Some("p.V600E".to_owned()),
            variant_category: Some("MUTATION".to_owned()),
            wildtype: Some(false),
            ..Default::default()
        }
    }

    #[test]
    fn field_and_value_mapping() {
        let config = MappingConfig::default();
        assert_eq!(config.map_field("hugo_symbol"), "TRUE_HUGO_SYMBOL");
        assert_eq!(config.map_field("not_a_field"), "not_a_field");
        assert_eq!(
            config.map_value("variant_category", "Copy Number Variation"),
            "CNV"
        );
        assert_eq!(config.map_value("variant_category", "UNMAPPED"), "UNMAPPED");
    }

    #[test]
    fn translate_simple_mutation_criteria() -> Result<(), anyhow::Error> {
        let config = MappingConfig::default();
        let ontology = OncoTree::default();
        let translator = Translator::new(&config, &ontology, reference_date());

        let leaf = translator.translate_genomic(&criteria(&[
            ("hugo_symbol", "BRAF".into()),
            ("protein_change", "p.V600E".into()),
            ("variant_category", "Mutation".into()),
        ]))?;

        assert!(!leaf.negated);
        assert!(!leaf.structural);
        assert!(leaf.variant_level);
        assert!(eval_query(&leaf.query, &braf_mutation_record()));

        let other = GenomicRecord {
            true_protein_change: Some("p.V600K".to_owned()),
            ..braf_mutation_record()
        };
        assert!(!eval_query(&leaf.query, &other));
        Ok(())
    }

    #[test]
    fn negated_criteria_translate_to_positive_query() -> Result<(), anyhow::Error> {
        let config = MappingConfig::default();
        let ontology = OncoTree::default();
        let translator = Translator::new(&config, &ontology, reference_date());

        let leaf = translator.translate_genomic(&criteria(&[
            ("hugo_symbol", "BRAF".into()),
            ("variant_category", "!Mutation".into()),
        ]))?;

        // The positive form still matches; the evaluator applies the
        // subtraction against the sample universe.
        assert!(leaf.negated);
        assert!(eval_query(&leaf.query, &braf_mutation_record()));
        Ok(())
    }

    #[test]
    fn any_variation_covers_mutation_and_cnv() -> Result<(), anyhow::Error> {
        let config = MappingConfig::default();
        let ontology = OncoTree::default();
        let translator = Translator::new(&config, &ontology, reference_date());

        let leaf = translator.translate_genomic(&criteria(&[
            ("hugo_symbol", "BRAF".into()),
            ("variant_category", "Any Variation".into()),
        ]))?;

        assert!(eval_query(&leaf.query, &braf_mutation_record()));
        let cnv = GenomicRecord {
            variant_category: Some("CNV".to_owned()),
            true_protein_change: None,
            ..braf_mutation_record()
        };
        assert!(eval_query(&leaf.query, &cnv));
        let sv = GenomicRecord {
            variant_category: Some("SV".to_owned()),
            ..braf_mutation_record()
        };
        assert!(!eval_query(&leaf.query, &sv));
        Ok(())
    }

    #[test]
    fn wildcard_protein_change_is_prefix_match() -> Result<(), anyhow::Error> {
        let config = MappingConfig::default();
        let ontology = OncoTree::default();
        let translator = Translator::new(&config, &ontology, reference_date());

        let leaf = translator.translate_genomic(&criteria(&[
            ("hugo_symbol", "BRAF".into()),
            ("wildcard_protein_change", "p.V600".into()),
        ]))?;
        assert!(leaf.variant_level);

        assert!(eval_query(&leaf.query, &braf_mutation_record()));
        let other = GenomicRecord {
            true_protein_change: Some("p.V600K".to_owned()),
            ..braf_mutation_record()
        };
        assert!(eval_query(&leaf.query, &other));
        // Prefix must be followed by a single uppercase letter.
        let shorter = GenomicRecord {
            true_protein_change: Some("p.V600".to_owned()),
            ..braf_mutation_record()
        };
        assert!(!eval_query(&leaf.query, &shorter));
        let unrelated = GenomicRecord {
            true_protein_change: Some("p.V60A".to_owned()),
            ..braf_mutation_record()
        };
        assert!(!eval_query(&leaf.query, &unrelated));
        Ok(())
    }

    #[rstest]
    #[case("MMR-Deficient", "Deficient (MMR-D / MSI-H)")]
    #[case("MSI-H", "Deficient (MMR-D / MSI-H)")]
    #[case("MMR-Proficient", "Proficient (MMR-P / MSS)")]
    #[case("MSS", "Proficient (MMR-P / MSS)")]
    fn mmr_and_ms_status_share_one_vocabulary(#[case] raw: &str, #[case] normalized: &str) {
        let config = MappingConfig::default();
        assert_eq!(config.map_value("mmr_status", raw), normalized);
        assert_eq!(config.map_value("ms_status", raw), normalized);
    }

    #[test]
    fn wildtype_excluded_by_default() -> Result<(), anyhow::Error> {
        let config = MappingConfig::default();
        let ontology = OncoTree::default();
        let translator = Translator::new(&config, &ontology, reference_date());

        let leaf =
            translator.translate_genomic(&criteria(&[("hugo_symbol", "BRAF".into())]))?;

        let wildtype = GenomicRecord {
            wildtype: Some(true),
            ..braf_mutation_record()
        };
        assert!(!eval_query(&leaf.query, &wildtype));
        // Records without an explicit wildtype call still pass.
        let no_call = GenomicRecord {
            wildtype: None,
            ..braf_mutation_record()
        };
        assert!(eval_query(&leaf.query, &no_call));

        // An explicit wildtype criterion lifts the exclusion.
        let leaf = translator.translate_genomic(&criteria(&[
            ("hugo_symbol", "BRAF".into()),
            ("wildtype", true.into()),
        ]))?;
        assert!(eval_query(&leaf.query, &wildtype));
        assert!(!eval_query(&leaf.query, &braf_mutation_record()));
        Ok(())
    }

    #[test]
    fn structural_variant_gene_becomes_text_search() -> Result<(), anyhow::Error> {
        let config = MappingConfig::default();
        let ontology = OncoTree::default();
        let translator = Translator::new(&config, &ontology, reference_date());

        let leaf = translator.translate_genomic(&criteria(&[
            ("hugo_symbol", "ABL1".into()),
            ("variant_category", "Structural Variation".into()),
        ]))?;
        assert!(leaf.structural);

        let record = |comment: &str| GenomicRecord {
            variant_category: Some("SV".to_owned()),
            structural_variant_comment: Some(comment.to_owned()),
            true_hugo_symbol: None,
            true_protein_change: None,
            ..braf_mutation_record()
        };
        assert!(eval_query(&leaf.query, &record("BCR-ABL1 fusion detected")));
        // Synonyms expand into the same pattern set.
        assert!(eval_query(&leaf.query, &record("rearrangement involving ABL")));
        // Word boundaries prevent partial gene name collisions.
        assert!(!eval_query(&leaf.query, &record("fusion involving RABL1 here")));
        Ok(())
    }

    #[rstest]
    #[case(">=18", "2002-03-15", true)]
    #[case(">=18", "2002-03-16", false)]
    #[case("<18", "2002-03-16", true)]
    #[case("<18", "2002-03-15", false)]
    // 0.5 years = 6 months; reference 2020-03-15 minus 6 months is
    // 2019-09-15, crossing the year boundary backwards from March.
    #[case(">=0.5", "2019-09-15", true)]
    #[case(">=0.5", "2019-09-16", false)]
    fn age_numerical_translates_to_birth_date_bounds(
        #[case] age: &str,
        #[case] birth_date: &str,
        #[case] expected: bool,
    ) -> Result<(), anyhow::Error> {
        let config = MappingConfig::default();
        let ontology = OncoTree::default();
        let translator = Translator::new(&config, &ontology, reference_date());

        let constraint = translator.age_constraint(age)?;
        let birth_date: NaiveDate = birth_date.parse()?;
        assert_eq!(
            constraint.matches(Some(&Value::Date(birth_date))),
            expected,
            "age {:?} vs birth date {:?}",
            age,
            birth_date
        );
        Ok(())
    }

    #[test]
    fn subtract_months_clamps_day() {
        // 2020-03-31 minus one month must clamp to February's length.
        let date = NaiveDate::from_ymd_opt(2020, 3, 31).expect("valid date");
        assert_eq!(
            subtract_months(date, 1),
            NaiveDate::from_ymd_opt(2020, 2, 29).expect("valid date")
        );
        // Year boundary carry.
        assert_eq!(
            subtract_months(date, 3),
            NaiveDate::from_ymd_opt(2019, 12, 31).expect("valid date")
        );
    }

    #[test]
    fn clinical_diagnosis_uses_ontology_expansion() -> Result<(), anyhow::Error> {
        let config = MappingConfig::default();
        let ontology = OncoTree::new(vec![crate::ontology::OncoTreeNode {
            code: "MEL".to_owned(),
            text: "Melanoma".to_owned(),
            children: vec![crate::ontology::OncoTreeNode {
                code: "ACRM".to_owned(),
                text: "Acral Melanoma".to_owned(),
                children: vec![],
            }],
        }]);
        let translator = Translator::new(&config, &ontology, reference_date());

        let leaf = translator.translate_clinical(&criteria(&[(
            "oncotree_primary_diagnosis",
            "Melanoma".into(),
        )]))?;
        assert!(!leaf.negated);
        match &leaf.query {
            Query::All(clauses) => match &clauses[0] {
                Query::Clause(clause) => {
                    assert_eq!(clause.field, "ONCOTREE_PRIMARY_DIAGNOSIS_NAME");
                    match &clause.constraint {
                        Constraint::In(labels) => {
                            assert_eq!(
                                labels,
                                &vec!["Acral Melanoma".to_owned(), "Melanoma".to_owned()]
                            );
                        }
                        _ => panic!("expected inclusion constraint"),
                    }
                }
                _ => panic!("expected clause"),
            },
            _ => panic!("expected conjunction"),
        }

        // Negated diagnosis becomes a literal exclusion query.
        let leaf = translator.translate_clinical(&criteria(&[(
            "oncotree_primary_diagnosis",
            "!Melanoma".into(),
        )]))?;
        assert!(!leaf.negated);
        match &leaf.query {
            Query::All(clauses) => match &clauses[0] {
                Query::Clause(clause) => {
                    assert!(matches!(clause.constraint, Constraint::NotIn(_)));
                }
                _ => panic!("expected clause"),
            },
            _ => panic!("expected conjunction"),
        }
        Ok(())
    }
}
