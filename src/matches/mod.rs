//! Code implementing the "matches run" sub command: the batch job matching
//! all patients against all trial eligibility expressions.

pub mod assemble;
pub mod interpreter;
pub mod query;
pub mod schema;
pub mod sorting;
pub mod store;
pub mod translate;
pub mod tree;

use std::fs::File;
use std::path::Path;
use std::time::Instant;

use chrono::NaiveDate;
use clap::{command, Parser};
use thousands::Separable;

use crate::common::{trace_rss_now, CancelFlag};
use crate::matches::assemble::{build_sample_index, Assembler};
use crate::matches::interpreter::TreeEvaluator;
use crate::matches::schema::{Trial, TrialMatchRecord};
use crate::matches::store::{
    JsonFileSink, JsonFileStore, JsonFileTrialSource, PatientStore, ResultSink, TrialSource,
};
use crate::matches::translate::{MappingConfig, Translator};
use crate::ontology::OncoTree;

/// Errors of the matching engine proper.
#[derive(thiserror::Error, Debug, Clone)]
pub enum EngineError {
    /// A match expression node is malformed; fatal for the segment being
    /// evaluated, never for the whole run.
    #[error("malformed match expression: {0}")]
    MalformedExpression(String),
    /// A criterion references a field absent from the translation mapping;
    /// non-fatal, the field passes through unmapped.
    #[error("unknown criterion field: {0}")]
    UnknownField(String),
    /// A diagnosis label is missing from the ontology; non-fatal, treated as
    /// an empty expansion.
    #[error("unknown ontology label: {0}")]
    UnknownOntologyLabel(String),
    /// The record store rejected a query; aborts the segment only.
    #[error("store query failed: {0}")]
    StoreQuery(String),
}

/// Command line arguments for `matches run` sub command.
#[derive(Parser, Debug)]
#[command(author, version, about = "Run patient-trial matching", long_about = None)]
pub struct Args {
    /// Path to trial documents JSON file.
    #[arg(long, required = true)]
    pub path_trials: String,
    /// Path to clinical records JSON file.
    #[arg(long, required = true)]
    pub path_clinical: String,
    /// Path to genomic records JSON file.
    #[arg(long, required = true)]
    pub path_genomic: String,
    /// Path to tumor type ontology JSON file.
    #[arg(long, required = true)]
    pub path_ontology: String,
    /// Path to field/value mapping JSON file; the built-in mapping is used
    /// if absent.
    #[arg(long)]
    pub path_mapping: Option<String>,
    /// Path to the output trial matches JSON file.
    #[arg(long, required = true)]
    pub path_output: String,

    /// Optional restriction to the given protocol numbers (repeatable).
    #[arg(long)]
    pub protocol_no: Vec<String>,
    /// Optional restriction to the given sample ids (repeatable).
    #[arg(long)]
    pub sample_id: Vec<String>,
    /// Coordinating center preferred by the ranking.
    #[arg(long, default_value = "Dana-Farber Cancer Institute")]
    pub coordinating_center: String,
}

/// Options of one matching run, decoupled from the CLI for embedding and
/// testing.
#[derive(Debug, Clone)]
pub struct MatchOptions {
    /// Restrict matching to these protocol numbers; empty means all.
    pub protocol_filter: Vec<String>,
    /// Restrict output to these sample ids; empty means all.
    pub sample_filter: Vec<String>,
    /// Coordinating center preferred by the ranking.
    pub coordinating_center: String,
    /// Reference date for age criteria ("today" in production).
    pub reference_date: NaiveDate,
}

/// Utility struct to store statistics about counts.
#[derive(Debug, Default)]
struct RunStats {
    pub trials_total: usize,
    pub trials_skipped: usize,
    pub records: usize,
}

/// Evaluate all trials against the store and return the ranked records.
///
/// The trial loop is sequential; the cancel flag is checked between trials
/// and aborts the run without producing output, so that the previous run's
/// persisted results are never partially replaced.
pub fn run_matching(
    trials: &[Trial],
    store: &dyn PatientStore,
    ontology: &OncoTree,
    mapping: &MappingConfig,
    options: &MatchOptions,
    cancel: &CancelFlag,
) -> Result<Vec<TrialMatchRecord>, anyhow::Error> {
    let translator = Translator::new(mapping, ontology, options.reference_date);
    let evaluator = TreeEvaluator::new(&translator, store);
    let sample_index = build_sample_index(store)?;
    let assembler = Assembler::new(&evaluator, store, &sample_index);

    let mut stats = RunStats::default();
    let mut records = Vec::new();
    for trial in trials {
        if cancel.is_cancelled() {
            return Err(anyhow::anyhow!(
                "match run cancelled after {} of {} trials",
                stats.trials_total,
                trials.len()
            ));
        }
        if !options.protocol_filter.is_empty()
            && !options.protocol_filter.contains(&trial.protocol_no)
        {
            continue;
        }
        stats.trials_total += 1;

        match assembler.assemble_trial(trial) {
            Ok(trial_records) => records.extend(trial_records),
            Err(e) => {
                stats.trials_skipped += 1;
                tracing::warn!("skipping trial {}: {}", trial.protocol_no, e);
            }
        }
    }

    if !options.sample_filter.is_empty() {
        records.retain(|record| options.sample_filter.contains(&record.sample_id));
    }
    stats.records = records.len();

    tracing::info!(
        "evaluated {} trials ({} skipped), assembled {} match records",
        stats.trials_total.separate_with_commas(),
        stats.trials_skipped.separate_with_commas(),
        stats.records.separate_with_commas()
    );

    // Ranking is cross-trial per patient, so it runs only after all trials
    // have been evaluated.
    sorting::assign_sort_order(&mut records, &options.coordinating_center);
    Ok(records)
}

/// Main entry point for `matches run` sub command.
pub fn run(args_common: &crate::common::Args, args: &Args) -> Result<(), anyhow::Error> {
    let before_anything = Instant::now();
    tracing::info!("args_common = {:?}", &args_common);
    tracing::info!("args = {:?}", &args);

    tracing::info!("Loading ontology, mapping, records and trials...");
    let before_loading = Instant::now();
    let ontology = OncoTree::from_json_reader(File::open(&args.path_ontology)?)?;
    let mapping = match &args.path_mapping {
        Some(path) => serde_json::from_reader(File::open(path)?)?,
        None => MappingConfig::default(),
    };
    let store = JsonFileStore::from_paths(
        Path::new(&args.path_clinical),
        Path::new(&args.path_genomic),
    )?;
    let trial_source = JsonFileTrialSource::from_path(Path::new(&args.path_trials))?;
    let trials = trial_source.open_or_closed_trials()?;
    tracing::info!(
        "...done loading {} trials, {} clinical / {} genomic records in {:?}",
        trials.len().separate_with_commas(),
        store.clinical_count().separate_with_commas(),
        store.genomic_count().separate_with_commas(),
        before_loading.elapsed()
    );

    trace_rss_now();

    let options = MatchOptions {
        protocol_filter: args.protocol_no.clone(),
        sample_filter: args.sample_id.clone(),
        coordinating_center: args.coordinating_center.clone(),
        reference_date: chrono::Local::now().date_naive(),
    };
    let records = run_matching(
        &trials,
        &store,
        &ontology,
        &mapping,
        &options,
        &CancelFlag::new(),
    )?;

    trace_rss_now();

    tracing::info!("Writing {} records...", records.len().separate_with_commas());
    let sink = JsonFileSink::new(&args.path_output);
    sink.replace_all_trial_matches(&records)?;

    tracing::info!(
        "All of `matches run` completed in {:?}",
        before_anything.elapsed()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    use crate::matches::schema::{
        AccrualStatus, ClinicalRecord, GenomicRecord, VitalStatus,
    };

    use super::*;

    fn options() -> MatchOptions {
        MatchOptions {
            protocol_filter: Vec::new(),
            sample_filter: Vec::new(),
            coordinating_center: "Dana-Farber Cancer Institute".to_owned(),
            reference_date: NaiveDate::from_ymd_opt(2020, 3, 15).expect("valid date"),
        }
    }

    fn example_store() -> JsonFileStore {
        JsonFileStore::with_records(
            vec![
                ClinicalRecord {
                    sample_id: "S1".to_owned(),
                    clinical_id: "C1".to_owned(),
                    mrn: "MRN1".to_owned(),
                    oncotree_primary_diagnosis_name: "Melanoma".to_owned(),
                    vital_status: VitalStatus::Alive,
                    birth_date: NaiveDate::from_ymd_opt(1970, 1, 1).expect("valid date"),
                    ..Default::default()
                },
                ClinicalRecord {
                    sample_id: "S2".to_owned(),
                    clinical_id: "C2".to_owned(),
                    mrn: "MRN2".to_owned(),
                    oncotree_primary_diagnosis_name: "Leukemia".to_owned(),
                    vital_status: VitalStatus::Alive,
                    birth_date: NaiveDate::from_ymd_opt(1980, 6, 1).expect("valid date"),
                    ..Default::default()
                },
            ],
            vec![
                GenomicRecord {
                    genomic_id: "G1".to_owned(),
                    sample_id: "S1".to_owned(),
                    clinical_id: "C1".to_owned(),
                    true_hugo_symbol: Some("BRAF".to_owned()),
                    true_protein_change: Some("p.V600E".to_owned()),
                    variant_category: Some("MUTATION".to_owned()),
                    tier: Some(1),
                    wildtype: Some(false),
                    ..Default::default()
                },
                GenomicRecord {
                    genomic_id: "G2".to_owned(),
                    sample_id: "S2".to_owned(),
                    clinical_id: "C2".to_owned(),
                    true_hugo_symbol: Some("KRAS".to_owned()),
                    true_protein_change: Some("p.G12D".to_owned()),
                    variant_category: Some("MUTATION".to_owned()),
                    tier: Some(3),
                    wildtype: Some(false),
                    ..Default::default()
                },
            ],
        )
    }

    fn braf_trial(protocol_no: &str) -> Trial {
        serde_json::from_value(serde_json::json!({
            "protocol_no": protocol_no,
            "_summary": {
                "coordinating_center": "Dana-Farber Cancer Institute",
                "tumor_types": ["Melanoma"],
                "status": [{"value": "Open to Accrual"}]
            },
            "treatment_list": {
                "step": [{
                    "step_internal_id": 1,
                    "step_code": "1",
                    "arm": [{
                        "arm_internal_id": 2,
                        "arm_code": "A",
                        "match": [{"genomic": {
                            "hugo_symbol": "BRAF",
                            "protein_change": "p.V600E",
                            "variant_category": "Mutation"
                        }}],
                        "dose_level": []
                    }]
                }]
            }
        }))
        .expect("trial must parse")
    }

    #[test]
    fn end_to_end_matching_and_ranking() -> Result<(), anyhow::Error> {
        let store = example_store();
        let trials = vec![braf_trial("17-251")];
        let records = run_matching(
            &trials,
            &store,
            &OncoTree::default(),
            &MappingConfig::default(),
            &options(),
            &CancelFlag::new(),
        )?;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sample_id, "S1");
        assert_eq!(records[0].protocol_no, "17-251");
        assert_eq!(records[0].trial_accrual_status, AccrualStatus::Open);
        assert_eq!(records[0].sort_order, 0);
        Ok(())
    }

    #[test]
    fn protocol_filter_restricts_run() -> Result<(), anyhow::Error> {
        let store = example_store();
        let trials = vec![braf_trial("17-251"), braf_trial("18-100")];
        let mut opts = options();
        opts.protocol_filter = vec!["18-100".to_owned()];
        let records = run_matching(
            &trials,
            &store,
            &OncoTree::default(),
            &MappingConfig::default(),
            &opts,
            &CancelFlag::new(),
        )?;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].protocol_no, "18-100");
        Ok(())
    }

    #[test]
    fn sample_filter_restricts_output() -> Result<(), anyhow::Error> {
        let store = example_store();
        let trials = vec![braf_trial("17-251")];
        let mut opts = options();
        opts.sample_filter = vec!["S2".to_owned()];
        let records = run_matching(
            &trials,
            &store,
            &OncoTree::default(),
            &MappingConfig::default(),
            &opts,
            &CancelFlag::new(),
        )?;
        assert!(records.is_empty());
        Ok(())
    }

    #[test]
    fn cancelled_run_produces_no_output() {
        let store = example_store();
        let trials = vec![braf_trial("17-251")];
        let cancel = CancelFlag::new();
        cancel.cancel();
        let result = run_matching(
            &trials,
            &store,
            &OncoTree::default(),
            &MappingConfig::default(),
            &options(),
            &cancel,
        );
        assert!(result.is_err());
    }

    #[tracing_test::traced_test]
    #[test]
    fn broken_segment_does_not_abort_run() -> Result<(), anyhow::Error> {
        let store = example_store();
        // First trial carries an age criterion without comparison operator;
        // its segment is skipped, the second trial still matches.
        let broken: Trial = serde_json::from_value(serde_json::json!({
            "protocol_no": "00-000",
            "_summary": {"status": [{"value": "Open to Accrual"}]},
            "treatment_list": {
                "step": [{
                    "step_internal_id": 1,
                    "step_code": "1",
                    "match": [{"clinical": {"age_numerical": "18"}}],
                    "arm": []
                }]
            }
        }))?;
        let trials = vec![broken, braf_trial("17-251")];
        let records = run_matching(
            &trials,
            &store,
            &OncoTree::default(),
            &MappingConfig::default(),
            &options(),
            &CancelFlag::new(),
        )?;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].protocol_no, "17-251");
        assert!(logs_contain("skipping step segment 1 of trial 00-000"));
        Ok(())
    }
}
