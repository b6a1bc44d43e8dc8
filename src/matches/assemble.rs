//! Joining evaluated match trees back to clinical attributes and trial
//! metadata, producing one flat record per (sample, matched variant, trial
//! segment) combination.

use indexmap::IndexMap;

use crate::matches::interpreter::{EvalOutcome, GenomicMatch, TreeEvaluator};
use crate::matches::query::{Constraint, Query};
use crate::matches::schema::{
    is_suspended, AccrualStatus, CancerTypeMatch, ClinicalRecord, MatchExpr, MatchLevel, Trial,
    TrialMatchRecord,
};
use crate::matches::store::PatientStore;
use crate::matches::tree::MatchTree;

/// One treatment segment carrying match expressions.
#[derive(Debug)]
struct Segment<'a> {
    level: MatchLevel,
    internal_id: i64,
    code: &'a str,
    suspended: bool,
    clauses: &'a [MatchExpr],
}

/// Build the sample id to clinical id index, once per run.
pub fn build_sample_index(
    store: &dyn PatientStore,
) -> Result<IndexMap<String, String>, anyhow::Error> {
    Ok(store
        .find_clinical(&Query::everything())?
        .into_iter()
        .map(|record| (record.sample_id, record.clinical_id))
        .collect())
}

/// Assembles flat trial match records for one trial at a time.
pub struct Assembler<'a> {
    evaluator: &'a TreeEvaluator<'a>,
    store: &'a dyn PatientStore,
    sample_index: &'a IndexMap<String, String>,
}

impl<'a> Assembler<'a> {
    /// Construct with the evaluator, store and per-run sample index.
    pub fn new(
        evaluator: &'a TreeEvaluator<'a>,
        store: &'a dyn PatientStore,
        sample_index: &'a IndexMap<String, String>,
    ) -> Self {
        Self {
            evaluator,
            store,
            sample_index,
        }
    }

    /// Evaluate all of the trial's segments and assemble the flat records.
    ///
    /// Errors local to one segment are logged with the protocol number and
    /// skip only that segment; a single broken segment must not abort the
    /// batch run.
    pub fn assemble_trial(&self, trial: &Trial) -> Result<Vec<TrialMatchRecord>, anyhow::Error> {
        let trial_open = trial.is_open();
        let mut records = Vec::new();

        for segment in collect_segments(trial) {
            for clause in segment.clauses {
                let tree = MatchTree::build(clause);
                let outcome = match self.evaluator.evaluate(&tree) {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::warn!(
                            "skipping {} segment {} of trial {}: {}",
                            segment.level,
                            segment.internal_id,
                            trial.protocol_no,
                            e
                        );
                        continue;
                    }
                };
                records.extend(self.segment_records(trial, trial_open, &segment, &outcome)?);
            }
        }

        Ok(records)
    }

    /// Produce the records for one evaluated segment.
    fn segment_records(
        &self,
        trial: &Trial,
        trial_open: bool,
        segment: &Segment<'_>,
        outcome: &EvalOutcome,
    ) -> Result<Vec<TrialMatchRecord>, anyhow::Error> {
        let accrual_status = if trial_open && !segment.suspended {
            AccrualStatus::Open
        } else {
            AccrualStatus::Closed
        };
        let cancer_type_match = trial.cancer_type_match();
        let coordinating_center = trial.coordinating_center();

        // One batch lookup for the whole matched sample set, not per row.
        let clinical_by_sample = self.batch_clinical(outcome)?;

        let mut records = Vec::new();
        for sample_id in &outcome.sample_ids {
            let Some(clinical) = clinical_by_sample.get(sample_id) else {
                tracing::warn!(
                    "sample {} matched trial {} but has no clinical record",
                    sample_id,
                    trial.protocol_no
                );
                continue;
            };

            let explanations = outcome.genomic_by_sample.get(sample_id);
            match explanations {
                Some(explanations) => {
                    for info in explanations {
                        records.push(self.one_record(
                            trial,
                            segment,
                            accrual_status,
                            cancer_type_match,
                            &coordinating_center,
                            clinical,
                            Some(info),
                        ));
                    }
                }
                // Clinical-only matches carry no variant to describe.
                None => records.push(self.one_record(
                    trial,
                    segment,
                    accrual_status,
                    cancer_type_match,
                    &coordinating_center,
                    clinical,
                    None,
                )),
            }
        }
        Ok(records)
    }

    #[allow(clippy::too_many_arguments)]
    fn one_record(
        &self,
        trial: &Trial,
        segment: &Segment<'_>,
        accrual_status: AccrualStatus,
        cancer_type_match: CancerTypeMatch,
        coordinating_center: &str,
        clinical: &ClinicalRecord,
        info: Option<&GenomicMatch>,
    ) -> TrialMatchRecord {
        let clinical_id = info
            .and_then(|i| i.clinical_id.clone())
            .or_else(|| self.sample_index.get(&clinical.sample_id).cloned())
            .unwrap_or_else(|| clinical.clinical_id.clone());

        TrialMatchRecord {
            sample_id: clinical.sample_id.clone(),
            clinical_id,
            mrn: clinical.mrn.clone(),
            genomic_id: info.and_then(|i| i.genomic_id.clone()),
            protocol_no: trial.protocol_no.clone(),
            match_level: segment.level,
            internal_id: segment.internal_id.to_string(),
            code: segment.code.to_owned(),
            trial_accrual_status: accrual_status,
            genomic_alteration: info
                .map(|i| i.genomic_alteration.clone())
                .unwrap_or_else(|| "None".to_owned()),
            match_type: info.map(|i| i.match_type),
            cancer_type_match,
            coordinating_center: coordinating_center.to_owned(),
            vital_status: clinical.vital_status,
            true_hugo_symbol: info.and_then(|i| i.true_hugo_symbol.clone()),
            true_protein_change: info.and_then(|i| i.true_protein_change.clone()),
            true_variant_classification: info.and_then(|i| i.true_variant_classification.clone()),
            variant_category: info.and_then(|i| i.variant_category.clone()),
            cnv_call: info.and_then(|i| i.cnv_call.clone()),
            mmr_status: info.and_then(|i| i.mmr_status.clone()),
            tier: info.and_then(|i| i.tier),
            wildtype: info.and_then(|i| i.wildtype),
            allele_fraction: info.and_then(|i| i.allele_fraction),
            oncotree_primary_diagnosis_name: clinical.oncotree_primary_diagnosis_name.clone(),
            ord_physician_name: clinical.ord_physician_name.clone(),
            ord_physician_email: clinical.ord_physician_email.clone(),
            report_date: clinical.report_date,
            first_name: clinical.first_name.clone(),
            last_name: clinical.last_name.clone(),
            // Ranking happens after all trials have been evaluated.
            sort_order: -1,
        }
    }

    /// One clinical lookup for the segment's full matched sample set.
    fn batch_clinical(
        &self,
        outcome: &EvalOutcome,
    ) -> Result<IndexMap<String, ClinicalRecord>, anyhow::Error> {
        if outcome.sample_ids.is_empty() {
            return Ok(IndexMap::new());
        }
        let query = Query::clause(
            "SAMPLE_ID",
            Constraint::In(outcome.sample_ids.iter().cloned().collect()),
        );
        Ok(self
            .store
            .find_clinical(&query)?
            .into_iter()
            .map(|record| (record.sample_id.clone(), record))
            .collect())
    }
}

/// Flatten the trial's step/arm/dose hierarchy into segments.
fn collect_segments(trial: &Trial) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    for step in &trial.treatment_list.step {
        if !step.match_clauses.is_empty() {
            segments.push(Segment {
                level: MatchLevel::Step,
                internal_id: step.step_internal_id,
                code: &step.step_code,
                suspended: is_suspended(step.step_suspended.as_ref()),
                clauses: &step.match_clauses,
            });
        }
        for arm in &step.arm {
            if !arm.match_clauses.is_empty() {
                segments.push(Segment {
                    level: MatchLevel::Arm,
                    internal_id: arm.arm_internal_id,
                    code: &arm.arm_code,
                    suspended: is_suspended(arm.arm_suspended.as_ref()),
                    clauses: &arm.match_clauses,
                });
            }
            for dose in &arm.dose_level {
                if !dose.match_clauses.is_empty() {
                    segments.push(Segment {
                        level: MatchLevel::Dose,
                        internal_id: dose.level_internal_id,
                        code: &dose.level_code,
                        suspended: is_suspended(dose.level_suspended.as_ref()),
                        clauses: &dose.match_clauses,
                    });
                }
            }
        }
    }
    segments
}
