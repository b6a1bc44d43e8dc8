//! Narrow interfaces to the patient/genomic record store, trial repository
//! and result sink, plus the JSON-file-backed implementations used by the
//! command line worker.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::matches::query::{eval_query, Query};
use crate::matches::schema::{ClinicalRecord, GenomicRecord, Trial, TrialMatchRecord};

/// Read-only access to patient and genomic records.
///
/// Queries are the structured fragments produced by criterion translation;
/// implementations decide how to execute them.
pub trait PatientStore {
    /// All clinical records matching the query.
    fn find_clinical(&self, query: &Query) -> Result<Vec<ClinicalRecord>, anyhow::Error>;
    /// All genomic records matching the query.
    fn find_genomic(&self, query: &Query) -> Result<Vec<GenomicRecord>, anyhow::Error>;
    /// The universe of known sample ids; negated genomic leaves subtract
    /// their positive match set from this.
    fn distinct_sample_ids(&self) -> Result<BTreeSet<String>, anyhow::Error>;
    /// Map sample ids to MRNs for the given MRN list.
    fn samples_by_mrn(&self, mrns: &[String]) -> Result<IndexMap<String, String>, anyhow::Error>;
}

/// Read-only access to trial documents.
pub trait TrialSource {
    /// All open or closed trials eligible for matching.
    fn open_or_closed_trials(&self) -> Result<Vec<Trial>, anyhow::Error>;
}

/// Persistence of a completed run's output.
pub trait ResultSink {
    /// Replace the full trial match collection; all-or-nothing, called once
    /// after ranking completes.
    fn replace_all_trial_matches(&self, records: &[TrialMatchRecord]) -> Result<(), anyhow::Error>;
}

/// In-memory record store backed by JSON files.
#[derive(Debug, Clone, Default)]
pub struct JsonFileStore {
    clinical: Vec<ClinicalRecord>,
    genomic: Vec<GenomicRecord>,
}

impl JsonFileStore {
    /// Construct from already-loaded records (used by tests).
    pub fn with_records(clinical: Vec<ClinicalRecord>, genomic: Vec<GenomicRecord>) -> Self {
        Self { clinical, genomic }
    }

    /// Load clinical and genomic record arrays from JSON files.
    pub fn from_paths(
        path_clinical: &Path,
        path_genomic: &Path,
    ) -> Result<Self, anyhow::Error> {
        let clinical: Vec<ClinicalRecord> = serde_json::from_reader(File::open(path_clinical)?)?;
        let genomic: Vec<GenomicRecord> = serde_json::from_reader(File::open(path_genomic)?)?;
        tracing::debug!(
            "loaded {} clinical and {} genomic records",
            clinical.len(),
            genomic.len()
        );
        Ok(Self { clinical, genomic })
    }

    /// Number of loaded clinical records.
    pub fn clinical_count(&self) -> usize {
        self.clinical.len()
    }

    /// Number of loaded genomic records.
    pub fn genomic_count(&self) -> usize {
        self.genomic.len()
    }
}

impl PatientStore for JsonFileStore {
    fn find_clinical(&self, query: &Query) -> Result<Vec<ClinicalRecord>, anyhow::Error> {
        Ok(self
            .clinical
            .iter()
            .filter(|record| eval_query(query, *record))
            .cloned()
            .collect())
    }

    fn find_genomic(&self, query: &Query) -> Result<Vec<GenomicRecord>, anyhow::Error> {
        Ok(self
            .genomic
            .iter()
            .filter(|record| eval_query(query, *record))
            .cloned()
            .collect())
    }

    fn distinct_sample_ids(&self) -> Result<BTreeSet<String>, anyhow::Error> {
        Ok(self
            .clinical
            .iter()
            .map(|record| record.sample_id.clone())
            .collect())
    }

    fn samples_by_mrn(&self, mrns: &[String]) -> Result<IndexMap<String, String>, anyhow::Error> {
        Ok(self
            .clinical
            .iter()
            .filter(|record| mrns.iter().any(|mrn| *mrn == record.mrn))
            .map(|record| (record.sample_id.clone(), record.mrn.clone()))
            .collect())
    }
}

/// Trial repository backed by a JSON file.
#[derive(Debug, Clone, Default)]
pub struct JsonFileTrialSource {
    trials: Vec<Trial>,
}

impl JsonFileTrialSource {
    /// Construct from already-loaded trials (used by tests).
    pub fn with_trials(trials: Vec<Trial>) -> Self {
        Self { trials }
    }

    /// Load a trial array from a JSON file.
    pub fn from_path(path: &Path) -> Result<Self, anyhow::Error> {
        let trials: Vec<Trial> = serde_json::from_reader(File::open(path)?)?;
        tracing::debug!("loaded {} trials", trials.len());
        Ok(Self { trials })
    }
}

impl TrialSource for JsonFileTrialSource {
    fn open_or_closed_trials(&self) -> Result<Vec<Trial>, anyhow::Error> {
        Ok(self.trials.clone())
    }
}

/// Result sink writing one JSON document, atomically via temp file rename so
/// a failed run never leaves a partially written output behind.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    /// Sink writing to the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ResultSink for JsonFileSink {
    fn replace_all_trial_matches(&self, records: &[TrialMatchRecord]) -> Result<(), anyhow::Error> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, records)?;
        tmp.write_all(b"\n")?;
        tmp.persist(&self.path)?;
        tracing::debug!("wrote {} trial match records to {:?}", records.len(), self.path);
        Ok(())
    }
}
