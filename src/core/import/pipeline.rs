//! Import pipeline
//!
//! Drives one import job through its stages:
//!
//! 1. **validating** - decode and structurally check the payload
//! 2. **converting** - obtain generation A resources from the converter
//! 3. **transforming** - map every resource to generation B
//! 4. **matching** - resolve the patient, parking the job if that needs a decision
//! 5. **recording** - rewrite patient references, record provenance, write to the store
//!
//! Every stage change goes through the [`JobManager`] compare-and-set, so two
//! workers can never both finalize the same job.

use super::validation::{validate_payload, ValidatedDocument};
use crate::adapters::converter::DocumentConverter;
use crate::adapters::store::{ClinicalStore, PatientIndex};
use crate::config::MeridianConfig;
use crate::core::matching::{demographics_from_patient, PatientMatcher};
use crate::core::provenance::ProvenanceTracker;
use crate::core::state::JobManager;
use crate::core::transform::VersionTransformer;
use crate::domain::ids::JobId;
use crate::domain::{
    ClinicalResource, Demographics, FailureKind, FieldValue, Generation, ImportJob,
    ImportMetadata, ImportStage, ImportStatus, InputFormat, MatchOutcome, MeridianError,
    OrganizationId, ParkedImport, PatientId, PatientResolution, ProducedResource, Reference,
    ResourceErrorDetail, ResourceId, ResourceType, Result, StorageError,
};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_MAX_PAYLOAD_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(30);

/// A request to import one document
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub format: InputFormat,

    /// Known patient; skips matching when set
    pub patient_id: Option<PatientId>,
    pub organization_id: OrganizationId,

    /// Base64 encoded document
    pub payload: String,
    pub metadata: ImportMetadata,
}

/// Import pipeline
pub struct ImportPipeline {
    converter: Option<Arc<dyn DocumentConverter>>,
    transformer: Arc<VersionTransformer>,
    store: Arc<dyn ClinicalStore>,
    index: Arc<dyn PatientIndex + Send + Sync>,
    matcher: PatientMatcher,
    provenance: Arc<ProvenanceTracker>,
    jobs: JobManager,
    actor: String,
    max_payload_bytes: usize,
    store_timeout: Duration,
}

impl ImportPipeline {
    /// Create a pipeline with default limits and the built-in transform rules
    pub fn new(
        store: Arc<dyn ClinicalStore>,
        index: Arc<dyn PatientIndex + Send + Sync>,
        provenance: Arc<ProvenanceTracker>,
        jobs: JobManager,
    ) -> Self {
        let matcher = PatientMatcher::new(index.clone(), &Default::default());
        Self {
            converter: None,
            transformer: Arc::new(VersionTransformer::new()),
            store,
            index,
            matcher,
            provenance,
            jobs,
            actor: "meridian".to_string(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Apply the limits, thresholds and actor from the configuration
    pub fn configure(mut self, config: &MeridianConfig) -> Self {
        self.matcher = PatientMatcher::new(self.index.clone(), &config.matching);
        self.actor = config.application.actor.clone();
        self.max_payload_bytes = config.import.max_payload_bytes;
        self.store_timeout = Duration::from_secs(config.store.timeout_seconds);
        self
    }

    pub fn with_converter(mut self, converter: Option<Arc<dyn DocumentConverter>>) -> Self {
        self.converter = converter;
        self
    }

    pub fn with_transformer(mut self, transformer: Arc<VersionTransformer>) -> Self {
        self.transformer = transformer;
        self
    }

    /// Run an import
    ///
    /// # Returns
    ///
    /// The job in its final state, or parked in `matching` when the patient
    /// could not be resolved without a caller decision. Validation,
    /// conversion and storage failures end the job in `failed` and are
    /// returned inside the job, not as an error.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the format needs a converter and
    /// none is configured, and a state error if the job store rejects a
    /// transition.
    pub async fn import(&self, request: ImportRequest) -> Result<ImportJob> {
        if request.format != InputFormat::FhirR4 && self.converter.is_none() {
            return Err(MeridianError::Configuration(format!(
                "importing {} documents requires a [converter] section",
                request.format
            )));
        }

        let mut job = ImportJob::new(
            request.organization_id,
            request.format,
            request.patient_id,
            request.metadata,
        );
        self.jobs.create_import(&job).await?;
        tracing::info!(job_id = %job.id, format = %job.format, "Import started");

        self.jobs
            .advance_import(&mut job, ImportStatus::Processing, ImportStage::Validating)
            .await?;
        let document = match validate_payload(
            &request.payload,
            job.format,
            job.metadata.document_subtype.as_deref(),
            self.max_payload_bytes,
        ) {
            Ok(document) => document,
            Err(e) => return self.fail(job, FailureKind::Validation, e).await,
        };
        job.source_document_id = Some(document.document_id.clone());
        job.warnings.extend(document.warnings.iter().cloned());

        self.jobs
            .advance_import(&mut job, ImportStatus::Processing, ImportStage::Converting)
            .await?;
        let source = match self.convert(&job, document).await {
            Ok((resources, warnings)) => {
                job.warnings.extend(warnings);
                resources
            }
            Err(e) => {
                let kind = if e.is_connection_error() {
                    FailureKind::Unreachable
                } else {
                    FailureKind::Conversion
                };
                return self.fail(job, kind, e).await;
            }
        };

        self.jobs
            .advance_import(&mut job, ImportStatus::Processing, ImportStage::Transforming)
            .await?;
        let batch = self
            .transformer
            .transform_all(&source, Generation::A, Generation::B);
        job.warnings
            .extend(batch.warnings.iter().map(ToString::to_string));
        for err in &batch.errors {
            tracing::warn!(job_id = %job.id, resource_id = %err.resource_id(), "Resource failed to transform");
            job.errors.push(
                ResourceErrorDetail::new(err.to_string())
                    .with_stage(ImportStage::Transforming.to_string())
                    .to_string(),
            );
        }
        job.unconverted_ids = batch.passthrough.clone();

        let produced: Vec<ClinicalResource> = batch
            .resources
            .into_iter()
            .filter(|r| r.generation == Generation::B)
            .collect();
        let rule_versions: Vec<String> = batch.rule_versions.into_iter().collect();
        tracing::info!(
            job_id = %job.id,
            input = source.len(),
            produced = produced.len(),
            errors = job.errors.len(),
            unconverted = job.unconverted_ids.len(),
            "Transformation finished"
        );

        if produced.is_empty() {
            let err = MeridianError::Validation(format!(
                "no resources produced from {} input resources",
                source.len()
            ));
            return self.fail(job, FailureKind::NoResources, err).await;
        }

        self.jobs
            .advance_import(&mut job, ImportStatus::Processing, ImportStage::Matching)
            .await?;
        if job.patient_id.is_none() {
            let demographics = produced
                .iter()
                .find(|r| r.resource_type == ResourceType::Patient)
                .map(demographics_from_patient)
                .unwrap_or_default();
            let result = match self
                .matcher
                .match_patient(&demographics, &job.organization_id)
                .await
            {
                Ok(result) => result,
                Err(e) => return self.fail(job, storage_failure(&e), e).await,
            };

            if result.outcome == MatchOutcome::Matched {
                job.patient_id = result.patient_id;
            } else {
                job.warnings.push(
                    MeridianError::PatientMatchConflict(format!(
                        "{} with {} candidates; awaiting patient resolution",
                        result.outcome,
                        result.candidates.len()
                    ))
                    .to_string(),
                );
                job.pending_match = Some(result);
                job.parked = Some(ParkedImport {
                    resources: produced,
                    rule_versions,
                    demographics,
                });
                self.jobs.save_import(&mut job).await?;
                tracing::info!(job_id = %job.id, "Import parked pending patient resolution");
                return Ok(job);
            }
        }

        self.record(job, produced, rule_versions).await
    }

    /// Release a parked import with the caller's patient decision
    ///
    /// The job is claimed out of `matching` before a new patient is
    /// registered, so of two concurrent calls for the same job only one
    /// registers anything.
    ///
    /// # Returns
    ///
    /// The job in its final state. A patient that cannot be registered fails
    /// the job with a storage failure.
    ///
    /// # Errors
    ///
    /// Returns a state error if the job does not exist, is not parked, or was
    /// claimed by another caller.
    pub async fn resolve_patient(
        &self,
        job_id: &JobId,
        resolution: PatientResolution,
    ) -> Result<ImportJob> {
        let mut job = self.jobs.load_import(job_id).await?;
        let parked = match (job.is_parked(), job.parked.take()) {
            (true, Some(parked)) => parked,
            _ => {
                return Err(MeridianError::State(format!(
                    "import job {job_id} is not waiting for patient resolution"
                )))
            }
        };
        self.jobs
            .advance_import(&mut job, ImportStatus::Processing, ImportStage::Recording)
            .await?;

        let patient_id = match resolution {
            PatientResolution::Existing(patient_id) => patient_id,
            PatientResolution::CreateNew => match self
                .index
                .register_patient(&job.organization_id, &parked.demographics)
                .await
            {
                Ok(patient_id) => patient_id,
                Err(e) => return self.fail(job, storage_failure(&e), e).await,
            },
        };
        tracing::info!(job_id = %job.id, patient_id = %patient_id, "Patient resolved");
        job.patient_id = Some(patient_id);

        self.write_out(job, parked.resources, parked.rule_versions)
            .await
    }

    async fn convert(
        &self,
        job: &ImportJob,
        document: ValidatedDocument,
    ) -> Result<(Vec<ClinicalResource>, Vec<String>)> {
        if let Some(resources) = document.resources {
            return Ok((resources, Vec::new()));
        }
        let converter = self.converter.as_ref().ok_or_else(|| {
            MeridianError::Configuration("no document converter configured".to_string())
        })?;
        let template = document.template.as_deref().unwrap_or_default();

        tracing::debug!(job_id = %job.id, template = %template, "Calling document converter");
        let output = converter.convert(&document.text, job.format, template).await?;
        Ok((
            output.resources,
            output.warnings.iter().map(ToString::to_string).collect(),
        ))
    }

    async fn record(
        &self,
        mut job: ImportJob,
        resources: Vec<ClinicalResource>,
        rule_versions: Vec<String>,
    ) -> Result<ImportJob> {
        self.jobs
            .advance_import(&mut job, ImportStatus::Processing, ImportStage::Recording)
            .await?;
        self.write_out(job, resources, rule_versions).await
    }

    /// Recording stage of a job that already holds the `recording` state
    async fn write_out(
        &self,
        mut job: ImportJob,
        mut resources: Vec<ClinicalResource>,
        rule_versions: Vec<String>,
    ) -> Result<ImportJob> {
        let Some(patient_id) = job.patient_id.clone() else {
            let err = MeridianError::State(format!(
                "import job {} reached recording without a patient",
                job.id
            ));
            return self.fail(job, FailureKind::Storage, err).await;
        };

        attach_to_patient(&mut resources, &patient_id);

        let Some(document_id) = job.source_document_id.clone() else {
            return Err(MeridianError::State(format!(
                "import job {} has no source document",
                job.id
            )));
        };
        let produced: Vec<ProducedResource> = resources
            .iter()
            .map(|r| ProducedResource::new(r.resource_type.clone(), r.id.clone()))
            .collect();
        let record = match self
            .provenance
            .record(document_id, produced, rule_versions, &self.actor)
            .await
        {
            Ok(record) => record,
            Err(e) => return self.fail(job, storage_failure(&e), e).await,
        };
        job.provenance_id = Some(record.id);

        let written = tokio::time::timeout(self.store_timeout, self.store.write(&patient_id, &resources))
            .await
            .unwrap_or_else(|_| {
                Err(StorageError::Timeout(format!(
                    "write for patient {patient_id} exceeded {}s",
                    self.store_timeout.as_secs()
                ))
                .into())
            });
        match written {
            Ok(ids) => job.stored_ids = ids,
            Err(e) => return self.fail(job, storage_failure(&e), e).await,
        }

        for resource in &resources {
            job.counts.increment(&resource.resource_type);
        }
        let status = if job.errors.is_empty() && job.unconverted_ids.is_empty() {
            ImportStatus::Completed
        } else {
            ImportStatus::Partial
        };
        self.jobs
            .advance_import(&mut job, status, ImportStage::Finished)
            .await?;

        tracing::info!(
            job_id = %job.id,
            status = %job.status,
            resources = job.counts.total(),
            warnings = job.warnings.len(),
            errors = job.errors.len(),
            "Import finished"
        );
        Ok(job)
    }

    async fn fail(
        &self,
        mut job: ImportJob,
        kind: FailureKind,
        error: MeridianError,
    ) -> Result<ImportJob> {
        tracing::error!(job_id = %job.id, stage = %job.stage, failure = %kind, error = %error, "Import failed");
        job.errors.push(
            ResourceErrorDetail::new(error.to_string())
                .with_stage(job.stage.to_string())
                .to_string(),
        );
        job.failure = Some(kind);
        job.counts = Default::default();
        self.jobs
            .advance_import(&mut job, ImportStatus::Failed, ImportStage::Finished)
            .await?;
        crate::log_job_finished!("import", job.id, job.status, job.counts.total());
        Ok(job)
    }
}

fn storage_failure(error: &MeridianError) -> FailureKind {
    if error.is_connection_error() {
        FailureKind::Unreachable
    } else {
        FailureKind::Storage
    }
}

/// Points every patient reference at the resolved patient
///
/// A single imported Patient resource takes the resolved id so the stored
/// record and the references agree.
fn attach_to_patient(resources: &mut [ClinicalResource], patient_id: &PatientId) {
    let target = format!("Patient/{patient_id}");
    let patients = resources
        .iter()
        .filter(|r| r.resource_type == ResourceType::Patient)
        .count();

    for resource in resources.iter_mut() {
        if resource.resource_type == ResourceType::Patient {
            if patients == 1 {
                if let Ok(id) = ResourceId::new(patient_id.as_str()) {
                    resource.id = id;
                }
            }
            continue;
        }
        for name in ["subject", "patient"] {
            if let Some(value) = resource.fields.get_mut(name) {
                rewrite_reference(value, &target);
            }
        }
    }
}

fn rewrite_reference(value: &mut FieldValue, target: &str) {
    match value {
        FieldValue::Reference(reference) => retarget(reference, target),
        FieldValue::List(items) => items.iter_mut().for_each(|item| rewrite_reference(item, target)),
        _ => {}
    }
}

fn retarget(reference: &mut Reference, target: &str) {
    let is_patient = reference
        .reference
        .as_deref()
        .is_some_and(|r| r.starts_with("Patient/") || r.starts_with("urn:uuid:"))
        || reference.target_type.as_deref() == Some("Patient");
    if is_patient {
        reference.reference = Some(target.to_string());
    }
}

/// Demographics of a parked job, for display to whoever resolves it
pub fn parked_demographics(job: &ImportJob) -> Option<&Demographics> {
    job.parked.as_ref().map(|p| &p.demographics)
}
