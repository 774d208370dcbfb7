//! Export pipeline
//!
//! Resolves an export query against the clinical store, filters the stored
//! generation B resources, transforms them to generation A when the format
//! asks for it and publishes the packaged deliverable.
//!
//! Organization scoped (bulk) exports fan out one sub-export per patient with
//! bounded concurrency. A failing sub-export is recorded against its patient
//! and the others carry on; the job only fails when every sub-export failed.

use super::bundle::BundlePackager;
use super::filter::ExportFilter;
use crate::adapters::deliverable::DeliverableStore;
use crate::adapters::store::{ClinicalStore, ResourceQuery};
use crate::config::MeridianConfig;
use crate::core::state::JobManager;
use crate::core::transform::VersionTransformer;
use crate::domain::{
    ClinicalResource, DateRange, ExportFormat, ExportJob, ExportScope, ExportStatus, Generation,
    MeridianError, PatientId, PatientOutcome, ResourceErrorDetail, ResourceType, Result,
    StorageError,
};
use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// A request to export stored resources
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub scope: ExportScope,
    pub format: ExportFormat,

    /// Requested types, empty means all
    pub resource_types: BTreeSet<ResourceType>,
    pub date_range: Option<DateRange>,

    /// Purpose of use code, recorded on the job
    pub purpose: Option<String>,
}

/// Resources gathered for one patient
#[derive(Debug, Default)]
struct PatientSlice {
    resources: Vec<ClinicalResource>,
    warnings: Vec<String>,
    errors: Vec<String>,
}

/// Export pipeline
pub struct ExportPipeline {
    store: Arc<dyn ClinicalStore>,
    deliverables: Arc<dyn DeliverableStore>,
    jobs: JobManager,
    transformer: Arc<VersionTransformer>,
    packager: BundlePackager,
    store_timeout: Duration,
    max_concurrency: usize,
    shutdown: Option<watch::Receiver<bool>>,
}

impl ExportPipeline {
    pub fn new(
        store: Arc<dyn ClinicalStore>,
        deliverables: Arc<dyn DeliverableStore>,
        jobs: JobManager,
    ) -> Self {
        Self {
            store,
            deliverables,
            jobs,
            transformer: Arc::new(VersionTransformer::new()),
            packager: BundlePackager::new(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            shutdown: None,
        }
    }

    /// Apply the store timeout and bulk concurrency from the configuration
    pub fn configure(mut self, config: &MeridianConfig) -> Self {
        self.store_timeout = Duration::from_secs(config.store.timeout_seconds);
        self.max_concurrency = config.export.max_concurrency.max(1);
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_transformer(mut self, transformer: Arc<VersionTransformer>) -> Self {
        self.transformer = transformer;
        self
    }

    /// Stop scheduling bulk sub-exports once the signal turns true
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Run an export
    ///
    /// # Returns
    ///
    /// The job in its final state. A malformed query, an unreachable store
    /// or a failed publication end the job in `failed` and are reported in
    /// the job's errors.
    ///
    /// # Errors
    ///
    /// Returns a state error if the job store rejects a transition.
    pub async fn export(&self, request: ExportRequest) -> Result<ExportJob> {
        let mut job = ExportJob::new(
            request.scope,
            request.format,
            request.resource_types,
            request.date_range,
            request.purpose,
        );
        self.jobs.create_export(&job).await?;
        tracing::info!(job_id = %job.id, format = %job.format, "Export started");

        let filter = ExportFilter::new(job.resource_types.clone(), job.date_range);
        if let Err(e) = filter.validate() {
            return self.fail(job, e).await;
        }
        self.jobs
            .advance_export(&mut job, ExportStatus::Processing)
            .await?;

        let target = job.format.target_generation();
        let resources = match job.scope.clone() {
            ExportScope::Patient(patient_id) => {
                match self.collect_patient(&patient_id, &filter, target).await {
                    Ok(slice) => {
                        job.warnings.extend(slice.warnings);
                        job.errors.extend(slice.errors);
                        slice.resources
                    }
                    Err(e) => return self.fail(job, e).await,
                }
            }
            ExportScope::Organization(organization_id) => {
                let patients = match self
                    .bounded(self.store.list_patients(&organization_id))
                    .await
                {
                    Ok(patients) => patients,
                    Err(e) => return self.fail(job, e).await,
                };
                tracing::info!(
                    job_id = %job.id,
                    organization_id = %organization_id,
                    patients = patients.len(),
                    "Bulk export fan-out"
                );
                let resources = self.collect_bulk(&mut job, patients, &filter, target).await;
                if !job.patient_outcomes.is_empty() && job.succeeded_patients() == 0 {
                    let err = MeridianError::Other(format!(
                        "all {} patient sub-exports failed",
                        job.patient_outcomes.len()
                    ));
                    return self.fail(job, err).await;
                }
                resources
            }
        };

        let deliverable = match self.packager.package(resources, job.format) {
            Ok(deliverable) => deliverable,
            Err(e) => return self.fail(job, e).await,
        };
        let published = match self.deliverables.publish(&job.id, &deliverable).await {
            Ok(published) => published,
            Err(e) => return self.fail(job, e).await,
        };

        job.resource_count = deliverable.resource_count;
        job.deliverable_size = deliverable.size();
        job.checksum = Some(deliverable.checksum);
        job.location = Some(published.location);
        job.expires_at = Some(published.expires_at);
        self.jobs
            .advance_export(&mut job, ExportStatus::Completed)
            .await?;

        tracing::info!(
            job_id = %job.id,
            resources = job.resource_count,
            bytes = job.deliverable_size,
            failed_patients = job.failed_patients(),
            "Export finished"
        );
        Ok(job)
    }

    async fn collect_bulk(
        &self,
        job: &mut ExportJob,
        patients: Vec<PatientId>,
        filter: &ExportFilter,
        target: Generation,
    ) -> Vec<ClinicalResource> {
        let mut results: Vec<(PatientId, Result<PatientSlice>)> = stream::iter(patients)
            .map(|patient_id| {
                let cancelled = self.shutdown_requested();
                async move {
                    if cancelled {
                        let err = MeridianError::Other("not scheduled, shutdown requested".to_string());
                        return (patient_id, Err(err));
                    }
                    let result = self.collect_patient(&patient_id, filter, target).await;
                    (patient_id, result)
                }
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;
        results.sort_by(|a, b| a.0.cmp(&b.0));

        let mut resources = Vec::new();
        for (patient_id, result) in results {
            match result {
                Ok(slice) => {
                    job.patient_outcomes.push(PatientOutcome {
                        patient_id,
                        succeeded: true,
                        resource_count: slice.resources.len(),
                        error: None,
                    });
                    job.warnings.extend(slice.warnings);
                    job.errors.extend(slice.errors);
                    resources.extend(slice.resources);
                }
                Err(e) => {
                    tracing::warn!(job_id = %job.id, patient_id = %patient_id, error = %e, "Patient sub-export failed");
                    job.errors.push(
                        ResourceErrorDetail::new(e.to_string())
                            .with_resource_id(patient_id.to_string())
                            .with_resource_type("Patient")
                            .to_string(),
                    );
                    job.patient_outcomes.push(PatientOutcome {
                        patient_id,
                        succeeded: false,
                        resource_count: 0,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        resources
    }

    /// Query, filter and transform the resources of one patient
    async fn collect_patient(
        &self,
        patient_id: &PatientId,
        filter: &ExportFilter,
        target: Generation,
    ) -> Result<PatientSlice> {
        let query = ResourceQuery::for_patient(patient_id.clone())
            .with_types(filter.stored_types(target))
            .with_date_range(filter.date_range);
        let stored = self.bounded(self.store.query(&query)).await?;
        let read = stored.len();
        let filtered = filter.apply(stored, target);
        tracing::debug!(
            patient_id = %patient_id,
            read,
            kept = filtered.len(),
            "Patient resources filtered"
        );

        if target == Generation::B {
            return Ok(PatientSlice {
                resources: filtered,
                ..PatientSlice::default()
            });
        }

        let batch = self
            .transformer
            .transform_all(&filtered, Generation::B, target);
        Ok(PatientSlice {
            resources: batch.resources,
            warnings: batch.warnings.iter().map(ToString::to_string).collect(),
            errors: batch
                .errors
                .iter()
                .map(|e| ResourceErrorDetail::new(e.to_string()).with_stage("transforming").to_string())
                .collect(),
        })
    }

    /// Runs a store call under the configured timeout
    async fn bounded<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout(format!(
                "store call exceeded {}s",
                self.store_timeout.as_secs_f64()
            ))
            .into()),
        }
    }

    async fn fail(&self, mut job: ExportJob, error: MeridianError) -> Result<ExportJob> {
        tracing::error!(job_id = %job.id, error = %error, "Export failed");
        job.errors.push(error.to_string());
        self.jobs.advance_export(&mut job, ExportStatus::Failed).await?;
        crate::log_job_finished!("export", job.id, job.status, job.resource_count);
        Ok(job)
    }
}
