//! Logging and observability
//!
//! This module provides structured logging with support for:
//! - JSON-formatted log files with daily or hourly rotation
//! - Configurable log levels, overridable through `RUST_LOG`
//! - Human-readable console output on stderr
//!
//! # Example
//!
//! ```no_run
//! use meridian::logging::init_logging;
//! use meridian::config::LoggingConfig;
//!
//! let config = LoggingConfig::default();
//! let _guard = init_logging("info", &config).expect("Failed to initialize logging");
//!
//! tracing::info!(job_id = "job-1", "Import started");
//! ```

pub mod structured;

pub use structured::{init_logging, LoggingGuard};

/// Log the end of a job with its outcome
///
/// # Example
///
/// ```no_run
/// use meridian::log_job_finished;
///
/// log_job_finished!("import", "job-1", "partial", 4);
/// ```
#[macro_export]
macro_rules! log_job_finished {
    ($kind:expr, $job_id:expr, $status:expr, $resources:expr) => {
        tracing::info!(
            kind = $kind,
            job_id = %$job_id,
            status = %$status,
            resources = $resources,
            "Job finished"
        );
    };
}

/// Log an error with context
///
/// # Example
///
/// ```no_run
/// use meridian::log_error_with_context;
/// use meridian::domain::MeridianError;
///
/// let error = MeridianError::Configuration("Invalid config".to_string());
/// log_error_with_context!(&error, "Failed to load configuration");
/// ```
#[macro_export]
macro_rules! log_error_with_context {
    ($error:expr, $context:expr) => {
        tracing::error!(
            error = %$error,
            context = $context,
            "Error occurred"
        );
    };
}
