//! Drives a complete benchmark: write phase, read phase, reports and cleanup.

use std::path::Path;
use std::time::Instant;

use serde::Serialize;

use crate::cleanup::{CleanupSummary, cleanup};
use crate::config::Config;
use crate::content::ContentSource;
use crate::error::{Error, Result};
use crate::pool::WorkerPool;
use crate::report::{Operation, PhaseSummary, Report};
use crate::storage::StorageFactory;

/// The results of a complete run.
#[derive(Debug)]
pub struct RunOutcome {
    /// The write phase report, if the phase ran.
    pub write: Option<Report>,
    /// The read phase report, if the phase ran.
    pub read: Option<Report>,
    /// The cleanup outcome, if cleanup ran.
    pub cleanup: Option<CleanupSummary>,
}

/// The run parameters as written to the JSON report.
#[derive(Debug, Serialize)]
pub struct RunParameters {
    endpoints: Vec<String>,
    bucket: String,
    prefix: String,
    object_size: u64,
    object_split: u64,
    multipart_size: u64,
    count: u64,
    workers: usize,
}

impl RunParameters {
    fn new(config: &Config) -> Self {
        Self {
            endpoints: config.endpoints(),
            bucket: config.bucket.clone(),
            prefix: config.prefix.clone(),
            object_size: config.object_size.as_u64(),
            object_split: config.object_split,
            multipart_size: config.multipart_size.as_u64(),
            count: config.count,
            workers: config.workers,
        }
    }
}

/// The serialized form of a [`RunOutcome`].
#[derive(Debug, Serialize)]
pub struct RunSummary {
    /// The parameters of the run.
    pub parameters: RunParameters,
    /// The write phase, if it ran.
    pub write: Option<PhaseSummary>,
    /// The read phase, if it ran.
    pub read: Option<PhaseSummary>,
    /// The cleanup, if it ran.
    pub cleanup: Option<CleanupSummary>,
}

impl RunOutcome {
    /// Builds the serializable summary for `config`.
    pub fn summary(&self, config: &Config) -> RunSummary {
        RunSummary {
            parameters: RunParameters::new(config),
            write: self.write.as_ref().map(Report::summary),
            read: self.read.as_ref().map(Report::summary),
            cleanup: self.cleanup.clone(),
        }
    }
}

/// Runs the benchmark described by `config` against clients built by `factory`.
///
/// The configuration is validated and every client constructed before the first request. Failed
/// operations are counted in the reports and never abort the run.
pub async fn run(config: &Config, factory: &dyn StorageFactory) -> Result<RunOutcome> {
    config.validate()?;

    println!("{config}");

    print!("Generating in-memory sample data... ");
    let start = Instant::now();
    let source = ContentSource::generate(config.object_size.as_u64(), config.object_split)?;
    println!("Done ({:?})", start.elapsed());
    println!();
    tracing::debug!(?source, repeats = source.repeats(), "generated sample");

    let mut pool = WorkerPool::start(config, factory)?;

    let mut write = None;
    if config.write {
        println!("Running {} test...", Operation::Write);
        write = Some(pool.run_phase(Operation::Write, &source).await?);
    }

    let mut read = None;
    if config.read {
        println!("Running {} test...", Operation::Read);
        read = Some(pool.run_phase(Operation::Read, &source).await?);
    }

    pool.shutdown().await?;

    println!();
    println!("{config}");
    for report in [&write, &read].into_iter().flatten() {
        println!("{report}");
    }

    let mut outcome = RunOutcome {
        write,
        read,
        cleanup: None,
    };

    if config.cleanup {
        let endpoints = config.endpoints();
        let endpoint = endpoints.first().map(String::as_str).unwrap_or_default();
        let storage = factory.connect(endpoint).map_err(|cause| Error::Connect {
            endpoint: endpoint.to_owned(),
            cause,
        })?;

        outcome.cleanup = Some(
            cleanup(
                storage.as_ref(),
                &config.bucket,
                &config.prefix,
                config.count,
                config.verbose,
            )
            .await?,
        );
    }

    if let Some(path) = &config.report_path {
        write_summary(path, &outcome.summary(config)).await?;
        tracing::info!(path = %path.display(), "wrote run summary");
    }

    Ok(outcome)
}

async fn write_summary(path: &Path, summary: &RunSummary) -> Result<()> {
    let json = serde_json::to_vec_pretty(summary)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}
