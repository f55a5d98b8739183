//! The worker pool and the phase dispatcher.
//!
//! A [`WorkerPool`] owns a fixed set of worker tasks. Each worker holds its own storage client and
//! pulls [`Request`]s from one shared, bounded channel; every executed request produces exactly
//! one [`Response`] on the shared response channel. A phase submits `count` requests from a
//! separate task and aggregates exactly `count` responses in completion order.

use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;

use crate::config::Config;
use crate::content::ContentSource;
use crate::error::{Error, Result};
use crate::executor::{Executor, Request, Response, object_key};
use crate::report::{Aggregator, Operation, Report};
use crate::storage::{BoxedStorage, StorageFactory};

/// The request receiver shared by all workers. The lock only serializes the handoff of the next
/// request; it is released before the request executes.
type SharedReceiver = Arc<Mutex<mpsc::Receiver<Request>>>;

/// A fixed set of workers, each bound to one endpoint.
#[derive(Debug)]
pub struct WorkerPool {
    requests: mpsc::Sender<Request>,
    responses: mpsc::Receiver<Response>,
    workers: JoinSet<()>,
    prefix: String,
    count: u64,
    object_size: u64,
    verbose: bool,
}

impl WorkerPool {
    /// Connects one client per worker and starts all workers.
    ///
    /// Worker `i` is bound to `endpoints[i % endpoints.len()]`. All clients are constructed before
    /// the first worker is spawned, so a failing endpoint aborts the run before any request.
    pub fn start(config: &Config, factory: &dyn StorageFactory) -> Result<Self> {
        let endpoints = config.endpoints();
        if endpoints.is_empty() || config.workers == 0 {
            return Err(Error::InvalidConfig(
                "a worker pool needs at least one endpoint and one worker".into(),
            ));
        }

        let clients = (0..config.workers)
            .map(|id| {
                let endpoint = &endpoints[id % endpoints.len()];
                factory.connect(endpoint).map_err(|cause| Error::Connect {
                    endpoint: endpoint.clone(),
                    cause,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let (requests, receiver) = mpsc::channel(1);
        let (responder, responses) = mpsc::channel(config.workers);
        let receiver = Arc::new(Mutex::new(receiver));
        let executor = Arc::new(Executor::from_config(config));

        let mut workers = JoinSet::new();
        for (id, storage) in clients.into_iter().enumerate() {
            tracing::debug!(worker = id, ?storage, "starting worker");
            workers.spawn(run_worker(
                id,
                storage,
                Arc::clone(&executor),
                Arc::clone(&receiver),
                responder.clone(),
            ));
        }

        Ok(Self {
            requests,
            responses,
            workers,
            prefix: config.prefix.clone(),
            count: config.count,
            object_size: config.object_size.as_u64(),
            verbose: config.verbose,
        })
    }

    /// The number of running workers.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Returns `true` if no workers are running.
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Runs one phase: submits one request per key and waits for exactly as many responses.
    ///
    /// Write requests each get a fresh view over `source`.
    pub async fn run_phase(
        &mut self,
        operation: Operation,
        source: &ContentSource,
    ) -> Result<Report> {
        let count = self.count;
        let mut aggregator = Aggregator::new(operation, self.object_size, count);

        let submit = tokio::spawn(submit(
            self.requests.clone(),
            operation,
            self.prefix.clone(),
            count,
            source.clone(),
        ));

        let bar = if self.verbose {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new(count)
                .with_message(format!("{operation} operations"))
                .with_style(ProgressStyle::with_template(
                    "{msg}\n{wide_bar} {pos}/{len} {elapsed}",
                )?);
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        };

        for completed in 1..=count {
            // Workers only exit once the request channel closes, so any worker finishing during
            // a phase means its response is lost.
            let response = tokio::select! {
                biased;
                response = self.responses.recv() => response,
                joined = self.workers.join_next() => {
                    bar.finish_and_clear();
                    submit.abort();
                    joined.transpose()?;
                    None
                }
            };

            let Some(response) = response else {
                bar.finish_and_clear();
                submit.abort();
                return Err(Error::WorkersExited {
                    received: aggregator.recorded(),
                    expected: count,
                });
            };

            aggregator.record(&response);
            if let Some(error) = &response.error {
                tracing::debug!(
                    %operation,
                    error = error as &dyn std::error::Error,
                    "operation failed"
                );
            }

            if self.verbose {
                let secs = aggregator.elapsed().as_secs_f64();
                let throughput = if secs > 0.0 {
                    aggregator.bytes_transmitted() as f64 / (1024.0 * 1024.0) / secs
                } else {
                    0.0
                };
                let error = response
                    .error
                    .map(|error| format!(", error: {error}"))
                    .unwrap_or_default();
                println!(
                    "{operation} operation completed in {:0.2}s ({completed}/{count}) - {throughput:0.2}MB/s{error}",
                    response.duration.as_secs_f64(),
                );
            }
            bar.inc(1);
        }

        bar.finish_and_clear();
        submit.await?;

        Ok(aggregator.finish())
    }

    /// Closes the request channel and waits for every worker to exit.
    pub async fn shutdown(self) -> Result<()> {
        let Self {
            requests,
            responses,
            mut workers,
            ..
        } = self;
        drop(requests);
        drop(responses);

        while let Some(result) = workers.join_next().await {
            result?;
        }

        Ok(())
    }
}

async fn submit(
    requests: mpsc::Sender<Request>,
    operation: Operation,
    prefix: String,
    count: u64,
    source: ContentSource,
) {
    for index in 0..count {
        let key = object_key(&prefix, index);
        let request = match operation {
            Operation::Write => Request::Write {
                key,
                content: source.reader(),
            },
            Operation::Read => Request::Read { key },
        };

        // All workers are gone; the phase reports how far it got.
        if requests.send(request).await.is_err() {
            break;
        }
    }
}

async fn run_worker(
    id: usize,
    storage: BoxedStorage,
    executor: Arc<Executor>,
    requests: SharedReceiver,
    responses: mpsc::Sender<Response>,
) {
    loop {
        let request = requests.lock().await.recv().await;
        let Some(request) = request else {
            break;
        };

        let response = executor.execute(storage.as_ref(), request).await;
        if responses.send(response).await.is_err() {
            break;
        }
    }

    tracing::trace!(worker = id, "worker exited");
}
