use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, trace, warn};

use crate::app_state::WorkerContext;
use crate::db::StoreError;
use crate::models::event::StatusEvent;
use crate::models::job::JobMessage;
use crate::models::video::{CountResult, VideoStatus};
use crate::services::guard::{self, GuardDecision};
use crate::services::pipeline::{self, PipelineError};
use crate::services::queue::{Delivery, QueueError};

const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// How a delivery was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Failed,
    /// The record was already terminal; nothing was processed.
    Skipped(VideoStatus),
    /// The entry could not be decoded into a job.
    Malformed,
}

/// One member of the worker consumer group.
pub struct Consumer {
    ctx: WorkerContext,
}

impl Consumer {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    pub fn name(&self) -> &str {
        &self.ctx.settings.consumer_name
    }

    /// Pull and handle jobs until `shutdown` flips. An in-flight job always
    /// runs to its decision before the loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(consumer = %self.name(), "Consumer loop started");
        let mut last_sweep: Option<Instant> = None;

        loop {
            let stopping = *shutdown.borrow();
            if stopping {
                break;
            }

            let sweep_due = last_sweep
                .map(|at| at.elapsed() >= self.ctx.settings.reclaim_interval)
                .unwrap_or(true);
            if sweep_due {
                match self.reclaim().await {
                    Ok(0) => trace!("No stale entries to reclaim"),
                    Ok(n) => info!(reclaimed = n, "Reclaimed stale entries"),
                    Err(e) => warn!(error = %e, "Reclaim sweep failed"),
                }
                last_sweep = Some(Instant::now());
            }

            // Only the wait is cancelled on shutdown, never the handling.
            let read = tokio::select! {
                _ = shutdown.changed() => break,
                read = self.ctx.queue.read_next(self.name(), self.ctx.settings.block_timeout) => read,
            };

            let delivery = match read {
                Ok(Some(delivery)) => delivery,
                Ok(None) => {
                    trace!("No jobs available");
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "Failed to read from job stream");
                    sleep(ERROR_BACKOFF).await;
                    continue;
                }
            };

            match self.handle_delivery(&delivery).await {
                Ok(outcome) => debug!(entry_id = %delivery.entry_id, ?outcome, "Delivery handled"),
                Err(e) => {
                    error!(entry_id = %delivery.entry_id, error = %e, "Entry left pending");
                    sleep(ERROR_BACKOFF).await;
                }
            }
        }

        info!(consumer = %self.name(), "Consumer loop stopped");
    }

    /// One bounded blocking read followed by handling of the entry, if any.
    pub async fn poll_once(&self) -> Result<Option<Outcome>, ConsumerError> {
        let delivery = self
            .ctx
            .queue
            .read_next(self.name(), self.ctx.settings.block_timeout)
            .await?;

        match delivery {
            Some(delivery) => self.handle_delivery(&delivery).await.map(Some),
            None => Ok(None),
        }
    }

    /// Claim entries abandoned by dead or stalled consumers and handle them.
    pub async fn reclaim(&self) -> Result<usize, ConsumerError> {
        let stale = self
            .ctx
            .queue
            .claim_stale(
                self.name(),
                self.ctx.settings.reclaim_idle,
                self.ctx.settings.reclaim_batch,
            )
            .await?;

        let claimed = stale.len();
        for delivery in stale {
            info!(entry_id = %delivery.entry_id, "Processing reclaimed entry");
            if let Err(e) = self.handle_delivery(&delivery).await {
                error!(entry_id = %delivery.entry_id, error = %e, "Reclaimed entry left pending");
            }
        }
        Ok(claimed)
    }

    /// Take one delivery to a decision and acknowledge it.
    ///
    /// Returns an error, without acknowledging, only when no decision could be
    /// recorded (store or queue unreachable).
    pub async fn handle_delivery(&self, delivery: &Delivery) -> Result<Outcome, ConsumerError> {
        let job = match &delivery.job {
            Ok(job) => job,
            Err(reason) => {
                warn!(entry_id = %delivery.entry_id, reason = %reason, "Malformed job entry");
                metrics::counter!("vehicle_count_jobs_malformed").increment(1);
                self.maybe_dead_letter(delivery, reason).await;
                self.ctx.queue.ack(&delivery.entry_id).await?;
                return Ok(Outcome::Malformed);
            }
        };

        if let GuardDecision::Skip(status) = guard::check(self.ctx.store.as_ref(), job).await? {
            self.ctx.queue.ack(&delivery.entry_id).await?;
            metrics::counter!("vehicle_count_jobs_skipped").increment(1);
            return Ok(Outcome::Skipped(status));
        }

        info!(
            video_id = %job.video_id,
            entry_id = %delivery.entry_id,
            gps_points = job.gps_coords.len(),
            "Processing video"
        );
        self.ctx
            .events
            .publish(StatusEvent::Processing {
                video_id: job.video_id,
            })
            .await;

        let started = Instant::now();
        let outcome = match self.run_attempts(&delivery.entry_id, job).await {
            Ok(result) => {
                self.record_success(&result).await?;
                Outcome::Done
            }
            Err(e) => {
                self.record_failure(delivery, job, &e).await?;
                Outcome::Failed
            }
        };
        metrics::histogram!("vehicle_count_processing_seconds")
            .record(started.elapsed().as_secs_f64());

        self.ctx.queue.ack(&delivery.entry_id).await?;
        debug!(video_id = %job.video_id, entry_id = %delivery.entry_id, "Entry acknowledged");
        Ok(outcome)
    }

    async fn run_attempts(
        &self,
        entry_id: &str,
        job: &JobMessage,
    ) -> Result<CountResult, PipelineError> {
        let policy = &self.ctx.settings.failure;
        let mut attempt = 1;

        loop {
            match pipeline::process_video(&self.ctx, entry_id, job).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                    let delay = policy.delay_after(attempt);
                    warn!(
                        video_id = %job.video_id,
                        attempt,
                        max_attempts = policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn record_success(&self, result: &CountResult) -> Result<(), ConsumerError> {
        if !self.ctx.store.complete(result).await? {
            info!(video_id = %result.video_id, "Record already terminal, result discarded");
            return Ok(());
        }

        let totals = result.vehicle_totals;
        metrics::counter!("vehicle_count_jobs_completed").increment(1);
        metrics::counter!("vehicle_count_vehicles_total", "category" => "small")
            .increment(totals.small);
        metrics::counter!("vehicle_count_vehicles_total", "category" => "medium")
            .increment(totals.medium);
        metrics::counter!("vehicle_count_vehicles_total", "category" => "heavy")
            .increment(totals.heavy);

        self.ctx
            .events
            .publish(StatusEvent::Done {
                video_id: result.video_id,
                vehicle_totals: totals,
                severity: result.severity,
            })
            .await;
        Ok(())
    }

    async fn record_failure(
        &self,
        delivery: &Delivery,
        job: &JobMessage,
        err: &PipelineError,
    ) -> Result<(), ConsumerError> {
        let message = err.to_string();
        error!(video_id = %job.video_id, entry_id = %delivery.entry_id, error = %message, "Job failed");

        if self.ctx.store.fail(job.video_id, &message).await? {
            metrics::counter!("vehicle_count_jobs_failed").increment(1);
            self.ctx
                .events
                .publish(StatusEvent::Failed {
                    video_id: job.video_id,
                    error: message.clone(),
                })
                .await;
        } else {
            info!(video_id = %job.video_id, "Record already terminal, failure not recorded");
        }

        self.maybe_dead_letter(delivery, &message).await;
        Ok(())
    }

    async fn maybe_dead_letter(&self, delivery: &Delivery, reason: &str) {
        if !self.ctx.settings.failure.dead_letter {
            return;
        }
        match self.ctx.queue.dead_letter(delivery, reason).await {
            Ok(()) => info!(entry_id = %delivery.entry_id, "Entry dead-lettered"),
            Err(e) => warn!(entry_id = %delivery.entry_id, error = %e, "Dead-letter write failed"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}
