//! Drives one job from `pending` to a terminal status.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value as JsonValue;
use tracing::{Instrument, debug, error, info, info_span, warn};

use mediaproc_ai::{CapabilityClient, Frame, WorkItem};
use mediaproc_core::{DomainError, JobId};

use super::envelope::ErrorEnvelope;
use super::feed::{FeedError, FeedItem, UnitFeed};
use super::retry::{Decision, FinalError, RetryPolicy};
use super::store::{MediaStore, StoreError};
use super::types::{Job, JobStatus, ResultPayload, Unit, UnitResult, UnitStatus};

/// Orchestration fault: the job itself cannot proceed.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error("job state: {0}")]
    Domain(#[from] DomainError),
    #[error("job {0} is {1}, not pending")]
    NotPending(JobId, JobStatus),
}

/// Runs jobs against a store.
///
/// Unit failures never fail the job: each unit ends with exactly one result,
/// either the capability's payload or an [`ErrorEnvelope`]. Only faults in the
/// orchestration itself (store, feed, job state) move the job to `failed`.
pub struct JobRunner<S> {
    store: Arc<S>,
    policy: RetryPolicy,
}

impl<S> Clone for JobRunner<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            policy: self.policy,
        }
    }
}

impl<S: MediaStore + 'static> JobRunner<S> {
    pub fn new(store: Arc<S>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `job_id` to completion and return its final status.
    pub async fn run(
        &self,
        job_id: JobId,
        mut feed: Box<dyn UnitFeed>,
        client: &dyn CapabilityClient,
    ) -> JobStatus {
        let span = info_span!("job_run", %job_id, backend = %client.backend());
        let outcome = self
            .drive(job_id, feed.as_mut(), client)
            .instrument(span)
            .await;

        match outcome {
            Ok(status) => status,
            Err(RunnerError::NotPending(_, status)) => {
                warn!(%job_id, %status, "job is not pending, run skipped");
                status
            }
            Err(err) => {
                error!(%job_id, error = %err, "job orchestration failed");
                self.fail_best_effort(job_id).await
            }
        }
    }

    async fn drive(
        &self,
        job_id: JobId,
        feed: &mut dyn UnitFeed,
        client: &dyn CapabilityClient,
    ) -> Result<JobStatus, RunnerError> {
        let mut job = self.store.load_job(job_id).await?;
        if job.status != JobStatus::Pending {
            return Err(RunnerError::NotPending(job_id, job.status));
        }
        job.mark_processing()?;
        self.store.save_job(&job).await?;
        info!(kind = %job.kind, "job processing");

        if let Some(total) = feed.open(self.store.as_ref(), &job).await? {
            job.set_total(total);
            self.store.save_job(&job).await?;
        }

        while let Some(item) = feed.next_item().await? {
            match item {
                FeedItem::Skipped { ordinal } => {
                    debug!(ordinal, "skipped");
                }
                FeedItem::Work {
                    mut unit,
                    frame,
                    persisted,
                } => {
                    if !persisted {
                        self.store.insert_unit(unit.clone()).await?;
                    }
                    self.process_unit(&job, &mut unit, frame, client).await?;
                }
            }
            job.record_processed();
            self.store.save_job(&job).await?;
        }

        // The feed is exhausted, so whatever it reported up front is superseded.
        job.set_total(job.processed_units);
        job.mark_completed()?;
        self.store.save_job(&job).await?;
        info!(
            processed = job.processed_units,
            total = job.total_units,
            "job completed"
        );
        Ok(job.status)
    }

    /// Run one unit's attempt sequence and persist exactly one result for it.
    async fn process_unit(
        &self,
        job: &Job,
        unit: &mut Unit,
        frame: Option<Arc<Frame>>,
        client: &dyn CapabilityClient,
    ) -> Result<(), RunnerError> {
        let backend = client.backend();

        unit.status = UnitStatus::Processing;
        let payload = match self.store.save_unit(unit).await {
            Err(err) => {
                warn!(unit = unit.ordinal, error = %err, "could not mark unit processing");
                ResultPayload::Failure(ErrorEnvelope::from_fault(
                    backend,
                    format!("store fault before processing: {err}"),
                    1,
                ))
            }
            Ok(()) => {
                let item = unit.work_item(frame);
                let attempts = AssertUnwindSafe(self.attempt_sequence(job.id, &item, client))
                    .catch_unwind()
                    .await;
                match attempts {
                    Ok(Ok(data)) => ResultPayload::Success(data),
                    Ok(Err(give_up)) => {
                        ResultPayload::Failure(ErrorEnvelope::from_final(backend, &give_up))
                    }
                    Err(panic) => {
                        let detail = format!("unit panicked: {}", panic_message(panic));
                        error!(unit = unit.ordinal, %detail, "unit fault");
                        ResultPayload::Failure(ErrorEnvelope::from_fault(backend, detail, 1))
                    }
                }
            }
        };

        unit.status = if payload.is_success() {
            UnitStatus::Completed
        } else {
            UnitStatus::Failed
        };
        self.store
            .create_result(UnitResult::new(unit, payload))
            .await?;
        self.store.save_unit(unit).await?;
        debug!(unit = unit.ordinal, status = ?unit.status, "unit done");
        Ok(())
    }

    /// Stage once, then invoke until success or the policy gives up.
    async fn attempt_sequence(
        &self,
        job_id: JobId,
        item: &WorkItem,
        client: &dyn CapabilityClient,
    ) -> Result<JsonValue, FinalError> {
        let staged = match client.stage(item).await {
            Ok(staged) => staged,
            Err(err) => {
                let err = err.into_terminal();
                warn!(%job_id, unit = item.ordinal, class = %err.class, error = %err, "staging failed");
                return Err(FinalError::immediate(&err));
            }
        };

        let mut attempt = 0u32;
        loop {
            match client.invoke(item, staged.as_ref()).await {
                Ok(data) => return Ok(data),
                Err(err) => match self.policy.decide(attempt, &err) {
                    Decision::Retry(delay) => {
                        warn!(
                            %job_id,
                            unit = item.ordinal,
                            attempt = attempt + 1,
                            class = %err.class,
                            error = %err,
                            delay_ms = delay.as_millis() as u64,
                            "attempt failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    Decision::GiveUp(give_up) => {
                        warn!(
                            %job_id,
                            unit = item.ordinal,
                            attempts = give_up.attempts,
                            class = %give_up.class,
                            error = %give_up.message,
                            "giving up on unit"
                        );
                        return Err(give_up);
                    }
                },
            }
        }
    }

    /// Move the job to `failed` unless it already ended; returns the stored outcome.
    async fn fail_best_effort(&self, job_id: JobId) -> JobStatus {
        let mut job = match self.store.load_job(job_id).await {
            Ok(job) => job,
            Err(err) => {
                warn!(%job_id, error = %err, "cannot load job to mark it failed");
                return JobStatus::Failed;
            }
        };
        if job.status.is_terminal() {
            return job.status;
        }
        if job.mark_failed().is_ok() {
            if let Err(err) = self.store.save_job(&job).await {
                warn!(%job_id, error = %err, "cannot persist failed status");
            }
        }
        JobStatus::Failed
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
