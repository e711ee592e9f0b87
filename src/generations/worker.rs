//! Background driver of the generation lifecycle.
//!
//! Pending jobs are claimed (`pending -> processing`) before they are sent to
//! the provider, so a job is submitted at most once even with several
//! workers. Processing jobs are then polled, least recently polled first,
//! until the provider reports a result. Failures refund the credits charged
//! for the job.
//!
//! What each provider answer means for a job is decided by the pure
//! functions at the bottom of this file; the worker only applies them.

use std::{sync::Arc, time::Duration};

use serde_json::{json, Value};
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use super::{
    repo_types::{Generation, GenerationStatus, GenerationUpdate},
    services::{provider_id, provider_job, PROVIDER_ID_KEY},
};
use crate::{
    credits,
    db::DbClient,
    provider::{ProviderStatus, VideoProvider},
};

/// A processing job with no provider id after this long is considered lost.
const ORPHAN_GRACE: time::Duration = time::Duration::minutes(10);

/// Consecutive failed polls after which a job is given up on.
const MAX_POLL_FAILURES: u64 = 5;

const POLL_FAILURES_KEY: &str = "poll_failures";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub submitted: usize,
    pub completed: usize,
    pub failed: usize,
}

pub struct Worker {
    db: DbClient,
    provider: Arc<dyn VideoProvider>,
    batch_size: i64,
    interval: Duration,
}

impl Worker {
    /// `db` should be the privileged client; the worker acts for the system.
    pub fn new(
        db: DbClient,
        provider: Arc<dyn VideoProvider>,
        batch_size: i64,
        interval: Duration,
    ) -> Self {
        Self {
            db,
            provider,
            batch_size: batch_size.max(1),
            interval,
        }
    }

    /// Ticks until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.interval, batch = self.batch_size, "generation worker started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(r) if r != TickReport::default() => {
                            info!(submitted = r.submitted, completed = r.completed, failed = r.failed, "worker tick");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = ?e, "worker tick failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("generation worker stopped");
    }

    pub async fn tick(&self) -> anyhow::Result<TickReport> {
        let mut report = TickReport::default();
        self.submit_pending(&mut report).await?;
        self.poll_processing(&mut report).await?;
        Ok(report)
    }

    async fn submit_pending(&self, report: &mut TickReport) -> anyhow::Result<()> {
        let pending = {
            let mut tx = self.db.begin().await?;
            let rows =
                Generation::list_by_status(&mut tx, GenerationStatus::Pending, self.batch_size)
                    .await?;
            tx.commit().await?;
            rows
        };

        for job in pending {
            if let Err(e) = self.submit_one(&job, report).await {
                error!(generation_id = %job.id, error = ?e, "submit failed");
            }
        }
        Ok(())
    }

    #[instrument(skip(self, job, report), fields(generation_id = %job.id))]
    async fn submit_one(&self, job: &Generation, report: &mut TickReport) -> anyhow::Result<()> {
        let claimed = {
            let mut tx = self.db.begin().await?;
            let claimed = Generation::transition(
                &mut tx,
                job.id,
                GenerationStatus::Pending,
                GenerationStatus::Processing,
                &GenerationUpdate::default(),
            )
            .await?;
            tx.commit().await?;
            claimed
        };
        let Some(claimed) = claimed else {
            // another worker claimed it
            return Ok(());
        };

        let submitted = match provider_job(&claimed) {
            Ok(request) => self.provider.submit(&request).await,
            Err(e) => Err(e),
        };

        match submit_action(submitted) {
            Action::Record(patch) => {
                let mut tx = self.db.begin().await?;
                Generation::merge_metadata(&mut tx, claimed.id, GenerationStatus::Processing, &patch)
                    .await?;
                tx.commit().await?;
                report.submitted += 1;
                info!(provider_id = ?patch.get(PROVIDER_ID_KEY), "submitted to provider");
            }
            Action::Fail { reason } => {
                warn!(%reason, "provider rejected job");
                let won = self.fail(&claimed, &reason).await?;
                report.failed += usize::from(won);
            }
            Action::Wait | Action::Complete { .. } => {}
        }
        Ok(())
    }

    async fn poll_processing(&self, report: &mut TickReport) -> anyhow::Result<()> {
        let processing = {
            let mut tx = self.db.begin().await?;
            let rows = Generation::claim_for_polling(&mut tx, self.batch_size).await?;
            tx.commit().await?;
            rows
        };

        for job in processing {
            if let Err(e) = self.poll_one(&job, report).await {
                error!(generation_id = %job.id, error = ?e, "poll failed");
            }
        }
        Ok(())
    }

    #[instrument(skip(self, job, report), fields(generation_id = %job.id))]
    async fn poll_one(&self, job: &Generation, report: &mut TickReport) -> anyhow::Result<()> {
        let action = match provider_id(job) {
            Some(pid) => poll_action(job, self.provider.poll(pid).await),
            None if is_orphaned(job, OffsetDateTime::now_utc()) => {
                warn!("processing job has no provider id");
                Action::Fail {
                    reason: "provider handle lost".into(),
                }
            }
            None => Action::Wait,
        };

        match action {
            Action::Wait => {}
            Action::Record(patch) => {
                match patch.get(POLL_FAILURES_KEY).and_then(Value::as_u64) {
                    Some(0) | None => {}
                    Some(failures) => warn!(failures, "provider poll failed"),
                }
                let mut tx = self.db.begin().await?;
                Generation::merge_metadata(&mut tx, job.id, GenerationStatus::Processing, &patch)
                    .await?;
                tx.commit().await?;
            }
            Action::Complete { video_url } => {
                let mut tx = self.db.begin().await?;
                let done = Generation::transition(
                    &mut tx,
                    job.id,
                    GenerationStatus::Processing,
                    GenerationStatus::Completed,
                    &GenerationUpdate {
                        video_url: Some(video_url),
                        ..Default::default()
                    },
                )
                .await?;
                tx.commit().await?;
                if done.is_some() {
                    report.completed += 1;
                    info!("generation completed");
                }
            }
            Action::Fail { reason } => {
                let won = self.fail(job, &reason).await?;
                report.failed += usize::from(won);
            }
        }
        Ok(())
    }

    /// Moves a processing job to `failed` and refunds its charge in one
    /// transaction. False when the transition lost a race.
    async fn fail(&self, job: &Generation, reason: &str) -> anyhow::Result<bool> {
        let mut tx = self.db.begin().await?;
        let failed = Generation::transition(
            &mut tx,
            job.id,
            GenerationStatus::Processing,
            GenerationStatus::Failed,
            &GenerationUpdate {
                metadata: Some(json!({ "error": reason })),
                ..Default::default()
            },
        )
        .await?;
        let Some(failed) = failed else {
            tx.rollback().await?;
            return Ok(false);
        };
        credits::services::refund(
            &mut tx,
            failed.user_id,
            failed.credits_used,
            Some(format!("Refund for generation {}", failed.id)),
        )
        .await?;
        tx.commit().await?;
        warn!(generation_id = %failed.id, %reason, "generation failed");
        Ok(true)
    }
}

/// What the worker does to one job after talking to the provider.
#[derive(Debug, Clone, PartialEq)]
enum Action {
    Wait,
    /// Merge this patch into the job's metadata; it stays processing.
    Record(Value),
    Complete { video_url: String },
    Fail { reason: String },
}

fn submit_action(submitted: anyhow::Result<String>) -> Action {
    match submitted {
        Ok(pid) => Action::Record(json!({ PROVIDER_ID_KEY: pid })),
        Err(e) => Action::Fail {
            reason: e.to_string(),
        },
    }
}

fn poll_failures(job: &Generation) -> u64 {
    job.metadata
        .as_ref()
        .and_then(|m| m.get(POLL_FAILURES_KEY))
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

fn poll_action(job: &Generation, polled: anyhow::Result<ProviderStatus>) -> Action {
    match polled {
        Ok(ProviderStatus::Running) if poll_failures(job) > 0 => {
            Action::Record(json!({ POLL_FAILURES_KEY: 0 }))
        }
        Ok(ProviderStatus::Running) => Action::Wait,
        Ok(ProviderStatus::Succeeded { video_url: None }) => Action::Fail {
            reason: "provider returned no video".into(),
        },
        Ok(ProviderStatus::Succeeded {
            video_url: Some(url),
        }) => match playable_url(&url) {
            Some(video_url) => Action::Complete { video_url },
            None => Action::Fail {
                reason: "provider returned an invalid video url".into(),
            },
        },
        Ok(ProviderStatus::Failed { reason }) => Action::Fail { reason },
        Err(e) => {
            let failures = poll_failures(job) + 1;
            if failures >= MAX_POLL_FAILURES {
                Action::Fail {
                    reason: format!("provider unreachable after {failures} polls: {e}"),
                }
            } else {
                Action::Record(json!({ POLL_FAILURES_KEY: failures }))
            }
        }
    }
}

/// Absolute http(s) URLs only.
fn playable_url(raw: &str) -> Option<String> {
    let url = url::Url::parse(raw).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

/// Claimed but never given a provider id, for longer than [`ORPHAN_GRACE`].
fn is_orphaned(job: &Generation, now: OffsetDateTime) -> bool {
    provider_id(job).is_none() && job.updated_at + ORPHAN_GRACE < now
}
