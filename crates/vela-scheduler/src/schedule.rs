//! Cron schedule evaluation.
//!
//! Every replica runs an evaluator and there is no lock between them. On
//! each pass the evaluator walks the active schedules one at a time and,
//! for each one that is due, advances `scheduled_at` in the database
//! *before* materialising the build. That write is the only thing that
//! keeps other replicas from triggering the same boundary: a replica that
//! reads the schedule afterwards computes its next tick from the new marker
//! and finds nothing due. The write is a compare-and-set on the old marker,
//! so two replicas that both read the old value cannot both win.
//!
//! A schedule is due when
//!
//! - `now` is past the first boundary after `scheduled_at`, and
//! - the latest boundary at or before `now` is after the moment this pass
//!   started.
//!
//! The second condition keeps a pass from replaying boundaries that went by
//! before it began; they are picked up by the next pass instead.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vela_core::{Clock, CronEntry, CronError, Schedule, SharedSettings};
use vela_db::Database;

use crate::SchedulerError;
use crate::enqueue::BuildEnqueuer;
use crate::jitter::{jitter, sleep_or_cancel};

/// Whether a schedule should fire, given the pass start and the current time.
pub fn is_eligible(
    entry: &CronEntry,
    scheduled_at: DateTime<Utc>,
    start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<bool, CronError> {
    let prev_tick = entry.prev_tick(now)?;
    let next_tick = entry.next_tick_after(scheduled_at)?;
    Ok(now > next_tick && prev_tick > start)
}

/// Counts from one evaluation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub evaluated: usize,
    pub triggered: usize,
    pub failed: usize,
}

enum Outcome {
    Skipped,
    Triggered { cleared_error: bool },
}

/// Periodically triggers builds for due schedules.
pub struct ScheduleEvaluator {
    db: Database,
    enqueuer: BuildEnqueuer,
    settings: SharedSettings,
    clock: Arc<dyn Clock>,
    interval: Duration,
    schedule_jitter: Duration,
}

impl ScheduleEvaluator {
    pub fn new(
        db: Database,
        enqueuer: BuildEnqueuer,
        settings: SharedSettings,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            db,
            enqueuer,
            settings,
            clock,
            interval,
            schedule_jitter: Duration::from_secs(1),
        }
    }

    /// Base delay before each schedule is looked at.
    pub fn with_schedule_jitter(mut self, base: Duration) -> Self {
        self.schedule_jitter = base;
        self
    }

    /// Evaluate schedules until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        info!(interval = ?self.interval, "starting scheduler");

        loop {
            match self.tick(&cancel).await {
                Ok(summary) => debug!(
                    evaluated = summary.evaluated,
                    triggered = summary.triggered,
                    failed = summary.failed,
                    "processed schedules"
                ),
                Err(e) => warn!(error = %e, "unable to process schedules"),
            }

            if !sleep_or_cancel(&cancel, jitter(self.interval, 0.5)).await {
                break;
            }
        }

        info!("stopping scheduler");
    }

    /// One pass over every active schedule.
    ///
    /// Only a failure to list the schedules aborts the pass; a failing
    /// schedule is recorded on the schedule and the pass moves on.
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<TickSummary, SchedulerError> {
        let start = self.clock.now();
        let schedules = self.db.schedules.list_active().await?;
        let mut summary = TickSummary::default();

        for snapshot in &schedules {
            if !sleep_or_cancel(cancel, jitter(self.schedule_jitter, 1.0)).await {
                break;
            }
            summary.evaluated += 1;

            match self.evaluate(snapshot, start).await {
                Ok(Outcome::Skipped) => {}
                Ok(Outcome::Triggered { cleared_error }) => {
                    summary.triggered += 1;
                    if cleared_error {
                        self.clear_error(snapshot).await;
                    }
                }
                Err(e) => {
                    summary.failed += 1;
                    self.record_error(snapshot, &e).await;
                }
            }
        }

        Ok(summary)
    }

    async fn evaluate(
        &self,
        snapshot: &Schedule,
        start: DateTime<Utc>,
    ) -> Result<Outcome, SchedulerError> {
        // the batch listing may be stale by now
        let mut schedule = self.db.schedules.get_by_id(snapshot.id).await?;
        if !schedule.active {
            debug!(schedule = %schedule.name, "schedule no longer active");
            return Ok(Outcome::Skipped);
        }

        let entry = schedule.cron()?;
        let now = self.clock.now();
        if !is_eligible(&entry, schedule.scheduled_at_time(), start, now)? {
            return Ok(Outcome::Skipped);
        }

        let previous = schedule.scheduled_at;
        schedule.scheduled_at = now.timestamp();
        let claimed = self
            .db
            .schedules
            .mark_scheduled(schedule.id, previous, schedule.scheduled_at)
            .await?;
        if !claimed {
            info!(schedule = %schedule.name, "schedule already triggered by another server");
            return Ok(Outcome::Skipped);
        }

        let repo = self.db.repos.get_by_id(schedule.repo_id).await?;
        let allowlist = self.settings.load().schedule_allowlist.clone();
        self.enqueuer.enqueue(&schedule, &repo, &allowlist).await?;

        info!(
            schedule = %schedule.name,
            repo = %repo.full_name,
            entry = %schedule.entry,
            "triggered scheduled build"
        );
        Ok(Outcome::Triggered {
            cleared_error: !schedule.error.is_empty(),
        })
    }

    async fn record_error(&self, schedule: &Schedule, err: &SchedulerError) {
        error!(schedule = %schedule.name, error = %err, "unable to trigger scheduled build");

        let message = format!(
            "unable to trigger build for schedule {}: {}",
            schedule.name, err
        );
        if let Err(e) = self
            .db
            .schedules
            .update_error(schedule.id, &message, self.clock.now().timestamp())
            .await
        {
            error!(schedule = %schedule.name, error = %e, "unable to record schedule error");
        }
    }

    async fn clear_error(&self, schedule: &Schedule) {
        if let Err(e) = self
            .db
            .schedules
            .update_error(schedule.id, "", self.clock.now().timestamp())
            .await
        {
            warn!(schedule = %schedule.name, error = %e, "unable to clear schedule error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        FakePublisher, FakeQueue, FakeScm, MemoryStore, at, platform, repo, schedule,
        wait_for_pushes,
    };
    use chrono::Duration as TimeDelta;
    use vela_core::{Event, FakeClock};

    struct Harness {
        store: Arc<MemoryStore>,
        publisher: Arc<FakePublisher>,
        queue: Arc<FakeQueue>,
        settings: SharedSettings,
        clock: Arc<FakeClock>,
        evaluator: ScheduleEvaluator,
    }

    /// Every clock reading moves time forward two seconds, so the pass start
    /// and the per-schedule "now" differ the way they do with real jitter.
    fn harness(start: DateTime<Utc>) -> Harness {
        let store = MemoryStore::new();
        store.insert_repo(repo(7, "octocat/hello"));
        let scm = Arc::new(FakeScm::default());
        scm.insert("octocat", "5150");
        let publisher = Arc::new(FakePublisher::new(store.clone()));
        let queue = Arc::new(FakeQueue::default());
        let clock = Arc::new(FakeClock::stepping(start, TimeDelta::seconds(2)));
        let settings = SharedSettings::new(platform(&["octocat/*"]));

        let enqueuer = BuildEnqueuer::new(
            store.database(),
            scm,
            publisher.clone(),
            queue.clone(),
            clock.clone(),
        );
        let evaluator = ScheduleEvaluator::new(
            store.database(),
            enqueuer,
            settings.clone(),
            clock.clone(),
            Duration::from_secs(300),
        )
        .with_schedule_jitter(Duration::ZERO);

        Harness {
            store,
            publisher,
            queue,
            settings,
            clock,
            evaluator,
        }
    }

    #[test]
    fn test_boundary_before_pass_start_is_deferred() {
        let entry = CronEntry::parse("0 * * * *").unwrap();
        let scheduled_at = at(12, 0, 0);

        // boundary 14:00 went by before the pass began at 14:02
        assert!(!is_eligible(&entry, scheduled_at, at(14, 2, 0), at(14, 2, 3)).unwrap());

        // the next pass starts before 15:00 and evaluates after it
        assert!(is_eligible(&entry, scheduled_at, at(14, 58, 0), at(15, 0, 3)).unwrap());
    }

    #[test]
    fn test_not_eligible_before_next_tick() {
        let entry = CronEntry::parse("0 * * * *").unwrap();
        // triggered at 15:00:03, the next boundary is 16:00
        assert!(!is_eligible(&entry, at(15, 0, 3), at(14, 58, 0), at(15, 0, 5)).unwrap());
    }

    #[tokio::test]
    async fn test_due_schedule_enqueues_one_build() {
        let h = harness(at(14, 59, 59));
        h.store
            .insert_schedule(schedule(1, "hourly", "0 * * * *", at(13, 30, 0)));

        let summary = h.evaluator.tick(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.triggered, 1);
        wait_for_pushes(&h.queue, 1).await;

        let requests = h.publisher.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].source, "schedule");
        assert_eq!(requests[0].retries, 1);
        assert_eq!(requests[0].build.event, Event::Schedule);

        let pushed = h.queue.pushed();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].1.build.event, Event::Schedule);

        // marker is the evaluation time, the second clock reading
        let stored = h.store.schedule(1).unwrap();
        assert_eq!(stored.scheduled_at, at(15, 0, 1).timestamp());
        assert!(stored.error.is_empty());
    }

    #[tokio::test]
    async fn test_boundary_triggers_at_most_once() {
        let h = harness(at(14, 59, 59));
        h.store
            .insert_schedule(schedule(1, "hourly", "0 * * * *", at(13, 30, 0)));
        let cancel = CancellationToken::new();

        assert_eq!(h.evaluator.tick(&cancel).await.unwrap().triggered, 1);
        assert_eq!(h.evaluator.tick(&cancel).await.unwrap().triggered, 0);

        h.clock.set(at(15, 30, 0));
        assert_eq!(h.evaluator.tick(&cancel).await.unwrap().triggered, 0);

        assert_eq!(h.store.mark_writes(), 1);
        assert_eq!(h.publisher.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_worked_example_defers_then_triggers() {
        let h = harness(at(14, 2, 0));
        h.store
            .insert_schedule(schedule(1, "hourly", "0 * * * *", at(12, 0, 0)));
        let cancel = CancellationToken::new();

        assert_eq!(h.evaluator.tick(&cancel).await.unwrap().triggered, 0);
        assert_eq!(h.store.schedule(1).unwrap().scheduled_at, at(12, 0, 0).timestamp());

        h.clock.set(at(14, 59, 59));
        assert_eq!(h.evaluator.tick(&cancel).await.unwrap().triggered, 1);
        assert_eq!(
            h.store.schedule(1).unwrap().scheduled_at,
            at(15, 0, 1).timestamp()
        );
    }

    #[tokio::test]
    async fn test_inactive_schedule_is_never_triggered() {
        let h = harness(at(14, 59, 59));
        let mut s = schedule(1, "hourly", "0 * * * *", at(13, 30, 0));
        s.active = false;
        h.store.insert_schedule(s);

        let summary = h.evaluator.tick(&CancellationToken::new()).await.unwrap();

        assert_eq!(summary.evaluated, 0);
        assert_eq!(summary.triggered, 0);
        assert_eq!(h.store.mark_writes(), 0);
        assert!(h.publisher.requests().is_empty());
    }

    #[tokio::test]
    async fn test_schedule_deactivated_after_listing_is_skipped() {
        let h = harness(at(14, 59, 59));
        h.store
            .insert_schedule(schedule(1, "hourly", "0 * * * *", at(13, 30, 0)));
        h.store.deactivate_on_fetch(1);

        let summary = h.evaluator.tick(&CancellationToken::new()).await.unwrap();

        assert_eq!(summary.evaluated, 1);
        assert_eq!(summary.triggered, 0);
        assert!(h.publisher.requests().is_empty());
    }

    #[tokio::test]
    async fn test_failure_keeps_marker_and_records_error() {
        let h = harness(at(14, 59, 59));
        h.store
            .insert_schedule(schedule(1, "hourly", "0 * * * *", at(13, 30, 0)));
        h.settings.store(platform(&[]));

        let summary = h.evaluator.tick(&CancellationToken::new()).await.unwrap();

        assert_eq!(summary.failed, 1);
        assert!(h.publisher.requests().is_empty());
        let stored = h.store.schedule(1).unwrap();
        assert_eq!(stored.scheduled_at, at(15, 0, 1).timestamp());
        assert_eq!(
            stored.error,
            "unable to trigger build for schedule hourly: skipping schedule: repo octocat/hello not on allowlist"
        );
    }

    #[tokio::test]
    async fn test_success_clears_previous_error() {
        let h = harness(at(14, 59, 59));
        h.store
            .insert_schedule(schedule(1, "hourly", "0 * * * *", at(13, 30, 0)));
        h.settings.store(platform(&[]));
        let cancel = CancellationToken::new();

        assert_eq!(h.evaluator.tick(&cancel).await.unwrap().failed, 1);
        assert!(!h.store.schedule(1).unwrap().error.is_empty());

        // the repo is allowlisted again before the next boundary
        h.settings.store(platform(&["octocat/hello"]));
        h.clock.set(at(15, 59, 59));
        assert_eq!(h.evaluator.tick(&cancel).await.unwrap().triggered, 1);

        let stored = h.store.schedule(1).unwrap();
        assert_eq!(stored.error, "");
        assert_eq!(stored.scheduled_at, at(16, 0, 1).timestamp());
    }

    #[tokio::test]
    async fn test_one_bad_schedule_does_not_abort_the_pass() {
        let h = harness(at(14, 59, 59));
        h.store
            .insert_schedule(schedule(1, "broken", "not a cron", at(13, 30, 0)));
        h.store
            .insert_schedule(schedule(2, "hourly", "0 * * * *", at(13, 30, 0)));

        let summary = h.evaluator.tick(&CancellationToken::new()).await.unwrap();

        assert_eq!(summary.evaluated, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.triggered, 1);
        assert!(h.store.schedule(1).unwrap().error.contains("broken"));
        assert!(h.store.schedule(2).unwrap().error.is_empty());
    }

    #[tokio::test]
    async fn test_list_failure_aborts_the_pass() {
        let h = harness(at(14, 59, 59));
        h.store
            .insert_schedule(schedule(1, "hourly", "0 * * * *", at(13, 30, 0)));
        h.store.fail_list(true);

        let result = h.evaluator.tick(&CancellationToken::new()).await;

        assert!(matches!(result, Err(SchedulerError::Database(_))));
        assert!(h.publisher.requests().is_empty());
    }

    #[tokio::test]
    async fn test_lost_marker_race_skips_build() {
        let h = harness(at(14, 59, 59));
        h.store
            .insert_schedule(schedule(1, "hourly", "0 * * * *", at(13, 30, 0)));
        // another server moves the marker between our read and our write
        h.store.race_marker(1, at(15, 0, 0).timestamp());

        let summary = h.evaluator.tick(&CancellationToken::new()).await.unwrap();

        assert_eq!(summary.triggered, 0);
        assert_eq!(summary.failed, 0);
        assert!(h.publisher.requests().is_empty());
        assert_eq!(
            h.store.schedule(1).unwrap().scheduled_at,
            at(15, 0, 0).timestamp()
        );
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let h = harness(at(14, 59, 59));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(h.evaluator.run(cancel.clone()));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
