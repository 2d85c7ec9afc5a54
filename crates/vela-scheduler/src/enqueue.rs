//! Materialise a build for a triggered schedule and hand it to the queue.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use vela_core::{
    Build, BuildStatus, Clock, Event, PublishRequest, Publisher, Queue, QueueItem, Repo, Schedule,
    Scm,
};
use vela_db::{BuildRepo, Database};

use crate::SchedulerError;

/// Source tag attached to scheduled builds.
pub const SCHEDULE_SOURCE: &str = "schedule";

/// Compile attempts allowed for a scheduled build.
pub const SCHEDULE_RETRIES: u32 = 1;

/// Turns a due schedule into a queued build.
#[derive(Clone)]
pub struct BuildEnqueuer {
    db: Database,
    scm: Arc<dyn Scm>,
    publisher: Arc<dyn Publisher>,
    queue: Arc<dyn Queue>,
    clock: Arc<dyn Clock>,
}

impl BuildEnqueuer {
    pub fn new(
        db: Database,
        scm: Arc<dyn Scm>,
        publisher: Arc<dyn Publisher>,
        queue: Arc<dyn Queue>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            scm,
            publisher,
            queue,
            clock,
        }
    }

    /// Build, compile and publish the schedule's build.
    ///
    /// The queue push runs on its own task that does not observe shutdown;
    /// the returned handle may be dropped.
    pub async fn enqueue(
        &self,
        schedule: &Schedule,
        repo: &Repo,
        allowlist: &[String],
    ) -> Result<JoinHandle<()>, SchedulerError> {
        if !repo.is_allowlisted(allowlist) {
            return Err(SchedulerError::NotAllowlisted {
                repo: repo.full_name.clone(),
            });
        }
        if !repo.active {
            return Err(SchedulerError::RepoInactive {
                repo: repo.full_name.clone(),
            });
        }

        let owner = self.db.users.get_by_id(repo.owner_id).await?;
        let sender_scm_id = self
            .scm
            .user_id(&schedule.updated_by, &owner.token)
            .await
            .map_err(|source| SchedulerError::Scm {
                user: schedule.updated_by.clone(),
                source,
            })?;

        let build = schedule_build(schedule, repo, sender_scm_id, self.clock.now().timestamp());
        let item = self
            .publisher
            .compile_and_publish(PublishRequest {
                build,
                repo: repo.clone(),
                source: SCHEDULE_SOURCE.to_string(),
                retries: SCHEDULE_RETRIES,
            })
            .await
            .map_err(SchedulerError::Publish)?;

        let route = item.build.route.clone();
        let queue = self.queue.clone();
        let builds = self.db.builds.clone();
        let clock = self.clock.clone();
        Ok(tokio::spawn(async move {
            publish(queue, builds, clock, item, route).await;
        }))
    }
}

/// The transient build for one trigger of `schedule`.
pub fn schedule_build(schedule: &Schedule, repo: &Repo, sender_scm_id: String, now: i64) -> Build {
    let branch = if schedule.branch.is_empty() {
        repo.default_branch.clone()
    } else {
        schedule.branch.clone()
    };

    Build {
        id: 0,
        repo_id: repo.id,
        number: 0,
        event: Event::Schedule,
        status: BuildStatus::Pending,
        error: String::new(),
        author: schedule.created_by.clone(),
        sender: schedule.updated_by.clone(),
        sender_scm_id,
        r#ref: format!("refs/heads/{}", branch),
        branch,
        message: format!(
            "triggered for {} schedule with {} entry",
            schedule.name, schedule.entry
        ),
        clone: repo.clone_url.clone(),
        route: String::new(),
        enqueued: 0,
        created: now,
    }
}

/// Push an item onto its route and stamp the build as enqueued.
pub async fn publish(
    queue: Arc<dyn Queue>,
    builds: Arc<dyn BuildRepo>,
    clock: Arc<dyn Clock>,
    item: QueueItem,
    route: String,
) {
    info!(
        route = %route,
        repo = %item.repo.full_name,
        build = item.build.number,
        "enqueuing build"
    );

    if let Err(e) = queue.push(&route, &item).await {
        error!(route = %route, build = item.build.id, error = %e, "unable to push build to queue");
        return;
    }

    if let Err(e) = builds
        .update_enqueued(item.build.id, clock.now().timestamp())
        .await
    {
        warn!(build = item.build.id, error = %e, "unable to record enqueue time");
    }
}
