//! Compile-and-publish: turns a transient build into a persisted build and
//! the queue item a worker will run.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};
use vela_core::{Compiler, ITEM_VERSION, PublishRequest, Publisher, Queue, QueueItem};
use vela_db::{BuildRepo, DbError};

pub struct DbPublisher {
    compiler: Arc<dyn Compiler>,
    queue: Arc<dyn Queue>,
    builds: Arc<dyn BuildRepo>,
}

impl DbPublisher {
    pub fn new(
        compiler: Arc<dyn Compiler>,
        queue: Arc<dyn Queue>,
        builds: Arc<dyn BuildRepo>,
    ) -> Self {
        Self {
            compiler,
            queue,
            builds,
        }
    }
}

#[async_trait]
impl Publisher for DbPublisher {
    async fn compile_and_publish(&self, request: PublishRequest) -> vela_core::Result<QueueItem> {
        let PublishRequest {
            mut build,
            repo,
            source,
            retries,
        } = request;

        let pipeline = self.compiler.compile(&repo, &build).await?;
        build.route = self.queue.route(pipeline.worker_route.as_deref())?;

        // two builds racing for the same number: retry with the next one
        let attempts = retries.max(1);
        let mut attempt = 1;
        let build = loop {
            match self.builds.create(&build).await {
                Ok(created) => break created,
                Err(DbError::Duplicate(what)) if attempt < attempts => {
                    warn!(repo = %repo.full_name, attempt, %what, "build number taken, retrying");
                    attempt += 1;
                }
                Err(e) => {
                    return Err(vela_core::Error::Internal(format!(
                        "unable to create build for {}: {}",
                        repo.full_name, e
                    )));
                }
            }
        };

        debug!(
            source = %source,
            repo = %repo.full_name,
            build = build.number,
            route = %build.route,
            "published build"
        );
        Ok(QueueItem {
            build,
            repo,
            pipeline,
            item_version: ITEM_VERSION,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::NativeCompiler;
    use parking_lot::Mutex;
    use vela_core::{Build, CompilerSettings, Event};
    use vela_db::DbResult;
    use vela_scheduler::enqueue::schedule_build;
    use vela_scheduler::test_support::{FakeQueue, MemoryStore, at, repo, schedule};

    fn compiler() -> Arc<NativeCompiler> {
        Arc::new(NativeCompiler::new(CompilerSettings {
            clone_image: "target/vela-git-slim:latest".to_string(),
            template_depth: 3,
            starlark_exec_limit: 7500,
        }))
    }

    fn request(retries: u32) -> PublishRequest {
        let r = repo(7, "octocat/hello");
        PublishRequest {
            build: schedule_build(
                &schedule(1, "hourly", "0 * * * *", at(12, 0, 0)),
                &r,
                "5150".to_string(),
                at(13, 0, 1).timestamp(),
            ),
            repo: r,
            source: "schedule".to_string(),
            retries,
        }
    }

    /// Reports the next build number as taken a fixed number of times.
    struct Contended {
        inner: Arc<MemoryStore>,
        collisions: Mutex<u32>,
    }

    #[async_trait]
    impl BuildRepo for Contended {
        async fn create(&self, build: &Build) -> DbResult<Build> {
            {
                let mut left = self.collisions.lock();
                if *left > 0 {
                    *left -= 1;
                    return Err(DbError::Duplicate("build number".to_string()));
                }
            }
            BuildRepo::create(self.inner.as_ref(), build).await
        }

        async fn update_enqueued(&self, id: i64, enqueued: i64) -> DbResult<()> {
            self.inner.update_enqueued(id, enqueued).await
        }

        async fn clean_pending_approval(&self, message: &str, now: i64) -> DbResult<u64> {
            self.inner.clean_pending_approval(message, now).await
        }
    }

    #[tokio::test]
    async fn test_publish_persists_build() {
        let store = MemoryStore::new();
        let publisher = DbPublisher::new(compiler(), Arc::new(FakeQueue::default()), store.clone());

        let item = publisher.compile_and_publish(request(1)).await.unwrap();

        assert_eq!(item.item_version, ITEM_VERSION);
        assert_eq!(item.build.number, 1);
        assert_eq!(item.build.route, "vela");
        assert_eq!(item.build.event, Event::Schedule);
        assert_eq!(item.pipeline.clone_image, "target/vela-git-slim:latest");
        assert!(store.build(item.build.id).is_some());

        let second = publisher.compile_and_publish(request(1)).await.unwrap();
        assert_eq!(second.build.number, 2);
    }

    #[tokio::test]
    async fn test_publish_retries_taken_number() {
        let store = MemoryStore::new();
        let builds = Arc::new(Contended {
            inner: store.clone(),
            collisions: Mutex::new(1),
        });
        let publisher = DbPublisher::new(compiler(), Arc::new(FakeQueue::default()), builds);

        let item = publisher.compile_and_publish(request(3)).await.unwrap();
        assert_eq!(item.build.number, 1);
    }

    #[tokio::test]
    async fn test_publish_gives_up_after_retries() {
        let store = MemoryStore::new();
        let builds = Arc::new(Contended {
            inner: store,
            collisions: Mutex::new(1),
        });
        let publisher = DbPublisher::new(compiler(), Arc::new(FakeQueue::default()), builds);

        let result = publisher.compile_and_publish(request(1)).await;
        assert!(matches!(result, Err(vela_core::Error::Internal(_))));
    }
}
