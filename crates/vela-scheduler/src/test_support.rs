//! In-memory stand-ins for the database and engines.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use vela_core::{
    Build, BuildStatus, CompiledPipeline, Compiler, CompilerSettings, ITEM_VERSION, Platform,
    PublishRequest, Publisher, Queue, QueueItem, QueueSettings, Repo, SETTINGS_ID, Schedule, Scm,
    SharedSettings, User,
};
use vela_db::{
    BuildRepo, Database, DbError, DbResult, RepoRepo, ScheduleRepo, SettingsRepo, UserRepo,
};

/// A time on the day every test runs on.
pub fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 14, h, m, s).unwrap()
}

pub fn repo(id: i64, full_name: &str) -> Repo {
    let (org, name) = full_name.split_once('/').unwrap_or(("", full_name));
    Repo {
        id,
        owner_id: 1,
        org: org.to_string(),
        name: name.to_string(),
        full_name: full_name.to_string(),
        clone_url: format!("https://github.com/{}.git", full_name),
        default_branch: "main".to_string(),
        active: true,
        approval_timeout: 7,
    }
}

pub fn schedule(id: i64, name: &str, entry: &str, scheduled_at: DateTime<Utc>) -> Schedule {
    Schedule {
        id,
        repo_id: 7,
        active: true,
        name: name.to_string(),
        entry: entry.to_string(),
        branch: "main".to_string(),
        created_at: at(0, 0, 0).timestamp(),
        created_by: "octocat".to_string(),
        updated_at: at(0, 0, 0).timestamp(),
        updated_by: "octocat".to_string(),
        scheduled_at: scheduled_at.timestamp(),
        error: String::new(),
    }
}

pub fn platform(schedule_allowlist: &[&str]) -> Platform {
    Platform {
        id: SETTINGS_ID,
        compiler: FakeCompiler::default().settings(),
        queue: FakeQueue::default().settings(),
        schedule_allowlist: schedule_allowlist.iter().map(|s| s.to_string()).collect(),
        max_dashboard_repos: 10,
        queue_restart_limit: 30,
        updated_by: "admin".to_string(),
        ..Default::default()
    }
}

fn unavailable() -> DbError {
    DbError::Database(sqlx::Error::PoolTimedOut)
}

#[derive(Default)]
struct State {
    schedules: BTreeMap<i64, Schedule>,
    repos: HashMap<i64, Repo>,
    users: HashMap<i64, User>,
    builds: BTreeMap<i64, Build>,
    settings: Option<Platform>,
    fail_settings: bool,
    settings_reads: usize,
    fail_cleanup: bool,
    cleanup_sweeps: usize,
    fail_list: bool,
    mark_writes: usize,
    /// Marker another server writes just before ours.
    races: HashMap<i64, i64>,
    deactivate_on_fetch: Vec<i64>,
}

/// Every repository trait backed by one locked map.
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        let mut state = State::default();
        state.users.insert(
            1,
            User {
                id: 1,
                name: "octocat".to_string(),
                token: "token".to_string(),
                active: true,
                admin: false,
            },
        );
        Arc::new(Self {
            state: Mutex::new(state),
        })
    }

    pub fn database(self: &Arc<Self>) -> Database {
        Database {
            schedules: self.clone(),
            repos: self.clone(),
            users: self.clone(),
            settings: self.clone(),
            builds: self.clone(),
        }
    }

    pub fn insert_repo(&self, repo: Repo) {
        self.state.lock().repos.insert(repo.id, repo);
    }

    pub fn insert_schedule(&self, schedule: Schedule) {
        self.state.lock().schedules.insert(schedule.id, schedule);
    }

    pub fn insert_build(&self, build: Build) {
        self.state.lock().builds.insert(build.id, build);
    }

    pub fn schedule(&self, id: i64) -> Option<Schedule> {
        self.state.lock().schedules.get(&id).cloned()
    }

    pub fn build(&self, id: i64) -> Option<Build> {
        self.state.lock().builds.get(&id).cloned()
    }

    pub fn enqueued(&self, build_id: i64) -> Option<i64> {
        self.state.lock().builds.get(&build_id).map(|b| b.enqueued)
    }

    pub fn set_settings(&self, settings: Platform) {
        self.state.lock().settings = Some(settings);
    }

    pub fn settings(&self) -> Option<Platform> {
        self.state.lock().settings.clone()
    }

    pub fn fail_settings(&self, fail: bool) {
        self.state.lock().fail_settings = fail;
    }

    /// Settings reads attempted, failed ones included.
    pub fn settings_reads(&self) -> usize {
        self.state.lock().settings_reads
    }

    pub fn fail_cleanup(&self, fail: bool) {
        self.state.lock().fail_cleanup = fail;
    }

    /// Pending approval sweeps attempted, failed ones included.
    pub fn cleanup_sweeps(&self) -> usize {
        self.state.lock().cleanup_sweeps
    }

    pub fn fail_list(&self, fail: bool) {
        self.state.lock().fail_list = fail;
    }

    /// Successful compare-and-set writes of a schedule marker.
    pub fn mark_writes(&self) -> usize {
        self.state.lock().mark_writes
    }

    /// Move the marker of `id` to `scheduled_at` right before the next
    /// compare-and-set on it.
    pub fn race_marker(&self, id: i64, scheduled_at: i64) {
        self.state.lock().races.insert(id, scheduled_at);
    }

    /// Deactivate `id` the next time it is fetched by id.
    pub fn deactivate_on_fetch(&self, id: i64) {
        self.state.lock().deactivate_on_fetch.push(id);
    }
}

#[async_trait]
impl ScheduleRepo for MemoryStore {
    async fn create(&self, schedule: &Schedule) -> DbResult<Schedule> {
        let mut state = self.state.lock();
        if state
            .schedules
            .values()
            .any(|s| s.repo_id == schedule.repo_id && s.name == schedule.name)
        {
            return Err(DbError::Duplicate(format!("schedule {}", schedule.name)));
        }
        let id = state.schedules.keys().next_back().copied().unwrap_or(0) + 1;
        let created = Schedule {
            id,
            ..schedule.clone()
        };
        state.schedules.insert(id, created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> DbResult<Schedule> {
        let mut state = self.state.lock();
        if let Some(pos) = state.deactivate_on_fetch.iter().position(|&d| d == id) {
            state.deactivate_on_fetch.remove(pos);
            if let Some(s) = state.schedules.get_mut(&id) {
                s.active = false;
            }
        }
        state
            .schedules
            .get(&id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("schedule {}", id)))
    }

    async fn list_active(&self) -> DbResult<Vec<Schedule>> {
        let state = self.state.lock();
        if state.fail_list {
            return Err(unavailable());
        }
        Ok(state.schedules.values().filter(|s| s.active).cloned().collect())
    }

    async fn list_by_repo(&self, repo_id: i64) -> DbResult<Vec<Schedule>> {
        let state = self.state.lock();
        Ok(state
            .schedules
            .values()
            .filter(|s| s.repo_id == repo_id)
            .cloned()
            .collect())
    }

    async fn mark_scheduled(&self, id: i64, expected: i64, scheduled_at: i64) -> DbResult<bool> {
        let mut state = self.state.lock();
        let raced = state.races.remove(&id);
        let Some(s) = state.schedules.get_mut(&id) else {
            return Ok(false);
        };
        if let Some(marker) = raced {
            s.scheduled_at = marker;
        }
        if s.scheduled_at != expected {
            return Ok(false);
        }
        s.scheduled_at = scheduled_at;
        state.mark_writes += 1;
        Ok(true)
    }

    async fn update_error(&self, id: i64, error: &str, updated_at: i64) -> DbResult<()> {
        let mut state = self.state.lock();
        let s = state
            .schedules
            .get_mut(&id)
            .ok_or_else(|| DbError::NotFound(format!("schedule {}", id)))?;
        s.error = error.to_string();
        s.updated_at = updated_at;
        Ok(())
    }
}

#[async_trait]
impl RepoRepo for MemoryStore {
    async fn get_by_id(&self, id: i64) -> DbResult<Repo> {
        self.state
            .lock()
            .repos
            .get(&id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("repo {}", id)))
    }
}

#[async_trait]
impl UserRepo for MemoryStore {
    async fn get_by_id(&self, id: i64) -> DbResult<User> {
        self.state
            .lock()
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("user {}", id)))
    }
}

#[async_trait]
impl SettingsRepo for MemoryStore {
    async fn get(&self) -> DbResult<Platform> {
        let mut state = self.state.lock();
        state.settings_reads += 1;
        if state.fail_settings {
            return Err(unavailable());
        }
        state
            .settings
            .clone()
            .ok_or_else(|| DbError::NotFound("settings".to_string()))
    }

    async fn create(&self, settings: &Platform) -> DbResult<Platform> {
        let mut state = self.state.lock();
        if state.fail_settings {
            return Err(unavailable());
        }
        Ok(state.settings.get_or_insert_with(|| settings.clone()).clone())
    }
}

#[async_trait]
impl BuildRepo for MemoryStore {
    async fn create(&self, build: &Build) -> DbResult<Build> {
        let mut state = self.state.lock();
        let id = state.builds.keys().next_back().copied().unwrap_or(0) + 1;
        let number = state
            .builds
            .values()
            .filter(|b| b.repo_id == build.repo_id)
            .map(|b| b.number)
            .max()
            .unwrap_or(0)
            + 1;
        let created = Build {
            id,
            number,
            ..build.clone()
        };
        state.builds.insert(id, created.clone());
        Ok(created)
    }

    async fn update_enqueued(&self, id: i64, enqueued: i64) -> DbResult<()> {
        if let Some(b) = self.state.lock().builds.get_mut(&id) {
            b.enqueued = enqueued;
        }
        Ok(())
    }

    async fn clean_pending_approval(&self, message: &str, now: i64) -> DbResult<u64> {
        let mut state = self.state.lock();
        state.cleanup_sweeps += 1;
        if state.fail_cleanup {
            return Err(unavailable());
        }
        let timeouts: HashMap<i64, i64> = state
            .repos
            .values()
            .map(|r| (r.id, i64::from(r.approval_timeout) * 86400))
            .collect();
        let mut swept = 0;
        for build in state.builds.values_mut() {
            let Some(timeout) = timeouts.get(&build.repo_id) else {
                continue;
            };
            if build.status == BuildStatus::PendingApproval && build.created < now - timeout {
                build.status = BuildStatus::Error;
                build.error = message.to_string();
                swept += 1;
            }
        }
        Ok(swept)
    }
}

/// Resolves registered usernames to ids.
#[derive(Default)]
pub struct FakeScm {
    users: Mutex<HashMap<String, String>>,
}

impl FakeScm {
    pub fn insert(&self, username: &str, id: &str) {
        self.users
            .lock()
            .insert(username.to_string(), id.to_string());
    }
}

#[async_trait]
impl Scm for FakeScm {
    async fn user_id(&self, username: &str, _token: &str) -> vela_core::Result<String> {
        self.users
            .lock()
            .get(username)
            .cloned()
            .ok_or_else(|| vela_core::Error::Scm(format!("unknown user {}", username)))
    }
}

fn pipeline() -> CompiledPipeline {
    let settings = FakeCompiler::default().settings();
    CompiledPipeline {
        version: "1".to_string(),
        clone_image: settings.clone_image,
        template_depth: settings.template_depth,
        starlark_exec_limit: settings.starlark_exec_limit,
        worker_route: None,
    }
}

/// Records publish requests and persists builds in a [`MemoryStore`].
pub struct FakePublisher {
    store: Arc<MemoryStore>,
    requests: Mutex<Vec<PublishRequest>>,
    published: Mutex<Vec<QueueItem>>,
    fail: Mutex<bool>,
}

impl FakePublisher {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            requests: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
            fail: Mutex::new(false),
        }
    }

    pub fn requests(&self) -> Vec<PublishRequest> {
        self.requests.lock().clone()
    }

    pub fn published(&self) -> Vec<QueueItem> {
        self.published.lock().clone()
    }

    pub fn fail(&self, fail: bool) {
        *self.fail.lock() = fail;
    }
}

#[async_trait]
impl Publisher for FakePublisher {
    async fn compile_and_publish(&self, request: PublishRequest) -> vela_core::Result<QueueItem> {
        self.requests.lock().push(request.clone());
        if *self.fail.lock() {
            return Err(vela_core::Error::Compile("pipeline is invalid".to_string()));
        }

        let mut build = request.build;
        build.route = "vela".to_string();
        let build = BuildRepo::create(self.store.as_ref(), &build)
            .await
            .map_err(|e| vela_core::Error::Internal(e.to_string()))?;

        let item = QueueItem {
            build,
            repo: request.repo,
            pipeline: pipeline(),
            item_version: ITEM_VERSION,
        };
        self.published.lock().push(item.clone());
        Ok(item)
    }
}

/// Records pushes instead of writing them anywhere.
#[derive(Default)]
pub struct FakeQueue {
    live: Mutex<Option<SharedSettings>>,
    pushed: Mutex<Vec<(String, QueueItem)>>,
    fail: Mutex<bool>,
}

impl FakeQueue {
    pub fn pushed(&self) -> Vec<(String, QueueItem)> {
        self.pushed.lock().clone()
    }

    pub fn fail(&self, fail: bool) {
        *self.fail.lock() = fail;
    }

    pub fn live(&self) -> Option<Arc<Platform>> {
        self.live.lock().as_ref().map(|s| s.load())
    }
}

#[async_trait]
impl Queue for FakeQueue {
    fn settings(&self) -> QueueSettings {
        QueueSettings {
            routes: vec!["vela".to_string()],
        }
    }

    fn set_settings(&self, settings: SharedSettings) {
        *self.live.lock() = Some(settings);
    }

    fn route(&self, requested: Option<&str>) -> vela_core::Result<String> {
        Ok(requested.unwrap_or("vela").to_string())
    }

    async fn push(&self, route: &str, item: &QueueItem) -> vela_core::Result<()> {
        if *self.fail.lock() {
            return Err(vela_core::Error::Queue("queue unavailable".to_string()));
        }
        self.pushed.lock().push((route.to_string(), item.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeCompiler {
    live: Mutex<Option<SharedSettings>>,
}

impl FakeCompiler {
    pub fn live(&self) -> Option<Arc<Platform>> {
        self.live.lock().as_ref().map(|s| s.load())
    }
}

#[async_trait]
impl Compiler for FakeCompiler {
    fn settings(&self) -> CompilerSettings {
        CompilerSettings {
            clone_image: "target/vela-git-slim:latest".to_string(),
            template_depth: 3,
            starlark_exec_limit: 7500,
        }
    }

    fn set_settings(&self, settings: SharedSettings) {
        *self.live.lock() = Some(settings);
    }

    async fn compile(&self, _repo: &Repo, _build: &Build) -> vela_core::Result<CompiledPipeline> {
        Ok(pipeline())
    }
}

/// Wait until the queue has seen at least `count` pushes.
pub async fn wait_for_pushes(queue: &FakeQueue, count: usize) {
    for _ in 0..500 {
        if queue.pushed().len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {} pushes, saw {}", count, queue.pushed().len());
}
