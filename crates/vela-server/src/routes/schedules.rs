//! Schedule endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use tracing::info;
use vela_core::{CreateScheduleRequest, CronEntry, Schedule, ScheduleView};

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/repos/{repo_id}/schedules",
            get(list_schedules).post(create_schedule),
        )
        .route("/schedules/{id}", get(get_schedule))
}

async fn list_schedules(
    State(state): State<AppState>,
    Path(repo_id): Path<i64>,
) -> Result<Json<Vec<ScheduleView>>, ApiError> {
    // 404 for unknown repos rather than an empty list
    state.db.repos.get_by_id(repo_id).await?;
    let now = state.clock.now();
    let schedules = state.db.schedules.list_by_repo(repo_id).await?;

    Ok(Json(
        schedules
            .into_iter()
            .map(|s| ScheduleView::new(s, now))
            .collect(),
    ))
}

async fn get_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ScheduleView>, ApiError> {
    let schedule = state.db.schedules.get_by_id(id).await?;
    Ok(Json(ScheduleView::new(schedule, state.clock.now())))
}

async fn create_schedule(
    State(state): State<AppState>,
    Path(repo_id): Path<i64>,
    Json(req): Json<CreateScheduleRequest>,
) -> Result<(StatusCode, Json<ScheduleView>), ApiError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("schedule name is required".to_string()));
    }

    let repo = state.db.repos.get_by_id(repo_id).await?;
    if !repo.active {
        return Err(ApiError::BadRequest(format!(
            "repo {} is not active",
            repo.full_name
        )));
    }
    if !repo.is_allowlisted(&state.settings.load().schedule_allowlist) {
        return Err(ApiError::Forbidden(format!(
            "repo {} is not on the schedule allowlist",
            repo.full_name
        )));
    }

    let now = state.clock.now();
    let entry = CronEntry::parse(&req.entry)?;
    entry.validate_frequency(now, state.schedule_minimum_frequency)?;

    let owner = state.db.users.get_by_id(repo.owner_id).await?;
    let branch = req
        .branch
        .filter(|b| !b.trim().is_empty())
        .unwrap_or_else(|| repo.default_branch.clone());

    let created = state
        .db
        .schedules
        .create(&Schedule {
            id: 0,
            repo_id: repo.id,
            active: req.active,
            name: name.to_string(),
            entry: entry.as_str().to_string(),
            branch,
            created_at: now.timestamp(),
            created_by: owner.name.clone(),
            updated_at: now.timestamp(),
            updated_by: owner.name,
            scheduled_at: 0,
            error: String::new(),
        })
        .await?;

    info!(
        schedule = %created.name,
        repo = %repo.full_name,
        entry = %created.entry,
        "created schedule"
    );
    Ok((StatusCode::CREATED, Json(ScheduleView::new(created, now))))
}

#[cfg(test)]
mod tests {
    use crate::AppState;
    use crate::routes::router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;
    use vela_core::{FakeClock, SharedSettings};
    use vela_scheduler::test_support::{MemoryStore, at, platform, repo, schedule};

    fn app(store: &Arc<MemoryStore>) -> axum::Router {
        let state = AppState::new(
            store.database(),
            SharedSettings::new(platform(&["octocat/*"])),
            Arc::new(FakeClock::new(at(12, 0, 0))),
            Duration::from_secs(3600),
        );
        router(state)
    }

    fn store() -> Arc<MemoryStore> {
        let store = MemoryStore::new();
        store.insert_repo(repo(7, "octocat/hello"));
        store
    }

    async fn send(
        app: axum::Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_create_schedule() {
        let store = store();

        let (status, body) = send(
            app(&store),
            "POST",
            "/api/v1/repos/7/schedules",
            Some(json!({ "name": "hourly", "entry": "0 * * * *" })),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["name"], "hourly");
        assert_eq!(body["branch"], "main");
        assert_eq!(body["active"], true);
        assert_eq!(body["created_by"], "octocat");
        assert_eq!(body["scheduled_at"], 0);
        assert_eq!(body["next_run"], at(13, 0, 0).timestamp());
        assert!(store.schedule(body["id"].as_i64().unwrap()).is_some());
    }

    #[tokio::test]
    async fn test_create_rejects_frequent_entry() {
        let (status, body) = send(
            app(&store()),
            "POST",
            "/api/v1/repos/7/schedules",
            Some(json!({ "name": "often", "entry": "*/5 * * * *" })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("more frequent"));
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_entry() {
        let (status, _) = send(
            app(&store()),
            "POST",
            "/api/v1/repos/7/schedules",
            Some(json!({ "name": "broken", "entry": "every day" })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_name() {
        let store = store();
        store.insert_schedule(schedule(1, "hourly", "0 * * * *", at(0, 0, 0)));

        let (status, _) = send(
            app(&store),
            "POST",
            "/api/v1/repos/7/schedules",
            Some(json!({ "name": "hourly", "entry": "0 0 * * *" })),
        )
        .await;

        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_create_rejects_repo_off_allowlist() {
        let store = store();
        store.insert_repo(repo(8, "github/octo"));

        let (status, _) = send(
            app(&store),
            "POST",
            "/api/v1/repos/8/schedules",
            Some(json!({ "name": "hourly", "entry": "0 * * * *" })),
        )
        .await;

        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_create_rejects_inactive_repo() {
        let store = store();
        let mut inactive = repo(8, "octocat/archived");
        inactive.active = false;
        store.insert_repo(inactive);

        let (status, _) = send(
            app(&store),
            "POST",
            "/api/v1/repos/8/schedules",
            Some(json!({ "name": "hourly", "entry": "0 * * * *" })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_on_unknown_repo() {
        let (status, _) = send(
            app(&store()),
            "POST",
            "/api/v1/repos/99/schedules",
            Some(json!({ "name": "hourly", "entry": "0 * * * *" })),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_get_schedule_surfaces_error() {
        let store = store();
        let mut failing = schedule(1, "hourly", "0 * * * *", at(11, 0, 0));
        failing.error = "unable to trigger build for schedule hourly: boom".to_string();
        store.insert_schedule(failing);

        let (status, body) = send(app(&store), "GET", "/api/v1/schedules/1", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["error"], "unable to trigger build for schedule hourly: boom");
        assert_eq!(body["next_run"], at(13, 0, 0).timestamp());

        let (status, _) = send(app(&store), "GET", "/api/v1/schedules/2", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_schedules() {
        let store = store();
        store.insert_schedule(schedule(1, "hourly", "0 * * * *", at(0, 0, 0)));
        store.insert_schedule(schedule(2, "nightly", "0 0 * * *", at(0, 0, 0)));

        let (status, body) = send(app(&store), "GET", "/api/v1/repos/7/schedules", None).await;

        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["hourly", "nightly"]);
    }

    #[tokio::test]
    async fn test_settings_returns_snapshot() {
        let (status, body) = send(app(&store()), "GET", "/api/v1/admin/settings", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["schedule_allowlist"], json!(["octocat/*"]));
        assert_eq!(body["queue"]["routes"], json!(["vela"]));
    }

    #[tokio::test]
    async fn test_ready_requires_settings_row() {
        let store = store();

        let (status, _) = send(app(&store), "GET", "/health/ready", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        store.set_settings(platform(&[]));
        let (status, _) = send(app(&store), "GET", "/health/ready", None).await;
        assert_eq!(status, StatusCode::OK);
    }
}
