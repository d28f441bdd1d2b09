use std::time::Instant;

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use jobchat_contracts::{ApplicationRequest, Job, NewJob};
use jobchat_store::StoreError;
use serde::{Deserialize, Serialize};

use super::{ApiError, AppState, json_error};

const DEFAULT_PAGE: u32 = 1;
const DEFAULT_LIMIT: u32 = 10;
const MAX_LIMIT: u32 = 100;

#[derive(Debug, Default, Deserialize)]
pub(super) struct ListJobsParams {
    page: Option<String>,
    limit: Option<String>,
    location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Listing {
    page: u32,
    limit: u32,
    location: Option<String>,
}

impl ListJobsParams {
    /// Out-of-range numbers clamp; anything that is not a number is rejected.
    fn resolve(self) -> Result<Listing, ApiError> {
        let page = parse_count("page", self.page.as_deref(), DEFAULT_PAGE)?.max(1);
        let limit = parse_count("limit", self.limit.as_deref(), DEFAULT_LIMIT)?.clamp(1, MAX_LIMIT);
        let location = self
            .location
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty());

        Ok(Listing {
            page,
            limit,
            location,
        })
    }
}

fn parse_count(name: &str, raw: Option<&str>, default: u32) -> Result<u32, ApiError> {
    let Some(raw) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(default);
    };
    if let Ok(value) = raw.parse::<u32>() {
        return Ok(value);
    }

    let (negative, digits) = match raw.strip_prefix('-') {
        Some(digits) => (true, digits),
        None => (false, raw.strip_prefix('+').unwrap_or(raw)),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "ERR_INVALID_PARAMS",
            format!("{} must be an integer", name),
        ));
    }
    Ok(if negative { 0 } else { u32::MAX })
}

#[derive(Debug, Serialize)]
pub(super) struct MessageResponse {
    message: &'static str,
}

fn store_error(err: StoreError) -> ApiError {
    match err {
        StoreError::NotFound | StoreError::UnknownJob => {
            json_error(StatusCode::NOT_FOUND, "ERR_NOT_FOUND", "Job not found")
        }
        StoreError::HasApplications => json_error(
            StatusCode::CONFLICT,
            "ERR_CONFLICT",
            "Job has applications and cannot be deleted",
        ),
        other => {
            tracing::warn!(error = %other, "job store call failed");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "ERR_INTERNAL",
                "Internal server error",
            )
        }
    }
}

fn invalid_body(rejection: JsonRejection) -> ApiError {
    tracing::debug!(error = %rejection.body_text(), "request body rejected");
    json_error(
        StatusCode::BAD_REQUEST,
        "ERR_INVALID_PARAMS",
        "Invalid request body",
    )
}

fn invalid_id(rejection: PathRejection) -> ApiError {
    tracing::debug!(error = %rejection.body_text(), "job id rejected");
    json_error(
        StatusCode::BAD_REQUEST,
        "ERR_INVALID_PARAMS",
        "Job id must be an integer",
    )
}

fn observe<T>(
    route: &str,
    method: &str,
    started: Instant,
    result: &Result<T, ApiError>,
    ok: StatusCode,
) {
    let status = match result {
        Ok(_) => ok,
        Err((status, _)) => *status,
    };
    crate::metrics::observe_http_request(route, method, status.as_u16(), started.elapsed());
}

pub(super) async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListJobsParams>,
) -> Result<Json<Vec<Job>>, ApiError> {
    let started = Instant::now();
    let result = async {
        let listing = params.resolve()?;
        let jobs = state
            .jobs
            .list_jobs(listing.page, listing.limit, listing.location.as_deref())
            .await
            .map_err(store_error)?;
        Ok::<_, ApiError>(Json(jobs))
    }
    .await;
    observe("/jobs", "GET", started, &result, StatusCode::OK);
    result
}

pub(super) async fn apply(
    State(state): State<AppState>,
    payload: Result<Json<ApplicationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    let started = Instant::now();
    let result = async {
        let Json(request) = payload.map_err(invalid_body)?;
        let application = request.into_application().map_err(|msg| {
            json_error(StatusCode::BAD_REQUEST, "ERR_INVALID_PARAMS", msg)
        })?;

        state
            .jobs
            .insert_application(&application)
            .await
            .map_err(store_error)?;
        tracing::info!(job_id = application.job_id, "application submitted");

        Ok::<_, ApiError>((
            StatusCode::CREATED,
            Json(MessageResponse {
                message: "Application submitted successfully",
            }),
        ))
    }
    .await;
    observe("/apply", "POST", started, &result, StatusCode::CREATED);
    result
}

pub(super) async fn admin_list_jobs(
    State(state): State<AppState>,
) -> Result<Json<Vec<Job>>, ApiError> {
    let started = Instant::now();
    let result = state
        .jobs
        .list_all_jobs()
        .await
        .map(Json)
        .map_err(store_error);
    observe("/admin/jobs", "GET", started, &result, StatusCode::OK);
    result
}

pub(super) async fn admin_create_job(
    State(state): State<AppState>,
    payload: Result<Json<NewJob>, JsonRejection>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    let started = Instant::now();
    let result = async {
        let Json(job) = payload.map_err(invalid_body)?;
        job.validate()
            .map_err(|msg| json_error(StatusCode::BAD_REQUEST, "ERR_INVALID_PARAMS", msg))?;

        let created = state.jobs.create_job(&job).await.map_err(store_error)?;
        tracing::info!(job_id = created.id, "job created");
        Ok::<_, ApiError>((StatusCode::CREATED, Json(created)))
    }
    .await;
    observe("/admin/jobs", "POST", started, &result, StatusCode::CREATED);
    result
}

pub(super) async fn admin_update_job(
    State(state): State<AppState>,
    id: Result<Path<i32>, PathRejection>,
    payload: Result<Json<NewJob>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let started = Instant::now();
    let result = async {
        let Path(id) = id.map_err(invalid_id)?;
        let Json(job) = payload.map_err(invalid_body)?;
        job.validate()
            .map_err(|msg| json_error(StatusCode::BAD_REQUEST, "ERR_INVALID_PARAMS", msg))?;

        state
            .jobs
            .update_job(id, &job)
            .await
            .map_err(store_error)?;
        tracing::info!(job_id = id, "job updated");
        Ok::<_, ApiError>(Json(MessageResponse {
            message: "Job updated successfully",
        }))
    }
    .await;
    observe("/admin/jobs/{id}", "PUT", started, &result, StatusCode::OK);
    result
}

pub(super) async fn admin_delete_job(
    State(state): State<AppState>,
    id: Result<Path<i32>, PathRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let started = Instant::now();
    let result = async {
        let Path(id) = id.map_err(invalid_id)?;
        state.jobs.delete_job(id).await.map_err(store_error)?;
        tracing::info!(job_id = id, "job deleted");
        Ok::<_, ApiError>(Json(MessageResponse {
            message: "Job deleted successfully",
        }))
    }
    .await;
    observe("/admin/jobs/{id}", "DELETE", started, &result, StatusCode::OK);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::fakes::MemoryStore;
    use crate::http::tests::{spawn_app, state_with};
    use crate::provider::MockProvider;
    use std::sync::Arc;

    fn params(page: Option<&str>, limit: Option<&str>, location: Option<&str>) -> ListJobsParams {
        ListJobsParams {
            page: page.map(str::to_string),
            limit: limit.map(str::to_string),
            location: location.map(str::to_string),
        }
    }

    fn seeded() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::with_jobs(vec![
            MemoryStore::job(1, "Backend Engineer", "Mumbai"),
            MemoryStore::job(2, "Data Analyst", "Pune"),
            MemoryStore::job(3, "QA Lead", "Navi Mumbai"),
        ]))
    }

    fn new_job(title: &str) -> serde_json::Value {
        serde_json::json!({
            "title": title,
            "description": "Build things",
            "location": "Bengaluru",
            "salary": 1_500_000.0,
            "contact_email": "jobs@example.com",
        })
    }

    #[test]
    fn listing_params_default_and_clamp() {
        let listing = ListJobsParams::default().resolve().expect("defaults");
        assert_eq!(
            listing,
            Listing {
                page: 1,
                limit: 10,
                location: None
            }
        );

        let listing = params(Some("0"), Some("500"), Some("  Pune ")).resolve().expect("clamped");
        assert_eq!(listing.page, 1);
        assert_eq!(listing.limit, 100);
        assert_eq!(listing.location.as_deref(), Some("Pune"));

        let listing = params(Some("-3"), Some("0"), Some("   ")).resolve().expect("clamped");
        assert_eq!(listing.page, 1);
        assert_eq!(listing.limit, 1);
        assert_eq!(listing.location, None);

        let (status, Json(body)) = params(Some("two"), None, None)
            .resolve()
            .expect_err("non-numeric page");
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error, "page must be an integer");
    }

    #[test]
    fn integers_beyond_any_width_still_clamp() {
        let listing = params(Some("99999999999999999999"), Some("99999999999999999999"), None)
            .resolve()
            .expect("huge values clamp");
        assert_eq!(listing.page, u32::MAX);
        assert_eq!(listing.limit, MAX_LIMIT);

        let listing = params(Some("-99999999999999999999"), Some("+7"), None)
            .resolve()
            .expect("huge negative clamps");
        assert_eq!(listing.page, 1);
        assert_eq!(listing.limit, 7);

        for raw in ["1e3", "12abc", "-", "--5", "4.5"] {
            let (status, _) = params(Some(raw), None, None)
                .resolve()
                .expect_err("not an integer");
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", raw);
        }
    }

    #[tokio::test]
    async fn listing_paginates_and_filters_by_location() {
        let store = seeded();
        let (addr, shutdown, task) = spawn_app(state_with(Arc::new(MockProvider), store)).await;
        let client = reqwest::Client::new();

        let first: Vec<Job> = client
            .get(format!("http://{}/jobs?page=1&limit=2", addr))
            .send()
            .await
            .expect("list")
            .json()
            .await
            .expect("json");
        let second: Vec<Job> = client
            .get(format!("http://{}/jobs?page=2&limit=2", addr))
            .send()
            .await
            .expect("list")
            .json()
            .await
            .expect("json");
        let mumbai: Vec<Job> = client
            .get(format!("http://{}/jobs?location=mumbai", addr))
            .send()
            .await
            .expect("list")
            .json()
            .await
            .expect("json");
        let bad = client
            .get(format!("http://{}/jobs?limit=ten", addr))
            .send()
            .await
            .expect("list");
        let far_page = client
            .get(format!("http://{}/jobs?page=99999999999999999999", addr))
            .send()
            .await
            .expect("list");
        let far_page_status = far_page.status().as_u16();
        let far_page: Vec<Job> = far_page.json().await.expect("json");

        shutdown.send(()).ok();
        let _ = task.await;

        assert_eq!(first.iter().map(|j| j.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(second.iter().map(|j| j.id).collect::<Vec<_>>(), vec![3]);
        assert_eq!(mumbai.iter().map(|j| j.id).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(bad.status().as_u16(), 400);
        assert_eq!(far_page_status, 200);
        assert!(far_page.is_empty());
    }

    #[tokio::test]
    async fn apply_requires_every_field_and_a_known_job() {
        let store = seeded();
        let (addr, shutdown, task) =
            spawn_app(state_with(Arc::new(MockProvider), store.clone())).await;
        let client = reqwest::Client::new();
        let url = format!("http://{}/apply", addr);

        let created = client
            .post(&url)
            .json(&serde_json::json!({
                "job_id": 2,
                "candidate_name": "Asha",
                "contact": "asha@example.com",
            }))
            .send()
            .await
            .expect("apply");
        assert_eq!(created.status().as_u16(), 201);
        let body: serde_json::Value = created.json().await.expect("json");
        assert_eq!(body["message"], "Application submitted successfully");

        let missing = client
            .post(&url)
            .json(&serde_json::json!({ "job_id": 2, "candidate_name": "  " }))
            .send()
            .await
            .expect("apply");
        assert_eq!(missing.status().as_u16(), 400);
        let body: serde_json::Value = missing.json().await.expect("json");
        assert_eq!(body["error"], "All fields are required");

        let unknown = client
            .post(&url)
            .json(&serde_json::json!({
                "job_id": 99,
                "candidate_name": "Asha",
                "contact": "asha@example.com",
            }))
            .send()
            .await
            .expect("apply");
        assert_eq!(unknown.status().as_u16(), 404);

        shutdown.send(()).ok();
        let _ = task.await;

        let applications = store.applications();
        assert_eq!(applications.len(), 1);
        assert_eq!(applications[0].job_id, 2);
    }

    #[tokio::test]
    async fn admin_routes_manage_job_lifecycle() {
        let store = seeded();
        let (addr, shutdown, task) =
            spawn_app(state_with(Arc::new(MockProvider), store.clone())).await;
        let client = reqwest::Client::new();
        let base = format!("http://{}/admin/jobs", addr);

        let created = client
            .post(&base)
            .json(&new_job("Platform Engineer"))
            .send()
            .await
            .expect("create");
        assert_eq!(created.status().as_u16(), 201);
        let created: Job = created.json().await.expect("json");
        assert_eq!(created.id, 4);

        let invalid = client
            .post(&base)
            .json(&serde_json::json!({
                "title": "",
                "description": "x",
                "location": "y",
                "salary": 1.0,
                "contact_email": "a@b.c",
            }))
            .send()
            .await
            .expect("create");
        assert_eq!(invalid.status().as_u16(), 400);

        let updated = client
            .put(format!("{}/4", base))
            .json(&new_job("Staff Platform Engineer"))
            .send()
            .await
            .expect("update");
        assert_eq!(updated.status().as_u16(), 200);

        let missing = client
            .put(format!("{}/40", base))
            .json(&new_job("Ghost"))
            .send()
            .await
            .expect("update");
        assert_eq!(missing.status().as_u16(), 404);

        let bad_id = client
            .delete(format!("{}/abc", base))
            .send()
            .await
            .expect("delete");
        assert_eq!(bad_id.status().as_u16(), 400);

        let listed: Vec<Job> = client
            .get(&base)
            .send()
            .await
            .expect("list")
            .json()
            .await
            .expect("json");
        assert_eq!(listed.len(), 4);
        assert_eq!(listed[3].title, "Staff Platform Engineer");

        let _ = client
            .post(format!("http://{}/apply", addr))
            .json(&serde_json::json!({
                "job_id": 1,
                "candidate_name": "Ravi",
                "contact": "9999999999",
            }))
            .send()
            .await
            .expect("apply");
        let conflict = client
            .delete(format!("{}/1", base))
            .send()
            .await
            .expect("delete");
        assert_eq!(conflict.status().as_u16(), 409);

        let deleted = client
            .delete(format!("{}/4", base))
            .send()
            .await
            .expect("delete");
        assert_eq!(deleted.status().as_u16(), 200);
        let gone = client
            .delete(format!("{}/4", base))
            .send()
            .await
            .expect("delete");
        assert_eq!(gone.status().as_u16(), 404);

        shutdown.send(()).ok();
        let _ = task.await;

        assert_eq!(
            store.jobs().iter().map(|j| j.id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }
}
