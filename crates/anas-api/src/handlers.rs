use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;

use anas_core::{
    AnasError, AnasResult, BenchmarkResult, BenchmarkTicket, RunMetadata, RunReceipt, RunRecord,
};

use crate::protocol::{ApiError, Health, ListQuery};
use crate::server::AppState;

type ApiResult<T> = Result<T, ApiError>;

/// Run store I/O off the async workers.
async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> AnasResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError(AnasError::Storage(format!("blocking task failed: {e}"))))?
        .map_err(ApiError)
}

// -------- Runs --------

pub async fn submit_run(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<RunReceipt>)> {
    let record: RunRecord = serde_json::from_slice(&body)
        .map_err(|e| AnasError::Validation(format!("malformed run record: {e}")))?;
    let record = record.accept()?;
    let id = record.run_id.clone();
    let runs = state.runs.clone();
    let key = id.clone();
    blocking(move || runs.save(&key, &record)).await?;
    Ok((StatusCode::CREATED, Json(RunReceipt::stored(id))))
}

pub async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<RunMetadata>>> {
    let limit = query.limit.unwrap_or(state.list_limit);
    let runs = state.runs.clone();
    let list = blocking(move || runs.list_metadata(limit)).await?;
    Ok(Json(list))
}

pub async fn latest_run(State(state): State<AppState>) -> ApiResult<Json<RunRecord>> {
    let runs = state.runs.clone();
    Ok(Json(blocking(move || runs.latest()).await?))
}

pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<RunRecord>> {
    let runs = state.runs.clone();
    Ok(Json(blocking(move || runs.get(&id)).await?))
}

pub async fn delete_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let runs = state.runs.clone();
    blocking(move || runs.delete(&id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// -------- Benchmarks --------

pub async fn create_benchmark(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<(StatusCode, Json<BenchmarkTicket>)> {
    let service = state.benchmarks.clone();
    let ticket = blocking(move || service.create(&run_id)).await?;
    Ok((StatusCode::ACCEPTED, Json(ticket)))
}

pub async fn get_benchmark(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<BenchmarkResult>> {
    let service = state.benchmarks.clone();
    Ok(Json(blocking(move || service.get_by_run(&run_id)).await?))
}

pub async fn get_benchmark_by_id(
    State(state): State<AppState>,
    Path(benchmark_id): Path<String>,
) -> ApiResult<Json<BenchmarkResult>> {
    let service = state.benchmarks.clone();
    Ok(Json(
        blocking(move || service.get_by_id(&benchmark_id)).await?,
    ))
}

pub async fn cancel_benchmark(
    State(state): State<AppState>,
    Path(benchmark_id): Path<String>,
) -> ApiResult<(StatusCode, Json<BenchmarkResult>)> {
    let service = state.benchmarks.clone();
    let result = blocking(move || service.cancel(&benchmark_id)).await?;
    Ok((StatusCode::ACCEPTED, Json(result)))
}

pub async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok".into(),
        active_benchmarks: state.benchmarks.active(),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;

    use anas_bench::{BenchmarkPipeline, BenchmarkService, PromptTemplate};
    use anas_core::{BenchmarkStatus, GradeRequest, Grader, GradingError};
    use anas_store::{BenchmarkRepository, RunRepository, SqliteStore};
    use serde_json::json;

    struct AlwaysGood;

    impl Grader for AlwaysGood {
        fn grade(&self, _request: &GradeRequest<'_>) -> Result<String, GradingError> {
            Ok(json!({
                "quality_rating": "Good",
                "quality_explanation": "fine",
                "relevance_correct": true,
                "relevance_explanation": "fine",
            })
            .to_string())
        }

        fn name(&self) -> &str {
            "always-good"
        }
    }

    pub(crate) fn test_state() -> AppState {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let runs = RunRepository::new(store.clone(), None);
        let pipeline = BenchmarkPipeline::new(
            runs.clone(),
            BenchmarkRepository::new(store, None),
            Arc::new(AlwaysGood),
            PromptTemplate::default(),
        );
        let service = BenchmarkService::new(pipeline, std::time::Duration::from_secs(300));
        AppState::new(runs, service, 10)
    }

    pub(crate) fn run_body(run_id: &str, day: u32) -> Bytes {
        Bytes::from(
            json!({
                "runId": run_id,
                "runDate": format!("2025-03-{day:02}T08:00:00Z"),
                "persona": {
                    "name": "LocalLLaMA",
                    "personaIdentity": "an AI researcher",
                    "focusAreas": ["open models"],
                    "exclusionCriteria": ["memes"]
                },
                "entrySummaries": [
                    {"rawInput": "ID: a\nTitle: A", "results": {"id": "a", "title": "A", "isRelevant": true}},
                    {"rawInput": "ID: b\nTitle: B", "results": {"id": "", "title": "B"}}
                ],
                "modelName": "test-model"
            })
            .to_string(),
        )
    }

    async fn submit(state: &AppState, run_id: &str, day: u32) -> RunReceipt {
        let (status, Json(receipt)) = submit_run(State(state.clone()), run_body(run_id, day))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        receipt
    }

    #[tokio::test]
    async fn test_submit_and_fetch_run() {
        let state = test_state();
        let receipt = submit(&state, "run-1", 1).await;
        assert_eq!(receipt.id, "run-1");
        assert_eq!(receipt.status, "stored");

        let Json(run) = get_run(State(state.clone()), Path("run-1".into()))
            .await
            .unwrap();
        assert_eq!(run.entry_summaries.len(), 2);
        assert_eq!(run.extra["modelName"], "test-model");
    }

    #[tokio::test]
    async fn test_submit_generates_id() {
        let state = test_state();
        let receipt = submit(&state, "", 1).await;
        assert_eq!(receipt.id.len(), 26);
    }

    #[tokio::test]
    async fn test_malformed_body_is_400() {
        let state = test_state();
        let err = submit_run(State(state.clone()), Bytes::from_static(b"{nope"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = submit_run(State(state), run_body("bad/id", 1))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_runs_never_null() {
        let state = test_state();
        let Json(list) = list_runs(State(state.clone()), Query(ListQuery::default()))
            .await
            .unwrap();
        assert!(list.is_empty());
        assert_eq!(serde_json::to_string(&list).unwrap(), "[]");

        submit(&state, "a", 1).await;
        submit(&state, "b", 2).await;
        let Json(list) = list_runs(State(state), Query(ListQuery { limit: Some(1) }))
            .await
            .unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].total_items, Some(2));
    }

    #[tokio::test]
    async fn test_latest_and_missing() {
        let state = test_state();
        let err = latest_run(State(state.clone())).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        submit(&state, "older", 1).await;
        submit(&state, "newer", 9).await;
        let Json(run) = latest_run(State(state.clone())).await.unwrap();
        assert_eq!(run.run_id, "newer");

        let err = get_run(State(state), Path("ghost".into()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_run() {
        let state = test_state();
        submit(&state, "gone", 1).await;
        let status = delete_run(State(state.clone()), Path("gone".into()))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(get_run(State(state), Path("gone".into())).await.is_err());
    }

    #[tokio::test]
    async fn test_benchmark_flow() {
        let state = test_state();
        let err = create_benchmark(State(state.clone()), Path("ghost".into()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err = get_benchmark(State(state.clone()), Path("run-1".into()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        submit(&state, "run-1", 1).await;
        let (status, Json(ticket)) = create_benchmark(State(state.clone()), Path("run-1".into()))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(ticket.status, BenchmarkStatus::Queued);

        state.benchmarks.join(&ticket.id).await;
        let Json(result) = get_benchmark(State(state.clone()), Path("run-1".into()))
            .await
            .unwrap();
        assert_eq!(result.status, BenchmarkStatus::Completed);
        // "a" graded, "b" missing
        assert_eq!(result.total_items, 2);
        assert_eq!(result.missing_items, vec!["b".to_string()]);
        assert_eq!(result.quality_score, 37.5);

        let Json(by_id) = get_benchmark_by_id(State(state.clone()), Path(ticket.id.clone()))
            .await
            .unwrap();
        assert_eq!(by_id, result);

        let err = cancel_benchmark(State(state.clone()), Path(ticket.id))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let Json(status) = health(State(state)).await;
        assert_eq!(status.active_benchmarks, 0);
    }
}
