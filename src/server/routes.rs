use std::sync::Arc;

use axum::extract::Path;
use axum::middleware;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use tower_http::cors::CorsLayer;

use crate::jobs::JobQueue;
use crate::ledger::{RoundId, TableId};
use crate::round::{
    CancelSummary, RoundController, RoundStarted, SettleRequest, SettleSummary, ShuffleSummary,
    TableState,
};
use crate::tokio_tools::now_millis;

use super::dto::{
    ApiResponse, DeadJobsResponse, HistoryResponse, RetryResponse, RouletteStatsResponse,
    ShuffleRequest, StopBettingResponse,
};
use super::error::ApiError;
use super::logging::log_requests;

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Clone)]
pub struct ServerContext {
    pub controller: Arc<RoundController>,
    pub queues: Vec<Arc<JobQueue>>,
}

impl ServerContext {
    fn queue(&self, name: &str) -> Result<&Arc<JobQueue>, ApiError> {
        self.queues
            .iter()
            .find(|queue| queue.name() == name)
            .ok_or_else(|| ApiError::not_found(format!("queue {name} not found")))
    }
}

/// Operator-facing HTTP facade over the round controller.
pub struct LiveDealerServer {
    router: Router,
}

impl LiveDealerServer {
    pub fn new(context: ServerContext) -> Self {
        let router = Router::new()
            .route("/tables/:table_id/start", post(start_game))
            .route("/tables/:table_id/rounds/:round_id/stop", post(stop_betting))
            .route("/tables/:table_id/shuffle", post(shuffle))
            .route("/tables/:table_id/state", get(table_state))
            .route("/tables/:table_id/history", get(history))
            .route("/tables/:table_id/roulette-stats", get(roulette_stats))
            .route("/rounds/settle", post(settle))
            .route("/rounds/resettle", post(re_settle))
            .route("/rounds/:round_id/cancel", post(cancel_round))
            .route("/jobs/:queue/dead", get(dead_jobs))
            .route("/jobs/:queue/dead/:job_id/retry", post(retry_dead))
            .layer(Extension(Arc::new(context)))
            .layer(middleware::from_fn(log_requests))
            .layer(CorsLayer::permissive());

        Self { router }
    }

    pub fn into_router(self) -> Router {
        self.router
    }
}

async fn start_game(
    Extension(ctx): Extension<Arc<ServerContext>>,
    Path(table_id): Path<TableId>,
) -> ApiResult<RoundStarted> {
    let started = ctx.controller.start_game(table_id).await?;
    Ok(Json(ApiResponse::ok(started)))
}

async fn stop_betting(
    Extension(ctx): Extension<Arc<ServerContext>>,
    Path((table_id, round_id)): Path<(TableId, RoundId)>,
) -> ApiResult<StopBettingResponse> {
    let stopped = ctx.controller.stop_betting(table_id, round_id).await?;
    Ok(Json(ApiResponse::ok(StopBettingResponse {
        table_id,
        round_id,
        stopped,
    })))
}

async fn settle(
    Extension(ctx): Extension<Arc<ServerContext>>,
    Json(request): Json<SettleRequest>,
) -> ApiResult<SettleSummary> {
    let summary = ctx.controller.settle(request).await?;
    Ok(Json(ApiResponse::ok(summary)))
}

async fn re_settle(
    Extension(ctx): Extension<Arc<ServerContext>>,
    Json(request): Json<SettleRequest>,
) -> ApiResult<SettleSummary> {
    let summary = ctx.controller.re_settle(request).await?;
    Ok(Json(ApiResponse::ok(summary)))
}

async fn cancel_round(
    Extension(ctx): Extension<Arc<ServerContext>>,
    Path(round_id): Path<RoundId>,
) -> ApiResult<CancelSummary> {
    let summary = ctx.controller.cancel_round(round_id).await?;
    Ok(Json(ApiResponse::ok(summary)))
}

async fn shuffle(
    Extension(ctx): Extension<Arc<ServerContext>>,
    Path(table_id): Path<TableId>,
    body: Option<Json<ShuffleRequest>>,
) -> ApiResult<ShuffleSummary> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let summary = ctx.controller.shuffle(table_id, request.reset).await?;
    Ok(Json(ApiResponse::ok(summary)))
}

async fn table_state(
    Extension(ctx): Extension<Arc<ServerContext>>,
    Path(table_id): Path<TableId>,
) -> ApiResult<TableState> {
    let state = ctx.controller.table_state(table_id).await?;
    Ok(Json(ApiResponse::ok(state)))
}

async fn history(
    Extension(ctx): Extension<Arc<ServerContext>>,
    Path(table_id): Path<TableId>,
) -> ApiResult<HistoryResponse> {
    let rounds = ctx.controller.history(table_id).await?;
    Ok(Json(ApiResponse::ok(HistoryResponse { table_id, rounds })))
}

async fn roulette_stats(
    Extension(ctx): Extension<Arc<ServerContext>>,
    Path(table_id): Path<TableId>,
) -> ApiResult<RouletteStatsResponse> {
    let stats = ctx.controller.roulette_stats(table_id).await?;
    Ok(Json(ApiResponse::ok(RouletteStatsResponse::from_stats(
        table_id, &stats,
    ))))
}

async fn dead_jobs(
    Extension(ctx): Extension<Arc<ServerContext>>,
    Path(queue): Path<String>,
) -> ApiResult<DeadJobsResponse> {
    let jobs = ctx.queue(&queue)?.dead_jobs().await?;
    Ok(Json(ApiResponse::ok(DeadJobsResponse { queue, jobs })))
}

async fn retry_dead(
    Extension(ctx): Extension<Arc<ServerContext>>,
    Path((queue, job_id)): Path<(String, String)>,
) -> ApiResult<RetryResponse> {
    let requeued = ctx.queue(&queue)?.retry_dead(&job_id, now_millis()).await?;
    if !requeued {
        return Err(ApiError::not_found(format!("dead job {job_id} not found")));
    }
    Ok(Json(ApiResponse::ok(RetryResponse { job_id, requeued })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::game::GameType;
    use crate::test_support::Harness;

    fn server(harness: &Harness) -> Router {
        LiveDealerServer::new(ServerContext {
            controller: harness.controller.clone(),
            queues: vec![harness.settlements.clone(), harness.timers.clone()],
        })
        .into_router()
    }

    async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        let request = match body {
            Some(body) => request.body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn round_lifecycle_over_http() -> anyhow::Result<()> {
        let harness = Harness::new();
        let table = harness.create_table("B01", GameType::Baccarat, 20240101).await?;
        let router = server(&harness);

        let (status, body) = call(&router, "POST", &format!("/tables/{}/start", table.id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], 0);
        let round_id = body["data"]["roundId"].as_i64().expect("round id");
        assert_eq!(body["data"]["roundSn"], "B01-20240101-001");

        let (_, body) = call(
            &router,
            "POST",
            &format!("/tables/{}/rounds/{round_id}/stop", table.id),
            None,
        )
        .await;
        assert_eq!(body["data"]["stopped"], true);

        let (status, body) = call(
            &router,
            "POST",
            "/rounds/settle",
            Some(json!({
                "tableId": table.id,
                "roundId": round_id,
                "gameType": "baccarat",
                "details": { "banker": [13, 18], "player": [35, 44] },
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], 0);
        assert_eq!(body["data"]["status"], 3);

        let (_, body) = call(&router, "GET", &format!("/tables/{}/state", table.id), None).await;
        assert_eq!(body["data"]["playStatus"], 3);
        let (_, body) = call(&router, "GET", &format!("/tables/{}/history", table.id), None).await;
        assert_eq!(body["data"]["rounds"].as_array().map(Vec::len), Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn business_rejections_are_ok_responses_with_a_code() -> anyhow::Result<()> {
        let harness = Harness::new();
        let router = server(&harness);

        let (status, body) = call(&router, "POST", "/tables/77/start", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], 1002);
        assert!(body["message"].as_str().is_some_and(|m| m.contains("77")));

        let (status, body) = call(&router, "POST", "/rounds/5/cancel", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], 1010);

        let (status, _) = call(&router, "POST", "/rounds/settle", Some(json!({ "tableId": 1 }))).await;
        assert!(status.is_client_error());

        let (status, _) = call(&router, "GET", "/jobs/unknown/dead", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        Ok(())
    }

    #[tokio::test]
    async fn shuffle_accepts_an_empty_body() -> anyhow::Result<()> {
        let harness = Harness::new();
        let table = harness.create_table("R01", GameType::Roulette, 0).await?;
        let router = server(&harness);

        let (status, body) = call(&router, "POST", &format!("/tables/{}/shuffle", table.id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["historyCleared"], false);

        let (_, body) = call(
            &router,
            "POST",
            &format!("/tables/{}/shuffle", table.id),
            Some(json!({ "reset": true })),
        )
        .await;
        assert_eq!(body["data"]["historyCleared"], true);

        let (_, body) = call(&router, "GET", &format!("/tables/{}/roulette-stats", table.id), None).await;
        assert_eq!(body["data"]["total"], 0);
        Ok(())
    }
}
