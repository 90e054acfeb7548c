//! Admin API: JSON views over the gateway and the clusters it fronts.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::compression::CompressionLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{error, info, warn};

use crate::error::TopicAdminError;
use crate::topology::topic_admin::kafka_topic;
use crate::topology::Broker;
use crate::KatewayEngine;

pub const HEADER_APPID: &str = "Appid";
pub const HEADER_PUBKEY: &str = "Pubkey";

/// Upper bound for `partitions` and `replicas` on topic creation.
pub const MAX_PARTITIONS: i32 = 10_000;

pub fn router(engine: KatewayEngine) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/clusters", get(get_clusters))
        .route("/clusters/{cluster}/brokers", get(get_brokers))
        .route("/clusters/{cluster}/lag", get(get_lag))
        .route("/servers", get(get_servers))
        .route("/producers", get(get_producers))
        .route("/consumers", get(get_consumers))
        .route("/topics/{cluster}/{appid}/{topic}/{ver}", post(add_topic))
        .layer(CompressionLayer::new())
        .layer(SetResponseHeaderLayer::overriding(
            header::SERVER,
            HeaderValue::from_static("kateway"),
        ))
        .with_state(engine)
}

// ========================================
// ERRORS
// ========================================

pub enum ApiError {
    UnknownCluster(String),
    PermissionDenied,
    InvalidParams(String),
    TopicAdmin(TopicAdminError),
    TopicNotCreated(Vec<String>),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::UnknownCluster(cluster) => (
                StatusCode::NOT_FOUND,
                Json(json!({ "errmsg": format!("cluster not found: {}", cluster) })),
            )
                .into_response(),
            ApiError::PermissionDenied => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "errmsg": "permission denied" })),
            )
                .into_response(),
            ApiError::InvalidParams(reason) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "errmsg": reason })),
            )
                .into_response(),
            ApiError::TopicAdmin(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
            }
            ApiError::TopicNotCreated(lines) => {
                (StatusCode::INTERNAL_SERVER_ERROR, lines.join("\n")).into_response()
            }
        }
    }
}

// ========================================
// HANDLERS
// ========================================

async fn get_status(State(engine): State<KatewayEngine>) -> impl IntoResponse {
    Json(engine.gateway.status())
}

async fn get_clusters(State(engine): State<KatewayEngine>) -> impl IntoResponse {
    Json(engine.clusters.names())
}

async fn get_servers(State(engine): State<KatewayEngine>) -> impl IntoResponse {
    Json(engine.gateway.registry().peers())
}

async fn get_producers(State(engine): State<KatewayEngine>) -> impl IntoResponse {
    Json(engine.gateway.registry().producers())
}

async fn get_consumers(State(engine): State<KatewayEngine>) -> impl IntoResponse {
    Json(engine.gateway.registry().consumers())
}

async fn get_brokers(
    State(engine): State<KatewayEngine>,
    Path(cluster): Path<String>,
) -> Result<Json<BTreeMap<String, Broker>>, ApiError> {
    let topology = engine
        .clusters
        .get(&cluster)
        .ok_or(ApiError::UnknownCluster(cluster))?;
    Ok(Json(topology.brokers().await))
}

async fn get_lag(
    State(engine): State<KatewayEngine>,
    Path(cluster): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let topology = engine
        .clusters
        .get(&cluster)
        .ok_or(ApiError::UnknownCluster(cluster))?;
    Ok(Json(engine.lag.consumers_by_group(&topology).await))
}

#[derive(Debug, Deserialize)]
pub struct TopicParams {
    pub partitions: Option<i32>,
    pub replicas: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct TopicPath {
    pub cluster: String,
    pub appid: String,
    pub topic: String,
    pub ver: String,
}

/// `POST /topics/{cluster}/{appid}/{topic}/{ver}?partitions=1&replicas=2`
async fn add_topic(
    State(engine): State<KatewayEngine>,
    Path(path): Path<TopicPath>,
    Query(params): Query<TopicParams>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let appid = header_str(&headers, HEADER_APPID);
    let pubkey = header_str(&headers, HEADER_PUBKEY);
    if !engine.admin.topic_creation_enabled() {
        warn!(appid, cluster = %path.cluster, topic = %path.topic, "topic creation disabled: no admin pubkey configured");
        return Err(ApiError::PermissionDenied);
    }
    if appid != engine.admin.appid || pubkey != engine.admin.pubkey {
        warn!(
            appid,
            cluster = %path.cluster,
            topic = %path.topic,
            "suspicious add topic request"
        );
        return Err(ApiError::PermissionDenied);
    }

    let topology = engine
        .clusters
        .get(&path.cluster)
        .ok_or_else(|| ApiError::UnknownCluster(path.cluster.clone()))?;

    let partitions = params.partitions.unwrap_or(engine.admin.default_partitions);
    let replicas = params.replicas.unwrap_or(engine.admin.default_replicas);
    for (name, value) in [("partitions", partitions), ("replicas", replicas)] {
        if !(1..=MAX_PARTITIONS).contains(&value) {
            return Err(ApiError::InvalidParams(format!(
                "{} must be between 1 and {}, got {}",
                name, MAX_PARTITIONS, value
            )));
        }
    }
    let topic = kafka_topic(&path.appid, &path.topic, &path.ver);
    info!(appid, cluster = %path.cluster, topic = %topic, partitions, replicas, "add topic");

    let lines = engine
        .topic_admin
        .add_topic(&topology, &topic, replicas, partitions)
        .await
        .map_err(|e| {
            error!(cluster = %path.cluster, topic = %topic, error = %e, "add topic failed");
            ApiError::TopicAdmin(e)
        })?;

    if lines.iter().any(|line| line.contains("Created topic")) {
        Ok(Json(json!({ "ok": 1 })))
    } else {
        Err(ApiError::TopicNotCreated(lines))
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
}
