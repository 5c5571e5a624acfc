use crate::config::Config;
use anyhow::Context;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use nodefs_core::operations::{
    AddReplicaOperation, AddReplicaOperationRequest, ClusterSummaryOperation, CreateNodeOperation,
    CreateNodeOperationRequest, DeleteFileOperation, DeleteFileOperationRequest,
    DeleteNodeOperation, DeleteNodeOperationRequest, DeleteReplicaOperation,
    DeleteReplicaOperationRequest, ListFilesOperation, ListNodesOperation, NodeStatusOperation,
    NodeStatusOperationRequest, OperationWarning, PlacementFailure, ReadFileOperation,
    ReadFileOperationOutcome, ReadFileOperationRequest, RebalanceOperation, UploadFileOperation,
    UploadFileOperationRequest,
};
use nodefs_core::{
    BlobStore, FileRecord, Node, NodeStatus, NodefsError, RecordStore, Replica, Session,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Header naming the acting user.
pub const OWNER_HEADER: &str = "x-nodefs-owner";

pub struct ServerState {
    pub config: Config,
    pub records: Arc<dyn RecordStore>,
    pub blobs: Arc<dyn BlobStore>,
}

impl ServerState {
    fn session(&self, headers: &HeaderMap) -> Session {
        let owner = headers
            .get(OWNER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(self.config.default_owner.as_str());
        Session::new(owner)
    }
}

#[derive(Debug, Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateNodeBody {
    name: String,
    #[serde(default)]
    capacity_total: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct NodeStatusBody {
    status: NodeStatus,
}

#[derive(Debug, Serialize)]
struct NodeStatusResponse {
    node: Node,
    previous_status: NodeStatus,
    affected_files: BTreeSet<String>,
    warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ImpactResponse {
    node_id: String,
    affected_files: BTreeSet<String>,
}

#[derive(Debug, Deserialize)]
struct UploadQuery {
    name: String,
    #[serde(default)]
    nodes: String,
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    file: FileRecord,
    replicas: Vec<Replica>,
    failures: Vec<PlacementFailure>,
    warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AddReplicaBody {
    node_id: String,
}

#[derive(Debug, Serialize)]
struct DeletedResponse {
    id: String,
    warnings: Vec<String>,
}

pub fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/summary", get(summary_handler))
        .route("/nodes", get(list_nodes).post(create_node))
        .route("/nodes/:id", delete(delete_node))
        .route("/nodes/:id/status", put(set_node_status))
        .route("/nodes/:id/impact", get(node_impact))
        .route("/files", get(list_files).post(upload_file))
        .route("/files/:id", delete(delete_file))
        .route("/files/:id/content", get(download_file))
        .route("/files/:id/replicas", post(add_replica))
        .route("/replicas/:id", delete(delete_replica))
        .route("/rebalance/plan", get(rebalance_plan))
        .route("/rebalance/apply", post(rebalance_apply))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let records = config
        .records
        .build()
        .context("failed to open record store")?;
    let blobs = config.blobs.build().context("failed to open blob store")?;
    let bind_addr = config.bind_addr.clone();

    let state = Arc::new(ServerState {
        config,
        records,
        blobs,
    });
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn error_status(error: &NodefsError) -> StatusCode {
    match error {
        NodefsError::NodeNotFound(_)
        | NodefsError::FileNotFound(_)
        | NodefsError::ReplicaNotFound(_) => StatusCode::NOT_FOUND,
        NodefsError::InvalidRequest(_) | NodefsError::NoNodesSelected => StatusCode::BAD_REQUEST,
        NodefsError::InsufficientCapacity(_)
        | NodefsError::NodeOffline(_)
        | NodefsError::NodeNotEmpty { .. }
        | NodefsError::DuplicateReplica { .. }
        | NodefsError::InsufficientNodes { .. }
        | NodefsError::NothingToBalance => StatusCode::CONFLICT,
        NodefsError::FileUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        NodefsError::UploadFailed { cause, .. } => error_status(cause),
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond<T: Serialize>(status: StatusCode, data: T) -> Response {
    let resp = ApiResponse {
        success: true,
        data: Some(data),
        error: None,
    };
    (status, Json(resp)).into_response()
}

fn fail(error: NodefsError) -> Response {
    let status = error_status(&error);
    if status.is_server_error() {
        tracing::error!("Request failed: {}", error);
    }
    let resp = ApiResponse::<()> {
        success: false,
        data: None,
        error: Some(error.to_string()),
    };
    (status, Json(resp)).into_response()
}

fn reply<T: Serialize>(status: StatusCode, result: nodefs_core::Result<T>) -> Response {
    match result {
        Ok(data) => respond(status, data),
        Err(error) => fail(error),
    }
}

fn warning_messages(warnings: &[OperationWarning]) -> Vec<String> {
    warnings.iter().map(ToString::to_string).collect()
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn summary_handler(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> Response {
    let session = state.session(&headers);
    let result = ClusterSummaryOperation::new(state.records.clone())
        .run(&session)
        .await;
    reply(StatusCode::OK, result)
}

async fn list_nodes(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> Response {
    let session = state.session(&headers);
    let result = ListNodesOperation::new(state.records.clone())
        .run(&session)
        .await;
    reply(StatusCode::OK, result)
}

async fn create_node(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Result<Json<CreateNodeBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return fail(NodefsError::InvalidRequest(rejection.body_text())),
    };
    let result = CreateNodeOperation::new(state.records.clone())
        .run(CreateNodeOperationRequest {
            session: state.session(&headers),
            name: body.name,
            capacity_total: body.capacity_total,
        })
        .await
        .map(|result| result.node);
    reply(StatusCode::CREATED, result)
}

async fn set_node_status(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Path(node_id): Path<String>,
    body: Result<Json<NodeStatusBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return fail(NodefsError::InvalidRequest(rejection.body_text())),
    };
    let result = NodeStatusOperation::new(state.records.clone())
        .run(NodeStatusOperationRequest {
            session: state.session(&headers),
            node_id,
            status: body.status,
        })
        .await
        .map(|result| NodeStatusResponse {
            node: result.node,
            previous_status: result.change.from,
            affected_files: result.change.affected_files,
            warnings: warning_messages(&result.warnings),
        });
    reply(StatusCode::OK, result)
}

async fn node_impact(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Path(node_id): Path<String>,
) -> Response {
    let session = state.session(&headers);
    let result = NodeStatusOperation::new(state.records.clone())
        .preview(&session, &node_id)
        .await
        .map(|change| ImpactResponse {
            node_id: change.node_id,
            affected_files: change.affected_files,
        });
    reply(StatusCode::OK, result)
}

async fn delete_node(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Path(node_id): Path<String>,
) -> Response {
    let result = DeleteNodeOperation::new(state.records.clone())
        .run(DeleteNodeOperationRequest {
            session: state.session(&headers),
            node_id,
        })
        .await
        .map(|result| DeletedResponse {
            id: result.node.id,
            warnings: Vec::new(),
        });
    reply(StatusCode::OK, result)
}

async fn list_files(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> Response {
    let session = state.session(&headers);
    let result = ListFilesOperation::new(state.records.clone())
        .run(&session)
        .await;
    reply(StatusCode::OK, result)
}

async fn upload_file(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    query: Result<Query<UploadQuery>, QueryRejection>,
    body: Bytes,
) -> Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => return fail(NodefsError::InvalidRequest(rejection.body_text())),
    };
    let target_node_ids = query
        .nodes
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();

    let result = UploadFileOperation::new(state.records.clone(), state.blobs.clone())
        .with_unit_bytes(state.config.unit_bytes)
        .run(UploadFileOperationRequest {
            session: state.session(&headers),
            name: query.name,
            data: body,
            size: query.size,
            target_node_ids,
        })
        .await
        .map(|result| UploadResponse {
            warnings: warning_messages(&result.warnings),
            file: result.file,
            replicas: result.replicas,
            failures: result.failures,
        });
    reply(StatusCode::CREATED, result)
}

async fn download_file(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Path(file_id): Path<String>,
) -> Response {
    let outcome = ReadFileOperation::new(state.records.clone(), state.blobs.clone())
        .run(ReadFileOperationRequest {
            session: state.session(&headers),
            file_id: file_id.clone(),
            include_body: true,
        })
        .await;

    match outcome {
        Ok(ReadFileOperationOutcome::Found(result)) => {
            let body = result.body.unwrap_or_default();
            let headers = [
                (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!(
                        "attachment; filename=\"{}\"",
                        result
                            .entry
                            .file
                            .name
                            .chars()
                            .filter(|c| *c != '"' && !c.is_control())
                            .collect::<String>()
                    ),
                ),
            ];
            (StatusCode::OK, headers, body).into_response()
        }
        Ok(ReadFileOperationOutcome::NotFound) => fail(NodefsError::FileNotFound(file_id)),
        Ok(ReadFileOperationOutcome::Unavailable(entry)) => {
            fail(NodefsError::FileUnavailable(entry.file.id))
        }
        Err(error) => fail(error),
    }
}

async fn delete_file(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Path(file_id): Path<String>,
) -> Response {
    let result = DeleteFileOperation::new(state.records.clone(), state.blobs.clone())
        .run(DeleteFileOperationRequest {
            session: state.session(&headers),
            file_id,
        })
        .await
        .map(|result| DeletedResponse {
            id: result.file.id,
            warnings: warning_messages(&result.warnings),
        });
    reply(StatusCode::OK, result)
}

async fn add_replica(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Path(file_id): Path<String>,
    body: Result<Json<AddReplicaBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return fail(NodefsError::InvalidRequest(rejection.body_text())),
    };
    let result = AddReplicaOperation::new(state.records.clone())
        .run(AddReplicaOperationRequest {
            session: state.session(&headers),
            file_id,
            node_id: body.node_id,
        })
        .await
        .map(|result| result.replica);
    reply(StatusCode::CREATED, result)
}

async fn delete_replica(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Path(replica_id): Path<String>,
) -> Response {
    let result = DeleteReplicaOperation::new(state.records.clone())
        .run(DeleteReplicaOperationRequest {
            session: state.session(&headers),
            replica_id,
        })
        .await
        .map(|result| DeletedResponse {
            id: result.replica.id,
            warnings: warning_messages(&result.warnings),
        });
    reply(StatusCode::OK, result)
}

async fn rebalance_plan(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> Response {
    let session = state.session(&headers);
    let result = RebalanceOperation::new(state.records.clone())
        .with_options(state.config.rebalance.clone())
        .plan(&session)
        .await;
    reply(StatusCode::OK, result)
}

async fn rebalance_apply(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> Response {
    let session = state.session(&headers);
    let result = RebalanceOperation::new(state.records.clone())
        .with_options(state.config.rebalance.clone())
        .run(&session)
        .await;
    reply(StatusCode::OK, result)
}
