//! Node registration and removal.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use nodegate_common::{
    AddressBlock, DeleteRequest, DeleteResponse, DeleteStatus, NodegateError, RegisterRequest, Role,
    validate_hostname,
};
use std::net::Ipv4Addr;

use super::error::ApiError;
use crate::state::AppState;

/// `POST /register`: allocate (or return) the node's block and label the Node.
///
/// A labeling failure is reported as 500 but the allocation stays recorded;
/// registering again returns the same block and retries the label.
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<AddressBlock>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::invalid(e.body_text()))?;
    authorize(&state, request.token.as_deref())?;

    let node = request.node.ok_or_else(|| ApiError::invalid("missing node"))?;
    let hostname = required(node.hostname, "node.hostname")?;
    validate_hostname(&hostname)?;

    let ip_text = required(node.ip, "node.ip")?;
    let ip = ip_text
        .parse::<Ipv4Addr>()
        .map_err(|_| ApiError::invalid(format!("node.ip '{}' is not an IPv4 address", ip_text)))?;

    let role = required(node.role, "node.role")?.parse::<Role>()?;

    let assignment = state.allocator.assign(role, &hostname, ip).await?;

    if let Err(e) = state.cluster.label_node(&hostname, role).await {
        tracing::error!(
            node = %hostname,
            role = %role,
            cidr = %assignment.block.cidr,
            error = %e,
            "Labeling failed, allocation kept"
        );
        return Err(ApiError(NodegateError::Cluster(format!(
            "node {} was assigned {} but labeling failed: {}",
            hostname, assignment.block.cidr, e
        ))));
    }

    tracing::info!(
        node = %hostname,
        role = %role,
        cidr = %assignment.block.cidr,
        created = assignment.created,
        "Node registered"
    );

    Ok(Json(assignment.block))
}

/// `POST /delete`: remove the Node object and release its block.
///
/// Both steps run whatever the other's outcome. Only a failed Node removal
/// turns the response into a 500.
pub async fn delete(
    State(state): State<AppState>,
    payload: Result<Json<DeleteRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<DeleteResponse>), ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::invalid(e.body_text()))?;
    authorize(&state, request.token.as_deref())?;

    let node = request.node.ok_or_else(|| ApiError::invalid("missing node"))?;
    let hostname = required(node.hostname, "node.hostname")?;
    validate_hostname(&hostname)?;

    let role = match node.role.as_deref().map(str::trim) {
        Some(r) if !r.is_empty() => Some(r.parse::<Role>()?),
        _ => None,
    };

    let node_removed = match state.cluster.delete_node(&hostname).await {
        Ok(()) => true,
        Err(e) if e.is_not_found() => {
            tracing::info!(node = %hostname, "Node object already absent");
            true
        }
        Err(e) => {
            tracing::error!(node = %hostname, error = %e, "Failed to delete Node object");
            false
        }
    };

    let outcome = state.allocator.release(&hostname).await;
    let found = outcome.found();
    let release_error = outcome.error_message();
    let released_from = outcome.released_from;

    if let Some(role) = role {
        if !released_from.is_empty() && !released_from.contains(&role) {
            tracing::warn!(node = %hostname, requested = %role, released = ?released_from, "Node was held under a different role");
        }
    }

    let status = if found {
        DeleteStatus::Ok
    } else {
        DeleteStatus::NotFound
    };

    let code = if node_removed {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };

    tracing::info!(
        node = %hostname,
        node_removed = node_removed,
        released = ?released_from,
        "Node delete processed"
    );

    Ok((
        code,
        Json(DeleteResponse {
            status,
            node: hostname,
            node_removed,
            released_from,
            release_error,
        }),
    ))
}

fn authorize(state: &AppState, token: Option<&str>) -> Result<(), ApiError> {
    match token {
        None | Some("") => Err(ApiError::invalid("missing token")),
        Some(t) if t == &*state.join_token => Ok(()),
        Some(_) => {
            tracing::warn!("Request rejected: wrong join token");
            Err(ApiError(NodegateError::Unauthorized("invalid token".into())))
        }
    }
}

fn required(value: Option<String>, field: &str) -> Result<String, ApiError> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ApiError::invalid(format!("missing {}", field))),
    }
}
