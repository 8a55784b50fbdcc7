use std::net::IpAddr;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;
use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{lookup, ApiError, AppState};
use crate::injector::{self, InjectError, UpdateRequest};
use crate::message::{Afi, Family, Safi};
use crate::session::MessageId;

#[derive(Debug, Serialize)]
pub struct UpdateQueued {
    pub status: &'static str,
    pub peer: IpAddr,
    pub message_id: MessageId,
}

/// Outbound side of a peer's session
#[derive(Debug, Serialize)]
pub struct OutboundStatus {
    pub peer: IpAddr,
    pub state: String,
    pub queue_depth: usize,
    pub updates_sent: u64,
    pub last_message_id: Option<MessageId>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RefreshRequest {
    pub afi: String,
    #[serde(default = "default_safi")]
    pub safi: String,
}

fn default_safi() -> String {
    "unicast".to_string()
}

#[derive(Debug, Serialize)]
pub struct RefreshQueued {
    pub status: &'static str,
    pub peer: IpAddr,
    pub family: Family,
}

/// Bodies are parsed here instead of with `Json<T>` so that bad JSON gets
/// the same error body as everything else
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|err| ApiError::BadRequest(format!("Invalid JSON body: {}", err)))
}

pub async fn send_update(
    State(state): State<AppState>,
    Path(peer): Path<String>,
    body: Bytes,
) -> Result<Json<UpdateQueued>, ApiError> {
    let handle = lookup(&state, &peer).await?;
    let request: UpdateRequest = parse_body(&body)?;
    debug!("[{}] Update request: {:?}", handle.addr(), request);
    let message_id = injector::inject(&handle, request).await?;
    Ok(Json(UpdateQueued {
        status: "queued",
        peer: handle.addr(),
        message_id,
    }))
}

pub async fn update_status(
    State(state): State<AppState>,
    Path(peer): Path<String>,
) -> Result<Json<OutboundStatus>, ApiError> {
    let status = lookup(&state, &peer).await?.status();
    Ok(Json(OutboundStatus {
        peer: status.peer,
        state: status.state.to_string(),
        queue_depth: status.queue_depth,
        updates_sent: status.counts.update.sent,
        last_message_id: status.last_sent_id,
    }))
}

pub async fn send_route_refresh(
    State(state): State<AppState>,
    Path(peer): Path<String>,
    body: Bytes,
) -> Result<Json<RefreshQueued>, ApiError> {
    let handle = lookup(&state, &peer).await?;
    let request: RefreshRequest = parse_body(&body)?;
    let invalid = |field: &str, reason: String| {
        ApiError::Inject(InjectError::InvalidRequest {
            field: field.to_string(),
            reason,
        })
    };
    let afi: Afi = request.afi.parse().map_err(|err: crate::utils::ParseError| invalid("afi", err.reason))?;
    let safi: Safi = request
        .safi
        .parse()
        .map_err(|err: crate::utils::ParseError| invalid("safi", err.reason))?;
    let family = Family::new(afi, safi);
    injector::route_refresh(&handle, family).await?;
    Ok(Json(RefreshQueued {
        status: "queued",
        peer: handle.addr(),
        family,
    }))
}
