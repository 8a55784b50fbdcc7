use std::net::{IpAddr, Ipv4Addr};

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use super::{lookup, ApiError, AppState};
use crate::session::{MessageCounts, SessionStatus};
use crate::utils::format_time_as_elapsed;

#[derive(Debug, Serialize)]
pub struct PeerSummary {
    pub peer: IpAddr,
    pub router_id: Option<Ipv4Addr>,
    pub asn: u32,
    pub msg_received: u64,
    pub msg_sent: u64,
    pub connect_time: Option<i64>,
    pub uptime: Option<String>,
    pub state: String,
}

impl From<&SessionStatus> for PeerSummary {
    fn from(status: &SessionStatus) -> PeerSummary {
        PeerSummary {
            peer: status.peer,
            router_id: status.router_id,
            asn: status.remote_as,
            msg_received: status.counts.received(),
            msg_sent: status.counts.sent(),
            connect_time: status.established_at.map(|time| time.timestamp()),
            uptime: status.established_at.map(format_time_as_elapsed),
            state: status.state.to_string(),
        }
    }
}

/// Full session snapshot, with a human readable uptime
#[derive(Debug, Serialize)]
pub struct PeerDetail {
    #[serde(flatten)]
    pub status: SessionStatus,
    pub uptime: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PeerStatistics {
    pub peer: IpAddr,
    pub state: String,
    pub messages: MessageCounts,
    pub msg_sent: u64,
    pub msg_received: u64,
}

pub async fn list_peers(State(state): State<AppState>) -> Json<Vec<PeerSummary>> {
    let summaries = state
        .registry
        .list()
        .await
        .iter()
        .map(|handle| PeerSummary::from(&handle.status()))
        .collect();
    Json(summaries)
}

pub async fn peer_state(
    State(state): State<AppState>,
    Path(peer): Path<String>,
) -> Result<Json<PeerDetail>, ApiError> {
    let status = lookup(&state, &peer).await?.status();
    Ok(Json(PeerDetail {
        uptime: status.established_at.map(format_time_as_elapsed),
        status,
    }))
}

pub async fn peer_statistics(
    State(state): State<AppState>,
    Path(peer): Path<String>,
) -> Result<Json<PeerStatistics>, ApiError> {
    let status = lookup(&state, &peer).await?.status();
    Ok(Json(PeerStatistics {
        peer: status.peer,
        state: status.state.to_string(),
        msg_sent: status.counts.sent(),
        msg_received: status.counts.received(),
        messages: status.counts,
    }))
}
