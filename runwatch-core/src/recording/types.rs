use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Header carrying the poll cycle that issued a request.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// One line of the recording file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub timestamp: DateTime<Utc>,
    pub correlation_id: String,
    pub direction: Direction,
    /// `GET /repos/o/r/actions/runs` for requests, `response_200` or `error`
    /// for the outcome.
    pub operation: String,
    pub exchange: HttpExchange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Request,
    Response,
}

/// Sanitized view of one side of an HTTP exchange.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpExchange {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
