use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::TypeConversionError;

/// Server-reported phase of a submitted query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    Queued,
    WaitingForResources,
    Dispatching,
    Planning,
    Starting,
    Running,
    Finishing,
    Finished,
    Failed,
    Canceled,
    /// A state name this client does not know. Treated as still running.
    #[serde(other)]
    Unknown,
}

impl ExecutionState {
    /// True while the engine is still working on the query.
    pub fn is_running(self) -> bool {
        !self.is_terminal()
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionState::Finished | ExecutionState::Failed | ExecutionState::Canceled
        )
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionState::Queued => "QUEUED",
            ExecutionState::WaitingForResources => "WAITING_FOR_RESOURCES",
            ExecutionState::Dispatching => "DISPATCHING",
            ExecutionState::Planning => "PLANNING",
            ExecutionState::Starting => "STARTING",
            ExecutionState::Running => "RUNNING",
            ExecutionState::Finishing => "FINISHING",
            ExecutionState::Finished => "FINISHED",
            ExecutionState::Failed => "FAILED",
            ExecutionState::Canceled => "CANCELED",
            ExecutionState::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Response envelope returned by both the submission endpoint and every
/// continuation handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<Column>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Vec<serde_json::Value>>>,
    pub stats: QueryStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ServerError>,
}

impl QueryResponse {
    /// Continuation handle, with an empty string treated as absent.
    pub fn next_uri(&self) -> Option<&str> {
        self.next_uri.as_deref().filter(|uri| !uri.is_empty())
    }

    pub fn has_data(&self) -> bool {
        self.data.as_ref().is_some_and(|rows| !rows.is_empty())
    }

    pub fn state(&self) -> ExecutionState {
        self.stats.state
    }
}

/// Only `state` is required; the remaining counters are informational.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryStats {
    pub state: ExecutionState,
    #[serde(default)]
    pub scheduled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_splits: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_splits: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_rows: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_time_millis: Option<u64>,
}

/// One entry of the column schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorLocation {
    pub line_number: u32,
    pub column_number: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureInfo {
    #[serde(rename = "type")]
    pub failure_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stack: Vec<String>,
}

/// Structured error detail reported by the engine when a query FAILED.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_state: Option<String>,
    #[serde(default)]
    pub error_code: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_location: Option<ErrorLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_info: Option<FailureInfo>,
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error_name {
            Some(name) => write!(f, "{}: {}", name, self.message)?,
            None => f.write_str(&self.message)?,
        }
        if let Some(loc) = &self.error_location {
            write!(f, " (line {}, column {})", loc.line_number, loc.column_number)?;
        }
        Ok(())
    }
}

impl std::error::Error for ServerError {}

/// Errors produced while running a query.
#[derive(Error, Debug)]
pub enum PrestoError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("query failed: HTTP {status}: {body}")]
    QueryFailed { status: u16, body: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error(transparent)]
    Server(ServerError),

    #[error("query canceled")]
    Canceled,

    #[error(transparent)]
    Conversion(#[from] TypeConversionError),

    #[error("not supported: {0}")]
    NotSupported(&'static str),

    #[error("invalid data source: {0}")]
    InvalidDataSource(String),

    #[error("query did not finish within {0:?}")]
    Timeout(Duration),
}

impl PrestoError {
    /// Failures where the client could not obtain a usable response at all.
    pub fn is_query_failed(&self) -> bool {
        matches!(
            self,
            PrestoError::Http(_)
                | PrestoError::Transport(_)
                | PrestoError::QueryFailed { .. }
                | PrestoError::MalformedResponse(_)
        )
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, PrestoError::Canceled)
    }

    /// The engine's own error detail, when the query FAILED server-side.
    pub fn server_error(&self) -> Option<&ServerError> {
        match self {
            PrestoError::Server(err) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T, E = PrestoError> = std::result::Result<T, E>;
