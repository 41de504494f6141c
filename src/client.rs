use std::sync::Arc;

use tracing::debug;

use crate::config::ClientConfig;
use crate::models::*;
use crate::transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};

/// Low-level Presto client that issues the individual protocol requests:
/// statement submission, a single poll of a continuation handle, and cancel.
#[derive(Debug)]
pub struct PrestoClient<T> {
    config: ClientConfig,
    transport: Arc<T>,
}

impl<T> Clone for PrestoClient<T> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            transport: Arc::clone(&self.transport),
        }
    }
}

impl PrestoClient<ReqwestTransport> {
    /// Creates a client that talks to the coordinator over reqwest.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_transport(config, ReqwestTransport::new())
    }
}

impl<T: Transport> PrestoClient<T> {
    pub fn with_transport(config: ClientConfig, transport: T) -> Self {
        Self {
            config,
            transport: Arc::new(transport),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// POST /v1/statement
    ///
    /// Submits the statement and decodes the immediate response. A FAILED
    /// state here is returned as the engine's error without polling.
    pub async fn submit_statement(&self, statement: &str) -> Result<QueryResponse> {
        let request = HttpRequest::post(self.config.statement_url(), statement)
            .with_headers(self.config.headers());

        debug!(url = %request.url, user = %self.config.user, "submitting statement");
        let resp = self.transport.send(request).await?;
        let query = self.handle_response(resp)?;
        debug!(id = ?query.id, state = %query.state(), "statement accepted");

        match query.state() {
            ExecutionState::Failed => Err(server_failure(query)),
            ExecutionState::Canceled => Err(PrestoError::Canceled),
            _ => Ok(query),
        }
    }

    /// GET {nextUri}
    ///
    /// Fetches one response for a continuation handle. State interpretation
    /// is left to the caller.
    pub async fn poll(&self, next_uri: &str) -> Result<QueryResponse> {
        let resp = self.transport.send(HttpRequest::get(next_uri)).await?;
        self.handle_response(resp)
    }

    /// DELETE {nextUri}
    ///
    /// Asks the coordinator to abandon the query behind a continuation handle.
    pub async fn cancel(&self, next_uri: &str) -> Result<()> {
        debug!(url = %next_uri, "canceling query");
        let resp = self.transport.send(HttpRequest::delete(next_uri)).await?;
        if !resp.status.is_success() {
            return Err(PrestoError::QueryFailed {
                status: resp.status.as_u16(),
                body: resp.body,
            });
        }
        Ok(())
    }

    /// Status codes say nothing reliable about the query itself (parse errors
    /// come back as 200), so any non-success status is a generic failure.
    fn handle_response(&self, resp: HttpResponse) -> Result<QueryResponse> {
        if !resp.status.is_success() {
            return Err(PrestoError::QueryFailed {
                status: resp.status.as_u16(),
                body: resp.body,
            });
        }

        serde_json::from_str(&resp.body)
            .map_err(|e| PrestoError::MalformedResponse(format!("JSON parse error: {}", e)))
    }
}

/// Error for a response in FAILED state, preferring the engine's own detail.
pub(crate) fn server_failure(query: QueryResponse) -> PrestoError {
    match query.error {
        Some(err) => PrestoError::Server(err),
        None => PrestoError::MalformedResponse("FAILED response without error detail".into()),
    }
}
