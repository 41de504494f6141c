use serde_json::Value as JsonValue;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::client::{server_failure, PrestoClient};
use crate::config::ClientConfig;
use crate::models::*;
use crate::rows::{Row, Rows};
use crate::transport::{ReqwestTransport, Transport};

/// One successful poll: a batch of raw rows plus what to poll next.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub state: ExecutionState,
    /// Present whenever the server sent a non-empty `columns` field.
    pub columns: Option<Vec<Column>>,
    pub rows: Vec<Vec<JsonValue>>,
    /// `None` once no more data will ever arrive.
    pub next_uri: Option<String>,
}

/// What a single response means for the poll loop.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStep {
    /// Still working and nothing to hand out yet; poll `next_uri` after the
    /// backoff interval.
    NotReady { next_uri: String },
    /// Rows (possibly none) are available.
    Ready(Page),
}

/// Interprets one response envelope.
///
/// | state                          | data      | result                      |
/// |--------------------------------|-----------|-----------------------------|
/// | FAILED                         | any       | `Err(Server)`               |
/// | CANCELED                       | any       | `Err(Canceled)`             |
/// | QUEUED, PLANNING, RUNNING, ... | empty     | `NotReady` (needs nextUri)  |
/// | QUEUED, PLANNING, RUNNING, ... | non-empty | `Ready`                     |
/// | FINISHED                       | any       | `Ready`                     |
pub fn classify(resp: QueryResponse) -> Result<PollStep> {
    let state = resp.state();
    match state {
        ExecutionState::Failed => return Err(server_failure(resp)),
        ExecutionState::Canceled => return Err(PrestoError::Canceled),
        ExecutionState::Unknown => warn!(id = ?resp.id, "unrecognized query state, treating as running"),
        _ => {}
    }

    if state.is_running() && !resp.has_data() {
        let next_uri = resp.next_uri().map(str::to_string).ok_or_else(|| {
            PrestoError::MalformedResponse(format!("{state} response without nextUri"))
        })?;
        return Ok(PollStep::NotReady { next_uri });
    }

    let next_uri = resp.next_uri().map(str::to_string);
    Ok(PollStep::Ready(Page {
        state,
        columns: resp.columns.filter(|cols| !cols.is_empty()),
        rows: resp.data.unwrap_or_default(),
        next_uri,
    }))
}

/// Polls from `next_uri` until a response carries rows or the query
/// finishes. Each handle is requested exactly once.
pub async fn fetch_page<T: Transport>(client: &PrestoClient<T>, next_uri: String) -> Result<Page> {
    let config = client.config();
    let started = Instant::now();
    let mut uri = next_uri;

    loop {
        let resp = client.poll(&uri).await?;
        debug!(
            url = %uri,
            state = %resp.state(),
            rows = resp.data.as_ref().map_or(0, Vec::len),
            "polled query"
        );

        match classify(resp)? {
            PollStep::Ready(page) => return Ok(page),
            PollStep::NotReady { next_uri } => {
                if let Some(max_wait) = config.max_wait {
                    if started.elapsed() >= max_wait {
                        return Err(PrestoError::Timeout(max_wait));
                    }
                }
                debug!(interval = ?config.poll_interval, "query not ready, backing off");
                sleep(config.poll_interval).await;
                uri = next_uri;
            }
        }
    }
}

/// Higher-level service built on top of [`PrestoClient`]: submits a
/// statement and hands back a lazily-fetched row stream.
///
/// ```rust,no_run
/// use presto_sql_client::{ClientConfig, PrestoSqlService};
///
/// # async fn example() -> Result<(), presto_sql_client::PrestoError> {
/// let config = ClientConfig::from_dsn("presto://analyst@coordinator:8080/hive/default")?;
/// let service = PrestoSqlService::from_config(config);
///
/// let mut rows = service.execute("SELECT name, total FROM orders").await?;
/// while let Some(row) = rows.next().await? {
///     println!("{:?}", row);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PrestoSqlService<T> {
    client: PrestoClient<T>,
}

impl PrestoSqlService<ReqwestTransport> {
    pub fn from_config(config: ClientConfig) -> Self {
        Self::new(PrestoClient::new(config))
    }
}

impl<T: Transport> PrestoSqlService<T> {
    pub fn new(client: PrestoClient<T>) -> Self {
        Self { client }
    }

    /// Returns a reference to the low-level client (if you need direct calls).
    pub fn client(&self) -> &PrestoClient<T> {
        &self.client
    }

    /// Submits `statement` and returns its rows. No polling happens here
    /// beyond the submission itself; pages are fetched as rows are pulled.
    pub async fn execute(&self, statement: &str) -> Result<Rows<T>> {
        let resp = self.client.submit_statement(statement).await?;
        match classify(resp)? {
            PollStep::NotReady { next_uri } => {
                // Give the engine a moment before the first poll.
                sleep(self.client.config().initial_delay).await;
                Ok(Rows::new(self.client.clone(), next_uri))
            }
            PollStep::Ready(page) => Rows::from_first_page(self.client.clone(), page),
        }
    }

    /// Runs `statement` to completion and buffers every row.
    pub async fn fetch_all(&self, statement: &str) -> Result<Vec<Row>> {
        self.execute(statement).await?.collect_all().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::StatusCode;
    use serde_json::json;

    use super::*;
    use crate::transport::mock::ScriptedTransport;
    use crate::types::Value;

    const U1: &str = "http://coordinator:8080/v1/statement/q1/1";
    const U2: &str = "http://coordinator:8080/v1/statement/q1/2";
    const U3: &str = "http://coordinator:8080/v1/statement/q1/3";

    fn service(transport: ScriptedTransport) -> PrestoSqlService<ScriptedTransport> {
        let config = ClientConfig::new("coordinator:8080");
        PrestoSqlService::new(PrestoClient::with_transport(config, transport))
    }

    fn response(body: serde_json::Value) -> QueryResponse {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn running_without_data_is_not_ready() {
        let step = classify(response(json!({
            "nextUri": U2,
            "stats": { "state": "RUNNING" },
            "data": []
        })))
        .unwrap();
        assert_eq!(step, PollStep::NotReady { next_uri: U2.to_string() });
    }

    #[test]
    fn running_with_data_is_ready() {
        let step = classify(response(json!({
            "nextUri": U2,
            "stats": { "state": "RUNNING" },
            "columns": [{ "name": "x", "type": "bigint" }],
            "data": [[1], [2]]
        })))
        .unwrap();
        let PollStep::Ready(page) = step else { panic!("expected page") };
        assert_eq!(page.rows.len(), 2);
        assert_eq!(page.next_uri.as_deref(), Some(U2));
        assert_eq!(page.columns.map(|c| c.len()), Some(1));
    }

    #[test]
    fn finished_without_data_is_ready_and_final() {
        let step = classify(response(json!({ "stats": { "state": "FINISHED" } }))).unwrap();
        let PollStep::Ready(page) = step else { panic!("expected page") };
        assert!(page.rows.is_empty());
        assert_eq!(page.next_uri, None);
    }

    #[test]
    fn terminal_failures() {
        let err = classify(response(json!({
            "stats": { "state": "FAILED" },
            "error": { "message": "Query exceeded maximum time limit" }
        })))
        .unwrap_err();
        assert_eq!(
            err.server_error().map(|e| e.message.as_str()),
            Some("Query exceeded maximum time limit")
        );

        let err = classify(response(json!({ "stats": { "state": "CANCELED" } }))).unwrap_err();
        assert!(err.is_canceled());
    }

    #[test]
    fn running_without_next_uri_is_malformed() {
        let err = classify(response(json!({ "stats": { "state": "QUEUED" } }))).unwrap_err();
        assert!(matches!(err, PrestoError::MalformedResponse(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn not_ready_polls_back_off_and_follow_latest_handle() {
        let transport = ScriptedTransport::new()
            .reply_json(json!({ "nextUri": U2, "stats": { "state": "PLANNING" } }))
            .reply_json(json!({ "nextUri": U3, "stats": { "state": "RUNNING" }, "data": [] }))
            .reply_json(json!({
                "stats": { "state": "FINISHED" },
                "columns": [{ "name": "x", "type": "bigint" }],
                "data": [[7]]
            }));
        let client = PrestoClient::with_transport(ClientConfig::new("coordinator:8080"), transport.clone());

        let started = Instant::now();
        let page = fetch_page(&client, U1.to_string()).await.unwrap();

        assert_eq!(page.rows, vec![vec![json!(7)]]);
        assert_eq!(transport.urls(), vec![U1, U2, U3]);
        // Two backoff waits, one per not-ready response.
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(1600) && waited < Duration::from_millis(2400));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_interval_is_configurable() {
        let transport = ScriptedTransport::new()
            .reply_json(json!({ "nextUri": U2, "stats": { "state": "QUEUED" } }))
            .reply_json(json!({ "stats": { "state": "FINISHED" } }));
        let config = ClientConfig::new("coordinator:8080").with_poll_interval(Duration::from_millis(25));
        let client = PrestoClient::with_transport(config, transport);

        let started = Instant::now();
        fetch_page(&client, U1.to_string()).await.unwrap();
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(25) && waited < Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn max_wait_bounds_polling() {
        let mut transport = ScriptedTransport::new();
        for _ in 0..10 {
            transport = transport.reply_json(json!({ "nextUri": U1, "stats": { "state": "RUNNING" } }));
        }
        let config = ClientConfig::new("coordinator:8080").with_max_wait(Duration::from_secs(2));
        let client = PrestoClient::with_transport(config, transport.clone());

        let err = fetch_page(&client, U1.to_string()).await.unwrap_err();
        assert!(matches!(err, PrestoError::Timeout(_)));
        // Polls at 0, 800 and 1600ms are early; the one at 2400ms gives up.
        assert_eq!(transport.requests().len(), 4);
    }

    #[tokio::test]
    async fn canceled_while_polling() {
        let transport = ScriptedTransport::new().reply_json(json!({ "stats": { "state": "CANCELED" } }));
        let client = PrestoClient::with_transport(ClientConfig::new("coordinator:8080"), transport);
        let err = fetch_page(&client, U1.to_string()).await.unwrap_err();
        assert!(matches!(err, PrestoError::Canceled));
    }

    #[tokio::test]
    async fn non_success_poll_is_query_failed() {
        let transport = ScriptedTransport::new().reply(StatusCode::BAD_GATEWAY, "bad gateway");
        let client = PrestoClient::with_transport(ClientConfig::new("coordinator:8080"), transport);
        let err = fetch_page(&client, U1.to_string()).await.unwrap_err();
        assert!(matches!(err, PrestoError::QueryFailed { status: 502, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn select_one_yields_single_row() {
        let transport = ScriptedTransport::new()
            .reply_json(json!({ "nextUri": U1, "stats": { "state": "QUEUED" } }))
            .reply_json(json!({
                "stats": { "state": "FINISHED" },
                "columns": [{ "name": "x", "type": "bigint" }],
                "data": [[1]]
            }));
        let service = service(transport.clone());

        let started = Instant::now();
        let mut rows = service.execute("SELECT 1").await.unwrap();
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(500) && waited < Duration::from_millis(800));

        assert_eq!(rows.next().await.unwrap(), Some(vec![Value::Integer(1)]));
        assert_eq!(rows.next().await.unwrap(), None);
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn failed_submission_never_polls() {
        let transport = ScriptedTransport::new().reply_json(json!({
            "stats": { "state": "FAILED" },
            "error": { "message": "syntax error" }
        }));
        let err = service(transport.clone()).execute("SELEC 1").await.unwrap_err();
        assert_eq!(err.server_error().map(|e| e.message.as_str()), Some("syntax error"));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn finished_submission_without_data_ends_stream_at_once() {
        let transport = ScriptedTransport::new().reply_json(json!({
            "id": "q1",
            "stats": { "state": "FINISHED" }
        }));
        let started = Instant::now();
        let rows = service(transport.clone()).fetch_all("CREATE TABLE t (x bigint)").await.unwrap();
        assert!(rows.is_empty());
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(transport.urls(), vec!["http://coordinator:8080/v1/statement"]);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_while_polling_surfaces_without_retry() {
        let transport = ScriptedTransport::new()
            .reply_json(json!({ "nextUri": U1, "stats": { "state": "QUEUED" } }))
            .fail("connection reset");
        let mut rows = service(transport.clone()).execute("SELECT 1").await.unwrap();

        let started = Instant::now();
        let err = rows.next().await.unwrap_err();
        assert!(matches!(err, PrestoError::Transport(ref msg) if msg == "connection reset"));
        assert_eq!(started.elapsed(), Duration::ZERO);

        assert_eq!(rows.next().await.unwrap(), None);
        assert_eq!(transport.urls(), vec!["http://coordinator:8080/v1/statement", U1]);
    }

    #[tokio::test(start_paused = true)]
    async fn inline_first_page_is_not_dropped() {
        let transport = ScriptedTransport::new().reply_json(json!({
            "stats": { "state": "FINISHED" },
            "columns": [{ "name": "name", "type": "varchar" }],
            "data": [["a"], ["b"]]
        }));
        let started = Instant::now();
        let rows = service(transport.clone()).fetch_all("VALUES 'a', 'b'").await.unwrap();
        assert_eq!(
            rows,
            vec![vec![Value::String("a".into())], vec![Value::String("b".into())]]
        );
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(transport.requests().len(), 1);
    }
}
