use std::collections::BTreeMap;
use std::time::Duration;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::Url;

use crate::models::{PrestoError, Result};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_CATALOG: &str = "hive";
pub const DEFAULT_SCHEMA: &str = "default";
pub const DEFAULT_USER: &str = "prestgo";

/// Wait between submission and the first poll.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(500);
/// Backoff between polls that returned no data yet.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(800);

pub const USER_HEADER: &str = "X-Presto-User";
pub const CATALOG_HEADER: &str = "X-Presto-Catalog";
pub const SCHEMA_HEADER: &str = "X-Presto-Schema";
pub const SOURCE_HEADER: &str = "X-Presto-Source";
pub const SESSION_HEADER: &str = "X-Presto-Session";

/// Characters escaped in session property values so the header stays a
/// comma-separated list of `key=value` entries.
const SESSION_VALUE: &AsciiSet = &CONTROLS.add(b',').add(b'=').add(b'%');

/// Everything a query needs besides the SQL text: where to send it, the
/// identity headers, and how to pace polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// `host:port` of the coordinator.
    pub addr: String,
    pub user: String,
    pub catalog: String,
    pub schema: String,
    pub source: Option<String>,
    pub session: Option<String>,
    /// Extra `key=value` pairs appended to the session header.
    pub session_properties: BTreeMap<String, String>,
    pub initial_delay: Duration,
    pub poll_interval: Duration,
    /// Upper bound on time spent polling for one page. `None` waits forever.
    pub max_wait: Option<Duration>,
}

impl ClientConfig {
    /// Config with defaults for everything except the coordinator address.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            user: DEFAULT_USER.to_string(),
            catalog: DEFAULT_CATALOG.to_string(),
            schema: DEFAULT_SCHEMA.to_string(),
            source: None,
            session: None,
            session_properties: BTreeMap::new(),
            initial_delay: DEFAULT_INITIAL_DELAY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait: None,
        }
    }

    /// Parses `scheme://[user@]host[:port]/[catalog[/schema]][?key=value&...]`.
    ///
    /// `source` and `session` map onto their headers, `poll_interval_ms`,
    /// `initial_delay_ms` and `timeout_ms` tune polling, and any other key is
    /// forwarded as a session property.
    pub fn from_dsn(dsn: &str) -> Result<Self> {
        let url = Url::parse(dsn)
            .map_err(|e| PrestoError::InvalidDataSource(format!("{dsn}: {e}")))?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| PrestoError::InvalidDataSource(format!("{dsn}: missing host")))?;
        // `url` drops a port equal to the scheme default, e.g. `:80` for http.
        let port = match url.port() {
            Some(port) => port,
            None if has_written_port(dsn) => url.port_or_known_default().unwrap_or(DEFAULT_PORT),
            None => DEFAULT_PORT,
        };

        let mut config = ClientConfig::new(format!("{host}:{port}"));
        if !url.username().is_empty() {
            config.user = percent_decode_str(url.username())
                .decode_utf8()
                .map_err(|e| PrestoError::InvalidDataSource(format!("{dsn}: user: {e}")))?
                .into_owned();
        }

        let mut segments = url
            .path_segments()
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty());
        if let Some(catalog) = segments.next() {
            config.catalog = catalog.to_string();
        }
        if let Some(schema) = segments.next() {
            config.schema = schema.to_string();
        }

        // A repeated key keeps its last value.
        let params: BTreeMap<String, String> = url.query_pairs().into_owned().collect();

        for (key, value) in params {
            match key.as_str() {
                "source" => config.source = Some(value).filter(|v| !v.is_empty()),
                "session" => config.session = Some(value).filter(|v| !v.is_empty()),
                "poll_interval_ms" => config.poll_interval = parse_millis(&key, &value)?,
                "initial_delay_ms" => config.initial_delay = parse_millis(&key, &value)?,
                "timeout_ms" => config.max_wait = Some(parse_millis(&key, &value)?),
                _ => {
                    config.session_properties.insert(key, value);
                }
            }
        }

        Ok(config)
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn with_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.catalog = catalog.into();
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    pub fn with_session_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.session_properties.insert(key.into(), value.into());
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    /// POST target for new statements.
    pub fn statement_url(&self) -> String {
        format!("http://{}/v1/statement", self.addr)
    }

    /// Headers sent with the submission request. Optional headers are
    /// omitted rather than sent empty.
    pub fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            (USER_HEADER.to_string(), self.user.clone()),
            (CATALOG_HEADER.to_string(), self.catalog.clone()),
            (SCHEMA_HEADER.to_string(), self.schema.clone()),
        ];
        if let Some(source) = self.source.as_deref().filter(|s| !s.is_empty()) {
            headers.push((SOURCE_HEADER.to_string(), source.to_string()));
        }
        if let Some(session) = self.session_header() {
            headers.push((SESSION_HEADER.to_string(), session));
        }
        headers
    }

    fn session_header(&self) -> Option<String> {
        let parts: Vec<String> = self
            .session
            .iter()
            .filter(|s| !s.is_empty())
            .cloned()
            .chain(
                self.session_properties
                    .iter()
                    .map(|(k, v)| format!("{k}={}", utf8_percent_encode(v, SESSION_VALUE))),
            )
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(","))
        }
    }
}

/// Whether the authority of `dsn` spells out a port, even one the scheme
/// would imply.
fn has_written_port(dsn: &str) -> bool {
    let Some((_, rest)) = dsn.split_once("://") else {
        return false;
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, hp)| hp);
    let after_host = match host_port.strip_prefix('[') {
        Some(v6) => v6.split_once(']').map_or("", |(_, tail)| tail),
        None => host_port.find(':').map_or("", |i| &host_port[i..]),
    };
    after_host
        .strip_prefix(':')
        .is_some_and(|port| !port.is_empty())
}

fn parse_millis(key: &str, value: &str) -> Result<Duration> {
    value
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| PrestoError::InvalidDataSource(format!("{key}: expected milliseconds, got '{value}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_defaults_for_bare_host() {
        let config = ClientConfig::from_dsn("presto://coordinator").unwrap();
        assert_eq!(config.addr, "coordinator:8080");
        assert_eq!(config.user, DEFAULT_USER);
        assert_eq!(config.catalog, DEFAULT_CATALOG);
        assert_eq!(config.schema, DEFAULT_SCHEMA);
        assert_eq!(config.initial_delay, DEFAULT_INITIAL_DELAY);
        assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(config.max_wait, None);
        assert_eq!(config.statement_url(), "http://coordinator:8080/v1/statement");
    }

    #[test]
    fn parses_full_data_source() {
        let config = ClientConfig::from_dsn(
            "presto://alice@coordinator:9090/tpch/sf1?source=etl&session=query_max_run_time%3D1h&poll_interval_ms=50",
        )
        .unwrap();
        assert_eq!(config.addr, "coordinator:9090");
        assert_eq!(config.user, "alice");
        assert_eq!(config.catalog, "tpch");
        assert_eq!(config.schema, "sf1");
        assert_eq!(config.source.as_deref(), Some("etl"));
        assert_eq!(config.session.as_deref(), Some("query_max_run_time=1h"));
        assert_eq!(config.poll_interval, Duration::from_millis(50));
    }

    #[test]
    fn catalog_without_schema_keeps_default_schema() {
        let config = ClientConfig::from_dsn("presto://coordinator/memory").unwrap();
        assert_eq!(config.catalog, "memory");
        assert_eq!(config.schema, DEFAULT_SCHEMA);
    }

    #[test]
    fn unrecognized_params_become_session_properties() {
        let config = ClientConfig::from_dsn(
            "presto://coordinator?join_distribution_type=BROADCAST&a=1&a=2&b=x%2Cy",
        )
        .unwrap();
        assert_eq!(
            config.session_properties.get("join_distribution_type").map(String::as_str),
            Some("BROADCAST")
        );
        assert_eq!(config.session_properties.get("a").map(String::as_str), Some("2"));
        assert_eq!(config.session_properties.get("b").map(String::as_str), Some("x,y"));

        let session = config
            .headers()
            .into_iter()
            .find(|(name, _)| name == SESSION_HEADER)
            .map(|(_, value)| value)
            .unwrap();
        assert_eq!(session, "a=2,b=x%2Cy,join_distribution_type=BROADCAST");
        assert!(session.split(',').all(|entry| entry.split('=').count() == 2));
    }

    #[test]
    fn keeps_a_port_equal_to_the_scheme_default() {
        let config = ClientConfig::from_dsn("http://coordinator:80/hive").unwrap();
        assert_eq!(config.addr, "coordinator:80");
        assert_eq!(config.catalog, "hive");

        let config = ClientConfig::from_dsn("http://bob@coordinator/hive").unwrap();
        assert_eq!(config.addr, "coordinator:8080");
    }

    #[test]
    fn user_is_percent_decoded() {
        let config = ClientConfig::from_dsn("presto://john%40corp@coordinator").unwrap();
        assert_eq!(config.user, "john@corp");
    }

    #[test]
    fn optional_headers_are_omitted() {
        let headers = ClientConfig::new("localhost:8080").headers();
        let names: Vec<&str> = headers.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec![USER_HEADER, CATALOG_HEADER, SCHEMA_HEADER]);
    }

    #[test]
    fn rejects_bad_timing_values() {
        let err = ClientConfig::from_dsn("presto://coordinator?timeout_ms=soon").unwrap_err();
        assert!(matches!(err, PrestoError::InvalidDataSource(_)));
    }

    #[test]
    fn rejects_unparsable_target() {
        assert!(matches!(
            ClientConfig::from_dsn("not a url"),
            Err(PrestoError::InvalidDataSource(_))
        ));
    }
}
