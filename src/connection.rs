use crate::client::PrestoClient;
use crate::config::ClientConfig;
use crate::models::{PrestoError, Result};
use crate::rows::Rows;
use crate::service::PrestoSqlService;
use crate::transport::{ReqwestTransport, Transport};
use crate::types::Value;

#[derive(Debug, Clone)]
pub struct Connection<T> {
    service: PrestoSqlService<T>,
}

impl Connection<ReqwestTransport> {
    /// Opens a connection described by a data source name such as
    /// `presto://user@host:8080/catalog/schema?source=x&session=y`.
    pub fn open(dsn: &str) -> Result<Self> {
        Self::with_transport(dsn, ReqwestTransport::new())
    }
}

impl<T: Transport> Connection<T> {
    pub fn with_transport(dsn: &str, transport: T) -> Result<Self> {
        let config = ClientConfig::from_dsn(dsn)?;
        Ok(Self::from_client(PrestoClient::with_transport(config, transport)))
    }

    pub fn from_client(client: PrestoClient<T>) -> Self {
        Self {
            service: PrestoSqlService::new(client),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        self.service.client().config()
    }

    pub fn prepare(&self, query: &str) -> Statement<'_, T> {
        Statement {
            conn: self,
            query: query.to_string(),
        }
    }

    pub fn begin(&self) -> Result<()> {
        Err(PrestoError::NotSupported("transactions"))
    }

    /// Nothing is held open between queries.
    pub fn close(self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
pub struct Statement<'a, T> {
    conn: &'a Connection<T>,
    query: String,
}

impl<T: Transport> Statement<'_, T> {
    pub fn query_text(&self) -> &str {
        &self.query
    }

    /// Placeholder count; unknown because statements are not parsed.
    pub fn num_input(&self) -> Option<usize> {
        None
    }

    pub async fn query(&self, args: &[Value]) -> Result<Rows<T>> {
        if !args.is_empty() {
            return Err(PrestoError::NotSupported("query arguments"));
        }
        self.conn.service.execute(&self.query).await
    }

    pub async fn exec(&self, _args: &[Value]) -> Result<u64> {
        Err(PrestoError::NotSupported("exec"))
    }
}
