use std::fmt;

use serde_json::Value as JsonValue;
use tracing::{debug, info};

use crate::client::PrestoClient;
use crate::models::{Column, PrestoError, Result};
use crate::service::{fetch_page, Page};
use crate::transport::Transport;
use crate::types::{Converter, Value};

/// One converted row, in column order.
pub type Row = Vec<Value>;

/// Rows of one query, fetched a page at a time as they are pulled.
///
/// The column schema and per-column converters are bound from the first
/// page that carries columns and never rebuilt. Dropping `Rows` does not
/// notify the server; call [`Rows::cancel`] for that.
pub struct Rows<T> {
    client: PrestoClient<T>,
    next_uri: Option<String>,
    fetched: bool,
    columns: Vec<Column>,
    converters: Vec<Converter>,
    data: Vec<Vec<JsonValue>>,
    row_index: usize,
    /// A fetch failure seen by [`Rows::columns`], reported on the next pull.
    pending_error: Option<PrestoError>,
}

impl<T> fmt::Debug for Rows<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rows")
            .field("next_uri", &self.next_uri)
            .field("columns", &self.columns)
            .field("buffered", &(self.data.len() - self.row_index.min(self.data.len())))
            .finish()
    }
}

impl<T: Transport> Rows<T> {
    pub(crate) fn new(client: PrestoClient<T>, next_uri: String) -> Self {
        Self {
            client,
            next_uri: Some(next_uri),
            fetched: false,
            columns: Vec::new(),
            converters: Vec::new(),
            data: Vec::new(),
            row_index: 0,
            pending_error: None,
        }
    }

    /// Rows whose first page arrived with the submission response.
    pub(crate) fn from_first_page(client: PrestoClient<T>, page: Page) -> Result<Self> {
        let mut rows = Self {
            next_uri: None,
            ..Self::new(client, String::new())
        };
        rows.bind(page)?;
        Ok(rows)
    }

    /// Column names, fetching the first page if needed. Returns an empty list
    /// if that fetch fails; the error is returned by the next row pull.
    pub async fn columns(&mut self) -> Vec<String> {
        if !self.fetched && self.pending_error.is_none() {
            if let Err(err) = self.fetch().await {
                self.pending_error = Some(err);
                return Vec::new();
            }
        }
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// The bound schema; empty until the first page has been fetched.
    pub fn schema(&self) -> &[Column] {
        &self.columns
    }

    /// Converts the next row into `dest`, replacing its contents. Returns
    /// `Ok(false)` at end of stream.
    ///
    /// A row that fails to convert leaves `dest` empty and is skipped.
    pub async fn next_row(&mut self, dest: &mut Vec<Value>) -> Result<bool> {
        dest.clear();
        if let Some(err) = self.pending_error.take() {
            return Err(err);
        }

        if self.row_index >= self.data.len() {
            if self.next_uri.is_none() {
                return Ok(false);
            }
            if !self.fetch().await? {
                return Ok(false);
            }
        }

        let raw = &self.data[self.row_index];
        self.row_index += 1;
        if raw.len() != self.converters.len() {
            return Err(PrestoError::MalformedResponse(format!(
                "row has {} values but the schema has {} columns",
                raw.len(),
                self.converters.len()
            )));
        }

        for (converter, value) in self.converters.iter().zip(raw) {
            match converter.convert(value) {
                Ok(converted) => dest.push(converted),
                Err(err) => {
                    dest.clear();
                    return Err(err.into());
                }
            }
        }
        Ok(true)
    }

    /// Owned variant of [`Rows::next_row`].
    pub async fn next(&mut self) -> Result<Option<Row>> {
        let mut row = Vec::with_capacity(self.converters.len());
        Ok(self.next_row(&mut row).await?.then_some(row))
    }

    /// Pulls every remaining row.
    pub async fn collect_all(mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Asks the server to stop the query, if it has not already finished,
    /// and discards any buffered rows.
    pub async fn cancel(mut self) -> Result<()> {
        self.data.clear();
        match self.next_uri.take() {
            Some(uri) => self.client.cancel(&uri).await,
            None => Ok(()),
        }
    }

    /// Runs the poll loop for the pending handle and binds the resulting
    /// page. Returns false when the page is empty, which ends the stream.
    async fn fetch(&mut self) -> Result<bool> {
        let Some(uri) = self.next_uri.take() else {
            return Ok(false);
        };
        self.data.clear();
        self.row_index = 0;

        let page = fetch_page(&self.client, uri).await?;
        self.bind(page)?;
        Ok(!self.data.is_empty())
    }

    fn bind(&mut self, page: Page) -> Result<()> {
        self.fetched = true;
        self.row_index = 0;
        self.data = page.rows;
        self.next_uri = page.next_uri;

        if self.converters.is_empty() {
            if let Some(columns) = page.columns {
                self.converters = columns
                    .iter()
                    .map(|c| Converter::for_type(&c.column_type))
                    .collect();
                self.columns = columns;
                debug!(columns = self.columns.len(), "bound result schema");
            }
        }

        if self.data.is_empty() {
            if let Some(uri) = self.next_uri.take() {
                debug!(url = %uri, "empty final page, ignoring remaining handle");
            }
            info!(state = %page.state, "query result exhausted");
        } else if self.converters.is_empty() {
            return Err(PrestoError::MalformedResponse(
                "data page received before any column schema".into(),
            ));
        }
        Ok(())
    }
}
