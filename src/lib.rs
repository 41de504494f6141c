pub mod client;
pub mod config;
pub mod connection;
pub mod models;
pub mod rows;
pub mod service;
pub mod transport;
pub mod types;

pub use client::PrestoClient;
pub use config::ClientConfig;
pub use connection::{Connection, Statement};
pub use models::{Column, ExecutionState, PrestoError, QueryResponse, Result, ServerError};
pub use rows::{Row, Rows};
pub use service::{PrestoSqlService, Page, PollStep};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
pub use types::{Converter, TypeConversionError, Value};
