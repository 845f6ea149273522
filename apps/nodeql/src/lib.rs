//! # nodeql
//!
//! Network side of the schema-driven GraphQL client.
//!
//! - `transport`: reqwest-based [`HttpTransport`] and [`BlockingHttpTransport`]
//! - `recorder`: [`RecordingTransport`], writes request/response pairs to disk
//! - `config`: [`AppConfig`], TOML file plus `NODEQL_*` overrides
//! - `cli`: the `nodeql` command line

pub mod cli;
pub mod config;
pub mod error;
pub mod recorder;
pub mod transport;

pub use config::AppConfig;
pub use error::AppError;
pub use recorder::RecordingTransport;
pub use transport::{BlockingHttpTransport, HttpTransport};
