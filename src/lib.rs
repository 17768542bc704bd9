pub mod auth;
pub mod clock;
pub mod config;
pub(crate) mod connection;
pub mod driver;
pub(crate) mod errors;
pub mod http;
pub mod retry;
pub mod stage;
pub mod warehouse;

#[cfg(test)]
mod testing;

pub(crate) use errors::{error, this_errors};

pub use errors::{CloudError, ErrorKind};

pub use connection::{CloudConnection, CloudConnectionOpts, CloudConnectionOptsBuilder};

pub use auth::{
    SessionContext, Token,
    session::Session,
    store::{CredentialStore, FileCredentialStore, MemoryCredentialStore},
};
pub use driver::{
    protocol::{QueryEvent, QueryExecutor, QuerySummary},
    query::{QueryResponse, QueryStats, ScanProgress, SchemaField},
};
pub use warehouse::{WarehouseController, WarehouseSize, WarehouseState, WarehouseStatus};

pub use http::client::CloudHttpClient;

pub use tokio_util::sync::CancellationToken;
