//! # tnt-client
//!
//! Client library for Tarantool 1.5 style tuple-store servers.
//!
//! This crate provides:
//! - Address parsing with an optional embedded default space
//! - A single-socket dispatcher pipelining concurrent requests
//! - An async `Connection::execute` entry point returning tuples
//!
//! ```no_run
//! use tnt_client::{Connection, Options};
//! use tnt_protocol::{tuple, Insert, Select};
//!
//! # async fn run() -> Result<(), tnt_client::ClientError> {
//! let conn = Connection::connect("127.0.0.1:33013/1", Some(Options::new())).await?;
//! conn.execute(Insert::new(tuple![1u32, "one"])).await?;
//! let rows = conn.execute(Select::by_value(1u32)).await?;
//! assert_eq!(rows.len(), 1);
//! conn.close().await;
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod connection;
pub mod dispatcher;
pub mod error;

pub use address::Address;
pub use connection::{resolve_space, Connection, Options};
pub use dispatcher::{Dispatcher, PendingResponse};
pub use error::ClientError;
