//! rpr-bridge core - expose a host function registry over a local TCP socket.
//!
//! A host embeds a [`Server`], hands it a [`Registry`] of callable functions,
//! and calls [`Server::tick`] from its own event loop. Clients send
//! length-prefixed JSON requests naming a function and its arguments and get
//! back JSON results or error tracebacks.
//!
//! # Example
//!
//! ```rust,no_run
//! use rpr_bridge_core::{FunctionTable, Server, ServerConfig};
//! use serde_json::json;
//!
//! let mut table = FunctionTable::new();
//! table.register("RPR_GetAppVersion", |_args| Ok(vec![Some(json!("7.0"))]));
//!
//! let mut server = Server::new(ServerConfig::default(), Box::new(table))?;
//! loop {
//!     server.tick();
//!     std::thread::sleep(std::time::Duration::from_millis(30));
//! }
//! # Ok::<(), rpr_bridge_core::BridgeError>(())
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod failure;
pub mod hold;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod shutdown;

pub use client::{BridgeClient, HoldGuard};
pub use config::ServerConfig;
pub use error::{BridgeError, Result};
pub use failure::{Failure, FailureReason};
pub use hold::HoldState;
pub use protocol::{ControlCommand, Request, Response};
pub use registry::{CallArgs, CallError, FunctionTable, Invocable, Registry, Returns};
pub use server::{Server, TickReport};
pub use shutdown::ShutdownSignal;
