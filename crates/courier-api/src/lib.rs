//! Courier HTTP API.
//!
//! Serves `POST /notify`, which validates a notification request and queues
//! it for delivery, plus health checks. Also owns the service configuration.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod handlers;
pub mod server;

pub use config::{Config, QueueBackend};
pub use server::{
    create_router, router_with_timeout, serve, shutdown_signal, start_server, AppState,
};
