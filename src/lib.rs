//! # Redis REST Gateway
//!
//! Drop-in local replacement for the Upstash Redis REST API, backed by any
//! ordinary RESP server reachable over TCP.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      HTTP Surface (axum)                     │
//! │    POST /  │  POST /pipeline  │  POST /multi-exec  │ /CMD/.. │
//! ├─────────────────────────────────────────────────────────────┤
//! │        Authenticator │ Command Decoder │ Response Encoder    │
//! ├─────────────────────────────────────────────────────────────┤
//! │                    Command Executor                          │
//! │          Single  │  Pipeline  │  Transaction (MULTI/EXEC)    │
//! ├─────────────────────────────────────────────────────────────┤
//! │              Connection Pool (bounded idle, PING probe)      │
//! │                   redis-rs RESP transport                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod command;
pub mod config;
pub mod encode;
pub mod error;
pub mod executor;
pub mod pool;
pub mod server;

pub use auth::{AuthContext, Authenticator};
pub use command::{BatchMode, Command, CommandBatch};
pub use config::GatewayConfig;
pub use encode::{Envelope, ResponseBody};
pub use error::GatewayError;
pub use executor::ExecutionResult;
pub use pool::{
    ConnectionPool, Dialer, PoolConfig, PoolGuard, RedisDialer, RespFailure, RespTransport,
};
pub use server::GatewayServer;
