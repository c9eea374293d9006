//! # Kiro Gateway
//!
//! A multi-account reverse proxy fronting a pool of Kiro upstream
//! credentials behind a single OpenAI- and Claude-compatible API surface.
//!
//! ## Modules
//! - `accounts`: account pool data model, persistence, selection policy,
//!   and circuit breaker (§3, §4.1)
//! - `oauth`: social PKCE + AWS device-authorization OAuth flows and the
//!   session registry that tracks them (§4.2)
//! - `upstream`: per-account service handles, the Kiro wire frame decoder,
//!   and the shared internal request/response representation (§4.3)
//! - `dialect`: OpenAI/Claude request and response translation plus SSE
//!   sequencing (§4.4)
//! - `api`: HTTP ingress handlers and background maintenance loops (§4.5)
//! - `apikeys`: client-facing API key issuance and validation
//! - `models`: the supported-model allow-list
//! - `settings`/`config`: runtime-mutable settings vs. bootstrap config
//! - `error`: the crate-wide [`error::GatewayError`]

pub mod accounts;
pub mod api;
pub mod apikeys;
pub mod bootstrap;
pub mod config;
pub mod dialect;
pub mod error;
pub mod models;
pub mod oauth;
pub mod settings;
pub mod upstream;

pub use config::GatewayConfig;
pub use error::GatewayError;
