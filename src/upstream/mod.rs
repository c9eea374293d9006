//! The per-account upstream HTTP client: signing, token refresh, and
//! stream decoding against the Kiro API (§4.3).

pub mod errors;
pub mod frame_decode;
pub mod kiro_wire;
pub mod service;

pub use errors::UpstreamError;
pub use service::{ServiceCache, SharedServiceCache, UpstreamService};
