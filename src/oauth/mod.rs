//! OAuth session engine (§4.2): three parallel long-lived flows (social,
//! AWS Builder ID, IAM Identity Center) sharing one session registry.

pub mod device;
pub mod registry;
pub mod social;
pub mod types;

pub use registry::{SessionRegistry, SharedSessionRegistry};
pub use types::{OAuthFlowType, OAuthSession, OAuthSessionStatus};
