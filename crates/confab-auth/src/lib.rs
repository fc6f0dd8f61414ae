//! # Confab Auth
//!
//! Authentication and authorization primitives for the Confab gateway:
//!
//! - **Capability tokens** (`capability`): short-lived HMAC-SHA256 signed
//!   assertions that a specific user may fetch a specific stored object.
//!   Used to build the tokenized download URLs handed to tools.
//! - **Identity** (`identity`): identity is taken from a trusted
//!   reverse-proxy header, never from query parameters. Group membership is
//!   a pluggable trait so deployments can wire their own directory.
//! - **Rate limiting** (`rate_limit`): a sliding-window limiter keyed by
//!   client host (optionally host+path), advisory for WebSocket upgrades
//!   and per-request for REST.
//! - **Origin policy** (`origin`): optional allowlist check for WebSocket
//!   `Origin` headers.

pub mod capability;
pub mod error;
pub mod identity;
pub mod origin;
pub mod rate_limit;

pub use capability::{CapabilityClaims, TokenMinter};
pub use error::AuthError;
pub use identity::{AllowAllGroups, GroupChecker, StaticGroups};
pub use origin::OriginPolicy;
pub use rate_limit::RateLimiter;
