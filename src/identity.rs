//! Identity provider description (data) and error classification (behavior).
//!
//! `endpoint` holds the validated token endpoint, the requested scope, and the client
//! authentication mode. `strategy` defines [`IdentityStrategy`], the hook that decides
//! whether a failed token request is fatal (rejected credentials) or worth retrying.

pub mod endpoint;
pub mod strategy;

pub use endpoint::*;
pub use strategy::*;
