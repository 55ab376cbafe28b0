//! Request filters: admission control, authentication, and validated JSON.

pub mod auth;
pub mod rate_limit;
pub mod validate;

pub use auth::{require_auth, AuthUser};
pub use rate_limit::{rate_limit, KeyGenerator, RateLimit, RateLimitConfig, TrustedProxies};
pub use validate::{Validate, ValidatedJson};
