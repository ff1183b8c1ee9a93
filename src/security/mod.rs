//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Resolved endpoint with a policy:
//!     → rate_limit.rs (derive key, claim a slot)
//!     → full: 429 with Retry-After
//!     → otherwise: continue to validation
//! ```
//!
//! # Design Decisions
//! - Each policy owns its own key map; there is no global limiter state
//! - A full bucket never blocks; the client is told when to retry
//! - Slots and idle keys are reclaimed by timers, not by sweeps

pub mod rate_limit;

pub use rate_limit::{Claim, RateLimitKey, RateLimitPolicy, RateLimiter, RateLimitingLookup};
