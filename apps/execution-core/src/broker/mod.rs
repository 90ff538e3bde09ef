//! Venue call resilience.
//!
//! - [`retry`]: retry policy, exponential backoff, venue error classification
//! - [`clock`]: shared venue clock offset
//! - [`resilient`]: gateway decorator applying timeouts, resync and backoff

pub mod clock;
pub mod resilient;
pub mod retry;

pub use clock::{ClockConfig, ClockSync};
pub use resilient::{ResilientConfig, ResilientGateway};
pub use retry::{ErrorCategory, ExponentialBackoffCalculator, RetryPolicy, classify_venue_error};
