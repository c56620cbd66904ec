//! Pure session-token inspection for `cvai-auth` (no I/O).
//!
//! This crate is intentionally decoupled from HTTP, storage and timers. It
//! establishes the *structure* of a bearer token and evaluates its expiry;
//! authenticity is only ever established by the server round-trip in
//! `cvai-session`.

pub mod claims;
pub mod clock;
pub mod expiry;
pub mod token;

pub use claims::Claims;
pub use clock::{Clock, FixedClock, SystemClock};
pub use expiry::{ExpiryVerdict, evaluate, is_expired, is_token_expired, seconds_until_expiry};
pub use token::{DecodeError, decode_claims};
