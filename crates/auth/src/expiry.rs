//! Expiry evaluation (pure time comparison).

use crate::Claims;
use crate::claims::ExpClaim;
use crate::token::decode_claims;

/// Detailed outcome of an expiry evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryVerdict {
    /// Not expired. `expires_at` is `None` for tokens without an `exp` claim.
    Valid { expires_at: Option<i64> },
    /// `exp` is strictly before `now`.
    Expired { expired_at: i64 },
    /// `exp` is present but unreadable; treated as expired.
    Malformed,
}

impl ExpiryVerdict {
    pub fn is_expired(&self) -> bool {
        !matches!(self, ExpiryVerdict::Valid { .. })
    }
}

/// Evaluate `claims` against `now` (seconds since epoch, UTC).
///
/// A token expiring exactly at `now` is still valid.
pub fn evaluate(claims: &Claims, now: i64) -> ExpiryVerdict {
    match claims.exp_claim() {
        ExpClaim::Absent => ExpiryVerdict::Valid { expires_at: None },
        ExpClaim::At(exp) if exp < now => ExpiryVerdict::Expired { expired_at: exp },
        ExpClaim::At(exp) => ExpiryVerdict::Valid {
            expires_at: Some(exp),
        },
        ExpClaim::Malformed => ExpiryVerdict::Malformed,
    }
}

pub fn is_expired(claims: &Claims, now: i64) -> bool {
    evaluate(claims, now).is_expired()
}

/// Fail-closed expiry check on a raw token: absent or undecodable tokens are
/// expired.
pub fn is_token_expired(token: Option<&str>, now: i64) -> bool {
    match token.map(decode_claims) {
        Some(Ok(claims)) => is_expired(&claims, now),
        Some(Err(_)) | None => true,
    }
}

/// Remaining lifetime in seconds, clamped at zero. `None` without `exp`.
pub fn seconds_until_expiry(claims: &Claims, now: i64) -> Option<i64> {
    claims.exp().map(|exp| exp.saturating_sub(now).max(0))
}
