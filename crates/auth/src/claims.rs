use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Decoded bearer-token payload.
///
/// The backend issues tokens with varying claim sets (legacy tokens may omit
/// `exp` entirely), so the payload is kept as an open mapping rather than a
/// fixed struct. Unknown fields are preserved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Claims(Map<String, Value>);

/// Result of reading the `exp` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpClaim {
    /// No `exp` field.
    Absent,
    /// Integer seconds since the UTC epoch.
    At(i64),
    /// `exp` is present but not an integer.
    Malformed,
}

impl Claims {
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Read the `exp` claim.
    ///
    /// Integral floats (`1700000000.0`) are accepted since some issuers
    /// serialize timestamps that way; anything else is malformed. Values
    /// beyond the `i64` range saturate.
    pub fn exp_claim(&self) -> ExpClaim {
        match self.0.get("exp") {
            None => ExpClaim::Absent,
            Some(Value::Number(n)) => {
                if let Some(v) = n.as_i64() {
                    ExpClaim::At(v)
                } else if n.as_u64().is_some() {
                    ExpClaim::At(i64::MAX)
                } else if let Some(f) = n.as_f64().filter(|f| f.is_finite() && f.fract() == 0.0) {
                    // `as` saturates at the i64 bounds.
                    ExpClaim::At(f as i64)
                } else {
                    ExpClaim::Malformed
                }
            }
            Some(_) => ExpClaim::Malformed,
        }
    }

    /// `exp` as seconds since epoch, if present and well-formed.
    pub fn exp(&self) -> Option<i64> {
        match self.exp_claim() {
            ExpClaim::At(v) => Some(v),
            _ => None,
        }
    }

    /// Subject (`sub`) rendered as a string; numeric subjects are accepted.
    pub fn subject(&self) -> Option<String> {
        match self.0.get("sub")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl From<Map<String, Value>> for Claims {
    fn from(value: Map<String, Value>) -> Self {
        Self(value)
    }
}
