//! Cache Entry Module
//!
//! Stored envelopes, TTL policies and the codec that turns typed values into
//! storable JSON and back.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

// == Envelope ==
/// What a key holds: one value, or a set accumulated by tag writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Envelope {
    Scalar(Value),
    /// Insertion-ordered, duplicate-free.
    Set(Vec<Value>),
}

impl Envelope {
    // == Constructors ==
    /// Encodes `value` as a scalar envelope.
    pub fn scalar<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Envelope::Scalar(encode(value)?))
    }

    /// Builds a set envelope, dropping duplicate members.
    pub fn set(members: impl IntoIterator<Item = Value>) -> Self {
        let mut out = Vec::new();
        for member in members {
            if !out.contains(&member) {
                out.push(member);
            }
        }
        Envelope::Set(out)
    }

    // == Union ==
    /// Adds `member` to the set held in `existing`, creating the set if absent.
    ///
    /// A scalar in the way is replaced by a fresh set.
    pub fn union(existing: Option<Envelope>, member: Value) -> Envelope {
        match existing {
            Some(Envelope::Set(mut members)) => {
                if !members.contains(&member) {
                    members.push(member);
                }
                Envelope::Set(members)
            }
            _ => Envelope::Set(vec![member]),
        }
    }

    // == Difference ==
    /// Removes `members` from a set envelope. Returns the number removed.
    pub fn remove_members(&mut self, members: &[Value]) -> usize {
        match self {
            Envelope::Set(current) => {
                let before = current.len();
                current.retain(|m| !members.contains(m));
                before - current.len()
            }
            Envelope::Scalar(_) => 0,
        }
    }

    /// Members of a set envelope; empty for scalars.
    pub fn members(&self) -> &[Value] {
        match self {
            Envelope::Set(members) => members,
            Envelope::Scalar(_) => &[],
        }
    }

    /// Set members that are strings, e.g. the keys carried by a tag.
    pub fn string_members(&self) -> Vec<String> {
        self.members()
            .iter()
            .filter_map(|m| m.as_str().map(str::to_string))
            .collect()
    }

    pub fn is_set(&self) -> bool {
        matches!(self, Envelope::Set(_))
    }

    // == Resolve ==
    /// Reads the envelope as `T`.
    ///
    /// Scalars decode directly. Sets yield their first member that decodes as
    /// `T`; failing that, the whole set is tried as a sequence. Any mismatch
    /// is a miss, never an error.
    pub fn resolve<T: DeserializeOwned>(&self) -> Option<T> {
        match self {
            Envelope::Scalar(value) => decode(value),
            Envelope::Set(members) => members
                .iter()
                .find_map(decode::<T>)
                .or_else(|| decode::<T>(&Value::Array(members.clone()))),
        }
    }
}

// == TTL Policy ==
/// How long an entry lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlPolicy {
    /// Resets on every successful read.
    Sliding(Duration),
    /// Fixed deadline.
    Absolute(DateTime<Utc>),
}

/// Sliding window applied when a write carries no explicit TTL.
pub const DEFAULT_SLIDING_TTL: Duration = Duration::from_secs(60 * 60);

impl Default for TtlPolicy {
    fn default() -> Self {
        TtlPolicy::Sliding(DEFAULT_SLIDING_TTL)
    }
}

impl TtlPolicy {
    /// An explicit TTL becomes an absolute deadline; otherwise `default`.
    pub fn from_ttl(ttl: Option<Duration>, default: TtlPolicy) -> Self {
        match ttl {
            Some(ttl) => {
                let now = Utc::now();
                let deadline = chrono::Duration::from_std(ttl)
                    .ok()
                    .and_then(|ttl| now.checked_add_signed(ttl))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                TtlPolicy::Absolute(deadline)
            }
            None => default,
        }
    }

    /// Time left from now, saturating at zero.
    pub fn remaining(&self) -> Duration {
        match self {
            TtlPolicy::Sliding(window) => *window,
            TtlPolicy::Absolute(deadline) => (*deadline - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO),
        }
    }

    /// Absolute deadline in Unix milliseconds, counted from `now_ms`.
    pub fn deadline_ms(&self, now_ms: u64) -> u64 {
        match self {
            TtlPolicy::Sliding(window) => now_ms.saturating_add(window.as_millis() as u64),
            TtlPolicy::Absolute(deadline) => deadline.timestamp_millis().max(0) as u64,
        }
    }

    pub fn is_sliding(&self) -> bool {
        matches!(self, TtlPolicy::Sliding(_))
    }
}

// == Codec ==
/// Converts a typed value into its stored JSON form.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Converts stored JSON back into `T`; `None` when the shapes disagree.
pub fn decode<T: DeserializeOwned>(value: &Value) -> Option<T> {
    T::deserialize(value).ok()
}

/// Wire form of a scalar or set member for the remote store.
pub fn to_wire(value: &Value) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Parses a wire value. Text that is not JSON comes back as a plain string.
pub fn from_wire(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}
