use super::datetime_utils::{deserialize_datetime, serialize_datetime};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted delegation operation. Never mutated once stored; the tuple
/// `(delegator, block, timestamp, amount)` identifies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub delegator: String,
    #[serde(
        serialize_with = "serialize_datetime",
        deserialize_with = "deserialize_datetime"
    )]
    pub timestamp: DateTime<Utc>,
    pub block: u64,
    pub amount: i64,
}
