use super::Delegation;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

/// One item of `GET /v1/operations/delegations`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawDelegation {
    pub level: u64,
    pub timestamp: DateTime<Utc>,
    pub sender: Address,
    #[serde(default)]
    pub amount: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Address {
    pub address: String,
}

impl From<RawDelegation> for Delegation {
    fn from(raw: RawDelegation) -> Self {
        Delegation {
            delegator: raw.sender.address,
            timestamp: raw.timestamp,
            block: raw.level,
            amount: raw.amount,
        }
    }
}

/// Which block levels a page request is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelFilter {
    All,
    Above(u64),
    Exact(u64),
    /// Strictly between the two levels, both ends excluded.
    Between(u64, u64),
}

impl LevelFilter {
    pub fn query_params(&self) -> Vec<(&'static str, u64)> {
        match *self {
            LevelFilter::All => vec![],
            LevelFilter::Above(level) => vec![("level.gt", level)],
            LevelFilter::Exact(level) => vec![("level", level)],
            LevelFilter::Between(after, before) => vec![("level.gt", after), ("level.lt", before)],
        }
    }

    pub fn matches(&self, level: u64) -> bool {
        match *self {
            LevelFilter::All => true,
            LevelFilter::Above(after) => level > after,
            LevelFilter::Exact(exact) => level == exact,
            LevelFilter::Between(after, before) => level > after && level < before,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Channel {
    Head,
    Other(String),
}

impl From<&str> for Channel {
    fn from(target: &str) -> Self {
        match target {
            "head" => Channel::Head,
            other => Channel::Other(other.to_string()),
        }
    }
}

/// A message pushed by the events hub. `data` is the payload's `data` field,
/// or `Null` for state-only messages.
#[derive(Debug, Clone)]
pub struct TzktEvent {
    pub channel: Channel,
    pub data: Value,
}

impl TzktEvent {
    pub fn head(data: Value) -> Self {
        TzktEvent {
            channel: Channel::Head,
            data,
        }
    }

    /// Block level carried by a head notification, if it has a numeric one.
    pub fn level(&self) -> Option<u64> {
        if self.channel != Channel::Head {
            return None;
        }
        self.data.get("level").and_then(Value::as_u64)
    }
}
