use crate::models::Delegation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationView {
    pub delegator: String,
    pub timestamp: DateTime<Utc>,
    pub block: u64,
    pub amount: i64,
}

impl From<Delegation> for DelegationView {
    fn from(d: Delegation) -> Self {
        DelegationView {
            delegator: d.delegator,
            timestamp: d.timestamp,
            block: d.block,
            amount: d.amount,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DelegationsResponse {
    pub data: Vec<DelegationView>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
