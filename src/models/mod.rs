mod datetime_utils;
mod delegation;
mod tzkt;

pub use datetime_utils::year_bounds;
pub use delegation::Delegation;
pub use tzkt::{Channel, LevelFilter, RawDelegation, TzktEvent};
