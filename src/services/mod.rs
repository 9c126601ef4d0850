pub mod backfill;
pub mod database;
pub mod live_tail;
pub mod supervisor;
pub mod tzkt_events;
pub mod tzkt_rest;

pub use tzkt_events::{EventSubscription, TzktEventsClient};
pub use tzkt_rest::{DelegationSource, TzktClient};
