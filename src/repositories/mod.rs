mod delegation_repository;

pub use delegation_repository::{DelegationStore, MongoDelegationStore};
