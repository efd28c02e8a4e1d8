pub mod client;
pub mod dialect;
pub mod dump;
pub mod limits;
pub mod normalize;
pub mod query;
pub mod registry;
pub mod rollback;
pub mod store;
pub mod types;
