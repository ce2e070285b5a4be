pub mod policy;
pub mod provider_event;
pub mod repository;
pub mod types;
