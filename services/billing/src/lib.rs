pub mod config;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod infra;
pub mod router;
pub mod signature;
pub mod state;
pub mod usecase;
pub mod worker;
