//! Shared service plumbing for Ledgerline services: tracing, health probes,
//! request ids, serde helpers and sea-orm query extensions.

pub mod health;
pub mod middleware;
pub mod sea_ext;
pub mod serde;
pub mod tracing;
