//! Test utilities for Ledgerline services.
//!
//! Provides a provider-signature builder and a JSON fixture loader.
//! Import from tests only, never from production code.

pub mod fixture;
pub mod stripe;
