//! Domain types shared across Ledgerline services.
//!
//! Pure types with no framework dependencies. Safe to import from `domain/`
//! and `usecase/` layers.

pub mod id;
pub mod pagination;
