//! Pure ledger rules shared by the Postgres and in-memory repositories

pub mod claim;
pub mod followups;
pub mod posting;
pub mod tiers;
