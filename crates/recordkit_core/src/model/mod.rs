//! Record model shared by every collection.
//!
//! # Responsibility
//! - Define identity/lifecycle metadata and the record traits.
//! - Provide the pet-care log record types used by the reference service.
//!
//! # Invariants
//! - Every record is identified by a stable `EntityId`.
//! - Archive is a soft delete; only permanent delete removes a record.

pub mod entity;
pub mod pet;
