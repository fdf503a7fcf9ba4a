//! Use-case services built on the entity store and query pipeline.
//!
//! # Responsibility
//! - Bundle store registration, validation and visible lists per app.
//! - Keep hosts decoupled from persistence details.

pub mod pet_log;
