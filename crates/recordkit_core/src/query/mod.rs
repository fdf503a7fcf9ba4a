//! Filtering, sorting and the reactive pipeline that publishes visible
//! collections.
//!
//! # Responsibility
//! - Decide per-record visibility from a `FilterConfig`.
//! - Order records under a `SortOption`.
//! - Keep published views consistent with the store and UI inputs.

pub mod debounce;
pub mod filter;
pub mod pipeline;
pub mod sort;
