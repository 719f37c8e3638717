// Common types and utilities shared across the application

pub mod pagination;
pub mod types;

pub use pagination::*;
pub use types::*;
