pub mod delivery;
pub mod deps;

pub use deps::*;
