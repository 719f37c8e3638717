pub mod entity;
pub mod history;
pub mod subscription;

pub use entity::*;
pub use history::*;
pub use subscription::*;
