//! Core data types shared by every component.

mod descriptor;
mod health;
mod package;

pub use descriptor::*;
pub use health::*;
pub use package::*;
