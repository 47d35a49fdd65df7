pub mod action;
pub mod config;
pub mod status;

pub use action::*;
pub use config::*;
pub use status::*;
