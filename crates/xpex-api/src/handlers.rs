//! Request handlers.

pub mod cameras;
pub mod exports;
pub mod health;

pub use cameras::*;
pub use exports::*;
pub use health::*;
