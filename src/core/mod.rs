//! Core constants, connection states and error types shared by every layer.

mod constants;
mod error;
mod state;

pub use constants::*;
pub use error::*;
pub use state::*;
