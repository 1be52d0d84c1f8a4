//! Shared types for the tank monitor workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
