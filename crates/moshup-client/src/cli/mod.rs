//! Client CLI implementation.
//!
//! Provides command-line argument parsing using clap, and the conversion from
//! parsed flags to negotiation inputs.

mod parsing;
mod types;


pub use parsing::MOSH_KEY_ENV;
pub use types::*;
