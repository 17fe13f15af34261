//! Types shared between artbox crates.

pub mod errors;

pub use errors::{ArtboxError, ArtboxResult};
