pub mod analysis;
pub mod config;
pub mod document;
pub mod error;
pub mod findings;
pub mod logging;

pub use error::Result;
