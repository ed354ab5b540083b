//! # Placa Common Library
//!
//! Shared code for the plate restriction enforcement workspace including:
//! - Error and result types
//! - Configuration loading (TOML file, root folder resolution)
//! - Clock abstraction (system clock or pinned demo clock)
//! - Plate normalization
//! - Database initialization and row models

pub mod config;
pub mod db;
pub mod error;
pub mod plate;
pub mod time;

pub use error::{Error, Result};
pub use plate::Plate;
pub use time::{Clock, FixedClock, SystemClock};
