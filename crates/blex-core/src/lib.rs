//! # BLEX Core
//!
//! Configuration, error types, and the small set of shared data types used
//! by the BLEX background services (task queue, notifications, cipher).

pub mod config;
pub mod error;
pub mod types;

pub use config::BlexConfig;
pub use error::{BlexError, Result};
pub use types::Recipient;
