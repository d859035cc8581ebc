//! Core types for Stockroom.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod email;
pub mod id;
pub mod price;
pub mod status;
pub mod stock;

pub use email::{Email, EmailError};
pub use id::*;
pub use price::{CurrencyCode, line_total};
pub use status::*;
pub use stock::StockKey;
