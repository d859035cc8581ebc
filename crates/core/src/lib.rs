//! Stockroom Core - Shared types library.
//!
//! This crate provides the domain vocabulary used across all Stockroom components:
//! - `storefront` - JSON API for carts, checkout, orders and accounts
//! - `cli` - Command-line tools for migrations, seeding and stock inspection
//!
//! # Architecture
//!
//! The core crate contains only types and pure rules - no I/O, no database access,
//! no HTTP clients. Order status transitions and payment bookkeeping live here so
//! every store implementation applies the same rules.
//!
//! # Modules
//!
//! - [`types`] - Typed IDs, prices, emails, stock keys and order/payment statuses

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
