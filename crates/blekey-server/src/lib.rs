//! # blekey-server
//!
//! HTTP server library for the blekey BLE access-credential manager.
//!
//! This library provides the API handlers, state and logging setup used by
//! the `blekey-server` binary.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod state;
