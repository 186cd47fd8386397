//! API Module
//!
//! REST surface of the registry.

pub mod rest;
pub mod server;

pub use rest::*;
pub use server::*;
