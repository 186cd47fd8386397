//! Query Module
//!
//! Read-side service and the views it returns.

pub mod service;
pub mod views;

pub use service::*;
pub use views::*;
