//! Ingestion Module
//!
//! Turns per-node declaration documents into store state: parsing and
//! validation, component-map resolution, identity-conflict handling,
//! batch bootstrap and the upstream harvesting step.

pub mod bootstrap;
pub mod declaration;
pub mod events;
pub mod harvest;
pub mod locator;

pub use bootstrap::*;
pub use declaration::*;
pub use events::*;
pub use harvest::*;
pub use locator::*;
