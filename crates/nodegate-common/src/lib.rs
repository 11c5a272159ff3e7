//! # Nodegate Common
//!
//! Shared types, errors, and helpers used by the intake service and the
//! intake client.
//!
//! ## Modules
//! - `types` - Wire types (Role, AddressBlock, register/delete bodies)
//! - `error` - Common error taxonomy
//! - `constants` - Ports, paths, and cluster object names
//! - `facts` - Typed node-local bootstrap state (node facts, join info)
//! - `payload` - JSON extraction from noisy command output

pub mod constants;
pub mod error;
pub mod facts;
pub mod payload;
pub mod types;

pub use error::NodegateError;
pub use facts::{JoinInfo, NodeFacts};
pub use types::*;
