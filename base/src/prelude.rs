//! The prelude exports the structs and constants which are used
//! almost everywhere channel programs are handled.
pub use super::arch::*;
pub use super::ccw::*;
pub use super::decode::DecodeError;
pub use super::idaw::*;
pub use super::orb::*;
pub use super::pmcw::*;
pub use super::status::*;
pub use super::storagekey::*;
