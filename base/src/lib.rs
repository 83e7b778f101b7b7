//! The `base` crate defines the architected data layouts of
//! S/370, ESA/390 and z/Architecture I/O which are useful in both
//! an emulator and other associated tools.  The idea is that if you
//! want to write, say, a channel program disassembler it would
//! depend on the base crate but would not need to depend on the
//! channel subsystem emulation itself.
//!
//! All multi-byte fields are big-endian, as they are in main
//! storage.

mod decode;

pub mod arch;
pub mod ccw;
pub mod collections;
pub mod idaw;
pub mod orb;
pub mod pmcw;
pub mod prelude;
pub mod status;
pub mod storagekey;

pub use decode::DecodeError;
