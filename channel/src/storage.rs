//! Main storage as seen by the channel subsystem.
//!
//! Storage is shared between the CPU threads and any number of I/O
//! worker threads, so each byte and each storage key is an atomic
//! cell.  Ordering between the data and the status which reports it
//! is established by the device and interrupt-queue locks, so relaxed
//! accesses are sufficient here.
//!
//! Channel-program accesses go through [`MainStorage::check_access`],
//! which applies key-controlled protection and maintains the
//! reference and change bits of every 4K frame touched.
use std::error::Error;
use std::fmt::{self, Debug, Display, Formatter};
use std::sync::atomic::{AtomicU8, Ordering};

use tracing::{event, Level};

use base::prelude::*;

/// Why a keyed access to storage was refused.  Each variant carries
/// the failing address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessFailure {
    /// The address lies beyond the end of configured storage.
    Addressing(u64),
    Protection(u64),
}

impl Display for AccessFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            AccessFailure::Addressing(addr) => write!(f, "address {addr:#X} is not available"),
            AccessFailure::Protection(addr) => write!(f, "address {addr:#X} is protected"),
        }
    }
}

impl Error for AccessFailure {}

pub struct MainStorage {
    bytes: Box<[AtomicU8]>,
    keys: Box<[AtomicU8]>,
}

impl Debug for MainStorage {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_struct("MainStorage")
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}

impl MainStorage {
    /// Allocate `size` bytes of zeroed storage, rounded up to a whole
    /// number of 4K frames.  All storage keys start at zero.
    ///
    /// # Panics
    ///
    /// Panics if the host cannot address that much memory.
    #[must_use]
    pub fn new(size: u64) -> MainStorage {
        let frames = size.div_ceil(FRAME_SIZE).max(1);
        let Ok(len) = usize::try_from(frames * FRAME_SIZE) else {
            panic!("storage size {size:#X} is not addressable on this host");
        };
        event!(Level::DEBUG, "allocating {len:#X} bytes of main storage");
        MainStorage {
            bytes: (0..len).map(|_| AtomicU8::new(0)).collect(),
            keys: (0..frames).map(|_| AtomicU8::new(0)).collect(),
        }
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// The highest valid absolute address.
    #[must_use]
    pub fn limit(&self) -> u64 {
        self.size() - 1
    }

    fn range(&self, addr: u64, len: usize) -> Result<std::ops::Range<usize>, AccessFailure> {
        let start = usize::try_from(addr).map_err(|_| AccessFailure::Addressing(addr))?;
        match start.checked_add(len) {
            Some(end) if end <= self.bytes.len() => Ok(start..end),
            _ => Err(AccessFailure::Addressing(addr)),
        }
    }

    fn key_cell(&self, addr: u64) -> Result<&AtomicU8, AccessFailure> {
        usize::try_from(addr >> FRAME_SHIFT)
            .ok()
            .and_then(|frame| self.keys.get(frame))
            .ok_or(AccessFailure::Addressing(addr))
    }

    /// The storage key of the frame containing `addr`.
    ///
    /// # Errors
    ///
    /// Fails if `addr` is outside configured storage.
    pub fn storage_key(&self, addr: u64) -> Result<u8, AccessFailure> {
        Ok(self.key_cell(addr)?.load(Ordering::Relaxed))
    }

    /// Replace the storage key of the frame containing `addr`.
    ///
    /// # Errors
    ///
    /// Fails if `addr` is outside configured storage.
    pub fn set_storage_key(&self, addr: u64, key: u8) -> Result<(), AccessFailure> {
        self.key_cell(addr)?.store(key, Ordering::Relaxed);
        Ok(())
    }

    /// Verify that an access using `key` to the `len` bytes at `addr`
    /// is allowed, then mark every frame in the range referenced (and
    /// changed, if `stores`).  When the access is refused no frame is
    /// marked.
    ///
    /// # Errors
    ///
    /// `Addressing` if any byte is outside storage, `Protection` if
    /// any frame's key prohibits the access.
    pub fn check_access(
        &self,
        key: u8,
        addr: u64,
        len: u64,
        stores: bool,
    ) -> Result<(), AccessFailure> {
        if len == 0 {
            return Ok(());
        }
        let last = addr
            .checked_add(len - 1)
            .filter(|last| *last <= self.limit())
            .ok_or(AccessFailure::Addressing(addr))?;
        let first_frame = addr >> FRAME_SHIFT;
        let last_frame = last >> FRAME_SHIFT;
        for frame in first_frame..=last_frame {
            let frame_addr = frame << FRAME_SHIFT;
            if is_protected(key, self.storage_key(frame_addr)?, stores) {
                return Err(AccessFailure::Protection(frame_addr.max(addr)));
            }
        }
        let bits = if stores {
            STORKEY_REF | STORKEY_CHANGE
        } else {
            STORKEY_REF
        };
        for frame in first_frame..=last_frame {
            self.key_cell(frame << FRAME_SHIFT)?
                .fetch_or(bits, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Copy storage into `out` without any key checking.  This is
    /// the access path of the CPU and of the program loader; channel
    /// programs use [`MainStorage::keyed_read`].
    ///
    /// # Errors
    ///
    /// Fails if the range is outside configured storage.
    pub fn read(&self, addr: u64, out: &mut [u8]) -> Result<(), AccessFailure> {
        let range = self.range(addr, out.len())?;
        for (dest, cell) in out.iter_mut().zip(&self.bytes[range]) {
            *dest = cell.load(Ordering::Relaxed);
        }
        Ok(())
    }

    /// Copy `data` into storage without any key checking.
    ///
    /// # Errors
    ///
    /// Fails if the range is outside configured storage.
    pub fn write(&self, addr: u64, data: &[u8]) -> Result<(), AccessFailure> {
        let range = self.range(addr, data.len())?;
        for (cell, src) in self.bytes[range].iter().zip(data) {
            cell.store(*src, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Fetch with key-controlled protection, setting reference bits.
    ///
    /// # Errors
    ///
    /// See [`MainStorage::check_access`].
    pub fn keyed_read(&self, key: u8, addr: u64, out: &mut [u8]) -> Result<(), AccessFailure> {
        self.check_access(key, addr, out.len() as u64, false)?;
        self.read(addr, out)
    }

    /// Store with key-controlled protection, setting reference and
    /// change bits.
    ///
    /// # Errors
    ///
    /// See [`MainStorage::check_access`].
    pub fn keyed_write(&self, key: u8, addr: u64, data: &[u8]) -> Result<(), AccessFailure> {
        self.check_access(key, addr, data.len() as u64, true)?;
        self.write(addr, data)
    }

    /// Fetch a big-endian fullword, without key checking.
    ///
    /// # Errors
    ///
    /// Fails if the word is outside configured storage.
    pub fn fetch_u32(&self, addr: u64) -> Result<u32, AccessFailure> {
        let mut word = [0u8; 4];
        self.read(addr, &mut word)?;
        Ok(u32::from_be_bytes(word))
    }

    /// Store a big-endian fullword, without key checking.
    ///
    /// # Errors
    ///
    /// Fails if the word is outside configured storage.
    pub fn store_u32(&self, addr: u64, value: u32) -> Result<(), AccessFailure> {
        self.write(addr, &value.to_be_bytes())
    }
}
