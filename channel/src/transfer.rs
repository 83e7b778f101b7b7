//! Data transfer between main storage and a device's I/O buffer.
//!
//! A CCW's data area is either a contiguous range of storage, a list
//! of IDAWs, or a list of MIDAWs.  For Read Backward the data address
//! designates the last byte of the area and the buffer is mapped
//! from its end: the final byte of the buffer corresponds to the
//! designated address.
use tracing::{event, Level};

use base::prelude::*;

use super::error::ChannelCheck;
use super::fetch::{fetch_idaw, fetch_midaw, AccessControl};
use super::storage::MainStorage;

/// The data area of one CCW.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DataArea {
    pub(crate) class: CommandClass,
    pub(crate) flags: u8,
    /// The data address, or the address of the IDAW or MIDAW list.
    pub(crate) address: u32,
    /// The CCW count.
    pub(crate) count: u32,
    pub(crate) idaw_format: IdawFormat,
    pub(crate) page_mask: u64,
}

struct Mover<'a> {
    storage: &'a MainStorage,
    access: &'a AccessControl,
    stores: bool,
    backward: bool,
}

impl Mover<'_> {
    /// Move `chunk` to or from storage.  `addr` is the designated
    /// address: the first byte going forward, the last going
    /// backward.
    fn transfer(&self, addr: u64, chunk: &mut [u8]) -> Result<(), ChannelCheck> {
        let len = chunk.len() as u64;
        if len == 0 {
            return Ok(());
        }
        let start = if self.backward {
            addr.checked_sub(len - 1).ok_or(ChannelCheck::Program)?
        } else {
            addr
        };
        if start
            .checked_add(len - 1)
            .map_or(true, |last| last > self.storage.limit())
        {
            event!(Level::DEBUG, "data address {start:#X} is beyond storage");
            return Err(ChannelCheck::Program);
        }
        // Every frame is checked before any byte moves.
        self.access
            .check_data(self.storage, start, len, self.stores)?;
        if self.stores {
            self.storage.write(start, chunk)?;
        } else {
            self.storage.read(start, chunk)?;
        }
        Ok(())
    }

    /// The part of `buf` which holds the next `len` bytes after
    /// `done` bytes have already been moved.
    fn window<'b>(&self, buf: &'b mut [u8], done: usize, len: usize) -> &'b mut [u8] {
        if self.backward {
            let end = buf.len() - done;
            &mut buf[end - len..end]
        } else {
            &mut buf[done..done + len]
        }
    }
}

fn to_usize(n: u64) -> Result<usize, ChannelCheck> {
    usize::try_from(n).map_err(|_| ChannelCheck::Program)
}

/// Move the whole of `buf` between storage and the buffer, in the
/// direction implied by the command class.  `buf` may be shorter than
/// the CCW count when the device transferred less than it asked for.
pub(crate) fn copy_iobuf(
    storage: &MainStorage,
    arch: &Architecture,
    access: &AccessControl,
    area: &DataArea,
    buf: &mut [u8],
) -> Result<(), ChannelCheck> {
    if buf.is_empty() {
        return Ok(());
    }
    let mover = Mover {
        storage,
        access,
        stores: area.class.stores_into_storage(),
        backward: area.class == CommandClass::ReadBackward,
    };
    let result = if area.flags & CCW_FLAGS_MIDAW != 0 {
        copy_midaw(&mover, area, buf)
    } else if area.flags & CCW_FLAGS_IDA != 0 {
        copy_idaw(&mover, arch, area, buf)
    } else {
        mover.transfer(u64::from(area.address), buf)
    };
    if let Err(check) = result {
        event!(
            Level::DEBUG,
            "{check} moving {} bytes for data area at {:#X}",
            buf.len(),
            area.address
        );
    }
    result
}

fn copy_idaw(
    mover: &Mover<'_>,
    arch: &Architecture,
    area: &DataArea,
    buf: &mut [u8],
) -> Result<(), ChannelCheck> {
    let total = buf.len();
    let mut idawaddr = u64::from(area.address);
    let mut done = 0usize;
    let mut seq = 0u32;
    while done < total {
        let (addr, len) = fetch_idaw(
            mover.storage,
            arch,
            mover.access.key,
            area.idaw_format,
            area.page_mask,
            mover.backward,
            seq,
            idawaddr,
        )?;
        let n = to_usize(len)?.min(total - done);
        mover.transfer(addr, mover.window(buf, done, n))?;
        done += n;
        idawaddr += area.idaw_format.size();
        seq += 1;
    }
    Ok(())
}

fn copy_midaw(mover: &Mover<'_>, area: &DataArea, buf: &mut [u8]) -> Result<(), ChannelCheck> {
    let total = buf.len();
    let mut midawaddr = u64::from(area.address);
    let mut remaining = area.count;
    let mut done = 0usize;
    loop {
        let midaw = fetch_midaw(mover.storage, mover.access.key, mover.backward, midawaddr)?;
        let count = u32::from(midaw.count);
        if count > remaining {
            event!(
                Level::DEBUG,
                "MIDAW count {count} exceeds the {remaining} bytes left of the CCW count"
            );
            return Err(ChannelCheck::Program);
        }
        let n = usize::from(midaw.count).min(total - done);
        if !midaw.is_skip() {
            mover.transfer(midaw.address, mover.window(buf, done, n))?;
        }
        done += n;
        remaining -= count;
        if midaw.is_last() || remaining == 0 {
            if remaining != 0 {
                event!(
                    Level::DEBUG,
                    "MIDAW list ends with {remaining} bytes of the CCW count undescribed"
                );
                return Err(ChannelCheck::Program);
            }
            return Ok(());
        }
        if done == total {
            return Ok(());
        }
        midawaddr += MIDAW_SIZE;
    }
}
