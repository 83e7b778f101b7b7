//! Fetching the control blocks of a channel program: CCWs, IDAWs and
//! MIDAWs.  Each fetch validates alignment, the storage limit, and
//! fetch protection, and sets the reference bit of the frame it reads.
use tracing::{event, Level};

use base::prelude::*;

use super::error::ChannelCheck;
use super::storage::MainStorage;

/// The protection key and address limit under which a channel program
/// accesses storage for data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AccessControl {
    pub(crate) key: u8,
    pub(crate) limit: Option<(LimitMode, u64)>,
}

impl AccessControl {
    pub(crate) fn new(arch: &Architecture, orb: &Orb, pmcw: &Pmcw, address_limit: u64) -> Self {
        let limit = (arch.facilities.address_limit_checking && orb.address_limit_checking())
            .then(|| (pmcw.limit_mode(), address_limit))
            .filter(|(mode, _)| *mode != LimitMode::None);
        AccessControl {
            key: orb.key(),
            limit,
        }
    }

    /// Check a data access to `len` bytes at `addr`, marking the
    /// frames touched.
    pub(crate) fn check_data(
        &self,
        storage: &MainStorage,
        addr: u64,
        len: u64,
        stores: bool,
    ) -> Result<(), ChannelCheck> {
        if len == 0 {
            return Ok(());
        }
        if let Some((mode, limit)) = self.limit {
            let last = addr.saturating_add(len - 1);
            let violates = match mode {
                LimitMode::Low => addr < limit,
                LimitMode::High => last >= limit,
                LimitMode::None => false,
            };
            if violates {
                event!(
                    Level::DEBUG,
                    "data address {addr:#X} is outside the address limit {limit:#X}"
                );
                return Err(ChannelCheck::Protection);
            }
        }
        storage.check_access(self.key, addr, len, stores)?;
        Ok(())
    }
}

fn fetch_block<const N: usize>(
    storage: &MainStorage,
    key: u8,
    addr: u64,
) -> Result<[u8; N], ChannelCheck> {
    let mut bytes = [0u8; N];
    storage.keyed_read(key, addr, &mut bytes)?;
    Ok(bytes)
}

/// Fetch the CCW at `ccwaddr`.
pub(crate) fn fetch_ccw(
    storage: &MainStorage,
    key: u8,
    format: CcwFormat,
    ccwaddr: u32,
) -> Result<Ccw, ChannelCheck> {
    let addr = u64::from(ccwaddr);
    if addr & 0x07 != 0 || addr > storage.limit() {
        event!(Level::DEBUG, "CCW address {addr:#X} is invalid");
        return Err(ChannelCheck::Program);
    }
    let ccw = Ccw::decode(format, &fetch_block::<8>(storage, key, addr)?);
    event!(Level::TRACE, "CCW at {addr:08X}: {ccw}");
    Ok(ccw)
}

/// Fetch IDAW number `seq` of a CCW's list, at `idawaddr`, returning
/// the data address it holds and how many bytes it can describe.
#[allow(clippy::too_many_arguments)]
pub(crate) fn fetch_idaw(
    storage: &MainStorage,
    arch: &Architecture,
    key: u8,
    format: IdawFormat,
    page_mask: u64,
    backward: bool,
    seq: u32,
    idawaddr: u64,
) -> Result<(u64, u64), ChannelCheck> {
    let size = format.size();
    if idawaddr & (size - 1) != 0 || idawaddr > storage.limit() {
        event!(Level::DEBUG, "IDAW address {idawaddr:#X} is invalid");
        return Err(ChannelCheck::Program);
    }
    let addr = match format {
        IdawFormat::Format1 => {
            let word = u32::from_be_bytes(fetch_block::<4>(storage, key, idawaddr)?);
            if word & 0x8000_0000 != 0 {
                return Err(ChannelCheck::Program);
            }
            u64::from(word)
        }
        IdawFormat::Format2 => {
            let word = u64::from_be_bytes(fetch_block::<8>(storage, key, idawaddr)?);
            if word > arch.mode.format2_idaw_limit() {
                return Err(ChannelCheck::Program);
            }
            word
        }
    };
    if addr > storage.limit() {
        return Err(ChannelCheck::Program);
    }
    if seq > 0 && !is_idaw_boundary(addr, page_mask, backward) {
        event!(
            Level::DEBUG,
            "IDAW {seq} data address {addr:#X} is not on a block boundary"
        );
        return Err(ChannelCheck::Program);
    }
    let len = idaw_length(addr, page_mask, backward);
    event!(
        Level::TRACE,
        "IDAW {seq} at {idawaddr:#X}: {len:#X} bytes at {addr:#X}"
    );
    Ok((addr, len))
}

/// Fetch and validate the MIDAW at `midawaddr`.
pub(crate) fn fetch_midaw(
    storage: &MainStorage,
    key: u8,
    backward: bool,
    midawaddr: u64,
) -> Result<Midaw, ChannelCheck> {
    if midawaddr & (MIDAW_SIZE - 1) != 0 || midawaddr > storage.limit() {
        return Err(ChannelCheck::Program);
    }
    let midaw = Midaw::decode(&fetch_block::<16>(storage, key, midawaddr)?);
    if midaw.reserved != 0
        || midaw.flags & (MIDAW_RESV | MIDAW_DTI) != 0
        || midaw.count == 0
    {
        event!(Level::DEBUG, "malformed MIDAW at {midawaddr:#X}: {midaw:?}");
        return Err(ChannelCheck::Program);
    }
    if !midaw.is_skip() {
        let offset = midaw.address & FRAME_MASK;
        let count = u64::from(midaw.count);
        let crosses = if backward {
            count > offset + 1
        } else {
            offset + count > FRAME_SIZE
        };
        if crosses {
            event!(
                Level::DEBUG,
                "MIDAW at {midawaddr:#X} data crosses a 4K boundary"
            );
            return Err(ChannelCheck::Program);
        }
    }
    event!(Level::TRACE, "MIDAW at {midawaddr:#X}: {midaw:?}");
    Ok(midaw)
}
