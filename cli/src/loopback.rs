//! A device which keeps the last record written to it and gives it
//! back when read.
use parking_lot::Mutex;
use tracing::{event, Level};

use base::prelude::*;
use channel::{CcwExecution, CcwResult, Device, DeviceHandler};

/// Sense byte 0 bit: the command is not one the device knows.
pub const SENSE_COMMAND_REJECT: u8 = 0x80;

/// The basic sense command.
const SENSE: u8 = 0x04;

/// Control command which does nothing but, unlike NOP, is not a
/// standard code.
const CONTROL_NOOP: u8 = 0x07;

#[derive(Debug, Default)]
pub struct LoopbackDevice {
    record: Mutex<Vec<u8>>,
}

impl LoopbackDevice {
    fn reject(device: &Device, opcode: u8) -> CcwResult {
        event!(
            Level::DEBUG,
            "loopback device {:04X} rejects command {opcode:02X}",
            device.devnum()
        );
        device.set_sense(&[SENSE_COMMAND_REJECT]);
        CcwResult::complete(CSW_CE | CSW_DE | CSW_UC, 0)
    }
}

/// Fill `buf` from `data`; with `from_end`, the last bytes of `data`
/// go to the end of `buf`.  Returns the residual count and whether
/// `data` did not fit.
fn fill(buf: &mut [u8], data: &[u8], from_end: bool) -> (u32, bool) {
    let n = buf.len().min(data.len());
    if from_end {
        let start = buf.len() - n;
        buf[start..].copy_from_slice(&data[data.len() - n..]);
    } else {
        buf[..n].copy_from_slice(&data[..n]);
    }
    let residual = u32::try_from(buf.len() - n).unwrap_or(u32::MAX);
    (residual, data.len() > buf.len())
}

impl DeviceHandler for LoopbackDevice {
    fn type_name(&self) -> &str {
        "loop"
    }

    fn execute(&self, device: &Device, ccw: &CcwExecution, iobuf: &mut [u8]) -> CcwResult {
        let ok = CSW_CE | CSW_DE;
        match CommandClass::of(ccw.opcode) {
            CommandClass::Write => {
                let mut record = self.record.lock();
                // A data-chained write continues the record.
                if ccw.chained & CCW_FLAGS_CD == 0 {
                    record.clear();
                }
                record.extend_from_slice(iobuf);
                CcwResult::complete(ok, 0)
            }
            kind @ (CommandClass::Read | CommandClass::ReadBackward) => {
                let (residual, more) = fill(
                    iobuf,
                    &self.record.lock(),
                    kind == CommandClass::ReadBackward,
                );
                CcwResult {
                    more,
                    ..CcwResult::complete(ok, residual)
                }
            }
            CommandClass::Sense if ccw.opcode == SENSE => {
                let sense = device.sense();
                let (residual, _) = fill(iobuf, &sense, false);
                device.set_sense(&[]);
                CcwResult::complete(ok, residual)
            }
            CommandClass::Control if self.is_immediate(ccw.opcode) => CcwResult::complete(ok, 0),
            _ => LoopbackDevice::reject(device, ccw.opcode),
        }
    }

    fn is_immediate(&self, opcode: u8) -> bool {
        matches!(opcode, CCW_NOP | CONTROL_NOOP)
    }
}
