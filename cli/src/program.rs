//! Channel programs read from a text file.
//!
//! Each non-blank line is one of
//!
//! ```text
//! ccw  <opcode> <flags> <count> <address>
//! data <address> <hex bytes>
//! ```
//!
//! with every number in hexadecimal.  The CCWs are placed one after
//! another from the program's origin; `data` lines put bytes
//! anywhere in storage.  A `#` starts a comment.
use std::fmt::{self, Display, Formatter};

use base::prelude::*;
use channel::{AccessFailure, MainStorage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramError {
    pub line: usize,
    pub message: String,
}

impl Display for ProgramError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ProgramError {}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelProgram {
    pub ccws: Vec<Ccw>,
    /// Storage initialisation: (address, bytes).
    pub data: Vec<(u64, Vec<u8>)>,
}

fn hex<T>(line: usize, what: &str, text: Option<&str>) -> Result<T, ProgramError>
where
    T: TryFrom<u64>,
{
    let fail = |message: String| ProgramError { line, message };
    let text = text.ok_or_else(|| fail(format!("missing {what}")))?;
    let text = text.trim_start_matches("0x").trim_start_matches("0X");
    let value =
        u64::from_str_radix(text, 16).map_err(|e| fail(format!("bad {what} '{text}': {e}")))?;
    T::try_from(value).map_err(|_| fail(format!("{what} {value:#X} is too large")))
}

fn hex_bytes(line: usize, text: &str) -> Result<Vec<u8>, ProgramError> {
    let digits: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return Err(ProgramError {
            line,
            message: "odd number of hex digits".to_string(),
        });
    }
    digits
        .chunks(2)
        .map(|pair| {
            let s: String = pair.iter().collect();
            u8::from_str_radix(&s, 16).map_err(|e| ProgramError {
                line,
                message: format!("bad data byte '{s}': {e}"),
            })
        })
        .collect()
}

impl ChannelProgram {
    pub fn parse(text: &str) -> Result<ChannelProgram, ProgramError> {
        let mut program = ChannelProgram::default();
        for (index, raw) in text.lines().enumerate() {
            let line = index + 1;
            let content = raw.split('#').next().unwrap_or_default().trim();
            let mut words = content.split_whitespace();
            match words.next() {
                None => (),
                Some("ccw") => {
                    let ccw = Ccw {
                        opcode: hex(line, "opcode", words.next())?,
                        flags: hex(line, "flags", words.next())?,
                        count: hex(line, "count", words.next())?,
                        address: hex(line, "address", words.next())?,
                    };
                    if let Some(extra) = words.next() {
                        return Err(ProgramError {
                            line,
                            message: format!("unexpected '{extra}' after CCW"),
                        });
                    }
                    program.ccws.push(ccw);
                }
                Some("data") => {
                    let address = hex(line, "address", words.next())?;
                    let rest: Vec<&str> = words.collect();
                    program.data.push((address, hex_bytes(line, &rest.concat())?));
                }
                Some(other) => {
                    return Err(ProgramError {
                        line,
                        message: format!("unknown directive '{other}'"),
                    });
                }
            }
        }
        if program.ccws.is_empty() {
            return Err(ProgramError {
                line: 0,
                message: "the program has no CCWs".to_string(),
            });
        }
        Ok(program)
    }

    /// Copy the program into storage with its first CCW at `origin`.
    pub fn load(
        &self,
        storage: &MainStorage,
        origin: u32,
        format: CcwFormat,
    ) -> Result<(), AccessFailure> {
        for (addr, bytes) in &self.data {
            storage.write(*addr, bytes)?;
        }
        let mut addr = u64::from(origin);
        for ccw in &self.ccws {
            storage.write(addr, &ccw.encode(format))?;
            addr += u64::from(CCW_SIZE);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_program() {
        let program = ChannelProgram::parse(
            "# write then read back\n\
             ccw 01 60 0005 2000\n\
             \n\
             ccw 02 20 0x10 3000  # SLI\n\
             data 2000 C8C5 D3D3D6\n",
        )
        .unwrap();
        assert_eq!(
            program.ccws,
            vec![
                Ccw {
                    opcode: 0x01,
                    flags: 0x60,
                    count: 5,
                    address: 0x2000
                },
                Ccw {
                    opcode: 0x02,
                    flags: 0x20,
                    count: 0x10,
                    address: 0x3000
                },
            ]
        );
        assert_eq!(
            program.data,
            vec![(0x2000, vec![0xC8, 0xC5, 0xD3, 0xD3, 0xD6])]
        );
    }

    #[test]
    fn test_parse_errors() {
        let err = ChannelProgram::parse("ccw 01 00 1 2000\nccw 100 00 1 2000\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("too large"), "{err}");
        assert_eq!(ChannelProgram::parse("load 1000").unwrap_err().line, 1);
        assert_eq!(ChannelProgram::parse("data 2000 ABC").unwrap_err().line, 1);
        assert_eq!(ChannelProgram::parse("# nothing\n").unwrap_err().line, 0);
        assert_eq!(ChannelProgram::parse("ccw 01 00 1").unwrap_err().line, 1);
    }

    #[test]
    fn test_load() {
        let storage = MainStorage::new(0x4000);
        let program = ChannelProgram::parse("ccw 03 00 1 0\ndata 2000 AA\n").unwrap();
        program.load(&storage, 0x100, CcwFormat::Format1).unwrap();
        let mut image = [0u8; 8];
        storage.read(0x100, &mut image).unwrap();
        assert_eq!(Ccw::decode(CcwFormat::Format1, &image), program.ccws[0]);
        let mut byte = [0u8; 1];
        storage.read(0x2000, &mut byte).unwrap();
        assert_eq!(byte, [0xAA]);
        assert!(program.load(&storage, 0x3FFC, CcwFormat::Format1).is_err());
    }
}
