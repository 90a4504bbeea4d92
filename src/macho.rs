use std::io::{Read, Seek};

use log::{debug, warn};
use thiserror::Error;

use crate::command::LoadCommand;
use crate::header::MachHeader64;
use crate::reader::MachOReader;

#[derive(Debug, Error)]
pub enum MachOErr {
    #[error("I/O error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("bad magic 0x{0:08x}, expected a 64-bit Mach-O (0xfeedfacf)")]
    BadMagic(u32),

    #[error("uleb128 at 0x{offset:x} is not terminated before 0x{limit:x}")]
    Uleb128Truncated { offset: u64, limit: u64 },

    #[error("uleb128 at 0x{offset:x} does not fit in 64 bits")]
    Uleb128Overflow { offset: u64 },

    #[error("{what} at 0x{offset:x} (+0x{size:x}) is outside its region ending at 0x{limit:x}")]
    OutOfBounds {
        what: &'static str,
        offset: u64,
        size: u64,
        limit: u64,
    },

    #[error("import ordinal {ordinal} out of range ({count} imports)")]
    ImportOrdinal { ordinal: u64, count: u32 },

    #[error("exports trie node at 0x{0:x} is visited twice")]
    TrieCycle(u64),

    #[error("exports trie nests deeper than {0} nodes")]
    TrieTooDeep(usize),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("parsing error: {0}")]
    ParsingError(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),
}

impl<'a> From<nom::Err<nom::error::Error<&'a [u8]>>> for MachOErr {
    fn from(err: nom::Err<nom::error::Error<&'a [u8]>>) -> Self {
        let detail = match err {
            nom::Err::Incomplete(_) => "incomplete record".to_string(),
            nom::Err::Error(e) | nom::Err::Failure(e) => {
                format!("{:?} with {} bytes remaining", e.code, e.input.len())
            }
        };
        MachOErr::ParsingError(detail)
    }
}

pub type MachOResult<T> = Result<T, MachOErr>;

/// A fully decoded 64-bit image: the header plus every load command, in
/// file order.
#[derive(Debug)]
pub struct MachO {
    pub header: MachHeader64,
    pub load_commands: Vec<LoadCommand>,
}

impl MachO {
    pub fn parse<T: Read + Seek>(buf: T) -> MachOResult<Self> {
        let mut reader = MachOReader::new(buf)?;
        let header = MachHeader64::parse(&mut reader)?;
        debug!(
            "header: {} commands in 0x{:x} bytes",
            header.ncmds, header.sizeofcmds
        );
        let load_commands = LoadCommand::parse_all(&mut reader, &header)?;

        let segments = load_commands
            .iter()
            .filter(|lc| matches!(lc, LoadCommand::Segment64(_)))
            .count();
        for lc in &load_commands {
            if let LoadCommand::DyldChainedFixups(cmd) = lc {
                let seg_count = cmd.fixups.seg_info_offset.len();
                if seg_count != segments {
                    warn!(
                        "chained fixups describe {} segments but the image has {} LC_SEGMENT_64 commands",
                        seg_count, segments
                    );
                }
            }
        }

        Ok(MachO {
            header,
            load_commands,
        })
    }
}
