use std::io::{Read, Seek};

use nom::{number::complete::le_u32, IResult};

use crate::{
    macho::MachOResult,
    reader::{MachOReader, Region},
};

use super::{LCLoadCommand, LoadCommandBase};

/// `linkedit_data_command`: a blob somewhere in `__LINKEDIT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkeditDataCommand {
    pub cmd: LCLoadCommand,
    pub cmdsize: u32,
    pub dataoff: u32,
    pub datasize: u32,
}

impl LinkeditDataCommand {
    pub const SIZE: u32 = 16;

    pub fn parse(ldcmd: &[u8]) -> IResult<&[u8], Self> {
        let (cursor, cmd) = LCLoadCommand::parse(ldcmd)?;
        let (cursor, cmdsize) = le_u32(cursor)?;
        let (cursor, dataoff) = le_u32(cursor)?;
        let (cursor, datasize) = le_u32(cursor)?;

        Ok((
            cursor,
            LinkeditDataCommand {
                cmd,
                cmdsize,
                dataoff,
                datasize,
            },
        ))
    }

    /// Reads the fixed record only, leaving the cursor just past it.
    pub fn read<T: Read + Seek>(
        reader: &mut MachOReader<T>,
        base: LoadCommandBase,
    ) -> MachOResult<Self> {
        base.expect_size(Self::SIZE)?;
        reader.parse_record(Self::SIZE as usize, |b| Self::parse(b))
    }

    /// The blob the command points at.
    pub fn data(&self) -> Region {
        Region::new(self.dataoff as u64, self.datasize as u64)
    }
}
