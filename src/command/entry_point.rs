use nom::{
    number::complete::{le_u32, le_u64},
    sequence,
};

use crate::macho::MachOResult;

use super::{LCLoadCommand, LoadCommandParser};

/// `LC_MAIN`
#[derive(Debug, PartialEq, Eq)]
pub struct EntryPointCommand {
    pub cmd: LCLoadCommand,
    pub cmdsize: u32,
    pub entryoff: u64,
    pub stacksize: u64,
}

impl LoadCommandParser for EntryPointCommand {
    fn parse(ldcmd: &[u8]) -> MachOResult<Self> {
        let (_, (cmd, cmdsize, entryoff, stacksize)) =
            sequence::tuple((LCLoadCommand::parse, le_u32, le_u64, le_u64))(ldcmd)?;

        Ok(EntryPointCommand {
            cmd,
            cmdsize,
            entryoff,
            stacksize,
        })
    }
}
