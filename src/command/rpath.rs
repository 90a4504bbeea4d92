use nom::{number::complete::le_u32, sequence};

use crate::macho::MachOResult;

use super::{lc_str, LCLoadCommand, LoadCommandParser};

#[derive(Debug, PartialEq, Eq)]
pub struct RpathCommand {
    pub cmd: LCLoadCommand,
    pub cmdsize: u32,
    pub path: String,
}

impl LoadCommandParser for RpathCommand {
    fn parse(ldcmd: &[u8]) -> MachOResult<Self> {
        let (_, (cmd, cmdsize, path_offset)) =
            sequence::tuple((LCLoadCommand::parse, le_u32, le_u32))(ldcmd)?;
        let path = lc_str(ldcmd, path_offset, 12)?;

        Ok(RpathCommand { cmd, cmdsize, path })
    }
}
