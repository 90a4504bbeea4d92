use nom::{number::complete::le_u32, sequence};

use crate::macho::MachOResult;

use super::{lc_str, LCLoadCommand, LoadCommandParser};

/// `LC_LOAD_DYLINKER`, `LC_ID_DYLINKER` and `LC_DYLD_ENVIRONMENT` all carry
/// a single path.
#[derive(Debug, PartialEq, Eq)]
pub struct DylinkerCommand {
    pub cmd: LCLoadCommand,
    pub cmdsize: u32,
    pub name: String,
}

impl LoadCommandParser for DylinkerCommand {
    fn parse(ldcmd: &[u8]) -> MachOResult<Self> {
        let (_, (cmd, cmdsize, name_offset)) =
            sequence::tuple((LCLoadCommand::parse, le_u32, le_u32))(ldcmd)?;
        let name = lc_str(ldcmd, name_offset, 12)?;

        Ok(DylinkerCommand { cmd, cmdsize, name })
    }
}
