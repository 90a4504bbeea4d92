use nom::{number::complete::le_u32, sequence};

use crate::{helpers::version_string, macho::MachOResult};

use super::{lc_str, LCLoadCommand, LoadCommandParser};

/// Shared by every command that names a dylib (`LC_LOAD_DYLIB`,
/// `LC_ID_DYLIB`, `LC_REEXPORT_DYLIB` and friends).
#[derive(Debug, PartialEq, Eq)]
pub struct DylibCommand {
    pub cmd: LCLoadCommand,
    pub cmdsize: u32,
    pub name: String,
    pub timestamp: u32,
    pub current_version: String,
    pub compatibility_version: String,
}

impl DylibCommand {
    pub const SIZE: usize = 24;
}

impl LoadCommandParser for DylibCommand {
    fn parse(ldcmd: &[u8]) -> MachOResult<Self> {
        let (_, (cmd, cmdsize, name_offset, timestamp, current_version, compatibility_version)) =
            sequence::tuple((LCLoadCommand::parse, le_u32, le_u32, le_u32, le_u32, le_u32))(
                ldcmd,
            )?;

        let name = lc_str(ldcmd, name_offset, Self::SIZE)?;

        Ok(DylibCommand {
            cmd,
            cmdsize,
            name,
            timestamp,
            current_version: version_string(current_version),
            compatibility_version: version_string(compatibility_version),
        })
    }
}
