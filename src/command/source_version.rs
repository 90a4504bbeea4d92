use nom::{
    number::complete::{le_u32, le_u64},
    sequence,
};

use crate::macho::MachOResult;

use super::{LCLoadCommand, LoadCommandParser};

#[derive(Debug, PartialEq, Eq)]
pub struct SourceVersionCommand {
    pub cmd: LCLoadCommand,
    pub cmdsize: u32,
    pub version: String, // A.B.C.D.E packed as a24.b10.c10.d10.e10
}

impl LoadCommandParser for SourceVersionCommand {
    fn parse(ldcmd: &[u8]) -> MachOResult<Self> {
        let (_, (cmd, cmdsize, version)) =
            sequence::tuple((LCLoadCommand::parse, le_u32, le_u64))(ldcmd)?;

        let a = version >> 40;
        let b = (version >> 30) & 0x3ff;
        let c = (version >> 20) & 0x3ff;
        let d = (version >> 10) & 0x3ff;
        let e = version & 0x3ff;

        Ok(SourceVersionCommand {
            cmd,
            cmdsize,
            version: format!("{}.{}.{}.{}.{}", a, b, c, d, e),
        })
    }
}
