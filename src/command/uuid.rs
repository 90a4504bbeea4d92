use nom::{
    number::complete::{le_u128, le_u32},
    sequence,
};
use uuid::Uuid;

use crate::macho::MachOResult;

use super::{LCLoadCommand, LoadCommandParser};

#[derive(Debug, PartialEq, Eq)]
pub struct UuidCommand {
    pub cmd: LCLoadCommand,
    pub cmdsize: u32,
    pub uuid: Uuid,
}

impl LoadCommandParser for UuidCommand {
    fn parse(ldcmd: &[u8]) -> MachOResult<Self> {
        let (_, (cmd, cmdsize, uuid)) =
            sequence::tuple((LCLoadCommand::parse, le_u32, le_u128))(ldcmd)?;

        Ok(UuidCommand {
            cmd,
            cmdsize,
            uuid: Uuid::from_u128_le(uuid),
        })
    }
}
