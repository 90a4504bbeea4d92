use nom::{
    error::Error,
    multi,
    number::complete::{le_u32, le_u64},
    sequence,
};

use crate::macho::MachOResult;

use super::{LCLoadCommand, LoadCommandParser};

#[derive(Debug, PartialEq, Eq)]
pub struct RoutinesCommand64 {
    pub cmd: LCLoadCommand,
    pub cmdsize: u32,
    pub init_address: u64,
    pub init_module: u64,
    pub reserved: [u64; 6],
}

impl LoadCommandParser for RoutinesCommand64 {
    fn parse(ldcmd: &[u8]) -> MachOResult<Self> {
        let (cursor, (cmd, cmdsize, init_address, init_module)) =
            sequence::tuple((LCLoadCommand::parse, le_u32, le_u64, le_u64))(ldcmd)?;
        let (_, reserved) = multi::count(le_u64::<_, Error<_>>, 6)(cursor)?;

        let mut words = [0u64; 6];
        words.copy_from_slice(&reserved);

        Ok(RoutinesCommand64 {
            cmd,
            cmdsize,
            init_address,
            init_module,
            reserved: words,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn test_routines_command64() {
        let mut payload = 0x100003f00u64.to_le_bytes().to_vec();
        payload.extend(0u64.to_le_bytes());
        payload.extend([0u8; 48]);
        let cmd = RoutinesCommand64::parse(&testutil::command(0x1a, &payload)).unwrap();
        assert_eq!(cmd.cmd, LCLoadCommand::LcRoutines64);
        assert_eq!(cmd.cmdsize, 72);
        assert_eq!(cmd.init_address, 0x100003f00);
        assert_eq!(cmd.reserved, [0; 6]);
    }
}
