use nom::{number::complete::le_u32, sequence};

use crate::macho::MachOResult;

use super::{LCLoadCommand, LoadCommandParser};

/// `LC_SYMTAB`; the nlist table itself is not decoded.
#[derive(Debug, PartialEq, Eq)]
pub struct SymtabCommand {
    pub cmd: LCLoadCommand,
    pub cmdsize: u32,
    pub symoff: u32,
    pub nsyms: u32,
    pub stroff: u32,
    pub strsize: u32,
}

impl LoadCommandParser for SymtabCommand {
    fn parse(ldcmd: &[u8]) -> MachOResult<Self> {
        let (_, (cmd, cmdsize, symoff, nsyms, stroff, strsize)) =
            sequence::tuple((LCLoadCommand::parse, le_u32, le_u32, le_u32, le_u32, le_u32))(
                ldcmd,
            )?;

        Ok(SymtabCommand {
            cmd,
            cmdsize,
            symoff,
            nsyms,
            stroff,
            strsize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn test_symtab() {
        let mut payload = Vec::new();
        for word in [0x8000u32, 12, 0x80c0, 0x100] {
            payload.extend(word.to_le_bytes());
        }
        let cmd = SymtabCommand::parse(&testutil::command(0x2, &payload)).unwrap();
        assert_eq!(
            cmd,
            SymtabCommand {
                cmd: LCLoadCommand::LcSymtab,
                cmdsize: 24,
                symoff: 0x8000,
                nsyms: 12,
                stroff: 0x80c0,
                strsize: 0x100,
            }
        );
    }
}
