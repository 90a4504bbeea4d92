use nom::{error::Error, multi, number::complete::le_u32, sequence};

use crate::macho::MachOResult;

use super::{LCLoadCommand, LoadCommandParser};

/// `LC_DYSYMTAB`, printed as-is.
#[derive(Debug, PartialEq, Eq)]
pub struct DysymtabCommand {
    pub cmd: LCLoadCommand,
    pub cmdsize: u32,
    pub ilocalsym: u32,
    pub nlocalsym: u32,
    pub iextdefsym: u32,
    pub nextdefsym: u32,
    pub iundefsym: u32,
    pub nundefsym: u32,
    pub tocoff: u32,
    pub ntoc: u32,
    pub modtaboff: u32,
    pub nmodtab: u32,
    pub extrefsymoff: u32,
    pub nextrefsyms: u32,
    pub indirectsymoff: u32,
    pub nindirectsyms: u32,
    pub extreloff: u32,
    pub nextrel: u32,
    pub locreloff: u32,
    pub nlocrel: u32,
}

impl DysymtabCommand {
    /// Field names in on-disk order, paired with their values.
    pub fn fields(&self) -> [(&'static str, u32); 18] {
        [
            ("ilocalsym", self.ilocalsym),
            ("nlocalsym", self.nlocalsym),
            ("iextdefsym", self.iextdefsym),
            ("nextdefsym", self.nextdefsym),
            ("iundefsym", self.iundefsym),
            ("nundefsym", self.nundefsym),
            ("tocoff", self.tocoff),
            ("ntoc", self.ntoc),
            ("modtaboff", self.modtaboff),
            ("nmodtab", self.nmodtab),
            ("extrefsymoff", self.extrefsymoff),
            ("nextrefsyms", self.nextrefsyms),
            ("indirectsymoff", self.indirectsymoff),
            ("nindirectsyms", self.nindirectsyms),
            ("extreloff", self.extreloff),
            ("nextrel", self.nextrel),
            ("locreloff", self.locreloff),
            ("nlocrel", self.nlocrel),
        ]
    }
}

impl LoadCommandParser for DysymtabCommand {
    fn parse(ldcmd: &[u8]) -> MachOResult<Self> {
        let (cursor, (cmd, cmdsize)) = sequence::tuple((LCLoadCommand::parse, le_u32))(ldcmd)?;
        let (_, words) = multi::count(le_u32::<_, Error<_>>, 18)(cursor)?;

        Ok(DysymtabCommand {
            cmd,
            cmdsize,
            ilocalsym: words[0],
            nlocalsym: words[1],
            iextdefsym: words[2],
            nextdefsym: words[3],
            iundefsym: words[4],
            nundefsym: words[5],
            tocoff: words[6],
            ntoc: words[7],
            modtaboff: words[8],
            nmodtab: words[9],
            extrefsymoff: words[10],
            nextrefsyms: words[11],
            indirectsymoff: words[12],
            nindirectsyms: words[13],
            extreloff: words[14],
            nextrel: words[15],
            locreloff: words[16],
            nlocrel: words[17],
        })
    }
}
