pub mod build_version;
pub mod dyld_chained_fixup;
pub mod dyld_exports_trie;
pub mod dylib;
pub mod dylinker;
pub mod dysymtab;
pub mod entry_point;
pub mod linkedit_data;
pub mod routines;
pub mod rpath;
pub mod segment;
pub mod source_version;
pub mod symtab;
pub mod uuid;

use std::io::{Read, Seek};

use log::{debug, trace};
use nom::{
    error::{Error, ErrorKind},
    number::complete::le_u32,
    Err::Failure,
    IResult,
};
use num_derive::FromPrimitive;
use strum_macros::Display;

use crate::header::MachHeader64;
use crate::helpers::string_upto_null_terminator;
use crate::macho::{MachOErr, MachOResult};
use crate::reader::MachOReader;

pub use build_version::BuildVersionCommand;
pub use dyld_chained_fixup::{
    DyldChainedFixupCommand, DyldChainedFixups, DyldChainedImport, DyldFixup, DyldPointerFixup,
    DyldPointerFormat,
};
pub use dyld_exports_trie::{DyldExport, DyldExportInfo, DyldExportSymbolFlags, DyldExportsTrie};
pub use dylib::DylibCommand;
pub use dylinker::DylinkerCommand;
pub use dysymtab::DysymtabCommand;
pub use entry_point::EntryPointCommand;
pub use linkedit_data::LinkeditDataCommand;
pub use routines::RoutinesCommand64;
pub use rpath::RpathCommand;
pub use segment::{Section64, SegmentCommand64};
pub use source_version::SourceVersionCommand;
pub use symtab::SymtabCommand;
pub use uuid::UuidCommand;

/// A command whose fixed record is decoded from its own bytes, with no
/// reference to anything else in the file.
pub trait LoadCommandParser: Sized {
    fn parse(ldcmd: &[u8]) -> MachOResult<Self>;
}

/// Reads the whole `cmdsize` record at the cursor and decodes it.
pub fn read_command<T, C>(reader: &mut MachOReader<T>, base: LoadCommandBase) -> MachOResult<C>
where
    T: Read + Seek,
    C: LoadCommandParser,
{
    let ldcmd = reader.read_bytes(base.cmdsize as usize)?;
    C::parse(&ldcmd)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadCommandBase {
    pub cmd: u32,
    pub cmdsize: u32,
}

impl LoadCommandBase {
    pub const SIZE: u32 = 8;

    pub fn parse(bytes: &[u8]) -> IResult<&[u8], LoadCommandBase> {
        let (bytes, cmd) = le_u32(bytes)?;
        let (bytes, cmdsize) = le_u32(bytes)?;

        Ok((bytes, LoadCommandBase { cmd, cmdsize }))
    }

    /// The known opcode, if this is one.
    pub fn kind(&self) -> Option<LCLoadCommand> {
        num::FromPrimitive::from_u32(self.cmd)
    }

    /// Fails if the command is too small to hold a `size`-byte record.
    pub fn expect_size(&self, size: u32) -> MachOResult<()> {
        if self.cmdsize < size {
            return Err(MachOErr::InvalidValue(format!(
                "command 0x{:x} has cmdsize {} but its record needs {}",
                self.cmd, self.cmdsize, size
            )));
        }
        Ok(())
    }
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum LCLoadCommand {
    LcSegment = 0x1,
    LcSymtab = 0x2,
    LcSymseg = 0x3,
    LcThread = 0x4,
    LcUnixThread = 0x5,
    LcDysymtab = 0xb,
    LcLoadDylib = 0xc,
    LcIdDylib = 0xd,
    LcLoadDylinker = 0xe,
    LcIdDylinker = 0xf,
    LcPreboundDylib = 0x10,
    LcRoutines = 0x11,
    LcSubFramework = 0x12,
    LcSubUmbrella = 0x13,
    LcSubClient = 0x14,
    LcSubLibrary = 0x15,
    LcTwolevelHints = 0x16,
    LcPrebindCksum = 0x17,
    LcLoadWeakDylib = 0x18 | Self::LC_REQ_DYLD,
    #[strum(serialize = "LC_SEGMENT_64")]
    LcSegment64 = 0x19,
    #[strum(serialize = "LC_ROUTINES_64")]
    LcRoutines64 = 0x1a,
    LcUuid = 0x1b,
    LcRpath = 0x1c | Self::LC_REQ_DYLD,
    LcCodeSignature = 0x1d,
    LcSegmentSplitInfo = 0x1e,
    LcReexportDylib = 0x1f | Self::LC_REQ_DYLD,
    LcLazyLoadDylib = 0x20,
    LcEncryptionInfo = 0x21,
    LcDyldInfo = 0x22,
    LcDyldInfoOnly = 0x22 | Self::LC_REQ_DYLD,
    LcLoadUpwardDylib = 0x23 | Self::LC_REQ_DYLD,
    LcVersionMinMacosx = 0x24,
    LcVersionMinIphoneos = 0x25,
    LcFunctionStarts = 0x26,
    LcDyldEnvironment = 0x27,
    LcMain = 0x28 | Self::LC_REQ_DYLD,
    LcDataInCode = 0x29,
    LcSourceVersion = 0x2A,
    LcDylibCodeSignDrs = 0x2B,
    #[strum(serialize = "LC_ENCRYPTION_INFO_64")]
    LcEncryptionInfo64 = 0x2C,
    LcLinkerOption = 0x2D,
    LcLinkerOptimizationHint = 0x2E,
    LcVersionMinTvos = 0x2F,
    LcVersionMinWatchos = 0x30,
    LcNote = 0x31,
    LcBuildVersion = 0x32,
    LcDyldExportsTrie = 0x33 | Self::LC_REQ_DYLD,
    LcDyldChainedFixups = 0x34 | Self::LC_REQ_DYLD,
    LcFilesetEntry = 0x35 | Self::LC_REQ_DYLD,
    LcAtomInfo = 0x36,
}

impl LCLoadCommand {
    pub const LC_REQ_DYLD: u32 = 0x80000000;

    pub fn parse(bytes: &[u8]) -> IResult<&[u8], Self> {
        let (bytes, cmd) = le_u32(bytes)?;
        match num::FromPrimitive::from_u32(cmd) {
            Some(cmd) => Ok((bytes, cmd)),
            None => Err(Failure(Error::new(bytes, ErrorKind::Tag))),
        }
    }
}

/// Reads an `lc_str` embedded in a command: `offset` is relative to the
/// start of the command and the string may not run past `cmdsize`.
pub fn lc_str(ldcmd: &[u8], offset: u32, fixed_size: usize) -> MachOResult<String> {
    let offset = offset as usize;
    if offset < fixed_size || offset > ldcmd.len() {
        return Err(MachOErr::InvalidValue(format!(
            "lc_str offset {} outside [{}, {}]",
            offset,
            fixed_size,
            ldcmd.len()
        )));
    }
    let (_, name) = string_upto_null_terminator(&ldcmd[offset..])?;
    Ok(name)
}

#[derive(Debug)]
pub enum LoadCommand {
    Segment64(SegmentCommand64),
    Symtab(SymtabCommand),
    Dysymtab(DysymtabCommand),
    LoadDylib(DylibCommand),
    DylibId(DylibCommand),
    LoadWeakDylib(DylibCommand),
    ReexportDylib(DylibCommand),
    LazyLoadDylib(DylibCommand),
    LoadUpwardDylib(DylibCommand),
    LoadDylinker(DylinkerCommand),
    IdDylinker(DylinkerCommand),
    DyldEnvironment(DylinkerCommand),
    Rpath(RpathCommand),
    UUID(UuidCommand),
    BuildVersion(BuildVersionCommand),
    SourceVersion(SourceVersionCommand),
    Main(EntryPointCommand),
    Routines64(RoutinesCommand64),
    FunctionStarts(LinkeditDataCommand),
    DataInCode(LinkeditDataCommand),
    CodeSignature(LinkeditDataCommand),
    SegmentSplitInfo(LinkeditDataCommand),
    DylibCodeSignDrs(LinkeditDataCommand),
    LinkerOptimizationHint(LinkeditDataCommand),
    AtomInfo(LinkeditDataCommand),
    DyldChainedFixups(DyldChainedFixupCommand),
    DyldExportsTrie(DyldExportsTrie),
    /// Anything without a decoder; only the prefix is kept.
    Other(LoadCommandBase),
}

/// Walks the `ncmds` load commands after the header. For each one the
/// prefix is peeked, `f` decodes it from the command's first byte, and the
/// cursor is then moved to `start + cmdsize` whatever `f` consumed.
pub fn iterate_load_commands<T, R, F>(
    reader: &mut MachOReader<T>,
    header: &MachHeader64,
    mut f: F,
) -> MachOResult<Vec<R>>
where
    T: Read + Seek,
    F: FnMut(&mut MachOReader<T>, LoadCommandBase) -> MachOResult<R>,
{
    let region = header.commands_region();
    reader.seek_to(region.start)?;

    let mut results = Vec::with_capacity(header.ncmds as usize);
    for i in 0..header.ncmds {
        let start = reader.position()?;
        region.check("load command", start, LoadCommandBase::SIZE as u64)?;
        let base = reader.peek_record(LoadCommandBase::SIZE as usize, |b| {
            LoadCommandBase::parse(b)
        })?;

        if base.cmdsize < LoadCommandBase::SIZE {
            return Err(MachOErr::InvalidValue(format!(
                "load command {} has cmdsize {}",
                i, base.cmdsize
            )));
        }
        if region.check("load command", start, base.cmdsize as u64).is_err() {
            return Err(MachOErr::InvalidValue(format!(
                "load command {} runs past the end of the load commands",
                i
            )));
        }

        debug!(
            "load command {} at 0x{:x}: cmd 0x{:x}, cmdsize {}",
            i, start, base.cmd, base.cmdsize
        );
        results.push(f(reader, base)?);

        let next = start + base.cmdsize as u64;
        if reader.position()? != next {
            trace!("resynchronising cursor to 0x{:x}", next);
        }
        reader.seek_to(next)?;
    }

    Ok(results)
}

impl LoadCommand {
    pub fn parse_all<T>(reader: &mut MachOReader<T>, header: &MachHeader64) -> MachOResult<Vec<Self>>
    where
        T: Read + Seek,
    {
        iterate_load_commands(reader, header, LoadCommand::parse)
    }

    /// Decodes one command with the cursor on its first byte.
    pub fn parse<T>(reader: &mut MachOReader<T>, base: LoadCommandBase) -> MachOResult<Self>
    where
        T: Read + Seek,
    {
        let kind = match base.kind() {
            Some(kind) => kind,
            None => return Ok(LoadCommand::Other(base)),
        };

        let cmd = match kind {
            LCLoadCommand::LcSegment64 => {
                LoadCommand::Segment64(SegmentCommand64::read(reader, base)?)
            }
            LCLoadCommand::LcLoadDylib
            | LCLoadCommand::LcIdDylib
            | LCLoadCommand::LcLoadWeakDylib
            | LCLoadCommand::LcReexportDylib
            | LCLoadCommand::LcLazyLoadDylib
            | LCLoadCommand::LcLoadUpwardDylib => {
                let cmd: DylibCommand = read_command(reader, base)?;
                match kind {
                    LCLoadCommand::LcLoadDylib => LoadCommand::LoadDylib(cmd),
                    LCLoadCommand::LcIdDylib => LoadCommand::DylibId(cmd),
                    LCLoadCommand::LcLoadWeakDylib => LoadCommand::LoadWeakDylib(cmd),
                    LCLoadCommand::LcReexportDylib => LoadCommand::ReexportDylib(cmd),
                    LCLoadCommand::LcLazyLoadDylib => LoadCommand::LazyLoadDylib(cmd),
                    LCLoadCommand::LcLoadUpwardDylib => LoadCommand::LoadUpwardDylib(cmd),
                    _ => unreachable!(),
                }
            }
            LCLoadCommand::LcLoadDylinker
            | LCLoadCommand::LcIdDylinker
            | LCLoadCommand::LcDyldEnvironment => {
                let cmd: DylinkerCommand = read_command(reader, base)?;
                match kind {
                    LCLoadCommand::LcLoadDylinker => LoadCommand::LoadDylinker(cmd),
                    LCLoadCommand::LcIdDylinker => LoadCommand::IdDylinker(cmd),
                    LCLoadCommand::LcDyldEnvironment => LoadCommand::DyldEnvironment(cmd),
                    _ => unreachable!(),
                }
            }
            LCLoadCommand::LcRpath => LoadCommand::Rpath(read_command(reader, base)?),
            LCLoadCommand::LcSymtab => LoadCommand::Symtab(read_command(reader, base)?),
            LCLoadCommand::LcDysymtab => LoadCommand::Dysymtab(read_command(reader, base)?),
            LCLoadCommand::LcUuid => LoadCommand::UUID(read_command(reader, base)?),
            LCLoadCommand::LcBuildVersion => {
                LoadCommand::BuildVersion(read_command(reader, base)?)
            }
            LCLoadCommand::LcSourceVersion => {
                LoadCommand::SourceVersion(read_command(reader, base)?)
            }
            LCLoadCommand::LcMain => LoadCommand::Main(read_command(reader, base)?),
            LCLoadCommand::LcRoutines64 => LoadCommand::Routines64(read_command(reader, base)?),
            LCLoadCommand::LcFunctionStarts
            | LCLoadCommand::LcDataInCode
            | LCLoadCommand::LcCodeSignature
            | LCLoadCommand::LcSegmentSplitInfo
            | LCLoadCommand::LcDylibCodeSignDrs
            | LCLoadCommand::LcLinkerOptimizationHint
            | LCLoadCommand::LcAtomInfo => {
                let cmd = LinkeditDataCommand::read(reader, base)?;
                match kind {
                    LCLoadCommand::LcFunctionStarts => LoadCommand::FunctionStarts(cmd),
                    LCLoadCommand::LcDataInCode => LoadCommand::DataInCode(cmd),
                    LCLoadCommand::LcCodeSignature => LoadCommand::CodeSignature(cmd),
                    LCLoadCommand::LcSegmentSplitInfo => LoadCommand::SegmentSplitInfo(cmd),
                    LCLoadCommand::LcDylibCodeSignDrs => LoadCommand::DylibCodeSignDrs(cmd),
                    LCLoadCommand::LcLinkerOptimizationHint => {
                        LoadCommand::LinkerOptimizationHint(cmd)
                    }
                    LCLoadCommand::LcAtomInfo => LoadCommand::AtomInfo(cmd),
                    _ => unreachable!(),
                }
            }
            LCLoadCommand::LcDyldChainedFixups => {
                LoadCommand::DyldChainedFixups(DyldChainedFixupCommand::read(reader, base)?)
            }
            LCLoadCommand::LcDyldExportsTrie => {
                LoadCommand::DyldExportsTrie(DyldExportsTrie::read(reader, base)?)
            }
            _ => LoadCommand::Other(base),
        };

        Ok(cmd)
    }
}

#[cfg(test)]
mod tests {
    use nom::number::complete::le_u64;

    use super::*;
    use crate::testutil;

    fn parse_image(bytes: Vec<u8>) -> MachOResult<Vec<LoadCommand>> {
        let mut reader = testutil::reader(bytes);
        let header = MachHeader64::parse(&mut reader)?;
        LoadCommand::parse_all(&mut reader, &header)
    }

    #[test]
    fn test_lc_names() {
        assert_eq!(LCLoadCommand::LcSegment64.to_string(), "LC_SEGMENT_64");
        assert_eq!(
            LCLoadCommand::LcDyldChainedFixups.to_string(),
            "LC_DYLD_CHAINED_FIXUPS"
        );
        assert_eq!(LCLoadCommand::LcMain.to_string(), "LC_MAIN");
        assert_eq!(
            LoadCommandBase {
                cmd: 0x80000034,
                cmdsize: 16
            }
            .kind(),
            Some(LCLoadCommand::LcDyldChainedFixups)
        );
    }

    #[test]
    fn test_cursor_resyncs_after_every_command() {
        // An unknown command, a command whose handler under-reads, and one
        // whose handler over-reads into the next command.
        let commands = vec![
            testutil::command(0x7777, &[0xaa; 24]),
            testutil::command(0x7778, &[0xbb; 40]),
            testutil::command(0x7779, &[0xcc; 8]),
            testutil::command(0x777a, &[0xdd; 16]),
        ];
        let starts: Vec<u64> = commands
            .iter()
            .scan(32u64, |offset, cmd| {
                let start = *offset;
                *offset += cmd.len() as u64;
                Some(start)
            })
            .collect();
        let mut reader = testutil::reader(testutil::image(&commands));
        let header = MachHeader64::parse(&mut reader).unwrap();

        let seen = iterate_load_commands(&mut reader, &header, |reader, base| {
            let start = reader.position()?;
            match base.cmd {
                0x7778 => {
                    reader.read_bytes(4)?;
                }
                0x7779 => {
                    reader.read_bytes(base.cmdsize as usize + 12)?;
                }
                _ => {}
            }
            Ok((start, base))
        })
        .unwrap();

        assert_eq!(seen.len(), 4);
        for (i, (start, base)) in seen.iter().enumerate() {
            assert_eq!(*start, starts[i]);
            assert_eq!(base.cmd, 0x7777 + i as u32);
            assert_eq!(base.cmdsize as usize, commands[i].len());
        }
        assert_eq!(reader.position().unwrap(), 32 + header.sizeofcmds as u64);
    }

    #[test]
    fn test_cursor_after_each_dispatch() {
        let commands = vec![
            testutil::command(0x7777, &[0; 8]),
            testutil::command(0x7778, &[0; 24]),
        ];
        let mut reader = testutil::reader(testutil::image(&commands));
        let header = MachHeader64::parse(&mut reader).unwrap();

        let mut expected = 32u64;
        let mut index = 0;
        iterate_load_commands(&mut reader, &header, |reader, base| {
            // the previous command left the cursor exactly on this one
            assert_eq!(reader.position()?, expected);
            expected += base.cmdsize as u64;
            index += 1;
            reader.parse_record(8, |b| le_u64(b))
        })
        .unwrap();
        assert_eq!(index, 2);
        assert_eq!(reader.position().unwrap(), expected);
    }

    #[test]
    fn test_zero_cmdsize_is_rejected() {
        let mut cmd = testutil::command(0x19, &[0; 8]);
        testutil::put_u32(&mut cmd, 4, 0);
        assert!(matches!(
            parse_image(testutil::image(&[cmd])),
            Err(MachOErr::InvalidValue(_))
        ));
    }

    #[test]
    fn test_cmdsize_past_load_commands() {
        let mut cmd = testutil::command(0x7777, &[0; 8]);
        testutil::put_u32(&mut cmd, 4, 0x100);
        let mut image = testutil::image(&[cmd]);
        image.extend(vec![0; 0x200]);
        assert!(matches!(
            parse_image(image),
            Err(MachOErr::InvalidValue(_))
        ));
    }

    #[test]
    fn test_unknown_commands_are_kept_as_other() {
        let commands = vec![
            testutil::command(0x7777, &[0; 8]),
            // LC_SYMSEG has no decoder
            testutil::command(0x3, &[0; 8]),
        ];
        let cmds = parse_image(testutil::image(&commands)).unwrap();
        assert_eq!(cmds.len(), 2);
        assert!(matches!(cmds[0], LoadCommand::Other(LoadCommandBase { cmd: 0x7777, .. })));
        assert!(matches!(cmds[1], LoadCommand::Other(LoadCommandBase { cmd: 0x3, .. })));
    }

    #[test]
    fn test_dispatch_known_commands() {
        let mut uuid = Vec::new();
        uuid.extend(0x00112233_44556677_8899aabb_ccddeeffu128.to_le_bytes());
        let mut main = Vec::new();
        main.extend(0x4000u64.to_le_bytes());
        main.extend(0u64.to_le_bytes());
        let commands = vec![
            testutil::command(0x1b, &uuid),
            testutil::command(0x80000028, &main),
        ];
        let cmds = parse_image(testutil::image(&commands)).unwrap();
        assert!(matches!(cmds[0], LoadCommand::UUID(_)));
        match &cmds[1] {
            LoadCommand::Main(main) => assert_eq!(main.entryoff, 0x4000),
            other => panic!("unexpected {:?}", other),
        }
    }
}
