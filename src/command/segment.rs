use std::io::{Read, Seek};

use log::trace;
use nom::{
    bytes::complete::take,
    multi,
    number::complete::{le_u32, le_u64},
    sequence,
    IResult,
};
use num_derive::FromPrimitive;

use crate::{
    helpers::string_upto_null_terminator,
    macho::{MachOErr, MachOResult},
    reader::MachOReader,
};

use super::{LCLoadCommand, LoadCommandBase, LoadCommandParser};

bitflags::bitflags! {
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Protection: u32 {
        const NONE = 0x00;
        const READ = 0x01;
        const WRITE = 0x02;
        const EXECUTE = 0x04;
    }
}

impl Protection {
    pub fn parse(bytes: &[u8]) -> IResult<&[u8], Protection> {
        let (bytes, prot) = le_u32(bytes)?;
        Ok((bytes, Protection::from_bits_truncate(prot)))
    }

    /// `rwx` style, as otool prints it.
    pub fn rwx(&self) -> String {
        let mut s = String::with_capacity(3);
        s.push(if self.contains(Protection::READ) { 'r' } else { '-' });
        s.push(if self.contains(Protection::WRITE) { 'w' } else { '-' });
        s.push(if self.contains(Protection::EXECUTE) { 'x' } else { '-' });
        s
    }
}

bitflags::bitflags! {
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SGFlags: u32 {
        const HIGHVM = 0x1;
        const FVMLIB = 0x2;
        const NORELOC = 0x4;
        const PROTECTED_VERSION_1 = 0x8;
        const READ_ONLY = 0x10;
    }
}

impl SGFlags {
    pub fn parse(bytes: &[u8]) -> IResult<&[u8], SGFlags> {
        let (bytes, flags) = le_u32(bytes)?;
        Ok((bytes, SGFlags::from_bits_truncate(flags)))
    }
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum SectionType {
    SRegular = 0x0,
    SZeroFill = 0x1,
    SCstringLiterals = 0x2,
    S4ByteLiterals = 0x3,
    S8ByteLiterals = 0x4,
    SLiteralPointers = 0x5,
    SNonLazySymbolPointers = 0x6,
    SLazySymbolPointers = 0x7,
    SSymbolStubs = 0x8,
    SModInitFuncPointers = 0x9,
    SModTermFuncPointers = 0xa,
    SCoalesced = 0xb,
    SGbZeroFill = 0xc,
    SInterposing = 0xd,
    S16ByteLiterals = 0xe,
    SDtraceDof = 0xf,
    SLazyDylibSymbolPointers = 0x10,
    SThreadLocalRegular = 0x11,
    SThreadLocalZeroFill = 0x12,
    SThreadLocalVariables = 0x13,
    SThreadLocalVariablePointers = 0x14,
    SThreadLocalInitFunctionPointers = 0x15,
    SInitFuncOffsets = 0x16,
}

impl SectionType {
    pub const SECTION_TYPE_MASK: u32 = 0x000000ff;

    /// The type byte of a section's flags word.
    pub fn parse(bytes: &[u8]) -> IResult<&[u8], u32> {
        let (bytes, flags) = le_u32(bytes)?;
        Ok((bytes, flags & Self::SECTION_TYPE_MASK))
    }

    /// Zero-fill sections occupy address space but no file bytes.
    pub fn is_zerofill(self) -> bool {
        matches!(
            self,
            SectionType::SZeroFill | SectionType::SGbZeroFill | SectionType::SThreadLocalZeroFill
        )
    }
}

bitflags::bitflags! {
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectionAttributes: u32 {
        const PURE_INSTRUCTIONS = 0x80000000;
        const NO_TOC = 0x40000000;
        const STRIP_STATIC_SYMS = 0x20000000;
        const NO_DEAD_STRIP = 0x10000000;
        const LIVE_SUPPORT = 0x08000000;
        const SELF_MODIFYING_CODE = 0x04000000;
        const DEBUG = 0x02000000;
        const SOME_INSTRUCTIONS = 0x00000400;
        const EXT_RELOC = 0x00000200;
        const LOC_RELOC = 0x00000100;
    }
}

impl SectionAttributes {
    pub const SECTION_ATTRIBUTES_USR_MASK: u32 = 0xff000000;
    pub const SECTION_ATTRIBUTES_SYS_MASK: u32 = 0x00ffff00;
    pub const SECTION_ATTRIBUTES_MASK: u32 = SectionAttributes::SECTION_ATTRIBUTES_USR_MASK
        | SectionAttributes::SECTION_ATTRIBUTES_SYS_MASK;

    pub fn parse(bytes: &[u8]) -> IResult<&[u8], SectionAttributes> {
        let (bytes, secattrs) = le_u32(bytes)?;
        Ok((
            bytes,
            SectionAttributes::from_bits_truncate(secattrs & Self::SECTION_ATTRIBUTES_MASK),
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section64 {
    pub sectname: String,
    pub segname: String,
    pub addr: u64,
    pub size: u64,
    pub offset: u32,
    pub align: u32,
    pub reloff: u32,
    pub nreloc: u32,
    pub flags_sectype: u32,
    pub flags_secattrs: SectionAttributes,
    pub reserved1: u32,
    pub reserved2: u32,
    pub reserved3: u32,
    /// Raw contents, `None` for zero-fill sections.
    pub data: Option<Vec<u8>>,
}

impl Section64 {
    pub const SIZE: usize = 80;

    pub fn parse(bytes: &[u8]) -> IResult<&[u8], Self> {
        let (bytes, sectname) = take(16usize)(bytes)?;
        let (_, sectname) = string_upto_null_terminator(sectname)?;
        let (bytes, segname) = take(16usize)(bytes)?;
        let (_, segname) = string_upto_null_terminator(segname)?;

        let (bytes, (addr, size, offset, align, reloff, nreloc)) =
            sequence::tuple((le_u64, le_u64, le_u32, le_u32, le_u32, le_u32))(bytes)?;

        // Feed in the same word for these two
        let (_, flags_sectype) = SectionType::parse(bytes)?;
        let (bytes, flags_secattrs) = SectionAttributes::parse(bytes)?;

        let (bytes, (reserved1, reserved2, reserved3)) =
            sequence::tuple((le_u32, le_u32, le_u32))(bytes)?;

        Ok((
            bytes,
            Section64 {
                sectname,
                segname,
                addr,
                size,
                offset,
                align,
                reloff,
                nreloc,
                flags_sectype,
                flags_secattrs,
                reserved1,
                reserved2,
                reserved3,
                data: None,
            },
        ))
    }

    /// The named section type; unknown types are kept as the raw byte.
    pub fn section_type(&self) -> Option<SectionType> {
        num::FromPrimitive::from_u32(self.flags_sectype)
    }

    pub fn is_zerofill(&self) -> bool {
        self.section_type().is_some_and(SectionType::is_zerofill)
    }

    /// Copies the section's bytes out of the file. The cursor is left where
    /// it was.
    fn read_data<T: Read + Seek>(&mut self, reader: &mut MachOReader<T>) -> MachOResult<()> {
        if self.is_zerofill() {
            return Ok(());
        }
        let offset = self.offset as u64;
        reader.file().check("section data", offset, self.size)?;
        let size = usize::try_from(self.size)
            .map_err(|_| MachOErr::InvalidValue(format!("section size 0x{:x}", self.size)))?;

        trace!(
            "{},{}: {} bytes at 0x{:x}",
            self.segname,
            self.sectname,
            size,
            offset
        );
        self.data = Some(reader.detour(offset, |r| r.read_bytes(size))?);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentCommand64 {
    pub cmd: LCLoadCommand,
    pub cmdsize: u32,
    pub segname: String,
    pub vmaddr: u64,
    pub vmsize: u64,
    pub fileoff: u64,
    pub filesize: u64,
    pub maxprot: Protection,
    pub initprot: Protection,
    pub nsects: u32,
    pub flags: SGFlags,
    pub sections: Vec<Section64>,
}

impl SegmentCommand64 {
    pub const SIZE: u32 = 72;

    /// Reads the command, its section headers and the bytes of every
    /// section backed by the file.
    pub fn read<T: Read + Seek>(
        reader: &mut MachOReader<T>,
        base: LoadCommandBase,
    ) -> MachOResult<Self> {
        base.expect_size(Self::SIZE)?;
        let ldcmd = reader.read_bytes(base.cmdsize as usize)?;
        let mut seg = SegmentCommand64::parse(&ldcmd)?;

        for sect in seg.sections.iter_mut() {
            sect.read_data(reader)?;
        }
        Ok(seg)
    }

    /// The fixed part of the command; `sections` is left empty.
    fn parse_fixed(ldcmd: &[u8]) -> IResult<&[u8], Self> {
        let (cursor, (cmd, cmdsize)) = sequence::tuple((LCLoadCommand::parse, le_u32))(ldcmd)?;
        let (cursor, segname) = take(16usize)(cursor)?;
        let (_, segname) = string_upto_null_terminator(segname)?;

        let (cursor, (vmaddr, vmsize, fileoff, filesize)) =
            sequence::tuple((le_u64, le_u64, le_u64, le_u64))(cursor)?;

        let (cursor, (maxprot, initprot, nsects, flags)) =
            sequence::tuple((Protection::parse, Protection::parse, le_u32, SGFlags::parse))(
                cursor,
            )?;

        Ok((
            cursor,
            SegmentCommand64 {
                cmd,
                cmdsize,
                segname,
                vmaddr,
                vmsize,
                fileoff,
                filesize,
                maxprot,
                initprot,
                nsects,
                flags,
                sections: Vec::new(),
            },
        ))
    }
}

impl LoadCommandParser for SegmentCommand64 {
    fn parse(ldcmd: &[u8]) -> MachOResult<Self> {
        let (cursor, mut seg) = Self::parse_fixed(ldcmd)?;

        let needed = Self::SIZE as u64 + seg.nsects as u64 * Section64::SIZE as u64;
        if needed > ldcmd.len() as u64 {
            return Err(MachOErr::InvalidValue(format!(
                "segment {} claims {} sections but cmdsize is {}",
                seg.segname, seg.nsects, seg.cmdsize
            )));
        }

        let (_, sections) = multi::count(Section64::parse, seg.nsects as usize)(cursor)?;
        seg.sections = sections;
        Ok(seg)
    }
}
