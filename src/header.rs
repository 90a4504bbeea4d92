use std::io::{Read, Seek};

use nom::{number::complete::le_u32, sequence::tuple, IResult};
use nom_derive::{Nom, Parse};
use num_derive::FromPrimitive;
use strum_macros::Display;

use crate::{
    machine::{CpuSubType, CpuType},
    macho::{MachOErr, MachOResult},
    reader::{MachOReader, Region},
};

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Nom)]
pub enum MHMagic {
    // Big-endian machos don't really exist.
    MhMagic = 0xfeedface,
    MhMagic64 = 0xfeedfacf,
}

bitflags::bitflags! {
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MHFlags: u32 {
        const MH_NOUNDEFS = 0x1;
        const MH_INCRLINK = 0x2;
        const MH_DYLDLINK = 0x4;
        const MH_BINDATLOAD = 0x8;
        const MH_PREBOUND = 0x10;
        const MH_SPLIT_SEGS = 0x20;
        const MH_LAZY_INIT = 0x40;
        const MH_TWOLEVEL = 0x80;
        const MH_FORCE_FLAT = 0x100;
        const MH_NOMULTIDEFS = 0x200;
        const MH_NOFIXPREBINDING = 0x400;
        const MH_PREBINDABLE = 0x800;
        const MH_ALLMODSBOUND = 0x1000;
        const MH_SUBSECTIONS_VIA_SYMBOLS = 0x2000;
        const MH_CANONICAL = 0x4000;
        const MH_WEAK_DEFINES = 0x8000;
        const MH_BINDS_TO_WEAK = 0x10000;
        const MH_ALLOW_STACK_EXECUTION = 0x20000;
        const MH_ROOT_SAFE = 0x40000;
        const MH_SETUID_SAFE = 0x80000;
        const MH_NO_REEXPORTED_DYLIBS = 0x100000;
        const MH_PIE = 0x200000;
        const MH_DEAD_STRIPPABLE_DYLIB = 0x400000;
        const MH_HAS_TLV_DESCRIPTORS = 0x800000;
        const MH_NO_HEAP_EXECUTION = 0x1000000;
        const MH_APP_EXTENSION_SAFE = 0x02000000;
        const MH_NLIST_OUTOFSYNC_WITH_DYLDINFO = 0x04000000;
        const MH_SIM_SUPPORT = 0x08000000;
        const MH_IMPLICIT_PAGEZERO = 0x10000000;
        const MH_DYLIB_IN_CACHE = 0x80000000;
    }
}

impl MHFlags {
    pub fn parse(bytes: &[u8]) -> IResult<&[u8], MHFlags> {
        let (bytes, flags) = le_u32(bytes)?;
        Ok((bytes, MHFlags::from_bits_truncate(flags)))
    }
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, Display)]
pub enum MHFileType {
    MhObject = 0x1,
    MhExecute = 0x2,
    MhFvmlib = 0x3,
    MhCore = 0x4,
    MhPreload = 0x5,
    MhDylib = 0x6,
    MhDylinker = 0x7,
    MhBundle = 0x8,
    MhDylibStub = 0x9,
    MhDsym = 0xa,
    MhKextBundle = 0xb,
    MhFileset = 0xc,
    MhGpuExecute = 0xd,
    MhGpuDylib = 0xe,
    MhMetalLib = 0x262,
}

#[derive(Debug, Clone, Copy)]
pub struct MachHeader64 {
    pub magic: MHMagic,
    pub cputype: CpuType,
    pub cpusubtype: CpuSubType,
    pub filetype: u32,
    pub ncmds: u32,
    pub sizeofcmds: u32,
    pub flags: MHFlags,
    pub reserved: u32,
}

impl MachHeader64 {
    pub const SIZE: u8 = 32;

    fn parse_bytes(bytes: &[u8]) -> IResult<&[u8], MachHeader64> {
        let (bytes, (magic, cputype, cpusubtype)) =
            tuple((MHMagic::parse_le, CpuType::parse, CpuSubType::parse))(bytes)?;
        let (bytes, (filetype, ncmds, sizeofcmds)) = tuple((le_u32, le_u32, le_u32))(bytes)?;
        let (bytes, flags) = MHFlags::parse(bytes)?;
        let (bytes, reserved) = le_u32(bytes)?;

        Ok((
            bytes,
            MachHeader64 {
                magic,
                cputype,
                cpusubtype,
                filetype,
                ncmds,
                sizeofcmds,
                flags,
                reserved,
            },
        ))
    }

    /// Validates the magic and decodes the header at the start of the file,
    /// leaving the cursor on the first load command.
    pub fn parse<T: Read + Seek>(reader: &mut MachOReader<T>) -> MachOResult<MachHeader64> {
        reader.seek_to(0)?;
        let magic = reader.peek_record(4, |b| le_u32(b))?;
        if magic != MHMagic::MhMagic64 as u32 {
            return Err(MachOErr::BadMagic(magic));
        }

        let header = reader.parse_record(Self::SIZE as usize, Self::parse_bytes)?;
        reader
            .file()
            .check("load commands", Self::SIZE as u64, header.sizeofcmds as u64)?;
        Ok(header)
    }

    /// The named file type, if the table has one for `filetype`.
    pub fn file_type(&self) -> Option<MHFileType> {
        num::FromPrimitive::from_u32(self.filetype)
    }

    /// Where the load commands live in the file.
    pub fn commands_region(&self) -> Region {
        Region::new(Self::SIZE as u64, self.sizeofcmds as u64)
    }
}
