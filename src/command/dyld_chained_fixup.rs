use std::io::{Read, Seek};

use bitfield::bitfield;
use log::{debug, trace};
use nom::{
    error::{Error, ErrorKind},
    multi,
    number::complete::{le_u16, le_u32, le_u64},
    sequence,
    Err::Failure,
    IResult,
};
use num_derive::FromPrimitive;
use strum_macros::Display;

use crate::{
    macho::{MachOErr, MachOResult},
    reader::{MachOReader, Region},
};

use super::{linkedit_data::LinkeditDataCommand, LoadCommandBase};

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum DyldFixupPACKey {
    IA = 0,
    IB = 1,
    DA = 2,
    DB = 3,
}

impl DyldFixupPACKey {
    fn from_bits(key: u64) -> Self {
        match key & 0x3 {
            0 => DyldFixupPACKey::IA,
            1 => DyldFixupPACKey::IB,
            2 => DyldFixupPACKey::DA,
            _ => DyldFixupPACKey::DB,
        }
    }
}

bitfield! {
    pub struct DyldChainedPtrArm64eRebaseBF(u64);
    impl Debug;
    pub target, set_target: 42, 0;
    pub high8, set_high8: 50, 43;
    pub next, set_next: 61, 51;
    pub bind, set_bind: 62;
    pub auth, set_auth: 63;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DyldChainedPtrArm64eRebase {
    pub target: u64,
    pub high8: u8,
    pub next: u16,
}

impl DyldChainedPtrArm64eRebase {
    pub fn parse(raw: u64) -> Self {
        let bf = DyldChainedPtrArm64eRebaseBF(raw);
        DyldChainedPtrArm64eRebase {
            target: bf.target(),
            high8: bf.high8() as u8,
            next: bf.next() as u16,
        }
    }
}

bitfield! {
    pub struct DyldChainedPtrArm64eBindBF(u64);
    impl Debug;
    pub ordinal, set_ordinal: 15, 0;
    pub zero, set_zero: 31, 16;
    pub addend, set_addend: 50, 32;
    pub next, set_next: 61, 51;
    pub bind, set_bind: 62;
    pub auth, set_auth: 63;
}

bitfield! {
    pub struct DyldChainedPtrArm64eBind24BF(u64);
    impl Debug;
    pub ordinal, set_ordinal: 23, 0;
    pub zero, set_zero: 31, 24;
    pub addend, set_addend: 50, 32;
    pub next, set_next: 61, 51;
    pub bind, set_bind: 62;
    pub auth, set_auth: 63;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DyldChainedPtrArm64eBind {
    pub ordinal: u32,
    pub addend: i32,
    pub next: u16,
}

impl DyldChainedPtrArm64eBind {
    /// The addend is a signed 19-bit field.
    fn sign_extend_addend(addend: u64) -> i32 {
        (((addend << 45) as i64) >> 45) as i32
    }

    pub fn parse(raw: u64) -> Self {
        let bf = DyldChainedPtrArm64eBindBF(raw);
        DyldChainedPtrArm64eBind {
            ordinal: bf.ordinal() as u32,
            addend: Self::sign_extend_addend(bf.addend()),
            next: bf.next() as u16,
        }
    }

    pub fn parse24(raw: u64) -> Self {
        let bf = DyldChainedPtrArm64eBind24BF(raw);
        DyldChainedPtrArm64eBind {
            ordinal: bf.ordinal() as u32,
            addend: Self::sign_extend_addend(bf.addend()),
            next: bf.next() as u16,
        }
    }
}

bitfield! {
    pub struct DyldChainedPtrArm64eAuthRebaseBF(u64);
    impl Debug;
    pub target, set_target: 31, 0;
    pub diversity, set_diversity: 47, 32;
    pub addr_div, set_addr_div: 48;
    pub key, set_key: 50, 49;
    pub next, set_next: 61, 51;
    pub bind, set_bind: 62;
    pub auth, set_auth: 63;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DyldChainedPtrArm64eAuthRebase {
    pub target: u32,
    pub diversity: u16,
    pub addr_div: bool,
    pub key: DyldFixupPACKey,
    pub next: u16,
}

impl DyldChainedPtrArm64eAuthRebase {
    pub fn parse(raw: u64) -> Self {
        let bf = DyldChainedPtrArm64eAuthRebaseBF(raw);
        DyldChainedPtrArm64eAuthRebase {
            target: bf.target() as u32,
            diversity: bf.diversity() as u16,
            addr_div: bf.addr_div(),
            key: DyldFixupPACKey::from_bits(bf.key()),
            next: bf.next() as u16,
        }
    }
}

bitfield! {
    pub struct DyldChainedPtrArm64eAuthBindBF(u64);
    impl Debug;
    pub ordinal, set_ordinal: 15, 0;
    pub zero, set_zero: 31, 16;
    pub diversity, set_diversity: 47, 32;
    pub addr_div, set_addr_div: 48;
    pub key, set_key: 50, 49;
    pub next, set_next: 61, 51;
    pub bind, set_bind: 62;
    pub auth, set_auth: 63;
}

bitfield! {
    pub struct DyldChainedPtrArm64eAuthBind24BF(u64);
    impl Debug;
    pub ordinal, set_ordinal: 23, 0;
    pub zero, set_zero: 31, 24;
    pub diversity, set_diversity: 47, 32;
    pub addr_div, set_addr_div: 48;
    pub key, set_key: 50, 49;
    pub next, set_next: 61, 51;
    pub bind, set_bind: 62;
    pub auth, set_auth: 63;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DyldChainedPtrArm64eAuthBind {
    pub ordinal: u32,
    pub diversity: u16,
    pub addr_div: bool,
    pub key: DyldFixupPACKey,
    pub next: u16,
}

impl DyldChainedPtrArm64eAuthBind {
    pub fn parse(raw: u64) -> Self {
        let bf = DyldChainedPtrArm64eAuthBindBF(raw);
        DyldChainedPtrArm64eAuthBind {
            ordinal: bf.ordinal() as u32,
            diversity: bf.diversity() as u16,
            addr_div: bf.addr_div(),
            key: DyldFixupPACKey::from_bits(bf.key()),
            next: bf.next() as u16,
        }
    }

    pub fn parse24(raw: u64) -> Self {
        let bf = DyldChainedPtrArm64eAuthBind24BF(raw);
        DyldChainedPtrArm64eAuthBind {
            ordinal: bf.ordinal() as u32,
            diversity: bf.diversity() as u16,
            addr_div: bf.addr_div(),
            key: DyldFixupPACKey::from_bits(bf.key()),
            next: bf.next() as u16,
        }
    }
}

bitfield! {
    pub struct DyldChainedPtr64RebaseBF(u64);
    impl Debug;
    pub target, set_target: 35, 0;
    pub high8, set_high8: 43, 36;
    pub reserved, set_reserved: 50, 44;
    pub next, set_next: 62, 51;
    pub bind, set_bind: 63;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DyldChainedPtr64Rebase {
    pub target: u64,
    pub high8: u8,
    pub next: u16,
}

impl DyldChainedPtr64Rebase {
    pub fn parse(raw: u64) -> Self {
        let bf = DyldChainedPtr64RebaseBF(raw);
        DyldChainedPtr64Rebase {
            target: bf.target(),
            high8: bf.high8() as u8,
            next: bf.next() as u16,
        }
    }
}

bitfield! {
    pub struct DyldChainedPtr64BindBF(u64);
    impl Debug;
    pub ordinal, set_ordinal: 23, 0;
    pub addend, set_addend: 31, 24;
    pub reserved, set_reserved: 50, 32;
    pub next, set_next: 62, 51;
    pub bind, set_bind: 63;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DyldChainedPtr64Bind {
    pub ordinal: u32,
    pub addend: u8,
    pub next: u16,
}

impl DyldChainedPtr64Bind {
    pub fn parse(raw: u64) -> Self {
        let bf = DyldChainedPtr64BindBF(raw);
        DyldChainedPtr64Bind {
            ordinal: bf.ordinal() as u32,
            addend: bf.addend() as u8,
            next: bf.next() as u16,
        }
    }
}

bitfield! {
    pub struct DyldChainedPtr64KernelCacheRebaseBF(u64);
    impl Debug;
    pub target, set_target: 29, 0;
    pub cache_level, set_cache_level: 31, 30;
    pub diversity, set_diversity: 47, 32;
    pub addr_div, set_addr_div: 48;
    pub key, set_key: 50, 49;
    pub next, set_next: 62, 51;
    pub is_auth, set_is_auth: 63;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DyldChainedPtr64KernelCacheRebase {
    pub target: u32,
    pub cache_level: u8,
    pub diversity: u16,
    pub addr_div: bool,
    pub key: DyldFixupPACKey,
    pub next: u16,
    pub is_auth: bool,
}

impl DyldChainedPtr64KernelCacheRebase {
    pub fn parse(raw: u64) -> Self {
        let bf = DyldChainedPtr64KernelCacheRebaseBF(raw);
        DyldChainedPtr64KernelCacheRebase {
            target: bf.target() as u32,
            cache_level: bf.cache_level() as u8,
            diversity: bf.diversity() as u16,
            addr_div: bf.addr_div(),
            key: DyldFixupPACKey::from_bits(bf.key()),
            next: bf.next() as u16,
            is_auth: bf.is_auth(),
        }
    }
}

/// One decoded chain entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DyldPointerFixup {
    Ptr64Rebase(DyldChainedPtr64Rebase),
    Ptr64Bind(DyldChainedPtr64Bind),
    Ptr64KernelCacheRebase(DyldChainedPtr64KernelCacheRebase),
    Arm64eRebase(DyldChainedPtrArm64eRebase),
    Arm64eAuthRebase(DyldChainedPtrArm64eAuthRebase),
    Arm64eBind(DyldChainedPtrArm64eBind),
    Arm64eAuthBind(DyldChainedPtrArm64eAuthBind),
}

impl DyldPointerFixup {
    pub fn is_bind(&self) -> bool {
        self.bind_ordinal().is_some()
    }

    pub fn bind_ordinal(&self) -> Option<u64> {
        match self {
            DyldPointerFixup::Ptr64Bind(fixup) => Some(fixup.ordinal as u64),
            DyldPointerFixup::Arm64eBind(fixup) => Some(fixup.ordinal as u64),
            DyldPointerFixup::Arm64eAuthBind(fixup) => Some(fixup.ordinal as u64),
            _ => None,
        }
    }

    /// Distance to the next entry in units of the format's stride; 0 ends
    /// the chain.
    pub fn next(&self) -> u64 {
        let next = match self {
            DyldPointerFixup::Ptr64Rebase(fixup) => fixup.next,
            DyldPointerFixup::Ptr64Bind(fixup) => fixup.next,
            DyldPointerFixup::Ptr64KernelCacheRebase(fixup) => fixup.next,
            DyldPointerFixup::Arm64eRebase(fixup) => fixup.next,
            DyldPointerFixup::Arm64eAuthRebase(fixup) => fixup.next,
            DyldPointerFixup::Arm64eBind(fixup) => fixup.next,
            DyldPointerFixup::Arm64eAuthBind(fixup) => fixup.next,
        };
        next as u64
    }

    fn parse_ptr64(raw: u64) -> Self {
        if (raw >> 63) & 1 == 1 {
            DyldPointerFixup::Ptr64Bind(DyldChainedPtr64Bind::parse(raw))
        } else {
            DyldPointerFixup::Ptr64Rebase(DyldChainedPtr64Rebase::parse(raw))
        }
    }

    fn parse_arm64e(raw: u64, wide_ordinals: bool) -> Self {
        let is_bind = (raw >> 62) & 1 == 1;
        let is_auth = (raw >> 63) & 1 == 1;

        match (is_bind, is_auth) {
            (true, true) if wide_ordinals => {
                DyldPointerFixup::Arm64eAuthBind(DyldChainedPtrArm64eAuthBind::parse24(raw))
            }
            (true, true) => DyldPointerFixup::Arm64eAuthBind(DyldChainedPtrArm64eAuthBind::parse(raw)),
            (true, false) if wide_ordinals => {
                DyldPointerFixup::Arm64eBind(DyldChainedPtrArm64eBind::parse24(raw))
            }
            (true, false) => DyldPointerFixup::Arm64eBind(DyldChainedPtrArm64eBind::parse(raw)),
            (false, true) => {
                DyldPointerFixup::Arm64eAuthRebase(DyldChainedPtrArm64eAuthRebase::parse(raw))
            }
            (false, false) => DyldPointerFixup::Arm64eRebase(DyldChainedPtrArm64eRebase::parse(raw)),
        }
    }
}

#[repr(u16)]
#[derive(Debug, FromPrimitive, Display, Clone, Copy, PartialEq, Eq)]
pub enum DyldPointerFormat {
    #[strum(serialize = "DYLD_CHAINED_PTR_ARM64E")]
    Arm64e = 1,
    #[strum(serialize = "DYLD_CHAINED_PTR_64")]
    Ptr64 = 2,
    #[strum(serialize = "DYLD_CHAINED_PTR_32")]
    Ptr32 = 3,
    #[strum(serialize = "DYLD_CHAINED_PTR_32_CACHE")]
    Ptr32Cache = 4,
    #[strum(serialize = "DYLD_CHAINED_PTR_32_FIRMWARE")]
    Ptr32Firmware = 5,
    #[strum(serialize = "DYLD_CHAINED_PTR_64_OFFSET")]
    Ptr64Offset = 6,
    #[strum(serialize = "DYLD_CHAINED_PTR_ARM64E_KERNEL")]
    Arm64eKernel = 7,
    #[strum(serialize = "DYLD_CHAINED_PTR_64_KERNEL_CACHE")]
    Ptr64KernelCache = 8,
    #[strum(serialize = "DYLD_CHAINED_PTR_ARM64E_USERLAND")]
    Arm64eUserland = 9,
    #[strum(serialize = "DYLD_CHAINED_PTR_ARM64E_FIRMWARE")]
    Arm64eFirmware = 10,
    #[strum(serialize = "DYLD_CHAINED_PTR_X86_64_KERNEL_CACHE")]
    X86_64KernelCache = 11,
    #[strum(serialize = "DYLD_CHAINED_PTR_ARM64E_USERLAND24")]
    Arm64eUserland24 = 12,
    #[strum(serialize = "DYLD_CHAINED_PTR_ARM64E_SHARED_CACHE")]
    Arm64eSharedCache = 13,
}

impl DyldPointerFormat {
    pub fn parse(bytes: &[u8]) -> IResult<&[u8], DyldPointerFormat> {
        let (bytes, value) = le_u16(bytes)?;
        match num::FromPrimitive::from_u16(value) {
            Some(format) => Ok((bytes, format)),
            None => Err(Failure(Error::new(bytes, ErrorKind::Tag))),
        }
    }

    /// Bytes per unit of `next`.
    pub fn stride(self) -> u64 {
        match self {
            DyldPointerFormat::Arm64e => 8,
            DyldPointerFormat::Arm64eUserland24 => 8,
            DyldPointerFormat::Arm64eUserland => 8,
            DyldPointerFormat::Arm64eSharedCache => 8,
            DyldPointerFormat::Ptr64 => 4,
            DyldPointerFormat::Ptr32 => 4,
            DyldPointerFormat::Ptr32Cache => 4,
            DyldPointerFormat::Ptr32Firmware => 4,
            DyldPointerFormat::Ptr64Offset => 4,
            DyldPointerFormat::Arm64eKernel => 4,
            DyldPointerFormat::Ptr64KernelCache => 4,
            DyldPointerFormat::Arm64eFirmware => 4,
            DyldPointerFormat::X86_64KernelCache => 1,
        }
    }

    /// Classifies one raw 64-bit chain entry.
    pub fn decode(self, raw: u64) -> MachOResult<DyldPointerFixup> {
        match self {
            DyldPointerFormat::Ptr64 | DyldPointerFormat::Ptr64Offset => {
                Ok(DyldPointerFixup::parse_ptr64(raw))
            }
            DyldPointerFormat::Ptr64KernelCache | DyldPointerFormat::X86_64KernelCache => Ok(
                DyldPointerFixup::Ptr64KernelCacheRebase(DyldChainedPtr64KernelCacheRebase::parse(
                    raw,
                )),
            ),
            DyldPointerFormat::Arm64e
            | DyldPointerFormat::Arm64eUserland
            | DyldPointerFormat::Arm64eKernel
            | DyldPointerFormat::Arm64eFirmware => Ok(DyldPointerFixup::parse_arm64e(raw, false)),
            DyldPointerFormat::Arm64eUserland24 => Ok(DyldPointerFixup::parse_arm64e(raw, true)),
            DyldPointerFormat::Ptr32
            | DyldPointerFormat::Ptr32Cache
            | DyldPointerFormat::Ptr32Firmware
            | DyldPointerFormat::Arm64eSharedCache => Err(MachOErr::Unsupported(format!(
                "pointer format {}",
                self
            ))),
        }
    }
}

#[derive(Debug, FromPrimitive, Clone, Copy, PartialEq, Eq)]
pub enum DyldSymbolsFormat {
    Uncompressed = 0,
    Zlib = 1,
}

impl DyldSymbolsFormat {
    pub fn parse(bytes: &[u8]) -> IResult<&[u8], DyldSymbolsFormat> {
        let (bytes, value) = le_u32(bytes)?;
        match num::FromPrimitive::from_u32(value) {
            Some(format) => Ok((bytes, format)),
            None => Err(Failure(Error::new(bytes, ErrorKind::Tag))),
        }
    }
}

#[derive(Debug, FromPrimitive, Display, Clone, Copy, PartialEq, Eq)]
pub enum DyldImportFormat {
    #[strum(serialize = "DYLD_CHAINED_IMPORT")]
    Import = 1,
    #[strum(serialize = "DYLD_CHAINED_IMPORT_ADDEND")]
    ImportAddend = 2,
    #[strum(serialize = "DYLD_CHAINED_IMPORT_ADDEND64")]
    ImportAddend64 = 3,
}

impl DyldImportFormat {
    pub fn parse(bytes: &[u8]) -> IResult<&[u8], DyldImportFormat> {
        let (bytes, value) = le_u32(bytes)?;
        match num::FromPrimitive::from_u32(value) {
            Some(format) => Ok((bytes, format)),
            None => Err(Failure(Error::new(bytes, ErrorKind::Tag))),
        }
    }

    /// Size of one entry in the imports table.
    pub fn size(self) -> usize {
        match self {
            DyldImportFormat::Import => 4,
            DyldImportFormat::ImportAddend => 8,
            DyldImportFormat::ImportAddend64 => 16,
        }
    }
}

bitfield! {
    pub struct DyldChainedImportBF(u32);
    impl Debug;
    u32;
    pub lib_ordinal, set_lib_ordinal: 7, 0;
    pub weak_import, set_weak_import: 8;
    pub name_offset, set_name_offset: 31, 9;
}

bitfield! {
    pub struct DyldChainedImport64BF(u64);
    impl Debug;
    u64;
    pub lib_ordinal, set_lib_ordinal: 15, 0;
    pub weak_import, set_weak_import: 16;
    pub reserved, set_reserved: 31, 17;
    pub name_offset, set_name_offset: 63, 32;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DyldChainedImport {
    pub lib_ordinal: u16,
    pub weak_import: bool,
    pub name_offset: u32,
    pub addend: i64,
    pub name: String,
}

impl DyldChainedImport {
    /// Decodes one imports-table entry; `name` is filled in by the caller.
    pub fn parse(bytes: &[u8], format: DyldImportFormat) -> IResult<&[u8], DyldChainedImport> {
        match format {
            DyldImportFormat::Import | DyldImportFormat::ImportAddend => {
                let (mut bytes, value) = le_u32(bytes)?;
                let bf = DyldChainedImportBF(value);
                let mut addend = 0;
                if format == DyldImportFormat::ImportAddend {
                    let (rest, value) = le_u32(bytes)?;
                    bytes = rest;
                    addend = value as i32 as i64;
                }
                Ok((
                    bytes,
                    DyldChainedImport {
                        lib_ordinal: bf.lib_ordinal() as u16,
                        weak_import: bf.weak_import(),
                        name_offset: bf.name_offset(),
                        addend,
                        name: String::new(),
                    },
                ))
            }
            DyldImportFormat::ImportAddend64 => {
                let (bytes, (value, addend)) = sequence::tuple((le_u64, le_u64))(bytes)?;
                let bf = DyldChainedImport64BF(value);
                Ok((
                    bytes,
                    DyldChainedImport {
                        lib_ordinal: bf.lib_ordinal() as u16,
                        weak_import: bf.weak_import(),
                        name_offset: bf.name_offset() as u32,
                        addend: addend as i64,
                        name: String::new(),
                    },
                ))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DyldChainedFixupsHeader {
    pub fixups_version: u32,
    pub starts_offset: u32,
    pub imports_offset: u32,
    pub symbols_offset: u32,
    pub imports_count: u32,
    pub imports_format: DyldImportFormat,
    pub symbols_format: DyldSymbolsFormat,
}

impl DyldChainedFixupsHeader {
    pub const SIZE: u64 = 28;

    pub fn parse(bytes: &[u8]) -> IResult<&[u8], DyldChainedFixupsHeader> {
        let (bytes, (fixups_version, starts_offset, imports_offset, symbols_offset, imports_count)) =
            sequence::tuple((le_u32, le_u32, le_u32, le_u32, le_u32))(bytes)?;
        let (bytes, imports_format) = DyldImportFormat::parse(bytes)?;
        let (bytes, symbols_format) = DyldSymbolsFormat::parse(bytes)?;

        Ok((
            bytes,
            DyldChainedFixupsHeader {
                fixups_version,
                starts_offset,
                imports_offset,
                symbols_offset,
                imports_count,
                imports_format,
                symbols_format,
            },
        ))
    }

    /// Looks up import `ordinal` and its name inside `blob`. The cursor is
    /// left where it was.
    fn import<T: Read + Seek>(
        &self,
        reader: &mut MachOReader<T>,
        blob: Region,
        ordinal: u64,
    ) -> MachOResult<DyldChainedImport> {
        if ordinal >= self.imports_count as u64 {
            return Err(MachOErr::ImportOrdinal {
                ordinal,
                count: self.imports_count,
            });
        }

        let format = self.imports_format;
        let size = format.size();
        let offset = blob.start + self.imports_offset as u64 + ordinal * size as u64;
        blob.check("chained import", offset, size as u64)?;
        let mut import = reader.detour(offset, |r| {
            r.parse_record(size, |b| DyldChainedImport::parse(b, format))
        })?;

        let name = blob.start + self.symbols_offset as u64 + import.name_offset as u64;
        blob.check_position("import name", name)?;
        import.name = reader.detour(name, |r| r.read_cstring(blob.end))?;
        Ok(import)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DyldStartsInSegment {
    pub size: u32,
    pub page_size: u16,
    pub pointer_format: DyldPointerFormat,
    pub segment_offset: u64,
    pub max_valid_pointer: u32,
    pub page_count: u16,
    pub page_start: Vec<u16>,
}

impl DyldStartsInSegment {
    pub const SIZE: u64 = 22;
    pub const DYLD_CHAINED_PTR_START_NONE: u16 = 0xffff;
    pub const DYLD_CHAINED_PTR_START_MULTI: u16 = 0x8000;

    fn parse_fixed(bytes: &[u8]) -> IResult<&[u8], DyldStartsInSegment> {
        let (bytes, size) = le_u32(bytes)?;
        let (bytes, page_size) = le_u16(bytes)?;
        let (bytes, pointer_format) = DyldPointerFormat::parse(bytes)?;
        let (bytes, segment_offset) = le_u64(bytes)?;
        let (bytes, max_valid_pointer) = le_u32(bytes)?;
        let (bytes, page_count) = le_u16(bytes)?;

        Ok((
            bytes,
            DyldStartsInSegment {
                size,
                page_size,
                pointer_format,
                segment_offset,
                max_valid_pointer,
                page_count,
                page_start: Vec::new(),
            },
        ))
    }

    fn read<T: Read + Seek>(
        reader: &mut MachOReader<T>,
        blob: Region,
        offset: u64,
    ) -> MachOResult<Self> {
        blob.check("chained starts in segment", offset, Self::SIZE)?;
        reader.seek_to(offset)?;
        let mut starts = reader.parse_record(Self::SIZE as usize, |b| Self::parse_fixed(b))?;

        let count = starts.page_count as usize;
        blob.check("page starts", offset + Self::SIZE, count as u64 * 2)?;
        starts.page_start = reader.parse_record(count * 2, |b| multi::count(le_u16, count)(b))?;
        Ok(starts)
    }

    /// File range covered by page `index`.
    pub fn page(&self, index: usize) -> Region {
        let page_size = self.page_size as u64;
        Region::new(
            self.segment_offset.saturating_add(index as u64 * page_size),
            page_size,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DyldFixup {
    /// File offset of the entry.
    pub offset: u64,
    pub pointer: DyldPointerFixup,
    /// The resolved import for bind entries.
    pub import: Option<DyldChainedImport>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DyldPageFixups {
    pub page_index: usize,
    pub page_start: u16,
    pub fixups: Vec<DyldFixup>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DyldSegmentFixups {
    pub seg_index: usize,
    pub starts: DyldStartsInSegment,
    pub pages: Vec<DyldPageFixups>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DyldChainedFixups {
    pub header: DyldChainedFixupsHeader,
    pub seg_info_offset: Vec<u32>,
    pub segments: Vec<DyldSegmentFixups>,
}

impl DyldChainedFixups {
    /// Walks every chain described by the blob at `cmd.dataoff`. The cursor
    /// ends up anywhere; callers wrap this in a detour.
    pub fn parse<T: Read + Seek>(
        reader: &mut MachOReader<T>,
        cmd: &LinkeditDataCommand,
    ) -> MachOResult<Self> {
        let blob = cmd.data();
        reader.file().check("chained fixups", blob.start, blob.len())?;

        blob.check("chained fixups header", blob.start, DyldChainedFixupsHeader::SIZE)?;
        reader.seek_to(blob.start)?;
        let header = reader.parse_record(DyldChainedFixupsHeader::SIZE as usize, |b| {
            DyldChainedFixupsHeader::parse(b)
        })?;
        debug!(
            "chained fixups v{}: {} imports ({}), starts at +0x{:x}",
            header.fixups_version, header.imports_count, header.imports_format, header.starts_offset
        );
        if header.symbols_format == DyldSymbolsFormat::Zlib {
            return Err(MachOErr::Unsupported(
                "zlib-compressed chained fixup symbols".to_string(),
            ));
        }

        let image = blob.start + header.starts_offset as u64;
        blob.check("chained starts in image", image, 4)?;
        reader.seek_to(image)?;
        let seg_count = reader.parse_record(4, |b| le_u32(b))? as usize;
        blob.check("chained starts in image", image + 4, seg_count as u64 * 4)?;
        let seg_info_offset =
            reader.parse_record(seg_count * 4, |b| multi::count(le_u32, seg_count)(b))?;

        let mut segments = Vec::new();
        for (seg_index, seg_offset) in seg_info_offset.iter().enumerate() {
            if *seg_offset == 0 {
                trace!("segment {} has no fixups", seg_index);
                continue;
            }

            let starts = DyldStartsInSegment::read(reader, blob, image + *seg_offset as u64)?;
            debug!(
                "segment {}: {} pages of 0x{:x} at 0x{:x}, {}",
                seg_index,
                starts.page_count,
                starts.page_size,
                starts.segment_offset,
                starts.pointer_format
            );

            let mut pages = Vec::with_capacity(starts.page_start.len());
            for (page_index, page_start) in starts.page_start.iter().enumerate() {
                let fixups = walk_page(reader, blob, &header, &starts, page_index, *page_start)?;
                pages.push(DyldPageFixups {
                    page_index,
                    page_start: *page_start,
                    fixups,
                });
            }

            segments.push(DyldSegmentFixups {
                seg_index,
                starts,
                pages,
            });
        }

        Ok(DyldChainedFixups {
            header,
            seg_info_offset,
            segments,
        })
    }

    pub fn fixup_count(&self) -> usize {
        self.segments
            .iter()
            .flat_map(|seg| seg.pages.iter())
            .map(|page| page.fixups.len())
            .sum()
    }
}

/// Follows one page's chain until an entry with `next == 0`.
fn walk_page<T: Read + Seek>(
    reader: &mut MachOReader<T>,
    blob: Region,
    header: &DyldChainedFixupsHeader,
    starts: &DyldStartsInSegment,
    page_index: usize,
    page_start: u16,
) -> MachOResult<Vec<DyldFixup>> {
    if page_start == DyldStartsInSegment::DYLD_CHAINED_PTR_START_NONE {
        return Ok(Vec::new());
    }
    if page_start & DyldStartsInSegment::DYLD_CHAINED_PTR_START_MULTI != 0 {
        return Err(MachOErr::Unsupported(format!(
            "multiple chain starts on page {}",
            page_index
        )));
    }

    let page = starts.page(page_index);
    let stride = starts.pointer_format.stride();
    let mut offset = page.start + page_start as u64;
    let mut fixups = Vec::new();

    loop {
        page.check("chain entry", offset, 8)?;
        reader.seek_to(offset)?;
        let raw = reader.parse_record(8, |b| le_u64(b))?;
        let pointer = starts.pointer_format.decode(raw)?;

        let import = match pointer.bind_ordinal() {
            Some(ordinal) => Some(header.import(reader, blob, ordinal)?),
            None => None,
        };
        trace!("0x{:x}: {:x?} {:?}", offset, pointer, import);

        let next = pointer.next();
        fixups.push(DyldFixup {
            offset,
            pointer,
            import,
        });
        if next == 0 {
            break;
        }
        offset += next * stride;
    }

    Ok(fixups)
}

/// `LC_DYLD_CHAINED_FIXUPS` together with everything its chains resolve to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DyldChainedFixupCommand {
    pub cmd: LinkeditDataCommand,
    pub fixups: DyldChainedFixups,
}

impl DyldChainedFixupCommand {
    /// Reads the command record and walks the fixups. On return the cursor
    /// sits just past the 16-byte record, also when the walk fails.
    pub fn read<T: Read + Seek>(
        reader: &mut MachOReader<T>,
        base: LoadCommandBase,
    ) -> MachOResult<Self> {
        let cmd = LinkeditDataCommand::read(reader, base)?;
        let resume = reader.position()?;
        let fixups = reader.detour(resume, |r| DyldChainedFixups::parse(r, &cmd))?;

        Ok(DyldChainedFixupCommand { cmd, fixups })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    const DATAOFF: usize = 0x400;
    const DATASIZE: usize = 0xa0;
    const PAGE0: u64 = 0x100;

    fn ptr64_rebase(target: u64, high8: u64, next: u64) -> u64 {
        let mut bf = DyldChainedPtr64RebaseBF(0);
        bf.set_target(target);
        bf.set_high8(high8);
        bf.set_next(next);
        bf.0
    }

    fn ptr64_bind(ordinal: u64, addend: u64, next: u64) -> u64 {
        let mut bf = DyldChainedPtr64BindBF(0);
        bf.set_ordinal(ordinal);
        bf.set_addend(addend);
        bf.set_next(next);
        bf.set_bind(true);
        bf.0
    }

    /// A header, one LC_DYLD_CHAINED_FIXUPS and two 0x100-byte pages at
    /// 0x100. The blob at 0x400 holds the header, starts-in-image at +0x20,
    /// one starts-in-segment at +0x30, two imports at +0x60 and the symbol
    /// pool `"\0_printf\0_malloc\0"` at +0x80.
    struct Fixture {
        seg_offsets: Vec<u32>,
        page_starts: Vec<u16>,
        pointer_format: u16,
        imports_format: u32,
        chain: Vec<(u64, u64)>,
    }

    impl Default for Fixture {
        fn default() -> Self {
            Fixture {
                seg_offsets: vec![0, 0x10, 0],
                page_starts: vec![0x10, DyldStartsInSegment::DYLD_CHAINED_PTR_START_NONE],
                pointer_format: 6,
                imports_format: 1,
                chain: Vec::new(),
            }
        }
    }

    impl Fixture {
        fn image(&self) -> Vec<u8> {
            let mut payload = (DATAOFF as u32).to_le_bytes().to_vec();
            payload.extend((DATASIZE as u32).to_le_bytes());
            let mut image = testutil::image(&[testutil::command(0x80000034, &payload)]);
            image.resize(DATAOFF + DATASIZE, 0);

            for (offset, raw) in &self.chain {
                testutil::put_u64(&mut image, *offset as usize, *raw);
            }

            let blob = &mut image[DATAOFF..];
            testutil::put_u32(blob, 0x04, 0x20);
            testutil::put_u32(blob, 0x08, 0x60);
            testutil::put_u32(blob, 0x0c, 0x80);
            testutil::put_u32(blob, 0x10, 2);
            testutil::put_u32(blob, 0x14, self.imports_format);

            testutil::put_u32(blob, 0x20, self.seg_offsets.len() as u32);
            for (i, offset) in self.seg_offsets.iter().enumerate() {
                testutil::put_u32(blob, 0x24 + 4 * i, *offset);
            }

            testutil::put_u32(blob, 0x30, 24);
            testutil::put_u16(blob, 0x34, 0x100);
            testutil::put_u16(blob, 0x36, self.pointer_format);
            testutil::put_u64(blob, 0x38, PAGE0);
            testutil::put_u16(blob, 0x44, self.page_starts.len() as u16);
            for (i, start) in self.page_starts.iter().enumerate() {
                testutil::put_u16(blob, 0x46 + 2 * i, *start);
            }

            // (lib_ordinal, weak, name_offset)
            let imports = [(1u64, false, 1u64), (2, true, 9)];
            for (i, (lib, weak, name)) in imports.iter().enumerate() {
                match self.imports_format {
                    1 | 2 => {
                        let mut bf = DyldChainedImportBF(0);
                        bf.set_lib_ordinal(*lib as u32);
                        bf.set_weak_import(*weak);
                        bf.set_name_offset(*name as u32);
                        let size = if self.imports_format == 1 { 4 } else { 8 };
                        testutil::put_u32(blob, 0x60 + size * i, bf.0);
                        if self.imports_format == 2 {
                            testutil::put_u32(blob, 0x64 + size * i, (-16i32) as u32);
                        }
                    }
                    _ => {
                        let mut bf = DyldChainedImport64BF(0);
                        bf.set_lib_ordinal(*lib);
                        bf.set_weak_import(*weak);
                        bf.set_name_offset(*name);
                        testutil::put_u64(blob, 0x60 + 16 * i, bf.0);
                        testutil::put_u64(blob, 0x68 + 16 * i, 0x20);
                    }
                }
            }
            blob[0x80..0x91].copy_from_slice(b"\0_printf\0_malloc\0");

            image
        }

        fn parse(&self) -> (MachOResult<DyldChainedFixupCommand>, u64) {
            let mut reader = testutil::reader(self.image());
            reader.seek_to(32).unwrap();
            let base = LoadCommandBase {
                cmd: 0x80000034,
                cmdsize: 16,
            };
            let result = DyldChainedFixupCommand::read(&mut reader, base);
            (result, reader.position().unwrap())
        }
    }

    #[test]
    fn test_single_rebase() {
        let fixture = Fixture {
            chain: vec![(PAGE0 + 0x10, ptr64_rebase(0x3f00, 0x12, 0))],
            ..Default::default()
        };
        let (result, position) = fixture.parse();
        let cmd = result.unwrap();
        assert_eq!(position, 48);
        assert_eq!(cmd.cmd.dataoff as usize, DATAOFF);
        assert_eq!(cmd.fixups.fixup_count(), 1);

        let fixup = &cmd.fixups.segments[0].pages[0].fixups[0];
        assert_eq!(fixup.offset, PAGE0 + 0x10);
        assert_eq!(fixup.import, None);
        assert_eq!(
            fixup.pointer,
            DyldPointerFixup::Ptr64Rebase(DyldChainedPtr64Rebase {
                target: 0x3f00,
                high8: 0x12,
                next: 0,
            })
        );
    }

    #[test]
    fn test_bind_then_rebase() {
        let fixture = Fixture {
            chain: vec![
                (PAGE0 + 0x10, ptr64_bind(1, 0, 3)),
                (PAGE0 + 0x1c, ptr64_rebase(0x4000, 0, 0)),
            ],
            ..Default::default()
        };
        let (result, _) = fixture.parse();
        let cmd = result.unwrap();
        let fixups = &cmd.fixups.segments[0].pages[0].fixups;
        assert_eq!(fixups.len(), 2);

        assert_eq!(fixups[0].offset, PAGE0 + 0x10);
        assert!(fixups[0].pointer.is_bind());
        assert_eq!(
            fixups[0].import,
            Some(DyldChainedImport {
                lib_ordinal: 2,
                weak_import: true,
                name_offset: 9,
                addend: 0,
                name: "_malloc".to_string(),
            })
        );

        assert_eq!(fixups[1].offset, PAGE0 + 0x1c);
        assert!(!fixups[1].pointer.is_bind());
    }

    #[test]
    fn test_zero_segment_offsets_are_skipped() {
        let fixture = Fixture {
            chain: vec![(PAGE0 + 0x10, ptr64_rebase(0x3f00, 0, 0))],
            ..Default::default()
        };
        let cmd = fixture.parse().0.unwrap();
        assert_eq!(cmd.fixups.seg_info_offset, vec![0, 0x10, 0]);
        assert_eq!(cmd.fixups.segments.len(), 1);
        assert_eq!(cmd.fixups.segments[0].seg_index, 1);
    }

    #[test]
    fn test_page_without_fixups() {
        let fixture = Fixture {
            page_starts: vec![DyldStartsInSegment::DYLD_CHAINED_PTR_START_NONE, 0x8],
            chain: vec![(PAGE0 + 0x108, ptr64_rebase(0x10, 0, 0))],
            ..Default::default()
        };
        let cmd = fixture.parse().0.unwrap();
        let pages = &cmd.fixups.segments[0].pages;
        assert_eq!(pages.len(), 2);
        assert!(pages[0].fixups.is_empty());
        assert_eq!(pages[1].fixups.len(), 1);
        assert_eq!(pages[1].fixups[0].offset, PAGE0 + 0x108);
    }

    #[test]
    fn test_segment_without_pages() {
        let fixture = Fixture {
            page_starts: vec![],
            ..Default::default()
        };
        let (result, position) = fixture.parse();
        let cmd = result.unwrap();
        assert_eq!(position, 48);
        assert_eq!(cmd.fixups.segments.len(), 1);
        assert_eq!(cmd.fixups.segments[0].starts.page_count, 0);
        assert!(cmd.fixups.segments[0].pages.is_empty());
        assert_eq!(cmd.fixups.fixup_count(), 0);
    }

    #[test]
    fn test_bind_ordinal_out_of_range() {
        let fixture = Fixture {
            chain: vec![(PAGE0 + 0x10, ptr64_bind(5, 0, 0))],
            ..Default::default()
        };
        let (result, position) = fixture.parse();
        assert!(matches!(
            result,
            Err(MachOErr::ImportOrdinal { ordinal: 5, count: 2 })
        ));
        assert_eq!(position, 48);
    }

    #[test]
    fn test_chain_entry_must_stay_in_page() {
        let fixture = Fixture {
            page_starts: vec![0xfc],
            ..Default::default()
        };
        assert!(matches!(
            fixture.parse().0,
            Err(MachOErr::OutOfBounds { what: "chain entry", .. })
        ));

        // a stride that walks off the end of the page
        let fixture = Fixture {
            chain: vec![(PAGE0 + 0x10, ptr64_rebase(0, 0, 0x100))],
            ..Default::default()
        };
        assert!(matches!(
            fixture.parse().0,
            Err(MachOErr::OutOfBounds { what: "chain entry", .. })
        ));
    }

    #[test]
    fn test_import_formats() {
        let chain = vec![(PAGE0 + 0x10, ptr64_bind(0, 0, 0))];

        let fixture = Fixture {
            imports_format: 2,
            chain: chain.clone(),
            ..Default::default()
        };
        let import = fixture.parse().0.unwrap().fixups.segments[0].pages[0].fixups[0]
            .import
            .clone()
            .unwrap();
        assert_eq!(import.name, "_printf");
        assert_eq!(import.lib_ordinal, 1);
        assert_eq!(import.addend, -16);

        let fixture = Fixture {
            imports_format: 3,
            chain,
            ..Default::default()
        };
        let import = fixture.parse().0.unwrap().fixups.segments[0].pages[0].fixups[0]
            .import
            .clone()
            .unwrap();
        assert_eq!(import.name, "_printf");
        assert!(!import.weak_import);
        assert_eq!(import.addend, 0x20);
    }

    #[test]
    fn test_unsupported_encodings() {
        let fixture = Fixture {
            pointer_format: 3,
            chain: vec![(PAGE0 + 0x10, 0)],
            ..Default::default()
        };
        assert!(matches!(fixture.parse().0, Err(MachOErr::Unsupported(_))));

        let fixture = Fixture {
            page_starts: vec![DyldStartsInSegment::DYLD_CHAINED_PTR_START_MULTI | 2],
            ..Default::default()
        };
        assert!(matches!(fixture.parse().0, Err(MachOErr::Unsupported(_))));
    }

    #[test]
    fn test_arm64e_entries() {
        let mut bf = DyldChainedPtrArm64eAuthRebaseBF(0);
        bf.set_target(0x8000);
        bf.set_diversity(0x1234);
        bf.set_addr_div(true);
        bf.set_key(2);
        bf.set_next(1);
        bf.set_auth(true);
        let fixup = DyldPointerFormat::Arm64e.decode(bf.0).unwrap();
        assert_eq!(
            fixup,
            DyldPointerFixup::Arm64eAuthRebase(DyldChainedPtrArm64eAuthRebase {
                target: 0x8000,
                diversity: 0x1234,
                addr_div: true,
                key: DyldFixupPACKey::DA,
                next: 1,
            })
        );
        assert_eq!(DyldPointerFormat::Arm64e.stride(), 8);

        let mut bf = DyldChainedPtrArm64eBind24BF(0);
        bf.set_ordinal(0x12345);
        bf.set_addend(0x7ffff);
        bf.set_bind(true);
        let fixup = DyldPointerFormat::Arm64eUserland24.decode(bf.0).unwrap();
        assert_eq!(fixup.bind_ordinal(), Some(0x12345));
        match fixup {
            DyldPointerFixup::Arm64eBind(bind) => assert_eq!(bind.addend, -1),
            other => panic!("unexpected {:?}", other),
        }

        // 16-bit ordinals outside the 24-bit variant
        let fixup = DyldPointerFormat::Arm64eUserland.decode(bf.0).unwrap();
        assert_eq!(fixup.bind_ordinal(), Some(0x2345));
    }
}
