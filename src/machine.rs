use nom::{number::complete::le_u32, IResult};
use num_derive::FromPrimitive;
use strum_macros::Display;

#[repr(u32)]
#[derive(Debug, Copy, Clone, FromPrimitive)]
pub enum CpuABI {
    ABI64 = 0x01000000,
    ABI64_32 = 0x02000000,
}

impl CpuABI {
    pub const MASK: u32 = 0xff000000;
}

#[repr(u32)]
#[derive(Debug, Copy, Clone, FromPrimitive, PartialEq, Eq, Display)]
pub enum CpuType {
    Any = 0,
    Vax = 1,
    Mc680x0 = 6,
    I386 = 7,
    X86_64 = 7 | CpuABI::ABI64 as u32,
    Mc98000 = 10,
    Hppa = 11,
    Arm = 12,
    Arm64 = 12 | CpuABI::ABI64 as u32,
    Arm64_32 = 12 | CpuABI::ABI64_32 as u32,
    Mc88000 = 13,
    Sparc = 14,
    I860 = 15,
    PowerPC = 18,
    PowerPC64 = 18 | CpuABI::ABI64 as u32,
    Unknown = !0,
}

impl CpuType {
    pub fn parse(bytes: &[u8]) -> IResult<&[u8], CpuType> {
        let (bytes, cputype) = le_u32(bytes)?;
        match num::FromPrimitive::from_u32(cputype) {
            Some(cputype) => Ok((bytes, cputype)),
            None => Ok((bytes, CpuType::Unknown)),
        }
    }
}

/// The raw cpusubtype word. Only the capability bits are split out; the
/// subtype numbering is CPU specific and printed as a number.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CpuSubType(pub u32);

impl CpuSubType {
    pub const CPU_SUBTYPE_MASK: u32 = 0xff000000;
    pub const CPU_SUBTYPE_PTRAUTH_ABI: u32 = 0x80000000;

    pub fn parse(bytes: &[u8]) -> IResult<&[u8], CpuSubType> {
        let (bytes, raw) = le_u32(bytes)?;
        Ok((bytes, CpuSubType(raw)))
    }

    pub fn subtype(&self) -> u32 {
        self.0 & !Self::CPU_SUBTYPE_MASK
    }

    pub fn capabilities(&self) -> u32 {
        self.0 & Self::CPU_SUBTYPE_MASK
    }

    pub fn is_ptrauth_abi(&self) -> bool {
        self.0 & Self::CPU_SUBTYPE_PTRAUTH_ABI != 0
    }
}
