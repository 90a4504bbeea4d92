use nom::{multi, number::complete::le_u32, sequence, IResult};
use num_derive::FromPrimitive;
use strum_macros::Display;

use crate::{
    helpers::version_string,
    macho::{MachOErr, MachOResult},
};

use super::{LCLoadCommand, LoadCommandParser};

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, Display)]
pub enum Tool {
    Clang = 1,
    Swift = 2,
    Ld = 3,
    Lld = 4,
    Metal = 1024,
    Airlld = 1025,
    Airnt = 1026,
    AirntPlugin = 1027,
    Airpack = 1028,
    Gpuarchiver = 1031,
    MetalFramework = 1032,
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, Display)]
pub enum Platform {
    Unknown = 0,
    Any = 0xFFFFFFFF,
    MacOS = 1,
    IOS = 2,
    TvOS = 3,
    WatchOS = 4,
    BridgeOS = 5,
    MacCatalyst = 6,
    IOSSimulator = 7,
    TvOSSimulator = 8,
    WatchOSSimulator = 9,
    DriverKit = 10,
    VisionOS = 11,
    VisionOSSimulator = 12,
    Firmware = 13,
    SepOS = 14,
}

#[derive(Debug, PartialEq, Eq)]
pub struct BuildToolVersion {
    pub tool: u32,
    pub version: String,
}

impl BuildToolVersion {
    pub const SIZE: usize = 8;

    pub fn parse(bytes: &[u8]) -> IResult<&[u8], Self> {
        let (bytes, (tool, version)) = sequence::tuple((le_u32, le_u32))(bytes)?;

        Ok((
            bytes,
            BuildToolVersion {
                tool,
                version: version_string(version),
            },
        ))
    }

    /// The named tool; newer toolchains use ids this table doesn't have.
    pub fn kind(&self) -> Option<Tool> {
        num::FromPrimitive::from_u32(self.tool)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct BuildVersionCommand {
    pub cmd: LCLoadCommand,
    pub cmdsize: u32,
    pub platform: u32,
    pub minos: String,
    pub sdk: String,
    pub ntools: u32,
    pub tools: Vec<BuildToolVersion>,
}

type BuildVersionFixed = (LCLoadCommand, u32, u32, u32, u32, u32);

impl BuildVersionCommand {
    pub const SIZE: usize = 24;

    fn parse_fixed(ldcmd: &[u8]) -> IResult<&[u8], BuildVersionFixed> {
        let (cursor, (cmd, cmdsize)) = sequence::tuple((LCLoadCommand::parse, le_u32))(ldcmd)?;
        let (cursor, (platform, minos, sdk, ntools)) =
            sequence::tuple((le_u32, le_u32, le_u32, le_u32))(cursor)?;
        Ok((cursor, (cmd, cmdsize, platform, minos, sdk, ntools)))
    }

    pub fn platform_kind(&self) -> Option<Platform> {
        num::FromPrimitive::from_u32(self.platform)
    }
}

impl LoadCommandParser for BuildVersionCommand {
    fn parse(ldcmd: &[u8]) -> MachOResult<Self> {
        let (cursor, (cmd, cmdsize, platform, minos, sdk, ntools)) = Self::parse_fixed(ldcmd)?;

        // The tool records follow the fixed part and are counted in cmdsize.
        let needed = Self::SIZE as u64 + ntools as u64 * BuildToolVersion::SIZE as u64;
        if needed > ldcmd.len() as u64 {
            return Err(MachOErr::InvalidValue(format!(
                "build version lists {} tools but cmdsize is {}",
                ntools, cmdsize
            )));
        }
        let (_, tools) = multi::count(BuildToolVersion::parse, ntools as usize)(cursor)?;

        Ok(BuildVersionCommand {
            cmd,
            cmdsize,
            platform,
            minos: version_string(minos),
            sdk: version_string(sdk),
            ntools,
            tools,
        })
    }
}
