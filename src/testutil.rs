//! Synthetic image builders shared by the unit tests.

use std::io::Cursor;

use crate::reader::MachOReader;

pub fn header(ncmds: u32, sizeofcmds: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend(0xfeedfacfu32.to_le_bytes());
    buf.extend(0x0100000cu32.to_le_bytes()); // arm64
    buf.extend(0u32.to_le_bytes());
    buf.extend(2u32.to_le_bytes()); // MH_EXECUTE
    buf.extend(ncmds.to_le_bytes());
    buf.extend(sizeofcmds.to_le_bytes());
    buf.extend(0x00200085u32.to_le_bytes());
    buf.extend(0u32.to_le_bytes());
    buf
}

/// A load command with `payload` after the prefix, padded to 8 bytes.
pub fn command(cmd: u32, payload: &[u8]) -> Vec<u8> {
    let mut size = 8 + payload.len();
    size = (size + 7) & !7;
    let mut buf = Vec::new();
    buf.extend(cmd.to_le_bytes());
    buf.extend((size as u32).to_le_bytes());
    buf.extend(payload);
    buf.resize(size, 0);
    buf
}

/// Header followed by `commands`; anything the commands point at has to be
/// appended by the caller.
pub fn image(commands: &[Vec<u8>]) -> Vec<u8> {
    let sizeofcmds: usize = commands.iter().map(|c| c.len()).sum();
    let mut buf = header(commands.len() as u32, sizeofcmds as u32);
    for cmd in commands {
        buf.extend(cmd);
    }
    buf
}

pub fn reader(bytes: Vec<u8>) -> MachOReader<Cursor<Vec<u8>>> {
    MachOReader::new(Cursor::new(bytes)).unwrap()
}

pub fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub fn put_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

pub fn uleb(mut value: u64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

pub fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}
