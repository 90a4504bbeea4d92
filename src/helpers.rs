use std::io::{Read, Seek};

use crate::macho::{MachOErr, MachOResult};
use crate::reader::MachOReader;

/// Decodes a name stored in a fixed-width, NUL-padded field (segment and
/// section names). A field without a terminator uses all of its bytes.
pub fn string_upto_null_terminator(bytes: &[u8]) -> nom::IResult<&[u8], String> {
    match bytes.iter().position(|b| *b == 0) {
        Some(nul) => Ok((
            &bytes[nul + 1..],
            String::from_utf8_lossy(&bytes[..nul]).into_owned(),
        )),
        None => Ok((&[], String::from_utf8_lossy(bytes).into_owned())),
    }
}

pub fn version_string(version: u32) -> String {
    format!(
        "{}.{}.{}",
        version >> 16,
        (version >> 8) & 0xff,
        version & 0xff
    )
}

/// Reads an unsigned LEB128 value at the cursor. Every byte must sit below
/// `limit`, and the value must fit in 64 bits; the cursor is left on the
/// byte after the terminating one.
pub fn read_uleb128<T: Read + Seek>(reader: &mut MachOReader<T>, limit: u64) -> MachOResult<u64> {
    let start = reader.position()?;
    let mut offset = start;
    let mut result = 0u64;
    let mut shift = 0u32;

    loop {
        if offset >= limit {
            return Err(MachOErr::Uleb128Truncated {
                offset: start,
                limit,
            });
        }
        let byte = reader.read_u8()?;
        offset += 1;

        let slice = (byte & 0x7f) as u64;
        if shift == 63 && slice > 1 {
            return Err(MachOErr::Uleb128Overflow { offset: start });
        }
        result |= slice << shift;

        if byte & 0x80 == 0 {
            return Ok(result);
        }

        shift += 7;
        if shift >= 64 {
            return Err(MachOErr::Uleb128Overflow { offset: start });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::testutil::uleb as encode;

    fn decode(bytes: &[u8], limit: u64) -> (MachOResult<u64>, u64) {
        let mut reader = MachOReader::new(Cursor::new(bytes.to_vec())).unwrap();
        let result = read_uleb128(&mut reader, limit);
        let position = reader.position().unwrap();
        (result, position)
    }

    #[test]
    fn test_uleb_values() {
        for value in [
            0,
            1,
            0x7f,
            0x80,
            624485,
            0x1000,
            u32::MAX as u64,
            1 << 63,
            u64::MAX,
        ] {
            let mut bytes = encode(value);
            let len = bytes.len() as u64;
            // trailing garbage must not be consumed
            bytes.push(0xff);
            let (result, position) = decode(&bytes, bytes.len() as u64);
            assert_eq!(result.unwrap(), value);
            assert_eq!(position, len);
        }
    }

    #[test]
    fn test_uleb_known_encoding() {
        let (result, position) = decode(&[0xe5, 0x8e, 0x26], 3);
        assert_eq!(result.unwrap(), 624485);
        assert_eq!(position, 3);
    }

    #[test]
    fn test_uleb_truncated_at_limit() {
        let (result, _) = decode(&[0x80, 0x80, 0x01], 2);
        assert!(matches!(
            result,
            Err(MachOErr::Uleb128Truncated { offset: 0, limit: 2 })
        ));
    }

    #[test]
    fn test_uleb_terminator_on_last_byte_before_limit() {
        let (result, position) = decode(&[0x80, 0x01], 2);
        assert_eq!(result.unwrap(), 0x80);
        assert_eq!(position, 2);
    }

    #[test]
    fn test_uleb_overflow() {
        let mut too_long = vec![0xff; 10];
        too_long.push(0x01);
        let (result, _) = decode(&too_long, too_long.len() as u64);
        assert!(matches!(result, Err(MachOErr::Uleb128Overflow { .. })));

        // 10th byte carrying more than bit 63
        let mut wide = vec![0xff; 9];
        wide.push(0x02);
        let (result, _) = decode(&wide, wide.len() as u64);
        assert!(matches!(result, Err(MachOErr::Uleb128Overflow { .. })));
    }

    #[test]
    fn test_string_upto_null_terminator() {
        let (rest, name) = string_upto_null_terminator(b"__TEXT\0\0\0\0").unwrap();
        assert_eq!(name, "__TEXT");
        assert_eq!(rest.len(), 3);

        let (rest, name) = string_upto_null_terminator(b"__LINKEDIT_PLUS_").unwrap();
        assert_eq!(name, "__LINKEDIT_PLUS_");
        assert!(rest.is_empty());
    }

    #[test]
    fn test_version_string() {
        assert_eq!(version_string(0x000d0000), "13.0.0");
        assert_eq!(version_string(0x0501_0203), "1281.2.3");
    }
}
