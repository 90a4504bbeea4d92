use std::io::{Read, Seek, SeekFrom};

use nom::IResult;

use crate::macho::{MachOErr, MachOResult};

/// A half-open byte range `[start, end)` of the input that a decoder is
/// allowed to touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub start: u64,
    pub end: u64,
}

impl Region {
    pub fn new(start: u64, size: u64) -> Self {
        Region {
            start,
            end: start.saturating_add(size),
        }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fails unless `[offset, offset + size)` lies inside the region.
    pub fn check(&self, what: &'static str, offset: u64, size: u64) -> MachOResult<()> {
        let in_bounds = offset >= self.start
            && offset
                .checked_add(size)
                .map_or(false, |end| end <= self.end);
        if in_bounds {
            Ok(())
        } else {
            Err(MachOErr::OutOfBounds {
                what,
                offset,
                size,
                limit: self.end,
            })
        }
    }

    /// Like `check`, but for a single position that must still have data
    /// in front of it.
    pub fn check_position(&self, what: &'static str, offset: u64) -> MachOResult<()> {
        self.check(what, offset, 1)
    }
}

/// The one read cursor over the input image. Every decoder shares it; any
/// excursion away from the logical position goes through [`detour`], which
/// puts the cursor back whether or not the excursion succeeded.
///
/// [`detour`]: MachOReader::detour
#[derive(Debug)]
pub struct MachOReader<T: Read + Seek> {
    buf: T,
    len: u64,
}

impl<T: Read + Seek> MachOReader<T> {
    pub fn new(mut buf: T) -> MachOResult<Self> {
        let len = buf.seek(SeekFrom::End(0))?;
        buf.seek(SeekFrom::Start(0))?;
        Ok(MachOReader { buf, len })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The whole input as a region.
    pub fn file(&self) -> Region {
        Region::new(0, self.len)
    }

    pub fn position(&mut self) -> MachOResult<u64> {
        Ok(self.buf.stream_position()?)
    }

    pub fn seek_to(&mut self, offset: u64) -> MachOResult<()> {
        if offset > self.len {
            return Err(MachOErr::OutOfBounds {
                what: "seek target",
                offset,
                size: 0,
                limit: self.len,
            });
        }
        self.buf.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    pub fn read_bytes(&mut self, size: usize) -> MachOResult<Vec<u8>> {
        let offset = self.position()?;
        self.file().check("read", offset, size as u64)?;
        let mut bytes = vec![0u8; size];
        self.buf.read_exact(&mut bytes)?;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> MachOResult<u8> {
        let bytes = self.read_bytes(1)?;
        Ok(bytes[0])
    }

    /// Reads `size` bytes and hands them to a nom parser. The cursor ends
    /// up `size` bytes further on no matter how much the parser consumed.
    pub fn parse_record<R, F>(&mut self, size: usize, parser: F) -> MachOResult<R>
    where
        F: for<'b> FnOnce(&'b [u8]) -> IResult<&'b [u8], R>,
    {
        let bytes = self.read_bytes(size)?;
        let (_, record) = parser(&bytes)?;
        Ok(record)
    }

    /// Same as `parse_record`, but the cursor does not move.
    pub fn peek_record<R, F>(&mut self, size: usize, parser: F) -> MachOResult<R>
    where
        F: for<'b> FnOnce(&'b [u8]) -> IResult<&'b [u8], R>,
    {
        let offset = self.position()?;
        self.detour(offset, |reader| reader.parse_record(size, parser))
    }

    /// Reads a NUL-terminated string. The terminator must appear before
    /// `limit`; the cursor is left just past it.
    pub fn read_cstring(&mut self, limit: u64) -> MachOResult<String> {
        let start = self.position()?;
        let limit = limit.min(self.len);
        let mut name = Vec::new();
        let mut offset = start;
        loop {
            if offset >= limit {
                return Err(MachOErr::OutOfBounds {
                    what: "unterminated string",
                    offset: start,
                    size: offset - start,
                    limit,
                });
            }
            let chunk = self.read_bytes((limit - offset).min(64) as usize)?;
            match chunk.iter().position(|b| *b == 0) {
                Some(nul) => {
                    name.extend_from_slice(&chunk[..nul]);
                    self.seek_to(offset + nul as u64 + 1)?;
                    break;
                }
                None => {
                    name.extend_from_slice(&chunk);
                    offset += chunk.len() as u64;
                }
            }
        }
        Ok(String::from_utf8_lossy(&name).into_owned())
    }

    /// Runs `f` with the cursor at `offset`, then restores the cursor to
    /// where it was before the call, also when `f` fails.
    pub fn detour<R, F>(&mut self, offset: u64, f: F) -> MachOResult<R>
    where
        F: FnOnce(&mut Self) -> MachOResult<R>,
    {
        let saved = self.position()?;
        self.seek_to(offset)?;
        let result = f(self);
        self.buf.seek(SeekFrom::Start(saved))?;
        result
    }
}
