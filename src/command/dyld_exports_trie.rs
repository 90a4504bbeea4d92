use std::{
    collections::HashSet,
    io::{Read, Seek},
};

use log::{debug, trace};

use crate::{
    helpers::read_uleb128,
    macho::{MachOErr, MachOResult},
    reader::{MachOReader, Region},
};

use super::{linkedit_data::LinkeditDataCommand, LoadCommandBase};

/// Deepest node nesting accepted before the trie is considered malformed.
pub const MAX_TRIE_DEPTH: usize = 512;

bitflags::bitflags! {
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DyldExportSymbolFlags: u32 {
        // const KIND_REGULAR       = 0x00;
        const KIND_THREAD_LOCAL  = 0x01;
        const KIND_ABSOLUTE      = 0x02;
        const WEAK_DEFINITION    = 0x04;
        const REEXPORT           = 0x08;
        const STUB_AND_RESOLVER  = 0x10;
        const STATIC_RESOLVER    = 0x20;
    }
}

impl DyldExportSymbolFlags {
    pub fn from_uleb(flags: u64) -> Self {
        DyldExportSymbolFlags::from_bits_truncate((flags & 0xffff_ffff) as u32)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DyldExportInfo {
    Regular {
        address: u64,
        /// Resolver offset of a `STUB_AND_RESOLVER` export.
        resolver: Option<u64>,
    },
    Reexport {
        ordinal: u64,
        import_name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DyldExport {
    pub name: String,
    pub flags: DyldExportSymbolFlags,
    pub info: DyldExportInfo,
}

impl DyldExport {
    /// Decodes the trie occupying `trie`, returning exports in preorder with
    /// children in on-disk order. The cursor is left where it was.
    pub fn parse_trie<T: Read + Seek>(
        reader: &mut MachOReader<T>,
        trie: Region,
    ) -> MachOResult<Vec<DyldExport>> {
        reader.file().check("exports trie", trie.start, trie.len())?;

        let mut walk = TrieWalk {
            trie,
            visited: HashSet::new(),
            exports: Vec::new(),
        };
        reader.detour(trie.start, |r| walk.walk(r, trie.start))?;
        debug!(
            "exports trie at 0x{:x}: {} nodes, {} exports",
            trie.start,
            walk.visited.len(),
            walk.exports.len()
        );
        Ok(walk.exports)
    }
}

struct TrieWalk {
    trie: Region,
    visited: HashSet<u64>,
    exports: Vec<DyldExport>,
}

impl TrieWalk {
    /// Preorder walk from `root` on an explicit stack. Edges are pushed in
    /// reverse so siblings come off in on-disk order.
    fn walk<T: Read + Seek>(
        &mut self,
        reader: &mut MachOReader<T>,
        root: u64,
    ) -> MachOResult<()> {
        let mut pending = vec![(root, String::new(), 0usize)];

        while let Some((node, prefix, depth)) = pending.pop() {
            if node >= self.trie.end {
                trace!("node 0x{:x} ({:?}) at or past the end of the trie", node, prefix);
                continue;
            }
            if depth > MAX_TRIE_DEPTH {
                return Err(MachOErr::TrieTooDeep(depth));
            }
            if !self.visited.insert(node) {
                return Err(MachOErr::TrieCycle(node));
            }

            let edges = self.visit(reader, &prefix, node)?;
            pending.extend(
                edges
                    .into_iter()
                    .rev()
                    .map(|(label, child)| (child, format!("{}{}", prefix, label), depth + 1)),
            );
        }

        Ok(())
    }

    /// Decodes one node, recording its export if it is terminal, and returns
    /// its edges as (label, child node offset).
    fn visit<T: Read + Seek>(
        &mut self,
        reader: &mut MachOReader<T>,
        prefix: &str,
        node: u64,
    ) -> MachOResult<Vec<(String, u64)>> {
        reader.seek_to(node)?;
        let terminal_size = read_uleb128(reader, self.trie.end)?;
        let terminal = reader.position()?;
        let children = terminal
            .checked_add(terminal_size)
            .filter(|children| *children < self.trie.end)
            .ok_or_else(|| MachOErr::OutOfBounds {
                what: "trie node children",
                offset: terminal,
                size: terminal_size,
                limit: self.trie.end,
            })?;

        if terminal_size != 0 {
            let export = Self::terminal(reader, prefix.to_string(), children)?;
            trace!("0x{:x}: {:?}", node, export);
            self.exports.push(export);
        }

        reader.seek_to(children)?;
        let child_count = reader.read_u8()?;
        let mut edges = Vec::with_capacity(child_count as usize);
        for _ in 0..child_count {
            let label = reader.read_cstring(self.trie.end)?;
            let child = read_uleb128(reader, self.trie.end)?;
            let child_node = self.trie.start.saturating_add(child);
            if child_node >= self.trie.end {
                trace!("child {:?} of 0x{:x} points past the trie", label, node);
                continue;
            }
            edges.push((label, child_node));
        }

        Ok(edges)
    }

    /// Decodes the terminal payload at the cursor; it may not reach `limit`,
    /// where the node's children start.
    fn terminal<T: Read + Seek>(
        reader: &mut MachOReader<T>,
        name: String,
        limit: u64,
    ) -> MachOResult<DyldExport> {
        let flags = DyldExportSymbolFlags::from_uleb(read_uleb128(reader, limit)?);

        let info = if flags.contains(DyldExportSymbolFlags::REEXPORT) {
            let ordinal = read_uleb128(reader, limit)?;
            let mut import_name = reader.read_cstring(limit)?;
            if import_name.is_empty() {
                import_name = name.clone();
            }
            DyldExportInfo::Reexport {
                ordinal,
                import_name,
            }
        } else {
            let address = read_uleb128(reader, limit)?;
            let resolver = if flags.contains(DyldExportSymbolFlags::STUB_AND_RESOLVER) {
                Some(read_uleb128(reader, limit)?)
            } else {
                None
            };
            DyldExportInfo::Regular { address, resolver }
        };

        Ok(DyldExport { name, flags, info })
    }
}

/// `LC_DYLD_EXPORTS_TRIE` and the exports it encodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DyldExportsTrie {
    pub cmd: LinkeditDataCommand,
    pub exports: Vec<DyldExport>,
}

impl DyldExportsTrie {
    pub fn read<T: Read + Seek>(
        reader: &mut MachOReader<T>,
        base: LoadCommandBase,
    ) -> MachOResult<Self> {
        let cmd = LinkeditDataCommand::read(reader, base)?;
        let exports = DyldExport::parse_trie(reader, cmd.data())?;

        Ok(DyldExportsTrie { cmd, exports })
    }
}
