//! Text rendering of a decoded image, one block per load command with nested
//! structures indented under their owner.

use std::{
    fmt,
    io::{self, Write},
};

use crate::{
    command::{
        BuildVersionCommand, DyldChainedFixupCommand, DyldExport, DyldExportInfo,
        DyldExportsTrie, DyldFixup, DyldPointerFixup, DylibCommand, DysymtabCommand,
        LinkeditDataCommand, LoadCommand, Section64, SegmentCommand64,
    },
    header::MachHeader64,
    macho::MachO,
};

const INDENT: &str = "    ";
const HEX_LINE: usize = 16;

pub fn dump<W: Write>(out: &mut W, macho: &MachO) -> io::Result<()> {
    dump_header(out, &macho.header)?;
    for (i, lc) in macho.load_commands.iter().enumerate() {
        write!(out, "{:03}: ", i)?;
        dump_load_command(out, lc)?;
    }
    Ok(())
}

/// The table's name for `raw`, or the number itself when there is none.
fn named<E: fmt::Display>(kind: Option<E>, raw: u32) -> String {
    match kind {
        Some(kind) => kind.to_string(),
        None => raw.to_string(),
    }
}

pub fn dump_header<W: Write>(out: &mut W, hdr: &MachHeader64) -> io::Result<()> {
    writeln!(
        out,
        "MH_MAGIC_64 {} cpusubtype=0x{:08x} filetype={} ncmds={} sizeofcmds=0x{:x}",
        hdr.cputype,
        hdr.cpusubtype.0,
        named(hdr.file_type(), hdr.filetype),
        hdr.ncmds,
        hdr.sizeofcmds
    )?;
    writeln!(out, "{}flags={:?}", INDENT, hdr.flags)
}

pub fn dump_load_command<W: Write>(out: &mut W, lc: &LoadCommand) -> io::Result<()> {
    match lc {
        LoadCommand::Segment64(segment) => dump_segment(out, segment),
        LoadCommand::Symtab(symtab) => writeln!(
            out,
            "LC_SYMTAB  symoff=0x{:08x} nsyms={} stroff=0x{:08x} strsize=0x{:x}",
            symtab.symoff, symtab.nsyms, symtab.stroff, symtab.strsize
        ),
        LoadCommand::Dysymtab(dysymtab) => dump_dysymtab(out, dysymtab),
        LoadCommand::LoadDylib(dylib)
        | LoadCommand::DylibId(dylib)
        | LoadCommand::LoadWeakDylib(dylib)
        | LoadCommand::ReexportDylib(dylib)
        | LoadCommand::LazyLoadDylib(dylib)
        | LoadCommand::LoadUpwardDylib(dylib) => dump_dylib(out, dylib),
        LoadCommand::LoadDylinker(dylinker)
        | LoadCommand::IdDylinker(dylinker)
        | LoadCommand::DyldEnvironment(dylinker) => {
            writeln!(out, "{}  {}", dylinker.cmd, dylinker.name)
        }
        LoadCommand::Rpath(rpath) => writeln!(out, "LC_RPATH  {}", rpath.path),
        LoadCommand::UUID(uuid) => writeln!(out, "LC_UUID  {}", uuid.uuid),
        LoadCommand::BuildVersion(build) => dump_build_version(out, build),
        LoadCommand::SourceVersion(source) => {
            writeln!(out, "LC_SOURCE_VERSION  {}", source.version)
        }
        LoadCommand::Main(main) => writeln!(
            out,
            "LC_MAIN  entryoff=0x{:08x} stacksize=0x{:x}",
            main.entryoff, main.stacksize
        ),
        LoadCommand::Routines64(routines) => writeln!(
            out,
            "LC_ROUTINES_64  init_address=0x{:x} init_module={}",
            routines.init_address, routines.init_module
        ),
        LoadCommand::FunctionStarts(data)
        | LoadCommand::DataInCode(data)
        | LoadCommand::CodeSignature(data)
        | LoadCommand::SegmentSplitInfo(data)
        | LoadCommand::DylibCodeSignDrs(data)
        | LoadCommand::LinkerOptimizationHint(data)
        | LoadCommand::AtomInfo(data) => dump_linkedit_data(out, data),
        LoadCommand::DyldChainedFixups(fixups) => dump_chained_fixups(out, fixups),
        LoadCommand::DyldExportsTrie(trie) => dump_exports_trie(out, trie),
        LoadCommand::Other(base) => match base.kind() {
            Some(kind) => writeln!(
                out,
                "OTHER  cmd=0x{:x} ({}) cmdsize={}",
                base.cmd, kind, base.cmdsize
            ),
            None => writeln!(out, "OTHER  cmd=0x{:x} cmdsize={}", base.cmd, base.cmdsize),
        },
    }
}

fn dump_segment<W: Write>(out: &mut W, segment: &SegmentCommand64) -> io::Result<()> {
    writeln!(
        out,
        "LC_SEGMENT_64  addr=0x{:09x}-0x{:09x} off=0x{:09x}-0x{:09x} sz=0x{:06x} ({}/{}) {} nsects={}",
        segment.vmaddr,
        segment.vmaddr.wrapping_add(segment.vmsize),
        segment.fileoff,
        segment.fileoff.wrapping_add(segment.filesize),
        segment.filesize,
        segment.initprot.rwx(),
        segment.maxprot.rwx(),
        segment.segname,
        segment.nsects,
    )?;
    for sect in &segment.sections {
        dump_section(out, sect)?;
    }
    Ok(())
}

fn dump_section<W: Write>(out: &mut W, sect: &Section64) -> io::Result<()> {
    writeln!(
        out,
        "{}addr=0x{:09x}-0x{:09x} off=0x{:09x} sz=0x{:06x} {},{} type={} align=2^{}",
        INDENT,
        sect.addr,
        sect.addr.wrapping_add(sect.size),
        sect.offset,
        sect.size,
        sect.segname,
        sect.sectname,
        match sect.section_type() {
            Some(sectype) => format!("{:?}", sectype),
            None => format!("0x{:x}", sect.flags_sectype),
        },
        sect.align,
    )?;

    match &sect.data {
        None => writeln!(out, "{0}{0}(zero fill, no file data)", INDENT),
        Some(data) => dump_hex(out, sect.offset as u64, data, 2),
    }
}

/// Writes `data` sixteen bytes to a line, each line prefixed with the file
/// offset of its first byte.
pub fn dump_hex<W: Write>(out: &mut W, base: u64, data: &[u8], depth: usize) -> io::Result<()> {
    let indent = INDENT.repeat(depth);
    for (i, line) in data.chunks(HEX_LINE).enumerate() {
        let bytes: Vec<String> = line.iter().map(|b| format!("{:02x}", b)).collect();
        writeln!(
            out,
            "{}{:09x}: {}",
            indent,
            base + (i * HEX_LINE) as u64,
            bytes.join(" ")
        )?;
    }
    Ok(())
}

fn dump_dysymtab<W: Write>(out: &mut W, dysymtab: &DysymtabCommand) -> io::Result<()> {
    writeln!(
        out,
        "LC_DYSYMTAB  nlocals={} nextdefs={} nundefs={} nindirects={}",
        dysymtab.nlocalsym, dysymtab.nextdefsym, dysymtab.nundefsym, dysymtab.nindirectsyms,
    )?;
    for (name, value) in dysymtab.fields() {
        writeln!(out, "{}{:<14} {}", INDENT, name, value)?;
    }
    Ok(())
}

fn dump_dylib<W: Write>(out: &mut W, dylib: &DylibCommand) -> io::Result<()> {
    writeln!(
        out,
        "{}  {} (current {}, compatibility {}, timestamp {})",
        dylib.cmd,
        dylib.name,
        dylib.current_version,
        dylib.compatibility_version,
        dylib.timestamp
    )
}

fn dump_build_version<W: Write>(out: &mut W, build: &BuildVersionCommand) -> io::Result<()> {
    writeln!(
        out,
        "LC_BUILD_VERSION  platform={} minos={} sdk={} ntools={}",
        named(build.platform_kind(), build.platform),
        build.minos,
        build.sdk,
        build.ntools
    )?;
    for tool in &build.tools {
        writeln!(
            out,
            "{}{} {}",
            INDENT,
            named(tool.kind(), tool.tool),
            tool.version
        )?;
    }
    Ok(())
}

fn dump_linkedit_data<W: Write>(out: &mut W, data: &LinkeditDataCommand) -> io::Result<()> {
    writeln!(
        out,
        "{}  off=0x{:08x} sz=0x{:08x}",
        data.cmd, data.dataoff, data.datasize
    )
}

fn dump_chained_fixups<W: Write>(out: &mut W, cmd: &DyldChainedFixupCommand) -> io::Result<()> {
    let fixups = &cmd.fixups;
    let header = &fixups.header;
    writeln!(
        out,
        "LC_DYLD_CHAINED_FIXUPS  off=0x{:08x} sz=0x{:08x} nfixups={}",
        cmd.cmd.dataoff,
        cmd.cmd.datasize,
        fixups.fixup_count()
    )?;
    writeln!(
        out,
        "{}version={} starts=0x{:x} imports=0x{:x} symbols=0x{:x} nimports={} {} {:?}",
        INDENT,
        header.fixups_version,
        header.starts_offset,
        header.imports_offset,
        header.symbols_offset,
        header.imports_count,
        header.imports_format,
        header.symbols_format,
    )?;
    writeln!(
        out,
        "{}seg_count={} seg_info_offset={:x?}",
        INDENT,
        fixups.seg_info_offset.len(),
        fixups.seg_info_offset
    )?;

    for segment in &fixups.segments {
        let starts = &segment.starts;
        writeln!(
            out,
            "{}segment {}: {} page_size=0x{:x} segment_offset=0x{:x} max_valid_pointer=0x{:x} page_count={}",
            INDENT,
            segment.seg_index,
            starts.pointer_format,
            starts.page_size,
            starts.segment_offset,
            starts.max_valid_pointer,
            starts.page_count,
        )?;
        for page in &segment.pages {
            writeln!(
                out,
                "{0}{0}page {1}: start=0x{2:x} nfixups={3}",
                INDENT,
                page.page_index,
                page.page_start,
                page.fixups.len()
            )?;
            for fixup in &page.fixups {
                dump_fixup(out, fixup)?;
            }
        }
    }
    Ok(())
}

fn dump_fixup<W: Write>(out: &mut W, fixup: &DyldFixup) -> io::Result<()> {
    let indent = INDENT.repeat(3);
    write!(out, "{}0x{:09x}: ", indent, fixup.offset)?;

    match &fixup.pointer {
        DyldPointerFixup::Ptr64Rebase(rebase) => writeln!(
            out,
            "rebase target=0x{:x} high8=0x{:x} next={}",
            rebase.target, rebase.high8, rebase.next
        )?,
        DyldPointerFixup::Arm64eRebase(rebase) => writeln!(
            out,
            "rebase target=0x{:x} high8=0x{:x} next={}",
            rebase.target, rebase.high8, rebase.next
        )?,
        DyldPointerFixup::Ptr64KernelCacheRebase(rebase) => writeln!(
            out,
            "rebase target=0x{:x} cache_level={} auth={} key={} diversity=0x{:x} addr_div={} next={}",
            rebase.target,
            rebase.cache_level,
            rebase.is_auth,
            rebase.key,
            rebase.diversity,
            rebase.addr_div,
            rebase.next
        )?,
        DyldPointerFixup::Arm64eAuthRebase(rebase) => writeln!(
            out,
            "auth-rebase target=0x{:x} key={} diversity=0x{:x} addr_div={} next={}",
            rebase.target, rebase.key, rebase.diversity, rebase.addr_div, rebase.next
        )?,
        DyldPointerFixup::Ptr64Bind(bind) => writeln!(
            out,
            "bind ordinal={} addend={} next={}",
            bind.ordinal, bind.addend, bind.next
        )?,
        DyldPointerFixup::Arm64eBind(bind) => writeln!(
            out,
            "bind ordinal={} addend={} next={}",
            bind.ordinal, bind.addend, bind.next
        )?,
        DyldPointerFixup::Arm64eAuthBind(bind) => writeln!(
            out,
            "auth-bind ordinal={} key={} diversity=0x{:x} addr_div={} next={}",
            bind.ordinal, bind.key, bind.diversity, bind.addr_div, bind.next
        )?,
    }

    if let Some(import) = &fixup.import {
        writeln!(
            out,
            "{}{}{} lib_ordinal={} weak={} name_offset=0x{:x} addend={}",
            indent,
            INDENT,
            import.name,
            import.lib_ordinal,
            import.weak_import,
            import.name_offset,
            import.addend
        )?;
    }
    Ok(())
}

fn dump_exports_trie<W: Write>(out: &mut W, trie: &DyldExportsTrie) -> io::Result<()> {
    writeln!(
        out,
        "LC_DYLD_EXPORTS_TRIE  off=0x{:08x} sz=0x{:08x} nexports={}",
        trie.cmd.dataoff,
        trie.cmd.datasize,
        trie.exports.len()
    )?;
    for export in &trie.exports {
        dump_export(out, export)?;
    }
    Ok(())
}

fn dump_export<W: Write>(out: &mut W, export: &DyldExport) -> io::Result<()> {
    match &export.info {
        DyldExportInfo::Regular {
            address,
            resolver: None,
        } => writeln!(
            out,
            "{}0x{:09x} {} {:?}",
            INDENT, address, export.name, export.flags
        ),
        DyldExportInfo::Regular {
            address,
            resolver: Some(resolver),
        } => writeln!(
            out,
            "{}0x{:09x} {} resolver=0x{:x} {:?}",
            INDENT, address, export.name, resolver, export.flags
        ),
        DyldExportInfo::Reexport {
            ordinal,
            import_name,
        } => writeln!(
            out,
            "{}[re-export] {} -> {} (dylib {})",
            INDENT, export.name, import_name, ordinal
        ),
    }
}
