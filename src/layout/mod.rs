//! Layout rebuilding
//!
//! Writing an image back means replacing every note region with its freshly
//! encoded bytes. When a region changes size, the content after it has to
//! move, and with it every offset that points there: section and segment
//! offsets, segment sizes, and the header table offsets in the ELF header.
//! Mapped content never moves relative to its virtual address; a region
//! that cannot grow where it is mapped is moved behind the end of the file
//! and left unmapped.

mod plan;

use crate::{
    Result,
    elf::{ElfHeader, ElfTables},
    inconsistent_header_error, layout_overflow_error,
};
use alloc::{format, vec::Vec};
use elf::{
    abi::{PT_LOAD, SHF_ALLOC, SHT_NOBITS, SHT_NOTE, SHT_NULL},
    segment::ProgramHeader,
};
use plan::{FileShape, LayoutPlan};

/// The new contents of one note region.
#[derive(Clone, Debug)]
pub(crate) struct RegionPatch {
    /// file offset of the region
    pub(crate) offset: u64,
    /// size of the region in the input
    pub(crate) old_size: u64,
    /// alignment of the region start
    pub(crate) align: u64,
    /// encoded notes replacing the region
    pub(crate) bytes: Vec<u8>,
}

/// Produces a consistent ELF file from the original bytes and a set of
/// region patches.
///
/// The rebuilder never touches its inputs; header tables are updated on a
/// copy and serialized into the new file.
pub(crate) struct LayoutRebuilder<'a> {
    data: &'a [u8],
    header: &'a ElfHeader,
    tables: &'a ElfTables,
}

impl<'a> LayoutRebuilder<'a> {
    pub(crate) fn new(data: &'a [u8], header: &'a ElfHeader, tables: &'a ElfTables) -> Self {
        Self {
            data,
            header,
            tables,
        }
    }

    /// Applies `patches` and returns the new file.
    pub(crate) fn rebuild(&self, patches: Vec<RegionPatch>) -> Result<Vec<u8>> {
        self.check_patches(&patches)?;
        let mut table_offsets = Vec::with_capacity(2);
        if self.header.e_phnum() > 0 {
            table_offsets.push(self.header.e_phoff());
        }
        if self.header.e_shnum() > 0 {
            table_offsets.push(self.header.e_shoff());
        }
        let shape = FileShape {
            tables: self.tables,
            word_size: self.header.class().word_size(),
            max_offset: self.header.class().max_word(),
            table_offsets: &table_offsets,
            file_len: self.data.len() as u64,
        };
        let plan = LayoutPlan::new(shape, patches)?;
        self.check_note_bounds(&plan)?;
        self.check_header_tables(&plan)?;

        #[cfg(feature = "log")]
        if plan.is_identity() {
            log::trace!("[layout] no region changed size, splicing in place");
        }

        let tables = self.relocate_tables(&plan)?;
        let e_phoff = plan.relocate(self.header.e_phoff())?;
        let e_shoff = plan.relocate(self.header.e_shoff())?;
        let mut out = plan.splice(self.data)?;
        if out.len() as u64 > self.header.class().max_word() {
            return Err(layout_overflow_error(format!(
                "rebuilt image of 0x{:x} bytes exceeds the ELF class",
                out.len()
            )));
        }

        if self.header.e_phnum() > 0 {
            tables.write_phdrs(self.header, &mut out, e_phoff as usize)?;
        }
        if self.header.e_shnum() > 0 {
            tables.write_shdrs(self.header, &mut out, e_shoff as usize)?;
        }
        let e_phoff = if self.header.e_phnum() > 0 {
            e_phoff
        } else {
            self.header.e_phoff()
        };
        let e_shoff = if self.header.e_shnum() > 0 {
            e_shoff
        } else {
            self.header.e_shoff()
        };
        self.header.write_table_offsets(&mut out, e_phoff, e_shoff)?;
        Ok(out)
    }

    /// Every patch must lie inside the file and behind the ELF header.
    fn check_patches(&self, patches: &[RegionPatch]) -> Result<()> {
        let ehdr_end = self.header.class().ehdr_size() as u64;
        for patch in patches {
            let end = patch.offset.checked_add(patch.old_size);
            if end.is_none_or(|end| end > self.data.len() as u64) {
                return Err(inconsistent_header_error(format!(
                    "note region at 0x{:x} extends past the end of the file",
                    patch.offset
                )));
            }
            if patch.offset < ehdr_end {
                return Err(inconsistent_header_error(format!(
                    "note region at 0x{:x} overlaps the ELF header",
                    patch.offset
                )));
            }
        }
        Ok(())
    }

    /// A note section, or a segment other than `PT_LOAD`, touching a block
    /// that changes inside must start and end on region boundaries, otherwise
    /// its bytes would be split by the repacking. Blocks that only move as a
    /// whole keep every range inside them intact.
    fn check_note_bounds(&self, plan: &LayoutPlan) -> Result<()> {
        let sections = self
            .tables
            .shdrs
            .iter()
            .filter(|shdr| shdr.sh_type == SHT_NOTE && shdr.sh_size > 0)
            .map(|shdr| ("note section", shdr.sh_offset, shdr.sh_size));
        let segments = self
            .tables
            .phdrs
            .iter()
            .filter(|phdr| phdr.p_type != PT_LOAD && phdr.p_filesz > 0)
            .map(|phdr| ("segment", phdr.p_offset, phdr.p_filesz));
        for (kind, start, size) in sections.chain(segments) {
            let end = start.saturating_add(size);
            for block in plan.blocks() {
                if block.is_rigid() || !block.intersects(start, end) {
                    continue;
                }
                let starts_on_piece = block.pieces.iter().any(|piece| piece.old_start == start);
                let ends_on_piece = block.pieces.iter().any(|piece| piece.old_end == end);
                if !starts_on_piece || !ends_on_piece {
                    return Err(inconsistent_header_error(format!(
                        "{kind} [0x{start:x}, 0x{end:x}) only partially covers a note region"
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_header_tables(&self, plan: &LayoutPlan) -> Result<()> {
        let mut ranges = Vec::with_capacity(2);
        if self.header.e_phnum() > 0 {
            ranges.push(("program", self.header.phdr_range()));
        }
        if self.header.e_shnum() > 0 {
            ranges.push(("section", self.header.shdr_range()));
        }
        for (kind, (start, end)) in ranges {
            if plan.blocks().iter().any(|block| block.intersects(start, end)) {
                return Err(inconsistent_header_error(format!(
                    "{kind} header table at 0x{start:x} overlaps a note region"
                )));
            }
        }
        Ok(())
    }

    /// Moves every section and segment to its new place.
    ///
    /// Sizes are recomputed from the relocated start and end, which makes
    /// note sections take their new encoded length and segments that contain
    /// a block grow or shrink with it. `p_memsz` follows `p_filesz` by the
    /// same amount so the zero-filled tail of a segment is preserved.
    ///
    /// `PT_LOAD` addresses never change. Anything else mapped by a `PT_LOAD`
    /// keeps `addr - offset` equal to that of its segment, and whatever was
    /// evicted loses its address and `SHF_ALLOC`.
    fn relocate_tables(&self, plan: &LayoutPlan) -> Result<ElfTables> {
        let mut tables = self.tables.clone();
        for phdr in tables.phdrs.iter_mut().filter(|phdr| phdr.p_type == PT_LOAD) {
            let new_start = plan.relocate(phdr.p_offset)?;
            let new_end = match phdr.p_filesz {
                0 => new_start,
                filesz => plan.relocate_end(phdr.p_offset.saturating_add(filesz))?,
            };
            resize_segment(phdr, new_start, new_end)?;
        }
        let loads: Vec<(&ProgramHeader, &ProgramHeader)> = self
            .tables
            .phdrs
            .iter()
            .zip(tables.phdrs.iter())
            .filter(|(old, _)| old.p_type == PT_LOAD)
            .collect();

        let mut segments = tables.phdrs.clone();
        for phdr in segments.iter_mut().filter(|phdr| phdr.p_type != PT_LOAD) {
            let (start, end) = (phdr.p_offset, phdr.p_offset.saturating_add(phdr.p_filesz));
            let moved = plan.relocate_range(start, end)?;
            if moved.evicted {
                phdr.p_vaddr = 0;
                phdr.p_paddr = 0;
                phdr.p_memsz = 0;
            } else if let Some(delta) = address_delta(&loads, start, end, moved.start) {
                phdr.p_vaddr = phdr.p_vaddr.wrapping_add(delta);
                phdr.p_paddr = phdr.p_paddr.wrapping_add(delta);
            }
            resize_segment(phdr, moved.start, moved.end)?;
        }

        for shdr in tables.shdrs.iter_mut().skip(1) {
            if shdr.sh_type == SHT_NULL {
                continue;
            }
            let start = shdr.sh_offset;
            if shdr.sh_type == SHT_NOBITS {
                shdr.sh_offset = plan.relocate(start)?;
                continue;
            }
            let end = start.saturating_add(shdr.sh_size);
            let moved = plan.relocate_range(start, end)?;
            if moved.evicted {
                shdr.sh_flags &= !(SHF_ALLOC as u64);
                shdr.sh_addr = 0;
            } else if (shdr.sh_flags & SHF_ALLOC as u64) != 0 {
                if let Some(delta) = address_delta(&loads, start, end, moved.start) {
                    shdr.sh_addr = shdr.sh_addr.wrapping_add(delta);
                }
            }
            shdr.sh_size = moved.end.checked_sub(moved.start).ok_or_else(|| {
                inconsistent_header_error(format!("section at 0x{start:x} would end before it starts"))
            })?;
            shdr.sh_offset = moved.start;
        }
        tables.phdrs = segments;
        Ok(tables)
    }
}

/// Applies a relocated file range to a segment.
fn resize_segment(phdr: &mut ProgramHeader, new_start: u64, new_end: u64) -> Result<()> {
    if phdr.p_filesz > 0 {
        let start = phdr.p_offset;
        let new_filesz = new_end.checked_sub(new_start).ok_or_else(|| {
            inconsistent_header_error(format!("segment at 0x{start:x} would end before it starts"))
        })?;
        if phdr.p_memsz >= phdr.p_filesz {
            phdr.p_memsz = (phdr.p_memsz - phdr.p_filesz)
                .checked_add(new_filesz)
                .ok_or_else(|| layout_overflow_error("p_memsz overflows"))?;
        }
        phdr.p_filesz = new_filesz;
    }
    phdr.p_offset = new_start;
    Ok(())
}

/// How far the address of the mapped range `[start, end)` moves when its
/// bytes land at `new_start`: the distance it moved inside its `PT_LOAD`.
/// `None` when no `PT_LOAD` maps the range.
fn address_delta(
    loads: &[(&ProgramHeader, &ProgramHeader)],
    start: u64,
    end: u64,
    new_start: u64,
) -> Option<u64> {
    let (old, new) = loads.iter().find(|(old, _)| {
        old.p_offset <= start && end <= old.p_offset.saturating_add(old.p_filesz)
    })?;
    let moved = new_start.wrapping_sub(start);
    let load_moved = new.p_offset.wrapping_sub(old.p_offset);
    Some(moved.wrapping_sub(load_moved))
}
