//! Block planning and offset relocation.
//!
//! Patches that sit next to each other (at most one alignment gap apart) are
//! merged into a block. How a block is rebuilt depends on what maps it.
//!
//! A block that ends its `PT_LOAD` (or is not loaded at all) is repacked: the
//! new region contents are laid out back to back, each on its own alignment,
//! and the block gets a slot whose size differs from the original by a
//! multiple of the largest alignment constraint found at or after it. Content
//! behind the block moves by that amount and keeps `p_offset % p_align`.
//!
//! A block followed by other mapped content of its `PT_LOAD` is pinned: its
//! slot keeps the original size so nothing after it moves relative to its
//! virtual address. Regions that still fit are repacked in place, the rest
//! are evicted behind the end of the file and their old bytes zeroed. Regions
//! that share a note segment are kept together either way.

use super::RegionPatch;
use crate::{
    Result,
    elf::{ElfTables, align_down, align_up},
    inconsistent_header_error, layout_overflow_error,
};
use alloc::{format, vec, vec::Vec};
use core::ops::Range;
use elf::{
    abi::{PT_LOAD, SHT_NOBITS, SHT_NULL},
    segment::ProgramHeader,
};

/// What the planner needs to know about the file besides the patches.
#[derive(Clone, Copy, Debug)]
pub(crate) struct FileShape<'a> {
    pub(crate) tables: &'a ElfTables,
    /// image word size, the alignment of the header tables
    pub(crate) word_size: u64,
    /// largest offset the ELF class can express
    pub(crate) max_offset: u64,
    /// file offsets of the header tables that exist
    pub(crate) table_offsets: &'a [u64],
    pub(crate) file_len: u64,
}

/// One patched region inside a block.
#[derive(Debug)]
pub(crate) struct Piece {
    pub(crate) old_start: u64,
    pub(crate) old_end: u64,
    pub(crate) new_start: u64,
    pub(crate) new_len: u64,
    /// moved behind the end of the file, no longer mapped
    pub(crate) evicted: bool,
}

impl Piece {
    #[inline]
    fn new_end(&self) -> u64 {
        self.new_start + self.new_len
    }
}

/// A run of adjacent pieces that is rewritten as a whole.
#[derive(Debug)]
pub(crate) struct Block {
    pub(crate) old_start: u64,
    pub(crate) old_end: u64,
    pub(crate) new_start: u64,
    pub(crate) new_end: u64,
    pub(crate) pieces: Vec<Piece>,
    /// packed pieces followed by zero fill, `new_end - new_start` bytes
    pub(crate) content: Vec<u8>,
}

impl Block {
    #[inline]
    pub(crate) fn intersects(&self, start: u64, end: u64) -> bool {
        start < self.old_end && self.old_start < end
    }

    /// Checks whether the block moves as a whole without changing inside.
    pub(crate) fn is_rigid(&self) -> bool {
        let shift = self.new_start.wrapping_sub(self.old_start);
        self.new_end.wrapping_sub(self.old_end) == shift
            && self.pieces.iter().all(|piece| {
                !piece.evicted
                    && piece.new_start.wrapping_sub(piece.old_start) == shift
                    && piece.new_len == piece.old_end - piece.old_start
            })
    }
}

/// Where an old `[start, end)` range lands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Relocated {
    pub(crate) start: u64,
    pub(crate) end: u64,
    /// the range was evicted with its note regions
    pub(crate) evicted: bool,
}

/// Note regions moved behind the end of the file, packed from offset 0.
struct EvictedUnit {
    block: usize,
    pieces: Range<usize>,
    align: u64,
    bytes: Vec<u8>,
}

/// The new placement of every block and the mapping from old file offsets
/// to new ones.
#[derive(Debug, Default)]
pub(crate) struct LayoutPlan {
    blocks: Vec<Block>,
    /// alignment padding and evicted regions appended to the file
    tail: Vec<u8>,
}

impl LayoutPlan {
    /// Plans the placement of `patches` in the file described by `shape`.
    pub(crate) fn new(shape: FileShape<'_>, mut patches: Vec<RegionPatch>) -> Result<Self> {
        patches.sort_by_key(|patch| patch.offset);
        let groups = group_patches(shape.tables, patches)?;

        let mut blocks: Vec<Block> = Vec::with_capacity(groups.len());
        let mut evicted = Vec::new();
        for group in groups {
            let old_start = group[0].offset;
            let old_end = group
                .iter()
                .map(|patch| patch.offset + patch.old_size)
                .max()
                .unwrap_or(old_start);
            let new_start = match blocks.last() {
                Some(prev) => checked_add(prev.new_end, old_start - prev.old_end)?,
                None => old_start,
            };

            let loads = containing_loads(shape.tables, old_start, old_end);
            let pinned = loads.iter().any(|load| {
                old_end < load.p_offset.saturating_add(load.p_filesz) || load.p_memsz > load.p_filesz
            });
            let block = if pinned {
                None
            } else {
                repack_block(&shape, &loads, &group, old_start, old_end, new_start)?
            };
            let block = match block {
                Some(block) => block,
                None => pin_block(
                    shape.tables,
                    &group,
                    old_start,
                    old_end,
                    new_start,
                    blocks.len(),
                    &mut evicted,
                )?,
            };
            check_limit(block.new_end, shape.max_offset)?;
            blocks.push(block);
        }

        let mut plan = Self {
            blocks,
            tail: Vec::new(),
        };
        plan.place_evicted(shape, evicted)?;
        Ok(plan)
    }

    /// Appends evicted units behind the relocated file, each on its alignment.
    fn place_evicted(&mut self, shape: FileShape<'_>, units: Vec<EvictedUnit>) -> Result<()> {
        if units.is_empty() {
            return Ok(());
        }
        let base = self.relocate_after(shape.file_len)?;
        let mut cursor = base;
        for unit in units {
            let start = align_up(cursor, unit.align)
                .ok_or_else(|| layout_overflow_error("evicted note region offset overflows"))?;
            let end = checked_add(start, unit.bytes.len() as u64)?;
            check_limit(end, shape.max_offset)?;
            let block = &mut self.blocks[unit.block];
            for piece in &mut block.pieces[unit.pieces] {
                piece.new_start += start;
            }

            #[cfg(feature = "log")]
            log::debug!(
                "[layout] note region(s) of block [0x{:x}, 0x{:x}) moved to [0x{:x}, 0x{:x}) and unmapped",
                block.old_start,
                block.old_end,
                start,
                end
            );

            self.tail.resize((start - base) as usize, 0);
            self.tail.extend_from_slice(&unit.bytes);
            cursor = end;
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Checks whether anything moves or changes size.
    pub(crate) fn is_identity(&self) -> bool {
        self.tail.is_empty()
            && self
                .blocks
                .iter()
                .all(|block| block.old_start == block.new_start && block.is_rigid())
    }

    fn fixed_pieces(&self) -> impl Iterator<Item = &Piece> {
        self.blocks
            .iter()
            .flat_map(|block| block.pieces.iter())
            .filter(|piece| !piece.evicted)
    }

    /// Maps the old file offset of the first byte of something to its new
    /// offset. Evicted regions are ignored: their old offsets keep pointing
    /// at the zeroed slot.
    pub(crate) fn relocate(&self, offset: u64) -> Result<u64> {
        if let Some(piece) = self.fixed_pieces().find(|piece| piece.old_start == offset) {
            return Ok(piece.new_start);
        }
        if let Some(block) = self
            .blocks
            .iter()
            .find(|block| block.old_start <= offset && offset < block.old_end)
        {
            return checked_add(block.new_start, offset - block.old_start);
        }
        self.relocate_after(offset)
    }

    /// Maps an old exclusive end offset to its new value.
    pub(crate) fn relocate_end(&self, end: u64) -> Result<u64> {
        if let Some(piece) = self
            .fixed_pieces()
            .find(|piece| piece.old_end == end && piece.old_start < end)
        {
            return Ok(piece.new_end());
        }
        if let Some(block) = self
            .blocks
            .iter()
            .find(|block| block.old_start < end && end < block.old_end)
        {
            return checked_add(block.new_start, end - block.old_start);
        }
        self.relocate_after(end)
    }

    /// Maps the old range `[start, end)` of a section or segment.
    ///
    /// A range made only of evicted regions follows them behind the end of
    /// the file. Any other range keeps its place relative to the content
    /// around it.
    pub(crate) fn relocate_range(&self, start: u64, end: u64) -> Result<Relocated> {
        for block in &self.blocks {
            let Some(first) = block
                .pieces
                .iter()
                .position(|piece| piece.evicted && piece.old_start == start)
            else {
                continue;
            };
            let last = if end == start {
                Some(first)
            } else {
                block.pieces[first..]
                    .iter()
                    .position(|piece| piece.old_end == end)
                    .map(|idx| first + idx)
            };
            let Some(last) = last else {
                continue;
            };
            if block.pieces[first..=last].iter().all(|piece| piece.evicted) {
                let new_start = block.pieces[first].new_start;
                let new_end = if end == start {
                    new_start
                } else {
                    block.pieces[last].new_end()
                };
                return Ok(Relocated {
                    start: new_start,
                    end: new_end,
                    evicted: true,
                });
            }
        }
        let new_start = self.relocate(start)?;
        let new_end = if end == start {
            new_start
        } else {
            self.relocate_end(end)?
        };
        Ok(Relocated {
            start: new_start,
            end: new_end,
            evicted: false,
        })
    }

    /// Offsets outside every block move by the total shift of the blocks
    /// before them.
    fn relocate_after(&self, offset: u64) -> Result<u64> {
        match self
            .blocks
            .iter()
            .rev()
            .find(|block| block.old_end <= offset)
        {
            Some(block) => checked_add(block.new_end, offset - block.old_end),
            None => Ok(offset),
        }
    }

    /// Builds the new file: bytes between blocks are copied verbatim, each
    /// block is replaced by its content and evicted regions are appended.
    pub(crate) fn splice(&self, data: &[u8]) -> Result<Vec<u8>> {
        let body_len = self.relocate_after(data.len() as u64)?;
        let new_len = checked_add(body_len, self.tail.len() as u64)?;
        let new_len = usize::try_from(new_len)
            .map_err(|_| layout_overflow_error("rebuilt image does not fit in memory"))?;
        let mut out = Vec::with_capacity(new_len);
        let mut copied = 0usize;
        for block in &self.blocks {
            out.extend_from_slice(&data[copied..block.old_start as usize]);
            out.extend_from_slice(&block.content);
            copied = block.old_end as usize;
        }
        out.extend_from_slice(&data[copied..]);
        out.extend_from_slice(&self.tail);
        debug_assert_eq!(out.len(), new_len);
        Ok(out)
    }
}

#[inline]
fn checked_add(a: u64, b: u64) -> Result<u64> {
    a.checked_add(b)
        .ok_or_else(|| layout_overflow_error(format!("offset 0x{a:x} + 0x{b:x} overflows")))
}

#[inline]
fn check_limit(offset: u64, max_offset: u64) -> Result<()> {
    if offset > max_offset {
        return Err(layout_overflow_error(format!(
            "offset 0x{offset:x} does not fit in the ELF class"
        )));
    }
    Ok(())
}

/// Lays `patches` out back to back from `base`, each on its alignment.
/// Returns the start of every patch and the end of the last one.
fn pack(patches: &[RegionPatch], base: u64) -> Result<(Vec<u64>, u64)> {
    let mut starts = Vec::with_capacity(patches.len());
    let mut cursor = base;
    for patch in patches {
        let start = align_up(cursor, patch.align)
            .ok_or_else(|| layout_overflow_error("note region offset overflows"))?;
        starts.push(start);
        cursor = checked_add(start, patch.bytes.len() as u64)?;
    }
    Ok((starts, cursor))
}

/// Repacks a block that nothing mapped follows, moving the content after it.
///
/// Returns `None` when the growth would push a containing `PT_LOAD` into
/// the address range of the next one.
fn repack_block(
    shape: &FileShape<'_>,
    loads: &[&ProgramHeader],
    group: &[RegionPatch],
    old_start: u64,
    old_end: u64,
    new_start: u64,
) -> Result<Option<Block>> {
    let (starts, cursor) = pack(group, new_start)?;
    let packed = cursor - new_start;
    let old_len = old_end - old_start;
    if packed > old_len
        && !loads
            .iter()
            .all(|load| has_room(shape.tables, load, packed - old_len))
    {
        return Ok(None);
    }

    let align = shift_align(shape.tables, shape.word_size, shape.table_offsets, old_start, old_end);
    let slot = if packed >= old_len {
        let grow = align_up(packed - old_len, align)
            .ok_or_else(|| layout_overflow_error("note region growth overflows"))?;
        checked_add(old_len, grow)?
    } else {
        old_len - align_down(old_len - packed, align)
    };
    let new_end = checked_add(new_start, slot)?;
    check_limit(new_end, shape.max_offset)?;

    let mut pieces = Vec::with_capacity(group.len());
    let mut content = Vec::with_capacity(slot as usize);
    for (patch, start) in group.iter().zip(starts) {
        content.resize((start - new_start) as usize, 0);
        content.extend_from_slice(&patch.bytes);
        pieces.push(Piece {
            old_start: patch.offset,
            old_end: patch.offset + patch.old_size,
            new_start: start,
            new_len: patch.bytes.len() as u64,
            evicted: false,
        });
    }
    content.resize(slot as usize, 0);

    #[cfg(feature = "log")]
    log::trace!(
        "[layout] block [0x{:x}, 0x{:x}) -> [0x{:x}, 0x{:x}), {} region(s), packed 0x{:x}, align 0x{:x}",
        old_start,
        old_end,
        new_start,
        new_end,
        pieces.len(),
        packed,
        align
    );

    Ok(Some(Block {
        old_start,
        old_end,
        new_start,
        new_end,
        pieces,
        content,
    }))
}

/// Rebuilds a block inside its original slot.
///
/// Every unit of linked regions is repacked from its old start when it still
/// fits before its old end, and evicted otherwise.
fn pin_block(
    tables: &ElfTables,
    group: &[RegionPatch],
    old_start: u64,
    old_end: u64,
    new_start: u64,
    block_idx: usize,
    evicted: &mut Vec<EvictedUnit>,
) -> Result<Block> {
    let mut pieces = Vec::with_capacity(group.len());
    let mut content = vec![0u8; (old_end - old_start) as usize];
    for unit in linked_units(tables, group) {
        let patches = &group[unit];
        let unit_start = patches[0].offset;
        let unit_end = patches
            .iter()
            .map(|patch| patch.offset + patch.old_size)
            .max()
            .unwrap_or(unit_start);
        let (starts, end) = pack(patches, unit_start)?;
        if end <= unit_end {
            for (patch, start) in patches.iter().zip(starts) {
                let at = (start - old_start) as usize;
                content[at..at + patch.bytes.len()].copy_from_slice(&patch.bytes);
                pieces.push(Piece {
                    old_start: patch.offset,
                    old_end: patch.offset + patch.old_size,
                    new_start: checked_add(new_start, start - old_start)?,
                    new_len: patch.bytes.len() as u64,
                    evicted: false,
                });
            }
            continue;
        }

        let (starts, end) = pack(patches, 0)?;
        let mut bytes = Vec::with_capacity(end as usize);
        let first = pieces.len();
        for (patch, start) in patches.iter().zip(starts) {
            bytes.resize(start as usize, 0);
            bytes.extend_from_slice(&patch.bytes);
            pieces.push(Piece {
                old_start: patch.offset,
                old_end: patch.offset + patch.old_size,
                new_start: start,
                new_len: patch.bytes.len() as u64,
                evicted: true,
            });
        }
        evicted.push(EvictedUnit {
            block: block_idx,
            pieces: first..pieces.len(),
            align: patches.iter().map(|patch| patch.align).fold(1, u64::max),
            bytes,
        });
    }

    #[cfg(feature = "log")]
    log::trace!(
        "[layout] block [0x{:x}, 0x{:x}) pinned at 0x{:x}, {} of {} region(s) evicted",
        old_start,
        old_end,
        new_start,
        pieces.iter().filter(|piece| piece.evicted).count(),
        pieces.len()
    );

    Ok(Block {
        old_start,
        old_end,
        new_start,
        new_end: checked_add(new_start, old_end - old_start)?,
        pieces,
        content,
    })
}

/// Splits a sorted group into runs of regions joined by a segment other than
/// `PT_LOAD` that spans from one region into the next.
fn linked_units(tables: &ElfTables, group: &[RegionPatch]) -> Vec<Range<usize>> {
    let mut units = Vec::new();
    let mut first = 0;
    for idx in 1..group.len() {
        let prev = &group[idx - 1];
        let next = &group[idx];
        let linked = tables.phdrs.iter().any(|phdr| {
            phdr.p_type != PT_LOAD
                && phdr.p_filesz > 0
                && phdr.p_offset < prev.offset + prev.old_size
                && next.offset < phdr.p_offset.saturating_add(phdr.p_filesz)
        });
        if !linked {
            units.push(first..idx);
            first = idx;
        }
    }
    units.push(first..group.len());
    units
}

fn containing_loads(tables: &ElfTables, start: u64, end: u64) -> Vec<&ProgramHeader> {
    tables
        .phdrs
        .iter()
        .filter(|phdr| {
            phdr.p_type == PT_LOAD
                && phdr.p_offset <= start
                && end <= phdr.p_offset.saturating_add(phdr.p_filesz)
        })
        .collect()
}

/// Checks whether `load` can grow by `grow` bytes without running into the
/// address range of the next `PT_LOAD`, or into its page when it did not
/// share that page before.
fn has_room(tables: &ElfTables, load: &ProgramHeader, grow: u64) -> bool {
    let old_end = load.p_vaddr.saturating_add(load.p_memsz);
    let Some(new_end) = old_end.checked_add(grow) else {
        return false;
    };
    let next = tables
        .phdrs
        .iter()
        .filter(|phdr| phdr.p_type == PT_LOAD && phdr.p_vaddr > load.p_vaddr)
        .map(|phdr| phdr.p_vaddr)
        .min();
    let Some(next) = next else {
        return true;
    };
    let page = load.p_align.max(1);
    let same_pages = align_up(new_end, page)
        .zip(align_up(old_end, page))
        .is_some_and(|(new, old)| new <= old);
    new_end <= next && (new_end <= align_down(next, page) || same_pages)
}

/// Sorted patches, grouped into blocks.
///
/// A patch joins the previous group when it starts within one alignment
/// gap of the group's end and that gap holds no section content.
fn group_patches(tables: &ElfTables, patches: Vec<RegionPatch>) -> Result<Vec<Vec<RegionPatch>>> {
    let mut groups: Vec<Vec<RegionPatch>> = Vec::new();
    let mut group_end = 0u64;
    for patch in patches {
        let end = patch
            .offset
            .checked_add(patch.old_size)
            .ok_or_else(|| inconsistent_header_error("note region end overflows"))?;
        let joins = match groups.last() {
            Some(_) if patch.offset < group_end => {
                return Err(inconsistent_header_error(format!(
                    "note regions overlap at 0x{:x}",
                    patch.offset
                )));
            }
            Some(_) => {
                let reach = align_up(group_end, patch.align).unwrap_or(u64::MAX);
                patch.offset <= reach && gap_is_free(tables, group_end, patch.offset)
            }
            None => false,
        };
        if joins {
            if let Some(group) = groups.last_mut() {
                group.push(patch);
            }
        } else {
            groups.push(alloc::vec![patch]);
        }
        group_end = group_end.max(end);
    }
    Ok(groups)
}

fn gap_is_free(tables: &ElfTables, start: u64, end: u64) -> bool {
    start == end
        || !tables.shdrs.iter().any(|shdr| {
            shdr.sh_type != SHT_NULL
                && shdr.sh_type != SHT_NOBITS
                && shdr.sh_size > 0
                && shdr.sh_offset < end
                && start < shdr.sh_offset.saturating_add(shdr.sh_size)
        })
}

/// The alignment every shift of the block `[start, end)` must be a multiple of.
fn shift_align(
    tables: &ElfTables,
    word_size: u64,
    table_offsets: &[u64],
    start: u64,
    end: u64,
) -> u64 {
    let sections = tables
        .shdrs
        .iter()
        .filter(|shdr| shdr.sh_type != SHT_NULL && shdr.sh_offset >= end)
        .map(|shdr| shdr.sh_addralign);
    let segments = tables
        .phdrs
        .iter()
        .filter(|phdr| {
            phdr.p_offset >= end
                || (phdr.p_type == PT_LOAD
                    && phdr.p_offset <= start
                    && end <= phdr.p_offset.saturating_add(phdr.p_filesz))
        })
        .map(|phdr| phdr.p_align);
    let header_tables = table_offsets
        .iter()
        .filter(|offset| **offset >= end)
        .map(|_| word_size);
    sections
        .chain(segments)
        .chain(header_tables)
        .fold(1, u64::max)
}
