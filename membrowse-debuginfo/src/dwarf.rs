//! DWARF compilation-unit, line-program and DIE-tree processing.
//!
//! Builds the address→file and (name,address)→file maps the source
//! resolver consults. Grounded on `gimli`'s reader API the way
//! `symbolic-debuginfo`'s `dwarf.rs` uses it, but the traversal rules
//! (CU-range bypass heuristic, Thumb tolerance, `.h`→`.c` preference) come
//! from the memory-footprint report's own attribution algorithm, not from
//! symbolication.

use std::collections::{BTreeSet, HashMap};

use gimli::{EndianSlice, RunTimeEndian};

use crate::error::DebugInfoError;

const MAX_ADDRESS: u64 = 0xFFFF_FFFF;
const THUMB_TOLERANCE: u64 = 2;
const WILDCARD_FRACTION_THRESHOLD: f64 = 0.8;

type Reader<'a> = EndianSlice<'a, RunTimeEndian>;

/// Maps built by the DWARF processor, consumed by the source resolver.
/// Owned and immutable for the lifetime of one analysis.
#[derive(Debug, Default, Clone)]
pub struct DwarfMaps {
    pub address_to_file: HashMap<u64, String>,
    pub symbol_to_file: HashMap<(String, u64), String>,
    pub address_to_cu_file: HashMap<u64, String>,
    pub static_symbol_mappings: Vec<(String, String, String)>,
}

/// A raw byte offset identifying a compilation unit within `.debug_info` (or
/// `.debug_types`), used purely as a hashable/orderable cache key —
/// `gimli::UnitSectionOffset` doesn't need to be more than that here.
type CuOffset = usize;

fn raw_offset(offset: gimli::UnitSectionOffset<usize>) -> CuOffset {
    match offset {
        gimli::UnitSectionOffset::DebugInfoOffset(o) => o.0,
        gimli::UnitSectionOffset::DebugTypesOffset(o) => o.0,
    }
}

struct CuRange {
    low: u64,
    high: u64,
    offset: CuOffset,
}

fn section_data<'a>(elf: &goblin::elf::Elf<'_>, data: &'a [u8], name: &str) -> &'a [u8] {
    for header in &elf.section_headers {
        if elf.shdr_strtab.get_at(header.sh_name) == Some(name) {
            let start = header.sh_offset as usize;
            let end = start.saturating_add(header.sh_size as usize);
            if end <= data.len() {
                return &data[start..end];
            }
        }
    }
    &[]
}

fn endianness(elf: &goblin::elf::Elf<'_>) -> RunTimeEndian {
    if elf.little_endian {
        RunTimeEndian::Little
    } else {
        RunTimeEndian::Big
    }
}

fn load_dwarf<'a>(elf: &goblin::elf::Elf<'_>, data: &'a [u8]) -> gimli::Dwarf<Reader<'a>> {
    let endian = endianness(elf);
    let load = |name: &str| -> Reader<'a> { EndianSlice::new(section_data(elf, data, name), endian) };

    gimli::Dwarf {
        debug_abbrev: gimli::DebugAbbrev::from(load(".debug_abbrev")),
        debug_addr: Default::default(),
        debug_aranges: Default::default(),
        debug_info: gimli::DebugInfo::from(load(".debug_info")),
        debug_line: gimli::DebugLine::from(load(".debug_line")),
        debug_line_str: gimli::DebugLineStr::from(load(".debug_line_str")),
        debug_str: gimli::DebugStr::from(load(".debug_str")),
        debug_str_offsets: gimli::DebugStrOffsets::from(load(".debug_str_offsets")),
        debug_types: Default::default(),
        locations: Default::default(),
        ranges: gimli::RangeLists::new(
            gimli::DebugRanges::from(load(".debug_ranges")),
            gimli::DebugRngLists::from(load(".debug_rnglists")),
        ),
        file_type: gimli::DwarfFileType::Main,
        sup: Default::default(),
    }
}

fn attr_address(
    attrs: &gimli::read::Attribute<Reader<'_>>,
) -> Option<u64> {
    match attrs.value() {
        gimli::AttributeValue::Addr(a) => Some(a),
        gimli::AttributeValue::Udata(u) => Some(u),
        _ => None,
    }
}

fn cu_range(root: &gimli::DebuggingInformationEntry<'_, '_, Reader<'_>>) -> (u64, u64) {
    let low_pc = root
        .attr(gimli::DW_AT_low_pc)
        .ok()
        .flatten()
        .and_then(|a| attr_address(&a));

    let high_pc_attr = root.attr(gimli::DW_AT_high_pc).ok().flatten();

    let (low, high) = match (low_pc, high_pc_attr) {
        (Some(low), Some(high_attr)) => {
            let high_val = match high_attr.value() {
                gimli::AttributeValue::Addr(a) => a,
                gimli::AttributeValue::Udata(u) => u,
                _ => return (0, MAX_ADDRESS),
            };
            if high_val < low {
                // offset form: DW_AT_high_pc is a size relative to low_pc
                (low, low + high_val)
            } else {
                (low, high_val)
            }
        }
        _ => (0, MAX_ADDRESS),
    };
    (low, high)
}

fn die_name<'a>(
    dwarf: &gimli::Dwarf<Reader<'a>>,
    unit: &gimli::Unit<Reader<'a>>,
    entry: &gimli::DebuggingInformationEntry<'_, '_, Reader<'a>>,
) -> Option<String> {
    let attr = entry.attr(gimli::DW_AT_name).ok().flatten()?;
    dwarf.attr_string(unit, attr.value()).ok().map(|r| {
        r.to_string_lossy().into_owned()
    })
}

fn cu_source_file<'a>(
    dwarf: &gimli::Dwarf<Reader<'a>>,
    unit: &gimli::Unit<Reader<'a>>,
    root: &gimli::DebuggingInformationEntry<'_, '_, Reader<'a>>,
) -> String {
    let name = die_name(dwarf, unit, root).unwrap_or_default();
    let comp_dir = root
        .attr(gimli::DW_AT_comp_dir)
        .ok()
        .flatten()
        .and_then(|a| dwarf.attr_string(unit, a.value()).ok())
        .map(|r| r.to_string_lossy().into_owned())
        .unwrap_or_default();

    if name.starts_with('/') || comp_dir.is_empty() {
        name
    } else {
        format!("{comp_dir}/{name}")
    }
}

fn file_entry_name<'a>(
    dwarf: &gimli::Dwarf<Reader<'a>>,
    unit: &gimli::Unit<Reader<'a>>,
    file_index: u64,
) -> Option<String> {
    let program = unit.line_program.as_ref()?;
    let header = program.header();
    let file = header.file(file_index)?;
    dwarf
        .attr_string(unit, file.path_name())
        .ok()
        .map(|r| r.to_string_lossy().into_owned())
}

fn is_near_any_symbol(addr: u64, sorted_symbols: &[u64]) -> bool {
    if sorted_symbols.is_empty() {
        return false;
    }
    let idx = sorted_symbols.partition_point(|&a| a < addr);
    if let Some(&at_or_after) = sorted_symbols.get(idx) {
        if at_or_after.abs_diff(addr) <= THUMB_TOLERANCE {
            return true;
        }
    }
    if idx > 0 {
        let before = sorted_symbols[idx - 1];
        if addr.abs_diff(before) <= THUMB_TOLERANCE {
            return true;
        }
    }
    false
}

/// Resolves `best_source_file` per the `.h`-declaration / CU-`.c`-definition
/// preference rule: a DIE that merely declares something in a header is
/// attributed to the CU's own source file, which is the one that actually
/// defines it.
fn best_source_file(is_declaration: bool, decl_file: &str, cu_source: &str) -> String {
    if is_declaration && decl_file.ends_with(".h") {
        cu_source.to_string()
    } else if !decl_file.is_empty() {
        decl_file.to_string()
    } else {
        cu_source.to_string()
    }
}

const RELEVANT_TAGS: &[gimli::DwTag] = &[
    gimli::DW_TAG_subprogram,
    gimli::DW_TAG_variable,
    gimli::DW_TAG_formal_parameter,
    gimli::DW_TAG_inlined_subroutine,
];

/// Builds the DWARF source-attribution maps for one binary.
///
/// `symbol_addresses` should contain every address the caller ultimately
/// needs a source file for (collected from the already-filtered symbol
/// table); it drives both the CU-selection bypass heuristic and the
/// Thumb-tolerance DIE filter.
pub fn process_dwarf_info(
    elf: &goblin::elf::Elf<'_>,
    data: &[u8],
    symbol_addresses: &BTreeSet<u64>,
    skip_line_program: bool,
) -> Result<DwarfMaps, DebugInfoError> {
    let dwarf = load_dwarf(elf, data);
    let mut maps = DwarfMaps::default();

    let sorted_symbols: Vec<u64> = symbol_addresses.iter().copied().collect();

    let mut ranges = Vec::new();
    let mut units = Vec::new();
    let mut iter = dwarf.units();
    loop {
        match iter.next() {
            Ok(Some(header)) => {
                let offset = raw_offset(header.offset());
                match dwarf.unit(header) {
                    Ok(unit) => units.push((offset, unit)),
                    Err(e) => {
                        tracing::debug!(error = %e, "failed to parse compilation unit, skipping");
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                return Err(DebugInfoError::DwarfParsingError(e.to_string()));
            }
        }
    }

    for (offset, unit) in &units {
        let mut cursor = unit.entries();
        if let Ok(Some((_, root))) = cursor.next_dfs() {
            let (low, high) = cu_range(root);
            ranges.push(CuRange { low, high, offset: *offset });
        }
    }

    let wildcard_count = ranges.iter().filter(|r| r.low == 0 && r.high == MAX_ADDRESS).count();
    let process_all = ranges.is_empty()
        || (wildcard_count as f64) > WILDCARD_FRACTION_THRESHOLD * ranges.len() as f64;

    let relevant_offsets: BTreeSet<CuOffset> = if process_all {
        ranges.iter().map(|r| r.offset).collect()
    } else {
        let mut sorted_ranges = ranges;
        sorted_ranges.sort_by_key(|r| r.low);
        let mut relevant = BTreeSet::new();
        for &addr in &sorted_symbols {
            let idx = sorted_ranges.partition_point(|r| r.low <= addr);
            if idx > 0 {
                let candidate = &sorted_ranges[idx - 1];
                if addr >= candidate.low && addr <= candidate.high {
                    relevant.insert(candidate.offset);
                }
            }
        }
        relevant
    };

    let mut processed: BTreeSet<CuOffset> = BTreeSet::new();

    for (offset, unit) in &units {
        if !relevant_offsets.contains(offset) {
            continue;
        }
        if !processed.insert(*offset) {
            continue;
        }
        if let Err(e) = process_unit(&dwarf, unit, &sorted_symbols, skip_line_program, &mut maps) {
            tracing::debug!(error = %e, "failed to process compilation unit, skipping");
        }
    }

    Ok(maps)
}

fn process_unit<'a>(
    dwarf: &gimli::Dwarf<Reader<'a>>,
    unit: &gimli::Unit<Reader<'a>>,
    sorted_symbols: &[u64],
    skip_line_program: bool,
    maps: &mut DwarfMaps,
) -> gimli::Result<()> {
    let mut root_cursor = unit.entries();
    let root = match root_cursor.next_dfs()? {
        Some((_, entry)) => entry.clone(),
        None => return Ok(()),
    };
    let cu_source = cu_source_file(dwarf, unit, &root);

    if !skip_line_program {
        process_line_program(dwarf, unit, maps)?;
    }

    let file_name_cache: HashMap<u64, String> = HashMap::new();
    process_die_tree(dwarf, unit, sorted_symbols, &cu_source, file_name_cache, maps)?;

    Ok(())
}

fn process_line_program<'a>(
    dwarf: &gimli::Dwarf<Reader<'a>>,
    unit: &gimli::Unit<Reader<'a>>,
    maps: &mut DwarfMaps,
) -> gimli::Result<()> {
    let Some(program) = unit.line_program.clone() else {
        return Ok(());
    };
    let mut rows = program.rows();
    while let Some((header, row)) = rows.next_row()? {
        let address = row.address();
        if address == 0 {
            continue;
        }
        let file_index = match row.file_index() {
            0 => continue,
            idx => idx,
        };
        let Some(file) = header.file(file_index) else {
            continue;
        };
        let Ok(name) = dwarf.attr_string(unit, file.path_name()) else {
            continue;
        };
        maps.address_to_file
            .insert(address, name.to_string_lossy().into_owned());
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn process_die_tree<'a>(
    dwarf: &gimli::Dwarf<Reader<'a>>,
    unit: &gimli::Unit<Reader<'a>>,
    sorted_symbols: &[u64],
    cu_source: &str,
    mut file_name_cache: HashMap<u64, String>,
    maps: &mut DwarfMaps,
) -> gimli::Result<()> {
    let mut cursor = unit.entries();

    // Iterative preorder walk; gimli's cursor already maintains its own
    // explicit stack, so no recursion into untyped debug trees occurs here.
    while let Some((_, entry)) = cursor.next_dfs()? {
        if !RELEVANT_TAGS.contains(&entry.tag()) {
            continue;
        }

        let Some(name) = die_name(dwarf, unit, entry) else {
            continue;
        };

        let address = entry
            .attr(gimli::DW_AT_low_pc)
            .ok()
            .flatten()
            .and_then(|a| attr_address(&a))
            .or_else(|| {
                entry
                    .attr(gimli::DW_AT_location)
                    .ok()
                    .flatten()
                    .and_then(|a| match a.value() {
                        gimli::AttributeValue::Udata(u) => Some(u),
                        _ => None,
                    })
            });

        if let Some(addr) = address {
            if !is_near_any_symbol(addr, sorted_symbols) {
                continue;
            }
        }

        let decl_file_index = entry
            .attr(gimli::DW_AT_decl_file)
            .ok()
            .flatten()
            .and_then(|a| match a.value() {
                gimli::AttributeValue::Udata(u) if u != 0 => Some(u),
                _ => None,
            });

        let decl_file = match decl_file_index {
            Some(idx) => file_name_cache
                .entry(idx)
                .or_insert_with(|| file_entry_name(dwarf, unit, idx).unwrap_or_default())
                .clone(),
            None => String::new(),
        };

        let is_declaration = entry.attr(gimli::DW_AT_declaration).ok().flatten().is_some();
        let source_file = best_source_file(is_declaration, &decl_file, cu_source);

        match address {
            Some(addr) => {
                maps.symbol_to_file.insert((name.clone(), addr), source_file.clone());
                maps.address_to_cu_file.insert(addr, source_file);
            }
            None => {
                maps.static_symbol_mappings
                    .push((name.clone(), cu_source.to_string(), decl_file));
                maps.symbol_to_file
                    .entry((name, 0))
                    .or_insert_with(|| source_file);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thumb_tolerance_matches_nearby_address() {
        let symbols = vec![100u64, 200, 300];
        assert!(is_near_any_symbol(101, &symbols));
        assert!(is_near_any_symbol(198, &symbols));
        assert!(!is_near_any_symbol(150, &symbols));
    }

    #[test]
    fn declaration_in_header_prefers_cu_source() {
        let result = best_source_file(true, "foo.h", "a.c");
        assert_eq!(result, "a.c");
    }

    #[test]
    fn definition_prefers_decl_file() {
        let result = best_source_file(false, "a.c", "a.c");
        assert_eq!(result, "a.c");
    }

    #[test]
    fn missing_decl_file_falls_back_to_cu_source() {
        let result = best_source_file(false, "", "a.c");
        assert_eq!(result, "a.c");
    }
}
