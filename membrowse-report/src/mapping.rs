//! Binds allocated sections to the memory regions declared by the linker
//! script and computes per-region utilization.

use std::collections::BTreeMap;

use membrowse_debuginfo::MemorySection;
use membrowse_linker::{MemoryRegion, RegionType};
use serde::{Deserialize, Serialize};

/// A section bound to a region, carried in the final report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionRef {
    pub name: String,
    pub address: u64,
    pub size: u64,
}

/// A declared region augmented with the sections bound to it and the
/// resulting utilization, as emitted in `memory_layout`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionReport {
    pub name: String,
    pub region_type: RegionType,
    pub attributes: String,
    pub start_address: u64,
    pub total_size: u64,
    pub used_size: u64,
    /// Signed: an overflowing firmware reports a negative free size rather
    /// than silently clamping to zero.
    pub free_size: i64,
    pub utilization_percent: f64,
    pub sections: Vec<SectionRef>,
}

fn affinity(region_type: RegionType) -> &'static str {
    match region_type {
        RegionType::Flash | RegionType::Rom => "code",
        RegionType::Ram => "data",
        RegionType::Ccm | RegionType::Eeprom | RegionType::Backup | RegionType::Unknown => "",
    }
}

fn section_affinity(section: &MemorySection) -> &'static str {
    use membrowse_debuginfo::SectionCategory::*;
    match section.category {
        Text | Rodata => "code",
        Data | Bss => "data",
        Debug | Other => "",
    }
}

/// Finds the region containing `address` by binary search, assuming
/// `sorted_regions` is sorted by `start_address`.
fn find_by_address(sorted_regions: &[MemoryRegion], address: u64) -> Option<usize> {
    let idx = sorted_regions.partition_point(|r| r.start_address <= address);
    if idx == 0 {
        return None;
    }
    let candidate = &sorted_regions[idx - 1];
    if address >= candidate.start_address && address < candidate.exclusive_end() {
        Some(idx - 1)
    } else {
        None
    }
}

fn find_by_affinity(regions: &[MemoryRegion], section: &MemorySection) -> Option<usize> {
    let wanted = section_affinity(section);
    if !wanted.is_empty() {
        if let Some(idx) = regions.iter().position(|r| affinity(r.region_type) == wanted) {
            return Some(idx);
        }
    }
    if regions.is_empty() {
        None
    } else {
        Some(0)
    }
}

/// Binds every allocated section (address `> 0`) to the region it falls
/// within — by address first, then by type affinity — and computes
/// utilization. Returned in region-name order.
pub fn bind_sections(
    regions: Vec<MemoryRegion>,
    sections: &[MemorySection],
) -> BTreeMap<String, RegionReport> {
    let mut sorted_regions = regions.clone();
    sorted_regions.sort_by_key(|r| r.start_address);

    let mut bound: Vec<Vec<SectionRef>> = vec![Vec::new(); regions.len()];
    let index_of = |name: &str| regions.iter().position(|r| r.name == name);

    for section in sections {
        if section.address == 0 {
            continue;
        }
        let region_idx = find_by_address(&sorted_regions, section.address)
            .and_then(|sorted_idx| index_of(&sorted_regions[sorted_idx].name))
            .or_else(|| find_by_affinity(&regions, section));

        match region_idx {
            Some(idx) => bound[idx].push(SectionRef {
                name: section.name.clone(),
                address: section.address,
                size: section.size,
            }),
            None => {
                tracing::debug!(
                    section = %section.name,
                    address = section.address,
                    "allocated section did not bind to any declared memory region"
                );
            }
        }
    }

    let mut out = BTreeMap::new();
    for (region, section_refs) in regions.into_iter().zip(bound.into_iter()) {
        let used_size: u64 = section_refs.iter().map(|s| s.size).sum();
        let free_size = region.total_size as i64 - used_size as i64;
        let utilization_percent = if region.total_size == 0 {
            0.0
        } else {
            (used_size as f64 / region.total_size as f64) * 100.0
        };

        out.insert(
            region.name.clone(),
            RegionReport {
                name: region.name,
                region_type: region.region_type,
                attributes: region.attributes,
                start_address: region.start_address,
                total_size: region.total_size,
                used_size,
                free_size,
                utilization_percent,
                sections: section_refs,
            },
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use membrowse_debuginfo::SectionCategory;

    fn region(name: &str, attrs: &str, start: u64, size: u64) -> MemoryRegion {
        MemoryRegion::new(name, attrs, start, size)
    }

    fn section(name: &str, address: u64, size: u64, category: SectionCategory) -> MemorySection {
        MemorySection {
            name: name.to_string(),
            address,
            size,
            category,
        }
    }

    #[test]
    fn binds_section_by_containing_address() {
        let regions = vec![region("FLASH", "rx", 0x0800_0000, 0x1000), region("RAM", "rw", 0x2000_0000, 0x1000)];
        let sections = vec![section(".text", 0x0800_0010, 0x100, SectionCategory::Text)];
        let report = bind_sections(regions, &sections);
        assert_eq!(report["FLASH"].used_size, 0x100);
        assert_eq!(report["RAM"].used_size, 0);
    }

    #[test]
    fn falls_back_to_type_affinity_when_address_unmapped() {
        let regions = vec![region("FLASH", "rx", 0x0800_0000, 0x1000), region("RAM", "rw", 0x2000_0000, 0x1000)];
        // Address outside every declared region but text-like: affinity picks FLASH.
        let sections = vec![section(".text.orphan", 0x9000_0000, 0x40, SectionCategory::Text)];
        let report = bind_sections(regions, &sections);
        assert_eq!(report["FLASH"].used_size, 0x40);
    }

    #[test]
    fn ccm_region_is_not_a_data_affinity_fallback() {
        let regions = vec![region("CCMRAM", "rw", 0x1000_0000, 0x1000)];
        let sections = vec![section(".data.orphan", 0x9000_0000, 0x40, SectionCategory::Data)];
        let report = bind_sections(regions, &sections);
        assert_eq!(report["CCMRAM"].used_size, 0);
    }

    #[test]
    fn skips_sections_with_zero_address() {
        let regions = vec![region("FLASH", "rx", 0x0800_0000, 0x1000)];
        let sections = vec![section(".debug_info", 0, 0x500, SectionCategory::Debug)];
        let report = bind_sections(regions, &sections);
        assert_eq!(report["FLASH"].used_size, 0);
    }

    #[test]
    fn utilization_is_zero_for_empty_region() {
        let regions = vec![region("EMPTY", "rw", 0x1000, 0)];
        let report = bind_sections(regions, &[]);
        assert_eq!(report["EMPTY"].utilization_percent, 0.0);
    }

    #[test]
    fn utilization_can_exceed_one_hundred_percent() {
        let regions = vec![region("FLASH", "rx", 0x1000, 0x10)];
        let sections = vec![section(".text", 0x1000, 0x20, SectionCategory::Text)];
        let report = bind_sections(regions, &sections);
        assert_eq!(report["FLASH"].utilization_percent, 200.0);
        assert_eq!(report["FLASH"].free_size, -0x10);
    }
}
