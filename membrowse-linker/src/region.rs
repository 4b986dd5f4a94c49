use serde::{Deserialize, Serialize};

/// Classification of a declared `MEMORY` region, inferred from its name and,
/// failing that, its access attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RegionType {
    Flash,
    Rom,
    Ram,
    Ccm,
    Eeprom,
    Backup,
    Unknown,
}

impl RegionType {
    /// Applies the name-prefix rules, then the attribute-based fallback,
    /// in the order fixed by the linker-script parser's region typing pass.
    pub fn classify(name: &str, attributes: &str) -> RegionType {
        let lower = name.to_lowercase();
        const NAME_PATTERNS: &[(&str, RegionType)] = &[
            ("eeprom", RegionType::Eeprom),
            ("ccmram", RegionType::Ccm),
            ("ccm", RegionType::Ccm),
            ("backup", RegionType::Backup),
            ("flash", RegionType::Flash),
            ("rom", RegionType::Flash),
            ("code", RegionType::Flash),
            ("ram", RegionType::Ram),
            ("sram", RegionType::Ram),
            ("data", RegionType::Ram),
            ("heap", RegionType::Ram),
            ("stack", RegionType::Ram),
        ];
        for (needle, region_type) in NAME_PATTERNS {
            if lower.contains(needle) {
                return *region_type;
            }
        }

        let has_x = attributes.contains('x');
        let has_w = attributes.contains('w');
        let has_r = attributes.contains('r');
        if has_x && !has_w {
            RegionType::Rom
        } else if has_w {
            RegionType::Ram
        } else if has_r {
            RegionType::Rom
        } else {
            RegionType::Unknown
        }
    }
}

/// A declared memory region, as extracted from a `MEMORY { ... }` block.
///
/// This is the linker parser's output shape; utilization and bound sections
/// are computed later by the region mapper and carried in a wrapping report
/// type rather than here, since they depend on the binary, not the script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRegion {
    pub name: String,
    pub region_type: RegionType,
    pub attributes: String,
    pub start_address: u64,
    pub total_size: u64,
}

impl MemoryRegion {
    pub fn new(name: impl Into<String>, attributes: impl Into<String>, start_address: u64, total_size: u64) -> Self {
        let name = name.into();
        let attributes = attributes.into();
        let region_type = RegionType::classify(&name, &attributes);
        MemoryRegion {
            name,
            region_type,
            attributes,
            start_address,
            total_size,
        }
    }

    /// Last address contained in the region, inclusive. Regions with
    /// `total_size == 0` still report a valid (empty) range.
    pub fn end_address(&self) -> u64 {
        self.start_address.saturating_add(self.total_size.saturating_sub(1))
    }

    /// Exclusive upper bound, used by the region mapper's containment check.
    pub fn exclusive_end(&self) -> u64 {
        self.start_address.saturating_add(self.total_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_name_before_attributes() {
        assert_eq!(RegionType::classify("EEPROM", "rw"), RegionType::Eeprom);
        assert_eq!(RegionType::classify("CCMRAM", "rw"), RegionType::Ccm);
        assert_eq!(RegionType::classify("FLASH", "rx"), RegionType::Flash);
        assert_eq!(RegionType::classify("RAM", "rw"), RegionType::Ram);
    }

    #[test]
    fn classifies_unnamed_region_by_attributes() {
        assert_eq!(RegionType::classify("REGION1", "rx"), RegionType::Rom);
        assert_eq!(RegionType::classify("REGION2", "rw"), RegionType::Ram);
        assert_eq!(RegionType::classify("REGION3", "r"), RegionType::Rom);
        assert_eq!(RegionType::classify("REGION4", ""), RegionType::Unknown);
    }

    #[test]
    fn region_type_serializes_to_uppercase() {
        let json = serde_json::to_string(&RegionType::Flash).unwrap();
        assert_eq!(json, "\"FLASH\"");
        let json = serde_json::to_string(&RegionType::Unknown).unwrap();
        assert_eq!(json, "\"UNKNOWN\"");
    }
}
