use serde::{Deserialize, Serialize};

/// Name-prefix category an allocated section is bucketed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionCategory {
    Text,
    Data,
    Bss,
    Rodata,
    Debug,
    Other,
}

impl SectionCategory {
    pub fn classify(name: &str) -> SectionCategory {
        let lower = name.to_lowercase();
        if starts_with_any(&lower, &[".text", ".init", ".fini"]) {
            SectionCategory::Text
        } else if starts_with_any(&lower, &[".data", ".sdata", ".tdata"]) {
            SectionCategory::Data
        } else if starts_with_any(&lower, &[".bss", ".sbss", ".tbss"]) {
            SectionCategory::Bss
        } else if starts_with_any(&lower, &[".rodata", ".const"]) {
            SectionCategory::Rodata
        } else if starts_with_any(&lower, &[".debug", ".stab"]) {
            SectionCategory::Debug
        } else {
            SectionCategory::Other
        }
    }
}

fn starts_with_any(haystack: &str, prefixes: &[&str]) -> bool {
    prefixes.iter().any(|p| haystack.starts_with(p))
}

/// An allocated ELF section (`SHF_ALLOC` set).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySection {
    pub name: String,
    pub address: u64,
    pub size: u64,
    pub category: SectionCategory,
}

impl MemorySection {
    pub fn end_address(&self) -> u64 {
        self.address.saturating_add(self.size)
    }
}

/// Per-category byte totals across all allocated sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SectionTotals {
    pub text_size: u64,
    pub data_size: u64,
    pub bss_size: u64,
    pub rodata_size: u64,
    pub debug_size: u64,
    pub other_size: u64,
    pub total_file_size: u64,
}

impl SectionTotals {
    pub fn add(&mut self, section: &MemorySection) {
        match section.category {
            SectionCategory::Text => self.text_size += section.size,
            SectionCategory::Data => self.data_size += section.size,
            SectionCategory::Bss => self.bss_size += section.size,
            SectionCategory::Rodata => self.rodata_size += section.size,
            SectionCategory::Debug => self.debug_size += section.size,
            SectionCategory::Other => self.other_size += section.size,
        }
        self.total_file_size += section.size;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SymbolKind {
    NoType,
    Object,
    Func,
    Section,
    File,
    Common,
    Tls,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SymbolBinding {
    Local,
    Global,
    Weak,
}

/// A filtered, possibly-demangled ELF symbol-table entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub address: u64,
    pub size: u64,
    pub kind: SymbolKind,
    pub binding: SymbolBinding,
    pub section_name: String,
    pub source_file: String,
    pub visibility: String,
}

/// Decoded program header (segment).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramHeader {
    pub r#type: String,
    pub offset: u64,
    pub virt_addr: u64,
    pub phys_addr: u64,
    pub file_size: u64,
    pub mem_size: u64,
    pub flags: String,
    pub align: u64,
}

/// Coarse ELF metadata, independent of debug info.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElfMetadata {
    pub architecture: String,
    pub file_type: String,
    pub machine: String,
    pub entry_point: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_kind_serializes_to_uppercase() {
        assert_eq!(serde_json::to_string(&SymbolKind::NoType).unwrap(), "\"NOTYPE\"");
        assert_eq!(serde_json::to_string(&SymbolKind::Func).unwrap(), "\"FUNC\"");
        assert_eq!(serde_json::to_string(&SymbolKind::Tls).unwrap(), "\"TLS\"");
    }

    #[test]
    fn symbol_binding_serializes_to_uppercase() {
        assert_eq!(serde_json::to_string(&SymbolBinding::Local).unwrap(), "\"LOCAL\"");
        assert_eq!(serde_json::to_string(&SymbolBinding::Weak).unwrap(), "\"WEAK\"");
    }

    #[test]
    fn section_category_serializes_to_lowercase() {
        assert_eq!(serde_json::to_string(&SectionCategory::Rodata).unwrap(), "\"rodata\"");
    }
}
