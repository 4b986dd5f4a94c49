//! Binds linker-declared memory regions to ELF sections and assembles the
//! canonical analysis report.

mod mapping;

use std::collections::BTreeMap;
use std::path::Path;

use membrowse_debuginfo::{ElfMetadata, ProgramHeader, Symbol};
use membrowse_linker::MemoryRegion;
use serde::{Deserialize, Serialize};

pub use mapping::{bind_sections, RegionReport, SectionRef};

/// The canonical, `serde`-serializable analysis document: one ELF binary's
/// architecture/symbols/program headers plus its memory-region utilization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub file_path: String,
    pub architecture: String,
    pub entry_point: u64,
    pub file_type: String,
    pub machine: String,
    pub symbols: Vec<Symbol>,
    pub program_headers: Vec<ProgramHeader>,
    pub memory_layout: BTreeMap<String, RegionReport>,
}

/// Assembles the final report from the outputs of the linker parser and the
/// binary analyzer. `file_path` is recorded verbatim as given, not
/// canonicalized, so the report reflects how the binary was addressed on
/// the command line.
pub fn assemble(
    file_path: &Path,
    metadata: &ElfMetadata,
    symbols: Vec<Symbol>,
    program_headers: Vec<ProgramHeader>,
    sections: &[membrowse_debuginfo::MemorySection],
    regions: Vec<MemoryRegion>,
) -> Report {
    let memory_layout = bind_sections(regions, sections);

    Report {
        file_path: file_path.display().to_string(),
        architecture: metadata.architecture.clone(),
        entry_point: metadata.entry_point,
        file_type: metadata.file_type.clone(),
        machine: metadata.machine.clone(),
        symbols,
        program_headers,
        memory_layout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use membrowse_debuginfo::{SectionCategory, SymbolBinding, SymbolKind};

    #[test]
    fn assembles_report_with_memory_layout() {
        let metadata = ElfMetadata {
            architecture: "ELF32".to_string(),
            file_type: "EXEC".to_string(),
            machine: "ARM".to_string(),
            entry_point: 0x0800_0000,
        };
        let symbols = vec![Symbol {
            name: "main".to_string(),
            address: 0x0800_0010,
            size: 0x20,
            kind: SymbolKind::Func,
            binding: SymbolBinding::Global,
            section_name: ".text".to_string(),
            source_file: "main.c".to_string(),
            visibility: "default".to_string(),
        }];
        let sections = vec![membrowse_debuginfo::MemorySection {
            name: ".text".to_string(),
            address: 0x0800_0010,
            size: 0x20,
            category: SectionCategory::Text,
        }];
        let regions = vec![MemoryRegion::new("FLASH", "rx", 0x0800_0000, 0x1000)];

        let report = assemble(
            Path::new("firmware.elf"),
            &metadata,
            symbols,
            Vec::new(),
            &sections,
            regions,
        );

        assert_eq!(report.file_path, "firmware.elf");
        assert_eq!(report.memory_layout["FLASH"].used_size, 0x20);
        assert_eq!(report.symbols.len(), 1);
    }
}
