//! ELF binary analysis: sections, symbols (demangled, source-attributed),
//! program headers and coarse metadata.
//!
//! The public entry point is [`analyze`], which parses the ELF, extracts
//! sections/symbols/program headers and, unless `skip_line_program` is set,
//! walks DWARF to attribute each symbol back to a source file.

mod demangle;
mod dwarf;
mod elf;
mod error;
mod model;
mod source_resolver;

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

pub use error::{DebugInfoError, Result};
pub use model::{
    ElfMetadata, MemorySection, ProgramHeader, SectionCategory, SectionTotals, Symbol,
    SymbolBinding, SymbolKind,
};

/// Full result of analyzing one ELF binary.
#[derive(Debug, Clone)]
pub struct AnalyzedBinary {
    pub metadata: ElfMetadata,
    pub sections: Vec<MemorySection>,
    pub section_totals: SectionTotals,
    pub symbols: Vec<Symbol>,
    pub program_headers: Vec<ProgramHeader>,
}

/// Parses `path` as an ELF binary and produces the full analysis.
///
/// `skip_line_program` disables the DWARF line-number program walk, which
/// is the more expensive half of DWARF processing; DIE-tree attribution
/// still runs, so `Symbol::source_file` may still be populated from decl
/// attributes and CU source names.
pub fn analyze(path: &Path, skip_line_program: bool) -> Result<AnalyzedBinary> {
    if !path.exists() {
        return Err(DebugInfoError::InputNotFound(path.display().to_string()));
    }

    let data = fs::read(path).map_err(|source| DebugInfoError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let parsed = elf::parse(&data)?;
    let metadata = elf::metadata(&parsed);
    let (sections, section_totals) = elf::sections(&parsed);
    let program_headers = elf::program_headers(&parsed);
    let raw_symbols = elf::raw_symbols(&parsed);

    let symbol_addresses: BTreeSet<u64> = raw_symbols
        .iter()
        .filter(|s| s.address > 0)
        .map(|s| s.address)
        .collect();

    let maps = match dwarf::process_dwarf_info(&parsed, &data, &symbol_addresses, skip_line_program) {
        Ok(maps) => maps,
        Err(err) => {
            tracing::warn!(error = %err, "DWARF processing failed, symbols will have no source attribution");
            dwarf::DwarfMaps::default()
        }
    };

    let symbols = raw_symbols
        .into_iter()
        .map(|raw| {
            let source_file = source_resolver::resolve_source_file(&maps, &raw.name, raw.kind, raw.address);
            Symbol {
                name: demangle::demangle(&raw.name),
                address: raw.address,
                size: raw.size,
                kind: raw.kind,
                binding: raw.binding,
                section_name: raw.section_name,
                source_file,
                visibility: raw.visibility,
            }
        })
        .collect();

    Ok(AnalyzedBinary {
        metadata,
        sections,
        section_totals,
        symbols,
        program_headers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_binary_returns_input_not_found() {
        let result = analyze(Path::new("/nonexistent/path/to/binary.elf"), false);
        assert!(matches!(result, Err(DebugInfoError::InputNotFound(_))));
    }
}
