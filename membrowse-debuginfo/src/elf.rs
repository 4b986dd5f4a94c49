//! ELF section, symbol and program-header extraction.
//!
//! Mirrors the parsing style of `symbolic-debuginfo`'s ELF backend (goblin's
//! lazily-parsed `Elf` plus the raw byte slice kept alongside it) but the
//! semantics here — which sections/symbols survive filtering, how they are
//! categorized — follow the memory-footprint report's own rules rather than
//! symbolication's.

use goblin::elf::sym::{STB_GLOBAL, STB_LOCAL, STB_WEAK, STT_FUNC, STT_OBJECT};
use goblin::elf::Elf;

use crate::error::DebugInfoError;
use crate::model::{
    ElfMetadata, MemorySection, ProgramHeader, SectionCategory, SectionTotals, SymbolBinding, SymbolKind,
};

const SHF_ALLOC: u64 = 0x2;

pub fn parse(data: &[u8]) -> Result<Elf<'_>, DebugInfoError> {
    Elf::parse(data).map_err(|e| DebugInfoError::InvalidBinaryFormat(e.to_string()))
}

pub fn metadata(elf: &Elf<'_>) -> ElfMetadata {
    let header = &elf.header;
    let architecture = if elf.is_64 { "ELF64" } else { "ELF32" };

    let file_type = match header.e_type {
        goblin::elf::header::ET_EXEC => "EXEC",
        goblin::elf::header::ET_DYN => "DYN",
        goblin::elf::header::ET_REL => "REL",
        goblin::elf::header::ET_CORE => "CORE",
        other => return ElfMetadata {
            architecture: architecture.to_string(),
            file_type: other.to_string(),
            machine: machine_name(header.e_machine),
            entry_point: header.e_entry,
        },
    };

    ElfMetadata {
        architecture: architecture.to_string(),
        file_type: file_type.to_string(),
        machine: machine_name(header.e_machine),
        entry_point: header.e_entry,
    }
}

fn machine_name(e_machine: u16) -> String {
    use goblin::elf::header::*;
    match e_machine {
        EM_ARM => "ARM",
        EM_AARCH64 => "ARM64",
        EM_X86_64 => "x86_64",
        EM_386 => "x86",
        0x5E => "Xtensa",
        EM_RISCV => "RISC-V",
        EM_MIPS => "MIPS",
        _ => return e_machine.to_string(),
    }
    .to_string()
}

pub fn sections(elf: &Elf<'_>) -> (Vec<MemorySection>, SectionTotals) {
    let mut out = Vec::new();
    let mut totals = SectionTotals::default();

    for header in &elf.section_headers {
        if header.sh_flags & SHF_ALLOC == 0 {
            continue;
        }
        let Some(name) = elf.shdr_strtab.get_at(header.sh_name) else {
            continue;
        };
        if name.is_empty() {
            continue;
        }

        let section = MemorySection {
            name: name.to_string(),
            address: header.sh_addr,
            size: header.sh_size,
            category: SectionCategory::classify(name),
        };
        totals.add(&section);
        out.push(section);
    }

    (out, totals)
}

pub fn program_headers(elf: &Elf<'_>) -> Vec<ProgramHeader> {
    elf.program_headers
        .iter()
        .map(|ph| ProgramHeader {
            r#type: program_header_type_name(ph.p_type),
            offset: ph.p_offset,
            virt_addr: ph.p_vaddr,
            phys_addr: ph.p_paddr,
            file_size: ph.p_filesz,
            mem_size: ph.p_memsz,
            flags: decode_segment_flags(ph.p_flags),
            align: ph.p_align,
        })
        .collect()
}

fn program_header_type_name(p_type: u32) -> String {
    use goblin::elf::program_header::*;
    match p_type {
        PT_NULL => "NULL",
        PT_LOAD => "LOAD",
        PT_DYNAMIC => "DYNAMIC",
        PT_INTERP => "INTERP",
        PT_NOTE => "NOTE",
        PT_SHLIB => "SHLIB",
        PT_PHDR => "PHDR",
        PT_TLS => "TLS",
        _ => return format!("0x{p_type:x}"),
    }
    .to_string()
}

fn decode_segment_flags(flags: u32) -> String {
    const PF_X: u32 = 0x1;
    const PF_W: u32 = 0x2;
    const PF_R: u32 = 0x4;

    let mut out = String::new();
    if flags & PF_R != 0 {
        out.push('R');
    }
    if flags & PF_W != 0 {
        out.push('W');
    }
    if flags & PF_X != 0 {
        out.push('X');
    }
    if out.is_empty() {
        "---".to_string()
    } else {
        out
    }
}

/// Pre-filter, pre-demangle, pre-source-resolution view of a symbol-table
/// entry, in ELF symbol-table order.
#[derive(Debug, Clone)]
pub struct RawSymbol {
    pub name: String,
    pub address: u64,
    pub size: u64,
    pub kind: SymbolKind,
    pub binding: SymbolBinding,
    pub section_name: String,
    pub visibility: String,
    pub is_local: bool,
}

fn symbol_kind(st_type: u8) -> Option<SymbolKind> {
    use goblin::elf::sym::*;
    Some(match st_type {
        STT_NOTYPE => SymbolKind::NoType,
        STT_OBJECT => SymbolKind::Object,
        STT_FUNC => SymbolKind::Func,
        STT_SECTION => SymbolKind::Section,
        STT_FILE => SymbolKind::File,
        STT_COMMON => SymbolKind::Common,
        STT_TLS => SymbolKind::Tls,
        _ => return None,
    })
}

fn symbol_binding(st_bind: u8) -> SymbolBinding {
    match st_bind {
        STB_LOCAL => SymbolBinding::Local,
        STB_WEAK => SymbolBinding::Weak,
        _ => SymbolBinding::Global,
    }
}

fn visibility_name(st_other: u8) -> &'static str {
    match st_other & 0x3 {
        1 => "internal",
        2 => "hidden",
        3 => "protected",
        _ => "default",
    }
}

/// Filters and extracts every `.symtab` entry: drop unnamed/`$`-prefixed
/// symbols, and drop local symbols that are neither FUNC nor OBJECT and
/// carry no size (linker/assembler noise).
pub fn raw_symbols(elf: &Elf<'_>) -> Vec<RawSymbol> {
    let mut out = Vec::new();

    for sym in elf.syms.iter() {
        let Some(name) = elf.strtab.get_at(sym.st_name) else {
            continue;
        };
        if name.is_empty() || name.starts_with('$') {
            continue;
        }

        let st_bind = sym.st_bind();
        let st_type = sym.st_type();
        let Some(kind) = symbol_kind(st_type) else {
            continue;
        };
        let binding = symbol_binding(st_bind);
        let is_local = st_bind == STB_LOCAL;

        if is_local && !matches!(st_type, STT_FUNC | STT_OBJECT) && sym.st_size == 0 {
            continue;
        }

        let section_name = elf
            .section_headers
            .get(sym.st_shndx)
            .and_then(|sh| elf.shdr_strtab.get_at(sh.sh_name))
            .unwrap_or("")
            .to_string();

        out.push(RawSymbol {
            name: name.to_string(),
            address: sym.st_value,
            size: sym.st_size,
            kind,
            binding,
            section_name,
            visibility: visibility_name(sym.st_other).to_string(),
            is_local,
        });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_segment_flags() {
        assert_eq!(decode_segment_flags(0x4 | 0x1), "RX");
        assert_eq!(decode_segment_flags(0x4 | 0x2), "RW");
        assert_eq!(decode_segment_flags(0), "---");
    }

    #[test]
    fn section_category_matches_by_prefix() {
        assert_eq!(SectionCategory::classify(".text.startup"), SectionCategory::Text);
        assert_eq!(SectionCategory::classify(".sbss"), SectionCategory::Bss);
        assert_eq!(SectionCategory::classify(".rodata.str1"), SectionCategory::Rodata);
        assert_eq!(SectionCategory::classify(".comment"), SectionCategory::Other);
    }
}
