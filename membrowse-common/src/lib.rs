//! Architecture and platform detection shared across the `membrowse-*` crates.
//!
//! This crate reads just enough of an ELF header to classify the target
//! instruction set and, heuristically, the board family a firmware image was
//! built for. Both pieces of information feed the linker-script parser's
//! default variable tables.

use serde::{Deserialize, Serialize};

/// Instruction-set architecture inferred from `e_machine`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Architecture {
    Arm,
    Aarch64,
    Xtensa,
    RiscV,
    X86,
    X86_64,
    Mips,
    Unknown,
}

impl Architecture {
    /// Returns the conventional short name used in reports (`"ARM"`, `"x86_64"`, ...).
    ///
    /// # Examples
    ///
    /// ```
    /// use membrowse_common::Architecture;
    /// assert_eq!(Architecture::X86_64.name(), "x86_64");
    /// ```
    pub fn name(self) -> &'static str {
        match self {
            Architecture::Arm => "ARM",
            Architecture::Aarch64 => "ARM64",
            Architecture::Xtensa => "Xtensa",
            Architecture::RiscV => "RISC-V",
            Architecture::X86 => "x86",
            Architecture::X86_64 => "x86_64",
            Architecture::Mips => "MIPS",
            Architecture::Unknown => "unknown",
        }
    }

    /// Maps an ELF `e_machine` value to an [`Architecture`].
    pub fn from_machine(e_machine: u16) -> Architecture {
        match e_machine {
            0x03 => Architecture::X86,
            0x08 => Architecture::Mips,
            0x28 => Architecture::Arm,
            0x3E => Architecture::X86_64,
            0x5E => Architecture::Xtensa,
            0xB7 => Architecture::Aarch64,
            0xF3 => Architecture::RiscV,
            _ => Architecture::Unknown,
        }
    }
}

/// Board or SoC family, inferred from the binary's path and, as a last
/// resort, its architecture. Drives the linker parser's platform-specific
/// default variable tables (see `membrowse_linker::defaults`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Platform {
    Stm32,
    Esp32,
    Esp8266,
    Nrf,
    Samd,
    MimxRt,
    Renesas,
    Rp2,
    Qemu,
    Unix,
    Unknown,
}

impl Platform {
    /// True for platforms that run without an OS and are the primary target
    /// of this crate's heuristics.
    pub fn is_embedded(self) -> bool {
        !matches!(self, Platform::Unix | Platform::Unknown)
    }

    fn detect_from_path(path_lower: &str) -> Option<Platform> {
        const MATCHES: &[(&str, Platform)] = &[
            ("esp32", Platform::Esp32),
            ("esp8266", Platform::Esp8266),
            ("stm32", Platform::Stm32),
            ("bare-arm", Platform::Stm32),
            ("nrf", Platform::Nrf),
            ("samd", Platform::Samd),
            ("mimxrt", Platform::MimxRt),
            ("renesas", Platform::Renesas),
            ("rp2", Platform::Rp2),
            ("pico", Platform::Rp2),
            ("qemu", Platform::Qemu),
        ];
        MATCHES
            .iter()
            .find(|(needle, _)| path_lower.contains(needle))
            .map(|(_, platform)| *platform)
    }

    /// Infers a platform from a file path and, failing that, from the
    /// architecture alone.
    pub fn detect(path: &str, arch: Architecture) -> Platform {
        let path_lower = path.to_lowercase();
        if let Some(platform) = Self::detect_from_path(&path_lower) {
            return platform;
        }
        match arch {
            Architecture::Arm | Architecture::Aarch64 => Platform::Stm32,
            Architecture::Xtensa => Platform::Esp32,
            Architecture::RiscV => Platform::Qemu,
            Architecture::X86 | Architecture::X86_64 => Platform::Unix,
            _ => Platform::Unknown,
        }
    }
}

/// Endianness of the target binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endianness {
    Little,
    Big,
}

/// Result of inspecting an ELF header prefix, before the full file is parsed.
///
/// Produced once per binary and threaded through to the linker-script parser
/// so it can seed platform-specific default variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElfInfo {
    pub architecture: Architecture,
    pub platform: Platform,
    pub bit_width: u8,
    pub endianness: Endianness,
    pub machine_type: u16,
    pub is_embedded: bool,
}

const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// Reads the leading bytes of an ELF file and classifies architecture and
/// platform. Returns `None` on any malformed input rather than erroring —
/// callers treat this purely as a best-effort hint.
pub fn detect_elf_info(header: &[u8], path: &str) -> Option<ElfInfo> {
    if header.len() < 20 || header[0..4] != ELF_MAGIC {
        return None;
    }

    let ei_class = header[4];
    let ei_data = header[5];

    let bit_width = match ei_class {
        1 => 32,
        2 => 64,
        _ => return None,
    };

    let endianness = match ei_data {
        1 => Endianness::Little,
        2 => Endianness::Big,
        _ => return None,
    };

    let machine_type = match endianness {
        Endianness::Little => u16::from_le_bytes([header[18], header[19]]),
        Endianness::Big => u16::from_be_bytes([header[18], header[19]]),
    };

    let architecture = Architecture::from_machine(machine_type);
    let platform = Platform::detect(path, architecture);

    Some(ElfInfo {
        architecture,
        platform,
        bit_width,
        endianness,
        machine_type,
        is_embedded: platform.is_embedded(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elf_header(ei_class: u8, ei_data: u8, e_machine: u16) -> Vec<u8> {
        let mut header = vec![0u8; 64];
        header[0..4].copy_from_slice(&ELF_MAGIC);
        header[4] = ei_class;
        header[5] = ei_data;
        let machine_bytes = if ei_data == 1 {
            e_machine.to_le_bytes()
        } else {
            e_machine.to_be_bytes()
        };
        header[18..20].copy_from_slice(&machine_bytes);
        header
    }

    #[test]
    fn rejects_non_elf() {
        assert!(detect_elf_info(b"not an elf file at all", "firmware.elf").is_none());
    }

    #[test]
    fn detects_arm_stm32_by_path() {
        let header = elf_header(1, 1, 0x28);
        let info = detect_elf_info(&header, "build/stm32f4/firmware.elf").unwrap();
        assert_eq!(info.architecture, Architecture::Arm);
        assert_eq!(info.platform, Platform::Stm32);
        assert_eq!(info.bit_width, 32);
        assert!(info.is_embedded);
    }

    #[test]
    fn arm_with_no_path_hint_defaults_to_stm32() {
        let header = elf_header(1, 1, 0x28);
        let info = detect_elf_info(&header, "out/app.elf").unwrap();
        assert_eq!(info.platform, Platform::Stm32);
    }

    #[test]
    fn detects_xtensa_esp32_default() {
        let header = elf_header(1, 1, 0x5E);
        let info = detect_elf_info(&header, "firmware.elf").unwrap();
        assert_eq!(info.architecture, Architecture::Xtensa);
        assert_eq!(info.platform, Platform::Esp32);
    }

    #[test]
    fn detects_big_endian_machine_field() {
        let header = elf_header(2, 2, 0x16); // EM_S390-ish placeholder, unknown arch
        let info = detect_elf_info(&header, "firmware.elf").unwrap();
        assert_eq!(info.bit_width, 64);
        assert_eq!(info.endianness, Endianness::Big);
    }

    #[test]
    fn unix_x86_64_is_not_embedded() {
        let header = elf_header(2, 1, 0x3E);
        let info = detect_elf_info(&header, "/usr/bin/app").unwrap();
        assert_eq!(info.platform, Platform::Unix);
        assert!(!info.is_embedded);
    }
}
