use std::collections::HashMap;
use std::fs;
use std::path::Path;

use membrowse_common::ElfInfo;
use regex::Regex;

use crate::defaults;
use crate::error::LinkerError;
use crate::eval::{evaluate_expression, ParseEnv, Variable};
use crate::region::MemoryRegion;

const MAX_VARIABLE_ITERATIONS: usize = 10;
const MAX_MEMORY_BLOCK_PASSES: usize = 3;
const MAX_REGION_OVERHANG_BYTES: u64 = 64 * 1024;

/// Strips comments and unconditioned preprocessor blocks from a linker
/// script without running a real preprocessor.
pub fn clean_content(raw: &str) -> String {
    let block_comment_re = Regex::new(r"(?s)/\*.*?\*/").unwrap();
    let line_comment_re = Regex::new(r"//[^\n]*").unwrap();
    let without_comments = line_comment_re
        .replace_all(&block_comment_re.replace_all(raw, ""), "")
        .into_owned();

    let without_dead_blocks = remove_preprocessor_blocks(&without_comments);

    let directive_re = Regex::new(r"(?m)^\s*#(if|elif|else|endif|error).*$").unwrap();
    let without_directives = directive_re.replace_all(&without_dead_blocks, "").into_owned();

    let whitespace_re = Regex::new(r"\s+").unwrap();
    whitespace_re.replace_all(&without_directives, " ").trim().to_string()
}

/// Drops `#if ... #endif` blocks that contain no `;`-terminated assignment —
/// these are almost always feature-gated code with nothing the parser
/// needs, and dropping them avoids having to actually evaluate the
/// preprocessor condition. Cannot see across a literal `}` inside the
/// block (matches the upstream tool's known limitation).
fn remove_preprocessor_blocks(text: &str) -> String {
    let block_re = Regex::new(r"(?s)#if[^#]*?(?:#(?:elif|else)[^#]*?)*?#endif").unwrap();
    block_re
        .replace_all(text, |caps: &regex::Captures| {
            let block = &caps[0];
            if block.contains('=') && block.contains(';') {
                block.to_string()
            } else {
                String::new()
            }
        })
        .into_owned()
}

fn is_simple_expression(expr: &str) -> bool {
    let hex = Regex::new(r"^0[xX][0-9a-fA-F]+$").unwrap();
    let sized = Regex::new(r"^\d+[kKmMgG]?$").unwrap();
    let arith = Regex::new(r"^[0-9a-fA-Fx+\-*/() \t]+$").unwrap();
    hex.is_match(expr) || sized.is_match(expr) || arith.is_match(expr)
}

/// Scans a cleaned script for `NAME = EXPR;` assignments and folds them into
/// `env`, running the fixed-point resolution pass for complex expressions.
pub fn extract_variables(cleaned: &str, env: &mut ParseEnv) {
    let assignment_re = Regex::new(r"([A-Za-z_][A-Za-z0-9_]*)\s*=\s*([^;]+);").unwrap();

    let mut complex = Vec::new();
    for caps in assignment_re.captures_iter(cleaned) {
        let name = caps[1].to_string();
        if name.starts_with("__") {
            continue;
        }
        let expr = caps[2].trim().to_string();
        if is_simple_expression(&expr) {
            if let Ok(value) = evaluate_expression(&expr, env) {
                env.variables.insert(name, Variable::Int(value));
                continue;
            }
        }
        complex.push((name, expr));
    }

    for (name, expr) in &complex {
        env.variables
            .entry(name.clone())
            .or_insert_with(|| Variable::Expr(expr.clone()));
    }

    for _ in 0..MAX_VARIABLE_ITERATIONS {
        let mut progressed = false;
        for (name, expr) in &complex {
            if matches!(env.variables.get(name), Some(Variable::Int(_))) {
                continue;
            }
            if let Ok(value) = evaluate_expression(expr, env) {
                env.variables.insert(name.clone(), Variable::Int(value));
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
}

struct RawRegion {
    name: String,
    attributes: String,
    origin_expr: String,
    length_expr: String,
}

fn memory_block(cleaned: &str) -> Option<String> {
    let re = Regex::new(r"(?is)MEMORY\s*\{([^}]+)\}").unwrap();
    re.captures(cleaned).map(|c| c[1].to_string())
}

fn parse_standard_entries(block: &str) -> Vec<RawRegion> {
    let re = Regex::new(
        r"(?i)(\w+)\s*\(([^)]+)\)\s*:\s*(?:ORIGIN|org)\s*=\s*([^,]+),\s*(?:LENGTH|len)\s*=\s*([^,}]+?)(?=\s+\w+\s*[\(:]|$|\s*\})",
    )
    .unwrap();
    re.captures_iter(block)
        .map(|c| RawRegion {
            name: c[1].to_string(),
            attributes: c[2].trim().to_string(),
            origin_expr: c[3].trim().to_string(),
            length_expr: c[4].trim().to_string(),
        })
        .collect()
}

fn parse_compact_entries(block: &str) -> Vec<RawRegion> {
    let re = Regex::new(
        r"(?i)(\w+)\s*:\s*(?:ORIGIN|org)\s*=\s*([^,]+),\s*(?:LENGTH|len)\s*=\s*([^,}]+?)(?=\s+\w+\s*:|$|\s*\})",
    )
    .unwrap();
    re.captures_iter(block)
        .map(|c| RawRegion {
            name: c[1].to_string(),
            attributes: String::new(),
            origin_expr: c[2].trim().to_string(),
            length_expr: c[3].trim().to_string(),
        })
        .collect()
}

fn parse_address_or_size(expr: &str, env: &ParseEnv) -> Result<u64, LinkerError> {
    if let Ok(value) = evaluate_expression(expr, env) {
        return Ok(value as u64);
    }
    // Manual fallback for literals the evaluator's grammar doesn't need to
    // see (e.g. bare hex with no surrounding arithmetic context).
    let trimmed = expr.trim();
    if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        if let Ok(value) = u64::from_str_radix(hex, 16) {
            return Ok(value);
        }
    }
    if let Some(stripped) = trimmed.strip_suffix(['K', 'k']) {
        if let Ok(value) = stripped.parse::<u64>() {
            return Ok(value * 1024);
        }
    }
    if let Some(stripped) = trimmed.strip_suffix(['M', 'm']) {
        if let Ok(value) = stripped.parse::<u64>() {
            return Ok(value * 1024 * 1024);
        }
    }
    if let Ok(value) = trimmed.parse::<u64>() {
        return Ok(value);
    }
    Err(LinkerError::ExpressionEvaluationError {
        expr: expr.to_string(),
        reason: "could not resolve address/size".to_string(),
    })
}

fn parse_memory_block_pass(cleaned: &str, env: &mut ParseEnv) {
    let Some(block) = memory_block(cleaned) else {
        return;
    };

    let mut entries = parse_standard_entries(&block);
    if entries.is_empty() {
        entries = parse_compact_entries(&block);
    }

    for raw in entries {
        let origin = match parse_address_or_size(&raw.origin_expr, env) {
            Ok(v) => v,
            Err(_) => continue,
        };
        let length = match parse_address_or_size(&raw.length_expr, env) {
            Ok(v) => v,
            Err(_) => continue,
        };
        let region = MemoryRegion::new(raw.name.clone(), raw.attributes.clone(), origin, length);
        env.regions.insert(raw.name, region);
    }
}

/// Parses memory regions out of one or more linker scripts, given optional
/// architecture information used to seed platform defaults.
///
/// Scripts are processed reverse-then-forward for variable extraction (so a
/// top-level script's assignments win over an included one while still
/// seeing the included script's symbols), then the `MEMORY` block pass is
/// re-run up to three times so forward references between regions converge.
pub fn parse_memory_regions<P: AsRef<Path>>(
    script_paths: &[P],
    elf_info: Option<&ElfInfo>,
) -> Result<HashMap<String, MemoryRegion>, LinkerError> {
    let mut contents = Vec::with_capacity(script_paths.len());
    for path in script_paths {
        let path = path.as_ref();
        if !path.exists() {
            return Err(LinkerError::InputNotFound(path.display().to_string()));
        }
        let raw = fs::read_to_string(path).map_err(|source| LinkerError::Io {
            path: path.display().to_string(),
            source,
        })?;
        contents.push(clean_content(&raw));
    }

    let mut env = ParseEnv::new();
    if let Some(info) = elf_info {
        defaults::seed(&mut env, info.platform);
    }

    for cleaned in contents.iter().rev() {
        extract_variables(cleaned, &mut env);
    }
    for cleaned in contents.iter() {
        extract_variables(cleaned, &mut env);
    }

    let mut previous_count = usize::MAX;
    for _ in 0..MAX_MEMORY_BLOCK_PASSES {
        for cleaned in &contents {
            parse_memory_block_pass(cleaned, &mut env);
        }
        if env.regions.len() == previous_count {
            break;
        }
        previous_count = env.regions.len();
    }

    validate_regions(&env.regions);

    Ok(env.regions)
}

/// Advisory-only checks: missing FLASH/RAM and overlapping regions are
/// logged, never raised as errors.
fn validate_regions(regions: &HashMap<String, MemoryRegion>) {
    use crate::region::RegionType;

    let has_rom = regions
        .values()
        .any(|r| matches!(r.region_type, RegionType::Flash | RegionType::Rom));
    let has_ram = regions.values().any(|r| matches!(r.region_type, RegionType::Ram));
    if !has_rom {
        tracing::warn!("no FLASH/ROM region found among declared memory regions");
    }
    if !has_ram {
        tracing::warn!("no RAM region found among declared memory regions");
    }

    let mut sorted: Vec<&MemoryRegion> = regions.values().collect();
    sorted.sort_by_key(|r| r.start_address);

    for pair in sorted.windows(2) {
        let [a, b] = pair else { continue };
        if b.start_address >= a.exclusive_end() {
            continue;
        }
        if is_hierarchical_overlap(a, b) {
            continue;
        }
        tracing::warn!(
            region_a = %a.name,
            region_b = %b.name,
            "overlapping memory regions"
        );
    }
}

fn is_hierarchical_overlap(a: &MemoryRegion, b: &MemoryRegion) -> bool {
    let (parent, child) = if a.total_size >= b.total_size { (a, b) } else { (b, a) };
    let shares_prefix = child.name.starts_with(&parent.name) || parent.name.starts_with(&child.name);
    if !shares_prefix {
        return false;
    }
    child.start_address >= parent.start_address
        && child.exclusive_end() <= parent.exclusive_end().saturating_add(MAX_REGION_OVERHANG_BYTES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn strips_block_and_line_comments() {
        let script = "/* header */\nFOO = 1; // inline\n";
        let cleaned = clean_content(script);
        assert!(cleaned.contains("FOO = 1;"));
        assert!(!cleaned.contains("header"));
        assert!(!cleaned.contains("inline"));
    }

    #[test]
    fn drops_preprocessor_block_without_assignment() {
        let script = "#if FEATURE\nNOISE\n#endif\nKEEP = 1;";
        let cleaned = clean_content(script);
        assert!(!cleaned.contains("NOISE"));
        assert!(cleaned.contains("KEEP = 1;"));
    }

    #[test]
    fn keeps_preprocessor_block_with_assignment() {
        let script = "#if FEATURE\nFOO = 4;\n#endif\n";
        let cleaned = clean_content(script);
        assert!(cleaned.contains("FOO = 4;"));
    }

    #[test]
    fn parses_standard_memory_block() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "FLASH (rx) : ORIGIN = 0x08000000, LENGTH = 512K\nRAM (rw) : ORIGIN = 0x20000000, LENGTH = 128K\n"
        )
        .unwrap();
        let wrapped = format!("MEMORY {{ {} }}", std::fs::read_to_string(file.path()).unwrap());
        let mut env = ParseEnv::new();
        parse_memory_block_pass(&wrapped, &mut env);
        let flash = env.regions.get("FLASH").unwrap();
        assert_eq!(flash.start_address, 0x0800_0000);
        assert_eq!(flash.total_size, 512 * 1024);
        let ram = env.regions.get("RAM").unwrap();
        assert_eq!(ram.total_size, 128 * 1024);
    }

    #[test]
    fn parses_compact_esp8266_style_block() {
        let block = "MEMORY { dram0_0_seg : ORIGIN = 0x3FFE8000, LENGTH = 0x14000 iram1_0_seg : ORIGIN = 0x40100000, LENGTH = 0x8000 }";
        let mut env = ParseEnv::new();
        parse_memory_block_pass(block, &mut env);
        assert_eq!(env.regions.len(), 2);
        assert_eq!(env.regions["dram0_0_seg"].start_address, 0x3FFE_8000);
    }

    #[test]
    fn end_to_end_stm32_script() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "_size = 512 * 1024;\nMEMORY {{\n  FLASH (rx) : ORIGIN = 0x08000000, LENGTH = _size\n  RAM (rw) : ORIGIN = 0x20000000, LENGTH = 128K\n}}\n"
        )
        .unwrap();
        let regions = parse_memory_regions(&[file.path()], None).unwrap();
        assert_eq!(regions["FLASH"].total_size, 524_288);
        assert_eq!(regions["RAM"].total_size, 128 * 1024);
    }

    #[test]
    fn empty_memory_block_yields_empty_map() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "MEMORY {{ }}").unwrap();
        let regions = parse_memory_regions(&[file.path()], None).unwrap();
        assert!(regions.is_empty());
    }

    #[test]
    fn missing_script_is_input_not_found() {
        let result = parse_memory_regions(&["/nonexistent/linker.ld"], None);
        assert!(matches!(result, Err(LinkerError::InputNotFound(_))));
    }
}
