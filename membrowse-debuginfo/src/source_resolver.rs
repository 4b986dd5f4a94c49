//! Maps a raw symbol to the source file it was defined in, consulting the
//! DWARF maps built by the processor with a layered fallback chain.

use std::sync::OnceLock;

use regex::Regex;

use crate::dwarf::DwarfMaps;
use crate::model::SymbolKind;

fn cgu_artifact_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\w+\.[0-9a-f]+-cgu\.\d+").expect("valid regex"))
}

fn basename(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

/// Returns `""` for paths that resolve to a Rust codegen-unit hash artifact
/// (`defmt_rtt.2465299265768a95-cgu.0`) rather than a real source file.
fn sanitize(path: &str) -> String {
    let name = basename(path);
    if cgu_artifact_pattern().is_match(&name) {
        String::new()
    } else {
        name
    }
}

fn is_cu_definition(maps: &DwarfMaps, addr: u64) -> bool {
    maps.address_to_cu_file
        .get(&addr)
        .is_some_and(|f| f.ends_with(".c"))
}

fn prefer_cu_if_header(maps: &DwarfMaps, candidate: &str, addr: u64) -> String {
    if candidate.ends_with(".h") && addr > 0 && is_cu_definition(maps, addr) {
        maps.address_to_cu_file.get(&addr).cloned().unwrap_or_else(|| candidate.to_string())
    } else {
        candidate.to_string()
    }
}

/// Resolves the source file for one symbol.
pub fn resolve_source_file(maps: &DwarfMaps, name: &str, kind: SymbolKind, address: u64) -> String {
    if let Some(hit) = maps.symbol_to_file.get(&(name.to_string(), address)) {
        if hit.ends_with(".c") {
            return sanitize(hit);
        }
        return sanitize(&prefer_cu_if_header(maps, hit, address));
    }

    if kind == SymbolKind::Func && address > 0 {
        if let Some(hit) = maps.address_to_file.get(&address) {
            return sanitize(&prefer_cu_if_header(maps, hit, address));
        }

        if let Some(hit) = proximity_search(maps, address) {
            return sanitize(&prefer_cu_if_header(maps, &hit, address));
        }
    }

    if let Some(hit) = maps.address_to_cu_file.get(&address) {
        return sanitize(hit);
    }

    if let Some(hit) = maps.symbol_to_file.get(&(name.to_string(), 0)) {
        return sanitize(hit);
    }

    String::new()
}

const PROXIMITY_TOLERANCE: u64 = 100;

fn proximity_search(maps: &DwarfMaps, address: u64) -> Option<String> {
    let mut keys: Vec<u64> = maps.address_to_file.keys().copied().collect();
    if keys.is_empty() {
        return None;
    }
    keys.sort_unstable();

    let idx = keys.partition_point(|&a| a < address);
    let mut best: Option<(u64, u64)> = None;
    if let Some(&at_or_after) = keys.get(idx) {
        best = Some((at_or_after, at_or_after.abs_diff(address)));
    }
    if idx > 0 {
        let before = keys[idx - 1];
        let dist = address.abs_diff(before);
        if best.is_none_or(|(_, best_dist)| dist < best_dist) {
            best = Some((before, dist));
        }
    }

    let (addr, dist) = best?;
    if dist > PROXIMITY_TOLERANCE {
        return None;
    }
    maps.address_to_file.get(&addr).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn maps_with(
        symbol_to_file: &[((&str, u64), &str)],
        address_to_file: &[(u64, &str)],
        address_to_cu_file: &[(u64, &str)],
    ) -> DwarfMaps {
        let mut maps = DwarfMaps::default();
        for ((name, addr), file) in symbol_to_file {
            maps.symbol_to_file.insert((name.to_string(), *addr), file.to_string());
        }
        for (addr, file) in address_to_file {
            maps.address_to_file.insert(*addr, file.to_string());
        }
        for (addr, file) in address_to_cu_file {
            maps.address_to_cu_file.insert(*addr, file.to_string());
        }
        maps
    }

    #[test]
    fn direct_symbol_hit_on_c_file_wins() {
        let maps = maps_with(&[(("foo", 100), "foo.c")], &[], &[]);
        assert_eq!(resolve_source_file(&maps, "foo", SymbolKind::Func, 100), "foo.c");
    }

    #[test]
    fn header_hit_prefers_cu_definition() {
        let maps = maps_with(&[(("foo", 100), "foo.h")], &[], &[(100, "foo.c")]);
        assert_eq!(resolve_source_file(&maps, "foo", SymbolKind::Func, 100), "foo.c");
    }

    #[test]
    fn header_hit_without_cu_c_file_returns_header() {
        let maps = maps_with(&[(("foo", 100), "foo.h")], &[], &[]);
        assert_eq!(resolve_source_file(&maps, "foo", SymbolKind::Func, 100), "foo.h");
    }

    #[test]
    fn falls_back_to_address_to_file_for_func() {
        let maps = maps_with(&[], &[(100, "bar.c")], &[]);
        assert_eq!(resolve_source_file(&maps, "bar", SymbolKind::Func, 100), "bar.c");
    }

    #[test]
    fn proximity_search_finds_nearby_address() {
        let maps = maps_with(&[], &[(100, "near.c")], &[]);
        assert_eq!(resolve_source_file(&maps, "bar", SymbolKind::Func, 150), "near.c");
    }

    #[test]
    fn proximity_search_rejects_far_address() {
        let maps = maps_with(&[], &[(100, "near.c")], &[]);
        assert_eq!(resolve_source_file(&maps, "bar", SymbolKind::Func, 500), "");
    }

    #[test]
    fn object_symbol_uses_cu_file_not_proximity() {
        let maps = maps_with(&[], &[(100, "near.c")], &[(200, "obj.c")]);
        assert_eq!(resolve_source_file(&maps, "g_counter", SymbolKind::Object, 200), "obj.c");
    }

    #[test]
    fn static_fallback_uses_zero_address_entry() {
        let maps = maps_with(&[(("g_static", 0), "static.c")], &[], &[]);
        assert_eq!(resolve_source_file(&maps, "g_static", SymbolKind::Object, 0), "static.c");
    }

    #[test]
    fn unresolved_symbol_returns_empty_string() {
        let maps = DwarfMaps::default();
        assert_eq!(resolve_source_file(&maps, "mystery", SymbolKind::Func, 999), "");
    }

    #[test]
    fn cgu_artifact_name_sanitized_to_empty() {
        let maps = maps_with(
            &[(("x", 100), "/build/defmt_rtt.2465299265768a95-cgu.0")],
            &[],
            &[],
        );
        assert_eq!(resolve_source_file(&maps, "x", SymbolKind::Func, 100), "");
    }

    #[test]
    fn sanitize_strips_directory_prefix() {
        assert_eq!(sanitize("/home/user/src/main.c"), "main.c");
    }
}
