//! Symbol demangling: Itanium C++ ABI and Rust (legacy + v0).
//!
//! Demangling failures are silent by design — the caller always has the
//! original mangled name to fall back to, and all internal lookups key off
//! the *raw* name regardless of what this module returns, since that raw
//! name is what DWARF DIEs record.

/// Best-effort demangling for display purposes. Returns `name` unchanged
/// when it isn't a recognized mangling scheme or demangling fails.
pub fn demangle(name: &str) -> String {
    if name.starts_with("_Z") {
        if let Ok(sym) = cpp_demangle::Symbol::new(name) {
            if let Ok(demangled) = sym.demangle(&cpp_demangle::DemangleOptions::default()) {
                return demangled;
            }
        }
        if let Ok(demangled) = rustc_demangle::try_demangle(name) {
            return demangled.to_string();
        }
        return name.to_string();
    }

    if name.starts_with("_R") {
        if let Ok(demangled) = rustc_demangle::try_demangle(name) {
            return demangled.to_string();
        }
        return name.to_string();
    }

    name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_c_name_is_unchanged() {
        assert_eq!(demangle("main"), "main");
    }

    #[test]
    fn demangles_simple_itanium_function() {
        assert_eq!(demangle("_Z3foov"), "foo()");
    }

    #[test]
    fn demangles_itanium_function_with_args() {
        assert_eq!(demangle("_Z3addii"), "add(int, int)");
    }

    #[test]
    fn demangles_rust_legacy_path() {
        let demangled = demangle("_ZN3foo3barE");
        assert!(demangled.contains("foo") && demangled.contains("bar"));
    }

    #[test]
    fn invalid_mangled_name_falls_back_to_original() {
        assert_eq!(demangle("_ZQQ"), "_ZQQ");
        assert_eq!(demangle("_Rinvalid"), "_Rinvalid");
    }

    #[test]
    fn empty_name_round_trips() {
        assert_eq!(demangle(""), "");
    }

    #[test]
    fn special_symbol_without_mangling_prefix_is_unchanged() {
        assert_eq!(demangle("$special_symbol"), "$special_symbol");
    }
}
