//! Recursive-descent arithmetic evaluator for GNU-LD expressions.
//!
//! Deliberately does not use anything resembling `eval`: the final
//! arithmetic pass only ever sees a string restricted to
//! `[0-9+\-*/() \t]` and walks it with a hand-written parser.

use std::collections::{HashMap, HashSet};

use regex::Regex;

use crate::error::LinkerError;
use crate::region::MemoryRegion;

/// A linker-script variable: either fully resolved, or a pending expression
/// string waiting on other variables or regions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Variable {
    Int(i64),
    Expr(String),
}

/// The evaluator's working environment: known variables and the
/// in-progress region map (for `ORIGIN`/`LENGTH` back-references).
#[derive(Debug, Default, Clone)]
pub struct ParseEnv {
    pub variables: HashMap<String, Variable>,
    pub regions: HashMap<String, MemoryRegion>,
}

impl ParseEnv {
    pub fn new() -> Self {
        ParseEnv::default()
    }

    pub fn set_int(&mut self, name: impl Into<String>, value: i64) {
        self.variables.insert(name.into(), Variable::Int(value));
    }
}

const MAX_PAREN_ITERATIONS: usize = 5;

/// Evaluates `expr` to an integer over `env`, failing with
/// `ExpressionEvaluationError` when a construct cannot be resolved.
pub fn evaluate_expression(expr: &str, env: &ParseEnv) -> Result<i64, LinkerError> {
    let mut resolving = HashSet::new();
    evaluate_inner(expr, env, &mut resolving)
}

fn evaluation_error(expr: &str, reason: impl Into<String>) -> LinkerError {
    LinkerError::ExpressionEvaluationError {
        expr: expr.to_string(),
        reason: reason.into(),
    }
}

fn evaluate_inner(expr: &str, env: &ParseEnv, resolving: &mut HashSet<String>) -> Result<i64, LinkerError> {
    let text = expr.trim().to_string();
    if text.is_empty() {
        return Err(evaluation_error(expr, "empty expression"));
    }

    let text = handle_linker_functions(&text, env, resolving)?;
    let text = substitute_variables(&text, env, resolving)?;
    let text = resolve_size_suffixes(&text);
    let text = normalize_numeric_literals(&text)?;
    evaluate_arithmetic(&text)
}

/// Resolves `DEFINED(sym)`, `ORIGIN(region)`, `LENGTH(region)` and ternary
/// `cond ? a : b` forms, iterating a few times so nested calls converge.
fn handle_linker_functions(text: &str, env: &ParseEnv, resolving: &mut HashSet<String>) -> Result<String, LinkerError> {
    let defined_re = Regex::new(r"DEFINED\s*\(\s*([A-Za-z_][A-Za-z0-9_]*)\s*\)").unwrap();
    let origin_re = Regex::new(r"ORIGIN\s*\(\s*([A-Za-z_][A-Za-z0-9_]*)\s*\)").unwrap();
    let length_re = Regex::new(r"LENGTH\s*\(\s*([A-Za-z_][A-Za-z0-9_]*)\s*\)").unwrap();
    let ternary_re = Regex::new(r"^(.+?)\?(.+?):(.+)$").unwrap();

    let mut current = text.to_string();

    for _ in 0..MAX_PAREN_ITERATIONS {
        let before = current.clone();

        current = defined_re
            .replace_all(&current, |caps: &regex::Captures| {
                let name = &caps[1];
                if env.variables.contains_key(name) {
                    "1".to_string()
                } else {
                    "0".to_string()
                }
            })
            .into_owned();

        current = replace_region_fn(&current, &origin_re, env, true);
        current = replace_region_fn(&current, &length_re, env, false);

        if let Some(caps) = ternary_re.captures(&current) {
            let cond_raw = caps[1].trim();
            let cond_true = evaluate_condition(cond_raw, env);
            current = if cond_true {
                caps[2].trim().to_string()
            } else {
                caps[3].trim().to_string()
            };
        }

        if current == before {
            break;
        }
    }

    let _ = resolving;
    Ok(current)
}

fn evaluate_condition(cond: &str, env: &ParseEnv) -> bool {
    let cond = cond.trim();
    if cond == "1" {
        return true;
    }
    if cond == "0" {
        return false;
    }
    if let Some(name) = cond
        .strip_prefix("DEFINED(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        return env.variables.contains_key(name.trim());
    }
    match env.variables.get(cond) {
        Some(Variable::Int(v)) => *v != 0,
        _ => false,
    }
}

/// Substitutes `ORIGIN(name)`/`LENGTH(name)` with the referenced region's
/// value when it is already known in the (partial, growing) region map.
/// A region not yet known falls back to the platform's conventional
/// ROM/RAM constants rather than being left unresolved, matching the
/// original tool's `_replace_origin`/`_replace_length` behavior.
fn replace_region_fn(text: &str, re: &Regex, env: &ParseEnv, is_origin: bool) -> String {
    re.replace_all(text, |caps: &regex::Captures| {
        let region_name = &caps[1];
        match env.regions.get(region_name) {
            Some(region) => {
                let value = if is_origin {
                    region.start_address
                } else {
                    region.total_size
                };
                value.to_string()
            }
            None => fallback_region_value(region_name, is_origin).to_string(),
        }
    })
    .into_owned()
}

/// Conventional ROM/RAM fallback constants used when a `MEMORY` block has
/// not yet declared the referenced region. `ORIGIN(ROM)` defaults to the
/// typical 0x80000000 QEMU-style load address; `LENGTH(ROM)`/`LENGTH(RAM)`
/// default to 4 MiB / 2 MiB respectively; anything else resolves to 0.
fn fallback_region_value(region_name: &str, is_origin: bool) -> u64 {
    let upper = region_name.to_uppercase();
    if is_origin {
        if upper == "ROM" {
            0x8000_0000
        } else {
            0
        }
    } else {
        match upper.as_str() {
            "ROM" => 4 * 1024 * 1024,
            "RAM" => 2 * 1024 * 1024,
            _ => 0,
        }
    }
}

fn substitute_variables(text: &str, env: &ParseEnv, resolving: &mut HashSet<String>) -> Result<String, LinkerError> {
    let ident_re = Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").unwrap();
    let mut result = String::with_capacity(text.len());
    let mut last_end = 0;

    for mat in ident_re.find_iter(text) {
        result.push_str(&text[last_end..mat.start()]);
        let name = mat.as_str();
        match env.variables.get(name) {
            Some(Variable::Int(v)) => result.push_str(&v.to_string()),
            Some(Variable::Expr(expr)) => {
                if resolving.contains(name) {
                    // cycle: leave unresolved rather than recursing forever
                    result.push_str(name);
                } else {
                    resolving.insert(name.to_string());
                    let value = evaluate_inner(expr, env, resolving);
                    resolving.remove(name);
                    match value {
                        Ok(v) => result.push_str(&v.to_string()),
                        Err(_) => result.push_str(name),
                    }
                }
            }
            None => result.push_str(name),
        }
        last_end = mat.end();
    }
    result.push_str(&text[last_end..]);
    Ok(result)
}

fn resolve_size_suffixes(text: &str) -> String {
    let re = Regex::new(r"(?i)(\d+)\s*([KMG])B?\b").unwrap();
    re.replace_all(text, |caps: &regex::Captures| {
        let base: u64 = caps[1].parse().unwrap_or(0);
        let multiplier = match caps[2].to_uppercase().as_str() {
            "K" => 1024u64,
            "M" => 1024 * 1024,
            "G" => 1024 * 1024 * 1024,
            _ => 1,
        };
        (base * multiplier).to_string()
    })
    .into_owned()
}

fn normalize_numeric_literals(text: &str) -> Result<String, LinkerError> {
    let hex_re = Regex::new(r"0[xX][0-9a-fA-F]+").unwrap();
    let mut text = hex_re
        .replace_all(text, |caps: &regex::Captures| {
            let value = i64::from_str_radix(&caps[0][2..], 16).unwrap_or(0);
            value.to_string()
        })
        .into_owned();

    // Octal: a leading zero followed by at least one more digit, not already
    // touched by the hex pass above.
    let octal_re = Regex::new(r"\b0[0-7]{1,}\b").unwrap();
    text = octal_re
        .replace_all(&text, |caps: &regex::Captures| {
            let value = i64::from_str_radix(&caps[0], 8).unwrap_or(0);
            value.to_string()
        })
        .into_owned();

    let allowed = Regex::new(r"^[0-9+\-*/() \t]*$").unwrap();
    if !allowed.is_match(&text) {
        return Err(evaluation_error(&text, "unresolved symbols in expression"));
    }
    Ok(text)
}

/// Hand-written recursive-descent parser, restricted to:
/// `expr := term (('+'|'-') term)*`
/// `term := factor (('*'|'/') factor)*`
/// `factor := '-'? ('(' expr ')' | number)`
struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Parser {
            bytes: text.as_bytes(),
            pos: 0,
        }
    }

    fn skip_ws(&mut self) {
        while self.pos < self.bytes.len() && (self.bytes[self.pos] == b' ' || self.bytes[self.pos] == b'\t') {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.bytes.get(self.pos).copied()
    }

    fn expr(&mut self) -> Result<i64, LinkerError> {
        let mut value = self.term()?;
        loop {
            match self.peek() {
                Some(b'+') => {
                    self.pos += 1;
                    value += self.term()?;
                }
                Some(b'-') => {
                    self.pos += 1;
                    value -= self.term()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<i64, LinkerError> {
        let mut value = self.factor()?;
        loop {
            match self.peek() {
                Some(b'*') => {
                    self.pos += 1;
                    value *= self.factor()?;
                }
                Some(b'/') => {
                    self.pos += 1;
                    let divisor = self.factor()?;
                    if divisor == 0 {
                        return Err(evaluation_error("", "division by zero"));
                    }
                    let q = value / divisor;
                    let r = value % divisor;
                    value = if (r != 0) && ((r < 0) != (divisor < 0)) { q - 1 } else { q };
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn factor(&mut self) -> Result<i64, LinkerError> {
        match self.peek() {
            Some(b'-') => {
                self.pos += 1;
                Ok(-self.factor()?)
            }
            Some(b'(') => {
                self.pos += 1;
                let value = self.expr()?;
                self.skip_ws();
                if self.bytes.get(self.pos) != Some(&b')') {
                    return Err(evaluation_error("", "unbalanced parentheses"));
                }
                self.pos += 1;
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() => self.number(),
            _ => Err(evaluation_error("", "expected number or '('")),
        }
    }

    fn number(&mut self) -> Result<i64, LinkerError> {
        self.skip_ws();
        let start = self.pos;
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_digit() {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(evaluation_error("", "expected number"));
        }
        std::str::from_utf8(&self.bytes[start..self.pos])
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| evaluation_error("", "invalid number"))
    }
}

fn evaluate_arithmetic(text: &str) -> Result<i64, LinkerError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(evaluation_error(text, "empty arithmetic expression"));
    }
    let mut parser = Parser::new(trimmed);
    let value = parser.expr()?;
    parser.skip_ws();
    if parser.pos != parser.bytes.len() {
        return Err(evaluation_error(text, "trailing characters after expression"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adds_two_literals() {
        let env = ParseEnv::new();
        assert_eq!(evaluate_expression("1 + 2", &env).unwrap(), 3);
    }

    #[test]
    fn multiplies_with_size_suffix() {
        let env = ParseEnv::new();
        assert_eq!(evaluate_expression("512 * 1024", &env).unwrap(), 524_288);
        assert_eq!(evaluate_expression("512K", &env).unwrap(), 524_288);
    }

    #[test]
    fn division_by_zero_errors() {
        let env = ParseEnv::new();
        assert!(evaluate_expression("1 / 0", &env).is_err());
    }

    #[test]
    fn division_rounds_toward_negative_infinity() {
        let env = ParseEnv::new();
        assert_eq!(evaluate_expression("7 / -2", &env).unwrap(), -4);
        assert_eq!(evaluate_expression("-7 / 2", &env).unwrap(), -4);
        assert_eq!(evaluate_expression("7 / 2", &env).unwrap(), 3);
    }

    #[test]
    fn resolves_simple_variable() {
        let mut env = ParseEnv::new();
        env.set_int("FOO", 10);
        assert_eq!(evaluate_expression("FOO + 5", &env).unwrap(), 15);
    }

    #[test]
    fn resolves_hex_literal() {
        let env = ParseEnv::new();
        assert_eq!(evaluate_expression("0x1000", &env).unwrap(), 4096);
    }

    #[test]
    fn defined_checks_presence() {
        let mut env = ParseEnv::new();
        env.set_int("FOO", 1);
        assert_eq!(evaluate_expression("DEFINED(FOO) ? 1 : 0", &env).unwrap(), 1);
        assert_eq!(evaluate_expression("DEFINED(BAR) ? 1 : 0", &env).unwrap(), 0);
    }

    #[test]
    fn cyclic_variables_do_not_recurse_forever() {
        let mut env = ParseEnv::new();
        env.variables.insert("A".into(), Variable::Expr("B + 1".into()));
        env.variables.insert("B".into(), Variable::Expr("A + 1".into()));
        // Cycle guard means this cannot fully resolve; it must fail rather
        // than stack-overflow.
        assert!(evaluate_expression("A", &env).is_err());
    }

    #[test]
    fn origin_and_length_of_known_region() {
        let mut env = ParseEnv::new();
        env.regions.insert(
            "FLASH".into(),
            MemoryRegion::new("FLASH", "rx", 0x0800_0000, 0x10000),
        );
        assert_eq!(evaluate_expression("ORIGIN(FLASH)", &env).unwrap(), 0x0800_0000);
        assert_eq!(evaluate_expression("LENGTH(FLASH)", &env).unwrap(), 0x10000);
    }

    #[test]
    fn origin_and_length_of_unknown_region_use_rom_ram_fallbacks() {
        let env = ParseEnv::new();
        assert_eq!(evaluate_expression("ORIGIN(ROM)", &env).unwrap(), 0x8000_0000);
        assert_eq!(evaluate_expression("LENGTH(ROM)", &env).unwrap(), 4 * 1024 * 1024);
        assert_eq!(evaluate_expression("LENGTH(RAM)", &env).unwrap(), 2 * 1024 * 1024);
        assert_eq!(evaluate_expression("ORIGIN(RAM)", &env).unwrap(), 0);
        assert_eq!(evaluate_expression("LENGTH(UNKNOWN)", &env).unwrap(), 0);
    }
}
