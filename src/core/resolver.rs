//! EP-005: Argument resolution — variables and arbitrary-precision arithmetic.
//!
//! Evaluation is a pure function of the tree and the symbol table.
//! Numbers are unsigned: subtraction below zero is an error, as is
//! division or modulo by zero. Results are minimal lower-case hex (`0x3`).

use super::symbols::SymbolTable;
use super::types::*;
use crate::error::{EpmError, Result};
use num_bigint::BigUint;
use num_traits::{Num, Zero};
use std::path::PathBuf;

/// Parse a decimal or hex literal. Hex is `0x`-prefixed, or any string of
/// hex digits that is not purely decimal.
pub fn parse_number(s: &str) -> Result<BigUint> {
    let s = s.trim();
    let (digits, radix) = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) if hex.is_empty() => return Ok(BigUint::zero()),
        Some(hex) => (hex, 16),
        None if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) => (s, 10),
        None if !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit()) => (s, 16),
        None => return Err(EpmError::InvalidNumber(s.to_string())),
    };
    BigUint::from_str_radix(digits, radix).map_err(|_| EpmError::InvalidNumber(s.to_string()))
}

/// Minimal hex encoding: `0x0`, `0x3`, `0x13ba`.
pub fn to_hex(n: &BigUint) -> String {
    format!("0x{}", n.to_str_radix(16))
}

/// Apply one operator. `expr` names the expression in error messages.
pub fn apply(op: Operator, a: &BigUint, b: &BigUint, expr: &str) -> Result<BigUint> {
    match op {
        Operator::Add => Ok(a + b),
        Operator::Sub if b > a => Err(EpmError::NegativeResult(expr.to_string())),
        Operator::Sub => Ok(a - b),
        Operator::Mul => Ok(a * b),
        Operator::Div | Operator::Mod if b.is_zero() => {
            Err(EpmError::DivisionByZero(expr.to_string()))
        }
        Operator::Div => Ok(a / b),
        Operator::Mod => Ok(a % b),
    }
}

/// Resolve one tree to its string value.
pub fn resolve_tree(tree: &ArgTree, symbols: &SymbolTable) -> Result<String> {
    match tree {
        ArgTree::Leaf { token, is_var: true } => symbols
            .get(&token.value)
            .map(str::to_string)
            .ok_or_else(|| EpmError::UnknownVariable(token.value.clone())),
        ArgTree::Leaf { token, .. } => Ok(token.value.clone()),
        ArgTree::Op { op, children } => {
            let mut values = Vec::with_capacity(children.len());
            for child in children {
                values.push(parse_number(&resolve_tree(child, symbols)?)?);
            }
            let expr = tree.to_string();
            let expr = expr.trim_start_matches('(').trim_end_matches(')');
            let mut iter = values.iter();
            let first = iter.next().cloned().unwrap_or_default();
            let result = iter.try_fold(first, |acc, v| apply(*op, &acc, v, expr))?;
            Ok(to_hex(&result))
        }
    }
}

/// Resolve one argument group according to its slot in the job.
pub fn resolve_group(
    command: Command,
    index: usize,
    count: usize,
    group: &[ArgTree],
    symbols: &SymbolTable,
) -> Result<String> {
    if command.is_name_slot(index, count) {
        let mut name = String::new();
        for tree in group {
            match tree.raw_name() {
                Some(raw) => name.push_str(raw),
                None => name.push_str(&resolve_tree(tree, symbols)?),
            }
        }
        return Ok(name);
    }

    let mut parts = Vec::with_capacity(group.len());
    for tree in group {
        parts.push(resolve_tree(tree, symbols)?);
    }
    if command.is_path_slot(index) && parts.len() > 1 {
        let path: PathBuf = parts.iter().collect();
        return Ok(path.to_string_lossy().into_owned());
    }
    Ok(parts.concat())
}

/// Resolve every argument group of a job, in order.
pub fn resolve_job(job: &Job, symbols: &SymbolTable) -> Result<Vec<String>> {
    let count = job.args.len();
    job.args
        .iter()
        .enumerate()
        .map(|(i, group)| resolve_group(job.command, i, count, group, symbols))
        .collect()
}

/// Replace every known `{{name}}` in free text; unknown references are left in place.
pub fn substitute_vars(text: &str, symbols: &SymbolTable) -> String {
    let mut result = text.to_string();
    let mut start = 0;

    while let Some(open) = result[start..].find("{{") {
        let open = start + open;
        let Some(close) = result[open..].find("}}") else {
            break;
        };
        let close = open + close + 2;
        let key = result[open + 2..close - 2].trim();

        match symbols.get(key).map(str::to_string) {
            Some(value) => {
                result.replace_range(open..close, &value);
                start = open + value.len();
            }
            None => start = close,
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser;
    use proptest::prelude::*;

    fn eval(src: &str, symbols: &SymbolTable) -> Result<String> {
        let pkg = parser::parse(&format!("set x {}", src)).unwrap();
        resolve_tree(&pkg.jobs[0].args[1][0], symbols)
    }

    #[test]
    fn test_ep005_add() {
        assert_eq!(eval("(+ 1 2)", &SymbolTable::new()).unwrap(), "0x3");
    }

    #[test]
    fn test_ep005_nested_with_vars() {
        let mut syms = SymbolTable::new();
        syms.store("y", "0x0a");
        assert_eq!(eval("(* (+ 1 2) {{y}})", &syms).unwrap(), "0x1e");
    }

    #[test]
    fn test_ep005_hex_and_decimal_operands() {
        let syms = SymbolTable::new();
        assert_eq!(eval("(- 0x10 1)", &syms).unwrap(), "0xf");
        assert_eq!(eval("(% 10 3)", &syms).unwrap(), "0x1");
        assert_eq!(eval("(/ 5050 2)", &syms).unwrap(), "0x9dd");
    }

    #[test]
    fn test_ep005_division_by_zero() {
        let err = eval("(/ 1 0)", &SymbolTable::new()).unwrap_err();
        assert!(matches!(err, EpmError::DivisionByZero(_)));
        let err = eval("(% 0x10 0x0)", &SymbolTable::new()).unwrap_err();
        assert!(matches!(err, EpmError::DivisionByZero(_)));
    }

    #[test]
    fn test_ep005_division_by_zero_wide_operands() {
        let big = "0xffffffffffffffffffffffffffffffffffffffff";
        let err = eval(&format!("(/ {} 0)", big), &SymbolTable::new()).unwrap_err();
        assert!(matches!(err, EpmError::DivisionByZero(_)));
    }

    #[test]
    fn test_ep005_wide_arithmetic() {
        let r = eval("(+ 0xffffffffffffffff 1)", &SymbolTable::new()).unwrap();
        assert_eq!(r, "0x10000000000000000");
    }

    #[test]
    fn test_ep005_negative_result() {
        let err = eval("(- 1 2)", &SymbolTable::new()).unwrap_err();
        assert!(matches!(err, EpmError::NegativeResult(_)));
    }

    #[test]
    fn test_ep005_unknown_variable() {
        let err = eval("{{ghost}}", &SymbolTable::new()).unwrap_err();
        assert_eq!(err.to_string(), "unknown variable: ghost");
    }

    #[test]
    fn test_ep005_parse_number_forms() {
        assert_eq!(parse_number("10").unwrap(), BigUint::from(10u32));
        assert_eq!(parse_number("0x10").unwrap(), BigUint::from(16u32));
        assert_eq!(parse_number("ff").unwrap(), BigUint::from(255u32));
        assert!(parse_number("zz").is_err());
        assert!(parse_number("").is_err());
    }

    #[test]
    fn test_ep005_name_slots_not_resolved() {
        let pkg = parser::parse("query {{addr}} 0x60 {{result}}").unwrap();
        let mut syms = SymbolTable::new();
        syms.store("addr", "0x1234");
        let args = resolve_job(&pkg.jobs[0], &syms).unwrap();
        assert_eq!(args, vec!["0x1234", "0x60", "result"]);
    }

    #[test]
    fn test_ep005_path_group_joined() {
        let pkg = parser::parse("deploy:\n\t{{root}} a.lll => A\n").unwrap();
        let mut syms = SymbolTable::new();
        syms.store("root", "/contracts/base");
        let args = resolve_job(&pkg.jobs[0], &syms).unwrap();
        assert_eq!(args[0], "/contracts/base/a.lll");
        assert_eq!(args[1], "A");
    }

    #[test]
    fn test_ep005_substitute_vars() {
        let mut syms = SymbolTable::new();
        syms.store("a", "0x01");
        let out = substitute_vars("x {{a}} y {{b}} z {{ a }}", &syms);
        assert_eq!(out, "x 0x01 y {{b}} z 0x01");
    }

    proptest! {
        #[test]
        fn test_ep005_add_matches_u128(a in any::<u64>(), b in any::<u64>()) {
            let out = eval(&format!("(+ {} {})", a, b), &SymbolTable::new()).unwrap();
            prop_assert_eq!(out, format!("0x{:x}", a as u128 + b as u128));
        }

        #[test]
        fn test_ep005_divmod_never_panics(a in any::<u128>(), b in 0u64..4) {
            let syms = SymbolTable::new();
            let div = eval(&format!("(/ {} {})", a, b), &syms);
            let rem = eval(&format!("(% {} {})", a, b), &syms);
            if b == 0 {
                prop_assert!(div.is_err());
                prop_assert!(rem.is_err());
            } else {
                prop_assert_eq!(div.unwrap(), format!("0x{:x}", a / b as u128));
                prop_assert_eq!(rem.unwrap(), format!("0x{:x}", a % b as u128));
            }
        }
    }
}
