//! Line parser.
//!
//! A line has the shape `name(arg1, arg2, ...)`. Whitespace around the name
//! and the arguments is insignificant and anything after the closing
//! parenthesis is ignored. Operation names are case-sensitive.

use repdb_types::{Operation, SiteId, TxnId, Value, VarId};

use crate::error::{Result, ScriptError};

/// Returns true for lines that carry no operation and take no tick.
pub fn is_skippable(line: &str) -> bool {
    let line = line.trim();
    line.is_empty() || line.starts_with("//") || line.starts_with('#')
}

/// Parses one line.
///
/// Returns `Ok(None)` for blank and comment lines.
pub fn parse_line(line: &str) -> Result<Option<Operation>> {
    if is_skippable(line) {
        return Ok(None);
    }
    parse_operation(line.trim()).map(Some)
}

/// Parses a single `name(args)` call.
pub fn parse_operation(text: &str) -> Result<Operation> {
    let open = text
        .find('(')
        .ok_or_else(|| ScriptError::Malformed(format!("missing '(' in '{text}'")))?;
    let close = text[open..]
        .find(')')
        .map(|offset| open + offset)
        .ok_or_else(|| ScriptError::Malformed(format!("missing ')' in '{text}'")))?;

    let name = text[..open].trim();
    let inner = text[open + 1..close].trim();
    let args: Vec<&str> = if inner.is_empty() {
        Vec::new()
    } else {
        inner.split(',').map(str::trim).collect()
    };

    match name {
        "begin" => {
            let [txn] = arity::<1>("begin", &args)?;
            Ok(Operation::begin(parse_txn(txn)?))
        }
        "beginRO" => {
            let [txn] = arity::<1>("beginRO", &args)?;
            Ok(Operation::begin_read_only(parse_txn(txn)?))
        }
        "R" => {
            let [txn, var] = arity::<2>("R", &args)?;
            Ok(Operation::read(parse_txn(txn)?, parse_var(var)?))
        }
        "W" => {
            let [txn, var, value] = arity::<3>("W", &args)?;
            Ok(Operation::write(
                parse_txn(txn)?,
                parse_var(var)?,
                parse_value(value)?,
            ))
        }
        "end" => {
            let [txn] = arity::<1>("end", &args)?;
            Ok(Operation::end(parse_txn(txn)?))
        }
        "fail" => {
            let [site] = arity::<1>("fail", &args)?;
            Ok(Operation::fail(parse_site(site)?))
        }
        "recover" => {
            let [site] = arity::<1>("recover", &args)?;
            Ok(Operation::recover(parse_site(site)?))
        }
        "dump" => {
            arity::<0>("dump", &args)?;
            Ok(Operation::Dump)
        }
        "querystate" => {
            arity::<0>("querystate", &args)?;
            Ok(Operation::QueryState)
        }
        other => Err(ScriptError::UnknownOperation(other.to_string())),
    }
}

fn arity<'a, const N: usize>(op: &'static str, args: &[&'a str]) -> Result<[&'a str; N]> {
    <[&'a str; N]>::try_from(args).map_err(|_| ScriptError::Arity {
        op,
        expected: N,
        found: args.len(),
    })
}

/// Parses the digits after `prefix` as a positive integer.
fn positive<T>(text: &str, prefix: &str) -> Option<T>
where
    T: std::str::FromStr + PartialEq + From<u8>,
{
    let digits = text.strip_prefix(prefix)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().filter(|n| *n != T::from(0))
}

fn parse_txn(text: &str) -> Result<TxnId> {
    positive::<u64>(text, "T")
        .map(TxnId::new)
        .ok_or_else(|| ScriptError::InvalidTransaction(text.to_string()))
}

fn parse_var(text: &str) -> Result<VarId> {
    positive::<u32>(text, "x")
        .map(VarId::new)
        .ok_or_else(|| ScriptError::InvalidVariable(text.to_string()))
}

fn parse_site(text: &str) -> Result<SiteId> {
    positive::<u32>(text, "")
        .map(SiteId::new)
        .ok_or_else(|| ScriptError::InvalidSite(text.to_string()))
}

fn parse_value(text: &str) -> Result<Value> {
    text.parse()
        .map_err(|_| ScriptError::InvalidValue(text.to_string()))
}
