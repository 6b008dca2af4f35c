//! Server URL template expansion.
//!
//! Supports the RFC 6570 forms used in API descriptions: simple `{var}` and
//! reserved `{+var}` expansion, with comma-separated variable lists.
//! Undefined variables expand to nothing.

use std::collections::HashMap;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// Expand `template` using `vars`.
///
/// An unterminated `{` is copied through unchanged.
pub fn expand(template: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        expand_expression(&after[..end], vars, &mut out);
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

fn expand_expression(expr: &str, vars: &HashMap<String, String>, out: &mut String) {
    let (reserved, names) = match expr.strip_prefix('+') {
        Some(names) => (true, names),
        None => (false, expr),
    };

    let values: Vec<String> = names
        .split(',')
        .filter_map(|name| vars.get(name.trim()))
        .map(|value| encode(value, reserved))
        .collect();
    out.push_str(&values.join(","));
}

/// Unreserved characters plus the RFC 3986 reserved set, left as they are
/// by `{+var}` expansion. `%` stays so pre-encoded triplets pass through.
const RESERVED_EXPANSION: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b':')
    .remove(b'/')
    .remove(b'?')
    .remove(b'#')
    .remove(b'[')
    .remove(b']')
    .remove(b'@')
    .remove(b'!')
    .remove(b'$')
    .remove(b'&')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'+')
    .remove(b',')
    .remove(b';')
    .remove(b'=')
    .remove(b'%');

fn encode(value: &str, reserved: bool) -> String {
    if reserved {
        utf8_percent_encode(value, RESERVED_EXPANSION).to_string()
    } else {
        urlencoding::encode(value).into_owned()
    }
}
