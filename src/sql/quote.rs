//! Identifier and literal escaping primitives.
//!
//! Every identifier entering generated SQL passes through
//! [`escape_identifier`]; every literal passes through [`quote_literal`] or
//! [`quote_binary`]. Nothing else in the crate concatenates raw input into a
//! statement.

use once_cell::sync::Lazy;
use regex::Regex;

use super::dialect::Dialect;

static COLUMN_EXPR_MYSQL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([\w(]+)(`.*`)([ \w)]+)$").unwrap());
static COLUMN_EXPR_PG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^([\w(]+)(".*")([ \w)]+)$"#).unwrap());

/// Wrap `name` in the dialect's identifier quote character, doubling any
/// embedded quote character. Total: any input string becomes a valid quoted
/// identifier.
pub fn escape_identifier(dialect: Dialect, name: &str) -> String {
    let quote = dialect.quote_char();
    let mut out = String::with_capacity(name.len() + 2);
    out.push(quote);
    for ch in name.chars() {
        if ch == quote {
            out.push(quote);
        }
        out.push(ch);
    }
    out.push(quote);
    out
}

/// Inverse of [`escape_identifier`]. A token that is not a validly quoted
/// identifier is returned unchanged.
pub fn unescape_identifier(dialect: Dialect, quoted: &str) -> String {
    let quote = dialect.quote_char();
    if quoted.len() >= 2 && quoted.starts_with(quote) && quoted.ends_with(quote) {
        let inner = &quoted[1..quoted.len() - 1];
        let doubled: String = [quote, quote].iter().collect();
        inner.replace(&doubled, &quote.to_string())
    } else {
        quoted.to_string()
    }
}

/// Quote a string literal. MySQL escapes with backslashes (including NUL and
/// ctrl-Z, which terminate statements in some clients); PostgreSQL doubles
/// single quotes and switches to the `E''` form when a backslash is present
/// so the literal reads the same under any `standard_conforming_strings`.
pub fn quote_literal(dialect: Dialect, value: &str) -> String {
    match dialect {
        Dialect::MySql => {
            let mut out = String::with_capacity(value.len() + 2);
            out.push('\'');
            for ch in value.chars() {
                match ch {
                    '\0' => out.push_str("\\0"),
                    '\n' => out.push_str("\\n"),
                    '\r' => out.push_str("\\r"),
                    '\\' => out.push_str("\\\\"),
                    '\'' => out.push_str("\\'"),
                    '"' => out.push_str("\\\""),
                    '\u{1a}' => out.push_str("\\Z"),
                    _ => out.push(ch),
                }
            }
            out.push('\'');
            out
        }
        Dialect::Postgres => {
            if value.contains('\\') {
                format!("E'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
            } else {
                format!("'{}'", value.replace('\'', "''"))
            }
        }
    }
}

/// Hex literal for raw bytes: `X'...'` on MySQL, `'\x...'::bytea` on
/// PostgreSQL. Binary values never travel as text literals.
pub fn quote_binary(dialect: Dialect, bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        hex.push_str(&format!("{:02X}", byte));
    }
    match dialect {
        Dialect::MySql => format!("X'{}'", hex),
        Dialect::Postgres => format!("'\\x{}'::bytea", hex),
    }
}

/// Escape a column key that may be a function-shaped expression such as
/// ``round(`price`)``: the embedded quoted identifier is re-escaped while the
/// head and tail of the expression pass through verbatim. Anything that does
/// not match the exact expression shape is escaped as a plain identifier.
///
/// The verbatim head/tail is a deliberately narrow pass-through kept for
/// expression columns on drill-down links; the pattern must not be widened.
pub fn escape_column_key(dialect: Dialect, key: &str) -> String {
    let re = match dialect {
        Dialect::MySql => &COLUMN_EXPR_MYSQL,
        Dialect::Postgres => &COLUMN_EXPR_PG,
    };
    if let Some(caps) = re.captures(key) {
        return format!(
            "{}{}{}",
            &caps[1],
            escape_identifier(dialect, &unescape_identifier(dialect, &caps[2])),
            &caps[3]
        );
    }
    escape_identifier(dialect, key)
}

/// Encode `:`, `]`, `[` and `"` so a column name can live inside a
/// `field[name]` form token without colliding with the bracket syntax.
pub fn bracket_escape(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        match ch {
            ':' => out.push_str(":1"),
            ']' => out.push_str(":2"),
            '[' => out.push_str(":3"),
            '"' => out.push_str(":4"),
            _ => out.push(ch),
        }
    }
    out
}

/// Inverse of [`bracket_escape`]. A `:` followed by anything else passes
/// through unchanged.
pub fn bracket_unescape(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut chars = name.chars();
    while let Some(ch) = chars.next() {
        if ch != ':' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('1') => out.push(':'),
            Some('2') => out.push(']'),
            Some('3') => out.push('['),
            Some('4') => out.push('"'),
            Some(other) => {
                out.push(':');
                out.push(other);
            }
            None => out.push(':'),
        }
    }
    out
}

/// Split a comma list into atoms, treating single-quoted runs as atomic.
/// Inside quotes both `''` and backslash escapes are honored, matching the
/// ENUM/SET member grammar. Quoted atoms keep their quotes; whitespace around
/// atoms is trimmed; empty atoms are dropped.
pub fn parse_quoted_list(value: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut chars = value.chars().peekable();
    let mut in_quote = false;
    while let Some(ch) = chars.next() {
        if in_quote {
            current.push(ch);
            if ch == '\\' {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            } else if ch == '\'' {
                if chars.peek() == Some(&'\'') {
                    if let Some(doubled) = chars.next() {
                        current.push(doubled);
                    }
                } else {
                    in_quote = false;
                }
            }
        } else {
            match ch {
                '\'' => {
                    in_quote = true;
                    current.push(ch);
                }
                ',' => push_item(&mut items, &mut current),
                _ => current.push(ch),
            }
        }
    }
    push_item(&mut items, &mut current);
    items
}

fn push_item(items: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        items.push(trimmed.to_string());
    }
    current.clear();
}
