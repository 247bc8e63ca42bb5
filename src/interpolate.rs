//! Local `?`-placeholder interpolation: an opt-in convenience that rewrites
//! a query's placeholders into quoted literals and sends it as a single
//! text command instead of round-tripping through `COM_STMT_PREPARE`.
//!
//! Grounded on spec section 4.5's description of the original driver's
//! `interpolateParams` path; there is no Rust source for it in the
//! example pack (the teacher never implemented query interpolation), so
//! the escaping rules below follow the wire-level `NO_BACKSLASH_ESCAPES`
//! semantics spec section 8 specifies directly.

use crate::error::{Error, Result};

/// One bound argument for local interpolation. Distinct from [`crate::param::Param`]
/// (which encodes into the binary protocol) because a literal needs a
/// textual, quoted representation rather than a type tag and raw bytes.
pub enum InterpolateArg<'a> {
    Null,
    Signed(i64),
    Unsigned(u64),
    Float(f64),
    Str(&'a str),
    /// Raw bytes rendered as a quoted string literal — used for blob and
    /// JSON passthrough arguments. Must be valid UTF-8; binary data that
    /// isn't is rejected rather than silently mangled by a lossy
    /// conversion.
    Bytes(&'a [u8]),
    /// A pre-formatted temporal literal (e.g. `"2024-12-25 15:30:45.5"`),
    /// quoted the same way a string is.
    Time(&'a str),
}

/// Rewrites every `?` in `query` with the quoted literal for the
/// corresponding argument, in order. Returns [`Error::Skip`] — the
/// caller should fall back to server-side prepare — when the placeholder
/// count doesn't match `args.len()`, or when a `?` appears inside a
/// single-quoted string literal (those are never rescanned).
pub fn interpolate(query: &str, args: &[InterpolateArg], no_backslash_escapes: bool) -> Result<String> {
    let mut out = String::with_capacity(query.len() + args.len() * 8);
    let mut args = args.iter();
    let mut in_string = false;

    for ch in query.chars() {
        match ch {
            '\'' => {
                in_string = !in_string;
                out.push(ch);
            }
            '?' if in_string => return Err(Error::Skip),
            '?' => {
                let arg = args.next().ok_or(Error::Skip)?;
                write_literal(&mut out, arg, no_backslash_escapes)?;
            }
            _ => out.push(ch),
        }
    }

    if args.next().is_some() {
        return Err(Error::Skip);
    }
    Ok(out)
}

fn write_literal(out: &mut String, arg: &InterpolateArg, no_backslash_escapes: bool) -> Result<()> {
    match arg {
        InterpolateArg::Null => out.push_str("NULL"),
        InterpolateArg::Signed(v) => out.push_str(&v.to_string()),
        InterpolateArg::Unsigned(v) => out.push_str(&v.to_string()),
        InterpolateArg::Float(v) => out.push_str(&v.to_string()),
        InterpolateArg::Str(s) => write_quoted_str(out, s, no_backslash_escapes),
        InterpolateArg::Time(s) => write_quoted_str(out, s, no_backslash_escapes),
        InterpolateArg::Bytes(bytes) => {
            let s = std::str::from_utf8(bytes).map_err(|_| {
                Error::UnrepresentableParameter("blob argument is not valid UTF-8".into())
            })?;
            write_quoted_str(out, s, no_backslash_escapes);
        }
    }
    Ok(())
}

/// Quotes `s` as a MySQL string literal. Under `NO_BACKSLASH_ESCAPES` only
/// the quote character itself is doubled (standard SQL quoting); otherwise
/// MySQL's default backslash-escape set is used.
fn write_quoted_str(out: &mut String, s: &str, no_backslash_escapes: bool) {
    out.push('\'');
    for ch in s.chars() {
        if no_backslash_escapes {
            if ch == '\'' {
                out.push('\'');
            }
            out.push(ch);
            continue;
        }
        match ch {
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\u{1a}' => out.push_str("\\Z"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            _ => out.push(ch),
        }
    }
    out.push('\'');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_int_and_string_arguments() {
        let args = [InterpolateArg::Signed(42), InterpolateArg::Str("gopher")];
        assert_eq!(interpolate("SELECT ?+?", &args, false).unwrap(), "SELECT 42+'gopher'");
    }

    #[test]
    fn json_raw_passthrough_escapes_embedded_double_quotes() {
        let args = [InterpolateArg::Bytes(br#"{"value":42}"#)];
        assert_eq!(
            interpolate("SELECT ?", &args, false).unwrap(),
            r#"SELECT '{\"value\":42}'"#
        );
    }

    #[test]
    fn arity_mismatch_returns_skip() {
        let args = [InterpolateArg::Signed(42)];
        assert!(matches!(interpolate("SELECT ?+?", &args, false), Err(Error::Skip)));
    }

    #[test]
    fn placeholder_inside_string_literal_returns_skip() {
        let args = [InterpolateArg::Signed(42)];
        assert!(matches!(
            interpolate("SELECT 'abc?xyz',?", &args, false),
            Err(Error::Skip)
        ));
    }

    #[test]
    fn max_u64_is_preserved_verbatim() {
        let args = [InterpolateArg::Unsigned(u64::MAX)];
        assert_eq!(
            interpolate("SELECT ?", &args, false).unwrap(),
            "SELECT 18446744073709551615"
        );
    }

    #[test]
    fn no_backslash_escapes_mode_only_doubles_the_quote() {
        let args = [InterpolateArg::Str("a'b")];
        assert_eq!(interpolate("SELECT ?", &args, true).unwrap(), "SELECT 'a''b'");
    }
}
