//! POSIX shell quoting helpers.
//!
//! Used by the config translator to embed image-supplied strings into
//! generated scripts so that values containing spaces, quotes, or shell
//! metacharacters survive re-evaluation.

/// Escape a string for embedding inside a single-quoted shell literal.
///
/// Each `'` becomes `'\''`: close the quote, emit an escaped quote, reopen.
pub fn escape_single_quotes(s: &str) -> String {
    s.replace('\'', "'\\''")
}

/// Escape a string for embedding inside a double-quoted shell literal.
///
/// Backslash, backquote, dollar and double-quote are the characters the
/// shell still interprets between double quotes.
pub fn escape_double_quotes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '`' | '$' | '"') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Quote a list of arguments as discrete single-quoted shell words.
///
/// `["/bin/echo", "hi there"]` becomes `'/bin/echo' 'hi there'`. Evaluating
/// the result with a shell `set` step re-tokenizes it into the original
/// argv entries.
pub fn args_quoted(args: &[String]) -> String {
    args.iter()
        .map(|a| format!("'{}'", escape_single_quotes(a)))
        .collect::<Vec<_>>()
        .join(" ")
}
