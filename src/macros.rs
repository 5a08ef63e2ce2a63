//! Utility macros for the lexer.
//!
//! - `MK_TOKEN!` builds a `Token`
//! - `MK_DEFAULT_HANDLER!` builds a handler for fixed punctuation and operators

/// Creates a Token instance.
///
/// ```ignore
/// let token = MK_TOKEN!(TokenKind::Number, "42".to_string(), span);
/// ```
#[macro_export]
macro_rules! MK_TOKEN {
    ($kind:expr, $value:expr, $span:expr) => {
        Token {
            kind: $kind,
            value: $value,
            span: $span,
        }
    };
}

/// Creates a lexer handler for a pattern that always matches the same text.
///
/// The handler pushes a token spanning the literal and advances past it.
///
/// ```ignore
/// RegexPattern {
///     regex: Regex::new("^<<").unwrap(),
///     handler: MK_DEFAULT_HANDLER!(TokenKind::ShiftLeft, "<<"),
/// }
/// ```
#[macro_export]
macro_rules! MK_DEFAULT_HANDLER {
    ($kind:expr, $value:literal) => {
        |lexer: &mut Lexer, _regex: &Regex| {
            let span = lexer.span_of($value.len());
            lexer.push(MK_TOKEN!($kind, String::from($value), span));
            lexer.advance_n($value.len());
        }
    };
}
