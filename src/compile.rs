//! The compiler. Lowers a token sequence into a [`Program`]: the source text
//! of a script in the embedded language (see [`crate::script`]) that builds
//! the file's output in an implicit buffer. Literal tokens become `emit`
//! statements with their text escaped; expression regions (leading `=`)
//! become `emit` statements whose value is appended; statement regions are
//! spliced in verbatim, so control flow written across several regions
//! parses as a single construct.
//!
//! Compilation is pure and deterministic: identical tokens always yield
//! identical program text. Malformed code regions are not detected here;
//! they surface as evaluation errors when the program is parsed at
//! interpretation time.

use crate::token::{Kind, Token};

/// The compiled form of one source file. Recompiled per render, never
/// cached. The `source` field is what the debug artifact writes to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    pub source: String,
}

/// Compiles a token sequence into a [`Program`].
pub fn compile(tokens: &[Token]) -> Program {
    let mut source = String::new();
    for token in tokens {
        match token.kind {
            Kind::Literal => {
                source.push_str("emit \"");
                source.push_str(&escape(&token.text));
                source.push_str("\"\n");
            }
            Kind::Code => match token.text.strip_prefix('=') {
                Some(expression) => {
                    source.push_str("emit (");
                    source.push_str(expression);
                    source.push_str(")\n");
                }
                None => {
                    source.push_str(token.text.trim());
                    source.push('\n');
                }
            },
        }
    }
    Program { source }
}

/// Escapes literal text for embedding in a double-quoted script string:
/// backslash, quote, newline, and carriage return.
fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::tokenize;

    fn program(input: &str) -> Program {
        compile(&tokenize(input, "<%", "%>"))
    }

    #[test]
    fn test_literal_becomes_emit() {
        assert_eq!(program("hello").source, "emit \"hello\"\n");
    }

    #[test]
    fn test_expression_region() {
        assert_eq!(program("<%= title %>").source, "emit ( title )\n");
    }

    #[test]
    fn test_statement_region_is_verbatim() {
        assert_eq!(
            program("<% for x in xs { %>y<% } %>").source,
            "for x in xs {\nemit \"y\"\n}\n"
        );
    }

    #[test]
    fn test_escaping() {
        assert_eq!(
            program("a\"b\\c\nd\re").source,
            "emit \"a\\\"b\\\\c\\nd\\re\"\n"
        );
    }

    #[test]
    fn test_deterministic() {
        let input = "<% let x = 1 %>text<%= x %>";
        assert_eq!(program(input), program(input));
    }
}
