//! The template tokenizer. Splits raw source text into [`Token`]s: literal
//! regions that pass through to the output verbatim and code regions enclosed
//! in a configurable delimiter pair. Tokenizing is total: any input produces
//! a token sequence, and concatenating the tokens (re-wrapping code regions
//! in their delimiters) reconstructs the input exactly.

/// The kind of a [`Token`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Verbatim output text outside any delimited region.
    Literal,

    /// The text between one open delimiter and the next close delimiter,
    /// delimiters excluded.
    Code,
}

/// One region of a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: Kind,
    pub text: String,
}

impl Token {
    /// Constructs a literal token.
    pub fn literal(text: impl Into<String>) -> Token {
        Token {
            kind: Kind::Literal,
            text: text.into(),
        }
    }

    /// Constructs a code token.
    pub fn code(text: impl Into<String>) -> Token {
        Token {
            kind: Kind::Code,
            text: text.into(),
        }
    }
}

/// Splits `input` into literal and code tokens. Each occurrence of `open`
/// extends to the next occurrence of `close`; punctuation inside the region
/// never terminates it early. Adjacent code regions produce no empty literal
/// token between them. An open delimiter with no matching close delimiter is
/// treated as literal text to end-of-input.
pub fn tokenize(input: &str, open: &str, close: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut rest = input;
    loop {
        let start = match rest.find(open) {
            Some(start) => start,
            None => {
                if !rest.is_empty() {
                    tokens.push(Token::literal(rest));
                }
                return tokens;
            }
        };

        let code_start = start + open.len();
        let len = match rest[code_start..].find(close) {
            Some(len) => len,
            // Unterminated open delimiter: the remainder is literal text.
            None => {
                tokens.push(Token::literal(rest));
                return tokens;
            }
        };

        if start > 0 {
            tokens.push(Token::literal(&rest[..start]));
        }
        tokens.push(Token::code(&rest[code_start..code_start + len]));
        rest = &rest[code_start + len + close.len()..];
    }
}
