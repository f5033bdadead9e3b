use logos::Logos;
use std::fmt;
use std::ops::Range;

/// Token types for the case dictionary grammar.
///
/// The lexer is lossless: every byte of the input belongs to exactly one
/// token span, including comments and whitespace. Newlines are their own
/// token kind because line boundaries drive the position index builder.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    #[regex(r"//[^\n]*")]
    LineComment,

    #[regex(r"/\*([^*]|\*[^/])*\*/")]
    BlockComment,

    #[token("\n")]
    Newline,

    // Horizontal whitespace only; '\r' is treated as horizontal so CRLF
    // files keep their carriage returns inside ordinary whitespace runs.
    #[regex(r"[ \t\r\x0b\x0c]+")]
    Whitespace,

    #[token("{")]
    LBrace,

    #[token("}")]
    RBrace,

    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token(";")]
    Semicolon,

    // A quoted word runs to the matching quote, newlines included.
    #[regex(r#""[^"]*""#)]
    Quoted,

    // A bare word runs until whitespace or a structural symbol. It may not
    // start with '/' (comment rules own that position) or '"', but both are
    // legal inside a word, so `abc//def` stays one word.
    #[regex(r#"[^ \t\r\n\x0b\x0c{}();"/][^ \t\r\n\x0b\x0c{}();]*"#)]
    Word,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::LineComment => write!(f, "line comment"),
            Token::BlockComment => write!(f, "block comment"),
            Token::Newline => write!(f, "newline"),
            Token::Whitespace => write!(f, "whitespace"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Semicolon => write!(f, ";"),
            Token::Quoted => write!(f, "quoted word"),
            Token::Word => write!(f, "word"),
        }
    }
}

impl Token {
    /// Trivia carries no structural meaning for the extractor.
    pub fn is_trivia(&self) -> bool {
        matches!(
            self,
            Token::LineComment | Token::BlockComment | Token::Newline | Token::Whitespace
        )
    }
}

/// Tokenize a source string.
///
/// Never fails. Bytes that match no rule (a stray `/`, an unterminated
/// quote or block comment opener) pass through as word tokens rather than
/// being dropped, and adjacent pass-through fragments merge with the word
/// that follows them, so the concatenation of all spans always reproduces
/// the input exactly.
pub fn tokenize(source: &str) -> Vec<(Token, Range<usize>)> {
    let mut tokens: Vec<(Token, Range<usize>)> = Vec::new();

    for (result, span) in Token::lexer(source).spanned() {
        let token = result.unwrap_or(Token::Word);

        if let Some((Token::Word, prev)) = tokens.last_mut() {
            if token == Token::Word && prev.end == span.start {
                prev.end = span.end;
                continue;
            }
        }

        tokens.push((token, span));
    }

    tokens
}
