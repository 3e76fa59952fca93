//! Lexical analysis (tokenizer)
use crate::tokens::{Keyword, Span, Token, TokenKind};

use itertools::{multipeek, MultiPeek};
use std::{error, fmt, str::CharIndices};

/// Lexical analyzer.
///
/// Produces one token per call; the surrounding parser drives it and
/// never buffers more than the current token.
pub struct Lexer<'a> {
    source: SourceText<'a>,
    token_start: usize,
    token_line: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(source_code: &'a str) -> Self {
        Self {
            source: SourceText::new(source_code),
            token_start: 0,
            token_line: 1,
        }
    }

    pub fn next_token(&mut self) -> Result<Token, LexError> {
        use TokenKind as T;

        while let Some((_, next_char)) = self.source.next_char() {
            self.start_token();

            match next_char {
                ' ' | '\t' | '\r' | '\n' => continue,
                // Line directives and shell interpreter lines are
                // skipped wholesale, as are `//` comments.
                '#' => self.consume_until_newline(),
                '/' => {
                    if let Some((_, '/')) = self.source.peek_char() {
                        self.consume_until_newline();
                    } else {
                        self.source.reset_peek();
                        return Ok(self.make_token(T::Div));
                    }
                }
                '_' | 'a'..='z' | 'A'..='Z' => return Ok(self.consume_ident()),
                '0'..='9' => return Ok(self.consume_number()),
                '"' => return self.consume_string(),
                '\'' => return self.consume_char(),
                '=' => return Ok(self.two_char_token('=', T::Eq, T::Assign)),
                '!' => return Ok(self.two_char_token('=', T::Ne, T::Not)),
                '+' => return Ok(self.two_char_token('+', T::Inc, T::Add)),
                '-' => return Ok(self.two_char_token('-', T::Dec, T::Sub)),
                '|' => return Ok(self.two_char_token('|', T::Lor, T::Or)),
                '&' => return Ok(self.two_char_token('&', T::Lan, T::And)),
                '<' => {
                    return Ok(match self.source.peek_char() {
                        Some((_, '=')) => self.consume_peeked(T::Le),
                        Some((_, '<')) => self.consume_peeked(T::Shl),
                        _ => {
                            self.source.reset_peek();
                            self.make_token(T::Lt)
                        }
                    })
                }
                '>' => {
                    return Ok(match self.source.peek_char() {
                        Some((_, '=')) => self.consume_peeked(T::Ge),
                        Some((_, '>')) => self.consume_peeked(T::Shr),
                        _ => {
                            self.source.reset_peek();
                            self.make_token(T::Gt)
                        }
                    })
                }
                '*' => return Ok(self.make_token(T::Mul)),
                '%' => return Ok(self.make_token(T::Mod)),
                '^' => return Ok(self.make_token(T::Xor)),
                '~' => return Ok(self.make_token(T::Tilde)),
                '?' => return Ok(self.make_token(T::Cond)),
                ';' => return Ok(self.make_token(T::Semicolon)),
                ':' => return Ok(self.make_token(T::Colon)),
                ',' => return Ok(self.make_token(T::Comma)),
                '(' => return Ok(self.make_token(T::LeftParen)),
                ')' => return Ok(self.make_token(T::RightParen)),
                '{' => return Ok(self.make_token(T::LeftBrace)),
                '}' => return Ok(self.make_token(T::RightBrace)),
                '[' => return Ok(self.make_token(T::LeftBracket)),
                ']' => return Ok(self.make_token(T::RightBracket)),
                _ => {
                    return Err(LexError::UnknownCharacter {
                        character: next_char,
                        line: self.token_line,
                    })
                }
            }
        }

        // Give end-of-source its own character position.
        self.start_token();
        Ok(self.make_token(T::EOF))
    }

    /// Prime the lexer state for recording a new token.
    fn start_token(&mut self) {
        self.token_start = self.source.current.0;
        self.token_line = self.source.current_line;
    }

    fn make_token(&mut self, token_kind: TokenKind) -> Token {
        let end = self.source.current_end();
        let span = Span::new(
            self.token_start as u32,
            (end - self.token_start) as u32,
            self.token_line,
        );
        Token::new(token_kind, span)
    }

    /// Consumes the character peeked just before, on a two-character
    /// operator match.
    fn consume_peeked(&mut self, token_kind: TokenKind) -> Token {
        self.source.next_char();
        self.make_token(token_kind)
    }

    fn two_char_token(&mut self, second: char, matched: TokenKind, single: TokenKind) -> Token {
        match self.source.peek_char() {
            Some((_, c)) if c == second => self.consume_peeked(matched),
            _ => {
                self.source.reset_peek();
                self.make_token(single)
            }
        }
    }

    fn consume_ident(&mut self) -> Token {
        self.source.reset_peek();

        while let Some((_, c)) = self.source.peek_char() {
            match c {
                '_' | 'a'..='z' | 'A'..='Z' | '0'..='9' => {
                    self.source.next_char();
                }
                _ => break,
            }
        }
        self.source.reset_peek();

        // If a valid keyword can be parsed from the source fragment, then
        // the token is a reserved word instead of a user defined identifier.
        let token_kind = Keyword::parse(self.token_fragment())
            .map(TokenKind::Keyword)
            .unwrap_or(TokenKind::Ident);
        self.make_token(token_kind)
    }

    /// Consumes a numeric literal. Hexadecimal digits and the `0x`
    /// marker are only accepted after a leading zero; the base itself
    /// is decoded by the parser from the fragment.
    fn consume_number(&mut self) -> Token {
        self.source.reset_peek();

        let hex = self.source.current.1 == '0'
            && matches!(self.source.peek_char(), Some((_, 'x')) | Some((_, 'X')));
        self.source.reset_peek();
        if hex {
            self.source.next_char();
            while let Some((_, c)) = self.source.peek_char() {
                match c {
                    '0'..='9' | 'a'..='f' | 'A'..='F' => {
                        self.source.next_char();
                    }
                    _ => break,
                }
            }
        } else {
            while let Some((_, '0'..='9')) = self.source.peek_char() {
                self.source.next_char();
            }
        }
        self.source.reset_peek();

        self.make_token(TokenKind::Num)
    }

    /// Consumes a string literal including both quotes. Backslash
    /// escapes are carried through raw; the parser decodes them when
    /// interning the bytes.
    fn consume_string(&mut self) -> Result<Token, LexError> {
        self.source.reset_peek();

        loop {
            match self.source.next_char() {
                Some((_, '"')) => return Ok(self.make_token(TokenKind::Str)),
                Some((_, '\\')) => {
                    if self.source.next_char().is_none() {
                        return Err(LexError::UnterminatedString { line: self.token_line });
                    }
                }
                Some((_, _)) => {}
                None => return Err(LexError::UnterminatedString { line: self.token_line }),
            }
        }
    }

    /// Consumes a character literal: one character or one backslash
    /// escape between single quotes.
    fn consume_char(&mut self) -> Result<Token, LexError> {
        self.source.reset_peek();

        match self.source.next_char() {
            Some((_, '\\')) => {
                if self.source.next_char().is_none() {
                    return Err(LexError::UnterminatedChar { line: self.token_line });
                }
            }
            Some((_, '\'')) | None => {
                return Err(LexError::UnterminatedChar { line: self.token_line })
            }
            Some((_, _)) => {}
        }

        match self.source.next_char() {
            Some((_, '\'')) => Ok(self.make_token(TokenKind::CharLit)),
            _ => Err(LexError::UnterminatedChar { line: self.token_line }),
        }
    }

    fn consume_until_newline(&mut self) {
        while let Some((_, c)) = self.source.peek_char() {
            if c == '\n' {
                break;
            }
            self.source.next_char();
        }
        self.source.reset_peek();
    }

    fn token_fragment(&self) -> &str {
        &self.source.original[self.token_start..self.source.current_end()]
    }
}

/// Implement `Lexer` as an iterator for consuming tokens lazily.
impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Token, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_token() {
            Ok(token) if token.kind == TokenKind::EOF => None,
            result => Some(result),
        }
    }
}

/// Wrapper for source code that keeps a cursor position.
///
/// Allows forward lookup via peeking.
struct SourceText<'a> {
    /// Keep reference to the source so the lexer can
    /// slice fragments from it.
    original: &'a str,

    /// Iterator over UTF-8 encoded source code.
    ///
    /// The `MultiPeek` wrapper allows for arbitrary lookahead by consuming
    /// the iterator internally and buffering the result. This is required
    /// because UTF-8 characters are variable in width.
    ///
    /// An important semantic feature of `MultiPeek` is that peeking advances
    /// the internal peek cursor by 1. Each call will return the next element.
    /// The peek cursor offset is restored to 0 when calling `MultiPeek::next()`
    /// or `MultiPeek::reset_peek()`.
    source: MultiPeek<CharIndices<'a>>,

    /// Byte position and value of the current character.
    current: (usize, char),
    current_line: u32,
}

impl<'a> SourceText<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            original: source,
            source: multipeek(source.char_indices()),
            current: (0, '\0'),
            current_line: 1,
        }
    }

    /// Advance the cursor and return the next position and character.
    fn next_char(&mut self) -> Option<(usize, char)> {
        if let Some((index, c)) = self.source.next() {
            self.current = (index, c);
            if c == '\n' {
                self.current_line += 1;
            }
            Some((index, c))
        } else {
            // Source code iterator has reached end-of-file.
            //
            // Set the current index to the size of the source
            // string. There is no end-of-file character, so
            // we just use the null-byte.
            self.current = (self.original.len(), '\0');
            None
        }
    }

    /// Peeks the next character in the stream.
    ///
    /// This call advances the peek cursor. Subsequent
    /// calls will look ahead by one character each call.
    fn peek_char(&mut self) -> Option<(usize, char)> {
        self.source.peek().cloned()
    }

    /// Reset the stream peek cursor.
    fn reset_peek(&mut self) {
        self.source.reset_peek()
    }

    /// Byte offset one past the current character.
    fn current_end(&self) -> usize {
        if self.current.0 >= self.original.len() {
            self.original.len()
        } else {
            self.current.0 + self.current.1.len_utf8()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexError {
    UnknownCharacter { character: char, line: u32 },
    UnterminatedString { line: u32 },
    UnterminatedChar { line: u32 },
}

impl LexError {
    pub fn line(&self) -> u32 {
        match self {
            LexError::UnknownCharacter { line, .. }
            | LexError::UnterminatedString { line }
            | LexError::UnterminatedChar { line } => *line,
        }
    }
}

impl error::Error for LexError {}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LexError::UnknownCharacter { character, .. } => {
                write!(f, "unknown character {:?}", character)
            }
            LexError::UnterminatedString { .. } => write!(f, "unterminated string literal"),
            LexError::UnterminatedChar { .. } => write!(f, "unterminated character literal"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tokens::Keyword as K;
    use TokenKind as T;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source)
            .map(|result| result.map(|token| token.kind))
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_lex_statement() {
        assert_eq!(
            kinds("while (i < 10) i = i + 1;"),
            vec![
                T::Keyword(K::While),
                T::LeftParen,
                T::Ident,
                T::Lt,
                T::Num,
                T::RightParen,
                T::Ident,
                T::Assign,
                T::Ident,
                T::Add,
                T::Num,
                T::Semicolon,
            ]
        );
    }

    #[test]
    fn test_lex_two_char_operators() {
        assert_eq!(
            kinds("== != <= >= << >> && || ++ --"),
            vec![T::Eq, T::Ne, T::Le, T::Ge, T::Shl, T::Shr, T::Lan, T::Lor, T::Inc, T::Dec]
        );
        // Adjacent single-char forms must not merge.
        assert_eq!(kinds("= ! < >"), vec![T::Assign, T::Not, T::Lt, T::Gt]);
    }

    #[test]
    fn test_lex_comments_and_directives() {
        let source = "#include <stdio.h>\nint x; // trailing\n// whole line\ny";
        assert_eq!(
            kinds(source),
            vec![T::Keyword(K::Int), T::Ident, T::Semicolon, T::Ident]
        );
    }

    #[test]
    fn test_lex_division_not_comment() {
        assert_eq!(kinds("a / b"), vec![T::Ident, T::Div, T::Ident]);
    }

    #[test]
    fn test_lex_number_fragments() {
        let source = "42 0x2A 052 0";
        let lexer = Lexer::new(source);
        let fragments: Vec<&str> = lexer
            .map(|result| result.unwrap().span.fragment(source))
            .collect();
        assert_eq!(fragments, vec!["42", "0x2A", "052", "0"]);
    }

    #[test]
    fn test_lex_string_and_char() {
        let source = r#""hello\n" 'a' '\n'"#;
        let tokens: Vec<Token> = Lexer::new(source).map(|r| r.unwrap()).collect();
        assert_eq!(tokens[0].kind, T::Str);
        assert_eq!(tokens[0].span.fragment(source), r#""hello\n""#);
        assert_eq!(tokens[1].kind, T::CharLit);
        assert_eq!(tokens[1].span.fragment(source), "'a'");
        assert_eq!(tokens[2].kind, T::CharLit);
    }

    #[test]
    fn test_lex_line_numbers() {
        let source = "int a;\n\nint b;";
        let tokens: Vec<Token> = Lexer::new(source).map(|r| r.unwrap()).collect();
        assert_eq!(tokens[0].span.line, 1);
        assert_eq!(tokens[3].span.line, 3);
    }

    #[test]
    fn test_lex_unknown_character() {
        let mut lexer = Lexer::new("int a;\n$");
        for _ in 0..3 {
            lexer.next_token().unwrap();
        }
        assert_eq!(
            lexer.next_token(),
            Err(LexError::UnknownCharacter { character: '$', line: 2 })
        );
    }

    #[test]
    fn test_lex_unterminated_string() {
        let mut lexer = Lexer::new("\"no closing quote");
        assert_eq!(
            lexer.next_token(),
            Err(LexError::UnterminatedString { line: 1 })
        );
    }

    #[test]
    fn test_lex_empty_source() {
        assert_eq!(Lexer::new("").next_token().unwrap().kind, T::EOF);
        assert_eq!(Lexer::new("  \n\t ").next_token().unwrap().kind, T::EOF);
    }
}
