//! Lexical tokens.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Token { kind, span }
    }
}

/// Kinds of tokens.
///
/// Operators appear lowest-binding first; their binding strength is
/// given by [`TokenKind::precedence`] rather than the variants'
/// ordinal values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Integer literal (decimal, hexadecimal or octal).
    Num,
    /// Character literal, including the surrounding quotes.
    CharLit,
    /// String literal, including the surrounding quotes.
    Str,
    /// Identifier that is not a keyword.
    Ident,
    /// Reserved word.
    Keyword(Keyword),

    Semicolon,
    Colon,
    Comma,
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    RightBracket,
    /// Logical not `!`. Unary only; `!=` lexes as [`TokenKind::Ne`].
    Not,
    /// Bitwise not `~`.
    Tilde,

    Assign,
    /// Ternary conditional `?`.
    Cond,
    Lor,
    Lan,
    Or,
    Xor,
    And,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Shl,
    Shr,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Inc,
    Dec,
    /// Array subscript `[`.
    LeftBracket,

    /// End of the source text.
    EOF,
}

impl TokenKind {
    /// Binding strength when this token appears in infix or postfix
    /// position. `None` for tokens that cannot continue an expression.
    pub fn precedence(&self) -> Option<u8> {
        use TokenKind as TK;
        match self {
            TK::Assign => Some(1),
            TK::Cond => Some(2),
            TK::Lor => Some(3),
            TK::Lan => Some(4),
            TK::Or => Some(5),
            TK::Xor => Some(6),
            TK::And => Some(7),
            TK::Eq | TK::Ne => Some(8),
            TK::Lt | TK::Gt | TK::Le | TK::Ge => Some(9),
            TK::Shl | TK::Shr => Some(10),
            TK::Add | TK::Sub => Some(11),
            TK::Mul | TK::Div | TK::Mod => Some(12),
            TK::Inc | TK::Dec | TK::LeftBracket => Some(13),
            _ => None,
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use TokenKind as TK;
        match self {
            TK::Num => write!(f, "number"),
            TK::CharLit => write!(f, "character literal"),
            TK::Str => write!(f, "string literal"),
            TK::Ident => write!(f, "identifier"),
            TK::Keyword(keyword) => write!(f, "'{}'", keyword),
            TK::Semicolon => write!(f, "';'"),
            TK::Colon => write!(f, "':'"),
            TK::Comma => write!(f, "','"),
            TK::LeftParen => write!(f, "'('"),
            TK::RightParen => write!(f, "')'"),
            TK::LeftBrace => write!(f, "'{{'"),
            TK::RightBrace => write!(f, "'}}'"),
            TK::RightBracket => write!(f, "']'"),
            TK::Not => write!(f, "'!'"),
            TK::Tilde => write!(f, "'~'"),
            TK::Assign => write!(f, "'='"),
            TK::Cond => write!(f, "'?'"),
            TK::Lor => write!(f, "'||'"),
            TK::Lan => write!(f, "'&&'"),
            TK::Or => write!(f, "'|'"),
            TK::Xor => write!(f, "'^'"),
            TK::And => write!(f, "'&'"),
            TK::Eq => write!(f, "'=='"),
            TK::Ne => write!(f, "'!='"),
            TK::Lt => write!(f, "'<'"),
            TK::Gt => write!(f, "'>'"),
            TK::Le => write!(f, "'<='"),
            TK::Ge => write!(f, "'>='"),
            TK::Shl => write!(f, "'<<'"),
            TK::Shr => write!(f, "'>>'"),
            TK::Add => write!(f, "'+'"),
            TK::Sub => write!(f, "'-'"),
            TK::Mul => write!(f, "'*'"),
            TK::Div => write!(f, "'/'"),
            TK::Mod => write!(f, "'%'"),
            TK::Inc => write!(f, "'++'"),
            TK::Dec => write!(f, "'--'"),
            TK::LeftBracket => write!(f, "'['"),
            TK::EOF => write!(f, "end of input"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Char,
    Else,
    Enum,
    If,
    Int,
    Return,
    Sizeof,
    While,
    Void,
}

impl Keyword {
    /// Maps a source fragment to a keyword, if it is one.
    pub fn parse(fragment: &str) -> Option<Keyword> {
        use Keyword as K;
        match fragment {
            "char" => Some(K::Char),
            "else" => Some(K::Else),
            "enum" => Some(K::Enum),
            "if" => Some(K::If),
            "int" => Some(K::Int),
            "return" => Some(K::Return),
            "sizeof" => Some(K::Sizeof),
            "while" => Some(K::While),
            "void" => Some(K::Void),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        use Keyword as K;
        match self {
            K::Char => "char",
            K::Else => "else",
            K::Enum => "enum",
            K::If => "if",
            K::Int => "int",
            K::Return => "return",
            K::Sizeof => "sizeof",
            K::While => "while",
            K::Void => "void",
        }
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self.as_str(), f)
    }
}

/// Position of a token in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// Byte offset of the first character.
    pub index: u32,
    /// Length in bytes.
    pub size: u32,
    /// 1-based source line of the first character.
    pub line: u32,
}

impl Span {
    pub fn new(index: u32, size: u32, line: u32) -> Self {
        Span { index, size, line }
    }

    /// Slice of the original source text covered by this span.
    pub fn fragment<'a>(&self, source: &'a str) -> &'a str {
        let start = self.index as usize;
        let end = start + self.size as usize;
        &source[start..end]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_keyword_parse() {
        assert_eq!(Keyword::parse("while"), Some(Keyword::While));
        assert_eq!(Keyword::parse("sizeof"), Some(Keyword::Sizeof));
        assert_eq!(Keyword::parse("whilst"), None);
        assert_eq!(Keyword::parse(""), None);
    }

    #[test]
    fn test_precedence_ordering() {
        // Multiplication binds tighter than addition, which binds
        // tighter than comparison and assignment.
        let assign = TokenKind::Assign.precedence().unwrap();
        let lt = TokenKind::Lt.precedence().unwrap();
        let add = TokenKind::Add.precedence().unwrap();
        let mul = TokenKind::Mul.precedence().unwrap();
        assert!(assign < lt && lt < add && add < mul);
        assert_eq!(TokenKind::Semicolon.precedence(), None);
        assert_eq!(TokenKind::EOF.precedence(), None);
    }

    #[test]
    fn test_span_fragment() {
        let source = "int main";
        let span = Span::new(4, 4, 1);
        assert_eq!(span.fragment(source), "main");
    }
}
