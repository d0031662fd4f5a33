//! Lexer for submitted source
//!
//! Uses Logos for tokenization; comments and whitespace are skipped.

use logos::Logos;
use std::fmt;
use std::ops::Range;

use super::Diagnostic;
use crate::source::{LineIndex, SourceUnit};

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"//[^\n]*")]
#[logos(skip r"/\*([^*]|\*+[^*/])*\*+/")]
pub enum Token {
    // === Declarations ===
    #[token("package")]
    Package,
    #[token("import")]
    Import,
    #[token("class")]
    Class,
    #[token("public")]
    Public,
    #[token("protected")]
    Protected,
    #[token("private")]
    Private,
    #[token("static")]
    Static,
    #[token("final")]
    Final,
    #[token("abstract")]
    Abstract,

    // === Primitive types ===
    #[token("void")]
    Void,
    #[token("int")]
    Int,
    #[token("long")]
    Long,
    #[token("double")]
    Double,
    #[token("boolean")]
    Boolean,
    #[token("char")]
    Char,
    #[token("var")]
    Var,

    // === Control flow ===
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("do")]
    Do,
    #[token("for")]
    For,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("return")]
    Return,
    #[token("throw")]
    Throw,
    #[token("try")]
    Try,
    #[token("catch")]
    Catch,
    #[token("finally")]
    Finally,

    // === Expressions ===
    #[token("new")]
    New,
    #[token("this")]
    This,
    #[token("null")]
    Null,
    #[token("true")]
    True,
    #[token("false")]
    False,

    // === Literals ===
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    IntLit(i64),

    #[regex(r"[0-9]+[lL]", |lex| {
        let s = lex.slice();
        s[..s.len() - 1].parse::<u64>().ok()
    })]
    LongLit(u64),

    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?[dD]?", parse_double)]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+[dD]?", parse_double)]
    #[regex(r"[0-9]+[dD]", parse_double)]
    DoubleLit(f64),

    #[regex(r#""([^"\\\n]|\\.)*""#, |lex| {
        let s = lex.slice();
        unescape(&s[1..s.len() - 1])
    })]
    StrLit(String),

    #[regex(r"'([^'\\\n]|\\.)'", |lex| {
        let s = lex.slice();
        let body = unescape(&s[1..s.len() - 1])?;
        let mut chars = body.chars();
        let c = chars.next()?;
        chars.next().is_none().then_some(c)
    })]
    CharLit(char),

    #[regex(r"[A-Za-z_$][A-Za-z0-9_$]*", |lex| lex.slice().to_string())]
    Ident(String),

    // === Punctuation ===
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(";")]
    Semi,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token("?")]
    Question,
    #[token(":")]
    Colon,

    // === Operators ===
    #[token("=")]
    Assign,
    #[token("+=")]
    PlusAssign,
    #[token("-=")]
    MinusAssign,
    #[token("*=")]
    StarAssign,
    #[token("/=")]
    SlashAssign,
    #[token("%=")]
    PercentAssign,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Lt,
    #[token("<=")]
    LtEq,
    #[token(">")]
    Gt,
    #[token(">=")]
    GtEq,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("++")]
    PlusPlus,
    #[token("--")]
    MinusMinus,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("!")]
    Bang,
    #[token("~")]
    Tilde,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
}

fn parse_double(lex: &mut logos::Lexer<Token>) -> Option<f64> {
    lex.slice().trim_end_matches(['d', 'D']).parse().ok()
}

fn unescape(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let escaped = match chars.next()? {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            'b' => '\u{8}',
            'f' => '\u{c}',
            '0' => '\0',
            '\\' => '\\',
            '\'' => '\'',
            '"' => '"',
            _ => return None,
        };
        out.push(escaped);
    }
    Some(out)
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IntLit(v) => write!(f, "number `{v}`"),
            Self::LongLit(v) => write!(f, "number `{v}L`"),
            Self::DoubleLit(v) => write!(f, "number `{v}`"),
            Self::StrLit(_) => f.write_str("string literal"),
            Self::CharLit(c) => write!(f, "character `{c}`"),
            Self::Ident(name) => write!(f, "identifier `{name}`"),
            other => write!(f, "`{}`", other.symbol()),
        }
    }
}

impl Token {
    /// Source spelling of fixed tokens
    pub const fn symbol(&self) -> &'static str {
        match self {
            Self::Package => "package",
            Self::Import => "import",
            Self::Class => "class",
            Self::Public => "public",
            Self::Protected => "protected",
            Self::Private => "private",
            Self::Static => "static",
            Self::Final => "final",
            Self::Abstract => "abstract",
            Self::Void => "void",
            Self::Int => "int",
            Self::Long => "long",
            Self::Double => "double",
            Self::Boolean => "boolean",
            Self::Char => "char",
            Self::Var => "var",
            Self::If => "if",
            Self::Else => "else",
            Self::While => "while",
            Self::Do => "do",
            Self::For => "for",
            Self::Break => "break",
            Self::Continue => "continue",
            Self::Return => "return",
            Self::Throw => "throw",
            Self::Try => "try",
            Self::Catch => "catch",
            Self::Finally => "finally",
            Self::New => "new",
            Self::This => "this",
            Self::Null => "null",
            Self::True => "true",
            Self::False => "false",
            Self::LBrace => "{",
            Self::RBrace => "}",
            Self::LParen => "(",
            Self::RParen => ")",
            Self::LBracket => "[",
            Self::RBracket => "]",
            Self::Semi => ";",
            Self::Comma => ",",
            Self::Dot => ".",
            Self::Question => "?",
            Self::Colon => ":",
            Self::Assign => "=",
            Self::PlusAssign => "+=",
            Self::MinusAssign => "-=",
            Self::StarAssign => "*=",
            Self::SlashAssign => "/=",
            Self::PercentAssign => "%=",
            Self::EqEq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Star => "*",
            Self::Slash => "/",
            Self::Percent => "%",
            Self::PlusPlus => "++",
            Self::MinusMinus => "--",
            Self::AndAnd => "&&",
            Self::OrOr => "||",
            Self::Bang => "!",
            Self::Tilde => "~",
            Self::Amp => "&",
            Self::Pipe => "|",
            Self::Caret => "^",
            Self::IntLit(_)
            | Self::LongLit(_)
            | Self::DoubleLit(_)
            | Self::StrLit(_)
            | Self::CharLit(_)
            | Self::Ident(_) => "",
        }
    }
}

/// A token with its position in the unit
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub span: Range<usize>,
    pub line: u32,
    pub column: u32,
}

/// Tokenize a unit into a vector of positioned tokens
pub fn lex(unit: &SourceUnit) -> Result<Vec<Spanned>, Diagnostic> {
    let index = LineIndex::new(unit.text());
    let mut lexer = Token::lexer(unit.text());
    let mut tokens = Vec::new();

    while let Some(result) = lexer.next() {
        let span = lexer.span();
        let (line, column) = index.locate(span.start);
        match result {
            Ok(token) => tokens.push(Spanned {
                token,
                span,
                line,
                column,
            }),
            Err(()) => {
                let slice = lexer.slice();
                let message = if slice.starts_with('"') || slice.starts_with('\'') {
                    "malformed literal".to_string()
                } else if slice.starts_with(|c: char| c.is_ascii_digit()) {
                    format!("malformed number `{slice}`")
                } else {
                    format!("illegal character `{slice}`")
                };
                return Err(Diagnostic::new(unit, line, column, message));
            }
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<Token> {
        lex(&SourceUnit::new("T.java", text))
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn keywords_win_over_identifiers() {
        assert_eq!(
            kinds("class classy static"),
            vec![Token::Class, Token::Ident("classy".into()), Token::Static]
        );
    }

    #[test]
    fn numeric_literals() {
        assert_eq!(
            kinds("7 7L 1.5 2e3 4d"),
            vec![
                Token::IntLit(7),
                Token::LongLit(7),
                Token::DoubleLit(1.5),
                Token::DoubleLit(2000.0),
                Token::DoubleLit(4.0),
            ]
        );
    }

    #[test]
    fn string_and_char_escapes() {
        assert_eq!(
            kinds(r#""a\tb\"c" '\n' 'x'"#),
            vec![
                Token::StrLit("a\tb\"c".into()),
                Token::CharLit('\n'),
                Token::CharLit('x'),
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("a // line\n/* block\n * more */ b"),
            vec![Token::Ident("a".into()), Token::Ident("b".into())]
        );
    }

    #[test]
    fn positions_are_tracked() {
        let tokens = lex(&SourceUnit::new("T.java", "a\n  b")).unwrap();
        assert_eq!((tokens[1].line, tokens[1].column), (2, 3));
    }

    #[test]
    fn illegal_character_is_reported() {
        let err = lex(&SourceUnit::new("T.java", "int x = 1;\n  #")).unwrap_err();
        assert_eq!((err.line, err.column), (2, 3));
        assert!(err.message.contains("illegal character"));
    }
}
