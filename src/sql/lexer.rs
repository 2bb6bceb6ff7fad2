use crate::error::{Error, Result};
use sqlparser::dialect::SQLiteDialect;
use sqlparser::tokenizer::{Token, Tokenizer, Whitespace};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tok {
    Word { text: String, quoted: bool },
    Number(String),
    Str(String),
    Blob(String),
    /// Named parameter, stored without its `:`/`@`/`$` marker.
    Param(String),
    Positional(String),
    LParen,
    RParen,
    Comma,
    Dot,
    Semi,
    Star,
    Op(String),
    Comment(String),
    Space,
}

impl Tok {
    pub fn is_trivia(&self) -> bool {
        matches!(self, Tok::Space | Tok::Comment(_))
    }

    pub fn is_keyword(&self, kw: &str) -> bool {
        matches!(self, Tok::Word { text, quoted: false } if text.eq_ignore_ascii_case(kw))
    }

    pub fn is_op(&self, op: &str) -> bool {
        matches!(self, Tok::Op(o) if o == op)
    }
}

/// A token plus the exact source text it came from.
#[derive(Debug, Clone)]
pub struct Lexeme {
    pub tok: Tok,
    pub text: String,
}

impl Lexeme {
    fn new(tok: Tok, text: impl Into<String>) -> Self {
        Lexeme {
            tok,
            text: text.into(),
        }
    }
}

/// Tokenize SQLite source, keeping comments and whitespace so statement and
/// expression text can be reproduced.
pub fn tokenize(sql: &str) -> Result<Vec<Lexeme>> {
    let dialect = SQLiteDialect {};
    let tokens = Tokenizer::new(&dialect, sql)
        .tokenize()
        .map_err(|e| Error::sql(format!("failed to tokenize SQL: {}", e)))?;

    let mut out: Vec<Lexeme> = Vec::with_capacity(tokens.len());
    let mut iter = tokens.into_iter().peekable();
    while let Some(token) = iter.next() {
        let text = token.to_string();
        let lexeme = match token {
            Token::EOF => break,
            Token::Whitespace(Whitespace::SingleLineComment { comment, prefix }) => {
                Lexeme::new(
                    Tok::Comment(format!("{}{}", prefix, comment.trim_end_matches(['\r', '\n']))),
                    text,
                )
            }
            Token::Whitespace(Whitespace::MultiLineComment(body)) => {
                Lexeme::new(Tok::Comment(format!("/*{}*/", body)), text)
            }
            Token::Whitespace(_) => Lexeme::new(Tok::Space, text),
            Token::Word(word) => {
                let quoted = word.quote_style.is_some();
                if !quoted && (word.value.starts_with('$') || word.value.starts_with('@')) {
                    Lexeme::new(Tok::Param(word.value[1..].to_string()), text)
                } else {
                    Lexeme::new(
                        Tok::Word {
                            text: word.value,
                            quoted,
                        },
                        text,
                    )
                }
            }
            Token::Number(n, _) => Lexeme::new(Tok::Number(n), text),
            Token::SingleQuotedString(s) => Lexeme::new(Tok::Str(s), text),
            Token::HexStringLiteral(s) => Lexeme::new(Tok::Blob(s), text),
            Token::Placeholder(p) => {
                if p.starts_with('?') {
                    Lexeme::new(Tok::Positional(p), text)
                } else {
                    Lexeme::new(Tok::Param(p[1..].to_string()), text)
                }
            }
            Token::Colon | Token::AtSign => {
                // `:name` and `@name` arrive as a marker followed by a word.
                match iter.peek() {
                    Some(Token::Word(w)) if w.quote_style.is_none() => {
                        let name = w.value.clone();
                        let full = format!("{}{}", text, name);
                        iter.next();
                        Lexeme::new(Tok::Param(name), full)
                    }
                    _ => Lexeme::new(Tok::Op(text.clone()), text),
                }
            }
            Token::LParen => Lexeme::new(Tok::LParen, text),
            Token::RParen => Lexeme::new(Tok::RParen, text),
            Token::Comma => Lexeme::new(Tok::Comma, text),
            Token::Period => Lexeme::new(Tok::Dot, text),
            Token::SemiColon => Lexeme::new(Tok::Semi, text),
            Token::Mul => Lexeme::new(Tok::Star, text),
            _ => Lexeme::new(Tok::Op(text.clone()), text),
        };
        out.push(lexeme);
    }
    Ok(out)
}

/// Split a file into statements on top-level `;`. Comments stay with the
/// statement that follows them; `CREATE TRIGGER ... BEGIN ... END` bodies are
/// kept whole.
pub fn split_statements(lexemes: Vec<Lexeme>) -> Vec<Vec<Lexeme>> {
    let mut statements = Vec::new();
    let mut current: Vec<Lexeme> = Vec::new();
    let mut significant: Vec<String> = Vec::new();
    let mut trigger_depth = 0usize;
    let mut case_depth = 0usize;

    for lexeme in lexemes {
        if lexeme.tok.is_trivia() {
            current.push(lexeme);
            continue;
        }
        let is_trigger = is_create_trigger(&significant);
        if let Tok::Word { text, quoted: false } = &lexeme.tok {
            let upper = text.to_ascii_uppercase();
            if is_trigger {
                match upper.as_str() {
                    "BEGIN" => trigger_depth += 1,
                    "CASE" => case_depth += 1,
                    "END" if case_depth > 0 => case_depth -= 1,
                    "END" => trigger_depth = trigger_depth.saturating_sub(1),
                    _ => {}
                }
            }
            significant.push(upper);
        } else {
            significant.push(String::new());
        }
        if lexeme.tok == Tok::Semi && trigger_depth == 0 {
            statements.push(std::mem::take(&mut current));
            significant.clear();
            case_depth = 0;
            continue;
        }
        current.push(lexeme);
    }
    if current.iter().any(|l| !l.tok.is_trivia()) {
        statements.push(current);
    }
    statements
        .into_iter()
        .filter(|s| s.iter().any(|l| !l.tok.is_trivia()))
        .collect()
}

fn is_create_trigger(words: &[String]) -> bool {
    let mut iter = words.iter();
    if iter.next().map(String::as_str) != Some("CREATE") {
        return false;
    }
    for w in iter {
        match w.as_str() {
            "TEMP" | "TEMPORARY" => continue,
            "TRIGGER" => return true,
            _ => return false,
        }
    }
    false
}

/// Source text of the statement with comments removed.
pub fn render_without_comments(lexemes: &[Lexeme]) -> String {
    let mut out = String::new();
    for lexeme in lexemes {
        match lexeme.tok {
            Tok::Comment(_) => {
                if !out.ends_with(char::is_whitespace) && !out.is_empty() {
                    out.push(' ');
                }
            }
            _ => out.push_str(&lexeme.text),
        }
    }
    out.trim().to_string()
}
