//! Parsing for the SQLite dialect used by schema and query files.
//!
//! `sqlparser` tokenizes and parses each statement; this module keeps the
//! comments around it, records parameter occurrences and narrows the AST to
//! the statement kinds the generator works with.

pub mod lexer;
mod params;
mod statement;
pub mod walk;

pub use lexer::{split_statements, tokenize, Lexeme, Tok};
pub use params::{column_reference, param_name, ParamHint};
pub use statement::{
    object_name, ColumnDef, CreateTable, CreateView, DeleteStatement, InsertStatement, Statement,
    UpdateStatement,
};

use crate::error::{Error, Result};
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use tracing::debug;

/// Statements whose structure the generator needs; a parse failure on any
/// other kind is tolerated.
const MODELLED: &[&str] = &[
    "SELECT",
    "VALUES",
    "WITH",
    "INSERT",
    "REPLACE",
    "UPDATE",
    "DELETE",
    "CREATE TABLE",
    "CREATE VIEW",
];

/// One statement plus the comments around it.
#[derive(Debug, Clone)]
pub struct ParsedStatement {
    /// Statement text with comments removed and no trailing `;`.
    pub sql: String,
    pub statement: Statement,
    /// Comment lines before the first token.
    pub leading_comments: Vec<String>,
    /// Comment lines inside or after the statement body.
    pub inner_comments: Vec<String>,
    /// Named parameter occurrences in source order, duplicates included.
    pub parameters: Vec<String>,
}

impl ParsedStatement {
    pub fn all_comments(&self) -> impl Iterator<Item = &String> {
        self.leading_comments.iter().chain(self.inner_comments.iter())
    }

    /// Named parameters in the order a positional binder must bind them.
    pub fn named_parameters(&self) -> &[String] {
        &self.parameters
    }
}

/// Parse a single statement. Fails if the text holds more than one.
pub fn parse_statement(text: &str) -> Result<ParsedStatement> {
    let lexemes = tokenize(text)?;
    let mut chunks = split_statements(lexemes);
    match chunks.len() {
        0 => Err(Error::sql("no SQL statement found")),
        1 => parse_lexemes(&chunks.remove(0)),
        n => Err(Error::sql(format!(
            "expected one statement but found {}",
            n
        ))),
    }
}

/// Parse every statement of a file, in order.
pub fn parse_file(text: &str) -> Result<Vec<ParsedStatement>> {
    split_statements(tokenize(text)?)
        .iter()
        .map(|chunk| parse_lexemes(chunk))
        .collect()
}

pub fn parse_lexemes(chunk: &[Lexeme]) -> Result<ParsedStatement> {
    let mut parameters = Vec::new();
    for lexeme in chunk {
        match &lexeme.tok {
            Tok::Param(name) => parameters.push(name.clone()),
            Tok::Positional(p) => {
                return Err(Error::sql(format!(
                    "positional parameter `{}` is not supported; use a named parameter such as `:value`",
                    p
                )))
            }
            _ => {}
        }
    }

    let sql = lexer::render_without_comments(chunk);
    let keyword = leading_keyword(chunk);
    let statement = match Parser::parse_sql(&SQLiteDialect {}, &sql) {
        Ok(mut statements) => match statements.len() {
            1 => Statement::from_ast(statements.remove(0), keyword)?,
            n => {
                return Err(Error::sql(format!(
                    "expected one statement but found {}",
                    n
                )))
            }
        },
        Err(e) if MODELLED.contains(&keyword.as_str()) => {
            return Err(Error::sql(format!("failed to parse SQL: {}", e)));
        }
        Err(e) => {
            debug!(statement = %keyword, error = %e, "statement kept unparsed");
            Statement::Other { keyword }
        }
    };

    let first_significant = chunk
        .iter()
        .position(|l| !l.tok.is_trivia())
        .unwrap_or(chunk.len());
    let mut leading_comments = Vec::new();
    let mut inner_comments = Vec::new();
    for (idx, lexeme) in chunk.iter().enumerate() {
        if let Tok::Comment(text) = &lexeme.tok {
            let target = if idx < first_significant {
                &mut leading_comments
            } else {
                &mut inner_comments
            };
            target.extend(text.lines().map(str::to_string));
        }
    }

    Ok(ParsedStatement {
        sql,
        statement,
        leading_comments,
        inner_comments,
        parameters,
    })
}

/// `SELECT`, `CREATE TRIGGER` and so on: the first word, plus the object kind
/// for `CREATE`, `DROP` and `ALTER`.
fn leading_keyword(chunk: &[Lexeme]) -> String {
    let mut words = chunk.iter().filter_map(|l| match &l.tok {
        Tok::Word { text, quoted: false } => Some(text.to_ascii_uppercase()),
        Tok::Space | Tok::Comment(_) => None,
        _ => Some(String::new()),
    });
    let first = words.next().unwrap_or_default();
    if !matches!(first.as_str(), "CREATE" | "DROP" | "ALTER") {
        return first;
    }
    let kind = words
        .find(|w| !matches!(w.as_str(), "TEMP" | "TEMPORARY" | "UNIQUE"))
        .unwrap_or_default();
    format!("{} {}", first, kind).trim_end().to_string()
}
