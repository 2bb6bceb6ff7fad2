use crate::error::{Error, Result};
use serde::Serialize;
use sqlparser::ast::{
    self, Assignment, ColumnOption, DataType, Expr, FromTable, ObjectName, OnInsert, Query,
    SelectItem, SetExpr, TableConstraint, TableFactor, TableWithJoins, With,
};

/// One column of a CREATE TABLE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDef {
    pub name: String,
    /// Declared type as written, `None` when the column has no type.
    pub data_type: Option<String>,
    pub not_null: bool,
    pub primary_key: bool,
    pub default: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTable {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub without_rowid: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateView {
    pub name: String,
    /// Column names given after the view name, if any.
    pub columns: Vec<String>,
    pub query: Box<Query>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub with: Option<With>,
    pub table: String,
    pub alias: Option<String>,
    pub columns: Vec<String>,
    /// `None` for `DEFAULT VALUES`.
    pub source: Option<Box<Query>>,
    pub on: Option<OnInsert>,
    pub returning: Vec<SelectItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatement {
    pub with: Option<With>,
    pub table: String,
    pub alias: Option<String>,
    pub assignments: Vec<Assignment>,
    pub from: Option<TableWithJoins>,
    pub selection: Option<Expr>,
    pub returning: Vec<SelectItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStatement {
    pub table: String,
    pub alias: Option<String>,
    pub selection: Option<Expr>,
    pub returning: Vec<SelectItem>,
}

/// The statement kinds the generator understands, over `sqlparser`'s AST.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateTable(CreateTable),
    CreateView(CreateView),
    Select(Box<Query>),
    Insert(InsertStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
    /// Anything only passed through (indexes, triggers, pragmas).
    Other { keyword: String },
}

impl Statement {
    pub(crate) fn from_ast(statement: ast::Statement, keyword: String) -> Result<Self> {
        match statement {
            ast::Statement::Query(query) => Self::from_query(*query, keyword),
            ast::Statement::Insert(insert) => Ok(Statement::Insert(InsertStatement {
                with: None,
                table: object_name(&insert.table_name),
                alias: insert.table_alias.map(|a| a.value),
                columns: insert.columns.into_iter().map(|c| c.value).collect(),
                source: insert.source,
                on: insert.on,
                returning: insert.returning.unwrap_or_default(),
            })),
            ast::Statement::Update {
                table,
                assignments,
                from,
                selection,
                returning,
            } => {
                let (table, alias) = target(&table.relation)?;
                Ok(Statement::Update(UpdateStatement {
                    with: None,
                    table,
                    alias,
                    assignments,
                    from,
                    selection,
                    returning: returning.unwrap_or_default(),
                }))
            }
            ast::Statement::Delete(delete) => {
                let tables = match &delete.from {
                    FromTable::WithFromKeyword(tables) | FromTable::WithoutKeyword(tables) => {
                        tables
                    }
                };
                let relation = tables
                    .first()
                    .map(|t| &t.relation)
                    .ok_or_else(|| Error::sql("DELETE without a target table"))?;
                let (table, alias) = target(relation)?;
                Ok(Statement::Delete(DeleteStatement {
                    table,
                    alias,
                    selection: delete.selection,
                    returning: delete.returning.unwrap_or_default(),
                }))
            }
            ast::Statement::CreateTable(create) => {
                Ok(Statement::CreateTable(create_table(create)?))
            }
            ast::Statement::CreateView {
                name,
                columns,
                query,
                ..
            } => Ok(Statement::CreateView(CreateView {
                name: object_name(&name),
                columns: columns.into_iter().map(|c| c.name.value).collect(),
                query,
            })),
            _ => Ok(Statement::Other { keyword }),
        }
    }

    /// `WITH ... INSERT` and `WITH ... UPDATE` arrive as a query wrapping the
    /// data-modifying statement.
    fn from_query(query: Query, keyword: String) -> Result<Self> {
        match *query.body {
            SetExpr::Insert(inner) | SetExpr::Update(inner) => {
                let mut statement = Self::from_ast(inner, keyword)?;
                match &mut statement {
                    Statement::Insert(insert) => insert.with = query.with,
                    Statement::Update(update) => update.with = query.with,
                    _ => {}
                }
                Ok(statement)
            }
            body => Ok(Statement::Select(Box::new(Query {
                body: Box::new(body),
                ..query
            }))),
        }
    }
}

/// Unqualified object name; `main.person` names `person`.
pub fn object_name(name: &ObjectName) -> String {
    name.0.last().map(|i| i.value.clone()).unwrap_or_default()
}

fn target(relation: &TableFactor) -> Result<(String, Option<String>)> {
    match relation {
        TableFactor::Table { name, alias, .. } => Ok((
            object_name(name),
            alias.as_ref().map(|a| a.name.value.clone()),
        )),
        other => Err(Error::sql(format!("`{}` is not a table", other))),
    }
}

/// SQLite declares an INTEGER primary key NOT NULL implicitly, as it aliases
/// the rowid.
fn is_integer_type(data_type: Option<&str>) -> bool {
    data_type
        .map(|t| t.to_ascii_uppercase().contains("INT"))
        .unwrap_or(false)
}

fn create_table(create: ast::CreateTable) -> Result<CreateTable> {
    if create.query.is_some() {
        return Err(Error::sql("CREATE TABLE ... AS SELECT is not supported"));
    }
    let mut columns: Vec<ColumnDef> = create
        .columns
        .iter()
        .map(|c| {
            let data_type = match &c.data_type {
                DataType::Unspecified => None,
                other => Some(other.to_string()),
            };
            let mut column = ColumnDef {
                name: c.name.value.clone(),
                data_type,
                not_null: false,
                primary_key: false,
                default: None,
            };
            for option in &c.options {
                match &option.option {
                    ColumnOption::NotNull => column.not_null = true,
                    ColumnOption::Unique {
                        is_primary: true, ..
                    } => column.primary_key = true,
                    ColumnOption::Default(expr) => column.default = Some(expr.to_string()),
                    _ => {}
                }
            }
            if column.primary_key && is_integer_type(column.data_type.as_deref()) {
                column.not_null = true;
            }
            column
        })
        .collect();

    for constraint in &create.constraints {
        if let TableConstraint::PrimaryKey { columns: pk, .. } = constraint {
            for name in pk {
                if let Some(column) = columns
                    .iter_mut()
                    .find(|c| c.name.eq_ignore_ascii_case(&name.value))
                {
                    column.primary_key = true;
                    if pk.len() == 1 && is_integer_type(column.data_type.as_deref()) {
                        column.not_null = true;
                    }
                }
            }
        }
    }

    Ok(CreateTable {
        name: object_name(&create.name),
        columns,
        without_rowid: create.without_rowid,
    })
}
