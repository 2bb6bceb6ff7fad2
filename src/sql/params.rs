use super::statement::Statement;
use super::walk::{self, function_args, Visitor};
use indexmap::IndexMap;
use serde::Serialize;
use sqlparser::ast::{
    Assignment, AssignmentTarget, BinaryOperator, Expr, OnConflictAction, OnInsert, Query,
    SetExpr, Value,
};

/// What a parameter is compared with or assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ParamHint {
    Column {
        table: Option<String>,
        column: String,
        /// Assigned into the column (INSERT/SET) rather than compared.
        assigned: bool,
    },
    Limit,
}

/// Name of a `:name`, `@name` or `$name` placeholder, without its marker.
pub fn param_name(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Value(Value::Placeholder(p)) if !p.starts_with('?') => p.get(1..),
        Expr::Nested(inner) | Expr::Collate { expr: inner, .. } => param_name(inner),
        _ => None,
    }
}

/// `column` or `table.column`; a schema qualifier is dropped.
pub fn column_reference(expr: &Expr) -> Option<(Option<&str>, &str)> {
    match expr {
        Expr::Identifier(ident) => Some((None, ident.value.as_str())),
        Expr::CompoundIdentifier(parts) => match parts.as_slice() {
            [.., table, column] => Some((Some(table.value.as_str()), column.value.as_str())),
            [column] => Some((None, column.value.as_str())),
            [] => None,
        },
        _ => None,
    }
}

/// Column compared with, looking through collations and case folding.
fn compared_column(expr: &Expr) -> Option<(Option<&str>, &str)> {
    match expr {
        Expr::Nested(inner) | Expr::Collate { expr: inner, .. } | Expr::Trim { expr: inner, .. } => {
            compared_column(inner)
        }
        Expr::Function(function) => {
            let name = super::object_name(&function.name).to_ascii_uppercase();
            let (args, _) = function_args(&function.args);
            match (name.as_str(), args.as_slice()) {
                ("LOWER" | "UPPER" | "TRIM", [arg]) => compared_column(arg),
                _ => None,
            }
        }
        other => column_reference(other),
    }
}

fn is_comparison(op: &BinaryOperator) -> bool {
    matches!(
        op,
        BinaryOperator::Eq
            | BinaryOperator::NotEq
            | BinaryOperator::Lt
            | BinaryOperator::LtEq
            | BinaryOperator::Gt
            | BinaryOperator::GtEq
            | BinaryOperator::Spaceship
    )
}

impl Statement {
    /// Target types of `CAST(:param AS type)` expressions, first cast wins.
    pub fn param_casts(&self) -> IndexMap<String, String> {
        struct Casts(IndexMap<String, String>);
        impl Visitor for Casts {
            fn expr(&mut self, expr: &Expr) {
                if let Expr::Cast {
                    expr, data_type, ..
                } = expr
                {
                    if let Some(name) = param_name(expr) {
                        self.0
                            .entry(name.to_string())
                            .or_insert_with(|| data_type.to_string());
                    }
                }
            }
        }
        let mut casts = Casts(IndexMap::new());
        walk::walk_statement(self, &mut casts);
        casts.0
    }

    /// Columns that parameters are compared with or assigned to, first hint
    /// wins.
    pub fn param_hints(&self) -> IndexMap<String, ParamHint> {
        let mut hints = Hints(IndexMap::new());
        match self {
            Statement::Insert(insert) => {
                if let Some(SetExpr::Values(values)) = insert.source.as_deref().map(|q| &*q.body) {
                    for row in &values.rows {
                        for (value, column) in row.iter().zip(&insert.columns) {
                            hints.assigned(value, column);
                        }
                    }
                }
                if let Some(OnInsert::OnConflict(conflict)) = &insert.on {
                    if let OnConflictAction::DoUpdate(update) = &conflict.action {
                        hints.assignments(&update.assignments);
                    }
                }
            }
            Statement::Update(update) => hints.assignments(&update.assignments),
            _ => {}
        }
        let limits = match self {
            Statement::Select(query) => limit_params(query),
            _ => Vec::new(),
        };
        walk::walk_statement(self, &mut hints);
        for name in limits {
            hints.0.entry(name).or_insert(ParamHint::Limit);
        }
        hints.0
    }
}

fn limit_params(query: &Query) -> Vec<String> {
    query
        .limit
        .iter()
        .chain(query.offset.iter().map(|o| &o.value))
        .filter_map(param_name)
        .map(str::to_string)
        .collect()
}

struct Hints(IndexMap<String, ParamHint>);

impl Hints {
    fn assigned(&mut self, value: &Expr, column: &str) {
        if let Some(name) = param_name(value) {
            self.0.entry(name.to_string()).or_insert(ParamHint::Column {
                table: None,
                column: column.to_string(),
                assigned: true,
            });
        }
    }

    fn assignments(&mut self, assignments: &[Assignment]) {
        for a in assignments {
            match (&a.target, &a.value) {
                (AssignmentTarget::ColumnName(column), value) => {
                    self.assigned(value, &super::object_name(column));
                }
                (AssignmentTarget::Tuple(columns), Expr::Tuple(values))
                    if columns.len() == values.len() =>
                {
                    for (column, value) in columns.iter().zip(values) {
                        self.assigned(value, &super::object_name(column));
                    }
                }
                _ => {}
            }
        }
    }

    fn compared(&mut self, column: &Expr, param: &Expr) {
        if let (Some((table, column)), Some(name)) = (compared_column(column), param_name(param)) {
            self.0.entry(name.to_string()).or_insert(ParamHint::Column {
                table: table.map(str::to_string),
                column: column.to_string(),
                assigned: false,
            });
        }
    }
}

impl Visitor for Hints {
    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::BinaryOp { left, op, right } if is_comparison(op) => {
                self.compared(left, right);
                self.compared(right, left);
            }
            Expr::IsDistinctFrom(left, right) | Expr::IsNotDistinctFrom(left, right) => {
                self.compared(left, right);
                self.compared(right, left);
            }
            Expr::Like { expr, pattern, .. }
            | Expr::ILike { expr, pattern, .. }
            | Expr::RLike { expr, pattern, .. } => self.compared(expr, pattern),
            Expr::Between {
                expr, low, high, ..
            } => {
                self.compared(expr, low);
                self.compared(expr, high);
            }
            Expr::InList { expr, list, .. } => {
                for item in list {
                    self.compared(expr, item);
                }
            }
            _ => {}
        }
    }
}
