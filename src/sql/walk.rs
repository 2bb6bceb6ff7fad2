//! Depth-first traversal of the parts of `sqlparser`'s AST that SQLite
//! statements use, in source order.

use super::statement::Statement;
use sqlparser::ast::{
    Expr, FunctionArg, FunctionArgExpr, FunctionArguments, GroupByExpr, JoinConstraint,
    JoinOperator, ObjectName, OnConflictAction, OnInsert, Query, Select, SelectItem, SetExpr,
    TableFactor, TableWithJoins,
};

pub trait Visitor {
    fn expr(&mut self, _expr: &Expr) {}
    /// A table, view or CTE name read in a FROM clause.
    fn relation(&mut self, _name: &ObjectName) {}
}

pub fn walk_statement(statement: &Statement, v: &mut dyn Visitor) {
    match statement {
        Statement::Select(query) => walk_query(query, v),
        Statement::CreateView(view) => walk_query(&view.query, v),
        Statement::Insert(insert) => {
            for cte in insert.with.iter().flat_map(|w| &w.cte_tables) {
                walk_query(&cte.query, v);
            }
            if let Some(source) = &insert.source {
                walk_query(source, v);
            }
            if let Some(OnInsert::OnConflict(conflict)) = &insert.on {
                if let OnConflictAction::DoUpdate(update) = &conflict.action {
                    for a in &update.assignments {
                        walk_expr(&a.value, v);
                    }
                    if let Some(selection) = &update.selection {
                        walk_expr(selection, v);
                    }
                }
            }
            walk_items(&insert.returning, v);
        }
        Statement::Update(update) => {
            for cte in update.with.iter().flat_map(|w| &w.cte_tables) {
                walk_query(&cte.query, v);
            }
            for a in &update.assignments {
                walk_expr(&a.value, v);
            }
            if let Some(from) = &update.from {
                walk_from(from, v);
            }
            if let Some(selection) = &update.selection {
                walk_expr(selection, v);
            }
            walk_items(&update.returning, v);
        }
        Statement::Delete(delete) => {
            if let Some(selection) = &delete.selection {
                walk_expr(selection, v);
            }
            walk_items(&delete.returning, v);
        }
        Statement::CreateTable(_) | Statement::Other { .. } => {}
    }
}

pub fn walk_query(query: &Query, v: &mut dyn Visitor) {
    for cte in query.with.iter().flat_map(|w| &w.cte_tables) {
        walk_query(&cte.query, v);
    }
    walk_set_expr(&query.body, v);
    for order in query.order_by.iter().flat_map(|o| &o.exprs) {
        walk_expr(&order.expr, v);
    }
    if let Some(limit) = &query.limit {
        walk_expr(limit, v);
    }
    if let Some(offset) = &query.offset {
        walk_expr(&offset.value, v);
    }
}

fn walk_set_expr(body: &SetExpr, v: &mut dyn Visitor) {
    match body {
        SetExpr::Select(select) => walk_select(select, v),
        SetExpr::Query(query) => walk_query(query, v),
        SetExpr::SetOperation { left, right, .. } => {
            walk_set_expr(left, v);
            walk_set_expr(right, v);
        }
        SetExpr::Values(values) => {
            for e in values.rows.iter().flatten() {
                walk_expr(e, v);
            }
        }
        _ => {}
    }
}

fn walk_select(select: &Select, v: &mut dyn Visitor) {
    walk_items(&select.projection, v);
    for from in &select.from {
        walk_from(from, v);
    }
    if let Some(selection) = &select.selection {
        walk_expr(selection, v);
    }
    if let GroupByExpr::Expressions(exprs, _) = &select.group_by {
        for e in exprs {
            walk_expr(e, v);
        }
    }
    if let Some(having) = &select.having {
        walk_expr(having, v);
    }
}

fn walk_items(items: &[SelectItem], v: &mut dyn Visitor) {
    for item in items {
        match item {
            SelectItem::UnnamedExpr(e) | SelectItem::ExprWithAlias { expr: e, .. } => {
                walk_expr(e, v)
            }
            SelectItem::QualifiedWildcard(..) | SelectItem::Wildcard(_) => {}
        }
    }
}

pub fn walk_from(from: &TableWithJoins, v: &mut dyn Visitor) {
    walk_factor(&from.relation, v);
    for join in &from.joins {
        walk_factor(&join.relation, v);
        if let Some(JoinConstraint::On(on)) = join_constraint(&join.join_operator) {
            walk_expr(on, v);
        }
    }
}

fn walk_factor(factor: &TableFactor, v: &mut dyn Visitor) {
    match factor {
        TableFactor::Table { name, args, .. } => match args {
            None => v.relation(name),
            Some(args) => walk_args(&args.args, v),
        },
        TableFactor::Derived { subquery, .. } => walk_query(subquery, v),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => walk_from(table_with_joins, v),
        TableFactor::Function { args, .. } => walk_args(args, v),
        _ => {}
    }
}

pub fn join_constraint(op: &JoinOperator) -> Option<&JoinConstraint> {
    match op {
        JoinOperator::Inner(c)
        | JoinOperator::LeftOuter(c)
        | JoinOperator::RightOuter(c)
        | JoinOperator::FullOuter(c)
        | JoinOperator::LeftSemi(c)
        | JoinOperator::RightSemi(c)
        | JoinOperator::LeftAnti(c)
        | JoinOperator::RightAnti(c)
        | JoinOperator::AsOf { constraint: c, .. } => Some(c),
        JoinOperator::CrossJoin | JoinOperator::CrossApply | JoinOperator::OuterApply => None,
    }
}

fn walk_args(args: &[FunctionArg], v: &mut dyn Visitor) {
    for arg in args {
        if let Some(e) = arg_expr(arg) {
            walk_expr(e, v);
        }
    }
}

pub fn arg_expr(arg: &FunctionArg) -> Option<&Expr> {
    match arg {
        FunctionArg::Unnamed(FunctionArgExpr::Expr(e))
        | FunctionArg::Named {
            arg: FunctionArgExpr::Expr(e),
            ..
        } => Some(e),
        _ => None,
    }
}

/// Argument expressions of a call, and whether one of them is `*`.
pub fn function_args(args: &FunctionArguments) -> (Vec<&Expr>, bool) {
    match args {
        FunctionArguments::List(list) => {
            let star = list.args.iter().any(|a| {
                matches!(
                    a,
                    FunctionArg::Unnamed(FunctionArgExpr::Wildcard)
                        | FunctionArg::Unnamed(FunctionArgExpr::QualifiedWildcard(_))
                )
            });
            (list.args.iter().filter_map(arg_expr).collect(), star)
        }
        FunctionArguments::None | FunctionArguments::Subquery(_) => (Vec::new(), false),
    }
}

pub fn walk_expr(expr: &Expr, v: &mut dyn Visitor) {
    v.expr(expr);
    match expr {
        Expr::IsNull(e)
        | Expr::IsNotNull(e)
        | Expr::IsTrue(e)
        | Expr::IsNotTrue(e)
        | Expr::IsFalse(e)
        | Expr::IsNotFalse(e)
        | Expr::IsUnknown(e)
        | Expr::IsNotUnknown(e)
        | Expr::Nested(e)
        | Expr::UnaryOp { expr: e, .. }
        | Expr::Cast { expr: e, .. }
        | Expr::Collate { expr: e, .. }
        | Expr::Trim { expr: e, .. } => walk_expr(e, v),
        Expr::Substring {
            expr,
            substring_from,
            substring_for,
            ..
        } => {
            walk_expr(expr, v);
            for e in substring_from.iter().chain(substring_for) {
                walk_expr(e, v);
            }
        }
        Expr::IsDistinctFrom(a, b) | Expr::IsNotDistinctFrom(a, b) => {
            walk_expr(a, v);
            walk_expr(b, v);
        }
        Expr::BinaryOp { left, right, .. } => {
            walk_expr(left, v);
            walk_expr(right, v);
        }
        Expr::Like { expr, pattern, .. }
        | Expr::ILike { expr, pattern, .. }
        | Expr::SimilarTo { expr, pattern, .. }
        | Expr::RLike { expr, pattern, .. } => {
            walk_expr(expr, v);
            walk_expr(pattern, v);
        }
        Expr::Between {
            expr, low, high, ..
        } => {
            walk_expr(expr, v);
            walk_expr(low, v);
            walk_expr(high, v);
        }
        Expr::InList { expr, list, .. } => {
            walk_expr(expr, v);
            for e in list {
                walk_expr(e, v);
            }
        }
        Expr::InSubquery { expr, subquery, .. } => {
            walk_expr(expr, v);
            walk_query(subquery, v);
        }
        Expr::Exists { subquery, .. } | Expr::Subquery(subquery) => walk_query(subquery, v),
        Expr::Function(function) => {
            match &function.args {
                FunctionArguments::List(list) => walk_args(&list.args, v),
                FunctionArguments::Subquery(query) => walk_query(query, v),
                FunctionArguments::None => {}
            }
            if let Some(filter) = &function.filter {
                walk_expr(filter, v);
            }
        }
        Expr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => {
            if let Some(operand) = operand {
                walk_expr(operand, v);
            }
            for (condition, result) in conditions.iter().zip(results) {
                walk_expr(condition, v);
                walk_expr(result, v);
            }
            if let Some(e) = else_result {
                walk_expr(e, v);
            }
        }
        Expr::Tuple(items) => {
            for e in items {
                walk_expr(e, v);
            }
        }
        _ => {}
    }
}
