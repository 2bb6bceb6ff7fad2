//! Tables and views known to the generator, and structural resolution of the
//! columns a SELECT returns.

use crate::annotations::{extract_comment_annotations, keys, AnnotationMap};
use crate::error::{Error, Result};
use crate::sql::walk::{self, join_constraint, Visitor};
use crate::sql::{column_reference, object_name, ColumnDef, ParsedStatement, Statement};
use crate::types::{infer_expr_type, InferredType, TypeContext};
use indexmap::IndexMap;
use serde::Serialize;
use sqlparser::ast::{
    Expr, JoinConstraint, JoinOperator, ObjectName, Query, Select, SelectItem, SetExpr,
    TableFactor, TableWithJoins,
};
use std::collections::HashSet;
use tracing::{debug, warn};

const ROWID_NAMES: &[&str] = &["rowid", "oid", "_rowid_"];

/// The table or view column a projected value is copied from unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ColumnOrigin {
    pub object: String,
    pub column: String,
}

/// One column of a result set as seen structurally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSource {
    /// Output name: the alias, the column name or the expression text.
    pub name: String,
    /// Reference name of the FROM entry the value comes from.
    pub table_alias: Option<String>,
    /// Reference names from the outermost FROM entry inwards, through
    /// subqueries, CTEs and views.
    pub alias_path: Vec<String>,
    pub origin: Option<ColumnOrigin>,
    pub sql_type: Option<String>,
    /// Nullability of the value in this result set.
    pub not_null: bool,
    /// Nullability before any outer join on the way was applied.
    pub declared_not_null: bool,
    /// Reached through an outer join that may produce a NULL row.
    pub joined_nullable: bool,
    /// Source text for computed columns.
    pub expression: Option<String>,
}

impl FieldSource {
    fn computed(name: String, inferred: InferredType, text: String) -> Self {
        FieldSource {
            name,
            table_alias: None,
            alias_path: Vec::new(),
            origin: None,
            sql_type: inferred.sql_type,
            not_null: inferred.not_null,
            declared_not_null: inferred.not_null,
            joined_nullable: false,
            expression: Some(text),
        }
    }

    fn rowid(object: &str, name: &str) -> Self {
        FieldSource {
            name: name.to_string(),
            table_alias: None,
            alias_path: Vec::new(),
            origin: Some(ColumnOrigin {
                object: object.to_string(),
                column: name.to_string(),
            }),
            sql_type: Some("INTEGER".to_string()),
            not_null: true,
            declared_not_null: true,
            joined_nullable: false,
            expression: None,
        }
    }

    fn unknown(name: &str) -> Self {
        FieldSource {
            name: name.to_string(),
            table_alias: None,
            alias_path: Vec::new(),
            origin: None,
            sql_type: None,
            not_null: false,
            declared_not_null: false,
            joined_nullable: false,
            expression: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub without_rowid: bool,
    /// Table-level annotations such as `enableSync`.
    pub annotations: AnnotationMap,
    pub field_annotations: IndexMap<String, AnnotationMap>,
    pub sql: String,
}

impl TableInfo {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn sync_enabled(&self) -> bool {
        self.annotations
            .get(keys::ENABLE_SYNC)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Column used to match rows when syncing; defaults to the primary key.
    pub fn sync_key_column(&self) -> Option<&str> {
        self.annotations
            .get(keys::SYNC_KEY_COLUMN_NAME)
            .and_then(|v| v.as_str())
            .or_else(|| {
                self.columns
                    .iter()
                    .find(|c| c.primary_key)
                    .map(|c| c.name.as_str())
            })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ViewInfo {
    pub name: String,
    #[serde(skip)]
    pub query: Query,
    pub explicit_columns: Vec<String>,
    pub columns: Vec<FieldSource>,
    /// On or reading from a view definition cycle; `columns` is empty.
    pub cyclic: bool,
    pub annotations: AnnotationMap,
    pub field_annotations: IndexMap<String, AnnotationMap>,
    pub sql: String,
}

impl ViewInfo {
    pub fn column(&self, name: &str) -> Option<&FieldSource> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// Every CREATE TABLE and CREATE VIEW of the schema, keyed by lowercase name.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchemaCatalog {
    tables: IndexMap<String, TableInfo>,
    views: IndexMap<String, ViewInfo>,
}

impl SchemaCatalog {
    pub fn from_sql(text: &str) -> Result<Self> {
        Self::from_statements(crate::sql::parse_file(text)?)
    }

    pub fn from_statements<I>(statements: I) -> Result<Self>
    where
        I: IntoIterator<Item = ParsedStatement>,
    {
        let mut catalog = SchemaCatalog::default();
        for parsed in statements {
            let comments: Vec<&String> = parsed
                .leading_comments
                .iter()
                .chain(parsed.inner_comments.iter())
                .collect();
            match parsed.statement {
                Statement::CreateTable(table) => {
                    let annotations = extract_comment_annotations(&comments)?;
                    for field in annotations.fields.keys() {
                        if !table.columns.iter().any(|c| c.name.eq_ignore_ascii_case(field)) {
                            warn!(table = %table.name, field = %field, "annotation names no column of the table");
                        }
                    }
                    catalog.check_unique(&table.name)?;
                    debug!(table = %table.name, columns = table.columns.len(), "registered table");
                    catalog.tables.insert(
                        table.name.to_ascii_lowercase(),
                        TableInfo {
                            name: table.name,
                            columns: table.columns,
                            without_rowid: table.without_rowid,
                            annotations: annotations.statement,
                            field_annotations: annotations.fields,
                            sql: parsed.sql,
                        },
                    );
                }
                Statement::CreateView(view) => {
                    let annotations = extract_comment_annotations(&comments)?;
                    catalog.check_unique(&view.name)?;
                    debug!(view = %view.name, "registered view");
                    catalog.views.insert(
                        view.name.to_ascii_lowercase(),
                        ViewInfo {
                            name: view.name,
                            query: *view.query,
                            explicit_columns: view.columns,
                            columns: Vec::new(),
                            cyclic: false,
                            annotations: annotations.statement,
                            field_annotations: annotations.fields,
                            sql: parsed.sql,
                        },
                    );
                }
                other => {
                    debug!(statement = ?statement_keyword(&other), "schema statement ignored");
                }
            }
        }
        catalog.resolve_views()?;
        Ok(catalog)
    }

    fn check_unique(&self, name: &str) -> Result<()> {
        if self.contains(name) {
            return Err(Error::schema(format!(
                "table or view `{}` is defined more than once",
                name
            )));
        }
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        let key = name.to_ascii_lowercase();
        self.tables.contains_key(&key) || self.views.contains_key(&key)
    }

    pub fn table(&self, name: &str) -> Option<&TableInfo> {
        self.tables.get(&name.to_ascii_lowercase())
    }

    pub fn view(&self, name: &str) -> Option<&ViewInfo> {
        self.views.get(&name.to_ascii_lowercase())
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableInfo> {
        self.tables.values()
    }

    pub fn views(&self) -> impl Iterator<Item = &ViewInfo> {
        self.views.values()
    }

    /// Columns of a table or view, each with that object as its origin.
    pub fn object_columns(&self, name: &str) -> Option<Vec<FieldSource>> {
        if let Some(table) = self.table(name) {
            return Some(
                table
                    .columns
                    .iter()
                    .map(|c| FieldSource {
                        name: c.name.clone(),
                        table_alias: None,
                        alias_path: Vec::new(),
                        origin: Some(ColumnOrigin {
                            object: table.name.clone(),
                            column: c.name.clone(),
                        }),
                        sql_type: c.data_type.clone(),
                        not_null: c.not_null,
                        declared_not_null: c.not_null,
                        joined_nullable: false,
                        expression: None,
                    })
                    .collect(),
            );
        }
        self.view(name).map(|view| {
            view.columns
                .iter()
                .map(|c| FieldSource {
                    origin: Some(ColumnOrigin {
                        object: view.name.clone(),
                        column: c.name.clone(),
                    }),
                    declared_not_null: c.not_null,
                    joined_nullable: false,
                    ..c.clone()
                })
                .collect()
        })
    }

    pub fn object_column(&self, object: &str, column: &str) -> Option<FieldSource> {
        self.object_columns(object)?
            .into_iter()
            .find(|c| c.name.eq_ignore_ascii_case(column))
    }

    /// Output columns of `query`, in order.
    pub fn resolve_select(&self, query: &Query) -> Result<Vec<FieldSource>> {
        self.resolve_query(query, &[], true)
    }

    /// Views on a definition cycle, and views reading from one, keep no
    /// columns: they are reported when a query reads them.
    fn resolve_views(&mut self) -> Result<()> {
        let deps: IndexMap<String, Vec<String>> = self
            .views
            .iter()
            .map(|(key, view)| {
                let mut names = Vec::new();
                referenced_objects(&view.query, &mut names);
                let views: Vec<String> = names
                    .into_iter()
                    .map(|n| n.to_ascii_lowercase())
                    .filter(|n| self.views.contains_key(n))
                    .collect();
                (key.clone(), views)
            })
            .collect();

        let mut order = Vec::new();
        let mut done = HashSet::new();
        let mut stack = Vec::new();
        let mut cyclic = HashSet::new();
        for key in deps.keys() {
            visit_view(key, &deps, &mut done, &mut stack, &mut order, &mut cyclic);
        }

        for key in order {
            let blocked = cyclic.contains(&key)
                || deps
                    .get(&key)
                    .map(|d| d.iter().any(|dep| cyclic.contains(dep)))
                    .unwrap_or(false);
            if blocked {
                cyclic.insert(key.clone());
                if let Some(view) = self.views.get_mut(&key) {
                    warn!(view = %view.name, "view depends on a view definition cycle; its columns stay unresolved");
                    view.cyclic = true;
                }
                continue;
            }
            let columns = {
                let Some(view) = self.views.get(&key) else {
                    continue;
                };
                let mut columns = self.resolve_select(&view.query).map_err(|e| {
                    Error::schema(format!("cannot resolve view `{}`: {}", view.name, e))
                })?;
                if !view.explicit_columns.is_empty() {
                    if view.explicit_columns.len() != columns.len() {
                        return Err(Error::schema(format!(
                            "view `{}` names {} columns but its SELECT returns {}",
                            view.name,
                            view.explicit_columns.len(),
                            columns.len()
                        )));
                    }
                    for (column, name) in columns.iter_mut().zip(&view.explicit_columns) {
                        column.name = name.clone();
                    }
                }
                columns
            };
            if let Some(view) = self.views.get_mut(&key) {
                view.columns = columns;
            }
        }
        Ok(())
    }

    fn resolve_query(
        &self,
        query: &Query,
        outer_ctes: &[(String, Vec<FieldSource>)],
        all_members: bool,
    ) -> Result<Vec<FieldSource>> {
        let mut ctes = outer_ctes.to_vec();
        for cte in query.with.iter().flat_map(|w| &w.cte_tables) {
            let name = &cte.alias.name.value;
            // Only the anchor member is resolved so recursive CTEs need no
            // fixed point.
            let mut columns = self.resolve_query(&cte.query, &ctes, false)?;
            if !cte.alias.columns.is_empty() {
                if cte.alias.columns.len() != columns.len() {
                    return Err(Error::sql(format!(
                        "CTE `{}` names {} columns but its SELECT returns {}",
                        name,
                        cte.alias.columns.len(),
                        columns.len()
                    )));
                }
                for (column, ident) in columns.iter_mut().zip(&cte.alias.columns) {
                    column.name = ident.value.clone();
                }
            }
            ctes.push((name.clone(), columns));
        }
        self.resolve_body(&query.body, &ctes, all_members)
    }

    fn resolve_body(
        &self,
        body: &SetExpr,
        ctes: &[(String, Vec<FieldSource>)],
        all_members: bool,
    ) -> Result<Vec<FieldSource>> {
        match body {
            SetExpr::Select(select) => self.resolve_core(select, ctes),
            SetExpr::Query(query) => self.resolve_query(query, ctes, all_members),
            SetExpr::SetOperation { left, right, .. } => {
                let first = self.resolve_body(left, ctes, all_members)?;
                if !all_members {
                    return Ok(first);
                }
                merge_compound(first, self.resolve_body(right, ctes, true)?)
            }
            SetExpr::Values(values) => {
                let scope = CoreScope {
                    catalog: self,
                    ctes,
                    sources: Vec::new(),
                };
                let row = values
                    .rows
                    .first()
                    .ok_or_else(|| Error::sql("VALUES without rows"))?;
                Ok(row
                    .iter()
                    .enumerate()
                    .map(|(idx, expr)| {
                        FieldSource::computed(
                            format!("column{}", idx + 1),
                            infer_expr_type(expr, &scope),
                            expr.to_string(),
                        )
                    })
                    .collect())
            }
            other => Err(Error::sql(format!("unsupported query body `{}`", other))),
        }
    }

    fn resolve_core(
        &self,
        select: &Select,
        ctes: &[(String, Vec<FieldSource>)],
    ) -> Result<Vec<FieldSource>> {
        let scope = self.core_scope(&select.from, ctes)?;
        let mut out = Vec::new();
        for item in &select.projection {
            match item {
                SelectItem::Wildcard(_) => {
                    if scope.sources.is_empty() {
                        return Err(Error::sql("`*` used without a FROM clause"));
                    }
                    for source in &scope.sources {
                        out.extend(
                            source
                                .columns
                                .iter()
                                .filter(|c| {
                                    !source.using.iter().any(|u| u.eq_ignore_ascii_case(&c.name))
                                })
                                .cloned(),
                        );
                    }
                }
                SelectItem::QualifiedWildcard(name, _) => {
                    let table = object_name(name);
                    let source = scope.source(&table).ok_or_else(|| {
                        Error::sql(format!("no such table `{}` for `{}.*`", table, table))
                    })?;
                    out.extend(source.columns.iter().cloned());
                }
                SelectItem::UnnamedExpr(expr) => out.push(scope.projected(expr, None)?),
                SelectItem::ExprWithAlias { expr, alias } => {
                    out.push(scope.projected(expr, Some(&alias.value))?)
                }
            }
        }
        Ok(out)
    }

    fn core_scope<'a>(
        &'a self,
        from: &[TableWithJoins],
        ctes: &'a [(String, Vec<FieldSource>)],
    ) -> Result<CoreScope<'a>> {
        let mut entries = Vec::new();
        for item in from {
            flatten_from(item, JoinKind::Inner, None, &mut entries);
        }

        let mut sources: Vec<Source> = Vec::new();
        for entry in entries {
            let (reference, object, columns, transparent, opaque) = match entry.factor {
                TableFactor::Table {
                    name,
                    alias,
                    args: None,
                    ..
                } => {
                    let name = object_name(name);
                    let reference = alias
                        .as_ref()
                        .map(|a| a.name.value.clone())
                        .unwrap_or_else(|| name.clone());
                    match ctes.iter().rev().find(|(n, _)| n.eq_ignore_ascii_case(&name)) {
                        Some((_, columns)) => (Some(reference), None, columns.clone(), true, false),
                        None => {
                            if self.view(&name).map(|v| v.cyclic).unwrap_or(false) {
                                return Err(Error::schema(format!(
                                    "view `{}` is part of a view definition cycle",
                                    name
                                )));
                            }
                            let columns = self.object_columns(&name).ok_or_else(|| {
                                Error::schema(format!("no such table or view `{}`", name))
                            })?;
                            (Some(reference), Some(name), columns, false, false)
                        }
                    }
                }
                TableFactor::Derived {
                    subquery, alias, ..
                } => {
                    let mut columns = self.resolve_query(subquery, ctes, true)?;
                    if let Some(alias) = alias {
                        for (column, ident) in columns.iter_mut().zip(&alias.columns) {
                            column.name = ident.value.clone();
                        }
                    }
                    let reference = alias.as_ref().map(|a| a.name.value.clone());
                    (reference, None, columns, true, false)
                }
                other => (function_reference(other), None, Vec::new(), true, true),
            };
            let using = match entry.constraint {
                Some(JoinConstraint::Using(names)) => {
                    names.iter().map(|n| n.value.clone()).collect()
                }
                // A natural join matches every column name the earlier
                // sources share with this one.
                Some(JoinConstraint::Natural) => columns
                    .iter()
                    .filter(|c| {
                        sources.iter().any(|s| {
                            s.columns.iter().any(|p| p.name.eq_ignore_ascii_case(&c.name))
                        })
                    })
                    .map(|c| c.name.clone())
                    .collect(),
                _ => Vec::new(),
            };
            if matches!(entry.join, JoinKind::Right | JoinKind::Full) {
                for source in sources.iter_mut() {
                    source.nullable = true;
                }
            }
            sources.push(Source {
                reference,
                object,
                columns,
                using,
                transparent,
                opaque,
                nullable: matches!(entry.join, JoinKind::Left | JoinKind::Full),
            });
        }

        for source in sources.iter_mut() {
            let reference = source.reference.clone();
            let nullable = source.nullable;
            let transparent = source.transparent;
            for column in source.columns.iter_mut() {
                column.table_alias = reference.clone();
                if let Some(r) = &reference {
                    column.alias_path.insert(0, r.clone());
                }
                column.joined_nullable = nullable || (transparent && column.joined_nullable);
                if nullable {
                    column.not_null = false;
                }
            }
        }

        Ok(CoreScope {
            catalog: self,
            ctes,
            sources,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
}

struct FromEntry<'q> {
    factor: &'q TableFactor,
    join: JoinKind,
    constraint: Option<&'q JoinConstraint>,
}

/// List the FROM entries left to right; parenthesised joins are inlined.
fn flatten_from<'q>(
    item: &'q TableWithJoins,
    join: JoinKind,
    constraint: Option<&'q JoinConstraint>,
    out: &mut Vec<FromEntry<'q>>,
) {
    push_factor(&item.relation, join, constraint, out);
    for j in &item.joins {
        let kind = match &j.join_operator {
            JoinOperator::LeftOuter(_) | JoinOperator::OuterApply => JoinKind::Left,
            JoinOperator::RightOuter(_) => JoinKind::Right,
            JoinOperator::FullOuter(_) => JoinKind::Full,
            _ => JoinKind::Inner,
        };
        push_factor(&j.relation, kind, join_constraint(&j.join_operator), out);
    }
}

fn push_factor<'q>(
    factor: &'q TableFactor,
    join: JoinKind,
    constraint: Option<&'q JoinConstraint>,
    out: &mut Vec<FromEntry<'q>>,
) {
    match factor {
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => flatten_from(table_with_joins, join, constraint, out),
        factor => out.push(FromEntry {
            factor,
            join,
            constraint,
        }),
    }
}

/// Reference name of a table-valued function in FROM.
fn function_reference(factor: &TableFactor) -> Option<String> {
    match factor {
        TableFactor::Table { name, alias, .. } | TableFactor::Function { name, alias, .. } => {
            Some(
                alias
                    .as_ref()
                    .map(|a| a.name.value.clone())
                    .unwrap_or_else(|| object_name(name)),
            )
        }
        TableFactor::TableFunction { alias, .. } => alias.as_ref().map(|a| a.name.value.clone()),
        _ => None,
    }
}

fn statement_keyword(statement: &Statement) -> &str {
    match statement {
        Statement::Select(_) => "SELECT",
        Statement::Insert(_) => "INSERT",
        Statement::Update(_) => "UPDATE",
        Statement::Delete(_) => "DELETE",
        Statement::CreateTable(_) => "CREATE TABLE",
        Statement::CreateView(_) => "CREATE VIEW",
        Statement::Other { keyword } => keyword,
    }
}

fn visit_view(
    key: &str,
    deps: &IndexMap<String, Vec<String>>,
    done: &mut HashSet<String>,
    stack: &mut Vec<String>,
    order: &mut Vec<String>,
    cyclic: &mut HashSet<String>,
) {
    if done.contains(key) {
        return;
    }
    if let Some(pos) = stack.iter().position(|k| k == key) {
        let mut cycle = stack[pos..].to_vec();
        cycle.push(key.to_string());
        warn!(cycle = %cycle.join(" -> "), "views reference each other in a cycle");
        cyclic.extend(stack[pos..].iter().cloned());
        return;
    }
    stack.push(key.to_string());
    for dep in deps.get(key).map(Vec::as_slice).unwrap_or_default() {
        visit_view(dep, deps, done, stack, order, cyclic);
    }
    stack.pop();
    done.insert(key.to_string());
    order.push(key.to_string());
}

fn merge_compound(first: Vec<FieldSource>, other: Vec<FieldSource>) -> Result<Vec<FieldSource>> {
    if first.len() != other.len() {
        return Err(Error::sql(format!(
            "compound SELECT members return {} and {} columns",
            first.len(),
            other.len()
        )));
    }
    Ok(first
        .into_iter()
        .zip(other)
        .map(|(mut a, b)| {
            a.not_null &= b.not_null;
            a.declared_not_null &= b.declared_not_null;
            a.joined_nullable |= b.joined_nullable;
            // Members copying from different columns leave no single origin.
            if a.origin != b.origin {
                a.origin = None;
            }
            if a.sql_type.is_none() {
                a.sql_type = b.sql_type;
            }
            a
        })
        .collect())
}

/// Names of every table, view or CTE a query reads from, at any depth.
pub fn referenced_objects(query: &Query, out: &mut Vec<String>) {
    struct Relations<'a>(&'a mut Vec<String>);
    impl Visitor for Relations<'_> {
        fn relation(&mut self, name: &ObjectName) {
            let name = object_name(name);
            if !self.0.iter().any(|n| n.eq_ignore_ascii_case(&name)) {
                self.0.push(name);
            }
        }
    }
    walk::walk_query(query, &mut Relations(out));
}

/// Reference name to object name for every named FROM entry of `query`, at
/// any depth.
pub fn collect_query_aliases(query: &Query, out: &mut IndexMap<String, String>) {
    for cte in query.with.iter().flat_map(|w| &w.cte_tables) {
        collect_query_aliases(&cte.query, out);
    }
    collect_body_aliases(&query.body, out);
}

fn collect_body_aliases(body: &SetExpr, out: &mut IndexMap<String, String>) {
    match body {
        SetExpr::Select(select) => {
            for item in &select.from {
                collect_aliases(item, out);
            }
        }
        SetExpr::Query(query) => collect_query_aliases(query, out),
        SetExpr::SetOperation { left, right, .. } => {
            collect_body_aliases(left, out);
            collect_body_aliases(right, out);
        }
        _ => {}
    }
}

pub fn collect_aliases(item: &TableWithJoins, out: &mut IndexMap<String, String>) {
    for factor in std::iter::once(&item.relation).chain(item.joins.iter().map(|j| &j.relation)) {
        match factor {
            TableFactor::Table {
                name,
                alias,
                args: None,
                ..
            } => {
                let name = object_name(name);
                let reference = alias
                    .as_ref()
                    .map(|a| a.name.value.clone())
                    .unwrap_or_else(|| name.clone());
                out.entry(reference).or_insert(name);
            }
            TableFactor::Derived {
                subquery, alias, ..
            } => {
                if let Some(alias) = alias {
                    out.entry(alias.name.value.clone())
                        .or_insert_with(|| alias.name.value.clone());
                }
                collect_query_aliases(subquery, out);
            }
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => collect_aliases(table_with_joins, out),
            _ => {}
        }
    }
}

struct Source {
    reference: Option<String>,
    object: Option<String>,
    columns: Vec<FieldSource>,
    using: Vec<String>,
    /// Subquery or CTE: origins pass through unchanged.
    transparent: bool,
    /// Table-valued function with unknown columns.
    opaque: bool,
    nullable: bool,
}

struct CoreScope<'a> {
    catalog: &'a SchemaCatalog,
    ctes: &'a [(String, Vec<FieldSource>)],
    sources: Vec<Source>,
}

impl CoreScope<'_> {
    fn source(&self, reference: &str) -> Option<&Source> {
        self.sources.iter().find(|s| {
            s.reference
                .as_deref()
                .map(|r| r.eq_ignore_ascii_case(reference))
                .unwrap_or(false)
        })
    }

    fn rowid(&self, source: &Source, name: &str) -> Option<FieldSource> {
        if !ROWID_NAMES.iter().any(|r| r.eq_ignore_ascii_case(name)) {
            return None;
        }
        let table = self.catalog.table(source.object.as_deref()?)?;
        if table.without_rowid {
            return None;
        }
        let mut field = FieldSource::rowid(&table.name, name);
        field.table_alias = source.reference.clone();
        field.alias_path = source.reference.iter().cloned().collect();
        Some(field)
    }

    fn projected(&self, expr: &Expr, alias: Option<&str>) -> Result<FieldSource> {
        if let Some((table, name)) = column_reference(expr) {
            let mut field = self.find_column(table, name)?;
            if let Some(alias) = alias {
                field.name = alias.to_string();
            }
            return Ok(field);
        }
        let text = expr.to_string();
        let name = alias.map(str::to_string).unwrap_or_else(|| text.clone());
        Ok(FieldSource::computed(name, infer_expr_type(expr, self), text))
    }

    fn find_column(&self, table: Option<&str>, name: &str) -> Result<FieldSource> {
        if let Some(table) = table {
            let source = self
                .source(table)
                .ok_or_else(|| Error::sql(format!("no such table `{}`", table)))?;
            if source.opaque {
                return Ok(FieldSource::unknown(name));
            }
            return source
                .columns
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(name))
                .cloned()
                .or_else(|| self.rowid(source, name))
                .ok_or_else(|| Error::sql(format!("no such column `{}.{}`", table, name)));
        }

        let matches: Vec<(&Source, &FieldSource)> = self
            .sources
            .iter()
            .flat_map(|s| {
                s.columns
                    .iter()
                    .filter(|c| c.name.eq_ignore_ascii_case(name))
                    .map(move |c| (s, c))
            })
            .collect();
        match matches.as_slice() {
            [] => {
                if self.sources.iter().any(|s| s.opaque) {
                    return Ok(FieldSource::unknown(name));
                }
                if let [only] = self.sources.as_slice() {
                    if let Some(field) = self.rowid(only, name) {
                        return Ok(field);
                    }
                }
                Err(Error::sql(format!("no such column `{}`", name)))
            }
            [(_, field)] => Ok((*field).clone()),
            [(_, first), rest @ ..] => {
                let joined_by_using = rest
                    .iter()
                    .all(|(s, _)| s.using.iter().any(|u| u.eq_ignore_ascii_case(name)));
                if joined_by_using {
                    Ok((*first).clone())
                } else {
                    Err(Error::sql(format!("ambiguous column name `{}`", name)))
                }
            }
        }
    }
}

impl TypeContext for CoreScope<'_> {
    fn column_type(&self, table: Option<&str>, name: &str) -> Option<InferredType> {
        self.find_column(table, name).ok().map(|f| InferredType {
            sql_type: f.sql_type,
            not_null: f.not_null,
        })
    }

    fn subquery_type(&self, query: &Query) -> Option<InferredType> {
        let columns = self.catalog.resolve_query(query, self.ctes, true).ok()?;
        columns.into_iter().next().map(|f| InferredType {
            sql_type: f.sql_type,
            not_null: f.not_null,
        })
    }
}
