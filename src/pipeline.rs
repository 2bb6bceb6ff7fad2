//! Turns a query file into an annotated statement: structural columns and
//! parameters merged with query-local and schema-inherited annotations.

use crate::annotations::{extract_comment_annotations, merge_annotations, AnnotationMap};
use crate::dynamic::{self, DynamicFieldMapping};
use crate::error::{Error, Result};
use crate::overrides::{FieldAnnotationOverrides, StatementAnnotations};
use crate::resolver::FieldAnnotationResolver;
use crate::schema::{
    collect_aliases, collect_query_aliases, ColumnOrigin, FieldSource, SchemaCatalog,
};
use crate::sql::{self, column_reference, object_name, ParamHint, ParsedStatement, Statement};
use crate::types::TypeMapper;
use anyhow::{anyhow, Context};
use heck::ToSnakeCase;
use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use sqlparser::ast::{Query, Select, SelectItem, SetExpr, TableFactor};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Build-scoped state shared by every statement of a run.
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    pub catalog: SchemaCatalog,
    pub resolver: FieldAnnotationResolver,
    pub types: TypeMapper,
}

impl AnalysisContext {
    pub fn new(catalog: SchemaCatalog, types: TypeMapper) -> Self {
        let resolver = FieldAnnotationResolver::new(&catalog);
        AnalysisContext {
            catalog,
            resolver,
            types,
        }
    }

    pub fn from_schema_sql(schema: &str) -> Result<Self> {
        Ok(Self::new(SchemaCatalog::from_sql(schema)?, TypeMapper::new()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
}

/// A result column (or dynamic field) with its effective annotations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotatedField {
    pub name: String,
    pub source: FieldSource,
    pub annotations: AnnotationMap,
    pub overrides: FieldAnnotationOverrides,
    pub property_name: String,
    /// Target type without the `Option` wrapper.
    pub property_type: String,
    pub sql_type: Option<String>,
    pub not_null: bool,
    pub adapter: bool,
}

impl AnnotatedField {
    pub fn is_dynamic(&self) -> bool {
        self.overrides.is_dynamic_field
    }

    pub fn rust_type(&self) -> String {
        if self.not_null || self.property_type.starts_with("Option<") {
            self.property_type.clone()
        } else {
            format!("Option<{}>", self.property_type)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parameter {
    pub name: String,
    pub property_name: String,
    pub property_type: String,
    pub sql_type: Option<String>,
    pub not_null: bool,
    pub adapter: bool,
    /// Column the parameter is compared with or written to.
    pub column: Option<ColumnOrigin>,
}

impl Parameter {
    pub fn rust_type(&self) -> String {
        if self.not_null {
            self.property_type.clone()
        } else {
            format!("Option<{}>", self.property_type)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnnotatedStatement {
    pub name: String,
    pub namespace: String,
    pub source_file: PathBuf,
    pub sql: String,
    pub kind: StatementKind,
    pub annotations: StatementAnnotations,
    pub fields: Vec<AnnotatedField>,
    /// Distinct parameters in first-appearance order.
    pub parameters: Vec<Parameter>,
    /// Every parameter occurrence in binding order, duplicates included.
    pub binding_order: Vec<String>,
    /// FROM reference name to table or view name.
    pub table_aliases: IndexMap<String, String>,
    pub dynamic_mappings: Vec<DynamicFieldMapping>,
    /// Table written by INSERT, UPDATE or DELETE.
    pub target_table: Option<String>,
}

impl AnnotatedStatement {
    pub fn query_result(&self) -> Option<&str> {
        self.annotations.query_result.as_deref()
    }

    pub fn field(&self, name: &str) -> Option<&AnnotatedField> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Fields emitted as top-level properties of the row type.
    pub fn flat_fields(&self) -> Vec<&AnnotatedField> {
        dynamic::flat_fields(self)
    }
}

/// Read one query file; the statement is named after the file stem.
pub fn process_query_file(
    ctx: &AnalysisContext,
    path: &Path,
    namespace: &str,
) -> anyhow::Result<AnnotatedStatement> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read query file {}", path.display()))?;
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow!("query file name is not valid UTF-8: {}", path.display()))?;
    let statement = process_statement_text(ctx, &text, name, namespace, path)
        .with_context(|| format!("failed to process {}", path.display()))?;
    Ok(statement)
}

pub fn process_statement_text(
    ctx: &AnalysisContext,
    text: &str,
    name: &str,
    namespace: &str,
    source_file: &Path,
) -> Result<AnnotatedStatement> {
    let parsed = sql::parse_statement(text)?;
    process_statement(ctx, &parsed, name, namespace, source_file)
}

struct Shape {
    kind: StatementKind,
    columns: Vec<FieldSource>,
    aliases: IndexMap<String, String>,
    target_table: Option<String>,
    /// Views read directly by the statement, whose dynamic fields apply.
    views: Vec<String>,
}

pub fn process_statement(
    ctx: &AnalysisContext,
    parsed: &ParsedStatement,
    name: &str,
    namespace: &str,
    source_file: &Path,
) -> Result<AnnotatedStatement> {
    let shape = statement_shape(ctx, parsed, name)?;

    let comments: Vec<&String> = parsed.all_comments().collect();
    let comment_annotations = extract_comment_annotations(&comments)?;
    let annotations = StatementAnnotations::from_map(name, &comment_annotations.statement)?;
    let local_fields = &comment_annotations.fields;

    let mut seen: IndexSet<String> = IndexSet::new();
    let mut used_local: IndexSet<String> = IndexSet::new();
    let mut fields = Vec::with_capacity(shape.columns.len());
    for source in shape.columns {
        if !seen.insert(source.name.to_ascii_lowercase()) {
            return Err(Error::DuplicateColumn {
                statement: name.to_string(),
                alias: source.name,
            });
        }
        let local = local_fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(&source.name));
        if let Some((key, _)) = local {
            used_local.insert(key.clone());
        }
        fields.push(annotate_column(
            ctx,
            &annotations,
            source,
            local.map(|(_, map)| map),
        )?);
    }

    let mut dynamic_maps: IndexMap<String, AnnotationMap> = IndexMap::new();
    for view in &shape.views {
        for (field, map) in ctx.resolver.dynamic_fields(view) {
            dynamic_maps.entry(field).or_insert(map);
        }
    }
    for (field, map) in local_fields {
        let is_dynamic = map
            .get(crate::annotations::keys::IS_DYNAMIC_FIELD)
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if !is_dynamic {
            if !used_local.contains(field) {
                warn!(statement = name, field = %field, "annotation does not match any result column");
            }
            continue;
        }
        let merged = match dynamic_maps.get(field) {
            Some(existing) => merge_annotations(existing, map),
            None => map.clone(),
        };
        dynamic_maps.insert(field.clone(), merged);
    }
    for (field, map) in dynamic_maps {
        if seen.contains(&field.to_ascii_lowercase()) {
            return Err(Error::DynamicField {
                statement: name.to_string(),
                message: format!("dynamic field `{}` has the same name as a result column", field),
            });
        }
        fields.push(annotate_dynamic(&annotations, field, map)?);
    }

    let dynamic_mappings = dynamic::build_mappings(name, &annotations, &fields, &shape.aliases)?;
    for mapping in &dynamic_mappings {
        if let Some(field) = fields.iter_mut().find(|f| f.name == mapping.field_name) {
            field.not_null = mapping.not_null;
        }
    }

    let binding_order = parsed.named_parameters().to_vec();
    let casts = parsed.statement.param_casts();
    let hints = parsed.statement.param_hints();
    let mut parameters: Vec<Parameter> = Vec::new();
    for param in &binding_order {
        if parameters.iter().any(|p| &p.name == param) {
            continue;
        }
        parameters.push(infer_parameter(
            ctx,
            param,
            casts.get(param),
            hints.get(param),
            &shape.aliases,
            shape.target_table.as_deref(),
        )?);
    }

    debug!(
        statement = name,
        namespace,
        fields = fields.len(),
        parameters = parameters.len(),
        "statement processed"
    );

    Ok(AnnotatedStatement {
        name: name.to_string(),
        namespace: namespace.to_string(),
        source_file: source_file.to_path_buf(),
        sql: parsed.sql.clone(),
        kind: shape.kind,
        annotations,
        fields,
        parameters,
        binding_order,
        table_aliases: shape.aliases,
        dynamic_mappings,
        target_table: shape.target_table,
    })
}

fn statement_shape(ctx: &AnalysisContext, parsed: &ParsedStatement, name: &str) -> Result<Shape> {
    let mut aliases = IndexMap::new();
    match &parsed.statement {
        Statement::Select(query) => {
            let columns = ctx.catalog.resolve_select(query)?;
            collect_query_aliases(query, &mut aliases);
            let views = first_select(query)
                .map(|select| {
                    select
                        .from
                        .iter()
                        .flat_map(|item| {
                            std::iter::once(&item.relation)
                                .chain(item.joins.iter().map(|j| &j.relation))
                        })
                        .filter_map(|factor| match factor {
                            TableFactor::Table {
                                name, args: None, ..
                            } => {
                                let name = object_name(name);
                                ctx.catalog.view(&name).is_some().then_some(name)
                            }
                            _ => None,
                        })
                        .collect()
                })
                .unwrap_or_default();
            Ok(Shape {
                kind: StatementKind::Select,
                columns,
                aliases,
                target_table: None,
                views,
            })
        }
        Statement::Insert(insert) => {
            aliases.insert(
                insert.alias.clone().unwrap_or_else(|| insert.table.clone()),
                insert.table.clone(),
            );
            let columns = returning_columns(
                ctx,
                name,
                &insert.table,
                insert.alias.as_deref(),
                &insert.returning,
            )?;
            Ok(Shape {
                kind: StatementKind::Insert,
                columns,
                aliases,
                target_table: Some(insert.table.clone()),
                views: Vec::new(),
            })
        }
        Statement::Update(update) => {
            aliases.insert(
                update.alias.clone().unwrap_or_else(|| update.table.clone()),
                update.table.clone(),
            );
            if let Some(from) = &update.from {
                collect_aliases(from, &mut aliases);
            }
            let columns = returning_columns(
                ctx,
                name,
                &update.table,
                update.alias.as_deref(),
                &update.returning,
            )?;
            Ok(Shape {
                kind: StatementKind::Update,
                columns,
                aliases,
                target_table: Some(update.table.clone()),
                views: Vec::new(),
            })
        }
        Statement::Delete(delete) => {
            aliases.insert(
                delete.alias.clone().unwrap_or_else(|| delete.table.clone()),
                delete.table.clone(),
            );
            let columns = returning_columns(
                ctx,
                name,
                &delete.table,
                delete.alias.as_deref(),
                &delete.returning,
            )?;
            Ok(Shape {
                kind: StatementKind::Delete,
                columns,
                aliases,
                target_table: Some(delete.table.clone()),
                views: Vec::new(),
            })
        }
        Statement::CreateTable(_) | Statement::CreateView(_) | Statement::Other { .. } => {
            Err(Error::sql(format!(
                "query `{}` must be a SELECT, INSERT, UPDATE or DELETE statement",
                name
            )))
        }
    }
}

/// First SELECT of a possibly compound query.
fn first_select(query: &Query) -> Option<&Select> {
    let mut body = &*query.body;
    loop {
        match body {
            SetExpr::Select(select) => return Some(select.as_ref()),
            SetExpr::Query(query) => body = query.body.as_ref(),
            SetExpr::SetOperation { left, .. } => body = left.as_ref(),
            _ => return None,
        }
    }
}

/// Only bare columns of the target table may be returned.
fn returning_columns(
    ctx: &AnalysisContext,
    statement: &str,
    table: &str,
    alias: Option<&str>,
    returning: &[SelectItem],
) -> Result<Vec<FieldSource>> {
    if returning.is_empty() {
        return Ok(Vec::new());
    }
    let columns = ctx
        .catalog
        .object_columns(table)
        .ok_or_else(|| Error::schema(format!("no such table `{}`", table)))?;
    let columns: Vec<FieldSource> = columns
        .into_iter()
        .map(|mut c| {
            c.table_alias = Some(alias.unwrap_or(table).to_string());
            c.alias_path = vec![alias.unwrap_or(table).to_string()];
            c
        })
        .collect();
    let names_target = |t: &str| {
        t.eq_ignore_ascii_case(table) || alias.map(|a| a.eq_ignore_ascii_case(t)).unwrap_or(false)
    };
    let unsupported = |detail: String| Error::UnsupportedReturning {
        statement: statement.to_string(),
        detail,
    };

    let mut out = Vec::new();
    for item in returning {
        match item {
            SelectItem::Wildcard(_) => out.extend(columns.iter().cloned()),
            SelectItem::QualifiedWildcard(name, _) => {
                let t = object_name(name);
                if !names_target(&t) {
                    return Err(unsupported(format!("`{}.*` does not name the target table", t)));
                }
                out.extend(columns.iter().cloned());
            }
            SelectItem::ExprWithAlias { expr, alias: name } => {
                return Err(unsupported(format!(
                    "`{} AS {}` uses an alias; return the bare column",
                    expr, name
                )))
            }
            SelectItem::UnnamedExpr(expr) => {
                let Some((t, name)) = column_reference(expr) else {
                    return Err(unsupported(format!(
                        "expression `{}` is not a bare column",
                        expr
                    )));
                };
                if let Some(t) = t {
                    if !names_target(t) {
                        return Err(unsupported(format!(
                            "`{}.{}` does not belong to the target table",
                            t, name
                        )));
                    }
                }
                let field = columns
                    .iter()
                    .find(|c| c.name.eq_ignore_ascii_case(name))
                    .cloned()
                    .ok_or_else(|| {
                        Error::sql(format!("no such column `{}` in `{}`", name, table))
                    })?;
                out.push(field);
            }
        }
    }
    Ok(out)
}

/// Query-local annotations win over those inherited from the origin column,
/// which win over what the SQL itself implies.
fn annotate_column(
    ctx: &AnalysisContext,
    statement: &StatementAnnotations,
    source: FieldSource,
    local: Option<&AnnotationMap>,
) -> Result<AnnotatedField> {
    let mut inherited = source
        .origin
        .as_ref()
        .and_then(|o| ctx.resolver.get_annotation_map(&o.object, &o.column))
        .cloned()
        .unwrap_or_default();
    if source.joined_nullable {
        // An outer join can produce NULL whatever the schema promises.
        inherited.shift_remove(crate::annotations::keys::NOT_NULL);
    }
    let annotations = match local {
        Some(local) => merge_annotations(&inherited, local),
        None => inherited,
    };
    let overrides = FieldAnnotationOverrides::from_map(&source.name, &annotations)?;

    let sql_type = overrides
        .sql_type_hint
        .clone()
        .or_else(|| source.sql_type.clone());
    let property_type = overrides
        .property_type
        .clone()
        .unwrap_or_else(|| ctx.types.map_sql_type(sql_type.as_deref()));
    let property_name = overrides
        .property_name
        .clone()
        .unwrap_or_else(|| statement.property_name_generator.property_name(&source.name));

    Ok(AnnotatedField {
        name: source.name.clone(),
        not_null: overrides.not_null.unwrap_or(source.not_null),
        adapter: overrides.adapter,
        property_name,
        property_type,
        sql_type,
        overrides,
        annotations,
        source,
    })
}

fn annotate_dynamic(
    statement: &StatementAnnotations,
    name: String,
    annotations: AnnotationMap,
) -> Result<AnnotatedField> {
    let overrides = FieldAnnotationOverrides::from_map(&name, &annotations)?;
    let property_type = overrides.property_type.clone().unwrap_or_default();
    let property_name = overrides
        .property_name
        .clone()
        .unwrap_or_else(|| statement.property_name_generator.property_name(&name));
    Ok(AnnotatedField {
        source: FieldSource {
            name: name.clone(),
            table_alias: None,
            alias_path: Vec::new(),
            origin: None,
            sql_type: None,
            not_null: false,
            declared_not_null: false,
            joined_nullable: false,
            expression: None,
        },
        not_null: overrides.not_null.unwrap_or(false),
        adapter: overrides.adapter,
        property_name,
        property_type,
        sql_type: None,
        overrides,
        annotations,
        name,
    })
}

fn lookup_alias<'a>(aliases: &'a IndexMap<String, String>, reference: &str) -> Option<&'a str> {
    aliases
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(reference))
        .map(|(_, v)| v.as_str())
}

/// CAST target first, then the column the parameter meets, then LIMIT and
/// OFFSET, otherwise a text parameter.
fn infer_parameter(
    ctx: &AnalysisContext,
    name: &str,
    cast: Option<&String>,
    hint: Option<&ParamHint>,
    aliases: &IndexMap<String, String>,
    target_table: Option<&str>,
) -> Result<Parameter> {
    let mut param = Parameter {
        name: name.to_string(),
        property_name: name.to_snake_case(),
        property_type: "String".to_string(),
        sql_type: None,
        not_null: true,
        adapter: false,
        column: None,
    };

    match hint {
        Some(ParamHint::Column {
            table,
            column,
            assigned,
        }) => {
            let object = match table {
                Some(t) => lookup_alias(aliases, t).map(str::to_string),
                None => target_table
                    .filter(|t| ctx.catalog.object_column(t, column).is_some())
                    .map(str::to_string)
                    .or_else(|| {
                        aliases
                            .values()
                            .find(|o| ctx.catalog.object_column(o, column).is_some())
                            .cloned()
                    }),
            };
            if let Some((object, field)) = object
                .and_then(|o| ctx.catalog.object_column(&o, column).map(|f| (o, f)))
            {
                let overrides = ctx
                    .resolver
                    .get_field_annotations(&object, column)?
                    .unwrap_or_default();
                param.sql_type = overrides.sql_type_hint.clone().or(field.sql_type.clone());
                param.property_type = overrides
                    .property_type
                    .clone()
                    .unwrap_or_else(|| ctx.types.map_sql_type(param.sql_type.as_deref()));
                param.adapter = overrides.adapter;
                if *assigned {
                    param.not_null = overrides.not_null.unwrap_or(field.not_null);
                }
                param.column = Some(ColumnOrigin {
                    object,
                    column: field.name,
                });
            }
        }
        Some(ParamHint::Limit) => {
            param.sql_type = Some("INTEGER".to_string());
            param.property_type = "i64".to_string();
        }
        None => {}
    }

    if let Some(cast) = cast {
        param.sql_type = Some(cast.clone());
        param.property_type = ctx.types.map_sql_type(Some(cast));
        param.adapter = false;
    }
    Ok(param)
}
