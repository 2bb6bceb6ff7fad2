//! SQL type affinity, expression type inference and the SQL to Rust type map.

use crate::sql::walk::function_args;
use crate::sql::{column_reference, object_name};
use indexmap::IndexMap;
use serde::Serialize;
use sqlparser::ast::{BinaryOperator, Expr, Query, UnaryOperator, Value};

const BUILTIN_TYPES: &[&str] = &[
    "i8", "i16", "i32", "i64", "u8", "u16", "u32", "u64", "f32", "f64", "bool", "String",
    "Vec<u8>",
];

/// Whether `ty` is a scalar the generated code can read and bind without a
/// custom adapter. `Option<T>` counts when `T` does.
pub fn is_builtin_type(ty: &str) -> bool {
    let compact: String = ty.chars().filter(|c| !c.is_whitespace()).collect();
    let inner = compact
        .strip_prefix("Option<")
        .and_then(|rest| rest.strip_suffix('>'))
        .unwrap_or(&compact);
    BUILTIN_TYPES.contains(&inner)
}

/// SQL type and nullability of an expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InferredType {
    pub sql_type: Option<String>,
    pub not_null: bool,
}

impl InferredType {
    pub fn new(sql_type: &str, not_null: bool) -> Self {
        InferredType {
            sql_type: Some(sql_type.to_string()),
            not_null,
        }
    }

    pub fn unknown() -> Self {
        InferredType {
            sql_type: None,
            not_null: false,
        }
    }

    fn nullable(mut self) -> Self {
        self.not_null = false;
        self
    }
}

/// Column and subquery lookups that expression inference needs from the
/// surrounding SELECT.
pub trait TypeContext {
    fn column_type(&self, table: Option<&str>, name: &str) -> Option<InferredType>;
    fn subquery_type(&self, query: &Query) -> Option<InferredType>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Affinity {
    Integer,
    Real,
    Text,
    Other,
}

fn affinity(sql_type: Option<&str>) -> Affinity {
    let Some(t) = sql_type else {
        return Affinity::Other;
    };
    let upper = t.to_ascii_uppercase();
    if upper.contains("INT") || upper.starts_with("BOOL") {
        Affinity::Integer
    } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
        Affinity::Text
    } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
        Affinity::Real
    } else {
        Affinity::Other
    }
}

fn literal_type(value: &Value) -> InferredType {
    match value {
        Value::Number(n, _) => {
            if n.contains(['.', 'e', 'E']) {
                InferredType::new("REAL", true)
            } else {
                InferredType::new("INTEGER", true)
            }
        }
        Value::Boolean(_) => InferredType::new("INTEGER", true),
        Value::HexStringLiteral(_) => InferredType::new("BLOB", true),
        Value::Null | Value::Placeholder(_) => InferredType::unknown(),
        _ => InferredType::new("TEXT", true),
    }
}

fn operands_not_null(exprs: &[&Expr], ctx: &dyn TypeContext) -> bool {
    exprs.iter().all(|e| infer_expr_type(e, ctx).not_null)
}

/// Infer the type of `expr` following SQLite's result typing rules.
pub fn infer_expr_type(expr: &Expr, ctx: &dyn TypeContext) -> InferredType {
    if let Some((table, name)) = column_reference(expr) {
        return ctx
            .column_type(table, name)
            .unwrap_or_else(InferredType::unknown);
    }
    match expr {
        Expr::Value(value) => literal_type(value),
        Expr::Function(function) => {
            let name = object_name(&function.name).to_ascii_uppercase();
            let (args, star) = function_args(&function.args);
            infer_function(&name, &args, star, ctx)
        }
        Expr::Cast {
            expr, data_type, ..
        } => InferredType {
            sql_type: Some(data_type.to_string()),
            not_null: infer_expr_type(expr, ctx).not_null,
        },
        Expr::Case {
            results,
            else_result,
            ..
        } => {
            let results: Vec<InferredType> = results
                .iter()
                .chain(else_result.as_deref())
                .map(|e| infer_expr_type(e, ctx))
                .collect();
            let sql_type = results.iter().find_map(|r| r.sql_type.clone());
            InferredType {
                sql_type,
                not_null: else_result.is_some() && results.iter().all(|r| r.not_null),
            }
        }
        Expr::UnaryOp { op, expr } => {
            let inner = infer_expr_type(expr, ctx);
            match op {
                UnaryOperator::Not | UnaryOperator::PGBitwiseNot => InferredType {
                    sql_type: Some("INTEGER".to_string()),
                    not_null: inner.not_null,
                },
                _ => inner,
            }
        }
        Expr::BinaryOp { left, op, right } => {
            let l = infer_expr_type(left, ctx);
            let r = infer_expr_type(right, ctx);
            let not_null = l.not_null && r.not_null;
            match op {
                BinaryOperator::Eq
                | BinaryOperator::NotEq
                | BinaryOperator::Lt
                | BinaryOperator::LtEq
                | BinaryOperator::Gt
                | BinaryOperator::GtEq
                | BinaryOperator::And
                | BinaryOperator::Or => InferredType::new("INTEGER", not_null),
                BinaryOperator::Spaceship => InferredType::new("INTEGER", true),
                BinaryOperator::StringConcat => InferredType::new("TEXT", not_null),
                BinaryOperator::BitwiseAnd
                | BinaryOperator::BitwiseOr
                | BinaryOperator::PGBitwiseShiftLeft
                | BinaryOperator::PGBitwiseShiftRight => InferredType::new("INTEGER", not_null),
                BinaryOperator::Plus
                | BinaryOperator::Minus
                | BinaryOperator::Multiply
                | BinaryOperator::Divide
                | BinaryOperator::Modulo => {
                    let la = affinity(l.sql_type.as_deref());
                    let ra = affinity(r.sql_type.as_deref());
                    let sql_type = if la == Affinity::Real || ra == Affinity::Real {
                        Some("REAL".to_string())
                    } else if la == Affinity::Integer && ra == Affinity::Integer {
                        Some("INTEGER".to_string())
                    } else {
                        l.sql_type.or(r.sql_type)
                    };
                    // Division by zero yields NULL.
                    let not_null = not_null
                        && !matches!(op, BinaryOperator::Divide | BinaryOperator::Modulo);
                    InferredType { sql_type, not_null }
                }
                // `->` and `->>` extract JSON of any type.
                _ => InferredType::unknown(),
            }
        }
        Expr::Like { expr, pattern, .. }
        | Expr::ILike { expr, pattern, .. }
        | Expr::SimilarTo { expr, pattern, .. }
        | Expr::RLike { expr, pattern, .. } => {
            InferredType::new("INTEGER", operands_not_null(&[&**expr, &**pattern], ctx))
        }
        Expr::Between {
            expr, low, high, ..
        } => InferredType::new("INTEGER", operands_not_null(&[&**expr, &**low, &**high], ctx)),
        Expr::InList { expr, list, .. } => {
            let not_null = infer_expr_type(expr, ctx).not_null
                && list.iter().all(|e| infer_expr_type(e, ctx).not_null);
            InferredType::new("INTEGER", not_null)
        }
        Expr::InSubquery { expr, .. } => {
            InferredType::new("INTEGER", infer_expr_type(expr, ctx).not_null)
        }
        Expr::IsNull(_)
        | Expr::IsNotNull(_)
        | Expr::IsTrue(_)
        | Expr::IsNotTrue(_)
        | Expr::IsFalse(_)
        | Expr::IsNotFalse(_)
        | Expr::IsDistinctFrom(..)
        | Expr::IsNotDistinctFrom(..)
        | Expr::Exists { .. } => InferredType::new("INTEGER", true),
        Expr::Subquery(query) => ctx
            .subquery_type(query)
            .map(InferredType::nullable)
            .unwrap_or_else(InferredType::unknown),
        Expr::Nested(inner) | Expr::Collate { expr: inner, .. } => infer_expr_type(inner, ctx),
        Expr::Trim { expr, .. } | Expr::Substring { expr, .. } => {
            InferredType::new("TEXT", infer_expr_type(expr, ctx).not_null)
        }
        _ => InferredType::unknown(),
    }
}

fn infer_function(name: &str, args: &[&Expr], star: bool, ctx: &dyn TypeContext) -> InferredType {
    let arg_types: Vec<InferredType> = args.iter().map(|a| infer_expr_type(a, ctx)).collect();
    let all_not_null = arg_types.iter().all(|t| t.not_null);
    let first = arg_types.first().cloned().unwrap_or_else(InferredType::unknown);

    match name {
        "COUNT" => InferredType::new("INTEGER", true),
        "TOTAL" => InferredType::new("REAL", true),
        "SUM" => {
            let sql_type = match affinity(first.sql_type.as_deref()) {
                Affinity::Integer => "INTEGER",
                _ => "REAL",
            };
            InferredType::new(sql_type, false)
        }
        "MIN" | "MAX" if args.len() > 1 => InferredType {
            sql_type: arg_types.iter().find_map(|t| t.sql_type.clone()),
            not_null: all_not_null,
        },
        "MIN" | "MAX" => first.nullable(),
        "AVG" => InferredType::new("REAL", false),
        "GROUP_CONCAT" | "STRING_AGG" => InferredType::new("TEXT", false),
        "COALESCE" | "IFNULL" => InferredType {
            sql_type: arg_types.iter().find_map(|t| t.sql_type.clone()),
            not_null: arg_types.iter().any(|t| t.not_null),
        },
        "NULLIF" => first.nullable(),
        "IIF" => {
            let branches = &arg_types[arg_types.len().min(1)..];
            InferredType {
                sql_type: branches.iter().find_map(|t| t.sql_type.clone()),
                not_null: branches.len() == 2 && branches.iter().all(|t| t.not_null),
            }
        }
        "LOWER" | "UPPER" | "TRIM" | "LTRIM" | "RTRIM" | "SUBSTR" | "SUBSTRING" | "REPLACE"
        | "PRINTF" | "FORMAT" | "HEX" | "QUOTE" | "CHAR" | "CONCAT" | "CONCAT_WS"
        | "SOUNDEX" => InferredType::new("TEXT", all_not_null),
        "TYPEOF" | "SQLITE_VERSION" | "CURRENT_TIMESTAMP" | "CURRENT_DATE" | "CURRENT_TIME" => {
            InferredType::new("TEXT", true)
        }
        "LENGTH" | "OCTET_LENGTH" | "INSTR" | "UNICODE" | "SIGN" => {
            InferredType::new("INTEGER", all_not_null)
        }
        "RANDOM" | "CHANGES" | "TOTAL_CHANGES" | "LAST_INSERT_ROWID" | "ROW_NUMBER" | "RANK"
        | "DENSE_RANK" | "NTILE" => InferredType::new("INTEGER", true),
        "PERCENT_RANK" | "CUME_DIST" => InferredType::new("REAL", true),
        "ABS" => InferredType {
            sql_type: first.sql_type.or_else(|| Some("INTEGER".to_string())),
            not_null: all_not_null,
        },
        "ROUND" => InferredType::new("REAL", all_not_null),
        "RANDOMBLOB" | "ZEROBLOB" => InferredType::new("BLOB", true),
        // Date functions return NULL for input they cannot parse.
        "DATE" | "TIME" | "DATETIME" | "STRFTIME" | "TIMEDIFF" => InferredType::new("TEXT", false),
        "JULIANDAY" => InferredType::new("REAL", false),
        "UNIXEPOCH" => InferredType::new("INTEGER", false),
        "JSON" | "JSON_OBJECT" | "JSON_ARRAY" | "JSON_GROUP_ARRAY" | "JSON_GROUP_OBJECT"
        | "JSON_INSERT" | "JSON_REPLACE" | "JSON_SET" | "JSON_REMOVE" | "JSON_PATCH"
        | "JSON_QUOTE" => InferredType::new("TEXT", all_not_null && !star),
        "JSON_ARRAY_LENGTH" | "JSON_VALID" => InferredType::new("INTEGER", all_not_null),
        "LAG" | "LEAD" | "FIRST_VALUE" | "LAST_VALUE" | "NTH_VALUE" => first.nullable(),
        _ => InferredType::unknown(),
    }
}

/// Maps SQL declared types to Rust types.
#[derive(Debug, Clone, Default)]
pub struct TypeMapper {
    /// Upper-cased SQL type name to Rust type.
    overrides: IndexMap<String, String>,
}

impl TypeMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_overrides<I, K, V>(overrides: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        TypeMapper {
            overrides: overrides
                .into_iter()
                .map(|(k, v)| (k.as_ref().trim().to_ascii_uppercase(), v.into()))
                .collect(),
        }
    }

    /// The Rust type for a column of SQL type `sql_type`, never wrapped in
    /// `Option`.
    pub fn map_sql_type(&self, sql_type: Option<&str>) -> String {
        let Some(raw) = sql_type.map(str::trim).filter(|t| !t.is_empty()) else {
            return "Vec<u8>".to_string();
        };
        let upper = raw.to_ascii_uppercase();
        let base = upper.split('(').next().unwrap_or(&upper).trim();
        if let Some(ty) = self.overrides.get(&upper).or_else(|| self.overrides.get(base)) {
            return ty.clone();
        }
        if upper.starts_with("BOOL") {
            "bool"
        } else if upper.contains("INT") {
            "i64"
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            "String"
        } else if upper.contains("BLOB") {
            "Vec<u8>"
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            "f64"
        } else if upper.contains("DATE") || upper.contains("TIME") {
            "String"
        } else if base == "DECIMAL" {
            "f64"
        } else {
            "i64"
        }
        .to_string()
    }
}
