//! Semantic checks and canonicalization.
//!
//! Resolves field aliases, rewrites enum literals to their canonical form
//! (`OPEN` -> `open`, `high` -> `P1`, `in-review` -> `in_review`), checks
//! operators against field kinds and function arity. All problems are
//! collected rather than stopping at the first, each prefixed with the line
//! and column of the comparison, call or sort clause it concerns.

use super::ast::{Call, CompareOp, Comparison, Expr, Query, SortClause, Span, Value};
use super::dates;
use super::fields::{self, FieldKind, Related, Scope};
use crate::db::issues::SortField;
use crate::ids;
use crate::model::{FileRole, IssueType, LogType, Priority, Status};
use std::str::FromStr;

/// Function names accepted in queries.
pub const FUNCTIONS: [&str; 13] = [
    "has",
    "is",
    "any",
    "all",
    "none",
    "child_of",
    "descendant_of",
    "blocks",
    "blocked_by",
    "linked_to",
    "rework",
    "is_ready",
    "has_open_deps",
];

/// Validate `query` and return its canonical form.
///
/// # Errors
///
/// Returns every problem found, in source order.
pub fn validate(query: &Query) -> Result<Query, Vec<String>> {
    let mut errors = Vec::new();
    let expr = query.expr.as_ref().map(|e| check_expr(e, &mut errors));
    let sort = query.sort.as_ref().map(|s| check_sort(s, &mut errors));
    if errors.is_empty() {
        Ok(Query { expr, sort })
    } else {
        Err(errors)
    }
}

/// Prefix every error from `from` on with the position they belong to.
fn locate(errors: &mut [String], from: usize, at: Span) {
    if at.line == 0 {
        return;
    }
    for error in errors.iter_mut().skip(from) {
        *error = format!("{at}: {error}");
    }
}

fn check_sort(sort: &SortClause, errors: &mut Vec<String>) -> SortClause {
    match SortField::from_str(&sort.field) {
        Ok(field) => SortClause {
            field: field.as_str().to_string(),
            descending: sort.descending,
            at: sort.at,
        },
        Err(err) => {
            let from = errors.len();
            errors.push(err.to_string());
            locate(errors, from, sort.at);
            sort.clone()
        }
    }
}

fn check_expr(expr: &Expr, errors: &mut Vec<String>) -> Expr {
    match expr {
        Expr::And(l, r) => Expr::and(check_expr(l, errors), check_expr(r, errors)),
        Expr::Or(l, r) => Expr::or(check_expr(l, errors), check_expr(r, errors)),
        Expr::Not(inner) => Expr::not(check_expr(inner, errors)),
        Expr::Text(text) => Expr::Text(text.clone()),
        Expr::Compare(cmp) => {
            let from = errors.len();
            let checked = check_comparison(cmp, errors);
            locate(errors, from, cmp.at);
            Expr::Compare(checked)
        }
        Expr::Call(call) => {
            let from = errors.len();
            let checked = check_call(call, errors);
            locate(errors, from, call.at);
            Expr::Call(checked)
        }
    }
}

fn check_comparison(cmp: &Comparison, errors: &mut Vec<String>) -> Comparison {
    let Some(field) = fields::resolve(&cmp.field) else {
        errors.push(format!("unknown field '{}'", cmp.field));
        return cmp.clone();
    };
    let kind = field.kind();
    let name = field.to_string();

    if cmp.op.is_ordering() && !kind.is_ordered() {
        errors.push(format!("operator '{}' does not apply to {name}", cmp.op));
    }
    if matches!(cmp.op, CompareOp::Contains | CompareOp::NotContains) && !kind.supports_contains() {
        errors.push(format!("operator '{}' does not apply to {name}", cmp.op));
    }

    let value = match &cmp.value {
        Value::Empty | Value::Null | Value::List(_) if !cmp.op.is_equality() => {
            errors.push(format!(
                "{} needs '=' or '!=' on {name}",
                describe_value(&cmp.value)
            ));
            cmp.value.clone()
        }
        Value::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match canonical_value(kind, cmp.op, item) {
                    Ok(v) => out.push(v),
                    Err(msg) => errors.push(format!("{name}: {msg}")),
                }
            }
            Value::List(out)
        }
        other => canonical_value(kind, cmp.op, other).unwrap_or_else(|msg| {
            errors.push(format!("{name}: {msg}"));
            other.clone()
        }),
    };

    Comparison {
        field: name,
        op: cmp.op,
        value,
        at: cmp.at,
    }
}

fn describe_value(value: &Value) -> &'static str {
    match value {
        Value::Empty => "EMPTY",
        Value::Null => "NULL",
        Value::List(_) => "a value list",
        _ => "value",
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        other => other.as_text().map(str::to_string),
    }
}

fn enum_value<T, E>(raw: &str, all: &[T], as_str: fn(&T) -> &'static str) -> Result<Value, String>
where
    T: FromStr<Err = E>,
    E: std::fmt::Display,
{
    raw.parse::<T>()
        .map(|v| Value::Ident(as_str(&v).to_string()))
        .map_err(|err| {
            let allowed: Vec<&str> = all.iter().map(as_str).collect();
            format!("{err}: expected one of {}", allowed.join(", "))
        })
}

/// Canonical form of a single literal for a field of `kind`.
fn canonical_value(kind: FieldKind, op: CompareOp, value: &Value) -> Result<Value, String> {
    match value {
        Value::Empty | Value::Null => return Ok(value.clone()),
        Value::Me if kind == FieldKind::Session => return Ok(Value::Me),
        Value::Me => return Err("@me only applies to session fields".to_string()),
        Value::List(_) => return Err("value lists cannot nest".to_string()),
        _ => {}
    }
    let Some(raw) = text_of(value) else {
        return Err("unsupported value".to_string());
    };

    match kind {
        FieldKind::Text | FieldKind::Session => Ok(Value::Str(raw)),
        FieldKind::Id if op.is_equality() => ids::normalize_issue_id(&raw)
            .map(Value::Ident)
            .map_err(|err| err.to_string()),
        FieldKind::Id => Ok(Value::Str(raw)),
        FieldKind::Labels => Ok(Value::Str(raw.trim().to_ascii_lowercase())),
        FieldKind::Status => enum_value::<Status, _>(&raw, &Status::ALL, |s| s.as_str()),
        FieldKind::Priority => enum_value::<Priority, _>(&raw, &Priority::ALL, |p| p.as_str()),
        FieldKind::IssueType => enum_value::<IssueType, _>(&raw, &IssueType::ALL, |t| t.as_str()),
        FieldKind::LogType => enum_value::<LogType, _>(&raw, &LogType::ALL, |t| t.as_str()),
        FieldKind::FileRole => enum_value::<FileRole, _>(&raw, &FileRole::ALL, |r| r.as_str()),
        FieldKind::Number => raw
            .trim()
            .parse::<i64>()
            .map(Value::Number)
            .map_err(|_| format!("'{raw}' is not a number")),
        FieldKind::Date => match dates::parse(&raw) {
            Some(dates::DateSpec::Named(_)) => Ok(Value::Date(raw.trim().to_ascii_lowercase())),
            Some(_) => Ok(Value::Date(raw.trim().to_string())),
            None => Err(format!(
                "'{raw}' is not a date: use YYYY-MM-DD, an offset like -7d or +2w, or one of {}",
                dates::Named::ALL
                    .iter()
                    .map(|(name, _)| *name)
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        },
        FieldKind::Bool => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" | "on" => Ok(Value::Ident("true".to_string())),
            "false" | "no" | "0" | "off" => Ok(Value::Ident("false".to_string())),
            _ => Err(format!("'{raw}' is not true or false")),
        },
    }
}

fn arity(name: &str, args: &[Value], expected: usize, errors: &mut Vec<String>) -> bool {
    if args.len() == expected {
        return true;
    }
    errors.push(format!(
        "{name}() takes {expected} argument{}, got {}",
        if expected == 1 { "" } else { "s" },
        args.len()
    ));
    false
}

fn check_call(call: &Call, errors: &mut Vec<String>) -> Call {
    let name = call.name.to_ascii_lowercase();
    let arity =
        |expected: usize, errors: &mut Vec<String>| arity(&name, &call.args, expected, errors);

    let args = match name.as_str() {
        "rework" | "is_ready" | "has_open_deps" => {
            arity(0, errors);
            Vec::new()
        }
        "has" => {
            if arity(1, errors) {
                vec![check_has_target(&call.args[0], errors)]
            } else {
                call.args.clone()
            }
        }
        "is" => {
            if arity(1, errors) {
                let raw = text_of(&call.args[0]).unwrap_or_default();
                match enum_value::<Status, _>(&raw, &Status::ALL, |s| s.as_str()) {
                    Ok(v) => vec![v],
                    Err(msg) => {
                        errors.push(format!("is(): {msg}"));
                        call.args.clone()
                    }
                }
            } else {
                call.args.clone()
            }
        }
        "child_of" | "descendant_of" | "blocks" | "blocked_by" => {
            if arity(1, errors) {
                let raw = text_of(&call.args[0]).unwrap_or_default();
                match ids::normalize_issue_id(&raw) {
                    Ok(id) => vec![Value::Ident(id)],
                    Err(err) => {
                        errors.push(format!("{name}(): {err}"));
                        call.args.clone()
                    }
                }
            } else {
                call.args.clone()
            }
        }
        "linked_to" => {
            if arity(1, errors) {
                match text_of(&call.args[0]).filter(|p| !p.trim().is_empty()) {
                    Some(path) => vec![Value::Str(path)],
                    None => {
                        errors.push("linked_to() needs a file path".to_string());
                        call.args.clone()
                    }
                }
            } else {
                call.args.clone()
            }
        }
        "any" | "all" | "none" => check_set_call(&name, &call.args, errors),
        _ => {
            errors.push(format!(
                "unknown function '{}': expected one of {}",
                call.name,
                FUNCTIONS.join(", ")
            ));
            call.args.clone()
        }
    };

    Call {
        name,
        args,
        at: call.at,
    }
}

fn check_has_target(arg: &Value, errors: &mut Vec<String>) -> Value {
    let raw = text_of(arg).unwrap_or_default();
    if let Some(related) = Related::parse(&raw) {
        return Value::Ident(related.as_str().to_string());
    }
    match fields::resolve(&raw) {
        Some(field) if field.scope == Scope::Issue => Value::Ident(field.def.name.to_string()),
        _ => {
            errors.push(format!("has(): unknown field '{raw}'"));
            arg.clone()
        }
    }
}

fn check_set_call(name: &str, args: &[Value], errors: &mut Vec<String>) -> Vec<Value> {
    let Some((first, values)) = args.split_first().filter(|(_, rest)| !rest.is_empty()) else {
        errors.push(format!("{name}() takes a field and at least one value"));
        return args.to_vec();
    };
    let raw = text_of(first).unwrap_or_default();
    let field = match fields::resolve(&raw) {
        Some(field) if field.scope == Scope::Issue && field.kind() != FieldKind::Date => field,
        Some(_) => {
            errors.push(format!("{name}(): '{raw}' cannot be matched against a value set"));
            return args.to_vec();
        }
        None => {
            errors.push(format!("{name}(): unknown field '{raw}'"));
            return args.to_vec();
        }
    };
    let mut out = vec![Value::Ident(field.def.name.to_string())];
    for value in values {
        match canonical_value(field.kind(), CompareOp::Eq, value) {
            Ok(v) => out.push(v),
            Err(msg) => {
                errors.push(format!("{name}(): {msg}"));
                out.push(value.clone());
            }
        }
    }
    out
}
