//! Parsing of query operator chains.

use crate::error::Error;
use packq_proto::{Expr, Method, Value};

/// One sequence operator, in application order.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOp {
    Where(Expr),
    Select(Expr),
    Skip(usize),
    Take(usize),
    /// Navigation names from the current element type.
    Include(Vec<String>),
}

/// Terminal operator that turns the sequence into one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReducerKind {
    First,
    FirstOrDefault,
    Single,
    SingleOrDefault,
    Any,
    All,
    Count,
}

impl ReducerKind {
    pub fn name(&self) -> &'static str {
        match self {
            ReducerKind::First => "First",
            ReducerKind::FirstOrDefault => "FirstOrDefault",
            ReducerKind::Single => "Single",
            ReducerKind::SingleOrDefault => "SingleOrDefault",
            ReducerKind::Any => "Any",
            ReducerKind::All => "All",
            ReducerKind::Count => "Count",
        }
    }
}

/// A reducer and its predicate. Only `Any` and `All` keep one.
#[derive(Debug, Clone, PartialEq)]
pub struct Reducer {
    pub kind: ReducerKind,
    pub predicate: Option<Expr>,
}

/// What the sequence yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementShape {
    /// Entities of the named type.
    Entity(String),
    /// Values produced by a `Select`.
    Projection,
}

/// A query chain broken into its parts.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuery {
    pub root: String,
    pub ops: Vec<QueryOp>,
    pub reducer: Option<Reducer>,
    pub element: ElementShape,
}

/// Parses a chain of operator calls rooted at an entity source.
pub struct PipelineParser;

impl PipelineParser {
    pub fn parse(expr: &Expr) -> Result<ParsedQuery, Error> {
        let mut calls = Vec::new();
        let mut current = expr;
        let root = loop {
            match current {
                Expr::Call {
                    method,
                    target,
                    args,
                } => {
                    calls.push((method, args.as_slice()));
                    current = &**target;
                }
                Expr::Source(entity) => break entity.clone(),
                other => {
                    return Err(Error::InvalidExpression(format!(
                        "query must start at an entity source, found {}",
                        describe(other)
                    )))
                }
            }
        };
        calls.reverse();

        let mut parsed = ParsedQuery {
            element: ElementShape::Entity(root.clone()),
            root,
            ops: Vec::new(),
            reducer: None,
        };
        // Index of the include a `ThenInclude` would extend.
        let mut last_include: Option<usize> = None;

        for (method, args) in calls {
            if let Some(reducer) = &parsed.reducer {
                return Err(Error::ReducerNotLast(reducer.kind.name().to_string()));
            }
            match method {
                Method::Where => {
                    parsed.ops.push(QueryOp::Where(lambda_arg(method, args)?));
                    last_include = None;
                }
                Method::Select => {
                    parsed.ops.push(QueryOp::Select(lambda_arg(method, args)?));
                    parsed.element = ElementShape::Projection;
                    last_include = None;
                }
                Method::Skip => {
                    parsed.ops.push(QueryOp::Skip(count_arg(method, args)?));
                    last_include = None;
                }
                Method::Take => {
                    parsed.ops.push(QueryOp::Take(count_arg(method, args)?));
                    last_include = None;
                }
                Method::Include => {
                    if parsed.element == ElementShape::Projection {
                        return Err(Error::IncludeAfterSelect);
                    }
                    parsed.ops.push(QueryOp::Include(include_path(method, args)?));
                    last_include = Some(parsed.ops.len() - 1);
                }
                Method::ThenInclude => {
                    if parsed.element == ElementShape::Projection {
                        return Err(Error::IncludeAfterSelect);
                    }
                    let Some(QueryOp::Include(base)) = last_include.and_then(|i| parsed.ops.get(i))
                    else {
                        return Err(Error::DetachedThenInclude);
                    };
                    let mut path = base.clone();
                    path.extend(include_path(method, args)?);
                    parsed.ops.push(QueryOp::Include(path));
                    last_include = Some(parsed.ops.len() - 1);
                }
                Method::IgnoreAutoIncludes
                | Method::AsNoTracking
                | Method::AsTracking
                | Method::IgnoreQueryFilters => {}
                Method::First
                | Method::FirstOrDefault
                | Method::Single
                | Method::SingleOrDefault
                | Method::Count => {
                    let kind = match method {
                        Method::First => ReducerKind::First,
                        Method::FirstOrDefault => ReducerKind::FirstOrDefault,
                        Method::Single => ReducerKind::Single,
                        Method::SingleOrDefault => ReducerKind::SingleOrDefault,
                        _ => ReducerKind::Count,
                    };
                    if let Some(predicate) = optional_lambda_arg(method, args)? {
                        parsed.ops.push(QueryOp::Where(predicate));
                    }
                    parsed.reducer = Some(Reducer {
                        kind,
                        predicate: None,
                    });
                }
                Method::Any => {
                    parsed.reducer = Some(Reducer {
                        kind: ReducerKind::Any,
                        predicate: optional_lambda_arg(method, args)?,
                    });
                }
                Method::All => {
                    parsed.reducer = Some(Reducer {
                        kind: ReducerKind::All,
                        predicate: Some(lambda_arg(method, args)?),
                    });
                }
                other => return Err(Error::UnsupportedOperator(other.name().to_string())),
            }
        }

        Ok(parsed)
    }
}

fn describe(expr: &Expr) -> &'static str {
    match expr {
        Expr::Parameter(_) => "a parameter",
        Expr::Constant(_) => "a constant",
        Expr::Member { .. } => "a member access",
        Expr::Lambda { .. } => "a lambda",
        _ => "an expression",
    }
}

fn invalid(method: &Method, expected: &str) -> Error {
    Error::InvalidArgument {
        operator: method.name().to_string(),
        expected: expected.to_string(),
    }
}

fn lambda_arg(method: &Method, args: &[Expr]) -> Result<Expr, Error> {
    match args {
        [lambda @ Expr::Lambda { .. }] => Ok(lambda.clone()),
        _ => Err(invalid(method, "a lambda")),
    }
}

fn optional_lambda_arg(method: &Method, args: &[Expr]) -> Result<Option<Expr>, Error> {
    match args {
        [] => Ok(None),
        _ => lambda_arg(method, args).map(Some),
    }
}

fn count_arg(method: &Method, args: &[Expr]) -> Result<usize, Error> {
    let [Expr::Constant(value)] = args else {
        return Err(invalid(method, "a literal integer"));
    };
    let count = value
        .as_scalar()
        .filter(|s| s.kind().is_integer())
        .and_then(|s| s.as_i128())
        .ok_or_else(|| invalid(method, "a literal integer"))?;
    if count < 0 {
        return Err(invalid(method, "a non-negative integer"));
    }
    Ok(usize::try_from(count).unwrap_or(usize::MAX))
}

/// Navigation names of an include argument: `e => e.A.B` or `"A.B"`.
fn include_path(method: &Method, args: &[Expr]) -> Result<Vec<String>, Error> {
    match args {
        [Expr::Constant(Value::String(path))] if !path.is_empty() => {
            Ok(path.split('.').map(str::to_string).collect())
        }
        [Expr::Lambda { parameter, body }] => {
            let mut names = Vec::new();
            let mut current = body.as_ref();
            loop {
                match current {
                    Expr::Member { target, member } => {
                        names.push(member.clone());
                        current = &**target;
                    }
                    Expr::Parameter(name) if name == parameter && !names.is_empty() => break,
                    _ => return Err(invalid(method, "a navigation member path")),
                }
            }
            names.reverse();
            Ok(names)
        }
        _ => Err(invalid(method, "a navigation member path")),
    }
}
