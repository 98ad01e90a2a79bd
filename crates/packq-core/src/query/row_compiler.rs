//! Row-level predicate and projector compilation.
//!
//! A lambda over an entity is rewritten into a closure over a row handle:
//! each member read of the lambda parameter becomes a column read on the
//! entity's table. Shapes that cannot be rewritten make the compiler return
//! `Ok(None)`, and the caller runs the lambda over materialized entities
//! instead.

use std::fmt;
use std::sync::Arc;

use crate::catalog::{ElementType, EntityType, FieldSchema, MemberType};
use crate::config::EngineConfig;
use crate::error::Error;
use crate::storage::{Db2File, ReadKind, RowHandle};
use packq_proto::{BinaryOp, Expr, Method, Scalar, Value};
use tracing::{debug, trace};

use super::dense_string::{is_indexable, DenseStringCacheRegistry, MatchKind};
use super::ops;
use super::requirements::{SourceRequirements, Usage};

/// Compiled row test.
pub type RowPredicate = Arc<dyn Fn(RowHandle) -> Result<bool, Error> + Send + Sync>;

/// Compiled row projection.
pub type RowProjector = Arc<dyn Fn(RowHandle) -> Result<Value, Error> + Send + Sync>;

/// A row predicate and the reads it performs.
#[derive(Clone)]
pub struct CompiledPredicate {
    pub predicate: RowPredicate,
    pub requirements: SourceRequirements,
}

impl CompiledPredicate {
    /// Test one row.
    pub fn evaluate(&self, row: RowHandle) -> Result<bool, Error> {
        (self.predicate)(row)
    }

    /// Conjunction of two predicates over the same table.
    pub fn and(self, other: CompiledPredicate) -> CompiledPredicate {
        let (left, right) = (self.predicate, other.predicate);
        let mut requirements = self.requirements;
        requirements.merge(&other.requirements);
        CompiledPredicate {
            predicate: Arc::new(move |row| Ok(left(row)? && right(row)?)),
            requirements,
        }
    }
}

impl fmt::Debug for CompiledPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledPredicate")
            .field("requirements", &self.requirements)
            .finish_non_exhaustive()
    }
}

/// A row projector and the reads it performs.
#[derive(Clone)]
pub struct CompiledProjector {
    pub projector: RowProjector,
    pub requirements: SourceRequirements,
}

impl CompiledProjector {
    /// Project one row.
    pub fn evaluate(&self, row: RowHandle) -> Result<Value, Error> {
        (self.projector)(row)
    }
}

impl fmt::Debug for CompiledProjector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledProjector")
            .field("requirements", &self.requirements)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Predicate,
    Projection,
}

/// Compiles lambdas over one entity type into closures over its table.
pub struct RowCompiler<'a> {
    entity: &'a EntityType,
    table: Arc<dyn Db2File>,
    config: &'a EngineConfig,
    strings: &'a DenseStringCacheRegistry,
}

impl<'a> RowCompiler<'a> {
    pub fn new(
        entity: &'a EntityType,
        table: Arc<dyn Db2File>,
        config: &'a EngineConfig,
        strings: &'a DenseStringCacheRegistry,
    ) -> Self {
        Self {
            entity,
            table,
            config,
            strings,
        }
    }

    /// Compile a predicate lambda.
    pub fn compile_predicate(&self, lambda: &Expr) -> Result<Option<CompiledPredicate>, Error> {
        match lambda.as_lambda() {
            Some((parameter, body)) => self.compile_predicate_body(parameter, body),
            None => Ok(None),
        }
    }

    /// Compile a predicate body whose parameter is `parameter`.
    pub fn compile_predicate_body(
        &self,
        parameter: &str,
        body: &Expr,
    ) -> Result<Option<CompiledPredicate>, Error> {
        let mut requirements = SourceRequirements::new();
        let Some(predicate) = self.bool_fn(parameter, body, &mut requirements)? else {
            debug!(entity = %self.entity.name, "predicate shape not supported for row pushdown");
            return Ok(None);
        };
        if requirements.has_virtual_string() {
            debug!(entity = %self.entity.name, "predicate reads a virtual string");
            return Ok(None);
        }
        trace!(entity = %self.entity.name, columns = ?requirements.columns(), "predicate compiled");
        Ok(Some(CompiledPredicate {
            predicate,
            requirements,
        }))
    }

    /// Compile a projection lambda.
    ///
    /// Only direct member reads, conversions and constants are accepted.
    pub fn compile_projector(&self, lambda: &Expr) -> Result<Option<CompiledProjector>, Error> {
        let Some((parameter, body)) = lambda.as_lambda() else {
            return Ok(None);
        };
        let mut requirements = SourceRequirements::new();
        let Some(projector) = self.value_fn(parameter, body, Mode::Projection, &mut requirements)?
        else {
            debug!(entity = %self.entity.name, "projection shape not supported for row pushdown");
            return Ok(None);
        };
        if requirements.has_virtual_string() {
            debug!(entity = %self.entity.name, "projection reads a virtual string");
            return Ok(None);
        }
        Ok(Some(CompiledProjector {
            projector,
            requirements,
        }))
    }

    fn bool_fn(
        &self,
        parameter: &str,
        expr: &Expr,
        reqs: &mut SourceRequirements,
    ) -> Result<Option<RowPredicate>, Error> {
        match expr {
            Expr::Binary { op, left, right } if op.is_comparison() => {
                let left = self.value_fn(parameter, left, Mode::Predicate, reqs)?;
                let right = self.value_fn(parameter, right, Mode::Predicate, reqs)?;
                let (Some(left), Some(right)) = (left, right) else {
                    return Ok(None);
                };
                let op = *op;
                Ok(Some(Arc::new(move |row| {
                    Ok(ops::compare(op, &left(row)?, &right(row)?))
                })))
            }
            Expr::Binary { op, left, right } if op.is_logical() => {
                let left = self.bool_fn(parameter, left, reqs)?;
                let right = self.bool_fn(parameter, right, reqs)?;
                let (Some(left), Some(right)) = (left, right) else {
                    return Ok(None);
                };
                Ok(Some(if *op == BinaryOp::AndAlso {
                    Arc::new(move |row| Ok(left(row)? && right(row)?))
                } else {
                    Arc::new(move |row| Ok(left(row)? || right(row)?))
                }))
            }
            Expr::Not(inner) => Ok(self
                .bool_fn(parameter, inner, reqs)?
                .map(|inner| -> RowPredicate { Arc::new(move |row| Ok(!inner(row)?)) })),
            Expr::Call {
                method,
                target,
                args,
            } if args.len() == 1 => match match_kind(method) {
                Some(kind) => self.string_match_fn(parameter, target, &args[0], kind, reqs),
                None => Ok(None),
            },
            Expr::Constant(Value::Scalar(Scalar::Bool(b))) => {
                let b = *b;
                Ok(Some(Arc::new(move |_| Ok(b))))
            }
            other => Ok(self
                .value_fn(parameter, other, Mode::Predicate, reqs)?
                .map(|value| -> RowPredicate { Arc::new(move |row| ops::truthy(&value(row)?)) })),
        }
    }

    fn value_fn(
        &self,
        parameter: &str,
        expr: &Expr,
        mode: Mode,
        reqs: &mut SourceRequirements,
    ) -> Result<Option<RowProjector>, Error> {
        if let Some(value) = ops::fold_constant(expr) {
            return Ok(Some(Arc::new(move |_| Ok(value.clone()))));
        }
        match expr {
            Expr::Member { target, member } if is_parameter(target, parameter) => {
                self.member_fn(member, reqs)
            }
            Expr::Convert { operand, kind } => {
                let kind = *kind;
                Ok(self
                    .value_fn(parameter, operand, mode, reqs)?
                    .map(|operand| -> RowProjector {
                        Arc::new(move |row| ops::convert(operand(row)?, kind))
                    }))
            }
            _ if mode == Mode::Predicate && is_boolean_shape(expr) => Ok(self
                .bool_fn(parameter, expr, reqs)?
                .map(|test| -> RowProjector { Arc::new(move |row| Ok(Value::from(test(row)?))) })),
            _ => Ok(None),
        }
    }

    fn member_fn(
        &self,
        member: &str,
        reqs: &mut SourceRequirements,
    ) -> Result<Option<RowProjector>, Error> {
        let Some((def, field)) = self.entity.member_field(member) else {
            return Ok(None);
        };
        let table = Arc::clone(&self.table);
        let column = field.column_index();

        match def.member_type {
            MemberType::Scalar(kind) | MemberType::Enum { underlying: kind } => {
                reqs.record(field, Usage::Scalar);
                if field.flags.is_id {
                    return Ok(Some(Arc::new(move |row| {
                        ops::convert(Value::from(row.id()), kind)
                    })));
                }
                Ok(Some(Arc::new(move |row| {
                    table.read_field(row, column, ReadKind::Scalar(kind))
                })))
            }
            MemberType::String => {
                reqs.record(field, Usage::String);
                let field = field.clone();
                Ok(Some(Arc::new(move |row| read_string(table.as_ref(), row, &field))))
            }
            MemberType::Array { element, shape } => {
                if !ops::row_array_supported(member, element, shape)? {
                    return Ok(None);
                }
                let ElementType::Scalar(kind) = element else {
                    return Ok(None);
                };
                reqs.record(field, Usage::Scalar);
                let read = ReadKind::Array {
                    element: kind,
                    len: field.element_count,
                };
                Ok(Some(Arc::new(move |row| {
                    Ok(ops::shape_collection(table.read_field(row, column, read)?, shape))
                })))
            }
        }
    }

    fn string_match_fn(
        &self,
        parameter: &str,
        target: &Expr,
        needle: &Expr,
        kind: MatchKind,
        reqs: &mut SourceRequirements,
    ) -> Result<Option<RowPredicate>, Error> {
        let Expr::Member { target, member } = target else {
            return Ok(None);
        };
        if !is_parameter(target, parameter) {
            return Ok(None);
        }
        let Some((def, field)) = self.entity.member_field(member) else {
            return Ok(None);
        };
        if def.member_type != MemberType::String {
            return Ok(None);
        }
        let Some(needle) = ops::fold_constant(needle).as_ref().and_then(ops::needle_text) else {
            return Ok(None);
        };
        reqs.record(field, Usage::String);
        if field.flags.is_virtual {
            return Ok(None);
        }

        let table = Arc::clone(&self.table);
        let column = field.column_index();
        let field = field.clone();
        let dense = self.uses_dense_index(&field, &needle);
        debug!(entity = %self.entity.name, member = %member, ?kind, dense, "string match compiled");

        if dense {
            let cache = self.strings.cache_for(table.table_id());
            let offsets =
                cache.get_or_compute(table.dense_string_table_bytes(), needle.as_bytes(), kind);
            return Ok(Some(Arc::new(move |row| {
                let offset = table
                    .as_dense_string_index()
                    .and_then(|index| index.try_get_dense_string_table_index(row, column));
                match offset {
                    Some(offset) => Ok(offsets.contains(&offset)),
                    None => direct_match(table.as_ref(), row, &field, &needle, kind),
                }
            })));
        }

        Ok(Some(Arc::new(move |row| {
            direct_match(table.as_ref(), row, &field, &needle, kind)
        })))
    }

    fn uses_dense_index(&self, field: &FieldSchema, needle: &str) -> bool {
        self.config.dense_string_index
            && !self.table.flags().is_sparse()
            && !field.flags.is_virtual
            && self.table.as_dense_string_index().is_some()
            && is_indexable(needle.as_bytes())
    }
}

/// Read a stored string column through a row handle.
///
/// Virtual strings have no stored value and fail instead of being read.
pub(crate) fn read_string(
    table: &dyn Db2File,
    row: RowHandle,
    field: &FieldSchema,
) -> Result<Value, Error> {
    if field.flags.is_virtual {
        return Err(Error::VirtualStringRead {
            field: field.name.clone(),
        });
    }
    table.read_field(row, field.column_index(), ReadKind::String)
}

fn direct_match(
    table: &dyn Db2File,
    row: RowHandle,
    field: &FieldSchema,
    needle: &str,
    kind: MatchKind,
) -> Result<bool, Error> {
    Ok(match read_string(table, row, field)? {
        Value::String(s) => ops::string_match(kind, &s, needle),
        _ => false,
    })
}

pub(crate) fn match_kind(method: &Method) -> Option<MatchKind> {
    match method {
        Method::Contains => Some(MatchKind::Contains),
        Method::StartsWith => Some(MatchKind::StartsWith),
        Method::EndsWith => Some(MatchKind::EndsWith),
        _ => None,
    }
}

pub(crate) fn is_parameter(expr: &Expr, parameter: &str) -> bool {
    matches!(expr, Expr::Parameter(name) if name == parameter)
}

fn is_boolean_shape(expr: &Expr) -> bool {
    match expr {
        Expr::Binary { op, .. } => op.is_comparison() || op.is_logical(),
        Expr::Not(_) => true,
        Expr::Call { method, args, .. } => args.len() == 1 && match_kind(method).is_some(),
        _ => false,
    }
}
