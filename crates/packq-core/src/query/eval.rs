//! In-memory expression evaluation over materialized values.

use std::borrow::Cow;

use crate::error::Error;
use packq_proto::{BinaryOp, Expr, Method, Scalar, Value};

use super::dense_string::MatchKind;
use super::materialize::NavigationSource;
use super::ops;

/// Parameter bindings visible to an expression.
#[derive(Debug, Clone, Default)]
pub struct Scope<'v> {
    bindings: Vec<(&'v str, &'v Value)>,
}

impl<'v> Scope<'v> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a parameter, shadowing earlier bindings of the same name.
    pub fn bind(mut self, name: &'v str, value: &'v Value) -> Self {
        self.bindings.push((name, value));
        self
    }

    fn lookup(&self, name: &str) -> Option<&'v Value> {
        self.bindings
            .iter()
            .rev()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
    }
}

/// Interprets expressions over entities, records and primitive values.
///
/// Member reads that hit an unloaded navigation are answered by the
/// navigation source, if one is attached.
#[derive(Clone, Copy, Default)]
pub struct Evaluator<'a> {
    navigations: Option<&'a dyn NavigationSource>,
}

impl<'a> Evaluator<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a source for unloaded navigations.
    pub fn with_navigations(mut self, navigations: &'a dyn NavigationSource) -> Self {
        self.navigations = Some(navigations);
        self
    }

    /// Apply a lambda to one argument.
    pub fn apply(&self, lambda: &Expr, argument: &Value) -> Result<Value, Error> {
        let (parameter, body) = lambda_parts(lambda)?;
        let scope = Scope::new().bind(parameter, argument);
        Ok(self.eval(body, &scope)?.into_owned())
    }

    /// Apply a predicate lambda. A null dereference does not match.
    pub fn test(&self, lambda: &Expr, argument: &Value) -> Result<bool, Error> {
        let (parameter, body) = lambda_parts(lambda)?;
        self.test_in(parameter, body, argument, &Scope::new())
    }

    /// Evaluate an expression with explicit bindings.
    pub fn eval_with(&self, expr: &Expr, bindings: &[(&str, &Value)]) -> Result<Value, Error> {
        let scope = bindings
            .iter()
            .fold(Scope::new(), |scope, (name, value)| scope.bind(name, value));
        Ok(self.eval(expr, &scope)?.into_owned())
    }

    fn test_in<'w>(
        &self,
        parameter: &'w str,
        body: &'w Expr,
        argument: &'w Value,
        outer: &Scope<'w>,
    ) -> Result<bool, Error> {
        let scope = outer.clone().bind(parameter, argument);
        match self.eval(body, &scope) {
            Ok(value) => ops::truthy(&value),
            Err(Error::NullReference(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Evaluate an expression.
    pub fn eval<'v>(&self, expr: &'v Expr, scope: &Scope<'v>) -> Result<Cow<'v, Value>, Error> {
        match expr {
            Expr::Constant(value) => Ok(Cow::Borrowed(value)),
            Expr::Parameter(name) => scope
                .lookup(name)
                .map(Cow::Borrowed)
                .ok_or_else(|| Error::InvalidExpression(format!("unbound parameter `{name}`"))),
            Expr::Source(name) => Err(Error::UnsupportedOperator(format!(
                "nested query over `{name}`"
            ))),
            Expr::Lambda { .. } => Err(Error::InvalidExpression(
                "a lambda is not a value".into(),
            )),
            Expr::Member { target, member } => {
                let target = self.eval(target, scope)?;
                self.member(target, member)
            }
            Expr::Convert { operand, kind } => {
                let value = self.eval(operand, scope)?.into_owned();
                ops::convert(value, *kind).map(Cow::Owned)
            }
            Expr::Not(operand) => match self.eval(operand, scope)?.as_ref() {
                Value::Null => Ok(Cow::Owned(Value::Null)),
                value => Ok(Cow::Owned(Value::from(!ops::truthy(value)?))),
            },
            Expr::Binary { op, left, right } => self.binary(*op, left, right, scope).map(Cow::Owned),
            Expr::Call {
                method,
                target,
                args,
            } => self.call(method, target, args, scope).map(Cow::Owned),
            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => {
                if ops::truthy(&*self.eval(test, scope)?)? {
                    self.eval(if_true, scope)
                } else {
                    self.eval(if_false, scope)
                }
            }
            Expr::New(members) => {
                let mut fields = Vec::with_capacity(members.len());
                for (name, member) in members {
                    fields.push((name.clone(), self.eval(member, scope)?.into_owned()));
                }
                Ok(Cow::Owned(Value::Record(fields)))
            }
            Expr::NewArray(items) => {
                let items = items
                    .iter()
                    .map(|item| self.eval(item, scope).map(Cow::into_owned))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Cow::Owned(Value::Array(items)))
            }
        }
    }

    fn member<'v>(&self, target: Cow<'v, Value>, member: &str) -> Result<Cow<'v, Value>, Error> {
        match target {
            Cow::Borrowed(value) => match value.field(member) {
                Some(field) => Ok(Cow::Borrowed(field)),
                None => self.unloaded_member(value, member).map(Cow::Owned),
            },
            Cow::Owned(value) => {
                if value.field(member).is_some() {
                    return Ok(Cow::Owned(value.into_field(member).unwrap_or(Value::Null)));
                }
                self.unloaded_member(&value, member).map(Cow::Owned)
            }
        }
    }

    fn unloaded_member(&self, value: &Value, member: &str) -> Result<Value, Error> {
        match value {
            Value::Null => Err(Error::NullReference(member.to_string())),
            Value::Entity(entity) => {
                if let Some(navigations) = self.navigations {
                    if let Some(loaded) = navigations.resolve(entity, member)? {
                        return Ok(loaded);
                    }
                }
                Err(Error::UnknownMember {
                    entity: entity.entity.clone(),
                    member: member.to_string(),
                })
            }
            Value::Record(_) => Err(Error::UnknownMember {
                entity: "record".into(),
                member: member.to_string(),
            }),
            Value::String(s) if member == "Length" => Ok(length(s.chars().count())),
            Value::Array(items) | Value::Collection(items) if member == "Length" || member == "Count" => {
                Ok(length(items.len()))
            }
            other => Err(Error::type_mismatch(format!(
                "{} has no member `{member}`",
                other.type_name()
            ))),
        }
    }

    fn binary<'v>(
        &self,
        op: BinaryOp,
        left: &'v Expr,
        right: &'v Expr,
        scope: &Scope<'v>,
    ) -> Result<Value, Error> {
        match op {
            BinaryOp::AndAlso => Ok(Value::from(
                ops::truthy(&*self.eval(left, scope)?)? && ops::truthy(&*self.eval(right, scope)?)?,
            )),
            BinaryOp::OrElse => Ok(Value::from(
                ops::truthy(&*self.eval(left, scope)?)? || ops::truthy(&*self.eval(right, scope)?)?,
            )),
            op if op.is_comparison() => {
                let (left, right) = (self.eval(left, scope)?, self.eval(right, scope)?);
                Ok(Value::from(ops::compare(op, &left, &right)))
            }
            op => {
                let (left, right) = (self.eval(left, scope)?, self.eval(right, scope)?);
                ops::arithmetic(op, &left, &right)
            }
        }
    }

    fn call<'v>(
        &self,
        method: &Method,
        target: &'v Expr,
        args: &'v [Expr],
        scope: &Scope<'v>,
    ) -> Result<Value, Error> {
        let receiver = self.eval(target, scope)?;
        if receiver.is_null() {
            return Err(Error::NullReference(method.name().to_string()));
        }

        match (method, receiver.as_ref(), args) {
            (Method::Contains, Value::String(s), [needle]) => {
                self.string_test(MatchKind::Contains, s, needle, scope)
            }
            (Method::StartsWith, Value::String(s), [needle]) => {
                self.string_test(MatchKind::StartsWith, s, needle, scope)
            }
            (Method::EndsWith, Value::String(s), [needle]) => {
                self.string_test(MatchKind::EndsWith, s, needle, scope)
            }
            (Method::ToUpper, Value::String(s), []) => Ok(Value::from(s.to_uppercase())),
            (Method::ToLower, Value::String(s), []) => Ok(Value::from(s.to_lowercase())),
            (Method::Trim, Value::String(s), []) => Ok(Value::from(s.trim())),
            (Method::Length, Value::String(s), []) => Ok(length(s.chars().count())),
            (method, Value::Array(items) | Value::Collection(items), args) => {
                self.sequence_call(method, items, args, scope)
            }
            (method, receiver, _) => Err(Error::UnsupportedOperator(format!(
                "{} on {}",
                method.name(),
                receiver.type_name()
            ))),
        }
    }

    fn string_test<'v>(
        &self,
        kind: MatchKind,
        haystack: &str,
        needle: &'v Expr,
        scope: &Scope<'v>,
    ) -> Result<Value, Error> {
        let needle = self.eval(needle, scope)?;
        let needle = ops::needle_text(&needle).ok_or_else(|| {
            Error::type_mismatch(format!("expected a string needle, found {}", needle.type_name()))
        })?;
        Ok(Value::from(ops::string_match(kind, haystack, &needle)))
    }

    fn sequence_call<'v>(
        &self,
        method: &Method,
        items: &[Value],
        args: &'v [Expr],
        scope: &Scope<'v>,
    ) -> Result<Value, Error> {
        match (method, args) {
            (Method::Contains, [item]) => {
                let item = self.eval(item, scope)?;
                Ok(Value::from(items.iter().any(|v| ops::values_equal(v, &item))))
            }
            (Method::Any, []) => Ok(Value::from(!items.is_empty())),
            (Method::Count, []) | (Method::Length, []) => Ok(length(items.len())),
            (Method::Any, [lambda]) => {
                let (parameter, body) = lambda_parts(lambda)?;
                for item in items {
                    if self.test_in(parameter, body, item, scope)? {
                        return Ok(Value::from(true));
                    }
                }
                Ok(Value::from(false))
            }
            (Method::All, [lambda]) => {
                let (parameter, body) = lambda_parts(lambda)?;
                for item in items {
                    if !self.test_in(parameter, body, item, scope)? {
                        return Ok(Value::from(false));
                    }
                }
                Ok(Value::from(true))
            }
            (Method::Count, [lambda]) => {
                let (parameter, body) = lambda_parts(lambda)?;
                let mut count = 0;
                for item in items {
                    if self.test_in(parameter, body, item, scope)? {
                        count += 1;
                    }
                }
                Ok(length(count))
            }
            (method, _) => Err(Error::UnsupportedOperator(format!(
                "{} on a collection",
                method.name()
            ))),
        }
    }
}

fn lambda_parts(expr: &Expr) -> Result<(&str, &Expr), Error> {
    expr.as_lambda()
        .ok_or_else(|| Error::InvalidExpression("expected a lambda".into()))
}

fn length(n: usize) -> Value {
    Value::Scalar(Scalar::I32(i32::try_from(n).unwrap_or(i32::MAX)))
}
