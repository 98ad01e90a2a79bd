//! Expression trees for queries.
//!
//! A query is an [`Expr`] whose outermost node is a chain of [`Method`]
//! calls ending at a [`Expr::Source`]. Lambdas passed to those calls are
//! ordinary sub-trees, so the same type carries both the pipeline and the
//! predicates and projections inside it.

use std::ops::Not;

use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

use crate::error::Error;
use crate::value::{ScalarKind, Value};

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, SerdeSerialize, SerdeDeserialize)]
pub enum BinaryOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    AndAlso,
    OrElse,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

impl BinaryOp {
    /// Check if this is one of the six comparison operators.
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Equal
                | BinaryOp::NotEqual
                | BinaryOp::LessThan
                | BinaryOp::LessThanOrEqual
                | BinaryOp::GreaterThan
                | BinaryOp::GreaterThanOrEqual
        )
    }

    /// Check if this is a short-circuiting logical operator.
    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::AndAlso | BinaryOp::OrElse)
    }

    /// Check if this is an arithmetic operator.
    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add
                | BinaryOp::Subtract
                | BinaryOp::Multiply
                | BinaryOp::Divide
                | BinaryOp::Modulo
        )
    }

    /// The operator that gives the same result with operands swapped.
    ///
    /// Only meaningful for comparisons; other operators are returned as is.
    pub fn flip(&self) -> BinaryOp {
        match self {
            BinaryOp::LessThan => BinaryOp::GreaterThan,
            BinaryOp::LessThanOrEqual => BinaryOp::GreaterThanOrEqual,
            BinaryOp::GreaterThan => BinaryOp::LessThan,
            BinaryOp::GreaterThanOrEqual => BinaryOp::LessThanOrEqual,
            other => *other,
        }
    }

    /// Operator symbol for diagnostics.
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::LessThan => "<",
            BinaryOp::LessThanOrEqual => "<=",
            BinaryOp::GreaterThan => ">",
            BinaryOp::GreaterThanOrEqual => ">=",
            BinaryOp::AndAlso => "&&",
            BinaryOp::OrElse => "||",
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
        }
    }
}

/// Methods that can appear in a call node.
///
/// Query operators and value methods share one namespace. `Any` and
/// `Count` are both: applied to a query they are reducers, applied to a
/// collection member they are collection tests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, SerdeSerialize, SerdeDeserialize)]
pub enum Method {
    // Query operators
    Where,
    Select,
    Skip,
    Take,
    Include,
    ThenInclude,
    IgnoreAutoIncludes,
    AsNoTracking,
    AsTracking,
    IgnoreQueryFilters,
    First,
    FirstOrDefault,
    Single,
    SingleOrDefault,
    Any,
    All,
    Count,

    // String methods
    Contains,
    StartsWith,
    EndsWith,
    ToUpper,
    ToLower,
    Trim,
    Length,

    /// Any method the engine does not know.
    Custom(String),
}

impl Method {
    /// Method name for diagnostics.
    pub fn name(&self) -> &str {
        match self {
            Method::Where => "Where",
            Method::Select => "Select",
            Method::Skip => "Skip",
            Method::Take => "Take",
            Method::Include => "Include",
            Method::ThenInclude => "ThenInclude",
            Method::IgnoreAutoIncludes => "IgnoreAutoIncludes",
            Method::AsNoTracking => "AsNoTracking",
            Method::AsTracking => "AsTracking",
            Method::IgnoreQueryFilters => "IgnoreQueryFilters",
            Method::First => "First",
            Method::FirstOrDefault => "FirstOrDefault",
            Method::Single => "Single",
            Method::SingleOrDefault => "SingleOrDefault",
            Method::Any => "Any",
            Method::All => "All",
            Method::Count => "Count",
            Method::Contains => "Contains",
            Method::StartsWith => "StartsWith",
            Method::EndsWith => "EndsWith",
            Method::ToUpper => "ToUpper",
            Method::ToLower => "ToLower",
            Method::Trim => "Trim",
            Method::Length => "Length",
            Method::Custom(name) => name,
        }
    }
}

/// An expression tree node.
#[derive(Debug, Clone, PartialEq, SerdeSerialize, SerdeDeserialize)]
pub enum Expr {
    /// The root of a query: all rows of an entity type.
    Source(String),
    /// A lambda parameter reference.
    Parameter(String),
    /// A literal value.
    Constant(Value),
    /// Member access on an entity, record, or navigation.
    Member { target: Box<Expr>, member: String },
    /// Primitive conversion.
    Convert { operand: Box<Expr>, kind: ScalarKind },
    /// Logical negation.
    Not(Box<Expr>),
    /// Binary operator.
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Method call on a target.
    Call {
        method: Method,
        target: Box<Expr>,
        args: Vec<Expr>,
    },
    /// `test ? if_true : if_false`.
    Conditional {
        test: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
    },
    /// Anonymous record construction.
    New(Vec<(String, Expr)>),
    /// Array construction.
    NewArray(Vec<Expr>),
    /// Single-parameter lambda.
    Lambda { parameter: String, body: Box<Expr> },
}

impl Expr {
    /// Create a query source for an entity type.
    pub fn source(entity: impl Into<String>) -> Self {
        Expr::Source(entity.into())
    }

    /// Create a parameter reference.
    pub fn param(name: impl Into<String>) -> Self {
        Expr::Parameter(name.into())
    }

    /// Create a literal.
    pub fn constant(value: impl Into<Value>) -> Self {
        Expr::Constant(value.into())
    }

    /// Create a null literal.
    pub fn null() -> Self {
        Expr::Constant(Value::Null)
    }

    /// Create a reference to a captured variable.
    ///
    /// Captured variables are member reads on a constant record, which is
    /// the shape closures take in expression trees.
    pub fn captured(name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        Expr::Member {
            target: Box::new(Expr::Constant(Value::Record(vec![(
                name.clone(),
                value.into(),
            )]))),
            member: name,
        }
    }

    /// Create a lambda.
    pub fn lambda(parameter: impl Into<String>, body: Expr) -> Self {
        Expr::Lambda {
            parameter: parameter.into(),
            body: Box::new(body),
        }
    }

    /// Create a binary node.
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Create a conditional node.
    pub fn conditional(test: Expr, if_true: Expr, if_false: Expr) -> Self {
        Expr::Conditional {
            test: Box::new(test),
            if_true: Box::new(if_true),
            if_false: Box::new(if_false),
        }
    }

    /// Create an anonymous record.
    pub fn record<N: Into<String>>(members: impl IntoIterator<Item = (N, Expr)>) -> Self {
        Expr::New(members.into_iter().map(|(n, e)| (n.into(), e)).collect())
    }

    /// Access a member.
    pub fn member(self, member: impl Into<String>) -> Self {
        Expr::Member {
            target: Box::new(self),
            member: member.into(),
        }
    }

    /// Convert to a primitive kind.
    pub fn convert(self, kind: ScalarKind) -> Self {
        Expr::Convert {
            operand: Box::new(self),
            kind,
        }
    }

    /// Call a method on this expression.
    pub fn call(self, method: Method, args: Vec<Expr>) -> Self {
        Expr::Call {
            method,
            target: Box::new(self),
            args,
        }
    }

    pub fn eq(self, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::Equal, self, rhs)
    }

    pub fn ne(self, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::NotEqual, self, rhs)
    }

    pub fn lt(self, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::LessThan, self, rhs)
    }

    pub fn le(self, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::LessThanOrEqual, self, rhs)
    }

    pub fn gt(self, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::GreaterThan, self, rhs)
    }

    pub fn ge(self, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::GreaterThanOrEqual, self, rhs)
    }

    pub fn and(self, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::AndAlso, self, rhs)
    }

    pub fn or(self, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::OrElse, self, rhs)
    }

    /// String `Contains`, or element membership on a collection.
    pub fn contains(self, needle: Expr) -> Self {
        self.call(Method::Contains, vec![needle])
    }

    pub fn starts_with(self, needle: Expr) -> Self {
        self.call(Method::StartsWith, vec![needle])
    }

    pub fn ends_with(self, needle: Expr) -> Self {
        self.call(Method::EndsWith, vec![needle])
    }

    /// Collection non-emptiness test.
    pub fn any(self) -> Self {
        self.call(Method::Any, Vec::new())
    }

    /// Collection existence test with a predicate lambda.
    pub fn any_where(self, lambda: Expr) -> Self {
        self.call(Method::Any, vec![lambda])
    }

    /// Collection universal test with a predicate lambda.
    pub fn all(self, lambda: Expr) -> Self {
        self.call(Method::All, vec![lambda])
    }

    /// Collection element count.
    pub fn count(self) -> Self {
        self.call(Method::Count, Vec::new())
    }

    /// Get the parameter and body if this is a lambda.
    pub fn as_lambda(&self) -> Option<(&str, &Expr)> {
        match self {
            Expr::Lambda { parameter, body } => Some((parameter, body)),
            _ => None,
        }
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(|e| Error::Deserialization(e.to_string()))
    }
}

impl Not for Expr {
    type Output = Expr;

    fn not(self) -> Self::Output {
        Expr::Not(Box::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flip_comparisons() {
        assert_eq!(BinaryOp::LessThan.flip(), BinaryOp::GreaterThan);
        assert_eq!(BinaryOp::GreaterThanOrEqual.flip(), BinaryOp::LessThanOrEqual);
        assert_eq!(BinaryOp::Equal.flip(), BinaryOp::Equal);
    }

    #[test]
    fn test_captured_shape() {
        let e = Expr::captured("threshold", 3);
        match e {
            Expr::Member { target, member } => {
                assert_eq!(member, "threshold");
                assert!(matches!(*target, Expr::Constant(Value::Record(_))));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_builder_and_not() {
        let e = !Expr::param("c").member("Level").gt(Expr::constant(3));
        match e {
            Expr::Not(inner) => assert!(matches!(
                *inner,
                Expr::Binary {
                    op: BinaryOp::GreaterThan,
                    ..
                }
            )),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_json_roundtrip() {
        let e = Expr::lambda(
            "c",
            Expr::param("c")
                .member("Name")
                .starts_with(Expr::constant("ab"))
                .and(Expr::param("c").member("Kids").any()),
        );
        let json = e.to_json().unwrap();
        assert_eq!(Expr::from_json(&json).unwrap(), e);
    }
}
