//! Fluent builder for query pipelines.

use crate::expr::{Expr, Method};

/// Builds a query expression by chaining operators onto a source.
///
/// ```
/// use packq_proto::{Expr, Query};
///
/// let query = Query::source("Creature")
///     .filter(Expr::lambda("c", Expr::param("c").member("Level").gt(Expr::constant(10))))
///     .take(5)
///     .into_expr();
/// assert!(matches!(query, Expr::Call { .. }));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    expr: Expr,
}

impl Query {
    /// Start a query over all rows of an entity type.
    pub fn source(entity: impl Into<String>) -> Self {
        Self {
            expr: Expr::source(entity),
        }
    }

    fn push(self, method: Method, args: Vec<Expr>) -> Self {
        Self {
            expr: self.expr.call(method, args),
        }
    }

    /// Apply an arbitrary operator.
    pub fn call(self, method: Method, args: Vec<Expr>) -> Self {
        self.push(method, args)
    }

    /// `Where` with a predicate lambda.
    pub fn filter(self, predicate: Expr) -> Self {
        self.push(Method::Where, vec![predicate])
    }

    /// `Select` with a projection lambda.
    pub fn select(self, projection: Expr) -> Self {
        self.push(Method::Select, vec![projection])
    }

    pub fn skip(self, count: i64) -> Self {
        self.push(Method::Skip, vec![Expr::constant(count)])
    }

    pub fn take(self, count: i64) -> Self {
        self.push(Method::Take, vec![Expr::constant(count)])
    }

    /// `Include` of a dotted navigation path such as `"Parent"` or
    /// `"Parent.Owner"`.
    pub fn include(self, path: &str) -> Self {
        self.push(Method::Include, vec![path_lambda(path)])
    }

    /// `ThenInclude` of one more navigation after an `Include`.
    pub fn then_include(self, navigation: &str) -> Self {
        self.push(Method::ThenInclude, vec![path_lambda(navigation)])
    }

    pub fn ignore_auto_includes(self) -> Self {
        self.push(Method::IgnoreAutoIncludes, Vec::new())
    }

    pub fn as_no_tracking(self) -> Self {
        self.push(Method::AsNoTracking, Vec::new())
    }

    pub fn as_tracking(self) -> Self {
        self.push(Method::AsTracking, Vec::new())
    }

    pub fn ignore_query_filters(self) -> Self {
        self.push(Method::IgnoreQueryFilters, Vec::new())
    }

    pub fn first(self) -> Self {
        self.push(Method::First, Vec::new())
    }

    pub fn first_or_default(self) -> Self {
        self.push(Method::FirstOrDefault, Vec::new())
    }

    pub fn single(self) -> Self {
        self.push(Method::Single, Vec::new())
    }

    pub fn single_or_default(self) -> Self {
        self.push(Method::SingleOrDefault, Vec::new())
    }

    pub fn any(self) -> Self {
        self.push(Method::Any, Vec::new())
    }

    pub fn any_where(self, predicate: Expr) -> Self {
        self.push(Method::Any, vec![predicate])
    }

    pub fn all(self, predicate: Expr) -> Self {
        self.push(Method::All, vec![predicate])
    }

    pub fn count(self) -> Self {
        self.push(Method::Count, Vec::new())
    }

    pub fn count_where(self, predicate: Expr) -> Self {
        self.push(Method::Count, vec![predicate])
    }

    /// Borrow the built expression.
    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Consume the builder and return the expression.
    pub fn into_expr(self) -> Expr {
        self.expr
    }
}

impl From<Query> for Expr {
    fn from(query: Query) -> Self {
        query.expr
    }
}

fn path_lambda(path: &str) -> Expr {
    let body = path
        .split('.')
        .filter(|s| !s.is_empty())
        .fold(Expr::param("e"), |acc, segment| acc.member(segment));
    Expr::lambda("e", body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_order() {
        let expr = Query::source("Item").skip(2).take(3).into_expr();
        match expr {
            Expr::Call {
                method: Method::Take,
                target,
                ..
            } => assert!(matches!(
                *target,
                Expr::Call {
                    method: Method::Skip,
                    ..
                }
            )),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_include_path_lambda() {
        let expr = Query::source("Item").include("Owner.Guild").into_expr();
        let Expr::Call { args, .. } = expr else {
            panic!("expected call");
        };
        let expected = Expr::lambda("e", Expr::param("e").member("Owner").member("Guild"));
        assert_eq!(args, vec![expected]);
    }
}
