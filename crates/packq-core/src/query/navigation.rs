//! Recognizes predicates that test a related entity through a navigation.

use std::sync::Arc;

use crate::catalog::{Catalog, EntityType, MemberType, NavigationJoinPlan};
use packq_proto::{BinaryOp, Expr, Method, ScalarKind, Value};
use tracing::trace;

use super::ops;
use super::row_compiler::is_parameter;

/// String test applied to a target member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringOp {
    Equal,
    NotEqual,
    Contains,
    StartsWith,
    EndsWith,
}

/// What a navigation predicate tests on the related entity.
#[derive(Debug, Clone, PartialEq)]
pub enum NavigationCondition {
    /// `root.Nav.Member <op> value`, optionally through a conversion.
    Compare {
        member: String,
        convert: Option<ScalarKind>,
        op: BinaryOp,
        value: Value,
    },
    /// String test on `root.Nav.Member`.
    String {
        member: String,
        op: StringOp,
        value: Value,
    },
    /// `root.Nav == null`.
    IsNull,
    /// `root.Nav != null`.
    IsNotNull,
    /// `root.Nav.Any()` or `root.Nav.Any(t => ...)`.
    Any { predicate: Option<Expr> },
}

impl NavigationCondition {
    /// Target member the condition reads, if any.
    pub fn member(&self) -> Option<&str> {
        match self {
            NavigationCondition::Compare { member, .. }
            | NavigationCondition::String { member, .. } => Some(member),
            _ => None,
        }
    }

    /// Predicate over the target entity, as a lambda over `parameter`.
    ///
    /// `None` means every target row satisfies the condition.
    pub fn target_predicate(&self, parameter: &str) -> Option<Expr> {
        let read = |member: &str| Expr::param(parameter).member(member);
        let body = match self {
            NavigationCondition::Compare {
                member,
                convert,
                op,
                value,
            } => {
                let mut left = read(member);
                if let Some(kind) = convert {
                    left = left.convert(*kind);
                }
                Expr::binary(*op, left, Expr::Constant(value.clone()))
            }
            NavigationCondition::String { member, op, value } => {
                let needle = Expr::Constant(value.clone());
                match op {
                    StringOp::Equal => read(member).eq(needle),
                    StringOp::NotEqual => read(member).ne(needle),
                    StringOp::Contains => read(member).contains(needle),
                    StringOp::StartsWith => read(member).starts_with(needle),
                    StringOp::EndsWith => read(member).ends_with(needle),
                }
            }
            NavigationCondition::Any {
                predicate: Some(lambda),
            } => return Some(lambda.clone()),
            NavigationCondition::IsNull
            | NavigationCondition::IsNotNull
            | NavigationCondition::Any { predicate: None } => return None,
        };
        Some(Expr::lambda(parameter, body))
    }
}

/// A condition on the entity reached through one navigation.
#[derive(Debug, Clone)]
pub struct NavigationPredicate {
    pub join: Arc<NavigationJoinPlan>,
    pub condition: NavigationCondition,
}

impl NavigationPredicate {
    /// Navigation member name.
    pub fn navigation(&self) -> &str {
        &self.join.navigation
    }
}

/// Matches predicate bodies against navigation shapes.
///
/// Anything that does not match returns `None`; translation never fails.
pub struct NavigationTranslator<'a> {
    catalog: &'a Catalog,
    entity: &'a EntityType,
}

impl<'a> NavigationTranslator<'a> {
    pub fn new(catalog: &'a Catalog, entity: &'a EntityType) -> Self {
        Self { catalog, entity }
    }

    /// Translate one predicate over `parameter`.
    pub fn translate(&self, parameter: &str, expr: &Expr) -> Option<NavigationPredicate> {
        let translated = match expr {
            Expr::Binary { op, left, right } if op.is_comparison() => self
                .comparison(parameter, *op, left, right)
                .or_else(|| self.comparison(parameter, op.flip(), right, left)),
            Expr::Call {
                method: Method::Any,
                target,
                args,
            } => self.any(parameter, target, args),
            Expr::Call {
                method,
                target,
                args,
            } if args.len() == 1 => self.string_call(parameter, method, target, &args[0]),
            _ => None,
        };
        if let Some(predicate) = &translated {
            trace!(
                entity = %self.entity.name,
                navigation = predicate.navigation(),
                condition = ?predicate.condition,
                "navigation predicate matched"
            );
        }
        translated
    }

    fn comparison(
        &self,
        parameter: &str,
        op: BinaryOp,
        nav_side: &Expr,
        value_side: &Expr,
    ) -> Option<NavigationPredicate> {
        if let Some(join) = self.navigation_of(parameter, nav_side) {
            if join.is_collection() || !matches!(ops::fold_constant(value_side), Some(Value::Null)) {
                return None;
            }
            let condition = match op {
                BinaryOp::Equal => NavigationCondition::IsNull,
                BinaryOp::NotEqual => NavigationCondition::IsNotNull,
                _ => return None,
            };
            return Some(NavigationPredicate { join, condition });
        }

        if let Expr::Call {
            method: Method::Count,
            target,
            args,
        } = nav_side
        {
            let join = self.navigation_of(parameter, target)?;
            let bound = ops::fold_constant(value_side)?.as_key()?;
            let non_empty = matches!(
                (op, bound),
                (BinaryOp::GreaterThan, 0) | (BinaryOp::GreaterThanOrEqual, 1) | (BinaryOp::NotEqual, 0)
            );
            if !args.is_empty() || !join.is_collection() || !non_empty {
                return None;
            }
            return Some(NavigationPredicate {
                join,
                condition: NavigationCondition::Any { predicate: None },
            });
        }

        let (join, member, convert) = self.navigation_member(parameter, nav_side)?;
        let value = ops::fold_constant(value_side)?;
        let target = &join.target;
        let condition = match target.member(&member)?.member_type {
            MemberType::String => {
                let op = match op {
                    BinaryOp::Equal => StringOp::Equal,
                    BinaryOp::NotEqual => StringOp::NotEqual,
                    _ => return None,
                };
                if convert.is_some() || !matches!(value, Value::String(_) | Value::Char(_)) {
                    return None;
                }
                NavigationCondition::String { member, op, value }
            }
            MemberType::Scalar(_) | MemberType::Enum { .. } => {
                value.as_scalar()?;
                NavigationCondition::Compare {
                    member,
                    convert,
                    op,
                    value,
                }
            }
            MemberType::Array { .. } => return None,
        };
        Some(NavigationPredicate { join, condition })
    }

    fn any(&self, parameter: &str, target: &Expr, args: &[Expr]) -> Option<NavigationPredicate> {
        let join = self.navigation_of(parameter, target)?;
        if !join.is_collection() {
            return None;
        }
        let predicate = match args {
            [] => None,
            [lambda] => {
                lambda.as_lambda()?;
                Some(lambda.clone())
            }
            _ => return None,
        };
        Some(NavigationPredicate {
            join,
            condition: NavigationCondition::Any { predicate },
        })
    }

    fn string_call(
        &self,
        parameter: &str,
        method: &Method,
        target: &Expr,
        needle: &Expr,
    ) -> Option<NavigationPredicate> {
        let op = match method {
            Method::Contains => StringOp::Contains,
            Method::StartsWith => StringOp::StartsWith,
            Method::EndsWith => StringOp::EndsWith,
            _ => return None,
        };
        let (join, member, convert) = self.navigation_member(parameter, target)?;
        if convert.is_some() || join.target.member(&member)?.member_type != MemberType::String {
            return None;
        }
        let value = ops::fold_constant(needle)?;
        ops::needle_text(&value)?;
        Some(NavigationPredicate {
            join,
            condition: NavigationCondition::String { member, op, value },
        })
    }

    /// `parameter.Nav`, for a navigation of the root entity.
    fn navigation_of(&self, parameter: &str, expr: &Expr) -> Option<Arc<NavigationJoinPlan>> {
        match expr {
            Expr::Member { target, member } if is_parameter(target, parameter) => self
                .catalog
                .join_plan(&self.entity.name, member)
                .map(Arc::clone),
            _ => None,
        }
    }

    /// `parameter.Nav.Member`, optionally converted, through a reference navigation.
    fn navigation_member(
        &self,
        parameter: &str,
        expr: &Expr,
    ) -> Option<(Arc<NavigationJoinPlan>, String, Option<ScalarKind>)> {
        let (expr, convert) = match expr {
            Expr::Convert { operand, kind } => (operand.as_ref(), Some(*kind)),
            other => (other, None),
        };
        let Expr::Member { target, member } = expr else {
            return None;
        };
        let join = self.navigation_of(parameter, target)?;
        if join.is_collection() {
            return None;
        }
        join.target.member(member)?;
        Some((join, member.clone(), convert))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::Fixture;

    fn translate(fixture: &Fixture, entity: &str, body: Expr) -> Option<NavigationPredicate> {
        let entity = fixture.catalog.entity(entity).unwrap();
        NavigationTranslator::new(&fixture.catalog, entity).translate("x", &body)
    }

    fn nav(name: &str) -> Expr {
        Expr::param("x").member(name)
    }

    #[test]
    fn test_scalar_comparison_both_orders() {
        let fixture = Fixture::new();
        let direct = translate(&fixture, "Child", nav("Parent").member("Level").gt(Expr::constant(3)))
            .unwrap();
        assert_eq!(direct.navigation(), "Parent");
        assert!(matches!(
            direct.condition,
            NavigationCondition::Compare { op: BinaryOp::GreaterThan, .. }
        ));

        let flipped = translate(&fixture, "Child", Expr::constant(3).lt(nav("Parent").member("Level")))
            .unwrap();
        assert_eq!(flipped.condition, direct.condition);
    }

    #[test]
    fn test_captured_value_and_conversion() {
        let fixture = Fixture::new();
        let body = nav("Parent")
            .member("Level")
            .convert(ScalarKind::I64)
            .le(Expr::captured("limit", 9i64));
        let predicate = translate(&fixture, "Child", body).unwrap();
        assert_eq!(
            predicate.condition,
            NavigationCondition::Compare {
                member: "Level".into(),
                convert: Some(ScalarKind::I64),
                op: BinaryOp::LessThanOrEqual,
                value: Value::from(9i64),
            }
        );
    }

    #[test]
    fn test_null_checks() {
        let fixture = Fixture::new();
        let is_null = translate(&fixture, "Child", nav("Parent").eq(Expr::null())).unwrap();
        assert_eq!(is_null.condition, NavigationCondition::IsNull);
        let not_null = translate(&fixture, "Child", Expr::null().ne(nav("Parent"))).unwrap();
        assert_eq!(not_null.condition, NavigationCondition::IsNotNull);
        assert!(translate(&fixture, "Parent", nav("Kids").eq(Expr::null())).is_none());
    }

    #[test]
    fn test_string_conditions() {
        let fixture = Fixture::new();
        let eq = translate(&fixture, "Child", nav("Parent").member("Name").eq(Expr::constant("p1")))
            .unwrap();
        assert!(matches!(
            eq.condition,
            NavigationCondition::String { op: StringOp::Equal, .. }
        ));

        let starts = translate(
            &fixture,
            "Child",
            nav("Parent").member("Name").starts_with(Expr::constant('p')),
        )
        .unwrap();
        assert_eq!(starts.condition.member(), Some("Name"));

        let ordered = nav("Parent").member("Name").gt(Expr::constant("p"));
        assert!(translate(&fixture, "Child", ordered).is_none());
    }

    #[test]
    fn test_count_normalizes_to_any() {
        let fixture = Fixture::new();
        let forms = [
            nav("Kids").count().gt(Expr::constant(0)),
            nav("Kids").count().ge(Expr::constant(1)),
            nav("Kids").count().ne(Expr::constant(0)),
            Expr::constant(0).lt(nav("Kids").count()),
            Expr::constant(1).le(nav("Kids").count()),
            Expr::constant(0).ne(nav("Kids").count()),
        ];
        for body in forms {
            let predicate = translate(&fixture, "Parent", body.clone())
                .unwrap_or_else(|| panic!("{body:?}"));
            assert_eq!(predicate.condition, NavigationCondition::Any { predicate: None });
        }
        assert!(translate(&fixture, "Parent", nav("Kids").count().gt(Expr::constant(1))).is_none());
        assert!(translate(&fixture, "Parent", nav("Kids").count().eq(Expr::constant(0))).is_none());
    }

    #[test]
    fn test_any_forms() {
        let fixture = Fixture::new();
        let plain = translate(&fixture, "Parent", nav("Children").any()).unwrap();
        assert_eq!(plain.condition, NavigationCondition::Any { predicate: None });

        let lambda = Expr::lambda("c", Expr::param("c").member("Name").eq(Expr::constant("bravo")));
        let with_predicate = translate(&fixture, "Parent", nav("Kids").any_where(lambda.clone())).unwrap();
        assert_eq!(
            with_predicate.condition.target_predicate("t"),
            Some(lambda)
        );
        assert!(translate(&fixture, "Child", nav("Parent").any()).is_none());
    }

    #[test]
    fn test_non_matches() {
        let fixture = Fixture::new();
        assert!(translate(&fixture, "Child", nav("Name").eq(Expr::constant("a"))).is_none());
        assert!(translate(&fixture, "Child", nav("Parent").member("Nope").eq(Expr::constant(1))).is_none());
        assert!(translate(&fixture, "Parent", nav("Kids").member("Name").eq(Expr::constant("a"))).is_none());
        let two_sided = nav("Parent").member("Level").eq(Expr::param("x").member("Id"));
        assert!(translate(&fixture, "Child", two_sided).is_none());
    }

    #[test]
    fn test_target_predicate_shape() {
        let condition = NavigationCondition::String {
            member: "Name".into(),
            op: StringOp::EndsWith,
            value: Value::from("a"),
        };
        assert_eq!(
            condition.target_predicate("t"),
            Some(Expr::lambda(
                "t",
                Expr::param("t").member("Name").ends_with(Expr::constant("a"))
            ))
        );
        assert_eq!(NavigationCondition::IsNull.target_predicate("t"), None);
    }
}
