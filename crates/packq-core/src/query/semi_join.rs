//! Semi-join compilation of navigation predicates.
//!
//! Each navigation's target table is scanned once, before the first root
//! row is produced, to collect the keys of the target rows that satisfy
//! the navigation's conditions. The compiled root predicate then only
//! tests key membership.

use std::collections::HashSet;
use std::sync::Arc;

use crate::catalog::{EntityType, JoinKind, KeyRef, NavigationJoinPlan};
use crate::config::EngineConfig;
use crate::error::Error;
use crate::storage::{Db2File, Db2FileExt, RowHandle, TableSet};
use tracing::debug;

use super::dense_string::DenseStringCacheRegistry;
use super::navigation::{NavigationCondition, NavigationPredicate};
use super::requirements::{SourceRequirements, Usage};
use super::row_compiler::{CompiledPredicate, RowCompiler, RowPredicate};

const TARGET_PARAMETER: &str = "$target";

/// Compiles conjunctions of navigation predicates into one root predicate.
pub struct SemiJoinCompiler<'a> {
    tables: &'a TableSet,
    config: &'a EngineConfig,
    strings: &'a DenseStringCacheRegistry,
}

impl<'a> SemiJoinCompiler<'a> {
    pub fn new(
        tables: &'a TableSet,
        config: &'a EngineConfig,
        strings: &'a DenseStringCacheRegistry,
    ) -> Self {
        Self {
            tables,
            config,
            strings,
        }
    }

    /// Compile the conjunction of `predicates` over rows of `root`.
    pub fn compile(
        &self,
        root: &EntityType,
        predicates: &[NavigationPredicate],
    ) -> Result<Option<CompiledPredicate>, Error> {
        if predicates.is_empty() {
            return Ok(None);
        }

        let mut groups: Vec<(Arc<NavigationJoinPlan>, Vec<&NavigationCondition>)> = Vec::new();
        for predicate in predicates {
            match groups
                .iter_mut()
                .find(|(join, _)| join.navigation == predicate.join.navigation)
            {
                Some((_, conditions)) => conditions.push(&predicate.condition),
                None => groups.push((Arc::clone(&predicate.join), vec![&predicate.condition])),
            }
        }

        let root_table = Arc::clone(self.tables.get(&root.table)?);
        let mut compiled: Option<CompiledPredicate> = None;
        for (join, conditions) in &groups {
            let Some(membership) = self.compile_navigation(&root_table, join, conditions)? else {
                return Ok(None);
            };
            compiled = Some(match compiled {
                Some(previous) => previous.and(membership),
                None => membership,
            });
        }
        Ok(compiled)
    }

    fn compile_navigation(
        &self,
        root_table: &Arc<dyn Db2File>,
        join: &Arc<NavigationJoinPlan>,
        conditions: &[&NavigationCondition],
    ) -> Result<Option<CompiledPredicate>, Error> {
        reject_virtual_key(&join.root.name, &join.root_key)?;
        reject_virtual_key(&join.target.name, &join.target_key)?;

        let negated = conditions
            .iter()
            .any(|c| matches!(c, NavigationCondition::IsNull));
        if negated && conditions.len() > 1 {
            debug!(
                navigation = %join.qualified_name(),
                "null check combined with other conditions; not pushed down"
            );
            return Ok(None);
        }

        let target_table = Arc::clone(self.tables.get(&join.target.table)?);
        let compiler = RowCompiler::new(
            &join.target,
            Arc::clone(&target_table),
            self.config,
            self.strings,
        );
        let mut tests: Vec<Option<RowPredicate>> = Vec::with_capacity(conditions.len());
        for condition in conditions {
            match condition.target_predicate(TARGET_PARAMETER) {
                None => tests.push(None),
                Some(lambda) => match compiler.compile_predicate(&lambda)? {
                    Some(compiled) => tests.push(Some(compiled.predicate)),
                    None => {
                        debug!(
                            navigation = %join.qualified_name(),
                            "target condition not compilable; not pushed down"
                        );
                        return Ok(None);
                    }
                },
            }
        }

        let keys = collect_keys(target_table.as_ref(), join, &tests)?;
        debug!(
            navigation = %join.qualified_name(),
            conditions = conditions.len(),
            target_rows = target_table.records_count(),
            keys = keys.iter().map(HashSet::len).sum::<usize>(),
            negated,
            "semi-join key set built"
        );

        let mut requirements = SourceRequirements::new();
        requirements.record(&join.root_key.field, Usage::JoinKey);
        let predicate = membership_predicate(Arc::clone(root_table), join, keys, negated);
        Ok(Some(CompiledPredicate {
            predicate,
            requirements,
        }))
    }
}

fn reject_virtual_key(entity: &str, key: &KeyRef) -> Result<(), Error> {
    if key.field.flags.is_virtual {
        return Err(Error::VirtualForeignKey {
            entity: entity.to_string(),
            field: key.field.name.clone(),
        });
    }
    Ok(())
}

/// Scan the target table once and build the key sets of every test.
///
/// Reference and dependent joins intersect the sets into one: each key
/// names a single target row or a single root. Key-array joins keep one set
/// per test, since different elements of the array may satisfy different
/// tests.
fn collect_keys(
    table: &dyn Db2File,
    join: &NavigationJoinPlan,
    tests: &[Option<RowPredicate>],
) -> Result<Vec<HashSet<i64>>, Error> {
    let mut sets: Vec<HashSet<i64>> = vec![HashSet::new(); tests.len()];
    for row in table.rows() {
        let Some(key) = table.read_key(row, &join.target_key.field)? else {
            continue;
        };
        if join.kind == JoinKind::DependentForeignKeyToPrimaryKey && key == 0 {
            continue;
        }
        for (test, set) in tests.iter().zip(sets.iter_mut()) {
            let matched = match test {
                Some(test) => test(row)?,
                None => true,
            };
            if matched {
                set.insert(key);
            }
        }
    }

    if join.kind == JoinKind::ForeignKeyArrayToPrimaryKey {
        return Ok(sets);
    }
    let mut sets = sets.into_iter();
    let first = sets.next().unwrap_or_default();
    Ok(vec![sets.fold(first, |acc, set| acc.intersection(&set).copied().collect())])
}

/// Root predicate that holds when every key set is hit.
fn membership_predicate(
    root_table: Arc<dyn Db2File>,
    join: &NavigationJoinPlan,
    sets: Vec<HashSet<i64>>,
    negated: bool,
) -> RowPredicate {
    let field = join.root_key.field.clone();
    let kind = join.kind;
    Arc::new(move |row: RowHandle| {
        let found = match kind {
            JoinKind::ForeignKeyToPrimaryKey => {
                let key = root_table.read_key(row, &field)?;
                sets.iter()
                    .all(|keys| key.is_some_and(|key| key != 0 && keys.contains(&key)))
            }
            JoinKind::SharedPrimaryKeyOneToOne | JoinKind::DependentForeignKeyToPrimaryKey => {
                let key = root_table.read_key(row, &field)?;
                sets.iter().all(|keys| key.is_some_and(|key| keys.contains(&key)))
            }
            JoinKind::ForeignKeyArrayToPrimaryKey => {
                let elements = root_table.read_key_array(row, &field)?;
                sets.iter().all(|keys| {
                    elements
                        .iter()
                        .any(|key| *key != 0 && keys.contains(key))
                })
            }
        };
        Ok(found != negated)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::navigation::NavigationTranslator;
    use crate::test_fixtures::Fixture;
    use packq_proto::Expr;

    fn compile(fixture: &Fixture, entity: &str, bodies: Vec<Expr>) -> Option<Vec<i32>> {
        let root = fixture.catalog.entity(entity).unwrap();
        let translator = NavigationTranslator::new(&fixture.catalog, root);
        let predicates: Vec<_> = bodies
            .iter()
            .map(|body| translator.translate("x", body).unwrap())
            .collect();
        let strings = DenseStringCacheRegistry::new(8);
        let compiled = SemiJoinCompiler::new(&fixture.tables, &fixture.config, &strings)
            .compile(root, &predicates)
            .unwrap()?;
        let table = fixture.table_of(entity);
        Some(
            table
                .rows()
                .filter(|row| compiled.evaluate(*row).unwrap())
                .map(|row| row.id())
                .collect(),
        )
    }

    fn nav(name: &str) -> Expr {
        Expr::param("x").member(name)
    }

    #[test]
    fn test_foreign_key_comparison() {
        let fixture = Fixture::new();
        let ids = compile(
            &fixture,
            "Child",
            vec![nav("Parent").member("Level").gt(Expr::constant(3))],
        );
        assert_eq!(ids, Some(vec![101]));
    }

    #[test]
    fn test_null_checks_treat_zero_and_dangling_as_null() {
        let fixture = Fixture::new();
        let null = compile(&fixture, "Child", vec![nav("Parent").eq(Expr::null())]);
        assert_eq!(null, Some(vec![102, 103]));
        let not_null = compile(&fixture, "Child", vec![nav("Parent").ne(Expr::null())]);
        assert_eq!(not_null, Some(vec![100, 101]));
    }

    #[test]
    fn test_null_check_with_other_condition_refuses() {
        let fixture = Fixture::new();
        let ids = compile(
            &fixture,
            "Child",
            vec![
                nav("Parent").eq(Expr::null()),
                nav("Parent").member("Level").gt(Expr::constant(0)),
            ],
        );
        assert_eq!(ids, None);
    }

    #[test]
    fn test_conditions_on_one_navigation_intersect() {
        let fixture = Fixture::new();
        let ids = compile(
            &fixture,
            "Child",
            vec![
                nav("Parent").member("Level").ge(Expr::constant(1)),
                nav("Parent").member("Name").eq(Expr::constant("p1")),
            ],
        );
        assert_eq!(ids, Some(vec![100]));
    }

    #[test]
    fn test_dependent_and_key_array_collections() {
        let fixture = Fixture::new();
        let kids = compile(&fixture, "Parent", vec![nav("Kids").any()]);
        assert_eq!(kids, Some(vec![1, 2]));

        let bravo = Expr::lambda("c", Expr::param("c").member("Name").eq(Expr::constant("bravo")));
        let kids = compile(&fixture, "Parent", vec![nav("Kids").any_where(bravo.clone())]);
        assert_eq!(kids, Some(vec![2]));

        let children = compile(&fixture, "Parent", vec![nav("Children").any_where(bravo)]);
        assert_eq!(children, Some(vec![2]));
    }

    #[test]
    fn test_key_array_conditions_match_different_elements() {
        let fixture = Fixture::new();
        let named = |name: &str| {
            nav("Children").any_where(Expr::lambda(
                "c",
                Expr::param("c").member("Name").eq(Expr::constant(name)),
            ))
        };
        let ids = compile(&fixture, "Parent", vec![named("bravo"), named("echo")]);
        assert_eq!(ids, Some(vec![2]));
        let ids = compile(&fixture, "Parent", vec![named("alpha"), named("echo")]);
        assert_eq!(ids, Some(vec![]));
    }

    #[test]
    fn test_dependent_conditions_match_different_rows() {
        let fixture = Fixture::new();
        let named = |name: &str| {
            nav("Kids").any_where(Expr::lambda(
                "c",
                Expr::param("c").member("Name").eq(Expr::constant(name)),
            ))
        };
        // Only parent 2 has kid "bravo"; nobody has both "alpha" and "bravo".
        assert_eq!(compile(&fixture, "Parent", vec![named("bravo"), nav("Kids").any()]), Some(vec![2]));
        assert_eq!(compile(&fixture, "Parent", vec![named("alpha"), named("bravo")]), Some(vec![]));
    }

    #[test]
    fn test_conditions_across_navigations_combine() {
        let fixture = Fixture::new();
        let ids = compile(
            &fixture,
            "Child",
            vec![nav("Parent").member("Level").gt(Expr::constant(3)), nav("Toys").any()],
        );
        assert_eq!(ids, Some(vec![101]));
        let ids = compile(&fixture, "Parent", vec![nav("Kids").any(), nav("Extra").ne(Expr::null())]);
        assert_eq!(ids, Some(vec![1]));
    }

    #[test]
    fn test_shared_primary_key() {
        let fixture = Fixture::new();
        let ids = compile(
            &fixture,
            "Parent",
            vec![nav("Extra").member("Motto").starts_with(Expr::constant("keep"))],
        );
        assert_eq!(ids, Some(vec![1]));
        let missing = compile(&fixture, "Parent", vec![nav("Extra").eq(Expr::null())]);
        assert_eq!(missing, Some(vec![2]));
    }

    #[test]
    fn test_uncompilable_target_condition_refuses() {
        let fixture = Fixture::new();
        let lambda = Expr::lambda("c", Expr::param("c").member("Parent").eq(Expr::null()));
        assert_eq!(compile(&fixture, "Parent", vec![nav("Kids").any_where(lambda)]), None);
    }

    #[test]
    fn test_virtual_foreign_key_is_an_error() {
        let fixture = Fixture::new();
        let root = fixture.catalog.entity("Toy").unwrap();
        let translator = NavigationTranslator::new(&fixture.catalog, root);
        let predicate = translator
            .translate("x", &nav("Owner").ne(Expr::null()))
            .unwrap();
        let strings = DenseStringCacheRegistry::new(8);
        let result = SemiJoinCompiler::new(&fixture.tables, &fixture.config, &strings)
            .compile(root, &[predicate]);
        assert!(matches!(result, Err(Error::VirtualForeignKey { .. })));
    }
}
