//! Batched navigation loading for materialized pages.
//!
//! Both include chains and projections that read through reference
//! navigations load related rows per page, with one scan of the related
//! table per navigation instead of one lookup per root.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::catalog::{Catalog, CollectionShape, EntityType, JoinKind, MemberDef, MemberType, NavigationJoinPlan};
use crate::error::Error;
use crate::storage::{Db2File, Db2FileExt, RowHandle, TableSet};
use packq_proto::{Entity, Expr, Value};
use tracing::debug;

use super::eval::Evaluator;
use super::materialize::{read_member, shape_navigation, EntityFactory, Materializer};
use super::ops;
use super::row_compiler::is_parameter;

/// Validated include paths of one root entity type.
#[derive(Debug, Clone, Default)]
pub struct IncludePlan {
    paths: Vec<Vec<Arc<NavigationJoinPlan>>>,
}

impl IncludePlan {
    /// Distinct navigation paths, shallow first.
    pub fn paths(&self) -> impl Iterator<Item = &[Arc<NavigationJoinPlan>]> {
        self.paths.iter().map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Loads include chains into pages of materialized entities.
pub struct IncludeExecutor<'a> {
    catalog: &'a Catalog,
    tables: &'a TableSet,
    factory: &'a dyn EntityFactory,
}

impl<'a> IncludeExecutor<'a> {
    pub fn new(catalog: &'a Catalog, tables: &'a TableSet, factory: &'a dyn EntityFactory) -> Self {
        Self {
            catalog,
            tables,
            factory,
        }
    }

    /// Resolve and validate include chains of navigation names.
    pub fn plan(&self, root: &EntityType, chains: &[Vec<String>]) -> Result<IncludePlan, Error> {
        let mut paths: Vec<Vec<Arc<NavigationJoinPlan>>> = Vec::new();
        let mut seen: HashSet<Vec<String>> = HashSet::new();

        for chain in chains {
            let mut entity = root.name.as_str();
            let mut path = Vec::with_capacity(chain.len());
            for navigation in chain {
                let join = self.catalog.join_plan(entity, navigation).ok_or_else(|| {
                    Error::UnknownMember {
                        entity: entity.to_string(),
                        member: navigation.clone(),
                    }
                })?;
                if join.is_collection() && join.shape != Some(CollectionShape::ReadOnlyCollection) {
                    return Err(Error::InvalidNavigationShape {
                        entity: entity.to_string(),
                        navigation: navigation.clone(),
                        expected: format!("a read-only collection of `{}`", join.target.name),
                    });
                }
                path.push(Arc::clone(join));
                entity = join.target.name.as_str();

                let names: Vec<String> = path.iter().map(|j| j.navigation.clone()).collect();
                if seen.insert(names) {
                    paths.push(path.clone());
                }
            }
        }

        paths.sort_by_key(Vec::len);
        Ok(IncludePlan { paths })
    }

    /// Load every path of `plan` into `page`.
    pub fn apply(&self, plan: &IncludePlan, page: &mut [Entity]) -> Result<(), Error> {
        for path in plan.paths() {
            let Some((last, prefix)) = path.split_last() else {
                continue;
            };
            let mut reached = holders(page.iter_mut().collect(), prefix);
            self.load(last, &mut reached)?;
        }
        Ok(())
    }

    fn load(&self, join: &NavigationJoinPlan, holders: &mut [&mut Entity]) -> Result<(), Error> {
        let mut keys: HashSet<i64> = HashSet::new();
        for holder in holders.iter() {
            keys.extend(root_keys(holder, join));
        }

        let mut loaded: HashMap<i64, Vec<Value>> = HashMap::new();
        if !keys.is_empty() {
            let table = self.tables.get(&join.target.table)?;
            let materializer = Materializer::new(&join.target, table.as_ref(), self.factory);
            for row in table.rows() {
                let Some(key) = table.read_key(row, &join.target_key.field)? else {
                    continue;
                };
                if keys.contains(&key) {
                    let entity = materializer.materialize(row)?;
                    loaded.entry(key).or_default().push(Value::from(entity));
                }
            }
        }
        debug!(
            navigation = %join.qualified_name(),
            roots = holders.len(),
            keys = keys.len(),
            matched = loaded.values().map(Vec::len).sum::<usize>(),
            "include loaded"
        );

        for holder in holders.iter_mut() {
            let value = match join.kind {
                JoinKind::ForeignKeyToPrimaryKey | JoinKind::SharedPrimaryKeyOneToOne => root_keys(holder, join)
                    .first()
                    .and_then(|key| loaded.get(key))
                    .and_then(|found| found.first().cloned())
                    .unwrap_or(Value::Null),
                JoinKind::ForeignKeyArrayToPrimaryKey => {
                    let items = root_keys(holder, join)
                        .iter()
                        .filter_map(|key| loaded.get(key).and_then(|found| found.first().cloned()))
                        .collect();
                    shape_navigation(items, join)
                }
                JoinKind::DependentForeignKeyToPrimaryKey => {
                    let items = root_keys(holder, join)
                        .first()
                        .and_then(|key| loaded.get(key))
                        .cloned()
                        .unwrap_or_default();
                    shape_navigation(items, join)
                }
            };
            holder.set(join.navigation.clone(), value);
        }
        Ok(())
    }
}

/// Entities reached from `level` by following already loaded navigations.
fn holders<'e>(
    mut level: Vec<&'e mut Entity>,
    prefix: &[Arc<NavigationJoinPlan>],
) -> Vec<&'e mut Entity> {
    for join in prefix {
        let mut next = Vec::new();
        for entity in level {
            match entity.get_mut(&join.navigation) {
                Some(Value::Entity(child)) => next.push(&mut **child),
                Some(Value::Array(items) | Value::Collection(items)) => {
                    next.extend(items.iter_mut().filter_map(|item| match item {
                        Value::Entity(child) => Some(&mut **child),
                        _ => None,
                    }))
                }
                _ => {}
            }
        }
        level = next;
    }
    level
}

/// Keys a root entity joins on, in declaration order, without zeros.
fn root_keys(entity: &Entity, join: &NavigationJoinPlan) -> Vec<i64> {
    match entity.get(&join.root_key.member) {
        Some(Value::Array(items) | Value::Collection(items)) => items
            .iter()
            .filter_map(Value::as_key)
            .filter(|key| *key != 0)
            .collect(),
        Some(value) => value.as_key().filter(|key| *key != 0).into_iter().collect(),
        None => Vec::new(),
    }
}

#[derive(Debug, Clone)]
struct BoundRead {
    parameter: String,
    navigation: usize,
    member: MemberDef,
}

/// A projection whose reads through reference navigations are answered
/// per page instead of per root.
///
/// Each `root.Nav.Member` in the projection body becomes a bound parameter
/// holding the member of the related row, or the member's default value
/// when the root has no related row.
#[derive(Debug, Clone)]
pub struct BatchedProjection {
    parameter: String,
    body: Expr,
    navigations: Vec<Arc<NavigationJoinPlan>>,
    reads: Vec<BoundRead>,
}

impl BatchedProjection {
    /// Plan a batched projection of `lambda` over `root`.
    ///
    /// Returns `Ok(None)` when the projection reads no navigation member,
    /// uses a navigation in any other way, or reads a virtual string.
    pub fn plan(catalog: &Catalog, root: &EntityType, lambda: &Expr) -> Result<Option<Self>, Error> {
        let Some((parameter, body)) = lambda.as_lambda() else {
            return Ok(None);
        };
        let mut rewriter = Rewriter {
            catalog,
            root,
            parameter,
            navigations: Vec::new(),
            reads: Vec::new(),
        };
        let Some(body) = rewriter.rewrite(body)? else {
            debug!(entity = %root.name, "projection not batchable");
            return Ok(None);
        };
        if rewriter.reads.is_empty() {
            return Ok(None);
        }
        debug!(
            entity = %root.name,
            navigations = rewriter.navigations.len(),
            reads = rewriter.reads.len(),
            "batched projection planned"
        );
        Ok(Some(Self {
            parameter: parameter.to_string(),
            body,
            navigations: rewriter.navigations,
            reads: rewriter.reads,
        }))
    }

    /// Project a page of roots with one scan per navigation.
    pub fn project_page(
        &self,
        tables: &TableSet,
        evaluator: &Evaluator<'_>,
        page: &[Entity],
    ) -> Result<Vec<Value>, Error> {
        // Per navigation: related key -> member values in `reads` order.
        let mut found: Vec<HashMap<i64, Vec<Value>>> = Vec::with_capacity(self.navigations.len());
        for (index, join) in self.navigations.iter().enumerate() {
            let keys: HashSet<i64> = page
                .iter()
                .flat_map(|root| root_keys(root, join).into_iter().take(1))
                .collect();
            let reads: Vec<&BoundRead> = self.reads.iter().filter(|r| r.navigation == index).collect();
            let mut values = HashMap::with_capacity(keys.len());
            if !keys.is_empty() {
                let table = tables.get(&join.target.table)?;
                for row in table.rows() {
                    match table.read_key(row, &join.target_key.field)? {
                        Some(key) if keys.contains(&key) && !values.contains_key(&key) => {
                            let row_values = reads
                                .iter()
                                .map(|read| read_bound(table.as_ref(), row, &join.target, &read.member))
                                .collect::<Result<Vec<_>, _>>()?;
                            values.insert(key, row_values);
                        }
                        _ => {}
                    }
                }
            }
            debug!(
                navigation = %join.qualified_name(),
                roots = page.len(),
                keys = keys.len(),
                found = values.len(),
                "projection navigation scanned"
            );
            found.push(values);
        }

        let mut out = Vec::with_capacity(page.len());
        for root in page {
            let root_value = Value::from(root.clone());
            let mut bound: Vec<Value> = Vec::with_capacity(self.reads.len());
            let mut positions = vec![0usize; self.navigations.len()];
            for read in &self.reads {
                let join = &self.navigations[read.navigation];
                let position = positions[read.navigation];
                positions[read.navigation] += 1;
                let value = root_keys(root, join)
                    .first()
                    .and_then(|key| found[read.navigation].get(key))
                    .and_then(|values| values.get(position).cloned())
                    .unwrap_or_else(|| ops::default_value(&read.member.member_type));
                bound.push(value);
            }

            let mut bindings: Vec<(&str, &Value)> = Vec::with_capacity(self.reads.len() + 1);
            bindings.push((self.parameter.as_str(), &root_value));
            for (read, value) in self.reads.iter().zip(&bound) {
                bindings.push((read.parameter.as_str(), value));
            }
            out.push(evaluator.eval_with(&self.body, &bindings)?);
        }
        Ok(out)
    }
}

fn read_bound(
    table: &dyn Db2File,
    row: RowHandle,
    target: &EntityType,
    member: &MemberDef,
) -> Result<Value, Error> {
    let field = target.field(&member.name).ok_or_else(|| Error::UnknownMember {
        entity: target.name.clone(),
        member: member.name.clone(),
    })?;
    read_member(table, row, member, field)
}

struct Rewriter<'a> {
    catalog: &'a Catalog,
    root: &'a EntityType,
    parameter: &'a str,
    navigations: Vec<Arc<NavigationJoinPlan>>,
    reads: Vec<BoundRead>,
}

impl Rewriter<'_> {
    fn rewrite(&mut self, expr: &Expr) -> Result<Option<Expr>, Error> {
        if let Expr::Member { target, member } = expr {
            if let Expr::Member {
                target: inner,
                member: navigation,
            } = target.as_ref()
            {
                if is_parameter(inner, self.parameter) {
                    if let Some(join) = self.catalog.join_plan(&self.root.name, navigation) {
                        return self.bind(join, member);
                    }
                }
            }
            if is_parameter(target, self.parameter)
                && self.catalog.join_plan(&self.root.name, member).is_some()
            {
                return Ok(None);
            }
        }

        Ok(Some(match expr {
            Expr::Source(_) | Expr::Parameter(_) | Expr::Constant(_) => expr.clone(),
            Expr::Member { target, member } => {
                let Some(target) = self.rewrite(target)? else {
                    return Ok(None);
                };
                target.member(member.clone())
            }
            Expr::Convert { operand, kind } => {
                let Some(operand) = self.rewrite(operand)? else {
                    return Ok(None);
                };
                operand.convert(*kind)
            }
            Expr::Not(operand) => {
                let Some(operand) = self.rewrite(operand)? else {
                    return Ok(None);
                };
                !operand
            }
            Expr::Binary { op, left, right } => {
                let (Some(left), Some(right)) = (self.rewrite(left)?, self.rewrite(right)?) else {
                    return Ok(None);
                };
                Expr::binary(*op, left, right)
            }
            Expr::Call {
                method,
                target,
                args,
            } => {
                let Some(target) = self.rewrite(target)? else {
                    return Ok(None);
                };
                let Some(args) = self.rewrite_all(args)? else {
                    return Ok(None);
                };
                target.call(method.clone(), args)
            }
            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => {
                let (Some(test), Some(if_true), Some(if_false)) = (
                    self.rewrite(test)?,
                    self.rewrite(if_true)?,
                    self.rewrite(if_false)?,
                ) else {
                    return Ok(None);
                };
                Expr::conditional(test, if_true, if_false)
            }
            Expr::New(members) => {
                let mut out = Vec::with_capacity(members.len());
                for (name, member) in members {
                    let Some(member) = self.rewrite(member)? else {
                        return Ok(None);
                    };
                    out.push((name.clone(), member));
                }
                Expr::New(out)
            }
            Expr::NewArray(items) => {
                let Some(items) = self.rewrite_all(items)? else {
                    return Ok(None);
                };
                Expr::NewArray(items)
            }
            Expr::Lambda { parameter, body } => {
                if parameter == self.parameter {
                    expr.clone()
                } else {
                    let Some(body) = self.rewrite(body)? else {
                        return Ok(None);
                    };
                    Expr::lambda(parameter.clone(), body)
                }
            }
        }))
    }

    fn rewrite_all(&mut self, exprs: &[Expr]) -> Result<Option<Vec<Expr>>, Error> {
        let mut out = Vec::with_capacity(exprs.len());
        for expr in exprs {
            match self.rewrite(expr)? {
                Some(expr) => out.push(expr),
                None => return Ok(None),
            }
        }
        Ok(Some(out))
    }

    fn bind(&mut self, join: &Arc<NavigationJoinPlan>, member: &str) -> Result<Option<Expr>, Error> {
        if join.is_collection() {
            return Ok(None);
        }
        let Some((def, field)) = join.target.member_field(member) else {
            return Ok(None);
        };
        match def.member_type {
            MemberType::String if field.flags.is_virtual => return Ok(None),
            MemberType::Array { element, shape } => {
                if !ops::row_array_supported(member, element, shape)? {
                    return Ok(None);
                }
            }
            _ => {}
        }

        let name = format!("${}.{}", join.navigation, member);
        if !self.reads.iter().any(|r| r.parameter == name) {
            let navigation = match self
                .navigations
                .iter()
                .position(|j| j.navigation == join.navigation)
            {
                Some(index) => index,
                None => {
                    self.navigations.push(Arc::clone(join));
                    self.navigations.len() - 1
                }
            };
            self.reads.push(BoundRead {
                parameter: name.clone(),
                navigation,
                member: def.clone(),
            });
        }
        Ok(Some(Expr::Parameter(name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::materialize::DefaultEntityFactory;
    use crate::test_fixtures::Fixture;

    fn roots(fixture: &Fixture, entity: &str) -> Vec<Entity> {
        let entity_type = fixture.catalog.entity(entity).unwrap();
        let table = fixture.table_of(entity);
        let materializer = Materializer::new(entity_type, table.as_ref(), &DefaultEntityFactory);
        table
            .rows()
            .map(|row| materializer.materialize(row).unwrap())
            .collect()
    }

    fn chain(path: &str) -> Vec<String> {
        path.split('.').map(str::to_string).collect()
    }

    fn ids(value: &Value) -> Vec<i64> {
        value
            .elements()
            .unwrap()
            .iter()
            .map(|v| v.field("Id").and_then(Value::as_key).unwrap())
            .collect()
    }

    #[test]
    fn test_plan_dedups_prefixes_shallow_first() {
        let fixture = Fixture::new();
        let executor = IncludeExecutor::new(&fixture.catalog, &fixture.tables, &DefaultEntityFactory);
        let root = fixture.catalog.entity("Child").unwrap();
        let plan = executor
            .plan(root, &[chain("Parent.Kids"), chain("Parent")])
            .unwrap();
        let names: Vec<Vec<&str>> = plan
            .paths()
            .map(|p| p.iter().map(|j| j.navigation.as_str()).collect())
            .collect();
        assert_eq!(names, vec![vec!["Parent"], vec!["Parent", "Kids"]]);
    }

    #[test]
    fn test_plan_rejects_list_collections() {
        let fixture = Fixture::new();
        let executor = IncludeExecutor::new(&fixture.catalog, &fixture.tables, &DefaultEntityFactory);
        let root = fixture.catalog.entity("Child").unwrap();
        let err = executor.plan(root, &[chain("Toys")]).unwrap_err();
        assert!(err.to_string().contains("must be declared as a read-only collection of `Toy`"));
        assert!(matches!(
            executor.plan(root, &[chain("Nope")]),
            Err(Error::UnknownMember { .. })
        ));
    }

    #[test]
    fn test_include_references_and_nested_collections() {
        let fixture = Fixture::new();
        let executor = IncludeExecutor::new(&fixture.catalog, &fixture.tables, &DefaultEntityFactory);
        let root = fixture.catalog.entity("Child").unwrap();
        let plan = executor.plan(root, &[chain("Parent.Kids")]).unwrap();
        let mut page = roots(&fixture, "Child");
        executor.apply(&plan, &mut page).unwrap();

        let parent = page[0].get("Parent").unwrap();
        assert_eq!(parent.field("Level"), Some(&Value::from(1)));
        assert_eq!(ids(parent.field("Kids").unwrap()), vec![100]);
        assert_eq!(page[2].get("Parent"), Some(&Value::Null));
        assert_eq!(page[3].get("Parent"), Some(&Value::Null));
    }

    #[test]
    fn test_include_key_array_order_and_missing_keys() {
        let fixture = Fixture::new();
        let executor = IncludeExecutor::new(&fixture.catalog, &fixture.tables, &DefaultEntityFactory);
        let root = fixture.catalog.entity("Parent").unwrap();
        let plan = executor.plan(root, &[chain("Children"), chain("Kids")]).unwrap();
        let mut page = roots(&fixture, "Parent");
        executor.apply(&plan, &mut page).unwrap();

        assert_eq!(ids(page[0].get("Children").unwrap()), vec![100]);
        assert_eq!(ids(page[1].get("Children").unwrap()), vec![101, 102]);
        assert!(matches!(page[1].get("Kids"), Some(Value::Collection(_))));
        assert_eq!(ids(page[1].get("Kids").unwrap()), vec![101]);
    }

    #[test]
    fn test_batched_projection_binds_defaults() {
        let fixture = Fixture::new();
        let root = fixture.catalog.entity("Child").unwrap();
        let lambda = Expr::lambda(
            "c",
            Expr::record([
                ("Id", Expr::param("c").member("Id")),
                ("Level", Expr::param("c").member("Parent").member("Level")),
                ("ParentName", Expr::param("c").member("Parent").member("Name")),
            ]),
        );
        let batched = BatchedProjection::plan(&fixture.catalog, root, &lambda)
            .unwrap()
            .unwrap();
        let page = roots(&fixture, "Child");
        let rows = batched
            .project_page(&fixture.tables, &Evaluator::new(), &page)
            .unwrap();

        let levels: Vec<_> = rows.iter().map(|r| r.field("Level").cloned().unwrap()).collect();
        assert_eq!(
            levels,
            vec![Value::from(1), Value::from(5), Value::from(0), Value::from(0)]
        );
        assert_eq!(rows[0].field("ParentName"), Some(&Value::from("p1")));
        assert_eq!(rows[2].field("ParentName"), Some(&Value::Null));
    }

    #[test]
    fn test_batched_projection_refusals() {
        let fixture = Fixture::new();
        let child = fixture.catalog.entity("Child").unwrap();
        let whole = Expr::lambda("c", Expr::param("c").member("Parent"));
        assert!(BatchedProjection::plan(&fixture.catalog, child, &whole).unwrap().is_none());
        let plain = Expr::lambda("c", Expr::param("c").member("Name"));
        assert!(BatchedProjection::plan(&fixture.catalog, child, &plain).unwrap().is_none());

        let toy = fixture.catalog.entity("Toy").unwrap();
        let virtual_string = Expr::lambda("t", Expr::param("t").member("Owner").member("Title"));
        assert!(BatchedProjection::plan(&fixture.catalog, toy, &virtual_string)
            .unwrap()
            .is_none());

        let extra = fixture.catalog.entity("ParentExtra").unwrap();
        let strings = Expr::lambda("e", Expr::param("e").member("Owner").member("Mottos"));
        assert!(matches!(
            BatchedProjection::plan(&fixture.catalog, extra, &strings),
            Err(Error::StringArrayCollection { .. })
        ));
    }
}
