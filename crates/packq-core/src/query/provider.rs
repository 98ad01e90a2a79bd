//! Query provider: plans operator chains and runs them over packed tables.
//!
//! Execution picks, per query, the most restrictive of three strategies:
//!
//! - [`ExecutionStrategy::RowPruned`]: predicates, projection and reducer
//!   all run against row handles; no entity is created.
//! - [`ExecutionStrategy::RowFiltered`]: a prefix of predicates runs against
//!   row handles and the surviving rows are materialized.
//! - [`ExecutionStrategy::Materialized`]: every row is materialized and the
//!   chain is evaluated in memory.
//!
//! All three produce the same values in the same order.

use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::catalog::{Catalog, EntityType};
use crate::config::{EngineConfig, DEFAULT_STRING_CACHE_CAPACITY};
use crate::error::Error;
use crate::storage::{Db2File, RowHandle, TableSet};
use packq_proto::{Entity, Expr, Query, Value};
use tracing::{debug, instrument};

use super::dense_string::DenseStringCacheRegistry;
use super::eval::Evaluator;
use super::include::{BatchedProjection, IncludeExecutor};
use super::materialize::{DefaultEntityFactory, EntityFactory, Materializer, NavigationResolver};
use super::navigation::NavigationTranslator;
use super::ops;
use super::pipeline::{ParsedQuery, PipelineParser, QueryOp, Reducer, ReducerKind};
use super::row_compiler::{CompiledPredicate, CompiledProjector, RowCompiler};
use super::semi_join::SemiJoinCompiler;

/// How a query is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionStrategy {
    RowPruned,
    RowFiltered,
    Materialized,
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExecutionStrategy::RowPruned => "row-pruned",
            ExecutionStrategy::RowFiltered => "row-filtered",
            ExecutionStrategy::Materialized => "materialized",
        })
    }
}

type ValueStream<'a> = Box<dyn Iterator<Item = Result<Value, Error>> + 'a>;
type HandleStream<'a> = Box<dyn Iterator<Item = Result<RowHandle, Error>> + 'a>;

/// Lazy result sequence of a query.
pub struct Rows<'a> {
    inner: ValueStream<'a>,
    strategy: ExecutionStrategy,
}

impl Rows<'_> {
    /// Strategy the sequence is produced with.
    pub fn strategy(&self) -> ExecutionStrategy {
        self.strategy
    }

    /// Drain the sequence, stopping at the first error.
    pub fn into_values(self) -> Result<Vec<Value>, Error> {
        self.collect()
    }
}

impl Iterator for Rows<'_> {
    type Item = Result<Value, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

impl fmt::Debug for Rows<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rows")
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

/// Result of executing a query.
#[derive(Debug)]
pub enum QueryOutput<'a> {
    /// The query ends in a sequence.
    Rows(Rows<'a>),
    /// The query ends in a reducer.
    Scalar(Value),
}

impl QueryOutput<'_> {
    /// Collect a sequence, or wrap a reducer result in a one-element list.
    pub fn into_values(self) -> Result<Vec<Value>, Error> {
        match self {
            QueryOutput::Rows(rows) => rows.into_values(),
            QueryOutput::Scalar(value) => Ok(vec![value]),
        }
    }
}

/// How a query would run, without running it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryExplain {
    pub entity: String,
    pub strategy: ExecutionStrategy,
    pub pushed_filters: usize,
    pub pushed_columns: Vec<u32>,
    pub compiled_projection: bool,
    pub memory_ops: usize,
    pub reducer: Option<ReducerKind>,
}

impl fmt::Display for QueryExplain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} over {}", self.strategy, self.entity)?;
        if self.pushed_filters > 0 {
            write!(
                f,
                ", {} pushed filter(s) on columns {:?}",
                self.pushed_filters, self.pushed_columns
            )?;
        }
        if self.compiled_projection {
            f.write_str(", compiled projection")?;
        }
        if self.memory_ops > 0 {
            write!(f, ", {} in-memory op(s)", self.memory_ops)?;
        }
        if let Some(reducer) = self.reducer {
            write!(f, ", then {}", reducer.name())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum RowStage {
    Filter(CompiledPredicate),
    Skip(usize),
    Take(usize),
}

#[derive(Debug, Clone)]
enum HandleReducer {
    Count,
    Any(Option<CompiledPredicate>),
    All(CompiledPredicate),
}

struct Plan<'a> {
    entity: &'a EntityType,
    table: &'a dyn Db2File,
    row_stages: Vec<RowStage>,
    projector: Option<CompiledProjector>,
    memory_ops: Vec<QueryOp>,
    reducer: Option<Reducer>,
    handle_reducer: Option<HandleReducer>,
    strategy: ExecutionStrategy,
}

impl Plan<'_> {
    fn explain(&self) -> QueryExplain {
        let mut columns = Vec::new();
        let mut pushed_filters = 0;
        for stage in &self.row_stages {
            if let RowStage::Filter(filter) = stage {
                pushed_filters += 1;
                columns.extend(filter.requirements.columns());
            }
        }
        columns.sort_unstable();
        columns.dedup();
        QueryExplain {
            entity: self.entity.name.clone(),
            strategy: self.strategy,
            pushed_filters,
            pushed_columns: columns,
            compiled_projection: self.projector.is_some(),
            memory_ops: self.memory_ops.len(),
            reducer: self.reducer.as_ref().map(|r| r.kind),
        }
    }
}

/// Executes query chains against a catalog and its tables.
pub struct QueryProvider {
    catalog: Arc<Catalog>,
    tables: Arc<TableSet>,
    config: EngineConfig,
    factory: Arc<dyn EntityFactory>,
    strings: Arc<DenseStringCacheRegistry>,
}

impl QueryProvider {
    /// Create a provider.
    ///
    /// With the default cache capacity the process-wide string cache
    /// registry is shared; any other capacity gets a registry of its own.
    pub fn new(catalog: Arc<Catalog>, tables: Arc<TableSet>, config: EngineConfig) -> Self {
        let strings = if config.dense_string_cache_capacity == DEFAULT_STRING_CACHE_CAPACITY {
            DenseStringCacheRegistry::global()
        } else {
            Arc::new(DenseStringCacheRegistry::new(config.dense_string_cache_capacity))
        };
        Self {
            catalog,
            tables,
            config,
            factory: Arc::new(DefaultEntityFactory),
            strings,
        }
    }

    /// Use a custom entity factory for materialization.
    pub fn with_entity_factory(mut self, factory: Arc<dyn EntityFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Use a specific dense string cache registry.
    pub fn with_string_cache(mut self, strings: Arc<DenseStringCacheRegistry>) -> Self {
        self.strings = strings;
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn tables(&self) -> &TableSet {
        &self.tables
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn string_cache(&self) -> &Arc<DenseStringCacheRegistry> {
        &self.strings
    }

    /// Execute a query expression.
    #[instrument(skip(self, expr))]
    pub fn execute(&self, expr: &Expr) -> Result<QueryOutput<'_>, Error> {
        let parsed = PipelineParser::parse(expr)?;
        let plan = self.plan(parsed)?;
        debug!(
            entity = %plan.entity.name,
            strategy = %plan.strategy,
            pushed = plan.row_stages.len(),
            memory_ops = plan.memory_ops.len(),
            "query planned"
        );
        self.run(plan)
    }

    /// Execute a query that yields a sequence.
    pub fn query(&self, query: &Query) -> Result<Rows<'_>, Error> {
        match self.execute(query.expr())? {
            QueryOutput::Rows(rows) => Ok(rows),
            QueryOutput::Scalar(_) => Err(Error::InvalidExpression(
                "query ends in a reducer; use `execute_scalar`".into(),
            )),
        }
    }

    /// Execute a query that ends in a reducer.
    #[instrument(skip(self, expr))]
    pub fn execute_scalar(&self, expr: &Expr) -> Result<Value, Error> {
        match self.execute(expr)? {
            QueryOutput::Scalar(value) => Ok(value),
            QueryOutput::Rows(_) => Err(Error::InvalidExpression(
                "query does not end in a reducer".into(),
            )),
        }
    }

    /// Plan a query and describe how it would run.
    ///
    /// Planning compiles navigation predicates, which scans their target
    /// tables.
    #[instrument(skip(self, expr))]
    pub fn explain(&self, expr: &Expr) -> Result<QueryExplain, Error> {
        let parsed = PipelineParser::parse(expr)?;
        Ok(self.plan(parsed)?.explain())
    }

    fn plan(&self, parsed: ParsedQuery) -> Result<Plan<'_>, Error> {
        let entity: &EntityType = self.catalog.entity(&parsed.root)?;
        let table = self.tables.get(&entity.table)?;
        let mut ops = parsed.ops;

        let mut row_stages = Vec::new();
        let mut pushed = 0;
        if self.config.row_pushdown {
            for op in &ops {
                let stage = match op {
                    QueryOp::Where(lambda) => match self.compile_filter(entity, table, lambda)? {
                        Some(filter) => RowStage::Filter(filter),
                        None => break,
                    },
                    QueryOp::Skip(n) => RowStage::Skip(*n),
                    QueryOp::Take(n) => RowStage::Take(*n),
                    _ => break,
                };
                row_stages.push(stage);
                pushed += 1;
            }
        }
        let mut memory_ops = ops.split_off(pushed);

        let mut projector = None;
        if self.config.row_pushdown {
            if let Some((QueryOp::Select(lambda), rest)) = memory_ops.split_first() {
                let only_paging = rest
                    .iter()
                    .all(|op| matches!(op, QueryOp::Skip(_) | QueryOp::Take(_)));
                if only_paging {
                    projector = self.row_compiler(entity, table).compile_projector(lambda)?;
                }
            }
            if projector.is_some() {
                memory_ops.remove(0);
            }
        }

        let mut handle_reducer = None;
        if self.config.row_pushdown && projector.is_none() && memory_ops.is_empty() {
            if let Some(reducer) = &parsed.reducer {
                handle_reducer = match (reducer.kind, &reducer.predicate) {
                    (ReducerKind::Count, None) => Some(HandleReducer::Count),
                    (ReducerKind::Any, None) => Some(HandleReducer::Any(None)),
                    (ReducerKind::Any, Some(lambda)) => self
                        .compile_filter(entity, table, lambda)?
                        .map(|p| HandleReducer::Any(Some(p))),
                    (ReducerKind::All, Some(lambda)) => self
                        .compile_filter(entity, table, lambda)?
                        .map(HandleReducer::All),
                    _ => None,
                };
            }
        }

        let filtered = row_stages
            .iter()
            .any(|stage| matches!(stage, RowStage::Filter(_)));
        let strategy = if projector.is_some() || handle_reducer.is_some() {
            ExecutionStrategy::RowPruned
        } else if filtered {
            ExecutionStrategy::RowFiltered
        } else {
            ExecutionStrategy::Materialized
        };

        Ok(Plan {
            entity,
            table: &**table,
            row_stages,
            projector,
            memory_ops,
            reducer: parsed.reducer,
            handle_reducer,
            strategy,
        })
    }

    fn row_compiler<'c>(&'c self, entity: &'c EntityType, table: &Arc<dyn Db2File>) -> RowCompiler<'c> {
        RowCompiler::new(entity, Arc::clone(table), &self.config, &self.strings)
    }

    /// Compile a `Where` lambda into a row predicate.
    ///
    /// The whole body is tried first. Failing that, each top-level conjunct
    /// must compile as a row predicate or translate to a navigation
    /// predicate; the navigation predicates become one semi-join.
    fn compile_filter(
        &self,
        entity: &EntityType,
        table: &Arc<dyn Db2File>,
        lambda: &Expr,
    ) -> Result<Option<CompiledPredicate>, Error> {
        let compiler = self.row_compiler(entity, table);
        if let Some(filter) = compiler.compile_predicate(lambda)? {
            return Ok(Some(filter));
        }
        if !self.config.navigation_pushdown {
            return Ok(None);
        }
        let Some((parameter, body)) = lambda.as_lambda() else {
            return Ok(None);
        };

        let translator = NavigationTranslator::new(&self.catalog, entity);
        let mut row_part: Option<CompiledPredicate> = None;
        let mut navigations = Vec::new();
        for conjunct in ops::split_conjuncts(body) {
            if let Some(filter) = compiler.compile_predicate_body(parameter, conjunct)? {
                row_part = Some(match row_part {
                    Some(previous) => previous.and(filter),
                    None => filter,
                });
            } else if let Some(navigation) = translator.translate(parameter, conjunct) {
                navigations.push(navigation);
            } else {
                debug!(entity = %entity.name, "conjunct neither row nor navigation predicate");
                return Ok(None);
            }
        }
        if navigations.is_empty() {
            return Ok(None);
        }

        let semi_join = SemiJoinCompiler::new(&self.tables, &self.config, &self.strings);
        let Some(membership) = semi_join.compile(entity, &navigations)? else {
            return Ok(None);
        };
        Ok(Some(match row_part {
            Some(row_part) => row_part.and(membership),
            None => membership,
        }))
    }

    fn run<'a>(&'a self, plan: Plan<'a>) -> Result<QueryOutput<'a>, Error> {
        let handles = handle_stream(plan.table, plan.row_stages);
        if let Some(reducer) = plan.handle_reducer {
            return reduce_handles(handles, reducer).map(QueryOutput::Scalar);
        }

        let resolver = Rc::new(NavigationResolver::new(
            &self.catalog,
            &self.tables,
            self.factory.as_ref(),
        ));
        let values: ValueStream<'a> = match plan.projector {
            Some(projector) => Box::new(handles.map(move |item| item.and_then(|row| projector.evaluate(row)))),
            None => {
                let materializer = Materializer::new(plan.entity, plan.table, self.factory.as_ref());
                Box::new(handles.map(move |item| {
                    item.and_then(|row| materializer.materialize(row).map(Value::from))
                }))
            }
        };
        let values = self.memory_stages(plan.entity, values, &plan.memory_ops, plan.reducer.as_ref(), &resolver)?;

        match plan.reducer {
            Some(reducer) => {
                let evaluator = Evaluator::new().with_navigations(&*resolver);
                reduce(values, &reducer, &evaluator).map(QueryOutput::Scalar)
            }
            None => Ok(QueryOutput::Rows(Rows {
                inner: values,
                strategy: plan.strategy,
            })),
        }
    }

    fn memory_stages<'a>(
        &'a self,
        entity: &'a EntityType,
        mut values: ValueStream<'a>,
        memory_ops: &[QueryOp],
        reducer: Option<&Reducer>,
        resolver: &Rc<NavigationResolver<'a>>,
    ) -> Result<ValueStream<'a>, Error> {
        let mut element = Some(entity);
        let mut index = 0;
        while index < memory_ops.len() {
            let rest = &memory_ops[index + 1..];
            match &memory_ops[index] {
                QueryOp::Where(lambda) => {
                    let lambda = lambda.clone();
                    let resolver = Rc::clone(resolver);
                    values = Box::new(values.filter_map(move |item| {
                        let evaluator = Evaluator::new().with_navigations(&*resolver);
                        match item.and_then(|value| Ok((evaluator.test(&lambda, &value)?, value))) {
                            Ok((true, value)) => Some(Ok(value)),
                            Ok((false, _)) => None,
                            Err(err) => Some(Err(err)),
                        }
                    }));
                }
                QueryOp::Select(lambda) => {
                    let batched = match element {
                        Some(entity) => BatchedProjection::plan(&self.catalog, entity, lambda)?,
                        None => None,
                    };
                    let resolver = Rc::clone(resolver);
                    values = match batched {
                        Some(batched) => {
                            let tables: &'a TableSet = &self.tables;
                            let page_size = self.page_bound(rest, reducer);
                            Box::new(Paged::new(values, page_size, move |page: Vec<Entity>| {
                                let evaluator = Evaluator::new().with_navigations(&*resolver);
                                batched.project_page(tables, &evaluator, &page)
                            }))
                        }
                        None => {
                            let lambda = lambda.clone();
                            Box::new(values.map(move |item| {
                                let evaluator = Evaluator::new().with_navigations(&*resolver);
                                item.and_then(|value| evaluator.apply(&lambda, &value))
                            }))
                        }
                    };
                    element = None;
                }
                QueryOp::Skip(n) => values = skip_ok(values, *n),
                QueryOp::Take(n) => values = Box::new(values.take(*n)),
                QueryOp::Include(_) => {
                    let Some(entity) = element else {
                        return Err(Error::IncludeAfterSelect);
                    };
                    let mut chains = Vec::new();
                    while let Some(QueryOp::Include(chain)) = memory_ops.get(index) {
                        chains.push(chain.clone());
                        index += 1;
                    }
                    let executor = IncludeExecutor::new(&self.catalog, &self.tables, self.factory.as_ref());
                    let plan = executor.plan(entity, &chains)?;
                    let page_size = self.page_bound(&memory_ops[index..], reducer);
                    values = Box::new(Paged::new(values, page_size, move |mut page: Vec<Entity>| {
                        executor.apply(&plan, &mut page)?;
                        Ok(page.into_iter().map(Value::from).collect())
                    }));
                    continue;
                }
            }
            index += 1;
        }
        Ok(values)
    }

    /// Largest page a paged stage needs, given the operators after it.
    fn page_bound(&self, rest: &[QueryOp], reducer: Option<&Reducer>) -> usize {
        let mut skipped = 0usize;
        let mut bound = None;
        for op in rest {
            match op {
                QueryOp::Skip(n) => skipped = skipped.saturating_add(*n),
                QueryOp::Take(n) => {
                    bound = Some(skipped.saturating_add(*n));
                    break;
                }
                QueryOp::Where(_) => return self.config.page_size,
                QueryOp::Select(_) | QueryOp::Include(_) => {}
            }
        }
        if bound.is_none() {
            bound = reducer.and_then(|reducer| match (reducer.kind, &reducer.predicate) {
                (ReducerKind::First | ReducerKind::FirstOrDefault, _) | (ReducerKind::Any, None) => {
                    Some(skipped.saturating_add(1))
                }
                (ReducerKind::Single | ReducerKind::SingleOrDefault, _) => Some(skipped.saturating_add(2)),
                _ => None,
            });
        }
        bound
            .map_or(self.config.page_size, |bound| bound.min(self.config.page_size))
            .max(1)
    }
}

impl fmt::Debug for QueryProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryProvider")
            .field("catalog_version", &self.catalog.version())
            .field("tables", &self.tables.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn handle_stream(table: &dyn Db2File, stages: Vec<RowStage>) -> HandleStream<'_> {
    let mut handles: HandleStream<'_> = Box::new(table.rows().map(Ok));
    for stage in stages {
        handles = match stage {
            RowStage::Filter(filter) => Box::new(handles.filter_map(move |item| {
                match item.and_then(|row| Ok((filter.evaluate(row)?, row))) {
                    Ok((true, row)) => Some(Ok(row)),
                    Ok((false, _)) => None,
                    Err(err) => Some(Err(err)),
                }
            })),
            RowStage::Skip(n) => skip_ok(handles, n),
            RowStage::Take(n) => Box::new(handles.take(n)),
        };
    }
    handles
}

/// Skip `n` successful items; errors pass through.
fn skip_ok<'a, T: 'a>(
    items: Box<dyn Iterator<Item = Result<T, Error>> + 'a>,
    n: usize,
) -> Box<dyn Iterator<Item = Result<T, Error>> + 'a> {
    let mut remaining = n;
    Box::new(items.filter(move |item| {
        if remaining > 0 && item.is_ok() {
            remaining -= 1;
            false
        } else {
            true
        }
    }))
}

fn count_value(n: usize) -> Value {
    Value::from(i32::try_from(n).unwrap_or(i32::MAX))
}

fn reduce_handles(mut handles: HandleStream<'_>, reducer: HandleReducer) -> Result<Value, Error> {
    match reducer {
        HandleReducer::Count => {
            let mut n = 0;
            for handle in handles {
                handle?;
                n += 1;
            }
            Ok(count_value(n))
        }
        HandleReducer::Any(None) => Ok(Value::from(handles.next().transpose()?.is_some())),
        HandleReducer::Any(Some(predicate)) => {
            for handle in handles {
                if predicate.evaluate(handle?)? {
                    return Ok(Value::from(true));
                }
            }
            Ok(Value::from(false))
        }
        HandleReducer::All(predicate) => {
            for handle in handles {
                if !predicate.evaluate(handle?)? {
                    return Ok(Value::from(false));
                }
            }
            Ok(Value::from(true))
        }
    }
}

fn reduce(mut values: ValueStream<'_>, reducer: &Reducer, evaluator: &Evaluator<'_>) -> Result<Value, Error> {
    match reducer.kind {
        ReducerKind::First => values.next().transpose()?.ok_or(Error::SequenceEmpty),
        ReducerKind::FirstOrDefault => Ok(values.next().transpose()?.unwrap_or(Value::Null)),
        ReducerKind::Single | ReducerKind::SingleOrDefault => match values.next().transpose()? {
            None if reducer.kind == ReducerKind::Single => Err(Error::SequenceEmpty),
            None => Ok(Value::Null),
            Some(value) => match values.next().transpose()? {
                Some(_) => Err(Error::SequenceMoreThanOne),
                None => Ok(value),
            },
        },
        ReducerKind::Count => {
            let mut n = 0;
            for value in values {
                value?;
                n += 1;
            }
            Ok(count_value(n))
        }
        ReducerKind::Any => match &reducer.predicate {
            None => Ok(Value::from(values.next().transpose()?.is_some())),
            Some(predicate) => {
                for value in values {
                    if evaluator.test(predicate, &value?)? {
                        return Ok(Value::from(true));
                    }
                }
                Ok(Value::from(false))
            }
        },
        ReducerKind::All => {
            let Some(predicate) = &reducer.predicate else {
                return Err(Error::InvalidArgument {
                    operator: "All".into(),
                    expected: "a lambda".into(),
                });
            };
            for value in values {
                if !evaluator.test(predicate, &value?)? {
                    return Ok(Value::from(false));
                }
            }
            Ok(Value::from(true))
        }
    }
}

/// Buffers entities into pages and runs a page-level stage over them.
struct Paged<'a, F> {
    upstream: ValueStream<'a>,
    page_size: usize,
    process: F,
    ready: VecDeque<Result<Value, Error>>,
    exhausted: bool,
}

impl<'a, F> Paged<'a, F>
where
    F: FnMut(Vec<Entity>) -> Result<Vec<Value>, Error>,
{
    fn new(upstream: ValueStream<'a>, page_size: usize, process: F) -> Self {
        Self {
            upstream,
            page_size: page_size.max(1),
            process,
            ready: VecDeque::new(),
            exhausted: false,
        }
    }

    fn fill(&mut self) {
        let mut page = Vec::with_capacity(self.page_size);
        let mut failure = None;
        while page.len() < self.page_size {
            match self.upstream.next() {
                Some(Ok(Value::Entity(entity))) => page.push(*entity),
                Some(Ok(other)) => {
                    failure = Some(Error::type_mismatch(format!(
                        "expected an entity, found {}",
                        other.type_name()
                    )));
                    break;
                }
                Some(Err(err)) => {
                    failure = Some(err);
                    break;
                }
                None => {
                    self.exhausted = true;
                    break;
                }
            }
        }
        if !page.is_empty() {
            match (self.process)(page) {
                Ok(values) => self.ready.extend(values.into_iter().map(Ok)),
                Err(err) => {
                    self.ready.push_back(Err(err));
                    self.exhausted = true;
                }
            }
        }
        if let Some(err) = failure {
            self.ready.push_back(Err(err));
            self.exhausted = true;
        }
    }
}

impl<'a, F> Iterator for Paged<'a, F>
where
    F: FnMut(Vec<Entity>) -> Result<Vec<Value>, Error>,
{
    type Item = Result<Value, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.ready.pop_front() {
                return Some(item);
            }
            if self.exhausted {
                return None;
            }
            self.fill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::Fixture;

    fn provider(fixture: &Fixture, config: EngineConfig) -> QueryProvider {
        QueryProvider::new(
            Arc::clone(&fixture.catalog),
            Arc::clone(&fixture.tables),
            config,
        )
        .with_string_cache(Arc::new(DenseStringCacheRegistry::new(16)))
    }

    fn ids(values: &[Value]) -> Vec<i64> {
        values
            .iter()
            .map(|v| v.field("Id").and_then(Value::as_key).unwrap())
            .collect()
    }

    fn level_gt(n: i32) -> Expr {
        Expr::lambda("p", Expr::param("p").member("Level").gt(Expr::constant(n)))
    }

    #[test]
    fn test_strategy_selection() {
        let fixture = Fixture::new();
        let provider = provider(&fixture, EngineConfig::default());

        let pruned = Query::source("Parent")
            .filter(level_gt(3))
            .select(Expr::lambda("p", Expr::param("p").member("Name")));
        assert_eq!(
            provider.explain(pruned.expr()).unwrap().strategy,
            ExecutionStrategy::RowPruned
        );

        let filtered = Query::source("Parent").filter(level_gt(3));
        assert_eq!(
            provider.explain(filtered.expr()).unwrap().strategy,
            ExecutionStrategy::RowFiltered
        );

        let upper = Expr::lambda(
            "p",
            Expr::param("p")
                .member("Name")
                .call(packq_proto::Method::ToUpper, vec![])
                .eq(Expr::constant("P2")),
        );
        let materialized = Query::source("Parent").filter(upper);
        assert_eq!(
            provider.explain(materialized.expr()).unwrap().strategy,
            ExecutionStrategy::Materialized
        );

        let count = Query::source("Parent").filter(level_gt(0)).count();
        let explain = provider.explain(count.expr()).unwrap();
        assert_eq!(explain.strategy, ExecutionStrategy::RowPruned);
        assert_eq!(explain.reducer, Some(ReducerKind::Count));
    }

    #[test]
    fn test_materialize_only_disables_pushdown() {
        let fixture = Fixture::new();
        let provider = provider(&fixture, EngineConfig::materialize_only());
        let query = Query::source("Parent").filter(level_gt(3));
        assert_eq!(
            provider.explain(query.expr()).unwrap().strategy,
            ExecutionStrategy::Materialized
        );
        let rows = provider.query(&query).unwrap().into_values().unwrap();
        assert_eq!(ids(&rows), vec![2]);
    }

    #[test]
    fn test_mixed_conjunction_uses_semi_join() {
        let fixture = Fixture::new();
        let provider = provider(&fixture, EngineConfig::default());
        let predicate = Expr::lambda(
            "c",
            Expr::param("c")
                .member("Name")
                .contains(Expr::constant("a"))
                .and(Expr::param("c").member("Parent").member("Level").gt(Expr::constant(3))),
        );
        let query = Query::source("Child").filter(predicate);
        let explain = provider.explain(query.expr()).unwrap();
        assert_eq!(explain.strategy, ExecutionStrategy::RowFiltered);
        let rows = provider.query(&query).unwrap().into_values().unwrap();
        assert_eq!(ids(&rows), vec![101]);
    }

    #[test]
    fn test_reducers() {
        let fixture = Fixture::new();
        let provider = provider(&fixture, EngineConfig::default());
        let first = provider
            .execute_scalar(Query::source("Child").skip(1).first().expr())
            .unwrap();
        assert_eq!(first.field("Id"), Some(&Value::from(101)));

        let none = provider
            .execute_scalar(Query::source("Child").filter(Expr::lambda("c", Expr::constant(false))).first_or_default().expr())
            .unwrap();
        assert_eq!(none, Value::Null);

        let single = provider.execute_scalar(Query::source("Parent").single().expr());
        assert!(matches!(single, Err(Error::SequenceMoreThanOne)));
        let empty = provider.execute_scalar(Query::source("Parent").filter(level_gt(10)).single().expr());
        assert!(matches!(empty, Err(Error::SequenceEmpty)));

        let all = provider
            .execute_scalar(Query::source("Parent").all(level_gt(0)).expr())
            .unwrap();
        assert_eq!(all, Value::from(true));
        let any = provider
            .execute_scalar(Query::source("Parent").any_where(level_gt(4)).expr())
            .unwrap();
        assert_eq!(any, Value::from(true));
    }

    #[test]
    fn test_query_and_scalar_mismatch() {
        let fixture = Fixture::new();
        let provider = provider(&fixture, EngineConfig::default());
        assert!(matches!(
            provider.query(&Query::source("Parent").count()),
            Err(Error::InvalidExpression(_))
        ));
        assert!(matches!(
            provider.execute_scalar(Query::source("Parent").expr()),
            Err(Error::InvalidExpression(_))
        ));
        assert!(matches!(
            provider.execute(Query::source("Nope").expr()),
            Err(Error::UnknownEntity(_))
        ));
    }

    #[test]
    fn test_page_bound() {
        let fixture = Fixture::new();
        let provider = provider(&fixture, EngineConfig::default().page_size(50));
        assert_eq!(provider.page_bound(&[QueryOp::Skip(2), QueryOp::Take(3)], None), 5);
        assert_eq!(provider.page_bound(&[QueryOp::Take(500)], None), 50);
        assert_eq!(
            provider.page_bound(&[QueryOp::Where(level_gt(1)), QueryOp::Take(1)], None),
            50
        );
        let first = Reducer {
            kind: ReducerKind::First,
            predicate: None,
        };
        assert_eq!(provider.page_bound(&[], Some(&first)), 1);
        assert_eq!(provider.page_bound(&[QueryOp::Take(0)], None), 1);
    }

    #[test]
    fn test_explain_display() {
        let fixture = Fixture::new();
        let provider = provider(&fixture, EngineConfig::default());
        let explain = provider
            .explain(Query::source("Parent").filter(level_gt(3)).count().expr())
            .unwrap();
        let text = explain.to_string();
        assert!(text.starts_with("row-pruned over Parent"));
        assert!(text.contains("then Count"));
    }
}
