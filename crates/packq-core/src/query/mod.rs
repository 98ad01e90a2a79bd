//! Query engine for PackQ.
//!
//! Parses operator chains over an entity source and runs each one at the
//! cheapest tier that can answer it: compiled row closures, a row-filtered
//! scan followed by materialization, or fully materialized evaluation.

mod dense_string;
mod eval;
mod include;
mod materialize;
mod navigation;
mod ops;
mod pipeline;
mod provider;
mod requirements;
mod row_compiler;
mod semi_join;

pub use dense_string::{
    find_start_offsets, is_indexable, CacheStats, DenseStringCache, DenseStringCacheRegistry,
    MatchKind, OffsetSet,
};
pub use eval::{Evaluator, Scope};
pub use include::{BatchedProjection, IncludeExecutor, IncludePlan};
pub use materialize::{
    DefaultEntityFactory, EntityFactory, Materializer, NavigationResolver, NavigationSource,
};
pub use navigation::{NavigationCondition, NavigationPredicate, NavigationTranslator, StringOp};
pub use pipeline::{ElementShape, ParsedQuery, PipelineParser, QueryOp, Reducer, ReducerKind};
pub use provider::{ExecutionStrategy, QueryExplain, QueryOutput, QueryProvider, Rows};
pub use requirements::{Requirement, SourceRequirements, Usage};
pub use row_compiler::{
    CompiledPredicate, CompiledProjector, RowCompiler, RowPredicate, RowProjector,
};
pub use semi_join::SemiJoinCompiler;
