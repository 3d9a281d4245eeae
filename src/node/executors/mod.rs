//! Every built-in node kind, and the wiring between each kind string (spec.md
//! §6) and its [`super::Executor`] implementation.
//!
//! One file per related group of node kinds, plus a registration entry
//! point the runtime calls once at startup, feeding an open
//! `kind string -> Arc<dyn Executor>` registry rather than a closed,
//! compile-time enum.

mod cache;
mod composite;
mod condition;
mod display;
mod http;
mod list_ops;
mod loops;
mod misc;
mod operation;
mod parallel;
mod parse;
mod transform;
mod value;

use std::sync::Arc;

use super::{NodeExecutorRegistry, RegistryError};

/// Register every built-in node kind under its spec.md §6 wire `type`
/// string. Called once from `Engine::new`; a duplicate or unknown
/// registration here is a programming error, not a runtime condition, so the
/// caller is expected to treat `Err` as fatal at startup.
pub fn register_all(registry: &mut NodeExecutorRegistry) -> Result<(), RegistryError> {
    registry.register("number", Arc::new(value::NumberNode))?;
    registry.register("text_input", Arc::new(value::TextInputNode))?;
    registry.register("variable", Arc::new(value::VariableNode))?;
    registry.register("counter", Arc::new(value::CounterNode))?;
    registry.register("accumulator", Arc::new(value::AccumulatorNode))?;

    registry.register("visualization", Arc::new(display::VisualizationNode))?;
    registry.register("renderer", Arc::new(display::RendererNode))?;
    registry.register("bar_chart", Arc::new(display::BarChartNode))?;

    registry.register("operation", Arc::new(operation::OperationNode))?;
    registry.register("text_operation", Arc::new(operation::TextOperationNode))?;

    registry.register("http", Arc::new(http::HttpNode))?;

    registry.register("condition", Arc::new(condition::ConditionNode))?;
    registry.register("switch", Arc::new(condition::SwitchNode))?;

    registry.register("foreach", Arc::new(loops::ForEachNode))?;
    registry.register("while_loop", Arc::new(loops::WhileLoopNode))?;
    registry.register("until", Arc::new(loops::UntilNode))?;

    registry.register("cache", Arc::new(cache::CacheNode))?;

    registry.register("retry", Arc::new(composite::RetryNode))?;
    registry.register("try_catch", Arc::new(composite::TryCatchNode))?;
    registry.register("timeout", Arc::new(composite::TimeoutNode))?;
    registry.register("delay", Arc::new(composite::DelayNode))?;

    registry.register("parallel", Arc::new(parallel::ParallelNode))?;
    registry.register("join", Arc::new(parallel::JoinNode))?;

    registry.register("parse", Arc::new(parse::ParseNode))?;
    registry.register("transform", Arc::new(transform::TransformNode))?;
    registry.register("extract", Arc::new(transform::ExtractNode))?;

    registry.register("map", Arc::new(list_ops::MapNode))?;
    registry.register("filter", Arc::new(list_ops::FilterNode))?;
    registry.register("reduce", Arc::new(list_ops::ReduceNode))?;
    registry.register("slice", Arc::new(list_ops::SliceNode))?;
    registry.register("sort", Arc::new(list_ops::SortNode))?;
    registry.register("find", Arc::new(list_ops::FindNode))?;
    registry.register("flat_map", Arc::new(list_ops::FlatMapNode))?;
    registry.register("group_by", Arc::new(list_ops::GroupByNode))?;
    registry.register("unique", Arc::new(list_ops::UniqueNode))?;
    registry.register("chunk", Arc::new(list_ops::ChunkNode))?;
    registry.register("reverse", Arc::new(list_ops::ReverseNode))?;
    registry.register("partition", Arc::new(list_ops::PartitionNode))?;
    registry.register("zip", Arc::new(list_ops::ZipNode))?;
    registry.register("sample", Arc::new(list_ops::SampleNode))?;
    registry.register("range", Arc::new(list_ops::RangeNode))?;
    registry.register("transpose", Arc::new(list_ops::TransposeNode))?;
    registry.register("split", Arc::new(list_ops::SplitNode))?;

    registry.register("rate_limiter", Arc::new(misc::RateLimiterNode))?;
    registry.register("schema_validator", Arc::new(misc::SchemaValidatorNode))?;
    registry.register("paginator", Arc::new(misc::PaginatorNode))?;

    Ok(())
}
