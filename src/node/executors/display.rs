//! Client-rendering node kinds (spec.md §6): `visualization`, `renderer`,
//! `bar_chart`. Client-side rendering itself is out of scope (spec.md §1),
//! but the node still has to participate in the DAG as a pass-through so
//! downstream nodes can depend on "the thing that got displayed" — each one
//! forwards its single input unchanged and tags the result with its kind so
//! an external renderer collaborator knows how to draw it.

use async_trait::async_trait;
use rustc_hash::FxHashMap;

use crate::error::EngineError;
use crate::payload::NodeSpec;
use crate::value::Value;

use super::super::{ExecutionContext, Executor, NodeOutcome};

fn tagged(kind: &str, input: Value) -> Value {
    let mut m = FxHashMap::default();
    m.insert("kind".to_string(), Value::String(kind.to_string()));
    m.insert("data".to_string(), input);
    Value::Map(m)
}

macro_rules! passthrough_node {
    ($name:ident, $kind:literal) => {
        pub struct $name;

        #[async_trait]
        impl Executor for $name {
            fn validate(&self, _node: &NodeSpec) -> Result<(), EngineError> {
                Ok(())
            }

            async fn execute(&self, ctx: &ExecutionContext, _node: &NodeSpec) -> NodeOutcome {
                NodeOutcome::Completed(tagged($kind, ctx.single_input()))
            }
        }
    };
}

passthrough_node!(VisualizationNode, "visualization");
passthrough_node!(RendererNode, "renderer");
passthrough_node!(BarChartNode, "bar_chart");
