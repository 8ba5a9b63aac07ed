//! Pipeline execution context
//!
//! The mutable scratchpad shared by the steps of one pipeline execution.
//! A context is owned by exactly one execution; steps run strictly
//! sequentially, so no synchronisation is needed.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};

use crate::registry::ArtifactStore;

// =============================================================================
// Metadata Keys
// =============================================================================

/// Metadata keys set by the engine
pub mod meta {
    /// Name of the executing pipeline
    pub const PIPELINE: &str = "pipeline";

    /// RFC3339 timestamp taken before the first step runs
    pub const STARTED_AT: &str = "started_at";

    /// RFC3339 timestamp taken before a successful return
    pub const COMPLETED_AT: &str = "completed_at";

    /// Fresh UUID identifying this execution
    pub const EXECUTION_ID: &str = "execution_id";

    /// Name of the artifact store service available on the rails
    pub const ARTIFACT_STORE: &str = "artifact_store";

    /// Raw request body for HTTP-bound executions, when valid UTF-8
    pub const RAW_BODY: &str = "_raw_body";
}

// =============================================================================
// Rails
// =============================================================================

/// Typed handles that ride along with an execution but cannot live in
/// the JSON maps. Part of the step contract only for executions whose
/// trigger provides them.
#[derive(Default)]
pub struct Rails {
    /// Request/response rail for HTTP-bound pipelines
    pub http: Option<HttpRail>,

    /// Artifact store handle, present when an artifact module is registered
    pub artifacts: Option<Arc<dyn ArtifactStore>>,
}

/// The HTTP rail: inbound request details plus the response slot the
/// owning trigger reads after the pipeline returns.
pub struct HttpRail {
    /// Request method, upper-cased
    pub method: String,

    /// Request path
    pub path: String,

    /// Raw request body
    pub raw_body: Vec<u8>,

    /// Response written by a step, if any
    pub response: Option<HttpResponseSpec>,

    /// Set by a step that wrote the response; the trigger must not
    /// write its own response when this is set
    pub handled: bool,
}

/// Response produced by a step on the HTTP rail
#[derive(Debug, Clone)]
pub struct HttpResponseSpec {
    /// HTTP status code
    pub status: u16,

    /// Response body, serialised as JSON
    pub body: Value,
}

// =============================================================================
// Pipeline Context
// =============================================================================

/// Per-execution mutable state shared by all steps of one pipeline run
#[derive(Default)]
pub struct PipelineContext {
    /// The current payload seen by the next step: trigger data merged
    /// with every prior step's output, later writes winning
    pub current: Map<String, Value>,

    /// Each step's last output, individually addressable
    pub step_outputs: Map<String, Value>,

    /// Data preserved verbatim from the originating event
    pub trigger_data: Map<String, Value>,

    /// Engine-set values and inter-step rails
    pub metadata: Map<String, Value>,

    /// Typed handles that cannot live in the JSON maps
    pub rails: Rails,
}

impl PipelineContext {
    /// Create a context from trigger data. `current` starts as a copy of
    /// the trigger data; step outputs are merged in as steps complete.
    #[must_use]
    pub fn new(trigger_data: Map<String, Value>) -> Self {
        Self {
            current: trigger_data.clone(),
            trigger_data,
            ..Self::default()
        }
    }

    /// Record a completed step's output: merged into `current` and kept
    /// addressable under the step's name.
    pub fn record_step_output(&mut self, step_name: &str, output: Map<String, Value>) {
        for (key, value) in &output {
            self.current.insert(key.clone(), value.clone());
        }
        self.step_outputs
            .insert(step_name.to_string(), Value::Object(output));
    }

    /// Record a skipped step: a sentinel output so templates and audits
    /// can see the failure without the pipeline stopping.
    pub fn record_step_skipped(&mut self, step_name: &str, error: &str) {
        let mut sentinel = Map::new();
        sentinel.insert("_skipped".to_string(), Value::Bool(true));
        sentinel.insert("_error".to_string(), Value::String(error.to_string()));
        self.step_outputs
            .insert(step_name.to_string(), Value::Object(sentinel));
    }

    /// Set a metadata value
    pub fn set_meta(&mut self, key: &str, value: Value) {
        self.metadata.insert(key.to_string(), value);
    }

    /// Read a metadata value
    #[must_use]
    pub fn meta(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Stamp `completed_at` with the current time
    pub fn mark_completed(&mut self) {
        self.set_meta(meta::COMPLETED_AT, Value::String(Utc::now().to_rfc3339()));
    }

    /// Resolve a dotted path against the template data model.
    ///
    /// Roots: `steps`, `meta`, `trigger`; anything else is looked up in
    /// the merge of trigger data and `current`, with `current` winning.
    #[must_use]
    pub fn lookup(&self, segments: &[&str]) -> Option<&Value> {
        let (root, rest): (&Map<String, Value>, &[&str]) = match segments {
            [] => return None,
            ["steps", rest @ ..] => (&self.step_outputs, rest),
            ["meta", rest @ ..] => (&self.metadata, rest),
            ["trigger", rest @ ..] => (&self.trigger_data, rest),
            _ => {
                let key = segments[0];
                let value = self
                    .current
                    .get(key)
                    .or_else(|| self.trigger_data.get(key))?;
                return walk(value, &segments[1..]);
            }
        };

        let value = root.get(*rest.first()?)?;
        walk(value, &rest[1..])
    }
}

fn walk<'a>(mut value: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    for segment in segments {
        value = value.as_object()?.get(*segment)?;
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(json: Value) -> Map<String, Value> {
        match json {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_output_merge() {
        let mut pc = PipelineContext::new(object(serde_json::json!({"order": 7})));
        pc.record_step_output("a", object(serde_json::json!({"x": 1})));
        pc.record_step_output("b", object(serde_json::json!({"x": 2, "y": 3})));

        assert_eq!(pc.current["order"], 7);
        assert_eq!(pc.current["x"], 2);
        assert_eq!(pc.current["y"], 3);
        assert_eq!(pc.step_outputs["a"]["x"], 1);
        assert_eq!(pc.step_outputs["b"]["x"], 2);
    }

    #[test]
    fn test_skip_sentinel() {
        let mut pc = PipelineContext::new(Map::new());
        pc.record_step_skipped("b", "boom");

        assert_eq!(pc.step_outputs["b"]["_skipped"], true);
        assert_eq!(pc.step_outputs["b"]["_error"], "boom");
        assert!(pc.current.is_empty());
    }

    #[test]
    fn test_lookup_roots() {
        let mut pc = PipelineContext::new(object(serde_json::json!({"id": "t1", "kind": "event"})));
        pc.record_step_output("fetch", object(serde_json::json!({"kind": "step", "url": "u"})));
        pc.set_meta(meta::PIPELINE, Value::String("intake".to_string()));

        // current wins over trigger data on collisions
        assert_eq!(pc.lookup(&["kind"]).unwrap(), "step");
        assert_eq!(pc.lookup(&["trigger", "kind"]).unwrap(), "event");
        assert_eq!(pc.lookup(&["steps", "fetch", "url"]).unwrap(), "u");
        assert_eq!(pc.lookup(&["meta", "pipeline"]).unwrap(), "intake");
        assert!(pc.lookup(&["steps", "missing", "url"]).is_none());
    }
}
