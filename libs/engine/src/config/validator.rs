//! Workflow document validation
//!
//! Structural checks run before the engine builds a runtime:
//! - unique module, workflow, pipeline, and step names
//! - known type tags with typo suggestions
//! - dependency references and module graph acyclicity
//! - step routing references and duration bounds

use std::collections::{HashMap, HashSet};

use petgraph::algo;
use petgraph::graph::DiGraph;

use super::types::{ConfigDocument, PipelineDecl, StateMachineDecl};
use super::ConfigError;

// =============================================================================
// Type Catalogue
// =============================================================================

/// The type tags known to the engine's factory registries
#[derive(Debug, Clone, Default)]
pub struct TypeCatalogue {
    /// Module type tags (e.g. `http.server`)
    pub module_types: Vec<String>,

    /// Step type tags (e.g. `step.set`)
    pub step_types: Vec<String>,

    /// Trigger type tags (e.g. `http`)
    pub trigger_types: Vec<String>,
}

// =============================================================================
// Validation
// =============================================================================

/// Validate an entire workflow document against the known type catalogue.
///
/// Runs all checks and returns the first error found.
pub fn validate_document(doc: &ConfigDocument, types: &TypeCatalogue) -> Result<(), ConfigError> {
    validate_modules(doc, types)?;
    validate_module_graph(doc)?;
    validate_workflows(doc, types)?;
    Ok(())
}

fn validate_modules(doc: &ConfigDocument, types: &TypeCatalogue) -> Result<(), ConfigError> {
    let mut seen: HashSet<&str> = HashSet::new();

    for (idx, module) in doc.modules.iter().enumerate() {
        if module.name.is_empty() {
            return Err(ConfigError::new("module name must not be empty")
                .with_location(format!("modules[{idx}].name")));
        }

        if !seen.insert(module.name.as_str()) {
            return Err(
                ConfigError::new(format!("duplicate module name '{}'", module.name))
                    .with_location(format!("modules[{idx}].name")),
            );
        }

        if !types.module_types.iter().any(|t| t == &module.module_type) {
            let mut err =
                ConfigError::new(format!("unknown module type '{}'", module.module_type))
                    .with_location(format!("modules[{idx}].type"));
            if let Some(similar) = find_similar(&module.module_type, &types.module_types) {
                err = err.with_suggestion(format!("Did you mean '{similar}'?"));
            }
            return Err(err);
        }
    }

    // Dependency references, both inline and via connections
    let names: HashSet<&str> = doc.modules.iter().map(|m| m.name.as_str()).collect();
    for (idx, module) in doc.modules.iter().enumerate() {
        for dep in &module.depends_on {
            if !names.contains(dep.as_str()) {
                return Err(ConfigError::new(format!(
                    "module '{}' depends on unknown module '{dep}'",
                    module.name
                ))
                .with_location(format!("modules[{idx}].depends_on")));
            }
        }
    }
    for (idx, conn) in doc.connections.iter().enumerate() {
        for (end, name) in [("from", &conn.from), ("to", &conn.to)] {
            if !names.contains(name.as_str()) {
                return Err(
                    ConfigError::new(format!("connection references unknown module '{name}'"))
                        .with_location(format!("connections[{idx}].{end}")),
                );
            }
        }
    }

    Ok(())
}

/// Validate the module dependency graph is acyclic
fn validate_module_graph(doc: &ConfigDocument) -> Result<(), ConfigError> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut indices = HashMap::new();

    for module in &doc.modules {
        let idx = graph.add_node(module.name.as_str());
        indices.insert(module.name.as_str(), idx);
    }

    let mut add_edge = |from: &str, to: &str| {
        if let (Some(&a), Some(&b)) = (indices.get(from), indices.get(to)) {
            graph.add_edge(a, b, ());
        }
    };
    for module in &doc.modules {
        for dep in &module.depends_on {
            add_edge(module.name.as_str(), dep.as_str());
        }
    }
    for conn in &doc.connections {
        add_edge(conn.from.as_str(), conn.to.as_str());
    }

    if algo::is_cyclic_directed(&graph) {
        let sccs = algo::kosaraju_scc(&graph);
        let cycle: Vec<&str> = sccs
            .iter()
            .find(|scc| scc.len() > 1)
            .map(|scc| scc.iter().map(|&idx| graph[idx]).collect())
            .unwrap_or_default();

        return Err(ConfigError::new(format!(
            "module dependency graph contains a cycle involving: {}",
            cycle.join(" -> ")
        )));
    }

    Ok(())
}

fn validate_workflows(doc: &ConfigDocument, types: &TypeCatalogue) -> Result<(), ConfigError> {
    let mut workflow_names: HashSet<&str> = HashSet::new();
    let all_workflows: HashMap<&str, &super::types::WorkflowDecl> =
        doc.workflows.iter().map(|w| (w.name.as_str(), w)).collect();

    for (widx, workflow) in doc.workflows.iter().enumerate() {
        if !workflow_names.insert(workflow.name.as_str()) {
            return Err(
                ConfigError::new(format!("duplicate workflow name '{}'", workflow.name))
                    .with_location(format!("workflows[{widx}].name")),
            );
        }

        if workflow.pipelines.is_empty() {
            return Err(
                ConfigError::new(format!("workflow '{}' has no pipelines", workflow.name))
                    .with_location(format!("workflows[{widx}].pipelines")),
            );
        }

        let mut pipeline_names: HashSet<&str> = HashSet::new();
        for (pidx, pipeline) in workflow.pipelines.iter().enumerate() {
            if !pipeline_names.insert(pipeline.name.as_str()) {
                return Err(ConfigError::new(format!(
                    "duplicate pipeline name '{}' in workflow '{}'",
                    pipeline.name, workflow.name
                ))
                .with_location(format!("workflows[{widx}].pipelines[{pidx}].name")));
            }

            validate_pipeline(pipeline, types, &format!("workflows[{widx}].pipelines[{pidx}]"))?;
        }

        for (tidx, trigger) in workflow.triggers.iter().enumerate() {
            let location = format!("workflows[{widx}].triggers[{tidx}]");

            if !types
                .trigger_types
                .iter()
                .any(|t| t == &trigger.trigger_type)
            {
                let mut err =
                    ConfigError::new(format!("unknown trigger type '{}'", trigger.trigger_type))
                        .with_location(format!("{location}.type"));
                if let Some(similar) = find_similar(&trigger.trigger_type, &types.trigger_types) {
                    err = err.with_suggestion(format!("Did you mean '{similar}'?"));
                }
                return Err(err);
            }

            // Trigger targets default to the enclosing workflow
            let target_name = trigger.workflow.as_deref().unwrap_or(&workflow.name);
            let Some(target) = all_workflows.get(target_name) else {
                return Err(ConfigError::new(format!(
                    "trigger references unknown workflow '{target_name}'"
                ))
                .with_location(format!("{location}.workflow")));
            };

            if let Some(action) = trigger.action.as_deref() {
                if !target.pipelines.iter().any(|p| p.name == action) {
                    let candidates: Vec<String> =
                        target.pipelines.iter().map(|p| p.name.clone()).collect();
                    let mut err = ConfigError::new(format!(
                        "trigger references unknown action '{action}' in workflow '{target_name}'"
                    ))
                    .with_location(format!("{location}.action"));
                    if let Some(similar) = find_similar(action, &candidates) {
                        err = err.with_suggestion(format!("Did you mean '{similar}'?"));
                    }
                    return Err(err);
                }
            }
        }

        for (sidx, machine) in workflow.state_machines.iter().enumerate() {
            validate_state_machine(machine, &format!("workflows[{widx}].state_machines[{sidx}]"))?;
        }
    }

    Ok(())
}

fn validate_pipeline(
    pipeline: &PipelineDecl,
    types: &TypeCatalogue,
    location: &str,
) -> Result<(), ConfigError> {
    if pipeline.steps.is_empty() {
        return Err(ConfigError::new(format!(
            "pipeline '{}' has no steps",
            pipeline.name
        ))
        .with_location(format!("{location}.steps")));
    }

    if let Some(timeout) = pipeline.timeout.as_deref() {
        if humantime::parse_duration(timeout).is_err() {
            return Err(
                ConfigError::new(format!("invalid pipeline timeout '{timeout}'"))
                    .with_location(format!("{location}.timeout")),
            );
        }
    }

    let mut step_names: HashSet<&str> = HashSet::new();
    for (idx, step) in pipeline.steps.iter().enumerate() {
        if !step_names.insert(step.name.as_str()) {
            return Err(ConfigError::new(format!(
                "duplicate step name '{}' in pipeline '{}'",
                step.name, pipeline.name
            ))
            .with_location(format!("{location}.steps[{idx}].name")));
        }
    }

    for (list, steps) in [
        ("steps", &pipeline.steps),
        ("compensation", &pipeline.compensation),
    ] {
        for (idx, step) in steps.iter().enumerate() {
            if !types.step_types.iter().any(|t| t == &step.step_type) {
                let mut err = ConfigError::new(format!("unknown step type '{}'", step.step_type))
                    .with_location(format!("{location}.{list}[{idx}].type"));
                if let Some(similar) = find_similar(&step.step_type, &types.step_types) {
                    err = err.with_suggestion(format!("Did you mean '{similar}'?"));
                }
                return Err(err);
            }
        }
    }

    // Every static route must land on a sibling step
    for (idx, step) in pipeline.steps.iter().enumerate() {
        if let Some(next) = step.next.as_deref() {
            if !step_names.contains(next) {
                let candidates: Vec<String> =
                    pipeline.steps.iter().map(|s| s.name.clone()).collect();
                let mut err = ConfigError::new(format!(
                    "step '{}' routes to unknown step '{next}'",
                    step.name
                ))
                .with_location(format!("{location}.steps[{idx}].next"));
                if let Some(similar) = find_similar(next, &candidates) {
                    err = err.with_suggestion(format!("Did you mean '{similar}'?"));
                }
                return Err(err);
            }
        }
    }

    Ok(())
}

fn validate_state_machine(machine: &StateMachineDecl, location: &str) -> Result<(), ConfigError> {
    if machine.name.is_empty() {
        return Err(ConfigError::new("state machine name must not be empty")
            .with_location(format!("{location}.name")));
    }

    let mut states: HashSet<&str> = HashSet::new();
    for (idx, state) in machine.states.iter().enumerate() {
        if !states.insert(state.name.as_str()) {
            return Err(ConfigError::new(format!(
                "duplicate state '{}' in state machine '{}'",
                state.name, machine.name
            ))
            .with_location(format!("{location}.states[{idx}]")));
        }
    }

    if !states.contains(machine.initial_state.as_str()) {
        return Err(ConfigError::new(format!(
            "state machine '{}' initial state '{}' is not a declared state",
            machine.name, machine.initial_state
        ))
        .with_location(format!("{location}.initial_state")));
    }

    let mut transitions: HashSet<&str> = HashSet::new();
    for (idx, transition) in machine.transitions.iter().enumerate() {
        if !transitions.insert(transition.name.as_str()) {
            return Err(ConfigError::new(format!(
                "duplicate transition '{}' in state machine '{}'",
                transition.name, machine.name
            ))
            .with_location(format!("{location}.transitions[{idx}]")));
        }
        for (end, state) in [("from", &transition.from), ("to", &transition.to)] {
            if !states.contains(state.as_str()) {
                return Err(ConfigError::new(format!(
                    "transition '{}' references unknown state '{state}'",
                    transition.name
                ))
                .with_location(format!("{location}.transitions[{idx}].{end}")));
            }
        }
    }

    Ok(())
}

/// Find a similar name using Levenshtein distance
fn find_similar<'a, S: AsRef<str>>(target: &str, candidates: &'a [S]) -> Option<&'a str> {
    let mut best_match: Option<&str> = None;
    let mut best_distance = usize::MAX;

    for candidate in candidates {
        let candidate = candidate.as_ref();
        let distance = strsim::levenshtein(target, candidate);
        // Only suggest reasonably close names
        if distance < best_distance && distance <= 3 {
            best_distance = distance;
            best_match = Some(candidate);
        }
    }

    best_match
}
