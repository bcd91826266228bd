//! Typed AST for the BPM DSL.
//!
//! The parser is the only producer of these types; every downstream pass
//! (validation, layout, emission) treats them as immutable. Synthetic
//! elements created by the ProcessEntity expansion never appear here — the
//! emitter keeps them in its own working buffer.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Root process definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Process {
    pub name: String,
    /// Stable machine id, used as the BPMN process id.
    pub id: String,
    pub version: Option<String>,
    /// Elements in author order.
    pub elements: Vec<Element>,
    /// Flows in author order.
    pub flows: Vec<Flow>,
}

impl Process {
    /// Look up an element by id.
    pub fn element(&self, id: &str) -> Option<&Element> {
        self.elements.iter().find(|e| e.id() == id)
    }

    pub fn has_process_entity(&self) -> bool {
        self.elements
            .iter()
            .any(|e| matches!(e, Element::Entity(_)))
    }
}

/// A process element — one variant per surface keyword.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Element {
    Start(StartEvent),
    End(EndEvent),
    Script(ScriptCall),
    Service(ServiceTask),
    Entity(ProcessEntity),
    Gateway(XorGateway),
}

impl Element {
    pub fn id(&self) -> &str {
        match self {
            Element::Start(e) => &e.id,
            Element::End(e) => &e.id,
            Element::Script(e) => &e.id,
            Element::Service(e) => &e.id,
            Element::Entity(e) => &e.id,
            Element::Gateway(e) => &e.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Element::Start(e) => &e.name,
            Element::End(e) => &e.name,
            Element::Script(e) => &e.name,
            Element::Service(e) => &e.name,
            Element::Entity(e) => &e.name,
            Element::Gateway(e) => &e.name,
        }
    }

    /// Surface keyword, used in diagnostics and the `info` CLI command.
    pub fn kind(&self) -> &'static str {
        match self {
            Element::Start(_) => "start",
            Element::End(_) => "end",
            Element::Script(_) => "scriptCall",
            Element::Service(_) => "serviceTask",
            Element::Entity(_) => "processEntity",
            Element::Gateway(_) => "xorGateway",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartEvent {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndEvent {
    pub id: String,
    pub name: String,
}

/// Variable mapping from a source expression to a local target name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableMapping {
    pub source: String,
    pub target: String,
}

impl VariableMapping {
    /// Identity mapping used when desugaring `inputVars` / `outputVars`.
    pub fn identity(name: &str) -> Self {
        Self {
            source: name.to_string(),
            target: name.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptCall {
    pub id: String,
    pub name: String,
    /// Inline script expression (FEEL once emitted).
    pub script: String,
    pub input_mappings: Vec<VariableMapping>,
    pub output_mappings: Vec<VariableMapping>,
    /// Legacy convenience form; mutually exclusive with full mappings.
    pub input_vars: Vec<String>,
    pub output_vars: Vec<String>,
    pub result_variable: Option<String>,
}

impl ScriptCall {
    pub const DEFAULT_RESULT_VARIABLE: &'static str = "result";

    pub fn result_variable(&self) -> &str {
        self.result_variable
            .as_deref()
            .unwrap_or(Self::DEFAULT_RESULT_VARIABLE)
    }

    /// Input mappings with the legacy `inputVars` form desugared to
    /// identity mappings. The validator rejects programs that mix both.
    pub fn effective_input_mappings(&self) -> Vec<VariableMapping> {
        effective_mappings(&self.input_mappings, &self.input_vars)
    }

    pub fn effective_output_mappings(&self) -> Vec<VariableMapping> {
        effective_mappings(&self.output_mappings, &self.output_vars)
    }
}

/// Task header key/value pair carried into the engine extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskHeader {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceTask {
    pub id: String,
    pub name: String,
    /// Worker routing key.
    pub task_type: String,
    pub retries: u32,
    pub headers: Vec<TaskHeader>,
    pub input_mappings: Vec<VariableMapping>,
    pub output_mappings: Vec<VariableMapping>,
    pub input_vars: Vec<String>,
    pub output_vars: Vec<String>,
}

impl ServiceTask {
    pub const DEFAULT_RETRIES: u32 = 3;

    pub fn effective_input_mappings(&self) -> Vec<VariableMapping> {
        effective_mappings(&self.input_mappings, &self.input_vars)
    }

    pub fn effective_output_mappings(&self) -> Vec<VariableMapping> {
        effective_mappings(&self.output_mappings, &self.output_vars)
    }
}

fn effective_mappings(
    mappings: &[VariableMapping],
    vars: &[String],
) -> Vec<VariableMapping> {
    if !mappings.is_empty() {
        mappings.to_vec()
    } else {
        vars.iter().map(|v| VariableMapping::identity(v)).collect()
    }
}

/// Surface sugar: the emitter expands this into a validator service task,
/// an XOR check gateway, and an error end event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessEntity {
    pub id: String,
    pub name: String,
    /// Must match a schema key in the sidecar OpenAPI document.
    pub entity_name: String,
    /// Path of the sidecar OpenAPI file; recorded by the file-based parse
    /// entry point, absent when compiling from a bare string.
    pub entity_model: Option<String>,
}

impl ProcessEntity {
    /// Derive an element id from the display name: lowercased, whitespace
    /// runs joined with hyphens.
    pub fn derive_id(name: &str) -> String {
        name.split_whitespace()
            .map(|w| w.to_lowercase())
            .collect::<Vec<_>>()
            .join("-")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XorGateway {
    pub id: String,
    pub name: String,
    /// Informational default condition; per-edge conditions are
    /// authoritative.
    pub condition: Option<String>,
}

/// Directed sequence flow between two elements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub source_id: String,
    pub target_id: String,
    pub condition: Option<String>,
}

impl Flow {
    /// Deterministic BPMN sequence-flow id.
    pub fn bpmn_id(source_id: &str, target_id: &str) -> String {
        format!("flow_{}_to_{}", source_id, target_id)
    }
}

// ── Graph view ──

/// Read-only graph accessors over a process, built once per compile.
///
/// Index-based: positions in `process.elements` are the node handles, so
/// every traversal that iterates the maps in insertion order stays
/// deterministic.
pub struct ProcessGraph<'a> {
    process: &'a Process,
    by_id: HashMap<&'a str, usize>,
    successors: HashMap<&'a str, Vec<&'a str>>,
    predecessors: HashMap<&'a str, Vec<&'a str>>,
}

impl<'a> ProcessGraph<'a> {
    pub fn new(process: &'a Process) -> Self {
        let mut by_id = HashMap::new();
        for (idx, element) in process.elements.iter().enumerate() {
            // First occurrence wins; duplicates are a validator error.
            by_id.entry(element.id()).or_insert(idx);
        }

        let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut predecessors: HashMap<&str, Vec<&str>> = HashMap::new();
        for flow in &process.flows {
            successors
                .entry(flow.source_id.as_str())
                .or_default()
                .push(flow.target_id.as_str());
            predecessors
                .entry(flow.target_id.as_str())
                .or_default()
                .push(flow.source_id.as_str());
        }

        Self {
            process,
            by_id,
            successors,
            predecessors,
        }
    }

    pub fn process(&self) -> &'a Process {
        self.process
    }

    pub fn element(&self, id: &str) -> Option<&'a Element> {
        self.by_id.get(id).map(|&idx| &self.process.elements[idx])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// Successor ids in flow-declaration order.
    pub fn successors(&self, id: &str) -> &[&'a str] {
        self.successors.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Predecessor ids in flow-declaration order.
    pub fn predecessors(&self, id: &str) -> &[&'a str] {
        self.predecessors.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn in_degree(&self, id: &str) -> usize {
        self.predecessors(id).len()
    }

    pub fn out_degree(&self, id: &str) -> usize {
        self.successors(id).len()
    }

    /// Flows leaving `id`, in declaration order.
    pub fn outgoing_flows(&self, id: &str) -> Vec<&'a Flow> {
        self.process
            .flows
            .iter()
            .filter(|f| f.source_id == id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_step_process() -> Process {
        Process {
            name: "P".to_string(),
            id: "p".to_string(),
            version: None,
            elements: vec![
                Element::Start(StartEvent {
                    id: "s".to_string(),
                    name: "Start".to_string(),
                }),
                Element::Script(ScriptCall {
                    id: "t".to_string(),
                    name: "Task".to_string(),
                    script: "a + b".to_string(),
                    input_mappings: vec![],
                    output_mappings: vec![],
                    input_vars: vec!["a".to_string(), "b".to_string()],
                    output_vars: vec![],
                    result_variable: None,
                }),
                Element::End(EndEvent {
                    id: "e".to_string(),
                    name: "End".to_string(),
                }),
            ],
            flows: vec![
                Flow {
                    source_id: "s".to_string(),
                    target_id: "t".to_string(),
                    condition: None,
                },
                Flow {
                    source_id: "t".to_string(),
                    target_id: "e".to_string(),
                    condition: None,
                },
            ],
        }
    }

    #[test]
    fn graph_accessors() {
        let process = two_step_process();
        let graph = ProcessGraph::new(&process);

        assert_eq!(graph.successors("s"), &["t"]);
        assert_eq!(graph.successors("t"), &["e"]);
        assert_eq!(graph.predecessors("e"), &["t"]);
        assert_eq!(graph.in_degree("s"), 0);
        assert_eq!(graph.out_degree("e"), 0);
        assert!(graph.element("t").is_some());
        assert!(graph.element("missing").is_none());
    }

    #[test]
    fn input_vars_desugar_to_identity_mappings() {
        let process = two_step_process();
        let Element::Script(script) = &process.elements[1] else {
            panic!("expected scriptCall");
        };

        let mappings = script.effective_input_mappings();
        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings[0].source, "a");
        assert_eq!(mappings[0].target, "a");
    }

    #[test]
    fn explicit_mappings_win_over_vars() {
        let script = ScriptCall {
            id: "t".to_string(),
            name: "T".to_string(),
            script: "x".to_string(),
            input_mappings: vec![VariableMapping {
                source: "userData".to_string(),
                target: "localUserData".to_string(),
            }],
            output_mappings: vec![],
            input_vars: vec!["ignored".to_string()],
            output_vars: vec![],
            result_variable: None,
        };

        let mappings = script.effective_input_mappings();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].target, "localUserData");
    }

    #[test]
    fn result_variable_defaults() {
        let process = two_step_process();
        let Element::Script(script) = &process.elements[1] else {
            panic!("expected scriptCall");
        };
        assert_eq!(script.result_variable(), "result");
    }

    #[test]
    fn entity_id_derivation() {
        assert_eq!(ProcessEntity::derive_id("Load Customer"), "load-customer");
        assert_eq!(ProcessEntity::derive_id("Load"), "load");
        assert_eq!(
            ProcessEntity::derive_id("  Validate   Order Data "),
            "validate-order-data"
        );
    }

    #[test]
    fn flow_id_scheme() {
        assert_eq!(Flow::bpmn_id("s", "e"), "flow_s_to_e");
    }
}
