//! Structural and engine-compatibility validation.
//!
//! `validate` is exhaustive: every check runs and every violation lands in
//! the returned [`Report`]. Graph-based checks operate on the subgraph of
//! resolvable flows, so a dangling endpoint produces exactly one
//! diagnostic instead of cascading.

use std::collections::{HashMap, HashSet};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;

use crate::ast::{Element, Flow, Process, ProcessGraph};
use crate::diagnostics::{Diagnostic, DiagnosticCode, Report};
use crate::sidecar::OpenApiSidecar;

/// Validation knobs. Connectivity is strict by default: unreachable
/// elements are errors, not warnings.
#[derive(Debug, Clone)]
pub struct ValidationOptions {
    pub strict_connectivity: bool,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            strict_connectivity: true,
        }
    }
}

/// Validate with default options and no sidecar schema resolution.
pub fn validate(process: &Process) -> Report {
    validate_with(process, &ValidationOptions::default(), None)
}

/// Full validation entry point. When a sidecar is supplied, every
/// `processEntity.entityName` must resolve against its schema set.
pub fn validate_with(
    process: &Process,
    options: &ValidationOptions,
    sidecar: Option<&OpenApiSidecar>,
) -> Report {
    let mut report = Report::default();
    let graph = ProcessGraph::new(process);

    check_process_basics(process, &mut report);
    check_unique_ids(process, &mut report);
    check_flow_endpoints(process, &graph, &mut report);
    check_events_and_degrees(process, &graph, &mut report);
    check_connectivity(process, options, &mut report);
    check_gateways(process, &graph, &mut report);
    check_process_entity(process, &graph, sidecar, &mut report);
    check_engine_compat(process, &graph, &mut report);

    tracing::debug!(
        process = %process.id,
        errors = report.errors.len(),
        warnings = report.warnings.len(),
        "validation finished"
    );
    report
}

/// A lone start/end pair with an empty `flow { }` is accepted; the emitter
/// synthesizes the connecting flow.
fn is_minimal_pair(process: &Process) -> bool {
    process.flows.is_empty()
        && process.elements.len() == 2
        && matches!(process.elements[0], Element::Start(_))
        && matches!(process.elements[1], Element::End(_))
}

fn check_process_basics(process: &Process, report: &mut Report) {
    if process.name.trim().is_empty() {
        report.push(Diagnostic::error(
            DiagnosticCode::EmptyProcessName,
            "process must have a non-empty name",
        ));
    }
    if process.id.trim().is_empty() {
        report.push(Diagnostic::error(
            DiagnosticCode::EmptyProcessId,
            "process must have a non-empty id",
        ));
    } else if !is_valid_xml_id(&process.id) {
        report.push(Diagnostic::error(
            DiagnosticCode::InvalidXmlId,
            format!("process id '{}' is not a valid XML identifier", process.id),
        ));
    }

    for element in &process.elements {
        if element.name().trim().is_empty() {
            report.push(
                Diagnostic::error(
                    DiagnosticCode::EmptyElementName,
                    format!("element '{}' must have a non-empty name", element.id()),
                )
                .with_element(element.id()),
            );
        }
        if !is_valid_xml_id(element.id()) {
            report.push(
                Diagnostic::error(
                    DiagnosticCode::InvalidXmlId,
                    format!(
                        "element id '{}' is not a valid XML identifier",
                        element.id()
                    ),
                )
                .with_element(element.id()),
            );
        }
        if let Element::Script(script) = element {
            if script.script.trim().is_empty() {
                report.push(
                    Diagnostic::error(
                        DiagnosticCode::EmptyScript,
                        format!("scriptCall '{}' must have a non-empty script", script.id),
                    )
                    .with_element(script.id.clone()),
                );
            }
        }
    }
}

fn check_unique_ids(process: &Process, report: &mut Report) {
    let mut seen: HashSet<&str> = HashSet::new();
    for element in &process.elements {
        if !seen.insert(element.id()) {
            report.push(
                Diagnostic::error(
                    DiagnosticCode::DuplicateId,
                    format!("duplicate element id '{}'", element.id()),
                )
                .with_element(element.id()),
            );
        }
    }
}

fn check_flow_endpoints(process: &Process, graph: &ProcessGraph, report: &mut Report) {
    for flow in &process.flows {
        if !graph.contains(&flow.source_id) {
            report.push(Diagnostic::error(
                DiagnosticCode::UnknownFlowSource,
                format!(
                    "flow references non-existent source element '{}'",
                    flow.source_id
                ),
            ));
        }
        if !graph.contains(&flow.target_id) {
            report.push(Diagnostic::error(
                DiagnosticCode::UnknownFlowTarget,
                format!(
                    "flow references non-existent target element '{}'",
                    flow.target_id
                ),
            ));
        }
        if flow.source_id == flow.target_id {
            report.push(
                Diagnostic::error(
                    DiagnosticCode::SelfLoopFlow,
                    format!("flow loops back onto '{}'", flow.source_id),
                )
                .with_element(flow.source_id.clone()),
            );
        }
    }
}

fn check_events_and_degrees(process: &Process, graph: &ProcessGraph, report: &mut Report) {
    let starts: Vec<&Element> = process
        .elements
        .iter()
        .filter(|e| matches!(e, Element::Start(_)))
        .collect();
    let ends: Vec<&Element> = process
        .elements
        .iter()
        .filter(|e| matches!(e, Element::End(_)))
        .collect();

    if starts.is_empty() {
        report.push(Diagnostic::error(
            DiagnosticCode::MissingStartEvent,
            "process must have at least one start event",
        ));
    }
    if ends.is_empty() {
        report.push(Diagnostic::error(
            DiagnosticCode::MissingEndEvent,
            "process must have at least one end event",
        ));
    }

    for start in &starts {
        if graph.in_degree(start.id()) > 0 {
            report.push(
                Diagnostic::error(
                    DiagnosticCode::StartEventHasIncoming,
                    format!("start event '{}' cannot have incoming flows", start.id()),
                )
                .with_element(start.id()),
            );
        }
    }
    for end in &ends {
        if graph.out_degree(end.id()) > 0 {
            report.push(
                Diagnostic::error(
                    DiagnosticCode::EndEventHasOutgoing,
                    format!("end event '{}' cannot have outgoing flows", end.id()),
                )
                .with_element(end.id()),
            );
        }
    }

    if is_minimal_pair(process) {
        return;
    }

    // Non-gateway, non-end elements route to exactly one successor.
    for element in &process.elements {
        if matches!(element, Element::Gateway(_) | Element::End(_)) {
            continue;
        }
        match graph.out_degree(element.id()) {
            0 => report.push(
                Diagnostic::error(
                    DiagnosticCode::MissingOutgoingFlow,
                    format!("element '{}' has no outgoing flow", element.id()),
                )
                .with_element(element.id()),
            ),
            1 => {}
            n => report.push(
                Diagnostic::error(
                    DiagnosticCode::MultipleOutgoingFlows,
                    format!(
                        "element '{}' has {} outgoing flows, expected exactly 1",
                        element.id(),
                        n
                    ),
                )
                .with_element(element.id()),
            ),
        }
    }
}

fn check_connectivity(process: &Process, options: &ValidationOptions, report: &mut Report) {
    if is_minimal_pair(process) || process.elements.is_empty() {
        return;
    }

    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut indices: HashMap<&str, NodeIndex> = HashMap::new();
    for element in &process.elements {
        indices
            .entry(element.id())
            .or_insert_with(|| graph.add_node(element.id()));
    }
    for flow in &process.flows {
        if let (Some(&a), Some(&b)) = (
            indices.get(flow.source_id.as_str()),
            indices.get(flow.target_id.as_str()),
        ) {
            graph.add_edge(a, b, ());
        }
    }

    let mut reachable: HashSet<NodeIndex> = HashSet::new();
    for element in &process.elements {
        if matches!(element, Element::Start(_)) {
            let start_idx = indices[element.id()];
            let mut dfs = Dfs::new(&graph, start_idx);
            while let Some(nx) = dfs.next(&graph) {
                reachable.insert(nx);
            }
        }
    }

    for element in &process.elements {
        let idx = indices[element.id()];
        if !reachable.contains(&idx) {
            let diag = if options.strict_connectivity {
                Diagnostic::error(
                    DiagnosticCode::UnreachableElement,
                    format!("element '{}' is not reachable from a start event", element.id()),
                )
            } else {
                Diagnostic::warning(
                    DiagnosticCode::UnreachableElement,
                    format!("element '{}' is not reachable from a start event", element.id()),
                )
            };
            report.push(diag.with_element(element.id()));
        }
    }
}

fn check_gateways(process: &Process, graph: &ProcessGraph, report: &mut Report) {
    for element in &process.elements {
        let Element::Gateway(gateway) = element else {
            continue;
        };
        let outgoing: Vec<&Flow> = graph.outgoing_flows(&gateway.id);

        match outgoing.len() {
            0 => report.push(
                Diagnostic::error(
                    DiagnosticCode::GatewayNoOutgoing,
                    format!("gateway '{}' has no outgoing flow", gateway.id),
                )
                .with_element(gateway.id.clone()),
            ),
            1 => {
                // Pass-through gateway is fine; a lone conditional branch is
                // suspicious (the condition can never route anywhere else).
                if outgoing[0].condition.is_some() {
                    report.push(
                        Diagnostic::warning(
                            DiagnosticCode::GatewaySingleConditional,
                            format!(
                                "gateway '{}' has a single conditional outgoing flow",
                                gateway.id
                            ),
                        )
                        .with_element(gateway.id.clone()),
                    );
                }
            }
            _ => {
                let unconditional = outgoing.iter().filter(|f| f.condition.is_none()).count();
                if unconditional > 1 {
                    report.push(
                        Diagnostic::error(
                            DiagnosticCode::GatewayExtraDefault,
                            format!(
                                "gateway '{}' has {} unconditional outgoing flows, at most 1 (the default branch) is allowed",
                                gateway.id, unconditional
                            ),
                        )
                        .with_element(gateway.id.clone()),
                    );
                }
            }
        }
    }
}

fn check_process_entity(
    process: &Process,
    graph: &ProcessGraph,
    sidecar: Option<&OpenApiSidecar>,
    report: &mut Report,
) {
    let entities: Vec<_> = process
        .elements
        .iter()
        .filter_map(|e| match e {
            Element::Entity(entity) => Some(entity),
            _ => None,
        })
        .collect();

    if entities.len() > 1 {
        report.push(Diagnostic::error(
            DiagnosticCode::MultipleProcessEntities,
            format!(
                "process declares {} processEntity elements, at most 1 is allowed",
                entities.len()
            ),
        ));
    }

    for entity in &entities {
        let predecessors = graph.predecessors(&entity.id);
        let directly_after_start = predecessors.len() == 1
            && matches!(graph.element(predecessors[0]), Some(Element::Start(_)));
        if !directly_after_start {
            report.push(
                Diagnostic::error(
                    DiagnosticCode::MisplacedProcessEntity,
                    format!(
                        "processEntity '{}' must be the unique successor of a start event",
                        entity.id
                    ),
                )
                .with_element(entity.id.clone()),
            );
        }

        if let Some(sidecar) = sidecar {
            if !sidecar.has_schema(&entity.entity_name) {
                report.push(
                    Diagnostic::error(
                        DiagnosticCode::UnknownEntitySchema,
                        format!(
                            "entity '{}' does not match any schema in '{}'",
                            entity.entity_name,
                            sidecar.path.display()
                        ),
                    )
                    .with_element(entity.id.clone()),
                );
            }
        }
    }
}

fn check_engine_compat(process: &Process, graph: &ProcessGraph, report: &mut Report) {
    // Conditions belong on gateway-outgoing edges. Flows leaving a
    // processEntity are exempt: expansion rewires them onto the synthetic
    // validation gateway, where the condition lands.
    for flow in &process.flows {
        if flow.condition.is_none() {
            continue;
        }
        match graph.element(&flow.source_id) {
            Some(Element::Gateway(_)) | Some(Element::Entity(_)) | None => {}
            Some(source) => {
                report.push(
                    Diagnostic::error(
                        DiagnosticCode::ConditionOnNonGateway,
                        format!(
                            "flow '{}' -> '{}' carries a condition but its source is a {}",
                            flow.source_id,
                            flow.target_id,
                            source.kind()
                        ),
                    )
                    .with_element(flow.source_id.clone()),
                );
            }
        }
    }

    // Legacy var lists and full mappings are never merged.
    for element in &process.elements {
        let (id, mixed_in, mixed_out) = match element {
            Element::Script(s) => (
                &s.id,
                !s.input_vars.is_empty() && !s.input_mappings.is_empty(),
                !s.output_vars.is_empty() && !s.output_mappings.is_empty(),
            ),
            Element::Service(s) => (
                &s.id,
                !s.input_vars.is_empty() && !s.input_mappings.is_empty(),
                !s.output_vars.is_empty() && !s.output_mappings.is_empty(),
            ),
            _ => continue,
        };
        if mixed_in {
            report.push(
                Diagnostic::error(
                    DiagnosticCode::MixedVariableMappings,
                    format!(
                        "element '{}' mixes inputVars with inputMappings; use one form",
                        id
                    ),
                )
                .with_element(id.clone()),
            );
        }
        if mixed_out {
            report.push(
                Diagnostic::error(
                    DiagnosticCode::MixedVariableMappings,
                    format!(
                        "element '{}' mixes outputVars with outputMappings; use one form",
                        id
                    ),
                )
                .with_element(id.clone()),
            );
        }
    }
}

/// XML NCName-ish check: leading letter or underscore, then letters,
/// digits, `-`, `_`, or `.`.
fn is_valid_xml_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
