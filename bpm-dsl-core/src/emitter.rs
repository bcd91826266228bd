//! BPMN 2.0 XML emission (Zeebe-compatible).
//!
//! The emitter is a pure function of the AST. ProcessEntity elements are
//! expanded into a validator service task, a check gateway, and an error
//! end event inside a private working buffer ([`Expansion`]); the AST
//! itself is never mutated. The expanded graph is handed to the layout
//! engine so the synthetic nodes get diagram positions.
//!
//! Output is byte-deterministic: element order follows author order,
//! attribute order is fixed, and coordinates are truncated to integers.

use std::collections::HashMap;
use std::fmt::Write;

use anyhow::Result;

use crate::ast::{Element, Flow, Process, ProcessEntity, ScriptCall, ServiceTask, VariableMapping};
use crate::layout::{self, LayoutConfig};

/// Task-definition type of the synthetic entity validator.
pub const ENTITY_VALIDATOR_TYPE: &str = "process-entity-validator";
/// Process-level error declaration shared by all entity expansions.
pub const ENTITY_ERROR_ID: &str = "process-entity-validation-error";
pub const ENTITY_ERROR_CODE: &str = "PROCESS_ENTITY_VALIDATION_ERROR";

const NS_BPMN: &str = "http://www.omg.org/spec/BPMN/20100524/MODEL";
const NS_BPMNDI: &str = "http://www.omg.org/spec/BPMN/20100524/DI";
const NS_DC: &str = "http://www.omg.org/spec/DD/20100524/DC";
const NS_DI: &str = "http://www.omg.org/spec/DD/20100524/DI";
const NS_ZEEBE: &str = "http://camunda.org/schema/zeebe/1.0";
const NS_XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";

#[derive(Debug, Clone)]
pub struct EmitterConfig {
    /// Prepend the `<?xml ...?>` declaration.
    pub xml_declaration: bool,
    pub layout: LayoutConfig,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            xml_declaration: true,
            layout: LayoutConfig::default(),
        }
    }
}

// ============================================================================
// ProcessEntity expansion — the emitter's private working buffer
// ============================================================================

/// Synthetic node ids for one expanded ProcessEntity, keyed by the source
/// element's id through the fixed suffix scheme.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityExpansion {
    pub entity_id: String,
    pub gateway_id: String,
    pub error_id: String,
}

impl EntityExpansion {
    fn for_entity(entity: &ProcessEntity) -> Self {
        Self {
            entity_id: entity.id.clone(),
            gateway_id: format!("{}-validation-gateway", entity.id),
            error_id: format!("{}-validation-error", entity.id),
        }
    }
}

/// One flow of the expanded graph. Conditions are stored in their final
/// FEEL form, ready to emit.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandedFlow {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub condition: Option<String>,
    /// Marks the success branch of an entity-validation gateway; the
    /// `default` attribute points here even when a folded condition is
    /// present.
    pub is_default: bool,
}

impl ExpandedFlow {
    fn plain(source: &str, target: &str, condition: Option<String>) -> Self {
        Self {
            id: Flow::bpmn_id(source, target),
            source_id: source.to_string(),
            target_id: target.to_string(),
            condition,
            is_default: false,
        }
    }
}

/// The expanded graph: author flows with entity rewiring applied, plus
/// the synthetic node ids.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Expansion {
    pub flows: Vec<ExpandedFlow>,
    pub entities: Vec<EntityExpansion>,
}

/// Expand ProcessEntity sugar into the working graph handed to layout and
/// emission. For an entity `E` with original edge `E -> X`:
///
/// ```text
/// ... -> E                     (unchanged)
///        E -> E-validation-gateway
///        E-validation-gateway -> X                      (default branch)
///        E-validation-gateway -> E-validation-error     (isValid = false)
/// ```
///
/// A lone start/end pair with an empty flow list gets its single
/// connecting flow synthesized here.
pub fn expand(process: &Process) -> Expansion {
    let entities: Vec<EntityExpansion> = process
        .elements
        .iter()
        .filter_map(|e| match e {
            Element::Entity(entity) => Some(EntityExpansion::for_entity(entity)),
            _ => None,
        })
        .collect();
    let by_entity: HashMap<&str, &EntityExpansion> = entities
        .iter()
        .map(|exp| (exp.entity_id.as_str(), exp))
        .collect();

    let mut flows = Vec::new();

    if process.flows.is_empty() && process.elements.len() == 2 {
        if let (Element::Start(start), Element::End(end)) =
            (&process.elements[0], &process.elements[1])
        {
            flows.push(ExpandedFlow::plain(&start.id, &end.id, None));
            return Expansion { flows, entities };
        }
    }

    for flow in &process.flows {
        if let Some(exp) = by_entity.get(flow.target_id.as_str()) {
            // Incoming edge stays, followed by the validation pattern.
            flows.push(ExpandedFlow::plain(
                &flow.source_id,
                &flow.target_id,
                flow.condition.as_deref().map(ensure_feel_expression),
            ));
            flows.push(ExpandedFlow::plain(&exp.entity_id, &exp.gateway_id, None));
            flows.push(ExpandedFlow {
                id: Flow::bpmn_id(&exp.gateway_id, &exp.error_id),
                source_id: exp.gateway_id.clone(),
                target_id: exp.error_id.clone(),
                condition: Some("=entityValidationResult.isValid = false".to_string()),
                is_default: false,
            });
        } else if let Some(exp) = by_entity.get(flow.source_id.as_str()) {
            // Outgoing edge is rewired to originate at the gateway; an
            // author condition folds into the success branch.
            let condition = flow.condition.as_deref().map(|cond| {
                let feel = ensure_feel_expression(cond);
                let body = feel.strip_prefix('=').unwrap_or(&feel).to_string();
                format!("=entityValidationResult.isValid = true and ({})", body)
            });
            flows.push(ExpandedFlow {
                id: Flow::bpmn_id(&exp.gateway_id, &flow.target_id),
                source_id: exp.gateway_id.clone(),
                target_id: flow.target_id.clone(),
                condition,
                is_default: true,
            });
        } else {
            flows.push(ExpandedFlow::plain(
                &flow.source_id,
                &flow.target_id,
                flow.condition.as_deref().map(ensure_feel_expression),
            ));
        }
    }

    Expansion { flows, entities }
}

/// Coerce an author expression into FEEL: prefix `=`, JavaScript equality
/// becomes FEEL equality, string literals use double quotes.
pub(crate) fn ensure_feel_expression(expression: &str) -> String {
    if expression.is_empty() || expression.starts_with('=') {
        return expression.to_string();
    }
    let feel = expression.replace(" == ", " = ").replace('\'', "\"");
    format!("={}", feel)
}

// ============================================================================
// Emission
// ============================================================================

/// Emit BPMN 2.0 XML with the default configuration.
pub fn emit(process: &Process) -> Result<String> {
    emit_with(process, &EmitterConfig::default())
}

pub fn emit_with(process: &Process, config: &EmitterConfig) -> Result<String> {
    let expansion = expand(process);
    let diagram = layout::compute(process, &expansion, &config.layout);
    let defaults = gateway_defaults(process, &expansion);
    tracing::debug!(
        process = %process.id,
        flows = expansion.flows.len(),
        entities = expansion.entities.len(),
        "emitting BPMN document"
    );

    let mut xml = String::new();

    if config.xml_declaration {
        writeln!(xml, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
    }

    // ── Definitions header ──
    let pid = xml_escape(&process.id);
    writeln!(xml, r#"<definitions id="definitions_{}""#, pid)?;
    writeln!(xml, r#"             targetNamespace="http://bpmn.io/schema/bpmn""#)?;
    writeln!(xml, r#"             exporter="BPM DSL""#)?;
    writeln!(xml, r#"             exporterVersion="1.0""#)?;
    writeln!(xml, r#"             xmlns="{}""#, NS_BPMN)?;
    writeln!(xml, r#"             xmlns:bpmndi="{}""#, NS_BPMNDI)?;
    writeln!(xml, r#"             xmlns:dc="{}""#, NS_DC)?;
    writeln!(xml, r#"             xmlns:di="{}""#, NS_DI)?;
    writeln!(xml, r#"             xmlns:zeebe="{}""#, NS_ZEEBE)?;
    writeln!(xml, r#"             xmlns:xsi="{}">"#, NS_XSI)?;

    // Single process-level error declaration, present iff any entity.
    if !expansion.entities.is_empty() {
        writeln!(
            xml,
            r#"  <error id="{}" name="Process Entity Validation Error" errorCode="{}" />"#,
            ENTITY_ERROR_ID, ENTITY_ERROR_CODE
        )?;
    }

    writeln!(
        xml,
        r#"  <process id="{}" name="{}" isExecutable="true">"#,
        pid,
        xml_escape(&process.name)
    )?;

    for element in &process.elements {
        match element {
            Element::Start(start) => {
                writeln!(
                    xml,
                    r#"    <startEvent id="{}" name="{}" />"#,
                    xml_escape(&start.id),
                    xml_escape(&start.name)
                )?;
            }
            Element::End(end) => {
                writeln!(
                    xml,
                    r#"    <endEvent id="{}" name="{}" />"#,
                    xml_escape(&end.id),
                    xml_escape(&end.name)
                )?;
            }
            Element::Script(script) => write_script_task(&mut xml, script)?,
            Element::Service(service) => write_service_task(&mut xml, service)?,
            Element::Entity(entity) => write_entity_expansion(&mut xml, entity, &defaults)?,
            Element::Gateway(gateway) => {
                let default_attr = defaults
                    .get(gateway.id.as_str())
                    .map(|fid| format!(r#" default="{}""#, fid))
                    .unwrap_or_default();
                writeln!(
                    xml,
                    r#"    <exclusiveGateway id="{}" name="{}"{} />"#,
                    xml_escape(&gateway.id),
                    xml_escape(&gateway.name),
                    default_attr
                )?;
            }
        }
    }

    // ── Sequence flows ──
    for flow in &expansion.flows {
        match &flow.condition {
            Some(condition) => {
                writeln!(
                    xml,
                    r#"    <sequenceFlow id="{}" sourceRef="{}" targetRef="{}">"#,
                    flow.id,
                    xml_escape(&flow.source_id),
                    xml_escape(&flow.target_id)
                )?;
                writeln!(
                    xml,
                    r#"      <conditionExpression xsi:type="tFormalExpression">{}</conditionExpression>"#,
                    xml_escape_text(condition)
                )?;
                writeln!(xml, r#"    </sequenceFlow>"#)?;
            }
            None => {
                writeln!(
                    xml,
                    r#"    <sequenceFlow id="{}" sourceRef="{}" targetRef="{}" />"#,
                    flow.id,
                    xml_escape(&flow.source_id),
                    xml_escape(&flow.target_id)
                )?;
            }
        }
    }

    writeln!(xml, r#"  </process>"#)?;

    // ── Diagram ──
    writeln!(xml, r#"  <bpmndi:BPMNDiagram id="diagram_{}">"#, pid)?;
    writeln!(
        xml,
        r#"    <bpmndi:BPMNPlane id="plane_{}" bpmnElement="{}">"#,
        pid, pid
    )?;

    for element in &process.elements {
        write_shape(&mut xml, element.id(), &diagram)?;
    }
    for entity in &expansion.entities {
        write_shape(&mut xml, &entity.gateway_id, &diagram)?;
        write_shape(&mut xml, &entity.error_id, &diagram)?;
    }

    for flow in &expansion.flows {
        let Some(route) = diagram.routes.get(&flow.id) else {
            continue;
        };
        writeln!(
            xml,
            r#"      <bpmndi:BPMNEdge id="edge_{}" bpmnElement="{}">"#,
            flow.id, flow.id
        )?;
        for waypoint in &route.waypoints {
            writeln!(
                xml,
                r#"        <di:waypoint x="{}" y="{}" />"#,
                waypoint.x as i64, waypoint.y as i64
            )?;
        }
        writeln!(xml, r#"      </bpmndi:BPMNEdge>"#)?;
    }

    writeln!(xml, r#"    </bpmndi:BPMNPlane>"#)?;
    writeln!(xml, r#"  </bpmndi:BPMNDiagram>"#)?;
    writeln!(xml, r#"</definitions>"#)?;

    Ok(xml)
}

/// The `default` attribute per gateway: the single unconditional branch
/// when a gateway has several outgoing flows, or the marked success branch
/// of an entity-validation gateway.
fn gateway_defaults(process: &Process, expansion: &Expansion) -> HashMap<String, String> {
    let mut defaults = HashMap::new();

    for flow in &expansion.flows {
        if flow.is_default {
            defaults.insert(flow.source_id.clone(), flow.id.clone());
        }
    }

    for element in &process.elements {
        let Element::Gateway(gateway) = element else {
            continue;
        };
        let outgoing: Vec<&ExpandedFlow> = expansion
            .flows
            .iter()
            .filter(|f| f.source_id == gateway.id)
            .collect();
        if outgoing.len() < 2 {
            continue;
        }
        let unconditional: Vec<&&ExpandedFlow> = outgoing
            .iter()
            .filter(|f| f.condition.is_none())
            .collect();
        if unconditional.len() == 1 {
            defaults.insert(gateway.id.clone(), unconditional[0].id.clone());
        }
    }

    defaults
}

fn write_io_mapping(
    xml: &mut String,
    inputs: &[VariableMapping],
    outputs: &[VariableMapping],
) -> Result<()> {
    if inputs.is_empty() && outputs.is_empty() {
        return Ok(());
    }
    writeln!(xml, r#"        <zeebe:ioMapping>"#)?;
    for mapping in inputs {
        writeln!(
            xml,
            r#"          <zeebe:input source="{}" target="{}" />"#,
            xml_escape(&ensure_feel_expression(&mapping.source)),
            xml_escape(&mapping.target)
        )?;
    }
    for mapping in outputs {
        writeln!(
            xml,
            r#"          <zeebe:output source="{}" target="{}" />"#,
            xml_escape(&ensure_feel_expression(&mapping.source)),
            xml_escape(&mapping.target)
        )?;
    }
    writeln!(xml, r#"        </zeebe:ioMapping>"#)?;
    Ok(())
}

fn write_script_task(xml: &mut String, script: &ScriptCall) -> Result<()> {
    writeln!(
        xml,
        r#"    <scriptTask id="{}" name="{}">"#,
        xml_escape(&script.id),
        xml_escape(&script.name)
    )?;
    writeln!(xml, r#"      <extensionElements>"#)?;
    writeln!(
        xml,
        r#"        <zeebe:script expression="{}" resultVariable="{}" />"#,
        xml_escape(&ensure_feel_expression(&script.script)),
        xml_escape(script.result_variable())
    )?;
    write_io_mapping(
        xml,
        &script.effective_input_mappings(),
        &script.effective_output_mappings(),
    )?;
    writeln!(xml, r#"      </extensionElements>"#)?;
    writeln!(xml, r#"    </scriptTask>"#)?;
    Ok(())
}

fn write_service_task(xml: &mut String, service: &ServiceTask) -> Result<()> {
    writeln!(
        xml,
        r#"    <serviceTask id="{}" name="{}">"#,
        xml_escape(&service.id),
        xml_escape(&service.name)
    )?;
    writeln!(xml, r#"      <extensionElements>"#)?;
    writeln!(
        xml,
        r#"        <zeebe:taskDefinition type="{}" retries="{}" />"#,
        xml_escape(&service.task_type),
        service.retries
    )?;
    if !service.headers.is_empty() {
        writeln!(xml, r#"        <zeebe:taskHeaders>"#)?;
        for header in &service.headers {
            writeln!(
                xml,
                r#"          <zeebe:header key="{}" value="{}" />"#,
                xml_escape(&header.key),
                xml_escape(&header.value)
            )?;
        }
        writeln!(xml, r#"        </zeebe:taskHeaders>"#)?;
    }
    write_io_mapping(
        xml,
        &service.effective_input_mappings(),
        &service.effective_output_mappings(),
    )?;
    writeln!(xml, r#"      </extensionElements>"#)?;
    writeln!(xml, r#"    </serviceTask>"#)?;
    Ok(())
}

/// ProcessEntity expansion: validator service task, check gateway, and
/// error end event carrying the shared error reference.
fn write_entity_expansion(
    xml: &mut String,
    entity: &ProcessEntity,
    defaults: &HashMap<String, String>,
) -> Result<()> {
    let exp = EntityExpansion::for_entity(entity);

    writeln!(
        xml,
        r#"    <serviceTask id="{}" name="{}">"#,
        xml_escape(&entity.id),
        xml_escape(&entity.name)
    )?;
    writeln!(xml, r#"      <extensionElements>"#)?;
    writeln!(
        xml,
        r#"        <zeebe:taskDefinition type="{}" retries="3" />"#,
        ENTITY_VALIDATOR_TYPE
    )?;
    writeln!(xml, r#"        <zeebe:taskHeaders>"#)?;
    writeln!(
        xml,
        r#"          <zeebe:header key="entityModel" value="{}" />"#,
        xml_escape(entity.entity_model.as_deref().unwrap_or_default())
    )?;
    writeln!(
        xml,
        r#"          <zeebe:header key="entityName" value="{}" />"#,
        xml_escape(&entity.entity_name)
    )?;
    writeln!(xml, r#"        </zeebe:taskHeaders>"#)?;
    writeln!(xml, r#"        <zeebe:ioMapping>"#)?;
    writeln!(
        xml,
        r#"          <zeebe:input source="=processEntity" target="processEntity" />"#
    )?;
    writeln!(
        xml,
        r#"          <zeebe:output source="=validationResult" target="entityValidationResult" />"#
    )?;
    writeln!(xml, r#"        </zeebe:ioMapping>"#)?;
    writeln!(xml, r#"      </extensionElements>"#)?;
    writeln!(xml, r#"    </serviceTask>"#)?;

    let default_attr = defaults
        .get(exp.gateway_id.as_str())
        .map(|fid| format!(r#" default="{}""#, fid))
        .unwrap_or_default();
    writeln!(
        xml,
        r#"    <exclusiveGateway id="{}" name="Validation Check"{} />"#,
        exp.gateway_id, default_attr
    )?;

    writeln!(
        xml,
        r#"    <endEvent id="{}" name="Validation Error">"#,
        exp.error_id
    )?;
    writeln!(
        xml,
        r#"      <errorEventDefinition id="{}-def" errorRef="{}" />"#,
        exp.error_id, ENTITY_ERROR_ID
    )?;
    writeln!(xml, r#"    </endEvent>"#)?;

    Ok(())
}

fn write_shape(xml: &mut String, id: &str, diagram: &layout::Layout) -> Result<()> {
    let Some(bounds) = diagram.positions.get(id) else {
        return Ok(());
    };
    writeln!(
        xml,
        r#"      <bpmndi:BPMNShape id="shape_{}" bpmnElement="{}">"#,
        id, id
    )?;
    writeln!(
        xml,
        r#"        <dc:Bounds x="{}" y="{}" width="{}" height="{}" />"#,
        bounds.x as i64, bounds.y as i64, bounds.width as i64, bounds.height as i64
    )?;
    writeln!(xml, r#"      </bpmndi:BPMNShape>"#)?;
    Ok(())
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn xml_escape_text(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
