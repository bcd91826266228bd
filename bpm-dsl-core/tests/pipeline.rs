//! End-to-end pipeline scenarios: parse → validate → emit.

use std::collections::HashSet;
use std::fs;

use bpm_dsl_core::emitter::{emit, expand};
use bpm_dsl_core::parser::{parse_file, parse_str};
use bpm_dsl_core::validator::{validate, validate_with, ValidationOptions};
use bpm_dsl_core::{CompileError, DiagnosticCode, Element, LayoutConfig, OpenApiSidecar};

fn count(haystack: &str, needle: &str) -> usize {
    haystack.match_indices(needle).count()
}

/// Scenario 1: minimal start → end pipeline.
#[test]
fn minimal_pipeline() {
    let source =
        r#"process "M" { id:"m" start "S" {id:"s"} end "E" {id:"e"} flow { "s" -> "e" } }"#;

    let process = parse_str(source).unwrap();
    let report = validate(&process);
    assert!(report.is_valid(), "unexpected errors: {:?}", report.errors);

    let xml = emit(&process).unwrap();
    assert_eq!(count(&xml, r#"<startEvent id="s""#), 1);
    assert_eq!(count(&xml, r#"<endEvent id="e""#), 1);
    assert_eq!(count(&xml, r#"<sequenceFlow id="flow_s_to_e""#), 1);
    assert_eq!(count(&xml, "<bpmndi:BPMNShape"), 2);
    assert_eq!(count(&xml, "<bpmndi:BPMNEdge"), 1);
}

/// Scenario 2: script task with mappings and a result variable.
#[test]
fn script_task_with_mappings() {
    let source = r#"
        process "P" {
            id: "p"
            version: "1.0"
            start "S" { id: "s" }
            scriptCall "Sum" {
                id: "sum"
                script: "a+b"
                inputMappings: [ "a" -> "x" ]
                outputMappings: [ "x" -> "out" ]
                resultVariable: "r"
            }
            end "E" { id: "e" }
            flow { "s" -> "sum" "sum" -> "e" }
        }
    "#;

    let process = parse_str(source).unwrap();
    assert!(validate(&process).is_valid());

    let xml = emit(&process).unwrap();
    assert!(xml.contains(r#"<scriptTask id="sum" name="Sum">"#));
    assert!(xml.contains(r#"<zeebe:script expression="=a+b" resultVariable="r" />"#));
    assert_eq!(count(&xml, r#"<zeebe:input source="=a" target="x" />"#), 1);
    assert_eq!(count(&xml, r#"<zeebe:output source="=x" target="out" />"#), 1);
}

/// Scenario 3: XOR gateway with one conditional branch and one default.
#[test]
fn xor_gateway_with_default() {
    let source = r#"
        process "P" {
            id: "p"
            version: "1.0"
            start "S" { id: "s" }
            xorGateway "G" { id: "g" }
            scriptCall "T1" { id: "t1" script: "1" }
            scriptCall "T2" { id: "t2" script: "2" }
            end "E" { id: "e" }
            flow {
                "s" -> "g"
                "g" -> "t1" [condition: "x>0"]
                "g" -> "t2"
                "t1" -> "e"
                "t2" -> "e"
            }
        }
    "#;

    let process = parse_str(source).unwrap();
    assert!(validate(&process).is_valid());

    let xml = emit(&process).unwrap();
    assert!(xml.contains(r#"default="flow_g_to_t2""#));
    assert_eq!(count(&xml, "<conditionExpression"), 1);
    assert!(xml.contains("=x&gt;0"));
}

/// Scenario 4: ProcessEntity expansion, literal shape.
#[test]
fn process_entity_expansion() {
    let source = r#"
        process "P" {
            id: "p"
            version: "1.0"
            start "Start" { id: "start" }
            processEntity "Load" { entityName: "Customer" }
            scriptCall "Next" { id: "next" script: "x" }
            end "E" { id: "e" }
            flow {
                "start" -> "load"
                "load" -> "next"
                "next" -> "e"
            }
        }
    "#;

    let process = parse_str(source).unwrap();
    assert!(validate(&process).is_valid());

    let xml = emit(&process).unwrap();

    assert!(xml.contains(r#"<serviceTask id="load" name="Load">"#));
    assert!(xml.contains(r#"type="process-entity-validator""#));
    assert!(xml.contains(r#"<exclusiveGateway id="load-validation-gateway""#));
    assert!(xml.contains(r#"<endEvent id="load-validation-error""#));
    assert!(xml.contains(r#"errorRef="process-entity-validation-error""#));

    assert!(xml.contains(r#"id="flow_start_to_load""#));
    assert!(xml.contains(r#"id="flow_load_to_load-validation-gateway""#));
    assert!(xml.contains(r#"id="flow_load-validation-gateway_to_next""#));
    assert!(xml.contains(r#"id="flow_load-validation-gateway_to_load-validation-error""#));
    assert!(xml.contains(r#"default="flow_load-validation-gateway_to_next""#));
    assert!(xml.contains("=entityValidationResult.isValid = false"));

    // Exactly one error declaration at definitions scope.
    assert_eq!(count(&xml, r#"<error id="process-entity-validation-error""#), 1);
}

/// Scenario 5: a `.bpm` file without its OpenAPI sidecar is rejected.
#[test]
fn missing_sidecar_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let source_path = dir.path().join("p.bpm");
    fs::write(
        &source_path,
        r#"process "P" { id:"p" start "S" {id:"s"} end "E" {id:"e"} flow { "s" -> "e" } }"#,
    )
    .unwrap();

    match parse_file(&source_path) {
        Err(CompileError::MissingOpenApi { stem }) => assert_eq!(stem, "p"),
        other => panic!("expected MissingOpenApi, got {:?}", other.map(|p| p.id)),
    }
}

/// Scenario 6: validator exhaustiveness — duplicate ids plus a dangling
/// endpoint yield at least three diagnostics in one run.
#[test]
fn validator_reports_all_violations_at_once() {
    let source = r#"
        process "P" {
            id: "p"
            start "S" { id: "s" }
            scriptCall "A" { id: "dup" script: "a" }
            scriptCall "B" { id: "dup" script: "b" }
            scriptCall "C" { id: "dup" script: "c" }
            end "E" { id: "e" }
            flow {
                "s" -> "dup"
                "dup" -> "ghost"
                "dup" -> "e"
            }
        }
    "#;

    let process = parse_str(source).unwrap();
    let report = validate(&process);

    let duplicates = report
        .errors
        .iter()
        .filter(|d| d.code == DiagnosticCode::DuplicateId)
        .count();
    let dangling = report
        .errors
        .iter()
        .filter(|d| d.code == DiagnosticCode::UnknownFlowTarget)
        .count();

    assert_eq!(duplicates, 2);
    assert_eq!(dangling, 1);
    assert!(report.errors.len() >= 3);
}

/// File-based happy path: sidecar discovered, entity resolved, and the
/// sidecar path lands in the `entityModel` header.
#[test]
fn file_pipeline_with_sidecar() {
    let dir = tempfile::tempdir().unwrap();
    let source_path = dir.path().join("onboarding.bpm");
    let sidecar_path = dir.path().join("onboarding.yaml");

    fs::write(
        &source_path,
        r#"
        process "Onboarding" {
            id: "onboarding"
            version: "1.0"
            start "S" { id: "s" }
            processEntity "Load Customer" { entityName: "Customer" }
            end "E" { id: "e" }
            flow {
                "s" -> "load-customer"
                "load-customer" -> "e"
            }
        }
        "#,
    )
    .unwrap();
    fs::write(
        &sidecar_path,
        "openapi: 3.0.0\ncomponents:\n  schemas:\n    Customer:\n      type: object\n",
    )
    .unwrap();

    let process = parse_file(&source_path).unwrap();
    let Element::Entity(entity) = &process.elements[1] else {
        panic!("expected processEntity");
    };
    assert_eq!(
        entity.entity_model.as_deref(),
        Some(sidecar_path.display().to_string().as_str())
    );

    let sidecar = OpenApiSidecar::load(&sidecar_path).unwrap();
    let report = validate_with(&process, &ValidationOptions::default(), Some(&sidecar));
    assert!(report.is_valid(), "unexpected errors: {:?}", report.errors);

    let xml = emit(&process).unwrap();
    assert!(xml.contains(&format!(
        r#"<zeebe:header key="entityModel" value="{}" />"#,
        sidecar_path.display()
    )));
}

/// P2: expansion never collides with author-declared ids.
#[test]
fn expansion_preserves_id_uniqueness() {
    let source = r#"
        process "P" {
            id: "p"
            start "S" { id: "s" }
            processEntity "Load" { entityName: "Customer" }
            scriptCall "T" { id: "t" script: "x" }
            end "E" { id: "e" }
            flow {
                "s" -> "load"
                "load" -> "t"
                "t" -> "e"
            }
        }
    "#;

    let process = parse_str(source).unwrap();
    let expansion = expand(&process);

    let mut ids: HashSet<String> = process
        .elements
        .iter()
        .map(|e| e.id().to_string())
        .collect();
    for entity in &expansion.entities {
        assert!(ids.insert(entity.gateway_id.clone()), "gateway id collision");
        assert!(ids.insert(entity.error_id.clone()), "error id collision");
    }
}

/// P3 + P4: layout and emission are byte-deterministic across runs.
#[test]
fn emission_is_deterministic_across_runs() {
    let source = r#"
        process "P" {
            id: "p"
            version: "2.0"
            start "S" { id: "s" }
            processEntity "Load" { entityName: "Customer" }
            xorGateway "G" { id: "g" }
            scriptCall "A" { id: "a" script: "1" }
            scriptCall "B" { id: "b" script: "2" }
            end "E" { id: "e" }
            flow {
                "s" -> "load"
                "load" -> "g"
                "g" -> "a" [condition: "x > 0"]
                "g" -> "b"
                "a" -> "e"
                "b" -> "e"
            }
        }
    "#;

    let process = parse_str(source).unwrap();
    let expansion = expand(&process);
    let layout_a = bpm_dsl_core::layout::compute(&process, &expansion, &LayoutConfig::default());
    let layout_b = bpm_dsl_core::layout::compute(&process, &expansion, &LayoutConfig::default());
    assert_eq!(layout_a, layout_b);

    let xml_a = emit(&process).unwrap();
    let xml_b = emit(&process).unwrap();
    assert_eq!(xml_a, xml_b);

    // Re-parsing the same source yields the same output too.
    let reparsed = parse_str(source).unwrap();
    assert_eq!(emit(&reparsed).unwrap(), xml_a);
}

/// P5: every sequenceFlow has a diagram edge, every element a shape.
#[test]
fn diagram_matches_semantic_elements() {
    let source = r#"
        process "P" {
            id: "p"
            version: "1.0"
            start "S" { id: "s" }
            processEntity "Load" { entityName: "Customer" }
            xorGateway "G" { id: "g" }
            scriptCall "A" { id: "a" script: "1" }
            end "Done" { id: "done" }
            end "Rejected" { id: "rejected" }
            flow {
                "s" -> "load"
                "load" -> "g"
                "g" -> "a" [condition: "x > 0"]
                "g" -> "rejected"
                "a" -> "done"
            }
        }
    "#;

    let process = parse_str(source).unwrap();
    let xml = emit(&process).unwrap();

    // Shape count = author elements + 2 synthetics per entity.
    assert_eq!(count(&xml, "<bpmndi:BPMNShape"), process.elements.len() + 2);
    // Edge count matches sequence-flow count.
    assert_eq!(count(&xml, "<bpmndi:BPMNEdge"), count(&xml, "<sequenceFlow"));

    // Every sequence flow id shows up as a diagram edge reference.
    for part in xml.split(r#"<sequenceFlow id=""#).skip(1) {
        let flow_id = part.split('"').next().unwrap();
        assert!(
            xml.contains(&format!(r#"<bpmndi:BPMNEdge id="edge_{}" bpmnElement="{}">"#, flow_id, flow_id)),
            "no diagram edge for {}",
            flow_id
        );
    }
}

/// Boundary: self-loop flows are rejected by validation.
#[test]
fn self_loop_rejected() {
    let source = r#"
        process "P" {
            id: "p"
            start "S" { id: "s" }
            scriptCall "A" { id: "a" script: "x" }
            end "E" { id: "e" }
            flow {
                "s" -> "a"
                "a" -> "a"
                "a" -> "e"
            }
        }
    "#;

    let process = parse_str(source).unwrap();
    let report = validate(&process);
    assert!(report
        .errors
        .iter()
        .any(|d| d.code == DiagnosticCode::SelfLoopFlow));
}

/// Boundary: gateway with a single unconditional edge passes through.
#[test]
fn gateway_pass_through_accepted() {
    let source = r#"
        process "P" {
            id: "p"
            version: "1.0"
            start "S" { id: "s" }
            xorGateway "G" { id: "g" }
            end "E" { id: "e" }
            flow {
                "s" -> "g"
                "g" -> "e"
            }
        }
    "#;

    let process = parse_str(source).unwrap();
    let report = validate(&process);
    assert!(report.is_valid(), "unexpected errors: {:?}", report.errors);

    let xml = emit(&process).unwrap();
    // Single outgoing edge: no default attribute.
    assert!(!xml.contains("default="));
}
