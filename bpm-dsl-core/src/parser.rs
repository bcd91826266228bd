//! Nom-based parser for the `.bpm` process grammar.
//!
//! Parsing is two-staged: the nom grammar produces raw elements whose
//! bodies are untyped key/value properties, and an assembly pass turns
//! those into the typed AST. Duplicate-key and missing-field detection
//! happens during assembly, where the offending element is known by name.
//!
//! ```text
//! source → grammar (nom) → raw elements → assembly → Process
//! ```
//!
//! The file-based entry point additionally requires an OpenAPI sidecar
//! (`<stem>.yaml` / `<stem>.yml`) next to the source file and records its
//! path on every `processEntity` element.

use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, tag, take_while},
    character::complete::{alpha1, alphanumeric1, char, digit1, multispace1, none_of},
    combinator::{all_consuming, cut, map, opt, recognize, value},
    error::{context, VerboseError, VerboseErrorKind},
    multi::{many0, separated_list0},
    sequence::{pair, preceded},
    IResult,
};
use nom_locate::LocatedSpan;
use std::path::Path;

use crate::ast::{
    Element, EndEvent, Flow, Process, ProcessEntity, ScriptCall, ServiceTask, StartEvent,
    TaskHeader, VariableMapping, XorGateway,
};
use crate::error::{CompileError, ParseError};
use crate::sidecar;

/// Input type with line/column tracking.
pub type NomSpan<'a> = LocatedSpan<&'a str>;

type PResult<'a, T> = IResult<NomSpan<'a>, T, VerboseError<NomSpan<'a>>>;

// ============================================================================
// Public API
// ============================================================================

/// Parse a complete process definition from source text.
pub fn parse_str(input: &str) -> Result<Process, ParseError> {
    let span = NomSpan::new(input);
    let raw = match all_consuming(process_parser)(span) {
        Ok((_, raw)) => raw,
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => return Err(syntax_error(e)),
        Err(nom::Err::Incomplete(_)) => {
            return Err(ParseError::Syntax {
                line: 1,
                column: 1,
                message: "incomplete input".to_string(),
            })
        }
    };
    assemble(raw)
}

/// Parse a `.bpm` file.
///
/// Verifies that the OpenAPI sidecar exists next to the source file and
/// records its path as the `entityModel` of any `processEntity` element.
pub fn parse_file(path: impl AsRef<Path>) -> Result<Process, CompileError> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path)?;
    let sidecar_path = sidecar::locate(path)?;

    let mut process = parse_str(&source).map_err(CompileError::Parse)?;
    for element in &mut process.elements {
        if let Element::Entity(entity) = element {
            entity.entity_model = Some(sidecar_path.display().to_string());
        }
    }
    tracing::debug!(
        process = %process.id,
        elements = process.elements.len(),
        flows = process.flows.len(),
        sidecar = %sidecar_path.display(),
        "parsed process definition"
    );
    Ok(process)
}

// ============================================================================
// Raw parse tree
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum PropValue {
    Str(String),
    Int(i64),
    /// Bracketed list; each entry is a string with an optional `-> target`.
    List(Vec<(String, Option<String>)>),
}

#[derive(Debug, Clone)]
struct Prop {
    key: String,
    value: PropValue,
    line: u32,
    column: u32,
}

#[derive(Debug, Clone)]
struct RawElement {
    keyword: &'static str,
    name: String,
    props: Vec<Prop>,
}

#[derive(Debug, Clone)]
struct RawProcess {
    name: String,
    metas: Vec<Prop>,
    elements: Vec<RawElement>,
    flows: Vec<Flow>,
}

// ============================================================================
// Lexical helpers
// ============================================================================

/// Skip whitespace and `//` line comments.
fn sc(input: NomSpan) -> PResult<()> {
    let (input, _) = many0(alt((
        map(multispace1, |_| ()),
        map(pair(tag("//"), take_while(|c| c != '\n')), |_| ()),
    )))(input)?;
    Ok((input, ()))
}

fn identifier(input: NomSpan) -> PResult<String> {
    map(
        recognize(pair(alpha1, many0(alt((alphanumeric1, tag("_")))))),
        |s: NomSpan| s.fragment().to_string(),
    )(input)
}

fn string_literal(input: NomSpan) -> PResult<String> {
    let (input, _) = char('"')(input)?;
    let (input, body) = opt(escaped_transform(
        none_of("\"\\"),
        '\\',
        alt((
            value('\n', char('n')),
            value('\r', char('r')),
            value('\t', char('t')),
            value('\\', char('\\')),
            value('"', char('"')),
        )),
    ))(input)?;
    let (input, _) = cut(context("closing '\"'", char('"')))(input)?;
    Ok((input, body.unwrap_or_default()))
}

fn integer(input: NomSpan) -> PResult<i64> {
    let (rest, digits) = digit1(input)?;
    match digits.fragment().parse::<i64>() {
        Ok(n) => Ok((rest, n)),
        Err(_) => Err(nom::Err::Error(VerboseError {
            errors: vec![(input, VerboseErrorKind::Context("integer"))],
        })),
    }
}

// ============================================================================
// Grammar
// ============================================================================

fn process_parser(input: NomSpan) -> PResult<RawProcess> {
    let (input, _) = sc(input)?;
    let (input, _) = context("'process' keyword", tag("process"))(input)?;
    let (input, _) = sc(input)?;
    let (input, name) = cut(context("process name", string_literal))(input)?;
    let (input, _) = sc(input)?;
    let (input, _) = cut(context("'{'", char('{')))(input)?;

    let (input, metas) = many0(meta_prop)(input)?;
    let (input, elements) = many0(element_parser)(input)?;
    let (input, flows) = cut(context("flow section", flow_section))(input)?;

    let (input, _) = sc(input)?;
    let (input, _) = cut(context("closing '}'", char('}')))(input)?;
    let (input, _) = sc(input)?;

    Ok((
        input,
        RawProcess {
            name,
            metas,
            elements,
            flows,
        },
    ))
}

/// Process metadata: `id: STRING` or `version: STRING`.
fn meta_prop(input: NomSpan) -> PResult<Prop> {
    let (input, _) = sc(input)?;
    let line = input.location_line();
    let column = input.get_column() as u32;
    let (input, key) = alt((tag("version"), tag("id")))(input)?;
    let (input, _) = sc(input)?;
    let (input, _) = char(':')(input)?;
    let (input, _) = sc(input)?;
    let (input, v) = cut(context("metadata value", string_literal))(input)?;
    Ok((
        input,
        Prop {
            key: key.fragment().to_string(),
            value: PropValue::Str(v),
            line,
            column,
        },
    ))
}

fn element_parser(input: NomSpan) -> PResult<RawElement> {
    let (input, _) = sc(input)?;
    let (input, keyword) = alt((
        value("start", tag("start")),
        value("end", tag("end")),
        value("scriptCall", tag("scriptCall")),
        value("serviceTask", tag("serviceTask")),
        value("processEntity", tag("processEntity")),
        value("xorGateway", tag("xorGateway")),
    ))(input)?;
    let (input, _) = sc(input)?;
    let (input, name) = cut(context("element name", string_literal))(input)?;
    let (input, props) = cut(element_body)(input)?;
    Ok((
        input,
        RawElement {
            keyword,
            name,
            props,
        },
    ))
}

fn element_body(input: NomSpan) -> PResult<Vec<Prop>> {
    let (input, _) = sc(input)?;
    let (input, _) = context("'{'", char('{'))(input)?;
    let (input, props) = many0(property)(input)?;
    let (input, _) = sc(input)?;
    let (input, _) = cut(context("closing '}'", char('}')))(input)?;
    Ok((input, props))
}

fn property(input: NomSpan) -> PResult<Prop> {
    let (input, _) = sc(input)?;
    let line = input.location_line();
    let column = input.get_column() as u32;
    let (input, key) = identifier(input)?;
    let (input, _) = sc(input)?;
    let (input, _) = char(':')(input)?;
    let (input, _) = sc(input)?;
    let (input, v) = cut(context("property value", prop_value))(input)?;
    Ok((
        input,
        Prop {
            key,
            value: v,
            line,
            column,
        },
    ))
}

fn prop_value(input: NomSpan) -> PResult<PropValue> {
    alt((
        map(string_literal, PropValue::Str),
        map(integer, PropValue::Int),
        list_value,
    ))(input)
}

/// `[ "a", "b" ]` or `[ "a" -> "b", "c" -> "d" ]`.
fn list_value(input: NomSpan) -> PResult<PropValue> {
    let (input, _) = char('[')(input)?;
    let (input, items) = separated_list0(preceded(sc, char(',')), list_item)(input)?;
    let (input, _) = sc(input)?;
    let (input, _) = cut(context("closing ']'", char(']')))(input)?;
    Ok((input, PropValue::List(items)))
}

fn list_item(input: NomSpan) -> PResult<(String, Option<String>)> {
    let (input, _) = sc(input)?;
    let (input, first) = string_literal(input)?;
    let (input, _) = sc(input)?;
    let (input, second) = opt(preceded(pair(tag("->"), sc), string_literal))(input)?;
    Ok((input, (first, second)))
}

fn flow_section(input: NomSpan) -> PResult<Vec<Flow>> {
    let (input, _) = sc(input)?;
    let (input, _) = context("'flow' keyword", tag("flow"))(input)?;
    let (input, _) = sc(input)?;
    let (input, _) = cut(context("'{'", char('{')))(input)?;
    let (input, flows) = many0(flow_def)(input)?;
    let (input, _) = sc(input)?;
    let (input, _) = cut(context("closing '}'", char('}')))(input)?;
    Ok((input, flows))
}

fn flow_def(input: NomSpan) -> PResult<Flow> {
    let (input, _) = sc(input)?;
    let (input, source_id) = string_literal(input)?;
    let (input, _) = sc(input)?;
    let (input, _) = cut(context("'->'", tag("->")))(input)?;
    let (input, _) = sc(input)?;
    let (input, target_id) = cut(context("flow target", string_literal))(input)?;
    let (input, condition) = opt(flow_condition)(input)?;
    Ok((
        input,
        Flow {
            source_id,
            target_id,
            condition,
        },
    ))
}

/// `[condition: "expr"]`
fn flow_condition(input: NomSpan) -> PResult<String> {
    let (input, _) = sc(input)?;
    let (input, _) = char('[')(input)?;
    let (input, _) = sc(input)?;
    let (input, _) = cut(context("'condition:'", tag("condition")))(input)?;
    let (input, _) = sc(input)?;
    let (input, _) = cut(context("':'", char(':')))(input)?;
    let (input, _) = sc(input)?;
    let (input, cond) = cut(context("condition expression", string_literal))(input)?;
    let (input, _) = sc(input)?;
    let (input, _) = cut(context("closing ']'", char(']')))(input)?;
    Ok((input, cond))
}

/// Map a nom error onto a line/column syntax error. The deepest error in
/// the chain carries the position; the first `context()` annotation on the
/// unwind path supplies the message.
fn syntax_error(err: VerboseError<NomSpan>) -> ParseError {
    let (line, column) = err
        .errors
        .first()
        .map(|(span, _)| (span.location_line(), span.get_column() as u32))
        .unwrap_or((1, 1));

    let message = err
        .errors
        .iter()
        .find_map(|(_, kind)| match kind {
            VerboseErrorKind::Context(ctx) => Some(format!("expected {}", ctx)),
            _ => None,
        })
        .or_else(|| {
            err.errors.first().map(|(_, kind)| match kind {
                VerboseErrorKind::Char(c) => format!("expected '{}'", c),
                VerboseErrorKind::Nom(ek) => format!("unexpected input ({:?})", ek),
                VerboseErrorKind::Context(ctx) => format!("expected {}", ctx),
            })
        })
        .unwrap_or_else(|| "malformed input".to_string());

    ParseError::Syntax {
        line,
        column,
        message,
    }
}

// ============================================================================
// Assembly: raw elements → typed AST
// ============================================================================

/// Property accessor over one element body. Reports problems against the
/// element's id (or display name when no id was given).
struct PropBag<'a> {
    label: String,
    props: &'a [Prop],
}

impl<'a> PropBag<'a> {
    fn new(raw: &'a RawElement) -> Self {
        let label = raw
            .props
            .iter()
            .find(|p| p.key == "id")
            .and_then(|p| match &p.value {
                PropValue::Str(s) => Some(s.clone()),
                _ => None,
            })
            .unwrap_or_else(|| raw.name.clone());
        Self {
            label,
            props: &raw.props,
        }
    }

    fn check_duplicates(&self) -> Result<(), ParseError> {
        for (i, prop) in self.props.iter().enumerate() {
            if self.props[..i].iter().any(|p| p.key == prop.key) {
                return Err(ParseError::DuplicateKey {
                    element: self.label.clone(),
                    key: prop.key.clone(),
                });
            }
        }
        Ok(())
    }

    fn ensure_known(&self, allowed: &[&str]) -> Result<(), ParseError> {
        for prop in self.props {
            if !allowed.contains(&prop.key.as_str()) {
                return Err(ParseError::Syntax {
                    line: prop.line,
                    column: prop.column,
                    message: format!("unknown property '{}'", prop.key),
                });
            }
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Option<&'a Prop> {
        self.props.iter().find(|p| p.key == key)
    }

    fn opt_str(&self, key: &str) -> Result<Option<String>, ParseError> {
        match self.get(key) {
            None => Ok(None),
            Some(prop) => match &prop.value {
                PropValue::Str(s) => Ok(Some(s.clone())),
                _ => Err(wrong_type(prop, "a string")),
            },
        }
    }

    fn require_str(&self, key: &str) -> Result<String, ParseError> {
        self.opt_str(key)?.ok_or_else(|| ParseError::MissingField {
            element: self.label.clone(),
            field: key.to_string(),
        })
    }

    fn opt_positive_int(&self, key: &str) -> Result<Option<u32>, ParseError> {
        match self.get(key) {
            None => Ok(None),
            Some(prop) => match prop.value {
                PropValue::Int(n) if n >= 1 && n <= u32::MAX as i64 => Ok(Some(n as u32)),
                PropValue::Int(_) => Err(wrong_type(prop, "a positive integer")),
                _ => Err(wrong_type(prop, "a positive integer")),
            },
        }
    }

    fn opt_str_list(&self, key: &str) -> Result<Vec<String>, ParseError> {
        match self.get(key) {
            None => Ok(vec![]),
            Some(prop) => match &prop.value {
                PropValue::List(items) if items.iter().all(|(_, t)| t.is_none()) => {
                    Ok(items.iter().map(|(s, _)| s.clone()).collect())
                }
                _ => Err(wrong_type(prop, "a list of strings")),
            },
        }
    }

    fn opt_pair_list(&self, key: &str) -> Result<Vec<(String, String)>, ParseError> {
        match self.get(key) {
            None => Ok(vec![]),
            Some(prop) => match &prop.value {
                PropValue::List(items) if items.iter().all(|(_, t)| t.is_some()) => Ok(items
                    .iter()
                    .map(|(s, t)| (s.clone(), t.clone().unwrap()))
                    .collect()),
                _ => Err(wrong_type(prop, "a list of \"source\" -> \"target\" pairs")),
            },
        }
    }
}

fn wrong_type(prop: &Prop, expected: &str) -> ParseError {
    ParseError::Syntax {
        line: prop.line,
        column: prop.column,
        message: format!("property '{}' must be {}", prop.key, expected),
    }
}

fn mappings(pairs: Vec<(String, String)>) -> Vec<VariableMapping> {
    pairs
        .into_iter()
        .map(|(source, target)| VariableMapping { source, target })
        .collect()
}

fn assemble(raw: RawProcess) -> Result<Process, ParseError> {
    // Process metadata behaves like an element body for duplicate detection.
    for (i, prop) in raw.metas.iter().enumerate() {
        if raw.metas[..i].iter().any(|p| p.key == prop.key) {
            return Err(ParseError::DuplicateKey {
                element: raw.name.clone(),
                key: prop.key.clone(),
            });
        }
    }

    let meta_str = |key: &str| -> Option<String> {
        raw.metas.iter().find(|p| p.key == key).and_then(|p| {
            match &p.value {
                PropValue::Str(s) => Some(s.clone()),
                _ => None,
            }
        })
    };

    let id = meta_str("id")
        .unwrap_or_else(|| format!("process_{}", raw.name.to_lowercase().replace(' ', "_")));
    let version = meta_str("version");

    let mut elements = Vec::with_capacity(raw.elements.len());
    for raw_element in &raw.elements {
        elements.push(assemble_element(raw_element)?);
    }

    Ok(Process {
        name: raw.name,
        id,
        version,
        elements,
        flows: raw.flows,
    })
}

fn assemble_element(raw: &RawElement) -> Result<Element, ParseError> {
    let bag = PropBag::new(raw);
    bag.check_duplicates()?;

    match raw.keyword {
        "start" => {
            bag.ensure_known(&["id"])?;
            Ok(Element::Start(StartEvent {
                id: bag.require_str("id")?,
                name: raw.name.clone(),
            }))
        }
        "end" => {
            bag.ensure_known(&["id"])?;
            Ok(Element::End(EndEvent {
                id: bag.require_str("id")?,
                name: raw.name.clone(),
            }))
        }
        "scriptCall" => {
            bag.ensure_known(&[
                "id",
                "script",
                "resultVariable",
                "inputVars",
                "outputVars",
                "inputMappings",
                "outputMappings",
            ])?;
            Ok(Element::Script(ScriptCall {
                id: bag.require_str("id")?,
                name: raw.name.clone(),
                script: bag.require_str("script")?,
                input_mappings: mappings(bag.opt_pair_list("inputMappings")?),
                output_mappings: mappings(bag.opt_pair_list("outputMappings")?),
                input_vars: bag.opt_str_list("inputVars")?,
                output_vars: bag.opt_str_list("outputVars")?,
                result_variable: bag.opt_str("resultVariable")?,
            }))
        }
        "serviceTask" => {
            bag.ensure_known(&[
                "id",
                "taskType",
                "retries",
                "headers",
                "inputVars",
                "outputVars",
                "inputMappings",
                "outputMappings",
            ])?;
            Ok(Element::Service(ServiceTask {
                id: bag.require_str("id")?,
                name: raw.name.clone(),
                task_type: bag.require_str("taskType")?,
                retries: bag
                    .opt_positive_int("retries")?
                    .unwrap_or(ServiceTask::DEFAULT_RETRIES),
                headers: bag
                    .opt_pair_list("headers")?
                    .into_iter()
                    .map(|(key, value)| TaskHeader { key, value })
                    .collect(),
                input_mappings: mappings(bag.opt_pair_list("inputMappings")?),
                output_mappings: mappings(bag.opt_pair_list("outputMappings")?),
                input_vars: bag.opt_str_list("inputVars")?,
                output_vars: bag.opt_str_list("outputVars")?,
            }))
        }
        "processEntity" => {
            bag.ensure_known(&["id", "entityName"])?;
            let id = match bag.opt_str("id")? {
                Some(id) => id,
                None => ProcessEntity::derive_id(&raw.name),
            };
            Ok(Element::Entity(ProcessEntity {
                id,
                name: raw.name.clone(),
                entity_name: bag.require_str("entityName")?,
                entity_model: None,
            }))
        }
        "xorGateway" => {
            bag.ensure_known(&["id", "condition"])?;
            Ok(Element::Gateway(XorGateway {
                id: bag.require_str("id")?,
                name: raw.name.clone(),
                condition: bag.opt_str("condition")?,
            }))
        }
        other => unreachable!("unhandled element keyword '{}'", other),
    }
}

// ============================================================================
// Tests
// ============================================================================
