//! Diagnostics for semantic validation.
//!
//! One diagnostic type shared by every validator rule; the full batch is
//! collected in a single pass and returned as a [`Report`].

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
}

/// Stable rule identifiers, rendered by the CLI next to each message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticCode {
    // Process-level
    EmptyProcessName,
    EmptyProcessId,
    InvalidXmlId,

    // Element-level
    DuplicateId,
    EmptyElementName,
    EmptyScript,

    // Flow-level
    UnknownFlowSource,
    UnknownFlowTarget,
    SelfLoopFlow,

    // Event cardinality and degree rules
    MissingStartEvent,
    MissingEndEvent,
    StartEventHasIncoming,
    EndEventHasOutgoing,
    MissingOutgoingFlow,
    MultipleOutgoingFlows,

    // Connectivity
    UnreachableElement,

    // Gateways
    GatewayNoOutgoing,
    GatewayExtraDefault,
    GatewaySingleConditional,

    // ProcessEntity
    MultipleProcessEntities,
    MisplacedProcessEntity,
    UnknownEntitySchema,

    // Engine compatibility
    ConditionOnNonGateway,
    MixedVariableMappings,
}

impl DiagnosticCode {
    /// Kebab-case rule name for user-facing output.
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticCode::EmptyProcessName => "empty-process-name",
            DiagnosticCode::EmptyProcessId => "empty-process-id",
            DiagnosticCode::InvalidXmlId => "invalid-xml-id",
            DiagnosticCode::DuplicateId => "duplicate-id",
            DiagnosticCode::EmptyElementName => "empty-element-name",
            DiagnosticCode::EmptyScript => "empty-script",
            DiagnosticCode::UnknownFlowSource => "unknown-flow-source",
            DiagnosticCode::UnknownFlowTarget => "unknown-flow-target",
            DiagnosticCode::SelfLoopFlow => "self-loop-flow",
            DiagnosticCode::MissingStartEvent => "missing-start-event",
            DiagnosticCode::MissingEndEvent => "missing-end-event",
            DiagnosticCode::StartEventHasIncoming => "start-event-has-incoming",
            DiagnosticCode::EndEventHasOutgoing => "end-event-has-outgoing",
            DiagnosticCode::MissingOutgoingFlow => "missing-outgoing-flow",
            DiagnosticCode::MultipleOutgoingFlows => "multiple-outgoing-flows",
            DiagnosticCode::UnreachableElement => "unreachable-element",
            DiagnosticCode::GatewayNoOutgoing => "gateway-no-outgoing",
            DiagnosticCode::GatewayExtraDefault => "gateway-extra-default",
            DiagnosticCode::GatewaySingleConditional => "gateway-single-conditional",
            DiagnosticCode::MultipleProcessEntities => "multiple-process-entities",
            DiagnosticCode::MisplacedProcessEntity => "misplaced-process-entity",
            DiagnosticCode::UnknownEntitySchema => "unknown-entity-schema",
            DiagnosticCode::ConditionOnNonGateway => "condition-on-non-gateway",
            DiagnosticCode::MixedVariableMappings => "mixed-variable-mappings",
        }
    }
}

/// A single validation finding.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: DiagnosticCode,
    pub message: String,
    /// Offending element id, when one exists.
    pub element_id: Option<String>,
}

impl Diagnostic {
    pub fn error(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            code,
            message: message.into(),
            element_id: None,
        }
    }

    pub fn warning(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            code,
            message: message.into(),
            element_id: None,
        }
    }

    pub fn with_element(mut self, id: impl Into<String>) -> Self {
        self.element_id = Some(id.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.element_id {
            Some(id) => write!(f, "[{}] {} ({})", self.code.as_str(), self.message, id),
            None => write!(f, "[{}] {}", self.code.as_str(), self.message),
        }
    }
}

/// Batch of diagnostics from one validation run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Report {
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
}

impl Report {
    pub fn push(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Error => self.errors.push(diagnostic),
            Severity::Warning => self.warnings.push(diagnostic),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Errors then warnings, for sequential rendering.
    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.errors.iter().chain(self.warnings.iter())
    }
}
