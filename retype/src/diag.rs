// diag.rs — Unified diagnostics model
//
// Non-fatal findings of the pass: values whose mapped type a role rejects,
// and failed postcondition obligations. Structural failures are
// `GraphError` / `PassError` values instead.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::id::NodeId;
use crate::walk::GraphPath;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `W0101`).
///
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    /// A conversion rule matches a value, but the value's role accepts
    /// neither the target nor any type outside the map's sources.
    pub const W0101: DiagCode = DiagCode("W0101");
    /// A postcondition obligation does not hold after the pass.
    pub const W0102: DiagCode = DiagCode("W0102");
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Location ─────────────────────────────────────────────────────────────

/// Graph level plus, optionally, one node of that level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub path: GraphPath,
    pub node: Option<NodeId>,
}

impl Location {
    pub fn node(path: &GraphPath, node: NodeId) -> Self {
        Self {
            path: path.clone(),
            node: Some(node),
        }
    }

    pub fn level(path: &GraphPath) -> Self {
        Self {
            path: path.clone(),
            node: None,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node {
            Some(node) => write!(f, "{}:{}", self.path, node),
            None => write!(f, "{}", self.path),
        }
    }
}

// ── Diagnostic ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub location: Location,
    pub message: String,
    pub hint: Option<String>,
}

impl Diagnostic {
    pub fn new(level: DiagLevel, location: Location, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            location,
            message: message.into(),
            hint: None,
        }
    }

    pub fn warning(location: Location, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, location, message)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}: {}", level, code, self.location, self.message)?;
        } else {
            write!(f, "{}: {}: {}", level, self.location, self.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_without_code() {
        let d = Diagnostic::new(
            DiagLevel::Error,
            Location::level(&GraphPath::root()),
            "something failed",
        );
        assert_eq!(format!("{d}"), "error: root: something failed");
    }

    #[test]
    fn display_with_code_and_hint() {
        let path = GraphPath::root().child(NodeId(3));
        let d = Diagnostic::warning(Location::node(&path, NodeId(1)), "kept i64")
            .with_code(codes::W0101)
            .with_hint("add a rule for the index type");
        assert_eq!(
            format!("{d}"),
            "warning[W0101]: root/%3:%1: kept i64\n  hint: add a rule for the index type"
        );
    }
}
