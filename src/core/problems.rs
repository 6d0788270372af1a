// src/core/problems.rs

use std::fmt;

use crate::models::InputLocation;

/// How bad a problem is. Fatal aborts the current pipeline immediately;
/// Error lets remaining stages run but fails the request at the end;
/// Warning never fails anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => f.write_str("WARNING"),
            Self::Error => f.write_str("ERROR"),
            Self::Fatal => f.write_str("FATAL"),
        }
    }
}

/// A severity-tagged diagnostic with optional source attribution.
/// Problems are appended, never removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    pub severity: Severity,
    pub message: String,
    pub source: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    /// Id of the model the problem belongs to, when derivable.
    pub model_id: Option<String>,
    /// Rendering of the underlying cause, if the problem wraps one.
    pub cause: Option<String>,
}

impl Problem {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            source: None,
            line: None,
            column: None,
            model_id: None,
            cause: None,
        }
    }

    pub fn with_location(mut self, location: &InputLocation) -> Self {
        if location.source.is_some() {
            self.source.clone_from(&location.source);
        }
        self.line = location.line;
        self.column = location.column;
        self
    }

    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    pub fn with_cause(mut self, cause: &dyn fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity, self.message)?;
        if let Some(source) = &self.source {
            write!(f, " @ {source}")?;
            if let (Some(line), Some(column)) = (self.line, self.column) {
                write!(f, ":{line}:{column}")?;
            }
        }
        Ok(())
    }
}

/// Append-only accumulator threaded through the pipeline by reference.
/// Stage functions report Warning/Error problems here and keep going;
/// only Fatal problems make them bail out.
#[derive(Debug, Default)]
pub struct ProblemCollector {
    problems: Vec<Problem>,
}

impl ProblemCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, problem: Problem) {
        log::debug!("collected problem: {problem}");
        self.problems.push(problem);
    }

    pub fn has_errors(&self) -> bool {
        self.problems
            .iter()
            .any(|p| p.severity >= Severity::Error)
    }

    pub fn has_fatal(&self) -> bool {
        self.problems
            .iter()
            .any(|p| p.severity == Severity::Fatal)
    }

    pub fn problems(&self) -> &[Problem] {
        &self.problems
    }

    pub fn into_problems(self) -> Vec<Problem> {
        self.problems
    }

    /// Absorbs everything collected by a nested pipeline (e.g. a BOM
    /// import's own build).
    pub fn absorb(&mut self, other: Self) {
        self.problems.extend(other.problems);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_gates() {
        let mut collector = ProblemCollector::new();
        collector.add(Problem::new(Severity::Warning, "just a warning"));
        assert!(!collector.has_errors());
        assert!(!collector.has_fatal());

        collector.add(Problem::new(Severity::Error, "an error"));
        assert!(collector.has_errors());
        assert!(!collector.has_fatal());

        collector.add(Problem::new(Severity::Fatal, "fatal"));
        assert!(collector.has_fatal());
        assert_eq!(collector.problems().len(), 3);
    }

    #[test]
    fn display_includes_location() {
        let problem = Problem::new(Severity::Error, "bad field").with_location(&InputLocation {
            source: Some("stratum.toml".into()),
            line: Some(7),
            column: Some(3),
        });
        assert_eq!(problem.to_string(), "[ERROR] bad field @ stratum.toml:7:3");
    }
}
