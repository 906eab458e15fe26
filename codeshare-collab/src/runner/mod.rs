//! Simulated language runners.
//!
//! A runner never executes code. It checks a minimal structural marker for
//! its language and extracts the literal arguments of the language's print
//! calls. The [`LanguageRunner`] trait is the swap point for a real backend.

pub mod eval;
pub mod heuristics;

use crate::protocol::Language;

pub const NO_OUTPUT: &str = "Code executed successfully with no output.";

/// What a run produced.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunOutcome {
    pub output: String,
    /// Structural error message, verbatim.
    pub error: Option<String>,
}

impl RunOutcome {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            error: None,
        }
    }

    pub fn structural(message: impl Into<String>) -> Self {
        Self {
            output: String::new(),
            error: Some(message.into()),
        }
    }
}

/// Heuristic executor for one language.
pub trait LanguageRunner: Send + Sync {
    /// Fixed message describing a missing structural marker, if any.
    fn detect_structural_error(&self, source: &str) -> Option<String>;

    /// Program output, one line per print call.
    fn extract_output(&self, source: &str) -> String;

    fn run(&self, source: &str) -> RunOutcome {
        match self.detect_structural_error(source) {
            Some(message) => RunOutcome::structural(message),
            None => RunOutcome::success(self.extract_output(source)),
        }
    }
}

/// Built-in runners, one variant per supported language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Runner {
    JavaScript,
    Python,
    Java,
    Cpp,
    Ruby,
    Go,
    /// Acknowledges the run without inspecting the source.
    Default(String),
}

impl Runner {
    pub fn for_language(language: &Language) -> Self {
        match language {
            Language::JavaScript => Runner::JavaScript,
            Language::Python => Runner::Python,
            Language::Java => Runner::Java,
            Language::Cpp => Runner::Cpp,
            Language::Ruby => Runner::Ruby,
            Language::Go => Runner::Go,
            Language::Other(tag) => Runner::Default(tag.clone()),
        }
    }
}

impl LanguageRunner for Runner {
    fn detect_structural_error(&self, source: &str) -> Option<String> {
        match self {
            Runner::JavaScript => heuristics::javascript_structure(source),
            Runner::Python => heuristics::python_structure(source),
            Runner::Java => heuristics::java_structure(source),
            Runner::Cpp => heuristics::cpp_structure(source),
            Runner::Ruby => heuristics::ruby_structure(source),
            Runner::Go => heuristics::go_structure(source),
            Runner::Default(_) => None,
        }
    }

    fn extract_output(&self, source: &str) -> String {
        let lines = match self {
            Runner::JavaScript => heuristics::javascript_output(source),
            Runner::Python => heuristics::python_output(source),
            Runner::Java => heuristics::java_output(source),
            Runner::Ruby => heuristics::ruby_output(source),
            Runner::Go => heuristics::go_output(source),
            Runner::Cpp => heuristics::cpp_output(source),
            Runner::Default(tag) => {
                return format!(
                    "(Simulated) Code executed in {tag}. This is a simulation and doesn't actually run the code."
                );
            }
        };

        let output = join_lines(lines);
        if *self == Runner::Cpp && !heuristics::cpp_has_include(source) {
            return format!("{}\n{output}", heuristics::CPP_INCLUDE_WARNING);
        }
        output
    }
}

fn join_lines(lines: Vec<String>) -> String {
    if lines.is_empty() {
        return NO_OUTPUT.to_string();
    }
    lines.into_iter().map(|line| line + "\n").collect()
}
