//! Per-language structural checks and print extraction.
//!
//! Pure text inspection. Nothing here parses or runs code.

use std::sync::LazyLock;

use regex::Regex;

use super::eval::{evaluate, first_argument};

fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("valid heuristic regex")
}

// ─── JavaScript ──────────────────────────────────────────────────────────────

static JS_LOG: LazyLock<Regex> = LazyLock::new(|| regex(r"console\.log\((.*?)\);"));

pub fn javascript_structure(source: &str) -> Option<String> {
    if count(source, '{') > count(source, '}') {
        return Some("SyntaxError: missing closing curly brace".to_string());
    }
    if count(source, '(') > count(source, ')') {
        return Some("SyntaxError: missing closing parenthesis".to_string());
    }
    None
}

pub fn javascript_output(source: &str) -> Vec<String> {
    call_arguments(&JS_LOG, source)
}

// ─── Python ──────────────────────────────────────────────────────────────────

static PY_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    regex(r"^(if|elif|else|for|while|def|class|try|except|finally|with)\b")
});
static PY_PRINT: LazyLock<Regex> =
    LazyLock::new(|| regex(r"(?m)\bprint\((.*?)\)\s*(?:#.*)?$"));

pub fn python_structure(source: &str) -> Option<String> {
    let missing_colon = python_logical_lines(source)
        .iter()
        .any(|line| PY_BLOCK.is_match(line.text.trim()) && !line.has_colon);
    missing_colon.then(|| r#"SyntaxError: expected ":""#.to_string())
}

/// One statement, with string contents and comments blanked out.
struct LogicalLine {
    text: String,
    /// A `:` outside brackets and string literals.
    has_colon: bool,
}

/// Physical lines are joined while a bracket stays open.
fn python_logical_lines(source: &str) -> Vec<LogicalLine> {
    let mut lines = Vec::new();
    let mut current = LogicalLine {
        text: String::new(),
        has_colon: false,
    };
    let mut depth = 0usize;

    for physical in source.lines() {
        let mut quote: Option<char> = None;
        let mut chars = physical.chars();
        while let Some(ch) = chars.next() {
            if let Some(open) = quote {
                if ch == '\\' {
                    chars.next();
                } else if ch == open {
                    quote = None;
                    current.text.push(ch);
                }
                continue;
            }
            match ch {
                '#' => break,
                '"' | '\'' => quote = Some(ch),
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => depth = depth.saturating_sub(1),
                ':' if depth == 0 => current.has_colon = true,
                _ => {}
            }
            current.text.push(ch);
        }

        if depth > 0 {
            current.text.push(' ');
        } else {
            lines.push(std::mem::replace(
                &mut current,
                LogicalLine {
                    text: String::new(),
                    has_colon: false,
                },
            ));
        }
    }
    if !current.text.is_empty() {
        lines.push(current);
    }
    lines
}

pub fn python_output(source: &str) -> Vec<String> {
    call_arguments(&PY_PRINT, source)
}

// ─── Java ────────────────────────────────────────────────────────────────────

static JAVA_CLASS: LazyLock<Regex> = LazyLock::new(|| regex(r"\bclass\s+\w+"));
static JAVA_MAIN: LazyLock<Regex> =
    LazyLock::new(|| regex(r"\bstatic\s+void\s+main\s*\("));
static JAVA_PRINT: LazyLock<Regex> =
    LazyLock::new(|| regex(r"System\.out\.print(?:ln)?\((.*?)\);"));

pub fn java_structure(source: &str) -> Option<String> {
    if !JAVA_CLASS.is_match(source) {
        return Some("Error: Java code must define a class".to_string());
    }
    if !JAVA_MAIN.is_match(source) {
        return Some("Error: Java code must define a main method".to_string());
    }
    None
}

pub fn java_output(source: &str) -> Vec<String> {
    call_arguments(&JAVA_PRINT, source)
}

// ─── C++ ─────────────────────────────────────────────────────────────────────

pub const CPP_INCLUDE_WARNING: &str = "Warning: No #include directive found";

static CPP_MAIN: LazyLock<Regex> = LazyLock::new(|| regex(r"\bmain\s*\("));
static CPP_COUT: LazyLock<Regex> = LazyLock::new(|| regex(r"\bcout\s*<<([^;]*);"));

pub fn cpp_structure(source: &str) -> Option<String> {
    (!CPP_MAIN.is_match(source))
        .then(|| "Error: No main function found in C++ code".to_string())
}

pub fn cpp_has_include(source: &str) -> bool {
    source.contains("#include")
}

/// One line per `cout` statement, `endl` dropped.
pub fn cpp_output(source: &str) -> Vec<String> {
    CPP_COUT
        .captures_iter(source)
        .map(|caps| {
            caps[1]
                .split("<<")
                .map(str::trim)
                .filter(|part| !part.is_empty() && *part != "endl" && *part != "std::endl")
                .map(evaluate)
                .collect::<String>()
        })
        .collect()
}

// ─── Ruby ────────────────────────────────────────────────────────────────────

static RUBY_OPENER: LazyLock<Regex> = LazyLock::new(|| {
    regex(r"^(def|class|module|if|unless|while|until|case|begin)\b")
});
static RUBY_DO: LazyLock<Regex> = LazyLock::new(|| regex(r"\bdo(\s*\|[^|]*\|)?$"));
static RUBY_END: LazyLock<Regex> = LazyLock::new(|| regex(r"^end\b"));
static RUBY_PRINT: LazyLock<Regex> = LazyLock::new(|| {
    regex(r"(?m)^\s*(?:puts|print)\b\s*\(?\s*(.*?)\s*\)?\s*(?:#.*)?$")
});

pub fn ruby_structure(source: &str) -> Option<String> {
    let mut openers = 0usize;
    let mut closers = 0usize;
    for line in source.lines() {
        let line = strip_comment(line, "#").trim();
        if RUBY_OPENER.is_match(line) || RUBY_DO.is_match(line) {
            openers += 1;
        }
        if RUBY_END.is_match(line) {
            closers += 1;
        }
    }
    (openers > closers).then(|| {
        "SyntaxError: unexpected end-of-input, expecting keyword_end".to_string()
    })
}

pub fn ruby_output(source: &str) -> Vec<String> {
    call_arguments(&RUBY_PRINT, source)
}

// ─── Go ──────────────────────────────────────────────────────────────────────

static GO_PACKAGE: LazyLock<Regex> = LazyLock::new(|| regex(r"(?m)^\s*package\s+main\b"));
static GO_MAIN: LazyLock<Regex> = LazyLock::new(|| regex(r"\bfunc\s+main\s*\("));
static GO_PRINT: LazyLock<Regex> =
    LazyLock::new(|| regex(r"(?m)\bfmt\.Print(?:ln)?\((.*?)\)\s*(?://.*)?$"));

pub fn go_structure(source: &str) -> Option<String> {
    if !GO_PACKAGE.is_match(source) {
        return Some(r#"Error: Go programs must start with "package main""#.to_string());
    }
    if !GO_MAIN.is_match(source) {
        return Some("Error: Go programs require a main function".to_string());
    }
    None
}

pub fn go_output(source: &str) -> Vec<String> {
    call_arguments(&GO_PRINT, source)
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Evaluate the first argument of every match of `pattern`, in source order.
fn call_arguments(pattern: &Regex, source: &str) -> Vec<String> {
    pattern
        .captures_iter(source)
        .map(|caps| evaluate(first_argument(&caps[1])))
        .collect()
}

fn count(source: &str, ch: char) -> usize {
    source.chars().filter(|c| *c == ch).count()
}

fn strip_comment<'a>(line: &'a str, marker: &str) -> &'a str {
    line.split_once(marker).map_or(line, |(code, _)| code)
}
