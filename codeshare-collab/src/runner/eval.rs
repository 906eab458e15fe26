//! Print-argument evaluation shared by every language runner.
//!
//! Only literals and a single `<int> <op> <int>` expression are understood.
//! Anything else is echoed back as an "unable to evaluate" placeholder.

use std::sync::LazyLock;

use regex::Regex;

static NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^-?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?$").expect("valid number regex")
});

static ARITHMETIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\s*([+\-*/])\s*(\d+)$").expect("valid arithmetic regex"));

/// The first top-level argument of a call's argument list.
///
/// Commas inside quotes or nested parentheses do not split.
pub fn first_argument(args: &str) -> &str {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (idx, ch) in args.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' | '`' => quote = Some(ch),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => return args[..idx].trim(),
            _ => {}
        }
    }
    args.trim()
}

/// Evaluate one print argument to the text it would print.
pub fn evaluate(arg: &str) -> String {
    let arg = arg.trim();
    if arg.is_empty() {
        return String::new();
    }

    if let Some(inner) = quoted_contents(arg) {
        return inner.to_string();
    }

    if NUMBER.is_match(arg) {
        return arg.to_string();
    }

    if let Some(caps) = ARITHMETIC.captures(arg) {
        let (Ok(lhs), Ok(rhs)) = (caps[1].parse::<f64>(), caps[3].parse::<f64>()) else {
            return unable(arg);
        };
        let value = match &caps[2] {
            "+" => lhs + rhs,
            "-" => lhs - rhs,
            "*" => lhs * rhs,
            "/" => lhs / rhs,
            _ => return unable(arg),
        };
        return format_number(value);
    }

    unable(arg)
}

fn quoted_contents(arg: &str) -> Option<&str> {
    let first = arg.chars().next()?;
    if !matches!(first, '"' | '\'' | '`') || arg.len() < 2 || !arg.ends_with(first) {
        return None;
    }
    Some(&arg[1..arg.len() - 1])
}

fn format_number(value: f64) -> String {
    if value.is_infinite() {
        if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else {
        // f64's Display prints integral values without a fraction.
        value.to_string()
    }
}

fn unable(arg: &str) -> String {
    format!("(Unable to evaluate: {arg})")
}
