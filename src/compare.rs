//! Grading comparator: binary verdicts, no partial credit, no diffing.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VerdictStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "WRONG")]
    Wrong,
}

/// The outcome of comparing a submission's captured output to the expected
/// output. Derived per request, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub status: VerdictStatus,
    pub expected: String,
    pub actual: String,
}

impl Verdict {
    pub fn is_ok(&self) -> bool {
        self.status == VerdictStatus::Ok
    }
}

/// Requires exact equality after stripping newline characters and trimming
/// surrounding whitespace on both sides. Infallible: once both texts exist,
/// the result is always OK or WRONG.
pub fn compare(expected: &str, actual: &str) -> Verdict {
    let status = if normalize(expected) == normalize(actual) {
        VerdictStatus::Ok
    } else {
        VerdictStatus::Wrong
    };

    Verdict {
        status,
        expected: expected.trim_end().to_string(),
        actual: actual.trim_end().to_string(),
    }
}

fn normalize(text: &str) -> String {
    let stripped: String = text.chars().filter(|c| *c != '\n' && *c != '\r').collect();
    stripped.trim().to_string()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn matching_output_is_ok() {
        let verdict = compare("Hello, World!", "Hello, World!");
        assert_eq!(verdict.status, VerdictStatus::Ok);
        assert_eq!(verdict.actual, "Hello, World!");
    }

    #[test]
    fn trailing_newline_is_insensitive() {
        assert!(compare("Hello, World!\n", "Hello, World!").is_ok());
        assert!(compare("Hello, World!", "Hello, World!\n").is_ok());
    }

    #[test]
    fn multiline_output_is_joined_before_comparison() {
        assert!(compare("OK\nOK\nOK\n", "OKOKOK").is_ok());
    }

    #[test]
    fn surrounding_whitespace_is_trimmed() {
        assert!(compare("  42  ", "42\n").is_ok());
    }

    #[test]
    fn mismatch_is_wrong_and_verbatim() {
        let verdict = compare("Hello, World!", "Fail!\n");
        assert_eq!(verdict.status, VerdictStatus::Wrong);
        assert_eq!(verdict.expected, "Hello, World!");
        assert_eq!(verdict.actual, "Fail!");
    }

    #[test]
    fn interior_spaces_still_matter() {
        assert_eq!(compare("a b", "ab").status, VerdictStatus::Wrong);
    }
}
