//! Rule-based analysis of test results.
//!
//! Maps a result set to a [`TestAnalysis`]: failure categories from pattern
//! tables, file/line extraction, deduplicated failure patterns, and fix
//! suggestions. No model calls — everything here is a regex or a counter.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::testing::{RunStatus, TestResult};

/// Failure category assigned to each non-passing test.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, strum::Display,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Assertion,
    Import,
    Syntax,
    Timeout,
    Dependency,
    Network,
    Permission,
    Resource,
    Unknown,
}

/// A deduplicated failure signature with its occurrence count.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FailurePattern {
    pub category: FailureCategory,
    /// Representative message (the line that matched the category).
    pub message: String,
    pub file: Option<String>,
    pub line: Option<u64>,
    pub occurrences: usize,
}

/// Aggregate verdict over a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    /// Everything passed.
    Green,
    /// At least one failure, timeout, or error.
    Red,
    /// Nothing failed, but some tests were skipped.
    Yellow,
}

/// How hard the failure set looks to fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AnalysisComplexity {
    Low,
    Medium,
    High,
}

/// Full analysis of one test run.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TestAnalysis {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub timeout: usize,
    pub error: usize,
    pub skipped: usize,
    pub status: OverallStatus,
    pub patterns: Vec<FailurePattern>,
    pub suggestions: Vec<String>,
    pub complexity: AnalysisComplexity,
}

impl TestAnalysis {
    pub fn is_green(&self) -> bool {
        self.status == OverallStatus::Green
    }
}

struct CategoryRule {
    category: FailureCategory,
    pattern: Lazy<Regex>,
}

macro_rules! rule {
    ($category:expr, $pattern:literal) => {
        CategoryRule {
            category: $category,
            pattern: Lazy::new(|| Regex::new($pattern).expect("static regex")),
        }
    };
}

/// Category tables, tried in order; the first matching line wins.
static RULES: [CategoryRule; 7] = [
    rule!(
        FailureCategory::Import,
        r"(?i)ModuleNotFoundError|ImportError|cannot find module|no module named|unresolved import|cannot resolve module"
    ),
    rule!(
        FailureCategory::Syntax,
        r"(?i)SyntaxError|unexpected token|invalid syntax|expected expression|unexpected indent"
    ),
    rule!(
        FailureCategory::Assertion,
        r"(?i)AssertionError|assertion (failed|error)|assert_eq!|assertion `.*` failed|expected .+ but (got|was)"
    ),
    rule!(
        FailureCategory::Network,
        r"(?i)connection refused|connection reset|DNS|name or service not known|network is unreachable|no route to host"
    ),
    rule!(
        FailureCategory::Permission,
        r"(?i)permission denied|EACCES|operation not permitted|read-only file system"
    ),
    rule!(
        FailureCategory::Resource,
        r"(?i)no space left|out of memory|OOM|cannot allocate memory|disk quota exceeded|too many open files"
    ),
    rule!(
        FailureCategory::Dependency,
        r"(?i)could not find a version|failed to resolve|lockfile|version conflict|unresolved dependency|missing dependency"
    ),
];

/// `File "path", line N` (python tracebacks).
static PY_LOCATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"File "([^"]+)", line (\d+)"#).expect("static regex"));

/// `path.ext:line` (compilers, pytest short form, rust panics).
static COLON_LOCATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Za-z0-9_./\\-]+\.[A-Za-z0-9_]+):(\d+)").expect("static regex"));

/// Categorize one non-passing result and pick its representative line.
fn categorize(result: &TestResult) -> (FailureCategory, String) {
    if result.status == RunStatus::Timeout {
        let message = result
            .reason
            .clone()
            .unwrap_or_else(|| "timed out".to_string());
        return (FailureCategory::Timeout, message);
    }

    let combined = format!("{}\n{}", result.stdout, result.stderr);
    for rule in &RULES {
        for line in combined.lines() {
            if rule.pattern.is_match(line) {
                return (rule.category, line.trim().to_string());
            }
        }
    }

    let fallback = combined
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("test failed with no output")
        .trim()
        .to_string();
    (FailureCategory::Unknown, fallback)
}

/// Extract the last path-like token adjacent to a line number.
fn extract_location(text: &str) -> (Option<String>, Option<u64>) {
    if let Some(caps) = PY_LOCATION.captures_iter(text).last() {
        let file = caps.get(1).map(|m| m.as_str().to_string());
        let line = caps.get(2).and_then(|m| m.as_str().parse().ok());
        return (file, line);
    }
    if let Some(caps) = COLON_LOCATION.captures_iter(text).last() {
        let file = caps.get(1).map(|m| m.as_str().to_string());
        let line = caps.get(2).and_then(|m| m.as_str().parse().ok());
        return (file, line);
    }
    (None, None)
}

fn suggestion_for(category: FailureCategory) -> &'static str {
    match category {
        FailureCategory::Assertion => {
            "Compare expected and actual values in the failing assertions; the logic under test disagrees with the test."
        }
        FailureCategory::Import => {
            "Add the missing module to the project dependencies or fix the import path."
        }
        FailureCategory::Syntax => {
            "Fix the syntax error first; the file does not parse, so nothing after it ran."
        }
        FailureCategory::Timeout => {
            "Raise the test's timeout or profile the slow path; the command never finished."
        }
        FailureCategory::Dependency => {
            "Re-resolve project dependencies; the lockfile or version constraints look out of date."
        }
        FailureCategory::Network => {
            "The sandbox has no network by default; stub the network calls or enable sandbox networking."
        }
        FailureCategory::Permission => {
            "The test writes where it may not; keep writes inside the scratch directory."
        }
        FailureCategory::Resource => {
            "The sandbox ran out of memory or disk; shrink the test's footprint or raise the caps."
        }
        FailureCategory::Unknown => {
            "No known failure signature matched; read the full captured output."
        }
    }
}

/// Threshold at which a "split this workpad" suggestion is added.
const SPLIT_THRESHOLD: usize = 3;

/// Analyze a test run.
pub fn analyze(results: &[TestResult]) -> TestAnalysis {
    let summary = crate::testing::summarize(results);

    let mut patterns: Vec<FailurePattern> = Vec::new();
    let mut failing_tests = 0usize;
    for result in results {
        match result.status {
            RunStatus::Passed | RunStatus::Skipped => continue,
            _ => failing_tests += 1,
        }
        let (category, message) = categorize(result);
        let combined = format!("{}\n{}", result.stdout, result.stderr);
        let (file, line) = extract_location(&combined);

        let prefix: String = message.chars().take(60).collect();
        let existing = patterns.iter_mut().find(|p| {
            p.category == category
                && p.file == file
                && p.line == line
                && p.message.starts_with(&prefix)
        });
        match existing {
            Some(pattern) => pattern.occurrences += 1,
            None => patterns.push(FailurePattern {
                category,
                message,
                file,
                line,
                occurrences: 1,
            }),
        }
    }

    let mut categories: Vec<FailureCategory> = patterns.iter().map(|p| p.category).collect();
    categories.sort();
    categories.dedup();

    let mut suggestions: Vec<String> = categories
        .iter()
        .map(|c| suggestion_for(*c).to_string())
        .collect();
    if categories.len() >= SPLIT_THRESHOLD || failing_tests >= SPLIT_THRESHOLD {
        suggestions.push(
            "Split this workpad into smaller pieces; the failures span too much ground to fix in one pass."
                .to_string(),
        );
    }

    let status = if summary.failed + summary.timeout + summary.error > 0 {
        OverallStatus::Red
    } else if summary.skipped > 0 {
        OverallStatus::Yellow
    } else {
        OverallStatus::Green
    };

    let heavy_category = categories
        .iter()
        .any(|c| matches!(c, FailureCategory::Resource | FailureCategory::Permission));
    let complexity = if categories.len() >= 3 || failing_tests >= 5 || heavy_category {
        AnalysisComplexity::High
    } else if categories.len() <= 1 && failing_tests <= 2 {
        AnalysisComplexity::Low
    } else {
        AnalysisComplexity::Medium
    };
    // An all-green run has no categories at all, which the low bucket covers.

    TestAnalysis {
        total: summary.total,
        passed: summary.passed,
        failed: summary.failed,
        timeout: summary.timeout,
        error: summary.error,
        skipped: summary.skipped,
        status,
        patterns,
        suggestions,
        complexity,
    }
}
