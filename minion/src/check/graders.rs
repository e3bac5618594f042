//! Concrete checkers: LLM critic, test-case executor, doctest runner, and
//! held-out input/output matcher.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::brain::Brain;
use crate::error::MinionError;
use crate::interpreter::Interpreter;
use crate::message::{canonicalize, Message};
use crate::state::Input;
use crate::worker::extract_code;

use super::{CheckResult, Checker};

/// Compares an actual result against an expectation: numeric comparison with
/// tolerance when both sides parse as numbers; trimmed, case-sensitive
/// string comparison otherwise.
pub(crate) fn outputs_match(actual: &str, expected: &str, tolerance: f64) -> bool {
    let (actual, expected) = (actual.trim(), expected.trim());
    if let (Ok(a), Ok(b)) = (actual.parse::<f64>(), expected.parse::<f64>()) {
        return (a - b).abs() <= tolerance;
    }
    actual == expected
}

/// Candidate answers may be prose containing a fenced block; graders that
/// execute the candidate want the code itself.
fn candidate_code(answer: &str) -> String {
    extract_code(answer).unwrap_or_else(|| answer.to_string())
}

static SCORE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)score\s*[:=]\s*([01](?:\.\d+)?|\.\d+)").expect("score regex"));

/// LLM critic with an explicit rubric; supports multimodal queries (the
/// query's part ordering is preserved on the wire).
pub struct CheckMinion {
    rubric: String,
}

impl Default for CheckMinion {
    fn default() -> Self {
        Self {
            rubric: "You are a strict grader. Judge whether the candidate answer \
                     correctly and completely answers the query. Reply with a line \
                     `score: <0..1>` followed by concise feedback explaining any \
                     deduction."
                .to_string(),
        }
    }
}

impl CheckMinion {
    pub fn with_rubric(rubric: &str) -> Self {
        Self {
            rubric: rubric.to_string(),
        }
    }

    fn parse_score(reply: &str) -> Option<f64> {
        SCORE_LINE
            .captures(reply)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }
}

#[async_trait]
impl Checker for CheckMinion {
    fn name(&self) -> &str {
        "check"
    }

    async fn check(
        &self,
        input: &Input,
        answer: &str,
        brain: &Brain,
    ) -> Result<CheckResult, MinionError> {
        let mut messages = canonicalize(&input.query, Some(&self.rubric));
        messages.push(Message::user(format!(
            "Candidate answer:\n{answer}\n\nGrade it."
        )));
        let reply = brain
            .provider()
            .generate(&messages, &Default::default())
            .await?;
        let score = Self::parse_score(&reply).ok_or_else(|| {
            MinionError::Checker(format!("critic reply has no score line: {reply}"))
        })?;
        let feedback = if reply.trim().is_empty() {
            "no feedback".to_string()
        } else {
            reply
        };
        Ok(CheckResult { score, feedback })
    }
}

/// One `(call, expected)` test case.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct TestCase {
    pub call: String,
    pub expected: String,
}

/// Runs a suite of `(call, expected)` pairs against the candidate; the score
/// is the fraction of passing tests.
pub struct TestMinion {
    cases: Vec<TestCase>,
}

impl TestMinion {
    pub fn new(cases: Vec<TestCase>) -> Self {
        Self { cases }
    }

    /// Cases from `input.metadata["test_cases"]`, merged with constructor
    /// cases.
    fn all_cases(&self, input: &Input) -> Vec<TestCase> {
        let mut cases = self.cases.clone();
        if let Some(value) = input.metadata.get("test_cases") {
            if let Ok(extra) = serde_json::from_value::<Vec<TestCase>>(value.clone()) {
                cases.extend(extra);
            }
        }
        cases
    }
}

#[async_trait]
impl Checker for TestMinion {
    fn name(&self) -> &str {
        "test"
    }

    async fn check(
        &self,
        input: &Input,
        answer: &str,
        brain: &Brain,
    ) -> Result<CheckResult, MinionError> {
        let cases = self.all_cases(input);
        if cases.is_empty() {
            return Err(MinionError::Checker("no test cases".to_string()));
        }
        let tolerance = brain.config().check.tolerance;
        let code = candidate_code(answer);

        let mut passed = 0usize;
        let mut failures = Vec::new();
        for case in &cases {
            // fresh interpreter per case: no cross-test state
            let mut interp = Interpreter::new(&brain.config().interpreter);
            let setup = interp.run(&code);
            if let Some(error) = setup.error {
                failures.push(format!("{}: candidate failed to load: {error}", case.call));
                continue;
            }
            let result = interp.run(&format!("final_answer({})\n", case.call));
            match result.error {
                Some(error) => failures.push(format!("{}: {error}", case.call)),
                None => {
                    let actual = result.value_text();
                    if outputs_match(&actual, &case.expected, tolerance) {
                        passed += 1;
                    } else {
                        failures.push(format!(
                            "{}: expected {}, got {}",
                            case.call, case.expected, actual
                        ));
                    }
                }
            }
        }

        Ok(CheckResult {
            score: passed as f64 / cases.len() as f64,
            feedback: if failures.is_empty() {
                format!("all {} tests passed", cases.len())
            } else {
                failures.join("\n")
            },
        })
    }
}

static DOCTEST_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*>>>\s?(.+)$").expect("doctest regex"));

/// Parses `>>>` examples out of the candidate and runs them; the score is
/// the fraction passing. Feedback enumerates the first K failures.
pub struct DoctestMinion {
    max_reported_failures: usize,
}

impl Default for DoctestMinion {
    fn default() -> Self {
        Self {
            max_reported_failures: 3,
        }
    }
}

/// One parsed doctest: an expression and its expected repr.
struct Doctest {
    expr: String,
    expected: String,
}

impl DoctestMinion {
    fn parse(code: &str) -> Vec<Doctest> {
        let lines: Vec<&str> = code.lines().collect();
        let mut tests = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            let Some(captures) = DOCTEST_LINE.captures(line) else {
                continue;
            };
            let expr = captures[1].trim().to_string();
            // expected output is the next line, unless it is another prompt
            let expected = lines
                .get(i + 1)
                .map(|l| l.trim())
                .filter(|l| !l.starts_with(">>>") && !l.is_empty() && !l.starts_with("\"\"\""))
                .unwrap_or("")
                .to_string();
            if !expected.is_empty() {
                tests.push(Doctest { expr, expected });
            }
        }
        tests
    }
}

#[async_trait]
impl Checker for DoctestMinion {
    fn name(&self) -> &str {
        "doctest"
    }

    async fn check(
        &self,
        _input: &Input,
        answer: &str,
        brain: &Brain,
    ) -> Result<CheckResult, MinionError> {
        let code = candidate_code(answer);
        let tests = Self::parse(&code);
        if tests.is_empty() {
            return Err(MinionError::Checker(
                "candidate contains no doctests".to_string(),
            ));
        }

        let mut interp = Interpreter::new(&brain.config().interpreter);
        let setup = interp.run(&code);
        if let Some(error) = setup.error {
            return Ok(CheckResult {
                score: 0.0,
                feedback: format!("candidate failed to load: {error}"),
            });
        }

        let mut passed = 0usize;
        let mut failures = Vec::new();
        for test in &tests {
            let result = interp.run(&format!("final_answer({})\n", test.expr));
            let actual = match result.error {
                Some(error) => error,
                None => result.value.repr(),
            };
            if outputs_match(&actual, &test.expected, brain.config().check.tolerance) {
                passed += 1;
            } else if failures.len() < self.max_reported_failures {
                failures.push(format!(
                    ">>> {}\nexpected {}, got {}",
                    test.expr, test.expected, actual
                ));
            }
        }

        Ok(CheckResult {
            score: passed as f64 / tests.len() as f64,
            feedback: if failures.is_empty() {
                format!("all {} doctests passed", tests.len())
            } else {
                failures.join("\n")
            },
        })
    }
}

/// One held-out example.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct HeldOutExample {
    pub input: Value,
    pub output: String,
}

/// Runs the candidate's entry point on a held-out `(input, output)` set,
/// scoring the pass rate and reporting the first diverging example.
pub struct CodiumCheckMinion {
    entry_point: String,
    examples: Vec<HeldOutExample>,
}

impl CodiumCheckMinion {
    pub fn new(entry_point: &str, examples: Vec<HeldOutExample>) -> Self {
        Self {
            entry_point: entry_point.to_string(),
            examples,
        }
    }
}

#[async_trait]
impl Checker for CodiumCheckMinion {
    fn name(&self) -> &str {
        "codium"
    }

    async fn check(
        &self,
        _input: &Input,
        answer: &str,
        brain: &Brain,
    ) -> Result<CheckResult, MinionError> {
        if self.examples.is_empty() {
            return Err(MinionError::Checker("no held-out examples".to_string()));
        }
        let code = candidate_code(answer);
        let tolerance = brain.config().check.tolerance;

        let mut passed = 0usize;
        let mut first_divergence = None;
        for example in &self.examples {
            let mut interp = Interpreter::new(&brain.config().interpreter);
            if let Some(error) = interp.run(&code).error {
                return Ok(CheckResult {
                    score: 0.0,
                    feedback: format!("candidate failed to load: {error}"),
                });
            }
            let literal = crate::interpreter::Value::from_json(&example.input).repr();
            let result = interp.run(&format!(
                "final_answer({}({literal}))\n",
                self.entry_point
            ));
            let actual = match result.error {
                Some(error) => error,
                None => result.value_text(),
            };
            if outputs_match(&actual, &example.output, tolerance) {
                passed += 1;
            } else if first_divergence.is_none() {
                first_divergence = Some(format!(
                    "{}({literal}): expected {}, got {}",
                    self.entry_point, example.output, actual
                ));
            }
        }

        Ok(CheckResult {
            score: passed as f64 / self.examples.len() as f64,
            feedback: first_divergence
                .unwrap_or_else(|| format!("all {} examples passed", self.examples.len())),
        })
    }
}
