//! Prompt clarification: ask one agent for questions, fold answers back in.

use std::time::Duration;

use tracing::warn;

use crate::dispatch::{DispatchRequest, Dispatcher, Purpose};
use crate::error::{OrchestraError, Result};

pub const DEFAULT_MAX_QUESTIONS: usize = 3;

fn question_prompt(prompt: &str, max: usize) -> String {
    format!(
        "Analyze this programming request and generate {max} clarifying questions that would help \
         provide a better solution.\n\n\
         Request: {prompt}\n\n\
         Ask about technical requirements (language, frameworks, versions), context and \
         constraints, expected outcomes, and edge cases.\n\n\
         Respond with exactly {max} questions, each on its own line, starting with \"Q:\".\n"
    )
}

/// Ask `agent` for up to `max` clarifying questions.
///
/// A failed or unusable reply yields no questions; an unregistered agent is
/// an error.
pub async fn request_questions(
    dispatcher: &Dispatcher,
    agent: &str,
    prompt: &str,
    timeout: Duration,
    max: usize,
) -> Result<Vec<String>> {
    let descriptor = dispatcher
        .registry()
        .get(agent)
        .cloned()
        .ok_or_else(|| OrchestraError::UnknownAgent(agent.to_string()))?;

    let request = DispatchRequest::new(descriptor, Purpose::Clarify, question_prompt(prompt, max), timeout);
    let mut entries = dispatcher.dispatch_requests(vec![request]).await;
    match entries.pop().map(|e| e.result) {
        Some(Ok(response)) => Ok(parse_questions(&response.stdout, max)),
        Some(Err(failure)) => {
            warn!(agent = %agent, failure = %failure, "clarification failed");
            Ok(Vec::new())
        }
        None => Ok(Vec::new()),
    }
}

/// Extract question lines.
///
/// `Q:` / `Question N:` prefixed lines are taken first; without any, lines
/// ending in `?` are used. Numbering and bullets are stripped.
pub fn parse_questions(text: &str, max: usize) -> Vec<String> {
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();

    let labelled: Vec<String> = lines.iter().filter_map(|l| strip_label(l)).collect();
    let picked = if labelled.is_empty() {
        lines
            .iter()
            .map(|l| strip_enumeration(l))
            .filter(|l| l.ends_with('?') && l.len() > 1)
            .map(str::to_string)
            .collect()
    } else {
        labelled
    };
    picked.into_iter().take(max).collect()
}

fn strip_label(line: &str) -> Option<String> {
    let line = strip_enumeration(line);
    let lower = line.to_ascii_lowercase();
    let rest = if lower.starts_with("q:") {
        &line[2..]
    } else if lower.starts_with("question") {
        let after = &line["question".len()..];
        let colon = after.find(':')?;
        if !after[..colon].trim().chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        &after[colon + 1..]
    } else {
        return None;
    };
    let rest = rest.trim();
    (!rest.is_empty()).then(|| rest.to_string())
}

fn strip_enumeration(line: &str) -> &str {
    let line = line.trim_start_matches(|c: char| c == '-' || c == '*' || c == '•').trim_start();
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return rest.trim_start();
        }
    }
    line
}

/// Build the prompt sent to generators once the operator has answered.
///
/// Questions with blank answers are dropped; with none left the original
/// prompt is returned unchanged.
pub fn enhance_prompt(original: &str, answers: &[(String, String)]) -> String {
    let answered: Vec<&(String, String)> = answers.iter().filter(|(_, a)| !a.trim().is_empty()).collect();
    if answered.is_empty() {
        return original.to_string();
    }
    let mut out = format!(
        "Enhanced Request (based on clarifying questions):\n\nOriginal: {original}\n\nClarifications:\n"
    );
    for (idx, (question, answer)) in answered.iter().enumerate() {
        out.push_str(&format!("{}. {}\n   Answer: {}\n", idx + 1, question, answer.trim()));
    }
    out.push_str("\nPlease provide a solution that addresses these aspects.\n");
    out
}
