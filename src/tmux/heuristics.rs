use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::AgentKind;

/// Lines from the bottom of a capture searched for a working indicator
pub const WORKING_INDICATOR_LINES: usize = 20;

/// Appended characters below which a growing line still counts as typing
pub const TYPING_GROWTH_LIMIT: usize = 20;

/// Status of an AI agent session as guessed from pane text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AgentStatus {
    /// Agent is actively processing (spinning, thinking)
    Busy,
    /// Agent is idle, waiting at prompt
    Idle,
    /// Agent is waiting for user input (confirmation, question)
    WaitingForInput,
    /// Agent encountered an error
    Error,
    /// Status cannot be determined
    #[default]
    Unknown,
}

/// Compiled regex patterns for status detection
static RE_WAITING_INPUT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?mi)(^\s*>\s*$|Type a message|Press Enter|waiting for input|\? $|\[y/n\]|\(y/N\)|\(Y/n\)|Do you want to)").unwrap()
});

static RE_BUSY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?mi)(Thinking\.{3}|Processing|Loading|Working|⠋|⠙|⠹|⠸|⠼|⠴|⠦|⠧|⠇|⠏|\.\.\.$)").unwrap()
});

static RE_ERROR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?mi)(^Error:|^error:|Exception|FAILED|panic|fatal|crash)").unwrap()
});

static RE_IDLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)(^\$\s*$|^❯\s*$|^>\s*$|claude>)").unwrap()
});

/// Agent-agnostic cue that the agent is processing and can be interrupted
static RE_WORKING_INDICATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(interrupt to cancel|(esc|ctrl\+c) to (interrupt|cancel))").unwrap()
});

static RE_CLAUDE_BUSY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*[✻✽✶✳✢·*]\s+\w+…").unwrap()
});

static RE_CODEX_BUSY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*•?\s*Working \(\d+s").unwrap()
});

static RE_OPENCODE_BUSY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?mi)^\s*working\.\.\.").unwrap()
});

/// Shell and agent input prompts
static RE_PROMPT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:[│|]\s*)?(?:[$%#>❯›➜]|claude>)(?:\s|$)").unwrap()
});

/// Engine for inferring agent status from pane content
pub struct StateInferenceEngine;

impl StateInferenceEngine {
    /// Analyze pane content and determine agent status
    pub fn analyze(content: &str) -> AgentStatus {
        let recent_content = tail(content, WORKING_INDICATOR_LINES);

        // Priority order: Error > WaitingForInput > Busy > Idle > Unknown
        if RE_ERROR.is_match(&recent_content) {
            return AgentStatus::Error;
        }

        if RE_WAITING_INPUT.is_match(&recent_content) {
            return AgentStatus::WaitingForInput;
        }

        if RE_BUSY.is_match(&recent_content) {
            return AgentStatus::Busy;
        }

        if RE_IDLE.is_match(&recent_content) {
            return AgentStatus::Idle;
        }

        AgentStatus::Unknown
    }
}

/// Whether the recent part of a capture proves the agent is processing
pub fn has_working_indicator(content: &str, agent: Option<AgentKind>) -> bool {
    let recent = tail(content, WORKING_INDICATOR_LINES);
    if RE_WORKING_INDICATOR.is_match(&recent) {
        return true;
    }

    match agent {
        Some(AgentKind::Claude) => RE_CLAUDE_BUSY.is_match(&recent),
        Some(AgentKind::Codex) => RE_CODEX_BUSY.is_match(&recent),
        Some(AgentKind::Opencode) => RE_OPENCODE_BUSY.is_match(&recent),
        Some(AgentKind::Gemini) | None => false,
    }
}

/// Whether a line looks like a shell or agent input prompt
pub fn is_prompt_line(line: &str) -> bool {
    RE_PROMPT.is_match(line)
}

/// Whether the change from `previous` to `current` looks like someone typing
/// at a prompt rather than output from the agent.
pub fn is_user_typing(previous: &str, current: &str) -> bool {
    let old_lines = trimmed_lines(previous);
    let new_lines = trimmed_lines(current);

    if old_lines.len().abs_diff(new_lines.len()) > 2 {
        return false;
    }

    let total = old_lines.len().max(new_lines.len());
    let mut changed = 0;
    let mut last_changed = None;
    for i in 0..total {
        let old = old_lines.get(i).copied().unwrap_or("");
        let new = new_lines.get(i).copied().unwrap_or("");
        if old != new {
            changed += 1;
            last_changed = Some(i);
        }
    }

    let Some(index) = last_changed else {
        return false;
    };
    if changed > 2 || index + 3 < total {
        return false;
    }

    let old = old_lines.get(index).copied().unwrap_or("");
    let new = new_lines.get(index).copied().unwrap_or("");
    let appended = new
        .strip_prefix(old)
        .map(|rest| !rest.is_empty() && rest.chars().count() < TYPING_GROWTH_LIMIT)
        .unwrap_or(false);

    appended || is_prompt_line(new)
}

/// Lines of a capture without the blank padding tmux adds below the cursor
fn trimmed_lines(content: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = content.lines().collect();
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    lines
}

fn tail(content: &str, count: usize) -> String {
    let lines = trimmed_lines(content);
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}
