// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Line-oriented decoder that turns raw terminal output into typed events.
//!
//! The parser is a small state machine whose state is the currently
//! accumulating segment (none, message, or tool result). Each input line
//! is ANSI-scrubbed first, then matched against the recognizers in a fixed
//! precedence: bullet markers, result continuations, permission prompts,
//! status indicators, cost lines, error lines, blanks, plain text.

mod ansi;

pub use ansi::strip_ansi;

use serde::Serialize;
use serde_json::{json, Value};
use std::sync::OnceLock;

/// Tools the agent CLI renders behind the `⏺` bullet, with the input key
/// their argument maps to.
const TOOLS: &[(&str, Option<&str>)] = &[
    ("NotebookEdit", Some("file_path")),
    ("Read", Some("file_path")),
    ("Edit", Some("file_path")),
    ("Write", Some("file_path")),
    ("Bash", Some("command")),
    ("Glob", Some("pattern")),
    ("Grep", Some("pattern")),
    ("Task", Some("description")),
    ("WebSearch", Some("query")),
    ("WebFetch", Some("url")),
    ("TodoWrite", None),
];

/// Token counters extracted from cost lines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TokenCounts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_write: Option<u64>,
}

impl TokenCounts {
    fn is_empty(&self) -> bool {
        self.input.is_none()
            && self.output.is_none()
            && self.cache_read.is_none()
            && self.cache_write.is_none()
    }
}

/// A decoded event from the agent's terminal stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParsedEvent {
    ToolUse {
        tool: String,
        input: Value,
    },
    ToolResult {
        tool: String,
        output: String,
        truncated: bool,
    },
    Message {
        content: String,
    },
    Status {
        state: String,
    },
    CostUpdate {
        #[serde(skip_serializing_if = "Option::is_none")]
        cost: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tokens: Option<TokenCounts>,
    },
    PermissionRequest {
        request_id: String,
        action: String,
        details: String,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    None,
    Message(Vec<String>),
    ToolResult { tool: String, lines: Vec<String>, truncated: bool },
}

/// Stateful decoder. One instance per session; permission request ids are
/// scoped to the instance.
pub struct OutputParser {
    state: Segment,
    /// Set after a `tool_use` while its result may still follow.
    pending_tool: Option<String>,
    perm_counter: u64,
}

impl Default for OutputParser {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputParser {
    pub fn new() -> Self {
        Self { state: Segment::None, pending_tool: None, perm_counter: 0 }
    }

    /// Decode one raw line, returning any events it completes.
    pub fn parse_line(&mut self, raw: &str) -> Vec<ParsedEvent> {
        let line = strip_ansi(raw);
        let mut events = Vec::new();

        // 1. Bullet marker: starts a new segment, closing whatever was open.
        if let Some(rest) = line.trim_start().strip_prefix('⏺') {
            let rest = rest.trim();
            self.close_segment(&mut events);
            match match_tool(rest) {
                Some((tool, input)) => {
                    events.push(ParsedEvent::ToolUse { tool: tool.clone(), input });
                    self.pending_tool = Some(tool);
                }
                None => {
                    self.pending_tool = None;
                    self.state = Segment::Message(vec![rest.to_owned()]);
                }
            }
            return events;
        }

        // Blank lines: paragraph break inside a segment, noise otherwise.
        if line.trim().is_empty() {
            match self.state {
                Segment::Message(ref mut lines) => lines.push(String::new()),
                Segment::ToolResult { ref mut lines, .. } => lines.push(String::new()),
                Segment::None => {}
            }
            return events;
        }

        // 2. Tool-result continuations: indented or `⎿`-prefixed lines
        //    while a result is open or a tool_use just happened.
        let continuation = line.starts_with(char::is_whitespace)
            || line.trim_start().starts_with('⎿');
        if continuation {
            let eligible = matches!(self.state, Segment::ToolResult { .. })
                || (matches!(self.state, Segment::None) && self.pending_tool.is_some());
            if eligible {
                self.append_result(&line);
                return events;
            }
        } else if matches!(self.state, Segment::ToolResult { .. }) {
            // Non-indented, non-continuation line terminates the result.
            self.close_segment(&mut events);
        }

        // 3. Permission prompts.
        if is_permission_prompt(&line) {
            self.close_segment(&mut events);
            self.perm_counter += 1;
            events.push(ParsedEvent::PermissionRequest {
                request_id: format!("perm-{}", self.perm_counter),
                action: extract_permission_action(&line),
                details: line.trim().to_owned(),
            });
            return events;
        }

        // 4. Status indicators.
        if let Some(state) = match_status(&line) {
            self.close_segment(&mut events);
            events.push(ParsedEvent::Status { state: state.to_owned() });
            return events;
        }

        // 5. Cost and token accounting.
        if let Some(event) = match_cost(&line) {
            self.close_segment(&mut events);
            events.push(event);
            return events;
        }

        // 6. Error lines.
        if let Some(message) = match_error(&line) {
            self.close_segment(&mut events);
            events.push(ParsedEvent::Error { message });
            return events;
        }

        // 7. Anything else accumulates into a message.
        match self.state {
            Segment::Message(ref mut lines) => lines.push(line.trim_end().to_owned()),
            _ => {
                self.pending_tool = None;
                self.state = Segment::Message(vec![line.trim_end().to_owned()]);
            }
        }
        events
    }

    /// Emit any pending segment.
    pub fn flush(&mut self) -> Vec<ParsedEvent> {
        let mut events = Vec::new();
        self.close_segment(&mut events);
        events
    }

    /// Discard state without emitting.
    pub fn reset(&mut self) {
        self.state = Segment::None;
        self.pending_tool = None;
    }

    fn append_result(&mut self, line: &str) {
        let content = result_content(line);
        let truncated_marker = content.contains("(truncated)");

        if let Segment::ToolResult { ref mut lines, ref mut truncated, .. } = self.state {
            if truncated_marker {
                *truncated = true;
            } else {
                lines.push(content);
            }
            return;
        }

        let tool = self.pending_tool.take().unwrap_or_default();
        let lines = if truncated_marker { Vec::new() } else { vec![content] };
        self.state = Segment::ToolResult { tool, lines, truncated: truncated_marker };
    }

    fn close_segment(&mut self, events: &mut Vec<ParsedEvent>) {
        match std::mem::replace(&mut self.state, Segment::None) {
            Segment::None => {}
            Segment::Message(lines) => {
                let content = join_trimmed(lines);
                if !content.is_empty() {
                    events.push(ParsedEvent::Message { content });
                }
            }
            Segment::ToolResult { tool, lines, truncated } => {
                self.pending_tool = None;
                events.push(ParsedEvent::ToolResult {
                    tool,
                    output: join_trimmed(lines),
                    truncated,
                });
            }
        }
    }
}

/// Join accumulated lines, dropping trailing paragraph breaks.
fn join_trimmed(mut lines: Vec<String>) -> String {
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

/// Continuation line content: strip the `⎿` connector or the indentation.
fn result_content(line: &str) -> String {
    let trimmed = line.trim_start();
    match trimmed.strip_prefix('⎿') {
        Some(rest) => rest.trim().to_owned(),
        None => trimmed.trim_end().to_owned(),
    }
}

/// Match `Tool`, `Tool(ARG)`, or `Tool: ARG` after the bullet.
fn match_tool(rest: &str) -> Option<(String, Value)> {
    for &(tool, key) in TOOLS {
        let Some(after) = rest.strip_prefix(tool) else {
            continue;
        };
        if after.trim().is_empty() {
            return Some((tool.to_owned(), json!({})));
        }
        if let Some(arg) = after.strip_prefix('(') {
            let arg = arg.trim_end().trim_end_matches(')').trim();
            return Some((tool.to_owned(), tool_input(key, arg)));
        }
        if let Some(arg) = after.strip_prefix(':') {
            return Some((tool.to_owned(), tool_input(key, arg.trim())));
        }
        // Prefix of a longer word ("Reading ..."), not a tool invocation.
    }
    None
}

fn tool_input(key: Option<&str>, arg: &str) -> Value {
    match key {
        Some(key) if !arg.is_empty() => json!({ key: arg }),
        _ => json!({}),
    }
}

fn is_permission_prompt(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.contains("Do you want to allow")
        || (trimmed.starts_with("Allow ") && trimmed.contains('?'))
        || trimmed.contains("Approve?")
}

fn extract_permission_action(line: &str) -> String {
    let trimmed = line.trim();
    let after_allow = trimmed
        .find("allow ")
        .map(|i| &trimmed[i + "allow ".len()..])
        .or_else(|| trimmed.strip_prefix("Allow "));
    match after_allow {
        Some(rest) => {
            let end = rest.find('?').unwrap_or(rest.len());
            rest[..end].trim().to_owned()
        }
        None => trimmed.trim_end_matches('?').trim().to_owned(),
    }
}

fn match_status(line: &str) -> Option<&'static str> {
    let trimmed = line.trim();
    if trimmed == ">" {
        // Bare input prompt: the agent is waiting.
        return Some("idle");
    }
    let word: String = trimmed
        .trim_start_matches(|c: char| !c.is_ascii_alphabetic())
        .trim_end_matches(|c: char| !c.is_ascii_alphabetic())
        .to_ascii_lowercase();
    match word.as_str() {
        "thinking" => Some("thinking"),
        "working" | "processing" => Some("working"),
        _ => None,
    }
}

struct CostPatterns {
    cost: regex::Regex,
    input: regex::Regex,
    output: regex::Regex,
    cache_read: regex::Regex,
    cache_write: regex::Regex,
}

/// Compile a pattern known to be valid at authoring time.
fn re(pattern: &str) -> regex::Regex {
    #[allow(clippy::unwrap_used)]
    let compiled = regex::Regex::new(pattern).unwrap();
    compiled
}

fn cost_patterns() -> &'static CostPatterns {
    static PATTERNS: OnceLock<CostPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| CostPatterns {
        cost: re(r"(?i)\b(?:total\s+)?cost:\s*\$?([0-9]+(?:\.[0-9]+)?)"),
        input: re(r"(?i)\binput tokens:\s*([0-9]+)"),
        output: re(r"(?i)\boutput tokens:\s*([0-9]+)"),
        cache_read: re(r"(?i)\bcache_read tokens:\s*([0-9]+)"),
        cache_write: re(r"(?i)\bcache_write tokens:\s*([0-9]+)"),
    })
}

fn capture_number<T: std::str::FromStr>(re: &regex::Regex, line: &str) -> Option<T> {
    re.captures(line).and_then(|c| c.get(1)).and_then(|m| m.as_str().parse().ok())
}

fn match_cost(line: &str) -> Option<ParsedEvent> {
    let p = cost_patterns();
    let cost: Option<f64> = capture_number(&p.cost, line);
    let tokens = TokenCounts {
        input: capture_number(&p.input, line),
        output: capture_number(&p.output, line),
        cache_read: capture_number(&p.cache_read, line),
        cache_write: capture_number(&p.cache_write, line),
    };
    if cost.is_none() && tokens.is_empty() {
        return None;
    }
    let tokens = if tokens.is_empty() { None } else { Some(tokens) };
    Some(ParsedEvent::CostUpdate { cost, tokens })
}

fn match_error(line: &str) -> Option<String> {
    let trimmed = line.trim();
    for prefix in ["Error:", "ERROR:", "✗:"] {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            return Some(rest.trim().to_owned());
        }
    }
    None
}

#[cfg(test)]
#[path = "parser_tests.rs"]
mod tests;
