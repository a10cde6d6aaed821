// THEORY:
// Action code is the human-facing rendering of an `ActionCodeNode` tree. Leaf
// lines carry the event start time and read like an instruction:
//
//     [012.3s]     GRAB left_hand#4 AT dut#2
//
// Wrapper nodes render as untimed header lines (`LOOP forever:`,
// `WHILE dut available (3 passes):`, `IF fixture present:`) and indent their
// body one level deeper. Indentation is two spaces per level; headers are
// padded so their keywords line up with the verbs of timed lines.
//
// The parser reads back the leaf lines only. Headers are skipped, so parsing
// rendered text recovers the rendered leaves in order, with start times
// rounded to a tenth of a second.

use crate::core_modules::classifier::Role;
use crate::core_modules::segmenter::{EventKind, MotionEvent, Participant};
use crate::core_modules::synthesizer::{ActionCodeNode, Predicate, Repeat};
use crate::error::AnalysisError;
use std::fmt::Write;

/// Width of the `[TTT.Ts] ` prefix.
const STAMP_WIDTH: usize = 9;

/// A leaf line read back from action-code text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParsedStep {
    pub start: f64,
    pub kind: EventKind,
    pub subject: Participant,
    pub object: Option<Participant>,
}

impl From<&MotionEvent> for ParsedStep {
    /// The step a rendered event would parse back to.
    fn from(event: &MotionEvent) -> Self {
        Self {
            start: round_tenth(event.start),
            kind: event.kind,
            subject: event.subject,
            object: event.object,
        }
    }
}

/// `seconds` as it reads back after rendering with one decimal.
pub fn round_tenth(seconds: f64) -> f64 {
    format!("{seconds:.1}").parse().unwrap_or(seconds)
}

/// Renders a tree as action-code text, one line per leaf or header.
pub fn render(root: &ActionCodeNode) -> String {
    let mut out = String::new();
    render_node(root, 0, &mut out);
    out
}

/// Renders events as a flat, unlooped listing.
pub fn render_events(events: &[MotionEvent]) -> String {
    let mut out = String::new();
    for event in events {
        render_leaf(event, 0, &mut out);
    }
    out
}

fn indent(depth: usize) -> String {
    "  ".repeat(depth)
}

fn render_header(header: &str, depth: usize, out: &mut String) {
    let _ = writeln!(out, "{:width$}{}{}", "", indent(depth), header, width = STAMP_WIDTH);
}

fn render_leaf(event: &MotionEvent, depth: usize, out: &mut String) {
    let _ = write!(
        out,
        "[{:05.1}s] {}{} {}",
        event.start,
        indent(depth),
        event.kind.verb(),
        event.subject
    );
    if let Some(object) = event.object {
        let _ = write!(out, " {} {}", event.kind.preposition(), object);
    }
    out.push('\n');
}

fn render_node(node: &ActionCodeNode, depth: usize, out: &mut String) {
    match node {
        ActionCodeNode::Sequence { children } => {
            for child in children {
                render_node(child, depth, out);
            }
        }
        ActionCodeNode::Leaf { event } => render_leaf(event, depth, out),
        ActionCodeNode::Loop { body, repeat } => {
            let header = match repeat {
                Repeat::Forever => "LOOP forever:".to_string(),
                Repeat::While { role, passes } => {
                    format!("WHILE {} available ({passes} passes):", role.slug())
                }
            };
            render_header(&header, depth, out);
            render_node(body, depth + 1, out);
        }
        ActionCodeNode::Conditional { predicate, then } => {
            let Predicate::RolePresent(role) = predicate;
            render_header(&format!("IF {} present:", role.slug()), depth, out);
            render_node(then, depth + 1, out);
        }
    }
}

fn parse_participant(token: &str, line: usize) -> Result<Participant, AnalysisError> {
    let (slug, id) = token.split_once('#').ok_or_else(|| AnalysisError::Parse {
        line,
        reason: format!("expected <role>#<id>, got {token:?}"),
    })?;
    let role = Role::from_slug(slug).ok_or_else(|| AnalysisError::Parse {
        line,
        reason: format!("unknown role {slug:?}"),
    })?;
    let id = id.parse().map_err(|_| AnalysisError::Parse {
        line,
        reason: format!("bad track id {id:?}"),
    })?;
    Ok(Participant { id, role })
}

fn parse_step(text: &str, line: usize) -> Result<ParsedStep, AnalysisError> {
    let error = |reason: String| AnalysisError::Parse { line, reason };

    let (stamp, rest) = text
        .strip_prefix('[')
        .and_then(|t| t.split_once("s]"))
        .ok_or_else(|| error("missing [TTT.Ts] timestamp".to_string()))?;
    let start: f64 = stamp
        .parse()
        .map_err(|_| error(format!("bad timestamp {stamp:?}")))?;

    let tokens: Vec<&str> = rest.split_whitespace().collect();
    let Some((verb, args)) = tokens.split_first() else {
        return Err(error("missing verb".to_string()));
    };
    let kind = EventKind::from_verb(verb).ok_or_else(|| error(format!("unknown verb {verb:?}")))?;
    let (subject, object) = match args {
        [subject] => (*subject, None),
        [subject, preposition, object] if *preposition == kind.preposition() => {
            (*subject, Some(*object))
        }
        [_, preposition, _] => {
            return Err(error(format!(
                "{verb} takes {}, got {preposition:?}",
                kind.preposition()
            )));
        }
        _ => return Err(error(format!("expected VERB subject [PREP object], got {rest:?}"))),
    };

    let subject = parse_participant(subject, line)?;
    let object = object.map(|token| parse_participant(token, line)).transpose()?;
    Ok(ParsedStep {
        start: round_tenth(start),
        kind,
        subject,
        object,
    })
}

fn is_header(text: &str) -> bool {
    text.ends_with(':') && ["LOOP ", "WHILE ", "IF "].iter().any(|k| text.starts_with(k))
}

/// Reads the leaf lines of action-code text back into steps, in order.
pub fn parse(text: &str) -> Result<Vec<ParsedStep>, AnalysisError> {
    let mut steps = Vec::new();
    for (number, raw) in text.lines().enumerate() {
        let trimmed = raw.trim();
        if trimmed.is_empty() || is_header(trimmed) {
            continue;
        }
        steps.push(parse_step(trimmed, number + 1)?);
    }
    Ok(steps)
}
