// THEORY:
// The synthesizer compresses a chronological event list into a small program:
// sequences, loops and guarded steps. It is the textual equivalent of noticing
// "the operator did the same four things eleven times".
//
// Algorithm steps:
// 1.  **Signatures**: each event is reduced to (kind, subject role, object role)
//     with timestamps and ids stripped, and interned as a symbol. Equal
//     signatures share a symbol.
// 2.  **Repeat search**: for every start position the Z-function of the suffix
//     gives, for every period, how many exact back-to-back copies of the unit
//     begin there. Each run is then extended forward with repetitions that
//     are the unit minus at most `max_repetition_edits` symbols (and never
//     less than a majority of it), because real recordings are not perfectly
//     periodic.
// 3.  **Selection**: the candidate covering the most events wins, then the
//     shortest unit, then the earliest start. It needs two repetitions and a
//     coverage at or above the threshold, otherwise no loop is formed.
// 4.  **Recursion**: prologue, body and epilogue are compressed again with the
//     nested threshold, which is how an inner per-item loop is found inside an
//     outer one.
// 5.  **Guards**: a unit position missing from some repetitions (but never all)
//     becomes a step guarded by `IF <role> present`.
//
// A sequence with no qualifying repetition is emitted flat and reported with a
// `FlatSequenceFallback` diagnostic. That is a normal outcome, not a failure.

use crate::config::AnalysisConfig;
use crate::core_modules::classifier::Role;
use crate::core_modules::segmenter::{EventKind, MotionEvent};
use crate::error::Diagnostic;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// An event with its timing and identities stripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventSignature {
    pub kind: EventKind,
    pub subject_role: Role,
    pub object_role: Option<Role>,
}

impl From<&MotionEvent> for EventSignature {
    fn from(event: &MotionEvent) -> Self {
        Self {
            kind: event.kind,
            subject_role: event.subject.role,
            object_role: event.object.map(|o| o.role),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "role", rename_all = "snake_case")]
pub enum Predicate {
    /// The guarded step only happens when an object of this role is present.
    RolePresent(Role),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Repeat {
    /// The loop runs until the end of the recording.
    Forever,
    /// The loop ran `passes` times while objects of `role` kept arriving.
    While { role: Role, passes: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum ActionCodeNode {
    Sequence { children: Vec<ActionCodeNode> },
    Loop { body: Box<ActionCodeNode>, repeat: Repeat },
    Conditional { predicate: Predicate, then: Box<ActionCodeNode> },
    Leaf { event: MotionEvent },
}

impl ActionCodeNode {
    /// Leaf events in rendering order.
    pub fn leaves(&self) -> Vec<&MotionEvent> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a MotionEvent>) {
        match self {
            ActionCodeNode::Sequence { children } => {
                children.iter().for_each(|c| c.collect_leaves(out))
            }
            ActionCodeNode::Loop { body, .. } => body.collect_leaves(out),
            ActionCodeNode::Conditional { then, .. } => then.collect_leaves(out),
            ActionCodeNode::Leaf { event } => out.push(event),
        }
    }

    pub fn loop_count(&self) -> usize {
        match self {
            ActionCodeNode::Sequence { children } => children.iter().map(|c| c.loop_count()).sum(),
            ActionCodeNode::Loop { body, .. } => 1 + body.loop_count(),
            ActionCodeNode::Conditional { then, .. } => then.loop_count(),
            ActionCodeNode::Leaf { .. } => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ActionCodeNode::Sequence { children } if children.is_empty())
    }
}

/// Output of one synthesis call.
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    /// Always a `Sequence`.
    pub root: ActionCodeNode,
    /// Fraction of events covered by the best top-level repetition found,
    /// whether or not it cleared the threshold.
    pub coverage: f64,
    /// Distinct event signatures seen.
    pub symbol_count: usize,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizerSettings {
    pub coverage_threshold: f64,
    pub nested_coverage_threshold: f64,
    pub max_edits: usize,
}

impl From<&AnalysisConfig> for SynthesizerSettings {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            coverage_threshold: config.loop_coverage_threshold,
            nested_coverage_threshold: config.nested_coverage_threshold,
            max_edits: config.max_repetition_edits,
        }
    }
}

/// A unit of work for the compressor: a symbol plus what to emit for it.
#[derive(Debug, Clone)]
struct Item {
    symbol: usize,
    event: MotionEvent,
    guard: Option<Role>,
}

/// One repetition of a unit: the slice it covers and which unit positions it
/// actually contains.
#[derive(Debug, Clone)]
struct Repetition {
    start: usize,
    present: Vec<Option<usize>>,
}

#[derive(Debug, Clone)]
struct Candidate {
    start: usize,
    period: usize,
    end: usize,
    repetitions: Vec<Repetition>,
}

impl Candidate {
    fn covered(&self) -> usize {
        self.end - self.start
    }
}

/// Z-function: `z[i]` is the length of the longest common prefix of `s` and
/// `s[i..]`, with `z[0] = s.len()`.
pub fn z_function(s: &[usize]) -> Vec<usize> {
    let n = s.len();
    let mut z = vec![0; n];
    if n == 0 {
        return z;
    }
    z[0] = n;
    let (mut left, mut right) = (0, 0);
    for i in 1..n {
        if i < right {
            z[i] = (right - i).min(z[i - left]);
        }
        while i + z[i] < n && s[z[i]] == s[i + z[i]] {
            z[i] += 1;
        }
        if i + z[i] > right {
            left = i;
            right = i + z[i];
        }
    }
    z
}

/// Leftmost embedding of `slice` into `unit` as a subsequence. Returns the
/// slice offset for every unit position, or `None` when it does not embed.
fn embed(slice: &[usize], unit: &[usize]) -> Option<Vec<Option<usize>>> {
    let mut present = vec![None; unit.len()];
    let mut position = 0;
    for (offset, symbol) in slice.iter().enumerate() {
        while position < unit.len() && unit[position] != *symbol {
            position += 1;
        }
        if position == unit.len() {
            return None;
        }
        present[position] = Some(offset);
        position += 1;
    }
    Some(present)
}

#[derive(Debug, Clone)]
pub struct ActionCodeSynthesizer {
    settings: SynthesizerSettings,
}

impl ActionCodeSynthesizer {
    pub fn new(settings: SynthesizerSettings) -> Self {
        Self { settings }
    }

    pub fn synthesize(&self, events: &[MotionEvent]) -> Synthesis {
        let mut symbols: HashMap<EventSignature, usize> = HashMap::new();
        let items: Vec<Item> = events
            .iter()
            .map(|event| {
                let next = symbols.len();
                let symbol = *symbols.entry(EventSignature::from(event)).or_insert(next);
                Item {
                    symbol,
                    event: event.clone(),
                    guard: None,
                }
            })
            .collect();

        let best = self.best_candidate(&items, 0.0);
        let coverage = match (&best, items.len()) {
            (Some(candidate), n) if n > 0 => candidate.covered() as f64 / n as f64,
            _ => 0.0,
        };

        let mut diagnostics = Vec::new();
        let children = self.compress(&items, self.settings.coverage_threshold, true);
        let root = ActionCodeNode::Sequence { children };
        if !items.is_empty() && root.loop_count() == 0 {
            debug!(
                coverage,
                threshold = self.settings.coverage_threshold,
                "no loop found, emitting flat sequence"
            );
            diagnostics.push(Diagnostic::FlatSequenceFallback {
                best_coverage: coverage,
                threshold: self.settings.coverage_threshold,
            });
        }

        Synthesis {
            root,
            coverage,
            symbol_count: symbols.len(),
            diagnostics,
        }
    }

    fn compress(&self, items: &[Item], threshold: f64, top_level: bool) -> Vec<ActionCodeNode> {
        let Some(candidate) = self.best_candidate(items, threshold) else {
            return items.iter().map(Self::leaf).collect();
        };

        let nested = self.settings.nested_coverage_threshold;
        let mut nodes = self.compress(&items[..candidate.start], nested, false);

        let body_items = self.loop_body(items, &candidate);
        let repeat = if top_level && candidate.end == items.len() {
            Repeat::Forever
        } else {
            Repeat::While {
                role: Self::loop_role(&body_items),
                passes: candidate.repetitions.len(),
            }
        };
        nodes.push(ActionCodeNode::Loop {
            body: Box::new(ActionCodeNode::Sequence {
                children: self.compress(&body_items, nested, false),
            }),
            repeat,
        });

        nodes.extend(self.compress(&items[candidate.end..], nested, false));
        nodes
    }

    fn leaf(item: &Item) -> ActionCodeNode {
        let leaf = ActionCodeNode::Leaf {
            event: item.event.clone(),
        };
        match item.guard {
            Some(role) => ActionCodeNode::Conditional {
                predicate: Predicate::RolePresent(role),
                then: Box::new(leaf),
            },
            None => leaf,
        }
    }

    /// One item per unit position, taken from the first repetition holding it.
    /// Positions missing from some repetitions are guarded.
    fn loop_body(&self, items: &[Item], candidate: &Candidate) -> Vec<Item> {
        let mut guarded_symbols: HashMap<(usize, bool), usize> = HashMap::new();
        (0..candidate.period)
            .filter_map(|position| {
                let mut holders = candidate
                    .repetitions
                    .iter()
                    .filter_map(|rep| rep.present[position].map(|offset| rep.start + offset));
                let first = holders.next()?;
                let seen = 1 + holders.count();
                let source = &items[first];
                let guard = if seen < candidate.repetitions.len() {
                    Some(source.guard.unwrap_or_else(|| {
                        source.event.object.map_or(source.event.subject.role, |o| o.role)
                    }))
                } else {
                    source.guard
                };
                // Guarded and unguarded copies of a step must not be treated
                // as the same symbol by the nested search.
                let key = (source.symbol, guard.is_some());
                let next = guarded_symbols.len();
                let symbol = *guarded_symbols.entry(key).or_insert(next);
                Some(Item {
                    symbol,
                    event: source.event.clone(),
                    guard,
                })
            })
            .collect()
    }

    fn loop_role(body: &[Item]) -> Role {
        body.iter()
            .find_map(|item| item.event.object.map(|o| o.role))
            .or_else(|| body.first().map(|item| item.event.subject.role))
            .unwrap_or(Role::Unknown)
    }

    fn best_candidate(&self, items: &[Item], threshold: f64) -> Option<Candidate> {
        let n = items.len();
        let symbols: Vec<usize> = items.iter().map(|item| item.symbol).collect();
        let mut best: Option<Candidate> = None;

        for start in 0..n {
            let suffix = &symbols[start..];
            let z = z_function(suffix);
            for period in 1..=suffix.len() / 2 {
                // The run one unit earlier holds this one plus a repetition,
                // so it covers strictly more with the same period.
                if start >= period
                    && symbols[start - period..start] == symbols[start..start + period]
                {
                    continue;
                }
                let candidate = self.extend_run(&symbols, start, period, &z);
                if candidate.repetitions.len() < 2 {
                    continue;
                }
                if (candidate.covered() as f64) < threshold * n as f64 {
                    continue;
                }
                let better = match &best {
                    None => true,
                    Some(current) => {
                        candidate.covered() > current.covered()
                            || (candidate.covered() == current.covered()
                                && candidate.period < current.period)
                    }
                };
                if better {
                    best = Some(candidate);
                }
            }
        }
        best
    }

    /// Exact repetitions from the Z-array, then forward extension with edited ones.
    fn extend_run(&self, symbols: &[usize], start: usize, period: usize, z: &[usize]) -> Candidate {
        let unit = &symbols[start..start + period];
        let all_present: Vec<Option<usize>> = (0..period).map(Some).collect();

        let mut repetitions = vec![Repetition {
            start,
            present: all_present.clone(),
        }];
        let mut count = 1;
        while (count + 1) * period <= z.len() && z[count * period] >= period {
            repetitions.push(Repetition {
                start: start + count * period,
                present: all_present.clone(),
            });
            count += 1;
        }

        let mut end = start + count * period;
        // An edited repetition keeps a strict majority of the unit.
        let shortest = period
            .saturating_sub(self.settings.max_edits)
            .max(period / 2 + 1);
        'extend: loop {
            let longest = period.min(symbols.len() - end);
            for length in (shortest..=longest).rev() {
                if let Some(present) = embed(&symbols[end..end + length], unit) {
                    repetitions.push(Repetition { start: end, present });
                    end += length;
                    continue 'extend;
                }
            }
            break;
        }

        Candidate {
            start,
            period,
            end,
            repetitions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::segmenter::Participant;

    fn settings(threshold: f64) -> SynthesizerSettings {
        SynthesizerSettings {
            coverage_threshold: threshold,
            nested_coverage_threshold: 0.5,
            max_edits: 1,
        }
    }

    /// One event per letter, one second apart. Letters map to distinct kinds.
    fn events(letters: &str) -> Vec<MotionEvent> {
        let hand = Participant { id: 1, role: Role::LeftHand };
        letters
            .chars()
            .enumerate()
            .map(|(i, letter)| {
                let kind = match letter {
                    'A' => EventKind::Grab,
                    'B' => EventKind::Move,
                    'C' => EventKind::Place,
                    'D' => EventKind::Press,
                    _ => EventKind::Unknown,
                };
                MotionEvent::new(i as f64, i as f64 + 0.5, kind, hand, None)
            })
            .collect()
    }

    fn kinds(nodes: &[ActionCodeNode]) -> Vec<EventKind> {
        nodes
            .iter()
            .map(|node| match node {
                ActionCodeNode::Leaf { event } => event.kind,
                other => panic!("expected leaf, got {other:?}"),
            })
            .collect()
    }

    fn children(node: &ActionCodeNode) -> &[ActionCodeNode] {
        match node {
            ActionCodeNode::Sequence { children } => children,
            other => panic!("expected sequence, got {other:?}"),
        }
    }

    #[test]
    fn z_function_basics() {
        assert_eq!(z_function(&[0, 1, 0, 1, 0]), vec![5, 0, 3, 0, 1]);
        assert!(z_function(&[]).is_empty());
    }

    #[test]
    fn embedding_allows_deletions_only() {
        assert!(embed(&[0, 2], &[0, 1, 2]).is_some());
        assert!(embed(&[2, 0], &[0, 1, 2]).is_none());
        assert_eq!(embed(&[0, 2], &[0, 1, 2]).unwrap(), vec![Some(0), None, Some(1)]);
    }

    #[test]
    fn perfect_repetition_is_a_forever_loop() {
        let synthesis = ActionCodeSynthesizer::new(settings(0.9)).synthesize(&events("ABCABCABC"));
        let top = children(&synthesis.root);
        assert_eq!(top.len(), 1);
        let ActionCodeNode::Loop { body, repeat } = &top[0] else {
            panic!("expected loop");
        };
        assert_eq!(*repeat, Repeat::Forever);
        assert_eq!(kinds(children(body)), vec![EventKind::Grab, EventKind::Move, EventKind::Place]);
        assert!(synthesis.diagnostics.is_empty());
        assert_eq!(synthesis.coverage, 1.0);
    }

    #[test]
    fn trailing_event_becomes_epilogue() {
        let synthesis = ActionCodeSynthesizer::new(settings(0.85)).synthesize(&events("ABCABCD"));
        let top = children(&synthesis.root);
        assert_eq!(top.len(), 2);
        assert!(matches!(
            top[0],
            ActionCodeNode::Loop { repeat: Repeat::While { passes: 2, .. }, .. }
        ));
        assert_eq!(kinds(&top[1..]), vec![EventKind::Press]);
    }

    #[test]
    fn coverage_below_threshold_falls_back_to_flat() {
        let synthesis = ActionCodeSynthesizer::new(settings(0.87)).synthesize(&events("ABCABCD"));
        assert_eq!(kinds(children(&synthesis.root)).len(), 7);
        assert_eq!(synthesis.root.loop_count(), 0);
        assert!(matches!(
            synthesis.diagnostics.as_slice(),
            [Diagnostic::FlatSequenceFallback { threshold, .. }] if *threshold == 0.87
        ));
        assert!((synthesis.coverage - 6.0 / 7.0).abs() < 1e-9);
    }

    #[test]
    fn missing_step_becomes_conditional() {
        // The third pass skips B.
        let synthesis = ActionCodeSynthesizer::new(settings(0.8)).synthesize(&events("ABCABCAC"));
        let top = children(&synthesis.root);
        let ActionCodeNode::Loop { body, .. } = &top[0] else {
            panic!("expected loop");
        };
        let body = children(body);
        assert_eq!(body.len(), 3);
        assert!(matches!(
            &body[1],
            ActionCodeNode::Conditional { predicate: Predicate::RolePresent(Role::LeftHand), .. }
        ));
    }

    #[test]
    fn inner_loop_is_found_inside_outer_loop() {
        let synthesis = ActionCodeSynthesizer::new(settings(0.8)).synthesize(&events("ABBBCABBBC"));
        assert_eq!(synthesis.root.loop_count(), 2);
        let top = children(&synthesis.root);
        let ActionCodeNode::Loop { body, repeat } = &top[0] else {
            panic!("expected outer loop");
        };
        assert_eq!(*repeat, Repeat::Forever);
        assert!(matches!(
            children(body)[1],
            ActionCodeNode::Loop { repeat: Repeat::While { passes: 3, .. }, .. }
        ));
    }

    #[test]
    fn empty_input_is_an_empty_sequence() {
        let synthesis = ActionCodeSynthesizer::new(settings(0.8)).synthesize(&[]);
        assert!(synthesis.root.is_empty());
        assert!(synthesis.diagnostics.is_empty());
    }

    #[test]
    fn long_periodic_recording_is_one_loop() {
        let recording = events(&"ABCDX".repeat(60));
        let synthesis = ActionCodeSynthesizer::new(settings(0.9)).synthesize(&recording);
        let top = children(&synthesis.root);
        assert_eq!(top.len(), 1);
        let ActionCodeNode::Loop { body, repeat } = &top[0] else {
            panic!("expected loop");
        };
        assert_eq!(*repeat, Repeat::Forever);
        assert_eq!(children(body).len(), 5);
        assert_eq!(synthesis.coverage, 1.0);
    }

    #[test]
    fn later_start_inside_a_run_never_wins() {
        // Starting at 0 covers all nine events; starting at 3 would cover six.
        let synthesis = ActionCodeSynthesizer::new(settings(0.6)).synthesize(&events("ABCABCABC"));
        let top = children(&synthesis.root);
        assert_eq!(top.len(), 1);
        assert_eq!(synthesis.root.leaves()[0].start, 0.0);
    }

    #[test]
    fn leaves_come_from_first_repetition() {
        let synthesis = ActionCodeSynthesizer::new(settings(0.9)).synthesize(&events("ABAB"));
        let starts: Vec<f64> = synthesis.root.leaves().iter().map(|e| e.start).collect();
        assert_eq!(starts, vec![0.0, 1.0]);
    }
}
