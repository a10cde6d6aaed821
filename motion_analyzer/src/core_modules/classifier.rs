// THEORY:
// The classifier gives every detection a semantic role from geometric, color
// and motion evidence. It is a decision table, not a model: an ordered list of
// rows, each pairing a role with a predicate that either rejects the detection
// or returns partial scores for how well area, position and color fit the
// row's expected ranges. Confidence is the product of those partial scores.
//
// Precedence: the lowest `rank` with any matching row wins. Rows sharing a rank
// compete on confidence, and remaining ties go to table order. Because the
// table is plain data, rows can be tested one by one, reordered, or replaced
// with `Classifier::with_rules`.
//
// Motion evidence (how far an object drifted over the last few frames) cannot
// come from a single detection. The session looks it up in the tracker's
// read-only history around the detection's centroid and passes it in through
// `FrameContext`. Rows that need motion never match without it.

use crate::config::AnalysisConfig;
use crate::core_modules::detection::Detection;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic role of a tracked object on an assembly bench.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    DeviceUnderTest,
    LeftHand,
    RightHand,
    Conveyor,
    Fixture,
    Unknown,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::DeviceUnderTest,
        Role::LeftHand,
        Role::RightHand,
        Role::Conveyor,
        Role::Fixture,
        Role::Unknown,
    ];

    /// Identifier used in action-code text.
    pub fn slug(&self) -> &'static str {
        match self {
            Role::DeviceUnderTest => "dut",
            Role::LeftHand => "left_hand",
            Role::RightHand => "right_hand",
            Role::Conveyor => "conveyor",
            Role::Fixture => "fixture",
            Role::Unknown => "unknown",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Role> {
        Role::ALL.into_iter().find(|role| role.slug() == slug)
    }

    pub fn is_hand(&self) -> bool {
        matches!(self, Role::LeftHand | Role::RightHand)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Role::DeviceUnderTest => "device under test",
            Role::LeftHand => "left hand",
            Role::RightHand => "right hand",
            Role::Conveyor => "conveyor",
            Role::Fixture => "fixture",
            Role::Unknown => "unknown object",
        };
        f.write_str(label)
    }
}

/// Recent motion of whatever track sits under a detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionEvidence {
    /// Absolute net horizontal travel over the window, pixels.
    pub horizontal_displacement: f64,
    /// Largest single-observation step over the window, pixels.
    pub max_step: f64,
    /// Number of observations the window actually covered.
    pub samples: usize,
}

/// Frame-level facts a row may consult.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameContext {
    pub width: u32,
    pub height: u32,
    pub motion: Option<MotionEvidence>,
}

/// How well one detection fits a row, each component in 0..=1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartialScores {
    pub area: f64,
    pub position: f64,
    pub color: f64,
}

impl PartialScores {
    pub fn confidence(&self) -> f64 {
        self.area * self.position * self.color
    }
}

/// Thresholds the rows read. Copied out of [`AnalysisConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierSettings {
    pub hand_area: (f64, f64),
    pub hand_color_threshold: f64,
    pub conveyor_min_area: f64,
    pub conveyor_y_ratio: f64,
    pub conveyor_motion_floor: f64,
    pub fixture_min_area: f64,
    pub fixture_motion_floor: f64,
    pub dut_area: (f64, f64),
    pub motion_window: usize,
    pub unknown_confidence_scale: f64,
}

impl From<&AnalysisConfig> for ClassifierSettings {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            hand_area: (config.hand_area_min as f64, config.hand_area_max as f64),
            hand_color_threshold: config.hand_color_threshold,
            conveyor_min_area: config.conveyor_min_area as f64,
            conveyor_y_ratio: config.conveyor_y_ratio,
            conveyor_motion_floor: config.conveyor_motion_floor,
            fixture_min_area: config.fixture_min_area as f64,
            fixture_motion_floor: config.fixture_motion_floor,
            dut_area: (config.dut_area_min as f64, config.dut_area_max as f64),
            motion_window: config.motion_window,
            unknown_confidence_scale: config.unknown_confidence_scale,
        }
    }
}

pub type RulePredicate =
    fn(&Detection, &FrameContext, &ClassifierSettings) -> Option<PartialScores>;

/// One row of the decision table.
#[derive(Clone)]
pub struct ClassificationRule {
    pub name: &'static str,
    pub rank: u8,
    pub role: Role,
    pub predicate: RulePredicate,
}

impl fmt::Debug for ClassificationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassificationRule")
            .field("name", &self.name)
            .field("rank", &self.rank)
            .field("role", &self.role)
            .finish()
    }
}

/// Scores `value` inside `[low, high]`: 1.0 at the middle, 0.5 at either edge.
pub fn band_score(value: f64, low: f64, high: f64) -> Option<f64> {
    if !(low..=high).contains(&value) {
        return None;
    }
    let half = (high - low) / 2.0;
    if half <= 0.0 {
        return Some(1.0);
    }
    let middle = low + half;
    Some(1.0 - 0.5 * (value - middle).abs() / half)
}

/// Scores `value` against a lower bound: 0.5 at the floor, 1.0 from twice the floor.
pub fn floor_score(value: f64, floor: f64) -> Option<f64> {
    if value < floor {
        return None;
    }
    if floor <= 0.0 {
        return Some(1.0);
    }
    Some((0.5 + 0.5 * (value / floor - 1.0)).min(1.0))
}

fn hand_scores(
    detection: &Detection,
    context: &FrameContext,
    settings: &ClassifierSettings,
    x_band: (f64, f64),
) -> Option<PartialScores> {
    let area = band_score(detection.area as f64, settings.hand_area.0, settings.hand_area.1)?;
    if detection.color.skin_ratio < settings.hand_color_threshold {
        return None;
    }
    let width = context.width as f64;
    let position = band_score(detection.centroid.0, x_band.0 * width, x_band.1 * width)?;
    Some(PartialScores {
        area,
        position,
        color: detection.color.skin_ratio,
    })
}

fn left_hand(
    detection: &Detection,
    context: &FrameContext,
    settings: &ClassifierSettings,
) -> Option<PartialScores> {
    hand_scores(detection, context, settings, (0.0, 1.0 / 3.0))
}

fn right_hand(
    detection: &Detection,
    context: &FrameContext,
    settings: &ClassifierSettings,
) -> Option<PartialScores> {
    hand_scores(detection, context, settings, (2.0 / 3.0, 1.0))
}

fn conveyor(
    detection: &Detection,
    context: &FrameContext,
    settings: &ClassifierSettings,
) -> Option<PartialScores> {
    let area = floor_score(detection.area as f64, settings.conveyor_min_area)?;
    let height = context.height as f64;
    let position = band_score(detection.centroid.1, settings.conveyor_y_ratio * height, height)?;
    let motion = context.motion?;
    if motion.horizontal_displacement < settings.conveyor_motion_floor {
        return None;
    }
    Some(PartialScores {
        area,
        position,
        color: 1.0,
    })
}

fn fixture(
    detection: &Detection,
    context: &FrameContext,
    settings: &ClassifierSettings,
) -> Option<PartialScores> {
    let area = floor_score(detection.area as f64, settings.fixture_min_area)?;
    let motion = context.motion?;
    if motion.samples < settings.motion_window || motion.max_step > settings.fixture_motion_floor {
        return None;
    }
    Some(PartialScores {
        area,
        position: 1.0,
        color: 1.0,
    })
}

fn device_under_test(
    detection: &Detection,
    _context: &FrameContext,
    settings: &ClassifierSettings,
) -> Option<PartialScores> {
    let area = band_score(detection.area as f64, settings.dut_area.0, settings.dut_area.1)?;
    Some(PartialScores {
        area,
        position: 1.0,
        color: 1.0,
    })
}

fn unknown(
    detection: &Detection,
    _context: &FrameContext,
    settings: &ClassifierSettings,
) -> Option<PartialScores> {
    Some(PartialScores {
        area: 1.0,
        position: 1.0,
        color: (detection.confidence * settings.unknown_confidence_scale).clamp(0.0, 1.0),
    })
}

/// The reference table, in precedence order.
pub fn default_rules() -> Vec<ClassificationRule> {
    vec![
        ClassificationRule {
            name: "left hand",
            rank: 1,
            role: Role::LeftHand,
            predicate: left_hand,
        },
        ClassificationRule {
            name: "right hand",
            rank: 1,
            role: Role::RightHand,
            predicate: right_hand,
        },
        ClassificationRule {
            name: "conveyor",
            rank: 3,
            role: Role::Conveyor,
            predicate: conveyor,
        },
        ClassificationRule {
            name: "fixture",
            rank: 4,
            role: Role::Fixture,
            predicate: fixture,
        },
        ClassificationRule {
            name: "device under test",
            rank: 5,
            role: Role::DeviceUnderTest,
            predicate: device_under_test,
        },
        ClassificationRule {
            name: "fallback",
            rank: u8::MAX,
            role: Role::Unknown,
            predicate: unknown,
        },
    ]
}

#[derive(Debug, Clone)]
pub struct Classifier {
    settings: ClassifierSettings,
    rules: Vec<ClassificationRule>,
}

impl Classifier {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self::with_rules(config, default_rules())
    }

    pub fn with_rules(config: &AnalysisConfig, rules: Vec<ClassificationRule>) -> Self {
        Self {
            settings: ClassifierSettings::from(config),
            rules,
        }
    }

    /// Labels one detection. Falls back to `Unknown` with zero confidence when
    /// no row matches.
    pub fn classify(&self, detection: &Detection, context: &FrameContext) -> (Role, f64) {
        let mut best: Option<(u8, f64, Role)> = None;
        for rule in &self.rules {
            let Some(scores) = (rule.predicate)(detection, context, &self.settings) else {
                continue;
            };
            let confidence = scores.confidence();
            let better = match best {
                None => true,
                Some((rank, best_confidence, _)) => {
                    rule.rank < rank || (rule.rank == rank && confidence > best_confidence)
                }
            };
            if better {
                best = Some((rule.rank, confidence, rule.role));
            }
        }
        best.map(|(_, confidence, role)| (role, confidence))
            .unwrap_or((Role::Unknown, 0.0))
    }
}
