use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Log message severity
pub const SEVERITY_LOG: f64 = 0.0;
/// False positive severity
pub const SEVERITY_FP: f64 = -1.0;
/// Debug message severity
pub const SEVERITY_DEBUG: f64 = -2.0;
/// Error message severity
pub const SEVERITY_ERROR: f64 = -3.0;
/// Undefined severity, used for open ends of ranges
pub const SEVERITY_UNDEFINED: f64 = -98.0;
/// Missing or invalid severity
pub const SEVERITY_MISSING: f64 = -99.0;
/// Maximum possible severity
pub const SEVERITY_MAX: f64 = 10.0;

/// A threat level, as shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString)]
pub enum Label {
    High,
    Medium,
    Low,
    Log,
    #[strum(serialize = "False Positive")]
    FalsePositive,
    Debug,
    Error,
    /// No usable severity
    None,
}

impl Label {
    pub fn as_str(&self) -> &str {
        self.as_ref()
    }

    /// Rank for ordering threat labels, most severe first.
    pub fn rank(&self) -> u8 {
        match self {
            Label::High => 0,
            Label::Medium => 1,
            Label::Low => 2,
            Label::Log => 3,
            Label::FalsePositive => 4,
            Label::Debug => 5,
            Label::Error => 6,
            Label::None => 7,
        }
    }

    /// Case-insensitive lookup of a label name.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        [
            Label::High,
            Label::Medium,
            Label::Low,
            Label::Log,
            Label::FalsePositive,
            Label::Debug,
            Label::Error,
            Label::None,
        ]
        .into_iter()
        .find(|label| label.as_str().eq_ignore_ascii_case(name))
    }
}

/// Threshold profile used to split the 0-10 scale into bands.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(ascii_case_insensitive)]
#[serde(rename_all = "kebab-case")]
pub enum SeverityClass {
    #[default]
    #[strum(serialize = "nist")]
    Nist,
    #[strum(serialize = "bsi")]
    Bsi,
    #[strum(serialize = "classic")]
    Classic,
    #[strum(serialize = "pci-dss")]
    PciDss,
}

/// Lower bounds of the High, Medium and Low bands. A band a class does not
/// have is `None`.
struct Thresholds {
    high: f64,
    medium: Option<f64>,
    low: Option<f64>,
}

impl SeverityClass {
    fn thresholds(self) -> Thresholds {
        match self {
            SeverityClass::Nist => Thresholds {
                high: 7.0,
                medium: Some(4.0),
                low: Some(0.1),
            },
            SeverityClass::Bsi => Thresholds {
                high: 6.0,
                medium: Some(2.0),
                low: Some(0.1),
            },
            SeverityClass::Classic => Thresholds {
                high: 5.1,
                medium: Some(2.1),
                low: Some(0.1),
            },
            SeverityClass::PciDss => Thresholds {
                high: 4.0,
                medium: None,
                low: None,
            },
        }
    }

    /// Inclusive `(min, max)` bounds of the scores that classify as `level`.
    ///
    /// Sentinel levels are single points. Bands this class does not define
    /// return `None`. Scores are compared on a 0.1 grid, so the upper bound
    /// of a band is 0.1 below the lower bound of the next one.
    pub fn level_bounds(self, level: Label) -> Option<(f64, f64)> {
        let t = self.thresholds();
        let below = |bound: f64| ((bound - 0.1) * 10.0).round() / 10.0;

        match level {
            Label::Log => Some((SEVERITY_LOG, SEVERITY_LOG)),
            Label::FalsePositive => Some((SEVERITY_FP, SEVERITY_FP)),
            Label::Debug => Some((SEVERITY_DEBUG, SEVERITY_DEBUG)),
            Label::Error => Some((SEVERITY_ERROR, SEVERITY_ERROR)),
            Label::High => Some((t.high, SEVERITY_MAX)),
            Label::Medium => t.medium.map(|min| (min, below(t.high))),
            Label::Low => t.low.map(|min| (min, below(t.medium.unwrap_or(t.high)))),
            Label::None => None,
        }
    }
}

fn sentinel_label(score: f64) -> Option<Label> {
    if score == SEVERITY_LOG {
        Some(Label::Log)
    } else if score == SEVERITY_FP {
        Some(Label::FalsePositive)
    } else if score == SEVERITY_DEBUG {
        Some(Label::Debug)
    } else if score == SEVERITY_ERROR {
        Some(Label::Error)
    } else if score == SEVERITY_MISSING || score == SEVERITY_UNDEFINED || score.is_nan() {
        Some(Label::None)
    } else {
        None
    }
}

/// Map a severity score to its threat level under `class`.
pub fn classify(score: f64, class: SeverityClass) -> Label {
    if let Some(label) = sentinel_label(score) {
        return label;
    }

    let t = class.thresholds();
    if score >= t.high {
        Label::High
    } else if t.medium.is_some_and(|min| score >= min) {
        Label::Medium
    } else if t.low.is_some_and(|min| score >= min) {
        Label::Low
    } else {
        Label::Log
    }
}

/// Label text for SQL. In legacy mode (1) the High band is called "Alarm".
pub fn severity_to_level(score: f64, class: SeverityClass, mode: i64) -> &'static str {
    match classify(score, class) {
        Label::High if mode == 1 => "Alarm",
        Label::High => "High",
        Label::Medium => "Medium",
        Label::Low => "Low",
        Label::Log => "Log",
        Label::FalsePositive => "False Positive",
        Label::Debug => "Debug",
        Label::Error => "Error",
        Label::None => "None",
    }
}

/// Message type of a result with the given score.
pub fn severity_to_type(score: f64) -> &'static str {
    if score == SEVERITY_LOG {
        "Log Message"
    } else if score == SEVERITY_FP {
        "False Positive"
    } else if score == SEVERITY_DEBUG {
        "Debug Message"
    } else if score == SEVERITY_ERROR {
        "Error Message"
    } else if score > 0.0 && score <= SEVERITY_MAX {
        "Alarm"
    } else {
        "Internal Error"
    }
}

/// Whether an override written for `override_severity` applies to `score`.
///
/// An override without a severity applies to everything; otherwise both
/// values must classify into the same band.
pub fn matches_override(score: f64, override_severity: Option<f64>, class: SeverityClass) -> bool {
    match override_severity {
        None => true,
        Some(ov) => classify(score, class) == classify(ov, class),
    }
}

/// Whether `score` classifies as the level called `level_name`.
pub fn in_level(score: f64, level_name: &str, class: SeverityClass) -> bool {
    Label::from_name(level_name).is_some_and(|level| classify(score, class) == level)
}
