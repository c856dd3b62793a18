//! Progress interpretation for the translation tool's output stream.
//!
//! The tool prints a human-oriented log. In debug mode some lines carry a
//! structured dump with an `overall_progress` percentage; otherwise only
//! recognisable stage messages are available. Each line is tried against
//! the structured parser first, then against a fixed table of stage
//! milestones. Neither parser ever lowers progress.

use std::sync::LazyLock;

use regex::Regex;

// Pre-compiled regexes for the structured debug dump
static RE_OVERALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)["']?overall[_ ]progress["']?\s*[:=]\s*["']?(-?\d+(?:\.\d+)?)"#).unwrap()
});
static RE_STAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)["']?stage["']?\s*[:=]\s*["']([^"']+)["']"#).unwrap()
});

/// A recognised stage message bound to a fixed milestone.
struct StageMilestone {
    name: &'static str,
    pattern: &'static str,
    value: u8,
}

/// Ordered by milestone value. Patterns are disjoint so at most one row
/// describes a given line.
const STAGE_MILESTONES: &[StageMilestone] = &[
    StageMilestone {
        name: "begin translation",
        pattern: r"(?i)\b(begin|start)(ning|ing)?\s+(to\s+)?translat",
        value: 5,
    },
    StageMilestone {
        name: "model loading",
        pattern: r"(?i)\b(load(ing)?\s+(the\s+)?(\w+\s+)?model|model\s+load)",
        value: 8,
    },
    StageMilestone {
        name: "layout parsing",
        pattern: r"(?i)\b(pars(e|ing)\s+(the\s+)?(page\s+)?layout|layout\s+(pars|analys|detect)|detect(ing)?\s+layout)",
        value: 25,
    },
    StageMilestone {
        name: "term extraction",
        pattern: r"(?i)\b(term\s+extraction\s+(start|begin)|(start|begin)(ning|ing)?\s+(automatic\s+)?term\s+extraction|(extract|collect)(ing)?\s+terms?\b)",
        value: 35,
    },
    StageMilestone {
        name: "terms extracted",
        pattern: r"(?i)\b(term\s+extraction\s+(done|finished|complete)|terms?\s+extracted)",
        value: 40,
    },
    StageMilestone {
        name: "paragraph translation",
        pattern: r"(?i)\b(translat(e|ing)\s+(the\s+)?paragraphs?|paragraph\s+translation)",
        value: 60,
    },
    StageMilestone {
        name: "translation completed",
        pattern: r"(?i)\btranslation\s+(completed?|finished|done)",
        value: 85,
    },
    StageMilestone {
        name: "typesetting",
        pattern: r"(?i)\btypesett?(ing)?\b",
        value: 90,
    },
    StageMilestone {
        name: "saving output",
        pattern: r"(?i)\b(sav(e|ing)\s+(the\s+)?(output|pdf|results?|files?)|writ(e|ing)\s+(the\s+)?output)",
        value: 95,
    },
    StageMilestone {
        name: "finished",
        pattern: r"(?i)\b(finished|all\s+done)\b",
        value: 98,
    },
];

static STAGE_TABLE: LazyLock<Vec<(Regex, &'static StageMilestone)>> = LazyLock::new(|| {
    STAGE_MILESTONES
        .iter()
        .map(|m| (Regex::new(m.pattern).unwrap(), m))
        .collect()
});

/// Which parser produced an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressSource {
    /// Parsed from the structured `overall_progress` field.
    Structured { stage: Option<String> },
    /// Matched a stage milestone.
    Stage { milestone: &'static str },
}

/// A progress value that moves a job forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub value: u8,
    pub source: ProgressSource,
}

/// Result of the structured parser on one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredProgress {
    pub percent: u8,
    pub stage: Option<String>,
}

/// Extracts the `overall_progress` percentage from a structured dump.
///
/// Values outside `[0, 100]` or that fail to parse are ignored.
pub fn parse_structured_progress(line: &str) -> Option<StructuredProgress> {
    let caps = RE_OVERALL.captures(line)?;
    let raw: f64 = caps.get(1)?.as_str().parse().ok()?;
    if !raw.is_finite() || !(0.0..=100.0).contains(&raw) {
        return None;
    }

    let stage = RE_STAGE
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty());

    Some(StructuredProgress {
        percent: raw.round() as u8,
        stage,
    })
}

/// Returns the first stage milestone the line mentions, as `(name, value)`.
pub fn match_stage(line: &str) -> Option<(&'static str, u8)> {
    STAGE_TABLE
        .iter()
        .find(|(re, _)| re.is_match(line))
        .map(|(_, m)| (m.name, m.value))
}

/// Interprets one output line against the job's current progress.
///
/// Returns an update only when it is strictly greater than `current`.
pub fn interpret_line(line: &str, current: u8) -> Option<ProgressUpdate> {
    if let Some(parsed) = parse_structured_progress(line) {
        if let Some(stage) = &parsed.stage {
            log::debug!("Structured progress {}% at stage '{}'", parsed.percent, stage);
        }
        if parsed.percent > current {
            return Some(ProgressUpdate {
                value: parsed.percent,
                source: ProgressSource::Structured {
                    stage: parsed.stage,
                },
            });
        }
    }

    match match_stage(line) {
        Some((milestone, value)) if value > current => Some(ProgressUpdate {
            value,
            source: ProgressSource::Stage { milestone },
        }),
        _ => None,
    }
}
