//! Domain model for the fact-checking pipeline.
//!
//! These types mirror the data model in the specification: topics flow in,
//! questions and evidence flow between the IR ensemble and the report
//! generator, and a report/score pair flows out.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A document to be fact-checked. `docid` is the opaque identifier callers
/// use to correlate output rows back to input rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub docid: String,
    pub text: String,
}

impl Topic {
    pub fn new(docid: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            docid: docid.into(),
            text: text.into(),
        }
    }
}

/// A question produced by the Report Evaluator for the IR ensemble to answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub question: String,
    #[serde(default)]
    pub context: String,
}

/// A single citation: a short human-readable summary plus the segment id it
/// was drawn from. `segment_id` must have come from a search result actually
/// retrieved during the producing agent's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    #[serde(default)]
    pub summary: String,
    pub segment_id: String,
}

/// One answered question, ready to be folded into a topic's context file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub question: String,
    #[serde(default)]
    pub doc_context: String,
    pub answer_text: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
    pub finished: bool,
}

/// One item of a generated report: a short claim/summary sentence grounded
/// in up to four citations.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReportItem {
    pub text: String,
    #[serde(default)]
    pub citations: Vec<String>,
}

/// The report body the generator emits: a short ordered list of grounded
/// statements.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Report {
    #[serde(default)]
    pub responses: Vec<ReportItem>,
}

impl Report {
    /// Total word count across every item's `text`, used to enforce the
    /// 250-word cap.
    pub fn word_count(&self) -> usize {
        self.responses
            .iter()
            .map(|item| item.text.split_whitespace().count())
            .sum()
    }

    /// `true` if every item has at most 4 citations and the sum of word
    /// counts is within budget.
    pub fn within_shape_limits(&self) -> bool {
        self.responses.iter().all(|item| item.citations.len() <= 4) && self.word_count() <= 250
    }
}

/// A parsed rubric score. `information_density` is optional per spec §4.8;
/// its presence changes the normalization denominator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct RubricScore {
    pub coverage: u8,
    pub accuracy: u8,
    pub citation_quality: u8,
    pub style: u8,
    pub prioritization: u8,
    pub completeness: u8,
    #[serde(default)]
    pub information_density: Option<u8>,
}

impl RubricScore {
    /// Weight table from spec §4.8: coverage x3, accuracy/citation_quality
    /// x2, the rest x1.
    pub fn total(&self) -> u32 {
        let mut total = 3 * self.coverage as u32
            + 2 * self.accuracy as u32
            + 2 * self.citation_quality as u32
            + self.style as u32
            + self.prioritization as u32
            + self.completeness as u32;
        if let Some(density) = self.information_density {
            total += density as u32;
        }
        total
    }

    /// Maximum achievable total given which fields were supplied: 55
    /// without `information_density`, 65 with it (spec §4.8 / §9 Open
    /// Question 2 — corrects the source's hardcoded constant).
    pub fn max_total(&self) -> u32 {
        if self.information_density.is_some() {
            65
        } else {
            55
        }
    }

    pub fn normalized(&self) -> f64 {
        self.total() as f64 / self.max_total() as f64
    }

    pub fn passes(&self) -> bool {
        self.normalized() >= 0.9
    }
}

/// Evaluation status for a single round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvalStatus {
    Incomplete,
    Pass,
    Fail,
}

/// Per-topic slot tracking the best report seen so far. Monotonically
/// non-decreasing score across rounds (spec §8 invariant 4).
#[derive(Debug, Clone, Default)]
pub struct BestReportSlot {
    pub report: Option<Report>,
    pub score: u32,
}

impl BestReportSlot {
    /// Replace the slot iff `score >= self.score`, matching the source's
    /// `>=` (ties prefer the later, presumably more-refined, report).
    pub fn consider(&mut self, report: Report, score: u32) {
        if self.report.is_none() || score >= self.score {
            self.report = Some(report);
            self.score = score;
        }
    }
}

/// IR agent lifecycle status (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QaStatus {
    NoAnswer,
    Partial,
    Finished,
}

impl QaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QaStatus::NoAnswer => "NO_ANSWER",
            QaStatus::Partial => "PARTIAL",
            QaStatus::Finished => "FINISHED",
        }
    }
}

/// One role/content turn mirrored in an IR agent's local history, kept
/// solely for accurate prompt-token estimation (spec §4.5 "Response
/// chaining").
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
}

/// The metadata tuple produced by the Searcher for each retrieved segment
/// (spec §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: Option<String>,
    pub url: Option<String>,
    pub headings: Option<String>,
    pub segment_id: String,
}

/// Final per-topic pipeline output row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicResult {
    pub id: String,
    pub report: Report,
    pub score: u32,
}

/// Allocate a fresh IR agent id.
pub fn new_agent_id() -> Uuid {
    Uuid::new_v4()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(text: &str, citations: usize) -> ReportItem {
        ReportItem {
            text: text.to_string(),
            citations: (0..citations).map(|i| format!("seg-{i}")).collect(),
        }
    }

    /// spec §8 invariant 5: a report within both the 4-citation-per-item cap
    /// and the 250-total-word cap passes shape validation.
    #[test]
    fn conforming_report_is_within_shape_limits() {
        let report = Report {
            responses: vec![
                item("The sky is blue due to Rayleigh scattering.", 2),
                item("Oceans appear blue for a related reason.", 4),
            ],
        };
        assert_eq!(report.word_count(), 15);
        assert!(report.within_shape_limits());
    }

    /// A single item with more than 4 citations fails shape validation even
    /// when the word count is trivially within budget.
    #[test]
    fn too_many_citations_on_one_item_fails_shape_limits() {
        let report = Report {
            responses: vec![item("short claim", 5)],
        };
        assert!(!report.within_shape_limits());
    }

    /// A report whose citations are all within budget but whose total word
    /// count exceeds 250 still fails shape validation.
    #[test]
    fn over_budget_word_count_fails_shape_limits() {
        let long_text = "word ".repeat(251);
        let report = Report {
            responses: vec![item(long_text.trim(), 1)],
        };
        assert_eq!(report.word_count(), 251);
        assert!(!report.within_shape_limits());
    }

    /// Exactly at both caps (4 citations, 250 words) still passes: the
    /// invariant is "at most", not "strictly less than".
    #[test]
    fn exactly_at_both_caps_passes() {
        let text = "word ".repeat(250);
        let report = Report {
            responses: vec![item(text.trim(), 4)],
        };
        assert_eq!(report.word_count(), 250);
        assert!(report.within_shape_limits());
    }
}
