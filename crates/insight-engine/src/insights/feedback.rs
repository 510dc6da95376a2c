//! Per-rule feedback history and the suppression windows it implies.
//!
//! Feedback arrives either as raw rows or as a map already reduced to the latest record per
//! rule. Both shapes converge on [`FeedbackIndex`], a last-write-wins map keyed by rule id.

use std::collections::BTreeMap;
use std::io::Read;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

use super::catalog::normalize_text;
use super::matcher::Match;

/// One helpful/not-helpful signal recorded against a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    #[serde(default, alias = "ruleOrInsightId", alias = "insightId", alias = "ruleId")]
    pub rule_id: String,
    pub helpful: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(alias = "createdAt")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackVerdict {
    Helpful,
    NotHelpful,
    NotRelevant,
}

impl FeedbackRecord {
    pub fn verdict(&self) -> FeedbackVerdict {
        if self.helpful {
            return FeedbackVerdict::Helpful;
        }
        match self.reason.as_deref().map(normalize_text).as_deref() {
            Some("not relevant" | "irrelevant" | "notrelevant") => FeedbackVerdict::NotRelevant,
            _ => FeedbackVerdict::NotHelpful,
        }
    }
}

/// Either shape a feedback store may hand back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeedbackBatch {
    Rows(Vec<FeedbackRecord>),
    Latest(BTreeMap<String, FeedbackRecord>),
}

impl FeedbackBatch {
    pub fn into_index(self) -> FeedbackIndex {
        match self {
            Self::Rows(rows) => FeedbackIndex::from_rows(rows),
            Self::Latest(latest) => FeedbackIndex::from_latest(latest),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FeedbackError {
    #[error("invalid feedback CSV data: {0}")]
    Csv(#[from] csv::Error),
    #[error("feedback row {line}: unrecognized timestamp '{value}'")]
    InvalidTimestamp { line: usize, value: String },
    #[error("feedback row {line}: unrecognized helpful flag '{value}'")]
    InvalidHelpful { line: usize, value: String },
}

/// Latest feedback record per rule id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedbackIndex {
    latest: BTreeMap<String, FeedbackRecord>,
}

impl FeedbackIndex {
    /// Reduces raw rows; on equal timestamps the later row wins.
    pub fn from_rows(rows: impl IntoIterator<Item = FeedbackRecord>) -> Self {
        let mut index = Self::default();
        for row in rows {
            if row.rule_id.trim().is_empty() {
                warn!("ignoring feedback row without a rule id");
                continue;
            }
            index.absorb(row);
        }
        index
    }

    /// Accepts a map already reduced by the store. The map key is authoritative for the id.
    pub fn from_latest(latest: impl IntoIterator<Item = (String, FeedbackRecord)>) -> Self {
        Self::from_rows(latest.into_iter().map(|(rule_id, mut record)| {
            record.rule_id = rule_id;
            record
        }))
    }

    /// Reads rows with `rule_id,helpful,reason,created_at` columns.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, FeedbackError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut rows = Vec::new();
        for (offset, row) in csv_reader.deserialize::<FeedbackCsvRow>().enumerate() {
            let row = row?;
            // header is line 1
            let line = offset + 2;
            let helpful = parse_flag(&row.helpful).ok_or_else(|| FeedbackError::InvalidHelpful {
                line,
                value: row.helpful.clone(),
            })?;
            let created_at =
                parse_timestamp(&row.created_at).ok_or_else(|| FeedbackError::InvalidTimestamp {
                    line,
                    value: row.created_at.clone(),
                })?;
            rows.push(FeedbackRecord {
                rule_id: row.rule_id,
                helpful,
                reason: row.reason,
                created_at,
            });
        }

        Ok(Self::from_rows(rows))
    }

    pub fn get(&self, rule_id: &str) -> Option<&FeedbackRecord> {
        self.latest.get(rule_id)
    }

    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }

    fn absorb(&mut self, record: FeedbackRecord) {
        match self.latest.get(&record.rule_id) {
            Some(existing) if existing.created_at > record.created_at => {}
            _ => {
                self.latest.insert(record.rule_id.clone(), record);
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct FeedbackCsvRow {
    #[serde(alias = "ruleOrInsightId", alias = "insightId", alias = "ruleId")]
    rule_id: String,
    helpful: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    reason: Option<String>,
    #[serde(alias = "createdAt")]
    created_at: String,
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|value| !value.trim().is_empty()))
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Parses RFC 3339 timestamps or bare `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(timestamp) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(timestamp.with_timezone(&Utc));
    }

    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Drops matches whose latest feedback is still inside its suppression window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedbackSuppressor {
    cooldown: Duration,
    not_relevant_window: Duration,
}

impl Default for FeedbackSuppressor {
    fn default() -> Self {
        Self::new(Duration::days(7), Duration::hours(24))
    }
}

impl FeedbackSuppressor {
    pub fn new(cooldown: Duration, not_relevant_window: Duration) -> Self {
        Self {
            cooldown,
            not_relevant_window,
        }
    }

    /// End of the window during which the record hides its rule, if any.
    pub fn suppressed_until(&self, record: &FeedbackRecord) -> Option<DateTime<Utc>> {
        let window = match record.verdict() {
            FeedbackVerdict::Helpful => return None,
            FeedbackVerdict::NotRelevant => self.not_relevant_window,
            FeedbackVerdict::NotHelpful => self.cooldown,
        };
        Some(
            record
                .created_at
                .checked_add_signed(window)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        )
    }

    pub fn is_suppressed(&self, record: &FeedbackRecord, now: DateTime<Utc>) -> bool {
        self.suppressed_until(record)
            .is_some_and(|until| now < until)
    }

    /// Order-preserving filter; applying it twice yields the same list.
    pub fn suppress(
        &self,
        matches: Vec<Match>,
        index: &FeedbackIndex,
        now: DateTime<Utc>,
    ) -> Vec<Match> {
        matches
            .into_iter()
            .filter(|candidate| match index.get(&candidate.rule_id) {
                Some(record) if self.is_suppressed(record, now) => {
                    debug!(
                        rule_id = %candidate.rule_id,
                        verdict = ?record.verdict(),
                        feedback_at = %record.created_at,
                        "suppressing match after negative feedback"
                    );
                    false
                }
                _ => true,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(raw: &str) -> DateTime<Utc> {
        parse_timestamp(raw).expect("valid timestamp")
    }

    fn record(rule_id: &str, helpful: bool, reason: Option<&str>, created_at: &str) -> FeedbackRecord {
        FeedbackRecord {
            rule_id: rule_id.to_string(),
            helpful,
            reason: reason.map(str::to_string),
            created_at: at(created_at),
        }
    }

    #[test]
    fn verdict_normalizes_reason_codes() {
        let cases = [
            (Some("not_relevant"), FeedbackVerdict::NotRelevant),
            (Some("Not Relevant"), FeedbackVerdict::NotRelevant),
            (Some("irrelevant"), FeedbackVerdict::NotRelevant),
            (Some("too_generic"), FeedbackVerdict::NotHelpful),
            (None, FeedbackVerdict::NotHelpful),
        ];
        for (reason, expected) in cases {
            assert_eq!(
                record("r", false, reason, "2025-03-01").verdict(),
                expected,
                "reason {reason:?}"
            );
        }
        assert_eq!(
            record("r", true, Some("not_relevant"), "2025-03-01").verdict(),
            FeedbackVerdict::Helpful
        );
    }

    #[test]
    fn latest_row_wins_and_ties_go_to_the_later_row() {
        let index = FeedbackIndex::from_rows(vec![
            record("sleep", false, None, "2025-03-02T08:00:00Z"),
            record("sleep", true, None, "2025-03-01T08:00:00Z"),
            record("mood", false, None, "2025-03-01T08:00:00Z"),
            record("mood", true, None, "2025-03-01T08:00:00Z"),
        ]);

        assert_eq!(index.len(), 2);
        assert!(!index.get("sleep").expect("sleep").helpful);
        assert!(index.get("mood").expect("mood").helpful);
    }

    #[test]
    fn latest_map_and_rows_converge() {
        let raw = r#"{
            "stress_mood": {"helpful": false, "reason": "not_relevant", "createdAt": "2025-03-01T10:00:00Z"}
        }"#;
        let batch: FeedbackBatch = serde_json::from_str(raw).expect("map parses");
        let from_map = batch.into_index();

        let rows = r#"[{"ruleOrInsightId": "stress_mood", "helpful": false,
                        "reason": "not_relevant", "createdAt": "2025-03-01T10:00:00Z"}]"#;
        let batch: FeedbackBatch = serde_json::from_str(rows).expect("rows parse");

        assert_eq!(from_map, batch.into_index());
        assert_eq!(
            from_map.get("stress_mood").map(FeedbackRecord::verdict),
            Some(FeedbackVerdict::NotRelevant)
        );
    }

    #[test]
    fn reads_csv_exports() {
        let csv = "\
rule_id,helpful,reason,created_at
sleep,false,,2025-03-01T08:00:00Z
stress_mood,0,not relevant,2025-03-02
";
        let index = FeedbackIndex::from_csv_reader(csv.as_bytes()).expect("csv parses");
        assert_eq!(index.len(), 2);
        assert_eq!(index.get("sleep").and_then(|r| r.reason.clone()), None);
        assert_eq!(
            index.get("stress_mood").map(|r| r.created_at),
            Some(at("2025-03-02T00:00:00Z"))
        );
    }

    #[test]
    fn reports_the_offending_csv_line() {
        let csv = "rule_id,helpful,reason,created_at\nsleep,false,,yesterday\n";
        match FeedbackIndex::from_csv_reader(csv.as_bytes()) {
            Err(FeedbackError::InvalidTimestamp { line, value }) => {
                assert_eq!(line, 2);
                assert_eq!(value, "yesterday");
            }
            other => panic!("expected timestamp error, got {other:?}"),
        }
    }

    #[test]
    fn windows_are_half_open() {
        let suppressor = FeedbackSuppressor::default();
        let not_helpful = record("sleep", false, None, "2025-03-01T12:00:00Z");
        let not_relevant = record("sleep", false, Some("not_relevant"), "2025-03-01T12:00:00Z");

        assert!(suppressor.is_suppressed(&not_helpful, at("2025-03-01T12:00:00Z")));
        assert!(suppressor.is_suppressed(&not_helpful, at("2025-03-08T11:59:59Z")));
        assert!(!suppressor.is_suppressed(&not_helpful, at("2025-03-08T12:00:00Z")));

        assert!(suppressor.is_suppressed(&not_relevant, at("2025-03-02T11:59:59Z")));
        assert!(!suppressor.is_suppressed(&not_relevant, at("2025-03-02T12:00:00Z")));
    }

    #[test]
    fn future_dated_feedback_counts_as_inside_the_window() {
        let suppressor = FeedbackSuppressor::default();
        let future = record("sleep", false, None, "2025-04-01T00:00:00Z");
        assert!(suppressor.is_suppressed(&future, at("2025-03-01T00:00:00Z")));
        assert!(!suppressor.is_suppressed(
            &record("sleep", true, None, "2025-04-01T00:00:00Z"),
            at("2025-03-01T00:00:00Z")
        ));
    }
}
