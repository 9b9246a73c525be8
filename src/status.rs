use std::fmt;

use serde::{Deserialize, Serialize};

/// Reading status of a single book.
///
/// Statuses are ranked so that a merge can only move forward:
/// `NotStarted < InProgress < Finished < Discarded`. `Discarded` is not
/// "more progress" than `Finished`; it holds the top rank so that an
/// explicit discard is never overwritten by a progress signal once set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookStatus {
    #[default]
    #[serde(rename = "Not started")]
    NotStarted,
    #[serde(rename = "In progress")]
    InProgress,
    Finished,
    Discarded,
}

impl BookStatus {
    pub fn rank(self) -> u8 {
        match self {
            Self::NotStarted => 0,
            Self::InProgress => 1,
            Self::Finished => 2,
            Self::Discarded => 3,
        }
    }

    /// Human-facing label, matching the directory's status options.
    pub fn label(self) -> &'static str {
        match self {
            Self::NotStarted => "Not started",
            Self::InProgress => "In progress",
            Self::Finished => "Finished",
            Self::Discarded => "Discarded",
        }
    }

    /// Tolerant parse of an inbound raw status string. Case, whitespace,
    /// and `-`/`_` separators are ignored.
    pub fn parse(raw: &str) -> Option<Self> {
        let folded: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();

        match folded.as_str() {
            "notstarted" => Some(Self::NotStarted),
            "inprogress" => Some(Self::InProgress),
            "finished" => Some(Self::Finished),
            "discarded" => Some(Self::Discarded),
            _ => None,
        }
    }
}

impl fmt::Display for BookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// More-advanced-wins merge of a stored status and an incoming one.
///
/// An incoming status can only advance the stored status, never regress
/// it. `Discarded` outranks everything, so an explicit discard always
/// wins and is never undone by a later progress signal.
pub fn merge(current: Option<BookStatus>, incoming: Option<BookStatus>) -> BookStatus {
    match (current, incoming) {
        (None, None) => BookStatus::NotStarted,
        (None, Some(incoming)) => incoming,
        (Some(current), None) => current,
        (Some(current), Some(incoming)) => {
            if incoming.rank() > current.rank() {
                incoming
            } else {
                current
            }
        }
    }
}

/// Aggregate status of a series, derived from its member statuses.
///
/// Any `Discarded` member poisons the whole series: a discarded volume
/// blocks a clean "series finished" signal and must be surfaced. Partial
/// completion is reported as `InProgress` rather than `NotStarted`.
pub fn series_aggregate(members: &[BookStatus]) -> BookStatus {
    if members.is_empty() {
        return BookStatus::NotStarted;
    }
    if members.iter().all(|status| *status == BookStatus::Finished) {
        return BookStatus::Finished;
    }
    if members.iter().any(|status| *status == BookStatus::Discarded) {
        return BookStatus::Discarded;
    }
    if members
        .iter()
        .any(|status| matches!(status, BookStatus::InProgress | BookStatus::Finished))
    {
        return BookStatus::InProgress;
    }
    BookStatus::NotStarted
}
