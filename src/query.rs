use crate::models::{ClientRecord, StatusCounts, StatusFilter};
use chrono::{DateTime, Utc};

pub fn count_by_status(records: &[ClientRecord]) -> StatusCounts {
    let mut counts = StatusCounts::zeroed();
    for record in records {
        counts.increment(record.status);
    }
    counts
}

/// Accounts flagged for follow-up, excluding cancelled ones, in snapshot order.
pub fn needing_follow_up(records: &[ClientRecord]) -> Vec<&ClientRecord> {
    records.iter().filter(|record| record.needs_attention()).collect()
}

pub fn updated_since_shift_start(records: &[ClientRecord], shift_start: DateTime<Utc>) -> usize {
    records
        .iter()
        .filter(|record| record.last_updated >= shift_start)
        .count()
}

pub fn apply_filters<'a>(
    records: &'a [ClientRecord],
    status_filter: &StatusFilter,
    search_text: &str,
) -> Vec<&'a ClientRecord> {
    let needle = search_text.to_lowercase();
    records
        .iter()
        .filter(|record| match status_filter {
            StatusFilter::All => true,
            StatusFilter::NeedsFollowUp => record.needs_attention(),
            StatusFilter::Status(status) => record.status == *status,
        })
        .filter(|record| needle.is_empty() || matches_search(record, &needle))
        .collect()
}

fn matches_search(record: &ClientRecord, needle: &str) -> bool {
    record.client_name.to_lowercase().contains(needle)
        || record.account_id.to_lowercase().contains(needle)
        || record.notes.to_lowercase().contains(needle)
}
