use crate::models::{AppSettings, ClientRecord, DeskSummary, StatusFilter};
use crate::query::{apply_filters, count_by_status, needing_follow_up, updated_since_shift_start};
use crate::shift::{current_shift_start, describe_freshness};
use chrono::{DateTime, Local, TimeZone, Utc};

/// Every stored record as loaded at one instant. Never written back.
#[derive(Debug, Clone)]
pub struct Snapshot {
    clients: Vec<ClientRecord>,
    taken_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(clients: Vec<ClientRecord>, taken_at: DateTime<Utc>) -> Self {
        Self { clients, taken_at }
    }

    pub fn clients(&self) -> &[ClientRecord] {
        &self.clients
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    pub fn summary(&self, last_write: Option<DateTime<Utc>>, settings: &AppSettings) -> DeskSummary {
        self.summary_with_zone(last_write, settings, &Local)
    }

    /// Shift boundaries are evaluated in `zone`; counts and freshness are zone independent.
    pub fn summary_with_zone<Tz: TimeZone>(
        &self,
        last_write: Option<DateTime<Utc>>,
        settings: &AppSettings,
        zone: &Tz,
    ) -> DeskSummary {
        let shift_start =
            current_shift_start(&self.taken_at.with_timezone(zone)).with_timezone(&Utc);
        let (freshness, freshness_message) = describe_freshness(last_write, self.taken_at, settings);

        DeskSummary {
            total: self.clients.len(),
            follow_up: needing_follow_up(&self.clients).len(),
            updated_this_shift: updated_since_shift_start(&self.clients, shift_start),
            shift_start,
            status_counts: count_by_status(&self.clients),
            last_write,
            freshness,
            freshness_message,
        }
    }
}

/// What the operator is looking at: a snapshot plus the active filter and its result.
#[derive(Debug, Clone)]
pub struct ViewState {
    snapshot: Snapshot,
    status_filter: StatusFilter,
    search: String,
    displayed: Vec<ClientRecord>,
}

impl ViewState {
    pub fn new(snapshot: Snapshot) -> Self {
        let displayed = snapshot.clients.clone();
        Self {
            snapshot,
            status_filter: StatusFilter::All,
            search: String::new(),
            displayed,
        }
    }

    pub fn with_filter(snapshot: Snapshot, status_filter: StatusFilter, search: &str) -> Self {
        let mut view = Self::new(snapshot);
        view.set_filter(status_filter, search);
        view
    }

    pub fn set_filter(&mut self, status_filter: StatusFilter, search: &str) {
        self.displayed = apply_filters(self.snapshot.clients(), &status_filter, search)
            .into_iter()
            .cloned()
            .collect();
        self.status_filter = status_filter;
        self.search = search.to_string();
    }

    /// Swap in a fresh snapshot, keeping the active filter.
    pub fn refresh(&mut self, snapshot: Snapshot) {
        self.snapshot = snapshot;
        let search = std::mem::take(&mut self.search);
        self.set_filter(self.status_filter, &search);
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn status_filter(&self) -> StatusFilter {
        self.status_filter
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn displayed(&self) -> &[ClientRecord] {
        &self.displayed
    }

    pub fn is_filtered(&self) -> bool {
        self.status_filter != StatusFilter::All || !self.search.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{Snapshot, ViewState};
    use crate::models::{AppSettings, ClientStatus, Freshness, StatusFilter};
    use crate::query::tests::record;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn summary_counts_shift_updates_and_follow_ups() {
        let taken_at = Utc.with_ymd_and_hms(2024, 1, 1, 21, 0, 0).single().expect("time");
        let mut recent = record("1", "A", ClientStatus::Partial);
        recent.last_updated = taken_at - Duration::minutes(30);
        let mut older = record("2", "B", ClientStatus::Ok);
        older.last_updated = taken_at - Duration::hours(3);
        let cancelled = record("3", "C", ClientStatus::Cancelled);

        let snapshot = Snapshot::new(vec![recent, older, cancelled], taken_at);
        let summary = snapshot.summary_with_zone(
            Some(taken_at - Duration::hours(2)),
            &AppSettings::default(),
            &Utc,
        );

        assert_eq!(summary.total, 3);
        assert_eq!(summary.follow_up, 1);
        assert_eq!(summary.updated_this_shift, 1);
        assert_eq!(
            summary.shift_start,
            Utc.with_ymd_and_hms(2024, 1, 1, 19, 0, 0).single().expect("time")
        );
        assert_eq!(summary.status_counts.get(ClientStatus::Cancelled), 1);
        assert_eq!(summary.freshness, Some(Freshness::Normal));
    }

    #[test]
    fn view_keeps_filter_across_refresh() {
        let taken_at = Utc::now();
        let first = Snapshot::new(
            vec![
                record("1", "Loja", ClientStatus::Partial),
                record("2", "Loja", ClientStatus::Ok),
            ],
            taken_at,
        );
        let mut view = ViewState::with_filter(first, StatusFilter::NeedsFollowUp, "loja");
        assert!(view.is_filtered());
        assert_eq!(view.displayed().len(), 1);

        view.refresh(Snapshot::new(
            vec![
                record("1", "Loja", ClientStatus::Ok),
                record("2", "Loja", ClientStatus::Inactive),
                record("3", "Loja", ClientStatus::NoImage),
            ],
            taken_at,
        ));
        assert_eq!(view.search(), "loja");
        let ids: Vec<_> = view
            .displayed()
            .iter()
            .map(|record| record.account_id.as_str())
            .collect();
        assert_eq!(ids, vec!["2", "3"]);
    }

    #[test]
    fn unfiltered_view_displays_everything() {
        let view = ViewState::new(Snapshot::new(vec![record("1", "A", ClientStatus::Ok)], Utc::now()));
        assert!(!view.is_filtered());
        assert_eq!(view.displayed().len(), 1);
    }
}
