//! Non-destructive views over a run's event log
//!
//! Filters never touch the log; they borrow it and yield matching events
//! lazily in log order. Because the log is append-only, re-running the same
//! filter later yields a superset with the earlier results as a prefix.

use crate::types::{Event, EventKind};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

/// Conjunction of event predicates; the empty filter matches everything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    kinds: Option<BTreeSet<EventKind>>,
    text: Option<String>,
    outcome_status: Option<String>,
    tags: BTreeMap<String, String>,
    from: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only events whose kind is in `kinds`
    pub fn kinds(mut self, kinds: impl IntoIterator<Item = EventKind>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    /// Case-insensitive substring of the detail or any tag value
    pub fn text(mut self, needle: impl AsRef<str>) -> Self {
        self.text = Some(needle.as_ref().to_lowercase());
        self
    }

    /// Outcome status equality (ASCII case-insensitive)
    pub fn outcome_status(mut self, status: impl Into<String>) -> Self {
        self.outcome_status = Some(status.into());
        self
    }

    /// Tag `key` must be present with exactly `value`
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Producer timestamp within `[from, until)`
    pub fn between(mut self, from: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.until = Some(until);
        self
    }

    pub fn since(mut self, from: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn matches(&self, event: &Event) -> bool {
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }

        if let Some(status) = &self.outcome_status {
            if !event.outcome_status.eq_ignore_ascii_case(status) {
                return false;
            }
        }

        for (key, value) in &self.tags {
            if event.tags.get(key) != Some(value) {
                return false;
            }
        }

        if let Some(from) = self.from {
            if event.timestamp < from {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.timestamp >= until {
                return false;
            }
        }

        if let Some(needle) = &self.text {
            let in_detail = event.detail.to_lowercase().contains(needle.as_str());
            let in_tags = || {
                event
                    .tags
                    .values()
                    .any(|v| v.to_lowercase().contains(needle.as_str()))
            };
            if !in_detail && !in_tags() {
                return false;
            }
        }

        true
    }
}

/// Lazily yield the events of `log` matching `filter`, in log order
pub fn query<'a>(log: &'a [Event], filter: &'a EventFilter) -> impl Iterator<Item = &'a Event> + 'a {
    log.iter().filter(move |event| filter.matches(event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProbeOutcome;
    use chrono::Duration;

    fn sample_log() -> Vec<Event> {
        let t0 = Utc::now();
        vec![
            ProbeOutcome::info("connected", "TCP session open to mx1")
                .with_tag("step", "connect")
                .with_tag("server", "mx1.example.com")
                .at(t0),
            ProbeOutcome::new(EventKind::Success, "authenticated", "AUTH LOGIN accepted")
                .with_tag("step", "auth")
                .at(t0 + Duration::seconds(1)),
            ProbeOutcome::new(EventKind::Error, "timeout", "DATA phase stalled")
                .with_tag("step", "data")
                .with_tag("errorCode", "421")
                .at(t0 + Duration::seconds(2)),
            ProbeOutcome::new(EventKind::Debug, "trace", "raw banner: 220 ESMTP")
                .at(t0 + Duration::seconds(3)),
        ]
        .into_iter()
        .enumerate()
        .map(|(i, o)| Event::from_outcome(i as u64, o))
        .collect()
    }

    fn sequences<'a>(events: impl Iterator<Item = &'a Event>) -> Vec<u64> {
        events.map(|e| e.sequence).collect()
    }

    #[test]
    fn test_empty_filter_returns_log_in_order() {
        let log = sample_log();
        let filter = EventFilter::new();

        assert!(filter.is_empty());
        assert_eq!(sequences(query(&log, &filter)), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_kind_inclusion() {
        let log = sample_log();
        let filter = EventFilter::new().kinds([EventKind::Success, EventKind::Error]);

        assert_eq!(sequences(query(&log, &filter)), vec![1, 2]);
    }

    #[test]
    fn test_text_matches_detail_and_tag_values() {
        let log = sample_log();

        let in_detail = EventFilter::new().text("auth login");
        assert_eq!(sequences(query(&log, &in_detail)), vec![1]);

        let in_tag = EventFilter::new().text("MX1.EXAMPLE");
        assert_eq!(sequences(query(&log, &in_tag)), vec![0]);
    }

    #[test]
    fn test_predicates_combine_with_and() {
        let log = sample_log();
        let filter = EventFilter::new()
            .kinds([EventKind::Error])
            .outcome_status("Timeout")
            .tag("errorCode", "421");

        assert_eq!(sequences(query(&log, &filter)), vec![2]);

        let contradicting = filter.tag("step", "auth");
        assert_eq!(query(&log, &contradicting).count(), 0);
    }

    #[test]
    fn test_time_range_is_half_open() {
        let log = sample_log();
        let filter = EventFilter::new().between(log[1].timestamp, log[3].timestamp);

        assert_eq!(sequences(query(&log, &filter)), vec![1, 2]);
    }

    #[test]
    fn test_requery_after_growth_preserves_prefix() {
        let mut log = sample_log();
        let filter = EventFilter::new().kinds([EventKind::Error, EventKind::Info]);
        let before = sequences(query(&log, &filter));

        log.push(Event::from_outcome(4, ProbeOutcome::failure("connection refused")));
        let after = sequences(query(&log, &filter));

        assert_eq!(&after[..before.len()], &before[..]);
        assert_eq!(after.len(), before.len() + 1);
    }
}
