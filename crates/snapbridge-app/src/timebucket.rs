// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Result, anyhow};
use std::cmp::Ordering;
use std::fmt;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};
use time_tz::{OffsetDateTimeExt, Tz, timezones};

use crate::{PlanTimeId, RawPlanTime};

pub const DEFAULT_TIME_ZONE: &str = "America/Chicago";
pub const DEFAULT_BUCKET_ID: &str = "default";
pub const DEFAULT_BUCKET_LABEL: &str = "(default)";

/// One service time of a plan, ready for display and selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanTime {
    pub id: PlanTimeId,
    pub label: String,
    pub instant: Option<OffsetDateTime>,
}

impl PlanTime {
    /// Label as presented for selection; an unnamed, untimed bucket reads `(default)`.
    pub fn display_label(&self) -> &str {
        display_label(&self.label)
    }
}

pub fn display_label(label: &str) -> &str {
    if label.is_empty() {
        DEFAULT_BUCKET_LABEL
    } else {
        label
    }
}

#[derive(Clone)]
pub struct TimeBucketNormalizer {
    zone: &'static Tz,
    zone_name: String,
}

impl fmt::Debug for TimeBucketNormalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeBucketNormalizer")
            .field("zone", &self.zone_name)
            .finish()
    }
}

impl TimeBucketNormalizer {
    pub fn new(zone_name: &str) -> Result<Self> {
        let zone = timezones::get_by_name(zone_name).ok_or_else(|| {
            anyhow!("unknown time zone {zone_name:?}; use an IANA name such as America/Chicago")
        })?;
        Ok(Self {
            zone,
            zone_name: zone_name.to_owned(),
        })
    }

    pub fn zone_name(&self) -> &str {
        &self.zone_name
    }

    /// Produces one bucket per record, ordered by start instant with untimed
    /// buckets last. A plan without any plan-times yields a single default bucket.
    pub fn normalize(&self, raw: &[RawPlanTime]) -> Vec<PlanTime> {
        if raw.is_empty() {
            return vec![PlanTime {
                id: PlanTimeId::new(DEFAULT_BUCKET_ID),
                label: DEFAULT_BUCKET_LABEL.to_owned(),
                instant: None,
            }];
        }

        let mut buckets: Vec<PlanTime> = raw
            .iter()
            .map(|record| {
                let instant = record.starts_at.as_deref().and_then(parse_instant);
                PlanTime {
                    id: record.id.clone(),
                    label: self.label(record.name.as_deref(), instant),
                    instant,
                }
            })
            .collect();
        buckets.sort_by(|left, right| compare_instants(left.instant, right.instant));
        buckets
    }

    pub fn label(&self, name: Option<&str>, instant: Option<OffsetDateTime>) -> String {
        let name = name.map(str::trim).unwrap_or_default();
        let local = instant
            .and_then(|instant| self.local_clock(instant))
            .unwrap_or_default();

        match (name.is_empty(), local.is_empty()) {
            (false, false) => format!("{name} — {local}"),
            (true, false) => local,
            _ => name.to_owned(),
        }
    }

    /// Twelve-hour wall clock in the configured zone, e.g. `9:00 AM`.
    pub fn local_clock(&self, instant: OffsetDateTime) -> Option<String> {
        instant
            .to_timezone(self.zone)
            .format(format_description!(
                "[hour repr:12 padding:none]:[minute] [period]"
            ))
            .ok()
    }
}

/// RFC 3339 timestamps, or naive ones taken as UTC. Naive timestamps may use
/// a space instead of `T`, omit seconds, or carry fractional seconds.
pub fn parse_instant(raw: &str) -> Option<OffsetDateTime> {
    let raw = raw.trim();
    let raw = match raw.as_bytes().get(10) {
        Some(b' ') => format!("{}T{}", &raw[..10], &raw[11..]),
        _ => raw.to_owned(),
    };
    if let Ok(instant) = OffsetDateTime::parse(&raw, &Rfc3339) {
        return Some(instant);
    }
    PrimitiveDateTime::parse(
        &raw,
        format_description!(
            "[year]-[month]-[day]T[hour]:[minute][optional [:[second][optional [.[subsecond]]]]]"
        ),
    )
    .ok()
    .map(PrimitiveDateTime::assume_utc)
}

fn compare_instants(left: Option<OffsetDateTime>, right: Option<OffsetDateTime>) -> Ordering {
    match (left, right) {
        (Some(left), Some(right)) => left.cmp(&right),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Distinct display labels containing `needle`, in bucket order.
pub fn preselected_labels(buckets: &[PlanTime], needle: &str) -> Vec<String> {
    if needle.is_empty() {
        return Vec::new();
    }
    let mut labels: Vec<String> = Vec::new();
    for bucket in buckets {
        let label = bucket.display_label();
        if label.contains(needle) && !labels.iter().any(|seen| seen == label) {
            labels.push(label.to_owned());
        }
    }
    labels
}
