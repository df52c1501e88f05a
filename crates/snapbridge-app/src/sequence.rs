// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::collections::HashMap;
use std::fmt;

use crate::{
    ItemTime, PlanData, PlanItem, PlanTime, PlanTimeId, PreviewRow, TimeBucketNormalizer,
    display_label,
};

/// A plan's data after time buckets have been normalized, held until the next load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedPlan {
    pub buckets: Vec<PlanTime>,
    pub items: Vec<PlanItem>,
    pub item_times: Vec<ItemTime>,
}

impl LoadedPlan {
    pub fn new(data: PlanData, normalizer: &TimeBucketNormalizer) -> Self {
        Self {
            buckets: normalizer.normalize(&data.plan_times),
            items: data.items,
            item_times: data.item_times,
        }
    }

    pub fn labels(&self) -> LabelIndex {
        LabelIndex::from_buckets(&self.buckets)
    }
}

/// Ordered multimap from bucket label to the ids of every bucket carrying it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelIndex {
    entries: Vec<(String, Vec<PlanTimeId>)>,
}

impl LabelIndex {
    pub fn from_buckets(buckets: &[PlanTime]) -> Self {
        let mut index = Self::default();
        for bucket in buckets {
            index.insert(bucket.display_label(), bucket.id.clone());
        }
        index
    }

    pub fn insert(&mut self, label: &str, id: PlanTimeId) {
        match self.entries.iter_mut().find(|(key, _)| key == label) {
            Some((_, ids)) => ids.push(id),
            None => self.entries.push((label.to_owned(), vec![id])),
        }
    }

    pub fn resolve(&self, label: &str) -> &[PlanTimeId] {
        let label = display_label(label);
        self.entries
            .iter()
            .find(|(key, _)| key == label)
            .map(|(_, ids)| ids.as_slice())
            .unwrap_or_default()
    }

    /// Distinct labels in first-seen order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(label, _)| label.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionError {
    NotLoaded,
    NoTimeSelected,
    IndexOverflow,
}

impl fmt::Display for SelectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotLoaded => f.write_str("load plan times first"),
            Self::NoTimeSelected => f.write_str("no time selected"),
            Self::IndexOverflow => f.write_str(
                "snapshot indices would run past the console range; lower the existing snapshot count",
            ),
        }
    }
}

impl std::error::Error for SelectionError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    pub rows: Vec<PreviewRow>,
    pub offset: u32,
}

impl Preview {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Whether the console already holds snapshots, and how many the user says it holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffsetPolicy {
    pub has_existing: bool,
    pub existing_count: String,
}

impl OffsetPolicy {
    pub fn resolve(&self) -> u32 {
        resolve_offset(self.has_existing, &self.existing_count)
    }
}

/// First console index for new snapshots. Unparsable or negative counts clamp to zero.
pub fn resolve_offset(has_existing: bool, declared_count: &str) -> u32 {
    if !has_existing {
        return 0;
    }
    let declared = declared_count.trim();
    if declared.is_empty() {
        return 0;
    }
    declared
        .parse::<i64>()
        .ok()
        .and_then(|count| u32::try_from(count).ok())
        .unwrap_or(0)
}

/// Console name fields reject double quotes.
pub fn sanitize_title(title: &str) -> String {
    title.replace('"', "'")
}

/// Builds the ordered snapshot rows for the selected time buckets.
///
/// Labels are walked in the order given (repeats are resolved once), each
/// label expands to every bucket sharing it, and each bucket's item-times are
/// stable-sorted by ordering key. Excluded, dangling and non-cue entries are
/// dropped without consuming an index.
pub fn build<S: AsRef<str>>(
    selected_labels: &[S],
    plan: Option<&LoadedPlan>,
    offset: u32,
) -> Result<Preview, SelectionError> {
    let plan = plan.ok_or(SelectionError::NotLoaded)?;
    if selected_labels.is_empty() {
        return Err(SelectionError::NoTimeSelected);
    }

    let index = plan.labels();
    let mut seen_labels: Vec<&str> = Vec::new();
    let mut time_ids: Vec<&PlanTimeId> = Vec::new();
    for label in selected_labels {
        let label = display_label(label.as_ref());
        if seen_labels.contains(&label) {
            continue;
        }
        seen_labels.push(label);
        time_ids.extend(index.resolve(label));
    }

    let mut items_by_id: HashMap<&str, &PlanItem> = HashMap::new();
    for item in &plan.items {
        items_by_id.entry(item.id.as_str()).or_insert(item);
    }

    let mut rows = Vec::new();
    for time_id in time_ids {
        let mut cues: Vec<&ItemTime> = plan
            .item_times
            .iter()
            .filter(|item_time| &item_time.plan_time_id == time_id)
            .collect();
        cues.sort_by(|left, right| left.ordering_key.cmp(&right.ordering_key));

        for item_time in cues {
            if item_time.excluded {
                continue;
            }
            let Some(item) = item_time
                .item_id
                .as_ref()
                .and_then(|id| items_by_id.get(id.as_str()))
            else {
                continue;
            };
            if !item.item_type.is_cue() {
                continue;
            }

            let position =
                u32::try_from(rows.len()).map_err(|_| SelectionError::IndexOverflow)?;
            let snap_index = offset
                .checked_add(position)
                .ok_or(SelectionError::IndexOverflow)?;
            let seq = position
                .checked_add(1)
                .ok_or(SelectionError::IndexOverflow)?;
            rows.push(PreviewRow {
                seq,
                name: sanitize_title(item.title_or_default()),
                snap_index,
            });
        }
    }

    Ok(Preview { rows, offset })
}
