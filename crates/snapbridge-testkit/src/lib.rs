// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result};
use serde_json::{Value, json};
use snapbridge_app::{Document, LoadedPlan, PlanData, TimeBucketNormalizer};

pub const SERVICE_TYPE_ID: &str = "1001";
pub const PLAN_ID: &str = "5005";

/// One cue in a running order, scheduled against a single plan-time.
#[derive(Debug, Clone)]
pub struct CueFixture {
    pub item_id: String,
    pub item_type: String,
    pub title: Option<String>,
    pub item_time_id: String,
    pub plan_time_id: String,
    pub starts_at: Option<String>,
    pub live_start_at: Option<String>,
    pub exclude: bool,
}

impl CueFixture {
    pub fn new(id: &str, item_type: &str, title: &str, plan_time_id: &str, starts_at: &str) -> Self {
        Self {
            item_id: format!("item-{id}"),
            item_type: item_type.to_owned(),
            title: Some(title.to_owned()),
            item_time_id: format!("time-{id}"),
            plan_time_id: plan_time_id.to_owned(),
            starts_at: Some(starts_at.to_owned()),
            live_start_at: None,
            exclude: false,
        }
    }

    pub fn excluded(mut self) -> Self {
        self.exclude = true;
        self
    }

    pub fn live_start(mut self, live_start_at: &str) -> Self {
        self.live_start_at = Some(live_start_at.to_owned());
        self
    }

    pub fn untitled(mut self) -> Self {
        self.title = None;
        self
    }

    /// Item-time that points at an item missing from the document.
    pub fn dangling(mut self) -> Self {
        self.item_id = format!("missing-{}", self.item_id);
        self
    }
}

#[derive(Debug, Clone)]
pub struct PlanTimeFixture {
    pub id: String,
    pub name: Option<String>,
    pub starts_at: Option<String>,
}

impl PlanTimeFixture {
    pub fn new(id: &str, name: Option<&str>, starts_at: Option<&str>) -> Self {
        Self {
            id: id.to_owned(),
            name: name.map(str::to_owned),
            starts_at: starts_at.map(str::to_owned),
        }
    }
}

/// Builds the JSON:API documents the planning API returns for one plan.
#[derive(Debug, Clone, Default)]
pub struct PlanFixture {
    pub plan_times: Vec<PlanTimeFixture>,
    pub cues: Vec<CueFixture>,
    pub extra_items: Vec<Value>,
}

impl PlanFixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan_time(mut self, id: &str, name: Option<&str>, starts_at: Option<&str>) -> Self {
        self.plan_times.push(PlanTimeFixture::new(id, name, starts_at));
        self
    }

    pub fn cue(mut self, cue: CueFixture) -> Self {
        self.cues.push(cue);
        self
    }

    pub fn items_json(&self) -> Value {
        let mut data: Vec<Value> = Vec::new();
        for cue in &self.cues {
            let listed = data.iter().any(|item| item["id"] == cue.item_id.as_str());
            if listed || cue.item_id.starts_with("missing-") {
                continue;
            }
            data.push(json!({
                "id": cue.item_id,
                "type": "Item",
                "attributes": {
                    "item_type": cue.item_type,
                    "title": cue.title,
                },
                "relationships": {
                    "item_times": {"data": [{"type": "ItemTime", "id": cue.item_time_id}]}
                }
            }));
        }
        data.extend(self.extra_items.iter().cloned());

        let included: Vec<Value> = self
            .cues
            .iter()
            .map(|cue| {
                json!({
                    "id": cue.item_time_id,
                    "type": "ItemTime",
                    "attributes": {
                        "starts_at": cue.starts_at,
                        "live_start_at": cue.live_start_at,
                        "exclude": cue.exclude,
                    },
                    "relationships": {
                        "item": {"data": {"type": "Item", "id": cue.item_id}},
                        "plan_time": {"data": {"type": "PlanTime", "id": cue.plan_time_id}}
                    }
                })
            })
            .collect();

        json!({"data": data, "included": included, "meta": {"total_count": self.cues.len()}})
    }

    pub fn times_json(&self) -> Value {
        let data: Vec<Value> = self
            .plan_times
            .iter()
            .map(|plan_time| {
                json!({
                    "id": plan_time.id,
                    "type": "PlanTime",
                    "attributes": {
                        "name": plan_time.name,
                        "starts_at": plan_time.starts_at,
                        "time_type": "service",
                    }
                })
            })
            .collect();
        json!({"data": data})
    }

    pub fn documents(&self) -> Result<(Document, Document)> {
        let items = serde_json::from_value(self.items_json()).context("decode items fixture")?;
        let times = serde_json::from_value(self.times_json()).context("decode times fixture")?;
        Ok((items, times))
    }

    pub fn plan_data(&self) -> Result<PlanData> {
        let (items, times) = self.documents()?;
        PlanData::from_documents(&items, &times)
    }

    pub fn loaded(&self, time_zone: &str) -> Result<LoadedPlan> {
        let normalizer = TimeBucketNormalizer::new(time_zone)?;
        Ok(LoadedPlan::new(self.plan_data()?, &normalizer))
    }
}

/// A Sunday with two identical 9:00 services, an 11:00 service and a header.
pub fn sunday_plan() -> PlanFixture {
    let mut fixture = PlanFixture::new()
        .plan_time("pt-early", None, Some("2026-10-25T14:00:00Z"))
        .plan_time("pt-late", None, Some("2026-10-25T16:00:00Z"))
        .plan_time("pt-overflow", None, Some("2026-10-25T14:00:00Z"))
        .cue(CueFixture::new(
            "a",
            "song",
            "Opening Song",
            "pt-early",
            "2026-10-25T14:00:00Z",
        ))
        .cue(CueFixture::new(
            "b",
            "item",
            "Welcome",
            "pt-early",
            "2026-10-25T14:05:00Z",
        ))
        .cue(CueFixture::new(
            "c",
            "header",
            "Worship",
            "pt-early",
            "2026-10-25T14:01:00Z",
        ))
        .cue(CueFixture::new(
            "d",
            "song",
            "Overflow Song",
            "pt-overflow",
            "2026-10-25T14:00:00Z",
        ))
        .cue(CueFixture::new(
            "e",
            "song",
            "Late Song",
            "pt-late",
            "2026-10-25T16:00:00Z",
        ));
    fixture.extra_items.push(json!({
        "id": "item-media",
        "type": "Item",
        "attributes": {"item_type": "media", "title": "Countdown"}
    }));
    fixture
}

pub fn service_types_json() -> Value {
    json!({
        "data": [
            {"id": "3", "type": "ServiceType", "attributes": {"name": "youth"}},
            {"id": SERVICE_TYPE_ID, "type": "ServiceType", "attributes": {"name": "Sunday Morning"}},
            {"id": "2", "type": "ServiceType", "attributes": {"name": "Midweek"}},
        ]
    })
}

pub fn plans_json() -> Value {
    json!({
        "data": [
            {"id": PLAN_ID, "type": "Plan", "attributes": {"sort_date": "2026-10-25T09:00:00Z", "title": "Harvest Sunday"}},
            {"id": "5006", "type": "Plan", "attributes": {"sort_date": "2026-11-01T09:00:00Z", "title": null}},
        ]
    })
}
