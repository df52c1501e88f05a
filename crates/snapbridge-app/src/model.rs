// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::ids::*;

pub const ITEM_TIME_RESOURCE: &str = "ItemTime";
pub const UNTITLED_CUE: &str = "Untitled Cue";
pub const UNTITLED_PLAN: &str = "Untitled";
pub const UNKNOWN_PLAN_DATE: &str = "Unknown date";

/// A JSON:API document as returned by the planning API.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub data: Option<Vec<Resource>>,
    #[serde(default)]
    pub included: Vec<Resource>,
}

impl Document {
    pub fn resources(&self) -> &[Resource] {
        self.data.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Resource {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub relationships: Map<String, Value>,
}

impl Resource {
    /// Non-empty string attribute; `null`, missing and non-string values read as absent.
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attributes
            .get(key)
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn attr_bool(&self, key: &str) -> Option<bool> {
        self.attributes.get(key).and_then(Value::as_bool)
    }

    /// Id of a to-one relationship (`relationships.<name>.data.id`).
    pub fn related_id(&self, name: &str) -> Option<&str> {
        self.relationships
            .get(name)?
            .get("data")?
            .get("id")?
            .as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceType {
    pub id: ServiceTypeId,
    pub name: String,
}

impl ServiceType {
    /// Deduplicates by id and sorts case-insensitively by name.
    pub fn list_from_document(document: &Document) -> Vec<Self> {
        let mut seen = HashSet::new();
        let mut types: Vec<Self> = document
            .resources()
            .iter()
            .filter(|resource| seen.insert(resource.id.clone()))
            .map(|resource| Self {
                id: ServiceTypeId::new(resource.id.clone()),
                name: resource.attr_str("name").unwrap_or_default().to_owned(),
            })
            .collect();
        types.sort_by_key(|service_type| service_type.name.to_lowercase());
        types
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub id: PlanId,
    pub title: Option<String>,
    pub sort_date: Option<String>,
}

impl Plan {
    pub fn from_resource(resource: &Resource) -> Self {
        Self {
            id: PlanId::new(resource.id.clone()),
            title: resource.attr_str("title").map(str::to_owned),
            sort_date: resource.attr_str("sort_date").map(str::to_owned),
        }
    }

    pub fn list_from_document(document: &Document) -> Vec<Self> {
        document.resources().iter().map(Self::from_resource).collect()
    }

    pub fn label(&self) -> String {
        let date = self
            .sort_date
            .as_deref()
            .map(|date| date.get(..10).unwrap_or(date))
            .unwrap_or(UNKNOWN_PLAN_DATE);
        let title = self.title.as_deref().unwrap_or(UNTITLED_PLAN);
        format!("{date} — {title}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemType {
    Item,
    Song,
    Header,
    Media,
    Other(String),
}

impl ItemType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Item => "item",
            Self::Song => "song",
            Self::Header => "header",
            Self::Media => "media",
            Self::Other(value) => value,
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "item" => Self::Item,
            "song" => Self::Song,
            "header" => Self::Header,
            "media" => Self::Media,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Only items and songs become console snapshots.
    pub const fn is_cue(&self) -> bool {
        matches!(self, Self::Item | Self::Song)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanItem {
    pub id: PlanItemId,
    pub item_type: ItemType,
    pub title: Option<String>,
}

impl PlanItem {
    pub fn from_resource(resource: &Resource) -> Self {
        Self {
            id: PlanItemId::new(resource.id.clone()),
            item_type: ItemType::parse(resource.attr_str("item_type").unwrap_or_default()),
            title: resource.attr_str("title").map(str::to_owned),
        }
    }

    pub fn title_or_default(&self) -> &str {
        self.title.as_deref().unwrap_or(UNTITLED_CUE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemTime {
    pub id: ItemTimeId,
    pub plan_time_id: PlanTimeId,
    pub ordering_key: String,
    pub excluded: bool,
    pub item_id: Option<PlanItemId>,
}

impl ItemTime {
    /// Returns `None` for included resources that are not item-times or
    /// that carry no plan-time back-reference.
    pub fn from_resource(resource: &Resource) -> Option<Self> {
        if resource.kind != ITEM_TIME_RESOURCE {
            return None;
        }
        let plan_time_id = resource.related_id("plan_time")?;
        let ordering_key = resource
            .attr_str("live_start_at")
            .or_else(|| resource.attr_str("starts_at"))
            .unwrap_or_default()
            .to_owned();

        Some(Self {
            id: ItemTimeId::new(resource.id.clone()),
            plan_time_id: PlanTimeId::new(plan_time_id),
            ordering_key,
            excluded: resource.attr_bool("exclude").unwrap_or(false),
            item_id: resource
                .related_id("item")
                .filter(|id| !id.is_empty())
                .map(PlanItemId::new),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPlanTime {
    pub id: PlanTimeId,
    pub name: Option<String>,
    pub starts_at: Option<String>,
}

impl RawPlanTime {
    pub fn from_resource(resource: &Resource) -> Self {
        Self {
            id: PlanTimeId::new(resource.id.clone()),
            name: resource.attr_str("name").map(str::to_owned),
            starts_at: resource.attr_str("starts_at").map(str::to_owned),
        }
    }
}

/// Typed view of one plan's items, item-times and plan-times.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanData {
    pub items: Vec<PlanItem>,
    pub item_times: Vec<ItemTime>,
    pub plan_times: Vec<RawPlanTime>,
}

impl PlanData {
    pub fn from_documents(items: &Document, times: &Document) -> Result<Self> {
        let Some(item_resources) = items.data.as_deref() else {
            bail!("no items returned for this plan");
        };

        Ok(Self {
            items: item_resources.iter().map(PlanItem::from_resource).collect(),
            item_times: items
                .included
                .iter()
                .filter_map(ItemTime::from_resource)
                .collect(),
            plan_times: times
                .resources()
                .iter()
                .map(RawPlanTime::from_resource)
                .collect(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewRow {
    pub seq: u32,
    pub name: String,
    pub snap_index: u32,
}
