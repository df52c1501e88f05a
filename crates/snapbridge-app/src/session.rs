// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Result, bail};

use crate::{
    LoadedPlan, OffsetPolicy, Plan, PreviewRow, Preview, SelectionError, ServiceType, build,
    preselected_labels,
};

/// Background actions; at most one of each kind runs at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    TestConnection,
    FetchTypes,
    FetchPlans,
    LoadTimes,
    Send,
}

impl ActionKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TestConnection => "test connection",
            Self::FetchTypes => "fetch service types",
            Self::FetchPlans => "fetch plans",
            Self::LoadTimes => "load plan times",
            Self::Send => "send",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    ServiceTypesLoaded(Vec<ServiceType>),
    SelectServiceType(ServiceType),
    PlansLoaded(Vec<Plan>),
    SelectPlan(Plan),
    PlanLoaded(LoadedPlan),
    SelectTimes(Vec<String>),
    SetOffsetPolicy(OffsetPolicy),
    BuildPreview,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    ServiceTypesReplaced(usize),
    ServiceTypeSelected(ServiceType),
    PlansReplaced(usize),
    PlanSelected(Plan),
    TimesLoaded { buckets: usize, preselected: Vec<String> },
    PreviewCleared,
    PreviewReady { rows: usize, offset: u32 },
    PreviewRejected(SelectionError),
}

/// Everything the foreground holds between actions. Worker results replace
/// fields wholesale; the preview is dropped whenever an upstream choice moves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub service_types: Vec<ServiceType>,
    pub selected_service_type: Option<ServiceType>,
    pub plans: Vec<Plan>,
    pub selected_plan: Option<Plan>,
    pub plan: Option<LoadedPlan>,
    pub selected_labels: Vec<String>,
    pub offset_policy: OffsetPolicy,
    pub preview: Option<Preview>,
    pub preselect: String,
    in_flight: Vec<ActionKind>,
}

impl Session {
    pub fn new(preselect: &str) -> Self {
        Self {
            preselect: preselect.to_owned(),
            ..Self::default()
        }
    }

    pub fn dispatch(&mut self, command: SessionCommand) -> Vec<SessionEvent> {
        match command {
            SessionCommand::ServiceTypesLoaded(types) => {
                let count = types.len();
                self.service_types = types;
                vec![SessionEvent::ServiceTypesReplaced(count)]
            }
            SessionCommand::SelectServiceType(service_type) => {
                self.selected_service_type = Some(service_type.clone());
                self.plans.clear();
                self.selected_plan = None;
                self.plan = None;
                self.selected_labels.clear();
                let mut events = vec![SessionEvent::ServiceTypeSelected(service_type)];
                events.extend(self.clear_preview());
                events
            }
            SessionCommand::PlansLoaded(plans) => {
                let count = plans.len();
                let first = plans.first().cloned();
                self.plans = plans;
                let mut events = vec![SessionEvent::PlansReplaced(count)];
                match first {
                    Some(plan) => events.extend(self.dispatch(SessionCommand::SelectPlan(plan))),
                    None => {
                        self.selected_plan = None;
                        self.plan = None;
                        events.extend(self.clear_preview());
                    }
                }
                events
            }
            SessionCommand::SelectPlan(plan) => {
                self.selected_plan = Some(plan.clone());
                self.plan = None;
                self.selected_labels.clear();
                let mut events = vec![SessionEvent::PlanSelected(plan)];
                events.extend(self.clear_preview());
                events
            }
            SessionCommand::PlanLoaded(loaded) => {
                let preselected = preselected_labels(&loaded.buckets, &self.preselect);
                let buckets = loaded.buckets.len();
                self.plan = Some(loaded);
                self.selected_labels = preselected.clone();
                let mut events = vec![SessionEvent::TimesLoaded {
                    buckets,
                    preselected,
                }];
                events.extend(self.clear_preview());
                events
            }
            SessionCommand::SelectTimes(labels) => {
                self.selected_labels = labels;
                self.clear_preview()
            }
            SessionCommand::SetOffsetPolicy(policy) => {
                self.offset_policy = policy;
                self.clear_preview()
            }
            SessionCommand::BuildPreview => {
                let offset = self.offset_policy.resolve();
                match build(self.selected_labels.as_slice(), self.plan.as_ref(), offset) {
                    Ok(preview) => {
                        let event = SessionEvent::PreviewReady {
                            rows: preview.rows.len(),
                            offset: preview.offset,
                        };
                        self.preview = Some(preview);
                        vec![event]
                    }
                    Err(error) => {
                        self.preview = None;
                        vec![SessionEvent::PreviewRejected(error)]
                    }
                }
            }
        }
    }

    /// Rows for the send action; sending needs a non-empty preview.
    pub fn rows_to_send(&self) -> Result<&[PreviewRow]> {
        match &self.preview {
            Some(preview) if !preview.is_empty() => Ok(&preview.rows),
            _ => bail!("nothing to send; build a preview with at least one snapshot first"),
        }
    }

    pub fn can_send(&self) -> bool {
        self.rows_to_send().is_ok() && !self.is_running(ActionKind::Send)
    }

    pub fn begin(&mut self, action: ActionKind) -> Result<()> {
        if self.is_running(action) {
            bail!("{} is already running", action.as_str());
        }
        self.in_flight.push(action);
        Ok(())
    }

    pub fn finish(&mut self, action: ActionKind) {
        self.in_flight.retain(|running| *running != action);
    }

    pub fn is_running(&self, action: ActionKind) -> bool {
        self.in_flight.contains(&action)
    }

    fn clear_preview(&mut self) -> Vec<SessionEvent> {
        if self.preview.take().is_some() {
            vec![SessionEvent::PreviewCleared]
        } else {
            Vec::new()
        }
    }
}
