// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow};
use snapbridge_app::{
    ActionKind, LoadedPlan, Plan, PlanData, PlanId, ServiceType, ServiceTypeId, Session,
    SessionCommand, SessionEvent, TimeBucketNormalizer,
};
use snapbridge_console::{Emitter, SendEvent, SendReport, SleepPacer, Transport};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Read side of the planning service, as seen by the workers.
pub trait PlanningSource: Send + Sync + 'static {
    fn ping(&self) -> Result<()>;
    fn service_types(&self) -> Result<Vec<ServiceType>>;
    fn future_plans(&self, service_type: &ServiceTypeId, count: u32) -> Result<Vec<Plan>>;
    fn plan_data(&self, service_type: &ServiceTypeId, plan: &PlanId) -> Result<PlanData>;
}

impl PlanningSource for snapbridge_pco::Client {
    fn ping(&self) -> Result<()> {
        snapbridge_pco::Client::ping(self)
    }

    fn service_types(&self) -> Result<Vec<ServiceType>> {
        snapbridge_pco::Client::service_types(self)
    }

    fn future_plans(&self, service_type: &ServiceTypeId, count: u32) -> Result<Vec<Plan>> {
        snapbridge_pco::Client::future_plans(self, service_type, count)
    }

    fn plan_data(&self, service_type: &ServiceTypeId, plan: &PlanId) -> Result<PlanData> {
        snapbridge_pco::Client::plan_data(self, service_type, plan)
    }
}

/// Messages posted from worker threads back to the foreground.
#[derive(Debug)]
pub enum WorkerEvent {
    Connection(Result<(), String>),
    ServiceTypes(Result<Vec<ServiceType>, String>),
    Plans(Result<Vec<Plan>, String>),
    PlanLoaded(Result<LoadedPlan, String>),
    SendProgress(SendEvent),
    SendFinished(SendReport),
}

impl WorkerEvent {
    fn action(&self) -> Option<ActionKind> {
        match self {
            Self::Connection(_) => Some(ActionKind::TestConnection),
            Self::ServiceTypes(_) => Some(ActionKind::FetchTypes),
            Self::Plans(_) => Some(ActionKind::FetchPlans),
            Self::PlanLoaded(_) => Some(ActionKind::LoadTimes),
            Self::SendProgress(_) => None,
            Self::SendFinished(_) => Some(ActionKind::Send),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Connected,
    ServiceTypes(usize),
    Plans(usize),
    TimesLoaded {
        buckets: usize,
        preselected: Vec<String>,
    },
    Sent(SendReport),
}

/// Owns the session and applies worker results to it.
///
/// Network and console work runs on spawned threads; only the foreground
/// mutates the session, one event at a time.
pub struct Runtime<S> {
    session: Session,
    source: Arc<S>,
    normalizer: TimeBucketNormalizer,
    tx: Sender<WorkerEvent>,
    rx: Receiver<WorkerEvent>,
}

impl<S: PlanningSource> Runtime<S> {
    pub fn new(source: S, normalizer: TimeBucketNormalizer, preselect: &str) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            session: Session::new(preselect),
            source: Arc::new(source),
            normalizer,
            tx,
            rx,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn dispatch(&mut self, command: SessionCommand) -> Vec<SessionEvent> {
        let events = self.session.dispatch(command);
        for event in &events {
            debug!(?event, "session");
        }
        events
    }

    pub fn start_test_connection(&mut self) -> Result<()> {
        let source = Arc::clone(&self.source);
        self.spawn(ActionKind::TestConnection, move |_| {
            WorkerEvent::Connection(source.ping().map_err(|error| format!("{error:#}")))
        })
    }

    pub fn start_fetch_types(&mut self) -> Result<()> {
        let source = Arc::clone(&self.source);
        self.spawn(ActionKind::FetchTypes, move |_| {
            WorkerEvent::ServiceTypes(source.service_types().map_err(|error| format!("{error:#}")))
        })
    }

    pub fn start_fetch_plans(&mut self, count: u32) -> Result<()> {
        let service_type = self
            .session
            .selected_service_type
            .as_ref()
            .map(|service_type| service_type.id.clone())
            .ok_or_else(|| anyhow!("select a service type first"))?;
        let source = Arc::clone(&self.source);
        self.spawn(ActionKind::FetchPlans, move |_| {
            WorkerEvent::Plans(
                source
                    .future_plans(&service_type, count)
                    .map_err(|error| format!("{error:#}")),
            )
        })
    }

    pub fn start_load_times(&mut self) -> Result<()> {
        let service_type = self
            .session
            .selected_service_type
            .as_ref()
            .map(|service_type| service_type.id.clone())
            .ok_or_else(|| anyhow!("select a service type first"))?;
        let plan = self
            .session
            .selected_plan
            .as_ref()
            .map(|plan| plan.id.clone())
            .ok_or_else(|| anyhow!("select a plan first"))?;
        let source = Arc::clone(&self.source);
        let normalizer = self.normalizer.clone();
        self.spawn(ActionKind::LoadTimes, move |_| {
            let loaded = source
                .plan_data(&service_type, &plan)
                .map(|data| LoadedPlan::new(data, &normalizer))
                .map_err(|error| format!("{error:#}"));
            WorkerEvent::PlanLoaded(loaded)
        })
    }

    /// Sends the current preview. Rows are copied so the session stays free
    /// for the foreground while the console is being driven.
    pub fn start_send<T>(&mut self, transport: T, interval: Duration) -> Result<()>
    where
        T: Transport + Send + 'static,
    {
        let rows = self.session.rows_to_send()?.to_vec();
        self.spawn(ActionKind::Send, move |tx| {
            let mut emitter = Emitter::with_pacer(transport, SleepPacer).interval(interval);
            let report = emitter.send_with(&rows, |event| {
                let _ = tx.send(WorkerEvent::SendProgress(event.clone()));
            });
            WorkerEvent::SendFinished(report)
        })
    }

    /// Blocks until the worker for `action` reports back.
    pub fn wait(&mut self, action: ActionKind) -> Result<Completion> {
        self.wait_with(action, |_| {})
    }

    pub fn wait_with<F>(&mut self, action: ActionKind, mut on_progress: F) -> Result<Completion>
    where
        F: FnMut(&SendEvent),
    {
        if !self.session.is_running(action) {
            return Err(anyhow!("{} is not running", action.as_str()));
        }
        loop {
            let event = self
                .rx
                .recv()
                .map_err(|_| anyhow!("worker event channel closed"))?;
            if let WorkerEvent::SendProgress(progress) = &event {
                on_progress(progress);
                continue;
            }
            let finished = event.action();
            let outcome = self.apply(event);
            if finished == Some(action) {
                return outcome;
            }
            if let Err(error) = outcome {
                warn!("{error:#}");
            }
        }
    }

    fn apply(&mut self, event: WorkerEvent) -> Result<Completion> {
        if let Some(action) = event.action() {
            self.session.finish(action);
        }
        match event {
            WorkerEvent::Connection(result) => {
                result.map_err(|error| anyhow!(error))?;
                Ok(Completion::Connected)
            }
            WorkerEvent::ServiceTypes(result) => {
                let types = result.map_err(|error| anyhow!(error))?;
                let count = types.len();
                self.dispatch(SessionCommand::ServiceTypesLoaded(types));
                Ok(Completion::ServiceTypes(count))
            }
            WorkerEvent::Plans(result) => {
                let plans = result.map_err(|error| anyhow!(error))?;
                let count = plans.len();
                self.dispatch(SessionCommand::PlansLoaded(plans));
                Ok(Completion::Plans(count))
            }
            WorkerEvent::PlanLoaded(result) => {
                let loaded = result.map_err(|error| anyhow!(error))?;
                let events = self.dispatch(SessionCommand::PlanLoaded(loaded));
                events
                    .into_iter()
                    .find_map(|event| match event {
                        SessionEvent::TimesLoaded {
                            buckets,
                            preselected,
                        } => Some(Completion::TimesLoaded {
                            buckets,
                            preselected,
                        }),
                        _ => None,
                    })
                    .ok_or_else(|| anyhow!("plan times were not applied"))
            }
            WorkerEvent::SendFinished(report) => Ok(Completion::Sent(report)),
            WorkerEvent::SendProgress(_) => Err(anyhow!("unexpected progress event")),
        }
    }

    fn spawn<F>(&mut self, action: ActionKind, job: F) -> Result<()>
    where
        F: FnOnce(&Sender<WorkerEvent>) -> WorkerEvent + Send + 'static,
    {
        self.session.begin(action)?;
        let tx = self.tx.clone();
        let spawned = thread::Builder::new()
            .name(format!("snapbridge-{}", action.as_str().replace(' ', "-")))
            .spawn(move || {
                let event = job(&tx);
                let _ = tx.send(event);
            });
        if let Err(error) = spawned {
            self.session.finish(action);
            return Err(error).with_context(|| format!("start {}", action.as_str()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Completion, PlanningSource, Runtime};
    use anyhow::{Result, anyhow, bail};
    use snapbridge_app::{
        ActionKind, Document, OffsetPolicy, Plan, PlanData, PlanId, ServiceType, ServiceTypeId,
        SessionCommand, SessionEvent, TimeBucketNormalizer,
    };
    use snapbridge_console::{SendEvent, SnapshotCommand, Transport};
    use snapbridge_testkit::{PLAN_ID, SERVICE_TYPE_ID, plans_json, service_types_json, sunday_plan};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct FakeSource {
        reachable: bool,
    }

    impl PlanningSource for FakeSource {
        fn ping(&self) -> Result<()> {
            if self.reachable {
                Ok(())
            } else {
                bail!("cannot reach planning service")
            }
        }

        fn service_types(&self) -> Result<Vec<ServiceType>> {
            let document: Document = serde_json::from_value(service_types_json())?;
            Ok(ServiceType::list_from_document(&document))
        }

        fn future_plans(&self, service_type: &ServiceTypeId, _count: u32) -> Result<Vec<Plan>> {
            if service_type.as_str() != SERVICE_TYPE_ID {
                bail!("unknown service type {service_type}");
            }
            let document: Document = serde_json::from_value(plans_json())?;
            Ok(Plan::list_from_document(&document))
        }

        fn plan_data(&self, _service_type: &ServiceTypeId, plan: &PlanId) -> Result<PlanData> {
            if plan.as_str() != PLAN_ID {
                bail!("no items returned for plan {plan}");
            }
            sunday_plan().plan_data()
        }
    }

    #[derive(Clone, Default)]
    struct SharedTransport {
        sent: Arc<Mutex<Vec<SnapshotCommand>>>,
    }

    impl Transport for SharedTransport {
        fn send(&mut self, command: &SnapshotCommand) -> Result<()> {
            self.sent
                .lock()
                .map_err(|_| anyhow!("transport log poisoned"))?
                .push(command.clone());
            Ok(())
        }
    }

    fn runtime(reachable: bool) -> Runtime<FakeSource> {
        let normalizer = TimeBucketNormalizer::new("America/Chicago").expect("valid zone");
        Runtime::new(FakeSource { reachable }, normalizer, "9:00 AM")
    }

    fn load_sunday(runtime: &mut Runtime<FakeSource>) -> Result<()> {
        runtime.start_fetch_types()?;
        runtime.wait(ActionKind::FetchTypes)?;
        let sunday = runtime
            .session()
            .service_types
            .iter()
            .find(|service_type| service_type.id.as_str() == SERVICE_TYPE_ID)
            .cloned()
            .expect("fixture service type");
        runtime.dispatch(SessionCommand::SelectServiceType(sunday));
        runtime.start_fetch_plans(5)?;
        runtime.wait(ActionKind::FetchPlans)?;
        runtime.start_load_times()?;
        runtime.wait(ActionKind::LoadTimes)?;
        Ok(())
    }

    #[test]
    fn connection_result_is_reported() -> Result<()> {
        let mut ok = runtime(true);
        ok.start_test_connection()?;
        assert_eq!(ok.wait(ActionKind::TestConnection)?, Completion::Connected);

        let mut down = runtime(false);
        down.start_test_connection()?;
        let error = down
            .wait(ActionKind::TestConnection)
            .expect_err("unreachable source should fail");
        assert!(error.to_string().contains("cannot reach"));
        assert!(!down.session().is_running(ActionKind::TestConnection));
        Ok(())
    }

    #[test]
    fn fetch_plans_requires_a_service_type() {
        let mut runtime = runtime(true);
        let error = runtime
            .start_fetch_plans(5)
            .expect_err("no service type selected");
        assert!(error.to_string().contains("select a service type"));
        assert!(!runtime.session().is_running(ActionKind::FetchPlans));
    }

    #[test]
    fn loading_a_plan_preselects_matching_times() -> Result<()> {
        let mut runtime = runtime(true);
        load_sunday(&mut runtime)?;

        let session = runtime.session();
        assert_eq!(session.plans.len(), 2);
        assert_eq!(
            session.selected_plan.as_ref().map(|plan| plan.id.as_str()),
            Some(PLAN_ID)
        );
        assert_eq!(session.selected_labels, vec!["9:00 AM".to_owned()]);
        Ok(())
    }

    #[test]
    fn preview_is_sent_row_by_row_with_progress() -> Result<()> {
        let mut runtime = runtime(true);
        load_sunday(&mut runtime)?;
        runtime.dispatch(SessionCommand::SetOffsetPolicy(OffsetPolicy {
            has_existing: true,
            existing_count: "12".to_owned(),
        }));
        let events = runtime.dispatch(SessionCommand::BuildPreview);
        assert!(matches!(
            events.as_slice(),
            [SessionEvent::PreviewReady { offset: 12, .. }]
        ));
        let rows = runtime.session().rows_to_send()?.len();

        let transport = SharedTransport::default();
        runtime.start_send(transport.clone(), Duration::ZERO)?;
        let mut progress = Vec::new();
        let completion = runtime.wait_with(ActionKind::Send, |event| progress.push(event.clone()))?;

        let Completion::Sent(report) = completion else {
            panic!("expected send completion, got {completion:?}");
        };
        assert_eq!(report.succeeded, rows);
        assert_eq!(progress.len(), rows);
        assert!(matches!(
            progress.first(),
            Some(SendEvent::Sent { snap_index: 12, .. })
        ));
        let sent = transport.sent.lock().map_err(|_| anyhow!("poisoned"))?;
        assert_eq!(sent.len(), rows * 2);
        assert_eq!(sent[0], SnapshotCommand::Create { index: 12 });
        Ok(())
    }

    #[test]
    fn send_without_preview_is_refused() {
        let mut runtime = runtime(true);
        let error = runtime
            .start_send(SharedTransport::default(), Duration::ZERO)
            .expect_err("nothing to send");
        assert!(error.to_string().contains("nothing to send"));
        assert!(!runtime.session().is_running(ActionKind::Send));
    }

    #[test]
    fn duplicate_actions_are_rejected_while_running() -> Result<()> {
        let mut runtime = runtime(true);
        runtime.start_fetch_types()?;
        let error = runtime
            .start_fetch_types()
            .expect_err("second fetch should be refused");
        assert!(error.to_string().contains("already running"));
        runtime.wait(ActionKind::FetchTypes)?;
        runtime.start_fetch_types()?;
        runtime.wait(ActionKind::FetchTypes)?;
        Ok(())
    }

    #[test]
    fn waiting_on_an_idle_action_fails_fast() {
        let mut runtime = runtime(true);
        assert!(runtime.wait(ActionKind::LoadTimes).is_err());
    }
}
