use std::sync::Mutex;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::step::StepName;

/// Installs the global `tracing` subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sciensaurus=debug,sqlx=warn,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Started,
    Attempt,
    Skipped,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineEvent {
    pub stage: StepName,
    pub kind: EventKind,
    pub detail: String,
}

impl PipelineEvent {
    pub fn new(stage: StepName, kind: EventKind, detail: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            detail: detail.into(),
        }
    }
}

/// Sink for structured pipeline events, handed to every stage.
pub trait Tracer: Send + Sync {
    fn emit(&self, event: PipelineEvent);

    fn started(&self, stage: StepName, detail: &str) {
        self.emit(PipelineEvent::new(stage, EventKind::Started, detail));
    }

    fn attempt(&self, stage: StepName, detail: &str) {
        self.emit(PipelineEvent::new(stage, EventKind::Attempt, detail));
    }

    fn skipped(&self, stage: StepName, detail: &str) {
        self.emit(PipelineEvent::new(stage, EventKind::Skipped, detail));
    }

    fn completed(&self, stage: StepName, detail: &str) {
        self.emit(PipelineEvent::new(stage, EventKind::Completed, detail));
    }

    fn failed(&self, stage: StepName, detail: &str) {
        self.emit(PipelineEvent::new(stage, EventKind::Failed, detail));
    }
}

/// Forwards events to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTracer;

impl Tracer for TracingTracer {
    fn emit(&self, event: PipelineEvent) {
        let stage = event.stage.as_str();
        match event.kind {
            EventKind::Failed => tracing::warn!(stage, detail = %event.detail, "stage failed"),
            EventKind::Skipped => tracing::debug!(stage, detail = %event.detail, "skipped"),
            EventKind::Attempt => tracing::debug!(stage, detail = %event.detail, "attempt"),
            EventKind::Started => tracing::info!(stage, detail = %event.detail, "stage started"),
            EventKind::Completed => tracing::info!(stage, detail = %event.detail, "stage completed"),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingTracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn events_of(&self, kind: EventKind) -> Vec<PipelineEvent> {
        self.events().into_iter().filter(|e| e.kind == kind).collect()
    }
}

impl Tracer for RecordingTracer {
    fn emit(&self, event: PipelineEvent) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event);
    }
}
