//! Run DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::domain::log::LogEntry;
use crate::domain::pipeline::{PipelineKind, RunState};
use crate::domain::properties::BuildProperties;
use crate::domain::step::StepResult;
use crate::error::Result;

/// Request to start one pipeline run on a builder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub pipeline: PipelineKind,
    /// Builder name; package runs use the target environment's builder
    pub builder: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// The tarball run that fanned this run out, if any
    #[serde(default)]
    pub parent: Option<Uuid>,
    #[serde(default = "Utc::now")]
    pub requested_at: DateTime<Utc>,
}

impl RunRequest {
    pub fn new(
        pipeline: PipelineKind,
        builder: impl Into<String>,
        properties: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            pipeline,
            builder: builder.into(),
            properties,
            parent: None,
            requested_at: Utc::now(),
        }
    }

    pub fn with_parent(mut self, parent: Uuid) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Parses the string properties into a typed record
    pub fn build_properties(&self) -> Result<BuildProperties> {
        BuildProperties::from_pairs(&self.properties)
    }
}

/// Outcome of one step within a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub name: String,
    pub result: StepResult,
    /// Whether status displays should omit this step
    pub hidden: bool,
    /// The rendered command, for shell steps that ran
    pub command: Option<Vec<String>>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Final record of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub parent: Option<Uuid>,
    pub builder: String,
    pub pipeline: PipelineKind,
    pub result: StepResult,
    pub state: RunState,
    pub steps: Vec<StepReport>,
    /// Properties as they stood when the run finished
    pub properties: BTreeMap<String, String>,
    pub logs: Vec<LogEntry>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl RunReport {
    /// Steps shown in status displays
    pub fn visible_steps(&self) -> impl Iterator<Item = &StepReport> {
        self.steps.iter().filter(|step| !step.hidden)
    }

    pub fn succeeded(&self) -> bool {
        !self.result.is_failure()
    }

    pub fn step(&self, name: &str) -> Option<&StepReport> {
        self.steps.iter().find(|step| step.name == name)
    }
}
