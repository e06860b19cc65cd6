//! End-to-end execution of a job: resolve, limit, run, classify.
//!
//! A job is an ordered list of stages (before-hooks, the main component,
//! after-hooks) sharing one run context and one redactor. Stages run
//! strictly sequentially and the first non-success outcome aborts the
//! rest; by then every secret seen so far is already registered, so a
//! later stage can never leak an earlier stage's credentials.

use std::fmt;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::builder::BuildParams;
use crate::classify::{classify, OomDetector, StageOutcome};
use crate::component::{
    ComponentDefinition, FEATURE_CONTAINER_ROOT_USER, FEATURE_INJECT_ENVIRONMENT, FEATURE_NO_SWAP,
};
use crate::engine;
use crate::environment::{build_environment, inject_parameters, RunContext};
use crate::error::ExecutionError;
use crate::invocation::{
    inspect_command, remove_command, RunCommandOptions, RunInvocationBuilder, SANDBOX_USER,
};
use crate::limits::{
    compute_limits, detect_block_devices, InstancePolicy, ProjectFeatures, ProjectPolicy,
};
use crate::process::ProcessRunner;
use crate::redactor::OutputRedactor;
use crate::resolver::ImageResolver;

/// Position of a stage within the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Before,
    Main,
    After,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StageKind::Before => "before",
            StageKind::Main => "main",
            StageKind::After => "after",
        })
    }
}

/// One component to run, with its configuration and per-run overrides.
#[derive(Debug, Clone)]
pub struct StageSpec {
    pub component: ComponentDefinition,
    /// Full stage configuration; `parameters` within it feeds builds and
    /// environment injection, secret values feed the redactor.
    pub config: Value,
    /// Runtime overrides: build parameter values, `network`, etc.
    pub runtime: Map<String, Value>,
}

/// A complete job handed over by the queue.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub before: Vec<StageSpec>,
    pub main: StageSpec,
    pub after: Vec<StageSpec>,
    pub context: RunContext,
    /// Host directory mounted at `/data`.
    pub data_dir: String,
    /// Host directory mounted at `/tmp`.
    pub tmp_dir: String,
    /// Container size tier under the dynamic backend.
    pub tier: Option<String>,
}

/// Record of one finished stage.
#[derive(Debug, Clone)]
pub struct StageReport {
    pub kind: StageKind,
    pub component_id: String,
    pub container_name: String,
    pub outcome: StageOutcome,
    pub duration: Duration,
}

/// Record of a whole job. Present only when every stage succeeded;
/// failures surface as [`ExecutionError`] instead.
#[derive(Debug, Clone, Default)]
pub struct JobReport {
    pub stages: Vec<StageReport>,
}

/// Runs jobs on this worker instance.
#[derive(Debug, Clone)]
pub struct ExecutionOrchestrator {
    resolver: ImageResolver,
    instance: InstancePolicy,
    project: ProjectPolicy,
    features: ProjectFeatures,
    oom_detector: OomDetector,
}

impl ExecutionOrchestrator {
    pub fn new(
        resolver: ImageResolver,
        instance: InstancePolicy,
        project: ProjectPolicy,
        features: ProjectFeatures,
    ) -> Self {
        Self {
            resolver,
            instance,
            project,
            features,
            oom_detector: OomDetector::default(),
        }
    }

    pub fn with_oom_detector(mut self, detector: OomDetector) -> Self {
        self.oom_detector = detector;
        self
    }

    /// Executes the job's stages in order. The first non-success outcome
    /// aborts the job and is returned as the error.
    pub async fn execute(&self, job: &JobRequest) -> Result<JobReport, ExecutionError> {
        let mut redactor = OutputRedactor::new();
        let mut report = JobReport::default();

        let stages = job
            .before
            .iter()
            .map(|s| (StageKind::Before, s))
            .chain(std::iter::once((StageKind::Main, &job.main)))
            .chain(job.after.iter().map(|s| (StageKind::After, s)));

        for (kind, stage) in stages {
            info!(
                stage = %kind,
                component = %stage.component.id,
                "Starting stage"
            );
            let stage_report = self.run_stage(kind, stage, job, &mut redactor).await?;
            if !stage_report.outcome.is_success() {
                warn!(
                    stage = %kind,
                    component = %stage_report.component_id,
                    "Stage failed, aborting job"
                );
                return Err(stage_report.outcome.into_execution_error());
            }
            report.stages.push(stage_report);
        }

        Ok(report)
    }

    async fn run_stage(
        &self,
        kind: StageKind,
        stage: &StageSpec,
        job: &JobRequest,
        redactor: &mut OutputRedactor,
    ) -> Result<StageReport, ExecutionError> {
        let component = &stage.component;
        register_stage_secrets(redactor, stage);

        let params = BuildParams {
            parameters: stage
                .config
                .get("parameters")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            runtime: stage.runtime.clone(),
        };
        let image = self.resolver.resolve(component, &params).await?;

        let mut features = self.features;
        features.no_swap |= component.has_feature(FEATURE_NO_SWAP);
        let runtime_network = stage.runtime.get("network").and_then(Value::as_str);
        let limits = compute_limits(
            component,
            &self.instance,
            &self.project,
            &features,
            job.tier.as_deref(),
            runtime_network,
            detect_block_devices(),
        )?;

        let mut env = build_environment(&job.context, &job.data_dir);
        if component.has_feature(FEATURE_INJECT_ENVIRONMENT) {
            if let Some(parameters) = stage.config.get("parameters") {
                inject_parameters(&mut env, parameters, redactor);
            }
        }

        let container_name = container_name(&component.id);
        let user = if component.has_feature(FEATURE_CONTAINER_ROOT_USER) {
            None
        } else {
            Some(SANDBOX_USER.to_string())
        };
        let options = RunCommandOptions {
            name: container_name.clone(),
            env,
            labels: vec![
                format!("com.keboola.runner.jobId={}", job.context.run_id),
                format!("com.keboola.runner.projectId={}", job.context.project_id),
            ],
            user,
        };

        let command = RunInvocationBuilder::new(&image, &limits, &options, component.process_timeout)
            .build_run_command(&job.data_dir, &job.tmp_dir);

        debug!(container = %container_name, image = %image.reference, "Running container");
        let runner = ProcessRunner::new(Duration::from_secs(component.process_timeout));
        let run_result = runner.run(&command, redactor).await;

        let engine_oom = engine_reported_oom(&container_name).await;
        cleanup_container(&container_name).await;

        let outcome = run_result?;
        let duration = outcome.duration;
        let classified = classify(
            &outcome,
            component.process_timeout,
            &self.oom_detector,
            engine_oom,
        );

        Ok(StageReport {
            kind,
            component_id: component.id.clone(),
            container_name,
            outcome: classified,
            duration,
        })
    }
}

/// Registers every `#`-prefixed secret from the stage's config payload
/// and its runtime overrides. Runs before any command is executed, so a
/// `#password` build override never reaches output unmasked.
fn register_stage_secrets(redactor: &mut OutputRedactor, stage: &StageSpec) {
    redactor.register_from_config(&stage.config);
    redactor.register_from_config(&Value::Object(stage.runtime.clone()));
}

/// Unique container name: sanitized component id plus a UUID.
fn container_name(component_id: &str) -> String {
    let sanitized: String = component_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!("{sanitized}-{}", Uuid::new_v4())
}

/// Asks the engine whether the container was memory-killed. Best effort;
/// the output-signature fallback covers an unreachable engine.
async fn engine_reported_oom(container: &str) -> bool {
    let command = format!(
        "{} --format '{{{{.State.OOMKilled}}}}'",
        inspect_command(container)
    );
    match engine::run_shell(&command).await {
        Ok(output) if output.status.success() => {
            String::from_utf8_lossy(&output.stdout).trim() == "true"
        }
        _ => false,
    }
}

async fn cleanup_container(container: &str) {
    match engine::run_shell(&remove_command(container)).await {
        Ok(output) if output.status.success() => {
            debug!(container, "Container removed");
        }
        Ok(output) => {
            debug!(
                container,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Container removal failed"
            );
        }
        Err(err) => {
            debug!(container, error = %err, "Container removal failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_runtime_secrets_feed_the_redactor() {
        let stage = StageSpec {
            component: serde_json::from_value(json!({
                "id": "acme.custom",
                "type": "builder",
                "uri": "php",
                "tag": "8.2"
            }))
            .unwrap(),
            config: json!({"parameters": {"#token": "tok-1"}}),
            runtime: json!({"#password": "gitpass", "version": "1.0"})
                .as_object()
                .unwrap()
                .clone(),
        };

        let mut redactor = OutputRedactor::new();
        register_stage_secrets(&mut redactor, &stage);
        assert_eq!(
            redactor.redact("cloning as robot:gitpass with tok-1"),
            "cloning as robot:[hidden] with [hidden]"
        );
    }

    #[test]
    fn test_container_name_is_sanitized_and_unique() {
        let a = container_name("acme.csv-extractor");
        let b = container_name("acme.csv-extractor");
        assert!(a.starts_with("acme-csv-extractor-"));
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_stage_kind_display() {
        assert_eq!(StageKind::Before.to_string(), "before");
        assert_eq!(StageKind::Main.to_string(), "main");
        assert_eq!(StageKind::After.to_string(), "after");
    }
}
