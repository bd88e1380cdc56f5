//! `containerize-and-deploy` — thin CLI adapter around the orchestrator
//! core. Builds a `WorkflowArgs` from flags (or a JSON object on stdin),
//! runs the full decorator stack (events, saga, adaptive) over
//! `BaseOrchestrator`, and prints the resulting `WorkflowResult` as JSON.
//!
//! The ten pipeline steps themselves (git clone, Docker build, kubectl
//! apply, ...) are external collaborators the core only depends on through
//! the `Step`/`StepProvider` traits; this binary wires up a simulated
//! provider so the pipeline is runnable standalone, and is the seam a host
//! would replace with real step bodies.

use std::io::{IsTerminal, Read};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

use orchestrator_core::adaptation::AdaptationEngine;
use orchestrator_core::{
    BaseOrchestrator, EventBus, KeywordErrorPatternRecognizer, NoopMetricsCollector,
    Orchestrator, OrchestratorConfig, OrchestratorError, SagaConfig, SagaCoordinator, StdoutProgressSink, Step,
    StepContext, StepProvider, TracingTracer, WithAdaptive, WithEvents, WithSaga, WorkflowArgs, WorkflowResult,
    WorkflowState,
};

#[derive(Parser, Debug)]
#[command(name = "containerize-and-deploy")]
#[command(about = "Run the containerize-and-deploy pipeline")]
#[command(version)]
struct Cli {
    /// Git URL to clone. Either this or --repo-path must be set.
    #[arg(long)]
    repo_url: Option<String>,

    /// Local path already on disk. Either this or --repo-url must be set.
    #[arg(long)]
    repo_path: Option<String>,

    /// Branch to check out; defaults to the remote's default branch.
    #[arg(long)]
    branch: Option<String>,

    /// Run the vulnerability scan step.
    #[arg(long)]
    scan: bool,

    /// Force deploy regardless of the auto-detect heuristic.
    #[arg(long, conflicts_with = "skip_deploy")]
    force_deploy: bool,

    /// Skip the deploy step entirely.
    #[arg(long)]
    skip_deploy: bool,

    /// Treat soft failures (e.g. a failed scan) as terminal.
    #[arg(long)]
    strict_mode: bool,

    /// Skip external Docker/Kubernetes calls; steps simulate success.
    #[arg(long)]
    test_mode: bool,

    /// Read a `WorkflowArgs` JSON object from stdin instead of flags.
    #[arg(long)]
    json_stdin: bool,

    /// Verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn into_args(self) -> Result<WorkflowArgs> {
        if self.json_stdin {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading WorkflowArgs JSON from stdin")?;
            return serde_json::from_str(&buf).context("parsing WorkflowArgs JSON");
        }

        let deploy = if self.force_deploy {
            orchestrator_core::DeployMode::Force
        } else if self.skip_deploy {
            orchestrator_core::DeployMode::Skip
        } else {
            orchestrator_core::DeployMode::Auto
        };

        Ok(WorkflowArgs {
            repo_url: self.repo_url.unwrap_or_default(),
            repo_path: self.repo_path.unwrap_or_default(),
            branch: self.branch,
            scan: self.scan,
            deploy,
            strict_mode: self.strict_mode,
            test_mode: self.test_mode,
            user_id: None,
            middleware_adjustment: None,
        })
    }
}

/// A step that simulates its side effect instead of calling out to Docker,
/// a registry, or a cluster. Every concrete pipeline step this binary ships
/// with behaves this way; a host wiring in real step bodies would implement
/// `Step` against its own Docker/K8s clients and feed a different
/// `StepProvider` to `build_orchestrator`.
struct SimulatedStep {
    name: &'static str,
    max_retries: u32,
    compensatable: bool,
}

impl SimulatedStep {
    fn new(name: &'static str, max_retries: u32, compensatable: bool) -> Arc<dyn Step> {
        Arc::new(Self {
            name,
            max_retries,
            compensatable,
        })
    }
}

#[async_trait]
impl Step for SimulatedStep {
    fn name(&self) -> &str {
        self.name
    }

    async fn execute(&self, state: &mut WorkflowState, _ctx: &StepContext) -> Result<(), OrchestratorError> {
        match self.name {
            "analyze" => state.outputs.analyze_result = Some("detected: rust/cargo project".to_string()),
            "dockerfile" => state.outputs.dockerfile_result = Some("FROM rust:1 AS build\n...".to_string()),
            "build" => {
                let repo = state.args.repo_identifier();
                state.outputs.build_result = Some(format!("{repo}:{}", state.workflow_id));
            }
            "scan" => {
                state.outputs.scan_report = Some(std::collections::HashMap::from([(
                    "critical".to_string(),
                    serde_json::json!(0),
                )]));
            }
            "deploy" => {
                state.result.namespace = Some(format!("ns-{}", state.args.repo_identifier()));
                state.outputs.k8s_result = Some(format!("https://{}.svc.cluster.local", state.args.repo_identifier()));
            }
            _ => {}
        }
        Ok(())
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn can_compensate(&self) -> bool {
        self.compensatable
    }

    async fn compensate(&self, result: &WorkflowResult) -> Result<(), OrchestratorError> {
        if let Some(image) = result.image_ref.as_deref() {
            tracing::info!(step = self.name, image, "compensating simulated step");
        }
        Ok(())
    }
}

struct SimulatedStepProvider;

impl StepProvider for SimulatedStepProvider {
    fn get_analyze_step(&self) -> Arc<dyn Step> {
        SimulatedStep::new("analyze", 0, false)
    }
    fn get_dockerfile_step(&self) -> Arc<dyn Step> {
        SimulatedStep::new("dockerfile", 1, false)
    }
    fn get_build_step(&self) -> Arc<dyn Step> {
        SimulatedStep::new("build", 2, true)
    }
    fn get_scan_step(&self) -> Arc<dyn Step> {
        SimulatedStep::new("scan", 1, false)
    }
    fn get_tag_step(&self) -> Arc<dyn Step> {
        SimulatedStep::new("tag", 0, false)
    }
    fn get_push_step(&self) -> Arc<dyn Step> {
        SimulatedStep::new("push", 3, true)
    }
    fn get_manifests_step(&self) -> Arc<dyn Step> {
        SimulatedStep::new("manifests", 0, false)
    }
    fn get_cluster_setup_step(&self) -> Arc<dyn Step> {
        SimulatedStep::new("cluster_setup", 1, false)
    }
    fn get_deploy_step(&self) -> Arc<dyn Step> {
        SimulatedStep::new("deploy", 2, true)
    }
    fn get_verify_step(&self) -> Arc<dyn Step> {
        SimulatedStep::new("verify", 1, false)
    }
}

fn build_orchestrator() -> Arc<dyn Orchestrator> {
    let step_provider: Arc<dyn StepProvider> = Arc::new(SimulatedStepProvider);
    let config = Arc::new(OrchestratorConfig::from_env());

    let base: Arc<dyn Orchestrator> = Arc::new(BaseOrchestrator::new(
        step_provider.clone(),
        config.clone(),
        Arc::new(TracingTracer),
        Arc::new(NoopMetricsCollector),
        Arc::new(KeywordErrorPatternRecognizer),
        Arc::new(StdoutProgressSink),
    ));

    let with_saga: Arc<dyn Orchestrator> = Arc::new(WithSaga::new(
        base,
        step_provider,
        Arc::new(SagaCoordinator::new(SagaConfig::default())),
    ));

    let with_adaptive: Arc<dyn Orchestrator> =
        Arc::new(WithAdaptive::new(with_saga, Arc::new(AdaptationEngine::new(config.adaptation.clone()))));

    Arc::new(WithEvents::new(with_adaptive, EventBus::new()))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(std::io::stdout().is_terminal())
        .init();

    let args = match cli.into_args().and_then(|args| args.validate().map(|_| args).map_err(Into::into)) {
        Ok(args) => args,
        Err(error) => {
            eprintln!("invalid arguments: {error:#}");
            return ExitCode::FAILURE;
        }
    };

    info!(repo = %args.repo_identifier(), "starting containerize-and-deploy run");

    let orchestrator = build_orchestrator();
    let result = orchestrator.run(args, CancellationToken::new()).await;

    match serde_json::to_string_pretty(&result) {
        Ok(json) => println!("{json}"),
        Err(error) => eprintln!("failed to serialize workflow result: {error}"),
    }

    if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
