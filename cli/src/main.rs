use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tfrun_client::{ClientConfig, RunService, TfeClient};
use tfrun_core::{RunController, RunEvent, RunOptions, RunRequest};
use tfrun_observability::{
    default_logs_dir, emit_event, init_process_logging, redact_text, ObservabilityEvent,
};

const LOG_RETENTION_DAYS: u64 = 14;

#[derive(Parser, Debug)]
#[command(name = "tfrun")]
#[command(about = "Trigger workspace runs and wait for them to finish")]
struct Cli {
    /// Directory for the JSONL log files.
    #[arg(long, global = true, env = "TFRUN_LOGS_DIR")]
    logs_dir: Option<PathBuf>,
    /// Print progress events as JSON lines instead of text.
    #[arg(long, global = true, default_value_t = false)]
    json_events: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an apply run and drive it to completion.
    Apply(RunArgs),
    /// Create a destroy run and drive it to completion.
    Destroy(RunArgs),
    /// Print the current status of a run.
    Status { run_id: String },
}

#[derive(Args, Debug, Clone, Default)]
struct RunArgs {
    /// YAML or JSON request file.
    #[arg(long)]
    request: Option<PathBuf>,
    #[arg(long, env = "TFRUN_WORKSPACE")]
    workspace: Option<String>,
    #[arg(long, env = "TFE_ORGANIZATION")]
    organization: Option<String>,
    #[arg(long, default_value_t = false)]
    manual_confirm: bool,
    /// Return as soon as the run is created; the run auto-applies.
    #[arg(long, default_value_t = false)]
    no_wait: bool,
    #[arg(long, default_value_t = false)]
    no_retry: bool,
    #[arg(long)]
    retry_attempts: Option<u32>,
    #[arg(long)]
    message: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let logs_dir = file_logs_dir(&cli);
    let (_log_guard, log_info) = init_process_logging(logs_dir.as_deref(), LOG_RETENTION_DAYS)?;
    emit_event(
        tracing::Level::INFO,
        ObservabilityEvent {
            event: "logging.initialized",
            component: "cli.main",
            status: Some("ok"),
            detail: Some("tfrun logging initialized"),
            ..ObservabilityEvent::default()
        },
    );
    info!("logging initialized: {:?}", log_info);

    let config = ClientConfig::from_env().context("could not load client settings")?;
    info!(
        "using control plane at {} with token {}",
        config.base_url(),
        redact_text(&config.token)
    );
    let client = TfeClient::new(&config).context("could not build HTTP client")?;
    let service: Arc<dyn RunService> = Arc::new(client);

    match cli.command {
        Command::Apply(args) => drive(service, &args, false, cli.json_events).await,
        Command::Destroy(args) => drive(service, &args, true, cli.json_events).await,
        Command::Status { run_id } => {
            let run = service
                .read_run(&run_id)
                .await
                .with_context(|| format!("could not read run {run_id}"))?;
            println!("{}", run.status);
            Ok(())
        }
    }
}

/// Run drives log to JSONL files; a status lookup only writes to the console.
fn file_logs_dir(cli: &Cli) -> Option<PathBuf> {
    match &cli.command {
        Command::Status { .. } => None,
        Command::Apply(_) | Command::Destroy(_) => Some(
            cli.logs_dir
                .clone()
                .unwrap_or_else(|| default_logs_dir(&PathBuf::from("."))),
        ),
    }
}

async fn drive(
    service: Arc<dyn RunService>,
    args: &RunArgs,
    is_destroy: bool,
    json_events: bool,
) -> anyhow::Result<()> {
    let request = build_request(args, is_destroy)?;

    let controller = RunController::new(service);
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, no longer waiting (the run keeps going remotely)");
            interrupt.cancel();
        }
    });
    let printer = tokio::spawn(print_events(controller.events().subscribe(), json_events));

    let result = controller.execute_run(&request, is_destroy, &cancel).await;
    // closing the bus lets the printer drain and exit
    drop(controller);
    let _ = printer.await;

    let verb = if is_destroy { "destroy" } else { "apply" };
    match result.with_context(|| format!("{verb} of workspace {} failed", request.workspace))? {
        Some(run_id) => println!("{run_id}"),
        None => info!("no {verb} block in the request, nothing was run"),
    }
    Ok(())
}

/// Load the request file (if any) and layer command-line flags on top.
///
/// Without a file the selected block is created from defaults. With a file,
/// a missing block stays missing and the invocation is a no-op.
fn build_request(args: &RunArgs, is_destroy: bool) -> anyhow::Result<RunRequest> {
    let mut request = match &args.request {
        Some(path) => RunRequest::load(path)
            .with_context(|| format!("could not load request {}", path.display()))?,
        None => {
            let workspace = args
                .workspace
                .clone()
                .context("--workspace is required without --request")?;
            let organization = args
                .organization
                .clone()
                .context("--organization is required without --request")?;
            let mut request = RunRequest::new(workspace, organization);
            *request.options_mut(is_destroy) = Some(RunOptions::default());
            request
        }
    };

    if let Some(workspace) = &args.workspace {
        request.workspace = workspace.clone();
    }
    if let Some(organization) = &args.organization {
        request.organization = organization.clone();
    }
    if let Some(options) = request.options_mut(is_destroy) {
        apply_flags(options, args);
    }

    request.validate()?;
    Ok(request)
}

fn apply_flags(options: &mut RunOptions, args: &RunArgs) {
    if args.manual_confirm {
        options.manual_confirm = true;
    }
    if args.no_wait {
        options.wait_for_run = false;
    }
    if args.no_retry {
        options.retry = false;
    }
    if let Some(attempts) = args.retry_attempts {
        options.retry_attempts = attempts;
    }
    if let Some(message) = &args.message {
        options.message = Some(message.clone());
    }
}

async fn print_events(mut rx: broadcast::Receiver<RunEvent>, json: bool) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if json {
                    match serde_json::to_string(&event) {
                        Ok(line) => eprintln!("{line}"),
                        Err(err) => warn!("could not encode event: {err}"),
                    }
                } else {
                    eprintln!("{}", describe(&event));
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!("progress output skipped {skipped} event(s)");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn describe(event: &RunEvent) -> String {
    match event {
        RunEvent::RunCreated {
            run_id,
            workspace,
            is_destroy,
            attempt,
        } => {
            let verb = if *is_destroy { "destroy" } else { "apply" };
            if *attempt == 0 {
                format!("created {verb} run {run_id} in {workspace}")
            } else {
                format!("created {verb} run {run_id} in {workspace} (retry {attempt})")
            }
        }
        RunEvent::PhaseStarted { run_id, phase } => format!("{run_id}: waiting on {phase}"),
        RunEvent::Waiting { run_id, status, .. } => format!("{run_id}: {status}"),
        RunEvent::WorkspaceLocked {
            workspace,
            current_run_id,
            ..
        } => format!("workspace {workspace} is locked by run {current_run_id}"),
        RunEvent::QueuedInOrganization {
            run_id,
            organization,
            ahead,
        } => format!("{run_id}: {ahead} run(s) ahead in the {organization} queue"),
        RunEvent::QueuedInWorkspace {
            run_id,
            workspace,
            ahead,
        } => format!("{run_id}: {ahead} run(s) ahead in workspace {workspace}"),
        RunEvent::ApplyConfirmed { run_id } => format!("{run_id}: apply confirmed"),
        RunEvent::RetryScheduled {
            failed_run_id,
            attempt,
            delay_ms,
        } => format!("run {failed_run_id} failed, retry {attempt} in {delay_ms}ms"),
        RunEvent::Completed { run_id, status } => format!("{run_id}: finished ({status})"),
        RunEvent::Failed { reason, .. } => format!("failed: {reason}"),
    }
}
