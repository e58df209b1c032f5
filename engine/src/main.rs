use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use crew_adapter::{SubprocessAdapter, TeammateAdapter, TemplateAdapter};
use crew_provider::{DecisionProvider, MockDecisionProvider};
use crew_scheduler::RunConfig;
use crew_state::StateStore;
use crew_types::Task;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "crew-engine")]
#[command(about = "Headless multi-agent task orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bootstrap the task board (optionally from a compiled openspec change)
    /// and drive the scheduler's round loop to completion or a stop condition.
    Run(RunArgs),
    /// Compile a change document's `tasks.md` (plus any YAML override) into a
    /// validated task configuration.
    CompileOpenspec(CompileArgs),
    /// Print a reference task-document template in the requested language.
    PrintOpenspecTemplate(TemplateArgs),
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// JSON or YAML file layering RunConfig fields over the built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Compile and bootstrap tasks from `<openspec-root>/changes/<id>/tasks.md`.
    #[arg(long)]
    openspec_change: Option<String>,
    #[arg(long, default_value = "openspec")]
    openspec_root: PathBuf,
    #[arg(long, default_value = "openspec/overrides")]
    overrides_root: PathBuf,
    #[arg(long)]
    state_dir: Option<String>,
    #[arg(long)]
    lead_id: Option<String>,
    /// Repeatable; sets the teammate roster explicitly.
    #[arg(long = "teammate")]
    teammates: Vec<String>,
    #[arg(long)]
    max_rounds: Option<u64>,
    #[arg(long)]
    max_idle_rounds: Option<u64>,
    #[arg(long)]
    max_idle_seconds: Option<u64>,
    #[arg(long)]
    no_progress_event_interval: Option<u64>,
    #[arg(long)]
    tick_seconds: Option<f64>,
    #[arg(long, default_value = "mock")]
    provider: String,
    #[arg(long, default_value_t = false)]
    human_approval: bool,
    /// Resume an existing state directory instead of replacing its tasks.
    #[arg(long, default_value_t = false)]
    resume: bool,
    /// On resume, leave tasks the previous run left `in_progress` as-is
    /// instead of requeuing them to `pending`.
    #[arg(long, default_value_t = false)]
    no_resume_requeue_in_progress: bool,
    /// `template` (inert, for dry runs) or `subprocess` (spawns real workers).
    #[arg(long, default_value = "template")]
    adapter: String,
    #[arg(long)]
    plan_command: Option<String>,
    #[arg(long)]
    execute_command: Option<String>,
    #[arg(long, default_value_t = 120)]
    adapter_timeout_seconds: u64,
}

#[derive(clap::Args, Debug)]
struct CompileArgs {
    #[arg(long)]
    change_id: String,
    #[arg(long, default_value = "openspec")]
    openspec_root: PathBuf,
    #[arg(long, default_value = "openspec/overrides")]
    overrides_root: PathBuf,
    #[arg(long = "teammate")]
    teammates: Vec<String>,
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct TemplateArgs {
    #[arg(long, default_value = crew_compiler::template::DEFAULT_TEMPLATE_LANG)]
    lang: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let result = match &cli.command {
        Command::Run(args) => run_command(args).await.map_err(|e| tag_error("run error", e)),
        Command::CompileOpenspec(args) => {
            compile_command(args).map_err(|e| tag_error("openspec compile error", e))
        }
        Command::PrintOpenspecTemplate(args) => {
            template_command(args).map_err(|e| tag_error("openspec template error", e))
        }
    };

    if let Err(err) = result {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn tag_error(tag: &str, err: anyhow::Error) -> anyhow::Error {
    anyhow::anyhow!("{tag}: {err:#}")
}

fn resolve_state_dir(flag: Option<String>) -> PathBuf {
    if let Some(dir) = flag {
        return PathBuf::from(dir);
    }
    if let Ok(dir) = std::env::var("ORCHESTRATOR_STATE_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    PathBuf::from(".crew")
}

fn compiled_task_to_task(compiled: crew_compiler::CompiledTask) -> Task {
    let mut task = Task::new(compiled.id, compiled.title, compiled.requires_plan);
    task.description = compiled.description;
    task.target_paths = compiled.target_paths;
    task.depends_on = compiled.depends_on.into_iter().collect();
    task.persona_policy = compiled.persona_policy;
    task
}

async fn run_command(args: &RunArgs) -> anyhow::Result<()> {
    let run_id = uuid::Uuid::new_v4();
    let state_dir = resolve_state_dir(args.state_dir.clone());
    info!(run_id = %run_id, state_dir = %state_dir.display(), "starting crew-engine run");

    let mut config = match &args.config {
        Some(path) => RunConfig::load_file(path).with_context(|| format!("loading --config {}", path.display()))?,
        None => RunConfig::default(),
    };

    if let Some(lead_id) = &args.lead_id {
        config.lead_id = lead_id.clone();
    }
    if !args.teammates.is_empty() {
        config.teammate_ids = Some(args.teammates.clone());
    }
    if let Some(v) = args.max_rounds {
        config.max_rounds = v;
    }
    if let Some(v) = args.max_idle_rounds {
        config.max_idle_rounds = v;
    }
    if let Some(v) = args.max_idle_seconds {
        config.max_idle_seconds = v;
    }
    if let Some(v) = args.no_progress_event_interval {
        config.no_progress_event_interval = v;
    }
    if let Some(v) = args.tick_seconds {
        config.tick_seconds = v;
    }
    if args.human_approval {
        config.human_approval = Some(true);
    }

    let store = StateStore::new(&state_dir).context("opening state directory")?;

    if let Some(change_id) = &args.openspec_change {
        let teammates = if args.teammates.is_empty() { None } else { Some(args.teammates.clone()) };
        let compiled = crew_compiler::compile_change_to_config(
            change_id,
            &args.openspec_root,
            &args.overrides_root,
            teammates,
        )
        .with_context(|| format!("compiling openspec change {change_id}"))?;

        if config.teammate_ids.is_none() {
            config.teammate_ids = Some(compiled.teammates.clone());
        }
        if config.personas.is_none() {
            config.personas = compiled.personas.clone();
        }
        if config.persona_defaults.is_none() {
            config.persona_defaults = compiled.persona_defaults.clone();
        }

        let tasks: Vec<Task> = compiled.tasks.into_iter().map(compiled_task_to_task).collect();
        store
            .bootstrap_tasks(tasks, !args.resume)
            .context("bootstrapping compiled tasks into the state store")?;
    }

    if args.resume && !args.no_resume_requeue_in_progress {
        let requeued = store.requeue_in_progress_tasks().context("requeuing in-progress tasks on resume")?;
        if !requeued.is_empty() {
            info!(tasks = %requeued.join(","), "requeued in-progress tasks from a previous run");
        }
    }

    let adapter: Arc<dyn TeammateAdapter> = match args.adapter.as_str() {
        "template" => Arc::new(TemplateAdapter::default()),
        "subprocess" => {
            let plan_command = shell_words(
                args.plan_command.as_deref().context("--plan-command is required for the subprocess adapter")?,
            );
            let execute_command = shell_words(
                args.execute_command.as_deref().context("--execute-command is required for the subprocess adapter")?,
            );
            let mut subprocess = SubprocessAdapter::new(plan_command, execute_command);
            subprocess.timeout_seconds = args.adapter_timeout_seconds;
            subprocess.stream_stderr_to_parent =
                std::env::var("TEAMMATE_STREAM_LOGS").map(|v| v.trim() != "0").unwrap_or(true);
            Arc::new(subprocess)
        }
        other => anyhow::bail!("unknown adapter: {other} (expected template or subprocess)"),
    };

    let provider: Arc<dyn DecisionProvider> = match args.provider.as_str() {
        "mock" => Arc::new(MockDecisionProvider),
        other => anyhow::bail!("unknown provider: {other} (only mock is built in)"),
    };

    let outcome = crew_scheduler::run(store, adapter, provider, config).await.context("scheduler run failed")?;
    let rendered = serde_json::to_string_pretty(&outcome).context("serializing run result")?;
    println!("{rendered}");
    Ok(())
}

fn shell_words(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

fn compile_command(args: &CompileArgs) -> anyhow::Result<()> {
    let teammates = if args.teammates.is_empty() { None } else { Some(args.teammates.clone()) };
    let compiled = crew_compiler::compile_change_to_config(
        &args.change_id,
        &args.openspec_root,
        &args.overrides_root,
        teammates,
    )
    .with_context(|| format!("compiling change {}", args.change_id))?;

    let output_path = args
        .output
        .clone()
        .unwrap_or_else(|| crew_compiler::default_compiled_output_path(&args.change_id, &args.openspec_root));
    let written = crew_compiler::write_compiled_config(&compiled, &output_path)
        .with_context(|| format!("writing compiled config to {}", output_path.display()))?;
    println!("{}", written.display());
    Ok(())
}

fn template_command(args: &TemplateArgs) -> anyhow::Result<()> {
    let text = crew_compiler::get_openspec_tasks_template(&args.lang)
        .with_context(|| format!("rendering template for lang {}", args.lang))?;
    println!("{text}");
    Ok(())
}
