use anyhow::Result;
use clap::{Parser, Subcommand};
use codeframe::cmd;
use codeframe::errors::exit_code_for;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "codeframe")]
#[command(version, about = "Autonomous coding agent platform")]
pub struct Cli {
    /// Target repository (defaults to the current directory)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a workspace under <path>
    Init { path: PathBuf },
    /// Show task counts and open blockers
    Status,
    /// Show progress and token usage
    Summary,
    /// Environment configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Product requirements documents
    Prd {
        #[command(subcommand)]
        command: PrdCommands,
    },
    /// Task management
    Tasks {
        #[command(subcommand)]
        command: TasksCommands,
    },
    /// Run agent work
    Work {
        #[command(subcommand)]
        command: WorkCommands,
    },
    /// Event log
    Events {
        #[command(subcommand)]
        command: EventsCommands,
    },
    /// Agent questions awaiting answers
    Blocker {
        #[command(subcommand)]
        command: BlockerCommands,
    },
    /// Run all verification gates
    Review,
    /// Alias for review
    Gates {
        #[command(subcommand)]
        command: GatesCommands,
    },
    /// Export working-tree changes
    Patch {
        #[command(subcommand)]
        command: PatchCommands,
    },
    /// Commit working-tree changes
    Commit {
        #[command(subcommand)]
        command: CommitCommands,
    },
    /// Workspace snapshots
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Write a fresh config.yaml
    Init {
        /// Inspect the repository to infer settings
        #[arg(long)]
        detect: bool,
        #[arg(long)]
        force: bool,
    },
    Show,
    Set { key: String, value: String },
}

#[derive(Subcommand)]
pub enum PrdCommands {
    /// Store a PRD file
    Add { file: PathBuf },
    /// Print a PRD (latest when no id given)
    Show { id: Option<String> },
    /// Generate a PRD from a product description on stdin
    Generate,
    /// Revise a PRD with feedback from stdin
    Refine { id: String },
    List,
    Delete { id: String },
    Export { id: String, path: PathBuf },
    Versions { id: String },
    Diff { id: String, v1: i64, v2: i64 },
    /// Replace content with stdin as a new version
    Update { id: String },
}

#[derive(Subcommand)]
pub enum TasksCommands {
    /// Decompose the latest PRD into tasks
    Generate,
    List {
        #[arg(long)]
        status: Option<String>,
    },
    Set {
        #[command(subcommand)]
        command: TasksSetCommands,
    },
    Get {
        #[command(subcommand)]
        command: TasksGetCommands,
    },
}

#[derive(Subcommand)]
pub enum TasksSetCommands {
    /// Move task(s) to a status
    Status {
        status: String,
        id: Option<String>,
        #[arg(long)]
        all: bool,
    },
}

#[derive(Subcommand)]
pub enum TasksGetCommands {
    Status { id: String },
}

#[derive(Subcommand)]
pub enum WorkCommands {
    /// Execute one task
    Start {
        id: String,
        #[arg(long, default_value = "react")]
        engine: String,
    },
    /// Request cooperative cancellation
    Stop { id: String },
    /// Resume a task whose blockers were answered
    Resume {
        id: String,
        #[arg(long, default_value = "react")]
        engine: String,
    },
    /// Stream a task's events until it finishes
    Follow { id: String },
    Batch {
        #[command(subcommand)]
        command: BatchCommands,
    },
}

#[derive(Subcommand)]
pub enum BatchCommands {
    /// Run a group of tasks
    Run {
        /// Task ids or numbers
        ids: Vec<String>,
        /// Every READY task in the workspace
        #[arg(long)]
        all_ready: bool,
        #[arg(long, default_value = "parallel")]
        strategy: String,
        #[arg(long, default_value_t = 4)]
        max_parallel: usize,
        #[arg(long, default_value = "continue")]
        on_failure: String,
        #[arg(long, default_value_t = 0)]
        retry: u32,
        /// Show the execution waves without running
        #[arg(long)]
        dry_run: bool,
    },
    Status { id: Option<String> },
    Cancel { id: String },
    Resume {
        id: String,
        /// Re-run every task, not just failed/blocked ones
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
pub enum EventsCommands {
    /// Print recent events (and keep following with -f)
    Tail {
        #[arg(short, long)]
        follow: bool,
    },
}

#[derive(Subcommand)]
pub enum BlockerCommands {
    List,
    Answer { id: String, text: String },
    Resolve { id: String },
}

#[derive(Subcommand)]
pub enum GatesCommands {
    Run,
}

#[derive(Subcommand)]
pub enum PatchCommands {
    Export {
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum CommitCommands {
    Create {
        #[arg(short, long)]
        message: String,
    },
}

#[derive(Subcommand)]
pub enum CheckpointCommands {
    Create { label: String },
    List,
    Restore { id: String },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let project_dir = match &cli.project_dir {
        Some(dir) => dir.clone(),
        None => match std::env::current_dir() {
            Ok(dir) => dir,
            Err(e) => {
                eprintln!("error: cannot determine current directory: {e}");
                std::process::exit(1);
            }
        },
    };
    let _log_guard = codeframe::workspace::init_file_logging(&project_dir);

    if let Err(e) = dispatch(cli, &project_dir).await {
        eprintln!("{} {e:#}", console::style("error:").red().bold());
        std::process::exit(exit_code_for(&e));
    }
}

async fn dispatch(cli: Cli, dir: &std::path::Path) -> Result<()> {
    match cli.command {
        Commands::Init { path } => cmd::workspace::cmd_init(&path),
        Commands::Status => cmd::workspace::cmd_status(dir),
        Commands::Summary => cmd::workspace::cmd_summary(dir),

        Commands::Config { command } => match command {
            ConfigCommands::Init { detect, force } => cmd::config::cmd_config_init(dir, detect, force),
            ConfigCommands::Show => cmd::config::cmd_config_show(dir),
            ConfigCommands::Set { key, value } => cmd::config::cmd_config_set(dir, &key, &value),
        },

        Commands::Prd { command } => match command {
            PrdCommands::Add { file } => cmd::prd::cmd_prd_add(dir, &file),
            PrdCommands::Show { id } => cmd::prd::cmd_prd_show(dir, id.as_deref()),
            PrdCommands::Generate => cmd::prd::cmd_prd_generate(dir).await,
            PrdCommands::Refine { id } => cmd::prd::cmd_prd_refine(dir, &id).await,
            PrdCommands::List => cmd::prd::cmd_prd_list(dir),
            PrdCommands::Delete { id } => cmd::prd::cmd_prd_delete(dir, &id),
            PrdCommands::Export { id, path } => cmd::prd::cmd_prd_export(dir, &id, &path),
            PrdCommands::Versions { id } => cmd::prd::cmd_prd_versions(dir, &id),
            PrdCommands::Diff { id, v1, v2 } => cmd::prd::cmd_prd_diff(dir, &id, v1, v2),
            PrdCommands::Update { id } => cmd::prd::cmd_prd_update(dir, &id),
        },

        Commands::Tasks { command } => match command {
            TasksCommands::Generate => cmd::tasks::cmd_tasks_generate(dir).await,
            TasksCommands::List { status } => cmd::tasks::cmd_tasks_list(dir, status.as_deref()),
            TasksCommands::Set { command } => match command {
                TasksSetCommands::Status { status, id, all } => {
                    if !all && id.is_none() {
                        anyhow::bail!("provide a task id or --all");
                    }
                    cmd::tasks::cmd_tasks_set_status(dir, &status, id.as_deref(), all)
                }
            },
            TasksCommands::Get { command } => match command {
                TasksGetCommands::Status { id } => cmd::tasks::cmd_tasks_get_status(dir, &id),
            },
        },

        Commands::Work { command } => match command {
            WorkCommands::Start { id, engine } => cmd::work::cmd_work_start(dir, &id, &engine).await,
            WorkCommands::Stop { id } => cmd::work::cmd_work_stop(dir, &id),
            WorkCommands::Resume { id, engine } => cmd::work::cmd_work_resume(dir, &id, &engine).await,
            WorkCommands::Follow { id } => cmd::work::cmd_work_follow(dir, &id).await,
            WorkCommands::Batch { command } => match command {
                BatchCommands::Run {
                    ids,
                    all_ready,
                    strategy,
                    max_parallel,
                    on_failure,
                    retry,
                    dry_run,
                } => {
                    if !all_ready && ids.is_empty() {
                        anyhow::bail!("provide task ids or --all-ready");
                    }
                    cmd::work::cmd_batch_run(
                        dir, &ids, all_ready, &strategy, max_parallel, &on_failure, retry, dry_run,
                    )
                    .await
                }
                BatchCommands::Status { id } => cmd::work::cmd_batch_status(dir, id.as_deref()),
                BatchCommands::Cancel { id } => cmd::work::cmd_batch_cancel(dir, &id),
                BatchCommands::Resume { id, force } => {
                    cmd::work::cmd_batch_resume(dir, &id, force).await
                }
            },
        },

        Commands::Events { command } => match command {
            EventsCommands::Tail { follow } => cmd::events::cmd_events_tail(dir, follow).await,
        },

        Commands::Blocker { command } => match command {
            BlockerCommands::List => cmd::blocker::cmd_blocker_list(dir),
            BlockerCommands::Answer { id, text } => cmd::blocker::cmd_blocker_answer(dir, &id, &text),
            BlockerCommands::Resolve { id } => cmd::blocker::cmd_blocker_resolve(dir, &id),
        },

        Commands::Review => cmd::review::cmd_review(dir).await,
        Commands::Gates { command } => match command {
            GatesCommands::Run => cmd::review::cmd_review(dir).await,
        },

        Commands::Patch { command } => match command {
            PatchCommands::Export { out } => cmd::artifacts::cmd_patch_export(dir, out.as_deref()),
        },
        Commands::Commit { command } => match command {
            CommitCommands::Create { message } => cmd::artifacts::cmd_commit_create(dir, &message),
        },

        Commands::Checkpoint { command } => match command {
            CheckpointCommands::Create { label } => cmd::checkpoint::cmd_checkpoint_create(dir, &label),
            CheckpointCommands::List => cmd::checkpoint::cmd_checkpoint_list(dir),
            CheckpointCommands::Restore { id } => cmd::checkpoint::cmd_checkpoint_restore(dir, &id),
        },
    }
}
