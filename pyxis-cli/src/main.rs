use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pyxis_state::{Backend, BackendConfig, DEFAULT_WORKSPACE, create_backend};

#[derive(Parser)]
#[command(name = "pyxis")]
#[command(about = "Remote state management with workspaces and locking", long_about = None)]
struct Cli {
    /// Path to the backend configuration JSON file
    #[arg(short, long, default_value = "backend.json", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Workspace management commands
    Workspace {
        #[command(subcommand)]
        command: WorkspaceCommands,
    },
    /// State inspection commands
    State {
        #[command(subcommand)]
        command: StateCommands,
    },
    /// Release a stuck state lock by its ID
    ForceUnlock {
        /// Lock ID to release
        lock_id: String,

        /// Workspace whose lock should be released
        #[arg(long, default_value = "default")]
        workspace: String,

        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum WorkspaceCommands {
    /// List all workspaces
    List,
    /// Create and initialize a new workspace
    New {
        /// Name of the workspace
        name: String,
    },
    /// Delete a workspace and its state
    Delete {
        /// Name of the workspace
        name: String,

        /// Skip confirmation prompt (auto-approve)
        #[arg(long)]
        auto_approve: bool,
    },
}

#[derive(Subcommand)]
enum StateCommands {
    /// Fetch a workspace's state document and print it
    Pull {
        /// Workspace to pull from
        #[arg(long, default_value = "default")]
        workspace: String,
    },
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Workspace { command } => match command {
            WorkspaceCommands::List => run_workspace_list(&cli.config).await,
            WorkspaceCommands::New { name } => run_workspace_new(&cli.config, &name).await,
            WorkspaceCommands::Delete { name, auto_approve } => {
                run_workspace_delete(&cli.config, &name, auto_approve).await
            }
        },
        Commands::State { command } => match command {
            StateCommands::Pull { workspace } => run_state_pull(&cli.config, &workspace).await,
        },
        Commands::ForceUnlock {
            lock_id,
            workspace,
            force,
        } => run_force_unlock(&cli.config, &workspace, &lock_id, force).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "pyxis_state=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(path: &Path) -> Result<BackendConfig, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    serde_json::from_str(&content).map_err(|e| format!("Failed to parse {}: {}", path.display(), e))
}

async fn open_backend(config_path: &Path) -> Result<Backend, String> {
    let config = load_config(config_path)?;
    create_backend(&config)
        .await
        .map_err(|e| format!("Failed to create backend: {}", e))
}

fn confirm(warning: &str) -> Result<bool, String> {
    println!("{}", warning.yellow().bold());
    print!("{} ", "Type 'yes' to confirm:".yellow());
    io::stdout().flush().map_err(|e| e.to_string())?;

    let mut input = String::new();
    io::stdin()
        .read_line(&mut input)
        .map_err(|e| e.to_string())?;
    Ok(input.trim() == "yes")
}

async fn run_workspace_list(config: &Path) -> Result<(), String> {
    let backend = open_backend(config).await?;
    let workspaces = backend.list_workspaces().await.map_err(|e| e.to_string())?;

    for workspace in workspaces {
        if workspace == DEFAULT_WORKSPACE {
            println!("* {}", workspace);
        } else {
            println!("  {}", workspace);
        }
    }

    Ok(())
}

async fn run_workspace_new(config: &Path, name: &str) -> Result<(), String> {
    let backend = open_backend(config).await?;

    let existing = backend.list_workspaces().await.map_err(|e| e.to_string())?;
    if existing.iter().any(|workspace| workspace == name) {
        return Err(format!("Workspace {:?} already exists", name));
    }

    backend
        .get_or_init_state(name)
        .await
        .map_err(|e| e.to_string())?;
    println!("{} Created workspace {:?}", "✓".green(), name);
    Ok(())
}

async fn run_workspace_delete(config: &Path, name: &str, auto_approve: bool) -> Result<(), String> {
    let backend = open_backend(config).await?;

    if !auto_approve
        && !confirm(&format!(
            "This will delete all state stored for workspace {:?}.",
            name
        ))?
    {
        println!("{}", "Delete cancelled.".yellow());
        return Ok(());
    }

    backend
        .delete_workspace(name)
        .await
        .map_err(|e| e.to_string())?;
    println!("{} Deleted workspace {:?}", "✓".green(), name);
    Ok(())
}

async fn run_state_pull(config: &Path, workspace: &str) -> Result<(), String> {
    let backend = open_backend(config).await?;
    let manager = backend
        .get_or_init_state(workspace)
        .await
        .map_err(|e| e.to_string())?;

    match manager.refresh().await.map_err(|e| e.to_string())? {
        Some(state) => {
            let json = serde_json::to_string_pretty(&state).map_err(|e| e.to_string())?;
            println!("{}", json);
        }
        None => {
            eprintln!(
                "{}",
                "No state snapshot exists yet for this workspace.".yellow()
            );
        }
    }

    Ok(())
}

async fn run_force_unlock(
    config: &Path,
    workspace: &str,
    lock_id: &str,
    force: bool,
) -> Result<(), String> {
    let backend = open_backend(config).await?;

    if !force
        && !confirm(&format!(
            "This will forcibly release lock {} on workspace {:?}. \
             Only do this if the process holding it is gone.",
            lock_id, workspace
        ))?
    {
        println!("{}", "Force-unlock cancelled.".yellow());
        return Ok(());
    }

    backend
        .force_unlock(workspace, lock_id)
        .await
        .map_err(|e| e.to_string())?;
    println!("{} Released lock {}", "✓".green(), lock_id);
    Ok(())
}
