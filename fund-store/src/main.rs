use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fund_store::config::ExitFailureHook;
use fund_store::lock::RunLock;
use fund_store::{AppError, Dependencies, Settings, Task};

#[derive(Parser)]
#[command(name = "fund-store")]
#[command(about = "Run fund store maintenance tasks", long_about = None)]
struct Cli {
    /// Tasks to run in order (comma separated)
    #[arg(short, long, value_enum, value_delimiter = ',', required = true)]
    run: Vec<Task>,

    /// Run even if another run holds the lock
    #[arg(short, long)]
    force: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false);

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run(cli: &Cli) -> Result<(), AppError> {
    let settings = Settings::from_env()?;
    let lock = RunLock::acquire(&settings.lock_path, cli.force)?;
    let deps = Dependencies::new(settings)
        .await?
        .with_failure_hook(Arc::new(ExitFailureHook::holding(lock)));

    for task in &cli.run {
        info!(task = %task, "Started running");
        let started = Instant::now();
        if let Err(e) = task.run(&deps).await {
            error!(
                task = %task,
                error = %e,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Error during task"
            );
            return Err(e);
        }
        info!(task = %task, elapsed_ms = started.elapsed().as_millis() as u64, "Completed");
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let tasks: Vec<&str> = cli.run.iter().map(|t| t.name()).collect();
    info!(tasks = ?tasks, "Received instructions to run");

    let started = Instant::now();
    match run(&cli).await {
        Ok(()) => {
            info!(
                tasks = ?tasks,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Successfully completed all tasks"
            );
        }
        Err(e) => {
            error!(
                error = %e,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Aborted due to error"
            );
            std::process::exit(-1);
        }
    }
}
