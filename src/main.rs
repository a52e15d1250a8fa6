use anyhow::Context;
use clap::{Parser, Subcommand};
use crew_console::{
    ArtifactExporter, CommandEngine, DisplayUpdate, ProcessSupervisor, ShellConfig, TaskWorkspace,
    UpdateKind, UpdateStream, WorkflowRunner,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "crew-console", version, about = "Run engineering-crew workflows and the projects they generate")]
struct Cli {
    /// JSON settings file; defaults apply for anything it leaves out
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a workflow for a new task and stream its progress
    Launch {
        #[arg(long)]
        name: String,
        #[arg(long)]
        requirement: String,
    },
    /// Run a task's generated project until it exits (Ctrl-C stops it)
    Run { task: String },
    /// Zip a task's output directory
    Export { task: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ShellConfig::load(cli.config.as_deref()).context("failed to load settings")?;
    if let Err(error) = crew_console::init_tracing(&config.log_dir) {
        eprintln!("file logging disabled: {error}");
    }

    let succeeded = match cli.command {
        Command::Launch { name, requirement } => {
            let engine = CommandEngine::from_command(&config.engine_command)
                .context("no usable workflow engine command configured")?;
            let runner = WorkflowRunner::new(
                Arc::new(engine),
                TaskWorkspace::new(config.output_root.clone()),
                config.pacing.clone(),
            );
            print_stream(runner.launch(&name, &requirement)).await
        }
        Command::Run { task } => run_until_done(&ProcessSupervisor::new(&config), &task).await,
        Command::Export { task } => match ArtifactExporter::new(&config).export(&task)? {
            Some(path) => {
                println!("{}", path.display());
                true
            }
            None => {
                eprintln!("Nothing to export for task '{}'.", task.trim());
                false
            }
        },
    };

    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}

async fn print_stream(mut stream: UpdateStream) -> bool {
    let mut printer = DeltaPrinter::default();
    while let Some(update) = stream.next().await {
        printer.print(&update);
    }
    printer.succeeded()
}

async fn run_until_done(supervisor: &ProcessSupervisor, task: &str) -> bool {
    let mut stream = supervisor.start(task);
    let mut printer = DeltaPrinter::default();
    loop {
        tokio::select! {
            update = stream.next() => match update {
                Some(update) => printer.print(&update),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                let update = supervisor.stop().await;
                printer.print(&update);
            }
        }
    }
    printer.succeeded()
}

/// Progress updates repeat the whole buffer; only the new suffix is printed.
#[derive(Default)]
struct DeltaPrinter {
    shown: String,
    failed: bool,
}

impl DeltaPrinter {
    fn print(&mut self, update: &DisplayUpdate) {
        let mut stdout = std::io::stdout().lock();
        match update.kind {
            UpdateKind::Progress | UpdateKind::Completed | UpdateKind::Stopped => {
                if !self.shown.is_empty() && update.text.starts_with(&self.shown) {
                    let _ = write!(stdout, "{}", &update.text[self.shown.len()..]);
                } else if !update.text.is_empty() {
                    let _ = writeln!(stdout, "{}", update.text);
                }
                if update.kind == UpdateKind::Progress {
                    self.shown.clone_from(&update.text);
                }
            }
            UpdateKind::Warning | UpdateKind::Failed => {
                self.failed |= update.kind == UpdateKind::Failed;
                eprintln!("{}", update.text);
            }
            UpdateKind::Started | UpdateKind::Idle => {
                let _ = writeln!(stdout, "{}", update.text);
            }
        }
        let _ = stdout.flush();
    }

    fn succeeded(&self) -> bool {
        !self.failed
    }
}
