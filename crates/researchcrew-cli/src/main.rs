use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use researchcrew_core::{
    EventCollector, FailurePolicy, ReportWriter, ResearchCrew, ResearchOutcome, Settings,
    validate_topic,
};
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const PREVIEW_CHARS: usize = 500;

#[derive(Parser, Debug)]
#[command(
    name = "researchcrew",
    version,
    about = "Generate a Markdown research report with a Manager, Researcher and Analyst agent crew"
)]
struct Cli {
    /// Research topic. Multiple words are joined; starts an interactive session when omitted.
    topic: Vec<String>,

    /// Directory the report is written to (defaults to RESEARCHCREW_REPORTS_DIR or ./reports).
    #[arg(long)]
    reports_dir: Option<PathBuf>,

    /// What to do when a search task fails: abort the run or synthesize from what succeeded.
    #[arg(long, value_name = "abort|degrade")]
    failure_policy: Option<FailurePolicy>,

    /// Write the synthesis exactly as produced, without the front-matter header.
    #[arg(long, default_value_t = false)]
    no_front_matter: bool,
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,researchcrew_core=info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::from_env().context("invalid configuration")?;
    if let Some(dir) = &cli.reports_dir {
        settings.reports_dir = dir.clone();
    }
    if let Some(policy) = cli.failure_policy {
        settings.engine.failure_policy = policy;
    }

    let framed = !cli.no_front_matter;
    let rt = Runtime::new()?;

    let topic = cli.topic.join(" ");
    if topic.trim().is_empty() {
        return interactive(&rt, &settings, framed);
    }
    let topic = validate_topic(&topic)?;
    rt.block_on(run(&settings, topic, framed)).map(|_| ())
}

/// Prompt for topics until a quit word or end of input.
fn interactive(rt: &Runtime, settings: &Settings, framed: bool) -> Result<()> {
    println!("ResearchCrew: enter a research topic, or 'quit' to leave.");
    let stdin = io::stdin();
    let mut input = stdin.lock();

    loop {
        let Some(line) = prompt(&mut input, "Research topic: ")? else {
            break;
        };
        if is_quit_word(&line) {
            break;
        }
        let topic = match validate_topic(&line) {
            Ok(topic) => topic,
            Err(err) => {
                println!("{err}");
                continue;
            }
        };

        let outcome = match rt.block_on(run(settings, topic, framed)) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "research run failed");
                continue;
            }
        };

        let Some(answer) = prompt(&mut input, "Show a summary preview? [y/N]: ")? else {
            break;
        };
        if is_yes(&answer) {
            println!();
            println!("{}", outcome.preview(PREVIEW_CHARS));
            println!();
        }
    }

    println!("Bye.");
    Ok(())
}

/// Print `label` and read one trimmed line; `None` at end of input.
fn prompt(input: &mut impl BufRead, label: &str) -> Result<Option<String>> {
    print!("{label}");
    io::stdout().flush()?;

    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

fn is_quit_word(input: &str) -> bool {
    matches!(input.trim().to_lowercase().as_str(), "quit" | "exit" | "q")
}

fn is_yes(input: &str) -> bool {
    matches!(input.trim().to_lowercase().as_str(), "y" | "yes")
}

async fn run(settings: &Settings, topic: String, framed: bool) -> Result<ResearchOutcome> {
    info!(
        %topic,
        policy = %settings.engine.failure_policy,
        reports_dir = %settings.reports_dir.display(),
        "starting research crew"
    );

    let (events, mut receiver) = EventCollector::new();
    let printer = tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            println!("{}", event.render_line());
        }
    });

    let crew = ResearchCrew::from_settings(settings)?.with_events(events);
    let result = crew.run(&topic).await;
    drop(crew);
    finish_printer(printer).await;

    let outcome = result?;
    for record in outcome.failed_tasks() {
        warn!(
            task = %record.task_id,
            reason = record.failure_reason().unwrap_or_default(),
            "task failed, report built without it"
        );
    }

    let artifact = outcome.to_artifact(framed);
    let writer = ReportWriter::new(&settings.reports_dir);
    match writer.write(&artifact) {
        Ok(path) => {
            println!();
            println!(
                "Report for \"{}\" written to {} ({:.1}s)",
                outcome.topic,
                path.display(),
                outcome.elapsed.as_secs_f64()
            );
            Ok(outcome)
        }
        Err(err) => {
            // Keep the generated text reachable even when it cannot be saved.
            println!("{}", artifact.body);
            Err(err).context("failed to save the report")
        }
    }
}

/// Wait for the progress printer; a panic there is logged, not fatal.
async fn finish_printer(printer: JoinHandle<()>) -> bool {
    match printer.await {
        Ok(()) => true,
        Err(err) => {
            warn!(error = %err, "progress printer stopped unexpectedly");
            false
        }
    }
}
