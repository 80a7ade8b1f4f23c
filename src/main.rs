use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use classroom_insight::access::TeacherAccess;
use classroom_insight::config::EngineConfig;
use classroom_insight::engine::InsightEngine;
use classroom_insight::http::{self, ServerConfig};
use classroom_insight::models::Video;
use classroom_insight::recommend::{InMemoryQuestionPool, InMemoryVideoCatalog, PoolQuestion};
use classroom_insight::report;

#[derive(Parser)]
#[command(name = "classroom-insight")]
#[command(about = "Real-time student performance analytics for the LGS platform", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP analytics service
    Serve {
        #[arg(long, env = "INSIGHT_BIND", default_value = "127.0.0.1:3000")]
        bind: SocketAddr,
        /// JSON video catalog for remedial recommendations
        #[arg(long)]
        videos: Option<PathBuf>,
        /// JSON question pool for mini-test generation
        #[arg(long)]
        questions: Option<PathBuf>,
        #[arg(long, env = "INSIGHT_SWEEP_SECS", default_value_t = 900)]
        sweep_secs: u64,
    },
    /// Score a submission CSV: struggle ranking plus raised alerts
    Score {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        teacher: String,
        #[arg(long)]
        class: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Generate a markdown report from a submission CSV
    Report {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        teacher: String,
        #[arg(long)]
        class: String,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

fn load_videos(path: Option<&PathBuf>) -> anyhow::Result<Vec<Video>> {
    match path {
        Some(path) => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("failed to open video catalog {}", path.display()))?;
            serde_json::from_reader(file).context("video catalog is not valid JSON")
        }
        None => Ok(Vec::new()),
    }
}

fn load_questions(path: Option<&PathBuf>) -> anyhow::Result<Vec<PoolQuestion>> {
    match path {
        Some(path) => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("failed to open question pool {}", path.display()))?;
            serde_json::from_reader(file).context("question pool is not valid JSON")
        }
        None => Ok(Vec::new()),
    }
}

/// Offline commands operate as a trusted homeroom scope over the one class
/// being inspected.
fn offline_engine(csv: &PathBuf, teacher: &str, class: &str) -> anyhow::Result<InsightEngine> {
    let engine = InsightEngine::new(
        EngineConfig::default(),
        Arc::new(InMemoryVideoCatalog::default()),
        Arc::new(InMemoryQuestionPool::default()),
    );
    engine.register_access(TeacherAccess {
        teacher_id: teacher.to_string(),
        class_ids: [class.to_string()].into_iter().collect(),
        subjects: Default::default(),
        is_homeroom: true,
    });

    let summary = engine.import_csv(csv)?;
    println!(
        "Imported {} submissions ({} rejected, {} alerts raised).",
        summary.accepted, summary.rejected, summary.alerts_raised
    );
    engine.sweep();
    Ok(engine)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            bind,
            videos,
            questions,
            sweep_secs,
        } => {
            let catalog = InMemoryVideoCatalog::new(load_videos(videos.as_ref())?);
            let pool = InMemoryQuestionPool::new(load_questions(questions.as_ref())?);
            let engine = Arc::new(InsightEngine::new(
                EngineConfig::default(),
                Arc::new(catalog),
                Arc::new(pool),
            ));

            http::serve(
                engine,
                ServerConfig {
                    addr: bind,
                    sweep_interval: Duration::from_secs(sweep_secs.max(1)),
                },
            )
            .await?;
        }
        Commands::Score {
            csv,
            teacher,
            class,
            limit,
        } => {
            let engine = offline_engine(&csv, &teacher, &class)?;
            let overview = engine.class_overview(&teacher, &class, None, None)?;

            if overview.struggling_topics.is_empty() {
                println!("No submissions found for class {class}.");
                return Ok(());
            }

            println!("Topics by struggle rate:");
            for topic in overview.struggling_topics.iter().take(limit) {
                println!(
                    "- {} / {}: {:.0}% struggle across {} attempts",
                    topic.subject,
                    topic.topic,
                    topic.struggle_rate * 100.0,
                    topic.total_attempts
                );
            }

            let alerts = engine.alerts(&teacher, Some(&class), None)?;
            println!("Active alerts: {}", alerts.len());
            for alert in alerts.iter().take(limit) {
                println!("- [{:?}] {}: {}", alert.severity, alert.student_id, alert.message);
            }
        }
        Commands::Report {
            csv,
            teacher,
            class,
            out,
        } => {
            let engine = offline_engine(&csv, &teacher, &class)?;
            let overview = engine.class_overview(&teacher, &class, None, None)?;
            let alerts = engine.alerts(&teacher, Some(&class), None)?;
            let report = report::build_report(&overview, &alerts);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
