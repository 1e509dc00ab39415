use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use sqlx::any::AnyPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod aggregate;
mod config;
mod db;
mod error;
mod models;
mod report;

use crate::db::SqlRecordFetcher;
use crate::models::ModuleGrades;

#[derive(Parser)]
#[command(name = "grade-aggregator")]
#[command(about = "Weighted module grade aggregation for the education portal", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load the demo module and students
    Seed,
    /// Import score rows from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Compute weighted totals for a module
    Grades {
        #[arg(long)]
        module: String,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Generate a markdown report for a module
    Report {
        #[arg(long)]
        module: String,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = config::Settings::from_env()?;

    sqlx::any::install_default_drivers();
    let pool = AnyPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect(&settings.database_url)
        .await
        .context("failed to connect to the grade database")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} scores from {}.", csv.display());
        }
        Commands::Grades { module, format } => {
            let grades = load_grades(pool, &module).await?;
            info!(
                module_id = %module,
                students = grades.report.results.len(),
                warnings = grades.report.warnings.len(),
                "module graded"
            );

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&grades.report)?);
                }
                OutputFormat::Text => {
                    if grades.report.results.is_empty() {
                        println!("No students have scores in {}.", grades.module.title);
                        return Ok(());
                    }

                    println!("Student grades for {}:", grades.module.title);
                    for result in &grades.report.results {
                        println!("{}", report::format_result(result));
                        for warning in grades
                            .report
                            .warnings
                            .iter()
                            .filter(|w| w.student_id() == result.student_id)
                        {
                            println!("  warning: {warning}");
                        }
                    }
                }
            }
        }
        Commands::Report { module, out } => {
            let grades = load_grades(pool, &module).await?;
            let report = report::build_report(&grades, chrono::Utc::now().date_naive());
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

async fn load_grades(pool: sqlx::AnyPool, module_id: &str) -> anyhow::Result<ModuleGrades> {
    let fetcher = SqlRecordFetcher::new(pool);
    aggregate::grade_module(&fetcher, module_id)
        .await
        .with_context(|| format!("could not load module {module_id}"))
}
