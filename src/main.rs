use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod aggregate;
mod config;
mod loader;
mod models;
mod projection;
mod report;
mod risk;
mod server;
mod snapshot;

use config::Config;
use projection::{Criteria, Flag, FlagThresholds, Range, SortKey, StatusFilter};
use risk::RuleKind;

#[derive(Parser)]
#[command(name = "student-risk-dashboard")]
#[command(about = "Student attendance, score and fee risk dashboard", long_about = None)]
struct Cli {
    /// TOML file layered over the built-in defaults
    #[arg(long, global = true, env = "STUDENT_RISK_CONFIG")]
    config: Option<PathBuf>,
    /// Directory holding students.csv, attendance.csv, tests.csv and fees.csv
    #[arg(long, global = true, env = "STUDENT_RISK_DATA_DIR")]
    data_dir: Option<PathBuf>,
    /// Classification rule set
    #[arg(long, global = true, value_enum, env = "STUDENT_RISK_RULES")]
    rules: Option<RuleKind>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the filtered student table
    Table {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, value_enum)]
        sort: Option<SortKey>,
        #[arg(long)]
        desc: bool,
        /// One-based page number
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long)]
        page_size: Option<usize>,
    },
    /// Print status counts, grade counts and distributions
    Summary {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Generate a markdown report
    Report {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Write the filtered profiles and summaries as JSON
    Export {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, default_value = "profiles.json")]
        out: PathBuf,
    },
    /// Serve the dashboard JSON API
    Serve {
        #[arg(long, default_value = "127.0.0.1:8050", env = "STUDENT_RISK_BIND")]
        bind: String,
    },
}

#[derive(Args, Debug, Default)]
struct FilterArgs {
    /// Case-insensitive match on student id or name
    #[arg(long)]
    search: Option<String>,
    #[arg(long, value_enum, default_value_t = StatusFilter::All)]
    status: StatusFilter,
    /// Restrict to a class; repeat for several
    #[arg(long = "grade")]
    grades: Vec<String>,
    #[arg(long, value_enum)]
    flag: Option<Flag>,
    #[arg(long)]
    min_attendance: Option<f64>,
    #[arg(long)]
    max_attendance: Option<f64>,
    #[arg(long)]
    min_score: Option<f64>,
    #[arg(long)]
    max_score: Option<f64>,
    #[arg(long)]
    min_due: Option<f64>,
    #[arg(long)]
    max_due: Option<f64>,
}

impl FilterArgs {
    fn criteria(&self, flag_thresholds: FlagThresholds) -> Criteria {
        Criteria {
            search: self.search.clone(),
            attendance: Range::new(self.min_attendance, self.max_attendance),
            score: Range::new(self.min_score, self.max_score),
            due_amount: Range::new(self.min_due, self.max_due),
            status: self.status,
            grades: self.grades.clone(),
            flag: self.flag,
            flag_thresholds,
        }
    }

    fn scope_label(&self) -> Option<String> {
        if self.grades.is_empty() {
            None
        } else {
            Some(self.grades.join(", "))
        }
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries command output
    if env_bool("STUDENT_RISK_LOG_JSON", false) {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn resolve_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(data_dir) = &cli.data_dir {
        config.data_dir = data_dir.clone();
    }
    if let Some(kind) = cli.rules {
        config.rules.kind = kind;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;
    let snapshot = snapshot::initialize(&config)
        .with_context(|| format!("failed to load data from {}", config.data_dir.display()))?;

    match cli.command {
        Commands::Table {
            filter,
            sort,
            desc,
            page,
            page_size,
        } => {
            let mut projection = snapshot.project(&filter.criteria(config.flags));
            if let Some(key) = sort {
                projection::sort_profiles(&mut projection.rows, key, desc);
            }
            let page = projection::paginate(
                &projection.rows,
                page.saturating_sub(1),
                page_size.unwrap_or(config.page_size),
            );
            print!("{}", report::render_table(&page, projection.rows.len()));
        }
        Commands::Summary { filter } => {
            let projection = snapshot.project(&filter.criteria(config.flags));
            print!("{}", report::render_summary(&projection));
        }
        Commands::Report { filter, out } => {
            let projection = snapshot.project(&filter.criteria(config.flags));
            let scope = filter.scope_label();
            let report = report::build_report(&snapshot, scope.as_deref(), &projection);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Export { filter, out } => {
            let projection = snapshot.project(&filter.criteria(config.flags));
            let json = serde_json::to_string_pretty(&projection)?;
            std::fs::write(&out, json)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!(
                "Exported {} students to {}.",
                projection.rows.len(),
                out.display()
            );
        }
        Commands::Serve { bind } => {
            let state = server::AppState::new(config, snapshot);
            server::serve(state, &bind).await?;
        }
    }

    Ok(())
}
