use anyhow::Context;
use clap::{Parser, Subcommand};
use sayitownit_core::simulation::{PositionSizingMethod, SimulationParams};
use sayitownit_core::storage::PgStore;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

mod jobs;

#[derive(Debug, Parser)]
#[command(name = "sayitownit_worker")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Post-close pipeline: refresh prices, close outcomes, recompute metrics.
    Daily {
        /// Market as-of date (YYYY-MM-DD). Defaults to the latest completed IST market day.
        #[arg(long)]
        as_of_date: Option<String>,

        /// Do everything except writing to the database.
        #[arg(long)]
        dry_run: bool,
    },
    /// Evaluate open recommendations against stored prices.
    Outcomes,
    /// Recompute expert metrics and ranks.
    Metrics {
        #[arg(long)]
        as_of_date: Option<String>,
    },
    /// Re-run the validator over every stored recommendation.
    ValidateAll,
    /// Backtest following one expert; prints the result as JSON.
    Simulate {
        #[arg(long)]
        expert_id: Uuid,
        #[arg(long)]
        start: chrono::NaiveDate,
        #[arg(long)]
        end: chrono::NaiveDate,
        #[arg(long, default_value_t = sayitownit_core::simulation::DEFAULT_INITIAL_CAPITAL)]
        capital: f64,
        #[arg(long, default_value = "FIXED_AMOUNT")]
        sizing: PositionSizingMethod,
        #[arg(long, default_value_t = sayitownit_core::simulation::DEFAULT_POSITION_SIZE_VALUE)]
        size_value: f64,
        #[arg(long, default_value_t = sayitownit_core::simulation::DEFAULT_MAX_CONCURRENT_POSITIONS)]
        max_positions: u32,
    },
    /// Store an extraction batch (JSON file) as recommendations.
    Import {
        #[arg(long)]
        file: std::path::PathBuf,
    },
    /// Retry stock resolution for recommendations without a stock link.
    BackfillStocks,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = sayitownit_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let res = run(args.command, &settings).await;
    if let Err(err) = &res {
        sentry_anyhow::capture_anyhow(err);
        tracing::error!(error = %format!("{err:#}"), "worker job failed");
    }
    res
}

async fn run(command: Command, settings: &sayitownit_core::config::Settings) -> anyhow::Result<()> {
    let db_url = settings.require_database_url()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")?;

    sayitownit_core::storage::migrate(&pool).await?;
    let store = PgStore::new(pool);

    match command {
        Command::Daily {
            as_of_date,
            dry_run,
        } => {
            let as_of_date = sayitownit_core::time::in_market::resolve_as_of_date(
                as_of_date.as_deref(),
                chrono::Utc::now(),
            )?;
            jobs::run_daily(&store, settings, as_of_date, dry_run).await
        }
        Command::Outcomes => {
            let today = chrono::Utc::now().date_naive();
            jobs::with_job_lock(&store, "outcomes", today, || async {
                let summary = sayitownit_core::outcome::runner::process_all_active_recommendations(
                    &store, &store,
                )
                .await?;
                print_json(&summary)
            })
            .await
        }
        Command::Metrics { as_of_date } => {
            let as_of_date = match as_of_date.as_deref() {
                Some(s) => sayitownit_core::time::in_market::resolve_as_of_date(
                    Some(s),
                    chrono::Utc::now(),
                )?,
                None => chrono::Utc::now().date_naive(),
            };
            jobs::with_job_lock(&store, "metrics", as_of_date, || async {
                let snapshots = sayitownit_core::metrics::calculate_all_expert_metrics(
                    &store, &store, as_of_date,
                )
                .await?;
                tracing::info!(%as_of_date, experts = snapshots.len(), "metrics job complete");
                Ok(())
            })
            .await
        }
        Command::ValidateAll => {
            let summary = sayitownit_core::review::workflow::validate_all(&store).await?;
            print_json(&summary)
        }
        Command::Simulate {
            expert_id,
            start,
            end,
            capital,
            sizing,
            size_value,
            max_positions,
        } => {
            let params = SimulationParams {
                expert_id,
                initial_capital: capital,
                start_date: start,
                end_date: end,
                position_sizing_method: sizing,
                position_size_value: size_value,
                max_concurrent_positions: max_positions,
            };
            let result =
                sayitownit_core::simulation::run_simulation(&store, &store, &params).await?;
            print_json(&result)
        }
        Command::Import { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("read {} failed", file.display()))?;
            let batch: sayitownit_core::domain::contract::ExtractedBatch =
                serde_json::from_str(&text)
                    .with_context(|| format!("{} is not a valid extraction batch", file.display()))?;
            let summary =
                sayitownit_core::ingest::candidates::import_batch(batch, &store, &store).await?;
            print_json(&summary)
        }
        Command::BackfillStocks => {
            let summary =
                sayitownit_core::ingest::stocks::backfill_stock_links(&store, &store).await?;
            print_json(&summary)
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("serialize output failed")?;
    println!("{out}");
    Ok(())
}

fn init_sentry(settings: &sayitownit_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
