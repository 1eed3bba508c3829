use anyhow::Context;
use chrono::NaiveDate;
use sayitownit_core::config::Settings;
use sayitownit_core::ingest::prices::{bars_for_response, refresh_and_record};
use sayitownit_core::ingest::provider::{HttpJsonPriceProvider, PriceProviderClient};
use sayitownit_core::metrics::{assign_ranks, calculate_all_expert_metrics, calculate_expert_metrics};
use sayitownit_core::outcome::detector::check_outcome;
use sayitownit_core::outcome::runner::process_all_active_recommendations;
use sayitownit_core::storage::lock;
use sayitownit_core::storage::{ExpertStore, PgStore, RecommendationStore};
use std::future::Future;

/// Runs `f` while holding the advisory lock for (job, date). If another run holds it, logs
/// and returns Ok without running.
pub async fn with_job_lock<F, Fut>(
    store: &PgStore,
    job: &str,
    as_of_date: NaiveDate,
    f: F,
) -> anyhow::Result<()>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let ran = lock::with_job_lock(store.pool(), job, as_of_date, f).await?;
    if ran.is_none() {
        tracing::warn!(job, %as_of_date, "job lock not acquired; another run in progress");
    }
    Ok(())
}

pub async fn run_daily(
    store: &PgStore,
    settings: &Settings,
    as_of_date: NaiveDate,
    dry_run: bool,
) -> anyhow::Result<()> {
    // A provider problem, including missing settings, must not stop outcome evaluation on
    // prices already stored.
    let provider = HttpJsonPriceProvider::from_settings(settings);
    let provider = provider.as_ref().map(|p| p as &dyn PriceProviderClient);

    if dry_run {
        return dry_run_daily(store, provider, as_of_date).await;
    }

    with_job_lock(store, "daily", as_of_date, || async {
        let started = std::time::Instant::now();

        let prices = refresh_and_record(provider, store, store, as_of_date).await?;
        let outcomes = process_all_active_recommendations(store, store).await?;
        let metrics = calculate_all_expert_metrics(store, store, as_of_date).await?;

        tracing::info!(
            %as_of_date,
            elapsed_ms = started.elapsed().as_millis(),
            prices_refreshed = prices.is_some(),
            ?prices,
            ?outcomes,
            experts_ranked = metrics.len(),
            "daily run complete"
        );
        Ok(())
    })
    .await
}

// Reads only: same steps as the daily run, with every write skipped.
async fn dry_run_daily(
    store: &PgStore,
    provider: Result<&dyn PriceProviderClient, &anyhow::Error>,
    as_of_date: NaiveDate,
) -> anyhow::Result<()> {
    let (bars, prices) = match provider {
        Ok(p) => match p.fetch_daily_prices(as_of_date).await {
            Ok((resp, _raw)) => bars_for_response(store, &resp).await?,
            Err(err) => {
                tracing::warn!(%as_of_date, error = %format!("{err:#}"), "fetch daily prices failed");
                Default::default()
            }
        },
        Err(err) => {
            tracing::warn!(%as_of_date, error = %format!("{err:#}"), "price provider unavailable");
            Default::default()
        }
    };

    let active = store
        .list_evaluable_active()
        .await
        .context("list active recommendations failed")?;
    let mut would_close = 0u32;
    let mut errors = 0u32;
    for rec in &active {
        match check_outcome(store, rec).await {
            Ok(Some(_)) => would_close += 1,
            Ok(None) => {}
            Err(err) => {
                errors += 1;
                tracing::warn!(recommendation_id = %rec.id, error = %format!("{err:#}"), "outcome check failed");
            }
        }
    }

    let mut snapshots = Vec::new();
    for expert in store.list_active_experts().await? {
        let history = store
            .list_with_outcomes_for_expert(&expert.canonical_name)
            .await?;
        snapshots.extend(calculate_expert_metrics(&expert, &history, as_of_date));
    }
    assign_ranks(&mut snapshots);

    tracing::info!(
        %as_of_date,
        dry_run = true,
        ?prices,
        bars = bars.len(),
        active = active.len(),
        would_close,
        errors,
        experts_ranked = snapshots.len(),
        top_expert = snapshots.first().map(|m| m.expert_name.as_str()).unwrap_or("-"),
        "daily run (dry-run)"
    );
    Ok(())
}
