use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal::unix::SignalKind;
use tokio::sync::watch;

use criteria_resolver::CriteriaResolver;
use model_client::{GroundingProvider, ModelServiceClient, RetrievalClient};
use pipeline_orchestrator::TargetingPipeline;
use strategic_fit::StrategicFitAnalyzer;

mod config;

use config::AgentConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load .env, init tracing
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    // Panic hook: log panic info before crashing
    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("Starting acquisition targeting agent");

    // 2. Load and validate configuration
    let config = AgentConfig::from_env()?;
    tracing::info!("Configuration loaded and validated");
    tracing::info!(
        "  Stage sizes: {} -> {} -> {}",
        config.stage_one_size,
        config.stage_two_size,
        config.stage_three_size
    );
    tracing::info!("  Model concurrency: {}", config.model_concurrency);
    tracing::info!("  Model service: {}", config.model_service_url);
    tracing::info!(
        "  Retrieval service: {}",
        config.retrieval_service_url.as_deref().unwrap_or("disabled")
    );

    // 3. Prompt from argv, TARGETING_PROMPT as fallback
    let prompt = {
        let args: Vec<String> = std::env::args().skip(1).collect();
        if args.is_empty() {
            std::env::var("TARGETING_PROMPT").unwrap_or_default()
        } else {
            args.join(" ")
        }
    };
    if prompt.trim().is_empty() {
        anyhow::bail!(
            "no targeting prompt given; pass it as arguments or set TARGETING_PROMPT"
        );
    }

    // 4. Database + connectivity check
    sqlx::any::install_default_drivers();
    let db_pool = sqlx::AnyPool::connect(&config.database_url).await?;
    sqlx::query("SELECT 1")
        .execute(&db_pool)
        .await
        .map_err(|e| anyhow::anyhow!("Database connectivity check failed: {e}"))?;
    tracing::info!("Startup check: database OK");

    // 5. Service clients
    let model = Arc::new(ModelServiceClient::new(
        config.model_service_url.clone(),
        Duration::from_secs(config.model_timeout_seconds),
    )?);
    let grounding: Option<Arc<dyn GroundingProvider>> =
        match config.retrieval_service_url.clone() {
            Some(url) => Some(Arc::new(RetrievalClient::new(
                url,
                Duration::from_secs(config.model_timeout_seconds),
                3,
            )?) as Arc<dyn GroundingProvider>),
            None => None,
        };

    // 6. Criteria resolution
    let resolver = match &grounding {
        Some(g) => CriteriaResolver::with_grounding(Arc::clone(g)),
        None => CriteriaResolver::new(),
    };
    let criteria = resolver.resolve(&prompt).await;
    tracing::info!("Resolved criteria: {}", criteria.description);

    // 7. Pipeline wiring
    let fit = StrategicFitAnalyzer::from_env();
    let mut pipeline = TargetingPipeline::new(
        db_pool,
        fit,
        model,
        config.pipeline_config(),
    );
    if let Some(g) = grounding {
        pipeline = pipeline.with_grounding(g);
    }

    // Cancellation on SIGINT/SIGTERM, honored between stages
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let pipeline = pipeline.with_cancellation(cancel_rx);
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received SIGINT, cancelling after the current stage");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, cancelling after the current stage");
            }
        }
        let _ = cancel_tx.send(true);
    });

    pipeline.init_tables().await?;

    // 8. One full run
    let outcome = pipeline
        .run(&criteria, &config.scoring_weights())
        .await?;

    tracing::info!(
        "Run {} completed: {} filtered -> {} screened -> {} analyzed",
        outcome.run.run_id,
        outcome.run.stage1_count,
        outcome.run.stage2_count,
        outcome.run.stage3_count
    );
    if !outcome.item_failures.is_empty() {
        for failure in &outcome.item_failures {
            tracing::warn!(
                "Stage {} skipped {}: {}",
                failure.stage,
                failure.org_number,
                failure.message
            );
        }
    }

    for (i, record) in outcome.analyses.iter().enumerate() {
        tracing::info!(
            "#{} {} ({}): {} at {:.0}% confidence, fit {}/10, {} risk flags",
            i + 1,
            record.company_name,
            record.org_number,
            record.recommendation.to_label(),
            record.confidence * 100.0,
            record.fit.score,
            record.risk_flags.len()
        );
        if !record.summary.is_empty() {
            tracing::info!("    {}", record.summary);
        }
        for step in &record.next_steps {
            tracing::info!("    next: {step}");
        }
    }

    Ok(())
}
