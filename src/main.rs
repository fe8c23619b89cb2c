use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::info;

use tiered_cache::cache::{CacheLevel, CacheManager, GetOptions, SetOptions, TtlPreset};
use tiered_cache::config::Config;
use tiered_cache::error_boundary::{BoundaryKind, ErrorBoundary, Rendered, UiError};
use tiered_cache::preferences::{PreferencesManager, Theme};
use tiered_cache::security::SecurityHeaders;
use tiered_cache::storage::SessionStorage;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PipelineSummary {
    id: u32,
    name: String,
    status: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(Path::new(&path))?,
        None => Config::default(),
    };

    let manager = Arc::new(
        CacheManager::from_config(&config)
            .await
            .context("Failed to build cache manager")?,
    );
    manager
        .start_maintenance(config.cache.maintenance_interval())
        .await;

    let pipelines = vec![
        PipelineSummary { id: 1, name: "orders-to-warehouse".into(), status: "running".into() },
        PipelineSummary { id: 2, name: "crm-sync".into(), status: "paused".into() },
    ];
    manager
        .set(
            "pipelines",
            &pipelines,
            SetOptions::level(CacheLevel::Session).with_ttl(TtlPreset::Short),
        )
        .await
        .map_err(|e| anyhow!("Failed to cache pipelines: {}", e))?;

    // First read comes from the session tier and lands in memory
    let cached: Option<Vec<PipelineSummary>> =
        manager.get("pipelines", GetOptions::default()).await?;
    info!("Pipelines from cache: {:?}", cached);

    let insights: Vec<String> = manager
        .cached_fetch("ai_insights", SetOptions::default(), || async {
            Ok(vec!["Throughput up 12% week over week".to_string()])
        })
        .await?;
    info!("Insights: {:?}", insights);

    let prefs = PreferencesManager::load(Arc::new(SessionStorage::new())).await?;
    prefs.update(|p| p.theme = Theme::Dark).await?;
    info!("Preferences: {:?}", prefs.get().await);

    for (name, value) in SecurityHeaders::from_config(&config).headers() {
        info!("{}: {}", name, value);
    }

    let attempts = AtomicU32::new(0);
    let boundary = ErrorBoundary::new(BoundaryKind::Section("Dashboard".into()))
        .with_retry(config.retry.clone())
        .on_reset(|| info!("Dashboard boundary reset"));
    let rendered = boundary
        .render(|| {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(UiError::new("network connection lost"))
                } else {
                    Ok("dashboard ready")
                }
            }
        })
        .await;
    match rendered {
        Rendered::Content(content) => info!("Rendered: {}", content),
        Rendered::Fallback(fallback) => info!("Fallback: {:?}", fallback),
    }
    boundary.reset();

    let stats = manager.stats().await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);

    manager.stop_maintenance().await?;
    Ok(())
}
