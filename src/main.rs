use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use log::info;

use kubethrift::audit::{AuditLog, FileAuditSink};
use kubethrift::cli::{Args, Commands, ReportFormat};
use kubethrift::cloud::static_provider::StaticProvider;
use kubethrift::cloud::{fetch_all_commitments, ProviderHandle};
use kubethrift::config::OptimizerConfig;
use kubethrift::controller::{CommitmentMonitorController, ControllerRunner, CostMonitorController};
use kubethrift::cost;
use kubethrift::engine::{total_potential_savings, RecommendationEngine};
use kubethrift::k8s::{ClusterInventory, K8sClient, UsageMetricsProvider};
use kubethrift::metrics::MetricsStore;
use kubethrift::reporting::{self, ReportInputs};
use kubethrift::safety::breaker::CircuitBreaker;
use kubethrift::safety::gate::{HttpLlmValidator, LlmValidator, SafetyGate};
use kubethrift::safety::node_lock::NodeLockManager;
use kubethrift::state::commitments::CommitmentTracker;
use kubethrift::state::ClusterStateCache;

/// Sanitize cluster name for use in filename: replace invalid chars with `-`, collapse and trim.
fn sanitize_cluster_name(name: &str) -> String {
    let s: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            _ => c,
        })
        .collect();
    let s = s
        .split('-')
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if s.is_empty() {
        "cluster".to_string()
    } else {
        s
    }
}

fn output_path_with_extension(
    path: Option<String>,
    cluster_name: &str,
    timestamp: &chrono::DateTime<chrono::Utc>,
    format: ReportFormat,
) -> String {
    let ext = match format {
        ReportFormat::Md => "md",
        ReportFormat::Json => "json",
    };
    let default_name = {
        let safe_name = sanitize_cluster_name(cluster_name);
        let ts = timestamp.format("%Y-%m-%d-%H%M%S");
        format!("{}-cost-report-{}.{}", safe_name, ts, ext)
    };
    let path = path.unwrap_or(default_name);
    if path.ends_with('.') || !path.contains('.') {
        format!("{}.{}", path.trim_end_matches('.'), ext)
    } else {
        path
    }
}

fn load_config(path: Option<&str>) -> Result<OptimizerConfig> {
    match path {
        Some(p) => OptimizerConfig::load(Path::new(p)),
        None => Ok(OptimizerConfig::default()),
    }
}

fn build_gate(config: &OptimizerConfig) -> Arc<SafetyGate> {
    let validator: Option<Arc<dyn LlmValidator>> = if config.gate.enabled {
        match std::env::var(&config.gate.api_key_env) {
            Ok(key) if !key.is_empty() => HttpLlmValidator::new(
                config.gate.api_url.clone(),
                key,
                config.gate.model.clone(),
                std::time::Duration::from_secs(config.gate.timeout_secs),
            )
            .ok()
            .map(|v| Arc::new(v) as Arc<dyn LlmValidator>),
            _ => {
                log::warn!(
                    "gate enabled but {} is unset; high-impact changes will be denied",
                    config.gate.api_key_env
                );
                None
            }
        }
    } else {
        None
    };
    Arc::new(SafetyGate::new(config.gate_config(), validator))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    match args.command {
        Commands::Analyze {
            cluster_name,
            config,
            kubeconfig,
            output,
            format,
            top_workloads,
        } => {
            run_analyze(
                cluster_name,
                config,
                kubeconfig,
                output,
                format,
                top_workloads,
            )
            .await?;
        }
        Commands::Run { config, kubeconfig } => {
            run_control_plane(config, kubeconfig).await?;
        }
    }

    Ok(())
}

async fn run_analyze(
    cluster_name: Option<String>,
    config_file: Option<String>,
    kubeconfig: Option<String>,
    output: Option<String>,
    format: ReportFormat,
    top_workloads: usize,
) -> Result<()> {
    println!(
        "{}",
        "💰 Kubethrift - Kubernetes Cost Optimizer".bright_cyan().bold()
    );
    println!(
        "{}",
        "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━".bright_cyan()
    );

    info!("Starting one-shot cost analysis");
    let config = load_config(config_file.as_deref())?;

    print!("🔗 Connecting to cluster... ");
    let client = match K8sClient::new(kubeconfig.as_deref()).await {
        Ok(client) => {
            println!("{}", "✅ Success".bright_green());
            client
        }
        Err(e) => {
            println!("{}", "❌ Failed".bright_red());
            eprintln!("Error: {}", e);
            return Err(e);
        }
    };
    let cluster_name = cluster_name
        .or_else(|| config.cluster_name.clone())
        .or_else(|| client.cluster_name().map(|s| s.to_string()))
        .unwrap_or_else(|| "default".to_string());

    let client = Arc::new(client);
    let handle: ProviderHandle = StaticProvider::new(config.cloud.clone()).into_handle();
    let history = Arc::new(MetricsStore::new(config.metrics_retention()));
    let cache = ClusterStateCache::new(
        Arc::clone(&client) as Arc<dyn ClusterInventory>,
        Arc::clone(&client) as Arc<dyn UsageMetricsProvider>,
        handle.clone(),
        Arc::clone(&history),
    );

    println!("🔍 Refreshing cluster state...");
    cache.refresh().await?;
    let snapshot = cache.snapshot();

    let allocations = cost::allocate(&snapshot);
    let namespaces = cost::namespace_costs(&allocations);
    let workloads = cost::workload_costs(&allocations, Some(top_workloads));

    let tracker = CommitmentTracker::default();
    let commitments = fetch_all_commitments(&handle).await.unwrap_or_default();
    let commitments = tracker.annotate_utilization(commitments, &snapshot.node_groups);
    let expiring = tracker.expiring(&commitments, snapshot.taken_at);
    let underutilized = tracker.underutilized(&commitments);

    let engine = RecommendationEngine::new(config.engine_config(), handle.spot_estimator.clone());
    let recommendations = engine.recommendations(&snapshot, Some(history.as_ref()));
    let total_savings = total_potential_savings(&recommendations);

    println!();
    println!("{}", "📊 Summary:".bright_yellow().bold());
    println!(
        "   Monthly cost: {}",
        format!("${:.2}", snapshot.total_monthly_cost_usd()).bright_green()
    );
    println!(
        "   Recommendations: {}",
        format!("{}", recommendations.len()).bright_yellow()
    );
    println!(
        "   Potential savings: {}",
        format!("${:.2}/mo", total_savings).bright_green().bold()
    );
    if !snapshot.metrics_available {
        println!(
            "   {} metrics-server unavailable; point-in-time confidence only",
            "⚠️".bright_yellow()
        );
    }

    let report = reporting::build_report(ReportInputs {
        cluster_name: &cluster_name,
        snapshot: &snapshot,
        groups: &cache.group_summaries(),
        commitments: &commitments,
        expiring: &expiring,
        underutilized: &underutilized,
        namespaces,
        top_workloads: workloads,
        recommendations,
        total_potential_savings_usd: total_savings,
    });

    let output_path = output_path_with_extension(output, &cluster_name, &report.timestamp, format);
    print!("📝 Generating report... ");
    match format {
        ReportFormat::Json => reporting::write_json(&report, &output_path)?,
        ReportFormat::Md => reporting::write_markdown(&report, &output_path)?,
    }
    println!("{}", "✅ Done".bright_green());
    println!();
    println!("{}", "🎉 Analysis completed successfully!".bright_green().bold());
    println!("   Report: {}", output_path.bright_cyan());
    Ok(())
}

async fn run_control_plane(config_file: Option<String>, kubeconfig: Option<String>) -> Result<()> {
    println!(
        "{}",
        "💰 Kubethrift - Cost Optimization Control Plane".bright_cyan().bold()
    );

    let config = load_config(config_file.as_deref())?;

    print!("🔗 Connecting to cluster... ");
    let client = match K8sClient::new(kubeconfig.as_deref()).await {
        Ok(client) => {
            println!("{}", "✅ Success".bright_green());
            client
        }
        Err(e) => {
            println!("{}", "❌ Failed".bright_red());
            eprintln!("Error: {}", e);
            return Err(e);
        }
    };

    let client = Arc::new(client);
    let handle: ProviderHandle = StaticProvider::new(config.cloud.clone()).into_handle();
    let history = Arc::new(MetricsStore::new(config.metrics_retention()));
    let cache = Arc::new(ClusterStateCache::new(
        Arc::clone(&client) as Arc<dyn ClusterInventory>,
        Arc::clone(&client) as Arc<dyn UsageMetricsProvider>,
        handle.clone(),
        Arc::clone(&history),
    ));
    let engine = Arc::new(RecommendationEngine::new(
        config.engine_config(),
        handle.spot_estimator.clone(),
    ));
    let audit = Arc::new(match &config.audit.durable_path {
        Some(path) => AuditLog::with_sink(
            config.audit.capacity,
            Arc::new(FileAuditSink::new(path.clone())),
        ),
        None => AuditLog::new(config.audit.capacity),
    });
    let gate = build_gate(&config);
    let breaker = Arc::new(CircuitBreaker::new(config.breaker_config()));
    let locks = Arc::new(NodeLockManager::new());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut runner = ControllerRunner::new(Arc::clone(&breaker), shutdown_rx);

    // The cache refreshes on its own cadence, independent of which
    // controllers are enabled; controllers only read the published state.
    {
        let cache = Arc::clone(&cache);
        let interval = std::time::Duration::from_secs(config.reconcile_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = cache.refresh().await {
                    log::warn!("cluster state refresh failed: {:#}", e);
                }
            }
        });
    }

    if config.controllers.cost_monitor.enabled {
        runner.spawn(
            Arc::new(CostMonitorController::new(
                Arc::clone(&cache),
                Arc::clone(&engine),
                handle.clone(),
                Some(Arc::clone(&gate)),
                Arc::clone(&audit),
            )),
            std::time::Duration::from_secs(config.controllers.cost_monitor.interval_secs),
        );
    }
    if config.controllers.commitment_monitor.enabled {
        runner.spawn(
            Arc::new(CommitmentMonitorController::new(
                handle.clone(),
                Arc::clone(&cache),
                Arc::clone(&audit),
            )),
            std::time::Duration::from_secs(config.controllers.commitment_monitor.interval_secs),
        );
    }

    // Provider-side cache refresh daemon, when the provider has one.
    if let Some(refresher) = handle.refresher.clone() {
        let interval = std::time::Duration::from_secs(config.reconcile_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = refresher.refresh().await {
                    log::warn!("provider background refresh failed: {}", e);
                }
            }
        });
    }

    // Stale node locks are reaped even if their controller died mid-action.
    {
        let locks = Arc::clone(&locks);
        let max_age = chrono::Duration::seconds(config.lock_max_age_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                ticker.tick().await;
                let expired = locks.expire_stale(max_age);
                if expired > 0 {
                    log::warn!("expired {} stale node lock(s)", expired);
                }
            }
        });
    }

    println!("🚀 Control plane running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    println!();
    println!("{}", "🛑 Shutting down...".bright_yellow());
    let _ = shutdown_tx.send(true);
    runner.join().await;
    audit.flush().await;
    println!("{}", "✅ Clean shutdown".bright_green());
    Ok(())
}
