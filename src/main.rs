use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ratekeeper::config::{LoggingConfig, RatekeeperConfig};
use ratekeeper::error::RatekeeperError;
use ratekeeper::ratelimit::{RateLimitGuard, TierRules, TieredRateLimiter};

#[derive(Debug, Parser)]
#[command(name = "ratekeeper", version, about = "Inspect and exercise rate limit tiers")]
struct Cli {
    /// Settings file (YAML), layered with RATEKEEPER__* environment variables
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load tier rules and report the tiers they define
    Validate {
        /// Tier rules file, defaults to rate_limiting.rules_path
        #[arg(long)]
        rules: Option<PathBuf>,
    },
    /// Drive guarded requests through one tier and report the outcome
    Simulate {
        /// Tier rules file, defaults to rate_limiting.rules_path
        #[arg(long)]
        rules: Option<PathBuf>,
        /// Tier to route requests through
        #[arg(long)]
        tier: String,
        /// Rate limit key the requests are made under
        #[arg(long, default_value = "simulated-client")]
        key: String,
        /// Number of requests to make
        #[arg(long, default_value_t = 10)]
        requests: u32,
        /// Pause between requests in milliseconds
        #[arg(long, default_value_t = 0)]
        interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = RatekeeperConfig::load(cli.config.as_deref())?;

    init_tracing(&config.logging);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Validate { rules } => {
            let limiter = load_tiers(rules, &config)?;
            for tier in limiter.tiers() {
                let handle = limiter.limiter(tier)?;
                let policy = handle.limiter();
                println!(
                    "{}: {} requests per {:?} ({})",
                    tier,
                    policy.config().max_requests(),
                    policy.config().window_size(),
                    policy.algorithm()
                );
            }
        }
        Command::Simulate {
            rules,
            tier,
            key,
            requests,
            interval_ms,
        } => {
            let limiter = load_tiers(rules, &config)?;
            let guard = RateLimitGuard::new(limiter.limiter(&tier)?);

            tokio::select! {
                _ = simulate(&guard, &key, requests, Duration::from_millis(interval_ms)) => {}
                _ = shutdown_signal() => {}
            }

            let stats = limiter.get_stats(&key, &tier)?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_tiers(rules: Option<PathBuf>, config: &RatekeeperConfig) -> anyhow::Result<TieredRateLimiter> {
    let path = rules
        .or_else(|| config.rate_limiting.rules_path.as_ref().map(PathBuf::from))
        .ok_or_else(|| anyhow::anyhow!("no tier rules given: pass --rules or set rate_limiting.rules_path"))?;

    let rules = TierRules::from_file(&path)?;
    let limiter = TieredRateLimiter::from_rules(&rules)?;
    info!(path = %path.display(), tiers = limiter.tiers().len(), "Tier rules loaded");
    Ok(limiter)
}

async fn simulate<B>(guard: &RateLimitGuard<B>, key: &str, requests: u32, interval: Duration)
where
    B: ratekeeper::ratelimit::RateLimiterBackend,
{
    let mut admitted = 0u32;
    for i in 1..=requests {
        match guard.run(key, || async { i }).await {
            Ok(n) => {
                admitted += 1;
                info!(request = n, key = %key, "Admitted");
            }
            Err(RatekeeperError::RateLimitExceeded { retry_after, .. }) => {
                info!(request = i, key = %key, retry_after = ?retry_after, "Throttled");
            }
            Err(e) => {
                warn!(error = %e, "Simulation stopped");
                break;
            }
        }
        if !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }
    }
    info!(admitted = admitted, requested = requests, "Simulation finished");
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping simulation");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping simulation");
        }
    }
}
