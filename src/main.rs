use std::process::ExitCode;
use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use mdkit::cache::UrlCache;
use mdkit::cli::{resolve_anchor_dir, Cli};
use mdkit::config::parse_config;
use mdkit::discovery::FileDiscovery;
use mdkit::formatter::{format, is_formatted, Formatter};
use mdkit::metrics::LinkMetrics;
use mdkit::transform::{Localizer, TransformChain};
use mdkit::validator::LinkValidator;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("mdkit: {}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    // Process-wide cancellation: first ctrl-c flips the watch channel,
    // aborting pending probes and retries.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling pending checks");
            let _ = shutdown_tx.send(true);
        }
    });

    let discovery = FileDiscovery::new().with_extensions(cli.get_extensions());
    let files = discovery.discover(&cli.files).await?;
    if files.is_empty() {
        tracing::warn!("no markdown files found in the given paths");
        return Ok(());
    }

    let files: Vec<_> = files
        .iter()
        .map(|f| {
            if f.is_absolute() {
                Ok(f.clone())
            } else {
                std::env::current_dir().map(|cwd| cwd.join(f))
            }
        })
        .collect::<Result<_, _>>()?;
    let anchor_dir = resolve_anchor_dir(cli.anchor_dir.as_deref(), &files)?;

    let metrics = Arc::new(LinkMetrics::new());
    let mut formatter = Formatter::new()
        .with_soft_wraps(cli.soft_wraps)
        .with_no_code_format(cli.no_code_format)
        .with_metrics(Arc::clone(&metrics));

    let mut chain = TransformChain::new();
    if let Some(pattern) = &cli.links_localize_address_regex {
        let address = regex::Regex::new(pattern)
            .map_err(|e| format!("invalid --links-localize-address-regex: {}", e))?;
        chain = chain.with(Box::new(Localizer::new(address, &anchor_dir)));
    }
    if cli.links_validate {
        let config = parse_config(&cli.validate_config_content()?)?;
        let storage = if config.cache.is_set() {
            Some(Arc::new(UrlCache::open(
                &cli.cache_path,
                config.cache.validity(),
                config.cache.jitter(),
                cli.clear_cache,
            )?))
        } else {
            None
        };
        let validator = LinkValidator::new(
            config,
            &anchor_dir,
            storage,
            Some(Arc::clone(&metrics)),
            shutdown_rx.clone(),
        )
        .await?;
        chain = chain.with(Box::new(validator));
    }
    if !chain.is_empty() {
        formatter = formatter.with_link_transformer(chain);
    }

    if cli.check {
        let diffs = is_formatted(&files, &mut formatter).await?;
        report_metrics(&metrics);
        if !diffs.is_empty() {
            println!("{}", diffs);
            return Err(format!("{} file(s) need formatting", diffs.len()).into());
        }
        tracing::info!(files = files.len(), "all files formatted");
        return Ok(());
    }

    format(&files, &mut formatter).await?;
    report_metrics(&metrics);
    tracing::info!(files = files.len(), "formatted");
    Ok(())
}

fn report_metrics(metrics: &LinkMetrics) {
    let snap = metrics.snapshot();
    if snap.local_links_checked + snap.remote_links_checked > 0 {
        tracing::info!(
            local = snap.local_links_checked,
            remote = snap.remote_links_checked,
            visited = snap.round_trip_visited,
            cached = snap.round_trip_cached,
            github_skipped = snap.github_skipped,
            ignored = snap.ignore_skipped,
            "link check summary"
        );
    }
}
