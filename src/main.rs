use clap::Parser;
use delivery_locator::config::ServiceConfig;
use delivery_locator::location::{LocationService, LocationSource, ResolvedLocation};
use delivery_locator::server;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Delivery Locator: network location resolution for delivery tracking.
///
/// Resolves this machine's location through a chain of IP geolocation
/// providers, reverse geocodes it, and falls back to a local gpsd fix.
///
/// Examples:
///   locator
///   locator --retry 5
///   locator --user
///   locator --lat 25.2048 --lon 55.2708
///   locator --serve --port 3000
#[derive(Parser)]
#[command(name = "locator", version, about, long_about = None)]
struct Cli {
    /// Resolve with up to N attempts and device fallback (1-10).
    #[arg(long, short = 'r', value_parser = clap::value_parser!(u32).range(1..=10))]
    retry: Option<u32>,

    /// Simulated customer location near the resolved one.
    #[arg(long, short = 'u')]
    user: bool,

    /// Latitude to reverse geocode (with --lon).
    #[arg(long, allow_hyphen_values = true, requires = "lon")]
    lat: Option<f64>,

    /// Longitude to reverse geocode (with --lat).
    #[arg(long, allow_hyphen_values = true, requires = "lat")]
    lon: Option<f64>,

    /// Disable the gpsd fallback.
    #[arg(long)]
    no_device: bool,

    /// Config file (JSON). Defaults to $LOCATOR_CONFIG or the user config dir.
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Run the HTTP API instead of a one-shot lookup.
    #[arg(long)]
    serve: bool,

    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 3000)]
    port: u16,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("delivery_locator=info"));

    // JSON lines when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false) {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn fail(msg: impl std::fmt::Display) -> ! {
    eprintln!("Error: {}", msg);
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    // ── Configuration ───────────────────────────────────────────

    let mut config = ServiceConfig::load(cli.config.as_deref()).unwrap_or_else(|e| fail(e));
    if cli.no_device {
        config.device.enabled = false;
    }
    if let Some(n) = cli.retry {
        config.retry.max_attempts = n;
    }

    let service = LocationService::from_config(&config).unwrap_or_else(|e| fail(e));

    if cli.serve {
        eprintln!("  Delivery Locator API on http://{}:{}", cli.host, cli.port);
        eprintln!("  Press Ctrl+C to stop.");
        if let Err(e) = server::start(&cli.host, cli.port, service).await {
            fail(format!("server on {}:{}: {}", cli.host, cli.port, e));
        }
        return;
    }

    // ── Address lookup ──────────────────────────────────────────

    if let (Some(lat), Some(lon)) = (cli.lat, cli.lon) {
        match service.user_location_at(lat, lon).await {
            Ok(loc) => print_location(&loc, "Coordinates"),
            Err(e) => fail(e),
        }
        return;
    }

    // ── Resolve ─────────────────────────────────────────────────

    if cli.user {
        match service.get_user_location().await {
            Ok(loc) => print_location(&loc, "Simulated user"),
            Err(e) => fail(e),
        }
        return;
    }

    let resolved = match cli.retry {
        Some(n) => {
            let interrupted = async {
                if tokio::signal::ctrl_c().await.is_err() {
                    std::future::pending::<()>().await;
                }
            };
            service.locate_until(n, interrupted).await
        }
        None => service
            .get_current_location()
            .await
            .map(|loc| (loc, LocationSource::Network)),
    };

    match resolved {
        Ok((loc, source)) => print_location(&loc, &source.to_string()),
        Err(e) => {
            if e.is_retryable() {
                eprintln!("  Location unavailable. Try again with --retry 3.");
            }
            fail(e)
        }
    }
}

fn print_location(loc: &ResolvedLocation, source: &str) {
    eprintln!("  [{}] {}", source, loc.display_line());
    match serde_json::to_string_pretty(loc) {
        Ok(json) => println!("{}", json),
        Err(e) => fail(e),
    }
}
