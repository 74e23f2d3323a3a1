//! gapfuzz - HTTP request gap fuzzer
//!
//! Injects payloads into marked spans of a raw HTTP request, sends every
//! combination and reports which payloads came back in the response.

mod anticsrf;
mod app;
mod error;
mod fuzzer;
mod http;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::anticsrf::{AntiCsrfToken, AntiCsrfTokenSource, FormTokenExtractor};
use crate::app::Config;
use crate::error::{ConfigError, FuzzerError, GapfuzzError, HttpError, UserHint};
use crate::fuzzer::{
    parse_marked_request, AttackMode, Entry, FuzzGap, FuzzGapSet, FuzzLocation, FuzzProcessFactory,
    FuzzResultsModel, Fuzzer, FuzzerConfig, PayloadSet,
};
use crate::http::{HttpMessage, HttpSender};

/// HTTP request gap fuzzer
#[derive(Parser, Debug)]
#[command(name = "gapfuzz")]
#[command(author, version, about = "HTTP request gap fuzzer", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "GAPFUZZ_CONFIG")]
    config: Option<String>,

    /// Raw HTTP request file; wrap each value to fuzz in §...§
    #[arg(
        short,
        long,
        env = "GAPFUZZ_REQUEST",
        required_unless_present_any = ["generate_config", "validate_config"]
    )]
    request: Option<PathBuf>,

    /// Wordlist file or built-in set (sqli, xss, path_traversal) for each gap
    /// in order; the last one is reused for remaining gaps
    #[arg(short, long = "wordlist")]
    wordlists: Vec<String>,

    /// Attack mode (sniper, battering_ram, pitchfork, cluster_bomb)
    #[arg(short, long, env = "GAPFUZZ_MODE")]
    mode: Option<AttackMode>,

    /// Scheme for origin-form request URIs (http or https)
    #[arg(long, env = "GAPFUZZ_SCHEME")]
    scheme: Option<String>,

    /// Maximum concurrent requests
    #[arg(long, env = "GAPFUZZ_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Delay between requests in milliseconds
    #[arg(long, env = "GAPFUZZ_DELAY_MS")]
    delay_ms: Option<u64>,

    /// Do not follow redirects
    #[arg(long)]
    no_follow_redirects: bool,

    /// Name of an anti-CSRF token to refresh before every request
    #[arg(long, requires = "csrf_source")]
    csrf_token: Option<String>,

    /// Raw HTTP request file for the page carrying the anti-CSRF token
    #[arg(long, requires = "csrf_token")]
    csrf_source: Option<PathBuf>,

    /// Include token fetch requests in the results
    #[arg(long)]
    show_token_requests: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "GAPFUZZ_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log file path (enables file logging)
    #[arg(long, env = "GAPFUZZ_LOG_FILE")]
    log_file: Option<String>,

    /// Enable JSON structured logging
    #[arg(long, env = "GAPFUZZ_LOG_JSON")]
    log_json: bool,

    /// Generate default configuration and exit
    #[arg(long)]
    generate_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.generate_config {
        return generate_default_config();
    }

    let config = load_config(&cli)?;
    init_logging(&cli, &config)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting gapfuzz");

    if cli.validate_config {
        tracing::info!("Configuration is valid");
        println!("Configuration is valid");
        return Ok(());
    }

    let result = run(cli, config).await;
    if let Err(e) = &result {
        if let Some(hint) = user_hint(e) {
            eprintln!("hint: {}", hint);
        }
    }
    result
}

/// Initialize the logging system. Console output goes to stderr so stdout
/// carries only the results table.
fn init_logging(cli: &Cli, config: &Config) -> Result<()> {
    let level = cli.log_level.as_deref().unwrap_or(&config.general.log_level);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if let Some(log_path) = &cli.log_file {
        let file_appender = log_file_appender(log_path, config)?;

        if cli.log_json {
            let file_layer = fmt::layer()
                .json()
                .with_writer(file_appender)
                .with_ansi(false);

            subscriber.with(file_layer).init();
        } else {
            let file_layer = fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false);

            subscriber.with(file_layer).init();
        }
    } else if cli.log_json {
        subscriber.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        subscriber.with(fmt::layer().with_writer(std::io::stderr)).init();
    }

    Ok(())
}

/// Daily rotating appender; a bare file name lands in the configured log
/// directory, or the data directory when none is set
fn log_file_appender(log_path: &str, config: &Config) -> Result<RollingFileAppender> {
    let path = Path::new(log_path);
    let explicit_dir = path.parent().filter(|p| !p.as_os_str().is_empty());

    let (dir, filename) = match (explicit_dir, path.file_name()) {
        (Some(dir), Some(name)) => (dir.to_path_buf(), PathBuf::from(name)),
        _ => {
            let dir = match &config.general.log_dir {
                Some(dir) => dir.clone(),
                None => Config::data_dir()?.join("logs"),
            };
            (dir, PathBuf::from(log_path))
        }
    };

    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create log directory {:?}", dir))?;
    Ok(RollingFileAppender::new(Rotation::DAILY, dir, filename))
}

/// Load configuration with CLI overrides
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;

    if let Some(mode) = cli.mode {
        config.fuzzer.attack_mode = mode;
    }
    if let Some(concurrency) = cli.concurrency {
        config.fuzzer.max_concurrent = concurrency;
    }
    if let Some(delay_ms) = cli.delay_ms {
        config.fuzzer.delay_ms = delay_ms;
    }
    if cli.no_follow_redirects {
        config.fuzzer.follow_redirects = false;
    }
    if let Some(scheme) = &cli.scheme {
        config.transport.default_scheme = scheme.to_lowercase();
    }
    if cli.show_token_requests {
        config.anti_csrf.show_token_requests = true;
    }
    if let Some(name) = &cli.csrf_token {
        let lower = name.to_lowercase();
        if !config.anti_csrf.token_names.iter().any(|n| lower.contains(&n.to_lowercase())) {
            config.anti_csrf.token_names.push(name.clone());
        }
    }

    config.validate()?;
    Ok(config)
}

/// Generate default configuration file
fn generate_default_config() -> Result<()> {
    let config = Config::default();
    let toml = toml::to_string_pretty(&config).context("Failed to serialize configuration")?;

    println!("{}", toml);
    Ok(())
}

/// Run one fuzzing session and print the results
async fn run(cli: Cli, config: Config) -> Result<()> {
    let request_path = cli.request.as_ref().context("--request is required")?;
    let raw = std::fs::read_to_string(request_path)
        .with_context(|| format!("Failed to read request file {:?}", request_path))?;

    let marked = parse_marked_request(&raw)?;
    if marked.locations.is_empty() {
        return Err(FuzzerError::NoGaps.into());
    }

    let mut factory = FuzzProcessFactory::new(
        marked.message,
        &config.transport,
        config.fuzzer.follow_redirects,
    )?;
    let gaps = build_gaps(factory.base_message(), &marked.locations, &cli.wordlists)?;

    if let (Some(name), Some(source)) = (&cli.csrf_token, &cli.csrf_source) {
        let extractor = FormTokenExtractor::new(&config.anti_csrf)
            .context("Invalid anti-CSRF token name pattern")?;
        let sender = factory.sender();
        let token = fetch_initial_token(name, source, sender.as_ref(), &extractor).await?;
        tracing::info!(token = %token.name, "Synchronising anti-CSRF token");
        factory = factory.with_anti_csrf(token, Arc::new(extractor), config.anti_csrf.show_token_requests);
    }

    let fuzzer = Arc::new(Fuzzer::new(FuzzerConfig::from(&config.fuzzer)));

    let stopper = fuzzer.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C, stopping fuzzer");
            stopper.stop();
        }
    });

    let results = fuzzer
        .fuzz(Arc::new(factory), &gaps, config.fuzzer.attack_mode)
        .await?;

    print_results(&results);

    let stats = fuzzer.stats();
    println!(
        "\n{} sent, {} reflected, {} errors in {}ms ({:.1} req/s)",
        stats.requests_sent,
        stats.reflected_count,
        stats.errors,
        stats.elapsed_ms,
        stats.requests_per_second
    );

    Ok(())
}

/// Attach a wordlist to every marked location
fn build_gaps(
    base: &Arc<HttpMessage>,
    locations: &[FuzzLocation],
    wordlists: &[String],
) -> Result<Vec<FuzzGap>> {
    if wordlists.is_empty() {
        anyhow::bail!("At least one --wordlist is required");
    }

    let sets = wordlists
        .iter()
        .map(|w| load_wordlist(w))
        .collect::<Result<Vec<_>>>()?;

    let mut gaps = FuzzGapSet::new();
    for (i, location) in locations.iter().enumerate() {
        let set = &sets[i.min(sets.len() - 1)];
        let mut gap = FuzzGap::new(*location, base.clone());
        gap.add_payloads(set.payloads.iter().cloned());

        tracing::debug!(
            begin = location.begin(),
            end = location.end(),
            original = ?gap.original_value().ok(),
            wordlist = %set.name,
            payloads = set.len(),
            "Defined fuzz gap"
        );
        gaps.add(gap)?;
    }

    Ok(gaps.as_slice().to_vec())
}

/// A wordlist file, or a built-in set when no such file exists
fn load_wordlist(source: &str) -> Result<PayloadSet> {
    let path = Path::new(source);
    if !path.exists() {
        if let Some(set) = PayloadSet::builtin(source) {
            return Ok(set);
        }
    }
    Ok(PayloadSet::from_file(path)?)
}

/// Send the token source request once over the fuzzing transport and take
/// the named token from it
async fn fetch_initial_token(
    name: &str,
    source: &Path,
    sender: &dyn HttpSender,
    extractor: &FormTokenExtractor,
) -> Result<AntiCsrfToken> {
    let raw = std::fs::read_to_string(source)
        .with_context(|| format!("Failed to read token source request {:?}", source))?;
    let mut message = HttpMessage::from_raw_request(&raw)?;

    sender
        .send_and_receive(&mut message)
        .await
        .context("Failed to fetch anti-CSRF token source")?;

    extractor
        .get_tokens(&message)
        .into_iter()
        .find(|t| t.name.eq_ignore_ascii_case(name))
        .with_context(|| {
            format!(
                "Token '{}' not found in response from {}",
                name, message.request_header.uri
            )
        })
}

fn print_results(results: &FuzzResultsModel) {
    println!(
        "{:<10} {:<7} {:>6} {:<20} {:>8} {:>9}  {:<24} PAYLOADS",
        "ID", "METHOD", "STATUS", "REASON", "RTT(ms)", "SIZE", "RESULT"
    );
    for entry in results.entries() {
        print_entry(entry, 0);
    }
}

fn print_entry(entry: &Entry, depth: usize) {
    let name = format!("{}{}", "  ".repeat(depth), entry.name());
    let status = match entry.status() {
        s if s <= 0 => "-".to_string(),
        s => s.to_string(),
    };
    let payloads = match entry {
        Entry::Record(record) => record.payloads.join(", "),
        Entry::Group(_) => String::new(),
    };

    println!(
        "{:<10} {:<7} {:>6} {:<20} {:>8} {:>9}  {:<24} {}",
        name,
        entry.method(),
        status,
        entry.reason(),
        entry.rtt_ms(),
        entry.size(),
        entry.result().label(),
        payloads
    );

    if let Entry::Group(group) = entry {
        for member in group.members() {
            print_entry(member, depth + 1);
        }
    }
}

/// Friendly explanation for errors raised by this crate
fn user_hint(error: &anyhow::Error) -> Option<String> {
    if let Some(e) = error.downcast_ref::<GapfuzzError>() {
        return Some(e.user_message());
    }
    if let Some(e) = error.downcast_ref::<FuzzerError>() {
        return Some(e.user_hint());
    }
    if let Some(e) = error.downcast_ref::<HttpError>() {
        return Some(e.user_hint());
    }
    error.downcast_ref::<ConfigError>().map(|e| e.user_hint())
}
