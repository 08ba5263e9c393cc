// # hostdnsd - Container Host DNS Daemon
//
// ⚠️ ARCHITECTURAL CONSTRAINTS ⚠️
//
// CRITICAL RULES:
// - This is a THIN integration layer ONLY
// - DO NOT add naming, DNS or retry logic here
// - All synchronization logic MUST be in hostdns-core
//
// The hostdnsd daemon is responsible for:
// 1. Reading configuration from the command line and environment
// 2. Initializing logging and the runtime
// 3. Wiring the Docker runtime and nameserver transport into the engine
// 4. Translating SIGINT/SIGTERM into a cancellation
//
// ## Configuration
//
// Every option can be given as a flag or an environment variable:
//
// - `--zone` / `DNS_ZONE`: Zone to update (default `docker`)
// - `--dns-server` / `DNS_SERVER`: Nameserver, `host` or `host:port` (default `127.0.0.1`)
// - `--dns-key-name` / `DNS_KEY_NAME`: TSIG key name
// - `--dns-key-secret` / `DNS_KEY_SECRET`: TSIG secret, `-` reads one line from stdin
// - `--dns-key-secret-file` / `DNS_KEY_SECRET_FILE`: File holding the TSIG secret
// - `--dns-key-algorithm` / `DNS_KEY_ALGORITHM`: TSIG algorithm (default `hmac-sha256`)
// - `--name` / `NAME`: Instance name (default: local hostname)
// - `--network` / `NETWORK`: Tracked networks, repeatable or comma-separated (default `bridge`)
// - `--clear-on-exit` / `CLEAR_ON_EXIT`: Remove published names on exit
// - `--collision-policy` / `COLLISION_POLICY`: `drop` or `suffix`
// - `--max-retries` / `MAX_RETRIES`, `--retry-delay-secs` / `RETRY_DELAY_SECS`
// - `-v` (repeatable) / `VERBOSITY` (a count), or `--log-level` / `HOSTDNS_LOG_LEVEL`
// - `--dry-run` / `DRY_RUN`: Log updates instead of sending them
//
// ## Example
//
// ```bash
// echo "$SECRET" | hostdnsd --zone docker --dns-server 10.0.0.53 \
//     --dns-key-name docker-update --dns-key-secret - -vv
// ```

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use hostdns_core::{
    CollisionPolicy, HostDnsConfig, InstanceLedger, ReconciliationEngine, StopReason,
    TsigKeyConfig,
};
use hostdns_docker::DockerRuntime;
use hostdns_nameserver::NameserverTransport;
use std::io::BufRead;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, error, info};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Time the engine gets to finish (and clear the zone) after a signal
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostDnsExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<HostDnsExitCode> for ExitCode {
    fn from(code: HostDnsExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Keep a dynamic DNS zone in sync with the containers running on this host
#[derive(Parser, Debug)]
#[command(name = "hostdnsd", version, about, long_about = None)]
struct Cli {
    /// DNS zone to update
    #[arg(long, env = "DNS_ZONE", default_value = hostdns_core::config::DEFAULT_ZONE)]
    zone: String,

    /// Nameserver receiving updates, `host` or `host:port`
    #[arg(long, env = "DNS_SERVER", default_value = "127.0.0.1")]
    dns_server: String,

    /// TSIG key name used to sign updates
    #[arg(long, env = "DNS_KEY_NAME")]
    dns_key_name: Option<String>,

    /// TSIG key secret (base64), `-` reads one line from stdin
    #[arg(long, env = "DNS_KEY_SECRET", hide_env_values = true)]
    dns_key_secret: Option<String>,

    /// File containing the TSIG key secret
    #[arg(long, env = "DNS_KEY_SECRET_FILE", conflicts_with = "dns_key_secret")]
    dns_key_secret_file: Option<PathBuf>,

    /// TSIG algorithm
    #[arg(long, env = "DNS_KEY_ALGORITHM", default_value = "hmac-sha256")]
    dns_key_algorithm: String,

    /// Name differentiating instances sharing a zone, defaults to the hostname
    #[arg(long, env = "NAME")]
    name: Option<String>,

    /// Network to publish containers from, can be repeated
    #[arg(long, env = "NETWORK", value_delimiter = ',')]
    network: Vec<String>,

    /// Remove every published name on exit
    #[arg(long, env = "CLEAR_ON_EXIT")]
    clear_on_exit: bool,

    /// What to do with a name another container already owns (drop, suffix)
    #[arg(long, env = "COLLISION_POLICY", default_value = "drop")]
    collision_policy: CollisionPolicy,

    /// Additional attempts for a failed update
    #[arg(long, env = "MAX_RETRIES", default_value_t = 0)]
    max_retries: usize,

    /// Delay between update attempts, in seconds
    #[arg(long, env = "RETRY_DELAY_SECS", default_value_t = 5)]
    retry_delay_secs: u64,

    /// More output, can be used up to 3 times
    #[arg(short, long, env = "VERBOSITY", action = ArgAction::Count)]
    verbose: u8,

    /// Explicit log level (error, warn, info, debug, trace), overrides -v
    #[arg(long, env = "HOSTDNS_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log updates instead of sending them
    #[arg(long, env = "DRY_RUN")]
    dry_run: bool,
}

impl Cli {
    /// Build the synchronizer configuration
    ///
    /// `stdin` is only read when the secret is given as `-`.
    fn into_config(self, stdin: &mut impl BufRead) -> Result<HostDnsConfig> {
        let tsig = match (&self.dns_key_name, self.secret(stdin)?) {
            (Some(name), Some(secret)) => {
                Some(TsigKeyConfig::new(name, secret).with_algorithm(&self.dns_key_algorithm))
            }
            (None, None) => None,
            (Some(_), None) => anyhow::bail!(
                "--dns-key-name requires a secret via --dns-key-secret or DNS_KEY_SECRET_FILE"
            ),
            (None, Some(_)) => anyhow::bail!("A TSIG secret was given without --dns-key-name"),
        };

        let mut config = HostDnsConfig::new(self.zone)
            .with_clear_on_exit(self.clear_on_exit)
            .with_collision_policy(self.collision_policy);
        config.dns_server = parse_dns_server(&self.dns_server)?;
        config.tsig = tsig;
        if let Some(name) = self.name {
            config = config.with_instance_name(name);
        }
        if !self.network.is_empty() {
            config = config.with_tracked_networks(self.network);
        }
        config.engine.max_retries = self.max_retries;
        config.engine.retry_delay_secs = self.retry_delay_secs;

        config.validate()?;
        Ok(config)
    }

    fn secret(&self, stdin: &mut impl BufRead) -> Result<Option<String>> {
        if let Some(secret) = &self.dns_key_secret {
            if secret != "-" {
                return Ok(Some(secret.trim().to_string()));
            }
            let mut line = String::new();
            stdin
                .read_line(&mut line)
                .context("Failed to read TSIG secret from stdin")?;
            return Ok(Some(line.trim().to_string()));
        }

        if let Some(path) = &self.dns_key_secret_file {
            let secret = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read TSIG secret file {}", path.display()))?;
            return Ok(Some(secret.trim().to_string()));
        }

        Ok(None)
    }

    fn log_level(&self) -> Result<Level> {
        match &self.log_level {
            Some(level) => match level.to_lowercase().as_str() {
                "trace" => Ok(Level::TRACE),
                "debug" => Ok(Level::DEBUG),
                "info" => Ok(Level::INFO),
                "warn" => Ok(Level::WARN),
                "error" => Ok(Level::ERROR),
                _ => anyhow::bail!(
                    "HOSTDNS_LOG_LEVEL '{}' is not valid. \
                    Valid levels: trace, debug, info, warn, error",
                    level
                ),
            },
            None => Ok(match self.verbose {
                0 => Level::ERROR,
                1 => Level::WARN,
                2 => Level::INFO,
                _ => Level::DEBUG,
            }),
        }
    }
}

/// Accept `host`, `host:port`, `ip` or `ip:port`; port 53 when omitted
fn parse_dns_server(server: &str) -> Result<SocketAddr> {
    if let Ok(addr) = server.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = server.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, 53));
    }

    let target = if server.contains(':') {
        server.to_string()
    } else {
        format!("{server}:53")
    };
    target
        .to_socket_addrs()
        .with_context(|| format!("Cannot resolve DNS server '{server}'"))?
        .next()
        .with_context(|| format!("DNS server '{server}' has no address"))
}

/// Exit code for the engine's outcome
fn exit_code(result: &hostdns_core::Result<StopReason>) -> HostDnsExitCode {
    match result {
        Ok(StopReason::Cancelled) => HostDnsExitCode::CleanShutdown,
        Ok(StopReason::Disconnected) => HostDnsExitCode::RuntimeError,
        Err(e) if e.is_fatal() => HostDnsExitCode::ConfigError,
        Err(_) => HostDnsExitCode::RuntimeError,
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = match cli.log_level() {
        Ok(level) => level,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return HostDnsExitCode::ConfigError.into();
        }
    };
    let dry_run = cli.dry_run;

    // Load configuration (the secret may come from stdin)
    let config = match cli.into_config(&mut std::io::stdin().lock()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return HostDnsExitCode::ConfigError.into();
        }
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return HostDnsExitCode::ConfigError.into();
    }

    info!("Starting hostdnsd daemon");
    info!(
        "Managing zone {} on {} as instance {}",
        config.zone, config.dns_server, config.instance_name
    );
    match serde_json::to_string(&config) {
        Ok(json) => debug!("Effective configuration: {}", json),
        Err(e) => debug!("Could not serialize configuration: {}", e),
    }

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return HostDnsExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(run_daemon(config, dry_run));
    if let Err(e) = &result {
        error!("Daemon error: {}", e);
    }

    exit_code(&result).into()
}

/// Run the daemon until a signal arrives or the engine stops on its own
async fn run_daemon(config: HostDnsConfig, dry_run: bool) -> hostdns_core::Result<StopReason> {
    let runtime = DockerRuntime::connect()?;
    let transport = NameserverTransport::from_config(&config, dry_run)?;

    let (mut engine, mut events) = ReconciliationEngine::new(
        Box::new(runtime),
        Box::new(transport),
        InstanceLedger::new(),
        config,
    )?;

    let cancel = CancellationToken::new();
    let run = engine.run(cancel.clone());
    tokio::pin!(run);

    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut run => return result,

            Some(event) = events.recv() => debug!("Engine event: {:?}", event),

            signal = &mut shutdown => {
                let signal = signal?;
                info!("Received shutdown signal: {}", signal);
                cancel.cancel();
                break;
            }
        }
    }

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, run).await {
        Ok(result) => result,
        Err(_) => Err(hostdns_core::Error::Other(format!(
            "Shutdown timeout after {:?}",
            SHUTDOWN_TIMEOUT
        ))),
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// # Returns
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> hostdns_core::Result<&'static str> {
    // Set up signal handlers for SIGTERM and SIGINT
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> hostdns_core::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("SIGINT")
}
