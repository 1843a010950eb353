//! # Messaging CLI
//!
//! Command-line interface for the messaging runtime.
//!
//! This module provides CLI commands for:
//! - Configuration validation and inspection
//! - Running an in-process demo of the queue engines
//!
//! Queue configuration is read from an optional file (`--config`, or the
//! `MESSAGING_CONFIG` environment variable) and from environment variables
//! named `MESSAGING__<KEY>`, e.g. `MESSAGING__OPTIONS__LISTEN_INTERVAL=250`.

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use messaging_runtime::testing::LoopbackTransport;
use messaging_runtime::{
    CachedMessageQueue, ConfigurationError, Context, InMemoryMetricsCollector, MemoryMessageQueue,
    MessageEnvelope, MessageQueue, MessageReceiver, QueueConfig, QueueDependencies, QueueError,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

/// Prefix of environment variables overriding queue configuration
pub const DEFAULT_ENV_PREFIX: &str = "MESSAGING";

/// Queue name used by the demo when none is configured
const DEMO_QUEUE_NAME: &str = "demo";

const POLL_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// CLI Structure
// ============================================================================

/// Messaging CLI - message queue engine tooling
#[derive(Parser, Debug)]
#[command(name = "messaging")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect queue configuration and exercise the queue engines")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "MESSAGING_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Prefix of environment variables overriding configuration
    #[arg(long, default_value = DEFAULT_ENV_PREFIX, global = true)]
    pub env_prefix: String,

    /// Logging level
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate configuration
    Config {
        /// Show resolved configuration
        #[arg(short, long)]
        show: bool,

        /// Output format for configuration
        #[arg(short = 'f', long, default_value = "yaml")]
        format: OutputFormat,
    },

    /// Send messages through a queue engine and process them
    Demo {
        /// Queue engine to run
        #[arg(short, long, default_value = "memory")]
        engine: QueueEngine,

        /// Number of messages to send
        #[arg(short = 'n', long, default_value = "3")]
        messages: usize,

        /// Process messages with a listener instead of receive calls
        #[arg(long)]
        listen: bool,

        /// Queue name, overriding the configured one
        #[arg(long)]
        name: Option<String>,

        /// Seconds to wait for all messages to be processed
        #[arg(short, long, default_value = "10")]
        timeout: u64,

        /// Output format for the report
        #[arg(short = 'f', long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON output
    Json,
    /// YAML output
    Yaml,
}

/// Queue engines available to the demo
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEngine {
    /// In-memory queue with leases
    Memory,
    /// Message cache over a loopback push transport
    Cached,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Queue error: {0}")]
    Queue(QueueError),

    #[error("Command failed: {message}")]
    CommandFailed { message: String },

    #[error("Output formatting failed: {0}")]
    Output(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<QueueError> for CliError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Configuration(e) => Self::Configuration(e),
            other => Self::Queue(other),
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    initialize_logging(&cli)?;

    let output = run(cli).await?;
    print!("{}", output);
    Ok(())
}

/// Load configuration and execute the parsed command, returning its output
pub async fn run(cli: Cli) -> Result<String, CliError> {
    let config = QueueConfig::load(cli.config.as_deref(), &cli.env_prefix)?;

    match cli.command {
        Commands::Config { show, format } => execute_config_command(&config, show, format),
        Commands::Demo {
            engine,
            messages,
            listen,
            name,
            timeout,
            format,
        } => {
            let options = DemoOptions {
                engine,
                messages,
                listen,
                name,
                timeout: Duration::from_secs(timeout),
            };
            let report = execute_demo_command(config, options).await?;
            report.render(format)
        }
    }
}

/// Initialize logging based on CLI arguments.
///
/// `RUST_LOG` takes precedence over `--log-level`. Logs go to stderr so
/// command output on stdout stays machine readable.
pub fn initialize_logging(cli: &Cli) -> Result<(), CliError> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&cli.log_level))
        .map_err(|e| CliError::CommandFailed {
            message: format!("invalid log level '{}': {}", cli.log_level, e),
        })?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if cli.json_logs {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| CliError::CommandFailed {
        message: format!("failed to initialize logging: {}", e),
    })
}

// ============================================================================
// Config Command
// ============================================================================

/// Validate `config` and optionally render it with secrets redacted
pub fn execute_config_command(
    config: &QueueConfig,
    show: bool,
    format: OutputFormat,
) -> Result<String, CliError> {
    config.validate()?;

    let mut output = format!(
        "Configuration is valid (queue: {})\n",
        config.resolve_name().unwrap_or("undefined")
    );

    if show {
        let mut printable = config.clone();
        printable.credential = printable.credential.map(|c| c.redacted());
        output.push_str(&render(&printable, format)?);
    }

    Ok(output)
}

fn render<T: Serialize>(value: &T, format: OutputFormat) -> Result<String, CliError> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(value)
            .map(|text| text + "\n")
            .map_err(|e| CliError::Output(e.to_string())),
        OutputFormat::Yaml | OutputFormat::Text => {
            serde_yaml::to_string(value).map_err(|e| CliError::Output(e.to_string()))
        }
    }
}

// ============================================================================
// Demo Command
// ============================================================================

/// Options of the demo command
#[derive(Debug, Clone)]
pub struct DemoOptions {
    pub engine: QueueEngine,
    pub messages: usize,
    pub listen: bool,
    pub name: Option<String>,
    pub timeout: Duration,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            engine: QueueEngine::Memory,
            messages: 3,
            listen: false,
            name: None,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Outcome of a demo run
#[derive(Debug, Clone, Serialize)]
pub struct DemoReport {
    pub queue: String,
    pub engine: QueueEngine,
    pub sent: usize,
    pub processed: usize,
    pub remaining: usize,
    pub counters: BTreeMap<String, i64>,
}

impl DemoReport {
    pub fn render(&self, format: OutputFormat) -> Result<String, CliError> {
        match format {
            OutputFormat::Text => {
                let mut text = format!(
                    "Queue '{}' ({:?}): sent {}, processed {}, remaining {}\n",
                    self.queue, self.engine, self.sent, self.processed, self.remaining
                );
                for (name, value) in &self.counters {
                    let _ = writeln!(text, "  {} = {}", name, value);
                }
                Ok(text)
            }
            other => render(self, other),
        }
    }
}

/// Receiver completing every message it is given
#[derive(Debug, Default)]
struct DemoReceiver {
    processed: AtomicUsize,
}

impl DemoReceiver {
    fn processed(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageReceiver for DemoReceiver {
    async fn receive_message(
        &self,
        envelope: &mut MessageEnvelope,
        queue: &dyn MessageQueue,
    ) -> anyhow::Result<()> {
        info!(queue = queue.name(), message = %envelope, "Processing message");
        queue.complete(envelope).await?;
        self.processed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Send messages through the selected engine and process them
pub async fn execute_demo_command(
    config: QueueConfig,
    options: DemoOptions,
) -> Result<DemoReport, CliError> {
    let config = match (&options.name, config.resolve_name()) {
        (Some(name), _) => config.with_queue(name.as_str()),
        (None, Some(_)) => config,
        (None, None) => config.with_queue(DEMO_QUEUE_NAME),
    };

    let metrics = Arc::new(InMemoryMetricsCollector::new());
    let dependencies = QueueDependencies::from_config(&config).with_metrics(metrics.clone());
    let queue: Arc<dyn MessageQueue> = match options.engine {
        QueueEngine::Memory => Arc::new(MemoryMessageQueue::from_config(&config, dependencies)?),
        QueueEngine::Cached => {
            CachedMessageQueue::from_config(&config, dependencies, LoopbackTransport::new())?
        }
    };

    let context = Context::from_trace_id("demo");
    queue.open(&context).await?;

    for sequence in 0..options.messages {
        queue
            .send_as_object(
                &context,
                "demo_message",
                serde_json::json!({ "sequence": sequence }),
            )
            .await?;
    }
    info!(queue = queue.name(), count = options.messages, "Sent demo messages");

    let receiver = Arc::new(DemoReceiver::default());
    let deadline = Instant::now() + options.timeout;

    if options.listen {
        let handle = Arc::clone(&queue).begin_listen(context.clone(), receiver.clone());
        while receiver.processed() < options.messages && Instant::now() < deadline {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        queue.end_listen(&context).await?;
        handle.await.map_err(|e| CliError::CommandFailed {
            message: format!("listener task failed: {}", e),
        })?;
    } else {
        while receiver.processed() < options.messages {
            let wait = deadline.saturating_duration_since(Instant::now());
            let Some(mut envelope) = queue.receive(&context, wait).await? else {
                break;
            };
            receiver
                .receive_message(&mut envelope, queue.as_ref())
                .await
                .map_err(|e| CliError::CommandFailed {
                    message: e.to_string(),
                })?;
        }
    }

    if receiver.processed() < options.messages {
        warn!(
            queue = queue.name(),
            processed = receiver.processed(),
            expected = options.messages,
            "Timed out before all demo messages were processed"
        );
    }

    let remaining = queue.read_message_count().await?;
    queue.close(&context).await?;

    Ok(DemoReport {
        queue: queue.name().to_string(),
        engine: options.engine,
        sent: options.messages,
        processed: receiver.processed(),
        remaining,
        counters: metrics.snapshot().into_iter().collect(),
    })
}
