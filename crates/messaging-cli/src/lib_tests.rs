//! Tests for the messaging-cli library module.

use super::*;
use messaging_runtime::CredentialParams;

#[test]
fn test_cli_parsing() {
    let cli = Cli::try_parse_from(["messaging", "demo", "--engine", "cached", "-n", "5", "--listen"]);
    assert!(cli.is_ok());

    let cli = cli.unwrap();
    assert_eq!(cli.env_prefix, DEFAULT_ENV_PREFIX);
    match cli.command {
        Commands::Demo {
            engine,
            messages,
            listen,
            ..
        } => {
            assert_eq!(engine, QueueEngine::Cached);
            assert_eq!(messages, 5);
            assert!(listen);
        }
        _ => panic!("Expected Demo command"),
    }
}

#[test]
fn test_global_options_after_subcommand() {
    let cli = Cli::try_parse_from(["messaging", "config", "--show", "--log-level", "debug"]).unwrap();

    assert_eq!(cli.log_level, "debug");
    assert!(matches!(
        cli.command,
        Commands::Config {
            show: true,
            format: OutputFormat::Yaml
        }
    ));
}

#[test]
fn test_unknown_engine_is_rejected() {
    assert!(Cli::try_parse_from(["messaging", "demo", "--engine", "kafka"]).is_err());
}

#[test]
fn test_config_command_validates() {
    let config = QueueConfig::new().with_queue("orders");

    let output = execute_config_command(&config, false, OutputFormat::Yaml).unwrap();

    assert_eq!(output, "Configuration is valid (queue: orders)\n");
}

#[test]
fn test_config_command_rejects_invalid() {
    let config = QueueConfig::new().with_listen_interval(Duration::ZERO);

    let result = execute_config_command(&config, true, OutputFormat::Yaml);

    assert!(matches!(result, Err(CliError::Configuration(_))));
}

#[test]
fn test_config_command_shows_redacted_credentials() {
    let config = QueueConfig::new()
        .with_queue("orders")
        .with_credential(CredentialParams::from_tuples(&[
            ("username", "admin"),
            ("password", "hunter2"),
        ]));

    let output = execute_config_command(&config, true, OutputFormat::Json).unwrap();

    assert!(output.contains("\"orders\""));
    assert!(output.contains("admin"));
    assert!(!output.contains("hunter2"));
}

#[test]
fn test_queue_configuration_errors_map_to_configuration() {
    let error: CliError = QueueError::Configuration(ConfigurationError::Missing {
        key: "queue".to_string(),
    })
    .into();

    assert!(matches!(error, CliError::Configuration(_)));
}

#[tokio::test]
async fn test_demo_memory_receive() {
    let report = execute_demo_command(QueueConfig::new(), DemoOptions::default())
        .await
        .unwrap();

    assert_eq!(report.queue, "demo");
    assert_eq!(report.sent, 3);
    assert_eq!(report.processed, 3);
    assert_eq!(report.remaining, 0);
    assert_eq!(report.counters.get("queue.demo.sent_messages"), Some(&3));
    assert_eq!(report.counters.get("queue.demo.received_messages"), Some(&3));
}

#[tokio::test]
async fn test_demo_memory_listen() {
    let config = QueueConfig::new().with_listen_interval(Duration::from_millis(50));
    let options = DemoOptions {
        listen: true,
        name: Some("listened".to_string()),
        ..DemoOptions::default()
    };

    let report = execute_demo_command(config, options).await.unwrap();

    assert_eq!(report.queue, "listened");
    assert_eq!(report.processed, 3);
    assert_eq!(report.remaining, 0);
}

#[tokio::test]
async fn test_demo_cached_engine() {
    for listen in [false, true] {
        let options = DemoOptions {
            engine: QueueEngine::Cached,
            messages: 4,
            listen,
            ..DemoOptions::default()
        };

        let report = execute_demo_command(QueueConfig::new(), options).await.unwrap();

        assert_eq!(report.engine, QueueEngine::Cached);
        assert_eq!(report.processed, 4);
        assert_eq!(report.remaining, 0);
    }
}

#[test]
fn test_report_text_rendering() {
    let report = DemoReport {
        queue: "demo".to_string(),
        engine: QueueEngine::Memory,
        sent: 2,
        processed: 2,
        remaining: 0,
        counters: BTreeMap::from([("queue.demo.sent_messages".to_string(), 2)]),
    };

    let text = report.render(OutputFormat::Text).unwrap();
    let json = report.render(OutputFormat::Json).unwrap();

    assert!(text.starts_with("Queue 'demo' (Memory): sent 2, processed 2, remaining 0"));
    assert!(text.contains("queue.demo.sent_messages = 2"));
    assert!(json.contains("\"engine\": \"memory\""));
}
