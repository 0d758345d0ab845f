//  ██████╗███████╗██████╗     ██████╗  █████╗  ██████╗███████╗
// ██╔════╝██╔════╝██╔══██╗    ██╔══██╗██╔══██╗██╔════╝██╔════╝
// ██║     █████╗  ██████╔╝    ██████╔╝███████║██║     █████╗
// ██║     ██╔══╝  ██╔═══╝     ██╔══██╗██╔══██║██║     ██╔══╝
// ╚██████╗███████╗██║         ██║  ██║██║  ██║╚██████╗███████╗
//  ╚═════╝╚══════╝╚═╝         ╚═╝  ╚═╝╚═╝  ╚═╝ ╚═════╝╚══════╝
//
// E N G I N E
//
// Ask ViaCEP and BrasilAPI for the same postal code at the same time.
// Believe whoever answers first. Give up after a second.

mod config;
mod error;
mod fetchers;
mod metrics;
mod models;
mod presenter;
mod race;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{Cli, Config, LogFormat};
use crate::metrics::RaceMetrics;
use crate::models::PostalCode;
use crate::race::Coordinator;

fn print_banner() {
    let banner = r#"
    ╔════════════════════════════════════════════════╗
    ║   ⚡ CEP RACE ENGINE ⚡                         ║
    ║                                                ║
    ║   Lane 1:  ViaCEP                              ║
    ║   Lane 2:  BrasilAPI                           ║
    ║   Rules:   first to the finish line wins       ║
    ╚════════════════════════════════════════════════╝
    "#;
    println!("{}", banner);
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Pretty => fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_ansi(true)
            .init(),
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
    }
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = Config::from_env().with_cli(cli);

    init_tracing(config.log_format);
    if config.log_format == LogFormat::Pretty {
        print_banner();
    }

    match run(&config).await {
        Ok(status) => ExitCode::from(status),
        Err(err) => {
            error!(error = %format!("{err:#}"), "startup failed");
            ExitCode::from(presenter::EXIT_STARTUP)
        }
    }
}

/// One lookup, start to finish. Returns the process exit status.
async fn run(config: &Config) -> anyhow::Result<u8> {
    info!(
        postal_code = %config.postal_code,
        deadline_ms = u64::try_from(config.deadline.as_millis()).unwrap_or(u64::MAX),
        policy = %config.race_policy,
        viacep = %config.viacep_base_url,
        brasilapi = %config.brasilapi_base_url,
        log_format = %config.log_format,
        "configuration loaded"
    );

    let client = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .user_agent(config.user_agent.as_str())
        .build()
        .context("failed to build HTTP client")?;

    let coordinator = Coordinator::new(
        client,
        fetchers::from_config(config),
        config.race_policy,
        Arc::new(RaceMetrics::new()),
    );

    let query = PostalCode::new(config.postal_code.clone());
    let result = coordinator.race(&query, config.deadline).await;
    presenter::present(&result);

    let snapshot = serde_json::to_string(&coordinator.metrics().snapshot()).context("failed to serialize metrics")?;
    debug!(metrics = %snapshot, "race metrics");

    Ok(presenter::exit_code(&result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;
    use std::time::Duration;

    use serde_json::Value;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Collects JSON log lines written by the test subscriber.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn events(&self) -> Vec<Value> {
            let bytes = self.0.lock().unwrap().clone();
            String::from_utf8(bytes)
                .unwrap()
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(|line| serde_json::from_str(line).unwrap())
                .collect()
        }
    }

    /// Run with every INFO+ event on this thread captured as JSON.
    async fn run_logged(config: &Config) -> (u8, Vec<Value>) {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = fmt()
            .json()
            .with_max_level(tracing::Level::INFO)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let status = run(config).await.unwrap();
        (status, logs.events())
    }

    fn with_message<'a>(events: &'a [Value], message: &str) -> Vec<&'a Value> {
        events
            .iter()
            .filter(|event| event["fields"]["message"] == message)
            .collect()
    }

    async fn backend(route: &str, template: ResponseTemplate) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(template)
            .mount(&server)
            .await;
        server
    }

    fn config(viacep: &MockServer, brasilapi: &MockServer, deadline: Duration) -> Config {
        Config {
            postal_code: "01153000".to_string(),
            deadline,
            viacep_base_url: viacep.uri(),
            brasilapi_base_url: brasilapi.uri(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_run_finds_an_address() {
        let viacep = backend(
            "/ws/01153000/json/",
            ResponseTemplate::new(200)
                .set_body_string(r#"{"cep":"01153000","logradouro":"Rua X"}"#)
                .set_delay(Duration::from_millis(50)),
        )
        .await;
        let brasilapi = backend(
            "/api/cep/v1/01153000",
            ResponseTemplate::new(200)
                .set_body_string(r#"{"cep":"01153000","street":"Rua X"}"#)
                .set_delay(Duration::from_millis(200)),
        )
        .await;

        let config = config(&viacep, &brasilapi, Duration::from_millis(1000));
        let (status, events) = run_logged(&config).await;

        assert_eq!(status, presenter::EXIT_FOUND);
        let lines = with_message(&events, "ViaCEP response");
        assert_eq!(lines.len(), 1, "events: {events:?}");
        assert_eq!(lines[0]["level"], "INFO");
        assert_eq!(lines[0]["fields"]["backend"], "ViaCEP");
        let data = lines[0]["fields"]["data"].as_str().unwrap();
        assert!(data.contains(r#""logradouro":"Rua X""#), "data: {data}");
        assert!(with_message(&events, "BrasilAPI response").is_empty());
    }

    #[tokio::test]
    async fn test_run_reports_timeout() {
        let slow = ResponseTemplate::new(200)
            .set_body_string("{}")
            .set_delay(Duration::from_millis(500));
        let viacep = backend("/ws/01153000/json/", slow.clone()).await;
        let brasilapi = backend("/api/cep/v1/01153000", slow).await;

        let config = config(&viacep, &brasilapi, Duration::from_millis(1));
        let (status, events) = run_logged(&config).await;

        assert_eq!(status, presenter::EXIT_TIMED_OUT);
        let errors: Vec<&Value> = events.iter().filter(|event| event["level"] == "ERROR").collect();
        assert_eq!(errors.len(), 1, "events: {events:?}");
        assert_eq!(errors[0]["fields"]["message"], "request timed out");
        assert!(events.iter().all(|event| event["fields"].get("data").is_none()));
    }

    #[tokio::test]
    async fn test_run_reports_failure() {
        let viacep = backend("/ws/01153000/json/", ResponseTemplate::new(503)).await;
        let brasilapi = backend(
            "/api/cep/v1/01153000",
            ResponseTemplate::new(200)
                .set_body_string("{}")
                .set_delay(Duration::from_millis(300)),
        )
        .await;

        let config = config(&viacep, &brasilapi, Duration::from_millis(1000));
        let (status, events) = run_logged(&config).await;

        assert_eq!(status, presenter::EXIT_FAILED);
        let failures = with_message(&events, "request failed");
        assert_eq!(failures.len(), 1, "events: {events:?}");
        let error = failures[0]["fields"]["error"].as_str().unwrap();
        assert!(error.contains("503"), "error: {error}");
        assert!(events.iter().all(|event| event["fields"].get("data").is_none()));
    }
}
