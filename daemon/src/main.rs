//! deployd - Entry Point
//!
//! Runs the deployment daemon, or acts as a client of a running one:
//! `--submit=<referenceId>` submits a deployment and follows it to completion,
//! `--list` and `--cancel=<jobId>` inspect and stop jobs.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use deploy_api::{CreateDeploymentRequest, DeploymentMode, DeploymentStatus};
use tracing::{error, info};

use deployd::app::options::AppOptions;
use deployd::app::run::run;
use deployd::deploy::credentials::CredentialMaterial;
use deployd::filesys::file::File;
use deployd::http::client::HttpClient;
use deployd::logs::{init_logging, LogLevel, LogOptions};
use deployd::storage::layout::StorageLayout;
use deployd::storage::settings::Settings;
use deployd::utils::version_info;
use deployd::workers::poller;

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return ExitCode::SUCCESS;
    }

    // Client mode
    if ["submit", "list", "cancel"].iter().any(|k| cli_args.contains_key(*k)) {
        let _ = init_logging(LogOptions {
            log_level: LogLevel::Warn,
            ..Default::default()
        });
        return match client_command(&cli_args).await {
            Ok(true) => ExitCode::SUCCESS,
            Ok(false) => ExitCode::FAILURE,
            Err(e) => {
                eprintln!("deployd: {:#}", e);
                ExitCode::FAILURE
            }
        };
    }

    // Run the daemon starting here

    let layout = match cli_args.get("base-dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };

    // Retrieve the settings file
    let settings_file = match cli_args.get("settings") {
        Some(path) => File::new(PathBuf::from(path)),
        None => layout.settings_file(),
    };
    let settings = match Settings::load_or_default(&settings_file).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings file: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging; the guard flushes file output on exit
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_to_file: settings.log_to_file,
        log_dir: layout.logs_dir().path().to_path_buf(),
        json_format: settings.log_json,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    let mut options = AppOptions::from_settings(&settings, layout);
    options.credential_material = CredentialMaterial::from_env();
    if cli_args.contains_key("demo") {
        options.demo_mode = true;
    }
    if let Some(port) = cli_args.get("port") {
        match port.parse() {
            Ok(port) => options.server.port = port,
            Err(_) => {
                error!("Invalid --port value: {}", port);
                return ExitCode::FAILURE;
            }
        }
    }

    info!("Running deployd {} with options: {:?}", version.version, options);
    match run(options, await_shutdown_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Failed to run deployd: {e}");
            ExitCode::FAILURE
        }
    }
}

/// `--submit`, `--list` or `--cancel` against a running daemon; `Ok(false)`
/// means the command ran but the deployment did not succeed
async fn client_command(cli_args: &HashMap<String, String>) -> anyhow::Result<bool> {
    let server = cli_args
        .get("server")
        .map(String::as_str)
        .unwrap_or("http://127.0.0.1:8080");
    let client = HttpClient::new(server)?;

    if let Some(job_id) = cli_args.get("cancel") {
        let response = client
            .cancel_deployment(job_id)
            .await
            .with_context(|| format!("cancelling {}", job_id))?;
        println!("Cancellation requested for {}", response.job_id);
        return Ok(response.cancelled);
    }

    if cli_args.contains_key("list") {
        let list = client.list_deployments().await.context("listing deployments")?;
        for deployment in &list.deployments {
            println!(
                "{}  {:<14} {}  {}",
                deployment.id,
                deployment.status.as_str(),
                deployment.started_at.format("%Y-%m-%d %H:%M:%S"),
                deployment.subject_name
            );
        }
        println!("{} deployments", list.total);
        return Ok(true);
    }

    let Some(reference_id) = cli_args.get("submit") else {
        return Ok(false);
    };
    let status = submit(&client, server, reference_id, cli_args).await?;
    Ok(status == DeploymentStatus::Completed)
}

/// Submit a deployment and print its updates until it finishes
async fn submit(
    client: &HttpClient,
    server: &str,
    reference_id: &str,
    cli_args: &HashMap<String, String>,
) -> anyhow::Result<DeploymentStatus> {
    let mode = match cli_args.get("mode") {
        Some(mode) => mode.parse::<DeploymentMode>().map_err(anyhow::Error::msg)?,
        None => DeploymentMode::Deploy,
    };

    let job_id = client
        .create_deployment(&CreateDeploymentRequest {
            reference_id: reference_id.to_string(),
            subject_name: cli_args.get("subject").cloned(),
            mode,
        })
        .await
        .with_context(|| format!("submitting {} to {}", reference_id, server))?;
    println!("Deployment {} submitted", job_id);

    let deployment = poller::run(
        &poller::Options::default(),
        client,
        &job_id,
        |update| println!("{}", poller::format_update(update)),
        tokio::time::sleep,
        Box::pin(async {
            let _ = tokio::signal::ctrl_c().await;
        }),
    )
    .await
    .with_context(|| format!("following deployment {}", job_id))?;

    let Some(deployment) = deployment else {
        println!("Stopped following {}; the deployment keeps running", job_id);
        return Ok(DeploymentStatus::Failed);
    };

    for (key, value) in &deployment.outputs {
        println!("{} = {}", key, value);
    }
    Ok(deployment.status)
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            _ => {
                error!("Failed to install signal handlers, falling back to Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl+C received, shutting down...");
    }
}
