//! gameops - Entry Point
//!
//! Keeps an installed game server current with its release feed, and creates
//! or manages remote server locations.

use std::collections::HashMap;
use std::env;

use colored::Colorize;
use tracing::{error, info};

use gameops::app::options::AppOptions;
use gameops::app::run::{run, run_once};
use gameops::cloud::provisioner::BuildRequest;
use gameops::filesys::file::File;
use gameops::logs::{init_logging, LogOptions};
use gameops::models::deployment::{ProgressEvent, ProgressLevel};
use gameops::models::target::DeploymentTarget;
use gameops::models::update::UpdateOutcome;
use gameops::storage::layout::StorageLayout;
use gameops::storage::registry::{JsonFileRegistry, LocationRegistry};
use gameops::storage::settings::Settings;
use gameops::utils::version_info;
use gameops::workers::jobs::{Job, JobOutcome};

const USAGE: &str = "usage: gameops [--settings=<file>] <command>

commands:
  --version
  --daemon
  --check-update
  --provision --name=<name> --user=<admin> --password=<password> [--region=<region>]
  --status --name=<name>
  --start|--stop|--restart|--logs --target=<id>
  --targets
  --add-target --host=<host> --user=<user> --password=<password> [--port=<port>] [--path=<dir>]
  --remove-target --target=<id>";

#[tokio::main]
async fn main() {
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
    if cli_args.contains_key("version") {
        println!("{}", serde_json::to_string_pretty(&version_info()).unwrap());
        return;
    }

    // Retrieve the settings file
    let layout = StorageLayout::default();
    let settings_file = match cli_args.get("settings") {
        Some(path) => File::new(path),
        None => layout.settings_file(),
    };
    let settings = match Settings::load(&settings_file).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings file {}: {}", settings_file.path().display(), e);
            std::process::exit(2);
        }
    };

    // Initialize logging. One-shot commands print progress themselves, so the
    // stdout log layer is reserved for the daemon.
    let daemon = cli_args.contains_key("daemon");
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        stdout: daemon,
        file: settings.log_to_file,
        log_dir: layout.logs_dir().path().to_path_buf(),
        json_format: settings.log_json,
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    let options = AppOptions::from_settings(layout.clone(), settings);

    if daemon {
        info!("Running gameops {} as a daemon", version_info().version);
        if let Err(e) = run(options, await_shutdown_signal()).await {
            error!("Failed to run gameops: {e}");
            std::process::exit(1);
        }
        return;
    }

    if cli_args.contains_key("targets") {
        let registry = JsonFileRegistry::new(layout.registry_file());
        match registry.list().await {
            Ok(targets) => print_targets(&targets),
            Err(e) => fail(&e.to_string()),
        }
        return;
    }

    if cli_args.contains_key("add-target") {
        let registry = JsonFileRegistry::new(layout.registry_file());
        match add_target(&registry, &cli_args, &options).await {
            Ok(id) => println!("{} {}", "Registered target".green(), id),
            Err(e) => fail(&e),
        }
        return;
    }

    if cli_args.contains_key("remove-target") {
        let registry = JsonFileRegistry::new(layout.registry_file());
        let Some(id) = cli_args.get("target") else {
            return fail("--remove-target requires --target=<id>");
        };
        match registry.delete(id).await {
            Ok(()) => println!("{} {}", "Removed target".green(), id),
            Err(e) => fail(&e.to_string()),
        }
        return;
    }

    let job = match parse_job(&cli_args, &options.settings.cloud.region) {
        Ok(job) => job,
        Err(e) => {
            eprintln!("{}\n\n{}", e.red(), USAGE);
            std::process::exit(2);
        }
    };

    match run_once(&options, job, print_progress).await {
        Ok(outcome) => {
            print_outcome(&outcome);
            if !outcome.is_success() {
                std::process::exit(1);
            }
        }
        Err(e) => fail(&e.to_string()),
    }
}

fn parse_job(cli_args: &HashMap<String, String>, default_region: &str) -> Result<Job, String> {
    let arg = |key: &str| -> Result<String, String> {
        cli_args
            .get(key)
            .filter(|v| !v.is_empty() && v.as_str() != "true")
            .cloned()
            .ok_or_else(|| format!("missing --{}=<value>", key))
    };

    if cli_args.contains_key("check-update") {
        return Ok(Job::CheckUpdate);
    }
    if cli_args.contains_key("provision") {
        return Ok(Job::CreateServer(BuildRequest {
            name: arg("name")?,
            admin_user: arg("user")?,
            admin_password: arg("password")?,
            region: cli_args
                .get("region")
                .cloned()
                .unwrap_or_else(|| default_region.to_string()),
        }));
    }
    if cli_args.contains_key("status") {
        return Ok(Job::VmStatus(arg("name")?));
    }
    if cli_args.contains_key("start") {
        return Ok(Job::StartTarget(arg("target")?));
    }
    if cli_args.contains_key("stop") {
        return Ok(Job::StopTarget(arg("target")?));
    }
    if cli_args.contains_key("restart") {
        return Ok(Job::RestartTarget(arg("target")?));
    }
    if cli_args.contains_key("logs") {
        return Ok(Job::FetchLogs(arg("target")?));
    }
    Err("no command given".to_string())
}

async fn add_target(
    registry: &JsonFileRegistry,
    cli_args: &HashMap<String, String>,
    options: &AppOptions,
) -> Result<String, String> {
    let get = |key: &str| {
        cli_args
            .get(key)
            .cloned()
            .ok_or_else(|| format!("--add-target requires --{}=<value>", key))
    };

    let remote = &options.settings.remote;
    let mut target = DeploymentTarget::new(
        get("host")?,
        get("user")?,
        get("password")?,
        cli_args
            .get("path")
            .cloned()
            .unwrap_or_else(|| remote.relative_path.clone()),
    );
    target.port = match cli_args.get("port") {
        Some(port) => port.parse().map_err(|_| format!("invalid port: {}", port))?,
        None => remote.ssh_port,
    };

    registry.add(target).await.map_err(|e| e.to_string())
}

fn print_progress(event: ProgressEvent) {
    match event.level {
        ProgressLevel::Info => println!("{} {}", "•".cyan(), event.message),
        ProgressLevel::Warn => println!("{} {}", "!".yellow(), event.message.yellow()),
        ProgressLevel::Error => println!("{} {}", "✗".red(), event.message.red()),
    }
}

fn print_outcome(outcome: &JobOutcome) {
    match outcome {
        JobOutcome::Update(UpdateOutcome::UpToDate { version }) => {
            println!("{} {}", "Up to date at".green(), version);
        }
        JobOutcome::Update(UpdateOutcome::NoRelease { reason }) => {
            println!("{} {}", "No release applied:".yellow(), reason);
        }
        JobOutcome::Update(UpdateOutcome::Updated { from, to }) => {
            println!("{} {} -> {}", "Updated".green().bold(), from, to);
        }
        JobOutcome::Update(UpdateOutcome::Failed { reason, restored }) => {
            println!("{} {} (backup restored: {})", "Update failed:".red().bold(), reason, restored);
        }
        JobOutcome::Deployment(result) if result.success => {
            println!("{}", result.message.green().bold());
            if let Some(domain) = &result.domain_name {
                println!("  domain: {}", domain);
            }
        }
        JobOutcome::Deployment(result) => {
            println!("{}", result.message.red().bold());
            if let Some(detail) = &result.detail {
                println!("  {}", detail);
            }
            if let Some(vm) = &result.vm {
                println!("  resources left in {}", vm.resource_group);
            }
        }
        JobOutcome::Done { message } => println!("{}", message.green()),
        JobOutcome::Failed { reason } => println!("{}", reason.red()),
    }
}

fn print_targets(targets: &[DeploymentTarget]) {
    if targets.is_empty() {
        println!("No deployment targets registered");
        return;
    }
    for target in targets {
        println!(
            "{}  {}@{}:{}  ~/{}{}",
            target.id.bold(),
            target.username,
            target.host,
            target.port,
            target.relative_path,
            target
                .vm_name
                .as_ref()
                .map(|vm| format!("  (vm {})", vm))
                .unwrap_or_default()
        );
    }
}

fn fail(message: &str) {
    eprintln!("{}", message.red());
    std::process::exit(1);
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).unwrap();
        let mut sigint = signal(SignalKind::interrupt()).unwrap();

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
        info!("Ctrl+C received, shutting down...");
    }
}
