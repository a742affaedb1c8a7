use std::process::ExitCode;

use clap::{Parser, Subcommand};
use console::{Emoji, style};
use dialoguer::Confirm;

use crate::config::{Config, ConfigPaths};
use crate::credentials::{ApiKeyKind, ConfigFileProvider, CredentialChain, CredentialProvider};
use crate::daemon::{
    self, CycleOutcome, DaemonSettings, PidFile, StartOutcome, StopOutcome, parse_interval,
};
use crate::service::{self, ServicePlatform, ServiceSpec};
use crate::setup;
use crate::sync::{ClientLimiters, SyncResult, build_engine};

const ERRORS_SHOWN: usize = 5;

static CROSS: Emoji<'_, '_> = Emoji("❌ ", "x ");
static CHECK: Emoji<'_, '_> = Emoji("✅ ", "+ ");
static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
static SYNC: Emoji<'_, '_> = Emoji("🔄 ", "");
static CHART: Emoji<'_, '_> = Emoji("📊 ", "");
static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");
static INBOX: Emoji<'_, '_> = Emoji("📬 ", "");

#[derive(Parser, Debug)]
#[command(
    name = "powerflow",
    version,
    about = "Sync Pocket AI recordings into a Notion database",
    after_help = "Environment:\n  POCKET_API_KEY   Your Pocket AI API key (pk_...)\n  NOTION_API_KEY   Your Notion integration token (ntn_... or secret_...)\n\nFirst time? Run 'powerflow setup' to get started."
)]
pub struct Cli {
    /// Log at debug level (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Configure the target database and property mapping
    Setup,
    /// Sync new recordings to Notion
    Sync {
        /// Preview without creating anything
        #[arg(short = 'n', long)]
        dry_run: bool,
    },
    /// Show sync status and how many recordings are waiting
    Status,
    /// Show or reset the configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigCommand>,
    },
    /// Manage the background sync daemon
    #[command(subcommand)]
    Daemon(DaemonCommand),
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Print the current configuration
    Show,
    /// Delete the configuration file
    Reset {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum DaemonCommand {
    /// Start syncing in the background
    Start {
        /// Sync interval: 5m, 15m, 1h or plain minutes
        #[arg(short, long, value_parser = parse_interval, default_value = "15m")]
        interval: u64,
        /// Stay attached to the terminal
        #[arg(short, long)]
        foreground: bool,
    },
    /// Stop the background daemon
    Stop,
    /// Show whether the daemon is running and its last result
    Status,
    /// Install as a user service that starts at login
    Install {
        #[arg(short, long, value_parser = parse_interval, default_value = "15m")]
        interval: u64,
    },
    /// Remove the user service
    Uninstall,
    #[command(hide = true)]
    Run {
        #[arg(short, long, value_parser = parse_interval, default_value = "15m")]
        interval: u64,
    },
}

impl Cli {
    /// Daemon processes log progress; interactive commands only warnings.
    pub fn default_log_filter(&self) -> &'static str {
        match (&self.command, self.verbose) {
            (_, true) => "debug",
            (Command::Daemon(DaemonCommand::Run { .. }), false)
            | (
                Command::Daemon(DaemonCommand::Start {
                    foreground: true, ..
                }),
                false,
            ) => "info",
            _ => "warn",
        }
    }
}

pub async fn run(cli: Cli) -> ExitCode {
    let paths = match ConfigPaths::from_env() {
        Ok(paths) => paths,
        Err(err) => {
            print_error(&format!("{err:#}"));
            return ExitCode::FAILURE;
        }
    };
    let outcome = match cli.command {
        Command::Setup => cmd_setup(&paths).await,
        Command::Sync { dry_run } => cmd_sync(&paths, dry_run).await,
        Command::Status => cmd_status(&paths).await,
        Command::Config { action } => match action.unwrap_or(ConfigCommand::Show) {
            ConfigCommand::Show => cmd_config_show(&paths),
            ConfigCommand::Reset { yes } => cmd_config_reset(&paths, yes),
        },
        Command::Daemon(command) => cmd_daemon(&paths, command).await,
    };
    outcome.unwrap_or_else(|err| {
        print_error(&format!("{err:#}"));
        ExitCode::FAILURE
    })
}

fn print_error(message: &str) {
    eprintln!("{}{}", CROSS, style(message).red());
}

fn print_success(message: &str) {
    println!("{}{}", CHECK, message);
}

fn print_info(message: &str) {
    println!("{}{}", INFO, message);
}

fn print_warning(message: &str) {
    println!("{}{}", WARN, style(message).yellow());
}

fn hint(message: &str) {
    println!("   {}", style(message).dim());
}

async fn cmd_setup(paths: &ConfigPaths) -> anyhow::Result<ExitCode> {
    setup::run_setup(paths).await?;
    Ok(ExitCode::SUCCESS)
}

/// Exit status for a finished sync: any failed record or aborted run is a
/// failure for scripting purposes.
pub fn exit_code_for(result: &SyncResult) -> ExitCode {
    if result.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn cmd_sync(paths: &ConfigPaths, dry_run: bool) -> anyhow::Result<ExitCode> {
    let config = Config::load(&paths.config_file);
    if !config.is_configured() {
        print_error("Not configured yet.");
        hint("Run 'powerflow setup' first to select a Notion database.");
        return Ok(ExitCode::FAILURE);
    }
    let keys = match CredentialChain::non_interactive(&config).resolve_both() {
        Ok(keys) => keys,
        Err(missing) => {
            print_error(&missing.to_string());
            hint("Set the environment variable(s) or run 'powerflow setup' to store them.");
            return Ok(ExitCode::FAILURE);
        }
    };

    let mut engine = build_engine(paths, &keys, &ClientLimiters::default())?;
    let mode = if dry_run { "[DRY RUN] " } else { "" };
    println!(
        "\n{}{}Syncing Pocket → Notion ({})...\n",
        SYNC,
        mode,
        config.notion.database_name.as_deref().unwrap_or("Untitled")
    );

    let result = engine.sync(dry_run).await;
    print_sync_result(&result, dry_run);
    Ok(exit_code_for(&result))
}

fn print_sync_result(result: &SyncResult, dry_run: bool) {
    if result.is_aborted() {
        for error in &result.errors {
            print_error(error);
        }
        println!();
        return;
    }
    if result.created > 0 {
        let verb = if dry_run { "Would create" } else { "Created" };
        print_success(&format!("{verb} {} new items", result.created));
    }
    if result.skipped > 0 {
        print_info(&format!("Skipped {} existing items", result.skipped));
    }
    if result.pending > 0 {
        print_info(&format!(
            "{} recordings still processing in Pocket (picked up on a later sync)",
            result.pending
        ));
    }
    if result.failed > 0 {
        print_error(&format!("Failed: {} items", result.failed));
    }
    let (shown, hidden) = result.errors_for_display(ERRORS_SHOWN);
    for error in shown {
        println!("   • {error}");
    }
    if hidden > 0 {
        println!("   ... and {hidden} more errors");
    }
    if result.total() == 0 {
        print_info("No new recordings found in Pocket");
    }
    println!();
}

async fn cmd_status(paths: &ConfigPaths) -> anyhow::Result<ExitCode> {
    let config = Config::load(&paths.config_file);
    println!("\n{}{}\n", CHART, style("Power-Flow Status").bold());

    if !config.is_configured() {
        print_warning("Not configured.");
        hint("Run 'powerflow setup' to get started.");
        return Ok(ExitCode::SUCCESS);
    }

    println!(
        "   Database:  {}",
        config.notion.database_name.as_deref().unwrap_or("Untitled")
    );
    println!(
        "   Last sync: {}",
        config.pocket.last_sync.as_deref().unwrap_or("Never")
    );
    println!("   Config:    {}", paths.config_file.display());
    let report = daemon::daemon_report(paths);
    match report.running_pid {
        Some(pid) => println!("   Daemon:    running (PID: {pid})"),
        None => println!("   Daemon:    stopped"),
    }

    let keys = match CredentialChain::non_interactive(&config).resolve_both() {
        Ok(keys) => keys,
        Err(missing) => {
            println!();
            for kind in missing.0 {
                print_warning(&format!("{} not set", kind.env_var()));
            }
            return Ok(ExitCode::SUCCESS);
        }
    };

    println!("\n   Checking for new items...");
    let engine = build_engine(paths, &keys, &ClientLimiters::default())?;
    match engine.pending_count().await {
        Ok(pending) => println!("\n{}{pending} new items ready to sync", INBOX),
        Err(err) => print_warning(&format!("Could not check: {err}")),
    }
    println!();
    Ok(ExitCode::SUCCESS)
}

fn cmd_config_show(paths: &ConfigPaths) -> anyhow::Result<ExitCode> {
    let config = Config::load(&paths.config_file);
    println!("\n{}{}\n", GEAR, style("Power-Flow Configuration").bold());

    if !config.is_configured() {
        print_warning("Not configured.");
        hint("Run 'powerflow setup' to get started.");
        return Ok(ExitCode::SUCCESS);
    }

    let notion = &config.notion;
    println!(
        "   Database ID:   {}",
        notion.database_id.as_deref().unwrap_or_default()
    );
    println!(
        "   Database Name: {}",
        notion.database_name.as_deref().unwrap_or("Untitled")
    );
    println!(
        "   Created:       {}",
        config.created_at.as_deref().unwrap_or("unknown")
    );
    println!(
        "   Last Sync:     {}",
        config.pocket.last_sync.as_deref().unwrap_or("Never")
    );

    println!("\n   Property Mapping:");
    let map = &notion.property_map;
    let rows = [
        ("title", Some(map.title.as_str())),
        ("dedup_key", Some(map.dedup_key.as_str())),
        ("priority", map.priority.as_deref()),
        ("due_date", map.due_date.as_deref()),
        ("context", map.context.as_deref()),
        ("source_url", map.source_url.as_deref()),
        ("tags", map.tags.as_deref()),
    ];
    for (field, column) in rows {
        if let Some(column) = column {
            println!("      {field} → {column}");
        }
    }

    let stored = ConfigFileProvider::new(&config);
    for kind in [ApiKeyKind::Pocket, ApiKeyKind::Notion] {
        if stored.lookup(kind).is_some() {
            println!("\n   {} API key stored in config file", kind);
        }
    }
    println!("\n   Config file: {}\n", paths.config_file.display());
    Ok(ExitCode::SUCCESS)
}

fn cmd_config_reset(paths: &ConfigPaths, yes: bool) -> anyhow::Result<ExitCode> {
    if !paths.config_file.exists() {
        print_info("No configuration to reset.");
        return Ok(ExitCode::SUCCESS);
    }
    let confirmed = yes
        || Confirm::new()
            .with_prompt("Reset all configuration? This cannot be undone.")
            .default(false)
            .interact()?;
    if !confirmed {
        println!("Cancelled.");
        return Ok(ExitCode::SUCCESS);
    }
    std::fs::remove_file(&paths.config_file)?;
    print_success("Configuration reset.");
    hint("Run 'powerflow setup' to configure again.");
    Ok(ExitCode::SUCCESS)
}

async fn cmd_daemon(paths: &ConfigPaths, command: DaemonCommand) -> anyhow::Result<ExitCode> {
    match command {
        DaemonCommand::Start {
            interval,
            foreground: true,
        } => {
            println!("{}Starting daemon (interval: {interval}m)...", SYNC);
            hint("Press Ctrl+C to stop");
            run_foreground(paths, interval).await
        }
        DaemonCommand::Start {
            interval,
            foreground: false,
        } => daemon_start(paths, interval),
        DaemonCommand::Run { interval } => run_foreground(paths, interval).await,
        DaemonCommand::Stop => daemon_stop(paths).await,
        DaemonCommand::Status => Ok(daemon_status(paths)),
        DaemonCommand::Install { interval } => daemon_install(paths, interval),
        DaemonCommand::Uninstall => daemon_uninstall(),
    }
}

async fn run_foreground(paths: &ConfigPaths, interval: u64) -> anyhow::Result<ExitCode> {
    if let Some(pid) = PidFile::new(&paths.pid_file).running_pid() {
        print_error(&format!("Daemon already running (PID: {pid})"));
        hint("Use 'powerflow daemon stop' first");
        return Ok(ExitCode::FAILURE);
    }
    daemon::run_daemon(paths, DaemonSettings::new(interval)).await?;
    Ok(ExitCode::SUCCESS)
}

fn daemon_start(paths: &ConfigPaths, interval: u64) -> anyhow::Result<ExitCode> {
    let config = Config::load(&paths.config_file);
    if !config.is_configured() {
        print_warning("Not configured yet; every cycle will fail until you run 'powerflow setup'.");
    }
    match daemon::start_background(paths, interval)? {
        StartOutcome::AlreadyRunning(pid) => {
            print_error(&format!("Daemon already running (PID: {pid})"));
            hint("Use 'powerflow daemon stop' first");
            Ok(ExitCode::FAILURE)
        }
        StartOutcome::Started(pid) => {
            print_success(&format!(
                "Daemon started (PID: {pid}, interval: {interval}m)"
            ));
            hint(&format!("Logs: {}", paths.log_file.display()));
            hint("Use 'powerflow daemon status' to check");
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn daemon_stop(paths: &ConfigPaths) -> anyhow::Result<ExitCode> {
    match daemon::stop_daemon(paths).await? {
        StopOutcome::NotRunning => print_info("Daemon is not running"),
        StopOutcome::Stopped(pid) => print_success(&format!("Daemon stopped (PID: {pid})")),
        StopOutcome::Killed(pid) => {
            print_warning(&format!("Daemon (PID: {pid}) ignored the stop signal and was killed"))
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn daemon_status(paths: &ConfigPaths) -> ExitCode {
    let report = daemon::daemon_report(paths);
    let state = &report.state;
    println!("\n{}{}\n", CHART, style("Power-Flow Daemon Status").bold());

    match report.running_pid {
        Some(pid) => println!("   Status:    {} (PID: {pid})", style("Running").green()),
        None => println!("   Status:    {}", style("Stopped").dim()),
    }
    if let Some(minutes) = state.interval_minutes {
        println!("   Interval:  {minutes} minutes");
    }
    if let Some(started) = &state.started_at {
        println!("   Started:   {started}");
    }
    if let Some(last) = &state.last_sync {
        println!("   Last sync: {last}");
        match &state.last_result {
            Some(CycleOutcome::Failed { error }) => {
                println!("   Result:    {}{}", CROSS, error);
            }
            Some(CycleOutcome::Completed {
                created,
                skipped,
                failed,
                ..
            }) => {
                let failed = if *failed > 0 {
                    format!(", {failed} failed")
                } else {
                    String::new()
                };
                println!("   Result:    {}{created} created, {skipped} skipped{failed}", CHECK);
            }
            None => {}
        }
        if state.consecutive_failures > 0 {
            println!("   Failures:  {} in a row", state.consecutive_failures);
        }
    }
    if report.running_pid.is_some() {
        if let Some(next) = &state.next_sync {
            println!("   Next sync: {next}");
        }
    }
    println!("\n   Log file:  {}\n", report.log_file.display());

    if report.running_pid.is_some() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn daemon_install(paths: &ConfigPaths, interval: u64) -> anyhow::Result<ExitCode> {
    let Some(platform) = ServicePlatform::current() else {
        print_error("Service installation supports Linux (systemd) and macOS (launchd) only.");
        return Ok(ExitCode::FAILURE);
    };
    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("home directory is unavailable"))?;

    if service::is_installed(platform, &home) {
        print_warning(&format!(
            "Service already installed at {}",
            platform.unit_path(&home).display()
        ));
        let reinstall = Confirm::new()
            .with_prompt("Reinstall?")
            .default(false)
            .interact()?;
        if !reinstall {
            return Ok(ExitCode::SUCCESS);
        }
    }

    // The service does not inherit the shell environment.
    let config = Config::load(&paths.config_file);
    let stored = ConfigFileProvider::new(&config);
    let unstored: Vec<ApiKeyKind> = [ApiKeyKind::Pocket, ApiKeyKind::Notion]
        .into_iter()
        .filter(|kind| stored.lookup(*kind).is_none())
        .collect();
    if !unstored.is_empty() {
        print_warning("API keys are not stored in the config file.");
        hint("The service cannot see your shell environment. Re-run 'powerflow setup'");
        hint("and save the keys when asked, or the service will fail every cycle.");
        let proceed = Confirm::new()
            .with_prompt("Continue anyway?")
            .default(false)
            .interact()?;
        if !proceed {
            return Ok(ExitCode::FAILURE);
        }
    }

    let spec = ServiceSpec {
        executable: std::env::current_exe()?,
        interval_minutes: interval,
        config_dir: paths.dir.clone(),
        log_file: paths.log_file.clone(),
    };
    let path = service::install(platform, &spec, &home)?;
    print_success(&format!("Created {}", path.display()));
    print_success(&format!("Service loaded (syncs every {interval} minutes)"));
    hint(&format!("Logs: {}", paths.log_file.display()));
    Ok(ExitCode::SUCCESS)
}

fn daemon_uninstall() -> anyhow::Result<ExitCode> {
    let Some(platform) = ServicePlatform::current() else {
        print_error("Service installation supports Linux (systemd) and macOS (launchd) only.");
        return Ok(ExitCode::FAILURE);
    };
    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("home directory is unavailable"))?;
    if service::uninstall(platform, &home)? {
        print_success("Service uninstalled");
    } else {
        print_info("Service not installed");
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::DEFAULT_INTERVAL_MINUTES;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("powerflow").chain(args.iter().copied()))
    }

    #[test]
    fn sync_accepts_short_dry_run_flag() {
        let cli = parse(&["sync", "-n"]).unwrap();
        assert_eq!(cli.command, Command::Sync { dry_run: true });
        let cli = parse(&["sync"]).unwrap();
        assert_eq!(cli.command, Command::Sync { dry_run: false });
    }

    #[test]
    fn daemon_interval_is_parsed_to_minutes() {
        let cli = parse(&["daemon", "start", "--interval", "1h", "-f"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Daemon(DaemonCommand::Start {
                interval: 60,
                foreground: true
            })
        );
        let cli = parse(&["daemon", "install"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Daemon(DaemonCommand::Install {
                interval: DEFAULT_INTERVAL_MINUTES
            })
        );
    }

    #[test]
    fn bad_intervals_are_rejected_with_the_reason() {
        let err = parse(&["daemon", "start", "--interval", "0m"]).unwrap_err();
        assert!(err.to_string().contains("at least 1 minute"));
        let err = parse(&["daemon", "start", "--interval", "2d"]).unwrap_err();
        assert!(err.to_string().contains("Invalid interval"));
    }

    #[test]
    fn config_defaults_to_show() {
        let cli = parse(&["config"]).unwrap();
        assert_eq!(cli.command, Command::Config { action: None });
        let cli = parse(&["config", "reset", "--yes"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Config {
                action: Some(ConfigCommand::Reset { yes: true })
            }
        );
    }

    #[test]
    fn hidden_run_command_still_parses() {
        let cli = parse(&["daemon", "run", "--interval", "5"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Daemon(DaemonCommand::Run { interval: 5 })
        );
        assert_eq!(cli.default_log_filter(), "info");
    }

    #[test]
    fn interactive_commands_log_quietly() {
        assert_eq!(parse(&["status"]).unwrap().default_log_filter(), "warn");
        assert_eq!(parse(&["status", "-v"]).unwrap().default_log_filter(), "debug");
        assert_eq!(
            parse(&["daemon", "start", "--foreground"])
                .unwrap()
                .default_log_filter(),
            "info"
        );
    }

    #[test]
    fn unknown_commands_fail() {
        assert!(parse(&["frobnicate"]).is_err());
        assert!(parse(&[]).is_err());
    }

    #[test]
    fn failed_records_fail_the_exit_code() {
        let clean = SyncResult {
            created: 1,
            ..SyncResult::default()
        };
        assert_eq!(exit_code_for(&clean), ExitCode::SUCCESS);
        let partial = SyncResult {
            created: 1,
            failed: 1,
            ..SyncResult::default()
        };
        assert_eq!(exit_code_for(&partial), ExitCode::FAILURE);
        let aborted = SyncResult {
            errors: vec!["Failed to fetch recordings: down".into()],
            ..SyncResult::default()
        };
        assert_eq!(exit_code_for(&aborted), ExitCode::FAILURE);
    }
}
