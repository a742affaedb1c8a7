use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use tracing::{debug, info};

const SYSTEMD_UNIT_NAME: &str = "powerflow.service";
const LAUNCHD_LABEL: &str = "com.powerflow.sync";

/// The OS service manager used for `daemon install`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServicePlatform {
    Systemd,
    Launchd,
}

impl ServicePlatform {
    pub fn current() -> Option<Self> {
        Self::for_os(std::env::consts::OS)
    }

    fn for_os(os: &str) -> Option<Self> {
        match os {
            "linux" => Some(ServicePlatform::Systemd),
            "macos" => Some(ServicePlatform::Launchd),
            _ => None,
        }
    }

    pub fn unit_path(self, home: &Path) -> PathBuf {
        match self {
            ServicePlatform::Systemd => home
                .join(".config/systemd/user")
                .join(SYSTEMD_UNIT_NAME),
            ServicePlatform::Launchd => home
                .join("Library/LaunchAgents")
                .join(format!("{LAUNCHD_LABEL}.plist")),
        }
    }

    pub fn render(self, spec: &ServiceSpec) -> String {
        match self {
            ServicePlatform::Systemd => systemd_unit(spec),
            ServicePlatform::Launchd => launchd_plist(spec),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    EnableAutostart,
    DisableAutostart,
    Reload,
}

impl ServiceAction {
    fn systemctl_args(self) -> Vec<&'static str> {
        match self {
            ServiceAction::EnableAutostart => vec!["--user", "enable", "--now", SYSTEMD_UNIT_NAME],
            ServiceAction::DisableAutostart => {
                vec!["--user", "disable", "--now", SYSTEMD_UNIT_NAME]
            }
            ServiceAction::Reload => vec!["--user", "daemon-reload"],
        }
    }

    fn launchctl_verb(self) -> Option<&'static str> {
        match self {
            ServiceAction::EnableAutostart => Some("load"),
            ServiceAction::DisableAutostart => Some("unload"),
            ServiceAction::Reload => None,
        }
    }
}

/// What the installed service runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub executable: PathBuf,
    pub interval_minutes: u64,
    pub config_dir: PathBuf,
    pub log_file: PathBuf,
}

pub fn systemd_unit(spec: &ServiceSpec) -> String {
    format!(
        "[Unit]\n\
         Description=Power-Flow: sync Pocket AI recordings to Notion\n\
         After=network-online.target\n\
         \n\
         [Service]\n\
         Type=simple\n\
         ExecStart=\"{exe}\" daemon run --interval {interval}\n\
         Environment=\"POWERFLOW_HOME={home}\"\n\
         Restart=on-failure\n\
         RestartSec=60\n\
         \n\
         [Install]\n\
         WantedBy=default.target\n",
        exe = spec.executable.display(),
        interval = spec.interval_minutes,
        home = spec.config_dir.display(),
    )
}

pub fn launchd_plist(spec: &ServiceSpec) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Label</key>
    <string>{label}</string>
    <key>ProgramArguments</key>
    <array>
        <string>{exe}</string>
        <string>daemon</string>
        <string>run</string>
        <string>--interval</string>
        <string>{interval}</string>
    </array>
    <key>RunAtLoad</key>
    <true/>
    <key>KeepAlive</key>
    <true/>
    <key>StandardOutPath</key>
    <string>{log}</string>
    <key>StandardErrorPath</key>
    <string>{log}</string>
    <key>EnvironmentVariables</key>
    <dict>
        <key>PATH</key>
        <string>/usr/local/bin:/usr/bin:/bin</string>
        <key>POWERFLOW_HOME</key>
        <string>{home}</string>
    </dict>
</dict>
</plist>
"#,
        label = LAUNCHD_LABEL,
        exe = xml_escape(&spec.executable.display().to_string()),
        interval = spec.interval_minutes,
        log = xml_escape(&spec.log_file.display().to_string()),
        home = xml_escape(&spec.config_dir.display().to_string()),
    )
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn is_installed(platform: ServicePlatform, home: &Path) -> bool {
    platform.unit_path(home).exists()
}

/// Writes the unit file, replacing any previous one.
pub fn write_service_file(
    platform: ServicePlatform,
    spec: &ServiceSpec,
    home: &Path,
) -> Result<PathBuf> {
    let path = platform.unit_path(home);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(&path, platform.render(spec))
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

pub fn install(platform: ServicePlatform, spec: &ServiceSpec, home: &Path) -> Result<PathBuf> {
    let path = write_service_file(platform, spec, home)?;
    match platform {
        ServicePlatform::Systemd => {
            run_systemctl(ServiceAction::Reload)?;
            run_systemctl(ServiceAction::EnableAutostart)?;
        }
        ServicePlatform::Launchd => {
            // An older copy may still be loaded.
            if let Err(err) = run_launchctl(ServiceAction::DisableAutostart, &path) {
                debug!(error = %err, "launchctl unload before reinstall failed");
            }
            run_launchctl(ServiceAction::EnableAutostart, &path)?;
        }
    }
    info!(path = %path.display(), "service installed");
    Ok(path)
}

/// Returns `false` when nothing was installed.
pub fn uninstall(platform: ServicePlatform, home: &Path) -> Result<bool> {
    let path = platform.unit_path(home);
    if !path.exists() {
        return Ok(false);
    }
    let stopped = match platform {
        ServicePlatform::Systemd => run_systemctl(ServiceAction::DisableAutostart),
        ServicePlatform::Launchd => run_launchctl(ServiceAction::DisableAutostart, &path),
    };
    if let Err(err) = stopped {
        debug!(error = %err, "service was not active");
    }
    std::fs::remove_file(&path).with_context(|| format!("failed to remove {}", path.display()))?;
    if platform == ServicePlatform::Systemd {
        run_systemctl(ServiceAction::Reload)?;
    }
    info!(path = %path.display(), "service removed");
    Ok(true)
}

fn run_systemctl(action: ServiceAction) -> Result<()> {
    let args = action.systemctl_args();
    let status = Command::new("systemctl")
        .args(&args)
        .status()
        .with_context(|| format!("failed to run systemctl {}", args.join(" ")))?;
    if status.success() {
        return Ok(());
    }
    anyhow::bail!("systemctl {} failed with status {status}", args.join(" "));
}

fn run_launchctl(action: ServiceAction, plist: &Path) -> Result<()> {
    let Some(verb) = action.launchctl_verb() else {
        return Ok(());
    };
    let output = Command::new("launchctl")
        .arg(verb)
        .arg(plist)
        .output()
        .with_context(|| format!("failed to run launchctl {verb}"))?;
    if output.status.success() {
        return Ok(());
    }
    anyhow::bail!(
        "launchctl {verb} {} failed: {}",
        plist.display(),
        String::from_utf8_lossy(&output.stderr).trim()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn spec() -> ServiceSpec {
        ServiceSpec {
            executable: PathBuf::from("/opt/power flow/bin/powerflow"),
            interval_minutes: 30,
            config_dir: PathBuf::from("/home/u/.powerflow"),
            log_file: PathBuf::from("/home/u/.powerflow/daemon.log"),
        }
    }

    #[test]
    fn platform_follows_os() {
        assert_eq!(ServicePlatform::for_os("linux"), Some(ServicePlatform::Systemd));
        assert_eq!(ServicePlatform::for_os("macos"), Some(ServicePlatform::Launchd));
        assert_eq!(ServicePlatform::for_os("windows"), None);
    }

    #[test]
    fn action_to_systemctl_args_matches_expected_values() {
        assert_eq!(
            ServiceAction::EnableAutostart.systemctl_args(),
            ["--user", "enable", "--now", "powerflow.service"]
        );
        assert_eq!(
            ServiceAction::DisableAutostart.systemctl_args(),
            ["--user", "disable", "--now", "powerflow.service"]
        );
        assert_eq!(ServiceAction::Reload.systemctl_args(), ["--user", "daemon-reload"]);
        assert_eq!(ServiceAction::EnableAutostart.launchctl_verb(), Some("load"));
        assert_eq!(ServiceAction::Reload.launchctl_verb(), None);
    }

    #[test]
    fn systemd_unit_runs_the_daemon_loop() {
        let unit = systemd_unit(&spec());
        assert!(unit.contains(
            "ExecStart=\"/opt/power flow/bin/powerflow\" daemon run --interval 30\n"
        ));
        assert!(unit.contains("Environment=\"POWERFLOW_HOME=/home/u/.powerflow\""));
        assert!(unit.contains("WantedBy=default.target"));
    }

    #[test]
    fn launchd_plist_lists_arguments_and_log() {
        let plist = launchd_plist(&ServiceSpec {
            executable: PathBuf::from("/Users/a&b/powerflow"),
            ..spec()
        });
        assert!(plist.contains("<string>com.powerflow.sync</string>"));
        assert!(plist.contains("<string>/Users/a&amp;b/powerflow</string>"));
        assert!(plist.contains("<string>--interval</string>\n        <string>30</string>"));
        assert!(plist.contains("<string>/home/u/.powerflow/daemon.log</string>"));
    }

    #[test]
    fn unit_files_land_in_the_user_service_directory() {
        let home = tempdir().unwrap();
        assert!(!is_installed(ServicePlatform::Systemd, home.path()));

        let path = write_service_file(ServicePlatform::Systemd, &spec(), home.path()).unwrap();

        assert_eq!(
            path,
            home.path().join(".config/systemd/user/powerflow.service")
        );
        assert!(is_installed(ServicePlatform::Systemd, home.path()));
        assert_eq!(
            ServicePlatform::Launchd.unit_path(home.path()),
            home.path().join("Library/LaunchAgents/com.powerflow.sync.plist")
        );
    }

    #[test]
    fn uninstall_without_unit_is_a_no_op() {
        let home = tempdir().unwrap();
        assert!(!uninstall(ServicePlatform::Launchd, home.path()).unwrap());
    }
}
