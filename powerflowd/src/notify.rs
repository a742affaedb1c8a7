use std::process::Stdio;

use tracing::debug;

/// Best-effort user notifications. Implementations must not fail or block.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str);
}

/// `notify-send` on Linux, `osascript` on macOS, nothing elsewhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct DesktopNotifier;

impl Notifier for DesktopNotifier {
    fn notify(&self, title: &str, message: &str) {
        let Some((program, args)) = notification_argv(std::env::consts::OS, title, message) else {
            return;
        };
        // The child is never awaited; tokio reaps it in the background.
        let spawned = tokio::process::Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        if let Err(err) = spawned {
            debug!(program, error = %err, "notification skipped");
        }
    }
}

fn notification_argv(os: &str, title: &str, message: &str) -> Option<(&'static str, Vec<String>)> {
    match os {
        "linux" => Some((
            "notify-send",
            vec![
                "--app-name=powerflow".to_string(),
                title.to_string(),
                message.to_string(),
            ],
        )),
        "macos" => Some((
            "osascript",
            vec![
                "-e".to_string(),
                format!(
                    "display notification \"{}\" with title \"{}\"",
                    applescript_escape(message),
                    applescript_escape(title)
                ),
            ],
        )),
        _ => None,
    }
}

fn applescript_escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}
