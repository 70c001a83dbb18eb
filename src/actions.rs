//! OS side effects behind the built-in commands.
//!
//! Each operation blocks until the platform helper has been launched (or,
//! for screen capture, has finished writing the file). Callers run them
//! on the blocking pool.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use chrono::Local;
use sysinfo::System;
use tracing::{debug, info};

use crate::config::CommandsConfig;
use crate::error::ActionError;

/// Snapshot of machine load, in percent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SystemLoad {
    pub cpu_percent: f32,
    pub mem_percent: f32,
}

/// Side-effect services invoked by built-in commands.
pub trait DesktopActions: Send + Sync {
    fn open_file_browser(&self) -> Result<(), ActionError>;

    fn open_url(&self, url: &str) -> Result<(), ActionError>;

    /// Capture the full screen and return the file name it was saved under.
    fn capture_screen(&self) -> Result<String, ActionError>;

    fn read_system_load(&self) -> Result<SystemLoad, ActionError>;
}

/// Platform-native implementation using the desktop's own helpers.
pub struct SystemActions {
    screenshot_dir: PathBuf,
}

impl SystemActions {
    pub fn new(config: &CommandsConfig) -> Self {
        Self {
            screenshot_dir: config.screenshot_dir.clone(),
        }
    }
}

impl DesktopActions for SystemActions {
    fn open_file_browser(&self) -> Result<(), ActionError> {
        let home = dirs::home_dir().ok_or(ActionError::NoHomeDir)?;
        let home = home.to_string_lossy();

        #[cfg(target_os = "windows")]
        return launch("explorer", &[&home]);

        #[cfg(target_os = "macos")]
        return launch("open", &[&home]);

        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        return launch("xdg-open", &[&home]);
    }

    fn open_url(&self, url: &str) -> Result<(), ActionError> {
        #[cfg(target_os = "windows")]
        return launch("cmd", &["/C", "start", "", url]);

        #[cfg(target_os = "macos")]
        return launch("open", &[url]);

        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        return launch("xdg-open", &[url]);
    }

    fn capture_screen(&self) -> Result<String, ActionError> {
        std::fs::create_dir_all(&self.screenshot_dir).map_err(|source| {
            ActionError::CreateDir {
                path: self.screenshot_dir.clone(),
                source,
            }
        })?;

        let filename = screenshot_filename(Local::now());
        let path = self.screenshot_dir.join(&filename);
        capture_screen_native(&path)?;

        info!("Screenshot saved to {}", path.display());
        Ok(filename)
    }

    fn read_system_load(&self) -> Result<SystemLoad, ActionError> {
        let mut sys = System::new();

        // CPU usage is a delta between two refreshes
        sys.refresh_cpu_usage();
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        let total = sys.total_memory();
        let mem_percent = if total == 0 {
            0.0
        } else {
            sys.used_memory() as f32 / total as f32 * 100.0
        };

        Ok(SystemLoad {
            cpu_percent: sys.global_cpu_usage(),
            mem_percent,
        })
    }
}

pub fn screenshot_filename(now: chrono::DateTime<Local>) -> String {
    format!("screenshot_{}.png", now.format("%Y%m%d_%H%M%S"))
}

/// Start a helper without waiting for it; a detached thread reaps it.
fn launch(program: &str, args: &[&str]) -> Result<(), ActionError> {
    debug!("Launching {program} {args:?}");
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|source| ActionError::Spawn {
            program: program.to_string(),
            source,
        })?;

    std::thread::spawn(move || {
        let _ = child.wait();
    });
    Ok(())
}

/// Run a helper to completion, failing on a non-zero exit.
fn run(program: &str, args: &[&str]) -> Result<(), ActionError> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|source| ActionError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if output.status.success() {
        Ok(())
    } else {
        Err(ActionError::Failed {
            program: program.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

fn capture_screen_native(path: &Path) -> Result<(), ActionError> {
    let output = path.to_string_lossy();

    #[cfg(target_os = "windows")]
    {
        let script = format!(
            r#"Add-Type -AssemblyName System.Windows.Forms,System.Drawing; $b = [System.Windows.Forms.Screen]::PrimaryScreen.Bounds; $bmp = New-Object System.Drawing.Bitmap($b.Width,$b.Height); $g = [System.Drawing.Graphics]::FromImage($bmp); $g.CopyFromScreen($b.Location,[System.Drawing.Point]::Empty,$b.Size); $bmp.Save('{}'); $g.Dispose(); $bmp.Dispose()"#,
            output.replace('\'', "''")
        );
        return run("powershell", &["-NoProfile", "-NonInteractive", "-Command", &script]);
    }

    #[cfg(target_os = "macos")]
    return run("screencapture", &["-x", &output]);

    #[cfg(target_os = "linux")]
    {
        // gnome-screenshot first, ImageMagick as the fallback
        match run("gnome-screenshot", &["-f", &output]) {
            Ok(()) => return Ok(()),
            Err(e) => debug!("gnome-screenshot unavailable: {e}"),
        }
        return run("import", &["-window", "root", &output]);
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        let _ = output;
        Err(ActionError::Unsupported("screen capture"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn screenshot_filename_is_timestamped() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(screenshot_filename(at), "screenshot_20240309_140507.png");
    }

    #[test]
    fn missing_helper_is_a_spawn_error() {
        let err = launch("cutie-no-such-helper", &[]).unwrap_err();
        assert!(matches!(err, ActionError::Spawn { .. }));
        assert!(err.to_string().starts_with("failed to launch cutie-no-such-helper"));
    }

    #[test]
    fn system_load_is_a_percentage() {
        let load = SystemActions::new(&CommandsConfig::default())
            .read_system_load()
            .unwrap();
        assert!((0.0..=100.0).contains(&load.mem_percent));
        assert!(load.cpu_percent >= 0.0);
    }
}
