//! Filesystem timestamps.
//!
//! Modification and access times are set portably through `filetime`. Creation
//! (birth) time has no portable API, so one [`CreationTimeMechanism`] is picked
//! per platform at startup and handed to [`FileTimeSetter`]. Creation time is
//! advisory: a failed attempt is logged and never fails the file.

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use filetime::FileTime;
use std::path::Path;
use std::process::Command;

use crate::timestamp::local_epoch_seconds;

/// How creation time gets set on this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationTimeMechanism {
    /// Open a handle and set the creation time natively (Windows).
    NativeHandle,
    /// `SetFile -d "MM/DD/YYYY HH:MM:SS" <path>` (macOS developer tools).
    SetFile,
    /// `touch -t YYYYMMDDhhmm.ss <path>`.
    Touch,
    /// Creation time is left alone.
    Disabled,
}

impl CreationTimeMechanism {
    /// Pick the mechanism for the current platform.
    ///
    /// Probes `PATH` for `SetFile` on macOS; call once and pass the value down.
    pub fn detect() -> Self {
        if cfg!(windows) {
            Self::NativeHandle
        } else if cfg!(target_os = "macos") {
            if command_available("SetFile") {
                Self::SetFile
            } else {
                log::warn!(
                    "SetFile command not found. Creation time may not be set correctly on macOS."
                );
                log::warn!("Install Apple Developer Tools for full functionality.");
                Self::Touch
            }
        } else {
            Self::Touch
        }
    }

    /// Resolve from the `creation_time` config switch.
    pub fn resolve(enabled: bool) -> Self {
        if enabled { Self::detect() } else { Self::Disabled }
    }

    pub fn is_available(&self) -> bool {
        *self != Self::Disabled
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::NativeHandle => "native handle",
            Self::SetFile => "SetFile",
            Self::Touch => "touch",
            Self::Disabled => "disabled",
        }
    }
}

/// What happened to creation time for one file.
#[derive(Debug, Clone, PartialEq)]
pub enum CreationStatus {
    Set,
    Skipped,
    Failed(String),
}

/// Result of a successful [`FileTimeSetter::apply`].
#[derive(Debug, Clone, PartialEq)]
pub struct FileTimesReport {
    /// Unix seconds written as modification and access time.
    pub modified: i64,
    pub creation: CreationStatus,
}

/// Sets filesystem times from a naive (local) timestamp.
#[derive(Debug, Clone, Copy)]
pub struct FileTimeSetter {
    mechanism: CreationTimeMechanism,
}

impl FileTimeSetter {
    pub fn new(mechanism: CreationTimeMechanism) -> Self {
        Self { mechanism }
    }

    pub fn mechanism(&self) -> CreationTimeMechanism {
        self.mechanism
    }

    /// Set modification/access time, then try creation time.
    ///
    /// Only the modification-time step can fail the call.
    pub fn apply(&self, path: &Path, timestamp: &NaiveDateTime) -> Result<FileTimesReport> {
        let secs = local_epoch_seconds(timestamp);
        let ft = FileTime::from_unix_time(secs, 0);
        filetime::set_file_times(path, ft, ft).with_context(|| {
            format!("Failed to set modification time on {}", path.display())
        })?;

        let creation = match self.set_creation_time(path, timestamp, secs) {
            Ok(true) => CreationStatus::Set,
            Ok(false) => CreationStatus::Skipped,
            Err(e) => {
                log::warn!(
                    "Failed to set creation time on {} ({}): {e:#}",
                    path.display(),
                    self.mechanism.name()
                );
                CreationStatus::Failed(format!("{e:#}"))
            }
        };

        Ok(FileTimesReport { modified: secs, creation })
    }

    /// `Ok(false)` when no mechanism is configured.
    fn set_creation_time(&self, path: &Path, timestamp: &NaiveDateTime, secs: i64) -> Result<bool> {
        match self.mechanism {
            CreationTimeMechanism::Disabled => Ok(false),
            CreationTimeMechanism::NativeHandle => {
                set_created_native(path, secs)?;
                Ok(true)
            }
            CreationTimeMechanism::SetFile => {
                let date = timestamp.format("%m/%d/%Y %H:%M:%S").to_string();
                run_tool("SetFile", &["-d", &date], path)?;
                Ok(true)
            }
            CreationTimeMechanism::Touch => {
                let date = timestamp.format("%Y%m%d%H%M.%S").to_string();
                run_tool("touch", &["-t", &date], path)?;
                Ok(true)
            }
        }
    }

    /// Apply a known timestamp to scratch files and log how close the result is.
    ///
    /// Returns the difference in seconds for the plain file name.
    pub fn self_test(&self) -> Result<i64> {
        log::info!("Testing creation time setting capability...");
        let dir = tempfile::TempDir::new().context("Failed to create scratch directory")?;
        let target = NaiveDate::from_ymd_opt(2020, 1, 1)
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .context("invalid self-test timestamp")?;

        let diff = self.probe(&dir.path().join("timestamp-test.txt"), &target)?;

        // Paths with spaces are where shelled-out tools usually break.
        if cfg!(unix) {
            self.probe(&dir.path().join("test with spaces.txt"), &target)?;
        }

        Ok(diff)
    }

    fn probe(&self, path: &Path, target: &NaiveDateTime) -> Result<i64> {
        std::fs::write(path, "Test file for timestamp setting")
            .context("Failed to create scratch file")?;
        self.apply(path, target)?;

        let meta = std::fs::metadata(path)?;
        let actual = FileTime::from_last_modification_time(&meta).unix_seconds();
        let diff = (actual - local_epoch_seconds(target)).abs();

        log::info!("Test file: {}", path.display());
        log::info!("  Target time: {target}");
        log::info!(
            "  Modification time set to: {}",
            chrono::DateTime::from_timestamp(actual, 0)
                .map(|d| d.with_timezone(&chrono::Local).naive_local().to_string())
                .unwrap_or_else(|| actual.to_string())
        );
        log::info!("  Difference: {diff} seconds");
        Ok(diff)
    }
}

/// Spawn an external tool with `args` followed by the path. No shell involved.
fn run_tool(program: &str, args: &[&str], path: &Path) -> Result<()> {
    let output = Command::new(program)
        .args(args)
        .arg(path)
        .output()
        .with_context(|| format!("Failed to run {program}"))?;

    if !output.status.success() {
        anyhow::bail!(
            "{program} failed with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

fn command_available(program: &str) -> bool {
    Command::new("which")
        .arg(program)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[cfg(windows)]
fn set_created_native(path: &Path, secs: i64) -> Result<()> {
    use std::fs::{FileTimes, OpenOptions};
    use std::os::windows::fs::FileTimesExt;
    use std::time::{Duration, UNIX_EPOCH};

    let time = if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    };
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .context("Failed to open file handle")?;
    file.set_times(FileTimes::new().set_created(time).set_modified(time))
        .context("SetFileTime failed")?;
    Ok(())
}

#[cfg(not(windows))]
fn set_created_native(_path: &Path, _secs: i64) -> Result<()> {
    anyhow::bail!("native creation time is only available on Windows")
}
