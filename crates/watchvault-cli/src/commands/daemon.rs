use crate::commands;
use crate::output::Output;
use chrono::Utc;
use color_eyre::Result;
use tracing::{error, info};
use watchvault_config::PathManager;
use watchvault_core::{CycleOutcome, LifecycleManager, QuotaOutcome, RecordStore};

/// Periodic lifecycle driver: one timer for age-based cleanup cycles and
/// one for quota pressure polls.
pub struct Scheduler {
    store: RecordStore,
    manager: LifecycleManager,
    cleanup_interval: tokio::time::Duration,
    quota_interval: tokio::time::Duration,
}

impl Scheduler {
    pub fn new(store: RecordStore, config: watchvault_config::LifecycleConfig) -> Self {
        let cleanup_interval = tokio::time::Duration::from_secs(config.cleanup_interval_secs);
        let quota_interval = tokio::time::Duration::from_secs(config.quota_poll_interval_secs);
        let manager = LifecycleManager::new(config);
        Self {
            store,
            manager,
            cleanup_interval,
            quota_interval,
        }
    }

    pub async fn start(&self) -> Result<()> {
        info!(
            operation = "scheduler_started",
            cleanup_interval_secs = self.cleanup_interval.as_secs(),
            quota_poll_interval_secs = self.quota_interval.as_secs(),
            "Lifecycle scheduler started"
        );

        let mut cleanup_tick = tokio::time::interval(self.cleanup_interval);
        let mut quota_tick = tokio::time::interval(self.quota_interval);
        // The first tick of an interval fires immediately; the startup
        // cleanup is intentional, the 1-hour guard absorbs restarts.
        loop {
            tokio::select! {
                _ = cleanup_tick.tick() => self.run_cleanup().await,
                _ = quota_tick.tick() => self.run_quota().await,
            }
        }
    }

    async fn run_cleanup(&self) {
        match self.manager.run_cleanup_cycle(&self.store, Utc::now()).await {
            Ok(CycleOutcome::AgeEvicted { removed }) => {
                info!(
                    operation = "scheduled_cleanup",
                    removed, "Scheduled cleanup cycle complete"
                );
            }
            Ok(CycleOutcome::Skipped(reason)) => {
                info!(
                    operation = "scheduled_cleanup",
                    reason = ?reason,
                    "Scheduled cleanup cycle skipped"
                );
            }
            Err(e) => {
                error!(
                    operation = "scheduled_cleanup",
                    error = %e,
                    "Scheduled cleanup cycle failed"
                );
            }
        }
    }

    async fn run_quota(&self) {
        match self.manager.run_quota_check(&self.store, Utc::now()).await {
            Ok(QuotaOutcome::Evicted { removed }) => {
                info!(
                    operation = "quota_poll",
                    removed, "Quota pressure eviction complete"
                );
            }
            Ok(_) => {}
            Err(e) => {
                error!(operation = "quota_poll", error = %e, "Quota poll failed");
            }
        }
    }
}

#[cfg(unix)]
fn daemonize() -> Result<()> {
    use nix::unistd::{fork, setsid, ForkResult};
    use std::fs::File;
    use std::os::unix::io::AsRawFd;

    match unsafe { fork()? } {
        ForkResult::Parent { child: _ } => {
            std::process::exit(0);
        }
        ForkResult::Child => {}
    }

    // Detach from the controlling terminal.
    setsid()?;

    // Second fork so the daemon is not a session leader.
    match unsafe { fork()? } {
        ForkResult::Parent { child: _ } => {
            std::process::exit(0);
        }
        ForkResult::Child => {}
    }

    std::env::set_current_dir("/")?;

    let dev_null = File::open("/dev/null")?;
    let null_fd = dev_null.as_raw_fd();
    unsafe {
        libc::dup2(null_fd, libc::STDIN_FILENO);
        libc::dup2(null_fd, libc::STDOUT_FILENO);
        libc::dup2(null_fd, libc::STDERR_FILENO);
    }

    Ok(())
}

#[cfg(not(unix))]
fn daemonize() -> Result<()> {
    Err(color_eyre::eyre::eyre!(
        "Daemonization is only supported on Unix-like systems"
    ))
}

fn is_container() -> bool {
    std::path::Path::new("/.dockerenv").exists()
        || std::fs::read_to_string("/proc/self/cgroup")
            .ok()
            .map(|s| s.contains("docker") || s.contains("containerd") || s.contains("podman"))
            .unwrap_or(false)
}

pub async fn run_start(foreground: bool, output: &Output) -> Result<()> {
    let paths = PathManager::default();
    paths
        .ensure_directories()
        .map_err(|e| color_eyre::eyre::eyre!("Failed to create directories: {}", e))?;
    let config = commands::load_config(&paths)?;

    // Containers keep the process in the foreground so PID 1 stays alive.
    let should_daemonize = !foreground && !is_container();

    if should_daemonize {
        output.info("Starting lifecycle daemon in background mode...");

        #[cfg(unix)]
        daemonize()?;

        let log_file = paths.daemon_log_file();
        crate::logging::init_logging_with_file(0, false, Some(log_file))
            .map_err(|e| color_eyre::eyre::eyre!("{}", e))?;
    } else {
        if is_container() && !foreground {
            output.info("Running in foreground mode (container detected)");
        }
        crate::logging::init_logging(0, false).map_err(|e| color_eyre::eyre::eyre!("{}", e))?;
    }

    let store = commands::open_store(&config, &paths)?;
    let scheduler = Scheduler::new(store, config.lifecycle.clone());
    scheduler.start().await
}

pub async fn run_stop(output: &Output) -> Result<()> {
    #[cfg(unix)]
    {
        use std::process::Command;

        let pgrep = Command::new("pgrep")
            .arg("-f")
            .arg("watchvault daemon")
            .output()?;

        if !pgrep.status.success() {
            output.warn("No running daemon process found.");
            return Ok(());
        }

        let pid_str = String::from_utf8(pgrep.stdout)?;
        let pids: Vec<&str> = pid_str.trim().lines().collect();
        if pids.is_empty() {
            output.warn("No running daemon process found.");
            return Ok(());
        }

        let self_pid = std::process::id().to_string();
        for pid in pids {
            let pid = pid.trim();
            if pid == self_pid {
                continue;
            }
            let killed = Command::new("kill").arg("-TERM").arg(pid).output()?;
            if killed.status.success() {
                output.info(format!("Sent SIGTERM to daemon process (PID: {})", pid));
            } else {
                output.warn(format!("Failed to stop process (PID: {})", pid));
            }
        }
    }

    #[cfg(not(unix))]
    {
        output.warn("Stop command is only supported on Unix-like systems.");
    }

    Ok(())
}
