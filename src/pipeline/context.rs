//! State threaded through every phase of one build.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use camino::Utf8PathBuf;

use super::progress::{BuildEvent, BuildObserver, TracingObserver};
use super::report::{BestEffort, StepReport};
use crate::chroot::{ChrootMounts, ChrootSession, DEFAULT_UNMOUNT_RETRY_DELAY, MountTable};
use crate::config::BuildConfig;
use crate::distro::{DistroProfile, ReleaseInfo};
use crate::error::KagamiError;
use crate::executor::{CommandExecutor, CommandSpec, ExecutionResult};
use crate::host::HostFacts;
use crate::workspace::{Workspace, WorkspaceLock};

/// Facts about the host the build runs on.
#[derive(Debug, Clone)]
pub struct BuildEnvironment {
    pub host: HostFacts,
    /// Root under which host-side boot loader files are looked up.
    pub host_root: Utf8PathBuf,
    pub mount_table: MountTable,
    /// PATH used for the tool check; the process PATH when `None`.
    pub tool_path: Option<String>,
    pub unmount_retry_delay: Duration,
}

impl BuildEnvironment {
    /// Probes the running host.
    pub fn detect() -> Self {
        Self {
            host: HostFacts::detect(),
            host_root: Utf8PathBuf::from("/"),
            mount_table: MountTable::default(),
            tool_path: None,
            unmount_retry_delay: DEFAULT_UNMOUNT_RETRY_DELAY,
        }
    }

    /// Host path of an absolute file name, relative to `host_root`.
    pub fn host_path(&self, absolute: &str) -> Utf8PathBuf {
        self.host_root.join(absolute.trim_start_matches('/'))
    }
}

/// Everything a phase may read or mutate.
pub struct BuildContext {
    pub config: BuildConfig,
    pub workspace: Workspace,
    /// Where the finished image is written.
    pub output: Utf8PathBuf,
    pub profile: &'static DistroProfile,
    /// Release after alias resolution.
    pub release: ReleaseInfo,
    pub env: BuildEnvironment,
    pub executor: Arc<dyn CommandExecutor>,
    pub observer: Arc<dyn BuildObserver>,
    pub mounts: ChrootMounts,
    pub reports: Vec<StepReport>,
    pub(crate) lock: Option<WorkspaceLock>,
    pub(crate) phase: &'static str,
}

impl BuildContext {
    /// Validates `config` and prepares a context. Nothing is written to disk.
    pub fn new(
        mut config: BuildConfig,
        workspace: Workspace,
        output: Utf8PathBuf,
        env: BuildEnvironment,
        executor: Arc<dyn CommandExecutor>,
    ) -> Result<Self, KagamiError> {
        config.validate()?;
        let profile = config.profile();
        let release = ReleaseInfo::literal(&config.release);
        let mounts = ChrootMounts::new(
            &workspace.chroot_dir,
            env.mount_table.clone(),
            Arc::clone(&executor),
        )
        .with_retry_delay(env.unmount_retry_delay)
        .with_hint(env.host.container_hint("CAP_SYS_ADMIN"));

        Ok(Self {
            config,
            workspace,
            output,
            profile,
            release,
            env,
            executor,
            observer: Arc::new(TracingObserver),
            mounts,
            reports: Vec::new(),
            lock: None,
            phase: "",
        })
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn BuildObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Label of the phase currently running.
    pub fn phase(&self) -> &'static str {
        self.phase
    }

    pub fn chroot(&self) -> ChrootSession {
        ChrootSession::new(&self.workspace.chroot_dir, Arc::clone(&self.executor))
    }

    /// Concrete codename used for sources and boot media.
    pub fn codename(&self) -> &str {
        &self.release.codename
    }

    /// Human readable distribution name for menus and disk defines.
    pub fn dist_name(&self) -> String {
        self.profile.dist_name(&self.release)
    }

    pub fn live_dir(&self) -> Utf8PathBuf {
        self.workspace.live_dir(self.profile)
    }

    /// Emits a log event.
    pub fn note(&self, message: impl Into<String>) {
        self.observer.notify(&BuildEvent::Log(message.into()));
    }

    /// Starts a best-effort step group for the current phase.
    pub fn best_effort(&self) -> BestEffort {
        BestEffort::new(self.phase, Arc::clone(&self.observer))
    }

    /// Runs a host command and fails on a non-zero exit.
    pub fn run(&self, command: &str, args: Vec<String>) -> Result<ExecutionResult> {
        self.executor.execute_checked(&CommandSpec::new(command, args))
    }

    /// Runs a host command and returns its standard output.
    pub fn capture(&self, command: &str, args: Vec<String>) -> Result<String> {
        let result = self
            .executor
            .execute_checked(&CommandSpec::new(command, args).capturing())?;
        Ok(result.stdout_lossy())
    }

    pub(crate) fn image_path(&self, relative: &str) -> Utf8PathBuf {
        self.workspace.image_dir.join(relative)
    }

    pub(crate) fn chroot_path(&self, relative: &str) -> Utf8PathBuf {
        self.workspace.chroot_dir.join(relative.trim_start_matches('/'))
    }

    pub(crate) fn take_lock(&mut self) -> Result<(), KagamiError> {
        if self.lock.is_none() {
            self.lock = Some(self.workspace.lock()?);
        }
        Ok(())
    }

    pub(crate) fn release_lock(&mut self) {
        self.lock = None;
    }
}
