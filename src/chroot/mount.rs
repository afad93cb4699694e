//! Mount management for the build chroot.
//!
//! [`ChrootMounts`] establishes the bind and pseudo filesystem mounts a
//! chroot needs and tears them down again, innermost first. Whether a target
//! is already mounted is decided by [`MountTable`], which matches the exact
//! resolved mount point rather than a path prefix.

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info, warn};

use super::validate_no_symlinks;
use crate::error::KagamiError;
use crate::executor::{CommandExecutor, CommandSpec};

/// Number of lazy unmount attempts per target.
pub const UNMOUNT_ATTEMPTS: usize = 3;

/// Delay between unmount attempts.
pub const DEFAULT_UNMOUNT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// The kernel mount table, or any file in the same format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountTable {
    path: Utf8PathBuf,
}

impl Default for MountTable {
    fn default() -> Self {
        Self::at("/proc/mounts")
    }
}

impl MountTable {
    pub fn at(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Returns every mount point listed in the table, in table order.
    pub fn mount_points(&self) -> Result<Vec<Utf8PathBuf>> {
        let content = fs::read_to_string(&self.path).map_err(|e| {
            KagamiError::io(format!("failed to read mount table {}", self.path), e)
        })?;
        Ok(content
            .lines()
            .filter_map(|line| line.split_whitespace().nth(1))
            .map(|field| Utf8PathBuf::from(decode_mount_field(field)))
            .collect())
    }

    /// Returns true if `target` (after resolution) is exactly a mount point.
    pub fn is_mounted(&self, target: &Utf8Path) -> Result<bool> {
        let resolved = resolve(target);
        Ok(self.mount_points()?.iter().any(|p| *p == resolved))
    }

    /// Returns the mount points located strictly below `root`, deepest first.
    pub fn mounted_under(&self, root: &Utf8Path) -> Result<Vec<Utf8PathBuf>> {
        let root = resolve(root);
        let mut points: Vec<_> = self
            .mount_points()?
            .into_iter()
            .filter(|p| p != &root && p.starts_with(&root))
            .collect();
        points.sort_by_key(|p| std::cmp::Reverse(p.components().count()));
        points.dedup();
        Ok(points)
    }
}

/// Decodes the octal escapes (`\040` for space, etc.) used in mount tables.
fn decode_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && let Some(code) = std::str::from_utf8(&bytes[i + 1..i + 4])
                .ok()
                .and_then(|s| u8::from_str_radix(s, 8).ok())
        {
            out.push(code);
            i += 4;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Canonicalizes `path` when it exists, otherwise returns it unchanged.
pub(crate) fn resolve(path: &Utf8Path) -> Utf8PathBuf {
    fs::canonicalize(path)
        .ok()
        .and_then(|p| Utf8PathBuf::from_path_buf(p).ok())
        .unwrap_or_else(|| path.to_owned())
}

/// A filesystem mounted into the chroot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MountPoint {
    /// Host `/dev` bind mount.
    Dev,
    /// Host `/run` bind mount.
    Run,
    Proc,
    Sys,
    DevPts,
}

impl MountPoint {
    /// Host bind mounts established before the chroot is configured.
    pub const HOST_BINDS: [MountPoint; 2] = [Self::Dev, Self::Run];

    /// Pseudo filesystems used while packages are installed, in mount order.
    pub const INTERNAL: [MountPoint; 3] = [Self::Proc, Self::Sys, Self::DevPts];

    /// Teardown order for a full cleanup.
    pub const TEARDOWN: [MountPoint; 5] =
        [Self::DevPts, Self::Dev, Self::Proc, Self::Sys, Self::Run];

    /// Target path relative to the chroot root.
    pub fn target(self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Run => "run",
            Self::Proc => "proc",
            Self::Sys => "sys",
            Self::DevPts => "dev/pts",
        }
    }

    fn mount_args(self, target: &Utf8Path) -> Vec<String> {
        let (kind, source) = match self {
            Self::Dev => ("--bind", "/dev"),
            Self::Run => ("--bind", "/run"),
            Self::Proc => ("proc", "proc"),
            Self::Sys => ("sysfs", "sysfs"),
            Self::DevPts => ("devpts", "devpts"),
        };
        let mut args = Vec::new();
        if kind == "--bind" {
            args.push(kind.to_string());
        } else {
            args.push("-t".to_string());
            args.push(kind.to_string());
        }
        args.push(source.to_string());
        args.push(target.to_string());
        args
    }
}

/// Tracks the mounts established inside one chroot.
///
/// Dropping the guard retries any teardown that has not happened yet.
pub struct ChrootMounts {
    chroot: Utf8PathBuf,
    table: MountTable,
    executor: Arc<dyn CommandExecutor>,
    retry_delay: Duration,
    hint: Option<String>,
    established: Vec<MountPoint>,
}

impl ChrootMounts {
    pub fn new(chroot: &Utf8Path, table: MountTable, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            chroot: chroot.to_owned(),
            table,
            executor,
            retry_delay: DEFAULT_UNMOUNT_RETRY_DELAY,
            hint: None,
            established: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sets a diagnostic appended to mount failures.
    #[must_use]
    pub fn with_hint(mut self, hint: Option<String>) -> Self {
        self.hint = hint;
        self
    }

    pub fn table(&self) -> &MountTable {
        &self.table
    }

    /// Mount points established by this guard, in mount order.
    pub fn established(&self) -> &[MountPoint] {
        &self.established
    }

    /// Absolute path of a mount point inside the chroot.
    pub fn target_path(&self, point: MountPoint) -> Utf8PathBuf {
        self.chroot.join(point.target())
    }

    /// Mounts each point in order, skipping targets that are already mounted.
    pub fn mount(&mut self, points: &[MountPoint]) -> Result<()> {
        for &point in points {
            let target = self.target_path(point);
            validate_no_symlinks(&self.chroot, Utf8Path::new(point.target()))?;
            fs::create_dir_all(&target).map_err(|e| {
                KagamiError::io(format!("failed to create mount target {}", target), e)
            })?;

            if self.table.is_mounted(&target)? {
                info!("{} already mounted, skipping", target);
                continue;
            }

            info!("mounting {}", target);
            let spec = CommandSpec::new("mount", point.mount_args(&target));
            let outcome = self.executor.execute(&spec);
            match outcome {
                Ok(result) if result.success() => self.established.push(point),
                Ok(result) => return Err(self.mount_error(&target, &result.status.to_string())),
                Err(e) => return Err(self.mount_error(&target, &format!("{:#}", e))),
            }
        }
        Ok(())
    }

    fn mount_error(&self, target: &Utf8Path, cause: &str) -> anyhow::Error {
        let mut message = format!("failed to mount {}: {}", target, cause);
        if let Some(ref hint) = self.hint {
            message.push_str("\n[TIP] ");
            message.push_str(hint);
        }
        KagamiError::Mount(message).into()
    }

    /// Unmounts each point that this guard established or that the mount
    /// table still lists, in the given order.
    ///
    /// Every point is attempted; failures are reported together.
    pub fn unmount(&mut self, points: &[MountPoint]) -> Result<()> {
        let mut errors = Vec::new();
        for &point in points {
            let target = self.target_path(point);
            let tracked = self.established.contains(&point);
            let listed = self.table.is_mounted(&target).unwrap_or_else(|e| {
                warn!("{:#}", e);
                false
            });
            if !tracked && !listed {
                continue;
            }
            match self.lazy_unmount(&target) {
                Ok(()) => self.established.retain(|p| *p != point),
                Err(e) => errors.push(e),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(KagamiError::Mount(format!(
                "failed to unmount {} filesystem(s): {}",
                errors.len(),
                errors.join("; ")
            ))
            .into())
        }
    }

    /// Unmounts everything under the chroot, innermost first.
    pub fn unmount_all(&mut self) -> Result<()> {
        let mut order: Vec<MountPoint> = self.established.iter().rev().copied().collect();
        for point in MountPoint::TEARDOWN {
            if !order.contains(&point) {
                order.push(point);
            }
        }
        // Nested mounts must go before their parents regardless of mount order.
        order.sort_by_key(|p| std::cmp::Reverse(p.target().matches('/').count()));
        self.unmount(&order)
    }

    /// Mount points still listed below the chroot.
    pub fn remaining(&self) -> Result<Vec<Utf8PathBuf>> {
        self.table.mounted_under(&self.chroot)
    }

    fn lazy_unmount(&self, target: &Utf8Path) -> Result<(), String> {
        let spec = CommandSpec::new("umount", vec!["-l".to_string(), target.to_string()]);
        let mut last_error = String::new();
        for attempt in 1..=UNMOUNT_ATTEMPTS {
            info!("unmounting {}", target);
            match self.executor.execute(&spec) {
                Ok(result) if result.success() => return Ok(()),
                Ok(result) => last_error = result.status.to_string(),
                Err(e) => last_error = format!("{:#}", e),
            }
            debug!("umount {} attempt {} failed: {}", target, attempt, last_error);
            if attempt < UNMOUNT_ATTEMPTS {
                thread::sleep(self.retry_delay);
            }
        }

        // A busy target may have been detached by an earlier lazy attempt.
        if let Ok(false) = self.table.is_mounted(target) {
            return Ok(());
        }
        Err(format!("umount {} failed: {}", target, last_error))
    }
}

impl Drop for ChrootMounts {
    fn drop(&mut self) {
        if !self.established.is_empty()
            && let Err(e) = self.unmount_all()
        {
            tracing::error!(
                "failed to unmount filesystems during cleanup: {:#}. \
                Manual cleanup may be required: findmnt | grep {}",
                e,
                self.chroot
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutionResult;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;
    use std::sync::Mutex;

    /// Mock that keeps the mount table file in sync with mount/umount calls.
    struct MockMountExecutor {
        table: Utf8PathBuf,
        calls: Mutex<Vec<Vec<String>>>,
        fail_mount_of: Option<&'static str>,
        busy_umounts: Mutex<usize>,
    }

    impl MockMountExecutor {
        fn new(table: &Utf8Path) -> Self {
            Self {
                table: table.to_owned(),
                calls: Mutex::new(Vec::new()),
                fail_mount_of: None,
                busy_umounts: Mutex::new(0),
            }
        }

        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CommandExecutor for MockMountExecutor {
        fn execute(&self, spec: &CommandSpec) -> Result<ExecutionResult> {
            self.calls.lock().unwrap().push(spec.argv());
            let target = spec.args.last().cloned().unwrap_or_default();
            let content = fs::read_to_string(&self.table).unwrap();
            let ok = match spec.command.as_str() {
                "mount" if self.fail_mount_of.is_some_and(|t| target.ends_with(t)) => false,
                "mount" => {
                    fs::write(&self.table, format!("{}none {} none rw 0 0\n", content, target))
                        .unwrap();
                    true
                }
                "umount" => {
                    let mut busy = self.busy_umounts.lock().unwrap();
                    if *busy > 0 {
                        *busy -= 1;
                        false
                    } else {
                        let kept: String = content
                            .lines()
                            .filter(|l| l.split_whitespace().nth(1) != Some(target.as_str()))
                            .map(|l| format!("{}\n", l))
                            .collect();
                        fs::write(&self.table, kept).unwrap();
                        true
                    }
                }
                _ => true,
            };
            Ok(ExecutionResult {
                status: ExitStatus::from_raw(if ok { 0 } else { 1 << 8 }),
                stdout: Vec::new(),
            })
        }
    }

    fn setup() -> (tempfile::TempDir, Utf8PathBuf, Utf8PathBuf) {
        let temp = tempfile::tempdir().unwrap();
        let base = resolve(&Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap());
        let chroot = base.join("chroot");
        fs::create_dir_all(&chroot).unwrap();
        let table = base.join("mounts");
        fs::write(&table, "proc /proc proc rw 0 0\n").unwrap();
        (temp, chroot, table)
    }

    #[test]
    fn decodes_escaped_mount_points() {
        assert_eq!(decode_mount_field("/work/my\\040dir"), "/work/my dir");
        assert_eq!(decode_mount_field("/plain"), "/plain");
        assert_eq!(decode_mount_field("/trailing\\04"), "/trailing\\04");
    }

    #[test]
    fn exact_match_not_prefix() {
        let (_temp, chroot, table_path) = setup();
        let dev = chroot.join("dev");
        fs::create_dir_all(&dev).unwrap();
        fs::write(&table_path, format!("udev {}ice devtmpfs rw 0 0\n", dev)).unwrap();
        let table = MountTable::at(&table_path);
        assert!(!table.is_mounted(&dev).unwrap());

        fs::write(&table_path, format!("udev {} devtmpfs rw 0 0\n", dev)).unwrap();
        assert!(table.is_mounted(&dev).unwrap());
    }

    #[test]
    fn mount_then_unmount_all_innermost_first() {
        let (_temp, chroot, table) = setup();
        let executor = Arc::new(MockMountExecutor::new(&table));
        let mut mounts = ChrootMounts::new(&chroot, MountTable::at(&table), executor.clone())
            .with_retry_delay(Duration::ZERO);

        mounts.mount(&MountPoint::HOST_BINDS).unwrap();
        mounts.mount(&MountPoint::INTERNAL).unwrap();
        assert_eq!(mounts.established().len(), 5);
        assert_eq!(mounts.remaining().unwrap().len(), 5);

        mounts.unmount_all().unwrap();
        assert!(mounts.established().is_empty());
        assert!(mounts.remaining().unwrap().is_empty());

        let umounts: Vec<_> = executor
            .calls()
            .into_iter()
            .filter(|c| c[0] == "umount")
            .map(|c| c[2].clone())
            .collect();
        assert_eq!(umounts.len(), 5);
        assert!(umounts[0].ends_with("dev/pts"));
        assert!(umounts[4].ends_with("dev"));
    }

    #[test]
    fn already_mounted_target_is_skipped() {
        let (_temp, chroot, table) = setup();
        fs::create_dir_all(chroot.join("dev")).unwrap();
        fs::write(&table, format!("udev {}/dev devtmpfs rw 0 0\n", chroot)).unwrap();
        let executor = Arc::new(MockMountExecutor::new(&table));
        let mut mounts = ChrootMounts::new(&chroot, MountTable::at(&table), executor.clone());

        mounts.mount(&MountPoint::HOST_BINDS).unwrap();
        let calls = executor.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0][..2], ["mount", "--bind"]);
        assert_eq!(calls[0][2], "/run");
        assert_eq!(mounts.established(), [MountPoint::Run]);
    }

    #[test]
    fn busy_unmount_is_retried() {
        let (_temp, chroot, table) = setup();
        let executor = Arc::new(MockMountExecutor::new(&table));
        let mut mounts = ChrootMounts::new(&chroot, MountTable::at(&table), executor.clone())
            .with_retry_delay(Duration::ZERO);
        mounts.mount(&[MountPoint::Proc]).unwrap();

        *executor.busy_umounts.lock().unwrap() = 2;
        mounts.unmount(&[MountPoint::Proc]).unwrap();
        let umounts = executor.calls().iter().filter(|c| c[0] == "umount").count();
        assert_eq!(umounts, 3);
    }

    #[test]
    fn persistent_busy_unmount_reports_error() {
        let (_temp, chroot, table) = setup();
        let executor = Arc::new(MockMountExecutor::new(&table));
        let mut mounts = ChrootMounts::new(&chroot, MountTable::at(&table), executor.clone())
            .with_retry_delay(Duration::ZERO);
        mounts.mount(&[MountPoint::Sys]).unwrap();

        *executor.busy_umounts.lock().unwrap() = UNMOUNT_ATTEMPTS;
        let err = mounts.unmount(&[MountPoint::Sys]).unwrap_err();
        assert!(err.to_string().contains("failed to unmount 1 filesystem(s)"));
        assert_eq!(mounts.established(), [MountPoint::Sys]);

        // The next attempt succeeds and clears the guard.
        mounts.unmount_all().unwrap();
        assert!(mounts.established().is_empty());
    }

    #[test]
    fn mount_failure_carries_hint() {
        let (_temp, chroot, table) = setup();
        let mut executor = MockMountExecutor::new(&table);
        executor.fail_mount_of = Some("run");
        let executor = Arc::new(executor);
        let mut mounts = ChrootMounts::new(&chroot, MountTable::at(&table), executor)
            .with_hint(Some("grant CAP_SYS_ADMIN".to_string()));

        let err = mounts.mount(&MountPoint::HOST_BINDS).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("failed to mount"));
        assert!(msg.contains("[TIP] grant CAP_SYS_ADMIN"));
        assert_eq!(mounts.established(), [MountPoint::Dev]);
        mounts.unmount_all().unwrap();
    }

    #[test]
    fn symlinked_target_is_rejected() {
        let (_temp, chroot, table) = setup();
        std::os::unix::fs::symlink("/", chroot.join("proc")).unwrap();
        let executor = Arc::new(MockMountExecutor::new(&table));
        let mut mounts = ChrootMounts::new(&chroot, MountTable::at(&table), executor.clone());
        let err = mounts.mount(&[MountPoint::Proc]).unwrap_err();
        assert!(err.to_string().contains("symlink"));
        assert!(executor.calls().is_empty());
    }
}
