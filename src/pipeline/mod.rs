//! Build pipeline orchestrator.
//!
//! The pipeline runs a fixed, ordered list of phases against one
//! [`BuildContext`]. Transitions are strictly linear: the first failing
//! phase stops the run, every mount under the chroot is torn down, and the
//! failure is returned as [`KagamiError::Phase`] carrying the phase ordinal
//! and label. The workspace itself is never deleted here.

mod context;
mod progress;
mod report;

use tracing::{debug, error};

pub use context::{BuildContext, BuildEnvironment};
pub use progress::{
    BuildEvent, BuildHandle, BuildObserver, CancelToken, ChannelObserver, TracingObserver,
    spawn_build,
};
pub use report::{BestEffort, BuildOutcome, StepOutcome, StepReport};

use crate::error::KagamiError;
use crate::{image, phase};

/// Signature shared by every phase step.
pub type PhaseStep = fn(&mut BuildContext) -> anyhow::Result<()>;

/// One named state of the pipeline.
#[derive(Clone, Copy)]
pub struct PhaseRecord {
    /// 1-based ordinal.
    pub index: usize,
    pub label: &'static str,
    step: PhaseStep,
}

impl std::fmt::Debug for PhaseRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseRecord")
            .field("index", &self.index)
            .field("label", &self.label)
            .finish()
    }
}

pub const PHASE_RESOLVE: &str = "Resolving release aliases";
pub const PHASE_PREREQUISITES: &str = "Checking prerequisites";
pub const PHASE_DIRECTORIES: &str = "Creating directories";
pub const PHASE_BOOTSTRAP: &str = "Bootstrapping base system";
pub const PHASE_MOUNT: &str = "Mounting filesystems";
pub const PHASE_CONFIGURE: &str = "Configuring system";
pub const PHASE_SECURITY: &str = "Applying security suppression";
pub const PHASE_PACKAGES: &str = "Installing packages";
pub const PHASE_DESKTOP: &str = "Installing desktop environment";
pub const PHASE_FLATPAK: &str = "Configuring Flatpak";
pub const PHASE_BOOTLOADER: &str = "Configuring bootloader";
pub const PHASE_SEAL: &str = "Cleaning up chroot";
pub const PHASE_FILESYSTEM: &str = "Creating filesystem image";
pub const PHASE_ISO: &str = "Creating ISO";
pub const PHASE_TEARDOWN: &str = "Cleaning up";

const STANDARD_PHASES: [(&str, PhaseStep); 15] = [
    (PHASE_RESOLVE, phase::resolve::resolve_release),
    (PHASE_PREREQUISITES, phase::prerequisites::check_prerequisites),
    (PHASE_DIRECTORIES, phase::bootstrap::create_directories),
    (PHASE_BOOTSTRAP, phase::bootstrap::bootstrap_system),
    (PHASE_MOUNT, phase::mounts::mount_filesystems),
    (PHASE_CONFIGURE, phase::configure::configure_system),
    (PHASE_SECURITY, phase::security::apply_security),
    (PHASE_PACKAGES, phase::packages::install_packages),
    (PHASE_DESKTOP, phase::desktop::install_desktop),
    (PHASE_FLATPAK, phase::flatpak::configure_flatpak),
    (PHASE_BOOTLOADER, phase::bootloader::configure_bootloader),
    (PHASE_SEAL, phase::seal::cleanup_chroot),
    (PHASE_FILESYSTEM, image::create_filesystem_image),
    (PHASE_ISO, image::create_iso),
    (PHASE_TEARDOWN, phase::mounts::unmount_filesystems),
];

/// Ordered list of phases, fixed for the lifetime of a run.
#[derive(Debug, Clone)]
pub struct Pipeline {
    phases: Vec<PhaseRecord>,
}

impl Pipeline {
    /// The full image build.
    pub fn standard() -> Self {
        let phases = STANDARD_PHASES
            .iter()
            .enumerate()
            .map(|(i, &(label, step))| PhaseRecord {
                index: i + 1,
                label,
                step,
            })
            .collect();
        Self { phases }
    }

    pub fn phases(&self) -> &[PhaseRecord] {
        &self.phases
    }

    /// Runs every phase in order.
    ///
    /// Holds the workspace lock for the whole run. Cancellation is observed
    /// only between phases.
    pub fn run(
        &self,
        ctx: &mut BuildContext,
        cancel: &CancelToken,
    ) -> Result<BuildOutcome, KagamiError> {
        let total = self.phases.len();
        ctx.take_lock()?;

        for record in &self.phases {
            if cancel.is_cancelled() {
                Self::teardown(ctx);
                ctx.release_lock();
                return Err(KagamiError::Cancelled {
                    completed: record.index - 1,
                    total,
                });
            }

            ctx.phase = record.label;
            ctx.observer.notify(&BuildEvent::PhaseStarted {
                index: record.index,
                total,
                label: record.label,
            });

            if let Err(cause) = (record.step)(ctx) {
                Self::teardown(ctx);
                ctx.release_lock();
                return Err(KagamiError::Phase {
                    index: record.index,
                    total,
                    label: record.label,
                    cause,
                });
            }

            ctx.observer.notify(&BuildEvent::PhaseFinished {
                index: record.index,
                total,
                label: record.label,
            });
        }

        ctx.release_lock();
        Ok(BuildOutcome {
            iso: ctx.output.clone(),
            reports: std::mem::take(&mut ctx.reports),
        })
    }

    fn teardown(ctx: &mut BuildContext) {
        debug!("tearing down chroot mounts after an interrupted build");
        if let Err(e) = ctx.mounts.unmount_all() {
            error!("{:#}", e);
        }
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::standard()
    }
}
