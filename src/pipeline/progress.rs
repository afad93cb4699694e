//! Progress events, observers and background builds.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use tracing::{info, warn};

use super::context::BuildContext;
use super::report::BuildOutcome;
use super::Pipeline;
use crate::error::KagamiError;

/// Something the pipeline reports while it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    PhaseStarted {
        index: usize,
        total: usize,
        label: &'static str,
    },
    PhaseFinished {
        index: usize,
        total: usize,
        label: &'static str,
    },
    /// A best-effort sub-step failed and the build continued.
    StepFailed {
        phase: &'static str,
        step: String,
        error: String,
    },
    Log(String),
}

/// Receives every [`BuildEvent`] the pipeline emits.
pub trait BuildObserver: Send + Sync {
    fn notify(&self, event: &BuildEvent);
}

/// Writes events to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl BuildObserver for TracingObserver {
    fn notify(&self, event: &BuildEvent) {
        match event {
            BuildEvent::PhaseStarted {
                index,
                total,
                label,
            } => info!("[{}/{}] {}...", index, total, label),
            BuildEvent::PhaseFinished { label, .. } => tracing::debug!("{} done", label),
            BuildEvent::StepFailed { phase, step, error } => {
                warn!("{}: {} failed: {}", phase, step, error)
            }
            BuildEvent::Log(message) => info!("{}", message),
        }
    }
}

/// Forwards events over an `mpsc` channel.
///
/// Send errors are ignored: a presentation layer that hung up must not
/// stop the build.
#[derive(Debug)]
pub struct ChannelObserver {
    sender: Sender<BuildEvent>,
}

impl ChannelObserver {
    pub fn new(sender: Sender<BuildEvent>) -> Self {
        Self { sender }
    }
}

impl BuildObserver for ChannelObserver {
    fn notify(&self, event: &BuildEvent) {
        let _ = self.sender.send(event.clone());
    }
}

/// Advisory cancellation flag, checked only between phases.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A build running on a background thread.
pub struct BuildHandle {
    pub events: Receiver<BuildEvent>,
    pub cancel: CancelToken,
    join: JoinHandle<Result<BuildOutcome, KagamiError>>,
}

impl BuildHandle {
    /// Waits for the build to finish.
    pub fn join(self) -> Result<BuildOutcome, KagamiError> {
        match self.join.join() {
            Ok(result) => result,
            Err(_) => Err(KagamiError::Execution {
                command: "build thread".to_string(),
                status: "panicked".to_string(),
            }),
        }
    }
}

/// Runs the standard pipeline for `ctx` on a named background thread.
///
/// The context's observer is replaced by a channel whose receiving end is
/// returned in the handle.
pub fn spawn_build(ctx: BuildContext) -> Result<BuildHandle, KagamiError> {
    let (sender, events) = mpsc::channel();
    let mut ctx = ctx.with_observer(Arc::new(ChannelObserver::new(sender)));
    let cancel = CancelToken::new();
    let token = cancel.clone();

    let join = thread::Builder::new()
        .name("kagami-build".to_string())
        .spawn(move || Pipeline::standard().run(&mut ctx, &token))
        .map_err(|e| KagamiError::io("failed to spawn build thread", e))?;

    Ok(BuildHandle {
        events,
        cancel,
        join,
    })
}
