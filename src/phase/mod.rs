//! Step functions for each pipeline phase.
//!
//! Every public step has the [`PhaseStep`](crate::pipeline::PhaseStep)
//! signature. Fatal sub-steps propagate with `?`; best-effort sub-steps go
//! through [`BestEffort`](crate::pipeline::BestEffort) and end up in the
//! phase's [`StepReport`](crate::pipeline::StepReport).

pub mod bootloader;
pub mod bootstrap;
pub mod configure;
pub mod desktop;
pub mod flatpak;
pub mod mounts;
pub mod packages;
pub mod prerequisites;
pub mod resolve;
pub mod seal;
pub mod security;

mod installer;

/// Renders an `apt-get install -y` command line.
pub(crate) fn apt_install<S: AsRef<str>>(packages: &[S], no_recommends: bool) -> String {
    let mut script = String::from("apt-get install -y");
    if no_recommends {
        script.push_str(" --no-install-recommends");
    }
    for package in packages {
        script.push(' ');
        script.push_str(package.as_ref());
    }
    script
}

/// Renders an `apt-get purge -y` command line.
pub(crate) fn apt_purge<S: AsRef<str>>(packages: &[S]) -> String {
    let mut script = String::from("apt-get purge -y");
    for package in packages {
        script.push(' ');
        script.push_str(package.as_ref());
    }
    script
}

/// Derives the headers package matching a kernel package.
///
/// `linux-image-amd64` gives `linux-headers-amd64`, `linux-generic` gives
/// `linux-headers-generic`; anything else has no headers package.
pub fn headers_package(kernel: &str) -> Option<String> {
    if let Some(flavour) = kernel.strip_prefix("linux-image-") {
        Some(format!("linux-headers-{}", flavour))
    } else {
        kernel
            .strip_prefix("linux-")
            .filter(|flavour| !flavour.is_empty())
            .map(|flavour| format!("linux-headers-{}", flavour))
    }
}
