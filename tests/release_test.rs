//! Release alias resolution against scripted archive metadata.

mod helpers;

use std::sync::Arc;

use helpers::{FakeToolchain, TestBed};
use kagami::config::{BuildConfig, Desktop, InstallerKind};
use kagami::phase::resolve::resolve_release;
use kagami::pipeline::{BuildContext, CancelToken, PHASE_BOOTSTRAP, Pipeline};

const BOOKWORM_RELEASE: &str = "\
Origin: Debian
Label: Debian
Suite: stable
Version: 12.5
Codename: bookworm
";

const TRIXIE_RELEASE: &str = "\
Origin: Debian
Label: Debian
Suite: testing
Codename: trixie
";

const UBUNTU_DEVEL_RELEASE: &str = "\
Origin: Ubuntu
Label: Ubuntu
Suite: questing
Version: 25.10
Codename: questing
";

const META_RELEASE_LTS: &str = "\
Dist: focal
Name: Focal Fossa
Version: 20.04.6 LTS

Dist: jammy
Name: Jammy Jellyfish
Version: 22.04.4 LTS

Dist: noble
Name: Noble Numbat
Version: 24.04 LTS
";

fn resolved(bed: &TestBed, release: &str, tools: &Arc<FakeToolchain>) -> BuildContext {
    let mut ctx = bed.context(BuildConfig::default_for(release), Arc::clone(tools));
    resolve_release(&mut ctx).unwrap();
    ctx
}

fn resolution_succeeded(ctx: &BuildContext, alias: &str) -> bool {
    ctx.reports
        .iter()
        .find_map(|report| report.outcome(&format!("resolve {}", alias)))
        .is_some_and(|outcome| outcome.succeeded())
}

// =============================================================================
// Debian suites
// =============================================================================

#[test]
fn stable_resolves_with_pretty_name() {
    let bed = TestBed::new();
    let tools = bed.toolchain();
    tools.respond("dists/stable/Release", BOOKWORM_RELEASE);

    let ctx = resolved(&bed, "stable", &tools);

    assert_eq!(ctx.release.codename, "bookworm");
    assert_eq!(ctx.release.alias.as_deref(), Some("stable"));
    assert_eq!(ctx.release.pretty_name.as_deref(), Some("Debian 12.5"));
    assert_eq!(ctx.dist_name(), "Debian 12.5");
    assert!(resolution_succeeded(&ctx, "stable"));
    let fetch = &tools.calls_of("wget")[0];
    assert_eq!(fetch.last().unwrap(), "http://deb.debian.org/debian/dists/stable/Release");
}

#[test]
fn testing_without_version_names_the_suite() {
    let bed = TestBed::new();
    let tools = bed.toolchain();
    tools.respond("dists/testing/Release", TRIXIE_RELEASE);

    let ctx = resolved(&bed, "testing", &tools);

    assert_eq!(ctx.release.codename, "trixie");
    assert_eq!(ctx.release.pretty_name.as_deref(), Some("Debian Testing"));
}

#[test]
fn resolved_codename_reaches_debootstrap() {
    let bed = TestBed::new();
    let tools = bed.toolchain();
    tools.respond("dists/testing/Release", TRIXIE_RELEASE);
    tools.fail_on("debootstrap");
    let mut ctx = bed.context(BuildConfig::default_for("testing"), Arc::clone(&tools));

    let err = Pipeline::standard()
        .run(&mut ctx, &CancelToken::new())
        .unwrap_err();
    assert!(err.to_string().contains(PHASE_BOOTSTRAP), "unexpected error: {}", err);

    let debootstrap = &tools.calls_of("debootstrap")[0];
    assert!(debootstrap.iter().any(|a| a == "trixie"), "got {:?}", debootstrap);
    assert!(!debootstrap.iter().any(|a| a == "testing"));
}

// =============================================================================
// Ubuntu aliases
// =============================================================================

#[test]
fn lts_resolves_to_newest_meta_release_entry() {
    let bed = TestBed::new();
    let tools = bed.toolchain();
    tools.respond("meta-release-lts", META_RELEASE_LTS);

    let ctx = resolved(&bed, "lts", &tools);

    assert_eq!(ctx.release.codename, "noble");
    assert_eq!(ctx.release.alias.as_deref(), Some("lts"));
    assert_eq!(ctx.dist_name(), "Ubuntu LTS");
}

#[test]
fn devel_and_rolling_resolve_to_development_codename() {
    for alias in ["devel", "rolling"] {
        let bed = TestBed::new();
        let tools = bed.toolchain();
        tools.respond("dists/devel/Release", UBUNTU_DEVEL_RELEASE);

        let ctx = resolved(&bed, alias, &tools);

        assert_eq!(ctx.release.codename, "questing", "alias {}", alias);
        assert_ne!(ctx.release.codename, alias);
        assert_eq!(ctx.release.alias.as_deref(), Some(alias));
        assert_eq!(ctx.dist_name(), "Ubuntu Rolling");
        assert!(resolution_succeeded(&ctx, alias));
    }
}

#[test]
fn devel_bootstraps_lts_and_targets_development_series() {
    let bed = TestBed::new();
    let tools = bed.toolchain();
    tools.respond("dists/devel/Release", UBUNTU_DEVEL_RELEASE);
    let mut config = BuildConfig::default_for("devel");
    config.packages.desktop = Desktop::None;
    config.installer.kind = InstallerKind::Calamares;
    config.installer.slideshow = None;
    let mut ctx = bed.context(config, Arc::clone(&tools));

    Pipeline::standard()
        .run(&mut ctx, &CancelToken::new())
        .unwrap();

    let debootstrap = &tools.calls_of("debootstrap")[0];
    assert!(debootstrap.iter().any(|a| a == "noble"), "got {:?}", debootstrap);
    let sources =
        std::fs::read_to_string(bed.workspace.chroot_dir.join("etc/apt/sources.list")).unwrap();
    assert!(sources.contains("questing"), "sources.list: {}", sources);
    assert!(bed.output.is_file());
}

// =============================================================================
// Offline fallback
// =============================================================================

#[test]
fn unreachable_archive_keeps_alias_verbatim() {
    for alias in ["stable", "lts", "devel"] {
        let bed = TestBed::new();
        let tools = bed.toolchain();

        let ctx = resolved(&bed, alias, &tools);

        assert_eq!(ctx.release.codename, alias);
        assert_eq!(ctx.release.alias.as_deref(), Some(alias));
        assert!(!resolution_succeeded(&ctx, alias));
        assert_eq!(tools.calls_of("wget").len(), 1);
    }
}

#[test]
fn literal_codename_skips_the_network() {
    let bed = TestBed::new();
    let tools = bed.toolchain();

    let ctx = resolved(&bed, "jammy", &tools);

    assert_eq!(ctx.release.codename, "jammy");
    assert_eq!(ctx.release.alias, None);
    assert!(tools.calls_of("wget").is_empty());
}
