//! Release alias resolution against the archive metadata.

use anyhow::{Context, Result};
use tracing::info;

use crate::config::Distribution;
use crate::distro::{ReleaseInfo, capitalize};
use crate::pipeline::BuildContext;

/// Ubuntu's list of LTS releases, newest last.
pub const UBUNTU_LTS_META: &str = "https://changelogs.ubuntu.com/meta-release-lts";

/// Fields of an archive `Release` file used for naming.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReleaseFields {
    pub codename: Option<String>,
    pub label: Option<String>,
    pub version: Option<String>,
}

/// Parses the header of a `dists/<suite>/Release` file.
pub fn parse_release_file(content: &str) -> ReleaseFields {
    let mut fields = ReleaseFields::default();
    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match key {
            "Codename" => {
                fields.codename = value.split_whitespace().next().map(str::to_string);
            }
            "Label" => fields.label = Some(value.to_string()),
            "Version" => fields.version = Some(value.to_string()),
            _ => {}
        }
    }
    fields
}

/// Returns the codename of the newest entry in a `meta-release` listing.
pub fn parse_meta_release(content: &str) -> Option<String> {
    content
        .lines()
        .filter_map(|line| line.strip_prefix("Dist:"))
        .map(str::trim)
        .filter(|dist| !dist.is_empty())
        .last()
        .map(str::to_string)
}

/// Phase 1: resolves `stable`, `lts`, `rolling` and friends to a codename.
///
/// Never fails: when the archive cannot be reached the alias is kept
/// verbatim.
pub fn resolve_release(ctx: &mut BuildContext) -> Result<()> {
    let requested = ctx.config.release.clone();
    let distro = ctx.config.distribution();
    if !distro.is_alias(&requested) {
        ctx.release = ReleaseInfo::literal(&requested);
        return Ok(());
    }

    ctx.note(format!("resolving {} {} codename", distro, requested));
    let mut resolved = None;
    let mut steps = ctx.best_effort();
    steps.attempt(format!("resolve {}", requested), || {
        resolved = Some(lookup(ctx, distro, &requested)?);
        Ok(())
    });
    ctx.reports.push(steps.finish());

    ctx.release = match resolved {
        Some(info) => {
            info!("{} resolved to codename: {}", requested, info.codename);
            info
        }
        None => {
            ctx.note(format!(
                "could not resolve {} (offline?), using the alias verbatim",
                requested
            ));
            ReleaseInfo {
                alias: Some(requested.clone()),
                ..ReleaseInfo::literal(&requested)
            }
        }
    };
    Ok(())
}

fn lookup(ctx: &BuildContext, distro: Distribution, alias: &str) -> Result<ReleaseInfo> {
    let mirror = ctx.config.mirror();
    let (url, from_meta) = match (distro, alias) {
        (Distribution::Ubuntu, "lts") => (UBUNTU_LTS_META.to_string(), true),
        (Distribution::Ubuntu, _) => (format!("{}dists/devel/Release", mirror), false),
        (Distribution::Debian, _) => (format!("{}dists/{}/Release", mirror, alias), false),
    };
    let body = ctx
        .capture("wget", vec!["-qO-".to_string(), url.clone()])
        .with_context(|| format!("failed to fetch {}", url))?;

    let (codename, pretty_name) = if from_meta {
        let codename = parse_meta_release(&body);
        (codename, None)
    } else {
        let fields = parse_release_file(&body);
        let pretty = match (distro, &fields.label, &fields.version) {
            (Distribution::Debian, Some(label), Some(version)) => {
                Some(format!("{} {}", label, version))
            }
            (Distribution::Debian, Some(label), None) => {
                Some(format!("{} {}", label, capitalize(alias)))
            }
            _ => None,
        };
        (fields.codename, pretty)
    };

    let codename = codename
        .filter(|c| c != alias)
        .with_context(|| format!("no codename found in {}", url))?;
    Ok(ReleaseInfo {
        requested: alias.to_string(),
        codename,
        alias: Some(alias.to_string()),
        pretty_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOOKWORM_RELEASE: &str = "\
Origin: Debian
Label: Debian
Suite: stable
Version: 12.5
Codename: bookworm
Changelogs: https://metadata.ftp-master.debian.org/changelogs/@CHANGEPATH@_changelog
Date: Sat, 10 Feb 2024 09:46:28 UTC
";

    #[test]
    fn parses_release_header() {
        let fields = parse_release_file(BOOKWORM_RELEASE);
        assert_eq!(fields.codename.as_deref(), Some("bookworm"));
        assert_eq!(fields.label.as_deref(), Some("Debian"));
        assert_eq!(fields.version.as_deref(), Some("12.5"));
    }

    #[test]
    fn release_without_fields() {
        assert_eq!(parse_release_file("<html>404</html>"), ReleaseFields::default());
    }

    #[test]
    fn meta_release_picks_newest() {
        let meta = "Dist: focal\nName: Focal Fossa\n\nDist: jammy\nName: Jammy\n\nDist: noble\n";
        assert_eq!(parse_meta_release(meta).as_deref(), Some("noble"));
        assert_eq!(parse_meta_release(""), None);
    }
}
