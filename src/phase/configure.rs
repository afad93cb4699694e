//! Base system configuration inside the fresh chroot.

use anyhow::{Context, Result};
use tracing::info;

use crate::chroot::{ChrootSession, MountPoint};
use crate::config::{AdditionalRepo, SigningKey};
use crate::executor::CommandSpec;
use crate::pipeline::BuildContext;

const KEYRING_DIR: &str = "etc/apt/keyrings";

/// Renders `/etc/hosts` for `hostname`.
pub fn hosts_file(hostname: &str) -> String {
    format!(
        "127.0.0.1\tlocalhost\n127.0.1.1\t{}\n\n::1\tip6-localhost ip6-loopback\nff02::1\tip6-allnodes\nff02::2\tip6-allrouters\n",
        hostname
    )
}

/// Renders the `sources.list.d` entry of an additional repository.
pub fn repo_list_line(repo: &AdditionalRepo, signed: bool) -> String {
    let mut line = String::from("deb ");
    if signed {
        line.push_str(&format!("[signed-by=/{}/{}.gpg] ", KEYRING_DIR, repo.name));
    }
    line.push_str(&repo.uri);
    line.push(' ');
    line.push_str(&repo.suite);
    for component in &repo.components {
        line.push(' ');
        line.push_str(component);
    }
    line.push('\n');
    line
}

/// Phase 6: hostname, APT sources, kernel filesystems and the systemd base.
pub fn configure_system(ctx: &mut BuildContext) -> Result<()> {
    let chroot = ctx.chroot();
    let hostname = ctx.config.system.hostname.clone();
    chroot.write_file("etc/hostname", format!("{}\n", hostname), 0o644)?;
    chroot.write_file("etc/hosts", hosts_file(&hostname), 0o644)?;

    let sources = ctx.profile.sources_list(
        &ctx.config.mirror(),
        &ctx.release,
        ctx.config.repository.use_proposed,
    );
    chroot.write_file("etc/apt/sources.list", sources, 0o644)?;

    let mut steps = ctx.best_effort();
    for point in MountPoint::INTERNAL {
        steps.attempt(format!("mount /{}", point.target()), || {
            ctx.mounts.mount(&[point])
        });
    }

    let locale = ctx.config.system.locale.clone();
    let timezone = ctx.config.system.timezone.clone();
    steps.attempt("locale", || {
        chroot.write_file("etc/default/locale", format!("LANG={}\n", locale), 0o644)
    });
    steps.attempt("timezone", || {
        chroot.write_file("etc/timezone", format!("{}\n", timezone), 0o644)?;
        chroot.execute(&format!("ln -fs /usr/share/zoneinfo/{} /etc/localtime", timezone))
    });

    for repo in &ctx.config.repository.additional_repos {
        let mut signed = false;
        let key = repo.signing_key()?;
        if key != SigningKey::None {
            signed = steps.attempt(format!("signing key {}", repo.name), || {
                install_signing_key(ctx, &chroot, repo, &key)
            });
            if !signed {
                ctx.note(format!("skipping repository {} without its key", repo.name));
                continue;
            }
        }
        steps.attempt(format!("repository {}", repo.name), || {
            chroot.write_file(
                &format!("etc/apt/sources.list.d/{}.list", repo.name),
                repo_list_line(repo, signed),
                0o644,
            )
        });
    }
    ctx.reports.push(steps.finish());

    chroot.execute("apt-get update")?;
    chroot.execute("apt-get install -y libterm-readline-gnu-perl systemd-sysv")?;

    let machine_id = uuid::Uuid::new_v4().simple().to_string();
    chroot.write_file("etc/machine-id", format!("{}\n", machine_id), 0o444)?;
    chroot.execute("mkdir -p /var/lib/dbus && ln -fs /etc/machine-id /var/lib/dbus/machine-id")?;

    chroot.execute("dpkg-divert --local --rename --add /sbin/initctl")?;
    chroot.execute("ln -sf /bin/true /sbin/initctl")?;
    info!("base system configured for {}", hostname);
    Ok(())
}

/// Places the keyring for `repo` at `/etc/apt/keyrings/<name>.gpg`.
fn install_signing_key(
    ctx: &BuildContext,
    chroot: &ChrootSession,
    repo: &AdditionalRepo,
    key: &SigningKey,
) -> Result<()> {
    let keyring = chroot.path(&format!("{}/{}.gpg", KEYRING_DIR, repo.name));
    std::fs::create_dir_all(chroot.path(KEYRING_DIR))
        .with_context(|| format!("failed to create {}", KEYRING_DIR))?;
    let dearmor = |armored: String| -> Result<()> {
        let args = ["--batch", "--yes", "--dearmor", "-o", keyring.as_str()]
            .iter()
            .map(|s| s.to_string())
            .collect();
        ctx.executor
            .execute_checked(&CommandSpec::new("gpg", args).with_stdin(armored))?;
        Ok(())
    };

    match key {
        SigningKey::Url(url) if key.is_binary() => {
            ctx.run(
                "wget",
                vec!["-qO".to_string(), keyring.to_string(), url.to_string()],
            )?;
        }
        SigningKey::Url(url) => {
            let armored = ctx.capture("wget", vec!["-qO-".to_string(), url.to_string()])?;
            dearmor(armored)?;
        }
        SigningKey::Inline(text) => dearmor(text.clone())?,
        SigningKey::None => {}
    }
    Ok(())
}
