//! Host facts published as global variables.

use reconcile::GlobalVariable;
use std::path::Path;

const PROC_HOSTNAME: &str = "/proc/sys/kernel/hostname";

/// Gather every global variable. Facts that cannot be read are defined
/// as empty strings.
pub async fn gather(lsb_release: &str) -> Vec<GlobalVariable> {
    let hostname = hostname(Path::new(PROC_HOSTNAME));
    let codename = lsb_field(lsb_release, "--codename").await;
    let distribution = lsb_field(lsb_release, "--id").await;
    vec![
        GlobalVariable::new("hostname", "Name of the computer", hostname),
        GlobalVariable::new("oscodename", "OS codename", codename),
        GlobalVariable::new("osdistribution", "OS distribution", distribution),
    ]
}

/// Kernel hostname, falling back to `$HOSTNAME`
fn hostname(proc_path: &Path) -> String {
    match std::fs::read_to_string(proc_path) {
        Ok(name) if !name.trim().is_empty() => name.trim().to_string(),
        _ => std::env::var("HOSTNAME").unwrap_or_else(|_| {
            log::warn!("Could not determine the hostname");
            String::new()
        }),
    }
}

async fn lsb_field(program: &str, flag: &str) -> String {
    let output = tokio::process::Command::new(program)
        .args([flag, "--short"])
        .output()
        .await;
    match output {
        Ok(output) if output.status.success() => {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        }
        Ok(output) => {
            log::warn!("{program} {flag} exited with {}", output.status);
            String::new()
        }
        Err(err) => {
            log::warn!("Could not run {program}: {err}");
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_hostname_from_proc() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hostname");
        std::fs::write(&path, "box\n").unwrap();
        assert_eq!(hostname(&path), "box");
    }

    #[tokio::test]
    async fn test_gather_with_fake_lsb_release() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("lsb_release");
        std::fs::write(
            &script,
            "#!/bin/sh\ncase \"$1\" in --codename) echo jammy;; --id) echo Ubuntu;; esac\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let globals = gather(&script.display().to_string()).await;
        let names: Vec<&str> = globals.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["hostname", "oscodename", "osdistribution"]);
        assert_eq!(globals[1].value, "jammy");
        assert_eq!(globals[2].value, "Ubuntu");
        assert_eq!(globals[2].description, "OS distribution");
    }

    #[tokio::test]
    async fn test_missing_tool_gives_empty_fact() {
        assert_eq!(lsb_field("/nonexistent/lsb_release", "--id").await, "");
    }
}
