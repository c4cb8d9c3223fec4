//! Virsh Control Plane Adapter
//!
//! Drives libvirt through the `virsh` client. Documents are rendered to XML
//! and fed on stdin; lookups map virsh's "failed to get ..." errors to absent
//! resources.

use crate::config::ConnectionConfig;
use crate::controlplane::render;
use crate::domain::ports::{
    ControlPlane, DomainHandle, DomainSpec, PoolDefinition, PoolHandle, VolumeDefinition,
    VolumeHandle,
};
use crate::error::{Error, Result};
use backoff::ExponentialBackoff;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Output of one virsh invocation
#[derive(Debug)]
struct VirshOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

/// Adapter for a libvirt daemon reached through virsh
#[derive(Debug)]
pub struct VirshControlPlane {
    uri: String,
    binary: String,
}

impl VirshControlPlane {
    /// Open a connection, retrying with exponential backoff
    pub fn connect(config: &ConnectionConfig) -> Result<Self> {
        let plane = Self {
            uri: config.uri.clone(),
            binary: config.virsh_binary.clone(),
        };

        let attempts = config.connect_retries.max(1);
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(250),
            max_interval: Duration::from_secs(2),
            max_elapsed_time: Some(Duration::from_secs(10)),
            ..Default::default()
        };

        let mut attempt = 0u32;
        let probe = || {
            attempt += 1;
            match plane.probe() {
                Ok(version) => Ok(version),
                Err(e) if attempt < attempts => {
                    warn!("Connection attempt {} to {} failed: {}", attempt, plane.uri, e);
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        };

        match backoff::retry(policy, probe) {
            Ok(version) => {
                info!("Connected to {} ({})", plane.uri, version.trim());
                Ok(plane)
            }
            Err(backoff::Error::Permanent(e)) | Err(backoff::Error::Transient { err: e, .. }) => {
                Err(Error::ControlPlaneConnection {
                    uri: config.uri.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Ask the daemon for its version
    fn probe(&self) -> Result<String> {
        let output = self.run(&["version", "--daemon"], None)?;
        if output.success {
            Ok(output.stdout)
        } else {
            Err(Error::control_plane("version", &self.uri, output.stderr.trim()))
        }
    }

    fn run(&self, args: &[&str], stdin: Option<&str>) -> Result<VirshOutput> {
        debug!("virsh -c {} {}", self.uri, args.join(" "));

        let mut command = Command::new(&self.binary);
        command
            .arg("-c")
            .arg(&self.uri)
            .args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| {
            Error::control_plane(args.first().copied().unwrap_or("virsh"), &self.binary, e)
        })?;

        let written = match (stdin, child.stdin.take()) {
            (Some(document), Some(mut pipe)) => pipe.write_all(document.as_bytes()),
            _ => Ok(()),
        };

        // the pipe is closed here; reap the child before reporting a write error
        let output = child.wait_with_output()?;
        written?;
        Ok(VirshOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run a command that must succeed
    fn exec(&self, operation: &str, target: &str, args: &[&str], stdin: Option<&str>) -> Result<String> {
        let output = self.run(args, stdin)?;
        if output.success {
            Ok(output.stdout)
        } else {
            Err(Error::control_plane(operation, target, output.stderr.trim()))
        }
    }

    /// Run a lookup; "failed to get" means absent
    fn probe_resource(&self, operation: &str, target: &str, args: &[&str]) -> Result<Option<String>> {
        let output = self.run(args, None)?;
        if output.success {
            Ok(Some(output.stdout))
        } else if is_not_found(&output.stderr) {
            Ok(None)
        } else {
            Err(Error::control_plane(operation, target, output.stderr.trim()))
        }
    }
}

/// Whether virsh stderr reports a missing resource
pub fn is_not_found(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.contains("failed to get")
        || stderr.contains("not found")
        || stderr.contains("no storage pool with matching name")
        || stderr.contains("no storage vol with matching")
        || stderr.contains("no domain with matching name")
}

/// Volume names from `virsh vol-list` table output
pub fn parse_volume_list(output: &str) -> Vec<String> {
    output
        .lines()
        .skip_while(|line| !line.trim_start().starts_with('-'))
        .skip(1)
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// Domain state from `virsh domstate` output
pub fn parse_domain_active(output: &str) -> bool {
    matches!(
        output.trim().to_lowercase().as_str(),
        "running" | "paused" | "in shutdown" | "idle" | "pmsuspended" | "blocked"
    )
}

impl ControlPlane for VirshControlPlane {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn close(&self) -> Result<()> {
        // every virsh invocation opens and closes its own connection
        debug!("Closing connection to {}", self.uri);
        Ok(())
    }

    fn define_pool(&self, definition: &PoolDefinition) -> Result<PoolHandle> {
        let xml = render::pool_xml(definition);
        self.exec("pool-define", &definition.name, &["pool-define", "/dev/stdin"], Some(&xml))?;
        Ok(PoolHandle {
            name: definition.name.clone(),
        })
    }

    fn build_pool(&self, pool: &PoolHandle) -> Result<()> {
        self.exec("pool-build", pool.name.as_str(), &["pool-build", pool.name.as_str()], None)
            .map(|_| ())
    }

    fn activate_pool(&self, pool: &PoolHandle) -> Result<()> {
        self.exec("pool-start", pool.name.as_str(), &["pool-start", pool.name.as_str()], None)
            .map(|_| ())
    }

    fn set_pool_autostart(&self, pool: &PoolHandle, autostart: bool) -> Result<()> {
        let mut args = vec!["pool-autostart", pool.name.as_str()];
        if !autostart {
            args.push("--disable");
        }
        self.exec("pool-autostart", pool.name.as_str(), &args, None).map(|_| ())
    }

    fn lookup_pool(&self, name: &str) -> Result<Option<PoolHandle>> {
        Ok(self
            .probe_resource("pool-info", name, &["pool-info", name])?
            .map(|_| PoolHandle {
                name: name.to_string(),
            }))
    }

    fn list_volume_names(&self, pool: &PoolHandle) -> Result<Vec<String>> {
        let output = self.exec("vol-list", pool.name.as_str(), &["vol-list", "--pool", pool.name.as_str()], None)?;
        Ok(parse_volume_list(&output))
    }

    fn refresh_pool(&self, pool: &PoolHandle) -> Result<()> {
        self.exec("pool-refresh", pool.name.as_str(), &["pool-refresh", pool.name.as_str()], None)
            .map(|_| ())
    }

    fn destroy_pool(&self, pool: &PoolHandle) -> Result<()> {
        self.exec("pool-destroy", pool.name.as_str(), &["pool-destroy", pool.name.as_str()], None)
            .map(|_| ())
    }

    fn undefine_pool(&self, pool: &PoolHandle) -> Result<()> {
        self.exec("pool-undefine", pool.name.as_str(), &["pool-undefine", pool.name.as_str()], None)
            .map(|_| ())
    }

    fn create_volume(
        &self,
        pool: &PoolHandle,
        definition: &VolumeDefinition,
    ) -> Result<VolumeHandle> {
        let xml = render::volume_xml(definition);
        self.exec(
            "vol-create",
            &definition.name,
            &["vol-create", pool.name.as_str(), "/dev/stdin"],
            Some(&xml),
        )?;
        Ok(VolumeHandle {
            pool: pool.name.clone(),
            name: definition.name.clone(),
            path: definition.path.clone(),
        })
    }

    fn lookup_volume(&self, pool: &PoolHandle, name: &str) -> Result<Option<VolumeHandle>> {
        let path = self.probe_resource("vol-path", name, &["vol-path", "--pool", pool.name.as_str(), name])?;
        Ok(path.map(|path| VolumeHandle {
            pool: pool.name.clone(),
            name: name.to_string(),
            path: PathBuf::from(path.trim()),
        }))
    }

    fn delete_volume(&self, volume: &VolumeHandle) -> Result<()> {
        self.exec(
            "vol-delete",
            &volume.name,
            &["vol-delete", "--pool", volume.pool.as_str(), volume.name.as_str()],
            None,
        )
        .map(|_| ())
    }

    fn define_domain(&self, spec: &DomainSpec) -> Result<DomainHandle> {
        let xml = render::domain_xml(spec);
        self.exec("define", &spec.name, &["define", "/dev/stdin"], Some(&xml))?;
        Ok(DomainHandle {
            name: spec.name.clone(),
        })
    }

    fn lookup_domain(&self, name: &str) -> Result<Option<DomainHandle>> {
        Ok(self
            .probe_resource("dominfo", name, &["dominfo", name])?
            .map(|_| DomainHandle {
                name: name.to_string(),
            }))
    }

    fn is_domain_active(&self, domain: &DomainHandle) -> Result<bool> {
        let output = self.exec("domstate", domain.name.as_str(), &["domstate", domain.name.as_str()], None)?;
        Ok(parse_domain_active(&output))
    }

    fn stop_domain(&self, domain: &DomainHandle) -> Result<()> {
        self.exec("destroy", domain.name.as_str(), &["destroy", domain.name.as_str()], None)
            .map(|_| ())
    }

    fn undefine_domain(&self, domain: &DomainHandle) -> Result<()> {
        self.exec("undefine", domain.name.as_str(), &["undefine", domain.name.as_str()], None)
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_volume_list() {
        let output = " Name                  Path\n\
                      ------------------------------------------------------------\n\
                      \x20maas-node-01-d1.img   /storage/images/maas/maas-node-01/maas-node-01-d1.img\n\
                      \x20maas-node-01-d2.img   /storage/images/maas/maas-node-01/maas-node-01-d2.img\n\
                      \n";
        assert_eq!(
            parse_volume_list(output),
            vec!["maas-node-01-d1.img", "maas-node-01-d2.img"]
        );
        assert!(parse_volume_list(" Name   Path\n----------\n\n").is_empty());
    }

    #[test]
    fn test_not_found_detection() {
        assert!(is_not_found(
            "error: failed to get pool 'maas-node-01'\nerror: Storage pool not found: no storage pool with matching name 'maas-node-01'"
        ));
        assert!(is_not_found("error: failed to get domain 'maas-node-01'"));
        assert!(!is_not_found("error: authentication failed"));
    }

    #[test]
    fn test_domain_state_parsing() {
        assert!(parse_domain_active("running\n\n"));
        assert!(parse_domain_active("paused"));
        assert!(!parse_domain_active("shut off\n"));
        assert!(!parse_domain_active("crashed"));
    }

    #[test]
    fn test_document_is_fed_on_stdin() {
        // `sh -c cat ...` echoes whatever arrives on stdin
        let plane = VirshControlPlane {
            uri: "cat".into(),
            binary: "sh".into(),
        };
        let output = plane.run(&["pool-define"], Some("<pool type='dir'/>")).unwrap();
        assert!(output.success);
        assert_eq!(output.stdout, "<pool type='dir'/>");
    }

    #[test]
    fn test_unread_document_is_io_error() {
        let plane = VirshControlPlane {
            uri: "exit 0".into(),
            binary: "sh".into(),
        };
        let document = "x".repeat(4 * 1024 * 1024);
        assert_matches!(plane.run(&["define"], Some(&document)), Err(Error::Io(_)));
    }

    #[test]
    fn test_missing_binary_is_connection_error() {
        let config = ConnectionConfig {
            virsh_binary: "/nonexistent/virsh-binary".into(),
            connect_retries: 1,
            ..Default::default()
        };
        assert_matches!(
            VirshControlPlane::connect(&config),
            Err(Error::ControlPlaneConnection { .. })
        );
    }
}
