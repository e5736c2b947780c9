use std::path::{Path, PathBuf};

use crate::config::CertSettings;
use crate::docker::{Bind, Completed, ContainerSpec, PortMap};
use crate::error::{JgpError, Result};

/// Where the certificate directory is mounted inside both containers
pub const CONTAINER_CERT_DIR: &str = "/certificates";

/// lego answers the HTTP-01 and TLS-ALPN-01 challenges itself
const CHALLENGE_PORTS: [u16; 2] = [80, 443];

/// lego prints the ACME error last
const FAILURE_LOG_LINES: usize = 10;

pub fn command(email: &str, domain: &str) -> Vec<String> {
    vec![
        format!("--email={}", email),
        format!("--domains={}", domain),
        format!("--path={}", CONTAINER_CERT_DIR),
        "--accept-tos".to_string(),
        "--http".to_string(),
        "--tls".to_string(),
        "run".to_string(),
    ]
}

/// `cert_dir` must already be absolute; the daemon resolves binds on its side.
pub fn container_spec(settings: &CertSettings, cert_dir: &Path) -> ContainerSpec {
    ContainerSpec {
        image: settings.lego_image.clone(),
        cmd: command(&settings.email, &settings.domain),
        binds: vec![Bind::new(cert_dir, CONTAINER_CERT_DIR)],
        ports: CHALLENGE_PORTS
            .iter()
            .map(|&port| PortMap {
                container: port,
                host: port,
            })
            .collect(),
        ..Default::default()
    }
}

/// Host paths of the certificate and key lego writes for `domain`
pub fn certificate_files(cert_dir: &Path, domain: &str) -> (PathBuf, PathBuf) {
    let dir = cert_dir.join("certificates");
    (
        dir.join(format!("{}.crt", domain)),
        dir.join(format!("{}.key", domain)),
    )
}

/// Turn a non-zero lego exit into an error carrying the end of its output
pub fn check_exit(completed: Completed) -> Result<()> {
    if completed.exit_code == 0 {
        return Ok(());
    }

    let mut logs = completed.logs;
    let skip = logs.len().saturating_sub(FAILURE_LOG_LINES);
    logs.drain(..skip);

    Err(JgpError::LegoFailed {
        code: completed.exit_code,
        logs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> CertSettings {
        CertSettings {
            domain: "phish.example.com".to_string(),
            email: "admin@example.com".to_string(),
            lego_image: "goacme/lego:latest".to_string(),
            cert_dir: PathBuf::from("certificates"),
        }
    }

    #[test]
    fn test_command() {
        assert_eq!(
            command("a@b.org", "b.org"),
            vec![
                "--email=a@b.org",
                "--domains=b.org",
                "--path=/certificates",
                "--accept-tos",
                "--http",
                "--tls",
                "run",
            ]
        );
    }

    #[test]
    fn test_container_spec() {
        let spec = container_spec(&settings(), Path::new("/work/certificates"));
        assert_eq!(spec.image, "goacme/lego:latest");
        assert_eq!(
            spec.binds,
            vec![Bind::new("/work/certificates", "/certificates")]
        );
        assert_eq!(
            spec.ports,
            vec![
                PortMap {
                    container: 80,
                    host: 80
                },
                PortMap {
                    container: 443,
                    host: 443
                },
            ]
        );
        assert!(spec.env.is_empty());
        assert_eq!(spec.restart_on_failure, None);
        assert!(spec.cmd.contains(&"--domains=phish.example.com".to_string()));
    }

    #[test]
    fn test_check_exit_success() {
        let completed = Completed {
            exit_code: 0,
            logs: vec!["Server responded with a certificate.".to_string()],
        };
        assert!(check_exit(completed).is_ok());
    }

    #[test]
    fn test_check_exit_keeps_last_log_lines() {
        let mut logs: Vec<String> = (0..15).map(|i| format!("line {}", i)).collect();
        logs.push("acme: error: 403 :: urn:ietf:params:acme:error:unauthorized".to_string());
        let completed = Completed { exit_code: 1, logs };

        let err = check_exit(completed).unwrap_err();
        let JgpError::LegoFailed { code, ref logs } = err else {
            panic!("expected LegoFailed, got {err:?}");
        };
        assert_eq!(code, 1);
        assert_eq!(logs.len(), 10);
        assert_eq!(logs[0], "line 6");

        let message = err.to_string();
        assert!(message.starts_with("lego exited with status 1:\n"));
        assert!(message.ends_with("error:unauthorized"));
        assert!(!message.contains("line 5\n"));
    }

    #[test]
    fn test_check_exit_without_logs() {
        let completed = Completed {
            exit_code: 2,
            logs: Vec::new(),
        };
        assert_eq!(
            check_exit(completed).unwrap_err().to_string(),
            "lego exited with status 2"
        );
    }

    #[test]
    fn test_certificate_files() {
        let (crt, key) = certificate_files(Path::new("certs"), "x.org");
        assert_eq!(crt, PathBuf::from("certs/certificates/x.org.crt"));
        assert_eq!(key, PathBuf::from("certs/certificates/x.org.key"));
    }
}
