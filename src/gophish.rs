use std::path::Path;

use crate::config::RunSettings;
use crate::docker::{Bind, ContainerSpec, PortMap};
use crate::lego::CONTAINER_CERT_DIR;

const CONTAINER_ASSETS_DIR: &str = "/opt/gophish/assets";
const ADMIN_LISTEN_URL: &str = "0.0.0.0:3333";
const RESTART_RETRIES: i64 = 5;

/// Container port -> host port. The phishing listeners keep 80/443, the
/// alternates move to 90xx so they don't clash with a host web server.
pub const PORTS: [PortMap; 5] = [
    PortMap {
        container: 80,
        host: 80,
    },
    PortMap {
        container: 443,
        host: 443,
    },
    PortMap {
        container: 8080,
        host: 9080,
    },
    PortMap {
        container: 8443,
        host: 9443,
    },
    PortMap {
        container: 3333,
        host: 3333,
    },
];

pub fn environment(domain: &str, email: &str) -> Vec<(String, String)> {
    let cert_path = format!("{}/certificates/{}.crt", CONTAINER_CERT_DIR, domain);
    let key_path = format!("{}/certificates/{}.key", CONTAINER_CERT_DIR, domain);
    let db_path = format!("{}/gophish.db", CONTAINER_ASSETS_DIR);

    [
        ("ADMIN_LISTEN_URL", ADMIN_LISTEN_URL),
        ("ADMIN_USE_TLS", "true"),
        ("ADMIN_CERT_PATH", cert_path.as_str()),
        ("ADMIN_KEY_PATH", key_path.as_str()),
        ("ADMIN_TRUSTED_ORIGINS", ""),
        ("PHISH_LISTEN_URL", ""),
        ("PHISH_USE_TLS", "true"),
        ("PHISH_CERT_PATH", cert_path.as_str()),
        ("PHISH_KEY_PATH", key_path.as_str()),
        ("CONTACT_ADDRESS", email),
        ("DB_FILE_PATH", db_path.as_str()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Both directories must already be absolute.
pub fn container_spec(settings: &RunSettings, cert_dir: &Path, assets_dir: &Path) -> ContainerSpec {
    ContainerSpec {
        image: settings.tag.clone(),
        cmd: Vec::new(),
        env: environment(&settings.domain, &settings.email),
        binds: vec![
            Bind::new(cert_dir, CONTAINER_CERT_DIR),
            Bind::new(assets_dir, CONTAINER_ASSETS_DIR),
        ],
        ports: PORTS.to_vec(),
        restart_on_failure: Some(RESTART_RETRIES),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn settings() -> RunSettings {
        RunSettings {
            domain: "phish.example.com".to_string(),
            email: "admin@example.com".to_string(),
            tag: "alice/gophish-app".to_string(),
            cert_dir: PathBuf::from("certificates"),
            assets_dir: PathBuf::from("assets"),
        }
    }

    #[test]
    fn test_environment() {
        let env: HashMap<String, String> = environment("x.org", "ops@x.org").into_iter().collect();
        assert_eq!(env.len(), 11);
        assert_eq!(env["ADMIN_LISTEN_URL"], "0.0.0.0:3333");
        assert_eq!(env["ADMIN_CERT_PATH"], "/certificates/certificates/x.org.crt");
        assert_eq!(env["PHISH_KEY_PATH"], "/certificates/certificates/x.org.key");
        assert_eq!(env["ADMIN_TRUSTED_ORIGINS"], "");
        assert_eq!(env["PHISH_LISTEN_URL"], "");
        assert_eq!(env["CONTACT_ADDRESS"], "ops@x.org");
        assert_eq!(env["DB_FILE_PATH"], "/opt/gophish/assets/gophish.db");
    }

    #[test]
    fn test_container_spec() {
        let spec = container_spec(
            &settings(),
            Path::new("/lab/certificates"),
            Path::new("/lab/assets"),
        );
        assert_eq!(spec.image, "alice/gophish-app");
        assert!(spec.cmd.is_empty());
        assert_eq!(spec.restart_on_failure, Some(5));
        assert_eq!(
            spec.binds,
            vec![
                Bind::new("/lab/certificates", "/certificates"),
                Bind::new("/lab/assets", "/opt/gophish/assets"),
            ]
        );
        assert!(spec.ports.contains(&PortMap {
            container: 8443,
            host: 9443
        }));
    }

    #[test]
    fn test_config_publishes_remapped_ports() {
        let config = container_spec(&settings(), Path::new("/c"), Path::new("/a")).to_config();
        let bindings = config.host_config.unwrap().port_bindings.unwrap();
        assert_eq!(bindings.len(), 5);
        let alt = bindings["8080/tcp"].as_ref().unwrap();
        assert_eq!(alt[0].host_port.as_deref(), Some("9080"));
        assert!(config.env.unwrap().contains(&"ADMIN_USE_TLS=true".to_string()));
    }
}
