use std::path::Path;

use colored::Colorize;
use serde::Serialize;

use crate::docker::{PortMap, PruneSummary, short_id};

pub struct Output {
    json: bool,
}

/// What `clean` did, step by step. Skipped steps stay `None`.
#[derive(Debug, Default, Serialize)]
pub struct CleanReport {
    pub containers: Option<PruneSummary>,
    pub images: Option<PruneSummary>,
    pub build_cache_pruned: bool,
    /// As reported by the docker CLI, e.g. "1.2GB"
    pub build_cache_reclaimed: Option<String>,
    pub removed_folders: Vec<String>,
}

impl Output {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn info(&self, msg: &str) {
        if !self.json {
            println!("{} {}", "[*]".blue(), msg);
        }
    }

    pub fn success(&self, msg: &str) {
        if !self.json {
            println!("{} {}", "[+]".green(), msg);
        }
    }

    pub fn warning(&self, msg: &str) {
        if !self.json {
            println!("{} {}", "[!]".yellow(), msg);
        }
    }

    pub fn error(&self, msg: &str) {
        if self.json {
            self.json(&serde_json::json!({ "status": "error", "error": msg }));
        } else {
            eprintln!("{} {}", "[-]".red(), msg);
        }
    }

    pub fn debug(&self, msg: &str) {
        if !self.json && tracing::enabled!(tracing::Level::DEBUG) {
            println!("{} {}", "[D]".dimmed(), msg.dimmed());
        }
    }

    pub fn json<T: Serialize>(&self, data: &T) {
        if self.json
            && let Ok(json) = serde_json::to_string_pretty(data)
        {
            println!("{}", json);
        }
    }

    pub fn cleaned(&self, report: &CleanReport) {
        if self.json {
            #[derive(Serialize)]
            struct CleanResult<'a> {
                status: &'static str,
                #[serde(flatten)]
                report: &'a CleanReport,
            }
            self.json(&CleanResult {
                status: "cleaned",
                report,
            });
        } else {
            let reclaimed = report
                .containers
                .iter()
                .chain(report.images.iter())
                .map(|s| s.space_reclaimed)
                .sum::<u64>();
            if reclaimed > 0 {
                println!("    Reclaimed: {}", human_bytes(reclaimed).cyan());
            }
            self.success("Done cleaning environment.");
        }
    }

    pub fn certificates_generated(&self, domain: &str, cert: &Path, key: &Path) {
        if self.json {
            #[derive(Serialize)]
            struct CertResult<'a> {
                status: &'static str,
                domain: &'a str,
                certificate: &'a Path,
                key: &'a Path,
            }
            self.json(&CertResult {
                status: "issued",
                domain,
                certificate: cert,
                key,
            });
        } else {
            self.success(&format!("Certificates generated for {}", domain.bold()));
            println!("    Certificate: {}", cert.display().to_string().cyan());
            println!("    Key:         {}", key.display().to_string().cyan());
        }
    }

    pub fn image_built(&self, tag: &str) {
        if self.json {
            self.json(&serde_json::json!({
                "status": "built",
                "image": tag
            }));
        }
    }

    pub fn container_started(&self, container_id: &str, image: &str, domain: &str, ports: &[PortMap]) {
        if self.json {
            #[derive(Serialize)]
            struct RunResult<'a> {
                status: &'static str,
                container_id: &'a str,
                image: &'a str,
                domain: &'a str,
                ports: &'a [PortMap],
            }
            self.json(&RunResult {
                status: "running",
                container_id,
                image,
                domain,
                ports,
            });
        } else {
            self.success(&format!(
                "Started gophish container {}",
                short_id(container_id).bold()
            ));
            println!();
            println!(
                "  {} {}",
                "->".green(),
                format!("https://{}:3333", domain).cyan()
            );
            println!(
                "  {} {}",
                "->".green(),
                format!("https://{}", domain).cyan()
            );
            println!();
        }
    }
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_bytes() {
        assert_eq!(human_bytes(0), "0 B");
        assert_eq!(human_bytes(999), "999 B");
        assert_eq!(human_bytes(1_500_000), "1.5 MB");
        assert_eq!(human_bytes(2_000_000_000), "2.0 GB");
    }

    #[test]
    fn test_clean_report_serializes_skipped_steps() {
        let report = CleanReport {
            containers: Some(PruneSummary {
                removed: 2,
                space_reclaimed: 10,
            }),
            removed_folders: vec!["certificates".to_string()],
            ..Default::default()
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["containers"]["removed"], 2);
        assert!(value["images"].is_null());
        assert_eq!(value["removed_folders"][0], "certificates");
    }
}
