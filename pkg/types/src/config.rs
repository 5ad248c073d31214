use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Server configuration file (YAML).
///
/// Example `config.yaml`:
/// ```yaml
/// port: 9443
/// data-dir: /var/lib/elastiq/data
/// nvidia-gpu-resource-memory-gb: 40
/// resync-interval-secs: 30
/// log-format: json
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfigFile {
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default, alias = "data-dir")]
    pub data_dir: Option<String>,
    /// Use the in-memory backend instead of SlateDB.
    #[serde(default, alias = "in-memory")]
    pub in_memory: Option<bool>,
    #[serde(default, alias = "nvidia-gpu-resource-memory-gb")]
    pub nvidia_gpu_resource_memory_gb: Option<i64>,
    #[serde(default, alias = "scheduler-interval-secs")]
    pub scheduler_interval_secs: Option<u64>,
    #[serde(default, alias = "resync-interval-secs")]
    pub resync_interval_secs: Option<u64>,
    #[serde(default, alias = "node-report-interval-secs")]
    pub node_report_interval_secs: Option<u64>,
    #[serde(default, alias = "elastic-quota-controller-name")]
    pub elastic_quota_controller_name: Option<String>,
    #[serde(default, alias = "composite-elastic-quota-controller-name")]
    pub composite_elastic_quota_controller_name: Option<String>,
    #[serde(default, alias = "log-format")]
    pub log_format: Option<LogFormat>,
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(path: &str) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)?;
    Ok(config)
}

/// Check merged server settings before anything is started.
pub fn validate_server_settings(
    gpu_memory_gb: i64,
    scheduler_interval_secs: u64,
    resync_interval_secs: u64,
) -> anyhow::Result<()> {
    if gpu_memory_gb <= 0 {
        anyhow::bail!(
            "nvidia-gpu-resource-memory-gb must be positive (got {})",
            gpu_memory_gb
        );
    }
    if scheduler_interval_secs == 0 {
        anyhow::bail!("scheduler-interval-secs must be at least 1");
    }
    if resync_interval_secs == 0 {
        anyhow::bail!("resync-interval-secs must be at least 1");
    }
    Ok(())
}
