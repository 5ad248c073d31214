//! Filesystem path and process defaults.

/// Default config file path for the server.
pub const DEFAULT_SERVER_CONFIG: &str = "/etc/elastiq/config.yaml";

/// Default data directory for the server state store.
pub const DEFAULT_SERVER_DATA_DIR: &str = "/tmp/elastiq-data";

/// Default API / admission port.
pub const DEFAULT_SERVER_PORT: u16 = 9443;

/// Default resync interval for the quota reconcilers.
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 30;

/// Default refresh interval for node-scope reporters.
pub const DEFAULT_NODE_REPORT_INTERVAL_SECS: u64 = 10;

pub const DEFAULT_ELASTIC_QUOTA_CONTROLLER: &str = "elasticquota-controller";
pub const DEFAULT_COMPOSITE_ELASTIC_QUOTA_CONTROLLER: &str = "compositeelasticquota-controller";
