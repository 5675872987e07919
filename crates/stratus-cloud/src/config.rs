//! Configuration for the Stratus control-plane client

use serde::{Deserialize, Serialize};

/// Connection settings for one Stratus grid
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CloudConfig {
    /// Base URL of the control-plane API (e.g. "https://grid-1.stratus.example")
    pub api_url: String,
    /// Grid (partition) this driver operates in
    pub grid: String,
    /// Account owning the provisioned volumes
    pub account: String,
    /// API bearer token; refreshed in the background by the driver
    #[serde(skip_serializing)]
    pub token: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.stratus.example".to_string(),
            grid: "grid-1".to_string(),
            account: "default".to_string(),
            token: String::new(),
            timeout_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CloudConfig::default();
        assert_eq!(config.grid, "grid-1");
        assert_eq!(config.timeout_secs, 30);
    }
}
