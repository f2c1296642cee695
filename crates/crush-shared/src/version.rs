use serde::{Deserialize, Serialize};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub commit: String,
    pub runtime: String,
    pub platform: String,
}

impl VersionInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION.to_string(),
            commit: option_env!("CRUSH_COMMIT").unwrap_or("unknown").to_string(),
            runtime: format!("rust {}", option_env!("CRUSH_RUSTC").unwrap_or("stable")),
            platform: format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH),
        }
    }
}
