use serde::{Deserialize, Serialize};

/// Issuer stamped on every offline token.
pub const TOKEN_ISSUER: &str = "keyhold";

/// Custom claims carried by an offline token.
/// `sub` (the license key), `iss` and `exp` are handled by jwt-simple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineClaims {
    pub valid: bool,
    #[serde(default)]
    pub features: Vec<String>,
}

impl OfflineClaims {
    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }
}
