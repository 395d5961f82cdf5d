//! Per-tenant upstream api configuration.
//!
//! Each tenant may store its own api key (encrypted at rest) and base URL
//! in `config/api.yaml`. Resolution order: tenant values, then the global
//! environment fallbacks. A tenant key that fails to decrypt is a hard
//! error with an actionable message — it is never silently replaced by the
//! global key.

use serde::{Deserialize, Serialize};

use concord_domain::secret::SecretCipher;
use concord_domain::{Error, Result, Settings};

use crate::layout::ConfigStore;

/// On-disk shape of `config/api.yaml`. `api_key` is sealed by the secret
/// cipher; the core only decrypts it at call time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantApiConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Resolved credentials for upstream calls.
#[derive(Debug, Clone)]
pub struct ResolvedApi {
    pub api_key: String,
    pub base_url: String,
}

impl ConfigStore {
    fn read_api_config(&self, org_id: &str) -> Result<TenantApiConfig> {
        let path = self.org_api_config_file(org_id)?;
        if !path.exists() {
            return Ok(TenantApiConfig::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    /// Resolve the api key and base URL for a tenant's upstream calls.
    pub fn resolve_api(
        &self,
        org_id: &str,
        cipher: &SecretCipher,
        settings: &Settings,
    ) -> Result<ResolvedApi> {
        let config = self.read_api_config(org_id)?;

        let api_key = match config.api_key.filter(|k| !k.is_empty()) {
            Some(sealed) => cipher.decrypt(&sealed).map_err(|_| {
                Error::Config(
                    "failed to decrypt organization API key; re-save it in organization settings"
                        .into(),
                )
            })?,
            None => settings.llm_api_key.clone().ok_or_else(|| {
                Error::Config(
                    "LLM API key not configured: set one in organization settings or via \
                     LLM_API_KEY"
                        .into(),
                )
            })?,
        };

        let base_url = config
            .base_url
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| settings.llm_api_url.clone());

        Ok(ResolvedApi { api_key, base_url })
    }

    /// Store a tenant's api configuration, sealing the key.
    pub fn save_api_config(
        &self,
        org_id: &str,
        cipher: &SecretCipher,
        plaintext_key: Option<&str>,
        base_url: Option<&str>,
    ) -> Result<()> {
        let sealed = match plaintext_key.filter(|k| !k.is_empty()) {
            Some(key) => Some(cipher.encrypt(key)?),
            None => None,
        };
        let config = TenantApiConfig {
            api_key: sealed,
            base_url: base_url.filter(|u| !u.is_empty()).map(str::to_owned),
        };

        let path = self.org_api_config_file(org_id)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_yaml::to_string(&config)?)?;
        Ok(())
    }
}
