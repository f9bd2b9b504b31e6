use crate::core::codec::PayloadCodec;
use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};
use tracing::debug;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub bearer_token: Option<String>,
    pub origin: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct CodecConfig {
    /// Base64-encoded key; 16, 24 or 32 bytes after decoding.
    pub key: Option<String>,
    pub iv_seed: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub provider: Option<ProviderConfig>,
    #[serde(default)]
    pub codec: CodecConfig,
    /// Optional bulk NAV history (wide CSV) loaded at startup.
    pub seed_file: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("in", "codito", "navlens")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    /// Applies environment overrides. Secrets in the environment always win
    /// over the config file.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(base_url) = get("NAVLENS_BASE_URL") {
            match &mut self.provider {
                Some(provider) => provider.base_url = base_url,
                None => {
                    self.provider = Some(ProviderConfig {
                        base_url,
                        api_key: None,
                        bearer_token: None,
                        origin: None,
                    })
                }
            }
        }
        if let Some(provider) = &mut self.provider {
            if let Some(api_key) = get("NAVLENS_API_KEY") {
                provider.api_key = Some(api_key);
            }
            if let Some(token) = get("NAVLENS_BEARER_TOKEN") {
                provider.bearer_token = Some(token);
            }
            if let Some(origin) = get("NAVLENS_ORIGIN") {
                provider.origin = Some(origin);
            }
        }
        if let Some(key) = get("NAVLENS_DECRYPT_KEY") {
            self.codec.key = Some(key);
        }
        if let Some(seed) = get("NAVLENS_DECRYPT_SEED") {
            self.codec.iv_seed = Some(seed);
        }
    }

    /// Builds the payload codec from the configured key material. Called
    /// only when a fetch is actually needed, so seed-only sessions run
    /// without any key configured.
    pub fn build_codec(&self) -> Result<PayloadCodec> {
        let key_b64 = self
            .codec
            .key
            .as_deref()
            .context("Decryption key is not configured; set codec.key or NAVLENS_DECRYPT_KEY")?;
        let key = STANDARD
            .decode(key_b64)
            .context("Configured decryption key is not valid base64")?;
        let iv_seed = self
            .codec
            .iv_seed
            .as_deref()
            .context("IV seed is not configured; set codec.iv_seed or NAVLENS_DECRYPT_SEED")?;

        PayloadCodec::new(&key, iv_seed.as_bytes()).context("Failed to build payload codec")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_deserialization() {
        let yaml_str = r#"
provider:
  base_url: "https://api.example.com"
  api_key: "k-123"
  origin: "https://dashboard.example.com"
codec:
  key: "MDEyMzQ1Njc4OWFiY2RlZg=="
  iv_seed: "fedcba9876543210"
seed_file: "nav_history.csv"
"#;

        let config: AppConfig = serde_yaml::from_str(yaml_str).expect("Failed to deserialize");
        let provider = config.provider.expect("provider section missing");
        assert_eq!(provider.base_url, "https://api.example.com");
        assert_eq!(provider.api_key.as_deref(), Some("k-123"));
        assert!(provider.bearer_token.is_none());
        assert_eq!(provider.origin.as_deref(), Some("https://dashboard.example.com"));
        assert_eq!(config.codec.key.as_deref(), Some("MDEyMzQ1Njc4OWFiY2RlZg=="));
        assert_eq!(config.codec.iv_seed.as_deref(), Some("fedcba9876543210"));
        assert_eq!(config.seed_file.as_deref(), Some("nav_history.csv"));
    }

    #[test]
    fn test_minimal_config_deserialization() {
        let config: AppConfig = serde_yaml::from_str("seed_file: \"data.csv\"").unwrap();
        assert!(config.provider.is_none());
        assert!(config.codec.key.is_none());
        assert!(config.codec.iv_seed.is_none());
    }

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let mut config: AppConfig = serde_yaml::from_str(
            r#"
provider:
  base_url: "https://file.example.com"
  api_key: "from-file"
codec:
  key: "file-key"
  iv_seed: "file-seed"
"#,
        )
        .unwrap();

        let vars = env(&[
            ("NAVLENS_BASE_URL", "https://env.example.com"),
            ("NAVLENS_API_KEY", "from-env"),
            ("NAVLENS_BEARER_TOKEN", "token-env"),
            ("NAVLENS_DECRYPT_KEY", "env-key"),
            ("NAVLENS_DECRYPT_SEED", "env-seed"),
        ]);
        config.apply_overrides_from(|key| vars.get(key).cloned());

        let provider = config.provider.unwrap();
        assert_eq!(provider.base_url, "https://env.example.com");
        assert_eq!(provider.api_key.as_deref(), Some("from-env"));
        assert_eq!(provider.bearer_token.as_deref(), Some("token-env"));
        assert_eq!(config.codec.key.as_deref(), Some("env-key"));
        assert_eq!(config.codec.iv_seed.as_deref(), Some("env-seed"));
    }

    #[test]
    fn env_base_url_creates_the_provider_section() {
        let mut config: AppConfig = serde_yaml::from_str("{}").unwrap();
        let vars = env(&[
            ("NAVLENS_BASE_URL", "https://env.example.com"),
            ("NAVLENS_ORIGIN", "https://origin.example.com"),
        ]);
        config.apply_overrides_from(|key| vars.get(key).cloned());

        let provider = config.provider.unwrap();
        assert_eq!(provider.base_url, "https://env.example.com");
        assert_eq!(provider.origin.as_deref(), Some("https://origin.example.com"));
    }

    #[test]
    fn missing_env_leaves_config_untouched() {
        let mut config: AppConfig = serde_yaml::from_str(
            r#"
provider:
  base_url: "https://file.example.com"
"#,
        )
        .unwrap();
        config.apply_overrides_from(|_| None);

        assert_eq!(config.provider.unwrap().base_url, "https://file.example.com");
    }

    #[test]
    fn build_codec_requires_key_material() {
        let config: AppConfig = serde_yaml::from_str("{}").unwrap();
        let err = config.build_codec().unwrap_err();
        assert!(err.to_string().contains("Decryption key is not configured"));
    }

    #[test]
    fn build_codec_rejects_invalid_base64_key() {
        let config: AppConfig = serde_yaml::from_str(
            r#"
codec:
  key: "not base64!!!"
  iv_seed: "seed"
"#,
        )
        .unwrap();
        let err = config.build_codec().unwrap_err();
        assert!(err.to_string().contains("not valid base64"));
    }

    #[test]
    fn build_codec_succeeds_with_valid_material() {
        let key = STANDARD.encode(b"0123456789abcdef");
        let yaml = format!("codec:\n  key: \"{key}\"\n  iv_seed: \"0123456789abcdef\"\n");
        let config: AppConfig = serde_yaml::from_str(&yaml).unwrap();
        assert!(config.build_codec().is_ok());
    }
}
