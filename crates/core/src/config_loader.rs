use crate::config::AppConfig;
use anyhow::{bail, Result};
use figment::{
    providers::{Env, Format, Json, Toml},
    Figment,
};
use std::path::Path;

/// Prefix shared by every environment setting, e.g. `KIWOOM_APP_KEY` or
/// `KIWOOM_RISK__MAX_ORDERS_PER_DAY`.
pub const ENV_PREFIX: &str = "KIWOOM_";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration from `config/Config.toml` (with `config/Config.json` filling gaps)
    /// overlaid with `KIWOOM_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the sources cannot be parsed or a required credential is missing.
    pub fn load() -> Result<AppConfig> {
        Self::load_from("config/Config.toml")
    }

    /// Same as [`ConfigLoader::load`] with an explicit TOML path. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the sources cannot be parsed or a required credential is missing.
    pub fn load_from(path: impl AsRef<Path>) -> Result<AppConfig> {
        let config = Self::figment(path.as_ref()).extract::<AppConfig>()?;
        Self::validate(&config)?;

        tracing::info!(
            mode = %config.effective_mode(),
            base_url = %config.effective_base_url(),
            trading_only = config.approval.trading_only,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Loads configuration with a profile file layered over the base file.
    ///
    /// # Errors
    ///
    /// Returns an error if the sources cannot be parsed or a required credential is missing.
    pub fn load_with_profile(profile: &str) -> Result<AppConfig> {
        let config: AppConfig = Figment::new()
            .merge(Toml::file("config/Config.toml"))
            .merge(Toml::file(format!("config/Config.{profile}.toml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Self::validate(&config)?;
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .join(Json::file(path.with_extension("json")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    fn validate(config: &AppConfig) -> Result<()> {
        let missing = config.missing_credentials();
        if !missing.is_empty() {
            bail!(
                "missing required configuration: {} must be set",
                missing.join(", ")
            );
        }
        if config.http.max_retries == 0 {
            bail!("http.max_retries must be at least 1");
        }
        if config.http.requests_per_second == 0 {
            bail!("http.requests_per_second must be at least 1");
        }
        Ok(())
    }
}
