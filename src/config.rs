use crate::engine::config::EngineConfig;
use crate::error::{BrokerSimError, Result};

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct SimConfig {
    pub engine: EngineConfig,
}

/// Loads configuration from a TOML file, with `BROKERSIM__SECTION__KEY` environment overrides.
pub fn config<P: AsRef<std::path::Path>>(config_path: P) -> Result<SimConfig> {
    let path = config_path.as_ref();
    let error = |error_msg: String| BrokerSimError::ConfigError {
        file_path: path.display().to_string(),
        error_msg,
    };

    let settings = config::Config::builder()
        .add_source(config::File::from(path))
        .add_source(config::Environment::with_prefix("BROKERSIM").separator("__"))
        .build()
        .map_err(|e| error(e.to_string()))?;

    let config: SimConfig = settings
        .try_deserialize()
        .map_err(|e| error(e.to_string()))?;
    config.engine.validate().map_err(|e| error(e.to_string()))?;
    Ok(config)
}
