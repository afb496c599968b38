use std::{fs, path::Path};

use txwatch_config::Config;

use crate::{
    args::{Args, ConfigOverride, EnvArgs},
    errors::{ConfigError, InitError},
};

/// Builds the config from the optional file, then applies env overrides and
/// finally arg overrides, so args take precedence.
pub fn get_config(args: &Args, env_args: &EnvArgs) -> Result<Config, InitError> {
    let base = match args.config.as_deref() {
        Some(path) => load_configuration(path)?,
        None => Config::default(),
    };

    let mut overrides = env_args.get_overrides();
    overrides.extend(args.get_overrides());

    Ok(apply_overrides(&base, &overrides)?)
}

fn load_configuration(path: &Path) -> Result<Config, InitError> {
    let config_str = fs::read_to_string(path)?;
    let conf = toml::from_str::<Config>(&config_str).map_err(ConfigError::from)?;
    Ok(conf)
}

/// Applies overrides on top of an already-defaulted config.  Going through a
/// parsed config first means every table exists even if the file left it out.
fn apply_overrides(config: &Config, overrides: &[String]) -> Result<Config, ConfigError> {
    if overrides.is_empty() {
        return Ok(config.clone());
    }

    let mut value = toml::Value::try_from(config)?;
    let Some(table) = value.as_table_mut() else {
        return Err(ConfigError::TraverseNonTableAt("<root>".to_string()));
    };

    for ovr in overrides {
        ovr.parse::<ConfigOverride>()?.apply(table)?;
    }

    Ok(value.try_into()?)
}
