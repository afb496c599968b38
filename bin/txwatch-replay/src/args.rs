use std::{path::PathBuf, str::FromStr};

use argh::FromArgs;
use toml::value::Table;
use txwatch_common::env::parse_env_or;

use crate::errors::ConfigError;

/// Caps chain queries in flight per block, overriding the config.
pub const MAX_QUERIES_ENVVAR: &str = "TXWATCH_MAX_CONCURRENT_QUERIES";

/// Configs overridable by environment.
#[derive(Debug, Clone, Default)]
pub struct EnvArgs {
    max_concurrent_queries: Option<usize>,
}

impl EnvArgs {
    pub fn from_env() -> Self {
        // Zero means unset, the tracker wouldn't make progress with it anyway.
        let n = parse_env_or(MAX_QUERIES_ENVVAR, 0usize);
        Self {
            max_concurrent_queries: (n > 0).then_some(n),
        }
    }

    /// Get strings of overrides gathered from env.
    pub fn get_overrides(&self) -> Vec<String> {
        let mut overrides = Vec::new();
        if let Some(n) = self.max_concurrent_queries {
            overrides.push(format!("tracker.max_concurrent_queries={n}"));
        }
        overrides
    }
}

#[derive(Debug, Clone, FromArgs)]
#[argh(description = "Replays a recorded chain event scenario through the transaction tracker")]
pub struct Args {
    // Config non-overriding args
    #[argh(option, short = 'c', description = "path to configuration")]
    pub config: Option<PathBuf>,

    #[argh(option, short = 's', description = "path to scenario json")]
    pub scenario: PathBuf,

    #[argh(
        switch,
        description = "keep replaying after an event fails instead of stopping"
    )]
    pub keep_going: bool,

    // Config overriding args
    /// Don't ask the chain to unpin blocks.
    #[argh(switch, description = "disable unpinning")]
    pub no_unpin: bool,

    /// Limit on chain queries in flight while evaluating one block.
    #[argh(option, description = "max concurrent chain queries")]
    pub max_concurrent_queries: Option<usize>,

    /// Other generic overrides to the config toml.
    /// Will be used, for example, as `-o tracker.unpin_blocks=false -o logging.service_label=ci`
    #[argh(option, short = 'o', description = "generic config overrides")]
    pub overrides: Vec<String>,
}

impl Args {
    /// Get strings of overrides gathered from args.
    pub fn get_overrides(&self) -> Vec<String> {
        let mut overrides = self.overrides.clone();
        overrides.extend(self.get_direct_overrides());
        overrides
    }

    /// Overrides passed directly as args and not as overrides.
    fn get_direct_overrides(&self) -> Vec<String> {
        let mut overrides = Vec::new();
        if self.no_unpin {
            overrides.push("tracker.unpin_blocks=false".to_string());
        }
        if let Some(n) = self.max_concurrent_queries {
            overrides.push(format!("tracker.max_concurrent_queries={n}"));
        }
        overrides
    }
}

/// One `key.path=value` config override.
#[derive(Clone, Debug, PartialEq)]
pub struct ConfigOverride {
    path: Vec<String>,
    value: toml::Value,
}

impl ConfigOverride {
    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn value(&self) -> &toml::Value {
        &self.value
    }

    /// Writes the value into the table, creating only the leaf key.  Every
    /// table along the way has to exist already.
    pub fn apply(&self, table: &mut Table) -> Result<(), ConfigError> {
        let Some((leaf, parents)) = self.path.split_last() else {
            return Err(ConfigError::InvalidOverride(String::new()));
        };

        let mut cur = table;
        for key in parents {
            cur = match cur.get_mut(key) {
                Some(toml::Value::Table(t)) => t,
                Some(_) => return Err(ConfigError::TraverseNonTableAt(key.clone())),
                None => return Err(ConfigError::MissingKey(key.clone())),
            };
        }

        cur.insert(leaf.clone(), self.value.clone());
        Ok(())
    }
}

impl FromStr for ConfigOverride {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, raw) = s
            .split_once('=')
            .ok_or_else(|| ConfigError::InvalidOverride(s.to_string()))?;

        let path = key.split('.').map(str::to_owned).collect::<Vec<_>>();
        if path.iter().any(String::is_empty) {
            return Err(ConfigError::InvalidOverride(s.to_string()));
        }

        Ok(Self {
            path,
            value: infer_value(raw),
        })
    }
}

/// Integers and booleans are taken as such, anything else is a string.
fn infer_value(raw: &str) -> toml::Value {
    if let Ok(i) = raw.parse::<i64>() {
        toml::Value::Integer(i)
    } else if let Ok(b) = raw.parse::<bool>() {
        toml::Value::Boolean(b)
    } else {
        toml::Value::String(raw.to_string())
    }
}
