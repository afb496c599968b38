use serde::{Deserialize, Serialize};

use crate::{logging::LoggingConfig, tracker::TrackerConfig};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tracker: TrackerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}
