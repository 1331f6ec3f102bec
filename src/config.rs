use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Tunables for a whole analysis run.
///
/// All fields have defaults, so a partial document (or none at all)
/// deserializes into a usable configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub detection: DetectionConfig,
    pub resolver: ResolverConfig,
}

/// Thresholds used by the signature predicates.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Minimum depth of the crashed thread for a stack overflow.
    pub stack_overflow_min_frames: usize,
    /// A single symbol has to repeat more often than this.
    pub stack_overflow_min_repeats: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        DetectionConfig {
            stack_overflow_min_frames: 50,
            stack_overflow_min_repeats: 10,
        }
    }
}

/// Where to find the Xcode command line tools and how long to wait for them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub atos_path: PathBuf,
    pub dwarfdump_path: PathBuf,
    pub timeout_secs: u64,
}

impl ResolverConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            atos_path: PathBuf::from("atos"),
            dwarfdump_path: PathBuf::from("dwarfdump"),
            timeout_secs: 30,
        }
    }
}

#[test]
fn test_partial_config_keeps_defaults() {
    let config: Config =
        serde_json::from_str(r#"{"detection": {"stack_overflow_min_frames": 20}}"#).unwrap();
    assert_eq!(config.detection.stack_overflow_min_frames, 20);
    assert_eq!(config.detection.stack_overflow_min_repeats, 10);
    assert_eq!(config.resolver, ResolverConfig::default());
    assert_eq!(config.resolver.timeout(), Duration::from_secs(30));
}
