//! Configuration management for Deej GW
//!
//! Handles loading, parsing, validation and hot-reloading of the YAML
//! configuration. The canonical `config.yaml` is required; an optional
//! `preferences.yaml` next to it overrides top-level keys.

pub mod watcher;

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::error::ConfigError;

pub use watcher::ConfigWatcher;

/// File name of the optional overlay, resolved next to the canonical config
pub const PREFERENCES_FILE: &str = "preferences.yaml";

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default, alias = "com_port")]
    pub com_port: String,

    #[serde(default = "default_baud_rate", alias = "baud_rate")]
    pub baud_rate: u32,

    #[serde(default, alias = "slider_mapping")]
    pub slider_mapping: BTreeMap<ChannelKey, OneOrMany>,

    #[serde(default, alias = "invert_sliders", alias = "invert_slider")]
    pub invert_sliders: bool,

    #[serde(default = "default_dac_bits", alias = "dac_bits")]
    pub dac_bits: u8,

    #[serde(default, alias = "noise_reduction")]
    pub noise_reduction: NoiseReduction,

    #[serde(default, alias = "auto_com_port")]
    pub auto_com_port: bool,

    #[serde(default)]
    pub manufacturer: OneOrMany,

    #[serde(default, alias = "vendor_id")]
    pub vendor_id: OneOrMany,

    #[serde(default, alias = "exit_on_disconnect")]
    pub exit_on_disconnect: bool,

    /// Target names handled as literal system controls
    #[serde(default = "default_reserved_targets", alias = "reserved_targets")]
    pub reserved_targets: Vec<String>,
}

/// Slider mapping key; YAML allows either `0:` or `"0":`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(untagged)]
pub enum ChannelKey {
    Index(usize),
    Name(String),
}

impl ChannelKey {
    pub fn index(&self) -> Option<usize> {
        match self {
            ChannelKey::Index(i) => Some(*i),
            ChannelKey::Name(s) => s.trim().parse().ok(),
        }
    }
}

impl std::fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelKey::Index(i) => write!(f, "{}", i),
            ChannelKey::Name(s) => write!(f, "{}", s),
        }
    }
}

/// A single YAML scalar; unquoted numbers stay numbers
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Text(String),
    Number(u64),
}

impl Scalar {
    fn to_text(&self) -> String {
        match self {
            Scalar::Text(s) => s.clone(),
            Scalar::Number(n) => n.to_string(),
        }
    }
}

/// A scalar or a list of scalars in YAML
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(Scalar),
    Many(Vec<Scalar>),
}

impl Default for OneOrMany {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl OneOrMany {
    fn items(&self) -> &[Scalar] {
        match self {
            OneOrMany::One(item) => std::slice::from_ref(item),
            OneOrMany::Many(items) => items,
        }
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.items()
            .iter()
            .map(Scalar::to_text)
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// First element written as an unquoted number
    pub fn first_number(&self) -> Option<u64> {
        self.items().iter().find_map(|item| match item {
            Scalar::Number(n) => Some(*n),
            Scalar::Text(_) => None,
        })
    }
}

/// Noise reduction preset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoiseReduction {
    Low,
    High,
    /// Also catches unknown levels
    #[default]
    #[serde(other)]
    Default,
}

impl NoiseReduction {
    /// Minimum change magnitude that counts as significant
    pub fn threshold(self) -> f64 {
        match self {
            NoiseReduction::Low => 0.015,
            NoiseReduction::Default => 0.025,
            NoiseReduction::High => 0.035,
        }
    }
}

/// Channel index to target names, one snapshot per config generation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SliderMapping {
    targets: BTreeMap<usize, Vec<String>>,
}

impl SliderMapping {
    pub fn new(targets: BTreeMap<usize, Vec<String>>) -> Self {
        Self { targets }
    }

    /// Targets for a channel; unmapped channels have none
    pub fn targets(&self, channel: usize) -> &[String] {
        self.targets
            .get(&channel)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl AppConfig {
    /// Load the canonical config and overlay optional preferences
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut value = read_yaml(path).await?;

        let preferences = preferences_path(path);
        match read_yaml(&preferences).await {
            Ok(overlay) => {
                debug!("Applying preferences from {}", preferences.display());
                merge_top_level(&mut value, overlay);
            }
            Err(ConfigError::Missing { .. }) => {
                debug!(
                    "No preferences at {}, using defaults",
                    preferences.display()
                );
            }
            Err(e) => return Err(e),
        }

        let config: AppConfig =
            serde_yaml::from_value(value).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.com_port.trim().is_empty() && !self.auto_com_port {
            return Err(ConfigError::Invalid(
                "comPort cannot be empty unless autoComPort is enabled".into(),
            ));
        }
        if self.baud_rate == 0 {
            return Err(ConfigError::Invalid("baudRate must be positive".into()));
        }
        if !(1..=16).contains(&self.dac_bits) {
            return Err(ConfigError::Invalid(format!(
                "dacBits {} is out of range (must be 1-16)",
                self.dac_bits
            )));
        }
        // YAML reads 0x2341 as the integer 9025 and 2341 as decimal, so hex
        // intent is lost once unquoted
        if let Some(n) = self.vendor_id.first_number() {
            return Err(ConfigError::Invalid(format!(
                "vendorId {} is not quoted; write vendor ids as strings, e.g. \"0x2341\"",
                n
            )));
        }
        for key in self.slider_mapping.keys() {
            if key.index().is_none() {
                return Err(ConfigError::Invalid(format!(
                    "sliderMapping key '{}' is not a channel index",
                    key
                )));
            }
        }
        Ok(())
    }

    /// Build the channel mapping snapshot
    pub fn mapping(&self) -> SliderMapping {
        let targets = self
            .slider_mapping
            .iter()
            .filter_map(|(key, names)| {
                let channel = key.index()?;
                Some((channel, names.to_vec()))
            })
            .collect();
        SliderMapping::new(targets)
    }
}

/// Path of the optional preferences overlay for a canonical config path
pub fn preferences_path(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .map(|dir| dir.join(PREFERENCES_FILE))
        .unwrap_or_else(|| PathBuf::from(PREFERENCES_FILE))
}

async fn read_yaml(path: &Path) -> Result<serde_yaml::Value, ConfigError> {
    let contents = match fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::Missing {
                path: path.to_path_buf(),
            })
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let value: serde_yaml::Value =
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    // An empty file parses as null
    if value.is_null() {
        return Ok(serde_yaml::Value::Mapping(Default::default()));
    }
    Ok(value)
}

fn merge_top_level(base: &mut serde_yaml::Value, overlay: serde_yaml::Value) {
    if let (Some(base), serde_yaml::Value::Mapping(overlay)) = (base.as_mapping_mut(), overlay) {
        for (key, value) in overlay {
            base.insert(key, value);
        }
    }
}

// Default value functions
fn default_baud_rate() -> u32 { 9600 }
fn default_dac_bits() -> u8 { 10 }
fn default_reserved_targets() -> Vec<String> {
    vec!["master".to_string(), "system".to_string(), "mic".to_string()]
}
