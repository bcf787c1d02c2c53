//! Slider signal pipeline
//!
//! Turns raw ADC lines (`"512|1023|0"`) into sparse per-channel change
//! events: validate, normalize by `2^dacBits`, optionally invert, average
//! over the last 10 samples, round to 2 decimals, and emit only channels
//! whose value moved by at least the noise threshold (or reached an exact
//! end of travel).

use std::collections::{HashMap, VecDeque};
use tracing::trace;

use crate::config::{AppConfig, NoiseReduction};
use crate::error::SignalError;

/// Samples averaged per output
pub const WINDOW_SIZE: usize = 10;

/// Decimal places kept after smoothing
const ROUND_DECIMALS: i32 = 2;

/// Tolerance for "exactly" 0.0 / 1.0
const BOUNDARY_EPSILON: f64 = 1e-6;

/// Per-channel normalized values in `[0, 1]`, channel 0 first
pub type ChannelVector = Vec<f64>;

/// A significant move of one slider
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliderChangeEvent {
    pub channel: usize,
    pub value: f64,
}

/// Live-updatable pipeline parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineSettings {
    pub dac_bits: u8,
    pub invert: bool,
    pub noise_threshold: f64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            dac_bits: 10,
            invert: false,
            noise_threshold: NoiseReduction::Default.threshold(),
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            dac_bits: config.dac_bits,
            invert: config.invert_sliders,
            noise_threshold: config.noise_reduction.threshold(),
        }
    }
}

/// Stateful pipeline stage
///
/// Owns the smoothing window and the last emitted value per channel.
#[derive(Debug, Default)]
pub struct SignalPipeline {
    settings: PipelineSettings,
    window: VecDeque<ChannelVector>,
    last_values: HashMap<usize, f64>,
}

impl SignalPipeline {
    pub fn new(settings: PipelineSettings) -> Self {
        Self {
            settings,
            window: VecDeque::with_capacity(WINDOW_SIZE),
            last_values: HashMap::new(),
        }
    }

    pub fn settings(&self) -> PipelineSettings {
        self.settings
    }

    /// Apply new parameters; they take effect from the next line
    pub fn update_settings(&mut self, settings: PipelineSettings) {
        self.settings = settings;
    }

    /// Last emitted value for a channel
    pub fn last_value(&self, channel: usize) -> Option<f64> {
        self.last_values.get(&channel).copied()
    }

    /// Feed one raw line, returning the events it produces in channel order
    pub fn process(&mut self, line: &str) -> Vec<SliderChangeEvent> {
        let values = match parse_line(line, self.settings.dac_bits) {
            Ok(values) => values,
            Err(e) => {
                trace!("Dropping line: {}", e);
                return Vec::new();
            }
        };

        let values = if self.settings.invert {
            invert(values)
        } else {
            values
        };

        if self.window.len() == WINDOW_SIZE {
            self.window.pop_front();
        }
        self.window.push_back(values);
        if self.window.len() < WINDOW_SIZE {
            return Vec::new();
        }

        let smoothed: ChannelVector = window_average(&self.window)
            .into_iter()
            .map(|v| round_to(v, ROUND_DECIMALS))
            .collect();

        let mut events = Vec::new();
        for (channel, &value) in smoothed.iter().enumerate() {
            let previous = self.last_values.get(&channel).copied().unwrap_or(0.0);
            if is_significant_change(previous, value, self.settings.noise_threshold) {
                events.push(SliderChangeEvent { channel, value });
                self.last_values.insert(channel, value);
            }
        }
        events
    }
}

/// Validate and normalize one line
///
/// A valid line is 1-4 ASCII digits, optionally repeated as `|` + 1-4 digits.
pub fn parse_line(line: &str, dac_bits: u8) -> Result<ChannelVector, SignalError> {
    let scale = f64::from(1u32 << u32::from(dac_bits.min(31)));

    line.split('|')
        .map(|field| {
            let valid = (1..=4).contains(&field.len()) && field.bytes().all(|b| b.is_ascii_digit());
            if !valid {
                return Err(SignalError::MalformedLine(line.to_string()));
            }
            let raw: u32 = field
                .parse()
                .map_err(|_| SignalError::MalformedLine(line.to_string()))?;
            Ok((f64::from(raw) / scale).clamp(0.0, 1.0))
        })
        .collect()
}

fn invert(values: ChannelVector) -> ChannelVector {
    values.into_iter().map(|v| 1.0 - v).collect()
}

/// Per-channel mean across the window; short vectors count as zeros
pub fn window_average(window: &VecDeque<ChannelVector>) -> ChannelVector {
    let channels = window.iter().map(Vec::len).max().unwrap_or(0);
    let samples = window.len() as f64;

    (0..channels)
        .map(|channel| {
            let sum: f64 = window
                .iter()
                .map(|sample| sample.get(channel).copied().unwrap_or(0.0))
                .sum();
            sum / samples
        })
        .collect()
}

/// Round half away from zero, nudged against representation error
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let p = 10f64.powi(decimals);
    (value * p * (1.0 + f64::EPSILON)).round() / p
}

/// Threshold test plus the end-of-travel rule
pub fn is_significant_change(previous: f64, current: f64, threshold: f64) -> bool {
    if (previous - current).abs() >= threshold {
        return true;
    }
    let at_top = (current - 1.0).abs() < BOUNDARY_EPSILON && previous != 1.0;
    let at_bottom = current.abs() < BOUNDARY_EPSILON && previous != 0.0;
    at_top || at_bottom
}
