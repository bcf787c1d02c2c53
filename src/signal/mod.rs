//! Raw serial lines to slider change events

pub mod pipeline;
pub mod throttle;

pub use pipeline::{PipelineSettings, SignalPipeline, SliderChangeEvent};
pub use throttle::LineThrottle;
