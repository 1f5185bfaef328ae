//! Pipeline settings

use serde::{Deserialize, Serialize};

use crate::config::{Config, ConfigError};
use crate::pipeline::{
    CullStage, DepthSortStage, DeviceError, GenericCullStage, GraphicsCapabilities, GraphicsContext, NullCullStage,
    NullSortStage, OutputDevice, RenderPipeline, RenderingProcessor, SortStage, StateSortStage,
};

/// Which cull stage to wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CullMode {
    /// No visibility test
    Null,
    /// Frustum and LOD evaluation
    #[default]
    Generic,
}

/// Which sort stage to wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SortMode {
    /// Keep cull order
    Null,
    /// Opaque front to back, transparent back to front
    #[default]
    Depth,
    /// Opaque grouped by render state, transparent back to front
    State,
}

/// # Pipeline Settings
///
/// Stage selection, frame pacing, logging and device capabilities.
/// Missing fields in a settings file fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Floor on the spacing between frames; zero means uncapped
    pub minimum_frame_interval_ms: u32,
    /// Cull stage
    pub cull_mode: CullMode,
    /// Sort stage
    pub sort_mode: SortMode,
    /// Frustum test in the generic cull stage
    pub frustum_culling: bool,
    /// Default log level (`error`, `warn`, `info`, `debug`, `trace`)
    pub log_level: String,
    /// Capabilities requested from the graphics context
    pub capabilities: GraphicsCapabilities,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            minimum_frame_interval_ms: 0,
            cull_mode: CullMode::default(),
            sort_mode: SortMode::default(),
            frustum_culling: true,
            log_level: "info".to_string(),
            capabilities: GraphicsCapabilities::default(),
        }
    }
}

impl PipelineSettings {
    /// Set the frame spacing floor
    pub fn with_minimum_frame_interval(mut self, interval_ms: u32) -> Self {
        self.minimum_frame_interval_ms = interval_ms;
        self
    }

    /// Set the cull stage
    pub fn with_cull_mode(mut self, mode: CullMode) -> Self {
        self.cull_mode = mode;
        self
    }

    /// Set the sort stage
    pub fn with_sort_mode(mut self, mode: SortMode) -> Self {
        self.sort_mode = mode;
        self
    }

    /// Enable or disable the frustum test
    pub fn with_frustum_culling(mut self, enabled: bool) -> Self {
        self.frustum_culling = enabled;
        self
    }

    /// Set the log level
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Set the device capabilities
    pub fn with_capabilities(mut self, capabilities: GraphicsCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_level.parse::<log::LevelFilter>().is_err() {
            return Err(ConfigError::Invalid(format!("Unknown log level: {}", self.log_level)));
        }

        let caps = &self.capabilities;
        if caps.color_bits == 0 {
            return Err(ConfigError::Invalid("Color buffer needs at least one bit".to_string()));
        }
        if caps.color_bits > 32 || caps.depth_bits > 32 || caps.stencil_bits > 8 {
            return Err(ConfigError::Invalid(format!(
                "Unsupported buffer depths: color {} / depth {} / stencil {}",
                caps.color_bits, caps.depth_bits, caps.stencil_bits
            )));
        }
        Ok(())
    }

    /// Cull stage for the configured mode
    pub fn create_culler(&self) -> Box<dyn CullStage> {
        match self.cull_mode {
            CullMode::Null => Box::new(NullCullStage::new()),
            CullMode::Generic => Box::new(GenericCullStage::new().with_frustum_culling(self.frustum_culling)),
        }
    }

    /// Sort stage for the configured mode
    pub fn create_sorter(&self) -> Box<dyn SortStage> {
        match self.sort_mode {
            SortMode::Null => Box::new(NullSortStage::new()),
            SortMode::Depth => Box::new(DepthSortStage::new()),
            SortMode::State => Box::new(StateSortStage::new()),
        }
    }

    /// Output device over a graphics context, with the configured capabilities
    pub fn create_device<C: GraphicsContext>(&self, context: C) -> Result<RenderingProcessor<C>, DeviceError> {
        RenderingProcessor::new(context, self.capabilities)
    }

    /// Idle pipeline wired with the configured stages and the given device
    pub fn build_pipeline(&self, device: Box<dyn OutputDevice>) -> Result<RenderPipeline, ConfigError> {
        self.validate()?;

        let mut pipeline = RenderPipeline::new();
        let wiring = |e: crate::pipeline::PipelineError| ConfigError::Invalid(e.to_string());
        pipeline.set_culler(self.create_culler()).map_err(wiring)?;
        pipeline.set_sorter(self.create_sorter()).map_err(wiring)?;
        pipeline.set_output_device(device).map_err(wiring)?;
        pipeline.set_minimum_frame_interval(self.minimum_frame_interval_ms);
        Ok(pipeline)
    }
}

impl Config for PipelineSettings {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFormat;
    use crate::pipeline::{CapabilityFlags, PipelineState, RecordingContext};
    use std::time::Duration;

    #[test]
    fn test_default_settings_validate() {
        assert!(PipelineSettings::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let settings = PipelineSettings::default().with_log_level("loud");
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid(_))));

        let mut capabilities = GraphicsCapabilities::default();
        capabilities.stencil_bits = 16;
        let settings = PipelineSettings::default().with_capabilities(capabilities);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip_keeps_modes() {
        let settings = PipelineSettings::default()
            .with_cull_mode(CullMode::Null)
            .with_sort_mode(SortMode::State)
            .with_minimum_frame_interval(16);

        let text = settings.to_string_with_format(ConfigFormat::Toml).unwrap();
        let parsed = PipelineSettings::from_str_with_format(&text, ConfigFormat::Toml).unwrap();
        assert_eq!(parsed, settings);
    }

    #[test]
    fn test_partial_ron_uses_defaults() {
        let parsed = PipelineSettings::from_str_with_format("(sort_mode: Null, frustum_culling: false)", ConfigFormat::Ron).unwrap();

        assert_eq!(parsed.sort_mode, SortMode::Null);
        assert!(!parsed.frustum_culling);
        assert_eq!(parsed.cull_mode, CullMode::Generic);
        assert_eq!(parsed.log_level, "info");
    }

    #[test]
    fn test_build_pipeline_wires_stages() {
        let settings = PipelineSettings::default().with_minimum_frame_interval(20);
        let device = settings.create_device(RecordingContext::new()).unwrap();
        let pipeline = settings.build_pipeline(Box::new(device)).unwrap();

        assert_eq!(pipeline.state(), PipelineState::Idle);
        assert_eq!(pipeline.minimum_frame_interval(), Duration::from_millis(20));
    }

    #[test]
    fn test_device_creation_fails_for_unsupported_capabilities() {
        let mut capabilities = GraphicsCapabilities::default();
        capabilities.features |= CapabilityFlags::STEREO;
        let settings = PipelineSettings::default().with_capabilities(capabilities);

        let result = settings.create_device(RecordingContext::without_features(CapabilityFlags::STEREO));
        assert!(matches!(result, Err(DeviceError::ContextCreation(_))));
    }
}
