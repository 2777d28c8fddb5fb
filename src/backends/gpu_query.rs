//! wgpu-backed capability query

use super::detector::{CapabilityQuery, GraphicsContext};
use crate::error::{BgRemovalError, Result};
use pollster::block_on;
use wgpu::{
    Backends, DeviceDescriptor, DeviceType, ExperimentalFeatures, Features, Gles3MinorVersion,
    Instance, InstanceDescriptor, Limits, MemoryHints, PowerPreference, RequestAdapterOptions,
    Trace,
};

/// Queries real adapters through wgpu
///
/// Software rasterizers (`DeviceType::Cpu`, e.g. llvmpipe) are reported as
/// unsupported.
#[derive(Debug, Default, Clone, Copy)]
pub struct WgpuQuery;

impl WgpuQuery {
    fn instance(backends: Backends, gles_minor_version: Gles3MinorVersion) -> Instance {
        let mut instance_desc = InstanceDescriptor::default();
        instance_desc.backends = backends;
        instance_desc.backend_options.gl.gles_minor_version = gles_minor_version;
        Instance::new(&instance_desc)
    }
}

impl CapabilityQuery for WgpuQuery {
    fn query_compute(&self) -> Result<bool> {
        let instance = Self::instance(Backends::PRIMARY, Gles3MinorVersion::Automatic);
        let adapter = match block_on(instance.request_adapter(&RequestAdapterOptions {
            power_preference: PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            compatible_surface: None,
        })) {
            Ok(adapter) => adapter,
            Err(e) => {
                log::debug!("No primary GPU adapter: {}", e);
                return Ok(false);
            },
        };

        let info = adapter.get_info();
        if info.device_type == DeviceType::Cpu {
            log::debug!("Ignoring software adapter '{}'", info.name);
            return Ok(false);
        }

        let device_desc = DeviceDescriptor {
            label: Some("nobg-capability-check"),
            required_features: Features::empty(),
            required_limits: Limits::downlevel_defaults(),
            experimental_features: ExperimentalFeatures::default(),
            memory_hints: MemoryHints::default(),
            trace: Trace::default(),
        };

        let (device, queue) = block_on(adapter.request_device(&device_desc)).map_err(|e| {
            BgRemovalError::internal(format!("Device request on '{}' failed: {e}", info.name))
        })?;

        // Test handle only
        drop(queue);
        device.destroy();

        log::debug!(
            "Compute device available on '{}' ({:?})",
            info.name,
            info.backend
        );
        Ok(true)
    }

    fn query_graphics(&self, context: GraphicsContext) -> Result<bool> {
        let minor_version = match context {
            GraphicsContext::Gles3 => Gles3MinorVersion::Automatic,
            GraphicsContext::Gles30 => Gles3MinorVersion::Version0,
        };
        let instance = Self::instance(Backends::GL, minor_version);

        match block_on(instance.request_adapter(&RequestAdapterOptions::default())) {
            Ok(adapter) => Ok(adapter.get_info().device_type != DeviceType::Cpu),
            Err(e) => {
                log::debug!("No {} adapter: {}", context.name(), e);
                Ok(false)
            },
        }
    }
}
