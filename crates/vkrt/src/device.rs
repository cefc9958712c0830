//! Device backends
//!
//! A context drives one or more devices through the [`Device`] trait. Linking a
//! pipeline is the only driver operation the core needs: every device receives
//! the full program set and either returns an opaque device pipeline or names
//! the program it rejected.
//!
//! Two implementations are provided:
//! - [`WgpuDevice`] opens a real adapter through wgpu. Ray generation and
//!   compute programs become compute pipelines; the remaining stages are
//!   compiled as shader modules only.
//! - [`SoftwareDevice`] validates SPIR-V on the host with naga. It needs no
//!   GPU and backs headless runs and tests.

use crate::{
    ProgramKind, ShaderBinary,
    config::{ContextOptions, PowerPreference},
    error::ResourceError,
};
use std::any::Any;
use std::fmt;

/// First word of every SPIR-V module
const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Identity of a device, used in logs and error messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Adapter or implementation name
    pub name: String,
    /// Backend API the device runs on
    pub backend: String,
}

/// One program as handed to a device for linking
#[derive(Debug, Clone, Copy)]
pub struct CompileRequest<'a> {
    /// Pipeline stage
    pub kind: ProgramKind,
    /// Entry point inside the binary
    pub entry_point: &'a str,
    /// Shader module binary
    pub binary: &'a ShaderBinary,
}

/// A device refused one program of the set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileFailure {
    /// Position of the rejected program in the request slice
    pub index: usize,
    /// Driver or validator message
    pub message: String,
}

/// Device-side result of linking a program set
pub trait DevicePipeline: fmt::Debug {
    /// Number of programs linked into this pipeline
    fn program_count(&self) -> usize;

    /// Allows hosts to reach the backend-specific pipeline type
    fn as_any(&self) -> &dyn Any;
}

/// A GPU (or GPU stand-in) able to compile and link programs
pub trait Device: fmt::Debug {
    /// Identity of this device
    fn info(&self) -> &DeviceInfo;

    /// Compiles every program and links them into one device pipeline
    ///
    /// # Arguments
    /// * `programs` - The full program set in registration order
    ///
    /// # Returns
    /// The linked pipeline, or the first program that failed to compile
    fn link(&self, programs: &[CompileRequest<'_>]) -> Result<Box<dyn DevicePipeline>, CompileFailure>;
}

/// Rejects binaries that are not word-aligned SPIR-V before any driver sees them
fn check_spirv_header(binary: &ShaderBinary) -> Result<(), String> {
    let bytes = binary.as_bytes();
    if bytes.len() % 4 != 0 {
        return Err(format!("binary length {} is not a multiple of 4", bytes.len()));
    }
    let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if magic != SPIRV_MAGIC {
        return Err(format!("missing SPIR-V magic number (found {magic:#010x})"));
    }
    Ok(())
}

/// Whether a program of this kind is linked as a dispatchable compute pipeline
fn is_dispatchable(kind: ProgramKind) -> bool {
    matches!(kind, ProgramKind::RayGen | ProgramKind::Compute)
}

/// Host-side device that validates SPIR-V with naga
#[derive(Debug, Clone)]
pub struct SoftwareDevice {
    info: DeviceInfo,
}

/// Pipeline produced by [`SoftwareDevice`]
#[derive(Debug, Clone)]
pub struct SoftwarePipeline {
    /// Linked entry points in registration order
    pub entry_points: Vec<(ProgramKind, String)>,
}

impl SoftwareDevice {
    /// Creates a software device
    pub fn new() -> Self {
        Self {
            info: DeviceInfo {
                name: "software".to_string(),
                backend: "naga".to_string(),
            },
        }
    }

    fn compile(&self, request: &CompileRequest<'_>) -> Result<(), String> {
        check_spirv_header(request.binary)?;

        let module = naga::front::spv::parse_u8_slice(request.binary.as_bytes(), &naga::front::spv::Options::default()).map_err(|e| e.to_string())?;

        naga::valid::Validator::new(naga::valid::ValidationFlags::all(), naga::valid::Capabilities::all())
            .validate(&module)
            .map_err(|e| e.to_string())?;

        let entry_point = module
            .entry_points
            .iter()
            .find(|ep| ep.name == request.entry_point)
            .ok_or_else(|| format!("entry point `{}` not found", request.entry_point))?;

        if is_dispatchable(request.kind) && entry_point.stage != naga::ShaderStage::Compute {
            return Err(format!("entry point `{}` of a {} program must be a compute entry point", request.entry_point, request.kind.name()));
        }

        Ok(())
    }
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for SoftwareDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn link(&self, programs: &[CompileRequest<'_>]) -> Result<Box<dyn DevicePipeline>, CompileFailure> {
        for (index, request) in programs.iter().enumerate() {
            self.compile(request).map_err(|message| CompileFailure { index, message })?;
        }

        Ok(Box::new(SoftwarePipeline {
            entry_points: programs.iter().map(|request| (request.kind, request.entry_point.to_string())).collect(),
        }))
    }
}

impl DevicePipeline for SoftwarePipeline {
    fn program_count(&self) -> usize {
        self.entry_points.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A wgpu adapter opened as a device
#[derive(Debug)]
pub struct WgpuDevice {
    info: DeviceInfo,
    device: wgpu::Device,
    queue: wgpu::Queue,
}

/// A program linked on a [`WgpuDevice`]
#[derive(Debug)]
pub struct WgpuProgram {
    /// Pipeline stage
    pub kind: ProgramKind,
    /// Compiled shader module
    pub module: wgpu::ShaderModule,
    /// Compute pipeline for ray generation and compute programs
    pub compute_pipeline: Option<wgpu::ComputePipeline>,
}

/// Pipeline produced by [`WgpuDevice`]
#[derive(Debug)]
pub struct WgpuPipeline {
    /// Linked programs in registration order
    pub programs: Vec<WgpuProgram>,
}

impl WgpuDevice {
    /// Opens a device on `adapter`
    ///
    /// # Arguments
    /// * `adapter` - The adapter to open
    /// * `label` - Debug label for the device
    pub fn from_adapter(adapter: &wgpu::Adapter, label: Option<&str>) -> Result<Self, ResourceError> {
        let adapter_info = adapter.get_info();

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label,
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::default(),
            trace: Default::default(),
        }))?;

        Ok(Self {
            info: DeviceInfo {
                name: adapter_info.name,
                backend: format!("{:?}", adapter_info.backend),
            },
            device,
            queue,
        })
    }

    /// The wgpu device for creating resources
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// The command queue for submitting work
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    fn compile(&self, request: &CompileRequest<'_>) -> Result<WgpuProgram, String> {
        check_spirv_header(request.binary)?;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(request.entry_point),
            source: wgpu::util::make_spirv(request.binary.as_bytes()),
        });

        let compute_pipeline = is_dispatchable(request.kind).then(|| {
            self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(request.entry_point),
                layout: None,
                module: &module,
                entry_point: Some(request.entry_point),
                compilation_options: Default::default(),
                cache: None,
            })
        });

        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(error.to_string());
        }

        Ok(WgpuProgram {
            kind: request.kind,
            module,
            compute_pipeline,
        })
    }
}

impl Device for WgpuDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn link(&self, programs: &[CompileRequest<'_>]) -> Result<Box<dyn DevicePipeline>, CompileFailure> {
        let programs = programs
            .iter()
            .enumerate()
            .map(|(index, request)| self.compile(request).map_err(|message| CompileFailure { index, message }))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Box::new(WgpuPipeline { programs }))
    }
}

impl DevicePipeline for WgpuPipeline {
    fn program_count(&self) -> usize {
        self.programs.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Opens the wgpu devices selected by `options`
///
/// Adapters are ordered by the requested power preference. A device count of
/// zero opens every adapter found.
///
/// # Returns
/// The opened devices, or `NoDeviceAvailable` if fewer adapters than requested exist
pub fn acquire_devices(options: &ContextOptions) -> Result<Vec<Box<dyn Device>>, ResourceError> {
    let backends = options.backends.to_wgpu();
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends,
        ..Default::default()
    });

    let mut adapters = instance.enumerate_adapters(backends);
    adapters.sort_by_key(|adapter| adapter_rank(adapter.get_info().device_type, options.power_preference));

    let available = adapters.len();
    let wanted = if options.device_count == 0 { available } else { options.device_count };
    if available == 0 || available < wanted {
        return Err(ResourceError::NoDeviceAvailable {
            requested: options.device_count,
            available,
        });
    }

    adapters
        .iter()
        .take(wanted)
        .map(|adapter| WgpuDevice::from_adapter(adapter, options.label.as_deref()).map(|device| Box::new(device) as Box<dyn Device>))
        .collect()
}

/// Lower ranks are preferred
fn adapter_rank(device_type: wgpu::DeviceType, preference: PowerPreference) -> u8 {
    match (preference, device_type) {
        (PowerPreference::HighPerformance, wgpu::DeviceType::DiscreteGpu) => 0,
        (PowerPreference::HighPerformance, wgpu::DeviceType::IntegratedGpu) => 1,
        (PowerPreference::LowPower, wgpu::DeviceType::IntegratedGpu) => 0,
        (PowerPreference::LowPower, wgpu::DeviceType::DiscreteGpu) => 1,
        (_, wgpu::DeviceType::VirtualGpu) => 2,
        (_, wgpu::DeviceType::Other) => 3,
        (_, wgpu::DeviceType::Cpu) => 4,
    }
}
