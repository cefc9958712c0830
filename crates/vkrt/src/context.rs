//! Device context
//!
//! The context is the single owner of devices, programs and the built
//! pipeline. It moves through a linear lifecycle:
//!
//! ```text
//! created -> (programs registered)* -> built -> destroyed
//! ```
//!
//! Registering or releasing a program, or writing parameters, after a build
//! drops the pipeline back to the dirty state; it must be rebuilt before use.
//! After [`Context::destroy`] every operation fails with `UseAfterDestroy`.

use crate::{
    ContextOptions, Pipeline, PipelineHandle, Program, ProgramDesc, ProgramHandle, ProgramKind, VariableDecl, VariableValue,
    device::{self, Device},
    error::{LifecycleError, ResourceError, Result},
    pipeline::{BuildReport, PipelineBuilder, PipelineState},
    program::ProgramRegistry,
};
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_CONTEXT_ID: AtomicU32 = AtomicU32::new(1);

/// Owner of devices, programs and the pipeline built from them
#[derive(Debug)]
pub struct Context {
    id: u32,
    // Field order is teardown order: pipeline, programs, devices
    pipeline: PipelineState,
    programs: ProgramRegistry,
    devices: Vec<Box<dyn Device>>,
    generation: u64,
    destroyed: bool,
}

impl Context {
    /// Opens `device_count` GPU devices with default options
    ///
    /// A count of zero opens every adapter found.
    pub fn create(device_count: usize) -> Result<Self> {
        Self::with_options(&ContextOptions::with_device_count(device_count))
    }

    /// Opens GPU devices as described by `options`
    pub fn with_options(options: &ContextOptions) -> Result<Self> {
        let devices = device::acquire_devices(options)?;
        Self::with_devices(devices)
    }

    /// Creates a context over already opened devices
    ///
    /// # Arguments
    /// * `devices` - At least one device, e.g. a [`crate::SoftwareDevice`]
    pub fn with_devices(devices: Vec<Box<dyn Device>>) -> Result<Self> {
        if devices.is_empty() {
            return Err(ResourceError::NoDeviceAvailable { requested: 1, available: 0 }.into());
        }

        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            context = id,
            devices = ?devices.iter().map(|device| device.info().name.as_str()).collect::<Vec<_>>(),
            "context created"
        );

        Ok(Self {
            id,
            pipeline: PipelineState::Dirty,
            programs: ProgramRegistry::new(id),
            devices,
            generation: 0,
            destroyed: false,
        })
    }

    fn ensure_alive(&self) -> Result<(), LifecycleError> {
        if self.destroyed { Err(LifecycleError::UseAfterDestroy) } else { Ok(()) }
    }

    /// Drops any built pipeline; the next use requires a rebuild
    fn invalidate(&mut self) {
        if let PipelineState::Clean(pipeline) = std::mem::take(&mut self.pipeline) {
            tracing::debug!(context = self.id, pipeline = %pipeline.handle(), "pipeline invalidated");
        }
    }

    /// Devices owned by this context
    pub fn devices(&self) -> Result<&[Box<dyn Device>]> {
        self.ensure_alive()?;
        Ok(&self.devices)
    }

    /// Registers a program of any kind
    pub fn create_program(&mut self, desc: &ProgramDesc<'_>) -> Result<ProgramHandle> {
        self.ensure_alive()?;
        let handle = self.programs.register(desc)?;
        self.invalidate();
        tracing::debug!(
            context = self.id,
            program = %handle,
            kind = desc.kind.name(),
            entry_point = desc.entry_point,
            binary_size = desc.binary.len(),
            struct_size = desc.struct_size,
            variables = desc.variables.len(),
            "program registered"
        );
        Ok(handle)
    }

    /// Registers a ray generation program with entry point `main`
    ///
    /// # Arguments
    /// * `binary` - Shader module binary; copied, must not be empty
    /// * `struct_size` - Size of the host parameter struct in bytes
    /// * `variables` - Declarations describing the parameter struct
    pub fn create_ray_gen(&mut self, binary: &[u8], struct_size: usize, variables: &[VariableDecl]) -> Result<ProgramHandle> {
        self.create_program(&ProgramDesc::ray_gen(binary, struct_size, variables))
    }

    /// Registers a miss program with entry point `main`
    pub fn create_miss(&mut self, binary: &[u8], struct_size: usize, variables: &[VariableDecl]) -> Result<ProgramHandle> {
        self.create_program(&ProgramDesc::new(ProgramKind::Miss, binary, struct_size, variables))
    }

    /// Registers a hit group program with entry point `main`
    pub fn create_hit_group(&mut self, binary: &[u8], struct_size: usize, variables: &[VariableDecl]) -> Result<ProgramHandle> {
        self.create_program(&ProgramDesc::new(ProgramKind::HitGroup, binary, struct_size, variables))
    }

    pub fn create_compute(&mut self, binary: &[u8], struct_size: usize, variables: &[VariableDecl]) -> Result<ProgramHandle> {
        self.create_program(&ProgramDesc::new(ProgramKind::Compute, binary, struct_size, variables))
    }

    /// Releases a program; a second release of the same handle fails
    pub fn release_program(&mut self, handle: ProgramHandle) -> Result<()> {
        self.ensure_alive()?;
        self.programs.release(handle)?;
        self.invalidate();
        tracing::debug!(context = self.id, program = %handle, "program released");
        Ok(())
    }

    /// Looks up a live program
    pub fn program(&self, handle: ProgramHandle) -> Result<&Program> {
        self.ensure_alive()?;
        Ok(self.programs.get(handle)?)
    }

    /// Number of live programs
    pub fn program_count(&self) -> Result<usize> {
        self.ensure_alive()?;
        Ok(self.programs.len())
    }

    /// Writes a typed value into a program's parameter variable
    pub fn set_variable<V: VariableValue>(&mut self, handle: ProgramHandle, name: &str, value: V) -> Result<()> {
        self.ensure_alive()?;
        let (layout, parameters) = self.programs.get_mut(handle)?.layout_and_parameters_mut();
        parameters.set(layout, name, value)?;
        self.invalidate();
        Ok(())
    }

    /// Writes raw bytes into a program's parameter variable
    pub fn set_raw(&mut self, handle: ProgramHandle, name: &str, data: &[u8]) -> Result<()> {
        self.ensure_alive()?;
        let (layout, parameters) = self.programs.get_mut(handle)?.layout_and_parameters_mut();
        parameters.set_raw(layout, name, data)?;
        self.invalidate();
        Ok(())
    }

    /// Overwrites a program's whole parameter struct
    pub fn write_parameters<T: bytemuck::Pod>(&mut self, handle: ProgramHandle, value: &T) -> Result<()> {
        self.ensure_alive()?;
        let (_, parameters) = self.programs.get_mut(handle)?.layout_and_parameters_mut();
        parameters.write_struct(value)?;
        self.invalidate();
        Ok(())
    }

    /// Links every registered program into a new pipeline
    ///
    /// Replaces any previous pipeline. On a compilation error the context is
    /// left without a pipeline and can build again once the program set is fixed.
    ///
    /// # Returns
    /// The new pipeline's handle and any non-fatal warnings
    pub fn build_pipeline(&mut self) -> Result<BuildReport> {
        self.ensure_alive()?;
        self.invalidate();

        self.generation += 1;
        let handle = PipelineHandle {
            context: self.id,
            generation: self.generation,
        };

        let (pipeline, warnings) = PipelineBuilder::new(&self.programs, &self.devices).build(handle).inspect_err(|e| {
            tracing::error!(context = self.id, "pipeline build failed: {e}");
        })?;

        for warning in &warnings {
            tracing::warn!(context = self.id, pipeline = %handle, "{warning}");
        }
        tracing::info!(
            context = self.id,
            pipeline = %handle,
            programs = pipeline.programs().len(),
            sbt_bytes = pipeline.shader_binding_table().as_bytes().len(),
            "pipeline built"
        );

        self.pipeline = PipelineState::Clean(pipeline);
        Ok(BuildReport { pipeline: handle, warnings })
    }

    /// Resolves a pipeline handle; only the current, clean build resolves
    pub fn pipeline(&self, handle: PipelineHandle) -> Result<&Pipeline> {
        self.ensure_alive()?;
        match &self.pipeline {
            PipelineState::Clean(pipeline) if pipeline.handle() == handle => Ok(pipeline),
            _ => Err(LifecycleError::StalePipeline(handle).into()),
        }
    }

    /// True if programs changed since the last successful build
    pub fn needs_rebuild(&self) -> Result<bool> {
        self.ensure_alive()?;
        Ok(matches!(self.pipeline, PipelineState::Dirty))
    }

    /// Releases the pipeline, every program and the devices, in that order
    ///
    /// Calling any operation afterwards, including a second `destroy`, fails
    /// with `UseAfterDestroy`.
    pub fn destroy(&mut self) -> Result<()> {
        self.ensure_alive()?;
        self.teardown();
        self.destroyed = true;
        Ok(())
    }

    fn teardown(&mut self) {
        let had_pipeline = matches!(std::mem::take(&mut self.pipeline), PipelineState::Clean(_));
        let programs = self.programs.release_all();
        let devices = std::mem::take(&mut self.devices).len();
        tracing::info!(context = self.id, had_pipeline, programs, devices, "context destroyed");
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if !self.destroyed {
            self.teardown();
        }
    }
}
