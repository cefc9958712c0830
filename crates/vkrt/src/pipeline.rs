//! Pipeline building
//!
//! A pipeline is an immutable linkage of every program registered at the time
//! of the build. Builds are never incremental: each one walks the whole
//! registry in registration order, links it on every device and packs the
//! current parameter values into a fresh shader binding table.

use crate::{
    ProgramHandle, ProgramKind,
    device::{CompileRequest, Device, DevicePipeline},
    error::{BuildError, BuildWarning},
    program::ProgramRegistry,
};
use std::fmt;

/// Alignment of every record in the shader binding table
pub const SHADER_RECORD_ALIGNMENT: usize = 64;

/// Identifies one build of a context's pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineHandle {
    pub(crate) context: u32,
    pub(crate) generation: u64,
}

impl fmt::Display for PipelineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pipeline build #{} of context #{}", self.generation, self.context)
    }
}

/// Location of one program's parameters inside the shader binding table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderRecord {
    /// Program the record belongs to
    pub program: ProgramHandle,
    /// Stage of that program
    pub kind: ProgramKind,
    /// Byte offset of the record
    pub offset: usize,
    /// Size of the program's parameter struct
    pub size: usize,
}

/// Parameter records of every linked program, packed in build order
#[derive(Debug, Clone, Default)]
pub struct ShaderBindingTable {
    records: Vec<ShaderRecord>,
    data: Vec<u8>,
}

impl ShaderBindingTable {
    fn push(&mut self, program: ProgramHandle, kind: ProgramKind, parameters: &[u8]) {
        let offset = self.data.len().next_multiple_of(SHADER_RECORD_ALIGNMENT);
        self.data.resize(offset, 0);
        self.data.extend_from_slice(parameters);
        self.records.push(ShaderRecord {
            program,
            kind,
            offset,
            size: parameters.len(),
        });
    }

    /// Records in build order
    pub fn records(&self) -> &[ShaderRecord] {
        &self.records
    }

    /// Parameter bytes of `program` as captured at build time
    pub fn record(&self, program: ProgramHandle) -> Option<&[u8]> {
        self.records
            .iter()
            .find(|record| record.program == program)
            .map(|record| &self.data[record.offset..record.offset + record.size])
    }

    /// The packed table
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// A linked pipeline
#[derive(Debug)]
pub struct Pipeline {
    handle: PipelineHandle,
    programs: Vec<(ProgramHandle, ProgramKind)>,
    shader_binding_table: ShaderBindingTable,
    device_pipelines: Vec<Box<dyn DevicePipeline>>,
}

impl Pipeline {
    pub fn handle(&self) -> PipelineHandle {
        self.handle
    }

    /// Linked programs in registration order
    pub fn programs(&self) -> &[(ProgramHandle, ProgramKind)] {
        &self.programs
    }

    /// Linked programs of one kind
    pub fn programs_of_kind(&self, kind: ProgramKind) -> impl Iterator<Item = ProgramHandle> + '_ {
        self.programs.iter().filter(move |(_, k)| *k == kind).map(|(handle, _)| *handle)
    }

    /// True if the pipeline has nothing to launch
    pub fn is_inert(&self) -> bool {
        self.programs_of_kind(ProgramKind::RayGen).next().is_none() && self.programs_of_kind(ProgramKind::Compute).next().is_none()
    }

    pub fn shader_binding_table(&self) -> &ShaderBindingTable {
        &self.shader_binding_table
    }

    /// One linked pipeline per context device, in device order
    pub fn device_pipelines(&self) -> &[Box<dyn DevicePipeline>] {
        &self.device_pipelines
    }
}

/// Whether the context holds a pipeline matching its current programs
#[derive(Debug, Default)]
pub(crate) enum PipelineState {
    /// No pipeline, or the program set changed since the last build
    #[default]
    Dirty,
    /// The pipeline reflects the current program set
    Clean(Pipeline),
}

/// Outcome of a successful build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    /// Handle of the new pipeline
    pub pipeline: PipelineHandle,
    /// Non-fatal problems found while building
    pub warnings: Vec<BuildWarning>,
}

/// Links the full program set of a registry on every device
pub(crate) struct PipelineBuilder<'a> {
    registry: &'a ProgramRegistry,
    devices: &'a [Box<dyn Device>],
}

impl<'a> PipelineBuilder<'a> {
    pub fn new(registry: &'a ProgramRegistry, devices: &'a [Box<dyn Device>]) -> Self {
        Self { registry, devices }
    }

    /// Builds a pipeline identified by `handle`
    ///
    /// # Returns
    /// The pipeline and its warnings, or the first compilation failure
    pub fn build(self, handle: PipelineHandle) -> Result<(Pipeline, Vec<BuildWarning>), BuildError> {
        let programs: Vec<_> = self.registry.iter().collect();

        let mut warnings = Vec::new();
        if programs.is_empty() {
            warnings.push(BuildWarning::NoPrograms);
        } else if !programs.iter().any(|(_, program)| program.kind() == ProgramKind::RayGen) {
            warnings.push(BuildWarning::NoRayGenProgram);
        }

        let requests: Vec<_> = programs
            .iter()
            .map(|(_, program)| CompileRequest {
                kind: program.kind(),
                entry_point: program.entry_point(),
                binary: program.binary(),
            })
            .collect();

        let device_pipelines = self
            .devices
            .iter()
            .map(|device| {
                device.link(&requests).map_err(|failure| BuildError::Compilation {
                    program: programs[failure.index].0,
                    device: device.info().name.clone(),
                    message: failure.message,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut shader_binding_table = ShaderBindingTable::default();
        for (program_handle, program) in &programs {
            shader_binding_table.push(*program_handle, program.kind(), program.parameters().as_bytes());
        }

        let pipeline = Pipeline {
            handle,
            programs: programs.iter().map(|(program_handle, program)| (*program_handle, program.kind())).collect(),
            shader_binding_table,
            device_pipelines,
        };

        Ok((pipeline, warnings))
    }
}
