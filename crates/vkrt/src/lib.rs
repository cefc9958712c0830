//! Host-side configuration of ray tracing pipelines
//!
//! This crate lets host code describe programs and their parameter layouts to
//! a GPU pipeline without reflecting over shader binaries. A [`Context`] owns
//! the devices, the registered programs and the pipeline linked from them:
//!
//! ```no_run
//! use vkrt::{Context, VariableDecl, VariableType};
//!
//! # fn main() -> Result<(), vkrt::Error> {
//! # let binary: Vec<u8> = Vec::new();
//! let mut context = Context::create(1)?;
//! let ray_gen = context.create_ray_gen(
//!     &binary,
//!     40,
//!     &[
//!         VariableDecl::new("fbPtr", VariableType::BufferPointer, 0),
//!         VariableDecl::new("fbSize", VariableType::Int2, 8),
//!         VariableDecl::new("color0", VariableType::Float3, 16),
//!         VariableDecl::new("color1", VariableType::Float3, 28),
//!     ],
//! )?;
//! let report = context.build_pipeline()?;
//! assert!(report.warnings.is_empty());
//! context.release_program(ray_gen)?;
//! context.destroy()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
mod context;
pub mod device;
pub mod error;
mod params;
mod pipeline;
mod program;
pub mod shader;
mod var_decl;

pub use config::ContextOptions;
pub use context::Context;
pub use device::{Device, SoftwareDevice, WgpuDevice};
pub use error::{BuildWarning, Error, Result};
pub use params::{AccelRef, BufferRef, DeviceAddress, ParameterRecord, SamplerRef, TextureRef, VariableValue};
pub use pipeline::{BuildReport, Pipeline, PipelineHandle, SHADER_RECORD_ALIGNMENT, ShaderBindingTable, ShaderRecord};
pub use program::{Program, ProgramDesc, ProgramHandle, ProgramKind};
pub use shader::ShaderBinary;
pub use var_decl::{MAX_STRUCT_SIZE, Overlap, VariableBinding, VariableDecl, VariableDeclTable, VariableType, VariableTypeParseError};
