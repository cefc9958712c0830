//! Pipeline Manifest Parser
//!
//! This module parses YAML manifests that describe the programs of a ray
//! tracing pipeline, validates their structure, and registers them into a
//! context. Layout rules (names, offsets, overlaps) are checked by the core
//! library at registration time, not here.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use vkrt::{Context, ContextOptions, Overlap, ProgramDesc, ProgramHandle, ProgramKind, VariableDecl};

fn default_entry_point() -> String {
    ProgramDesc::DEFAULT_ENTRY_POINT.to_string()
}

/// A single program of the pipeline
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProgramSpec {
    /// Unique identifier for this program
    pub id: String,
    /// Pipeline stage
    pub kind: ProgramKind,
    /// Shader file path relative to manifest
    pub file: String,
    /// Entry point inside the shader (defaults to `main`)
    #[serde(default = "default_entry_point")]
    pub entry_point: String,
    /// Size of the host parameter struct in bytes
    #[serde(default)]
    pub struct_size: usize,
    /// Whether declarations may alias each other (defaults to forbid)
    #[serde(default)]
    pub overlap: Overlap,
    /// Declared parameter fields
    #[serde(default)]
    pub variables: Vec<VariableDecl>,
}

impl ProgramSpec {
    /// Describes this program for registration
    ///
    /// # Arguments
    /// * `binary` - Loaded contents of [`ProgramSpec::file`]
    pub fn to_desc<'a>(&'a self, binary: &'a [u8]) -> ProgramDesc<'a> {
        ProgramDesc::new(self.kind, binary, self.struct_size, &self.variables)
            .with_entry_point(&self.entry_point)
            .with_overlap(self.overlap)
    }
}

/// Raw pipeline manifest as parsed from YAML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineManifest {
    /// Unique pipeline identifier
    pub id: String,
    /// Human-readable pipeline name
    pub name: String,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
    /// Options for the context the manifest is checked against
    #[serde(default)]
    pub context: ContextOptions,
    /// Programs in registration order
    pub programs: Vec<ProgramSpec>,
}

/// A manifest program after registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredProgram {
    /// Identifier from the manifest
    pub id: String,
    /// Handle issued by the context
    pub handle: ProgramHandle,
}

impl PipelineManifest {
    /// Parses a manifest from YAML content
    ///
    /// # Arguments
    /// * `yaml_content` - YAML string containing the manifest
    pub fn from_yaml(yaml_content: &str) -> Result<Self, ManifestError> {
        Ok(serde_norway::from_str(yaml_content)?)
    }

    /// Parses a manifest from a YAML file
    ///
    /// # Arguments
    /// * `path` - Path to the YAML manifest file
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Validates the manifest structure
    ///
    /// # Returns
    /// Ok(()) if valid, or a specific validation error
    pub fn validate(&self) -> Result<(), ManifestValidationError> {
        if self.id.is_empty() {
            return Err(ManifestValidationError::EmptyId);
        }

        if self.name.is_empty() {
            return Err(ManifestValidationError::EmptyName);
        }

        let mut seen = HashSet::new();
        for (i, program) in self.programs.iter().enumerate() {
            if program.id.is_empty() {
                return Err(ManifestValidationError::EmptyProgramId(i));
            }
            if program.file.is_empty() {
                return Err(ManifestValidationError::EmptyFile(i));
            }
            if program.entry_point.is_empty() {
                return Err(ManifestValidationError::EmptyEntryPoint(i));
            }
            if !seen.insert(program.id.as_str()) {
                return Err(ManifestValidationError::DuplicateProgramId(i, program.id.clone()));
            }
        }

        Ok(())
    }

    /// Validates the manifest and registers every program into `context`
    ///
    /// The program set is all-or-nothing: if any program fails to load or
    /// register, the programs registered before it are released again. The
    /// context's pipeline is not restored, so a pipeline built before a failed
    /// call is invalidated and must be rebuilt.
    ///
    /// # Arguments
    /// * `context` - Context receiving the programs
    /// * `load_binary` - Function to load shader binaries by file name
    ///
    /// # Returns
    /// The registered programs in manifest order
    pub fn register(&self, context: &mut Context, load_binary: impl Fn(&str) -> Result<Vec<u8>, std::io::Error>) -> Result<Vec<RegisteredProgram>, ManifestError> {
        self.validate()?;

        let mut registered = Vec::with_capacity(self.programs.len());
        for program in &self.programs {
            let result = load_binary(&program.file)
                .map_err(|source| ManifestError::Load {
                    program: program.id.clone(),
                    file: program.file.clone(),
                    source,
                })
                .and_then(|binary| {
                    context.create_program(&program.to_desc(&binary)).map_err(|source| ManifestError::Registration {
                        program: program.id.clone(),
                        source,
                    })
                });

            match result {
                Ok(handle) => registered.push(RegisteredProgram { id: program.id.clone(), handle }),
                Err(e) => {
                    for RegisteredProgram { handle, .. } in registered {
                        // Already failing; the first error is the one reported
                        let _ = context.release_program(handle);
                    }
                    return Err(e);
                }
            }
        }

        tracing::debug!(manifest = %self.id, programs = registered.len(), "manifest registered");
        Ok(registered)
    }
}

/// Errors that can occur during manifest validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestValidationError {
    /// Manifest ID field is empty
    EmptyId,
    /// Manifest name field is empty
    EmptyName,
    /// A program has an empty ID (program index)
    EmptyProgramId(usize),
    /// A program has no shader file (program index)
    EmptyFile(usize),
    /// A program has an empty entry point (program index)
    EmptyEntryPoint(usize),
    /// Two programs share an ID (program index, program ID)
    DuplicateProgramId(usize, String),
}

impl fmt::Display for ManifestValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyId => write!(f, "Manifest ID cannot be empty"),
            Self::EmptyName => write!(f, "Manifest name cannot be empty"),
            Self::EmptyProgramId(program) => write!(f, "Program {program} has an empty ID"),
            Self::EmptyFile(program) => write!(f, "Program {program} has no shader file"),
            Self::EmptyEntryPoint(program) => write!(f, "Program {program} has an empty entry point"),
            Self::DuplicateProgramId(program, id) => write!(f, "Program {program} reuses the ID '{id}'"),
        }
    }
}

impl std::error::Error for ManifestValidationError {}

/// Errors from loading or registering a manifest
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse manifest: {0}")]
    Parse(#[from] serde_norway::Error),

    #[error("invalid manifest: {0}")]
    Validation(#[from] ManifestValidationError),

    #[error("failed to load '{file}' for program '{program}': {source}")]
    Load {
        program: String,
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to register program '{program}': {source}")]
    Registration {
        program: String,
        #[source]
        source: vkrt::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use vkrt::{SoftwareDevice, VariableType, error::ConfigurationError, shader::compile_wgsl};

    const MANIFEST: &str = r#"
id: ray_gen_only
name: Ray Gen Only
description: A single ray generation program
context:
  device_count: 1
programs:
  - id: simpleRayGen
    kind: ray_gen
    file: simple_ray_gen.wgsl
    struct_size: 40
    variables:
      - { name: fbPtr, type: buffer_pointer, offset: 0 }
      - { name: fbSize, type: int2, offset: 8 }
      - { name: color0, type: float3, offset: 16 }
      - { name: color1, type: float3, offset: 28 }
  - id: background
    kind: miss
    file: background.wgsl
    entry_point: miss
"#;

    const SHADER: &str = r#"
@compute @workgroup_size(8, 8) fn main() {}
@compute @workgroup_size(1) fn miss() {}
"#;

    fn load_binary(_file: &str) -> Result<Vec<u8>, std::io::Error> {
        compile_wgsl(SHADER).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
    }

    fn software_context() -> Context {
        Context::with_devices(vec![Box::new(SoftwareDevice::new())]).unwrap()
    }

    #[test]
    fn test_manifest_parsing() {
        let manifest = PipelineManifest::from_yaml(MANIFEST).unwrap();
        assert_eq!(manifest.id, "ray_gen_only");
        assert_eq!(manifest.name, "Ray Gen Only");
        assert_eq!(manifest.context.device_count, 1);
        assert_eq!(manifest.programs.len(), 2);

        let ray_gen = &manifest.programs[0];
        assert_eq!(ray_gen.kind, ProgramKind::RayGen);
        assert_eq!(ray_gen.entry_point, "main");
        assert_eq!(ray_gen.overlap, Overlap::Forbid);
        assert_eq!(ray_gen.variables.len(), 4);
        assert_eq!(ray_gen.variables[1], VariableDecl::new("fbSize", VariableType::Int2, 8));

        let miss = &manifest.programs[1];
        assert_eq!(miss.kind, ProgramKind::Miss);
        assert_eq!(miss.entry_point, "miss");
        assert_eq!(miss.struct_size, 0);
        assert!(miss.variables.is_empty());
    }

    #[test]
    fn test_unknown_variable_type_fails_parsing() {
        let yaml = r#"
id: bad
name: Bad
programs:
  - id: rg
    kind: ray_gen
    file: rg.spv
    struct_size: 4
    variables:
      - { name: value, type: quaternion, offset: 0 }
"#;
        assert!(matches!(PipelineManifest::from_yaml(yaml), Err(ManifestError::Parse(_))));
    }

    #[test]
    fn test_validation() {
        let manifest = PipelineManifest::from_yaml(MANIFEST).unwrap();
        assert!(manifest.validate().is_ok());

        let mut empty_id = manifest.clone();
        empty_id.id.clear();
        assert_eq!(empty_id.validate(), Err(ManifestValidationError::EmptyId));

        let mut duplicate = manifest.clone();
        duplicate.programs[1].id = "simpleRayGen".to_string();
        assert_eq!(duplicate.validate(), Err(ManifestValidationError::DuplicateProgramId(1, "simpleRayGen".to_string())));

        let mut no_file = manifest;
        no_file.programs[0].file.clear();
        assert_eq!(no_file.validate(), Err(ManifestValidationError::EmptyFile(0)));
    }

    #[test]
    fn test_register_and_build() {
        let manifest = PipelineManifest::from_yaml(MANIFEST).unwrap();
        let mut context = software_context();

        let registered = manifest.register(&mut context, load_binary).unwrap();
        let ids: Vec<_> = registered.iter().map(|program| program.id.as_str()).collect();
        assert_eq!(ids, vec!["simpleRayGen", "background"]);
        assert_eq!(context.program_count().unwrap(), 2);

        let report = context.build_pipeline().unwrap();
        assert!(report.warnings.is_empty());
        context.destroy().unwrap();
    }

    #[test]
    fn test_failed_registration_rolls_back() {
        let mut manifest = PipelineManifest::from_yaml(MANIFEST).unwrap();
        manifest.programs[1].struct_size = 4;
        manifest.programs[1].variables = vec![VariableDecl::new("tooBig", VariableType::Double, 0)];

        let mut context = software_context();
        let err = manifest.register(&mut context, load_binary).unwrap_err();
        match err {
            ManifestError::Registration { program, source } => {
                assert_eq!(program, "background");
                assert!(matches!(source, vkrt::Error::Configuration(ConfigurationError::InvalidLayout(_))));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(context.program_count().unwrap(), 0);
    }

    #[test]
    fn test_failed_registration_invalidates_built_pipeline() {
        let mut context = software_context();
        let binary = load_binary("existing.wgsl").unwrap();
        context.create_ray_gen(&binary, 0, &[]).unwrap();
        let built = context.build_pipeline().unwrap().pipeline;

        let mut manifest = PipelineManifest::from_yaml(MANIFEST).unwrap();
        manifest.programs[1].struct_size = 4;
        manifest.programs[1].variables = vec![VariableDecl::new("tooBig", VariableType::Double, 0)];
        assert!(manifest.register(&mut context, load_binary).is_err());

        assert_eq!(context.program_count().unwrap(), 1);
        assert!(context.needs_rebuild().unwrap());
        assert!(context.pipeline(built).is_err());
        assert!(context.build_pipeline().unwrap().warnings.is_empty());
    }

    #[test]
    fn test_bundled_manifest() {
        let manifest = PipelineManifest::from_yaml(include_str!("../manifests/ray_gen_only.yaml")).unwrap();
        let mut context = software_context();

        let registered = manifest
            .register(&mut context, |file| {
                assert_eq!(file, "simple_ray_gen.wgsl");
                compile_wgsl(include_str!("../manifests/simple_ray_gen.wgsl")).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
            })
            .unwrap();
        assert_eq!(registered.len(), 1);

        let report = context.build_pipeline().unwrap();
        assert!(report.warnings.is_empty());
        let pipeline = context.pipeline(report.pipeline).unwrap();
        assert_eq!(pipeline.shader_binding_table().as_bytes().len(), 40);
    }

    #[test]
    fn test_bundled_shader_layout_matches_manifest() {
        let manifest = PipelineManifest::from_yaml(include_str!("../manifests/ray_gen_only.yaml")).unwrap();
        let module = naga::front::wgsl::parse_str(include_str!("../manifests/simple_ray_gen.wgsl")).unwrap();
        let (members, span) = module
            .types
            .iter()
            .find_map(|(_, ty)| match &ty.inner {
                naga::TypeInner::Struct { members, span } if ty.name.as_deref() == Some("RayGenData") => Some((members.clone(), *span)),
                _ => None,
            })
            .unwrap();

        let program = &manifest.programs[0];
        let offsets: Vec<_> = members.iter().map(|member| member.offset as usize).collect();
        let declared: Vec<_> = program.variables.iter().map(|decl| decl.offset()).collect();
        assert_eq!(offsets, declared);
        assert_eq!(span as usize, program.struct_size);
    }

    #[test]
    fn test_missing_shader_file() {
        let manifest = PipelineManifest::from_yaml(MANIFEST).unwrap();
        let mut context = software_context();

        let err = manifest
            .register(&mut context, |file| Err(std::io::Error::new(std::io::ErrorKind::NotFound, file.to_string())))
            .unwrap_err();
        assert!(matches!(err, ManifestError::Load { ref program, .. } if program == "simpleRayGen"));
        assert_eq!(context.program_count().unwrap(), 0);
    }
}
