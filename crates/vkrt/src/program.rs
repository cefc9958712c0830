//! Program registry
//!
//! Programs are stored in an append-only arena owned by their context. A
//! handle is the pair (context id, slot index); slots are never reused, so a
//! released handle stays recognisable and a second release is reported instead
//! of silently touching whatever took its place.

use crate::{
    Overlap, ParameterRecord, ShaderBinary, VariableDecl, VariableDeclTable,
    error::{Error, LifecycleError, ResourceError},
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline stage a program is compiled for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramKind {
    /// Entry point that originates rays, one invocation per launch element
    RayGen,
    /// Runs when a ray hits nothing
    Miss,
    /// Closest-hit (and intersection) shading for a geometry type
    HitGroup,
    /// Plain compute kernel sharing the pipeline's binding model
    Compute,
}

impl ProgramKind {
    /// Returns the human-readable name of this kind
    pub fn name(&self) -> &'static str {
        match self {
            ProgramKind::RayGen => "ray generation",
            ProgramKind::Miss => "miss",
            ProgramKind::HitGroup => "hit group",
            ProgramKind::Compute => "compute",
        }
    }
}

/// Opaque, stable identifier of a registered program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle {
    pub(crate) context: u32,
    pub(crate) index: u32,
}

impl fmt::Display for ProgramHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "program #{} of context #{}", self.index, self.context)
    }
}

/// Everything needed to register a program
#[derive(Debug, Clone)]
pub struct ProgramDesc<'a> {
    /// Pipeline stage
    pub kind: ProgramKind,
    /// Shader module binary, copied at registration
    pub binary: &'a [u8],
    /// Entry point name inside the binary
    pub entry_point: &'a str,
    /// Size of the host parameter struct in bytes
    pub struct_size: usize,
    /// Declarations describing the parameter struct
    pub variables: &'a [VariableDecl],
    /// Whether declarations may alias each other
    pub overlap: Overlap,
}

impl<'a> ProgramDesc<'a> {
    /// Entry point used when none is given
    pub const DEFAULT_ENTRY_POINT: &'static str = "main";

    /// Describes a program of `kind` with the default entry point and no aliasing
    pub fn new(kind: ProgramKind, binary: &'a [u8], struct_size: usize, variables: &'a [VariableDecl]) -> Self {
        Self {
            kind,
            binary,
            entry_point: Self::DEFAULT_ENTRY_POINT,
            struct_size,
            variables,
            overlap: Overlap::Forbid,
        }
    }

    /// Describes a ray generation program
    pub fn ray_gen(binary: &'a [u8], struct_size: usize, variables: &'a [VariableDecl]) -> Self {
        Self::new(ProgramKind::RayGen, binary, struct_size, variables)
    }

    /// Selects a different entry point
    pub fn with_entry_point(mut self, entry_point: &'a str) -> Self {
        self.entry_point = entry_point;
        self
    }

    /// Selects the overlap policy for the declarations
    pub fn with_overlap(mut self, overlap: Overlap) -> Self {
        self.overlap = overlap;
        self
    }
}

/// A registered program: binary, layout and current parameter values
#[derive(Debug, Clone)]
pub struct Program {
    kind: ProgramKind,
    entry_point: String,
    binary: ShaderBinary,
    layout: VariableDeclTable,
    parameters: ParameterRecord,
}

impl Program {
    /// Validates `desc` and takes a copy of its binary and layout
    pub fn new(desc: &ProgramDesc<'_>) -> Result<Self, Error> {
        let binary = ShaderBinary::copy_from_slice(desc.binary)?;
        let layout = VariableDeclTable::new(desc.struct_size, desc.variables, desc.overlap)?;

        Ok(Self {
            kind: desc.kind,
            entry_point: desc.entry_point.to_string(),
            binary,
            parameters: ParameterRecord::zeroed(layout.struct_size()),
            layout,
        })
    }

    pub fn kind(&self) -> ProgramKind {
        self.kind
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn binary(&self) -> &ShaderBinary {
        &self.binary
    }

    /// Validated declaration table of the parameter struct
    pub fn layout(&self) -> &VariableDeclTable {
        &self.layout
    }

    /// Current parameter values
    pub fn parameters(&self) -> &ParameterRecord {
        &self.parameters
    }

    pub(crate) fn layout_and_parameters_mut(&mut self) -> (&VariableDeclTable, &mut ParameterRecord) {
        (&self.layout, &mut self.parameters)
    }
}

#[derive(Debug)]
enum Slot {
    Live(Program),
    Released,
}

/// Arena of programs registered with one context
#[derive(Debug)]
pub(crate) struct ProgramRegistry {
    context: u32,
    slots: Vec<Slot>,
}

impl ProgramRegistry {
    pub fn new(context: u32) -> Self {
        Self { context, slots: Vec::new() }
    }

    /// Validates and stores a program, returning its handle
    pub fn register(&mut self, desc: &ProgramDesc<'_>) -> Result<ProgramHandle, Error> {
        let index = slot_index(self.slots.len())?;
        let program = Program::new(desc)?;
        let handle = ProgramHandle { context: self.context, index };
        self.slots.push(Slot::Live(program));
        Ok(handle)
    }

    /// Releases a program; releasing the same handle twice is an error
    pub fn release(&mut self, handle: ProgramHandle) -> Result<Program, LifecycleError> {
        let slot = self.slot_mut(handle)?;
        match std::mem::replace(slot, Slot::Released) {
            Slot::Live(program) => Ok(program),
            Slot::Released => Err(LifecycleError::DoubleRelease(handle)),
        }
    }

    pub fn get(&self, handle: ProgramHandle) -> Result<&Program, LifecycleError> {
        if handle.context != self.context {
            return Err(LifecycleError::ForeignHandle(handle));
        }
        match self.slots.get(handle.index as usize) {
            Some(Slot::Live(program)) => Ok(program),
            Some(Slot::Released) => Err(LifecycleError::DoubleRelease(handle)),
            None => Err(LifecycleError::ForeignHandle(handle)),
        }
    }

    pub fn get_mut(&mut self, handle: ProgramHandle) -> Result<&mut Program, LifecycleError> {
        match self.slot_mut(handle)? {
            Slot::Live(program) => Ok(program),
            Slot::Released => Err(LifecycleError::DoubleRelease(handle)),
        }
    }

    /// Live programs in registration order
    pub fn iter(&self) -> impl Iterator<Item = (ProgramHandle, &Program)> {
        let context = self.context;
        // `register` keeps every slot index within u32
        self.slots.iter().enumerate().filter_map(move |(index, slot)| match slot {
            Slot::Live(program) => Some((ProgramHandle { context, index: index as u32 }, program)),
            Slot::Released => None,
        })
    }

    /// Number of live programs
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Releases every live program, returning how many were released
    pub fn release_all(&mut self) -> usize {
        let mut released = 0;
        for slot in &mut self.slots {
            if let Slot::Live(_) = std::mem::replace(slot, Slot::Released) {
                released += 1;
            }
        }
        released
    }

    fn slot_mut(&mut self, handle: ProgramHandle) -> Result<&mut Slot, LifecycleError> {
        if handle.context != self.context {
            return Err(LifecycleError::ForeignHandle(handle));
        }
        self.slots.get_mut(handle.index as usize).ok_or(LifecycleError::ForeignHandle(handle))
    }
}

/// Index the next registered slot will get; slots are never reused, so at most 2^32 programs exist per context
fn slot_index(registered: usize) -> Result<u32, ResourceError> {
    u32::try_from(registered).map_err(|_| ResourceError::TooManyPrograms { registered })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        VariableType,
        error::{ConfigurationError, LayoutError, ResourceError},
    };

    const BINARY: &[u8] = &[0x03, 0x02, 0x23, 0x07];

    fn decls() -> Vec<VariableDecl> {
        vec![VariableDecl::new("color", VariableType::Float3, 0)]
    }

    #[test]
    fn test_register_and_release() {
        let mut registry = ProgramRegistry::new(1);
        let decls = decls();
        let handle = registry.register(&ProgramDesc::ray_gen(BINARY, 12, &decls)).unwrap();

        let program = registry.get(handle).unwrap();
        assert_eq!(program.kind(), ProgramKind::RayGen);
        assert_eq!(program.entry_point(), "main");
        assert_eq!(program.binary().as_bytes(), BINARY);
        assert_eq!(program.parameters().as_bytes().len(), 12);
        assert_eq!(registry.len(), 1);

        registry.release(handle).unwrap();
        assert_eq!(registry.len(), 0);
        assert_eq!(registry.release(handle).unwrap_err(), LifecycleError::DoubleRelease(handle));
        assert!(registry.get(handle).is_err());
    }

    #[test]
    fn test_handles_are_not_reused() {
        let mut registry = ProgramRegistry::new(1);
        let first = registry.register(&ProgramDesc::new(ProgramKind::Miss, BINARY, 0, &[])).unwrap();
        registry.release(first).unwrap();
        let second = registry.register(&ProgramDesc::new(ProgramKind::Miss, BINARY, 0, &[])).unwrap();

        assert_ne!(first, second);
        assert_eq!(registry.iter().map(|(handle, _)| handle).collect::<Vec<_>>(), vec![second]);
    }

    #[test]
    fn test_foreign_handle() {
        let mut a = ProgramRegistry::new(1);
        let b = ProgramRegistry::new(2);
        let handle = a.register(&ProgramDesc::ray_gen(BINARY, 0, &[])).unwrap();
        assert_eq!(b.get(handle).unwrap_err(), LifecycleError::ForeignHandle(handle));
    }

    #[test]
    fn test_empty_binary() {
        let mut registry = ProgramRegistry::new(1);
        let err = registry.register(&ProgramDesc::ray_gen(&[], 0, &[])).unwrap_err();
        assert!(matches!(err, Error::Resource(ResourceError::InvalidBinary)));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_invalid_layout() {
        let mut registry = ProgramRegistry::new(1);
        let decls = vec![
            VariableDecl::new("color", VariableType::Float3, 0),
            VariableDecl::new("color", VariableType::Float3, 12),
        ];
        let err = registry.register(&ProgramDesc::ray_gen(BINARY, 24, &decls)).unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::InvalidLayout(LayoutError::DuplicateName { .. }))
        ));
    }

    #[test]
    fn test_oversized_struct_rejected_before_allocation() {
        let mut registry = ProgramRegistry::new(1);
        let err = registry.register(&ProgramDesc::ray_gen(BINARY, usize::MAX, &[])).unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::InvalidLayout(LayoutError::StructTooLarge { struct_size: usize::MAX, .. }))
        ));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_slot_index_limit() {
        assert_eq!(slot_index(0).unwrap(), 0);
        assert_eq!(slot_index(u32::MAX as usize).unwrap(), u32::MAX);
        assert!(matches!(slot_index(u32::MAX as usize + 1), Err(ResourceError::TooManyPrograms { .. })));
    }

    #[test]
    fn test_release_all() {
        let mut registry = ProgramRegistry::new(1);
        for _ in 0..3 {
            registry.register(&ProgramDesc::new(ProgramKind::Compute, BINARY, 0, &[])).unwrap();
        }
        assert_eq!(registry.release_all(), 3);
        assert_eq!(registry.release_all(), 0);
    }
}
