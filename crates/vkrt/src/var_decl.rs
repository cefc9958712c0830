//! Variable declaration tables
//!
//! A declaration table describes a host-defined parameter struct to the
//! pipeline without any reflection into the shader binary: every field is a
//! name, a semantic type and a byte offset. Tables are validated once, when a
//! program is registered, so layout mistakes surface at the call that made
//! them instead of at dispatch time.

use crate::error::{ConfigurationError, LayoutError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Semantic type of a declared variable
///
/// Each type has a fixed byte size on the device. `Raw` covers user-defined
/// types whose size the caller states explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableType {
    Int,
    Int2,
    Int3,
    Int4,
    UInt,
    UInt2,
    UInt3,
    UInt4,
    Long,
    Long2,
    Long3,
    Long4,
    ULong,
    ULong2,
    ULong3,
    ULong4,
    Float,
    Float2,
    Float3,
    Float4,
    Double,
    Double2,
    Double3,
    Double4,
    /// 64-bit device address of a buffer
    BufferPointer,
    /// Buffer descriptor record (index plus reserved word)
    Buffer,
    /// 64-bit acceleration structure address
    Accel,
    /// Bindless texture index
    Texture,
    /// Bindless sampler index
    Sampler,
    /// User-defined type of the given byte size
    Raw(u32),
}

/// Name table shared by parsing and formatting; `Raw` is handled separately
const TYPE_NAMES: &[(&str, VariableType)] = &[
    ("int", VariableType::Int),
    ("int2", VariableType::Int2),
    ("int3", VariableType::Int3),
    ("int4", VariableType::Int4),
    ("uint", VariableType::UInt),
    ("uint2", VariableType::UInt2),
    ("uint3", VariableType::UInt3),
    ("uint4", VariableType::UInt4),
    ("long", VariableType::Long),
    ("long2", VariableType::Long2),
    ("long3", VariableType::Long3),
    ("long4", VariableType::Long4),
    ("ulong", VariableType::ULong),
    ("ulong2", VariableType::ULong2),
    ("ulong3", VariableType::ULong3),
    ("ulong4", VariableType::ULong4),
    ("float", VariableType::Float),
    ("float2", VariableType::Float2),
    ("float3", VariableType::Float3),
    ("float4", VariableType::Float4),
    ("double", VariableType::Double),
    ("double2", VariableType::Double2),
    ("double3", VariableType::Double3),
    ("double4", VariableType::Double4),
    ("buffer_pointer", VariableType::BufferPointer),
    ("buffer", VariableType::Buffer),
    ("accel", VariableType::Accel),
    ("texture", VariableType::Texture),
    ("sampler", VariableType::Sampler),
];

impl VariableType {
    /// Size of this type in bytes
    pub fn size(&self) -> usize {
        use VariableType::*;
        match self {
            Int | UInt | Float | Texture | Sampler => 4,
            Int2 | UInt2 | Float2 => 8,
            Int3 | UInt3 | Float3 => 12,
            Int4 | UInt4 | Float4 => 16,
            Long | ULong | Double | BufferPointer | Buffer | Accel => 8,
            Long2 | ULong2 | Double2 => 16,
            Long3 | ULong3 | Double3 => 24,
            Long4 | ULong4 | Double4 => 32,
            Raw(size) => *size as usize,
        }
    }
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let VariableType::Raw(size) = self {
            return write!(f, "raw({size})");
        }
        let name = TYPE_NAMES.iter().find(|(_, ty)| ty == self).map(|(name, _)| *name).unwrap_or("unknown");
        f.write_str(name)
    }
}

/// Error returned when a variable type name cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableTypeParseError(String);

impl fmt::Display for VariableTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown variable type `{}`", self.0)
    }
}

impl std::error::Error for VariableTypeParseError {}

impl FromStr for VariableType {
    type Err = VariableTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();

        if let Some(size) = normalized.strip_prefix("raw(").and_then(|rest| rest.strip_suffix(')')) {
            let size = size.trim().parse::<u32>().map_err(|_| VariableTypeParseError(s.to_string()))?;
            return Ok(VariableType::Raw(size));
        }

        TYPE_NAMES
            .iter()
            .find(|(name, _)| *name == normalized)
            .map(|(_, ty)| *ty)
            .ok_or_else(|| VariableTypeParseError(s.to_string()))
    }
}

impl<'de> Deserialize<'de> for VariableType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl Serialize for VariableType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

/// One named, typed field of a parameter struct
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct VariableDecl {
    name: String,
    #[serde(rename = "type")]
    ty: VariableType,
    offset: usize,
}

impl VariableDecl {
    /// Declares `name` as a `ty` located `offset` bytes into the parameter struct
    pub fn new(name: impl Into<String>, ty: VariableType, offset: usize) -> Self {
        Self { name: name.into(), ty, offset }
    }

    /// Variable name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared type
    pub fn ty(&self) -> VariableType {
        self.ty
    }

    /// Byte offset inside the parameter struct
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Byte range covered by this variable, clamped at `usize::MAX`
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset.saturating_add(self.ty.size())
    }
}

/// Largest parameter struct a program may declare
///
/// Matches the 64 KiB uniform binding size every wgpu device supports, so a
/// record always fits in one binding.
pub const MAX_STRUCT_SIZE: usize = 64 * 1024;

/// Whether declarations may share bytes
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Overlap {
    /// Every byte belongs to at most one variable
    #[default]
    #[serde(rename = "forbid")]
    Forbid,
    /// Union semantics: variables may alias each other
    #[serde(rename = "allow")]
    Allow,
}

/// Result of a successful lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableBinding {
    /// Declared type
    pub ty: VariableType,
    /// Byte offset inside the parameter struct
    pub offset: usize,
}

/// A validated, ordered set of variable declarations for one parameter struct
#[derive(Debug, Clone)]
pub struct VariableDeclTable {
    struct_size: usize,
    overlap: Overlap,
    decls: Vec<VariableDecl>,
    index: HashMap<String, usize>,
}

impl VariableDeclTable {
    /// Validates `decls` against a struct of `struct_size` bytes
    ///
    /// # Arguments
    /// * `struct_size` - Size of the host parameter struct in bytes
    /// * `decls` - Declarations in their declared order
    /// * `overlap` - Whether byte ranges may alias
    ///
    /// # Returns
    /// The validated table, or the first layout problem found
    pub fn new(struct_size: usize, decls: impl Into<Vec<VariableDecl>>, overlap: Overlap) -> Result<Self, LayoutError> {
        if struct_size > MAX_STRUCT_SIZE {
            return Err(LayoutError::StructTooLarge {
                struct_size,
                max: MAX_STRUCT_SIZE,
            });
        }

        let decls = decls.into();
        let mut index = HashMap::with_capacity(decls.len());

        for (i, decl) in decls.iter().enumerate() {
            if decl.name.is_empty() {
                return Err(LayoutError::EmptyName { index: i });
            }

            if index.insert(decl.name.clone(), i).is_some() {
                return Err(LayoutError::DuplicateName { name: decl.name.clone() });
            }

            if decl.offset >= struct_size {
                return Err(LayoutError::OffsetOutOfRange {
                    name: decl.name.clone(),
                    offset: decl.offset,
                    struct_size,
                });
            }

            if decl.offset.checked_add(decl.ty.size()).is_none_or(|end| end > struct_size) {
                return Err(LayoutError::FieldOverrun {
                    name: decl.name.clone(),
                    offset: decl.offset,
                    size: decl.ty.size(),
                    struct_size,
                });
            }
        }

        if overlap == Overlap::Forbid {
            check_overlaps(&decls)?;
        }

        Ok(Self {
            struct_size,
            overlap,
            decls,
            index,
        })
    }

    /// Looks up a variable by name
    pub fn lookup(&self, name: &str) -> Result<VariableBinding, ConfigurationError> {
        self.index
            .get(name)
            .map(|&i| VariableBinding {
                ty: self.decls[i].ty,
                offset: self.decls[i].offset,
            })
            .ok_or_else(|| ConfigurationError::NotFound { name: name.to_string() })
    }

    /// Size of the described parameter struct in bytes
    pub fn struct_size(&self) -> usize {
        self.struct_size
    }

    /// Overlap policy this table was validated with
    pub fn overlap(&self) -> Overlap {
        self.overlap
    }

    /// Declarations in their declared order
    pub fn iter(&self) -> impl Iterator<Item = &VariableDecl> {
        self.decls.iter()
    }

    /// Number of declared variables
    pub fn len(&self) -> usize {
        self.decls.len()
    }

    /// Returns true if no variables are declared
    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }
}

/// Reports the first pair of declarations whose byte ranges intersect
fn check_overlaps(decls: &[VariableDecl]) -> Result<(), LayoutError> {
    let mut order: Vec<usize> = (0..decls.len()).filter(|&i| decls[i].ty.size() > 0).collect();
    order.sort_by_key(|&i| (decls[i].offset, i));

    // Index of the declaration reaching furthest among those already visited
    let mut furthest: Option<usize> = None;
    for &i in &order {
        if let Some(prev) = furthest {
            if decls[i].offset < decls[prev].range().end {
                let (first, second) = if prev < i { (prev, i) } else { (i, prev) };
                return Err(LayoutError::Overlap {
                    first: decls[first].name.clone(),
                    second: decls[second].name.clone(),
                });
            }
        }
        if furthest.is_none_or(|prev| decls[i].range().end > decls[prev].range().end) {
            furthest = Some(i);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ray_gen_decls() -> Vec<VariableDecl> {
        vec![
            VariableDecl::new("fbPtr", VariableType::BufferPointer, 0),
            VariableDecl::new("fbSize", VariableType::Int2, 8),
            VariableDecl::new("color0", VariableType::Float3, 16),
            VariableDecl::new("color1", VariableType::Float3, 28),
        ]
    }

    #[test]
    fn test_lookup_returns_declared_binding() {
        let table = VariableDeclTable::new(40, ray_gen_decls(), Overlap::Forbid).unwrap();
        assert_eq!(table.len(), 4);

        for decl in ray_gen_decls() {
            let binding = table.lookup(decl.name()).unwrap();
            assert_eq!(binding.ty, decl.ty());
            assert_eq!(binding.offset, decl.offset());
        }

        let names: Vec<_> = table.iter().map(|decl| decl.name()).collect();
        assert_eq!(names, ["fbPtr", "fbSize", "color0", "color1"]);
    }

    #[test]
    fn test_lookup_unknown_name() {
        let table = VariableDeclTable::new(40, ray_gen_decls(), Overlap::Forbid).unwrap();
        assert_eq!(table.lookup("color2"), Err(ConfigurationError::NotFound { name: "color2".to_string() }));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut decls = ray_gen_decls();
        decls.push(VariableDecl::new("color0", VariableType::Float, 36));
        let err = VariableDeclTable::new(40, decls, Overlap::Allow).unwrap_err();
        assert_eq!(err, LayoutError::DuplicateName { name: "color0".to_string() });
    }

    #[test]
    fn test_empty_name_rejected() {
        let decls = vec![VariableDecl::new("", VariableType::Int, 0)];
        assert_eq!(VariableDeclTable::new(4, decls, Overlap::Forbid).unwrap_err(), LayoutError::EmptyName { index: 0 });
    }

    #[test]
    fn test_offset_out_of_range() {
        let decls = vec![VariableDecl::new("x", VariableType::Float, 40)];
        assert!(matches!(VariableDeclTable::new(40, decls, Overlap::Forbid), Err(LayoutError::OffsetOutOfRange { offset: 40, .. })));
    }

    #[test]
    fn test_field_overrun() {
        // color1 moved so its last four bytes fall past the end of the struct
        let decls = vec![VariableDecl::new("color1", VariableType::Float3, 32)];
        assert!(matches!(VariableDeclTable::new(40, decls, Overlap::Forbid), Err(LayoutError::FieldOverrun { size: 12, .. })));
    }

    #[test]
    fn test_raw_field_overrun_near_usize_max() {
        let decls = vec![VariableDecl::new("tail", VariableType::Raw(u32::MAX), MAX_STRUCT_SIZE - 1)];
        assert!(matches!(
            VariableDeclTable::new(MAX_STRUCT_SIZE, decls, Overlap::Forbid),
            Err(LayoutError::FieldOverrun { offset, .. }) if offset == MAX_STRUCT_SIZE - 1
        ));

        let decl = VariableDecl::new("edge", VariableType::Float, usize::MAX - 1);
        assert_eq!(decl.range().end, usize::MAX);
    }

    #[test]
    fn test_struct_size_limit() {
        assert!(VariableDeclTable::new(MAX_STRUCT_SIZE, Vec::new(), Overlap::Forbid).is_ok());

        let decls = vec![VariableDecl::new("x", VariableType::Float, usize::MAX - 1)];
        assert_eq!(
            VariableDeclTable::new(usize::MAX, decls, Overlap::Forbid).unwrap_err(),
            LayoutError::StructTooLarge {
                struct_size: usize::MAX,
                max: MAX_STRUCT_SIZE,
            }
        );
    }

    #[test]
    fn test_overlap_forbidden_by_default() {
        let decls = vec![
            VariableDecl::new("a", VariableType::Float4, 0),
            VariableDecl::new("b", VariableType::Float4, 16),
            VariableDecl::new("c", VariableType::Int, 12),
        ];
        let err = VariableDeclTable::new(32, decls, Overlap::Forbid).unwrap_err();
        assert_eq!(
            err,
            LayoutError::Overlap {
                first: "a".to_string(),
                second: "c".to_string()
            }
        );
    }

    #[test]
    fn test_overlap_allowed_for_unions() {
        let decls = vec![
            VariableDecl::new("as_float", VariableType::Float, 0),
            VariableDecl::new("as_int", VariableType::Int, 0),
        ];
        let table = VariableDeclTable::new(4, decls, Overlap::Allow).unwrap();
        assert_eq!(table.lookup("as_int").unwrap().offset, 0);
        assert_eq!(table.overlap(), Overlap::Allow);
    }

    #[test]
    fn test_nested_field_overlaps() {
        let decls = vec![
            VariableDecl::new("wide", VariableType::Double4, 0),
            VariableDecl::new("inner", VariableType::Int, 8),
        ];
        assert!(matches!(VariableDeclTable::new(32, decls, Overlap::Forbid), Err(LayoutError::Overlap { .. })));
    }

    #[test]
    fn test_adjacent_fields_do_not_overlap() {
        let decls = vec![
            VariableDecl::new("tail", VariableType::Int, 32),
            VariableDecl::new("wide", VariableType::Double4, 0),
        ];
        assert!(VariableDeclTable::new(36, decls, Overlap::Forbid).is_ok());
    }

    #[test]
    fn test_variable_type_parsing() {
        assert_eq!("float3".parse::<VariableType>().unwrap(), VariableType::Float3);
        assert_eq!("BUFFER_POINTER".parse::<VariableType>().unwrap(), VariableType::BufferPointer);
        assert_eq!("raw(24)".parse::<VariableType>().unwrap(), VariableType::Raw(24));
        assert!("float5".parse::<VariableType>().is_err());
        assert!("raw(x)".parse::<VariableType>().is_err());

        assert_eq!(VariableType::Int2.to_string(), "int2");
        assert_eq!(VariableType::Raw(24).to_string(), "raw(24)");
    }

    #[test]
    fn test_variable_type_sizes() {
        assert_eq!(VariableType::BufferPointer.size(), 8);
        assert_eq!(VariableType::Int2.size(), 8);
        assert_eq!(VariableType::Float3.size(), 12);
        assert_eq!(VariableType::Double4.size(), 32);
        assert_eq!(VariableType::Raw(7).size(), 7);
    }
}
