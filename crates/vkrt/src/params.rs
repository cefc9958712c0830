//! Parameter records
//!
//! A parameter record is the host-side byte image of a program's parameter
//! struct. Writes go through the program's declaration table, so a value can
//! only land at a declared offset and only with the declared type.

use crate::{VariableDeclTable, VariableType, error::ConfigurationError};
use bytemuck::{Pod, Zeroable};

/// A host value that can be written into a declared variable
pub trait VariableValue: Pod {
    /// Declared type this value matches
    const TYPE: VariableType;
}

macro_rules! impl_variable_value {
    ($($ty:ty => $var:ident),* $(,)?) => {
        $(impl VariableValue for $ty {
            const TYPE: VariableType = VariableType::$var;
        })*
    };
}

impl_variable_value! {
    i32 => Int, [i32; 2] => Int2, [i32; 3] => Int3, [i32; 4] => Int4,
    u32 => UInt, [u32; 2] => UInt2, [u32; 3] => UInt3, [u32; 4] => UInt4,
    i64 => Long, [i64; 2] => Long2, [i64; 3] => Long3, [i64; 4] => Long4,
    u64 => ULong, [u64; 2] => ULong2, [u64; 3] => ULong3, [u64; 4] => ULong4,
    f32 => Float, [f32; 2] => Float2, [f32; 3] => Float3, [f32; 4] => Float4,
    f64 => Double, [f64; 2] => Double2, [f64; 3] => Double3, [f64; 4] => Double4,
    DeviceAddress => BufferPointer,
    BufferRef => Buffer,
    AccelRef => Accel,
    TextureRef => Texture,
    SamplerRef => Sampler,
}

/// 64-bit device address of a buffer
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct DeviceAddress(pub u64);

/// Buffer descriptor as seen by device code
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct BufferRef {
    /// Bindless buffer index
    pub index: u32,
    /// Reserved, must be zero
    pub temp: u32,
}

/// 64-bit acceleration structure address
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct AccelRef(pub u64);

/// Bindless texture index
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct TextureRef(pub u32);

/// Bindless sampler index
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct SamplerRef(pub u32);

/// Byte image of one program's parameter struct, zero-initialized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterRecord {
    bytes: Vec<u8>,
}

impl ParameterRecord {
    /// Creates a zeroed record of `size` bytes
    pub fn zeroed(size: usize) -> Self {
        Self { bytes: vec![0; size] }
    }

    /// Writes a typed value into the variable `name`
    ///
    /// # Arguments
    /// * `layout` - Declaration table describing this record
    /// * `name` - Declared variable name
    /// * `value` - Value whose type must match the declaration
    pub fn set<V: VariableValue>(&mut self, layout: &VariableDeclTable, name: &str, value: V) -> Result<(), ConfigurationError> {
        let binding = layout.lookup(name)?;
        if binding.ty != V::TYPE {
            return Err(ConfigurationError::TypeMismatch {
                name: name.to_string(),
                declared: binding.ty,
                provided: V::TYPE,
            });
        }
        self.bytes[binding.offset..binding.offset + binding.ty.size()].copy_from_slice(bytemuck::bytes_of(&value));
        Ok(())
    }

    /// Writes raw bytes into the variable `name`; the length must equal the declared size
    pub fn set_raw(&mut self, layout: &VariableDeclTable, name: &str, data: &[u8]) -> Result<(), ConfigurationError> {
        let binding = layout.lookup(name)?;
        let expected = binding.ty.size();
        if data.len() != expected {
            return Err(ConfigurationError::SizeMismatch {
                name: name.to_string(),
                expected,
                provided: data.len(),
            });
        }
        self.bytes[binding.offset..binding.offset + expected].copy_from_slice(data);
        Ok(())
    }

    /// Overwrites the whole record with a host struct of exactly the record's size
    pub fn write_struct<T: Pod>(&mut self, value: &T) -> Result<(), ConfigurationError> {
        let data = bytemuck::bytes_of(value);
        if data.len() != self.bytes.len() {
            return Err(ConfigurationError::SizeMismatch {
                name: std::any::type_name::<T>().to_string(),
                expected: self.bytes.len(),
                provided: data.len(),
            });
        }
        self.bytes.copy_from_slice(data);
        Ok(())
    }

    /// Reads back the bytes of variable `name`
    pub fn get_raw(&self, layout: &VariableDeclTable, name: &str) -> Result<&[u8], ConfigurationError> {
        let binding = layout.lookup(name)?;
        Ok(&self.bytes[binding.offset..binding.offset + binding.ty.size()])
    }

    /// The full record
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Overlap, VariableDecl};

    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    struct RayGenData {
        fb_ptr: u64,
        fb_size: [i32; 2],
        color0: [f32; 3],
        color1: [f32; 3],
    }

    fn layout() -> VariableDeclTable {
        VariableDeclTable::new(
            size_of::<RayGenData>(),
            vec![
                VariableDecl::new("fbPtr", VariableType::BufferPointer, std::mem::offset_of!(RayGenData, fb_ptr)),
                VariableDecl::new("fbSize", VariableType::Int2, std::mem::offset_of!(RayGenData, fb_size)),
                VariableDecl::new("color0", VariableType::Float3, std::mem::offset_of!(RayGenData, color0)),
                VariableDecl::new("color1", VariableType::Float3, std::mem::offset_of!(RayGenData, color1)),
            ],
            Overlap::Forbid,
        )
        .unwrap()
    }

    #[test]
    fn test_typed_writes_land_at_declared_offsets() {
        let layout = layout();
        let mut record = ParameterRecord::zeroed(layout.struct_size());

        record.set(&layout, "fbPtr", DeviceAddress(0xdead_beef)).unwrap();
        record.set(&layout, "fbSize", [800i32, 600]).unwrap();
        record.set(&layout, "color0", [0.8f32, 0.0, 0.0]).unwrap();
        record.set(&layout, "color1", [0.8f32, 0.8, 0.8]).unwrap();

        let data: RayGenData = bytemuck::pod_read_unaligned(record.as_bytes());
        assert_eq!(data.fb_ptr, 0xdead_beef);
        assert_eq!(data.fb_size, [800, 600]);
        assert_eq!(data.color0, [0.8, 0.0, 0.0]);
        assert_eq!(data.color1, [0.8, 0.8, 0.8]);
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let layout = layout();
        let mut record = ParameterRecord::zeroed(layout.struct_size());

        let err = record.set(&layout, "fbSize", [1.0f32, 2.0]).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::TypeMismatch {
                name: "fbSize".to_string(),
                declared: VariableType::Int2,
                provided: VariableType::Float2,
            }
        );
        assert!(record.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_raw_writes_check_size() {
        let layout = layout();
        let mut record = ParameterRecord::zeroed(layout.struct_size());

        assert!(matches!(record.set_raw(&layout, "fbSize", &[0; 4]), Err(ConfigurationError::SizeMismatch { expected: 8, .. })));
        record.set_raw(&layout, "fbSize", &[1; 8]).unwrap();
        assert_eq!(record.get_raw(&layout, "fbSize").unwrap(), &[1; 8]);
        assert!(matches!(record.set_raw(&layout, "missing", &[0; 4]), Err(ConfigurationError::NotFound { .. })));
    }

    #[test]
    fn test_write_struct() {
        let layout = layout();
        let mut record = ParameterRecord::zeroed(layout.struct_size());
        let data = RayGenData {
            fb_ptr: 7,
            fb_size: [2, 3],
            color0: [1.0; 3],
            color1: [0.5; 3],
        };

        record.write_struct(&data).unwrap();
        assert_eq!(record.get_raw(&layout, "fbPtr").unwrap(), &7u64.to_ne_bytes());
        assert!(record.write_struct(&0u32).is_err());
    }
}
