//! Shader binaries
//!
//! Programs own their binary as an opaque, reference-counted byte buffer. The
//! core never looks inside it; devices decide at build time whether they can
//! compile it.

use crate::error::ResourceError;
use bytes::Bytes;

/// An owned shader module binary (SPIR-V for the provided devices)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderBinary(Bytes);

impl ShaderBinary {
    /// Takes ownership of `data`, rejecting empty binaries
    pub fn new(data: impl Into<Bytes>) -> Result<Self, ResourceError> {
        let data = data.into();
        if data.is_empty() {
            return Err(ResourceError::InvalidBinary);
        }
        Ok(Self(data))
    }

    /// Copies a borrowed binary
    pub fn copy_from_slice(data: &[u8]) -> Result<Self, ResourceError> {
        Self::new(Bytes::copy_from_slice(data))
    }

    /// Binary contents
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Binary length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false for a constructed binary
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Translates WGSL source into a SPIR-V binary
///
/// Hosts without a shader toolchain can author programs in WGSL and hand the
/// result to [`crate::Context::create_program`]. Compute entry points stand in
/// for ray tracing stages.
pub fn compile_wgsl(source: &str) -> Result<Vec<u8>, ResourceError> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| ResourceError::Shader(e.emit_to_string(source)))?;

    let info = naga::valid::Validator::new(naga::valid::ValidationFlags::all(), naga::valid::Capabilities::all())
        .validate(&module)
        .map_err(|e| ResourceError::Shader(e.to_string()))?;

    let words = naga::back::spv::write_vec(&module, &info, &naga::back::spv::Options::default(), None).map_err(|e| ResourceError::Shader(e.to_string()))?;

    Ok(bytemuck::cast_slice(&words).to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn test_empty_binary_rejected() {
        assert!(matches!(ShaderBinary::new(Vec::new()), Err(ResourceError::InvalidBinary)));
        assert!(matches!(ShaderBinary::copy_from_slice(&[]), Err(ResourceError::InvalidBinary)));
        assert_eq!(ShaderBinary::copy_from_slice(&[1, 2, 3, 4]).unwrap().len(), 4);
    }

    #[test]
    fn test_compile_wgsl() {
        let spirv = compile_wgsl("@compute @workgroup_size(1) fn main() {}").unwrap();
        assert_eq!(spirv.len() % 4, 0);
        assert_eq!(u32::from_le_bytes([spirv[0], spirv[1], spirv[2], spirv[3]]), SPIRV_MAGIC);
    }

    #[test]
    fn test_compile_wgsl_reports_errors() {
        assert!(matches!(compile_wgsl("fn main( {"), Err(ResourceError::Shader(_))));
    }
}
