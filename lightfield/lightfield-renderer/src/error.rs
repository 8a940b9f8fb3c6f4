//! Renderer error type.

/// Recoverable renderer failures. Contract violations (HZB dimension mismatch) stay assertions.
#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("frame size must be non-zero, got {width}x{height}")]
    ZeroSized { width: u32, height: u32 },

    #[error("no frame resources: {0}")]
    NoFrame(&'static str),

    #[error("probe count {requested} exceeds the device array-layer limit {limit}")]
    ProbeLimit { requested: u32, limit: u32 },

    #[error("surface error: {0}")]
    Surface(String),

    #[error("device error: {0}")]
    Device(String),

    #[error("pipeline creation failed (needs a Vulkan, Metal or DX12 backend): {0}")]
    Pipeline(String),
}

pub type RenderResult<T> = Result<T, RenderError>;

impl RenderError {
    pub fn surface(msg: impl Into<String>) -> Self {
        Self::Surface(msg.into())
    }

    pub fn device(msg: impl Into<String>) -> Self {
        Self::Device(msg.into())
    }
}

/// Result of a validation error scope popped after pipeline creation. The shaders load
/// depth textures directly, which the GL backend rejects here.
pub fn pipeline_status(error: Option<wgpu::Error>) -> RenderResult<()> {
    match error {
        None => Ok(()),
        Some(e) => Err(RenderError::Pipeline(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failure() {
        let e = RenderError::ProbeLimit { requested: 4096, limit: 2048 };
        assert_eq!(e.to_string(), "probe count 4096 exceeds the device array-layer limit 2048");
        let e = RenderError::ZeroSized { width: 0, height: 720 };
        assert!(e.to_string().contains("0x720"));
    }

    #[test]
    fn scope_errors_become_pipeline_errors() {
        assert!(pipeline_status(None).is_ok());
        let err = wgpu::Error::Validation {
            source: Box::new(std::io::Error::other("glsl")),
            description: "textureLoad from depth textures is not supported".into(),
        };
        let e = pipeline_status(Some(err)).unwrap_err();
        assert!(matches!(e, RenderError::Pipeline(_)));
        assert!(e.to_string().contains("Vulkan, Metal or DX12"));
    }
}
