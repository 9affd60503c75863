use std::sync::OnceLock;

#[cfg(target_os = "macos")]
use burn::backend::wgpu::{self, WgpuDevice, graphics::Metal};
#[cfg(not(target_os = "macos"))]
use burn::backend::wgpu::{self, WgpuDevice, graphics::Vulkan};
use tracing::warn;

/// Environment variable that overrides `trainer.backend`.
pub const BACKEND_ENV: &str = "AUDIONET_BACKEND";

pub type WgpuBackend = wgpu::Wgpu;
pub type CpuBackend = burn::backend::NdArray;
#[cfg(feature = "cuda")]
pub type CudaBackend = burn::backend::Cuda;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Wgpu,
    Cpu,
    #[cfg(feature = "cuda")]
    Cuda,
}

impl BackendKind {
    /// Map a backend name to a kind, falling back to WGPU for unknown names.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            #[cfg(feature = "cuda")]
            "cuda" => BackendKind::Cuda,
            #[cfg(not(feature = "cuda"))]
            "cuda" => {
                warn!("CUDA backend requested but the `cuda` feature is disabled, using WGPU.");
                BackendKind::Wgpu
            }
            "cpu" | "ndarray" => BackendKind::Cpu,
            "wgpu" | "vulkan" | "metal" | "" => BackendKind::Wgpu,
            other => {
                warn!("Unknown backend '{other}', defaulting to WGPU.");
                BackendKind::Wgpu
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Wgpu => "wgpu",
            BackendKind::Cpu => "cpu",
            #[cfg(feature = "cuda")]
            BackendKind::Cuda => "cuda",
        }
    }
}

/// The configured backend, unless [`BACKEND_ENV`] names another one.
pub fn resolve_backend(configured: &str) -> BackendKind {
    let requested = std::env::var(BACKEND_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty());
    BackendKind::parse(requested.as_deref().unwrap_or(configured))
}

/// Select the native graphics API for `device` once per process.
pub fn init_wgpu(device: &WgpuDevice) {
    static WGPU_INIT: OnceLock<()> = OnceLock::new();
    WGPU_INIT.get_or_init(|| {
        #[cfg(target_os = "macos")]
        wgpu::init_setup::<Metal>(device, Default::default());
        #[cfg(not(target_os = "macos"))]
        wgpu::init_setup::<Vulkan>(device, Default::default());
    });
}
