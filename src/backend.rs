use burn::backend::Autodiff;

// 后端按 feature 选择，优先级: cuda > wgpu > ndarray (默认 CPU，测试也跑在这里)

#[cfg(all(feature = "ndarray", not(feature = "wgpu"), not(feature = "cuda")))]
mod ndarray_backend {
    use super::*;
    use burn::backend::ndarray::{NdArray, NdArrayDevice};

    pub type MyBackend = NdArray<f32>;
    pub type MyAutodiffBackend = Autodiff<MyBackend>;
    pub type MyDevice = NdArrayDevice;

    pub fn get_device() -> MyDevice {
        NdArrayDevice::Cpu
    }
}

#[cfg(all(feature = "wgpu", not(feature = "cuda")))]
mod wgpu_backend {
    use super::*;
    use burn_wgpu::{Wgpu, WgpuDevice};

    pub type MyBackend = Wgpu;
    pub type MyAutodiffBackend = Autodiff<Wgpu>;
    pub type MyDevice = WgpuDevice;

    pub fn get_device() -> MyDevice {
        WgpuDevice::default()
    }
}

#[cfg(feature = "cuda")]
mod cuda_backend {
    use super::*;
    use burn_tch::{LibTorch, LibTorchDevice};

    pub type MyBackend = LibTorch;
    pub type MyAutodiffBackend = Autodiff<LibTorch>;
    pub type MyDevice = LibTorchDevice;

    pub fn get_device() -> MyDevice {
        LibTorchDevice::Cuda(0)
    }
}

#[cfg(all(feature = "ndarray", not(feature = "wgpu"), not(feature = "cuda")))]
pub use ndarray_backend::*;

#[cfg(all(feature = "wgpu", not(feature = "cuda")))]
pub use wgpu_backend::*;

#[cfg(feature = "cuda")]
pub use cuda_backend::*;
