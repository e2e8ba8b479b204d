//! CUDA device using cudarc 0.17.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use cudarc::driver::sys::{CUdevice_attribute, CUfunction_attribute};
use cudarc::driver::{
    CudaContext, CudaFunction, CudaModule, CudaSlice, CudaStream, LaunchConfig, PushKernelArg,
};
use cudarc::nvrtc::{CompileOptions, compile_ptx_with_opts};
use smax_common::{DType, DeviceCapabilities, Element, KernelError, Matrix, Result};

use crate::device::{SoftmaxDevice, check_launch_args};
use crate::footprint::KernelFootprint;
use crate::kernel::KernelSpec;
use crate::planner::{LaunchPlan, check_capabilities};

const KERNEL_SOURCE: &str = include_str!("kernels/row_softmax.cu");
const KERNEL_NAME: &str = "row_softmax";

/// One compiled kernel variant.
struct CompiledKernel {
    _module: Arc<CudaModule>,
    function: CudaFunction,
    footprint: KernelFootprint,
}

/// A CUDA accelerator.
///
/// Capabilities are read from the driver once at construction. Kernel
/// variants are compiled on first introspection and kept for the lifetime of
/// the device.
pub struct CudaDevice {
    ordinal: usize,
    name: String,
    ctx: Arc<CudaContext>,
    stream: Arc<CudaStream>,
    caps: DeviceCapabilities,
    kernels: Mutex<HashMap<KernelSpec, Arc<CompiledKernel>>>,
}

impl std::fmt::Debug for CudaDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CudaDevice")
            .field("ordinal", &self.ordinal)
            .field("caps", &self.caps)
            .finish_non_exhaustive()
    }
}

impl CudaDevice {
    /// Open device `ordinal`.
    pub fn new(ordinal: usize) -> Result<Self> {
        log::info!("Initializing CUDA softmax device {}", ordinal);
        let ctx = CudaContext::new(ordinal).map_err(|e| {
            log::warn!("failed to create CUDA context {ordinal}: {e:?}");
            KernelError::NoDevice
        })?;
        let stream = ctx.default_stream();
        let caps = query_capabilities(&ctx);
        let name = format!("cuda:{ordinal}");
        check_capabilities(&name, &caps)?;

        log::info!("{}: {}", name, caps.summary());
        Ok(Self { ordinal, name, ctx, stream, caps, kernels: Mutex::new(HashMap::new()) })
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// Number of kernel variants compiled so far.
    pub fn compiled_variants(&self) -> usize {
        self.kernels.lock().map(|k| k.len()).unwrap_or(0)
    }

    fn compiled(&self, spec: &KernelSpec) -> Result<Arc<CompiledKernel>> {
        let mut kernels = self
            .kernels
            .lock()
            .map_err(|_| KernelError::device("kernel cache lock poisoned"))?;
        if let Some(kernel) = kernels.get(spec) {
            return Ok(Arc::clone(kernel));
        }
        let kernel = Arc::new(self.compile(spec)?);
        kernels.insert(*spec, Arc::clone(&kernel));
        Ok(kernel)
    }

    fn compile(&self, spec: &KernelSpec) -> Result<CompiledKernel> {
        log::debug!("{}: compiling {:?}", self.name, spec);
        let opts = CompileOptions { options: defines(spec, self.caps.warp_size), ..Default::default() };
        let ptx = compile_ptx_with_opts(KERNEL_SOURCE, opts)
            .map_err(|e| KernelError::device(format!("NVRTC compile failed for {spec:?}: {e:?}")))?;

        let module = self
            .ctx
            .load_module(ptx)
            .map_err(|e| KernelError::device(format!("failed to load CUDA module: {e:?}")))?;
        let function = module
            .load_function(KERNEL_NAME)
            .map_err(|e| KernelError::device(format!("failed to load {KERNEL_NAME}: {e:?}")))?;

        let registers = function_attribute(&function, CUfunction_attribute::CU_FUNC_ATTRIBUTE_NUM_REGS)?;
        let shared = function_attribute(
            &function,
            CUfunction_attribute::CU_FUNC_ATTRIBUTE_SHARED_SIZE_BYTES,
        )?;
        let footprint = KernelFootprint::new(registers, shared);
        log::debug!("{}: {:?} compiled, {}", self.name, spec, footprint);

        Ok(CompiledKernel { _module: module, function, footprint })
    }
}

/// NVRTC options specializing the kernel source for `spec`.
fn defines(spec: &KernelSpec, warp_size: u32) -> Vec<String> {
    let (neg_inf, exp) = match spec.dtype {
        DType::F32 => ("(__int_as_float(0xff800000))", "expf"),
        DType::F64 => ("(__longlong_as_double(0xfff0000000000000ULL))", "exp"),
    };
    vec![
        format!("-DT={}", spec.dtype.cuda_type()),
        format!("-DBLOCK_SIZE={}", spec.block_size),
        format!("-DNUM_WARPS={}", spec.num_warps),
        format!("-DNUM_STAGES={}", spec.num_stages),
        format!("-DWARP_SIZE={warp_size}"),
        format!("-DNEG_INF={neg_inf}"),
        format!("-DEXP={exp}"),
    ]
}

fn function_attribute(function: &CudaFunction, attribute: CUfunction_attribute) -> Result<u32> {
    let value = function
        .get_attribute(attribute)
        .map_err(|e| KernelError::device(format!("failed to read {attribute:?}: {e:?}")))?;
    u32::try_from(value)
        .map_err(|_| KernelError::device(format!("{attribute:?} reported {value}")).into())
}

fn query_capabilities(ctx: &CudaContext) -> DeviceCapabilities {
    let fallback = DeviceCapabilities::sm80();
    let read = |attribute: CUdevice_attribute, default: u32| match ctx.attribute(attribute) {
        Ok(v) if v > 0 => v as u32,
        Ok(v) => {
            log::warn!("{attribute:?} reported {v}, using {default}");
            default
        }
        Err(e) => {
            log::warn!("failed to query {attribute:?}: {e:?}, using {default}");
            default
        }
    };
    DeviceCapabilities {
        compute_units: read(
            CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MULTIPROCESSOR_COUNT,
            fallback.compute_units,
        ),
        max_registers_per_unit: read(
            CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_REGISTERS_PER_MULTIPROCESSOR,
            fallback.max_registers_per_unit,
        ),
        max_shared_memory_per_unit: read(
            CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_SHARED_MEMORY_PER_MULTIPROCESSOR,
            fallback.max_shared_memory_per_unit,
        ),
        warp_size: read(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_WARP_SIZE, fallback.warp_size),
    }
}

fn to_i64(value: usize, what: &str) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| KernelError::invalid_shape(format!("{what} {value} exceeds i64")).into())
}

impl SoftmaxDevice for CudaDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Result<DeviceCapabilities> {
        Ok(self.caps)
    }

    fn introspect(&self, spec: &KernelSpec) -> Result<KernelFootprint> {
        Ok(self.compiled(spec)?.footprint)
    }

    fn launch<T: Element>(
        &self,
        plan: &LaunchPlan,
        input: &Matrix<T>,
        output: &mut Matrix<T>,
    ) -> Result<()> {
        check_launch_args(plan, input, output)?;
        if input.is_empty() {
            return Ok(());
        }
        let kernel = self.compiled(&plan.spec)?;

        let input_dev: CudaSlice<u8> = self
            .stream
            .memcpy_stod(bytemuck::cast_slice::<T, u8>(input.as_slice()))
            .map_err(|e| KernelError::device(format!("failed to copy input to device: {e:?}")))?;
        let out_bytes = std::mem::size_of_val(output.as_slice());
        let mut output_dev: CudaSlice<u8> = self
            .stream
            .alloc_zeros(out_bytes)
            .map_err(|e| KernelError::device(format!("failed to allocate output: {e:?}")))?;

        let n_rows = to_i64(input.n_rows(), "n_rows")?;
        let n_cols = to_i64(input.n_cols(), "n_cols")?;
        let in_stride = to_i64(input.row_stride(), "input stride")?;
        let out_stride = to_i64(output.row_stride(), "output stride")?;

        let cfg = LaunchConfig {
            grid_dim: plan.grid_dim(),
            block_dim: plan.block_dim(),
            shared_mem_bytes: 0,
        };
        let mut builder = self.stream.launch_builder(&kernel.function);
        builder.arg(&mut output_dev);
        builder.arg(&input_dev);
        builder.arg(&n_rows);
        builder.arg(&n_cols);
        builder.arg(&in_stride);
        builder.arg(&out_stride);
        unsafe { builder.launch(cfg) }
            .map_err(|e| KernelError::device(format!("failed to launch {KERNEL_NAME}: {e:?}")))?;

        self.stream
            .memcpy_dtoh(&output_dev, bytemuck::cast_slice_mut::<T, u8>(output.as_mut_slice()))
            .map_err(|e| KernelError::device(format!("failed to copy output to host: {e:?}")))?;
        self.stream
            .synchronize()
            .map_err(|e| KernelError::device(format!("stream synchronize failed: {e:?}")))?;
        log::debug!("{}: {} done", self.name, plan);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::{Tolerance, validate_against_reference};
    use crate::softmax::Softmax;

    #[test]
    fn test_defines_cover_every_specialization_key() {
        let spec = KernelSpec { block_size: 1024, num_warps: 4, num_stages: 3, dtype: DType::F64 };
        let opts = defines(&spec, 32);
        assert!(opts.contains(&"-DT=double".to_string()));
        assert!(opts.contains(&"-DBLOCK_SIZE=1024".to_string()));
        assert!(opts.contains(&"-DNUM_WARPS=4".to_string()));
        assert!(opts.contains(&"-DNUM_STAGES=3".to_string()));
        assert!(opts.contains(&"-DEXP=exp".to_string()));
    }

    #[test]
    #[ignore] // Only run with --ignored flag when a CUDA driver is installed
    fn test_missing_ordinal_is_no_device() {
        let err = CudaDevice::new(usize::MAX).unwrap_err();
        assert!(matches!(err, smax_common::SmaxError::Kernel(KernelError::NoDevice)), "{err}");
        assert_eq!(err.kind(), Some(smax_common::ErrorKind::DeviceFailure));
    }

    #[test]
    #[ignore] // Only run with --ignored flag when CUDA is available
    fn test_cuda_matches_reference() {
        let device = match CudaDevice::new(0) {
            Ok(device) => device,
            Err(e) => {
                println!("CUDA unavailable: {e}");
                return;
            }
        };
        let data: Vec<f32> = (0..1823 * 781).map(|i| ((i * 37) % 101) as f32 / 17.0 - 3.0).collect();
        let input = Matrix::from_vec(1823, 781, data).unwrap();
        let runner = Softmax::new(&device);
        let output = runner.run(&input).unwrap();
        assert!(validate_against_reference(&input, &output, Tolerance::default()).passed());

        runner.run(&input).unwrap();
        assert_eq!(device.compiled_variants(), 1);
    }
}
