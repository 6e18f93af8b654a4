//! OpenCL implementation of [`ComputeDevice`].

use opencl3::command_queue::{CommandQueue, CL_QUEUE_PROFILING_ENABLE};
use opencl3::context::Context;
use opencl3::device::{get_all_devices, Device, CL_DEVICE_TYPE_GPU};
use opencl3::kernel::{ExecuteKernel, Kernel};
use opencl3::memory::{Buffer, CL_MEM_READ_ONLY, CL_MEM_READ_WRITE};
use opencl3::program::Program;
use opencl3::types::{cl_uchar, cl_uint, CL_BLOCKING};

use crate::error::VanityError;

use super::gpu::{ComputeDevice, MatchBuffer, ParamBlock, GROUP_SIZE, MATCH_WORDS, PARAM_WORDS};

/// OpenCL kernel source
const KERNEL_SOURCE: &str = include_str!("../../kernels/vanity.cl");

const KERNEL_NAME: &str = "vanity_match";

/// Lists available OpenCL GPU devices.
pub fn list_devices() -> Vec<String> {
    match get_all_devices(CL_DEVICE_TYPE_GPU) {
        Ok(device_ids) => device_ids
            .iter()
            .filter_map(|&id| {
                let dev = Device::new(id);
                dev.name().ok()
            })
            .collect(),
        Err(_) => vec![],
    }
}

fn unavailable(e: impl std::fmt::Display) -> VanityError {
    VanityError::BackendUnavailable(e.to_string())
}

fn device_err(e: impl std::fmt::Display) -> VanityError {
    VanityError::Device(e.to_string())
}

/// Everything that lives on the device. Dropping it releases the OpenCL objects.
struct Resources {
    queue: CommandQueue,
    kernel: Kernel,
    /// Kept alive for the kernel's lifetime
    _program: Program,
    /// Reused across batches
    params_buf: Buffer<cl_uint>,
    /// Reused across batches: `[count, index[1024]]`
    matches_buf: Buffer<cl_uint>,
    /// Recreated per batch
    candidates_buf: Option<Buffer<cl_uchar>>,
    // Declared last so it is released after the objects created from it.
    context: Context,
}

/// A GPU selected by index among the OpenCL GPU devices.
pub struct OpenClDevice {
    name: String,
    resources: Option<Resources>,
}

impl OpenClDevice {
    /// Acquires the device, compiles the kernel and allocates the fixed buffers.
    ///
    /// Any failure here is reported as `BackendUnavailable`.
    pub fn open(device_index: usize) -> Result<Self, VanityError> {
        let device_ids = get_all_devices(CL_DEVICE_TYPE_GPU).map_err(unavailable)?;
        let &device_id = device_ids
            .get(device_index)
            .ok_or_else(|| unavailable(format!("no OpenCL GPU at index {}", device_index)))?;

        let device = Device::new(device_id);
        let name = device.name().unwrap_or_else(|_| "Unknown".into());
        log::info!("Using OpenCL device {}: {}", device_index, name);

        let context = Context::from_device(&device).map_err(unavailable)?;
        let queue =
            CommandQueue::create_default_with_properties(&context, CL_QUEUE_PROFILING_ENABLE, 0)
                .map_err(unavailable)?;

        log::info!("Compiling OpenCL kernel...");
        let program = Program::create_and_build_from_source(&context, KERNEL_SOURCE, "")
            .map_err(unavailable)?;
        let kernel = Kernel::create(&program, KERNEL_NAME).map_err(unavailable)?;
        log::debug!("Kernel {} compiled", KERNEL_NAME);

        let params_buf = unsafe {
            Buffer::<cl_uint>::create(
                &context,
                CL_MEM_READ_ONLY,
                PARAM_WORDS,
                std::ptr::null_mut(),
            )
            .map_err(unavailable)?
        };
        let matches_buf = unsafe {
            Buffer::<cl_uint>::create(
                &context,
                CL_MEM_READ_WRITE,
                MATCH_WORDS,
                std::ptr::null_mut(),
            )
            .map_err(unavailable)?
        };

        Ok(Self {
            name,
            resources: Some(Resources {
                queue,
                kernel,
                _program: program,
                params_buf,
                matches_buf,
                candidates_buf: None,
                context,
            }),
        })
    }

    fn resources(&mut self) -> Result<&mut Resources, VanityError> {
        self.resources
            .as_mut()
            .ok_or_else(|| VanityError::Device("OpenCL device released".into()))
    }
}

impl ComputeDevice for OpenClDevice {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn write_params(&mut self, params: &ParamBlock) -> Result<(), VanityError> {
        let res = self.resources()?;
        unsafe {
            res.queue
                .enqueue_write_buffer(&mut res.params_buf, CL_BLOCKING, 0, &params.words()[..], &[])
                .map_err(device_err)?;
        }
        Ok(())
    }

    fn upload_candidates(&mut self, public_keys: &[u8]) -> Result<(), VanityError> {
        let res = self.resources()?;
        // Drop the previous batch's buffer before allocating the next one.
        res.candidates_buf = None;

        let mut buf = unsafe {
            Buffer::<cl_uchar>::create(
                &res.context,
                CL_MEM_READ_ONLY,
                public_keys.len(),
                std::ptr::null_mut(),
            )
            .map_err(device_err)?
        };
        unsafe {
            res.queue
                .enqueue_write_buffer(&mut buf, CL_BLOCKING, 0, public_keys, &[])
                .map_err(device_err)?;
        }
        res.candidates_buf = Some(buf);
        Ok(())
    }

    fn reset_match_counter(&mut self) -> Result<(), VanityError> {
        let res = self.resources()?;
        let zero_count: [cl_uint; 1] = [0];
        unsafe {
            res.queue
                .enqueue_write_buffer(&mut res.matches_buf, CL_BLOCKING, 0, &zero_count, &[])
                .map_err(device_err)?;
        }
        Ok(())
    }

    fn dispatch(&mut self, batch_len: u32, groups: usize) -> Result<(), VanityError> {
        let res = self.resources()?;
        let candidates = res
            .candidates_buf
            .as_ref()
            .ok_or_else(|| VanityError::Device("no candidate buffer".into()))?;
        let batch_len: cl_uint = batch_len;

        let kernel_event = unsafe {
            ExecuteKernel::new(&res.kernel)
                .set_arg(candidates)
                .set_arg(&res.params_buf)
                .set_arg(&res.matches_buf)
                .set_arg(&batch_len)
                .set_global_work_size(groups * GROUP_SIZE)
                .set_local_work_size(GROUP_SIZE)
                .enqueue_nd_range(&res.queue)
                .map_err(device_err)?
        };

        kernel_event.wait().map_err(device_err)?;
        Ok(())
    }

    fn read_matches(&mut self, out: &mut MatchBuffer) -> Result<(), VanityError> {
        let res = self.resources()?;
        unsafe {
            res.queue
                .enqueue_read_buffer(&res.matches_buf, CL_BLOCKING, 0, out.words_mut(), &[])
                .map_err(device_err)?;
        }
        Ok(())
    }

    fn release_candidates(&mut self) {
        if let Some(res) = self.resources.as_mut() {
            res.candidates_buf = None;
        }
    }

    fn release(&mut self) {
        if self.resources.take().is_some() {
            log::debug!("Released OpenCL device {}", self.name);
        }
    }
}
