//! Compute-dispatch capability used by the engine, plus a host reference backend.
//!
//! The engine only relies on: numbered storage buffers, compiled kernels,
//! three binding points, a dispatch over a 2D workgroup grid, and a barrier
//! that must separate a dispatch from any later host access.

use rayon::prelude::*;
use thiserror::Error;
use tracing::trace;

use crate::types::{GRID_CELLS, SIDE};

/// Number of storage binding points a kernel can use.
pub const BINDING_COUNT: u32 = 3;

/// Opaque handle to a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(usize);

/// Opaque handle to a compiled kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(usize);

/// Description of a reversible-life kernel.
///
/// Each invocation writes `life(center) XOR mix` to `output`, where `life` is
/// one B3/S23 step on a torus. Running it with `(center, mix)` taken from the
/// other two generations of a window is what makes the automaton reversible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSource {
    pub label: &'static str,
    /// Local workgroup size in cells (x, y).
    pub workgroup: (u32, u32),
    pub center: u32,
    pub mix: u32,
    pub output: u32,
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("kernel `{label}` failed to compile: {log}")]
    Compile { label: &'static str, log: String },
    #[error("kernel `{label}` failed to link: {log}")]
    Link { label: &'static str, log: String },
    #[error("unknown buffer handle")]
    UnknownBuffer,
    #[error("unknown program handle")]
    UnknownProgram,
    #[error("binding {0} is out of range")]
    BindingOutOfRange(u32),
    #[error("binding {0} has no buffer attached")]
    Unbound(u32),
    #[error("bindings {0} and {1} alias the same buffer")]
    Aliased(u32, u32),
    #[error("buffer holds {expected} cells, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("dispatch of {groups:?} workgroups does not cover the {side}x{side} grid")]
    DispatchTooSmall { groups: (u32, u32), side: usize },
    #[error("host access issued before a barrier completed the last dispatch")]
    MissingBarrier,
}

/// The device contract the engine is written against.
pub trait ComputeDevice {
    fn create_buffer(&mut self, cells: usize) -> Result<BufferHandle, DeviceError>;
    fn release_buffer(&mut self, buffer: BufferHandle);
    /// Load and link a kernel. Failure here is unrecoverable for the caller.
    fn compile(&mut self, source: &KernelSource) -> Result<ProgramHandle, DeviceError>;
    fn release_program(&mut self, program: ProgramHandle);
    fn write(&mut self, buffer: BufferHandle, data: &[u32]) -> Result<(), DeviceError>;
    fn fill(&mut self, buffer: BufferHandle, value: u32) -> Result<(), DeviceError>;
    fn read(&self, buffer: BufferHandle, out: &mut [u32]) -> Result<(), DeviceError>;
    fn bind(&mut self, binding: u32, buffer: BufferHandle) -> Result<(), DeviceError>;
    fn dispatch(&mut self, program: ProgramHandle, groups: (u32, u32)) -> Result<(), DeviceError>;
    /// Make the last dispatch's writes visible to later host and kernel access.
    fn barrier(&mut self);
}

/// Host backend: buffers are vectors and a dispatch runs grid rows on the
/// rayon pool. It enforces the same ordering rules a GPU driver would.
#[derive(Debug, Default)]
pub struct CpuDevice {
    buffers: Vec<Option<Vec<u32>>>,
    programs: Vec<Option<KernelSource>>,
    bindings: [Option<BufferHandle>; BINDING_COUNT as usize],
    pending: bool,
    dispatches: u64,
}

impl CpuDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total dispatches issued over the device's lifetime.
    pub fn dispatch_count(&self) -> u64 {
        self.dispatches
    }

    fn buffer(&self, handle: BufferHandle) -> Result<&Vec<u32>, DeviceError> {
        self.buffers
            .get(handle.0)
            .and_then(Option::as_ref)
            .ok_or(DeviceError::UnknownBuffer)
    }

    fn buffer_mut(&mut self, handle: BufferHandle) -> Result<&mut Vec<u32>, DeviceError> {
        self.buffers
            .get_mut(handle.0)
            .and_then(Option::as_mut)
            .ok_or(DeviceError::UnknownBuffer)
    }

    fn bound(&self, binding: u32) -> Result<BufferHandle, DeviceError> {
        self.bindings
            .get(binding as usize)
            .copied()
            .ok_or(DeviceError::BindingOutOfRange(binding))?
            .ok_or(DeviceError::Unbound(binding))
    }

    fn host_access(&self) -> Result<(), DeviceError> {
        if self.pending {
            return Err(DeviceError::MissingBarrier);
        }
        Ok(())
    }
}

impl ComputeDevice for CpuDevice {
    fn create_buffer(&mut self, cells: usize) -> Result<BufferHandle, DeviceError> {
        self.buffers.push(Some(vec![0; cells]));
        Ok(BufferHandle(self.buffers.len() - 1))
    }

    fn release_buffer(&mut self, buffer: BufferHandle) {
        if let Some(slot) = self.buffers.get_mut(buffer.0) {
            *slot = None;
        }
        for b in self.bindings.iter_mut() {
            if *b == Some(buffer) {
                *b = None;
            }
        }
    }

    fn compile(&mut self, source: &KernelSource) -> Result<ProgramHandle, DeviceError> {
        if source.workgroup.0 == 0 || source.workgroup.1 == 0 {
            return Err(DeviceError::Compile {
                label: source.label,
                log: format!("workgroup size {:?} has a zero dimension", source.workgroup),
            });
        }
        for binding in [source.center, source.mix, source.output] {
            if binding >= BINDING_COUNT {
                return Err(DeviceError::Compile {
                    label: source.label,
                    log: format!("binding {binding} exceeds the {BINDING_COUNT} storage slots"),
                });
            }
        }
        if source.output == source.center || source.output == source.mix {
            return Err(DeviceError::Link {
                label: source.label,
                log: format!("output binding {} is also read", source.output),
            });
        }
        self.programs.push(Some(source.clone()));
        trace!(label = source.label, "kernel compiled");
        Ok(ProgramHandle(self.programs.len() - 1))
    }

    fn release_program(&mut self, program: ProgramHandle) {
        if let Some(slot) = self.programs.get_mut(program.0) {
            *slot = None;
        }
    }

    fn write(&mut self, buffer: BufferHandle, data: &[u32]) -> Result<(), DeviceError> {
        self.host_access()?;
        let dst = self.buffer_mut(buffer)?;
        if dst.len() != data.len() {
            return Err(DeviceError::LengthMismatch {
                expected: dst.len(),
                actual: data.len(),
            });
        }
        dst.copy_from_slice(data);
        Ok(())
    }

    fn fill(&mut self, buffer: BufferHandle, value: u32) -> Result<(), DeviceError> {
        self.host_access()?;
        self.buffer_mut(buffer)?.fill(value);
        Ok(())
    }

    fn read(&self, buffer: BufferHandle, out: &mut [u32]) -> Result<(), DeviceError> {
        self.host_access()?;
        let src = self.buffer(buffer)?;
        if src.len() != out.len() {
            return Err(DeviceError::LengthMismatch {
                expected: src.len(),
                actual: out.len(),
            });
        }
        out.copy_from_slice(src);
        Ok(())
    }

    fn bind(&mut self, binding: u32, buffer: BufferHandle) -> Result<(), DeviceError> {
        self.buffer(buffer)?;
        let slot = self
            .bindings
            .get_mut(binding as usize)
            .ok_or(DeviceError::BindingOutOfRange(binding))?;
        *slot = Some(buffer);
        Ok(())
    }

    fn dispatch(&mut self, program: ProgramHandle, groups: (u32, u32)) -> Result<(), DeviceError> {
        let kernel = self
            .programs
            .get(program.0)
            .and_then(Option::as_ref)
            .ok_or(DeviceError::UnknownProgram)?
            .clone();

        let covered_x = groups.0 as usize * kernel.workgroup.0 as usize;
        let covered_y = groups.1 as usize * kernel.workgroup.1 as usize;
        if covered_x < SIDE || covered_y < SIDE {
            return Err(DeviceError::DispatchTooSmall { groups, side: SIDE });
        }

        let center = self.bound(kernel.center)?;
        let mix = self.bound(kernel.mix)?;
        let output = self.bound(kernel.output)?;
        if output == center {
            return Err(DeviceError::Aliased(kernel.output, kernel.center));
        }
        if output == mix {
            return Err(DeviceError::Aliased(kernel.output, kernel.mix));
        }
        for handle in [center, mix, output] {
            let len = self.buffer(handle)?.len();
            if len != GRID_CELLS {
                return Err(DeviceError::LengthMismatch {
                    expected: GRID_CELLS,
                    actual: len,
                });
            }
        }

        let mut out = std::mem::take(self.buffer_mut(output)?);
        reversible_life(self.buffer(center)?, self.buffer(mix)?, &mut out);
        *self.buffer_mut(output)? = out;

        self.pending = true;
        self.dispatches += 1;
        Ok(())
    }

    fn barrier(&mut self) {
        self.pending = false;
    }
}

/// `out = life(center) XOR mix` over the whole torus.
fn reversible_life(center: &[u32], mix: &[u32], out: &mut [u32]) {
    out.par_chunks_mut(SIDE).enumerate().for_each(|(y, row)| {
        let up = (y + SIDE - 1) % SIDE;
        let down = (y + 1) % SIDE;
        let alive = |r: usize, c: usize| u32::from(center[r * SIDE + c] != 0);
        for (x, cell) in row.iter_mut().enumerate() {
            let left = (x + SIDE - 1) % SIDE;
            let right = (x + 1) % SIDE;
            let neighbours = alive(up, left)
                + alive(up, x)
                + alive(up, right)
                + alive(y, left)
                + alive(y, right)
                + alive(down, left)
                + alive(down, x)
                + alive(down, right);
            let born_or_survives = neighbours == 3 || (neighbours == 2 && alive(y, x) == 1);
            *cell = u32::from(born_or_survives) ^ u32::from(mix[y * SIDE + x] != 0);
        }
    });
}
