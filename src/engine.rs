//! Reversible second-order automaton over three device buffers.
//!
//! The engine keeps a sliding window of three generations, `previous`,
//! `current` and `next`, in three physical slots. Stepping never copies grid
//! data; it runs one kernel into the `next` slot and then permutes which slot
//! plays which role.

use tracing::debug;

use crate::device::{BufferHandle, ComputeDevice, DeviceError, KernelSource, ProgramHandle};
use crate::grid::{empty_grid, Grid};
use crate::types::{GRID_CELLS, SIDE};

/// Local workgroup edge used by both kernels.
pub const WORKGROUP_EDGE: u32 = 16;

/// Workgroup grid that covers one generation.
pub const DISPATCH_GROUPS: (u32, u32) = (
    SIDE as u32 / WORKGROUP_EDGE,
    SIDE as u32 / WORKGROUP_EDGE,
);

// Bindings: 0 = S(t-1), 1 = S(t), 2 = S(t+1).

/// S(t+1) = life(S(t)) ^ S(t-1)
pub const FORWARD_KERNEL: KernelSource = KernelSource {
    label: "life_forward",
    workgroup: (WORKGROUP_EDGE, WORKGROUP_EDGE),
    center: 1,
    mix: 0,
    output: 2,
};

/// S(t-2) = life(S(t-1)) ^ S(t)
pub const BACKWARD_KERNEL: KernelSource = KernelSource {
    label: "life_backward",
    workgroup: (WORKGROUP_EDGE, WORKGROUP_EDGE),
    center: 0,
    mix: 1,
    output: 2,
};

/// Which physical slot plays each logical role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Roles {
    previous: usize,
    current: usize,
    next: usize,
}

impl Roles {
    const INITIAL: Roles = Roles {
        previous: 0,
        current: 1,
        next: 2,
    };

    /// Slide one generation forward: the freshly written `next` becomes `current`.
    fn advance(&mut self) {
        std::mem::swap(&mut self.previous, &mut self.current);
        std::mem::swap(&mut self.current, &mut self.next);
    }

    /// Slide one generation back: the freshly written `next` becomes `previous`.
    fn retreat(&mut self) {
        std::mem::swap(&mut self.current, &mut self.next);
        std::mem::swap(&mut self.previous, &mut self.current);
    }
}

/// Three-slot reversible automaton bound to a compute device.
///
/// The engine owns the device, its three buffers and both kernels for its
/// whole lifetime and releases them on drop.
#[derive(Debug)]
pub struct ReversibleEngine<D: ComputeDevice> {
    device: D,
    slots: [BufferHandle; 3],
    roles: Roles,
    forward: ProgramHandle,
    backward: ProgramHandle,
}

impl<D: ComputeDevice> ReversibleEngine<D> {
    /// Allocate the three generation buffers and build both kernels.
    ///
    /// A kernel that fails to compile or link leaves nothing usable behind;
    /// callers should treat that error as fatal.
    pub fn new(mut device: D) -> Result<Self, DeviceError> {
        let forward = device.compile(&FORWARD_KERNEL)?;
        let backward = device.compile(&BACKWARD_KERNEL)?;
        let slots = [
            device.create_buffer(GRID_CELLS)?,
            device.create_buffer(GRID_CELLS)?,
            device.create_buffer(GRID_CELLS)?,
        ];
        debug!(side = SIDE, "reversible engine ready");
        Ok(Self {
            device,
            slots,
            roles: Roles::INITIAL,
            forward,
            backward,
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    fn previous(&self) -> BufferHandle {
        self.slots[self.roles.previous]
    }

    fn current(&self) -> BufferHandle {
        self.slots[self.roles.current]
    }

    /// Zero the `previous` generation.
    pub fn clear_previous(&mut self) -> Result<(), DeviceError> {
        let slot = self.previous();
        self.device.fill(slot, 0)
    }

    pub fn upload_current(&mut self, grid: &[u32]) -> Result<(), DeviceError> {
        let slot = self.current();
        self.device.write(slot, grid)
    }

    pub fn upload_previous(&mut self, grid: &[u32]) -> Result<(), DeviceError> {
        let slot = self.previous();
        self.device.write(slot, grid)
    }

    pub fn download_current(&self) -> Result<Grid, DeviceError> {
        let mut grid = empty_grid();
        self.device.read(self.current(), &mut grid)?;
        Ok(grid)
    }

    pub fn download_previous(&self) -> Result<Grid, DeviceError> {
        let mut grid = empty_grid();
        self.device.read(self.previous(), &mut grid)?;
        Ok(grid)
    }

    /// Compute the next generation from `(previous, current)` and slide forward.
    pub fn step_forward(&mut self) -> Result<(), DeviceError> {
        self.run(self.forward)?;
        self.roles.advance();
        Ok(())
    }

    /// Recover the generation before `previous` and slide backward.
    pub fn step_backward(&mut self) -> Result<(), DeviceError> {
        self.run(self.backward)?;
        self.roles.retreat();
        Ok(())
    }

    fn run(&mut self, program: ProgramHandle) -> Result<(), DeviceError> {
        self.device.bind(0, self.slots[self.roles.previous])?;
        self.device.bind(1, self.slots[self.roles.current])?;
        self.device.bind(2, self.slots[self.roles.next])?;
        self.device.dispatch(program, DISPATCH_GROUPS)?;
        self.device.barrier();
        Ok(())
    }
}

impl<D: ComputeDevice> Drop for ReversibleEngine<D> {
    fn drop(&mut self) {
        for slot in self.slots {
            self.device.release_buffer(slot);
        }
        self.device.release_program(self.forward);
        self.device.release_program(self.backward);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::CpuDevice;

    fn engine() -> ReversibleEngine<CpuDevice> {
        ReversibleEngine::new(CpuDevice::new()).unwrap()
    }

    fn pattern(seed: u32) -> Grid {
        (0..GRID_CELLS as u32)
            .map(|i| (i.wrapping_mul(2_654_435_761).wrapping_add(seed) >> 13) & 1)
            .collect()
    }

    #[test]
    fn roles_stay_a_permutation() {
        let mut r = Roles::INITIAL;
        for _ in 0..5 {
            r.advance();
            let mut seen = [r.previous, r.current, r.next];
            seen.sort_unstable();
            assert_eq!(seen, [0, 1, 2]);
        }
        for _ in 0..5 {
            r.retreat();
        }
        assert_eq!(r, Roles::INITIAL);
    }

    #[test]
    fn advance_slides_window() {
        let mut r = Roles::INITIAL;
        r.advance();
        assert_eq!(
            r,
            Roles {
                previous: 1,
                current: 2,
                next: 0
            }
        );
        r.retreat();
        assert_eq!(r, Roles::INITIAL);
    }

    #[test]
    fn forward_then_backward_restores_pair() {
        let mut e = engine();
        let a = pattern(1);
        let b = pattern(7);
        e.upload_previous(&a).unwrap();
        e.upload_current(&b).unwrap();

        for _ in 0..6 {
            e.step_forward().unwrap();
        }
        assert_ne!(e.download_current().unwrap(), b);
        for _ in 0..6 {
            e.step_backward().unwrap();
        }
        assert_eq!(e.download_previous().unwrap(), a);
        assert_eq!(e.download_current().unwrap(), b);
        assert_eq!(e.device().dispatch_count(), 12);
    }

    #[test]
    fn one_step_shifts_current_into_previous() {
        let mut e = engine();
        let b = pattern(3);
        e.clear_previous().unwrap();
        e.upload_current(&b).unwrap();
        e.step_forward().unwrap();
        assert_eq!(e.download_previous().unwrap(), b);
    }

    #[test]
    fn clear_previous_only_touches_previous() {
        let mut e = engine();
        let a = pattern(11);
        e.upload_previous(&a).unwrap();
        e.upload_current(&a).unwrap();
        e.clear_previous().unwrap();
        assert!(e.download_previous().unwrap().iter().all(|&c| c == 0));
        assert_eq!(e.download_current().unwrap(), a);
    }

    #[test]
    fn wrong_sized_upload_is_rejected() {
        let mut e = engine();
        assert!(matches!(
            e.upload_current(&[1, 0, 1]),
            Err(DeviceError::LengthMismatch { .. })
        ));
    }
}
