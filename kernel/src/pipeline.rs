//! Interrupt pipeline interface
//!
//! The nucleus never touches hardware. Clock reads, timer programming,
//! inter-processor interrupts and the context switch itself are delegated
//! to the integrator through this trait.

use crate::scheduler::core::affinity::CpuMask;
use crate::scheduler::thread::ThreadId;
use crate::time::Ticks;

/// Services the nucleus needs from the platform
pub trait Pipeline: Send + Sync {
    /// CPU the caller runs on
    fn this_cpu(&self) -> usize;

    /// Raw clock reading in ticks
    fn read_clock(&self) -> Ticks;

    /// Program the hardware timer of `cpu` to fire at `date`
    fn program_shot(&self, cpu: usize, date: Ticks);

    /// Ask every CPU in `cpus` to run its rescheduling procedure
    fn send_resched_ipi(&self, cpus: CpuMask);

    /// Switch the CPU from `prev` to `next`.
    ///
    /// `leaving_inband` is set when `prev` is the root thread. Returns true
    /// when the switch completed an in-band transition, in which case the
    /// caller stops its post-switch processing.
    fn switch_to(&self, prev: ThreadId, next: ThreadId, leaving_inband: bool) -> bool;

    /// Deliver a pending host tick to the in-band kernel of `cpu`
    fn relay_host_tick(&self, cpu: usize);

    /// CPUs available to the nucleus
    fn online_cpus(&self) -> CpuMask;
}
