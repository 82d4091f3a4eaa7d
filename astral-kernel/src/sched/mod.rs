//! Task Registry and Round-Robin Scheduler
//!
//! Owns the fixed-capacity set of tasks and dispatches them in strict
//! registration order, cyclically. Dispatch happens on an explicit
//! [`yield_now`](Scheduler::yield_now), called voluntarily by a task or
//! by the timer tick handler, or on the first [`schedule`](Scheduler::schedule).
//!
//! # States
//!
//! A task is *never scheduled yet*, *currently active* (at most one per
//! registry), or *suspended-runnable*. There is no blocked and no
//! terminated state: every registered task stays in rotation forever.
//!
//! # Locking
//!
//! The spinlock guards the registry, the cursor and the address-space
//! activation. It is released before the register save/restore, so the
//! switch itself runs unlocked; the resumed task may immediately take the
//! lock again for its own yield.

pub mod hal;
pub mod tcb;

pub use hal::{ContextHw, HwContext};
pub use tcb::Tcb;

use astral_arch::cpu::{self, CpuState};
use astral_arch::{CpuContext, SpinLock};
use core::ptr::NonNull;

use crate::memory::{KernelHeap, VmMap};

/// Maximum number of registered tasks.
pub const MAX_TASKS: usize = 8;

/// Registry and cursor, guarded by the scheduler lock.
struct SchedState {
    /// Registered tasks in creation order
    tasks: [Option<NonNull<Tcb>>; MAX_TASKS],
    /// Number of registered tasks
    count: usize,
    /// Index of the currently active task, `None` before first dispatch
    current: Option<usize>,
}

// SAFETY: TCB pointers are only dereferenced under the scheduler lock or
// by the switch primitive on contexts the lock handed out; the TCBs
// themselves live until shutdown (tasks are never destroyed).
unsafe impl Send for SchedState {}

impl SchedState {
    const fn new() -> Self {
        Self {
            tasks: [None; MAX_TASKS],
            count: 0,
            current: None,
        }
    }
}

/// What `schedule` decided while holding the lock.
enum Dispatch {
    /// Empty registry: park the core
    Halt,
    /// A task is already active: rotate instead
    Delegate,
    /// First dispatch: enter this task, never return
    First(NonNull<Tcb>),
}

/// The task registry and round-robin dispatcher.
///
/// Generic over the [`ContextHw`] seam so the dispatch logic runs against
/// a software double in tests; the kernel instantiates it with
/// [`HwContext`].
pub struct Scheduler<H: ContextHw> {
    state: SpinLock<SchedState>,
    hw: H,
}

impl<H: ContextHw> Scheduler<H> {
    /// Create an empty scheduler over the given hardware seam.
    #[must_use]
    pub const fn new(hw: H) -> Self {
        Self {
            state: SpinLock::new(SchedState::new()),
            hw,
        }
    }

    /// Reset the registry. One-time boot action; any previously
    /// registered tasks are forgotten, not freed.
    pub fn init(&self) {
        *self.state.lock() = SchedState::new();
    }

    /// Number of registered tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.state.lock().count
    }

    /// Id of the currently active task, if any.
    #[must_use]
    pub fn current_task(&self) -> Option<u32> {
        let st = self.state.lock();
        let index = st.current?;
        // SAFETY: Registered TCBs stay valid for the scheduler's lifetime
        st.tasks[index].map(|tcb| unsafe { tcb.as_ref() }.id)
    }

    /// Register a TCB at the end of the rotation.
    ///
    /// At capacity the task is silently dropped; the registry surfaces no
    /// error here by contract.
    pub fn add_task(&self, tcb: NonNull<Tcb>) {
        let mut st = self.state.lock();
        if st.count >= MAX_TASKS {
            return;
        }
        let slot = st.count;
        st.tasks[slot] = Some(tcb);
        st.count += 1;
    }

    /// Create a task that will enter `entry` on a fresh `stack_size`-byte
    /// stack under its own copy of the kernel address space.
    ///
    /// Each failure path releases whatever was already obtained and aborts
    /// without registering anything.
    pub fn create_task(
        &self,
        entry: fn() -> !,
        stack_size: usize,
        vm: &mut VmMap,
        heap: &KernelHeap,
    ) {
        let Some(tcb_mem) = heap.allocate(core::mem::size_of::<Tcb>()) else {
            log::warn!("sched: no memory for a task control block");
            return;
        };
        let Some(stack) = heap.allocate_aligned(stack_size, 16) else {
            log::warn!("sched: no memory for a {} byte task stack", stack_size);
            // SAFETY: tcb_mem came from this heap just above
            unsafe {
                heap.release(tcb_mem);
            }
            return;
        };
        let root = vm.create_task_address_space(heap);
        if root.is_null() {
            // SAFETY: both blocks came from this heap just above
            unsafe {
                heap.release(stack);
                heap.release(tcb_mem);
            }
            return;
        }

        let id = self.state.lock().count as u32;
        let tcb_ptr = tcb_mem.cast::<Tcb>();
        // SAFETY: tcb_mem is a fresh allocation of Tcb's size; the heap's
        // 8-byte granularity satisfies Tcb's alignment
        unsafe {
            tcb_ptr
                .as_ptr()
                .write(Tcb::new(id, entry, stack, stack_size, root));
        }
        self.add_task(tcb_ptr);
    }

    /// Dispatch the first task, or rotate if one is already active.
    ///
    /// With an empty registry the calling core is parked in the halted,
    /// interrupt-free wait state and nothing further happens. On the first
    /// dispatch control transfers one-way: the boot context is saved into
    /// a scratch slot that is never scheduled again.
    pub fn schedule(&self) {
        let action = {
            let mut st = self.state.lock();
            if st.count == 0 {
                Dispatch::Halt
            } else if st.current.is_some() {
                Dispatch::Delegate
            } else {
                st.current = Some(0);
                match st.tasks[0] {
                    Some(first) => {
                        // SAFETY: Registered TCBs stay valid under the lock
                        self.hw
                            .activate_address_space(unsafe { first.as_ref() }.table_root());
                        Dispatch::First(first)
                    }
                    None => Dispatch::Halt,
                }
            }
        };

        match action {
            Dispatch::Halt => cpu::set_state(CpuState::Halted),
            Dispatch::Delegate => self.yield_now(),
            Dispatch::First(first) => {
                let mut boot = CpuContext::zeroed();
                // SAFETY: `first` holds a freshly built context over a live
                // stack; the boot context is discarded, which is what makes
                // this a one-way transfer
                unsafe {
                    self.hw
                        .switch_context(&mut boot, &(*first.as_ptr()).context);
                }
            }
        }
    }

    /// Suspend the active task and resume the next one in rotation.
    ///
    /// With fewer than two tasks this is a no-op: nothing to switch to,
    /// no register traffic. Otherwise the cursor advances cyclically, the
    /// incoming root is activated under the lock, and the register switch
    /// runs after release. The call returns only when the rotation comes
    /// back around to the caller.
    pub fn yield_now(&self) {
        let (prev, next) = {
            let mut st = self.state.lock();
            if st.count <= 1 {
                return;
            }
            let Some(cursor) = st.current else {
                // Nothing active yet; rotation starts with schedule()
                return;
            };
            let next_index = (cursor + 1) % st.count;
            st.current = Some(next_index);

            let (Some(prev), Some(next)) = (st.tasks[cursor], st.tasks[next_index]) else {
                return;
            };
            // SAFETY: Registered TCBs stay valid under the lock
            self.hw
                .activate_address_space(unsafe { next.as_ref() }.table_root());
            (prev, next)
        };

        // SAFETY: Both TCBs outlive the switch (tasks are never destroyed)
        // and the lock is released, so the resumed task can take it again
        unsafe {
            self.hw
                .switch_context(&mut (*prev.as_ptr()).context, &(*next.as_ptr()).context);
        }
    }
}

/// The kernel's scheduler instance over the real hardware.
static SCHEDULER: Scheduler<HwContext> = Scheduler::new(HwContext);

/// Get the kernel scheduler.
#[must_use]
pub fn scheduler() -> &'static Scheduler<HwContext> {
    &SCHEDULER
}

#[cfg(test)]
mod tests {
    use super::*;
    use astral_common::PhysAddr;
    use std::sync::Mutex;
    use std::vec::Vec;

    /// Software double for the hardware seam: a simulated register file
    /// plus a log of every activation and switch.
    struct FakeHw {
        cpu: Mutex<CpuContext>,
        activations: Mutex<Vec<u64>>,
        switches: Mutex<usize>,
    }

    impl FakeHw {
        fn new() -> Self {
            Self {
                cpu: Mutex::new(CpuContext::zeroed()),
                activations: Mutex::new(Vec::new()),
                switches: Mutex::new(0),
            }
        }

        fn poke_register(&self, value: u64) {
            self.cpu.lock().unwrap().x19 = value;
        }

        fn live_context(&self) -> CpuContext {
            self.cpu.lock().unwrap().clone()
        }
    }

    impl ContextHw for FakeHw {
        unsafe fn switch_context(&self, prev: *mut CpuContext, next: *const CpuContext) {
            let mut cpu = self.cpu.lock().unwrap();
            // SAFETY: The scheduler passes pointers to live TCB contexts
            unsafe {
                *prev = cpu.clone();
                *cpu = (*next).clone();
            }
            *self.switches.lock().unwrap() += 1;
        }

        fn activate_address_space(&self, root: PhysAddr) {
            self.activations.lock().unwrap().push(root.as_u64());
        }
    }

    #[repr(align(4096))]
    struct Arena([u8; 160 * 1024]);

    fn test_env(arena: &mut Arena) -> (KernelHeap, VmMap) {
        let heap = KernelHeap::new();
        // SAFETY: arena outlives heap and vm within each test
        unsafe {
            heap.init(arena.0.as_mut_ptr(), arena.0.len());
        }
        let mut vm = VmMap::new();
        vm.init();
        (heap, vm)
    }

    fn task_entry() -> ! {
        unreachable!("test tasks are never actually entered")
    }

    #[test]
    fn test_rotation_follows_creation_order() {
        let mut arena = Arena([0; 160 * 1024]);
        let (heap, mut vm) = test_env(&mut arena);
        let sched = Scheduler::new(FakeHw::new());

        for _ in 0..3 {
            sched.create_task(task_entry, 4096, &mut vm, &heap);
        }
        assert_eq!(sched.task_count(), 3);
        assert_eq!(sched.current_task(), None);

        sched.schedule();
        let mut seen = Vec::new();
        seen.push(sched.current_task().unwrap());
        for _ in 0..5 {
            sched.yield_now();
            seen.push(sched.current_task().unwrap());
        }
        assert_eq!(seen, [0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_yield_without_peers_is_a_no_op() {
        let mut arena = Arena([0; 160 * 1024]);
        let (heap, mut vm) = test_env(&mut arena);
        let sched = Scheduler::new(FakeHw::new());

        // Zero tasks
        sched.yield_now();
        assert_eq!(*sched.hw.switches.lock().unwrap(), 0);

        // One task, active
        sched.create_task(task_entry, 4096, &mut vm, &heap);
        sched.schedule();
        let switches_after_entry = *sched.hw.switches.lock().unwrap();
        sched.yield_now();
        assert_eq!(*sched.hw.switches.lock().unwrap(), switches_after_entry);
        assert_eq!(sched.current_task(), Some(0));
    }

    #[test]
    fn test_empty_registry_halts_the_core() {
        let sched = Scheduler::new(FakeHw::new());
        sched.schedule();

        assert_eq!(cpu::state(), CpuState::Halted);
        assert!(sched.hw.activations.lock().unwrap().is_empty());
        assert_eq!(*sched.hw.switches.lock().unwrap(), 0);

        cpu::set_state(CpuState::Running);
    }

    #[test]
    fn test_schedule_with_active_task_delegates_to_yield() {
        let mut arena = Arena([0; 160 * 1024]);
        let (heap, mut vm) = test_env(&mut arena);
        let sched = Scheduler::new(FakeHw::new());

        sched.create_task(task_entry, 4096, &mut vm, &heap);
        sched.create_task(task_entry, 4096, &mut vm, &heap);

        sched.schedule();
        assert_eq!(sched.current_task(), Some(0));
        sched.schedule();
        assert_eq!(sched.current_task(), Some(1));
    }

    #[test]
    fn test_first_dispatch_activates_private_root() {
        let mut arena = Arena([0; 160 * 1024]);
        let (heap, mut vm) = test_env(&mut arena);
        let sched = Scheduler::new(FakeHw::new());

        sched.create_task(task_entry, 4096, &mut vm, &heap);
        sched.schedule();

        let activations = sched.hw.activations.lock().unwrap();
        assert_eq!(activations.len(), 1);
        // The activated root is a private copy, not the kernel root
        assert_ne!(activations[0], 0);

        // And the simulated register file now holds the task's entry
        drop(activations);
        assert_eq!(
            sched.hw.live_context().lr,
            task_entry as usize as u64
        );
    }

    #[test]
    fn test_registry_capacity_is_bounded() {
        let mut arena = Arena([0; 160 * 1024]);
        let (heap, mut vm) = test_env(&mut arena);
        let sched = Scheduler::new(FakeHw::new());

        for _ in 0..MAX_TASKS + 1 {
            sched.create_task(task_entry, 4096, &mut vm, &heap);
        }
        assert_eq!(sched.task_count(), MAX_TASKS);
    }

    #[test]
    fn test_allocation_failure_registers_nothing() {
        let mut arena = Arena([0; 160 * 1024]);
        let (heap, mut vm) = test_env(&mut arena);
        let sched = Scheduler::new(FakeHw::new());

        // A stack larger than the whole arena cannot be allocated; the
        // heap must end up exactly as full as before the attempt
        let free_before = heap.free_bytes();
        sched.create_task(task_entry, 1024 * 1024, &mut vm, &heap);
        assert_eq!(sched.task_count(), 0);
        assert_eq!(heap.free_bytes(), free_before);
    }

    #[test]
    fn test_registers_freeze_on_yield_and_restore_on_return() {
        let mut arena = Arena([0; 160 * 1024]);
        let (heap, mut vm) = test_env(&mut arena);
        let sched = Scheduler::new(FakeHw::new());

        sched.create_task(task_entry, 4096, &mut vm, &heap);
        sched.create_task(task_entry, 4096, &mut vm, &heap);

        // schedule() -> task 0 becomes active
        sched.schedule();
        assert_eq!(sched.current_task(), Some(0));

        // "Run" task 0: scribble into the live register file
        sched.hw.poke_register(0xA110_C8ED);
        let a_running = sched.hw.live_context();

        // Task 0 yields -> task 1 active, task 0's registers frozen
        sched.yield_now();
        assert_eq!(sched.current_task(), Some(1));
        {
            let st = sched.state.lock();
            let frozen = unsafe { st.tasks[0].unwrap().as_ref() }.context.clone();
            assert_eq!(frozen, a_running);
        }

        // "Run" task 1, then yield back
        sched.hw.poke_register(0xB0B5_1ED5);
        sched.yield_now();
        assert_eq!(sched.current_task(), Some(0));

        // Task 0's registers are restored bit-for-bit
        assert_eq!(sched.hw.live_context(), a_running);
    }
}
