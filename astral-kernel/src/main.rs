//! Kernel Entry and Boot Sequence
//!
//! Boot order: console and logging first so everything later can speak,
//! exception vectors, the heap, then the memory map (bookkeeping init
//! followed by the hardware translation step), the W^X convention over
//! the framebuffer window, the scheduler with its demo tasks, and finally
//! the timer tick before handing control to the first task.
//!
//! The binary only exists for bare-metal AArch64; hosted builds get a
//! stub `main` so the workspace builds and tests everywhere.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(target_os = "none")]
mod kernel {
    use core::panic::PanicInfo;

    use astral_arch::cpu::{self, CpuState};
    use astral_arch::exceptions;
    use astral_kernel::memory::{KernelHeap, Protection, VmMap};
    use astral_kernel::{irq, logging, security};
    use astral_pal::{console, platform, timer};

    /// The kernel heap over the platform carve-out.
    static HEAP: KernelHeap = KernelHeap::new();

    /// Panic: report on the console and park the core.
    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        astral_pal::println!("kernel panic: {}", info);
        cpu::halt();
    }

    // Boot stub: park secondary cores, set up the boot stack, zero .bss,
    // then enter kernel_main. Symbols come from the linker script.
    core::arch::global_asm!(
        r#"
.section .text.boot
.global _start
_start:
    mrs     x1, mpidr_el1
    and     x1, x1, #0xFF
    cbnz    x1, 2f

    ldr     x1, =__boot_stack_top
    mov     sp, x1

    ldr     x1, =__bss_start
    ldr     x2, =__bss_end
1:  cmp     x1, x2
    b.hs    3f
    str     xzr, [x1], #8
    b       1b
3:  bl      kernel_main

2:  wfe
    b       2b
"#
    );

    /// Boot core entry, called from the stub with a live stack.
    #[no_mangle]
    extern "C" fn kernel_main() -> ! {
        console::init();
        logging::init();
        cpu::set_state(CpuState::Running);
        exceptions::install();

        log::info!("astral kernel booting on {}", platform().name);

        let plat = platform();
        // SAFETY: The heap carve-out is reserved for the kernel heap by
        // the platform layout and touched by nothing else
        unsafe {
            HEAP.init(plat.heap_base as *mut u8, plat.heap_size);
        }

        // Bookkeeping first, hardware second; the two must stay in step
        let mut vm = VmMap::new();
        vm.init();
        vm.enable_translation(&plat.framebuffer, &HEAP);

        // Convention: the framebuffer must never be writable-executable
        security::enforce_write_xor_execute(
            &mut vm,
            astral_common::VirtAddr::new(plat.framebuffer.base.as_u64()),
            plat.framebuffer.size_bytes(),
            Protection::RW,
        );

        let sched = astral_kernel::sched::scheduler();
        sched.init();
        sched.create_task(task_a, 4096, &mut vm, &HEAP);
        sched.create_task(task_b, 4096, &mut vm, &HEAP);

        timer::init();
        irq::init();
        timer::arm_tick();
        cpu::enable_interrupts();

        sched.schedule();

        // Only reached when no task was ever registered
        loop {
            cpu::set_state(CpuState::Halted);
        }
    }

    fn task_a() -> ! {
        let mut counter: u64 = 0;
        loop {
            log::info!("task a running, counter {}", counter);
            timer::delay_ms(1000);
            counter += 1;
        }
    }

    fn task_b() -> ! {
        let mut counter: u64 = 0;
        loop {
            log::info!("task b running, counter {}", counter);
            timer::delay_ms(1500);
            counter += 1;
        }
    }
}

#[cfg(not(target_os = "none"))]
fn main() {}
