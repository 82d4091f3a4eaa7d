//! Interrupt Wiring
//!
//! Routes the timer tick into the scheduler: on every tick the handler
//! re-arms the timer, signals end-of-interrupt, and yields. That single
//! call is the whole contract between the timer and the core; the
//! scheduler has no dependency back on timer configuration.

use astral_arch::exceptions::{self, ExceptionContext};
use astral_pal::gic::{self, SPURIOUS_INTID, TIMER_PPI};
use astral_pal::timer;

use crate::sched;

/// Install the IRQ handler and unmask the timer interrupt at the
/// controller. One-time boot action.
pub fn init() {
    exceptions::set_irq_handler(handle_irq);
    gic::gic().init();
    gic::gic().enable_ppi(TIMER_PPI);
}

/// IRQ entry: acknowledge, service, end-of-interrupt.
///
/// The tick yields *after* end-of-interrupt so the controller is ready to
/// deliver the next tick to whichever task the rotation resumes.
fn handle_irq(_ctx: &mut ExceptionContext) {
    let intid = gic::gic().acknowledge();
    match intid {
        TIMER_PPI => {
            timer::arm_tick();
            gic::gic().end_of_interrupt(intid);
            sched::scheduler().yield_now();
        }
        SPURIOUS_INTID => {}
        other => {
            gic::gic().end_of_interrupt(other);
            log::warn!("irq: unexpected interrupt {}", other);
        }
    }
}
