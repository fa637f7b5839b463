//! IRQ dispatch table
//!
//! The kernel's IDT stubs for IRQs 0-15 call [`dispatch`]; drivers bind an
//! [`IrqSink`] to a line through [`IdtVectors`]. Binding hands back the
//! previous sink so the driver can put it back on release.
//!
//! ```ignore
//! extern "x86-interrupt" fn irq6_handler(_frame: InterruptStackFrame) {
//!     spindle::attunement::vectors::dispatch(6, &mut LegacyPic::new());
//! }
//! ```

use alloc::sync::Arc;
use spin::Mutex;

use super::{without_interrupts, CpuInterrupts, InterruptController, IrqSink, VectorTable};

const IRQ_LINES: usize = 16;

type Slot = Mutex<Option<Arc<dyn IrqSink>>>;

#[allow(clippy::declare_interior_mutable_const)]
const EMPTY: Slot = Mutex::new(None);

static SINKS: [Slot; IRQ_LINES] = [EMPTY; IRQ_LINES];

/// Route a hardware interrupt to whatever is bound to `irq`
///
/// Unbound lines are acknowledged and otherwise ignored.
pub fn dispatch(irq: u8, pic: &mut dyn InterruptController) {
    let sink = match SINKS.get(irq as usize) {
        // Foreground only swaps slots with interrupts off, so this cannot spin
        Some(slot) => slot.lock().clone(),
        None => return,
    };

    match sink {
        Some(sink) => sink.on_irq(pic),
        None => pic.end_of_interrupt(irq),
    }
}

/// Interrupt-flag control for the local CPU
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalCpu;

impl CpuInterrupts for LocalCpu {
    fn suppress(&mut self) -> bool {
        let was_enabled = x86_64::instructions::interrupts::are_enabled();
        x86_64::instructions::interrupts::disable();
        was_enabled
    }

    fn restore_interrupts(&mut self, was_enabled: bool) {
        if was_enabled {
            x86_64::instructions::interrupts::enable();
        }
    }
}

/// Handle to the dispatch table
#[derive(Debug, Default, Clone, Copy)]
pub struct IdtVectors;

impl VectorTable for IdtVectors {
    fn bind(&mut self, irq: u8, handler: Arc<dyn IrqSink>) -> Option<Arc<dyn IrqSink>> {
        let slot = SINKS.get(irq as usize)?;
        without_interrupts(&mut LocalCpu, |_| slot.lock().replace(handler))
    }

    fn restore(&mut self, irq: u8, prior: Option<Arc<dyn IrqSink>>) {
        if let Some(slot) = SINKS.get(irq as usize) {
            without_interrupts(&mut LocalCpu, |_| *slot.lock() = prior);
        }
    }
}
