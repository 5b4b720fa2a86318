use crate::machine::Machine;
use crate::types::{MachineError, StepOutcome};
use crate::u4;

/// Instruction rate used when the driver does not pick one.
pub const DEFAULT_CPU_HZ: f32 = 700.0;

const TIMER_HZ: f32 = 60.0;
const TIMER_TIME_STEP: f32 = 1.0 / TIMER_HZ;

/// Drives a [`Machine`] from wall-clock delta times: CPU cycles at a
/// configurable rate, timers at a fixed 60 Hz.
///
/// Recoverable faults (bad instruction words, stack misuse, out-of-range
/// memory access) are logged at warn level and retained for inspection;
/// execution always continues with the next cycle.
pub struct Runner {
    machine: Machine,
    cpu_time_step: f32,
    cpu_accumulator: f32,
    timer_accumulator: f32,
    last_fault: Option<MachineError>,
    fault_count: u64,
}

impl Runner {
    pub fn new(machine: Machine, cpu_hz: f32) -> Self {
        Self {
            machine,
            cpu_time_step: 1.0 / cpu_hz,
            cpu_accumulator: 0.0,
            timer_accumulator: 0.0,
            last_fault: None,
            fault_count: 0,
        }
    }

    /// Advance emulation by `dt` seconds of wall-clock time.
    ///
    /// Stops cycling early when a frame should be presented before the next
    /// instruction (after a draw, or while a wait-for-key is suspended),
    /// clearing the CPU accumulator so the emulator does not catch up in a
    /// burst on the following frame.
    pub fn update(&mut self, dt: f32) {
        self.cpu_accumulator += dt;
        self.timer_accumulator += dt;

        while self.timer_accumulator >= TIMER_TIME_STEP {
            self.timer_accumulator -= TIMER_TIME_STEP;
            self.machine.tick_timers();
        }

        while self.cpu_accumulator >= self.cpu_time_step {
            self.cpu_accumulator -= self.cpu_time_step;

            match self.machine.step() {
                Ok(StepOutcome::Continue) => {}
                Ok(StepOutcome::FrameReady | StepOutcome::AwaitingKey) => {
                    self.cpu_accumulator = 0.0;
                    break;
                }
                Err(fault) => self.record_fault(fault),
            }
        }
    }

    fn record_fault(&mut self, fault: MachineError) {
        log::warn!("continuing past recoverable fault: {fault}");
        self.fault_count += 1;
        self.last_fault = Some(fault);
    }

    /// The most recent recoverable fault, if any.
    pub fn last_fault(&self) -> Option<&MachineError> {
        self.last_fault.as_ref()
    }

    /// Recoverable faults seen since construction.
    pub fn fault_count(&self) -> u64 {
        self.fault_count
    }

    /// Returns true while the sound timer is active and a tone should play.
    pub fn should_beep(&self) -> bool {
        self.machine.should_beep()
    }

    /// Record a key press or release on the hex keypad.
    pub fn set_key(&mut self, key: u4, pressed: bool) {
        self.machine.set_key(key, pressed)
    }

    /// Pixel state at (x, y); out-of-range coordinates read as off.
    pub fn pixel(&self, x: usize, y: usize) -> bool {
        self.machine.pixel(x, y)
    }

    /// Whether the framebuffer changed since the last call, clearing the flag.
    pub fn take_redraw(&mut self) -> bool {
        self.machine.take_redraw()
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut Machine {
        &mut self.machine
    }
}
