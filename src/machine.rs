use crate::font::{FONT, FONT_START_ADDRESS};
use crate::instr::Instr;
use crate::types::{DISPLAY_X, DISPLAY_Y, Framebuffer, MachineError, StepOutcome};
use crate::u4;

/// Programs are loaded and entered at this address; below it lies the
/// interpreter area holding the font.
pub const PROGRAM_START: u16 = 0x200;
/// Call nesting limit of the original hardware.
pub const STACK_DEPTH: usize = 16;

pub(crate) const MEMORY_SIZE: usize = 4096;

/// The complete machine state: memory, registers, call stack, timers,
/// framebuffer and keypad.
///
/// All containers are fixed-capacity; nothing is allocated after
/// construction.
pub struct Machine {
    pub(crate) memory: [u8; MEMORY_SIZE],
    pub(crate) framebuffer: Framebuffer,

    /// Program counter: address of the next instruction.
    pub(crate) pc: u16,
    /// Index register, the base address for memory and sprite operations.
    pub(crate) i: u16,
    /// General-purpose registers V0-VF. VF doubles as the flag output of
    /// the arithmetic, shift and draw instructions.
    pub(crate) v: [u8; 16],
    pub(crate) stack: [u16; STACK_DEPTH],
    /// Next free stack slot.
    pub(crate) sp: u8,

    pub(crate) delay_timer: u8,
    pub(crate) sound_timer: u8,

    /// Keypad state, true while a key is held.
    pub(crate) keypad: [bool; 16],
    /// Set when the framebuffer changes, cleared by [`Machine::take_redraw`].
    pub(crate) redraw: bool,
    /// Key whose release the wait-for-key instruction is waiting on.
    pub(crate) pending_key: Option<u8>,
    /// True while a wait-for-key instruction holds the PC.
    pub(crate) awaiting: bool,
}

impl Machine {
    pub fn new() -> Self {
        let mut machine = Machine {
            memory: [0; MEMORY_SIZE],
            framebuffer: [[false; DISPLAY_X]; DISPLAY_Y],
            pc: 0,
            i: 0,
            v: [0; 16],
            stack: [0; STACK_DEPTH],
            sp: 0,
            delay_timer: 0,
            sound_timer: 0,
            keypad: [false; 16],
            redraw: false,
            pending_key: None,
            awaiting: false,
        };
        machine.reset();
        machine
    }

    /// Return the machine to its power-on state: everything zeroed, the
    /// font re-copied into the interpreter area, PC at the entry point.
    pub fn reset(&mut self) {
        self.memory = [0; MEMORY_SIZE];
        self.memory[FONT_START_ADDRESS..FONT_START_ADDRESS + FONT.len()].copy_from_slice(&FONT);

        self.framebuffer = [[false; DISPLAY_X]; DISPLAY_Y];
        self.pc = PROGRAM_START;
        self.i = 0;
        self.v = [0; 16];
        self.stack = [0; STACK_DEPTH];
        self.sp = 0;
        self.delay_timer = 0;
        self.sound_timer = 0;
        self.keypad = [false; 16];
        self.pending_key = None;
        self.awaiting = false;
        // Present the cleared screen.
        self.redraw = true;
    }

    /// Copy a program into the work area at 0x200 and point PC at it.
    ///
    /// All-or-nothing: an oversized program leaves memory untouched.
    /// Registers, timers and the stack keep their values; call
    /// [`Machine::reset`] first for a clean start.
    pub fn load_program(&mut self, program: &[u8]) -> Result<(), MachineError> {
        let start = usize::from(PROGRAM_START);
        let max = MEMORY_SIZE - start;
        if program.len() > max {
            return Err(MachineError::ProgramTooLarge {
                size: program.len(),
                max,
            });
        }

        self.memory[start..start + program.len()].copy_from_slice(program);
        self.pc = PROGRAM_START;

        Ok(())
    }

    /// Run one fetch-decode-execute cycle.
    ///
    /// Recoverable faults are returned after PC has advanced past the
    /// faulting word, so the caller may keep stepping at its discretion.
    pub fn step(&mut self) -> Result<StepOutcome, MachineError> {
        let word = match self.fetch() {
            Ok(word) => word,
            Err(e) => {
                // Advance past the bad fetch so the machine cannot wedge.
                self.pc = self.pc.wrapping_add(2);
                return Err(e);
            }
        };

        self.execute(Instr::decode(word))
    }

    /// Decrement both timers, floored at zero. Call at 60 Hz.
    pub fn tick_timers(&mut self) {
        self.delay_timer = self.delay_timer.saturating_sub(1);
        self.sound_timer = self.sound_timer.saturating_sub(1);
    }

    /// The external tone should sound while this is true.
    pub fn should_beep(&self) -> bool {
        self.sound_timer > 0
    }

    /// Record a key press or release on the hex keypad.
    pub fn set_key(&mut self, key: u4, pressed: bool) {
        self.keypad[key] = pressed;
    }

    /// Pixel state at (x, y); coordinates outside the grid read as off.
    pub fn pixel(&self, x: usize, y: usize) -> bool {
        self.framebuffer
            .get(y)
            .and_then(|row| row.get(x))
            .copied()
            .unwrap_or(false)
    }

    /// Whether the framebuffer changed since the last call, clearing the
    /// flag. At most one `true` is delivered per change.
    pub fn take_redraw(&mut self) -> bool {
        std::mem::take(&mut self.redraw)
    }

    /// True while a wait-for-key instruction is suspended.
    pub fn awaiting_key(&self) -> bool {
        self.awaiting
    }

    pub fn pc(&self) -> u16 {
        self.pc
    }

    pub fn index(&self) -> u16 {
        self.i
    }

    pub fn v(&self) -> &[u8; 16] {
        &self.v
    }

    pub fn delay_timer(&self) -> u8 {
        self.delay_timer
    }

    pub fn sound_timer(&self) -> u8 {
        self.sound_timer
    }

    /// Number of return addresses currently on the call stack.
    pub fn stack_depth(&self) -> usize {
        usize::from(self.sp)
    }

    /// The next big-endian instruction word at PC.
    fn fetch(&mut self) -> Result<u16, MachineError> {
        let high = *self.mem_get(self.pc)?;
        let low = *self.mem_get(self.pc.wrapping_add(1))?;

        Ok(u16::from_be_bytes([high, low]))
    }

    /// Bounds-checked access to a memory cell.
    pub(crate) fn mem_get(&mut self, address: u16) -> Result<&mut u8, MachineError> {
        self.memory
            .get_mut(usize::from(address))
            .ok_or(MachineError::OutOfBounds { address })
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}
