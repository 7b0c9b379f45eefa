use crate::{cartridge::Cartridge, cpu::Cpu, input::Button, mmu::Mmu};

/// Cycles per 59.73 Hz video frame: 154 scanlines of 456 cycles.
pub const CYCLES_PER_FRAME: u32 = 70224;

/// The whole machine: CPU plus the bus that owns every peripheral.
///
/// A freshly constructed `GameBoy` carries a synthetic cartridge whose entry
/// point spins in a `NOP; JP 0x0100` loop, so it can be stepped before any
/// ROM is opened.
pub struct GameBoy {
    pub cpu: Cpu,
    pub mmu: Mmu,
}

impl GameBoy {
    pub fn new() -> Self {
        let mut mmu = Mmu::new();
        mmu.load_cart(Cartridge::boot_stub());
        Self {
            cpu: Cpu::new(),
            mmu,
        }
    }

    /// Swap in a cartridge, restarting the machine from power-on state.
    pub fn load_cart(&mut self, cart: Cartridge) {
        self.cpu = Cpu::new();
        self.mmu = Mmu::new();
        self.mmu.load_cart(cart);
    }

    /// Reset to power-on state, preserving the loaded cartridge.
    pub fn reset(&mut self) {
        let cart = self.mmu.cart.take();
        self.cpu = Cpu::new();
        self.mmu = Mmu::new();
        if let Some(cart) = cart {
            self.mmu.load_cart(cart);
        }
    }

    /// Run one video frame: step the CPU and hand its cycles to the
    /// peripherals (PPU, timer, RTC, APU in that order) until the frame
    /// budget is spent.
    pub fn step_frame(&mut self) {
        let mut cycles_this_frame = 0;
        while cycles_this_frame < CYCLES_PER_FRAME {
            let cycles = self.cpu.step(&mut self.mmu);
            self.mmu.tick(cycles);
            cycles_this_frame += cycles;
        }
    }

    /// Apply a host key event; `pressed` presses the key down.
    pub fn set_button(&mut self, button: Button, pressed: bool) {
        self.mmu.input.set_button(button, pressed, &mut self.mmu.if_reg);
    }

    /// [`GameBoy::set_button`] by numeric key id (0=Right .. 7=Start).
    /// Unknown ids are ignored.
    pub fn set_key(&mut self, id: u8, pressed: bool) {
        if let Some(button) = Button::from_id(id) {
            self.set_button(button, pressed);
        }
    }

    /// Flush battery-backed cartridge RAM, if any.
    pub fn save_cart_ram(&self) -> std::io::Result<()> {
        self.mmu.save_cart_ram()
    }
}

impl Default for GameBoy {
    fn default() -> Self {
        Self::new()
    }
}
