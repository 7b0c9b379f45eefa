use std::{
    fs, io,
    path::{Path, PathBuf},
    time::SystemTime,
};

use thiserror::Error;

const ROM_BANK_SIZE: usize = 0x4000;
const RAM_BANK_SIZE: usize = 0x2000;
const HEADER_END: usize = 0x150;
const CYCLES_PER_SECOND: u32 = 4_194_304;

#[derive(Debug, Error)]
pub enum CartridgeError {
    /// The image is smaller than the cartridge header.
    #[error("ROM image too small: {0} bytes")]
    RomTooSmall(usize),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MbcType {
    NoMbc,
    Mbc1,
    Mbc2,
    Mbc3,
    Mbc5,
    Unknown(u8),
}

#[derive(Debug)]
enum MbcState {
    NoMbc,
    Mbc1 {
        rom_bank: u8,
        ram_bank: u8,
        mode: u8,
        ram_enable: bool,
    },
    Mbc2 {
        rom_bank: u8,
        ram_enable: bool,
    },
    Mbc3 {
        rom_bank: u8,
        ram_bank: u8,
        ram_enable: bool,
        rtc: Option<Rtc>,
        latch_pending: bool,
    },
    Mbc5 {
        rom_bank: u16,
        ram_bank: u8,
        ram_enable: bool,
    },
}

#[derive(Debug, Clone, Copy, Default)]
struct RtcRegisters {
    seconds: u8,
    minutes: u8,
    hours: u8,
    days: u16,
    halt: bool,
    carry: bool,
}

impl RtcRegisters {
    fn control_byte(&self) -> u8 {
        let mut out = ((self.days >> 8) as u8) & 0x01;
        if self.halt {
            out |= 0x40;
        }
        if self.carry {
            out |= 0x80;
        }
        out
    }
}

/// MBC3 real-time clock: live registers advancing against the wall clock,
/// plus the snapshot frozen by the 0x00/0x01 latch sequence.
#[derive(Debug, Clone)]
struct Rtc {
    live: RtcRegisters,
    latched: RtcRegisters,
    last_time: SystemTime,
}

impl Rtc {
    fn new(now: SystemTime) -> Self {
        let live = RtcRegisters::default();
        Self {
            live,
            latched: live,
            last_time: now,
        }
    }

    fn latch(&mut self) {
        self.latched = self.live;
    }

    fn read_latched(&self, reg: u8) -> u8 {
        match reg {
            0x08 => self.latched.seconds & 0x3F,
            0x09 => self.latched.minutes & 0x3F,
            0x0A => self.latched.hours & 0x1F,
            0x0B => (self.latched.days & 0x00FF) as u8,
            0x0C => self.latched.control_byte(),
            _ => 0xFF,
        }
    }

    fn write_register(&mut self, reg: u8, value: u8) {
        match reg {
            0x08 => self.live.seconds = value & 0x3F,
            0x09 => self.live.minutes = value & 0x3F,
            0x0A => self.live.hours = value & 0x1F,
            0x0B => self.live.days = (self.live.days & 0x0100) | value as u16,
            0x0C => {
                self.live.days = (self.live.days & 0x00FF) | (((value & 0x01) as u16) << 8);
                self.live.halt = value & 0x40 != 0;
                self.live.carry = value & 0x80 != 0;
            }
            _ => {}
        }
        self.latch();
    }

    /// Credit wall-clock seconds elapsed since the stored baseline.
    fn sync_wall(&mut self, now: SystemTime) {
        let elapsed = now
            .duration_since(self.last_time)
            .unwrap_or_default()
            .as_secs();
        if elapsed == 0 {
            return;
        }
        self.last_time = now;
        if !self.live.halt {
            self.advance_seconds(elapsed);
        }
    }

    fn advance_seconds(&mut self, seconds: u64) {
        for _ in 0..seconds {
            self.live.seconds = (self.live.seconds + 1) & 0x3F;
            if self.live.seconds != 60 {
                continue;
            }
            self.live.seconds = 0;
            self.live.minutes = (self.live.minutes + 1) & 0x3F;
            if self.live.minutes != 60 {
                continue;
            }
            self.live.minutes = 0;
            self.live.hours = (self.live.hours + 1) & 0x1F;
            if self.live.hours != 24 {
                continue;
            }
            self.live.hours = 0;
            if self.live.days == 0x01FF {
                self.live.days = 0;
                self.live.carry = true;
            } else {
                self.live.days += 1;
            }
        }
    }
}

#[derive(Debug)]
pub struct Cartridge {
    pub rom: Vec<u8>,
    pub ram: Vec<u8>,
    pub mbc: MbcType,
    pub title: String,
    cart_type: u8,
    save_path: Option<PathBuf>,
    state: MbcState,
    rtc_poll_cycles: u32,
}

impl Cartridge {
    /// Parse a raw ROM image. Fails only when the image is too small to hold
    /// the cartridge header; unknown mapper types degrade to plain ROM.
    pub fn load(data: Vec<u8>) -> Result<Self, CartridgeError> {
        if data.len() < HEADER_END {
            return Err(CartridgeError::RomTooSmall(data.len()));
        }
        Ok(Self::from_image(data))
    }

    /// Load a ROM file, then the matching battery save (`<stem>.sav`) if the
    /// cartridge has one.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, CartridgeError> {
        let data = fs::read(&path)?;
        let mut cart = Self::load(data)?;

        if cart.has_battery() {
            let mut save = PathBuf::from(path.as_ref());
            save.set_extension("sav");
            if let Ok(bytes) = fs::read(&save) {
                for (d, s) in cart.ram.iter_mut().zip(bytes.iter()) {
                    *d = *s;
                }
            }
            cart.save_path = Some(save);
        }

        core_info!(
            target: "cartridge",
            "loaded ROM \"{}\" ({})",
            cart.title,
            cart.mbc_name()
        );
        Ok(cart)
    }

    /// The synthetic cartridge installed before any ROM is opened: a plain
    /// 32 KiB image whose entry point spins in a `NOP; JP 0x0100` loop.
    pub fn boot_stub() -> Self {
        let mut rom = vec![0u8; 2 * ROM_BANK_SIZE];
        rom[0x0100] = 0x00; // NOP
        rom[0x0101] = 0xC3; // JP 0x0100
        rom[0x0102] = 0x00;
        rom[0x0103] = 0x01;
        Self::from_image(rom)
    }

    fn from_image(data: Vec<u8>) -> Self {
        let header = Header::parse(&data);
        let mbc = header.mbc_type();
        if let MbcType::Unknown(t) = mbc {
            core_warn!(
                target: "cartridge",
                "unknown cartridge type {t:#04X}, treating as plain ROM"
            );
        }
        let cart_type = header.cart_type();
        let has_rtc = header.has_rtc();
        let title = header.title();
        let ram_size = header.ram_size();

        let state = match mbc {
            MbcType::NoMbc | MbcType::Unknown(_) => MbcState::NoMbc,
            MbcType::Mbc1 => MbcState::Mbc1 {
                rom_bank: 1,
                ram_bank: 0,
                mode: 0,
                ram_enable: false,
            },
            MbcType::Mbc2 => MbcState::Mbc2 {
                rom_bank: 1,
                ram_enable: false,
            },
            MbcType::Mbc3 => MbcState::Mbc3 {
                rom_bank: 1,
                ram_bank: 0,
                ram_enable: false,
                rtc: has_rtc.then(|| Rtc::new(SystemTime::now())),
                latch_pending: false,
            },
            MbcType::Mbc5 => MbcState::Mbc5 {
                rom_bank: 1,
                ram_bank: 0,
                ram_enable: false,
            },
        };

        Self {
            rom: data,
            ram: vec![0; ram_size],
            mbc,
            title,
            cart_type,
            save_path: None,
            state,
            rtc_poll_cycles: 0,
        }
    }

    pub fn mbc_name(&self) -> &'static str {
        match self.mbc {
            MbcType::NoMbc => "ROM ONLY",
            MbcType::Mbc1 => "MBC1",
            MbcType::Mbc2 => "MBC2",
            MbcType::Mbc3 => "MBC3",
            MbcType::Mbc5 => "MBC5",
            MbcType::Unknown(_) => "UNKNOWN",
        }
    }

    pub fn has_battery(&self) -> bool {
        matches!(
            self.cart_type,
            0x03 | 0x06 | 0x09 | 0x0F | 0x10 | 0x13 | 0x1B | 0x1E | 0xFF
        )
    }

    fn rom_bank_count(&self) -> usize {
        (self.rom.len() / ROM_BANK_SIZE).max(1)
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            // The low window is always bank 0.
            0x0000..=0x3FFF => self.rom.get(addr as usize).copied().unwrap_or(0xFF),
            0x4000..=0x7FFF => {
                let bank = self.effective_rom_bank() % self.rom_bank_count();
                let offset = bank * ROM_BANK_SIZE + (addr as usize - 0x4000);
                self.rom.get(offset).copied().unwrap_or(0xFF)
            }
            0xA000..=0xBFFF => self.read_ram(addr),
            _ => 0xFF,
        }
    }

    fn effective_rom_bank(&self) -> usize {
        match &self.state {
            MbcState::NoMbc => 1,
            MbcState::Mbc1 {
                rom_bank,
                ram_bank,
                mode,
                ..
            } => {
                let mut bank = *rom_bank as usize;
                // In banking mode 0 the RAM bank register supplies bits 5-6
                // of the ROM bank for the switchable window.
                if *mode == 0 {
                    bank |= ((*ram_bank as usize) & 0x03) << 5;
                }
                bank
            }
            MbcState::Mbc2 { rom_bank, .. } => *rom_bank as usize,
            MbcState::Mbc3 { rom_bank, .. } => *rom_bank as usize,
            MbcState::Mbc5 { rom_bank, .. } => *rom_bank as usize,
        }
    }

    fn read_ram(&self, addr: u16) -> u8 {
        let offset = addr as usize - 0xA000;
        match &self.state {
            MbcState::NoMbc => self.ram.get(offset).copied().unwrap_or(0xFF),
            MbcState::Mbc1 {
                ram_enable,
                ram_bank,
                mode,
                ..
            } => {
                if !*ram_enable {
                    return 0xFF;
                }
                let bank = if *mode == 1 { *ram_bank as usize & 0x03 } else { 0 };
                self.ram
                    .get(bank * RAM_BANK_SIZE + offset)
                    .copied()
                    .unwrap_or(0xFF)
            }
            MbcState::Mbc2 { ram_enable, .. } => {
                // 512 nibbles at A000-A1FF; only the low 4 bits exist.
                if !*ram_enable || addr >= 0xA200 {
                    return 0xFF;
                }
                self.ram.get(offset).copied().unwrap_or(0xFF) & 0x0F
            }
            MbcState::Mbc3 {
                ram_enable,
                ram_bank,
                rtc,
                ..
            } => {
                if !*ram_enable {
                    return 0xFF;
                }
                match *ram_bank {
                    0x00..=0x03 => self
                        .ram
                        .get(*ram_bank as usize * RAM_BANK_SIZE + offset)
                        .copied()
                        .unwrap_or(0xFF),
                    0x08..=0x0C => rtc
                        .as_ref()
                        .map(|r| r.read_latched(*ram_bank))
                        .unwrap_or(0xFF),
                    _ => 0xFF,
                }
            }
            MbcState::Mbc5 {
                ram_enable,
                ram_bank,
                ..
            } => {
                if !*ram_enable {
                    return 0xFF;
                }
                self.ram
                    .get(*ram_bank as usize * RAM_BANK_SIZE + offset)
                    .copied()
                    .unwrap_or(0xFF)
            }
        }
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        match addr {
            0x0000..=0x7FFF => self.write_control(addr, val),
            0xA000..=0xBFFF => self.write_ram(addr, val),
            _ => {}
        }
    }

    fn write_control(&mut self, addr: u16, val: u8) {
        match &mut self.state {
            MbcState::NoMbc => {}
            MbcState::Mbc1 {
                rom_bank,
                ram_bank,
                mode,
                ram_enable,
            } => match addr {
                0x0000..=0x1FFF => *ram_enable = val & 0x0F == 0x0A,
                0x2000..=0x3FFF => {
                    *rom_bank = val & 0x1F;
                    if *rom_bank == 0 {
                        *rom_bank = 1;
                    }
                }
                0x4000..=0x5FFF => *ram_bank = val & 0x03,
                _ => *mode = val & 0x01,
            },
            MbcState::Mbc2 {
                rom_bank,
                ram_enable,
            } => {
                // Address bit 8 selects between the RAM gate and the ROM bank
                // register; writes above 0x3FFF do nothing.
                if addr >= 0x4000 {
                    return;
                }
                if addr & 0x0100 != 0 {
                    *rom_bank = val & 0x0F;
                    if *rom_bank == 0 {
                        *rom_bank = 1;
                    }
                } else {
                    *ram_enable = val & 0x0F == 0x0A;
                }
            }
            MbcState::Mbc3 {
                rom_bank,
                ram_bank,
                ram_enable,
                rtc,
                latch_pending,
            } => match addr {
                0x0000..=0x1FFF => *ram_enable = val & 0x0F == 0x0A,
                0x2000..=0x3FFF => {
                    *rom_bank = val & 0x7F;
                    if *rom_bank == 0 {
                        *rom_bank = 1;
                    }
                }
                0x4000..=0x5FFF => *ram_bank = val,
                _ => {
                    // Writing 0x00 then 0x01 copies the live RTC registers
                    // into the latched set.
                    if val == 0 {
                        *latch_pending = true;
                    } else {
                        if val == 1 && *latch_pending {
                            if let Some(rtc) = rtc {
                                rtc.latch();
                            }
                        }
                        *latch_pending = false;
                    }
                }
            },
            MbcState::Mbc5 {
                rom_bank,
                ram_bank,
                ram_enable,
            } => match addr {
                0x0000..=0x1FFF => *ram_enable = val & 0x0F == 0x0A,
                0x2000..=0x2FFF => *rom_bank = (*rom_bank & 0x100) | val as u16,
                0x3000..=0x3FFF => *rom_bank = (*rom_bank & 0x0FF) | (((val & 0x01) as u16) << 8),
                0x4000..=0x5FFF => *ram_bank = val & 0x0F,
                _ => {}
            },
        }
    }

    fn write_ram(&mut self, addr: u16, val: u8) {
        let offset = addr as usize - 0xA000;
        match &mut self.state {
            MbcState::NoMbc => {
                if let Some(b) = self.ram.get_mut(offset) {
                    *b = val;
                }
            }
            MbcState::Mbc1 {
                ram_enable,
                ram_bank,
                mode,
                ..
            } => {
                if !*ram_enable {
                    return;
                }
                let bank = if *mode == 1 { *ram_bank as usize & 0x03 } else { 0 };
                if let Some(b) = self.ram.get_mut(bank * RAM_BANK_SIZE + offset) {
                    *b = val;
                }
            }
            MbcState::Mbc2 { ram_enable, .. } => {
                if !*ram_enable || addr >= 0xA200 {
                    return;
                }
                if let Some(b) = self.ram.get_mut(offset) {
                    *b = val & 0x0F;
                }
            }
            MbcState::Mbc3 {
                ram_enable,
                ram_bank,
                rtc,
                ..
            } => {
                if !*ram_enable {
                    return;
                }
                match *ram_bank {
                    0x00..=0x03 => {
                        let idx = *ram_bank as usize * RAM_BANK_SIZE + offset;
                        if let Some(b) = self.ram.get_mut(idx) {
                            *b = val;
                        }
                    }
                    0x08..=0x0C => {
                        if let Some(rtc) = rtc.as_mut() {
                            rtc.write_register(*ram_bank, val);
                        }
                    }
                    _ => {}
                }
            }
            MbcState::Mbc5 {
                ram_enable,
                ram_bank,
                ..
            } => {
                if !*ram_enable {
                    return;
                }
                let idx = *ram_bank as usize * RAM_BANK_SIZE + offset;
                if let Some(b) = self.ram.get_mut(idx) {
                    *b = val;
                }
            }
        }
    }

    /// Advance the RTC. The wall clock is only polled about once per emulated
    /// second; register state moves in whole seconds anyway.
    pub fn step_rtc(&mut self, cycles: u32) {
        let rtc = match &mut self.state {
            MbcState::Mbc3 { rtc: Some(rtc), .. } => rtc,
            _ => return,
        };
        self.rtc_poll_cycles += cycles;
        if self.rtc_poll_cycles < CYCLES_PER_SECOND {
            return;
        }
        self.rtc_poll_cycles -= CYCLES_PER_SECOND;
        rtc.sync_wall(SystemTime::now());
    }

    /// Flush battery-backed RAM to disk. The save file is replaced by a
    /// rename so a failed write cannot corrupt an existing save.
    pub fn save_ram(&self) -> io::Result<()> {
        let path = match (&self.save_path, self.has_battery()) {
            (Some(path), true) if !self.ram.is_empty() => path,
            _ => return Ok(()),
        };
        let tmp = path.with_extension("sav.tmp");
        fs::write(&tmp, &self.ram)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

struct Header<'a> {
    data: &'a [u8],
}

impl<'a> Header<'a> {
    fn parse(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn title(&self) -> String {
        let start = 0x0134.min(self.data.len());
        let end = 0x0144.min(self.data.len());
        let mut slice = &self.data[start..end];
        if let Some(pos) = slice.iter().position(|&b| b == 0) {
            slice = &slice[..pos];
        }
        String::from_utf8_lossy(slice).trim().to_string()
    }

    fn cart_type(&self) -> u8 {
        self.data.get(0x0147).copied().unwrap_or(0)
    }

    fn mbc_type(&self) -> MbcType {
        match self.cart_type() {
            0x00 => MbcType::NoMbc,
            0x01..=0x03 => MbcType::Mbc1,
            0x05 | 0x06 => MbcType::Mbc2,
            0x0F..=0x13 => MbcType::Mbc3,
            0x19..=0x1E => MbcType::Mbc5,
            0x08 | 0x09 => MbcType::NoMbc,
            t => MbcType::Unknown(t),
        }
    }

    fn has_rtc(&self) -> bool {
        matches!(self.cart_type(), 0x0F | 0x10)
    }

    fn ram_size(&self) -> usize {
        // MBC2 has 512x4-bit internal RAM regardless of the header byte.
        if matches!(self.cart_type(), 0x05 | 0x06) {
            return 0x200;
        }
        match self.data.get(0x0149).copied().unwrap_or(0) {
            0x00 => 0,
            0x01 => 0x800,   // 2KB
            0x02 => 0x2000,  // 8KB
            0x03 => 0x8000,  // 32KB (4 banks)
            0x04 => 0x20000, // 128KB (16 banks)
            0x05 => 0x10000, // 64KB (8 banks)
            _ => 0x2000,
        }
    }
}
