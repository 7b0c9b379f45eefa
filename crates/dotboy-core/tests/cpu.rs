use dotboy_core::{cartridge::Cartridge, gameboy::GameBoy};

/// A machine whose cartridge holds `program` at the 0x0100 entry point.
fn machine_with(program: &[u8]) -> GameBoy {
    let mut rom = vec![0u8; 0x8000];
    rom[0x0100..0x0100 + program.len()].copy_from_slice(program);
    let mut gb = GameBoy::new();
    gb.load_cart(Cartridge::load(rom).expect("valid test ROM"));
    gb.mmu.if_reg = 0;
    gb
}

#[test]
fn daa_after_bcd_add() {
    // LD A,0x15; LD B,0x27; ADD A,B; DAA
    let mut gb = machine_with(&[0x3E, 0x15, 0x06, 0x27, 0x80, 0x27]);
    for _ in 0..4 {
        gb.cpu.step(&mut gb.mmu);
    }
    assert_eq!(gb.cpu.a, 0x42);
    assert_eq!(gb.cpu.f, 0x00); // Z=0 N=0 H=0 C=0
}

#[test]
fn daa_after_bcd_subtract() {
    // LD A,0x20; LD B,0x13; SUB B; DAA -> 07
    let mut gb = machine_with(&[0x3E, 0x20, 0x06, 0x13, 0x90, 0x27]);
    for _ in 0..4 {
        gb.cpu.step(&mut gb.mmu);
    }
    assert_eq!(gb.cpu.a, 0x07);
    assert_eq!(gb.cpu.f & 0x40, 0x40); // N survives DAA
}

#[test]
fn pop_af_masks_flag_low_nibble() {
    // LD BC,0x12FF; PUSH BC; POP AF
    let mut gb = machine_with(&[0x01, 0xFF, 0x12, 0xC5, 0xF1]);
    for _ in 0..3 {
        gb.cpu.step(&mut gb.mmu);
        assert_eq!(gb.cpu.f & 0x0F, 0, "low nibble of F must stay clear");
    }
    assert_eq!(gb.cpu.a, 0x12);
    assert_eq!(gb.cpu.f, 0xF0);
}

#[test]
fn halt_wakes_into_interrupt_service() {
    let mut gb = machine_with(&[0x76]);
    gb.cpu.ime = true;
    gb.mmu.ie_reg = 0x01;

    assert_eq!(gb.cpu.step(&mut gb.mmu), 4);
    assert!(gb.cpu.halted);
    assert_eq!(gb.cpu.step(&mut gb.mmu), 4);
    assert!(gb.cpu.halted);

    gb.mmu.request_interrupt(0);
    assert_eq!(gb.cpu.step(&mut gb.mmu), 20);
    assert!(!gb.cpu.halted);
    assert!(!gb.cpu.ime);
    assert_eq!(gb.cpu.pc, 0x0040);
    assert_eq!(gb.mmu.if_reg & 0x01, 0);
}

#[test]
fn halt_bug_repeats_following_instruction() {
    // HALT with IME=0 and an enabled interrupt pending, then INC A.
    let mut gb = machine_with(&[0x76, 0x3C]);
    gb.mmu.ie_reg = 0x01;
    gb.mmu.if_reg = 0x01;

    gb.cpu.step(&mut gb.mmu); // HALT arms the bug, does not halt
    assert!(!gb.cpu.halted);

    gb.cpu.step(&mut gb.mmu); // INC A without advancing PC
    assert_eq!(gb.cpu.a, 0x02);
    assert_eq!(gb.cpu.pc, 0x0101);

    gb.cpu.step(&mut gb.mmu); // INC A again, PC moves on
    assert_eq!(gb.cpu.a, 0x03);
    assert_eq!(gb.cpu.pc, 0x0102);
}

#[test]
fn ei_takes_effect_after_one_instruction() {
    // EI; INC B; (interrupt should fire here, before the second INC B)
    let mut gb = machine_with(&[0xFB, 0x04, 0x04]);
    gb.mmu.ie_reg = 0x01;
    gb.mmu.if_reg = 0x01;

    gb.cpu.step(&mut gb.mmu); // EI
    assert!(!gb.cpu.ime);
    gb.cpu.step(&mut gb.mmu); // INC B still runs
    assert_eq!(gb.cpu.b, 0x01);
    assert_eq!(gb.cpu.step(&mut gb.mmu), 20); // dispatch
    assert_eq!(gb.cpu.pc, 0x0040);
    assert_eq!(gb.cpu.b, 0x01);
}

#[test]
fn di_cancels_pending_ei() {
    let mut gb = machine_with(&[0xFB, 0xF3, 0x04, 0x04]);
    gb.mmu.ie_reg = 0x01;
    gb.mmu.if_reg = 0x01;

    for _ in 0..4 {
        gb.cpu.step(&mut gb.mmu);
    }
    assert!(!gb.cpu.ime);
    assert_eq!(gb.cpu.pc, 0x0104);
    assert_eq!(gb.cpu.b, 0x02);
}

#[test]
fn undefined_opcodes_consume_four_cycles() {
    for op in [0xD3, 0xDB, 0xDD, 0xE3, 0xE4, 0xEB, 0xEC, 0xED, 0xF4, 0xFC, 0xFD] {
        let mut gb = machine_with(&[op]);
        assert_eq!(gb.cpu.step(&mut gb.mmu), 4);
        assert_eq!(gb.cpu.pc, 0x0101);
    }
}

#[test]
fn interrupts_service_lowest_bit_first() {
    let mut gb = machine_with(&[0x00]);
    gb.cpu.ime = true;
    gb.mmu.ie_reg = 0x1F;
    gb.mmu.if_reg = 0x0A; // STAT and serial pending

    assert_eq!(gb.cpu.step(&mut gb.mmu), 20);
    assert_eq!(gb.cpu.pc, 0x0048);
    assert_eq!(gb.mmu.if_reg & 0x1F, 0x08); // serial still pending
}

#[test]
fn interrupt_pushes_return_address() {
    let mut gb = machine_with(&[0x00, 0x00]);
    gb.cpu.ime = true;
    gb.mmu.ie_reg = 0x01;
    gb.cpu.step(&mut gb.mmu); // NOP at 0x100
    gb.mmu.request_interrupt(0);
    let sp_before = gb.cpu.sp;
    gb.cpu.step(&mut gb.mmu);
    assert_eq!(gb.cpu.sp, sp_before.wrapping_sub(2));
    let lo = gb.mmu.read_byte(gb.cpu.sp) as u16;
    let hi = gb.mmu.read_byte(gb.cpu.sp.wrapping_add(1)) as u16;
    assert_eq!((hi << 8) | lo, 0x0101);
}

#[test]
fn sbc_half_carry_includes_incoming_borrow() {
    // LD A,0x00; SCF; SBC A,0xFF
    let mut gb = machine_with(&[0x3E, 0x00, 0x37, 0xDE, 0xFF]);
    for _ in 0..3 {
        gb.cpu.step(&mut gb.mmu);
    }
    assert_eq!(gb.cpu.a, 0x00);
    assert_eq!(gb.cpu.f, 0xF0); // Z N H C all set
}

#[test]
fn adc_carries_through() {
    // LD A,0xFF; SCF; ADC A,0x00 -> 0x00, Z H C set
    let mut gb = machine_with(&[0x3E, 0xFF, 0x37, 0xCE, 0x00]);
    for _ in 0..3 {
        gb.cpu.step(&mut gb.mmu);
    }
    assert_eq!(gb.cpu.a, 0x00);
    assert_eq!(gb.cpu.f, 0xB0); // Z=1 N=0 H=1 C=1
}

#[test]
fn add_hl_sets_half_and_full_carry() {
    // LD HL,0x0FFF; LD BC,0x0001; ADD HL,BC
    let mut gb = machine_with(&[0x21, 0xFF, 0x0F, 0x01, 0x01, 0x00, 0x09]);
    for _ in 0..3 {
        gb.cpu.step(&mut gb.mmu);
    }
    assert_eq!(gb.cpu.get_hl(), 0x1000);
    assert_eq!(gb.cpu.f & 0x20, 0x20); // H from bit 11
    assert_eq!(gb.cpu.f & 0x10, 0); // no carry from bit 15
}

#[test]
fn add_sp_e_flags_from_low_byte() {
    // LD SP,0xFFFF; ADD SP,1
    let mut gb = machine_with(&[0x31, 0xFF, 0xFF, 0xE8, 0x01]);
    gb.cpu.step(&mut gb.mmu);
    assert_eq!(gb.cpu.step(&mut gb.mmu), 16);
    assert_eq!(gb.cpu.sp, 0x0000);
    assert_eq!(gb.cpu.f, 0x30); // Z=0 N=0 H=1 C=1
}

#[test]
fn ld_hl_sp_plus_negative_offset() {
    // LD SP,0x0100; LD HL,SP-2
    let mut gb = machine_with(&[0x31, 0x00, 0x01, 0xF8, 0xFE]);
    gb.cpu.step(&mut gb.mmu);
    assert_eq!(gb.cpu.step(&mut gb.mmu), 12);
    assert_eq!(gb.cpu.get_hl(), 0x00FE);
    assert_eq!(gb.cpu.f, 0x00);
}

#[test]
fn call_and_ret_cycle_counts() {
    let mut rom = vec![0u8; 0x8000];
    rom[0x0100..0x0103].copy_from_slice(&[0xCD, 0x10, 0x01]); // CALL 0x0110
    rom[0x0110] = 0xC9; // RET
    let mut gb = GameBoy::new();
    gb.load_cart(Cartridge::load(rom).expect("valid test ROM"));
    gb.mmu.if_reg = 0;

    assert_eq!(gb.cpu.step(&mut gb.mmu), 24);
    assert_eq!(gb.cpu.pc, 0x0110);
    assert_eq!(gb.cpu.step(&mut gb.mmu), 16);
    assert_eq!(gb.cpu.pc, 0x0103);
}

#[test]
fn conditional_jumps_cost_more_when_taken() {
    // JR NZ,+0 with Z clear: taken, 12 cycles.
    let mut gb = machine_with(&[0x20, 0x00, 0x20, 0x00]);
    gb.cpu.f = 0x00;
    assert_eq!(gb.cpu.step(&mut gb.mmu), 12);
    gb.cpu.f = 0x80;
    assert_eq!(gb.cpu.step(&mut gb.mmu), 8);
}

#[test]
fn ret_cc_timing() {
    let mut rom = vec![0u8; 0x8000];
    rom[0x0100..0x0103].copy_from_slice(&[0xCD, 0x10, 0x01]); // CALL 0x0110
    rom[0x0110] = 0xC8; // RET Z
    rom[0x0111] = 0xC8; // RET Z again
    let mut gb = GameBoy::new();
    gb.load_cart(Cartridge::load(rom).expect("valid test ROM"));
    gb.mmu.if_reg = 0;

    gb.cpu.step(&mut gb.mmu); // CALL
    gb.cpu.f = 0x00;
    assert_eq!(gb.cpu.step(&mut gb.mmu), 8); // not taken
    gb.cpu.f = 0x80;
    assert_eq!(gb.cpu.step(&mut gb.mmu), 20); // taken
    assert_eq!(gb.cpu.pc, 0x0103);
}

#[test]
fn rlca_clears_zero_flag() {
    let mut gb = machine_with(&[0x3E, 0x80, 0x07]);
    for _ in 0..2 {
        gb.cpu.step(&mut gb.mmu);
    }
    assert_eq!(gb.cpu.a, 0x01);
    assert_eq!(gb.cpu.f, 0x10);
}

#[test]
fn cb_swap_and_hl_operand_timing() {
    // SWAP A (8 cycles), then LD HL,0xC000; SET 0,(HL) (16 cycles).
    let mut gb = machine_with(&[0xCB, 0x37, 0x21, 0x00, 0xC0, 0xCB, 0xC6]);
    assert_eq!(gb.cpu.step(&mut gb.mmu), 8);
    assert_eq!(gb.cpu.a, 0x10); // boot A=0x01 swapped
    gb.cpu.step(&mut gb.mmu);
    assert_eq!(gb.cpu.step(&mut gb.mmu), 16);
    assert_eq!(gb.mmu.read_byte(0xC000), 0x01);
}

#[test]
fn cb_bit_only_reads_memory() {
    // LD HL,0xC000; BIT 0,(HL) is 12 cycles.
    let mut gb = machine_with(&[0x21, 0x00, 0xC0, 0xCB, 0x46]);
    gb.cpu.step(&mut gb.mmu);
    assert_eq!(gb.cpu.step(&mut gb.mmu), 12);
    assert_eq!(gb.cpu.f & 0x80, 0x80); // bit 0 of cleared WRAM is 0
}

#[test]
fn ld_hl_plus_and_minus() {
    // LD HL,0xC000; LD (HL+),A; LD (HL-),A
    let mut gb = machine_with(&[0x21, 0x00, 0xC0, 0x22, 0x32]);
    for _ in 0..3 {
        gb.cpu.step(&mut gb.mmu);
    }
    assert_eq!(gb.cpu.get_hl(), 0xC000);
    assert_eq!(gb.mmu.read_byte(0xC000), 0x01);
    assert_eq!(gb.mmu.read_byte(0xC001), 0x01);
}

#[test]
fn flags_low_nibble_zero_across_alu_sweep() {
    // Run the whole 0x80-0xBF ALU block against B.
    for op in 0x80..=0xBF_u8 {
        let mut gb = machine_with(&[0x06, 0x3A, op]); // LD B,0x3A; ALU A,B
        gb.cpu.step(&mut gb.mmu);
        gb.cpu.step(&mut gb.mmu);
        assert_eq!(gb.cpu.f & 0x0F, 0, "opcode {op:#04X} dirtied F");
    }
}
