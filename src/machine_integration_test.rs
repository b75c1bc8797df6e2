//! Whole-machine tests: the orchestrator, the event bridge and the
//! scheduler working together across the two-thread contract.

use crate::config::{MachineConfig, Model, RomSet};
use crate::cpu::InterruptMode;
use crate::emu::Machine;
use crate::events::{HostKey, Hotkey, KeyAction, UiEvent};
use crate::io::keyboard::{KEYB_DOWN, KEYB_NEW};

fn quiet_machine(model: Model) -> (Machine, crate::events::EventHub) {
    let config = MachineConfig {
        model,
        mhz: 0.0,              // Unthrottled: tests never sleep
        faketype: Some(false), // Real key up/down edges
        ..Default::default()
    };
    Machine::new(config, RomSet::default())
}

/// Write a program into guest RAM.
fn poke(machine: &mut Machine, addr: u16, bytes: &[u8]) {
    for (i, &b) in bytes.iter().enumerate() {
        machine.bus_mut().write(addr.wrapping_add(i as u16), b);
    }
}

#[test]
fn test_boot_to_halt() {
    // ABC802: its retrace timer never raises NMIs, so the sequence is
    // exact no matter how slowly the test host runs
    let (mut machine, _hub) = quiet_machine(Model::Abc802);
    poke(&mut machine, 0x0000, &[0x00, 0x00, 0x76]);

    machine.reset();
    for _ in 0..3 {
        machine.step();
    }

    assert!(machine.halted());
    assert_eq!(machine.cpu().pc, 0x0003);
    assert_eq!(machine.cpu().tc, 12);
}

#[test]
fn test_keystroke_reaches_guest_via_im2() {
    let (mut machine, mut hub) = quiet_machine(Model::Abc802);

    // IM2 vector table: I=0x40, keyboard vector 0x10 -> ISR at 0x3412
    machine.bus_mut().write_word(0x4010, 0x3412);
    {
        let cpu = machine.cpu_mut();
        cpu.i = 0x40;
        cpu.im = InterruptMode::Mode2;
        cpu.iff1 = true;
        cpu.pc = 0x0100;
        cpu.sp = 0xF000;
    }

    // The guest programs the keyboard DART: WR1 rx-interrupt mode,
    // WR2 fixed vector 0x10
    let regs = machine.cpu().regs();
    machine.bus_mut().port_write(35, 1, regs);
    machine.bus_mut().port_write(35, 0x18, regs);
    machine.bus_mut().port_write(35, 2, regs);
    machine.bus_mut().port_write(35, 0x10, regs);

    // Event thread: press 'a'
    let action = hub.key_down(HostKey::Char('a'), 0, 1);
    assert_eq!(action, KeyAction::Key(b'a'));

    machine.step();
    // ISR entered (plus the NOP executed there)
    assert_eq!(machine.cpu().pc, 0x3413);

    // RR0 shows receive-character-available and DCD while the key is
    // down; the data read consumes the code
    let regs = machine.cpu().regs();
    let rr0 = machine.bus_mut().port_read(35, regs);
    assert_eq!(rr0 & 0x09, 0x09);
    assert_eq!(machine.bus_mut().port_read(34, regs), b'a');

    hub.key_up(1);
    let rr0 = machine.bus_mut().port_read(35, regs);
    assert_eq!(rr0 & 0x09, 0x00);
}

#[test]
fn test_abc80_keyboard_port_reflects_down() {
    let (mut machine, mut hub) = quiet_machine(Model::Abc80);

    hub.key_down(HostKey::Char('a'), 0, 1);
    let regs = machine.cpu().regs();
    assert_eq!(machine.bus_mut().port_read(56, regs), b'a' | 0x80);

    hub.key_up(1);
    assert_eq!(machine.bus_mut().port_read(56, regs), b'a');
}

#[test]
fn test_keyboard_word_orderings() {
    let (machine, mut hub) = quiet_machine(Model::Abc802);
    let word = machine.bus().io.keyboard.word();

    hub.key_down(HostKey::Char('x'), 0, 7);
    let w = word.load();
    assert_eq!(w & 0x7f, b'x' as u16);
    assert_ne!(w & KEYB_NEW, 0);
    assert_ne!(w & KEYB_DOWN, 0);

    // Wrong scancode on release: nothing happens
    hub.key_up(3);
    assert_ne!(word.load() & KEYB_DOWN, 0);
    hub.key_up(7);
    assert_eq!(word.load() & KEYB_DOWN, 0);
}

#[test]
fn test_function_keys_ignored_on_abc80() {
    let (_machine, mut hub) = quiet_machine(Model::Abc80);
    assert_eq!(hub.key_down(HostKey::F(1), 0, 1), KeyAction::Ignored);

    let (_machine, mut hub) = quiet_machine(Model::Abc802);
    assert_eq!(hub.key_down(HostKey::F(1), 0, 1), KeyAction::Key(192));
}

#[test]
fn test_hotkey_nmi() {
    let (mut machine, mut hub) = quiet_machine(Model::Abc80);
    machine.cpu_mut().pc = 0x0100;
    machine.cpu_mut().sp = 0xF000;

    let action = hub.key_down(HostKey::Char('n'), crate::events::kshift::ALT, 1);
    assert_eq!(action, KeyAction::Hotkey(Hotkey::Nmi));

    machine.step();
    assert_eq!(machine.cpu().pc, 0x0067); // NMI handler plus one NOP
}

#[test]
fn test_hotkey_reset() {
    let (mut machine, mut hub) = quiet_machine(Model::Abc802);
    machine.cpu_mut().pc = 0x0100;
    machine.cpu_mut().i = 0x40;

    let action = hub.key_down(HostKey::Char('r'), crate::events::kshift::ALT, 1);
    assert_eq!(action, KeyAction::Hotkey(Hotkey::Reset));
    machine.step();
    // Reset consumed at the instruction boundary; execution restarted
    // at 0 and ran the NOP there with the control state cleared
    assert_eq!(machine.cpu().pc, 0x0001);
    assert_eq!(machine.cpu().i, 0);
}

#[test]
fn test_quit_hotkey_stops_continuous_run() {
    let (mut machine, mut hub) = quiet_machine(Model::Abc80);
    // An infinite loop at reset: jr -2
    poke(&mut machine, 0x0000, &[0x18, 0xFE]);

    let action = hub.key_down(HostKey::Char('q'), crate::events::kshift::ALT, 1);
    assert_eq!(action, KeyAction::Hotkey(Hotkey::Quit));

    // The quit flag is already latched, so the run loop exits at its
    // first poll instead of spinning forever
    machine.run();
    assert!(!machine.halted());
}

#[test]
fn test_vsync_publishes_video_snapshot() {
    let (mut machine, mut hub) = quiet_machine(Model::Abc80);
    // Tight loop; the 50 Hz timer does the interesting work
    poke(&mut machine, 0x0000, &[0x18, 0xFE]);

    // Put something recognizable into video RAM (0x7C00 page)
    machine.bus_mut().write(0x7C00, 0x41);

    machine.reset();
    // Let the 20 ms retrace period elapse in real time, then give the
    // CPU loop a chance to poll
    std::thread::sleep(std::time::Duration::from_millis(25));
    for _ in 0..2000 {
        machine.step();
    }

    let event = hub
        .events()
        .try_recv()
        .expect("vsync should have published a refresh");
    assert_eq!(event, UiEvent::Refresh);

    let video = hub.latest_video();
    assert_eq!(video.vram[1024], 0x41);

    // The ABC80 retrace also ticks the 50 Hz clock NMI: the handler at
    // 0x66 was entered (one push) and execution ran on from there
    assert_eq!(machine.cpu().sp, 0xFFFE);
    assert!(machine.cpu().pc >= 0x66);
}

#[test]
fn test_dump_hotkey_writes_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = MachineConfig {
        model: Model::Abc80,
        mhz: 0.0,
        dump_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    let (mut machine, mut hub) = Machine::new(config, RomSet::default());
    poke(&mut machine, 0x0000, &[0x18, 0xFE]);
    machine.bus_mut().write(0xC123, 0x5A);

    let action = hub.key_down(HostKey::Char('u'), crate::events::kshift::ALT, 1);
    assert_eq!(action, KeyAction::Hotkey(Hotkey::DumpRam));

    machine.reset();
    std::thread::sleep(std::time::Duration::from_millis(25));
    for _ in 0..2000 {
        machine.step();
    }

    let dump_path = dir.path().join("ram0001.bin");
    let dump = std::fs::read(&dump_path).expect("dump file written at vsync");
    assert_eq!(dump.len(), 1 << 16);
    assert_eq!(dump[0xC123], 0x5A);
}

#[test]
fn test_abc802_machine_wires_ctc_and_dart() {
    let (mut machine, _hub) = quiet_machine(Model::Abc802);

    // CRTC cursor position program through the 802 decoder
    let regs = machine.cpu().regs();
    machine.bus_mut().port_write(56, 14, regs);
    machine.bus_mut().port_write(57, 0x01, regs);
    machine.bus_mut().port_write(56, 15, regs);
    machine.bus_mut().port_write(57, 0x80, regs);
    assert_eq!(machine.bus().io.crtc.cursor_addr(), 0x0180);

    // The keyboard DART answers status with Tx empty
    let rr0 = machine.bus_mut().port_read(35, regs);
    assert_ne!(rr0 & 0x04, 0);
}
