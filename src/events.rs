//! Event bridge between the CPU thread and the host event loop.
//!
//! Two threads meet here. The CPU thread publishes a video snapshot at
//! every vertical retrace: it locks the shared `transfer` copy, clones
//! its state in, unlocks, and posts a refresh notification. The event
//! thread consumes the notification, copies `transfer` into its own
//! `render` copy under the same lock, and paints. Neither thread ever
//! reads live state owned by the other.
//!
//! Keystrokes travel the other way through the atomic keyboard word
//! (see `io::keyboard`): the event thread posts the code and raises the
//! keyboard interrupt; the ordering of the release store and the
//! acquire poll guarantees the CPU sees the code before it services the
//! interrupt. Alt-hotkeys do not reach the guest at all; they latch
//! quit/reset/NMI/dump requests that the CPU thread consumes at safe
//! points.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender};

use crate::config::Model;
use crate::cpu::{NmiLine, ResetLine};
use crate::io::crtc::{Crtc, CRTC_REGS};
use crate::io::keyboard::KeyboardWord;
use crate::irq::IrqLine;
use crate::memory::VRAM_SIZE;

/// Snapshot of everything the renderer needs for one frame.
#[derive(Clone)]
pub struct VideoState {
    pub crtc: [u8; CRTC_REGS],
    /// Video RAM address of the first displayed character.
    pub start_addr: u16,
    /// Video RAM address of the CRTC cursor.
    pub cursor_addr: u16,
    pub mode40: bool,
    pub blink_on: bool,
    pub vram: [u8; VRAM_SIZE],
}

impl Default for VideoState {
    fn default() -> Self {
        Self {
            crtc: [0; CRTC_REGS],
            start_addr: 0,
            cursor_addr: 0,
            mode40: false,
            blink_on: false,
            vram: [0; VRAM_SIZE],
        }
    }
}

/// Notification toward the event thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiEvent {
    /// A fresh video snapshot is waiting in the transfer buffer.
    Refresh,
}

/// Memory dump request latched by a hotkey, serviced at vsync.
pub(crate) const DUMP_NONE: u8 = 0;
pub(crate) const DUMP_MEM: u8 = 1;
pub(crate) const DUMP_RAM: u8 = 2;

/// CPU-thread side of the video hand-over.
pub struct VideoBridge {
    transfer: Arc<Mutex<VideoState>>,
    events: Sender<UiEvent>,
    blink_ctr: u32,
    blink_on: bool,
}

/// Cursor blink: 400 ms at the 20 ms retrace rate.
const BLINK_RATE: u32 = 400 / 20;

impl VideoBridge {
    pub(crate) fn new(transfer: Arc<Mutex<VideoState>>, events: Sender<UiEvent>) -> Self {
        Self {
            transfer,
            events,
            blink_ctr: 0,
            blink_on: false,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(transfer: Arc<Mutex<VideoState>>, events: Sender<UiEvent>) -> Self {
        Self::new(transfer, events)
    }

    /// Publish the CPU-side video state; called at vertical retrace
    /// from the CPU thread.
    pub fn vsync(&mut self, crtc: &Crtc, vram: &[u8; VRAM_SIZE]) {
        if self.blink_ctr == 0 {
            self.blink_ctr = BLINK_RATE;
            self.blink_on = !self.blink_on;
        }
        self.blink_ctr -= 1;

        {
            let mut transfer = self.transfer.lock().unwrap();
            transfer.crtc = *crtc.registers();
            transfer.start_addr = crtc.start_addr();
            transfer.cursor_addr = crtc.cursor_addr();
            transfer.mode40 = crtc.mode40;
            transfer.blink_on = self.blink_on;
            transfer.vram = *vram;
        }

        // The event thread may be gone during shutdown; that is fine
        let _ = self.events.try_send(UiEvent::Refresh);
    }
}

/// Host key identity, decoupled from any particular windowing library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKey {
    /// A character as translated by the host keyboard layout.
    Char(char),
    Left,
    Right,
    /// Function keys F1-F8.
    F(u8),
    Escape,
    Space,
    End,
}

/// Shift-state bits accompanying a key event.
pub mod kshift {
    pub const SHIFT: u8 = 1;
    pub const CTRL: u8 = 2;
    pub const ALT: u8 = 4;
}

/// Alt-prefixed special functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hotkey {
    Quit,
    Screenshot,
    Reset,
    Nmi,
    DumpMem,
    DumpRam,
    ToggleFaketype,
}

/// What became of a key-down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    /// Delivered to the guest keyboard.
    Key(u8),
    /// A hotkey; quit/reset/NMI/dump/fake-type are already latched,
    /// screenshot is the front end's job.
    Hotkey(Hotkey),
    Ignored,
}

/// Decode a host key to a 7-bit ABC key code (8 bits for the ABC800
/// function keys). Ctrl+Shift inverts bit 4 of control codes.
pub fn decode_key(key: HostKey, shift: u8) -> Option<u8> {
    let mut sym: i32 = match key {
        HostKey::Left => 8,
        HostKey::Right => 9,
        HostKey::F(n @ 1..=8) => (n as i32 - 1) + 192 + ((shift as i32) << 3),
        HostKey::F(_) => return None,
        HostKey::Escape => 127,
        // Ctrl+Space is NUL
        HostKey::Space => ((shift ^ kshift::CTRL) as i32) << 4,
        HostKey::End => return None,
        HostKey::Char(c) => decode_char(c, shift)?,
    };

    if sym & !0x1f == 0 && shift == (kshift::CTRL | kshift::SHIFT) {
        // Shift+Ctrl inverts bit 4
        sym ^= 0x10;
    }

    Some(sym as u8)
}

fn decode_char(c: char, shift: u8) -> Option<i32> {
    match c {
        // Control codes and the plain printable range pass through;
        // '<' and '>' are handled below
        '\u{1}'..='\u{1f}' => Some(c as i32),
        ' '..=';' | '=' | '?'..='~' | '\u{7f}' => Some(c as i32),
        '¤' => Some('$' as i32),
        'É' => Some('@' as i32),
        'Å' => Some(']' as i32),
        'Ä' => Some('[' as i32),
        'Ö' => Some('\\' as i32),
        'Ü' => Some('^' as i32),
        'é' => Some('`' as i32),
        'å' => Some('}' as i32),
        'ä' => Some('{' as i32),
        'ö' => Some('|' as i32),
        'ü' => Some('~' as i32),
        '<' | '>' => Some(if shift & kshift::CTRL != 0 {
            127
        } else {
            c as i32
        }),
        '§' | '½' => Some(127),
        _ => None,
    }
}

/// The event-thread half of the bridge.
pub struct EventHub {
    model: Model,
    keyboard: Arc<KeyboardWord>,
    keyboard_line: IrqLine,
    nmi: NmiLine,
    reset: ResetLine,
    quit: Arc<AtomicBool>,
    dump: Arc<AtomicU8>,
    faketype: Arc<AtomicBool>,

    transfer: Arc<Mutex<VideoState>>,
    events: Receiver<UiEvent>,
    render: VideoState,

    /// Scancode of the key currently down, to match the release.
    pressed_scancode: Option<u32>,
}

pub(crate) struct EventWiring {
    pub model: Model,
    pub keyboard: Arc<KeyboardWord>,
    pub keyboard_line: IrqLine,
    pub nmi: NmiLine,
    pub reset: ResetLine,
    pub quit: Arc<AtomicBool>,
    pub dump: Arc<AtomicU8>,
    pub faketype: Arc<AtomicBool>,
    pub transfer: Arc<Mutex<VideoState>>,
    pub events: Receiver<UiEvent>,
}

impl EventHub {
    pub(crate) fn new(wiring: EventWiring) -> Self {
        Self {
            model: wiring.model,
            keyboard: wiring.keyboard,
            keyboard_line: wiring.keyboard_line,
            nmi: wiring.nmi,
            reset: wiring.reset,
            quit: wiring.quit,
            dump: wiring.dump,
            faketype: wiring.faketype,
            transfer: wiring.transfer,
            events: wiring.events,
            render: VideoState::default(),
            pressed_scancode: None,
        }
    }

    /// Handle a key press. `scancode` identifies the physical key so
    /// the matching release can be recognized.
    pub fn key_down(&mut self, key: HostKey, shift: u8, scancode: u32) -> KeyAction {
        if shift & kshift::ALT != 0 {
            // Alt+key are special functions
            let hotkey = match key {
                HostKey::End | HostKey::Char('q') => {
                    self.quit.store(true, Ordering::Release);
                    Hotkey::Quit
                }
                HostKey::Char('s') => Hotkey::Screenshot,
                HostKey::Char('r') => {
                    self.reset.raise();
                    Hotkey::Reset
                }
                HostKey::Char('n') => {
                    self.nmi.raise();
                    Hotkey::Nmi
                }
                HostKey::Char('m') => {
                    self.dump.store(DUMP_MEM, Ordering::Release);
                    Hotkey::DumpMem
                }
                HostKey::Char('u') => {
                    self.dump.store(DUMP_RAM, Ordering::Release);
                    Hotkey::DumpRam
                }
                HostKey::Char('f') => {
                    self.faketype.fetch_xor(true, Ordering::AcqRel);
                    Hotkey::ToggleFaketype
                }
                _ => return KeyAction::Ignored,
            };
            return KeyAction::Hotkey(hotkey);
        }

        let Some(code) = decode_key(key, shift) else {
            return KeyAction::Ignored;
        };

        // The ABC80 keyboard has no codes above 127
        if self.model == Model::Abc80 && code & !127 != 0 {
            return KeyAction::Ignored;
        }

        // Remember which key so we can tell when it is released
        self.pressed_scancode = Some(scancode);

        // The word must be visible before the interrupt is
        self.keyboard.post_down(code);
        self.keyboard_line.raise();
        KeyAction::Key(code)
    }

    /// Handle a key release.
    pub fn key_up(&mut self, scancode: u32) {
        if self.pressed_scancode == Some(scancode) {
            self.pressed_scancode = None;
            self.keyboard.post_up();
        }
    }

    /// Ask the CPU thread to stop (window close, front-end shutdown).
    pub fn request_quit(&self) {
        self.quit.store(true, Ordering::Release);
    }

    /// Refresh notifications from the CPU thread.
    pub fn events(&self) -> &Receiver<UiEvent> {
        &self.events
    }

    /// Pull the latest published video snapshot for rendering.
    pub fn latest_video(&mut self) -> &VideoState {
        {
            let transfer = self.transfer.lock().unwrap();
            self.render = transfer.clone();
        }
        &self.render
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_plain_and_swedish() {
        assert_eq!(decode_key(HostKey::Char('a'), 0), Some(b'a'));
        assert_eq!(decode_key(HostKey::Char('A'), kshift::SHIFT), Some(b'A'));
        assert_eq!(decode_key(HostKey::Char('å'), 0), Some(b'}'));
        assert_eq!(decode_key(HostKey::Char('Ö'), kshift::SHIFT), Some(b'\\'));
        assert_eq!(decode_key(HostKey::Char('¤'), 0), Some(b'$'));
        assert_eq!(decode_key(HostKey::Escape, 0), Some(127));
        assert_eq!(decode_key(HostKey::Left, 0), Some(8));
    }

    #[test]
    fn test_decode_control_codes() {
        // Ctrl+C arrives as the control character
        assert_eq!(decode_key(HostKey::Char('\u{3}'), kshift::CTRL), Some(3));
        // Ctrl+Shift inverts bit 4
        assert_eq!(
            decode_key(HostKey::Char('\u{3}'), kshift::CTRL | kshift::SHIFT),
            Some(0x13)
        );
        // Ctrl+Space is NUL
        assert_eq!(decode_key(HostKey::Space, kshift::CTRL), Some(0));
        assert_eq!(decode_key(HostKey::Space, 0), Some(b' '));
    }

    #[test]
    fn test_decode_function_keys_carry_shift() {
        assert_eq!(decode_key(HostKey::F(1), 0), Some(192));
        assert_eq!(decode_key(HostKey::F(8), 0), Some(199));
        assert_eq!(decode_key(HostKey::F(1), kshift::SHIFT), Some(200));
    }

    #[test]
    fn test_undecodable_keys() {
        assert_eq!(decode_key(HostKey::Char('€'), 0), None);
        assert_eq!(decode_key(HostKey::F(12), 0), None);
    }
}
