//! Decodes PS/2 scancodes into keyboard input events using the same
//! scancode-set/event-decoder pipeline the host console driver uses.

use log::trace;
use pc_keyboard::{EventDecoder, HandleControl, KeyState, ScancodeSet, ScancodeSet1, layouts::Us104Key};

use super::input::{InputEvent, KeySubKind};

pub struct KeyboardState {
    scancode_set: ScancodeSet1,
    event_decoder: EventDecoder<Us104Key>,
    modifiers: u8,
}

const MOD_SHIFT: u8 = 0b0001;
const MOD_CTRL: u8 = 0b0010;
const MOD_ALT: u8 = 0b0100;

impl KeyboardState {
    pub fn new() -> Self {
        KeyboardState {
            scancode_set: ScancodeSet1::new(),
            event_decoder: EventDecoder::new(Us104Key, HandleControl::Ignore),
            modifiers: 0,
        }
    }

    /// Advances the PS/2 byte-stream state machine by one scancode byte,
    /// returning a decoded event when a full key event has been assembled.
    pub fn feed_scancode(&mut self, scancode: u8) -> Option<InputEvent> {
        let key_event = self.scancode_set.advance_state(scancode).ok()??;
        let sub_kind = match key_event.state {
            KeyState::Down => KeySubKind::Press,
            KeyState::Up => KeySubKind::Release,
        };
        let keycode = key_event.code as u8;
        self.update_modifiers(&key_event.code, sub_kind);
        if let Some(decoded) = self.event_decoder.process_keyevent(key_event) {
            trace!("decoded key event: {decoded:?}");
        }
        Some(InputEvent::Keyboard { sub_kind, keycode, modifiers: self.modifiers })
    }

    fn update_modifiers(&mut self, code: &pc_keyboard::KeyCode, sub_kind: KeySubKind) {
        use pc_keyboard::KeyCode::*;
        let bit = match code {
            LShift | RShift => MOD_SHIFT,
            LControl | RControl => MOD_CTRL,
            LAlt | RAltGr => MOD_ALT,
            _ => return,
        };
        match sub_kind {
            KeySubKind::Press => self.modifiers |= bit,
            KeySubKind::Release => self.modifiers &= !bit,
        }
    }
}

impl Default for KeyboardState {
    fn default() -> Self {
        Self::new()
    }
}
