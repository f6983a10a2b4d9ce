//! The 32-byte input-event wire format shared by keyboard and mouse state,
//! plus the bounded queue `read_input_event` drains.

use std::collections::VecDeque;

pub const EVENT_SIZE: usize = 32;
const MAX_PENDING_EVENTS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Mouse,
    Keyboard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseSubKind {
    Down,
    Up,
    Move,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySubKind {
    Press,
    Release,
}

#[derive(Debug, Clone, Copy)]
pub enum InputEvent {
    Mouse { sub_kind: MouseSubKind, button: u8, x: i32, y: i32, modifiers: u8 },
    Keyboard { sub_kind: KeySubKind, keycode: u8, modifiers: u8 },
}

impl InputEvent {
    /// Encodes into the 32-byte wire record: byte 0 = kind tag, byte 4 =
    /// sub-kind, byte 5 = button/modifier, bytes 6..9 = x, 10..13 = y,
    /// byte 14 = modifier bitmask, remainder reserved.
    pub fn to_wire(self) -> [u8; EVENT_SIZE] {
        let mut buf = [0u8; EVENT_SIZE];
        match self {
            InputEvent::Mouse { sub_kind, button, x, y, modifiers } => {
                buf[0] = EventKind::Mouse as u8;
                buf[4] = match sub_kind {
                    MouseSubKind::Down => 0,
                    MouseSubKind::Up => 1,
                    MouseSubKind::Move => 2,
                };
                buf[5] = button;
                buf[6..10].copy_from_slice(&x.to_le_bytes());
                buf[10..14].copy_from_slice(&y.to_le_bytes());
                buf[14] = modifiers;
            }
            InputEvent::Keyboard { sub_kind, keycode, modifiers } => {
                buf[0] = EventKind::Keyboard as u8;
                buf[4] = match sub_kind {
                    KeySubKind::Press => 0,
                    KeySubKind::Release => 1,
                };
                buf[5] = keycode;
                buf[14] = modifiers;
            }
        }
        buf
    }
}

/// Bounded FIFO of pending events; oldest events are dropped once full so a
/// stalled guest cannot grow the queue without bound.
#[derive(Default)]
pub struct InputQueue {
    pending: VecDeque<InputEvent>,
}

impl InputQueue {
    pub fn new() -> Self {
        InputQueue { pending: VecDeque::new() }
    }

    pub fn push(&mut self, event: InputEvent) {
        if self.pending.len() >= MAX_PENDING_EVENTS {
            self.pending.pop_front();
        }
        self.pending.push_back(event);
    }

    pub fn pop(&mut self) -> Option<InputEvent> {
        self.pending.pop_front()
    }
}
