//! Tracks button and position state for a PS/2-style relative-motion mouse.

use super::input::{InputEvent, MouseSubKind};

#[derive(Debug, Clone, Copy, Default)]
pub struct MouseState {
    pub x: i32,
    pub y: i32,
    pub buttons: u8,
}

impl MouseState {
    pub fn new() -> Self {
        MouseState { x: 0, y: 0, buttons: 0 }
    }

    pub fn move_by(&mut self, dx: i32, dy: i32, max_x: i32, max_y: i32) -> InputEvent {
        self.x = (self.x + dx).clamp(0, max_x);
        self.y = (self.y + dy).clamp(0, max_y);
        InputEvent::Mouse {
            sub_kind: MouseSubKind::Move,
            button: 0,
            x: self.x,
            y: self.y,
            modifiers: 0,
        }
    }

    pub fn button_down(&mut self, button: u8) -> InputEvent {
        self.buttons |= 1 << button;
        InputEvent::Mouse {
            sub_kind: MouseSubKind::Down,
            button,
            x: self.x,
            y: self.y,
            modifiers: 0,
        }
    }

    pub fn button_up(&mut self, button: u8) -> InputEvent {
        self.buttons &= !(1 << button);
        InputEvent::Mouse {
            sub_kind: MouseSubKind::Up,
            button,
            x: self.x,
            y: self.y,
            modifiers: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movement_clamps_to_screen_bounds() {
        let mut mouse = MouseState::new();
        mouse.move_by(-10, -10, 320, 200);
        assert_eq!((mouse.x, mouse.y), (0, 0));
        mouse.move_by(400, 400, 320, 200);
        assert_eq!((mouse.x, mouse.y), (320, 200));
    }

    #[test]
    fn button_down_sets_bit_and_up_clears_it() {
        let mut mouse = MouseState::new();
        mouse.button_down(0);
        assert_eq!(mouse.buttons & 1, 1);
        mouse.button_up(0);
        assert_eq!(mouse.buttons & 1, 0);
    }
}
