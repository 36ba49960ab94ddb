// Input state tracking for keyboard and mouse
// Abstracts winit events into a queryable per-frame snapshot

use std::collections::HashSet;
use glam::Vec2;
use winit::event::{ElementState, MouseScrollDelta, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

pub struct InputState {
    keys_held: HashSet<KeyCode>,
    // Keys that went down this frame, cleared in end_frame()
    keys_pressed: HashSet<KeyCode>,

    // Scroll: accumulated vertical scroll this frame, reset in end_frame()
    pub scroll_delta: f32,
}

impl InputState {
    pub fn new() -> Self {
        Self {
            keys_held: HashSet::new(),
            keys_pressed: HashSet::new(),
            scroll_delta: 0.0,
        }
    }

    /// Feed a winit WindowEvent into the input state.
    /// Call this once per event before the game's own event handling.
    pub fn process_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(key) = event.physical_key {
                    match event.state {
                        ElementState::Pressed => {
                            // Key repeat arrives as further Pressed events; only the first counts.
                            if self.keys_held.insert(key) {
                                self.keys_pressed.insert(key);
                            }
                        }
                        ElementState::Released => { self.keys_held.remove(&key); }
                    }
                }
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let y = match delta {
                    MouseScrollDelta::LineDelta(_, y) => *y,
                    MouseScrollDelta::PixelDelta(pos) => pos.y as f32 / 100.0,
                };
                self.scroll_delta += y;
            }
            WindowEvent::Focused(false) => {
                // Releases are lost while unfocused; drop everything held.
                self.keys_held.clear();
            }
            _ => {}
        }
    }

    /// Call once per frame after update() and render() have consumed input.
    /// Resets per-frame accumulators.
    pub fn end_frame(&mut self) {
        self.scroll_delta = 0.0;
        self.keys_pressed.clear();
    }

    pub fn is_key_held(&self, key: KeyCode) -> bool {
        self.keys_held.contains(&key)
    }

    pub fn was_key_pressed(&self, key: KeyCode) -> bool {
        self.keys_pressed.contains(&key)
    }

    /// -1, 0 or 1 depending on which of the two keys is held.
    pub fn axis(&self, negative: KeyCode, positive: KeyCode) -> f32 {
        let mut value = 0.0;
        if self.is_key_held(negative) { value -= 1.0; }
        if self.is_key_held(positive) { value += 1.0; }
        value
    }

    /// WASD / arrow movement: x = strafe right, y = forward.
    pub fn movement(&self) -> Vec2 {
        let x = (self.axis(KeyCode::KeyA, KeyCode::KeyD) + self.axis(KeyCode::ArrowLeft, KeyCode::ArrowRight))
            .clamp(-1.0, 1.0);
        let y = (self.axis(KeyCode::KeyS, KeyCode::KeyW) + self.axis(KeyCode::ArrowDown, KeyCode::ArrowUp))
            .clamp(-1.0, 1.0);
        Vec2::new(x, y)
    }
}
