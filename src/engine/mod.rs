// Engine module - field-of-view sensing plus the demo scene around it

pub mod aim;
pub mod camera;
pub mod collision;
pub mod components;
pub mod debug_overlay;
pub mod detection;
pub mod grid;
pub mod input;
pub mod mesh;
pub mod sensor;
pub mod systems;

// Re-export commonly used items
pub use components::*;
