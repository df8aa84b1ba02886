//! Gesture-driven zoom and pan for a displayed image.

mod controller;
mod geometry;

pub use controller::{
    Animation, GestureOutcome, GestureState, ZoomPhase, ZoomState, ZoomTransition,
    ZoomViewController,
};
pub use geometry::{Point, Size, clamp_offset, pan_bounds};
