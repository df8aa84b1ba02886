//! Presentation layer with viewer interaction state.

/// Zoom and pan state machine.
pub mod zoom;

pub use zoom::{
    Animation, GestureOutcome, Point, Size, ZoomPhase, ZoomTransition, ZoomViewController,
};
