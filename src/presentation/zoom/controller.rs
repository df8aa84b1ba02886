//! Zoom and pan state machine for one displayed image.
//!
//! The controller is driven by serial gesture callbacks and answers each one
//! with the transform the renderer should show and how to get there. It holds
//! no image data, only the intrinsic size of the current image.
//!
//! Invariants after every event:
//! - `min_scale <= scale <= max_scale`
//! - the offset lies inside [`pan_bounds`] for the current scale

use std::time::Duration;

use tracing::trace;

use crate::infrastructure::config::ZoomConfig;

use super::geometry::{Point, Size, clamp_offset, pan_bounds};

const SCALE_EPSILON: f32 = 1e-4;

/// Resting or zoomed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoomPhase {
    /// Scale is at the minimum and the image is centered.
    Resting,
    /// Scale is above the minimum.
    Zoomed,
}

/// Gesture currently in progress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GestureState {
    /// No finger down.
    Idle,
    /// Two-finger pinch.
    Pinching {
        /// Previous finger spread, if a distance has been reported.
        last_distance: Option<f32>,
    },
    /// Moving a zoomed image.
    Panning {
        /// Offset when the pan began.
        start_offset: Point,
    },
    /// Dragging an unzoomed image towards dismissal.
    Dragging {
        /// Total drag since the gesture began.
        translation: Point,
    },
}

/// How the renderer should move to a new transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Animation {
    /// Apply at once; used while a finger is down.
    Immediate,
    /// Ease over the given duration.
    Eased(Duration),
    /// Spring back to the target.
    Spring,
}

/// Target transform produced by an event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomTransition {
    /// Target scale.
    pub scale: f32,
    /// Target offset from the viewport center.
    pub offset: Point,
    /// How to reach the target.
    pub animation: Animation,
}

/// Result of releasing a drag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GestureOutcome {
    /// Move to the given transform.
    Transition(ZoomTransition),
    /// The unzoomed image was dragged past the dismiss threshold.
    Dismiss,
}

/// Transform state of the displayed image.
///
/// Offsets are measured from the viewport center in viewport points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomState {
    /// Current scale.
    pub scale: f32,
    /// Current offset.
    pub offset: Point,
    /// Last pinch anchor, relative to the viewport center.
    pub anchor: Point,
    /// Scale when the last gesture ended.
    pub committed_scale: f32,
    /// Offset when the last gesture ended.
    pub committed_offset: Point,
}

impl ZoomState {
    const fn identity(min_scale: f32) -> Self {
        Self {
            scale: min_scale,
            offset: Point::ZERO,
            anchor: Point::ZERO,
            committed_scale: min_scale,
            committed_offset: Point::ZERO,
        }
    }
}

/// Gesture-driven zoom controller.
#[derive(Debug, Clone)]
pub struct ZoomViewController {
    config: ZoomConfig,
    state: ZoomState,
    gesture: GestureState,
    image: Size,
    viewport: Size,
}

impl ZoomViewController {
    /// Creates a resting controller. Inconsistent bounds are repaired first.
    #[must_use]
    pub fn new(config: ZoomConfig) -> Self {
        let config = config.sanitized();
        Self {
            config,
            state: ZoomState::identity(config.min_scale),
            gesture: GestureState::Idle,
            image: Size::ZERO,
            viewport: Size::ZERO,
        }
    }

    /// Effective configuration.
    #[must_use]
    pub const fn config(&self) -> &ZoomConfig {
        &self.config
    }

    /// Current transform state.
    #[must_use]
    pub const fn state(&self) -> &ZoomState {
        &self.state
    }

    /// Gesture in progress.
    #[must_use]
    pub const fn gesture(&self) -> GestureState {
        self.gesture
    }

    /// Current scale.
    #[must_use]
    pub const fn scale(&self) -> f32 {
        self.state.scale
    }

    /// Current offset from the viewport center.
    #[must_use]
    pub const fn offset(&self) -> Point {
        self.state.offset
    }

    /// Resting at the minimum scale, or zoomed.
    #[must_use]
    pub fn phase(&self) -> ZoomPhase {
        if self.state.scale > self.config.min_scale + SCALE_EPSILON {
            ZoomPhase::Zoomed
        } else {
            ZoomPhase::Resting
        }
    }

    /// Pan limits for the current scale.
    #[must_use]
    pub fn bounds(&self) -> Point {
        pan_bounds(self.image, self.viewport, self.state.scale)
    }

    /// Fraction of the dismiss threshold covered by the current drag.
    #[must_use]
    pub fn dismiss_progress(&self) -> f32 {
        match self.gesture {
            GestureState::Dragging { translation } => {
                (translation.y.abs() / self.config.dismiss_threshold).min(1.0)
            }
            _ => 0.0,
        }
    }

    /// Shows a new image, discarding any transform or gesture.
    pub fn set_image(&mut self, intrinsic: Size) -> ZoomTransition {
        self.image = if intrinsic.is_valid() {
            intrinsic
        } else {
            Size::ZERO
        };
        self.reset()
    }

    /// Resizes the viewport and re-clamps the offset.
    pub fn set_viewport(&mut self, viewport: Size) -> ZoomTransition {
        if !viewport.is_valid() {
            return self.current(Animation::Immediate);
        }
        self.viewport = viewport;
        let bounds = self.bounds();
        self.state.offset = clamp_offset(self.state.offset, bounds);
        self.state.committed_offset = clamp_offset(self.state.committed_offset, bounds);
        if let GestureState::Panning { start_offset } = &mut self.gesture {
            *start_offset = clamp_offset(*start_offset, bounds);
        }
        self.current(Animation::Immediate)
    }

    /// Returns to rest at once.
    pub fn reset(&mut self) -> ZoomTransition {
        self.gesture = GestureState::Idle;
        self.state = ZoomState::identity(self.config.min_scale);
        self.current(Animation::Immediate)
    }

    /// Starts a pinch with the given finger spread.
    ///
    /// `anchor` is the focal point in viewport coordinates.
    pub fn pinch_began(&mut self, anchor: Point, distance: f32) -> ZoomTransition {
        self.gesture = GestureState::Pinching {
            last_distance: valid_magnitude(distance),
        };
        self.state.anchor = self.relative_anchor(anchor);
        self.current(Animation::Immediate)
    }

    /// Applies the ratio between `distance` and the previous spread.
    pub fn pinch_changed(&mut self, anchor: Point, distance: f32) -> ZoomTransition {
        let Some(distance) = valid_magnitude(distance) else {
            return self.current(Animation::Immediate);
        };
        let previous = match self.gesture {
            GestureState::Pinching { last_distance } => last_distance,
            _ => None,
        };
        self.gesture = GestureState::Pinching {
            last_distance: Some(distance),
        };
        match previous {
            Some(previous) => self.apply_factor(anchor, distance / previous),
            None => self.current(Animation::Immediate),
        }
    }

    /// Applies an incremental scale factor directly.
    pub fn pinch_by(&mut self, anchor: Point, factor: f32) -> ZoomTransition {
        if !matches!(self.gesture, GestureState::Pinching { .. }) {
            self.gesture = GestureState::Pinching {
                last_distance: None,
            };
        }
        if valid_magnitude(factor).is_none() {
            return self.current(Animation::Immediate);
        }
        self.apply_factor(anchor, factor)
    }

    /// Ends a pinch: snaps back to rest at the minimum, commits otherwise.
    pub fn pinch_ended(&mut self) -> ZoomTransition {
        if !matches!(self.gesture, GestureState::Pinching { .. }) {
            return self.current(Animation::Immediate);
        }
        self.gesture = GestureState::Idle;

        if self.phase() == ZoomPhase::Resting {
            self.state = ZoomState::identity(self.config.min_scale);
            return self.current(self.eased());
        }
        self.commit();
        self.current(Animation::Immediate)
    }

    /// Starts a one-finger drag.
    ///
    /// A zoomed image pans; a resting image is dragged towards dismissal.
    pub fn pan_began(&mut self) -> ZoomTransition {
        if matches!(self.gesture, GestureState::Pinching { .. }) {
            return self.current(Animation::Immediate);
        }
        self.gesture = match self.phase() {
            ZoomPhase::Zoomed => GestureState::Panning {
                start_offset: self.state.committed_offset,
            },
            ZoomPhase::Resting => GestureState::Dragging {
                translation: Point::ZERO,
            },
        };
        self.current(Animation::Immediate)
    }

    /// Applies the total translation since the drag began.
    pub fn pan_changed(&mut self, translation: Point) -> ZoomTransition {
        if !translation.is_finite() {
            return self.current(Animation::Immediate);
        }
        if self.gesture == GestureState::Idle {
            self.pan_began();
        }
        match self.gesture {
            GestureState::Panning { start_offset } => {
                self.state.offset = clamp_offset(start_offset + translation, self.bounds());
            }
            GestureState::Dragging { .. } => {
                self.gesture = GestureState::Dragging { translation };
            }
            GestureState::Idle | GestureState::Pinching { .. } => {}
        }
        self.current(Animation::Immediate)
    }

    /// Releases a drag.
    pub fn pan_ended(&mut self) -> GestureOutcome {
        match self.gesture {
            GestureState::Panning { .. } => {
                self.gesture = GestureState::Idle;
                self.commit();
                GestureOutcome::Transition(self.current(Animation::Immediate))
            }
            GestureState::Dragging { translation } => {
                self.gesture = GestureState::Idle;
                if translation.y.abs() > self.config.dismiss_threshold {
                    trace!(distance = translation.y, "Swipe dismissed viewer");
                    GestureOutcome::Dismiss
                } else {
                    GestureOutcome::Transition(self.current(Animation::Spring))
                }
            }
            GestureState::Idle | GestureState::Pinching { .. } => {
                GestureOutcome::Transition(self.current(Animation::Immediate))
            }
        }
    }

    /// Toggles between rest and the double-tap scale, recentered.
    pub fn double_tap(&mut self) -> ZoomTransition {
        self.gesture = GestureState::Idle;
        let scale = match self.phase() {
            ZoomPhase::Resting => self.config.double_tap_scale(),
            ZoomPhase::Zoomed => self.config.min_scale,
        };
        self.state = ZoomState {
            scale,
            committed_scale: scale,
            ..ZoomState::identity(self.config.min_scale)
        };
        trace!(scale, "Double tap zoom");
        self.current(self.eased())
    }

    fn apply_factor(&mut self, anchor: Point, factor: f32) -> ZoomTransition {
        let scale = self.state.scale;
        let target = (scale * factor).clamp(self.config.min_scale, self.config.max_scale);
        let ratio = target / scale;
        let anchor = self.relative_anchor(anchor);

        // Keep the content under the anchor fixed while scaling.
        let offset = anchor + (self.state.offset - anchor) * ratio;
        self.state.scale = target;
        self.state.anchor = anchor;
        self.state.offset = clamp_offset(offset, self.bounds());
        self.current(Animation::Immediate)
    }

    fn relative_anchor(&self, anchor: Point) -> Point {
        if anchor.is_finite() && self.viewport.is_valid() {
            anchor - self.viewport.center()
        } else {
            Point::ZERO
        }
    }

    fn commit(&mut self) {
        self.state.committed_scale = self.state.scale;
        self.state.committed_offset = self.state.offset;
    }

    fn eased(&self) -> Animation {
        Animation::Eased(Duration::from_millis(self.config.animation_millis))
    }

    const fn current(&self, animation: Animation) -> ZoomTransition {
        ZoomTransition {
            scale: self.state.scale,
            offset: self.state.offset,
            animation,
        }
    }
}

impl Default for ZoomViewController {
    fn default() -> Self {
        Self::new(ZoomConfig::default())
    }
}

fn valid_magnitude(value: f32) -> Option<f32> {
    (value.is_finite() && value > 0.0).then_some(value)
}
