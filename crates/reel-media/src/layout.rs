//! Layout Selector: identity count to slot arrangement on the canvas.

use serde::{Deserialize, Serialize};
use std::fmt;

use reel_models::{CanvasSize, IdentityId};

/// Maximum number of identities shown at once.
pub const MAX_SLOTS: usize = 4;

/// Template names, keyed by how many identities are shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutKind {
    /// Whole source frame, scaled to fit
    FullFrame,
    /// One identity filling the canvas
    Single,
    /// Two identities stacked vertically
    Dual,
    /// Two identities on top, one across the bottom
    Triple,
    /// 2x2 grid
    Grid,
}

impl LayoutKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayoutKind::FullFrame => "full_frame",
            LayoutKind::Single => "single",
            LayoutKind::Dual => "dual",
            LayoutKind::Triple => "triple",
            LayoutKind::Grid => "grid",
        }
    }

    /// Number of identity slots in this template.
    pub fn slot_count(&self) -> usize {
        match self {
            LayoutKind::FullFrame => 0,
            LayoutKind::Single => 1,
            LayoutKind::Dual => 2,
            LayoutKind::Triple => 3,
            LayoutKind::Grid => 4,
        }
    }
}

impl fmt::Display for LayoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Choose the template for a number of active identities.
pub fn select_layout(identity_count: usize) -> LayoutKind {
    match identity_count {
        0 => LayoutKind::FullFrame,
        1 => LayoutKind::Single,
        2 => LayoutKind::Dual,
        3 => LayoutKind::Triple,
        _ => LayoutKind::Grid,
    }
}

/// A slot rectangle on the canvas, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slot {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Slot {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Ordered slot rectangles for one layout on one canvas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutTemplate {
    pub kind: LayoutKind,
    pub canvas: CanvasSize,
    /// Filled in order by the prioritized identities; empty for `FullFrame`
    pub slots: Vec<Slot>,
}

impl LayoutTemplate {
    /// Template for `identity_count` identities. Odd canvas sizes give the extra
    /// pixel to the right or bottom slot so slots always tile the canvas.
    pub fn for_count(identity_count: usize, canvas: CanvasSize) -> Self {
        let kind = select_layout(identity_count);
        let (w, h) = (canvas.width, canvas.height);
        let (left_w, top_h) = (w / 2, h / 2);
        let (right_w, bottom_h) = (w - left_w, h - top_h);

        let slots = match kind {
            LayoutKind::FullFrame => Vec::new(),
            LayoutKind::Single => vec![Slot::new(0, 0, w, h)],
            LayoutKind::Dual => vec![Slot::new(0, 0, w, top_h), Slot::new(0, top_h, w, bottom_h)],
            LayoutKind::Triple => vec![
                Slot::new(0, 0, left_w, top_h),
                Slot::new(left_w, 0, right_w, top_h),
                Slot::new(0, top_h, w, bottom_h),
            ],
            LayoutKind::Grid => vec![
                Slot::new(0, 0, left_w, top_h),
                Slot::new(left_w, 0, right_w, top_h),
                Slot::new(0, top_h, left_w, bottom_h),
                Slot::new(left_w, top_h, right_w, bottom_h),
            ],
        };

        Self {
            kind,
            canvas,
            slots,
        }
    }
}

/// Order candidates by descending confidence (ties keep input order) and keep at most [`MAX_SLOTS`].
pub fn prioritize<T, F>(mut items: Vec<T>, confidence: F) -> Vec<T>
where
    F: Fn(&T) -> f64,
{
    items.sort_by(|a, b| confidence(b).total_cmp(&confidence(a)));
    items.truncate(MAX_SLOTS);
    items
}

/// The layout chosen for one scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutDecision {
    pub scene_index: usize,
    pub kind: LayoutKind,
    /// Identities in slot order
    pub identities: Vec<IdentityId>,
}
