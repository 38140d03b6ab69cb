//! Committed drawing operations and the stroke drafts clients submit.

use kurbo::{Point, Rect};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier of a committed operation.
pub type OperationId = Uuid;

/// Identifier of a connected session (and of the user bound to it).
pub type UserId = String;

/// Drawing tools a stroke can be made with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    #[default]
    Brush,
    Eraser,
}

impl ToolKind {
    /// Composite mode a renderer must use when replaying this tool.
    pub fn composite_mode(self) -> CompositeMode {
        match self {
            ToolKind::Brush => CompositeMode::SourceOver,
            ToolKind::Eraser => CompositeMode::DestinationOut,
        }
    }

    /// Operation kind recorded in the log for this tool.
    pub fn operation_kind(self) -> OperationKind {
        match self {
            ToolKind::Brush => OperationKind::Draw,
            ToolKind::Eraser => OperationKind::Erase,
        }
    }
}

/// How a stroke is blended onto the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompositeMode {
    /// Paint over existing pixels.
    SourceOver,
    /// Clear existing pixels under the stroke.
    DestinationOut,
}

/// Kind of a logged operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Draw,
    Erase,
}

/// Reasons a stroke payload is rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StrokeError {
    #[error("stroke has no points")]
    Empty,
    #[error("point {0} has a non-finite coordinate")]
    NonFinitePoint(usize),
    #[error("invalid stroke size: {0}")]
    InvalidSize(f64),
}

/// A stroke as submitted by a client, before the server finalizes it.
///
/// Used both for in-progress previews and for committed strokes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokeDraft {
    /// Points in the stroke path.
    pub points: Vec<Point>,
    pub tool: ToolKind,
    /// CSS color string. Ignored by renderers for the eraser.
    pub color: String,
    /// Stroke width in canvas units.
    pub size: f64,
}

impl StrokeDraft {
    /// Create an empty draft with the given styling.
    pub fn new(tool: ToolKind, color: impl Into<String>, size: f64) -> Self {
        Self {
            points: Vec::new(),
            tool,
            color: color.into(),
            size,
        }
    }

    /// Replace the point path.
    pub fn with_points(mut self, points: Vec<Point>) -> Self {
        self.points = points;
        self
    }

    /// Validate a draft that is about to be committed to the log.
    pub fn validate(&self) -> Result<(), StrokeError> {
        if self.points.is_empty() {
            return Err(StrokeError::Empty);
        }
        self.validate_preview()
    }

    /// Validate a preview batch. Previews may carry no points.
    pub fn validate_preview(&self) -> Result<(), StrokeError> {
        if !self.size.is_finite() || self.size <= 0.0 {
            return Err(StrokeError::InvalidSize(self.size));
        }
        if let Some(index) = self.points.iter().position(|p| !p.is_finite()) {
            return Err(StrokeError::NonFinitePoint(index));
        }
        Ok(())
    }
}

/// A committed drawing action.
///
/// Everything except the `undone` tombstone is fixed at creation; the
/// composite mode and kind are always derived from the tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    id: OperationId,
    user_id: UserId,
    #[serde(rename = "type")]
    kind: OperationKind,
    tool: ToolKind,
    color: String,
    size: f64,
    points: Vec<Point>,
    ts: u64,
    composite_mode: CompositeMode,
    undone: bool,
}

impl Operation {
    pub(crate) fn from_draft(user_id: &str, draft: StrokeDraft, ts: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            kind: draft.tool.operation_kind(),
            tool: draft.tool,
            color: draft.color,
            size: draft.size,
            points: draft.points,
            ts,
            composite_mode: draft.tool.composite_mode(),
            undone: false,
        }
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    /// Session that committed the stroke.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn tool(&self) -> ToolKind {
        self.tool
    }

    pub fn color(&self) -> &str {
        &self.color
    }

    pub fn size(&self) -> f64 {
        self.size
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Server-assigned creation time in milliseconds since the Unix epoch.
    pub fn ts(&self) -> u64 {
        self.ts
    }

    pub fn composite_mode(&self) -> CompositeMode {
        self.composite_mode
    }

    /// Whether the operation is currently tombstoned by a global undo.
    pub fn is_undone(&self) -> bool {
        self.undone
    }

    pub(crate) fn set_undone(&mut self, undone: bool) {
        self.undone = undone;
    }

    /// Bounding box of the stroke path, widened by half the stroke size.
    pub fn bounds(&self) -> Rect {
        let Some(first) = self.points.first() else {
            return Rect::ZERO;
        };
        let rect = self
            .points
            .iter()
            .skip(1)
            .fold(Rect::from_points(*first, *first), |rect, p| {
                rect.union_pt(*p)
            });
        rect.inflate(self.size / 2.0, self.size / 2.0)
    }
}
