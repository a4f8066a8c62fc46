//! Whiteboard drawing operations relayed between participants.
//!
//! Operations are plain data. Rendering them is the job of whatever surface
//! consumes the relay's output.

use serde::{Deserialize, Serialize};

/// Freehand tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrokeTool {
    /// Draws with `color`
    #[default]
    Pen,
    /// Erases along the path
    Eraser,
}

/// One point of a freehand stroke
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrokePoint {
    /// Canvas x coordinate
    pub x: f64,
    /// Canvas y coordinate
    pub y: f64,
    /// CSS color string
    pub color: String,
    /// Tool in use
    #[serde(default)]
    pub tool: StrokeTool,
    /// Stroke width in canvas pixels
    pub line_width: f64,
}

/// Two-point geometry shared by rectangles, lines and arrows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Start x
    pub x1: f64,
    /// Start y
    pub y1: f64,
    /// End x
    pub x2: f64,
    /// End y
    pub y2: f64,
    /// Stroke color
    #[serde(default)]
    pub color: Option<String>,
}

/// Circle geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircleGeometry {
    /// Center x
    pub x: f64,
    /// Center y
    pub y: f64,
    /// Radius in canvas pixels
    pub radius: f64,
    /// Stroke color
    #[serde(default)]
    pub color: Option<String>,
}

/// A finished shape, tagged by the drawing tool that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "lowercase")]
pub enum ShapeOp {
    /// Axis-aligned rectangle spanning the segment
    Rectangle(Segment),
    /// Circle
    Circle(CircleGeometry),
    /// Straight line
    Line(Segment),
    /// Line with an arrow head at the end point
    Arrow(Segment),
}

/// Image placed on the canvas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageOp {
    /// Image source, usually a data URL
    pub src: String,
    /// Top-left x
    pub x: f64,
    /// Top-left y
    pub y: f64,
    /// Rendered width, natural width when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    /// Rendered height, natural height when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
}

/// Text label placed on the canvas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextOp {
    /// Label content
    pub text: String,
    /// Baseline x
    pub x: f64,
    /// Baseline y
    pub y: f64,
    /// Font size in pixels
    pub font_size: f64,
    /// CSS color string
    pub color: String,
}

/// One drawing operation, tagged by `type` on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WhiteboardOp {
    /// Pen down
    Start(StrokePoint),
    /// Pen moved
    Draw(StrokePoint),
    /// Pen up
    End,
    /// Completed shape
    Shape(ShapeOp),
    /// Wipe the whole canvas
    Clear,
    /// Inserted image
    Image(ImageOp),
    /// Inserted text
    Text(TextOp),
}

impl WhiteboardOp {
    /// Wire name of the operation, used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Start(_) => "start",
            Self::Draw(_) => "draw",
            Self::End => "end",
            Self::Shape(_) => "shape",
            Self::Clear => "clear",
            Self::Image(_) => "image",
            Self::Text(_) => "text",
        }
    }
}
