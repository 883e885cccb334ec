//! Parameter types for image operations.
//!
//! These structs describe *what* to do, not *how* to do it. They are the
//! interface between the request (CLI flags, config) and the code that does
//! the pixel work.
//!
//! ## Types
//!
//! - [`Quality`]: Lossy encoding quality (1–100, default 90). Clamped on construction.
//! - [`ResizeSpec`]: A single-axis resize target, exactly as the caller gave it.

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(90)
    }
}

/// Resize target along one axis; the other axis follows the aspect ratio.
///
/// Values are kept signed and unvalidated so that a non-positive request
/// reaches the resize engine and fails there as an invalid dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeSpec {
    Width(i64),
    Height(i64),
}

impl ResizeSpec {
    /// Build from the optional `-W` / `-H` values. Width wins if both are set.
    pub fn from_axes(width: Option<i64>, height: Option<i64>) -> Option<Self> {
        match (width, height) {
            (Some(w), _) => Some(Self::Width(w)),
            (None, Some(h)) => Some(Self::Height(h)),
            (None, None) => None,
        }
    }

    pub fn value(self) -> i64 {
        match self {
            ResizeSpec::Width(v) | ResizeSpec::Height(v) => v,
        }
    }

    pub fn axis_name(self) -> &'static str {
        match self {
            ResizeSpec::Width(_) => "width",
            ResizeSpec::Height(_) => "height",
        }
    }
}
