//! Pure calculation functions for resize dimensions.
//!
//! All functions here are pure and testable without any I/O or images.

/// Scale `other` by `target / axis`, rounding half up, never below 1.
///
/// The division is done on integers so the result does not depend on
/// floating point behaviour: `floor((other * target * 2 + axis) / (2 * axis))`.
///
/// # Examples
/// ```
/// # use transmute::imaging::scale_other_axis;
/// // 128x148 narrowed to 110 wide → 127.1875 → 127
/// assert_eq!(scale_other_axis(128, 148, 110), 127);
/// // exactly half way rounds up: 3 * 1 / 2 = 1.5 → 2
/// assert_eq!(scale_other_axis(2, 3, 1), 2);
/// ```
pub fn scale_other_axis(axis: u32, other: u32, target: u32) -> u32 {
    let axis = axis as u64;
    let numerator = other as u64 * target as u64 * 2 + axis;
    let scaled = numerator / (2 * axis);
    scaled.clamp(1, u32::MAX as u64) as u32
}

/// Output dimensions for a width-only request, preserving aspect ratio.
pub fn fit_width(source: (u32, u32), target_width: u32) -> (u32, u32) {
    let (w, h) = source;
    (target_width, scale_other_axis(w, h, target_width))
}

/// Output dimensions for a height-only request, preserving aspect ratio.
pub fn fit_height(source: (u32, u32), target_height: u32) -> (u32, u32) {
    let (w, h) = source;
    (scale_other_axis(h, w, target_height), target_height)
}
