//! CLI output formatting.
//!
//! Standard output may be carrying image bytes, so everything meant for a
//! person goes to standard error.
//!
//! # Output Format
//!
//! ## Failure
//!
//! ```text
//! transmute: unknown format: unrecognized file extension ".xxx" in target.xxx
//! ```
//!
//! ## Verbose conversion
//!
//! ```text
//! Source: source.eps (eps)
//! Destination: target.png (png)
//!     Size: 128x148 -> 110x127
//!     Layout: RGBA
//!     Wrote 23817 bytes
//! ```
//!
//! ## Formats
//!
//! ```text
//! ID    DECODE ENCODE ALPHA  EXTENSIONS
//! png   yes    yes    yes    png
//! gif   yes    yes    1-bit  gif
//! ```
//!
//! # Architecture
//!
//! Each message has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stderr. Format
//! functions are pure: no I/O, no side effects.

use crate::formats::FormatDescriptor;
use crate::locator::Locator;
use crate::pipeline::ConversionReport;

const PROGRAM: &str = "transmute";

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

fn endpoint(locator: &Locator, format: Option<&str>) -> String {
    match format {
        Some(id) => format!("{locator} ({id})"),
        None => locator.to_string(),
    }
}

// ============================================================================
// Errors
// ============================================================================

/// One line naming the failure.
pub fn format_error(err: &dyn std::error::Error) -> Vec<String> {
    vec![format!("{PROGRAM}: {err}")]
}

pub fn print_error(err: &dyn std::error::Error) {
    for line in format_error(err) {
        eprintln!("{}", line);
    }
}

// ============================================================================
// Conversion report
// ============================================================================

pub fn format_report(report: &ConversionReport) -> Vec<String> {
    let mut lines = vec![
        format!("Source: {}", endpoint(&report.source, report.source_format)),
        format!(
            "Destination: {}",
            endpoint(&report.destination, report.destination_format)
        ),
    ];
    let (iw, ih) = report.input_size;
    let (ow, oh) = report.output_size;
    if report.input_size == report.output_size {
        lines.push(format!("{}Size: {iw}x{ih}", indent(1)));
    } else {
        lines.push(format!("{}Size: {iw}x{ih} -> {ow}x{oh}", indent(1)));
    }
    lines.push(format!("{}Layout: {}", indent(1), report.layout));
    if report.bytes_written > 0 {
        lines.push(format!("{}Wrote {} bytes", indent(1), report.bytes_written));
    }
    lines
}

pub fn print_report(report: &ConversionReport) {
    for line in format_report(report) {
        eprintln!("{}", line);
    }
}

// ============================================================================
// Formats listing
// ============================================================================

pub fn format_formats_listing(descriptors: &[FormatDescriptor]) -> Vec<String> {
    let mut lines = vec![format!(
        "{:<5} {:<6} {:<6} {:<6} EXTENSIONS",
        "ID", "DECODE", "ENCODE", "ALPHA"
    )];
    for d in descriptors {
        let alpha = match (d.supports_alpha, d.id) {
            (true, "gif") => "1-bit",
            (flag, _) => yes_no(flag),
        };
        lines.push(format!(
            "{:<5} {:<6} {:<6} {:<6} {}",
            d.id,
            yes_no(d.can_decode),
            yes_no(d.can_encode),
            alpha,
            d.extensions.join(", ")
        ));
    }
    lines
}

pub fn print_formats_listing(descriptors: &[FormatDescriptor]) {
    for line in format_formats_listing(descriptors) {
        eprintln!("{}", line);
    }
}
