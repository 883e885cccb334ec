//! # transmute
//!
//! Convert an image from one format to another, optionally resizing it,
//! reading and writing files, pipes, or the system clipboard.
//!
//! # Architecture: One Pass Pipeline
//!
//! Every invocation runs exactly one conversion:
//!
//! ```text
//! locator ─read─> bytes ─decode─> CanonicalImage ─resize─> CanonicalImage ─encode─> bytes ─write─> locator
//! ```
//!
//! Formats never talk to each other. Each codec turns its bytes into a
//! [`CanonicalImage`](imaging::CanonicalImage) (8-bit RGB or RGBA) and back,
//! so N formats need N codecs rather than N² converters.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`pipeline`] | Runs one conversion through its stages and classifies failures |
//! | [`locator`] | Paths, standard streams, clipboard: resolution, reading, atomic writes |
//! | [`formats`] | The format registry and every codec |
//! | [`imaging`] | The canonical raster, alpha compositing, aspect-preserving resize |
//! | [`config`] | Optional `config.toml`: loading, merging, validation |
//! | [`output`] | Human-readable messages for stderr |
//!
//! # Design Decisions
//!
//! ## Codecs as Function Pairs
//!
//! A format is a [`FormatDescriptor`](formats::FormatDescriptor) holding a
//! decode and an encode function. Adding a format is one registry entry; no
//! trait objects, no per-format types leaking into the pipeline.
//!
//! ## Pure Rust, No System Libraries
//!
//! PNG, JPEG, ICO, TGA and WebP go through the `image` crate. The formats it
//! cannot write in the required shape (GIF 87a, top-down BMP, big-endian
//! TIFF) and the ones it does not know (PSD, EPS, PDF, PICT, JPEG 2000) have
//! small in-house codecs. Nothing links against ImageMagick or libjpeg, so
//! the binary is self-contained.
//!
//! ## Fail Whole or Not at All
//!
//! Output is encoded completely in memory and written through a temporary
//! file renamed over the destination, so every failure, from an unknown
//! extension to a truncated input, leaves the destination untouched and
//! exits with status 255.

pub mod config;
pub mod formats;
pub mod imaging;
pub mod locator;
pub mod output;
pub mod pipeline;
