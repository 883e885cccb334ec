//! Format registry and codecs.
//!
//! Every supported format is one [`FormatDescriptor`]: an identifier, the file
//! extensions that select it, capability flags, and a [`Codec`], a pair of
//! plain functions that turn bytes into a [`CanonicalImage`] and back. Adding
//! a format means adding one entry to [`REGISTRY`]; nothing dispatches on
//! concrete codec types.
//!
//! | Format | Decode | Encode | Alpha |
//! |---|---|---|---|
//! | PNG, ICO, TGA, WebP | `image` | `image` | yes |
//! | JPEG | `image` | `image` (JFIF 1.01) | no |
//! | GIF | `image` | [`gif`] (87a, or 89a with a transparent index) | 1-bit |
//! | BMP | `image` | [`bmp`] (Windows 3.x, 24-bit, top-down) | no |
//! | TIFF | `image` | [`tiff`] (big-endian, PackBits) | yes |
//! | PSD | [`psd`] | [`psd`] | yes |
//! | EPS | [`eps`] | [`eps`] (Level 3 masked image for alpha) | yes |
//! | PDF | [`pdf`] | [`pdf`] | yes (soft mask) |
//! | PICT | [`pict`] | [`pict`] | yes |
//! | JPEG 2000 (JP2, J2K) | [`jpeg2000`] | [`jpeg2000`] | yes |
//!
//! Formats without alpha composite RGBA input over
//! [`EncodeOptions::background`] before encoding.
//!
//! The registry is built once on first use and read-only afterwards.

mod bmp;
mod builtin;
mod bytes;
mod eps;
mod gif;
mod jpeg2000;
mod packbits;
mod pdf;
mod pict;
mod psd;
mod tiff;

use crate::imaging::{Background, CanonicalImage, Quality, RasterError};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

/// Failure inside a codec.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("{0}")]
    Decode(String),
    #[error("{0}")]
    Encode(String),
}

impl CodecError {
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }
}

impl From<RasterError> for CodecError {
    fn from(err: RasterError) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Failure to pick a format.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FormatError {
    #[error("unknown format \"{0}\"")]
    UnknownName(String),
    #[error("unrecognized file extension \".{extension}\" in {}", path.display())]
    UnknownExtension { path: PathBuf, extension: String },
    #[error("{} has no file extension", .0.display())]
    NoExtension(PathBuf),
    #[error("could not identify the image format from its contents")]
    Unidentified,
}

/// Knobs the encoders read. Built from the loaded config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodeOptions {
    /// Lossy quality (JPEG).
    pub quality: Quality,
    /// Colour alpha is composited over for formats without alpha.
    pub background: Background,
    /// Run-length encode Targa output.
    pub tga_rle: bool,
    /// Flate-compress PDF raster streams.
    pub pdf_compress: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            quality: Quality::default(),
            background: Background::default(),
            tga_rle: true,
            pdf_compress: true,
        }
    }
}

impl EncodeOptions {
    /// `img` as it should reach an encoder that cannot store alpha.
    pub fn opaque<'a>(&self, img: &'a CanonicalImage) -> Cow<'a, CanonicalImage> {
        if img.layout().has_alpha() {
            Cow::Owned(img.clone().flatten(self.background))
        } else {
            Cow::Borrowed(img)
        }
    }
}

pub type DecodeFn = fn(&[u8]) -> Result<CanonicalImage, CodecError>;
pub type EncodeFn = fn(&CanonicalImage, &EncodeOptions) -> Result<Vec<u8>, CodecError>;

/// Decode/encode pair for one binary format. Codecs keep no state between calls.
#[derive(Clone, Copy)]
pub struct Codec {
    pub decode: DecodeFn,
    pub encode: EncodeFn,
}

#[derive(Clone, Copy)]
pub struct FormatDescriptor {
    /// Canonical identifier, also accepted by `-f`.
    pub id: &'static str,
    /// Human-readable name.
    pub name: &'static str,
    /// Lowercase extensions without the dot; the first one is preferred.
    pub extensions: &'static [&'static str],
    pub can_decode: bool,
    pub can_encode: bool,
    pub supports_alpha: bool,
    pub supports_animation: bool,
    /// Leading-bytes test used when a stream has no extension.
    pub sniff: fn(&[u8]) -> bool,
    pub codec: Codec,
}

impl FormatDescriptor {
    pub fn decode(&self, bytes: &[u8]) -> Result<CanonicalImage, CodecError> {
        if !self.can_decode {
            return Err(CodecError::decode(format!("{} cannot be decoded", self.name)));
        }
        (self.codec.decode)(bytes)
    }

    pub fn encode(&self, img: &CanonicalImage, opts: &EncodeOptions) -> Result<Vec<u8>, CodecError> {
        if !self.can_encode {
            return Err(CodecError::encode(format!("{} cannot be encoded", self.name)));
        }
        (self.codec.encode)(img, opts)
    }

    pub fn matches_extension(&self, ext: &str) -> bool {
        self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
    }
}

impl std::fmt::Debug for FormatDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormatDescriptor")
            .field("id", &self.id)
            .field("extensions", &self.extensions)
            .field("can_decode", &self.can_decode)
            .field("can_encode", &self.can_encode)
            .field("supports_alpha", &self.supports_alpha)
            .finish()
    }
}

impl PartialEq for FormatDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// Every format the converter knows, in `formats` listing order.
pub struct Registry {
    descriptors: Vec<FormatDescriptor>,
}

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(|| Registry {
    descriptors: vec![
        FormatDescriptor {
            id: "png",
            name: "Portable Network Graphics",
            extensions: &["png"],
            can_decode: true,
            can_encode: true,
            supports_alpha: true,
            supports_animation: false,
            sniff: |b| b.starts_with(b"\x89PNG\r\n\x1a\n"),
            codec: Codec {
                decode: builtin::decode_png,
                encode: builtin::encode_png,
            },
        },
        FormatDescriptor {
            id: "gif",
            name: "Graphics Interchange Format",
            extensions: &["gif"],
            can_decode: true,
            can_encode: true,
            supports_alpha: true,
            supports_animation: false,
            sniff: |b| b.starts_with(b"GIF87a") || b.starts_with(b"GIF89a"),
            codec: Codec {
                decode: gif::decode,
                encode: gif::encode,
            },
        },
        FormatDescriptor {
            id: "bmp",
            name: "Windows Bitmap",
            extensions: &["bmp", "dib"],
            can_decode: true,
            can_encode: true,
            supports_alpha: false,
            supports_animation: false,
            sniff: |b| b.starts_with(b"BM"),
            codec: Codec {
                decode: bmp::decode,
                encode: bmp::encode,
            },
        },
        FormatDescriptor {
            id: "ico",
            name: "Windows Icon",
            extensions: &["ico"],
            can_decode: true,
            can_encode: true,
            supports_alpha: true,
            supports_animation: false,
            sniff: |b| b.starts_with(&[0, 0, 1, 0]),
            codec: Codec {
                decode: builtin::decode_ico,
                encode: builtin::encode_ico,
            },
        },
        FormatDescriptor {
            id: "jpeg",
            name: "JPEG",
            extensions: &["jpg", "jpeg", "jpe", "jfif"],
            can_decode: true,
            can_encode: true,
            supports_alpha: false,
            supports_animation: false,
            sniff: |b| b.starts_with(&[0xFF, 0xD8, 0xFF]),
            codec: Codec {
                decode: builtin::decode_jpeg,
                encode: builtin::encode_jpeg,
            },
        },
        FormatDescriptor {
            id: "jp2",
            name: "JPEG 2000",
            extensions: &["jp2", "jpf", "jpx"],
            can_decode: true,
            can_encode: true,
            supports_alpha: true,
            supports_animation: false,
            sniff: jpeg2000::is_jp2,
            codec: Codec {
                decode: jpeg2000::decode,
                encode: jpeg2000::encode_jp2,
            },
        },
        FormatDescriptor {
            id: "j2k",
            name: "JPEG 2000 codestream",
            extensions: &["j2k", "j2c", "jpc"],
            can_decode: true,
            can_encode: true,
            supports_alpha: true,
            supports_animation: false,
            sniff: jpeg2000::is_codestream,
            codec: Codec {
                decode: jpeg2000::decode,
                encode: jpeg2000::encode_codestream,
            },
        },
        FormatDescriptor {
            id: "psd",
            name: "Adobe Photoshop",
            extensions: &["psd"],
            can_decode: true,
            can_encode: true,
            supports_alpha: true,
            supports_animation: false,
            sniff: |b| b.starts_with(b"8BPS"),
            codec: Codec {
                decode: psd::decode,
                encode: psd::encode,
            },
        },
        FormatDescriptor {
            id: "tga",
            name: "Truevision Targa",
            extensions: &["tga", "targa"],
            can_decode: true,
            can_encode: true,
            supports_alpha: true,
            supports_animation: false,
            sniff: |b| b.len() >= 18 && b.ends_with(b"TRUEVISION-XFILE.\0"),
            codec: Codec {
                decode: builtin::decode_tga,
                encode: builtin::encode_tga,
            },
        },
        FormatDescriptor {
            id: "tiff",
            name: "Tagged Image File Format",
            extensions: &["tif", "tiff"],
            can_decode: true,
            can_encode: true,
            supports_alpha: true,
            supports_animation: false,
            sniff: |b| b.starts_with(b"MM\0*") || b.starts_with(b"II*\0"),
            codec: Codec {
                decode: tiff::decode,
                encode: tiff::encode,
            },
        },
        FormatDescriptor {
            id: "eps",
            name: "Encapsulated PostScript",
            extensions: &["eps", "epsf", "ps"],
            can_decode: true,
            can_encode: true,
            supports_alpha: true,
            supports_animation: false,
            sniff: eps::sniff,
            codec: Codec {
                decode: eps::decode,
                encode: eps::encode,
            },
        },
        FormatDescriptor {
            id: "pdf",
            name: "Portable Document Format",
            extensions: &["pdf"],
            can_decode: true,
            can_encode: true,
            supports_alpha: true,
            supports_animation: false,
            sniff: |b| b.starts_with(b"%PDF-"),
            codec: Codec {
                decode: pdf::decode,
                encode: pdf::encode,
            },
        },
        FormatDescriptor {
            id: "pict",
            name: "QuickDraw PICT",
            extensions: &["pict", "pct", "pic"],
            can_decode: true,
            can_encode: true,
            supports_alpha: true,
            supports_animation: false,
            sniff: pict::sniff,
            codec: Codec {
                decode: pict::decode,
                encode: pict::encode,
            },
        },
        FormatDescriptor {
            id: "webp",
            name: "WebP",
            extensions: &["webp"],
            can_decode: true,
            can_encode: true,
            supports_alpha: true,
            supports_animation: false,
            sniff: |b| b.len() >= 12 && &b[..4] == b"RIFF" && &b[8..12] == b"WEBP",
            codec: Codec {
                decode: builtin::decode_webp,
                encode: builtin::encode_webp,
            },
        },
    ],
});

/// The process-wide registry.
pub fn registry() -> &'static Registry {
    &REGISTRY
}

impl Registry {
    pub fn descriptors(&self) -> &[FormatDescriptor] {
        &self.descriptors
    }

    /// Look up by identifier or any extension, case-insensitively.
    pub fn by_name(&self, name: &str) -> Option<&FormatDescriptor> {
        let name = name.trim_start_matches('.');
        self.descriptors
            .iter()
            .find(|d| d.id.eq_ignore_ascii_case(name))
            .or_else(|| self.descriptors.iter().find(|d| d.matches_extension(name)))
    }

    /// Look up by the extension of `path`.
    pub fn by_path(&self, path: &Path) -> Result<&FormatDescriptor, FormatError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| FormatError::NoExtension(path.to_path_buf()))?;
        self.descriptors
            .iter()
            .find(|d| d.matches_extension(extension))
            .ok_or_else(|| FormatError::UnknownExtension {
                path: path.to_path_buf(),
                extension: extension.to_string(),
            })
    }

    /// Pick a format: an explicit override wins, otherwise the path's extension.
    pub fn resolve(
        &self,
        path: Option<&Path>,
        explicit: Option<&str>,
    ) -> Result<&FormatDescriptor, FormatError> {
        if let Some(name) = explicit {
            return self
                .by_name(name)
                .ok_or_else(|| FormatError::UnknownName(name.to_string()));
        }
        match path {
            Some(path) => self.by_path(path),
            None => Err(FormatError::Unidentified),
        }
    }

    /// Identify a format from the first bytes of its data.
    pub fn detect(&self, bytes: &[u8]) -> Result<&FormatDescriptor, FormatError> {
        self.descriptors
            .iter()
            .find(|d| (d.sniff)(bytes))
            .ok_or(FormatError::Unidentified)
    }
}
