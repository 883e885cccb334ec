//! Converter configuration.
//!
//! Handles loading, validating, and merging an optional `config.toml`. Stock
//! defaults are the base layer; the user file only needs the keys it wants
//! to change.
//!
//! ## Config File Location
//!
//! The file is taken from `--config <path>`, or from `$TRANSMUTE_CONFIG`
//! when the flag is absent. With neither, the stock defaults apply. A path
//! that was asked for but does not exist is an error.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [jpeg]
//! quality = 90                  # Lossy encode quality (1-100)
//!
//! [alpha]
//! background = [255, 255, 255]  # Colour alpha is composited over for opaque formats
//!
//! [tga]
//! rle = true                    # Run-length encode Targa output
//!
//! [pdf]
//! compress = true               # Flate-compress PDF raster data
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::formats::EncodeOptions;
use crate::imaging::{Background, Quality};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable naming a config file when `--config` is absent.
pub const CONFIG_ENV: &str = "TRANSMUTE_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Converter configuration loaded from `config.toml`.
///
/// All fields have defaults. Unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub jpeg: JpegConfig,
    pub alpha: AlphaConfig,
    pub tga: TgaConfig,
    pub pdf: PdfConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JpegConfig {
    /// Encode quality, 1 (smallest) to 100 (best).
    pub quality: u32,
}

impl Default for JpegConfig {
    fn default() -> Self {
        Self {
            quality: Quality::default().value(),
        }
    }
}

/// What happens to alpha when the target format has none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AlphaConfig {
    /// `[r, g, b]` composited under translucent pixels.
    pub background: [u8; 3],
}

impl Default for AlphaConfig {
    fn default() -> Self {
        Self {
            background: Background::default().0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TgaConfig {
    pub rle: bool,
}

impl Default for TgaConfig {
    fn default() -> Self {
        Self { rle: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PdfConfig {
    pub compress: bool,
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self { compress: true }
    }
}

impl Config {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.jpeg.quality) {
            return Err(ConfigError::Validation(
                "jpeg.quality must be 1-100".into(),
            ));
        }
        Ok(())
    }

    /// The knobs the encoders read.
    pub fn encode_options(&self) -> EncodeOptions {
        EncodeOptions {
            quality: Quality::new(self.jpeg.quality),
            background: Background(self.alpha.background),
            tga_rle: self.tga.rle,
            pdf_compress: self.pdf.compress,
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the base layer user overrides are merged on top of.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(Config::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<Config, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: Config = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// The config file to load: the explicit path, else `$TRANSMUTE_CONFIG`.
pub fn config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()).map(PathBuf::from))
}

/// Read a config file as a raw TOML value.
pub fn load_raw_config(path: &Path) -> Result<toml::Value, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

/// Load the effective config.
///
/// Merges the file at `path` (if any) on top of stock defaults, rejects
/// unknown keys, and validates the result.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let overlay = path.map(load_raw_config).transpose()?;
    resolve_config(stock_defaults_value(), overlay)
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# transmute configuration
# =======================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# Point transmute at this file with --config <path> or by setting
# TRANSMUTE_CONFIG. Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# JPEG
# ---------------------------------------------------------------------------
[jpeg]
# Encoding quality (1 = smallest file, 100 = best quality).
quality = 90

# ---------------------------------------------------------------------------
# Alpha
# ---------------------------------------------------------------------------
[alpha]
# Formats without transparency (JPEG, BMP) get translucent pixels
# composited over this colour, as [red, green, blue].
background = [255, 255, 255]

# ---------------------------------------------------------------------------
# Targa
# ---------------------------------------------------------------------------
[tga]
# Run-length encode pixel data.
rle = true

# ---------------------------------------------------------------------------
# PDF
# ---------------------------------------------------------------------------
[pdf]
# Flate-compress the embedded raster. Uncompressed files are larger but
# readable by very old tools.
compress = true
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_values() {
        let config = Config::default();
        assert_eq!(config.jpeg.quality, 90);
        assert_eq!(config.alpha.background, [255, 255, 255]);
        assert!(config.tga.rle);
        assert!(config.pdf.compress);
    }

    #[test]
    fn default_config_matches_default_encode_options() {
        assert_eq!(Config::default().encode_options(), EncodeOptions::default());
    }

    #[test]
    fn parse_partial_config() {
        let config: Config = toml::from_str("[jpeg]\nquality = 75\n").unwrap();
        assert_eq!(config.jpeg.quality, 75);
        // Unspecified values are defaults
        assert!(config.tga.rle);
        assert_eq!(config.alpha.background, [255, 255, 255]);
    }

    #[test]
    fn encode_options_follow_config() {
        let config: Config = toml::from_str(
            r#"
[alpha]
background = [0, 0, 0]

[tga]
rle = false

[pdf]
compress = false
"#,
        )
        .unwrap();
        let opts = config.encode_options();
        assert_eq!(opts.background, Background([0, 0, 0]));
        assert!(!opts.tga_rle);
        assert!(!opts.pdf_compress);
    }

    // =========================================================================
    // load_config tests
    // =========================================================================

    #[test]
    fn load_config_returns_default_without_path() {
        assert_eq!(load_config(None).unwrap(), Config::default());
    }

    #[test]
    fn load_config_reads_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "[alpha]\nbackground = [10, 20, 30]\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.alpha.background, [10, 20, 30]);
        assert_eq!(config.jpeg.quality, 90);
    }

    #[test]
    fn load_config_missing_file_is_error() {
        let tmp = TempDir::new().unwrap();
        let result = load_config(Some(&tmp.path().join("absent.toml")));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn load_config_invalid_toml_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "this is not valid toml [[[").unwrap();
        assert!(matches!(load_config(Some(&path)), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn explicit_path_beats_environment() {
        let explicit = Path::new("/etc/transmute.toml");
        assert_eq!(config_path(Some(explicit)), Some(explicit.to_path_buf()));
    }

    // =========================================================================
    // merge_toml tests
    // =========================================================================

    #[test]
    fn merge_toml_scalar_override() {
        let base: toml::Value = toml::from_str("[jpeg]\nquality = 90").unwrap();
        let overlay: toml::Value = toml::from_str("[jpeg]\nquality = 50").unwrap();
        let merged = merge_toml(base, overlay);
        assert_eq!(merged["jpeg"]["quality"].as_integer(), Some(50));
    }

    #[test]
    fn merge_toml_preserves_base_keys() {
        let base = stock_defaults_value();
        let overlay: toml::Value = toml::from_str("[tga]\nrle = false").unwrap();
        let merged = merge_toml(base, overlay);
        assert_eq!(merged["tga"]["rle"].as_bool(), Some(false));
        assert_eq!(merged["pdf"]["compress"].as_bool(), Some(true));
        assert_eq!(merged["jpeg"]["quality"].as_integer(), Some(90));
    }

    #[test]
    fn merge_toml_arrays_replace() {
        let base = stock_defaults_value();
        let overlay: toml::Value = toml::from_str("[alpha]\nbackground = [1, 2, 3]").unwrap();
        let config: Config = merge_toml(base, overlay).try_into().unwrap();
        assert_eq!(config.alpha.background, [1, 2, 3]);
    }

    // =========================================================================
    // Unknown key rejection and validation tests
    // =========================================================================

    #[test]
    fn unknown_key_rejected() {
        let result: Result<Config, _> = toml::from_str("[jpeg]\nqualty = 90\n");
        let err = result.unwrap_err().to_string();
        assert!(err.contains("unknown field"));
    }

    #[test]
    fn unknown_section_rejected() {
        let result: Result<Config, _> = toml::from_str("[png]\ninterlace = true\n");
        assert!(result.is_err());
    }

    #[test]
    fn background_out_of_range_rejected() {
        let result: Result<Config, _> = toml::from_str("[alpha]\nbackground = [256, 0, 0]\n");
        assert!(result.is_err());
    }

    #[test]
    fn validate_quality_bounds() {
        let mut config = Config::default();
        config.jpeg.quality = 100;
        assert!(config.validate().is_ok());
        config.jpeg.quality = 1;
        assert!(config.validate().is_ok());
        config.jpeg.quality = 0;
        assert!(config.validate().unwrap_err().to_string().contains("quality"));
        config.jpeg.quality = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn resolve_config_rejects_invalid_values() {
        let overlay: toml::Value = toml::from_str("[jpeg]\nquality = 200").unwrap();
        let result = resolve_config(stock_defaults_value(), Some(overlay));
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    // =========================================================================
    // stock_config_toml tests
    // =========================================================================

    #[test]
    fn stock_config_toml_roundtrips_to_defaults() {
        let config: Config = toml::from_str(stock_config_toml()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn stock_config_toml_contains_all_sections() {
        let content = stock_config_toml();
        for section in ["[jpeg]", "[alpha]", "[tga]", "[pdf]"] {
            assert!(content.contains(section), "missing {section}");
        }
    }

    #[test]
    fn stock_defaults_value_has_all_sections() {
        let val = stock_defaults_value();
        assert!(val.is_table());
        for section in ["jpeg", "alpha", "tga", "pdf"] {
            assert!(val.get(section).is_some(), "missing {section}");
        }
    }
}
