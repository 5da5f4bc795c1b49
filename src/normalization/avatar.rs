//! Avatar recompression: format gate, size gate, resize and a bounded
//! quality-reduction loop.
use std::io::Cursor;

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use tracing::{debug, warn};

use crate::error::{MigrateError, MigrateResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizeLimits {
    /// Byte budget for the stored object.
    pub max_bytes: usize,
    /// Neither side of the output exceeds this many pixels.
    pub max_dimension: u32,
    /// Lower-cased mime types accepted as-is when already within budget.
    pub allowed_mime: Vec<String>,
    pub start_quality: u8,
    pub floor_quality: u8,
    pub quality_step: u8,
}

impl Default for NormalizeLimits {
    fn default() -> Self {
        Self {
            max_bytes: 512 * 1024,
            max_dimension: 512,
            allowed_mime: vec![
                "image/jpeg".into(),
                "image/png".into(),
                "image/webp".into(),
            ],
            start_quality: 85,
            floor_quality: 50,
            quality_step: 10,
        }
    }
}

impl NormalizeLimits {
    pub fn validate(&self) -> MigrateResult<()> {
        if self.max_bytes == 0 || self.max_dimension == 0 {
            return Err(MigrateError::Config(
                "avatar byte budget and dimension must be positive".into(),
            ));
        }
        if self.quality_step == 0 {
            return Err(MigrateError::Config("AVATAR_QUALITY_STEP must be positive".into()));
        }
        if self.floor_quality == 0
            || self.start_quality > 100
            || self.floor_quality > self.start_quality
        {
            return Err(MigrateError::Config(format!(
                "avatar quality range {}..{} is invalid",
                self.floor_quality, self.start_quality
            )));
        }
        Ok(())
    }

    /// Upper bound on encode passes: `ceil((start - floor) / step) + 1`.
    pub fn max_iterations(&self) -> u32 {
        let span = u32::from(self.start_quality.saturating_sub(self.floor_quality));
        let step = u32::from(self.quality_step.max(1));
        span.div_ceil(step) + 1
    }

    fn allows(&self, mime_type: &str) -> bool {
        let mime = mime_type.trim().to_ascii_lowercase();
        self.allowed_mime.iter().any(|m| *m == mime)
    }
}

/// Result of [`normalize`].
#[derive(Debug, Clone)]
pub struct Normalized {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    /// Extension matching `mime_type`, without the dot.
    pub extension: &'static str,
    /// JPEG quality of the final pass; `None` when the input was kept.
    pub quality: Option<u8>,
    /// Encode passes spent in the quality loop.
    pub iterations: u32,
}

impl Normalized {
    fn unchanged(bytes: &[u8], mime_type: &str) -> Self {
        let mime_type = mime_type.trim().to_ascii_lowercase();
        Self {
            bytes: bytes.to_vec(),
            extension: crate::util::storage_url::mime_to_extension(&mime_type),
            mime_type,
            quality: None,
            iterations: 0,
        }
    }

    pub fn changed(&self) -> bool {
        self.quality.is_some()
    }
}

/// Bring an image within `limits`.
///
/// Never fails: when decoding or encoding goes wrong the original bytes and
/// mime type come back untouched.
pub fn normalize(bytes: &[u8], mime_type: &str, limits: &NormalizeLimits) -> Normalized {
    let allowed = limits.allows(mime_type);
    if allowed && bytes.len() <= limits.max_bytes {
        return Normalized::unchanged(bytes, mime_type);
    }
    match reencode(bytes, limits) {
        Ok(out) => {
            debug!(
                mime_type,
                before = bytes.len(),
                after = out.bytes.len(),
                quality = out.quality,
                iterations = out.iterations,
                format_gate = !allowed,
                "avatar normalized"
            );
            out
        }
        Err(err) => {
            warn!(mime_type, size = bytes.len(), error = %format!("{err:#}"), "avatar normalization failed; keeping original");
            Normalized::unchanged(bytes, mime_type)
        }
    }
}

/// Every re-encode targets JPEG, so lossless sources (PNG, GIF, BMP) always
/// come out lossy.
fn reencode(bytes: &[u8], limits: &NormalizeLimits) -> Result<Normalized> {
    let img = image::load_from_memory(bytes).context("decode image")?;
    let img = fit_within(img, limits.max_dimension);

    let mut quality = limits.start_quality;
    let mut iterations = 0;
    loop {
        iterations += 1;
        let encoded = encode_jpeg(&img, quality)?;
        if encoded.len() <= limits.max_bytes || quality <= limits.floor_quality {
            return Ok(Normalized {
                bytes: encoded,
                mime_type: "image/jpeg".into(),
                extension: "jpg",
                quality: Some(quality),
                iterations,
            });
        }
        quality = quality
            .saturating_sub(limits.quality_step)
            .max(limits.floor_quality);
    }
}

/// Shrink so neither side exceeds `max`, keeping the aspect ratio. Smaller
/// images are left alone.
fn fit_within(img: DynamicImage, max: u32) -> DynamicImage {
    let (w, h) = img.dimensions();
    if w <= max && h <= max {
        return img;
    }
    img.resize(max, max, FilterType::Lanczos3)
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut out, quality);
    img.to_rgb8()
        .write_with_encoder(encoder)
        .with_context(|| format!("encode jpeg at quality {quality}"))?;
    Ok(out.into_inner())
}
