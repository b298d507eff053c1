use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque, immutable handle to a video.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoId(String);

impl VideoId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a server taking part in federation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Height class of a rendition (240, 480, 720, ...). Width is implied by the
/// source aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resolution(u32);

impl Resolution {
    pub const fn new(height: u32) -> Self {
        Self(height)
    }

    pub const fn height(self) -> u32 {
        self.0
    }

    /// Aspect-preserving width for a source of `source_width`x`source_height`,
    /// rounded to the nearest even number as most encoders require.
    pub fn width_for(self, source_width: u32, source_height: u32) -> u32 {
        if source_height == 0 {
            return 0;
        }
        let exact = self.0 as f64 * source_width as f64 / source_height as f64;
        let even = (exact / 2.0).round() as u32 * 2;
        even.max(2)
    }

    /// No upscaling: a target above the source height collapses to it.
    pub fn clamp_to(self, source: Resolution) -> Resolution {
        self.min(source)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}p", self.0)
    }
}

/// Configured resolutions usable for a source of height `source`, highest
/// first. The source height itself always heads the ladder.
pub fn ladder(source: Resolution, configured: &[Resolution]) -> Vec<Resolution> {
    let mut rungs: Vec<Resolution> = configured
        .iter()
        .copied()
        .filter(|r| *r < source)
        .collect();
    rungs.push(source);
    rungs.sort_unstable_by(|a, b| b.cmp(a));
    rungs.dedup();
    rungs
}
