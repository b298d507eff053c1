use super::video::Resolution;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

pub struct Variant {
    pub bandwidth: u64,
    pub width: u32,
    pub height: u32,
    pub uri: String,
}

impl Variant {
    /// Nominal bitrate used for the BANDWIDTH attribute when the encoder
    /// does not report one.
    pub fn nominal_bandwidth(resolution: Resolution) -> u64 {
        match resolution.height() {
            0..=240 => 400_000,
            241..=360 => 800_000,
            361..=480 => 1_400_000,
            481..=720 => 2_800_000,
            721..=1080 => 5_000_000,
            h => h as u64 * 5_000,
        }
    }
}

/// Multivariant (master) playlist pointing at one variant playlist per
/// resolution.
pub struct MasterPlaylist {
    pub version: u8,
    pub independent_segments: bool,
    pub variants: Vec<Variant>,
}

impl MasterPlaylist {
    pub fn new() -> Self {
        Self {
            version: 7, // Version 7 for fMP4 support
            independent_segments: true,
            variants: Vec::new(),
        }
    }

    pub fn add_variant(&mut self, variant: Variant) {
        self.variants.push(variant);
    }

    pub fn render(&self) -> String {
        let mut out = String::from("#EXTM3U\n");
        out.push_str(&format!("#EXT-X-VERSION:{}\n", self.version));
        if self.independent_segments {
            out.push_str("#EXT-X-INDEPENDENT-SEGMENTS\n");
        }
        for variant in &self.variants {
            out.push_str(&format!(
                "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{}\n",
                variant.bandwidth, variant.width, variant.height
            ));
            out.push_str(&variant.uri);
            out.push('\n');
        }
        out
    }

    pub async fn write_to(&self, path: &Path) -> Result<(), std::io::Error> {
        let mut file = File::create(path).await?;
        file.write_all(self.render().as_bytes()).await?;
        file.flush().await
    }
}

impl Default for MasterPlaylist {
    fn default() -> Self {
        Self::new()
    }
}
