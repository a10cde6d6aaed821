// THEORY (single-pixel heuristics):
// `Pixel` is the smallest unit the detector reasons about: one RGBA sample and
// the metrics that can be computed from it alone. Nothing here looks at
// neighbours in space or time; background statistics and connected regions
// live in higher layers.
//
// Heuristic families used by the pipeline:
// - Brightness: Rec. 601 luma, the channel the background model learns.
// - Hue:        angle on the color wheel, summarized per detection.
// - Skin tone:  a YCrCb box test. Chrominance separates skin from most
//               workshop surfaces regardless of lighting level, which is why
//               the test ignores Y entirely.

pub type Channel = u8;
pub type Luminance = f64;
pub type Hue = f32;

/// Cr/Cb bounds of the skin-tone box, inclusive.
const SKIN_CR_RANGE: (f32, f32) = (133.0, 173.0);
const SKIN_CB_RANGE: (f32, f32) = (77.0, 127.0);

/// A "dumb" data container for a single RGBA pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pixel {
    pub red: Channel,
    pub green: Channel,
    pub blue: Channel,
    pub alpha: Channel,
}

impl From<&[u8]> for Pixel {
    /// Reads the first four bytes as RGBA. Shorter slices are zero-filled.
    fn from(bytes: &[u8]) -> Self {
        let at = |i: usize| bytes.get(i).copied().unwrap_or_default();
        Pixel::new(at(0), at(1), at(2), at(3))
    }
}

impl Pixel {
    pub fn new(red: Channel, green: Channel, blue: Channel, alpha: Channel) -> Self {
        Self {
            red,
            green,
            blue,
            alpha,
        }
    }

    /// Luminance estimate (Rec. 601 luma) on the 0..255 scale.
    pub fn luminance(&self) -> Luminance {
        0.299_f64 * self.red as f64 + 0.587_f64 * self.green as f64 + 0.114_f64 * self.blue as f64
    }

    /// Hue angle in degrees [0, 360), computed on normalized sRGB.
    /// Achromatic pixels report 0.
    pub fn hue(&self) -> Hue {
        let red = self.red as f32 / 255.0;
        let green = self.green as f32 / 255.0;
        let blue = self.blue as f32 / 255.0;

        let maximum_channel = red.max(green.max(blue));
        let minimum_channel = red.min(green.min(blue));
        let chroma = maximum_channel - minimum_channel;
        if chroma <= 1e-6 {
            return 0.0;
        }

        let (base_difference, sector_offset) = if maximum_channel == red {
            (green - blue, 0.0)
        } else if maximum_channel == green {
            (blue - red, 2.0)
        } else {
            (red - green, 4.0)
        };

        let mut hue_degrees = (base_difference / chroma + sector_offset) * 60.0;
        if hue_degrees < 0.0 {
            hue_degrees += 360.0;
        }
        hue_degrees
    }

    /// Full-range BT.601 YCrCb, each component on 0..255.
    pub fn ycrcb(&self) -> (f32, f32, f32) {
        let (r, g, b) = (self.red as f32, self.green as f32, self.blue as f32);
        let y = 0.299 * r + 0.587 * g + 0.114 * b;
        let cr = (r - y) * 0.713 + 128.0;
        let cb = (b - y) * 0.564 + 128.0;
        (y, cr, cb)
    }

    /// Whether the pixel falls inside the skin-tone chrominance box.
    pub fn is_skin(&self) -> bool {
        let (_, cr, cb) = self.ycrcb();
        (SKIN_CR_RANGE.0..=SKIN_CR_RANGE.1).contains(&cr)
            && (SKIN_CB_RANGE.0..=SKIN_CB_RANGE.1).contains(&cb)
    }
}
