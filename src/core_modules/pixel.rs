// THEORY (Packed Samples):
// The capture boundary delivers one 32-bit sample per pixel in `0x00RRGGBB`
// layout. The `Pixel` type is the "dumb" unpacked view of such a sample, and
// this module owns the single-pixel heuristic the background model needs:
// luminance. Anything that looks at neighbors or history lives elsewhere.

pub type Channel = u8;
pub type Sample = u32;
pub type Luminance = f32;

/// Rec. 601 luma weights.
const RED_WEIGHT: Luminance = 0.299;
const GREEN_WEIGHT: Luminance = 0.587;
const BLUE_WEIGHT: Luminance = 0.114;

/// An unpacked RGB sample. The top byte of the packed form is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pixel {
    pub red: Channel,
    pub green: Channel,
    pub blue: Channel,
}

impl Pixel {
    pub const fn new(red: Channel, green: Channel, blue: Channel) -> Self {
        Self { red, green, blue }
    }

    pub const fn gray(level: Channel) -> Self {
        Self::new(level, level, level)
    }

    pub const fn from_packed(sample: Sample) -> Self {
        Self {
            red: (sample >> 16) as Channel,
            green: (sample >> 8) as Channel,
            blue: sample as Channel,
        }
    }

    pub const fn to_packed(self) -> Sample {
        ((self.red as Sample) << 16) | ((self.green as Sample) << 8) | self.blue as Sample
    }

    /// Perceived brightness in the 0..255 range.
    pub fn luminance(&self) -> Luminance {
        RED_WEIGHT * self.red as Luminance
            + GREEN_WEIGHT * self.green as Luminance
            + BLUE_WEIGHT * self.blue as Luminance
    }
}

impl From<Sample> for Pixel {
    fn from(sample: Sample) -> Self {
        Self::from_packed(sample)
    }
}

impl From<Pixel> for Sample {
    fn from(pixel: Pixel) -> Self {
        pixel.to_packed()
    }
}

/// Luminance of a packed sample without going through `Pixel`.
#[inline]
pub fn luminance(sample: Sample) -> Luminance {
    Pixel::from_packed(sample).luminance()
}
