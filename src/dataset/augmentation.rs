//! Geometric augmentation transforms
//!
//! Each registered transform produces one additional training stage over the
//! whole train split. Transforms keep the image geometry and never touch labels.
//!
//! Randomness is seeded per transform. The generator used for a given image is
//! derived from (transform seed, epoch, sample index), so the output does not
//! depend on which worker thread decodes the image.

use std::fmt;
use std::sync::Arc;

use image::{DynamicImage, GenericImageView, ImageBuffer, Rgba, RgbaImage};
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Corner displacement of the standard warp, in pixels
pub const WARP_MAGNITUDE: f32 = 42.0;

/// Fixed seed of the second flip transform
pub const SECOND_FLIP_SEED: u64 = 123;

/// An image-to-image function applied to every sample of a training stage
pub trait ImageTransform: Send + Sync + fmt::Debug {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Base seed of this transform
    fn seed(&self) -> u64;

    /// Transform one image. Output has the same width and height as the input.
    fn apply(&self, img: &DynamicImage, rng: &mut ChaCha8Rng) -> DynamicImage;

    /// Transform the `index`-th sample of a split during pass `epoch`
    fn apply_to_sample(&self, img: &DynamicImage, epoch: usize, index: usize) -> DynamicImage {
        let mut rng = sample_rng(self.seed(), epoch, index);
        self.apply(img, &mut rng)
    }
}

/// SplitMix64 finalizer
fn mix(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Generator for one (seed, epoch, sample) triple
pub fn sample_rng(seed: u64, epoch: usize, index: usize) -> ChaCha8Rng {
    let key = mix(mix(seed ^ mix(epoch as u64)) ^ index as u64);
    ChaCha8Rng::seed_from_u64(key)
}

/// Horizontal mirror, applied to each image with probability one half
#[derive(Debug, Clone)]
pub struct FlipTransform {
    seed: u64,
    name: String,
}

impl FlipTransform {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            name: format!("flip(seed={})", seed),
        }
    }
}

impl ImageTransform for FlipTransform {
    fn name(&self) -> &str {
        &self.name
    }

    fn seed(&self) -> u64 {
        self.seed
    }

    fn apply(&self, img: &DynamicImage, rng: &mut ChaCha8Rng) -> DynamicImage {
        if rng.gen_bool(0.5) {
            img.fliph()
        } else {
            img.clone()
        }
    }
}

/// Perspective warp with every corner moved by up to `magnitude` pixels
#[derive(Debug, Clone)]
pub struct WarpTransform {
    seed: u64,
    magnitude: f32,
    name: String,
}

impl WarpTransform {
    pub fn new(seed: u64, magnitude: f32) -> Self {
        Self {
            seed,
            magnitude,
            name: format!("warp(seed={}, magnitude={})", seed, magnitude),
        }
    }

    pub fn magnitude(&self) -> f32 {
        self.magnitude
    }
}

impl ImageTransform for WarpTransform {
    fn name(&self) -> &str {
        &self.name
    }

    fn seed(&self) -> u64 {
        self.seed
    }

    fn apply(&self, img: &DynamicImage, rng: &mut ChaCha8Rng) -> DynamicImage {
        let (width, height) = img.dimensions();
        let (w, h) = (width as f32, height as f32);

        let corners = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)];
        let mut moved = corners;
        for corner in moved.iter_mut() {
            corner.0 += rng.gen_range(-self.magnitude..=self.magnitude);
            corner.1 += rng.gen_range(-self.magnitude..=self.magnitude);
        }

        // Inverse mapping: output pixel -> source position
        let Some(h_inv) = homography(&moved, &corners) else {
            return img.clone();
        };

        let src = img.to_rgba8();
        let mut output: RgbaImage = ImageBuffer::new(width, height);
        for (x, y, pixel) in output.enumerate_pixels_mut() {
            let (sx, sy) = project(&h_inv, x as f32, y as f32);
            *pixel = bilinear_sample(&src, sx, sy);
        }

        DynamicImage::ImageRgba8(output)
    }
}

/// Solve the 3x3 homography (h33 = 1) sending each `from[i]` to `to[i]`
fn homography(from: &[(f32, f32); 4], to: &[(f32, f32); 4]) -> Option<[f64; 9]> {
    let mut a = [[0.0f64; 9]; 8];
    for i in 0..4 {
        let (x, y) = (from[i].0 as f64, from[i].1 as f64);
        let (u, v) = (to[i].0 as f64, to[i].1 as f64);
        a[2 * i] = [x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y, u];
        a[2 * i + 1] = [0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y, v];
    }

    // Gauss-Jordan elimination with partial pivoting on the augmented 8x9 system
    for col in 0..8 {
        let pivot = (col..8).max_by(|&r1, &r2| a[r1][col].abs().total_cmp(&a[r2][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);

        let p = a[col][col];
        for k in col..9 {
            a[col][k] /= p;
        }
        for row in 0..8 {
            if row != col {
                let factor = a[row][col];
                if factor != 0.0 {
                    for k in col..9 {
                        a[row][k] -= factor * a[col][k];
                    }
                }
            }
        }
    }

    let mut h = [0.0f64; 9];
    for (i, row) in a.iter().enumerate() {
        h[i] = row[8];
    }
    h[8] = 1.0;
    Some(h)
}

fn project(h: &[f64; 9], x: f32, y: f32) -> (f32, f32) {
    let (x, y) = (x as f64, y as f64);
    let w = h[6] * x + h[7] * y + h[8];
    if w.abs() < 1e-12 {
        return (-1.0, -1.0);
    }
    (
        ((h[0] * x + h[1] * y + h[2]) / w) as f32,
        ((h[3] * x + h[4] * y + h[5]) / w) as f32,
    )
}

/// Bilinear lookup; positions outside the image read as transparent black
fn bilinear_sample(img: &RgbaImage, x: f32, y: f32) -> Rgba<u8> {
    const EDGE: f32 = 1e-3;
    let (width, height) = img.dimensions();
    let (max_x, max_y) = ((width - 1) as f32, (height - 1) as f32);
    if !(x > -EDGE && y > -EDGE && x < max_x + EDGE && y < max_y + EDGE) {
        return Rgba([0, 0, 0, 0]);
    }
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = img.get_pixel(x0, y0);
    let p10 = img.get_pixel(x1, y0);
    let p01 = img.get_pixel(x0, y1);
    let p11 = img.get_pixel(x1, y1);

    let mut result = [0u8; 4];
    for c in 0..4 {
        let v = p00[c] as f32 * (1.0 - fx) * (1.0 - fy)
            + p10[c] as f32 * fx * (1.0 - fy)
            + p01[c] as f32 * (1.0 - fx) * fy
            + p11[c] as f32 * fx * fy;
        result[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    Rgba(result)
}

/// Ordered list of transforms, one training stage each
#[derive(Debug, Clone, Default)]
pub struct AugmentationPipeline {
    transforms: Vec<Arc<dyn ImageTransform>>,
}

impl AugmentationPipeline {
    /// Empty pipeline: base stage only
    pub fn new() -> Self {
        Self::default()
    }

    /// The three standard transforms, in order: flip, warp, flip with seed 123.
    ///
    /// The first two draw their seeds from the run's main generator.
    pub fn standard(main_rng: &mut ChaCha8Rng) -> Self {
        let flip_seed = main_rng.next_u64();
        let warp_seed = main_rng.next_u64();

        Self::new()
            .with(FlipTransform::new(flip_seed))
            .with(WarpTransform::new(warp_seed, WARP_MAGNITUDE))
            .with(FlipTransform::new(SECOND_FLIP_SEED))
    }

    /// Append a transform
    pub fn with<T: ImageTransform + 'static>(mut self, transform: T) -> Self {
        self.transforms.push(Arc::new(transform));
        self
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Arc<dyn ImageTransform>> {
        self.transforms.get(index).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ImageTransform>> {
        self.transforms.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn gradient_image(width: u32, height: u32) -> DynamicImage {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 4) as u8, (y * 4) as u8, 128])
        });
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_standard_pipeline_order() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let pipeline = AugmentationPipeline::standard(&mut rng);

        assert_eq!(pipeline.len(), 3);
        let names: Vec<String> = pipeline.iter().map(|t| t.name().to_string()).collect();
        assert!(names[0].starts_with("flip"));
        assert!(names[1].starts_with("warp"));
        assert_eq!(names[2], "flip(seed=123)");
        assert_ne!(pipeline.get(0).unwrap().seed(), SECOND_FLIP_SEED);

        let mut again = ChaCha8Rng::seed_from_u64(42);
        let same = AugmentationPipeline::standard(&mut again);
        assert_eq!(pipeline.get(1).unwrap().seed(), same.get(1).unwrap().seed());
    }

    #[test]
    fn test_flip_mirrors_or_keeps() {
        let img = gradient_image(16, 8);
        let flip = FlipTransform::new(5);

        let mut saw_flip = false;
        let mut saw_keep = false;
        for index in 0..32 {
            let out = flip.apply_to_sample(&img, 0, index);
            assert_eq!(out.dimensions(), (16, 8));
            if out.to_rgb8() == img.fliph().to_rgb8() {
                saw_flip = true;
            } else {
                assert_eq!(out.to_rgb8(), img.to_rgb8());
                saw_keep = true;
            }
        }
        assert!(saw_flip && saw_keep);
    }

    #[test]
    fn test_warp_keeps_geometry_and_is_deterministic() {
        let img = gradient_image(40, 30);
        let warp = WarpTransform::new(9, WARP_MAGNITUDE);

        let a = warp.apply_to_sample(&img, 1, 3);
        let b = warp.apply_to_sample(&img, 1, 3);
        let c = warp.apply_to_sample(&img, 2, 3);

        assert_eq!(a.dimensions(), (40, 30));
        assert_eq!(a.to_rgba8(), b.to_rgba8());
        assert_ne!(a.to_rgba8(), c.to_rgba8());
    }

    #[test]
    fn test_zero_magnitude_warp_is_identity() {
        let img = gradient_image(20, 20);
        let warp = WarpTransform::new(1, 0.0);
        let out = warp.apply_to_sample(&img, 0, 0);
        assert_eq!(out.to_rgb8(), img.to_rgb8());
    }

    #[test]
    fn test_homography_maps_corners() {
        let from = [(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)];
        let to = [(1.0, 2.0), (12.0, 0.0), (9.0, 11.0), (-1.0, 8.0)];
        let h = homography(&from, &to).unwrap();
        for (src, dst) in from.iter().zip(to.iter()) {
            let (x, y) = project(&h, src.0, src.1);
            assert!((x - dst.0).abs() < 1e-3);
            assert!((y - dst.1).abs() < 1e-3);
        }
    }

    #[test]
    fn test_sample_rng_varies_by_index_and_epoch() {
        let a = sample_rng(1, 0, 0).next_u64();
        assert_eq!(a, sample_rng(1, 0, 0).next_u64());
        assert_ne!(a, sample_rng(1, 0, 1).next_u64());
        assert_ne!(a, sample_rng(1, 1, 0).next_u64());
        assert_ne!(a, sample_rng(2, 0, 0).next_u64());
    }
}
