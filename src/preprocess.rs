//! Image preprocessing variants.
//!
//! Each variant targets a different OCR failure mode: the scaled original
//! for clean screenshots, CLAHE for low-contrast photos, denoise+unsharp for
//! noisy captures, adaptive threshold + deskew for the worst inputs. The
//! variants are produced in that fixed order so best-of scoring can stop
//! early on the cheap ones.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma, RgbImage};

use crate::config::{OcrConfig, PreprocessFlags};

/// Which preprocessing path produced a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantKind {
    Scaled,
    Clahe,
    DenoiseSharpen,
    Binarized,
}

#[derive(Debug, Clone)]
pub struct Variant {
    pub kind: VariantKind,
    pub image: DynamicImage,
}

/// Produce the ordered preprocessing variants for one decoded image.
///
/// When `superres` is requested and the long edge sits below the configured
/// minimum, a cubic upscale plus unsharp runs first and all variants derive
/// from the upscaled image.
pub fn preprocess_variants(
    image: &DynamicImage,
    flags: &PreprocessFlags,
    cfg: &OcrConfig,
) -> Vec<Variant> {
    let long_edge = image.width().max(image.height());
    let base = if flags.superres && long_edge < cfg.superres_min_edge_px {
        super_resolve(image, cfg.superres_min_edge_px)
    } else {
        image.clone()
    };

    let scaled = scale_to_cap(&base, cfg.max_long_edge_px);
    let gray = scaled.to_luma8();

    let mut variants = Vec::with_capacity(4);
    variants.push(Variant {
        kind: VariantKind::Scaled,
        image: scaled,
    });

    let equalized = clahe(&gray, 8, 2.0);
    variants.push(Variant {
        kind: VariantKind::Clahe,
        image: DynamicImage::ImageLuma8(equalized),
    });

    if flags.denoise || flags.sharpen {
        let mut work = gray.clone();
        if flags.denoise {
            work = median3(&work);
        }
        if flags.sharpen {
            work = unsharp(&work, 1.0, 1.5);
        }
        variants.push(Variant {
            kind: VariantKind::DenoiseSharpen,
            image: DynamicImage::ImageLuma8(work),
        });
    }

    if flags.binarize {
        let binary = adaptive_threshold(&gray, 31, 5);
        let straightened = deskew(&binary);
        variants.push(Variant {
            kind: VariantKind::Binarized,
            image: DynamicImage::ImageLuma8(straightened),
        });
    }

    variants
}

/// Scale so the short edge lands near 1500 px without exceeding the long
/// edge cap. Upscaling is never applied here.
fn scale_to_cap(image: &DynamicImage, max_long_edge: u32) -> DynamicImage {
    const TARGET_SHORT_EDGE: f32 = 1500.0;

    let (w, h) = (image.width() as f32, image.height() as f32);
    let short = w.min(h);
    let long = w.max(h);

    let mut scale = if short > TARGET_SHORT_EDGE {
        TARGET_SHORT_EDGE / short
    } else {
        1.0
    };
    if long * scale > max_long_edge as f32 {
        scale = max_long_edge as f32 / long;
    }
    if scale >= 1.0 {
        return image.clone();
    }

    let nw = ((w * scale).round() as u32).max(1);
    let nh = ((h * scale).round() as u32).max(1);
    image.resize_exact(nw, nh, FilterType::CatmullRom)
}

fn super_resolve(image: &DynamicImage, min_edge: u32) -> DynamicImage {
    let long_edge = image.width().max(image.height()).max(1);
    let factor = (min_edge.div_ceil(long_edge)).max(2);
    let up = image.resize_exact(
        image.width() * factor,
        image.height() * factor,
        FilterType::CatmullRom,
    );
    DynamicImage::ImageRgb8(unsharp_rgb(&up.to_rgb8(), 1.0, 1.5))
}

/// Contrast-limited adaptive histogram equalization over a `grid`×`grid`
/// tile layout with bilinear blending between the per-tile mappings.
pub fn clahe(gray: &GrayImage, grid: u32, clip: f32) -> GrayImage {
    let (w, h) = gray.dimensions();
    if w < grid * 2 || h < grid * 2 {
        return gray.clone();
    }

    let tile_w = w.div_ceil(grid);
    let tile_h = h.div_ceil(grid);
    let mut maps = vec![[0u8; 256]; (grid * grid) as usize];

    for ty in 0..grid {
        for tx in 0..grid {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(w);
            let y1 = (y0 + tile_h).min(h);

            let mut hist = [0u32; 256];
            let mut count = 0u32;
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[gray.get_pixel(x, y).0[0] as usize] += 1;
                    count += 1;
                }
            }
            if count == 0 {
                continue;
            }

            // Clip and redistribute the excess uniformly.
            let limit = ((clip * count as f32 / 256.0).max(1.0)) as u32;
            let mut excess = 0u32;
            for bin in hist.iter_mut() {
                if *bin > limit {
                    excess += *bin - limit;
                    *bin = limit;
                }
            }
            let bonus = excess / 256;
            for bin in hist.iter_mut() {
                *bin += bonus;
            }

            let total: u64 = hist.iter().map(|&v| v as u64).sum();
            let map = &mut maps[(ty * grid + tx) as usize];
            let mut cdf = 0u64;
            for v in 0..256 {
                cdf += hist[v] as u64;
                map[v] = ((cdf * 255) / total.max(1)) as u8;
            }
        }
    }

    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        let fy = ((y as f32 + 0.5) / tile_h as f32 - 0.5).clamp(0.0, (grid - 1) as f32);
        let ty0 = fy.floor() as u32;
        let ty1 = (ty0 + 1).min(grid - 1);
        let ay = fy - ty0 as f32;
        for x in 0..w {
            let fx = ((x as f32 + 0.5) / tile_w as f32 - 0.5).clamp(0.0, (grid - 1) as f32);
            let tx0 = fx.floor() as u32;
            let tx1 = (tx0 + 1).min(grid - 1);
            let ax = fx - tx0 as f32;

            let v = gray.get_pixel(x, y).0[0] as usize;
            let m00 = maps[(ty0 * grid + tx0) as usize][v] as f32;
            let m01 = maps[(ty0 * grid + tx1) as usize][v] as f32;
            let m10 = maps[(ty1 * grid + tx0) as usize][v] as f32;
            let m11 = maps[(ty1 * grid + tx1) as usize][v] as f32;
            let top = m00 * (1.0 - ax) + m01 * ax;
            let bottom = m10 * (1.0 - ax) + m11 * ax;
            let blended = top * (1.0 - ay) + bottom * ay;
            out.put_pixel(x, y, Luma([blended.round().clamp(0.0, 255.0) as u8]));
        }
    }
    out
}

/// 3×3 median filter with clamped borders.
pub fn median3(gray: &GrayImage) -> GrayImage {
    let (w, h) = gray.dimensions();
    let mut out = GrayImage::new(w, h);
    let mut window = [0u8; 9];
    for y in 0..h {
        for x in 0..w {
            let mut i = 0;
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    let sx = (x as i64 + dx).clamp(0, w as i64 - 1) as u32;
                    let sy = (y as i64 + dy).clamp(0, h as i64 - 1) as u32;
                    window[i] = gray.get_pixel(sx, sy).0[0];
                    i += 1;
                }
            }
            window.sort_unstable();
            out.put_pixel(x, y, Luma([window[4]]));
        }
    }
    out
}

/// Unsharp mask: `amount·src − (amount − 1)·blur(src, sigma)`.
pub fn unsharp(gray: &GrayImage, sigma: f32, amount: f32) -> GrayImage {
    let blurred = imageops::blur(gray, sigma);
    let (w, h) = gray.dimensions();
    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let src = gray.get_pixel(x, y).0[0] as f32;
            let blur = blurred.get_pixel(x, y).0[0] as f32;
            let sharpened = amount * src - (amount - 1.0) * blur;
            out.put_pixel(x, y, Luma([sharpened.round().clamp(0.0, 255.0) as u8]));
        }
    }
    out
}

fn unsharp_rgb(rgb: &RgbImage, sigma: f32, amount: f32) -> RgbImage {
    let blurred = imageops::blur(rgb, sigma);
    let (w, h) = rgb.dimensions();
    let mut out = RgbImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let src = rgb.get_pixel(x, y).0;
            let blur = blurred.get_pixel(x, y).0;
            let mut px = [0u8; 3];
            for c in 0..3 {
                let sharpened = amount * src[c] as f32 - (amount - 1.0) * blur[c] as f32;
                px[c] = sharpened.round().clamp(0.0, 255.0) as u8;
            }
            out.put_pixel(x, y, image::Rgb(px));
        }
    }
    out
}

/// Mean-window adaptive threshold: a pixel survives when it exceeds the
/// local window mean minus `offset`.
pub fn adaptive_threshold(gray: &GrayImage, block: u32, offset: i32) -> GrayImage {
    let (w, h) = gray.dimensions();
    let half = (block / 2) as i64;

    // Summed-area table, one row/column of padding.
    let mut integral = vec![0u64; ((w + 1) * (h + 1)) as usize];
    let stride = (w + 1) as usize;
    for y in 0..h as usize {
        let mut row_sum = 0u64;
        for x in 0..w as usize {
            row_sum += gray.get_pixel(x as u32, y as u32).0[0] as u64;
            integral[(y + 1) * stride + x + 1] = integral[y * stride + x + 1] + row_sum;
        }
    }

    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let x0 = (x as i64 - half).max(0) as usize;
            let y0 = (y as i64 - half).max(0) as usize;
            let x1 = ((x as i64 + half).min(w as i64 - 1) + 1) as usize;
            let y1 = ((y as i64 + half).min(h as i64 - 1) + 1) as usize;
            let area = ((x1 - x0) * (y1 - y0)) as u64;
            let sum = integral[y1 * stride + x1] + integral[y0 * stride + x0]
                - integral[y0 * stride + x1]
                - integral[y1 * stride + x0];
            let mean = (sum / area.max(1)) as i32;
            let v = gray.get_pixel(x, y).0[0] as i32;
            out.put_pixel(x, y, Luma([if v > mean - offset { 255 } else { 0 }]));
        }
    }
    out
}

/// Straighten a binarized image using the second-moment orientation of its
/// foreground. Angles beyond ±15° are treated as layout, not skew.
pub fn deskew(binary: &GrayImage) -> GrayImage {
    let (w, h) = binary.dimensions();

    let mut count = 0u64;
    let (mut sx, mut sy) = (0f64, 0f64);
    for y in 0..h {
        for x in 0..w {
            if binary.get_pixel(x, y).0[0] > 0 {
                sx += x as f64;
                sy += y as f64;
                count += 1;
            }
        }
    }
    if count < 10 {
        return binary.clone();
    }
    let (cx, cy) = (sx / count as f64, sy / count as f64);

    let (mut mu20, mut mu02, mut mu11) = (0f64, 0f64, 0f64);
    for y in 0..h {
        for x in 0..w {
            if binary.get_pixel(x, y).0[0] > 0 {
                let dx = x as f64 - cx;
                let dy = y as f64 - cy;
                mu20 += dx * dx;
                mu02 += dy * dy;
                mu11 += dx * dy;
            }
        }
    }

    let angle = 0.5 * (2.0 * mu11).atan2(mu20 - mu02);
    let degrees = angle.to_degrees();
    if degrees.abs() < 0.5 || degrees.abs() > 15.0 {
        return binary.clone();
    }
    rotate_nearest(binary, -angle)
}

fn rotate_nearest(gray: &GrayImage, angle: f64) -> GrayImage {
    let (w, h) = gray.dimensions();
    let (cx, cy) = (w as f64 / 2.0, h as f64 / 2.0);
    let (sin, cos) = angle.sin_cos();
    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            // Inverse mapping with replicated borders.
            let sx = (cos * dx + sin * dy + cx).round().clamp(0.0, w as f64 - 1.0) as u32;
            let sy = (-sin * dx + cos * dy + cy).round().clamp(0.0, h as f64 - 1.0) as u32;
            out.put_pixel(x, y, *gray.get_pixel(sx, sy));
        }
    }
    out
}
