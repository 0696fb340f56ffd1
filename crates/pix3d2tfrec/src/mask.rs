//! Instance masks: COCO segmentations (polygons, RLE) and PNG rasters.
//!
//! RLE counts run over the image in column-major order, starting with a run
//! of zeros. Polygons are rasterized the way the COCO API does it: vertices
//! are upsampled by 5, traced densely along every edge, and the crossings with
//! pixel-centre columns become run boundaries.

use std::io::Cursor;

use image::{GrayImage, ImageFormat};
use serde::Deserialize;
use thiserror::Error;

const POLY_SCALE: f64 = 5.0;

#[derive(Debug, Error)]
pub enum MaskError {
    #[error("polygon has an odd number of coordinates ({0})")]
    OddPolygon(usize),

    #[error("RLE counts sum to {sum}, expected {expected} pixels")]
    CountMismatch { sum: u64, expected: u64 },

    #[error("invalid character {0:?} in compressed RLE counts")]
    BadCompressedCount(char),

    #[error("compressed RLE count does not fit in 64 bits")]
    CountOverflow,

    #[error("compressed RLE counts decode to a negative run")]
    NegativeRun,

    #[error("crowd segmentation must be a single RLE, got {0} channels")]
    CrowdChannels(usize),

    #[error("segmentation has no regions")]
    Empty,

    #[error("mask dimensions {height}x{width} do not match the data")]
    Dimensions { height: u32, width: u32 },

    #[error("PNG codec error")]
    Png(#[from] image::ImageError),
}

/// Uncompressed RLE: `{"counts": [..], "size": [h, w]}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CocoRle {
    pub counts: Vec<u32>,
    pub size: [u32; 2],
}

/// Compressed RLE: `{"counts": "<string>", "size": [h, w]}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CocoCompressedRle {
    pub counts: String,
    pub size: [u32; 2],
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CocoSegmentation {
    Polygons(Vec<Vec<f64>>),
    Rle(CocoRle),
    CompressedRle(CocoCompressedRle),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rle {
    pub height: u32,
    pub width: u32,
    pub counts: Vec<u32>,
}

impl Rle {
    pub fn new(height: u32, width: u32, counts: Vec<u32>) -> Result<Self, MaskError> {
        let sum: u64 = counts.iter().map(|&c| u64::from(c)).sum();
        let expected = u64::from(height) * u64::from(width);
        if sum != expected {
            return Err(MaskError::CountMismatch { sum, expected });
        }

        Ok(Self {
            height,
            width,
            counts,
        })
    }

    pub fn decode(&self) -> BinaryMask {
        let (h, w) = (self.height as usize, self.width as usize);
        let mut data = vec![0u8; h * w];
        let mut pos = 0usize;
        let mut value = 0u8;

        for &run in &self.counts {
            if value == 1 {
                for p in pos..pos + run as usize {
                    // Column-major position → row-major pixel.
                    data[(p % h) * w + p / h] = 1;
                }
            }
            pos += run as usize;
            value ^= 1;
        }

        BinaryMask {
            height: self.height,
            width: self.width,
            data,
        }
    }
}

/// Single-channel 0/1 mask, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryMask {
    pub height: u32,
    pub width: u32,
    pub data: Vec<u8>,
}

impl BinaryMask {
    /// Element-wise maximum of several masks of the same size.
    pub fn union(masks: &[BinaryMask]) -> Result<Self, MaskError> {
        let first = masks.first().ok_or(MaskError::Empty)?;
        let mut merged = first.clone();

        for mask in &masks[1..] {
            if mask.height != merged.height || mask.width != merged.width {
                return Err(MaskError::Dimensions {
                    height: mask.height,
                    width: mask.width,
                });
            }
            for (dst, &src) in merged.data.iter_mut().zip(&mask.data) {
                *dst = (*dst).max(src);
            }
        }

        Ok(merged)
    }

    pub fn area(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0).count()
    }

    /// 8-bit grayscale PNG with the raw 0/1 values.
    pub fn to_png(&self) -> Result<Vec<u8>, MaskError> {
        let img = GrayImage::from_raw(self.width, self.height, self.data.clone()).ok_or(
            MaskError::Dimensions {
                height: self.height,
                width: self.width,
            },
        )?;

        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?;
        Ok(out)
    }

    /// Decode a rasterized mask file; any non-zero pixel is foreground.
    pub fn from_png(bytes: &[u8]) -> Result<Self, MaskError> {
        let img = image::load_from_memory(bytes)?.to_luma8();
        let (width, height) = img.dimensions();

        Ok(Self {
            height,
            width,
            data: img.into_raw().into_iter().map(|v| u8::from(v != 0)).collect(),
        })
    }
}

/// Expand the COCO compressed-counts string into run lengths.
pub fn decode_compressed_counts(s: &str) -> Result<Vec<u32>, MaskError> {
    let bytes = s.as_bytes();
    let mut counts: Vec<i64> = Vec::new();
    let mut p = 0usize;

    while p < bytes.len() {
        let mut x: i64 = 0;
        let mut k = 0u32;

        loop {
            let raw = bytes[p];
            if !(48..48 + 64).contains(&raw) {
                return Err(MaskError::BadCompressedCount(raw as char));
            }
            // Thirteen 5-bit groups already cover all 64 bits.
            if 5 * k >= i64::BITS {
                return Err(MaskError::CountOverflow);
            }
            let c = i64::from(raw - 48);
            x |= (c & 0x1f) << (5 * k);
            p += 1;
            k += 1;

            let more = c & 0x20 != 0;
            if !more {
                if c & 0x10 != 0 && 5 * k < i64::BITS {
                    x |= -1i64 << (5 * k);
                }
                break;
            }
            if p >= bytes.len() {
                return Err(MaskError::BadCompressedCount(raw as char));
            }
        }

        // From the fourth count on, values are deltas against two counts back.
        if counts.len() > 2 {
            x = x
                .checked_add(counts[counts.len() - 2])
                .ok_or(MaskError::CountOverflow)?;
        }
        counts.push(x);
    }

    counts
        .into_iter()
        .map(|c| u32::try_from(c).map_err(|_| MaskError::NegativeRun))
        .collect()
}

/// Rasterize one polygon `[x0, y0, x1, y1, ..]` into an RLE.
pub fn rle_from_polygon(xy: &[f64], height: u32, width: u32) -> Result<Rle, MaskError> {
    if xy.len() % 2 != 0 {
        return Err(MaskError::OddPolygon(xy.len()));
    }

    let (h, w) = (i64::from(height), i64::from(width));
    let k = xy.len() / 2;
    if k == 0 {
        return Rle::new(height, width, vec![height * width]);
    }

    // Upsampled vertices, closed.
    let mut x: Vec<i64> = (0..k).map(|j| (POLY_SCALE * xy[2 * j] + 0.5) as i64).collect();
    let mut y: Vec<i64> = (0..k).map(|j| (POLY_SCALE * xy[2 * j + 1] + 0.5) as i64).collect();
    x.push(x[0]);
    y.push(y[0]);

    // Dense boundary points.
    let mut u: Vec<i64> = Vec::new();
    let mut v: Vec<i64> = Vec::new();
    for j in 0..k {
        let (mut xs, mut xe, mut ys, mut ye) = (x[j], x[j + 1], y[j], y[j + 1]);
        let dx = (xe - xs).abs();
        let dy = (ys - ye).abs();
        let flip = (dx >= dy && xs > xe) || (dx < dy && ys > ye);
        if flip {
            std::mem::swap(&mut xs, &mut xe);
            std::mem::swap(&mut ys, &mut ye);
        }

        if dx >= dy {
            let s = if dx == 0 { 0.0 } else { (ye - ys) as f64 / dx as f64 };
            for d in 0..=dx {
                let t = if flip { dx - d } else { d };
                u.push(t + xs);
                v.push((ys as f64 + s * t as f64 + 0.5) as i64);
            }
        } else {
            let s = (xe - xs) as f64 / dy as f64;
            for d in 0..=dy {
                let t = if flip { dy - d } else { d };
                v.push(t + ys);
                u.push((xs as f64 + s * t as f64 + 0.5) as i64);
            }
        }
    }

    // Boundary crossings with pixel-centre columns, downsampled.
    let mut starts: Vec<u64> = Vec::new();
    for j in 1..u.len() {
        if u[j] == u[j - 1] {
            continue;
        }

        let xd = (if u[j] < u[j - 1] { u[j] } else { u[j] - 1 }) as f64;
        let xd = (xd + 0.5) / POLY_SCALE - 0.5;
        if xd.floor() != xd || xd < 0.0 || xd > (w - 1) as f64 {
            continue;
        }

        let yd = v[j].min(v[j - 1]) as f64;
        let yd = ((yd + 0.5) / POLY_SCALE - 0.5).clamp(0.0, h as f64).ceil();

        starts.push((xd as i64 * h + yd as i64) as u64);
    }

    starts.push((h * w) as u64);
    starts.sort_unstable();

    // Positions → run lengths, folding zero-length runs into their neighbour.
    let mut prev = 0u64;
    let deltas: Vec<u64> = starts
        .iter()
        .map(|&s| {
            let d = s - prev;
            prev = s;
            d
        })
        .collect();

    let mut counts: Vec<u64> = vec![deltas[0]];
    let mut j = 1;
    while j < deltas.len() {
        if deltas[j] > 0 {
            counts.push(deltas[j]);
            j += 1;
        } else {
            j += 1;
            if j < deltas.len() {
                if let Some(last) = counts.last_mut() {
                    *last += deltas[j];
                }
                j += 1;
            }
        }
    }

    Rle::new(height, width, counts.into_iter().map(|c| c as u32).collect())
}

/// One mask per region of the segmentation.
pub fn decode_segmentation(
    segmentation: &CocoSegmentation,
    height: u32,
    width: u32,
) -> Result<Vec<BinaryMask>, MaskError> {
    match segmentation {
        CocoSegmentation::Polygons(polygons) => polygons
            .iter()
            .map(|poly| Ok(rle_from_polygon(poly, height, width)?.decode()))
            .collect(),
        CocoSegmentation::Rle(rle) => {
            Ok(vec![Rle::new(rle.size[0], rle.size[1], rle.counts.clone())?.decode()])
        }
        CocoSegmentation::CompressedRle(rle) => {
            let counts = decode_compressed_counts(&rle.counts)?;
            Ok(vec![Rle::new(rle.size[0], rle.size[1], counts)?.decode()])
        }
    }
}

/// Decode a segmentation to one binary mask and encode it as PNG.
///
/// Regions of a non-crowd instance are merged; a crowd instance must
/// already be a single region.
pub fn coco_segmentation_to_mask_png(
    segmentation: &CocoSegmentation,
    height: u32,
    width: u32,
    is_crowd: bool,
) -> Result<Vec<u8>, MaskError> {
    let masks = decode_segmentation(segmentation, height, width)?;

    let mask = match masks.len() {
        0 => return Err(MaskError::Empty),
        1 => masks.into_iter().next().ok_or(MaskError::Empty)?,
        n if is_crowd => return Err(MaskError::CrowdChannels(n)),
        _ => BinaryMask::union(&masks)?,
    };

    mask.to_png()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(mask: &BinaryMask) -> Vec<Vec<u8>> {
        mask.data
            .chunks(mask.width as usize)
            .map(<[u8]>::to_vec)
            .collect()
    }

    #[test]
    fn rectangle_polygon_matches_coco_api() {
        let rle = rle_from_polygon(&[1.0, 1.0, 4.0, 1.0, 4.0, 3.0, 1.0, 3.0], 5, 6).unwrap();
        assert_eq!(rle.counts, vec![6, 2, 3, 2, 3, 2, 12]);

        let mask = rle.decode();
        assert_eq!(
            rows(&mask),
            vec![
                vec![0, 0, 0, 0, 0, 0],
                vec![0, 1, 1, 1, 0, 0],
                vec![0, 1, 1, 1, 0, 0],
                vec![0, 0, 0, 0, 0, 0],
                vec![0, 0, 0, 0, 0, 0],
            ]
        );
        assert_eq!(mask.area(), 6);
    }

    #[test]
    fn triangle_polygon_matches_coco_api() {
        let rle = rle_from_polygon(&[0.5, 0.5, 3.5, 0.5, 2.0, 3.5], 4, 5).unwrap();
        assert_eq!(rle.counts, vec![5, 1, 3, 2, 9]);
        assert_eq!(
            rows(&rle.decode()),
            vec![
                vec![0, 0, 0, 0, 0],
                vec![0, 1, 1, 0, 0],
                vec![0, 0, 1, 0, 0],
                vec![0, 0, 0, 0, 0],
            ]
        );
    }

    #[test]
    fn compressed_counts_decode() {
        assert_eq!(decode_compressed_counts("6230009").unwrap(), vec![6, 2, 3, 2, 3, 2, 12]);
        assert_eq!(
            decode_compressed_counts("05T3S1\\k1kN").unwrap(),
            vec![0, 5, 100, 40, 2000, 3]
        );
    }

    #[test]
    fn over_long_count_is_an_error() {
        // Every 'o' carries the continuation bit, so the run never fits in 64 bits.
        let counts = "o".repeat(14) + "0";
        assert!(matches!(
            decode_compressed_counts(&counts),
            Err(MaskError::CountOverflow)
        ));

        let segmentation = CocoSegmentation::CompressedRle(CocoCompressedRle {
            counts,
            size: [5, 6],
        });
        assert!(coco_segmentation_to_mask_png(&segmentation, 5, 6, false).is_err());
    }

    #[test]
    fn delta_overflow_is_an_error() {
        // Thirteen groups spell i64::MAX; the fourth count adds it to itself.
        let max = "o".repeat(12) + "7";
        let counts = format!("0{max}0{max}");
        assert!(matches!(
            decode_compressed_counts(&counts),
            Err(MaskError::CountOverflow)
        ));
    }

    #[test]
    fn all_rle_forms_agree() {
        let polygon = CocoSegmentation::Polygons(vec![vec![1.0, 1.0, 4.0, 1.0, 4.0, 3.0, 1.0, 3.0]]);
        let plain = CocoSegmentation::Rle(CocoRle {
            counts: vec![6, 2, 3, 2, 3, 2, 12],
            size: [5, 6],
        });
        let compressed = CocoSegmentation::CompressedRle(CocoCompressedRle {
            counts: "6230009".to_owned(),
            size: [5, 6],
        });

        let a = decode_segmentation(&polygon, 5, 6).unwrap();
        let b = decode_segmentation(&plain, 5, 6).unwrap();
        let c = decode_segmentation(&compressed, 5, 6).unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn segmentation_forms_deserialize_from_json() {
        let poly: CocoSegmentation = serde_json::from_str("[[1, 1, 4, 1, 4, 3]]").unwrap();
        assert!(matches!(poly, CocoSegmentation::Polygons(_)));

        let rle: CocoSegmentation =
            serde_json::from_str(r#"{"counts": [30], "size": [5, 6]}"#).unwrap();
        assert!(matches!(rle, CocoSegmentation::Rle(_)));

        let compressed: CocoSegmentation =
            serde_json::from_str(r#"{"counts": "6230009", "size": [5, 6]}"#).unwrap();
        assert!(matches!(compressed, CocoSegmentation::CompressedRle(_)));
    }

    #[test]
    fn non_crowd_regions_are_merged_into_one_channel() {
        let segmentation = CocoSegmentation::Polygons(vec![
            vec![1.0, 1.0, 4.0, 1.0, 4.0, 3.0, 1.0, 3.0],
            vec![0.0, 4.0, 6.0, 4.0, 6.0, 5.0, 0.0, 5.0],
        ]);

        let png = coco_segmentation_to_mask_png(&segmentation, 5, 6, false).unwrap();
        let mask = BinaryMask::from_png(&png).unwrap();
        let parts = decode_segmentation(&segmentation, 5, 6).unwrap();

        assert_eq!((mask.height, mask.width), (5, 6));
        assert_eq!(mask, BinaryMask::union(&parts).unwrap());
        assert!(mask.area() >= parts[0].area());
    }

    #[test]
    fn crowd_with_several_regions_is_rejected() {
        let segmentation = CocoSegmentation::Polygons(vec![
            vec![1.0, 1.0, 4.0, 1.0, 4.0, 3.0],
            vec![0.0, 0.0, 2.0, 0.0, 2.0, 2.0],
        ]);
        let err = coco_segmentation_to_mask_png(&segmentation, 5, 6, true).unwrap_err();
        assert!(matches!(err, MaskError::CrowdChannels(2)));
    }

    #[test]
    fn png_keeps_raw_zero_one_values() {
        let mask = BinaryMask {
            height: 2,
            width: 3,
            data: vec![0, 1, 0, 1, 1, 0],
        };
        let png = mask.to_png().unwrap();

        let img = image::load_from_memory(&png).unwrap().to_luma8();
        assert_eq!(img.into_raw(), mask.data);
    }

    #[test]
    fn rle_counts_must_cover_the_image() {
        let err = Rle::new(2, 2, vec![1, 2]).unwrap_err();
        assert!(matches!(err, MaskError::CountMismatch { sum: 3, expected: 4 }));
    }

    #[test]
    fn odd_polygon_is_rejected() {
        assert!(matches!(
            rle_from_polygon(&[1.0, 2.0, 3.0], 4, 4),
            Err(MaskError::OddPolygon(3))
        ));
    }
}
