//! Lightweight image statistics for camera frames.
//!
//! Frames are reduced to a fixed 64x64 grid before any statistic is taken so
//! the cost per frame does not depend on the capture resolution.

use crate::core::stats;
use crate::sensor::ImageFrame;

/// Side length of the working grid.
pub const WORKING_SIZE: usize = 64;

/// A single-plane image of `f64` intensities in 0..=255.
#[derive(Debug, Clone)]
pub struct Plane {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f64>,
}

impl Plane {
    fn at(&self, x: usize, y: usize) -> f64 {
        self.data[y * self.width + x]
    }

    pub fn mean(&self) -> f64 {
        stats::mean(&self.data)
    }

    pub fn std_dev(&self) -> f64 {
        stats::std_dev(&self.data)
    }
}

/// A frame resampled to the working grid, one plane per colour channel.
#[derive(Debug, Clone)]
pub struct SmallFrame {
    pub channels: Vec<Plane>,
}

impl SmallFrame {
    /// Channel plane `i`, falling back to the last available plane so that
    /// single-channel frames read as grayscale for every colour.
    pub fn channel(&self, i: usize) -> &Plane {
        let idx = i.min(self.channels.len().saturating_sub(1));
        &self.channels[idx]
    }

    /// Luma plane (ITU-R BT.601 weights). Single-channel frames are returned
    /// as-is.
    pub fn grayscale(&self) -> Plane {
        if self.channels.len() < 3 {
            return self.channel(0).clone();
        }
        let (r, g, b) = (&self.channels[0], &self.channels[1], &self.channels[2]);
        let data = r
            .data
            .iter()
            .zip(&g.data)
            .zip(&b.data)
            .map(|((r, g), b)| 0.299 * r + 0.587 * g + 0.114 * b)
            .collect();
        Plane {
            width: r.width,
            height: r.height,
            data,
        }
    }
}

/// Resample `frame` to `size`x`size` by area averaging. A frame already at
/// the target size is copied without averaging.
pub fn downsample(frame: &ImageFrame, size: usize) -> SmallFrame {
    let size = size.max(1);
    let channels = frame.channels().min(3).max(1);

    let planes = (0..channels)
        .map(|c| {
            let mut data = Vec::with_capacity(size * size);
            for oy in 0..size {
                let (y0, y1) = source_span(oy, size, frame.height());
                for ox in 0..size {
                    let (x0, x1) = source_span(ox, size, frame.width());
                    let mut sum = 0.0;
                    for y in y0..y1 {
                        for x in x0..x1 {
                            sum += frame.at(x, y, c) as f64;
                        }
                    }
                    data.push(sum / ((y1 - y0) * (x1 - x0)) as f64);
                }
            }
            Plane {
                width: size,
                height: size,
                data,
            }
        })
        .collect();

    SmallFrame { channels: planes }
}

/// Source pixel range covered by output index `out` when mapping `src`
/// pixels onto `dst` pixels. Always at least one pixel wide.
fn source_span(out: usize, dst: usize, src: usize) -> (usize, usize) {
    let start = (out * src / dst).min(src - 1);
    let end = ((out + 1) * src / dst).clamp(start + 1, src);
    (start, end)
}

/// Reflect an out-of-range index back into `0..len` without repeating the
/// edge pixel.
fn reflect(i: isize, len: usize) -> usize {
    let len = len as isize;
    if len == 1 {
        return 0;
    }
    let r = if i < 0 {
        -i
    } else if i >= len {
        2 * len - i - 2
    } else {
        i
    };
    r.clamp(0, len - 1) as usize
}

/// Mean 3x3 Sobel gradient magnitude over the plane.
pub fn sobel_magnitude_mean(plane: &Plane) -> f64 {
    let (w, h) = (plane.width, plane.height);
    if w == 0 || h == 0 {
        return 0.0;
    }
    let px = |x: isize, y: isize| plane.at(reflect(x, w), reflect(y, h));

    let mut total = 0.0;
    for y in 0..h as isize {
        for x in 0..w as isize {
            let gx = (px(x + 1, y - 1) + 2.0 * px(x + 1, y) + px(x + 1, y + 1))
                - (px(x - 1, y - 1) + 2.0 * px(x - 1, y) + px(x - 1, y + 1));
            let gy = (px(x - 1, y + 1) + 2.0 * px(x, y + 1) + px(x + 1, y + 1))
                - (px(x - 1, y - 1) + 2.0 * px(x, y - 1) + px(x + 1, y - 1));
            total += (gx * gx + gy * gy).sqrt();
        }
    }
    total / (w * h) as f64
}
