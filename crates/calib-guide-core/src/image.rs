//! Minimal 8-bit grayscale rasters used for board previews and silhouettes.
//!
//! Pixel centers sit on integer coordinates, matching the camera model.

#[derive(Clone, Copy, Debug)]
pub struct GrayImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8], // row-major, len = w*h
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl GrayImage {
    /// Image of the given size filled with `value`.
    pub fn filled(width: usize, height: usize, value: u8) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    /// All-zero image.
    pub fn zeros(width: usize, height: usize) -> Self {
        Self::filled(width, height, 0)
    }

    #[inline]
    pub fn view(&self) -> GrayImageView<'_> {
        GrayImageView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.data[y * self.width + x])
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: u8) {
        if x < self.width && y < self.height {
            self.data[y * self.width + x] = value;
        }
    }

    /// Fill the half-open rectangle `[x0, x1) x [y0, y1)`, clipped to the image.
    pub fn fill_rect(&mut self, x0: usize, y0: usize, x1: usize, y1: usize, value: u8) {
        let x1 = x1.min(self.width);
        let y1 = y1.min(self.height);
        for y in y0.min(y1)..y1 {
            let row = y * self.width;
            self.data[row + x0.min(x1)..row + x1].fill(value);
        }
    }

    /// Number of non-zero pixels.
    pub fn count_nonzero(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0).count()
    }

    /// Apply `f` to every pixel value.
    pub fn map(&self, f: impl Fn(u8) -> u8) -> Self {
        Self {
            width: self.width,
            height: self.height,
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }

    /// Nearest-neighbour resize.
    pub fn resize_nearest(&self, width: usize, height: usize) -> Self {
        if width == self.width && height == self.height {
            return self.clone();
        }
        let mut out = Self::zeros(width, height);
        if self.width == 0 || self.height == 0 {
            return out;
        }
        let sx = self.width as f64 / width as f64;
        let sy = self.height as f64 / height as f64;
        for y in 0..height {
            let src_y = (((y as f64 + 0.5) * sy) as usize).min(self.height - 1);
            for x in 0..width {
                let src_x = (((x as f64 + 0.5) * sx) as usize).min(self.width - 1);
                out.data[y * width + x] = self.data[src_y * self.width + src_x];
            }
        }
        out
    }
}

#[inline]
fn get_gray(src: &GrayImageView<'_>, x: i64, y: i64) -> u8 {
    if x < 0 || y < 0 || x >= src.width as i64 || y >= src.height as i64 {
        return 0;
    }
    src.data[y as usize * src.width + x as usize]
}

#[inline]
pub fn sample_nearest(src: &GrayImageView<'_>, x: f64, y: f64) -> u8 {
    if !x.is_finite() || !y.is_finite() {
        return 0;
    }
    get_gray(src, x.round() as i64, y.round() as i64)
}

#[inline]
pub fn sample_bilinear(src: &GrayImageView<'_>, x: f64, y: f64) -> f64 {
    if !x.is_finite() || !y.is_finite() {
        return 0.0;
    }
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let p00 = get_gray(src, x0, y0) as f64;
    let p10 = get_gray(src, x0 + 1, y0) as f64;
    let p01 = get_gray(src, x0, y0 + 1) as f64;
    let p11 = get_gray(src, x0 + 1, y0 + 1) as f64;

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    a + fy * (b - a)
}

#[inline]
pub fn sample_bilinear_u8(src: &GrayImageView<'_>, x: f64, y: f64) -> u8 {
    sample_bilinear(src, x, y).round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_rect_is_clipped() {
        let mut img = GrayImage::zeros(4, 3);
        img.fill_rect(2, 1, 10, 10, 7);
        assert_eq!(img.count_nonzero(), 4);
        assert_eq!(img.get(3, 2), Some(7));
        assert_eq!(img.get(1, 1), Some(0));
    }

    #[test]
    fn nearest_sampling_outside_is_black() {
        let img = GrayImage::filled(2, 2, 200);
        let view = img.view();
        assert_eq!(sample_nearest(&view, 0.4, 1.4), 200);
        assert_eq!(sample_nearest(&view, -0.6, 0.0), 0);
        assert_eq!(sample_nearest(&view, f64::NAN, 0.0), 0);
    }

    #[test]
    fn resize_keeps_constant_images_constant() {
        let img = GrayImage::filled(5, 3, 9);
        let up = img.resize_nearest(17, 11);
        assert_eq!(up.count_nonzero(), 17 * 11);
        assert!(up.data.iter().all(|&v| v == 9));
    }
}
