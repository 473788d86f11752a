//! Image loading, letterbox resizing and tensor packing.

use crate::error::{Error, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use ndarray::Array4;
use std::path::Path;

/// Memory layout of a 4-D image tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
    Nchw,
    Nhwc,
}

/// Channel order expected by a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

impl ChannelOrder {
    fn pick(self, px: &Rgb<u8>) -> [u8; 3] {
        match self {
            ChannelOrder::Rgb => px.0,
            ChannelOrder::Bgr => [px.0[2], px.0[1], px.0[0]],
        }
    }
}

/// Decode an image file into 8-bit RGB.
pub fn load_image(path: &Path) -> Result<RgbImage> {
    if !path.exists() {
        return Err(Error::ImageNotFound(path.display().to_string()));
    }
    let img = image::open(path).map_err(|source| Error::Image {
        path: path.display().to_string(),
        source,
    })?;
    tracing::debug!(path = %path.display(), width = img.width(), height = img.height(), "image loaded");
    Ok(img.to_rgb8())
}

/// Metadata for mapping coordinates from a letterboxed canvas back to the source image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Fit `image` inside a `width` × `height` canvas, preserving aspect ratio.
///
/// Resizes with bilinear interpolation and centers the result on a canvas
/// filled with `fill`.
pub fn letterbox(image: &RgbImage, width: u32, height: u32, fill: Rgb<u8>) -> (RgbImage, Letterbox) {
    let (src_w, src_h) = image.dimensions();
    let scale = (width as f32 / src_w.max(1) as f32).min(height as f32 / src_h.max(1) as f32);

    let new_w = ((src_w as f32 * scale).round() as u32).clamp(1, width);
    let new_h = ((src_h as f32 * scale).round() as u32).clamp(1, height);
    let pad_x = (width - new_w) / 2;
    let pad_y = (height - new_h) / 2;

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);
    let mut canvas = RgbImage::from_pixel(width, height, fill);
    imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    let info = Letterbox {
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
    };
    (canvas, info)
}

/// Pack an image into a batch-of-one float tensor.
///
/// `normalize` receives the raw channel value and the channel index in
/// output order.
pub fn to_tensor(
    image: &RgbImage,
    layout: TensorLayout,
    order: ChannelOrder,
    normalize: impl Fn(f32, usize) -> f32,
) -> Array4<f32> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let mut tensor = match layout {
        TensorLayout::Nchw => Array4::<f32>::zeros((1, 3, h, w)),
        TensorLayout::Nhwc => Array4::<f32>::zeros((1, h, w, 3)),
    };

    for (x, y, px) in image.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for (c, v) in order.pick(px).into_iter().enumerate() {
            let value = normalize(v as f32, c);
            match layout {
                TensorLayout::Nchw => tensor[[0, c, y, x]] = value,
                TensorLayout::Nhwc => tensor[[0, y, x, c]] = value,
            }
        }
    }

    tensor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_image_missing() {
        let err = load_image(Path::new("/nonexistent/face.jpg")).unwrap_err();
        assert!(matches!(err, Error::ImageNotFound(_)));
    }

    #[test]
    fn test_letterbox_wide_image() {
        let img = RgbImage::from_pixel(320, 240, Rgb([200, 10, 10]));
        let (canvas, info) = letterbox(&img, 640, 640, Rgb([0, 0, 0]));
        assert_eq!(canvas.dimensions(), (640, 640));
        assert!((info.scale - 2.0).abs() < 1e-6);
        assert_eq!(info.pad_x, 0.0);
        assert_eq!(info.pad_y, 80.0);
        // Padding rows stay at the fill color, content rows carry the image.
        assert_eq!(canvas.get_pixel(320, 10).0, [0, 0, 0]);
        assert_eq!(canvas.get_pixel(320, 320).0, [200, 10, 10]);
    }

    #[test]
    fn test_letterbox_coordinate_roundtrip() {
        let img = RgbImage::new(320, 240);
        let (_, info) = letterbox(&img, 640, 640, Rgb([0, 0, 0]));

        let (orig_x, orig_y) = (100.0f32, 50.0f32);
        let boxed_x = orig_x * info.scale + info.pad_x;
        let boxed_y = orig_y * info.scale + info.pad_y;
        let (rx, ry) = info.to_source(boxed_x, boxed_y);

        assert!((rx - orig_x).abs() < 0.1, "x: {rx} vs {orig_x}");
        assert!((ry - orig_y).abs() < 0.1, "y: {ry} vs {orig_y}");
    }

    #[test]
    fn test_to_tensor_layouts() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(1, 0, Rgb([10, 20, 30]));

        let nchw = to_tensor(&img, TensorLayout::Nchw, ChannelOrder::Rgb, |v, _| v);
        assert_eq!(nchw.shape(), &[1, 3, 1, 2]);
        assert_eq!(nchw[[0, 0, 0, 1]], 10.0);
        assert_eq!(nchw[[0, 2, 0, 1]], 30.0);

        let nhwc = to_tensor(&img, TensorLayout::Nhwc, ChannelOrder::Bgr, |v, _| v);
        assert_eq!(nhwc.shape(), &[1, 1, 2, 3]);
        assert_eq!(nhwc[[0, 0, 1, 0]], 30.0);
        assert_eq!(nhwc[[0, 0, 1, 2]], 10.0);
    }

    #[test]
    fn test_to_tensor_channel_index_passed() {
        let img = RgbImage::from_pixel(1, 1, Rgb([100, 100, 100]));
        let means = [1.0, 2.0, 3.0];
        let t = to_tensor(&img, TensorLayout::Nchw, ChannelOrder::Bgr, |v, c| v - means[c]);
        assert_eq!(t[[0, 0, 0, 0]], 99.0);
        assert_eq!(t[[0, 2, 0, 0]], 97.0);
    }
}
