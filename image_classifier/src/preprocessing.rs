use image::{imageops::FilterType, DynamicImage, GenericImageView};
use ndarray::{Array, Array3, Array4, Axis};
use thiserror::Error;

pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("Error reading image: {0}")]
    Read(#[from] std::io::Error),
    #[error("Error decoding image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Image has no pixels")]
    EmptyImage,
}

pub fn decode_image(image_data: &[u8]) -> Result<DynamicImage, PreprocessError> {
    let image_reader =
        image::ImageReader::new(std::io::Cursor::new(image_data)).with_guessed_format()?;
    let image = image_reader.decode()?;
    Ok(image)
}

/// Resize shorter side, center crop, scale to [0, 1], normalize per channel.
#[derive(Debug, Clone)]
pub struct PreprocessingPipeline {
    resize: u32,
    crop: u32,
    mean: [f32; 3],
    std: [f32; 3],
}

impl Default for PreprocessingPipeline {
    fn default() -> Self {
        Self {
            resize: 256,
            crop: 224,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }
}

impl PreprocessingPipeline {
    /// Produces a `[1, 3, crop, crop]` batch ready for the model.
    pub fn apply(&self, image: &DynamicImage) -> Result<Array4<f32>, PreprocessError> {
        Ok(self.to_tensor(image)?.insert_axis(Axis(0)))
    }

    pub fn to_tensor(&self, image: &DynamicImage) -> Result<Array3<f32>, PreprocessError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(PreprocessError::EmptyImage);
        }

        // Crop in source pixels first so the intermediate never exceeds the decoded image.
        let (left, top, crop_width, crop_height) = self.crop_window(width, height);
        let cropped = image
            .crop_imm(left, top, crop_width, crop_height)
            .resize_exact(self.crop, self.crop, FilterType::Triangle)
            .to_rgb8();

        let size = self.crop as usize;
        let mut input = Array::zeros((3, size, size));
        for (x, y, pixel) in cropped.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for channel in 0..3 {
                let value = pixel.0[channel] as f32 / 255.;
                input[[channel, y, x]] = (value - self.mean[channel]) / self.std[channel];
            }
        }

        Ok(input)
    }

    /// Scales the shorter side to `resize`, keeping the aspect ratio.
    fn resized_dimensions(&self, width: u32, height: u32) -> (u64, u64) {
        let size = self.resize as u64;
        if width <= height {
            (size, size * height as u64 / width as u64)
        } else {
            (size * width as u64 / height as u64, size)
        }
    }

    /// The `(left, top, width, height)` source region that a resize to
    /// `resize` followed by a `crop` center crop would keep.
    fn crop_window(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let (resized_width, resized_height) = self.resized_dimensions(width, height);
        let (left, crop_width) = self.project(width, resized_width);
        let (top, crop_height) = self.project(height, resized_height);
        (left, top, crop_width, crop_height)
    }

    fn project(&self, dim: u32, resized: u64) -> (u32, u32) {
        let scale = dim as f64 / resized as f64;
        let offset = center_offset(resized, self.crop as u64) as f64 * scale;
        let start = (offset.round() as u32).min(dim - 1);
        let len = ((self.crop as f64 * scale).round() as u32).clamp(1, dim - start);
        (start, len)
    }
}

/// `round((dim - crop) / 2)` with ties to even, the way torchvision centers crops.
fn center_offset(dim: u64, crop: u64) -> u64 {
    let diff = dim.saturating_sub(crop);
    let half = diff / 2;
    if diff % 2 == 0 || half % 2 == 0 {
        half
    } else {
        half + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb, Rgba};
    use std::{
        io::Cursor,
        time::{Duration, Instant},
    };

    fn encode(image: DynamicImage, format: image::ImageFormat) -> Vec<u8> {
        let mut image_data: Vec<u8> = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut image_data), format)
            .unwrap();
        image_data
    }

    #[test]
    fn test_apply_output_shape() {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(640, 480, Rgb([10, 20, 30]));
        let image = decode_image(&encode(
            DynamicImage::ImageRgb8(img),
            image::ImageFormat::Png,
        ))
        .unwrap();

        let input = PreprocessingPipeline::default().apply(&image).unwrap();
        assert_eq!(input.shape(), &[1, 3, 224, 224]);
    }

    #[test]
    fn test_solid_color_is_normalized_per_channel() {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(300, 300, Rgb([255, 0, 255]));
        let input = PreprocessingPipeline::default()
            .to_tensor(&DynamicImage::ImageRgb8(img))
            .unwrap();

        let expected = [
            (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0],
            (0.0 - IMAGENET_MEAN[1]) / IMAGENET_STD[1],
            (1.0 - IMAGENET_MEAN[2]) / IMAGENET_STD[2],
        ];
        for (channel, expected) in expected.iter().enumerate() {
            let plane = input.index_axis(Axis(0), channel);
            assert!(plane.iter().all(|v| (v - expected).abs() < 1e-5));
        }
    }

    #[test]
    fn test_alpha_and_grayscale_are_converted_to_rgb() {
        let rgba = ImageBuffer::<Rgba<u8>, Vec<u8>>::from_pixel(64, 64, Rgba([0, 0, 0, 0]));
        let gray = DynamicImage::new_luma8(50, 80);
        let pipeline = PreprocessingPipeline::default();

        assert_eq!(
            pipeline
                .apply(&DynamicImage::ImageRgba8(rgba))
                .unwrap()
                .shape(),
            &[1, 3, 224, 224]
        );
        assert_eq!(pipeline.apply(&gray).unwrap().shape(), &[1, 3, 224, 224]);
    }

    #[test]
    fn test_resized_dimensions_keep_aspect_ratio() {
        let pipeline = PreprocessingPipeline::default();

        assert_eq!(pipeline.resized_dimensions(640, 480), (341, 256));
        assert_eq!(pipeline.resized_dimensions(480, 640), (256, 341));
        assert_eq!(pipeline.resized_dimensions(100, 100), (256, 256));
        assert_eq!(pipeline.resized_dimensions(1, 4000), (256, 1_024_000));
    }

    #[test]
    fn test_crop_window_in_source_pixels() {
        let pipeline = PreprocessingPipeline::default();

        assert_eq!(pipeline.crop_window(256, 256), (16, 16, 224, 224));
        assert_eq!(pipeline.crop_window(512, 512), (32, 32, 448, 448));
        assert_eq!(pipeline.crop_window(640, 480), (109, 30, 420, 420));
        assert_eq!(pipeline.crop_window(1, 4000), (0, 2000, 1, 1));
    }

    #[test]
    fn test_extreme_aspect_ratio_stays_bounded() {
        let strip = encode(DynamicImage::new_luma8(1, 4000), image::ImageFormat::Png);
        let image = decode_image(&strip).unwrap();

        let start = Instant::now();
        let input = PreprocessingPipeline::default().apply(&image).unwrap();

        assert_eq!(input.shape(), &[1, 3, 224, 224]);
        assert!(input.iter().all(|v| v.is_finite()));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_center_offset_rounds_half_to_even() {
        assert_eq!(center_offset(256, 224), 16);
        assert_eq!(center_offset(225, 224), 0);
        assert_eq!(center_offset(227, 224), 2);
        assert_eq!(center_offset(229, 224), 2);
        assert_eq!(center_offset(224, 224), 0);
    }

    #[test]
    fn test_non_image_bytes_fail_to_decode() {
        let html = b"<html><body>404 Not Found</body></html>";
        assert!(matches!(
            decode_image(html),
            Err(PreprocessError::Decode(_))
        ));
    }
}
