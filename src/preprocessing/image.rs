use crate::config::{NormalizationMode, PreprocessingConfig, TensorLayout};
use crate::error::InferenceError;
use base64::{engine::general_purpose, Engine as _};
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, RgbImage};
use ndarray::{Array, Array4, Axis};
use std::io::Cursor;
use std::path::Path;

// ImageNet channel means in BGR order, on the 0..255 scale
const CAFFE_MEAN_BGR: [f32; 3] = [103.939, 116.779, 123.68];

// ImageNet Standards
const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

const ACCEPTED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Longest edge of the preview shown next to the result.
pub const PREVIEW_MAX_EDGE: u32 = 512;

/// Rejects uploads whose file name does not end in jpg, jpeg or png.
pub fn check_extension(file_name: &str) -> Result<(), InferenceError> {
    let accepted = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            ACCEPTED_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false);

    if accepted {
        Ok(())
    } else {
        Err(InferenceError::UnsupportedFormat(file_name.to_string()))
    }
}

/// Decodes an uploaded image (format guessed from the bytes) and drops any alpha channel.
pub fn decode_upload(buffer: &[u8]) -> Result<RgbImage, InferenceError> {
    let img = image::load_from_memory(buffer).map_err(InferenceError::ImageError)?;
    Ok(img.to_rgb8())
}

/// Encodes a downscaled copy of `image` as a `data:image/png;base64,...` URI.
pub fn preview_data_uri(image: &RgbImage) -> Result<String, InferenceError> {
    let img = DynamicImage::ImageRgb8(image.clone());
    let img = if img.width() > PREVIEW_MAX_EDGE || img.height() > PREVIEW_MAX_EDGE {
        img.resize(PREVIEW_MAX_EDGE, PREVIEW_MAX_EDGE, FilterType::Triangle)
    } else {
        img
    };

    let mut buffer = Vec::new();
    img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)?;

    Ok(format!(
        "data:image/png;base64,{}",
        general_purpose::STANDARD.encode(&buffer)
    ))
}

/// Maps one RGB pixel to the three model input values, in model channel order.
fn normalize(mode: NormalizationMode, [r, g, b]: [u8; 3]) -> [f32; 3] {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    match mode {
        NormalizationMode::Caffe => [
            b - CAFFE_MEAN_BGR[0],
            g - CAFFE_MEAN_BGR[1],
            r - CAFFE_MEAN_BGR[2],
        ],
        NormalizationMode::Tf => [r / 127.5 - 1.0, g / 127.5 - 1.0, b / 127.5 - 1.0],
        NormalizationMode::Torch => [
            ((r / 255.0) - MEAN[0]) / STD[0],
            ((g / 255.0) - MEAN[1]) / STD[1],
            ((b / 255.0) - MEAN[2]) / STD[2],
        ],
    }
}

/// Turns a decoded image into the feature extractor's input tensor.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    image_size: u32,
    mode: NormalizationMode,
    layout: TensorLayout,
}

impl Preprocessor {
    pub fn new(config: &PreprocessingConfig) -> Self {
        Self {
            image_size: config.image_size,
            mode: config.mode,
            layout: config.layout,
        }
    }

    /// Returns a tensor of shape [1, size, size, 3] (NHWC) or [1, 3, size, size] (NCHW).
    pub fn tensor(&self, image: &RgbImage) -> Result<Array4<f32>, InferenceError> {
        let size = self.image_size;
        if size == 0 {
            return Err(InferenceError::PreprocessingError(
                "image_size must be positive".to_string(),
            ));
        }

        // Bicubic, like PIL's default resize filter
        let resized = imageops::resize(image, size, size, FilterType::CatmullRom);

        let mut normalized_data = Vec::with_capacity(3 * (size * size) as usize);
        for pixel in resized.pixels() {
            normalized_data.extend_from_slice(&normalize(self.mode, pixel.0));
        }

        // [Height, Width, Channels]
        let array = Array::from_shape_vec((size as usize, size as usize, 3), normalized_data)
            .map_err(|e| InferenceError::PreprocessingError(e.to_string()))?;

        let array = match self.layout {
            TensorLayout::Nhwc => array,
            TensorLayout::Nchw => array.permuted_axes([2, 0, 1]),
        };

        // Add batch dimension
        let array = array.insert_axis(Axis(0));

        Ok(array.as_standard_layout().to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes(img: &RgbImage) -> Vec<u8> {
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .unwrap();
        buffer
    }

    fn preprocessor(mode: NormalizationMode, layout: TensorLayout) -> Preprocessor {
        Preprocessor::new(&PreprocessingConfig {
            image_size: 224,
            mode,
            layout,
        })
    }

    #[test]
    fn test_check_extension() {
        assert!(check_extension("scan.jpg").is_ok());
        assert!(check_extension("scan.JPEG").is_ok());
        assert!(check_extension("dir/scan.Png").is_ok());

        for name in ["scan.bmp", "scan", "scan.png.exe", ""] {
            match check_extension(name) {
                Err(InferenceError::UnsupportedFormat(got)) => assert_eq!(got, name),
                other => panic!("Expected UnsupportedFormat for {name:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_decode_upload_error_handling() {
        let result = decode_upload(b"invalid image data");
        match result.unwrap_err() {
            InferenceError::ImageError(_) => {}
            _ => panic!("Expected ImageError"),
        }
    }

    #[test]
    fn test_decode_upload_drops_alpha() {
        let rgba = image::RgbaImage::from_pixel(4, 4, image::Rgba([10, 20, 30, 0]));
        let mut buffer = Vec::new();
        rgba.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .unwrap();

        let decoded = decode_upload(&buffer).unwrap();
        assert_eq!(decoded.get_pixel(0, 0).0, [10, 20, 30]);
    }

    #[test]
    fn test_nhwc_shape_for_any_input_size() {
        let pre = preprocessor(NormalizationMode::Caffe, TensorLayout::Nhwc);
        for (w, h) in [(10, 10), (640, 480), (32, 500)] {
            let img = decode_upload(&png_bytes(&RgbImage::new(w, h))).unwrap();
            let tensor = pre.tensor(&img).unwrap();
            assert_eq!(tensor.shape(), &[1, 224, 224, 3]);
        }
    }

    #[test]
    fn test_nchw_shape() {
        let pre = preprocessor(NormalizationMode::Torch, TensorLayout::Nchw);
        let tensor = pre.tensor(&RgbImage::new(50, 50)).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 224, 224]);
    }

    #[test]
    fn test_caffe_mode_is_bgr_mean_subtracted() {
        let pre = preprocessor(NormalizationMode::Caffe, TensorLayout::Nhwc);
        let red = RgbImage::from_pixel(10, 10, image::Rgb([255, 0, 0]));
        let tensor = pre.tensor(&red).unwrap();

        // Channel 0 is blue, channel 2 is red
        assert!((tensor[[0, 5, 5, 0]] - (0.0 - 103.939)).abs() < 1e-3);
        assert!((tensor[[0, 5, 5, 1]] - (0.0 - 116.779)).abs() < 1e-3);
        assert!((tensor[[0, 5, 5, 2]] - (255.0 - 123.68)).abs() < 1e-3);
    }

    #[test]
    fn test_tf_mode_range() {
        let pre = preprocessor(NormalizationMode::Tf, TensorLayout::Nhwc);
        let white = RgbImage::from_pixel(8, 8, image::Rgb([255, 255, 255]));
        let black = RgbImage::from_pixel(8, 8, image::Rgb([0, 0, 0]));

        assert!((pre.tensor(&white).unwrap()[[0, 0, 0, 0]] - 1.0).abs() < 1e-5);
        assert!((pre.tensor(&black).unwrap()[[0, 0, 0, 0]] + 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_torch_mode_consistency() {
        let pre = preprocessor(NormalizationMode::Torch, TensorLayout::Nchw);
        let gray = RgbImage::from_pixel(10, 10, image::Rgb([128, 128, 128]));
        let tensor = pre.tensor(&gray).unwrap();

        for channel in 0..3 {
            let expected = ((128.0 / 255.0) - MEAN[channel]) / STD[channel];
            assert!((tensor[[0, channel, 0, 0]] - expected).abs() < 1e-3);
        }
    }

    #[test]
    fn test_zero_size_rejected() {
        let pre = Preprocessor::new(&PreprocessingConfig {
            image_size: 0,
            ..PreprocessingConfig::default()
        });
        match pre.tensor(&RgbImage::new(4, 4)).unwrap_err() {
            InferenceError::PreprocessingError(_) => {}
            _ => panic!("Expected PreprocessingError"),
        }
    }

    #[test]
    fn test_preview_is_png_data_uri_and_bounded() {
        let big = RgbImage::from_pixel(1024, 256, image::Rgb([1, 2, 3]));
        let uri = preview_data_uri(&big).unwrap();
        let payload = uri.strip_prefix("data:image/png;base64,").unwrap();

        let bytes = general_purpose::STANDARD.decode(payload).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.width(), PREVIEW_MAX_EDGE);
        assert_eq!(decoded.height(), 128);
    }

    #[test]
    fn test_preview_keeps_small_images() {
        let small = RgbImage::new(40, 30);
        let uri = preview_data_uri(&small).unwrap();
        let payload = uri.strip_prefix("data:image/png;base64,").unwrap();
        let bytes = general_purpose::STANDARD.decode(payload).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (40, 30));
    }
}
