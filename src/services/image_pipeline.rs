//! Image pipeline: fetch, bound the width, stamp a watermark, re-encode.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, RgbaImage};

use crate::models::job::Artifact;
use crate::models::media::ImageOptions;
use crate::services::transform::{JobInput, Progress, TransformAdapter, TransformError};

pub const DEFAULT_MAX_WIDTH: u32 = 1500;
pub const DEFAULT_QUALITY: u8 = 75;
pub const DEFAULT_WATERMARK_OPACITY: f32 = 0.3;
pub const DEFAULT_WATERMARK_SCALE: f32 = 0.4;

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Semi-transparent logo composited at the centre of each image.
pub struct Watermark {
    image: RgbaImage,
    /// Width of the stamped logo as a fraction of the image width.
    scale: f32,
}

impl Watermark {
    /// Decode a raster logo (PNG, JPEG or WebP) and fade it to `opacity`.
    ///
    /// Vector logos are rejected with a pointer to export a PNG instead.
    pub fn from_bytes(bytes: &[u8], opacity: f32, scale: f32) -> Result<Self, TransformError> {
        if looks_like_svg(bytes) {
            return Err(TransformError::Decode(
                "watermark: SVG logos are not supported, export the logo as PNG".to_string(),
            ));
        }
        let mut image = image::load_from_memory(bytes)
            .map_err(|e| TransformError::Decode(format!("watermark: {}", e)))?
            .to_rgba8();

        let opacity = opacity.clamp(0.0, 1.0);
        for pixel in image.pixels_mut() {
            pixel[3] = (pixel[3] as f32 * opacity).round() as u8;
        }

        Ok(Self {
            image,
            scale: scale.clamp(0.0, 1.0),
        })
    }

    /// Load from an `http(s)://` URL or a local path.
    pub async fn load(
        source: &str,
        http: &reqwest::Client,
        opacity: f32,
        scale: f32,
    ) -> Result<Self, TransformError> {
        let bytes = if source.starts_with("http://") || source.starts_with("https://") {
            fetch(http, source).await?
        } else {
            Bytes::from(tokio::fs::read(source).await?)
        };
        Self::from_bytes(&bytes, opacity, scale)
    }

    /// The logo resized for an image `base_width` pixels wide.
    fn sized_for(&self, base_width: u32) -> Option<RgbaImage> {
        let width = (base_width as f32 * self.scale).round() as u32;
        if width == 0 || self.image.width() == 0 {
            return None;
        }
        let height = ((self.image.height() as u64 * width as u64) as f64 / self.image.width() as f64)
            .round()
            .max(1.0) as u32;
        Some(imageops::resize(&self.image, width, height, FilterType::Lanczos3))
    }
}

fn looks_like_svg(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(512)];
    let head = String::from_utf8_lossy(head);
    let head = head.trim_start_matches('\u{feff}').trim_start();
    head.starts_with("<svg") || (head.starts_with("<?xml") && head.contains("<svg"))
}

/// Dimensions after bounding the width to `max_width`. Never enlarges.
pub fn resized_dimensions(width: u32, height: u32, max_width: u32) -> (u32, u32) {
    if width <= max_width || width == 0 {
        return (width, height);
    }
    let new_height = (height as f64 * max_width as f64 / width as f64).round().max(1.0) as u32;
    (max_width, new_height)
}

/// Top-left offset that centres `top` on `base`.
pub fn centered_offset(base: (u32, u32), top: (u32, u32)) -> (i64, i64) {
    (
        (base.0 as i64 - top.0 as i64) / 2,
        (base.1 as i64 - top.1 as i64) / 2,
    )
}

/// Decode, resize, watermark and encode one image. CPU-bound.
pub fn process_image(
    bytes: &[u8],
    max_width: u32,
    quality: u8,
    watermark: Option<&Watermark>,
) -> Result<Vec<u8>, TransformError> {
    let source = image::load_from_memory(bytes).map_err(|e| TransformError::Decode(e.to_string()))?;

    let (width, height) = source.dimensions();
    let (new_width, new_height) = resized_dimensions(width, height, max_width);
    let resized = if (new_width, new_height) == (width, height) {
        source
    } else {
        source.resize_exact(new_width, new_height, FilterType::Lanczos3)
    };

    let mut canvas = resized.to_rgba8();
    if let Some(mark) = watermark.and_then(|w| w.sized_for(canvas.width())) {
        let (x, y) = centered_offset(canvas.dimensions(), mark.dimensions());
        imageops::overlay(&mut canvas, &mark, x, y);
    }

    let rgb = DynamicImage::ImageRgba8(canvas).to_rgb8();
    let mut out = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(&rgb)
        .map_err(|e| TransformError::Encode(e.to_string()))?;

    Ok(out.into_inner())
}

async fn fetch(http: &reqwest::Client, url: &str) -> Result<Bytes, TransformError> {
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| TransformError::Fetch(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(TransformError::Fetch(format!("HTTP {} from {}", status, url)));
    }

    response
        .bytes()
        .await
        .map_err(|e| TransformError::Fetch(e.to_string()))
}

/// HTTP client used for remote sources and the watermark.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
}

/// Single-shot image adapter. Reports no progress.
pub struct ImageAdapter {
    http: reqwest::Client,
    max_width: u32,
    quality: u8,
    watermark: Option<Arc<Watermark>>,
}

impl ImageAdapter {
    pub fn new(
        http: reqwest::Client,
        max_width: u32,
        quality: u8,
        watermark: Option<Watermark>,
    ) -> Self {
        Self {
            http,
            max_width,
            quality,
            watermark: watermark.map(Arc::new),
        }
    }

    pub fn has_watermark(&self) -> bool {
        self.watermark.is_some()
    }

    async fn load_source(&self, input: &JobInput) -> Result<Bytes, TransformError> {
        match input {
            JobInput::Url(url) => fetch(&self.http, url).await,
            JobInput::Bytes(bytes) => Ok(bytes.clone()),
            JobInput::Upload { .. } | JobInput::Path(_) => {
                let path = input.local_path().ok_or_else(|| {
                    TransformError::UnsupportedInput("missing local path".to_string())
                })?;
                Ok(Bytes::from(tokio::fs::read(path).await?))
            }
        }
    }
}

#[async_trait]
impl TransformAdapter for ImageAdapter {
    type Options = ImageOptions;

    fn name(&self) -> &'static str {
        "image"
    }

    async fn run(
        &self,
        input: &JobInput,
        options: &ImageOptions,
        _progress: &Progress,
    ) -> Result<Artifact, TransformError> {
        let bytes = self.load_source(input).await?;

        let watermark = if options.watermark {
            self.watermark.clone()
        } else {
            None
        };
        let (max_width, quality) = (self.max_width, self.quality);

        let encoded = tokio::task::spawn_blocking(move || {
            process_image(&bytes, max_width, quality, watermark.as_deref())
        })
        .await
        .map_err(|e| TransformError::Panicked(e.to_string()))??;

        Ok(Artifact::memory(Bytes::from(encoded), "image/jpeg", "jpg"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba(color));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    fn adapter(watermark: Option<Watermark>) -> ImageAdapter {
        ImageAdapter::new(
            http_client(Duration::from_secs(5)).unwrap(),
            DEFAULT_MAX_WIDTH,
            DEFAULT_QUALITY,
            watermark,
        )
    }

    #[test]
    fn test_resized_dimensions() {
        assert_eq!(resized_dimensions(3000, 1000, 1500), (1500, 500));
        assert_eq!(resized_dimensions(800, 600, 1500), (800, 600));
        assert_eq!(resized_dimensions(1500, 10, 1500), (1500, 10));
        assert_eq!(resized_dimensions(4000, 1, 1500), (1500, 1));
    }

    #[test]
    fn test_centered_offset() {
        assert_eq!(centered_offset((1500, 500), (600, 200)), (450, 150));
        assert_eq!(centered_offset((100, 100), (40, 40)), (30, 30));
    }

    #[test]
    fn test_watermark_is_forty_percent_wide() {
        let mark = Watermark::from_bytes(&png(200, 100, [255, 0, 0, 255]), 0.3, 0.4).unwrap();
        let sized = mark.sized_for(1500).unwrap();
        assert_eq!(sized.dimensions(), (600, 300));
        assert!(mark.sized_for(1).is_none());
    }

    #[test]
    fn test_watermark_opacity_applied() {
        let mark = Watermark::from_bytes(&png(4, 4, [255, 0, 0, 255]), 0.3, 0.4).unwrap();
        assert_eq!(mark.image.get_pixel(0, 0)[3], 77);
    }

    #[test]
    fn test_process_downscales_wide_images() {
        let out = process_image(&png(3000, 1000, [0, 0, 255, 255]), 1500, 75, None).unwrap();
        let decoded = image::load_from_memory_with_format(&out, ImageFormat::Jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (1500, 500));
    }

    #[test]
    fn test_process_never_enlarges() {
        let out = process_image(&png(320, 200, [0, 0, 255, 255]), 1500, 75, None).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!(decoded.dimensions(), (320, 200));
    }

    #[test]
    fn test_watermark_lands_in_center() {
        let mark = Watermark::from_bytes(&png(10, 10, [255, 0, 0, 255]), 1.0, 0.4).unwrap();
        let out = process_image(&png(200, 200, [0, 0, 255, 255]), 1500, 90, Some(&mark)).unwrap();
        let decoded = image::load_from_memory(&out).unwrap().to_rgb8();

        let center = decoded.get_pixel(100, 100);
        assert!(center[0] > 200 && center[2] < 60, "center was {:?}", center);
        let corner = decoded.get_pixel(5, 5);
        assert!(corner[2] > 200 && corner[0] < 60, "corner was {:?}", corner);
    }

    #[test]
    fn test_webp_source_is_decoded() {
        let img = RgbaImage::from_pixel(1800, 600, Rgba([30, 120, 200, 255]));
        let mut webp = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut webp, ImageFormat::WebP)
            .unwrap();

        let out = process_image(webp.get_ref(), 1500, 75, None).unwrap();
        let decoded = image::load_from_memory_with_format(&out, ImageFormat::Jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (1500, 500));
    }

    #[test]
    fn test_svg_watermark_is_rejected() {
        let svg = br#"<?xml version="1.0" encoding="UTF-8"?>
<svg xmlns="http://www.w3.org/2000/svg" width="120" height="40"><rect width="120" height="40"/></svg>"#;
        match Watermark::from_bytes(svg, 0.3, 0.4) {
            Err(TransformError::Decode(message)) => assert!(message.contains("SVG"), "{}", message),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("SVG watermark was accepted"),
        }
        assert!(looks_like_svg(b"  <svg viewBox=\"0 0 1 1\"></svg>"));
        assert!(!looks_like_svg(&png(2, 2, [0, 0, 0, 255])));
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let err = process_image(b"definitely not an image", 1500, 75, None).unwrap_err();
        assert!(matches!(err, TransformError::Decode(_)));
    }

    #[tokio::test]
    async fn test_adapter_fetches_remote_source() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tour/1.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(png(64, 32, [10, 200, 10, 255])))
            .mount(&server)
            .await;

        let artifact = adapter(None)
            .run(
                &JobInput::Url(format!("{}/tour/1.png", server.uri())),
                &ImageOptions::default(),
                &Progress::detached(),
            )
            .await
            .unwrap();

        assert_eq!(artifact.content_type, "image/jpeg");
        assert_eq!(artifact.extension, "jpg");
        let bytes = artifact.read_all().await.unwrap();
        assert_eq!(bytes.len() as u64, artifact.size_bytes);
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);
    }

    #[tokio::test]
    async fn test_adapter_reports_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = adapter(None)
            .run(
                &JobInput::Url(format!("{}/missing.png", server.uri())),
                &ImageOptions::default(),
                &Progress::detached(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransformError::Fetch(_)));
    }

    #[tokio::test]
    async fn test_watermark_load_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("logo.png");
        tokio::fs::write(&file, png(20, 10, [255, 255, 255, 255])).await.unwrap();

        let http = http_client(Duration::from_secs(5)).unwrap();
        let mark = Watermark::load(file.to_str().unwrap(), &http, 0.3, 0.4)
            .await
            .unwrap();
        assert_eq!(mark.image.dimensions(), (20, 10));

        assert!(Watermark::load("/nonexistent/logo.png", &http, 0.3, 0.4)
            .await
            .is_err());
    }
}
