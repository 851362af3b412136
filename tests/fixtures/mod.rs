//! Test fixtures: generated tour images and placeholder video payloads

#![allow(dead_code)]

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

/// A remote image served by the mock gallery
#[derive(Debug, Clone)]
pub struct TestImageFixture {
    pub path: &'static str,
    pub width: u32,
    pub height: u32,
    pub color: [u8; 4],
    /// Width expected after the pipeline bounds it to 1500px
    pub expected_width: u32,
    pub description: &'static str,
}

pub const TEST_IMAGES: &[TestImageFixture] = &[
    TestImageFixture {
        path: "/gallery/lobby.png",
        width: 2400,
        height: 1200,
        color: [200, 40, 40, 255],
        expected_width: 1500,
        description: "Wide image, downscaled",
    },
    TestImageFixture {
        path: "/gallery/pool.png",
        width: 640,
        height: 480,
        color: [40, 40, 200, 255],
        expected_width: 640,
        description: "Small image, never enlarged",
    },
    TestImageFixture {
        path: "/gallery/terrace.png",
        width: 1500,
        height: 300,
        color: [40, 200, 40, 128],
        expected_width: 1500,
        description: "Exactly at the bound, with alpha",
    },
];

/// Path on the mock gallery that always answers 404
pub const MISSING_IMAGE_PATH: &str = "/gallery/missing.png";

/// Placeholder upload body; the fake transcoder echoes it back
pub const FAKE_VIDEO: &[u8] = b"\x00\x00\x00\x18ftypmp42fake-video-payload";

impl TestImageFixture {
    pub fn png(&self) -> Vec<u8> {
        png_bytes(self.width, self.height, self.color)
    }
}

pub fn png_bytes(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba(color));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut out, ImageFormat::Png)
        .expect("encode fixture png");
    out.into_inner()
}
