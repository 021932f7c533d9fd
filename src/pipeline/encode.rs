//! Image encoding: figure bytes from the archive → base64 `ImageData`.
//!
//! The archive stores figures as JPEG, which every vision API accepts as-is,
//! so the bytes are normally passed through untouched. Anything that is not
//! JPEG, PNG, GIF or WebP is re-encoded as PNG first.

use crate::error::Pdf2TxtError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::ImageFormat;
use std::io::Cursor;
use tracing::debug;

/// Encode figure bytes for a vision request with the given `detail` hint.
pub fn encode_figure(bytes: &[u8], detail: &str) -> Result<ImageData, Pdf2TxtError> {
    if bytes.is_empty() {
        return Err(Pdf2TxtError::Conversion {
            kind: "image",
            detail: "figure file is empty".into(),
        });
    }

    let (payload, mime) = match image::guess_format(bytes) {
        Ok(ImageFormat::Jpeg) | Err(_) => (std::borrow::Cow::Borrowed(bytes), "image/jpeg"),
        Ok(ImageFormat::Png) => (std::borrow::Cow::Borrowed(bytes), "image/png"),
        Ok(ImageFormat::Gif) => (std::borrow::Cow::Borrowed(bytes), "image/gif"),
        Ok(ImageFormat::WebP) => (std::borrow::Cow::Borrowed(bytes), "image/webp"),
        Ok(other) => {
            debug!("Re-encoding {:?} figure as PNG", other);
            (std::borrow::Cow::Owned(reencode_png(bytes)?), "image/png")
        }
    };

    let b64 = STANDARD.encode(payload.as_ref());
    debug!("Encoded figure → {} bytes base64 ({})", b64.len(), mime);
    Ok(ImageData::new(b64, mime).with_detail(detail))
}

fn reencode_png(bytes: &[u8]) -> Result<Vec<u8>, Pdf2TxtError> {
    let conversion_error = |e: image::ImageError| Pdf2TxtError::Conversion {
        kind: "image",
        detail: format!("unsupported figure format: {e}"),
    };
    let img = image::load_from_memory(bytes).map_err(conversion_error)?;
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(conversion_error)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgba, RgbaImage};

    fn png_bytes() -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([0, 0, 255, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
        buf
    }

    #[test]
    fn png_passes_through() {
        let bytes = png_bytes();
        let data = encode_figure(&bytes, "auto").expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        assert_eq!(STANDARD.decode(&data.data).unwrap(), bytes);
    }

    #[test]
    fn jpeg_magic_is_labelled_jpeg() {
        let bytes = [0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10, b'J', b'F', b'I', b'F'];
        let data = encode_figure(&bytes, "auto").unwrap();
        assert_eq!(data.mime_type, "image/jpeg");
    }

    #[test]
    fn unknown_bytes_default_to_jpeg() {
        let data = encode_figure(b"not an image header", "low").unwrap();
        assert_eq!(data.mime_type, "image/jpeg");
    }

    #[test]
    fn empty_figure_is_an_error() {
        assert!(matches!(
            encode_figure(&[], "auto"),
            Err(Pdf2TxtError::Conversion { kind: "image", .. })
        ));
    }
}
