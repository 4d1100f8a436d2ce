//! 生成结果图片数据
//!
//! 基于文件头 magic bytes 判断载荷是否为图片

use serde::Serialize;

use super::GenerationError;

/// 根据文件头检测图片 MIME 类型
pub fn detect_image_mime(buffer: &[u8]) -> Option<&'static str> {
    // PNG: 89 50 4E 47 0D 0A 1A 0A
    if buffer.len() >= 8 && buffer[..8] == [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A] {
        return Some("image/png");
    }

    // JPEG: FF D8 FF
    if buffer.len() >= 3 && buffer[..3] == [0xFF, 0xD8, 0xFF] {
        return Some("image/jpeg");
    }

    // GIF: 47 49 46 38
    if buffer.len() >= 6 && buffer[..4] == [0x47, 0x49, 0x46, 0x38] {
        return Some("image/gif");
    }

    // WebP: RIFF .... WEBP
    if buffer.len() >= 12 && buffer[..4] == *b"RIFF" && buffer[8..12] == *b"WEBP" {
        return Some("image/webp");
    }

    None
}

/// MIME 类型对应的文件扩展名
pub fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type {
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "png",
    }
}

/// 经过校验的图片数据，保证非空且可识别
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageBytes {
    #[serde(skip)]
    data: Vec<u8>,
    mime_type: &'static str,
    size: usize,
}

impl ImageBytes {
    /// 校验远程返回的载荷
    ///
    /// 空载荷与无法识别的载荷都按可重试错误处理。
    pub fn from_payload(data: Vec<u8>) -> Result<Self, GenerationError> {
        if data.is_empty() {
            return Err(GenerationError::EmptyResponse(
                "response contained no image data".to_string(),
            ));
        }
        let mime_type = detect_image_mime(&data).ok_or_else(|| {
            GenerationError::MalformedResponse(format!(
                "payload of {} bytes is not a recognised image",
                data.len()
            ))
        })?;
        let size = data.len();
        Ok(Self {
            data,
            mime_type,
            size,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn mime_type(&self) -> &'static str {
        self.mime_type
    }

    pub fn extension(&self) -> &'static str {
        extension_for_mime(self.mime_type)
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn test_detect_image_mime() {
        assert_eq!(detect_image_mime(&PNG_HEADER), Some("image/png"));
        assert_eq!(detect_image_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("image/jpeg"));
        assert_eq!(detect_image_mime(b"GIF89a"), Some("image/gif"));
        assert_eq!(detect_image_mime(b"RIFF\0\0\0\0WEBPVP8 "), Some("image/webp"));
        assert_eq!(detect_image_mime(b"%PDF-1.7"), None);
        assert_eq!(detect_image_mime(&[]), None);
    }

    #[test]
    fn test_from_payload_rejects_empty() {
        let err = ImageBytes::from_payload(Vec::new()).unwrap_err();
        assert!(matches!(err, GenerationError::EmptyResponse(_)));
        assert!(!err.is_terminal());
    }

    #[test]
    fn test_from_payload_rejects_unknown() {
        let err = ImageBytes::from_payload(b"<html>quota</html>".to_vec()).unwrap_err();
        assert!(matches!(err, GenerationError::MalformedResponse(_)));
    }

    #[test]
    fn test_from_payload_accepts_png() {
        let mut data = PNG_HEADER.to_vec();
        data.extend_from_slice(&[0u8; 16]);

        let image = ImageBytes::from_payload(data).unwrap();
        assert_eq!(image.mime_type(), "image/png");
        assert_eq!(image.extension(), "png");
        assert_eq!(image.len(), 24);
        assert!(!image.is_empty());
    }

    #[test]
    fn test_extension_for_mime() {
        assert_eq!(extension_for_mime("image/jpeg"), "jpg");
        assert_eq!(extension_for_mime("image/webp"), "webp");
        assert_eq!(extension_for_mime("application/octet-stream"), "png");
    }
}
