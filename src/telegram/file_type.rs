// 文件类型识别
//
// 决定发送到 Telegram 时使用的方法（sendPhoto 等）和表单字段名

use crate::uploader::task::url_file_name;

/// 发送方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramFileType {
    /// 表单字段名（photo / animation / audio / video / document）
    pub field: &'static str,
    /// Bot API 方法名
    pub method: &'static str,
    /// 文件名
    pub file_name: String,
}

impl TelegramFileType {
    fn new(field: &'static str, method: &'static str, file_name: String) -> Self {
        Self {
            field,
            method,
            file_name,
        }
    }

    fn document(file_name: String) -> Self {
        Self::new("document", "sendDocument", file_name)
    }
}

/// 取小写扩展名
pub fn extension(name: &str) -> Option<String> {
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() || ext.contains('/') {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// 扩展名 -> MIME（代理下载时使用）
pub fn mime_from_name(name: &str) -> Option<&'static str> {
    let mime = match extension(name)?.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "mp4" => "video/mp4",
        "pdf" => "application/pdf",
        "mp3" => "audio/mpeg",
        _ => return None,
    };
    Some(mime)
}

/// 路径是否以已知媒体扩展名结尾（这类路径直接走 telegra.ph）
pub fn is_media_path(path: &str) -> bool {
    mime_from_name(path).is_some()
}

/// 根据 MIME 类型分类，未给出 MIME 时按扩展名推断
pub fn classify_mime(name: &str, mime: Option<&str>) -> TelegramFileType {
    let file_name = name.to_string();
    let mime = mime
        .map(|m| m.to_ascii_lowercase())
        .or_else(|| mime_from_name(name).map(str::to_string))
        .unwrap_or_default();

    if mime == "image/gif" {
        TelegramFileType::new("animation", "sendAnimation", file_name)
    } else if mime.starts_with("image/") {
        TelegramFileType::new("photo", "sendPhoto", file_name)
    } else if mime.starts_with("audio/") {
        TelegramFileType::new("audio", "sendAudio", file_name)
    } else if mime.starts_with("video/") {
        TelegramFileType::new("video", "sendVideo", file_name)
    } else {
        TelegramFileType::document(file_name)
    }
}

/// 根据 URL 扩展名分类
pub fn classify_url(url: &str) -> TelegramFileType {
    let file_name = url_file_name(url);
    match extension(&file_name).as_deref() {
        Some("jpg" | "jpeg" | "png") => TelegramFileType::new("photo", "sendPhoto", file_name),
        Some("gif") => TelegramFileType::new("animation", "sendAnimation", file_name),
        Some("mp3" | "ogg" | "wav") => TelegramFileType::new("audio", "sendAudio", file_name),
        Some("mp4" | "mov" | "avi") => TelegramFileType::new("video", "sendVideo", file_name),
        _ => TelegramFileType::document(file_name),
    }
}

/// 表单字段名 -> 方法名
pub fn method_for_field(field: &str) -> Option<&'static str> {
    let method = match field {
        "photo" => "sendPhoto",
        "animation" => "sendAnimation",
        "audio" => "sendAudio",
        "video" => "sendVideo",
        "document" => "sendDocument",
        _ => return None,
    };
    Some(method)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_mime() {
        assert_eq!(classify_mime("a.png", Some("image/png")).method, "sendPhoto");
        assert_eq!(classify_mime("a.gif", Some("image/gif")).field, "animation");
        assert_eq!(classify_mime("a.mp3", Some("audio/mpeg")).field, "audio");
        assert_eq!(classify_mime("a.mkv", Some("video/x-matroska")).field, "video");
        assert_eq!(classify_mime("a.zip", Some("application/zip")).field, "document");
        // 没有 MIME 时按扩展名推断
        assert_eq!(classify_mime("b.JPG", None).field, "photo");
        assert_eq!(classify_mime("noext", None).field, "document");
    }

    #[test]
    fn test_classify_url() {
        let t = classify_url("https://example.com/path/cat.JPEG?x=1");
        assert_eq!(t.field, "photo");
        assert_eq!(t.method, "sendPhoto");
        assert_eq!(t.file_name, "cat.JPEG");

        assert_eq!(classify_url("https://e.com/a.gif").field, "animation");
        assert_eq!(classify_url("https://e.com/a.wav").field, "audio");
        assert_eq!(classify_url("https://e.com/a.mov").field, "video");
        assert_eq!(classify_url("https://e.com/a.webp").field, "document");
        assert_eq!(classify_url("https://e.com/download").field, "document");
    }

    #[test]
    fn test_mime_table() {
        assert_eq!(mime_from_name("x/y/photo.WEBP"), Some("image/webp"));
        assert_eq!(mime_from_name("doc.pdf"), Some("application/pdf"));
        assert_eq!(mime_from_name("AgADBAAD"), None);
        assert!(is_media_path("abc123.mp4"));
        assert!(!is_media_path("photos/file_1"));
        assert!(!is_media_path("dir.v2/file"));
    }

    #[test]
    fn test_method_for_field() {
        assert_eq!(method_for_field("video"), Some("sendVideo"));
        assert_eq!(method_for_field("sticker"), None);
    }
}
