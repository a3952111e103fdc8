use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Classified type of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Html,
    Css,
    Js,
    Image,
    Font,
    Media,
    Other,
}

impl AssetKind {
    /// All kinds, in a stable order
    pub const ALL: [AssetKind; 7] = [
        AssetKind::Html,
        AssetKind::Css,
        AssetKind::Js,
        AssetKind::Image,
        AssetKind::Font,
        AssetKind::Media,
        AssetKind::Other,
    ];

    /// Returns the lowercase name used in configuration and the manifest
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Html => "html",
            AssetKind::Css => "css",
            AssetKind::Js => "js",
            AssetKind::Image => "image",
            AssetKind::Font => "font",
            AssetKind::Media => "media",
            AssetKind::Other => "other",
        }
    }

    /// Returns true for kinds whose bodies carry references (HTML and CSS)
    pub fn has_references(&self) -> bool {
        matches!(self, AssetKind::Html | AssetKind::Css)
    }

    /// Classifies a file extension (without the dot, any case)
    pub fn from_extension(ext: &str) -> Option<AssetKind> {
        let kind = match ext.to_ascii_lowercase().as_str() {
            "html" | "htm" | "xhtml" => AssetKind::Html,
            "css" => AssetKind::Css,
            "js" | "mjs" => AssetKind::Js,
            "png" | "jpg" | "jpeg" | "gif" | "svg" | "webp" | "ico" | "bmp" | "tif" | "tiff"
            | "avif" => AssetKind::Image,
            "woff2" | "woff" | "ttf" | "eot" | "otf" => AssetKind::Font,
            "mp4" | "webm" | "mp3" | "wav" | "ogg" | "ogv" | "mov" | "m4a" | "vtt" => {
                AssetKind::Media
            }
            "pdf" | "txt" | "xml" | "json" | "zip" => AssetKind::Other,
            _ => return None,
        };
        Some(kind)
    }

    /// Classifies a URL by the extension of its last path segment
    ///
    /// Returns `None` when the path has no recognised extension.
    pub fn from_url(url: &Url) -> Option<AssetKind> {
        path_extension(url.path()).and_then(AssetKind::from_extension)
    }

    /// Classifies a `Content-Type` header value
    pub fn from_content_type(content_type: &str) -> Option<AssetKind> {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if mime.is_empty() {
            return None;
        }

        let kind = if mime == "text/html" || mime == "application/xhtml+xml" {
            AssetKind::Html
        } else if mime == "text/css" {
            AssetKind::Css
        } else if mime.contains("javascript") || mime == "text/ecmascript" {
            AssetKind::Js
        } else if mime.starts_with("image/") {
            AssetKind::Image
        } else if mime.starts_with("font/") || mime.contains("font-woff") {
            AssetKind::Font
        } else if mime.starts_with("audio/") || mime.starts_with("video/") {
            AssetKind::Media
        } else {
            AssetKind::Other
        };
        Some(kind)
    }

    /// Final classification once the response is known
    ///
    /// The URL extension wins, except that a path without an extension served as
    /// anything is classified by its content type, falling back to the hint.
    pub fn classify(url: &Url, content_type: Option<&str>, hint: Option<AssetKind>) -> AssetKind {
        AssetKind::from_url(url)
            .or_else(|| content_type.and_then(AssetKind::from_content_type))
            .or(hint)
            .unwrap_or(AssetKind::Other)
    }

    /// Extension appended to local files whose URL has none
    pub fn default_extension(&self, content_type: Option<&str>) -> Option<&'static str> {
        let mime = content_type
            .map(|ct| ct.split(';').next().unwrap_or_default().trim().to_ascii_lowercase())
            .unwrap_or_default();

        match self {
            AssetKind::Html => Some("html"),
            AssetKind::Css => Some("css"),
            AssetKind::Js => Some("js"),
            AssetKind::Image => match mime.as_str() {
                "image/png" => Some("png"),
                "image/jpeg" => Some("jpg"),
                "image/gif" => Some("gif"),
                "image/svg+xml" => Some("svg"),
                "image/webp" => Some("webp"),
                "image/x-icon" | "image/vnd.microsoft.icon" => Some("ico"),
                "image/avif" => Some("avif"),
                _ => None,
            },
            AssetKind::Font => match mime.as_str() {
                "font/woff2" => Some("woff2"),
                "font/woff" | "application/font-woff" => Some("woff"),
                "font/ttf" => Some("ttf"),
                "font/otf" => Some("otf"),
                _ => None,
            },
            AssetKind::Media => match mime.as_str() {
                "video/mp4" => Some("mp4"),
                "video/webm" => Some("webm"),
                "audio/mpeg" => Some("mp3"),
                "audio/ogg" => Some("ogg"),
                _ => None,
            },
            AssetKind::Other => match mime.as_str() {
                "application/json" => Some("json"),
                "application/pdf" => Some("pdf"),
                "text/plain" => Some("txt"),
                _ => None,
            },
        }
    }
}

/// Returns the extension of the last segment of a URL path
pub(crate) fn path_extension(path: &str) -> Option<&str> {
    let segment = path.rsplit('/').next().unwrap_or_default();
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext)
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        AssetKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| ConfigError::UnknownAssetType(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        assert_eq!("image".parse::<AssetKind>().unwrap(), AssetKind::Image);
        assert_eq!(" CSS ".parse::<AssetKind>().unwrap(), AssetKind::Css);
        assert!(matches!(
            "video".parse::<AssetKind>(),
            Err(ConfigError::UnknownAssetType(_))
        ));
    }

    #[test]
    fn test_from_url() {
        let url = Url::parse("https://example.com/static/app.min.JS").unwrap();
        assert_eq!(AssetKind::from_url(&url), Some(AssetKind::Js));

        let url = Url::parse("https://example.com/about").unwrap();
        assert_eq!(AssetKind::from_url(&url), None);

        let url = Url::parse("https://example.com/.well-known").unwrap();
        assert_eq!(AssetKind::from_url(&url), None);
    }

    #[test]
    fn test_from_content_type() {
        assert_eq!(
            AssetKind::from_content_type("text/html; charset=utf-8"),
            Some(AssetKind::Html)
        );
        assert_eq!(
            AssetKind::from_content_type("application/javascript"),
            Some(AssetKind::Js)
        );
        assert_eq!(AssetKind::from_content_type("video/mp4"), Some(AssetKind::Media));
        assert_eq!(
            AssetKind::from_content_type("application/octet-stream"),
            Some(AssetKind::Other)
        );
        assert_eq!(AssetKind::from_content_type(""), None);
    }

    #[test]
    fn test_classify_prefers_extension() {
        let url = Url::parse("https://example.com/logo.png").unwrap();
        assert_eq!(
            AssetKind::classify(&url, Some("text/html"), None),
            AssetKind::Image
        );

        let url = Url::parse("https://example.com/about").unwrap();
        assert_eq!(
            AssetKind::classify(&url, Some("text/html"), Some(AssetKind::Image)),
            AssetKind::Html
        );
        assert_eq!(
            AssetKind::classify(&url, None, Some(AssetKind::Css)),
            AssetKind::Css
        );
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&AssetKind::Font).unwrap();
        assert_eq!(json, "\"font\"");
        let kind: AssetKind = serde_json::from_str("\"media\"").unwrap();
        assert_eq!(kind, AssetKind::Media);
    }
}
