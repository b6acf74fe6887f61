use async_trait::async_trait;
use futures::StreamExt;
use image::DynamicImage;
use scraper::{Html, Selector};
use std::time::Duration;
use thiserror::Error;

use crate::util::{origin_of, resolve_url};

/// Total deadline for one `find` call.
const FAVICON_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_ICON_SIZE: usize = 1024 * 1024; // 1MB
const MAX_PAGE_SIZE: usize = 2 * 1024 * 1024; // 2MB

/// Errors that can occur while looking for a site's icons.
#[derive(Debug, Error)]
pub enum FaviconError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// The 5-second deadline expired
    #[error("request timed out")]
    Timeout,
    #[error("response too large")]
    TooLarge,
}

/// An icon candidate. Decoding is deferred until asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Icon {
    pub url: String,
    /// MIME type, e.g. `image/png`
    pub format: String,
    pub bytes: Vec<u8>,
}

impl Icon {
    pub fn decode(&self) -> image::ImageResult<DynamicImage> {
        image::load_from_memory(&self.bytes)
    }
}

/// Finds the icons a URL offers.
#[async_trait]
pub trait FaviconFinder: Send + Sync {
    /// Icons offered by `url`, best first. An empty list means none were found.
    async fn find(&self, url: &str) -> Result<Vec<Icon>, FaviconError>;
}

/// HTTP favicon finder.
///
/// A URL that serves an image is itself the icon. HTML pages are scanned for
/// `<link rel="icon">`, `shortcut icon` and `apple-touch-icon`, and the
/// origin's `/favicon.ico` is tried last.
#[derive(Debug, Clone)]
pub struct HttpFaviconFinder {
    client: reqwest::Client,
}

impl HttpFaviconFinder {
    pub fn new() -> Result<Self, FaviconError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("feedpump/", env!("CARGO_PKG_VERSION")))
            .timeout(FAVICON_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }

    async fn get(&self, url: &str, limit: usize) -> Result<(String, String, Vec<u8>), FaviconError> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(FaviconError::HttpStatus(response.status().as_u16()));
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase();

        if let Some(len) = response.content_length() {
            if len as usize > limit {
                return Err(FaviconError::TooLarge);
            }
        }

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if bytes.len().saturating_add(chunk.len()) > limit {
                return Err(FaviconError::TooLarge);
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok((final_url, content_type, bytes))
    }

    async fn find_inner(&self, url: &str) -> Result<Vec<Icon>, FaviconError> {
        let (final_url, content_type, bytes) = self.get(url, MAX_PAGE_SIZE).await?;

        if let Some(icon) = as_icon(&final_url, &content_type, bytes.clone()) {
            return Ok(vec![icon]);
        }

        let mut candidates = Vec::new();
        if content_type.contains("html") || content_type.is_empty() {
            candidates.extend(find_icon_links(&String::from_utf8_lossy(&bytes), &final_url));
        }
        if let Some(origin) = origin_of(&final_url) {
            let fallback = format!("{origin}favicon.ico");
            if !candidates.contains(&fallback) {
                candidates.push(fallback);
            }
        }

        let mut icons = Vec::new();
        for candidate in candidates {
            match self.get(&candidate, MAX_ICON_SIZE).await {
                Ok((icon_url, icon_type, icon_bytes)) => {
                    if let Some(icon) = as_icon(&icon_url, &icon_type, icon_bytes) {
                        icons.push(icon);
                    }
                }
                Err(e) => {
                    tracing::debug!(url = %candidate, error = %e, "Icon candidate unavailable");
                }
            }
        }
        Ok(icons)
    }
}

#[async_trait]
impl FaviconFinder for HttpFaviconFinder {
    async fn find(&self, url: &str) -> Result<Vec<Icon>, FaviconError> {
        tokio::time::timeout(FAVICON_TIMEOUT, self.find_inner(url))
            .await
            .map_err(|_| FaviconError::Timeout)?
    }
}

/// Treat a response as an icon when it is labelled or sniffed as an image.
fn as_icon(url: &str, content_type: &str, bytes: Vec<u8>) -> Option<Icon> {
    if bytes.is_empty() {
        return None;
    }
    let format = if content_type.starts_with("image/") {
        content_type
            .split(';')
            .next()
            .unwrap_or(content_type)
            .trim()
            .to_string()
    } else if content_type.contains("html") {
        return None;
    } else {
        image::guess_format(&bytes).ok()?.to_mime_type().to_string()
    };
    Some(Icon {
        url: url.to_string(),
        format,
        bytes,
    })
}

/// `<link rel=... icon>` hrefs in document order, resolved against `base`.
fn find_icon_links(html: &str, base: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse("link[rel][href]") else {
        return Vec::new();
    };
    let document = Html::parse_document(html);

    document
        .select(&selector)
        .filter(|el| {
            el.value().attr("rel").is_some_and(|rel| {
                rel.split_whitespace().any(|token| {
                    token.eq_ignore_ascii_case("icon") || token.eq_ignore_ascii_case("apple-touch-icon")
                })
            })
        })
        .filter_map(|el| el.value().attr("href"))
        .filter(|href| !href.trim().is_empty())
        .map(|href| resolve_url(base, href))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn png_bytes() -> Vec<u8> {
        let img = RgbaImage::from_pixel(8, 8, Rgba([0, 128, 255, 255]));
        let mut out = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn test_find_icon_links() {
        let html = r#"<html><head>
            <link rel="stylesheet" href="/style.css">
            <link rel="shortcut icon" href="/favicon.png">
            <link rel="apple-touch-icon" href="https://cdn.example.com/touch.png">
            <link rel="ICON" href="">
        </head></html>"#;
        assert_eq!(
            find_icon_links(html, "https://example.com/blog/"),
            vec![
                "https://example.com/favicon.png".to_string(),
                "https://cdn.example.com/touch.png".to_string(),
            ]
        );
    }

    #[test]
    fn test_as_icon_sniffs_unlabelled_bytes() {
        let icon = as_icon("http://ex/icon", "application/octet-stream", png_bytes()).unwrap();
        assert_eq!(icon.format, "image/png");
        assert!(icon.decode().is_ok());

        assert!(as_icon("http://ex/", "text/html; charset=utf-8", b"<html>".to_vec()).is_none());
        assert!(as_icon("http://ex/", "image/png", Vec::new()).is_none());
    }

    #[tokio::test]
    async fn test_direct_image_url_is_icon() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/logo.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(png_bytes())
                    .insert_header("Content-Type", "image/png"),
            )
            .mount(&mock_server)
            .await;

        let finder = HttpFaviconFinder::new().unwrap();
        let icons = finder
            .find(&format!("{}/logo.png", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(icons.len(), 1);
        assert_eq!(icons[0].format, "image/png");
    }

    #[tokio::test]
    async fn test_homepage_link_then_favicon_ico() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"<html><head><link rel="icon" href="/static/icon.png"></head></html>"#)
                    .insert_header("Content-Type", "text/html"),
            )
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/static/icon.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(png_bytes())
                    .insert_header("Content-Type", "image/png"),
            )
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/favicon.ico"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let finder = HttpFaviconFinder::new().unwrap();
        let icons = finder
            .find(&format!("{}/", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(icons.len(), 1);
        assert!(icons[0].url.ends_with("/static/icon.png"));
    }

    #[tokio::test]
    async fn test_page_error_is_reported() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let finder = HttpFaviconFinder::new().unwrap();
        let err = finder.find(&mock_server.uri()).await.unwrap_err();
        assert!(matches!(err, FaviconError::HttpStatus(500)));
    }

    #[tokio::test]
    async fn test_slow_site_times_out() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
            .mount(&mock_server)
            .await;

        let finder = HttpFaviconFinder::new().unwrap();
        let err = finder.find(&mock_server.uri()).await.unwrap_err();
        assert!(matches!(err, FaviconError::Timeout | FaviconError::Network(_)));
    }
}
