//! Link excerpts: fetch pages linked from a message before assembly.

use async_trait::async_trait;
use cadence_core::error::FetchError;
use regex_lite::Regex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkExcerpt {
    pub url: String,
    pub excerpt: String,
}

/// Fetches the readable text behind a URL.
#[async_trait]
pub trait ExcerptFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// `http(s)://` links in order of appearance, deduplicated, at most `max`.
pub fn extract_links(text: &str, max: usize) -> Vec<String> {
    let Ok(pattern) = Regex::new(r#"https?://[^\s<>"']+"#) else {
        return Vec::new();
    };
    let mut links: Vec<String> = Vec::new();
    for m in pattern.find_iter(text) {
        let link = m
            .as_str()
            .trim_end_matches(['.', ',', ';', ':', '!', '?', ')', ']'])
            .to_string();
        if !links.contains(&link) {
            links.push(link);
        }
        if links.len() == max {
            break;
        }
    }
    links
}

/// First `max_chars` characters, cut on a character boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Fetch excerpts for the links in `text`. Failed or slow fetches are
/// logged and left out.
pub async fn fetch_excerpts(
    fetcher: &Arc<dyn ExcerptFetcher>,
    text: &str,
    max_links: usize,
    max_chars: usize,
    timeout: Duration,
) -> Vec<LinkExcerpt> {
    let mut excerpts = Vec::new();
    for url in extract_links(text, max_links) {
        match tokio::time::timeout(timeout, fetcher.fetch(&url)).await {
            Ok(Ok(body)) if !body.trim().is_empty() => excerpts.push(LinkExcerpt {
                excerpt: truncate_chars(body.trim(), max_chars),
                url,
            }),
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(url = %url, error = %e, "Link fetch failed"),
            Err(_) => warn!(url = %url, "Link fetch timed out"),
        }
    }
    excerpts
}

/// Reduce an HTML page to its visible text, one line per block.
pub fn html_to_text(html: &str) -> String {
    let strip = |pattern: &str, input: &str, with: &str| -> String {
        match Regex::new(pattern) {
            Ok(re) => re.replace_all(input, with).into_owned(),
            Err(_) => input.to_string(),
        }
    };
    let text = strip(
        r"(?is)<(script|style|header|footer|nav|aside)\b.*?</(script|style|header|footer|nav|aside)>",
        html,
        " ",
    );
    let text = strip(r"(?i)<br\s*/?>|</(p|div|li|h[1-6])>", &text, "\n");
    let text = strip(r"(?s)<[^>]*>", &text, " ");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"");

    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Plain HTTP fetcher.
pub struct HttpExcerptFetcher {
    client: reqwest::Client,
}

impl HttpExcerptFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("cadence/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ExcerptFetcher for HttpExcerptFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Request {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response.text().await.map_err(|e| FetchError::Body {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(html_to_text(&body))
    }
}

/// Reuses successful fetches of the same URL for `ttl`.
///
/// Failures are not cached, so a broken link is retried on the next mention.
pub struct CachedExcerptFetcher {
    inner: Arc<dyn ExcerptFetcher>,
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, String)>>,
}

impl CachedExcerptFetcher {
    pub fn new(inner: Arc<dyn ExcerptFetcher>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, url: &str) -> Option<String> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        entries.retain(|_, (expires, _)| *expires > now);
        entries.get(url).map(|(_, body)| body.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ExcerptFetcher for CachedExcerptFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        if let Some(body) = self.cached(url) {
            debug!(url = %url, "Link excerpt served from cache");
            return Ok(body);
        }
        let body = self.inner.fetch(url).await?;
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(url.to_string(), (Instant::now() + self.ttl, body.clone()));
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MapFetcher {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ExcerptFetcher for MapFetcher {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            self.calls.lock().unwrap().push(url.to_string());
            if url.contains("broken") {
                Err(FetchError::Status {
                    url: url.to_string(),
                    status: 404,
                })
            } else {
                Ok(format!("page at {url} {}", "y".repeat(1000)))
            }
        }
    }

    #[test]
    fn extracts_links_in_order() {
        let text = "see https://a.example/x, and (http://b.example/y) then https://a.example/x again";
        assert_eq!(
            extract_links(text, 5),
            vec!["https://a.example/x", "http://b.example/y"]
        );
    }

    #[test]
    fn extraction_is_bounded() {
        let text = "https://1.ex https://2.ex https://3.ex https://4.ex";
        assert_eq!(extract_links(text, 3).len(), 3);
        assert!(extract_links("no links here", 3).is_empty());
    }

    #[test]
    fn html_is_reduced_to_visible_text() {
        let html = "<html><head><style>p{}</style><script>var x=1;</script></head>\
                    <body><nav>menu</nav><p>Hello &amp; welcome</p><div>Second   block</div></body></html>";
        assert_eq!(html_to_text(html), "Hello & welcome\nSecond block");
    }

    #[tokio::test]
    async fn excerpts_are_truncated_and_failures_skipped() {
        let fetcher: Arc<dyn ExcerptFetcher> = Arc::new(MapFetcher {
            calls: Mutex::new(Vec::new()),
        });
        let text = "https://ok.example https://broken.example https://ok2.example https://extra.example";
        let excerpts = fetch_excerpts(&fetcher, text, 3, 500, Duration::from_secs(1)).await;

        assert_eq!(excerpts.len(), 2);
        assert_eq!(excerpts[0].url, "https://ok.example");
        assert!(excerpts.iter().all(|e| e.excerpt.chars().count() == 500));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_link_is_fetched_once_until_it_expires() {
        let inner = Arc::new(MapFetcher {
            calls: Mutex::new(Vec::new()),
        });
        let cached = Arc::new(CachedExcerptFetcher::new(inner.clone(), Duration::from_secs(600)));
        let fetcher: Arc<dyn ExcerptFetcher> = cached.clone();

        let first = fetch_excerpts(&fetcher, "see https://ok.example", 3, 500, Duration::from_secs(1)).await;
        let second = fetch_excerpts(&fetcher, "again https://ok.example", 3, 500, Duration::from_secs(1)).await;
        assert_eq!(first, second);
        assert_eq!(inner.calls.lock().unwrap().len(), 1);
        assert_eq!(cached.len(), 1);

        tokio::time::sleep(Duration::from_secs(601)).await;
        fetch_excerpts(&fetcher, "https://ok.example", 3, 500, Duration::from_secs(1)).await;
        assert_eq!(inner.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_fetches_are_not_cached() {
        let inner = Arc::new(MapFetcher {
            calls: Mutex::new(Vec::new()),
        });
        let cached = CachedExcerptFetcher::new(inner.clone(), Duration::from_secs(600));

        assert!(cached.fetch("https://broken.example").await.is_err());
        assert!(cached.fetch("https://broken.example").await.is_err());
        assert_eq!(inner.calls.lock().unwrap().len(), 2);
        assert!(cached.is_empty());
    }
}
