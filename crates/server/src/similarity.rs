use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::warn;

#[derive(Clone, Debug, PartialEq)]
pub struct SimilarCandidate {
    pub artist: String,
    pub title: String,
    pub score: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SimilarityOutcome {
    Found(Vec<SimilarCandidate>),
    Empty,
    Unavailable(String),
}

impl SimilarityOutcome {
    pub fn into_candidates(self) -> Vec<SimilarCandidate> {
        match self {
            SimilarityOutcome::Found(candidates) => candidates,
            SimilarityOutcome::Empty => Vec::new(),
            SimilarityOutcome::Unavailable(reason) => {
                warn!("Similarity source unavailable: {}", reason);
                Vec::new()
            }
        }
    }
}

pub trait SimilaritySource: Send + Sync + 'static {
    fn similar_tracks(
        &self,
        artist: &str,
        title: &str,
        limit: usize,
    ) -> impl Future<Output = SimilarityOutcome> + Send;
}

#[derive(Clone, Debug)]
pub struct LastFmClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    timeout: Duration,
}

impl LastFmClient {
    pub fn new(client: Client, api_key: Option<String>, base_url: &str, timeout: Duration) -> Self {
        Self {
            client,
            api_key,
            base_url: base_url.trim().to_string(),
            timeout,
        }
    }

    fn request_url(&self, api_key: &str, artist: &str, title: &str, limit: usize) -> String {
        let separator = if self.base_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}method=track.getSimilar&artist={}&track={}&api_key={}&format=json&limit={}&autocorrect=1",
            self.base_url,
            separator,
            url_escape(artist),
            url_escape(title),
            url_escape(api_key),
            limit
        )
    }
}

impl SimilaritySource for LastFmClient {
    async fn similar_tracks(&self, artist: &str, title: &str, limit: usize) -> SimilarityOutcome {
        let api_key = match self.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => key.trim(),
            // Unset key is a supported configuration; startup already logs it.
            _ => return SimilarityOutcome::Empty,
        };
        if limit == 0 {
            return SimilarityOutcome::Empty;
        }

        let url = self.request_url(api_key, artist, title, limit);
        let response = match self.client.get(&url).timeout(self.timeout).send().await {
            Ok(response) => response,
            Err(err) => return SimilarityOutcome::Unavailable(err.to_string()),
        };
        if !response.status().is_success() {
            return SimilarityOutcome::Unavailable(format!("http {}", response.status()));
        }
        let body: SimilarResponse = match response.json().await {
            Ok(body) => body,
            Err(err) => return SimilarityOutcome::Unavailable(format!("invalid response: {}", err)),
        };
        if let Some(code) = body.error {
            let message = body.message.unwrap_or_default();
            return SimilarityOutcome::Unavailable(format!("api error {}: {}", code, message));
        }

        let entries = body
            .similartracks
            .map(|tracks| tracks.track.into_vec())
            .unwrap_or_default();
        let candidates: Vec<SimilarCandidate> = entries
            .into_iter()
            .filter_map(SimilarEntry::into_candidate)
            .take(limit)
            .collect();
        if candidates.is_empty() {
            SimilarityOutcome::Empty
        } else {
            SimilarityOutcome::Found(candidates)
        }
    }
}

#[derive(Deserialize)]
struct SimilarResponse {
    similartracks: Option<SimilarTracks>,
    error: Option<serde_json::Value>,
    message: Option<String>,
}

#[derive(Deserialize)]
struct SimilarTracks {
    #[serde(default)]
    track: OneOrMany<SimilarEntry>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

#[derive(Deserialize)]
struct SimilarEntry {
    name: Option<String>,
    #[serde(rename = "match")]
    score: Option<NumberOrString>,
    artist: Option<EntryArtist>,
}

#[derive(Deserialize)]
struct EntryArtist {
    name: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    Text(String),
}

impl SimilarEntry {
    fn into_candidate(self) -> Option<SimilarCandidate> {
        let title = self.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())?;
        let artist = self
            .artist
            .and_then(|a| a.name)
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())?;
        let score = match self.score {
            None => 1.0,
            Some(NumberOrString::Number(value)) => value,
            Some(NumberOrString::Text(text)) => text.trim().parse::<f64>().ok()?,
        };
        if !score.is_finite() {
            return None;
        }
        Some(SimilarCandidate {
            artist,
            title,
            score: score.clamp(0.0, 1.0),
        })
    }
}

fn url_escape(input: &str) -> String {
    let mut out = String::new();
    for byte in input.as_bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(*byte as char)
            }
            b' ' => out.push_str("%20"),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
