//! Two-Line Element (TLE) sets and where they come from.
//!
//! Parses CelesTrak-style three-line text into an index-stable collection,
//! and fetches that text off the UI thread (a short-lived thread on native,
//! a `spawn_local` task on wasm32). Results come back over an mpsc channel.

use std::sync::{mpsc, Arc};

use thiserror::Error;

pub type FetchResult = Result<String, FetchError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("could not decode response: {0}")]
    Decode(String),
    #[error("empty response")]
    Empty,
    #[error("response contains no element sets")]
    Malformed,
    #[error("fetch task ended without a result")]
    Abandoned,
}

/// One named element set. Absent lines mark a placeholder that is never
/// propagated.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementSetEntry {
    pub name: String,
    pub line1: Option<String>,
    pub line2: Option<String>,
}

impl ElementSetEntry {
    pub fn new(name: impl Into<String>, line1: impl Into<String>, line2: impl Into<String>) -> Self {
        Self { name: name.into(), line1: Some(line1.into()), line2: Some(line2.into()) }
    }

    pub fn placeholder(name: impl Into<String>) -> Self {
        Self { name: name.into(), line1: None, line2: None }
    }

    pub fn lines(&self) -> Option<(&str, &str)> {
        Some((self.line1.as_deref()?, self.line2.as_deref()?))
    }
}

/// The fetched element sets of one generation. Entry index is the join key
/// with the coordinate buffers, so the entries are immutable and shared.
#[derive(Debug, Clone)]
pub struct ElementSetCollection {
    generation: u64,
    entries: Arc<[ElementSetEntry]>,
}

impl ElementSetCollection {
    pub fn new(generation: u64, entries: Vec<ElementSetEntry>) -> Self {
        Self { generation, entries: entries.into() }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn entries(&self) -> &[ElementSetEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&ElementSetEntry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Length of a coordinate buffer for this collection.
    pub fn buffer_len(&self) -> usize {
        self.entries.len() * 3
    }
}

fn looks_like_line(line: &str, number: char) -> bool {
    let mut chars = line.chars();
    chars.next() == Some(number) && chars.next() == Some(' ')
}

/// Parses newline-delimited `name / line1 / line2` triplets.
///
/// Trailing blank lines are ignored. Parsing stops at the first group of
/// three lines that is not a name followed by recognizable element lines,
/// so a response that is not TLE text yields no entries.
pub fn parse_element_sets(text: &str) -> Vec<ElementSetEntry> {
    let mut lines = text.lines().map(str::trim);
    let mut entries = Vec::new();
    while let (Some(name), Some(line1), Some(line2)) = (lines.next(), lines.next(), lines.next()) {
        if name.is_empty() || !looks_like_line(line1, '1') || !looks_like_line(line2, '2') {
            break;
        }
        entries.push(ElementSetEntry::new(name, line1, line2));
    }
    entries
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TlePreset {
    Stations,
    Brightest100,
    ActiveSats,
    Starlink,
    OneWeb,
    Iridium,
    Gps,
    Galileo,
    Weather,
    Noaa,
    Cubesats,
    Cosmos1408Debris,
}

impl TlePreset {
    pub const ALL: [TlePreset; 12] = [
        Self::Stations, Self::Brightest100, Self::ActiveSats,
        Self::Starlink, Self::OneWeb, Self::Iridium,
        Self::Gps, Self::Galileo,
        Self::Weather, Self::Noaa,
        Self::Cubesats, Self::Cosmos1408Debris,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Stations => "Stations",
            Self::Brightest100 => "100 Brightest",
            Self::ActiveSats => "Active",
            Self::Starlink => "Starlink",
            Self::OneWeb => "OneWeb",
            Self::Iridium => "Iridium",
            Self::Gps => "GPS",
            Self::Galileo => "Galileo",
            Self::Weather => "Weather",
            Self::Noaa => "NOAA",
            Self::Cubesats => "CubeSats",
            Self::Cosmos1408Debris => "Cosmos 1408",
        }
    }

    /// CelesTrak `GROUP=` value.
    pub fn group(&self) -> &'static str {
        match self {
            Self::Stations => "stations",
            Self::Brightest100 => "visual",
            Self::ActiveSats => "active",
            Self::Starlink => "starlink",
            Self::OneWeb => "oneweb",
            Self::Iridium => "iridium",
            Self::Gps => "gps-ops",
            Self::Galileo => "galileo",
            Self::Weather => "weather",
            Self::Noaa => "noaa",
            Self::Cubesats => "cubesat",
            Self::Cosmos1408Debris => "cosmos-1408-debris",
        }
    }

    pub fn url(&self) -> String {
        format!("https://celestrak.org/NORAD/elements/gp.php?GROUP={}&FORMAT=tle", self.group())
    }

    pub fn from_group(group: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.group().eq_ignore_ascii_case(group))
    }
}

/// Where element-set text comes from.
///
/// `request` must not block: it arranges for exactly one result to be sent
/// on `tx` later (or immediately, for in-memory sources).
pub trait ElementSource {
    fn describe(&self) -> String;
    fn request(&self, tx: mpsc::Sender<FetchResult>);
}

pub struct HttpSource {
    pub url: String,
}

impl HttpSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn preset(preset: TlePreset) -> Self {
        Self::new(preset.url())
    }
}

impl ElementSource for HttpSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn request(&self, tx: mpsc::Sender<FetchResult>) {
        let url = self.url.clone();
        let spawned = std::thread::Builder::new()
            .name("tle-fetch".to_string())
            .spawn(move || {
                let _ = tx.send(fetch_tle_text(&url));
            });
        if let Err(e) = spawned {
            log::warn!("could not start fetch thread: {}", e);
        }
    }

    #[cfg(target_arch = "wasm32")]
    fn request(&self, tx: mpsc::Sender<FetchResult>) {
        let url = self.url.clone();
        wasm_bindgen_futures::spawn_local(async move {
            let _ = tx.send(fetch_tle_text(&url).await);
        });
    }
}

/// Serves a fixed response; used offline and in tests.
pub struct StaticSource {
    response: FetchResult,
}

impl StaticSource {
    pub fn text(text: impl Into<String>) -> Self {
        Self { response: Ok(text.into()) }
    }

    pub fn failing(error: FetchError) -> Self {
        Self { response: Err(error) }
    }
}

impl ElementSource for StaticSource {
    fn describe(&self) -> String {
        "static".to_string()
    }

    fn request(&self, tx: mpsc::Sender<FetchResult>) {
        let _ = tx.send(self.response.clone());
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub fn fetch_tle_text(url: &str) -> FetchResult {
    let response = ureq::get(url).call().map_err(|e| match e {
        ureq::Error::Status(code, _) => FetchError::Status(code),
        other => FetchError::Transport(other.to_string()),
    })?;

    response.into_string().map_err(|e| FetchError::Decode(e.to_string()))
}

#[cfg(target_arch = "wasm32")]
pub async fn fetch_tle_text(url: &str) -> FetchResult {
    use wasm_bindgen::JsCast as _;
    use web_sys::{Request, RequestInit, Response};

    let opts = RequestInit::new();
    opts.set_method("GET");

    let request = Request::new_with_str_and_init(url, &opts)
        .map_err(|e| FetchError::Transport(format!("{:?}", e)))?;

    let window = web_sys::window().ok_or_else(|| FetchError::Transport("no window".to_string()))?;
    let resp_value = wasm_bindgen_futures::JsFuture::from(window.fetch_with_request(&request))
        .await
        .map_err(|e| FetchError::Transport(format!("{:?}", e)))?;

    let resp: Response = resp_value
        .dyn_into()
        .map_err(|_| FetchError::Decode("response is not a Response".to_string()))?;

    if !resp.ok() {
        return Err(FetchError::Status(resp.status()));
    }

    let array_buffer = wasm_bindgen_futures::JsFuture::from(
        resp.array_buffer().map_err(|e| FetchError::Decode(format!("{:?}", e)))?,
    )
    .await
    .map_err(|e| FetchError::Decode(format!("{:?}", e)))?;

    let bytes = js_sys::Uint8Array::new(&array_buffer).to_vec();
    String::from_utf8(bytes).map_err(|e| FetchError::Decode(e.to_string()))
}
