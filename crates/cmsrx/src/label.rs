//! URL classification and label aggregation.
//!
//! Event frames are tagged for logging as `PHOTO`, `LINK`, or `EVENT`
//! depending on the URLs they carry. Image detection works even for
//! CDN-backed URLs with no file extension, where only a host or path
//! hint gives the content away.

use std::sync::LazyLock;

use regex::Regex;

// Commas and brackets separate URLs inside SIA `[V...]` blocks, so they
// terminate a URL even though they are legal URL characters.
/// Any URL, regardless of scheme (`https://`, `ajax-pro-desktop://`, ...).
static URL_ANY_SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b[a-z][a-z0-9+.\-]*://[^\s,\[\]<>]+").unwrap());

/// URL with an explicit image extension before an optional query string.
static IMAGE_EXT_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b[a-z][a-z0-9+.\-]*://[^\s,\[\]<>]+?\.(?:jpg|jpeg|png|gif|webp|bmp|tif|tiff)(?:\?[^\s,\[\]<>]+)?",
    )
    .unwrap()
});

// Image-like CDN URLs carry no extension; the host or service token
// combined with a path hint identifies them.
static IMAGE_HOST_HINT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)imagesvc").unwrap());
static IMAGE_PATH_HINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:/s/|image_|/original/)").unwrap());
static SERVICE_HINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:app_video-svc|app_company-svc)").unwrap());

/// How a signal or URL classifies for labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Image content.
    Photo,
    /// Non-image URL content.
    Link,
    /// Plain event.
    Event,
}

impl Category {
    /// The label word for this category.
    pub fn word(&self) -> &'static str {
        match self {
            Category::Photo => "PHOTO",
            Category::Link => "LINK",
            Category::Event => "EVENT",
        }
    }
}

/// One aggregated label entry: category, event code, occurrence count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryCount {
    /// Classified category.
    pub category: Category,
    /// Event code the signals carried.
    pub code: String,
    /// Number of signals with this category and code.
    pub count: usize,
}

/// Best-effort detection of image URLs, with or without file extensions.
pub fn looks_like_image_url(text: &str) -> bool {
    if IMAGE_EXT_URL.is_match(text) {
        return true;
    }
    if IMAGE_HOST_HINT.is_match(text) && IMAGE_PATH_HINT.is_match(text) {
        return true;
    }
    if SERVICE_HINT.is_match(text) && IMAGE_PATH_HINT.is_match(text) {
        return true;
    }
    false
}

/// True when the text contains a URL of any scheme.
pub fn has_any_url(text: &str) -> bool {
    URL_ANY_SCHEME.is_match(text)
}

/// Classify a body of text holding zero or more URLs.
///
/// Image-like URLs win over plain URLs; no URL at all is an event.
pub fn classify_text(text: &str) -> Category {
    if looks_like_image_url(text) {
        Category::Photo
    } else if has_any_url(text) {
        Category::Link
    } else {
        Category::Event
    }
}

/// Aggregate per-signal classifications into label entries.
///
/// Entries keep first-seen order; photos sort before links before
/// events so the most interesting tag leads the log line.
pub fn aggregate(signals: impl IntoIterator<Item = (Category, String)>) -> Vec<CategoryCount> {
    let mut entries: Vec<CategoryCount> = Vec::new();
    for (category, code) in signals {
        if let Some(entry) = entries
            .iter_mut()
            .find(|e| e.category == category && e.code == code)
        {
            entry.count += 1;
        } else {
            entries.push(CategoryCount {
                category,
                code,
                count: 1,
            });
        }
    }
    entries.sort_by_key(|e| match e.category {
        Category::Photo => 0,
        Category::Link => 1,
        Category::Event => 2,
    });
    entries
}

/// Render label entries as `[PHOTO E130 x3] [LINK E761] [EVENT R145]`.
///
/// PHOTO and LINK render one bracket per code, with a count when a
/// code repeats. EVENT is flatter: a single code keeps its count, but
/// several distinct codes collapse into one uncounted comma-joined
/// bracket (`[EVENT R145,R130]`).
pub fn format_labels(entries: &[CategoryCount]) -> String {
    let mut rendered: Vec<String> = entries
        .iter()
        .filter(|e| e.category != Category::Event)
        .map(render_counted)
        .collect();

    let events: Vec<&CategoryCount> = entries
        .iter()
        .filter(|e| e.category == Category::Event)
        .collect();
    match events.as_slice() {
        [] => {}
        [one] => rendered.push(render_counted(*one)),
        many => {
            let codes: Vec<&str> = many.iter().map(|e| e.code.as_str()).collect();
            rendered.push(format!("[EVENT {}]", codes.join(",")));
        }
    }
    rendered.join(" ")
}

fn render_counted(entry: &CategoryCount) -> String {
    let suffix = if entry.count > 1 {
        format!(" x{}", entry.count)
    } else {
        String::new()
    };
    if entry.code.is_empty() {
        format!("[{}{suffix}]", entry.category.word())
    } else {
        format!("[{} {}{suffix}]", entry.category.word(), entry.code)
    }
}
