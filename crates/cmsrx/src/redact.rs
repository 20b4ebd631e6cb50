//! Log-safe rewriting of media-bearing frames.
//!
//! Media payloads never reach the log verbatim at INFO: base64 bodies
//! collapse to a length marker, photo URLs past the first collapse to
//! placeholders, and oversized frames are truncated. The raw bytes stay
//! authoritative for parsing; these rewrites exist only for logging.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::label::looks_like_image_url;

/// Base64 bodies shorter than this pass through unmasked; anything at or
/// above it is clearly media, not a field value.
const BASE64_MASK_THRESHOLD: usize = 64;

/// Frames longer than this are truncated in INFO logs.
pub const MAX_LOG_CHARS: usize = 1200;

static BASE64_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<(PacketData|Data)(\s[^>]*)?>(.*?)</(?:PacketData|Data)>").unwrap()
});

static V_BLOCK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[V([^\]]+)\]").unwrap());

static MEDIA_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(VideoFile|Image|Url|Link|Hyperlink)>(.*?)</(?:VideoFile|Image|Url|Link|Hyperlink)>")
        .unwrap()
});

static SIGNAL_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<Signal>.*?</Signal>").unwrap());

/// Replace long base64 tag bodies with `[PHOTO BASE64, len=N]`.
pub fn mask_base64_tags(text: &str) -> String {
    BASE64_TAG
        .replace_all(text, |caps: &Captures<'_>| {
            let tag = &caps[1];
            let attrs = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            let body = &caps[3];
            if body.len() >= BASE64_MASK_THRESHOLD {
                format!("<{tag}{attrs}>[PHOTO BASE64, len={}]</{tag}>", body.len())
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

/// Inside each SIA `[V...]` block keep only the first photo URL; the
/// rest become `[PHOTO_URL]`. Non-photo parts are left alone.
pub fn mask_sia_v_blocks(text: &str) -> String {
    V_BLOCK
        .replace_all(text, |caps: &Captures<'_>| {
            let parts: Vec<&str> = caps[1].split(',').map(str::trim).collect();
            if !parts.iter().any(|p| looks_like_image_url(p)) {
                return caps[0].to_string();
            }
            let mut seen_photos = 0;
            let masked: Vec<String> = parts
                .iter()
                .map(|part| {
                    if looks_like_image_url(part) {
                        seen_photos += 1;
                        if seen_photos == 1 {
                            (*part).to_string()
                        } else {
                            "[PHOTO_URL]".to_string()
                        }
                    } else {
                        (*part).to_string()
                    }
                })
                .collect();
            format!("[V{}]", masked.join(","))
        })
        .into_owned()
}

/// Compact a noisy XML frame for logging: within each `<Signal>` keep
/// only `keep_per_signal` media URLs, then hard-truncate the result.
pub fn shrink_media(text: &str, keep_per_signal: usize, max_chars: usize) -> String {
    let compact = SIGNAL_BLOCK
        .replace_all(text, |signal: &Captures<'_>| {
            let mut kept = 0;
            MEDIA_TAG
                .replace_all(&signal[0], |media: &Captures<'_>| {
                    kept += 1;
                    if kept <= keep_per_signal {
                        media[0].to_string()
                    } else {
                        format!("<{tag}>...</{tag}>", tag = &media[1])
                    }
                })
                .into_owned()
        })
        .into_owned();
    truncate_for_log(&compact, max_chars)
}

/// Hard-truncate with an omitted-length note.
pub fn truncate_for_log(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }
    let cut = text
        .char_indices()
        .take_while(|(i, _)| *i <= max_chars)
        .last()
        .map(|(i, _)| i)
        .unwrap_or(0);
    format!("{}... [+{} chars]", &text[..cut], text.len() - cut)
}

/// One-line summary of a photo URL list: the first URL plus a count.
pub fn summarize_photo_urls(urls: &[String]) -> String {
    match urls {
        [] => String::new(),
        [one] => one.clone(),
        [first, rest @ ..] => format!("{first} +{} more photos", rest.len()),
    }
}

/// Decode frame bytes for logging. UTF-8 first; invalid sequences fall
/// back to a Latin-1 style byte-to-char mapping so no frame is ever
/// unloggable. Raw bytes remain authoritative for parsing.
pub fn lossy_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}
