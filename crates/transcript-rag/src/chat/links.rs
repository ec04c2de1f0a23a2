//! Source links for transcript snippets.
//!
//! Links are pulled from the retrieved context, not from the model output, so
//! the model can only ever point at videos it was actually shown.

use std::sync::LazyLock;

use crate::memory::SNIPPET_PREFIX;

static SNIPPET_ID_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"YouTube ID: (\w+)-(\d{2}[_:]\d{2}(?:[_:]\d{2})?)")
        .expect("snippet id regex is valid")
});
static EMBED_ID_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"https://www\.youtube\.com/embed/([^?]+)").expect("embed url regex is valid")
});
static ANCHOR_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r#"<a [^>]*href=["“](https?[^"“]+)["“][^>]*>([^<]+)</a>"#)
        .expect("anchor regex is valid")
});

/// Number of leading transcripts linked when the response names none.
pub const FALLBACK_LINKS: usize = 3;

/// `HH_MM_SS`, `HH:MM:SS` or `MM:SS` to seconds.
pub fn timecode_seconds(timecode: &str) -> Option<u32> {
    let parts: Vec<u32> = timecode
        .split(['_', ':'])
        .map(|p| p.parse::<u32>().ok())
        .collect::<Option<_>>()?;
    match parts.as_slice() {
        [h, m, s] => Some(h * 3600 + m * 60 + s),
        [m, s] => Some(m * 60 + s),
        _ => None,
    }
}

pub fn youtube_link(video_id: &str, timecode: &str) -> Option<String> {
    timecode_seconds(timecode)
        .map(|secs| format!("https://www.youtube.com/embed/{}?start={}", video_id, secs))
}

/// Embed links for the transcripts in `chat_context`. Transcripts whose video
/// ID appears in `response` win; otherwise the first three transcripts.
pub fn extract_links(response: &str, chat_context: &str) -> Vec<String> {
    let mut mentioned = Vec::new();
    let mut leading = Vec::new();
    let mut position = 0usize;

    for line in chat_context.lines().filter(|l| l.contains(SNIPPET_PREFIX)) {
        position += 1;
        let Some(caps) = SNIPPET_ID_RE.captures(line) else {
            continue;
        };
        let video_id = &caps[1];
        let Some(link) = youtube_link(video_id, &caps[2]) else {
            continue;
        };
        if response.contains(video_id) {
            mentioned.push(link.clone());
        }
        if position <= FALLBACK_LINKS {
            leading.push(link);
        }
    }

    if mentioned.is_empty() {
        leading
    } else {
        mentioned
    }
}

/// Wrap bare video IDs in `response` with anchors to the watch URL. A
/// response that already carries a URL is returned unchanged.
pub fn replace_links(response: &str, links: &[String]) -> String {
    if response.contains("https://") {
        return response.to_string();
    }

    let mut result = response.to_string();
    for link in links {
        let Some(caps) = EMBED_ID_RE.captures(link) else {
            continue;
        };
        let video_id = &caps[1];
        let anchor = format!(
            r#"<a target="_blank" href="{}">{}</a>"#,
            link.replace("/embed/", "/v/"),
            video_id
        );
        result = replace_bare(&result, video_id, &anchor);
    }
    result
}

/// Byte ranges covered by markup: whole `<a …>…</a>` elements and any other
/// tag including its attributes. A `<` only opens a tag when followed by an
/// ASCII letter or `/`, so prose such as `< 5` stays unmasked.
fn markup_ranges(text: &str) -> Vec<(usize, usize)> {
    let bytes = text.as_bytes();
    let lower = text.to_ascii_lowercase();
    let mut ranges = Vec::new();
    let mut i = 0;

    while let Some(offset) = text[i..].find('<') {
        let start = i + offset;
        let opens_tag = bytes
            .get(start + 1)
            .map_or(false, |b| b.is_ascii_alphabetic() || *b == b'/');
        if !opens_tag {
            i = start + 1;
            continue;
        }

        let is_anchor = lower[start..].starts_with("<a")
            && bytes
                .get(start + 2)
                .map_or(false, |b| b.is_ascii_whitespace() || *b == b'>');

        let end = if is_anchor {
            lower[start..]
                .find("</a>")
                .map(|close| start + close + 4)
                .or_else(|| text[start..].find('>').map(|gt| start + gt + 1))
        } else {
            text[start..].find('>').map(|gt| start + gt + 1)
        };

        match end {
            Some(end) => {
                ranges.push((start, end));
                i = end;
            }
            None => i = start + 1,
        }
    }
    ranges
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Replace word-delimited occurrences of `needle` that sit outside markup
/// and are not quoted attribute values.
fn replace_bare(text: &str, needle: &str, replacement: &str) -> String {
    if needle.is_empty() {
        return text.to_string();
    }
    let masked = markup_ranges(text);
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for (start, _) in text.match_indices(needle) {
        let end = start + needle.len();
        if start < last {
            continue;
        }
        let inside_markup = masked.iter().any(|(s, e)| start < *e && end > *s);
        let bounded = (start == 0 || !is_word_byte(bytes[start - 1]))
            && (end == bytes.len() || !is_word_byte(bytes[end]));
        let quoted = text[..start].ends_with("=\"")
            || text[..start].ends_with('\'')
            || text[end..].starts_with('\'');

        if inside_markup || !bounded || quoted {
            continue;
        }
        out.push_str(&text[last..start]);
        out.push_str(replacement);
        last = end;
    }
    out.push_str(&text[last..]);
    out
}

/// `<a … href="url">text</a>` to `[text](url)`.
pub fn convert_links_to_markdown(html: &str) -> String {
    ANCHOR_RE.replace_all(html, "[$2]($1)").into_owned()
}
