//! Centralized name derivation for series ids, object keys and image identity.
//!
//! Every string that ends up in a URL, an object key or the ledger is built
//! here, so two runs against the same catalog always derive the same names.
//!
//! ## Series ids
//!
//! Series are keyed by a slug of their display name: every whitespace run
//! becomes a single dash (leading and trailing runs included) and the result
//! is lowercased. Two source names that slug to the same id are the same
//! series. The catalog trims names before they get here.
//! - `"Street Photos"` → `"street-photos"`
//! - `"street   photos"` → `"street-photos"`
//!
//! ## Directory segments and object keys
//!
//! The series and album directories of a key keep letters and digits of any
//! script plus `_.-`, and map everything else to `_`, so `京都` and `大阪`
//! stay apart:
//! - `"Kyoto 2019"` → `"Kyoto_2019"`
//! - `"a/b?c"` → `"a_b_c"`
//! - `"京都 2019"` → `"京都_2019"`
//!
//! File names are stricter: [`safe_filename`] keeps only `[A-Za-z0-9_.-]`.
//!
//! Keys follow `<prefix><series>/<album>/<series>_<album>_<index><ext>`, e.g.
//! `photo-portfolio/Travel/Kyoto_2019/Travel_Kyoto_2019_3.jpg`.

use reqwest::Url;
use std::fmt;
use std::path::Path;

/// Default extension when the source URL path carries none.
const DEFAULT_EXTENSION: &str = ".jpg";

/// Slug a series name into its stable id.
pub fn series_id(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut in_space = false;
    for c in name.chars() {
        if c.is_whitespace() {
            if !in_space {
                slug.push('-');
            }
            in_space = true;
        } else {
            slug.push(c);
            in_space = false;
        }
    }
    slug.to_lowercase()
}

/// Directory segment for a series name or album title.
///
/// Keeps alphanumerics of any script and `_.-`; everything else becomes
/// `_`. Empty and dot-only names become underscores so the segment is never
/// empty, `.` or `..`.
pub fn dir_segment(name: &str) -> String {
    let segment: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if segment.chars().all(|c| c == '.') {
        "_".repeat(segment.chars().count().max(1))
    } else {
        segment
    }
}

/// Map every character outside `[A-Za-z0-9_.-]` to `_`.
pub fn path_segment(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Position of an image within its album, used in object file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSlot {
    /// 1-based position in the album's image list.
    Position(usize),
    /// The album's explicit cover image.
    Cover,
}

impl fmt::Display for ImageSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSlot::Position(n) => write!(f, "{n}"),
            ImageSlot::Cover => f.write_str("cover"),
        }
    }
}

/// Build the collision-safe file name for one image.
///
/// ```
/// # use portfolio_sync::naming::{safe_filename, ImageSlot};
/// assert_eq!(
///     safe_filename("Travel", "Kyoto 2019", ImageSlot::Position(3), ".jpg"),
///     "Travel_Kyoto_2019_3.jpg"
/// );
/// ```
pub fn safe_filename(series: &str, album: &str, slot: ImageSlot, extension: &str) -> String {
    let base = path_segment(&format!(
        "{}_{}_{}",
        path_segment(series),
        path_segment(album),
        slot
    ));
    format!("{}{}", base, path_segment(extension))
}

/// Normalize a key prefix: no leading slash, exactly one trailing slash.
///
/// An empty (or all-slash) prefix stays empty so keys start at the series.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

/// Derive the object key for an image. `series` and `album` go through
/// [`dir_segment`], which leaves an already derived segment unchanged.
pub fn object_key(prefix: &str, series: &str, album: &str, filename: &str) -> String {
    format!(
        "{}{}/{}/{}",
        normalize_prefix(prefix),
        dir_segment(series),
        dir_segment(album),
        filename
    )
}

/// Last path segment of a URL, percent-decoded. `None` for unparseable URLs
/// or URLs whose path ends in `/`.
pub fn url_file_name(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last = parsed.path_segments()?.last()?;
    if last.is_empty() {
        return None;
    }
    Some(percent_decode(last))
}

/// Extension of the URL's file name including the dot, or `.jpg`.
pub fn url_extension(url: &str) -> String {
    url_file_name(url)
        .as_deref()
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

/// Ledger identity of a source URL.
///
/// With `strip_query`, query string and fragment are dropped: signed URLs
/// from the content source change their query on every fetch while the
/// path stays put. Unparseable URLs are used verbatim.
pub fn source_identity(url: &str, strip_query: bool) -> String {
    if !strip_query {
        return url.to_string();
    }
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url.to_string(),
    }
}

/// Decode `%XX` escapes; invalid escapes are kept as-is and invalid UTF-8 is
/// replaced.
pub fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2]))
        {
            out.push(hi << 4 | lo);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}
