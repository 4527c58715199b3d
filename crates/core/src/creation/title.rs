//! Episode title derivation.
//!
//! Titles are extracted from the variant group's file structure: a group of
//! files under a common directory is named after that directory, a single
//! file after its stem. When the files yield nothing usable the title falls
//! back to the source URL.

use once_cell::sync::Lazy;
use regex_lite::Regex;

static SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[_\.]+").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Derive a title for a variant group, falling back to the source URL.
pub fn derive_title(variants: &[String], source_url: &str) -> String {
    if let Some(title) = title_from_variants(variants) {
        return title;
    }
    title_from_url(source_url)
}

/// Structured title extraction from the group's file paths.
fn title_from_variants(variants: &[String]) -> Option<String> {
    match variants {
        [] => None,
        [single] => clean(file_stem(single)),
        many => {
            if let Some(dir) = common_directory(many) {
                if let Some(title) = clean(&dir) {
                    return Some(title);
                }
            }
            // No shared directory: try the shared filename prefix.
            let stems: Vec<&str> = many.iter().map(|path| file_stem(path)).collect();
            let prefix = common_prefix(&stems);
            clean(prefix.trim_end_matches(|c: char| {
                c.is_ascii_digit() || c == '-' || c == ' ' || c == '_' || c == '.'
            }))
        }
    }
}

/// Derive a title from the source URL: the magnet display name if present,
/// otherwise the last path segment, otherwise the host.
fn title_from_url(source_url: &str) -> String {
    if source_url.starts_with("magnet:") {
        return magnet_display_name(source_url)
            .and_then(|name| clean(&name))
            .unwrap_or_else(|| "Untitled".to_string());
    }

    let without_query = source_url.split(['?', '#']).next().unwrap_or("");
    let last_segment = without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("");
    if !last_segment.is_empty() && !last_segment.contains(':') {
        if let Some(title) = clean(file_stem(last_segment)) {
            return title;
        }
    }

    let host = without_query
        .trim_start_matches("http://")
        .trim_start_matches("https://")
        .split('/')
        .next()
        .unwrap_or("");
    clean(host).unwrap_or_else(|| "Untitled".to_string())
}

/// Extract the `dn` (display name) parameter from a magnet link.
fn magnet_display_name(url: &str) -> Option<String> {
    let query = url.strip_prefix("magnet:?")?;
    for param in query.split('&') {
        if let Some(value) = param.strip_prefix("dn=") {
            return urlencoding::decode(value)
                .ok()
                .map(|decoded| decoded.replace('+', " "));
        }
    }
    None
}

/// Deepest directory shared by every path, as a display name.
fn common_directory(paths: &[String]) -> Option<String> {
    let split: Vec<Vec<&str>> = paths
        .iter()
        .map(|path| {
            let mut components: Vec<&str> = path.split('/').collect();
            components.pop(); // drop the file name
            components
        })
        .collect();

    let first = split.first()?;
    let mut depth = first.len();
    for components in &split[1..] {
        depth = depth
            .min(components.len())
            .min(
                first
                    .iter()
                    .zip(components.iter())
                    .take_while(|(a, b)| a == b)
                    .count(),
            );
    }

    if depth == 0 {
        return None;
    }
    first.get(depth - 1).map(|dir| dir.to_string())
}

/// Longest common prefix of a set of strings.
fn common_prefix<'a>(values: &[&'a str]) -> &'a str {
    let Some(first) = values.first() else {
        return "";
    };
    let mut len = first.len();
    for value in &values[1..] {
        len = len.min(
            first
                .bytes()
                .zip(value.bytes())
                .take_while(|(a, b)| a == b)
                .count(),
        );
    }
    // Stay on a char boundary.
    while len > 0 && !first.is_char_boundary(len) {
        len -= 1;
    }
    &first[..len]
}

/// File name without its extension.
fn file_stem(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}

/// Normalize separators and whitespace. Returns None for empty results.
fn clean(raw: &str) -> Option<String> {
    let spaced = SEPARATORS.replace_all(raw, " ");
    let collapsed = WHITESPACE.replace_all(&spaced, " ");
    let trimmed = collapsed.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_group_under_common_directory_uses_directory_name() {
        let variants = strings(&["Show/Ep 01/part1.mp3", "Show/Ep 01/part2.mp3"]);
        assert_eq!(derive_title(&variants, "magnet:?xt=x"), "Ep 01");
    }

    #[test]
    fn test_single_file_uses_stem() {
        let variants = strings(&["Show/My_Great_Episode.mp3"]);
        assert_eq!(derive_title(&variants, "magnet:?xt=x"), "My Great Episode");
    }

    #[test]
    fn test_dots_and_underscores_become_spaces() {
        let variants = strings(&["The.Daily.Show_2024/episode.mp3"]);
        assert_eq!(derive_title(&variants, ""), "episode");
    }

    #[test]
    fn test_shared_filename_prefix_without_directory() {
        let variants = strings(&["Interview part 1.mp3", "Interview part 2.mp3"]);
        assert_eq!(derive_title(&variants, ""), "Interview part");
    }

    #[test]
    fn test_magnet_display_name_fallback() {
        // Completely disjoint file names give no structure to extract.
        let variants = strings(&["aaa.mp3", "zzz.mp3"]);
        let url = "magnet:?xt=urn:btih:abc&dn=Cool%20Show%20S01";
        assert_eq!(derive_title(&variants, url), "Cool Show S01");
    }

    #[test]
    fn test_plain_url_fallback_uses_last_segment() {
        assert_eq!(
            derive_title(&[], "https://cdn.example.com/shows/night_talk.mp3?t=1"),
            "night talk"
        );
    }

    #[test]
    fn test_url_fallback_without_path_segment() {
        assert_eq!(derive_title(&[], "https://example.com/"), "example");
    }

    #[test]
    fn test_magnet_without_display_name_gives_untitled() {
        assert_eq!(derive_title(&[], "magnet:?xt=urn:btih:abc"), "Untitled");
    }

    #[test]
    fn test_everything_empty_gives_untitled() {
        assert_eq!(derive_title(&[], ""), "Untitled");
    }

    #[test]
    fn test_common_prefix_stays_on_char_boundary() {
        let values = ["épisode un", "épisodé deux"];
        let prefix = common_prefix(&values);
        assert!(prefix.starts_with("épisod"));
    }
}
