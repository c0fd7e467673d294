//! Listing filters for surfaces that should only show well-tagged music.

/// True for blank titles and generic ones such as `"Track 11"` or `"track01"`.
pub fn is_placeholder_title(title: &str) -> bool {
    let title = title.trim();
    if title.is_empty() {
        return true;
    }
    let lower = title.to_lowercase();
    let rest = match lower.strip_prefix("track") {
        Some(rest) => rest.trim_start(),
        None => return false,
    };
    !rest.is_empty() && rest.chars().all(|ch| ch.is_ascii_digit())
}

/// A real title on an album known to carry artwork. Unknown artwork fails.
pub fn is_home_quality(title: &str, album_has_artwork: Option<bool>) -> bool {
    !is_placeholder_title(title) && album_has_artwork == Some(true)
}
