/// Characters stripped from markdown before a body is summarized.
pub const MARKDOWN_MARKERS: &[char] = &['#', '*', '`', '_', '~', '[', ']'];
pub const ELLIPSIS: &str = "...";

pub const SEARCH_PREVIEW_LEN: usize = 100;
pub const STATS_SUMMARY_LEN: usize = 40;
pub const RECOMMENDATION_SUMMARY_LEN: usize = 50;

/// Plain-text summary of a markdown body, cut to `max_chars` characters.
#[must_use]
pub fn summarize(content: &str, max_chars: usize) -> String {
    let plain: String = content
        .chars()
        .filter(|c| !MARKDOWN_MARKERS.contains(c))
        .collect();

    if plain.chars().count() > max_chars {
        let mut summary: String = plain.chars().take(max_chars).collect();
        summary.push_str(ELLIPSIS);
        summary
    } else {
        plain
    }
}
