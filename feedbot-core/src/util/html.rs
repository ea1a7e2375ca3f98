use scraper::Html;

/// Strip markup from a fragment of HTML, returning whitespace-normalized
/// text. Plain text passes through unchanged apart from the normalization.
pub fn html_to_text(input: &str) -> String {
    if !input.contains('<') && !input.contains('&') {
        return normalize_whitespace(input);
    }
    let fragment = Html::parse_fragment(input);
    let text: String = fragment.root_element().text().collect();
    normalize_whitespace(&text)
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
