use scraper::Html;

/// Concatenates every text node of an HTML fragment, dropping tags and attributes.
///
/// Entities are decoded. No separator is inserted between adjacent text nodes,
/// and input without any text node yields an empty string.
pub fn extract_text(input: &str) -> String {
    let fragment = Html::parse_fragment(input);
    fragment.root_element().text().collect()
}
