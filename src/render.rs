//! Turns the plain text a writer submits into the HTML shown on post pages.

/// Blank lines separate paragraphs, single newlines become `<br>`, and the
/// result is run through ammonia's default allow-list.
pub fn contents_html(contents: &str) -> String {
    let normalized = contents.replace("\r\n", "\n");
    let html: String = normalized
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| format!("<p>{}</p>", p.lines().collect::<Vec<_>>().join("<br>")))
        .collect();

    ammonia::clean(&html)
}
