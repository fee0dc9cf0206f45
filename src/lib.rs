use scraper::Html;
use uuid::Uuid;

/// Derives a URL-safe slug from a human-readable name: lowercase, latin
/// accents folded to ascii, everything else collapsed into single hyphens.
pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_hyphen = true;
    for c in name.chars() {
        match fold_char(c) {
            Some(f) => {
                out.push_str(f);
                last_hyphen = false;
            }
            None => {
                if !last_hyphen {
                    out.push('-');
                    last_hyphen = true;
                }
            }
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() {
        out.push_str("untitled");
    }
    out
}

fn fold_char(c: char) -> Option<&'static str> {
    match c {
        'a'..='z' | '0'..='9' => Some(ascii_str(c)),
        'A'..='Z' => Some(ascii_str(c.to_ascii_lowercase())),
        'á' | 'à' | 'â' | 'ã' | 'ä' | 'å' | 'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => Some("a"),
        'é' | 'è' | 'ê' | 'ë' | 'É' | 'È' | 'Ê' => Some("e"),
        'í' | 'ì' | 'î' | 'ï' | 'Í' => Some("i"),
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' | 'Ó' | 'Ô' | 'Õ' => Some("o"),
        'ú' | 'ù' | 'û' | 'ü' | 'Ú' | 'Ü' => Some("u"),
        'ç' | 'Ç' => Some("c"),
        'ñ' | 'Ñ' => Some("n"),
        'ß' => Some("ss"),
        _ => None,
    }
}

fn ascii_str(c: char) -> &'static str {
    const TABLE: &str = "abcdefghijklmnopqrstuvwxyz0123456789";
    let idx = match c {
        'a'..='z' => c as usize - 'a' as usize,
        '0'..='9' => 26 + (c as usize - '0' as usize),
        _ => return "",
    };
    &TABLE[idx..idx + 1]
}

/// Candidate slug for the nth probe of the uniqueness loop: the base itself
/// first, then `base-2`, `base-3`, ...
pub fn slug_candidate(base: &str, attempt: u32) -> String {
    if attempt <= 1 {
        base.to_string()
    } else {
        format!("{}-{}", base, attempt)
    }
}

/// Strips markup from stored post HTML, yielding the plain text used for
/// search matching and excerpts.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut out = String::new();
    for text_node in document.root_element().text() {
        let trimmed = text_node.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(trimmed);
    }
    out
}

/// First `max_chars` characters of the text on a char boundary, with an
/// ellipsis when anything was cut.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}

/// Opaque token for sessions and anonymous viewers.
pub fn generate_token() -> String {
    Uuid::new_v4().to_string()
}

/// Pulls a named cookie value out of a raw `Cookie` header.
pub fn cookie_value<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    for pair in header.split(';') {
        let pair = pair.trim();
        if let Some(rest) = pair.strip_prefix(name) {
            if let Some(value) = rest.strip_prefix('=') {
                return Some(value);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_lowercases_and_hyphenates() {
        assert_eq!(
            slugify("Breaking News: Markets Up!"),
            "breaking-news-markets-up"
        );
    }

    #[test]
    fn slugify_folds_accents() {
        assert_eq!(slugify("Éléphants à São Paulo"), "elephants-a-sao-paulo");
    }

    #[test]
    fn slugify_collapses_runs_and_trims() {
        assert_eq!(slugify("  --hello // world--  "), "hello-world");
    }

    #[test]
    fn slugify_never_returns_empty() {
        assert_eq!(slugify("!!!"), "untitled");
    }

    #[test]
    fn slug_candidates_probe_with_numeric_suffix() {
        assert_eq!(slug_candidate("news", 1), "news");
        assert_eq!(slug_candidate("news", 2), "news-2");
        assert_eq!(slug_candidate("news", 7), "news-7");
    }

    #[test]
    fn html_to_text_strips_markup() {
        let text = html_to_text("<h1>Title</h1><p>First <b>bold</b> bit.</p>");
        assert_eq!(text, "Title First bold bit.");
    }

    #[test]
    fn excerpt_cuts_on_char_boundary() {
        assert_eq!(excerpt("short", 10), "short");
        assert_eq!(excerpt("ação ação ação", 4), "ação…");
    }

    #[test]
    fn cookie_value_finds_named_cookie() {
        let header = "theme=dark; nd_viewer=abc-123; other=1";
        assert_eq!(cookie_value(header, "nd_viewer"), Some("abc-123"));
        assert_eq!(cookie_value(header, "missing"), None);
    }
}
