use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

/// Ellipsis appended by [`truncate_with_ellipsis`].
const ELLIPSIS: &str = "...";

static SCRIPT_STYLE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>|<style\b[^>]*>.*?</style\s*>")
        .expect("static regex")
});

/// Tags that separate words when rendered; inline tags are removed without a gap.
static BLOCK_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)</?(?:p|br|div|li|ul|ol|h[1-6]|hr|tr|td|th|table|blockquote|pre|section|article|header|footer|figure|figcaption)\b[^>]*>",
    )
    .expect("static regex")
});

static ANY_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("static regex"));

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("static regex"));

/// Truncates `s` to at most `max_chars` characters (not bytes).
///
/// Returns `Cow::Borrowed` when nothing had to be cut.
pub fn truncate_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => Cow::Owned(s[..byte_idx].to_owned()),
        None => Cow::Borrowed(s),
    }
}

/// Truncates `s` to `max_chars` characters and appends `...` when it was cut.
///
/// ```
/// use feedpush::util::truncate_with_ellipsis;
///
/// assert_eq!(truncate_with_ellipsis("Hello World", 5), "Hello...");
/// assert_eq!(truncate_with_ellipsis("Short", 10), "Short");
/// ```
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> Cow<'_, str> {
    match truncate_chars(s, max_chars) {
        Cow::Borrowed(b) => Cow::Borrowed(b),
        Cow::Owned(mut cut) => {
            cut.push_str(ELLIPSIS);
            Cow::Owned(cut)
        }
    }
}

/// Removes `<![CDATA[` / `]]>` markers, keeping the wrapped text.
pub fn strip_cdata(s: &str) -> Cow<'_, str> {
    if !s.contains("<![CDATA[") && !s.contains("]]>") {
        return Cow::Borrowed(s);
    }
    Cow::Owned(s.replace("<![CDATA[", "").replace("]]>", ""))
}

/// Decodes the XML/HTML entity references that show up in real feeds.
///
/// Handles the five XML entities, `&nbsp;`, `&apos;` and numeric references
/// (`&#39;`, `&#x2F;`). Unknown or malformed references are left untouched.
/// Decoding is a single pass, so `&amp;lt;` becomes `&lt;` and not `<`.
pub fn decode_entities(s: &str) -> Cow<'_, str> {
    if !s.contains('&') {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];

        // Entity names are short; bound the search so a stray '&' is cheap
        let decoded = after
            .char_indices()
            .take(12)
            .find(|&(_, c)| c == ';')
            .and_then(|(semi, _)| decode_entity(&after[..semi]).map(|c| (c, semi)));

        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &after[semi + 1..];
            }
            None => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);

    Cow::Owned(out)
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let num = name.strip_prefix('#')?;
            let code = match num.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => num.parse::<u32>().ok()?,
            };
            char::from_u32(code)
        }
    }
}

/// Collapses every whitespace run to a single space and trims the ends.
pub fn collapse_whitespace(s: &str) -> String {
    WHITESPACE_RUN.replace_all(s, " ").trim().to_owned()
}

/// Reduces an HTML fragment to plain text.
///
/// Drops `<script>`/`<style>` blocks with their content, turns block and
/// break tags into spaces, removes inline tags without a gap, unwraps CDATA,
/// decodes entities and collapses whitespace.
pub fn html_to_text(s: &str) -> String {
    let s = strip_cdata(s);
    let without_blocks = SCRIPT_STYLE_BLOCK.replace_all(&s, "");
    let spaced = BLOCK_TAG.replace_all(&without_blocks, " ");
    let without_tags = ANY_TAG.replace_all(&spaced, "");
    let decoded = decode_entities(&without_tags);
    collapse_whitespace(&strip_control_chars(&decoded))
}

/// Strips control characters other than tab and newline.
///
/// Feed text is attacker-controlled; NULs and escape sequences have no place
/// in a chat message or a published page.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let is_unwanted = |c: char| c.is_control() && c != '\n' && c != '\t';
    if !s.chars().any(is_unwanted) {
        return Cow::Borrowed(s);
    }
    Cow::Owned(s.chars().filter(|&c| !is_unwanted(c)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars_counts_characters_not_bytes() {
        assert_eq!(truncate_chars("日本語テスト", 3), "日本語");
        assert_eq!(truncate_chars("abc", 3), "abc");
        assert!(matches!(truncate_chars("abc", 10), Cow::Borrowed(_)));
        assert_eq!(truncate_chars("abc", 0), "");
    }

    #[test]
    fn test_truncate_with_ellipsis() {
        assert_eq!(truncate_with_ellipsis("Hello World", 5), "Hello...");
        assert_eq!(truncate_with_ellipsis("Hello", 5), "Hello");
    }

    #[test]
    fn test_strip_cdata() {
        assert_eq!(strip_cdata("<![CDATA[Hello & bye]]>"), "Hello & bye");
        assert!(matches!(strip_cdata("plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_decode_named_entities() {
        assert_eq!(
            decode_entities("Tom &amp; Jerry &lt;3 &quot;hi&quot; &apos;x&apos;"),
            "Tom & Jerry <3 \"hi\" 'x'"
        );
        assert_eq!(decode_entities("a&nbsp;b"), "a b");
    }

    #[test]
    fn test_decode_numeric_entities() {
        assert_eq!(decode_entities("it&#39;s &#x2F; &#X41;"), "it's / A");
    }

    #[test]
    fn test_decode_is_single_pass() {
        assert_eq!(decode_entities("&amp;lt;"), "&lt;");
    }

    #[test]
    fn test_decode_leaves_unknown_and_stray_ampersands() {
        assert_eq!(decode_entities("AT&T &bogus; &#xZZ;"), "AT&T &bogus; &#xZZ;");
        assert_eq!(decode_entities("trailing &"), "trailing &");
    }

    #[test]
    fn test_html_to_text() {
        let html = "<![CDATA[<p>Hello <b>world</b></p><script>alert(1)</script>\n\n<style>p{}</style>  &amp; more]]>";
        assert_eq!(html_to_text(html), "Hello world & more");
    }

    #[test]
    fn test_html_to_text_inline_tags_do_not_split_words() {
        assert_eq!(html_to_text("Un<em>believ</em>able news"), "Unbelievable news");
        assert_eq!(
            html_to_text("<p>Rust<b>acean</b>s</p><p>rejoice</p>"),
            "Rustaceans rejoice"
        );
        assert_eq!(html_to_text("one<br/>two<li>three</li>"), "one two three");
    }

    #[test]
    fn test_strip_control_chars() {
        assert_eq!(strip_control_chars("a\x00b\x1b[31mc\nd"), "ab[31mc\nd");
        assert!(matches!(strip_control_chars("clean\ttext"), Cow::Borrowed(_)));
    }
}
