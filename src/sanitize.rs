use regex::{Captures, Regex};

/// Markup allowed through ingestion. Anything else loses its tags, text
/// content stays.
const ALLOWED: [&str; 19] = [
    "a", "b", "blockquote", "br", "code", "em", "h1", "h2", "h3", "i", "img", "li", "ol", "p",
    "pre", "s", "strong", "u", "ul",
];

pub fn sanitize_html(raw: &str) -> String {
    ::lazy_static::lazy_static! {
        static ref ELIDED: Regex = Regex::new(
            r"(?is)<script\b[^>]*>.*?</script[^>]*>|<style\b[^>]*>.*?</style[^>]*>|<!--.*?-->",
        )
        .unwrap();
        static ref TAG: Regex = Regex::new(r"<[^>]*>").unwrap();
        static ref NAME: Regex = Regex::new(r"^</?\s*([a-zA-Z][a-zA-Z0-9]*)").unwrap();
    }

    // --- eliding ---

    let elided = ELIDED.replace_all(raw, "");

    // --- rebuilding ---

    TAG.replace_all(&elided, |c: &Captures<'_>| {
        let whole = &c[0];

        let name = match NAME.captures(whole).as_ref().and_then(|c| c.get(1)) {
            Some(m) => m.as_str().to_ascii_lowercase(),
            None => return String::new(),
        };

        if !ALLOWED.contains(&name.as_str()) {
            return String::new();
        }

        if whole.starts_with("</") {
            format!("</{}>", name)
        } else {
            rebuild_tag(&name, whole)
        }
    })
    .into_owned()
}

fn rebuild_tag(name: &str, tag: &str) -> String {
    ::lazy_static::lazy_static! {
        static ref HREF: Regex =
            Regex::new(r#"(?i)\bhref\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#).unwrap();
        static ref SRC: Regex =
            Regex::new(r#"(?i)\bsrc\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#).unwrap();
    }

    let kept = match name {
        "a" => HREF
            .captures(tag)
            .as_ref()
            .and_then(pick)
            .filter(|v| permitted_url(v, &["http://", "https://", "mailto:"]))
            .map(|v| format!(" href=\"{}\"", v)),
        "img" => SRC
            .captures(tag)
            .as_ref()
            .and_then(pick)
            .filter(|v| permitted_url(v, &["http://", "https://"]))
            .map(|v| format!(" src=\"{}\"", v)),
        _ => None,
    };

    format!("<{}{}>", name, kept.unwrap_or_default())
}

fn pick<'t>(c: &Captures<'t>) -> Option<&'t str> {
    c.get(1)
        .or_else(|| c.get(2))
        .or_else(|| c.get(3))
        .map(|m| m.as_str())
}

fn permitted_url(v: &str, schemes: &[&str]) -> bool {
    let lowered = v.trim().to_ascii_lowercase();

    // value is re-emitted inside double quotes
    !v.contains('"') && schemes.iter().any(|s| lowered.starts_with(s))
}

#[test]
fn keeps_allowed_markup() {
    let src = "<p>hello <strong>world</strong></p><br>";

    assert_eq!(sanitize_html(src), src);
}

#[test]
fn strips_script_and_style_with_payload() {
    let out = sanitize_html("a<script>alert(1)</script>b<style>p { }</style>c<!-- d -->");

    assert_eq!(out, "abc");
}

#[test]
fn strips_unknown_tags_keeping_text() {
    let out = sanitize_html("<div><marquee>loud</marquee> quiet</div>");

    assert_eq!(out, "loud quiet");
}

#[test]
fn drops_event_handler_attributes() {
    let out = sanitize_html(r#"<p onclick="steal()">t</p>"#);

    assert_eq!(out, "<p>t</p>");
}

#[test]
fn drops_javascript_urls() {
    let out = sanitize_html(r#"<a href="javascript:alert(1)">x</a>"#);

    assert_eq!(out, "<a>x</a>");
}

#[test]
fn keeps_http_links_and_images() {
    let out = sanitize_html(
        r#"<a href="https://example.com/p">x</a><img src='https://example.com/i.png' onerror="p()">"#,
    );

    assert_eq!(
        out,
        r#"<a href="https://example.com/p">x</a><img src="https://example.com/i.png">"#
    );
}

#[test]
fn survives_case_tricks() {
    let out = sanitize_html(r#"<ScRiPt>alert(1)</ScRiPt><A HREF="JaVaScRiPt:x">y</A>"#);

    assert_eq!(out, "<a>y</a>");
}
