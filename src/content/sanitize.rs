//! HTML to Telegraph node tree conversion.
//!
//! Input is untrusted article HTML. Only a small tag allow-list survives,
//! every attribute except a vetted `href` is dropped, and text is carried
//! as literal text nodes, so nothing from the input can become markup on
//! the published page.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

use crate::util::{collapse_whitespace, decode_entities, strip_control_chars, truncate_chars};

/// Total nodes (elements plus text) kept in one tree.
pub const MAX_NODES: usize = 100;

/// Deepest element nesting kept; deeper elements are dropped.
pub const MAX_DEPTH: usize = 5;

/// Longest text node kept, in characters.
pub const MAX_TEXT_CHARS: usize = 500;

/// Paragraph published when nothing usable remains.
pub const PLACEHOLDER_TEXT: &str = "Content unavailable.";

const ALLOWED_TAGS: &[&str] = &[
    "p",
    "br",
    "strong",
    "b",
    "em",
    "i",
    "u",
    "s",
    "a",
    "code",
    "pre",
    "blockquote",
    "h3",
    "h4",
];

const BLOCK_TAGS: &[&str] = &["p", "pre", "blockquote", "h3", "h4"];

static DANGEROUS_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<!--.*?-->|<(script|style|iframe|form|object|embed|noscript|template|svg|textarea|select)\b[^>]*>.*?</(?:script|style|iframe|form|object|embed|noscript|template|svg|textarea|select)\s*>",
    )
    .expect("static regex")
});

/// Leftover openers of dangerous elements without a closing tag.
static DANGEROUS_OPENER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|iframe|form|object|embed|noscript|template|svg)\b[^>]*>")
        .expect("static regex")
});

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<(/?)([A-Za-z][A-Za-z0-9]*)\b([^>]*)>|([^<]+)|<").expect("static regex")
});

static HREF_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)\bhref\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#).expect("static regex")
});

// ============================================================================
// Node Tree
// ============================================================================

/// One Telegraph content node: a plain string or an element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Node {
    Text(String),
    Element(Element),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Element {
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attrs: Option<Attrs>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attrs {
    pub href: String,
}

impl Node {
    pub fn text(s: impl Into<String>) -> Self {
        Node::Text(s.into())
    }

    pub fn element(tag: &str, children: Vec<Node>) -> Self {
        Node::Element(Element {
            tag: tag.to_string(),
            attrs: None,
            children,
        })
    }

    fn is_block(&self) -> bool {
        matches!(self, Node::Element(e) if BLOCK_TAGS.contains(&e.tag.as_str()))
    }
}

/// The single-paragraph tree used for empty content.
pub fn placeholder() -> Vec<Node> {
    vec![Node::element("p", vec![Node::text(PLACEHOLDER_TEXT)])]
}

// ============================================================================
// Conversion
// ============================================================================

/// Converts untrusted HTML into a bounded, allow-listed node tree.
///
/// Never returns an empty tree; content that sanitizes to nothing yields
/// [`placeholder`].
pub fn html_to_nodes(html: &str) -> Vec<Node> {
    let cleaned = DANGEROUS_BLOCK.replace_all(html, "");
    let cleaned = DANGEROUS_OPENER.replace_all(&cleaned, "");

    let nodes = wrap_inline_runs(build_tree(&cleaned));
    let limited = limit_nodes(nodes, MAX_NODES, MAX_DEPTH);

    if limited.is_empty() {
        placeholder()
    } else {
        limited
    }
}

/// Maps heading levels onto the two Telegraph supports.
fn canonical_tag(name: &str) -> Option<&'static str> {
    let name = name.to_ascii_lowercase();
    let mapped = match name.as_str() {
        "h1" | "h2" => "h3",
        "h5" | "h6" => "h4",
        other => other,
    };
    ALLOWED_TAGS.iter().copied().find(|&t| t == mapped)
}

/// Stack-based tree builder tolerant of unclosed and stray tags.
fn build_tree(html: &str) -> Vec<Node> {
    // stack[0] is the root; each open element holds its tag and pending children
    let mut stack: Vec<(Option<Element>, Vec<Node>)> = vec![(None, Vec::new())];

    for caps in TOKEN.captures_iter(html) {
        if let Some(text) = caps.get(4) {
            let text = decode_entities(text.as_str());
            let text = strip_control_chars(&text);
            let collapsed = collapse_runs(&text);
            if !collapsed.trim().is_empty() {
                push_child(&mut stack, Node::Text(collapsed));
            }
            continue;
        }

        let Some(name) = caps.get(2) else {
            // Lone '<' not starting a tag
            push_child(&mut stack, Node::text("<"));
            continue;
        };
        let closing = caps.get(1).is_some_and(|m| !m.as_str().is_empty());
        let attrs = caps.get(3).map(|m| m.as_str()).unwrap_or("");

        let Some(tag) = canonical_tag(name.as_str()) else {
            continue;
        };

        if closing {
            close_element(&mut stack, tag);
            continue;
        }

        match tag {
            "br" => push_child(
                &mut stack,
                Node::Element(Element {
                    tag: "br".to_string(),
                    attrs: None,
                    children: Vec::new(),
                }),
            ),
            "a" => match safe_href(attrs) {
                Some(href) => stack.push((
                    Some(Element {
                        tag: "a".to_string(),
                        attrs: Some(Attrs { href }),
                        children: Vec::new(),
                    }),
                    Vec::new(),
                )),
                // Links with unsafe targets keep their text only
                None => continue,
            },
            _ => {
                // Self-closing form of a container tag carries nothing
                if attrs.trim_end().ends_with('/') {
                    continue;
                }
                stack.push((
                    Some(Element {
                        tag: tag.to_string(),
                        attrs: None,
                        children: Vec::new(),
                    }),
                    Vec::new(),
                ));
            }
        }
    }

    while stack.len() > 1 {
        pop_element(&mut stack);
    }
    stack.pop().map(|(_, children)| children).unwrap_or_default()
}

fn push_child(stack: &mut [(Option<Element>, Vec<Node>)], node: Node) {
    if let Some((_, children)) = stack.last_mut() {
        children.push(node);
    }
}

fn pop_element(stack: &mut Vec<(Option<Element>, Vec<Node>)>) {
    if stack.len() <= 1 {
        return;
    }
    if let Some((Some(mut element), children)) = stack.pop() {
        element.children = children;
        // Empty formatting elements add nothing
        if !element.children.is_empty() {
            push_child(stack, Node::Element(element));
        }
    }
}

/// Closes the nearest open `tag`, closing anything opened inside it.
/// A closing tag with no matching opener is ignored.
fn close_element(stack: &mut Vec<(Option<Element>, Vec<Node>)>, tag: &str) {
    let Some(depth) = stack
        .iter()
        .rposition(|(el, _)| el.as_ref().is_some_and(|e| e.tag == tag))
    else {
        return;
    };
    while stack.len() > depth {
        pop_element(stack);
    }
}

fn collapse_runs(text: &str) -> String {
    let leading = text.starts_with(char::is_whitespace);
    let trailing = text.ends_with(char::is_whitespace);
    let mut out = String::new();
    if leading {
        out.push(' ');
    }
    out.push_str(&collapse_whitespace(text));
    if trailing && !out.ends_with(' ') {
        out.push(' ');
    }
    out
}

/// Groups top-level inline nodes into paragraphs; blocks stay as they are.
fn wrap_inline_runs(nodes: Vec<Node>) -> Vec<Node> {
    let mut out = Vec::new();
    let mut run: Vec<Node> = Vec::new();

    let flush = |run: &mut Vec<Node>, out: &mut Vec<Node>| {
        let has_content = run.iter().any(|n| match n {
            Node::Text(t) => !t.trim().is_empty(),
            Node::Element(e) => e.tag != "br",
        });
        if has_content {
            out.push(Node::element("p", trim_text_edges(std::mem::take(run))));
        }
        run.clear();
    };

    for node in nodes {
        if node.is_block() {
            flush(&mut run, &mut out);
            out.push(node);
        } else {
            run.push(node);
        }
    }
    flush(&mut run, &mut out);

    out
}

fn trim_text_edges(mut nodes: Vec<Node>) -> Vec<Node> {
    if let Some(Node::Text(t)) = nodes.first_mut() {
        *t = t.trim_start().to_string();
    }
    if let Some(Node::Text(t)) = nodes.last_mut() {
        *t = t.trim_end().to_string();
    }
    nodes.retain(|n| !matches!(n, Node::Text(t) if t.is_empty()));
    nodes
}

/// Returns the decoded `href` unless it uses a script-capable scheme.
///
/// `javascript:` and `vbscript:` are rejected, as is `data:` except for
/// `data:image/`. Whitespace and control characters are ignored while
/// checking, since browsers ignore them inside schemes too.
fn safe_href(attrs: &str) -> Option<String> {
    let caps = HREF_ATTR.captures(attrs)?;
    let raw = caps
        .get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))?
        .as_str();
    let href = decode_entities(raw).trim().to_string();
    if href.is_empty() {
        return None;
    }

    let probe: String = href
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .take(16)
        .collect::<String>()
        .to_ascii_lowercase();

    if probe.starts_with("javascript:") || probe.starts_with("vbscript:") {
        return None;
    }
    if probe.starts_with("data:") && !probe.starts_with("data:image/") {
        return None;
    }

    Some(href)
}

/// Caps total node count and nesting depth; truncates long text nodes.
///
/// Nodes are counted in document order, so the beginning of the article
/// survives intact.
pub fn limit_nodes(nodes: Vec<Node>, max_nodes: usize, max_depth: usize) -> Vec<Node> {
    let mut budget = max_nodes;
    limit_level(nodes, &mut budget, 1, max_depth)
}

fn limit_level(nodes: Vec<Node>, budget: &mut usize, depth: usize, max_depth: usize) -> Vec<Node> {
    let mut out = Vec::new();
    for node in nodes {
        if *budget == 0 {
            break;
        }
        match node {
            Node::Text(text) => {
                *budget -= 1;
                out.push(Node::Text(truncate_chars(&text, MAX_TEXT_CHARS).into_owned()));
            }
            Node::Element(mut element) => {
                if depth > max_depth {
                    continue;
                }
                *budget -= 1;
                element.children = limit_level(element.children, budget, depth + 1, max_depth);
                out.push(Node::Element(element));
            }
        }
    }
    out
}

/// Number of nodes in the tree, elements and text alike.
pub fn count_nodes(nodes: &[Node]) -> usize {
    nodes
        .iter()
        .map(|n| match n {
            Node::Text(_) => 1,
            Node::Element(e) => 1 + count_nodes(&e.children),
        })
        .sum()
}

/// Deepest element nesting in the tree (top-level elements are depth 1).
pub fn max_depth(nodes: &[Node]) -> usize {
    nodes
        .iter()
        .map(|n| match n {
            Node::Text(_) => 0,
            Node::Element(e) => 1 + max_depth(&e.children),
        })
        .max()
        .unwrap_or(0)
}
