//! DOM helpers shared by the feed parsers.

use std::sync::LazyLock;

use regex::Regex;
use scraper::Html;
use xmltree::{Element, XMLNode};

pub const CONTENT_NS: &str = "http://purl.org/rss/1.0/modules/content/";
pub const MEDIA_NS: &str = "http://search.yahoo.com/mrss/";
pub const ATOM_NS: &str = "http://www.w3.org/2005/Atom";
pub const YOUTUBE_NS: &str = "http://www.youtube.com/xml/schemas/2015";

static IMG_SRC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<img[^>]+src="([^">]+)""#).expect("static regex"));

fn matches(elem: &Element, ns: Option<&str>, name: &str) -> bool {
    elem.name == name && elem.namespace.as_deref() == ns
}

/// Direct element children named `name` in namespace `ns` (`None` for
/// un-namespaced RSS elements).
pub fn children<'a>(
    parent: &'a Element,
    ns: Option<&'a str>,
    name: &'a str,
) -> impl Iterator<Item = &'a Element> + 'a {
    parent.children.iter().filter_map(move |node| match node {
        XMLNode::Element(elem) if matches(elem, ns, name) => Some(elem),
        _ => None,
    })
}

pub fn child<'a>(parent: &'a Element, ns: Option<&'a str>, name: &'a str) -> Option<&'a Element> {
    children(parent, ns, name).next()
}

/// First element named `name` in `ns` anywhere below `parent`, in document
/// order.
pub fn descendant<'a>(parent: &'a Element, ns: Option<&str>, name: &str) -> Option<&'a Element> {
    parent.children.iter().find_map(|node| match node {
        XMLNode::Element(elem) if matches(elem, ns, name) => Some(elem),
        XMLNode::Element(elem) => descendant(elem, ns, name),
        _ => None,
    })
}

/// Trimmed text (including CDATA) of a child; `None` when absent or blank.
pub fn child_text(parent: &Element, ns: Option<&str>, name: &str) -> Option<String> {
    child(parent, ns, name)
        .and_then(|elem| elem.get_text())
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

pub fn attr<'a>(elem: &'a Element, name: &str) -> Option<&'a str> {
    elem.attributes
        .get(name)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

/// `src` of the first `<img>` tag in an HTML snippet.
pub fn first_img_src(html: &str) -> Option<String> {
    IMG_SRC
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Visible text of an HTML snippet with runs of whitespace collapsed.
pub fn html_to_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let text: String = fragment.root_element().text().collect::<Vec<_>>().join(" ");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
