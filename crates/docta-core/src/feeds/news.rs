use chrono::DateTime;
use docta_proto::protocol::{FeedState, NewsEntry, StationState};
use xmltree::Element;

use super::extract::{attr, child, child_text, children, descendant, first_img_src, html_to_text};
use super::extract::{CONTENT_NS, MEDIA_NS};
use super::FeedParser;
use crate::error::FetchError;

pub const UNTITLED: &str = "Sin título";
pub const NO_LINK: &str = "#";

/// RSS 2.0 news parser.
#[derive(Debug, Clone)]
pub struct NewsParser {
    default_source: String,
}

impl NewsParser {
    pub fn new(default_source: impl Into<String>) -> Self {
        Self {
            default_source: default_source.into(),
        }
    }

    fn entry(&self, item: &Element) -> NewsEntry {
        let body_html = child_text(item, None, "description").unwrap_or_default();
        let published_raw = child_text(item, None, "pubDate");
        let published_at = published_raw
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc2822(raw).ok());

        NewsEntry {
            title: child_text(item, None, "title").unwrap_or_else(|| UNTITLED.to_string()),
            link: child_text(item, None, "link").unwrap_or_else(|| NO_LINK.to_string()),
            published_raw,
            published_at,
            source: child_text(item, None, "source")
                .unwrap_or_else(|| self.default_source.clone()),
            body_text: html_to_text(&body_html),
            image_url: image_for(item, &body_html),
            body_html,
        }
    }
}

/// Image cascade, first hit wins: full-content HTML, the first
/// media:content at any depth (feeds often wrap it in media:group),
/// description HTML, then the first enclosure if it is an image.
pub fn image_for(item: &Element, description: &str) -> Option<String> {
    child_text(item, Some(CONTENT_NS), "encoded")
        .and_then(|html| first_img_src(&html))
        .or_else(|| {
            descendant(item, Some(MEDIA_NS), "content")
                .and_then(|media| attr(media, "url"))
                .map(str::to_string)
        })
        .or_else(|| first_img_src(description))
        .or_else(|| {
            child(item, None, "enclosure")
                .filter(|enc| attr(enc, "type").is_some_and(|t| t.starts_with("image/")))
                .and_then(|enc| attr(enc, "url"))
                .map(str::to_string)
        })
}

impl FeedParser for NewsParser {
    type Entry = NewsEntry;
    const NAME: &'static str = "news";

    fn parse(&self, xml: &str) -> Result<Vec<NewsEntry>, FetchError> {
        let root = Element::parse(xml.as_bytes())?;
        let channel = child(&root, None, "channel").unwrap_or(&root);
        Ok(children(channel, None, "item")
            .map(|item| self.entry(item))
            .collect())
    }

    fn slot(state: &mut StationState) -> &mut FeedState<NewsEntry> {
        &mut state.news
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rss(items: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:content="{CONTENT_NS}" xmlns:media="{MEDIA_NS}">
  <channel>
    <title>El Comercial</title>
    {items}
  </channel>
</rss>"#
        )
    }

    fn parse(items: &str) -> Vec<NewsEntry> {
        NewsParser::new("El Comercial").parse(&rss(items)).unwrap()
    }

    #[test]
    fn test_full_content_image_beats_media_content() {
        let entries = parse(
            r#"<item>
                 <title>Crecida del río Paraguay</title>
                 <content:encoded><![CDATA[<p>x</p><img src="https://img.test/full.jpg">]]></content:encoded>
                 <media:content url="https://img.test/media.jpg" medium="image"/>
               </item>"#,
        );
        assert_eq!(entries[0].image_url.as_deref(), Some("https://img.test/full.jpg"));
    }

    #[test]
    fn test_each_cascade_level() {
        let entries = parse(
            r#"<item>
                 <content:encoded><![CDATA[<p>sin imagen</p>]]></content:encoded>
                 <media:content url="https://img.test/media.jpg"/>
               </item>
               <item>
                 <description><![CDATA[<img src="https://img.test/desc.jpg"> texto]]></description>
                 <enclosure url="https://img.test/enc.jpg" type="image/jpeg"/>
               </item>
               <item>
                 <enclosure url="https://img.test/enc.png" type="image/png"/>
               </item>
               <item>
                 <description>solo texto</description>
               </item>"#,
        );
        let images: Vec<_> = entries.iter().map(|e| e.image_url.as_deref()).collect();
        assert_eq!(
            images,
            vec![
                Some("https://img.test/media.jpg"),
                Some("https://img.test/desc.jpg"),
                Some("https://img.test/enc.png"),
                None,
            ]
        );
    }

    #[test]
    fn test_media_content_inside_group() {
        let entries = parse(
            r#"<item>
                 <title>Feria del libro</title>
                 <media:group>
                   <media:title>Portada</media:title>
                   <media:content url="https://img.test/g.jpg" medium="image"/>
                 </media:group>
               </item>"#,
        );
        assert_eq!(entries[0].image_url.as_deref(), Some("https://img.test/g.jpg"));
    }

    #[test]
    fn test_only_first_enclosure_is_considered() {
        let entries = parse(
            r#"<item>
                 <enclosure url="https://audio.test/a.mp3" type="audio/mpeg"/>
                 <enclosure url="https://img.test/enc.png" type="image/png"/>
               </item>"#,
        );
        assert_eq!(entries[0].image_url, None);
    }

    #[test]
    fn test_defaults_and_text_fields() {
        let entries = parse(
            r#"<item>
                 <description>&lt;p&gt;Primer   párrafo&lt;/p&gt;&lt;p&gt;Segundo&lt;/p&gt;</description>
                 <pubDate>Tue, 14 Oct 2025 09:30:00 -0300</pubDate>
               </item>
               <item>
                 <title>Con fuente</title>
                 <link>https://news.test/a</link>
                 <source url="https://news.test">La Mañana</source>
                 <pubDate>ayer</pubDate>
               </item>"#,
        );
        assert_eq!(entries[0].title, UNTITLED);
        assert_eq!(entries[0].link, NO_LINK);
        assert_eq!(entries[0].source, "El Comercial");
        assert_eq!(entries[0].body_text, "Primer párrafo Segundo");
        assert_eq!(entries[0].body_html, "<p>Primer   párrafo</p><p>Segundo</p>");
        assert!(entries[0].published_at.is_some());

        assert_eq!(entries[1].source, "La Mañana");
        assert_eq!(entries[1].published_raw.as_deref(), Some("ayer"));
        assert!(entries[1].published_at.is_none());
    }

    #[test]
    fn test_parse_is_idempotent() {
        let xml = rss(r#"<item><title>A</title><media:content url="https://img.test/a.jpg"/></item>"#);
        let parser = NewsParser::new("El Comercial");
        assert_eq!(parser.parse(&xml).unwrap(), parser.parse(&xml).unwrap());
    }

    #[test]
    fn test_malformed_xml_is_parse_error() {
        let parser = NewsParser::new("El Comercial");
        assert!(matches!(
            parser.parse("<rss><channel><item>"),
            Err(FetchError::Parse(_))
        ));
    }
}
