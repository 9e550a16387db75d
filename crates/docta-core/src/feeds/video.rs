use docta_proto::protocol::{FeedState, StationState, VideoEntry};
use xmltree::Element;

use super::extract::{attr, child, child_text, children, ATOM_NS, MEDIA_NS, YOUTUBE_NS};
use super::news::UNTITLED;
use super::FeedParser;
use crate::error::FetchError;

/// YouTube playlist (Atom) parser.  Entries without a video id are dropped.
#[derive(Debug, Clone, Default)]
pub struct VideoParser;

fn entry(elem: &Element) -> Option<VideoEntry> {
    let id = child_text(elem, Some(YOUTUBE_NS), "videoId")?;
    let thumbnail_url = child(elem, Some(MEDIA_NS), "group")
        .and_then(|group| child(group, Some(MEDIA_NS), "thumbnail"))
        .and_then(|thumb| attr(thumb, "url"))
        .map(str::to_string);
    Some(VideoEntry {
        id,
        title: child_text(elem, Some(ATOM_NS), "title").unwrap_or_else(|| UNTITLED.to_string()),
        thumbnail_url,
    })
}

impl FeedParser for VideoParser {
    type Entry = VideoEntry;
    const NAME: &'static str = "videos";

    fn parse(&self, xml: &str) -> Result<Vec<VideoEntry>, FetchError> {
        let root = Element::parse(xml.as_bytes())?;
        Ok(children(&root, Some(ATOM_NS), "entry")
            .filter_map(entry)
            .collect())
    }

    fn slot(state: &mut StationState) -> &mut FeedState<VideoEntry> {
        &mut state.videos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAYLIST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns:yt="http://www.youtube.com/xml/schemas/2015" xmlns:media="http://search.yahoo.com/mrss/" xmlns="http://www.w3.org/2005/Atom">
  <title>Lista</title>
  <entry>
    <yt:videoId>dQw4w9WgXcQ</yt:videoId>
    <title>Chamamé en vivo</title>
    <media:group>
      <media:title>Chamamé en vivo</media:title>
      <media:thumbnail url="https://i.ytimg.test/vi/dQw4w9WgXcQ/hqdefault.jpg" width="480" height="360"/>
    </media:group>
  </entry>
  <entry>
    <title>Sin id</title>
  </entry>
  <entry>
    <yt:videoId>abc123</yt:videoId>
    <title>Sin miniatura</title>
  </entry>
  <entry>
    <yt:videoId>notitle</yt:videoId>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_playlist() {
        let videos = VideoParser.parse(PLAYLIST).unwrap();
        assert_eq!(videos.len(), 3, "entry without id is dropped");
        assert_eq!(videos[0].id, "dQw4w9WgXcQ");
        assert_eq!(videos[0].title, "Chamamé en vivo");
        assert_eq!(
            videos[0].thumbnail_url.as_deref(),
            Some("https://i.ytimg.test/vi/dQw4w9WgXcQ/hqdefault.jpg")
        );
        assert_eq!(videos[1].thumbnail_url, None);
        assert_eq!(videos[2].title, UNTITLED);
    }

    #[test]
    fn test_malformed_feed() {
        assert!(matches!(
            VideoParser.parse("not xml at all"),
            Err(FetchError::Parse(_))
        ));
    }
}
