use ::opml::{Outline, OPML};

use crate::error::{AppError, Result};
use crate::models::FeedSource;

/// Feeds listed in an OPML document, nested outlines included.
///
/// Outlines without a usable `xmlUrl` are skipped, as are repeated urls.
pub fn parse_opml(text: &str) -> Result<Vec<FeedSource>> {
    let document = OPML::from_str(text).map_err(|e| AppError::Opml(e.to_string()))?;

    let mut feeds: Vec<FeedSource> = Vec::new();
    collect_feeds(&document.body.outlines, &mut feeds);
    tracing::info!("Importing OPML, found {} feed(s).", feeds.len());
    Ok(feeds)
}

fn collect_feeds(outlines: &[Outline], feeds: &mut Vec<FeedSource>) {
    for outline in outlines {
        if let Some(url) = outline.xml_url.as_deref() {
            match FeedSource::new(url) {
                Ok(mut feed) => {
                    let title = outline.title.as_deref().map(str::trim).unwrap_or("");
                    let text = outline.text.trim();
                    if !title.is_empty() {
                        feed.name = title.to_string();
                    } else if !text.is_empty() {
                        feed.name = text.to_string();
                    }
                    if feeds.iter().any(|f| f.url == feed.url) {
                        tracing::debug!("(opml) skipping duplicate '{}'", feed.url);
                    } else {
                        feeds.push(feed);
                    }
                }
                Err(e) => tracing::debug!("(opml) skipping outline: {}", e),
            }
        }
        collect_feeds(&outline.outlines, feeds);
    }
}

pub fn export_opml(feeds: &[FeedSource]) -> Result<String> {
    let mut document = OPML::default();
    for feed in feeds {
        document.body.outlines.push(Outline {
            text: feed.name.clone(),
            title: Some(feed.name.clone()),
            xml_url: Some(feed.url.clone()),
            r#type: Some("rss".to_string()),
            ..Outline::default()
        });
    }
    document.to_string().map_err(|e| AppError::Opml(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_outlines_are_imported_once() {
        let text = r#"<?xml version="1.0"?>
<opml version="2.0">
  <head><title>subs</title></head>
  <body>
    <outline text="Tech">
      <outline text="Ars" title="Ars Technica" xmlUrl="https://feeds.arstechnica.com/arstechnica/index" type="rss"/>
      <outline text="Dup" xmlUrl="https://feeds.arstechnica.com/arstechnica/index"/>
    </outline>
    <outline text="Blog" xmlUrl="blog.example.org/feed"/>
    <outline text="broken" xmlUrl="nodot"/>
  </body>
</opml>"#;
        let feeds = parse_opml(text).unwrap();
        assert_eq!(feeds.len(), 2);
        assert_eq!(feeds[0].name, "Ars Technica");
        assert_eq!(feeds[1].name, "Blog");
        assert_eq!(feeds[1].url, "http://blog.example.org/feed");
    }

    #[test]
    fn exported_feeds_can_be_read_back() {
        let feeds = vec![
            FeedSource::new("https://a.example.com/rss").unwrap(),
            FeedSource::new("https://b.example.com/atom").unwrap(),
        ];
        let text = export_opml(&feeds).unwrap();
        assert!(text.contains("xmlUrl=\"https://a.example.com/rss\""));

        let back = parse_opml(&text).unwrap();
        assert_eq!(back, feeds);
    }

    #[test]
    fn json_is_not_opml() {
        assert!(parse_opml("{\"Version\": \"3.1\"}").is_err());
    }
}
