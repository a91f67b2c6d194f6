use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;

use crate::error::{AppError, Result};
use crate::feed::text::{clean_description, decode_entities, truncate_chars};
use crate::feed::xml::{Document, Element};
use crate::models::{Article, FeedSource};

const MAX_TITLE_CHARS: usize = 256;
const DATE_ELEMENTS: [&str; 4] = ["dc:date", "pubDate", "published", "updated"];
const IMAGE_ELEMENTS: [&str; 3] = ["enclosure", "media:content", "media:thumbnail"];

static TITLE_CDATA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)title>.*CDATA\[(.*)\]\].*/title").expect("title pattern is valid")
});
static DESCRIPTION_CDATA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)description>.*CDATA\[(.*)\]\].*</description")
        .expect("description pattern is valid")
});
static IMAGE_EXT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.(?:jpe?g|png)").expect("extension pattern is valid"));
static IMG_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(<img[\w\W]+?)/?>|(&lt;img[\w\W]+?)/?(?:>|&gt;)")
        .expect("img pattern is valid")
});
static IMG_SRC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(src=[\w\W]+?)/?(?:>|&gt;)").expect("src pattern is valid")
});
static HTTP_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(https?://[^<>"']+?)[\n"'<]"#).expect("url pattern is valid")
});
static BARE_IMAGE_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(https?://[^<>"'/]+/+[^<>"':]+?\.(?:jpe?g|png).*?)[\n"'<]"#)
        .expect("image url pattern is valid")
});

/// Extracts up to `max_items` articles from a feed document.
///
/// Items that cannot be turned into an article are logged and skipped. Fails
/// only when the document has no recognisable article container.
pub fn parse_feed(text: &str, feed: &FeedSource, max_items: usize) -> Result<Vec<Article>> {
    let doc = Document::parse(text.to_string())?;
    let items = find_items(&doc)?;

    let mut articles = Vec::new();
    for item in items.into_iter().take(max_items) {
        match parse_item(&doc, item, feed) {
            Ok(article) => articles.push(article),
            Err(e) => tracing::warn!(feed = %feed.url, "Cannot process article: {}", e),
        }
    }
    Ok(articles)
}

/// RSS 2 `channel > item`, then Atom `feed > entry`, then any RSS 1 / RDF `item`.
fn find_items(doc: &Document) -> Result<Vec<&Element>> {
    let channel = doc.root.first_descendant("channel");
    if let Some(items) = channel.map(|c| c.descendants("item")).filter(|i| !i.is_empty()) {
        return Ok(items);
    }

    let atom = doc.root.first_descendant("feed");
    if let Some(entries) = atom.map(|f| f.descendants("entry")).filter(|e| !e.is_empty()) {
        return Ok(entries);
    }

    let items = doc.root.descendants("item");
    if items.is_empty() && channel.is_none() && atom.is_none() {
        return Err(AppError::Parse(
            "don't know where to find articles (unsupported feed format?)".to_string(),
        ));
    }
    Ok(items)
}

fn parse_item(doc: &Document, item: &Element, feed: &FeedSource) -> Result<Article> {
    let title = extract_title(doc, item)?;
    let url = extract_url(item)
        .ok_or_else(|| AppError::Parse(format!("Could not find any link to article (title: '{}')", title)))?;

    let mut article = Article::new(title, url);
    article.source = feed.name.clone();
    article.source_url = feed.url.clone();
    article.description = extract_description(doc, item);
    if !feed.suppress_images {
        article.cover = extract_cover(doc, item);
    }
    article.date = extract_date(item);
    article.tags = feed.tags.clone();
    Ok(article)
}

fn child_text<'a>(item: &'a Element, name: &str) -> Option<&'a str> {
    item.first_descendant(name).and_then(Element::first_text)
}

fn extract_title(doc: &Document, item: &Element) -> Result<String> {
    let raw = child_text(item, "title").unwrap_or("");
    let title = decode_entities(truncate_chars(raw, MAX_TITLE_CHARS)).into_owned();
    if !title.trim().is_empty() {
        return Ok(title);
    }

    let scraped = TITLE_CDATA_RE
        .captures(item.source(doc))
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();
    if scraped.is_empty() {
        return Err(AppError::Parse("Got empty title".to_string()));
    }
    Ok(scraped)
}

fn extract_description(doc: &Document, item: &Element) -> String {
    let mut raw = child_text(item, "description")
        .filter(|t| !t.trim().is_empty())
        .or_else(|| child_text(item, "content"))
        .unwrap_or("")
        .to_string();

    if raw.trim().is_empty() {
        if let Some(m) = DESCRIPTION_CDATA_RE
            .captures(item.source(doc))
            .and_then(|cap| cap.get(1))
        {
            raw = m.as_str().to_string();
        }
    }
    clean_description(&raw)
}

fn extract_cover(doc: &Document, item: &Element) -> Option<String> {
    let cover = IMAGE_ELEMENTS
        .iter()
        .find_map(|name| item.first_descendant(name))
        .and_then(|media| {
            let url = media.attr("url")?;
            let is_image = media.attr("type").is_some_and(|t| t.contains("image"))
                || media.attr("medium") == Some("image")
                || IMAGE_EXT_RE.is_match(url);
            is_image.then(|| url.to_string())
        })
        .or_else(|| scan_for_image(doc, item))?;

    Some(decode_entities(&cover).replacen("http://", "https://", 1))
}

/// Looks for an `<img>` in `content:encoded` (or the whole item when absent), then
/// for any bare image url. Advertisement images often sit outside the content.
fn scan_for_image(doc: &Document, item: &Element) -> Option<String> {
    let markup = match item.first_descendant("content:encoded") {
        Some(content) => content.source(doc),
        None => item.source(doc),
    };

    if let Some(tag) = IMG_TAG_RE.find(markup) {
        let src = IMG_SRC_RE.captures(tag.as_str())?.get(1)?;
        let url = HTTP_URL_RE.captures(src.as_str())?.get(1)?;
        return Some(url.as_str().to_string());
    }

    BARE_IMAGE_URL_RE
        .captures(item.source(doc))
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().to_string())
}

fn extract_url(item: &Element) -> Option<String> {
    let url = child_text(item, "link")
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(str::to_string);
    if url.is_some() {
        return url;
    }

    // Atom feeds may carry several links; the alternate one points at the article.
    let links = item.descendants("link");
    let href = if links.len() == 1 {
        links[0].attr("href")
    } else {
        links
            .iter()
            .rev()
            .find(|l| l.attr("rel") == Some("alternate"))
            .and_then(|l| l.attr("href"))
    };
    href.map(|h| decode_entities(h.trim()).into_owned())
        .filter(|h| !h.is_empty())
}

fn extract_date(item: &Element) -> Option<DateTime<Utc>> {
    DATE_ELEMENTS
        .iter()
        .filter_map(|name| child_text(item, name))
        .find_map(|raw| parse_datetime(raw.trim()))
}

pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tag;

    fn feed() -> FeedSource {
        let mut feed = FeedSource::new("https://example.com/rss").unwrap();
        feed.tags = vec![Tag::new("news").unwrap()];
        feed
    }

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/" xmlns:content="http://purl.org/rss/1.0/modules/content/">
  <channel>
    <title>Example</title>
    <item>
      <title>Rocket &amp; moon</title>
      <link>https://example.com/a</link>
      <description>&lt;p&gt;A rocket went up.&lt;/p&gt;</description>
      <pubDate>Tue, 10 Jun 2025 04:00:00 GMT</pubDate>
      <enclosure url="http://cdn.example.com/a.jpg" type="image/jpeg" length="1"/>
    </item>
    <item>
      <title><![CDATA[Second]]></title>
      <link>https://example.com/b</link>
      <content:encoded><![CDATA[<p>x</p><img src="http://img.example.com/b.png" />]]></content:encoded>
    </item>
    <item>
      <title></title>
      <link>https://example.com/c</link>
    </item>
    <item>
      <title>No link</title>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parses_rss2_and_skips_broken_items() {
        let arts = parse_feed(RSS, &feed(), 20).unwrap();
        assert_eq!(arts.len(), 2);

        let a = &arts[0];
        assert_eq!(a.title, "Rocket & moon");
        assert_eq!(a.url, "https://example.com/a");
        assert_eq!(a.description, "A rocket went up.");
        assert_eq!(a.cover.as_deref(), Some("https://cdn.example.com/a.jpg"));
        assert_eq!(a.date.unwrap().to_rfc3339(), "2025-06-10T04:00:00+00:00");
        assert_eq!(a.source, "example.com");
        assert_eq!(a.tags, vec![Tag::new("news").unwrap()]);

        let b = &arts[1];
        assert_eq!(b.title, "Second");
        assert_eq!(b.cover.as_deref(), Some("https://img.example.com/b.png"));
        assert!(b.date.is_none());
    }

    #[test]
    fn falls_back_to_scraping_markup() {
        let rss = r#"<rss><channel>
    <item>
      <title>Hidden body</title>
      <link>https://example.com/c</link>
      <description>
        <![CDATA[<p>Only in cdata</p>]]>
      </description>
    </item>
    <item>
      <title>Escaped image</title>
      <link>https://example.com/d</link>
      <description>Look &lt;img src="http://img.example.com/d.jpg" /&gt; here</description>
    </item>
    <item>
      <title>Bare image</title>
      <link>https://example.com/e</link>
      <guid isPermaLink="false">http://pics.example.com/photos/e.jpg</guid>
    </item>
</channel></rss>"#;
        let arts = parse_feed(rss, &feed(), 20).unwrap();
        assert_eq!(arts.len(), 3);

        assert_eq!(arts[0].description, "Only in cdata");
        assert!(arts[0].cover.is_none());

        assert_eq!(arts[1].cover.as_deref(), Some("https://img.example.com/d.jpg"));
        assert_eq!(arts[1].description, "Look  here");

        assert_eq!(arts[2].cover.as_deref(), Some("https://pics.example.com/photos/e.jpg"));
    }

    #[test]
    fn respects_item_limit_and_image_suppression() {
        let mut feed = feed();
        feed.suppress_images = true;
        let arts = parse_feed(RSS, &feed, 1).unwrap();
        assert_eq!(arts.len(), 1);
        assert!(arts[0].cover.is_none());
    }

    #[test]
    fn parses_atom_alternate_link() {
        let atom = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <title>Atom entry</title>
    <link rel="replies" href="https://blog.example.com/a#comments"/>
    <link rel="alternate" href="https://blog.example.com/a"/>
    <content type="html">Body text</content>
    <updated>2025-06-10T12:00:00Z</updated>
  </entry>
</feed>"#;
        let arts = parse_feed(atom, &feed(), 20).unwrap();
        assert_eq!(arts.len(), 1);
        assert_eq!(arts[0].url, "https://blog.example.com/a");
        assert_eq!(arts[0].description, "Body text");
        assert!(arts[0].date.is_some());
    }

    #[test]
    fn parses_rdf_items_and_dc_date() {
        let rdf = r#"<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel><title>RDF</title></channel>
  <item><title>One</title><link>https://rdf.example.com/1</link><dc:date>2025-01-02</dc:date></item>
</rdf:RDF>"#;
        let arts = parse_feed(rdf, &feed(), 20).unwrap();
        assert_eq!(arts.len(), 1);
        assert_eq!(arts[0].date.unwrap().to_rfc3339(), "2025-01-02T00:00:00+00:00");
    }

    #[test]
    fn unknown_document_is_an_error() {
        assert!(parse_feed("<html><body>nope</body></html>", &feed(), 20).is_err());
    }
}
