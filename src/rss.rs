//! RSS 2.0 rendering of a feed snapshot.

use std::fmt::Write as _;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use url::Url;

use crate::embed::encode;
use crate::feed::{parse_time, FeedSnapshot};
use crate::store::sort_newest_first;

const GENERATOR: &str = "livespot";

pub fn to_rss(snapshot: &FeedSnapshot, origin: &str, now: DateTime<Utc>) -> Result<String> {
    let origin = Url::parse(origin.trim()).with_context(|| format!("invalid RSS origin {origin}"))?;

    let title = snapshot.title();
    let updated = snapshot
        .meta
        .updated_at
        .as_deref()
        .and_then(parse_time)
        .unwrap_or(now);

    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<rss version=\"2.0\">\n<channel>\n");
    let _ = writeln!(xml, "  <title>{}</title>", escape(title));
    let _ = writeln!(xml, "  <link>{}</link>", escape(&absolute(&origin, "/")));
    let _ = writeln!(xml, "  <description>{}</description>", escape(&format!("RSS for {title}")));
    let _ = writeln!(xml, "  <lastBuildDate>{}</lastBuildDate>", rfc1123(updated));
    let _ = writeln!(xml, "  <generator>{GENERATOR}</generator>");

    for post in sort_newest_first(snapshot.posts.clone()) {
        let id = encode(&post.key());
        let published = post.timestamp().unwrap_or(updated);
        xml.push_str("  <item>\n");
        let _ = writeln!(xml, "    <title>{}</title>", escape(post.display_title()));
        let _ = writeln!(xml, "    <link>{}</link>", escape(&absolute(&origin, &format!("/#{id}"))));
        let _ = writeln!(
            xml,
            "    <guid isPermaLink=\"false\">{}</guid>",
            escape(&absolute(&origin, &format!("/posts/{id}")))
        );
        let _ = writeln!(xml, "    <pubDate>{}</pubDate>", rfc1123(published));
        let _ = writeln!(xml, "    <description>{}</description>", escape(post.description()));
        if let Some(image) = post.images.iter().find(|image| !image.is_empty()) {
            let _ = writeln!(
                xml,
                "    <enclosure url=\"{}\" type=\"image/jpeg\" />",
                escape(&absolute(&origin, image))
            );
        }
        xml.push_str("  </item>\n");
    }

    xml.push_str("</channel>\n</rss>\n");
    Ok(xml)
}

fn absolute(origin: &Url, reference: &str) -> String {
    origin
        .join(reference)
        .map(String::from)
        .unwrap_or_else(|_| origin.to_string())
}

fn rfc1123(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap()
    }

    fn snapshot(json: &str) -> FeedSnapshot {
        FeedSnapshot::from_json(json.as_bytes()).unwrap()
    }

    #[test]
    fn channel_defaults_for_empty_feed() {
        let xml = to_rss(&FeedSnapshot::default(), "https://live.example", now()).unwrap();
        assert!(xml.contains("<title>Live Feed</title>"));
        assert!(xml.contains("<link>https://live.example/</link>"));
        assert!(xml.contains("<description>RSS for Live Feed</description>"));
        assert!(xml.contains("<lastBuildDate>Wed, 01 May 2024 09:30:00 GMT</lastBuildDate>"));
        assert!(!xml.contains("<item>"));
    }

    #[test]
    fn items_are_newest_first_with_links() {
        let feed = snapshot(
            r#"{"meta":{"title":"Q&A night","updated_at":"2024-04-30T20:00:00Z"},
                "posts":[
                  {"id":"old one","time":"2024-04-30T10:00:00Z","title":"Old"},
                  {"id":"new","time":"2024-04-30T18:00:00Z","title":"<b>New</b>",
                   "images":["/img/a.jpg"]}
                ]}"#,
        );
        let xml = to_rss(&feed, "https://live.example", now()).unwrap();
        assert!(xml.contains("<title>Q&amp;A night</title>"));
        assert!(xml.contains("<lastBuildDate>Tue, 30 Apr 2024 20:00:00 GMT</lastBuildDate>"));
        assert!(xml.find("&lt;b&gt;New&lt;/b&gt;").unwrap() < xml.find("<title>Old</title>").unwrap());
        assert!(xml.contains("<link>https://live.example/#old%20one</link>"));
        assert!(xml.contains("<guid isPermaLink=\"false\">https://live.example/posts/new</guid>"));
        assert!(xml.contains("<pubDate>Tue, 30 Apr 2024 18:00:00 GMT</pubDate>"));
        assert!(xml.contains("<enclosure url=\"https://live.example/img/a.jpg\" type=\"image/jpeg\" />"));
    }

    #[test]
    fn rejects_unparsable_origin() {
        assert!(to_rss(&FeedSnapshot::default(), "not an origin", now()).is_err());
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(escape(r#"<a href="x">it's & more</a>"#), "&lt;a href=&quot;x&quot;&gt;it&apos;s &amp; more&lt;/a&gt;");
    }
}
