use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::error::FetchError;

/// Upper bound on how much of a rejected body is kept for diagnostics.
const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RssFeed {
    pub title: String,
    pub link: String,
    pub description: String,
    pub items: Vec<RssItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RssItem {
    pub title: String,
    pub link: String,
    pub description: String,
    /// Unparsed `pubDate`; normalized at ingest time.
    pub pub_date: String,
}

/// Parses an RSS 2.0 document and decodes HTML entities in its text fields.
pub fn parse_rss(body: &[u8]) -> Result<RssFeed, FetchError> {
    let mut feed = read_channel(body).map_err(|message| FetchError::Malformed {
        message,
        preview: preview(body),
    })?;

    feed.title = decode_entities(&feed.title);
    feed.description = decode_entities(&feed.description);
    for item in &mut feed.items {
        item.title = decode_entities(&item.title);
        item.description = decode_entities(&item.description);
    }

    Ok(feed)
}

fn read_channel(body: &[u8]) -> Result<RssFeed, String> {
    let mut reader = Reader::from_reader(body);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut path: Vec<String> = Vec::new();
    let mut feed = RssFeed::default();
    let mut seen_channel = false;
    let mut current_item: Option<RssItem> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if name == "channel" {
                    seen_channel = true;
                }
                if name == "item" && parent_is(&path, "channel") {
                    current_item = Some(RssItem::default());
                }
                path.push(name);
            }
            Ok(Event::End(_)) => {
                if let Some(name) = path.pop() {
                    if name == "item" && parent_is(&path, "channel") {
                        if let Some(item) = current_item.take() {
                            feed.items.push(item);
                        }
                    }
                }
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().map_err(|err| {
                    format!("invalid text at byte {}: {err}", reader.buffer_position())
                })?;
                append_text(&path, &mut feed, current_item.as_mut(), &text);
            }
            Ok(Event::CData(e)) => {
                let text = String::from_utf8_lossy(&e.into_inner()).to_string();
                append_text(&path, &mut feed, current_item.as_mut(), &text);
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(format!(
                    "XML parse error at byte {}: {e}",
                    reader.error_position()
                ))
            }
            _ => {}
        }
        buf.clear();
    }

    if !path.is_empty() {
        return Err(format!(
            "unexpected end of document inside <{}>",
            path.join("><")
        ));
    }
    if !seen_channel {
        return Err("document has no <channel> element".to_string());
    }

    Ok(feed)
}

fn parent_is(path: &[String], name: &str) -> bool {
    path.last().is_some_and(|last| last == name)
}

fn append_text(path: &[String], feed: &mut RssFeed, item: Option<&mut RssItem>, text: &str) {
    let [.., parent, field] = path else {
        return;
    };

    let target = match (parent.as_str(), item) {
        ("item", Some(item)) => match field.as_str() {
            "title" => &mut item.title,
            "link" => &mut item.link,
            "description" => &mut item.description,
            "pubDate" => &mut item.pub_date,
            _ => return,
        },
        ("channel", _) => match field.as_str() {
            "title" => &mut feed.title,
            "link" => &mut feed.link,
            "description" => &mut feed.description,
            _ => return,
        },
        _ => return,
    };
    target.push_str(text);
}

fn decode_entities(text: &str) -> String {
    html_escape::decode_html_entities(text).into_owned()
}

fn preview(body: &[u8]) -> String {
    String::from_utf8_lossy(body)
        .chars()
        .take(PREVIEW_CHARS)
        .collect()
}
