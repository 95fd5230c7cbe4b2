//! Support for creating Atom feeds from channel descriptions built by
//! embedded code. The feed writer runs eagerly during evaluation, outside
//! the synchronizer's write step. The feed's `updated` stamp is derived
//! from the newest item date rather than the wall clock, so repeated passes
//! over unchanged input produce byte-identical feeds.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;

use atom_syndication::{Entry, Error as AtomError, Feed, Link, Person};
use chrono::{
    DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, ParseError, TimeZone,
};
use url::Url;

use crate::value::Value;

/// Serializes a channel+item description to Atom XML and writes it to `w`.
///
/// The channel is an object with required `title` and `link` keys, an
/// optional `id` (defaults to the link), an optional `author` (a
/// `{name, email}` object or a plain string), and an optional `items` list.
/// Each item is an object with required `title`, `link`, and `date`
/// (`YYYY-MM-DD`) keys and an optional `summary`.
pub fn write<W: Write>(channel: &Value, w: W) -> Result<()> {
    build(channel)?.write_to(w)?;
    Ok(())
}

fn build(channel: &Value) -> Result<Feed> {
    let channel = as_object(channel, "channel")?;
    let title = required(&channel, "title")?;
    let link = Url::parse(&required(&channel, "link")?)?.to_string();
    let id = optional(&channel, "id")?.unwrap_or_else(|| link.clone());
    let authors = authors(channel.get("author"))?;

    let items = match channel.get("items") {
        None => Vec::new(),
        Some(Value::List(items)) => items.borrow().clone(),
        Some(_) => {
            return Err(Error::Channel {
                key: "items",
                expected: "a list",
            })
        }
    };

    // With no items the feed is stamped with the epoch; anything else would
    // make repeated passes differ.
    let mut updated = parse_date("1970-01-01")?;
    let mut entries: Vec<Entry> = Vec::with_capacity(items.len());
    for item in &items {
        let entry = entry(item, &authors)?;
        if entry.updated > updated {
            updated = entry.updated;
        }
        entries.push(entry);
    }

    Ok(Feed {
        entries,
        title: title.into(),
        id,
        updated,
        authors,
        categories: Vec::new(),
        contributors: Vec::new(),
        generator: None,
        icon: None,
        logo: None,
        rights: None,
        subtitle: None,
        base: None,
        lang: None,
        extensions: BTreeMap::new(),
        namespaces: BTreeMap::new(),
        links: vec![Link {
            href: link,
            rel: "alternate".to_owned(),
            title: None,
            hreflang: None,
            mime_type: None,
            length: None,
        }],
    })
}

fn entry(item: &Value, authors: &[Person]) -> Result<Entry> {
    let item = as_object(item, "items")?;
    let link = Url::parse(&required(&item, "link")?)?.to_string();
    let date = parse_date(&required(&item, "date")?)?;

    Ok(Entry {
        id: link.clone(),
        title: required(&item, "title")?.into(),
        updated: date,
        authors: authors.to_vec(),
        links: vec![Link {
            href: link,
            rel: "alternate".to_owned(),
            title: None,
            mime_type: None,
            hreflang: None,
            length: None,
        }],
        rights: None,
        summary: optional(&item, "summary")?.map(Into::into),
        categories: Vec::new(),
        contributors: Vec::new(),
        published: Some(date),
        source: None,
        content: None,
        extensions: BTreeMap::new(),
    })
}

// Item dates carry no time or timezone, so they are pinned to midnight UTC
// before conversion into the fixed-offset representation Atom wants.
fn parse_date(date: &str) -> Result<DateTime<FixedOffset>> {
    let naive_date = NaiveDate::parse_from_str(date, "%Y-%m-%d")?;
    let naive_time = NaiveTime::from_hms(0, 0, 0);
    let naive_date_time = NaiveDateTime::new(naive_date, naive_time);
    Ok(FixedOffset::east(0).from_utc_datetime(&naive_date_time))
}

fn authors(author: Option<&Value>) -> Result<Vec<Person>> {
    match author {
        None => Ok(Vec::new()),
        Some(Value::String(name)) => Ok(vec![Person {
            name: name.clone(),
            email: None,
            uri: None,
        }]),
        Some(value @ Value::Object(_)) => {
            let author = as_object(value, "author")?;
            Ok(vec![Person {
                name: required(&author, "name")?,
                email: optional(&author, "email")?,
                uri: None,
            }])
        }
        Some(_) => Err(Error::Channel {
            key: "author",
            expected: "an object or a string",
        }),
    }
}

fn as_object(value: &Value, key: &'static str) -> Result<BTreeMap<String, Value>> {
    match value {
        Value::Object(map) => Ok(map.borrow().clone()),
        _ => Err(Error::Channel {
            key,
            expected: "an object",
        }),
    }
}

fn required(map: &BTreeMap<String, Value>, key: &'static str) -> Result<String> {
    match map.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        _ => Err(Error::Channel {
            key,
            expected: "a string",
        }),
    }
}

fn optional(map: &BTreeMap<String, Value>, key: &'static str) -> Result<Option<String>> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(Error::Channel {
            key,
            expected: "a string",
        }),
    }
}

/// Represents the result of a feed-writing operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents a problem creating a feed. Variants include I/O, Atom,
/// date-time parsing, URL, and channel-shape issues.
#[derive(Debug)]
pub enum Error {
    /// Returned when there is a generic I/O error.
    Io(std::io::Error),

    /// Returned when there is an Atom-related error.
    Atom(AtomError),

    /// Returned when there is an issue parsing an item's date.
    DateTimeParse(ParseError),

    /// Returned when a channel or item link is not a valid URL.
    UrlParse(url::ParseError),

    /// Returned when the channel description is missing a key or has one of
    /// the wrong shape.
    Channel {
        key: &'static str,
        expected: &'static str,
    },
}

impl fmt::Display for Error {
    /// Implements [`fmt::Display`] for [`Error`].
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(err) => err.fmt(f),
            Error::Atom(err) => err.fmt(f),
            Error::DateTimeParse(err) => err.fmt(f),
            Error::UrlParse(err) => err.fmt(f),
            Error::Channel { key, expected } => {
                write!(f, "feed channel key `{}` must be {}", key, expected)
            }
        }
    }
}

impl std::error::Error for Error {
    /// Implements [`std::error::Error`] for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Atom(err) => Some(err),
            Error::DateTimeParse(err) => Some(err),
            Error::UrlParse(err) => Some(err),
            Error::Channel { .. } => None,
        }
    }
}

impl From<std::io::Error> for Error {
    /// Converts [`std::io::Error`]s into [`Error`]. This allows us to use
    /// the `?` operator in fallible feed operations.
    fn from(err: std::io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<AtomError> for Error {
    /// Converts [`AtomError`]s into [`Error`]. This allows us to use the `?`
    /// operator in fallible feed operations.
    fn from(err: AtomError) -> Error {
        Error::Atom(err)
    }
}

impl From<ParseError> for Error {
    /// Converts [`ParseError`]s into [`Error`]. This allows us to use the
    /// `?` operator in fallible feed operations.
    fn from(err: ParseError) -> Error {
        Error::DateTimeParse(err)
    }
}

impl From<url::ParseError> for Error {
    /// Converts [`url::ParseError`]s into [`Error`]. This allows us to use
    /// the `?` operator when validating links.
    fn from(err: url::ParseError) -> Error {
        Error::UrlParse(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> Value {
        Value::object(
            [
                ("title".to_owned(), Value::from("example")),
                ("link".to_owned(), Value::from("https://example.org/")),
                ("author".to_owned(), Value::from("author")),
                (
                    "items".to_owned(),
                    Value::list(vec![
                        Value::object(
                            [
                                ("title".to_owned(), Value::from("first")),
                                (
                                    "link".to_owned(),
                                    Value::from("https://example.org/first.html"),
                                ),
                                ("date".to_owned(), Value::from("2021-04-16")),
                                ("summary".to_owned(), Value::from("the first post")),
                            ]
                            .into_iter()
                            .collect(),
                        ),
                        Value::object(
                            [
                                ("title".to_owned(), Value::from("second")),
                                (
                                    "link".to_owned(),
                                    Value::from("https://example.org/second.html"),
                                ),
                                ("date".to_owned(), Value::from("2021-05-01")),
                            ]
                            .into_iter()
                            .collect(),
                        ),
                    ]),
                ),
            ]
            .into_iter()
            .collect(),
        )
    }

    #[test]
    fn test_feed_shape() {
        let mut out = Vec::new();
        write(&channel(), &mut out).unwrap();
        let xml = String::from_utf8(out).unwrap();
        assert!(xml.contains("<title>example</title>"), "found: {}", xml);
        assert!(xml.contains("https://example.org/first.html"));
        assert!(xml.contains("2021-05-01"));
    }

    #[test]
    fn test_updated_is_newest_item_date() {
        let feed = build(&channel()).unwrap();
        assert_eq!(feed.updated, parse_date("2021-05-01").unwrap());
    }

    #[test]
    fn test_deterministic() {
        let mut first = Vec::new();
        let mut second = Vec::new();
        write(&channel(), &mut first).unwrap();
        write(&channel(), &mut second).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_title_is_an_error() {
        let channel = Value::object(
            [("link".to_owned(), Value::from("https://example.org/"))]
                .into_iter()
                .collect(),
        );
        match write(&channel, Vec::new()) {
            Err(Error::Channel { key: "title", .. }) => {}
            other => panic!("wanted channel error, found {:?}", other),
        }
    }

    #[test]
    fn test_bad_date_is_an_error() {
        let channel = Value::object(
            [
                ("title".to_owned(), Value::from("example")),
                ("link".to_owned(), Value::from("https://example.org/")),
                (
                    "items".to_owned(),
                    Value::list(vec![Value::object(
                        [
                            ("title".to_owned(), Value::from("bad")),
                            ("link".to_owned(), Value::from("https://example.org/x")),
                            ("date".to_owned(), Value::from("April 16th")),
                        ]
                        .into_iter()
                        .collect(),
                    )]),
                ),
            ]
            .into_iter()
            .collect(),
        );
        match write(&channel, Vec::new()) {
            Err(Error::DateTimeParse(_)) => {}
            other => panic!("wanted date error, found {:?}", other),
        }
    }
}
