//! Reference-list parser for JATS article XML.
//!
//! Walks the article with SAX-style events and pulls, for every `<ref>` inside
//! a `<ref-list>`, its `id`, the text of its first `<article-title>` and the
//! text of its first `<pub-id>`.

use quick_xml::Reader;
use quick_xml::encoding::Decoder;
use quick_xml::errors::{Error as XmlError, IllFormedError};
use quick_xml::events::{BytesEnd, BytesStart, Event};

use crate::IndexError;
use crate::normalize::normalize_title;

/// A reference entry extracted from an article's reference list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRef {
    pub ref_id: String,
    /// Normalized title.
    pub title: String,
    /// First `<pub-id>` text, empty when absent.
    pub pub_id: String,
}

/// Which field we're currently reading text for.
enum Field {
    Title,
    PubId,
}

impl Field {
    fn element_name(&self) -> &[u8] {
        match self {
            Field::Title => b"article-title",
            Field::PubId => b"pub-id",
        }
    }
}

#[derive(Default)]
struct RefState {
    id: Option<String>,
    title: Option<String>,
    pub_id: Option<String>,
}

fn attribute(e: &BytesStart<'_>, key: &[u8], decoder: Decoder) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .map(|a| {
            a.decode_and_unescape_value(decoder)
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| String::from_utf8_lossy(&a.value).into_owned())
        })
}

/// Parse the reference list of a JATS article.
///
/// References without an `id` or without an `<article-title>` cannot be
/// matched to a citation marker by title and are left out. Title text includes
/// the text of inline formatting children (`<italic>`, `<sub>`, ...).
pub fn parse_ref_list(content: &str) -> Result<Vec<ParsedRef>, IndexError> {
    let mut xml = Reader::from_str(content);
    xml.config_mut().trim_text(false);
    xml.config_mut().check_end_names = false;

    let mut refs = Vec::new();
    let mut ref_list_depth = 0usize;
    let mut current: Option<RefState> = None;
    let mut reading: Option<Field> = None;
    let mut text_buf = String::new();

    loop {
        let event = match xml.read_event() {
            Ok(event) => event,
            // A stray end tag empties the reader's tag stack; every later
            // closing tag then comes back as unmatched but is still readable.
            Err(XmlError::IllFormed(IllFormedError::UnmatchedEndTag(name))) => {
                Event::End(BytesEnd::new(name))
            }
            Err(XmlError::IllFormed(_)) => continue,
            Err(e) => {
                return Err(IndexError::Parse(format!(
                    "at byte {}: {e}",
                    xml.buffer_position()
                )));
            }
        };
        match event {
            Event::Start(ref e) => match e.name().as_ref() {
                b"ref-list" => ref_list_depth += 1,
                b"ref" if ref_list_depth > 0 => {
                    current = Some(RefState {
                        id: attribute(e, b"id", xml.decoder()),
                        ..RefState::default()
                    });
                    reading = None;
                }
                b"article-title" => {
                    if let Some(state) = current.as_ref()
                        && state.title.is_none()
                        && reading.is_none()
                    {
                        reading = Some(Field::Title);
                        text_buf.clear();
                    }
                }
                b"pub-id" => {
                    if let Some(state) = current.as_ref()
                        && state.pub_id.is_none()
                        && reading.is_none()
                    {
                        reading = Some(Field::PubId);
                        text_buf.clear();
                    }
                }
                // Sub-elements (e.g. <italic> inside <article-title>): keep accumulating
                _ => {}
            },

            Event::Text(ref e) => {
                if reading.is_some() {
                    match e.unescape() {
                        Ok(text) => text_buf.push_str(&text),
                        Err(_) => text_buf.push_str(&String::from_utf8_lossy(e)),
                    }
                }
            }

            Event::CData(ref e) => {
                if reading.is_some() {
                    text_buf.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }

            Event::End(ref e) => {
                let name = e.name();
                let name_ref = name.as_ref();

                if let Some(field) = reading.as_ref()
                    && name_ref == field.element_name()
                {
                    if let Some(state) = current.as_mut() {
                        match field {
                            Field::Title => state.title = Some(normalize_title(&text_buf)),
                            Field::PubId => state.pub_id = Some(text_buf.trim().to_string()),
                        }
                    }
                    reading = None;
                } else if name_ref == b"ref" {
                    if let Some(RefState {
                        id: Some(ref_id),
                        title: Some(title),
                        pub_id,
                    }) = current.take()
                        && !title.is_empty()
                    {
                        refs.push(ParsedRef {
                            ref_id,
                            title,
                            pub_id: pub_id.unwrap_or_default(),
                        });
                    }
                    reading = None;
                } else if name_ref == b"ref-list" {
                    ref_list_depth = ref_list_depth.saturating_sub(1);
                }
            }

            Event::Eof => break,
            _ => {}
        }
    }

    Ok(refs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_refs_with_titles_and_ids() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE article PUBLIC "-//NLM//DTD JATS (Z39.96) Journal Archiving and Interchange DTD v1.0 20120330//EN" "JATS-archivearticle1.dtd">
<article>
<back><ref-list><title>References</title>
  <ref id="CR1"><mixed-citation publication-type="journal">
    <person-group><name><surname>LeCun</surname></name></person-group>
    <article-title>Deep <italic>learning</italic></article-title>
    <source>Nature</source>
    <pub-id pub-id-type="doi">10.1038/nature14539</pub-id>
    <pub-id pub-id-type="pmid">26017442</pub-id>
  </mixed-citation></ref>
  <ref id="CR2"><element-citation>
    <article-title>Attention Is All
      You Need</article-title>
  </element-citation></ref>
</ref-list></back>
</article>"#;

        let refs = parse_ref_list(xml).unwrap();
        assert_eq!(
            refs,
            vec![
                ParsedRef {
                    ref_id: "CR1".into(),
                    title: "deep learning".into(),
                    pub_id: "10.1038/nature14539".into(),
                },
                ParsedRef {
                    ref_id: "CR2".into(),
                    title: "attention is all you need".into(),
                    pub_id: String::new(),
                },
            ]
        );
    }

    #[test]
    fn skips_refs_without_title_or_id() {
        let xml = r#"<article><back><ref-list>
  <ref id="r1"><mixed-citation>Anonymous. Some book. 1999.</mixed-citation></ref>
  <ref><element-citation><article-title>Orphan</article-title></element-citation></ref>
  <ref id="r3"><element-citation><article-title>Kept</article-title></element-citation></ref>
</ref-list></back></article>"#;
        let refs = parse_ref_list(xml).unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].ref_id, "r3");
        assert_eq!(refs[0].title, "kept");
    }

    #[test]
    fn ignores_titles_outside_ref_list() {
        let xml = r#"<article><front><article-meta><title-group>
  <article-title>The citing article</article-title></title-group></article-meta></front>
<body><ref id="x"><article-title>Not a reference</article-title></ref></body>
</article>"#;
        assert!(parse_ref_list(xml).unwrap().is_empty());
    }

    #[test]
    fn unescapes_entities() {
        let xml = r#"<ref-list><ref id="a"><article-title>Cats &amp; Dogs</article-title></ref></ref-list>"#;
        let refs = parse_ref_list(xml).unwrap();
        assert_eq!(refs[0].title, "cats & dogs");
    }

    #[test]
    fn article_without_ref_list_is_empty() {
        assert!(parse_ref_list("<article><body/></article>").unwrap().is_empty());
    }

    #[test]
    fn stray_end_tags_keep_the_article() {
        let xml = r#"<article><body><p>Text</span> more</p></body>
<back><ref-list>
  <ref id="r1"><element-citation><article-title>First</article-title>
    <pub-id pub-id-type="doi">10.1/one</pub-id></element-citation></ref>
  <ref id="r&amp;2"><element-citation><article-title>Second</article-title></element-citation></ref>
</ref-list></back>
</article>"#;
        let refs = parse_ref_list(xml).unwrap();
        let ids: Vec<&str> = refs.iter().map(|r| r.ref_id.as_str()).collect();
        assert_eq!(ids, vec!["r1", "r&2"]);
        assert_eq!(refs[0].pub_id, "10.1/one");
    }

    #[test]
    fn malformed_markup_is_an_error() {
        assert!(parse_ref_list("<ref-list><ref id=\"a\"><!-- never closed").is_err());
    }
}
