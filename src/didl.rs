use quick_xml::events::{BytesStart, Event};

use crate::{FromXml, XmlReaderExt};

/// One parsed `<container>` or `<item>` out of a DIDL-Lite `Result` document.
#[derive(Debug, Clone)]
pub struct DIDLObject {
    pub id: String,
    pub is_container: bool,
    pub title: String,
    pub basename: String,
    pub cds_class: String,
    /// The object's own serialised XML fragment, kept so callers can render
    /// the raw DIDL element on demand.
    pub element: String,
    /// First `<res>` text content, if present, for lazily fetching the
    /// underlying media resource by URL.
    pub res_url: Option<String>,
}

impl DIDLObject {
    /// Parses one `<container>` or `<item>` start tag and its subtree out of
    /// `r`, positioned just after the start tag has been read.
    pub fn parse<'a>(
        r: &mut quick_xml::Reader<&'a [u8]>,
        start: &BytesStart<'a>,
        is_container: bool,
    ) -> anyhow::Result<Self> {
        let tag_name = start.name();
        let id = start
            .attributes()
            .flatten()
            .find(|attr| attr.key.local_name().as_ref() == b"id")
            .map(|attr| attr.unescape_value().map(|v| v.to_string()))
            .transpose()?;
        let id = match id {
            Some(id) if !id.is_empty() => id,
            _ => {
                tracing::error!("DIDLObject can't be created with null or empty id");
                anyhow::bail!("missing or empty id attribute");
            }
        };

        let mut element = String::from_utf8(start.to_vec())?;
        let mut title = None;
        let mut cds_class = None;
        let mut res_url = None;
        let mut depth = 0usize;

        loop {
            let event = r.read_event_err_eof()?;
            write_event_owned(&mut element, &event)?;
            match &event {
                Event::Start(s) => {
                    depth += 1;
                    if title.is_none() && s.local_name().as_ref() == b"title" {
                        let text = r.read_text()?.into_owned();
                        write_event_owned(&mut element, &Event::Text(text.clone()))?;
                        title = Some(text.unescape()?.into_owned());
                    } else if cds_class.is_none() && s.local_name().as_ref() == b"class" {
                        let text = r.read_text()?.into_owned();
                        write_event_owned(&mut element, &Event::Text(text.clone()))?;
                        cds_class = Some(text.unescape()?.trim().to_owned());
                    } else if res_url.is_none() && s.local_name().as_ref() == b"res" {
                        let text = r.read_text()?.into_owned();
                        write_event_owned(&mut element, &Event::Text(text.clone()))?;
                        res_url = Some(text.unescape()?.into_owned());
                    }
                }
                Event::End(e) if e.name() == tag_name => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                }
                Event::End(_) => {
                    depth = depth.saturating_sub(1);
                }
                _ => {}
            }
        }

        let title = title.unwrap_or_default();
        let cleaned_title = clean_filename(&title);
        let basename = if cleaned_title.is_empty() {
            tracing::warn!(id, "DIDLObject has null or empty <dc:title>");
            format!("_id{id}")
        } else if cleaned_title == "." {
            "._".to_owned()
        } else if cleaned_title == ".." {
            ".._".to_owned()
        } else {
            cleaned_title.clone()
        };

        tracing::debug!(
            kind = if is_container { "container" } else { "item" },
            id,
            title = cleaned_title,
            class = cds_class.as_deref().unwrap_or(""),
            "new DIDLObject"
        );

        Ok(Self {
            id,
            is_container,
            title: cleaned_title,
            basename,
            cds_class: cds_class.unwrap_or_default(),
            element,
            res_url,
        })
    }
}

/// Removes path separators and control characters so a title is safe to use
/// as a filesystem entry name.
pub(crate) fn clean_filename(raw: &str) -> String {
    raw.chars()
        .filter(|c| *c != '/' && *c != '\\' && !c.is_control())
        .collect::<String>()
        .trim()
        .to_owned()
}

fn write_event_owned(buf: &mut String, event: &Event<'_>) -> anyhow::Result<()> {
    let mut w = quick_xml::Writer::new(Vec::new());
    w.write_event(event.borrow())?;
    buf.push_str(std::str::from_utf8(&w.into_inner())?);
    Ok(())
}

/// One logical Browse result's worth of objects: containers first, then
/// items, preserving server order within each group.
#[derive(Debug, Default)]
pub struct Children {
    pub objects: std::sync::Mutex<Vec<DIDLObject>>,
}

impl Children {
    pub fn new(objects: Vec<DIDLObject>) -> Self {
        Self {
            objects: std::sync::Mutex::new(objects),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parses a DIDL-Lite `<DIDL-Lite>` document's direct `<container>` then
/// `<item>` children into an ordered list of [`DIDLObject`]s.
pub fn parse_didl_document(xml: &str) -> anyhow::Result<Vec<DIDLObject>> {
    let mut r = quick_xml::Reader::from_str(xml);
    let root = r.read_to_start()?.into_owned();
    anyhow::ensure!(root.local_name().as_ref() == b"DIDL-Lite");

    let mut containers = Vec::new();
    let mut items = Vec::new();

    loop {
        match r.read_event_err_eof()? {
            Event::Start(start) => match start.local_name().as_ref() {
                b"container" => containers.push(DIDLObject::parse(&mut r, &start, true)?),
                b"item" => items.push(DIDLObject::parse(&mut r, &start, false)?),
                other => {
                    tracing::trace!(tag = ?other, "skipping unknown DIDL-Lite child");
                    r.read_to_end(start.name())?;
                }
            },
            Event::End(end) if end == root.to_end() => break,
            _ => {}
        }
    }

    containers.extend(items);
    Ok(containers)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<DIDL-Lite xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/"
           xmlns:dc="http://purl.org/dc/elements/1.1/"
           xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/">
<container id="1" parentID="0" restricted="1">
<dc:title>Music</dc:title>
<upnp:class> object.container.storageFolder </upnp:class>
</container>
<container id="2" parentID="0" restricted="1">
<dc:title>Video</dc:title>
<upnp:class>object.container.storageFolder</upnp:class>
</container>
<item id="3" parentID="0" restricted="1">
<dc:title>track.mp3</dc:title>
<upnp:class>object.item.audioItem.musicTrack</upnp:class>
<res protocolInfo="http-get:*:audio/mpeg:*">http://host/track.mp3</res>
</item>
</DIDL-Lite>"#;

    #[test]
    fn parses_containers_before_items_preserving_order() {
        let objects = parse_didl_document(SAMPLE).unwrap();
        assert_eq!(objects.len(), 3);
        assert!(objects[0].is_container && objects[0].title == "Music");
        assert!(objects[1].is_container && objects[1].title == "Video");
        assert!(!objects[2].is_container && objects[2].title == "track.mp3");
        assert_eq!(objects[2].res_url.as_deref(), Some("http://host/track.mp3"));
        assert_eq!(objects[0].cds_class, "object.container.storageFolder");
    }

    #[test]
    fn basename_falls_back_when_title_empty_or_dotted() {
        let xml = r#"<DIDL-Lite><item id="42"><upnp:class>object.item</upnp:class></item></DIDL-Lite>"#;
        let objects = parse_didl_document(xml).unwrap();
        assert_eq!(objects[0].basename, "_id42");
    }

    #[test]
    fn missing_id_is_rejected() {
        let xml = r#"<DIDL-Lite><item><dc:title>no id</dc:title></item></DIDL-Lite>"#;
        assert!(parse_didl_document(xml).is_err());
    }
}
