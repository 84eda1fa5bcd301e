//! `multistatus` parsing.
//!
//! Elements are matched on their local name so any namespace prefix
//! (`d:`, `D:`, `lp1:`, none) works. Properties are only taken from
//! `propstat` blocks whose status is 2xx.

use crate::webdav::types::DavResource;
use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;
use quick_xml::events::Event;
use quick_xml::Reader;
use sorng_remotefs::{path_utils, RemoteError, RemoteResult};

#[derive(Default)]
struct PropValues {
    collection: bool,
    content_length: Option<u64>,
    last_modified: Option<DateTime<Utc>>,
    etag: Option<String>,
    content_type: Option<String>,
}

/// Parse a PROPFIND response body.
pub fn parse_multistatus(xml: &str) -> RemoteResult<Vec<DavResource>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut resources = Vec::new();
    let mut current: Option<DavResource> = None;
    let mut props = PropValues::default();
    let mut response_ok = true;
    let mut in_propstat = false;
    let mut in_resourcetype = false;
    let mut propstat_ok = true;
    let mut current_tag: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let local = local_name(e.name().as_ref());
                match local.as_str() {
                    "response" => {
                        current = Some(DavResource::default());
                        response_ok = true;
                    }
                    "propstat" => {
                        in_propstat = true;
                        propstat_ok = true;
                        props = PropValues::default();
                    }
                    "resourcetype" => in_resourcetype = true,
                    "collection" if in_resourcetype => props.collection = true,
                    "href" | "status" | "getcontentlength" | "getlastmodified" | "getetag"
                    | "getcontenttype" => current_tag = Some(local),
                    _ => {}
                }
            }
            Ok(Event::Empty(ref e)) => {
                if in_resourcetype && local_name(e.name().as_ref()) == "collection" {
                    props.collection = true;
                }
            }
            Ok(Event::Text(ref e)) => {
                let (Some(tag), Some(res)) = (current_tag.as_deref(), current.as_mut()) else {
                    buf.clear();
                    continue;
                };
                let text = e
                    .unescape()
                    .map_err(|e| RemoteError::protocol(format!("Bad PROPFIND text: {}", e)))?
                    .trim()
                    .to_string();
                match tag {
                    "href" if res.path.is_empty() => res.path = href_to_path(&text),
                    "status" if in_propstat => propstat_ok = status_is_success(&text),
                    "status" => response_ok = status_is_success(&text),
                    "getcontentlength" => props.content_length = text.parse().ok(),
                    "getlastmodified" => props.last_modified = parse_http_date(&text),
                    "getetag" => props.etag = Some(text.trim_matches('"').to_string()),
                    "getcontenttype" => props.content_type = Some(text),
                    _ => {}
                }
            }
            Ok(Event::End(ref e)) => {
                let local = local_name(e.name().as_ref());
                match local.as_str() {
                    "response" => {
                        if let Some(res) = current.take() {
                            if response_ok && !res.path.is_empty() {
                                resources.push(res);
                            }
                        }
                    }
                    "propstat" => {
                        in_propstat = false;
                        if propstat_ok {
                            if let Some(res) = current.as_mut() {
                                merge(res, std::mem::take(&mut props));
                            }
                        }
                    }
                    "resourcetype" => in_resourcetype = false,
                    _ => {
                        if current_tag.as_deref() == Some(local.as_str()) {
                            current_tag = None;
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(RemoteError::protocol(format!(
                    "Malformed PROPFIND response at {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(resources)
}

fn merge(res: &mut DavResource, props: PropValues) {
    res.collection |= props.collection;
    res.content_length = props.content_length.or(res.content_length);
    res.last_modified = props.last_modified.or(res.last_modified);
    res.etag = props.etag.or(res.etag.take());
    res.content_type = props.content_type.or(res.content_type.take());
}

fn local_name(raw: &[u8]) -> String {
    let s = String::from_utf8_lossy(raw);
    match s.rfind(':') {
        Some(pos) => s[pos + 1..].to_string(),
        None => s.to_string(),
    }
}

/// `HTTP/1.1 200 OK` → true.
fn status_is_success(line: &str) -> bool {
    line.split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .map_or(false, |code| (200..300).contains(&code))
}

/// Decoded, normalized remote path of an `href`, which may be an absolute
/// URL or an absolute path.
pub fn href_to_path(href: &str) -> String {
    let path = match url::Url::parse(href) {
        Ok(url) => url.path().to_string(),
        Err(_) => href.split(['?', '#']).next().unwrap_or("").to_string(),
    };
    let decoded = percent_decode_str(&path).decode_utf8_lossy();
    path_utils::normalize(&decoded)
}

/// RFC 1123 / 2822 dates as sent in `getlastmodified`; RFC 3339 as fallback.
pub fn parse_http_date(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(text)
        .or_else(|_| DateTime::parse_from_rfc3339(text))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
