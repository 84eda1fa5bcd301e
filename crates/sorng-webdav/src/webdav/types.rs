//! WebDAV resource types.

use chrono::{DateTime, Utc};
use sorng_remotefs::{path_utils, Attributes, Entry, PathType};

/// `Depth` header of a PROPFIND.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropfindDepth {
    /// The resource itself.
    Zero,
    /// The resource and its direct members.
    One,
}

impl PropfindDepth {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropfindDepth::Zero => "0",
            PropfindDepth::One => "1",
        }
    }
}

/// One `<response>` of a multistatus body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DavResource {
    /// Decoded absolute path of the resource, without a trailing slash.
    pub path: String,
    pub collection: bool,
    pub content_length: Option<u64>,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub content_type: Option<String>,
}

impl DavResource {
    pub fn name(&self) -> String {
        path_utils::file_name(&self.path)
    }

    pub fn attributes(&self) -> Attributes {
        let kind = if self.collection {
            PathType::Directory
        } else {
            PathType::File
        };
        let mut attributes = Attributes::of_kind(kind);
        if !self.collection {
            attributes.size = self.content_length;
        }
        attributes.modified = self.last_modified;
        attributes
    }

    pub fn to_entry(&self) -> Entry {
        Entry {
            name: self.name(),
            attributes: self.attributes(),
        }
    }
}

/// PROPFIND body asking for the properties the backend maps.
pub fn propfind_body() -> &'static str {
    r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:resourcetype/>
    <d:getcontentlength/>
    <d:getlastmodified/>
    <d:getetag/>
    <d:getcontenttype/>
  </d:prop>
</d:propfind>"#
}
