//! Response body rendering.
//!
//! Two independent outputs live here:
//! - the `DAV:` multistatus documents returned by PROPFIND and PROPPATCH
//! - a minimal HTML index for browsers issuing a plain GET on a collection

use crate::error::DavResult;
use crate::resource::{Resource, ResourceKind};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::fmt::Write as _;
use std::io::Write;
use xml::common::XmlVersion;
use xml::writer::{EmitterConfig, EventWriter, XmlEvent};

/// Characters left unescaped inside a single href segment.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

const STATUS_OK: &str = "HTTP/1.1 200 OK";

/// Build the href for a logical path, percent-encoding each segment.
///
/// Collections get a trailing slash, files never do.
pub fn href(path: &str, is_collection: bool) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        out.push('/');
        out.extend(utf8_percent_encode(segment, SEGMENT));
    }
    if is_collection || out.is_empty() {
        out.push('/');
    }
    out
}

/// Render a PROPFIND multistatus document, one response per resource.
pub fn multistatus(resources: &[Resource]) -> DavResult<Vec<u8>> {
    let mut w = new_writer();
    start_multistatus(&mut w)?;

    for resource in resources {
        w.write(XmlEvent::start_element("D:response"))?;
        text_element(&mut w, "D:href", &href(&resource.path, resource.is_collection()))?;

        w.write(XmlEvent::start_element("D:propstat"))?;
        w.write(XmlEvent::start_element("D:prop"))?;
        text_element(&mut w, "D:displayname", &resource.name)?;
        text_element(&mut w, "D:getlastmodified", &resource.last_modified())?;

        w.write(XmlEvent::start_element("D:resourcetype"))?;
        if resource.is_collection() {
            w.write(XmlEvent::start_element("D:collection"))?;
            w.write(XmlEvent::end_element())?;
        }
        w.write(XmlEvent::end_element())?;

        if let ResourceKind::File { size, content_type } = resource.kind {
            text_element(&mut w, "D:getcontentlength", &size.to_string())?;
            text_element(&mut w, "D:getcontenttype", content_type)?;
        }

        w.write(XmlEvent::end_element())?; // prop
        text_element(&mut w, "D:status", STATUS_OK)?;
        w.write(XmlEvent::end_element())?; // propstat
        w.write(XmlEvent::end_element())?; // response
    }

    w.write(XmlEvent::end_element())?; // multistatus
    Ok(w.into_inner())
}

/// Render the PROPPATCH acknowledgement for `href`.
///
/// Properties are not stored; the document only reports success.
pub fn proppatch_ack(href: &str) -> DavResult<Vec<u8>> {
    let mut w = new_writer();
    start_multistatus(&mut w)?;
    w.write(XmlEvent::start_element("D:response"))?;
    text_element(&mut w, "D:href", href)?;
    w.write(XmlEvent::start_element("D:propstat"))?;
    w.write(XmlEvent::start_element("D:prop"))?;
    w.write(XmlEvent::end_element())?;
    text_element(&mut w, "D:status", STATUS_OK)?;
    w.write(XmlEvent::end_element())?;
    w.write(XmlEvent::end_element())?;
    w.write(XmlEvent::end_element())?;
    Ok(w.into_inner())
}

/// Render a browsable HTML index of a collection.
///
/// Subdirectories are listed before files; the parent link is omitted at
/// the storage root.
pub fn directory_index(dir: &Resource, children: &[Resource]) -> String {
    let title = escape_html(&href_display(&dir.path));
    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n");
    let _ = writeln!(
        html,
        "<html><head><meta charset=\"utf-8\"><title>Directory: {title}</title></head><body>"
    );
    let _ = writeln!(html, "<h1>Directory: {title}</h1>");
    html.push_str("<ul>\n");

    if dir.path != "/" {
        let parent = dir.path.rsplit_once('/').map_or("/", |(p, _)| p);
        let _ = writeln!(
            html,
            "<li><a href=\"{}\">Parent Directory</a></li>",
            href(parent, true)
        );
    }

    for child in children.iter().filter(|c| c.is_collection()) {
        let _ = writeln!(
            html,
            "<li><a href=\"{}\">{}/</a></li>",
            href(&child.path, true),
            escape_html(&child.name)
        );
    }
    for child in children.iter().filter(|c| !c.is_collection()) {
        let _ = writeln!(
            html,
            "<li><a href=\"{}\">{}</a> ({})</li>",
            href(&child.path, false),
            escape_html(&child.name),
            format_bytes(child.size())
        );
    }

    html.push_str("</ul></body></html>\n");
    html
}

/// Format a byte count with binary units, e.g. `1536 -> "1.5 KB"`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let formatted = format!("{value:.2}");
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed} {}", UNITS[unit])
}

fn href_display(path: &str) -> String {
    if path == "/" {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn new_writer() -> EventWriter<Vec<u8>> {
    EmitterConfig::new()
        .perform_indent(true)
        .create_writer(Vec::new())
}

fn start_multistatus<W: Write>(w: &mut EventWriter<W>) -> xml::writer::Result<()> {
    w.write(XmlEvent::StartDocument {
        version: XmlVersion::Version10,
        encoding: Some("utf-8"),
        standalone: None,
    })?;
    w.write(XmlEvent::start_element("D:multistatus").ns("D", "DAV:"))
}

fn text_element<W: Write>(w: &mut EventWriter<W>, name: &str, text: &str) -> xml::writer::Result<()> {
    w.write(XmlEvent::start_element(name))?;
    w.write(XmlEvent::characters(text))?;
    w.write(XmlEvent::end_element())
}
