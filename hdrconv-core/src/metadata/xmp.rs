//! Minimal XMP packet primitives.
//!
//! Only what the formats need: wrapping a flat `rdf:Description` into a
//! packet and pulling single attribute values back out.

use crate::limits;
use crate::types::{Error, Result};

/// Serialize a packet with one `rdf:Description` carrying `properties`.
///
/// `namespaces` are `(prefix, uri)` pairs declared on the description.
pub fn generate_packet(namespaces: &[(&str, &str)], properties: &[(&str, String)]) -> String {
    let mut declarations = String::new();
    for (prefix, uri) in namespaces {
        declarations.push_str(&format!("\n        xmlns:{}=\"{}\"", prefix, uri));
    }
    let mut attributes = String::new();
    for (name, value) in properties {
        attributes.push_str(&format!("\n        {}=\"{}\"", name, escape(value)));
    }

    format!(
        r#"<?xpacket begin="" id="W5M0MpCehiHzreSzNTczkc9d"?>
<x:xmpmeta xmlns:x="adobe:ns:meta/" x:xmptk="hdrconv">
  <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
    <rdf:Description rdf:about=""{declarations}{attributes}/>
  </rdf:RDF>
</x:xmpmeta>
<?xpacket end="w"?>"#
    )
}

/// Decode raw packet bytes, enforcing [`limits::MAX_XMP_LENGTH`].
pub fn packet_str(data: &[u8]) -> Result<&str> {
    if data.len() > limits::MAX_XMP_LENGTH {
        return Err(Error::LimitExceeded(format!(
            "XMP packet of {} bytes exceeds maximum {}",
            data.len(),
            limits::MAX_XMP_LENGTH
        )));
    }
    core::str::from_utf8(data).map_err(|e| Error::Metadata(format!("XMP is not UTF-8: {}", e)))
}

/// Extract a property value, accepting both the attribute form
/// (`name="value"`) and the element form (`<name>value</name>`).
pub fn extract_attribute(xmp: &str, attr_name: &str) -> Option<String> {
    let pattern = format!("{}=\"", attr_name);
    if let Some(start) = xmp.find(&pattern) {
        let value_start = start + pattern.len();
        if let Some(end) = xmp[value_start..].find('"') {
            return Some(unescape(&xmp[value_start..value_start + end]));
        }
    }

    let open_tag = format!("<{}>", attr_name);
    let close_tag = format!("</{}>", attr_name);
    if let Some(start) = xmp.find(&open_tag) {
        let value_start = start + open_tag.len();
        if let Some(end) = xmp[value_start..].find(&close_tag) {
            return Some(unescape(xmp[value_start..value_start + end].trim()));
        }
    }

    None
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn unescape(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
