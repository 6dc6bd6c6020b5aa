//! Minimal XMPP stanza framing for the GCM connection server.
//!
//! The server only exchanges a handful of flat stanzas, so elements are
//! located by name instead of running a full XML parser. Nested elements
//! sharing the outer element's name are not supported.

/// Namespace of the JSON-carrying `gcm` element.
pub const GCM_NAMESPACE: &str = "google:mobile:data";

/// Closing tag of the XMPP stream.
pub const STREAM_CLOSE: &str = "</stream:stream>";

/// Wraps a JSON document in a `<message><gcm/></message>` stanza.
pub fn encode_gcm_message(json: &str) -> String {
    format!(
        "<message><gcm xmlns='{GCM_NAMESPACE}'>{}</gcm></message>",
        escape_xml(json)
    )
}

/// Returns the unescaped text of the stanza's `gcm` element, if any.
pub fn extract_gcm_payload(stanza: &str) -> Option<String> {
    let bytes = stanza.as_bytes();
    let start = find_start_tag(bytes, "gcm", 0)?;
    let open_end = find(bytes, b">", start)?;
    if bytes[open_end - 1] == b'/' {
        return None;
    }
    let close = find(bytes, b"</gcm>", open_end)?;
    let text = stanza.get(open_end + 1..close)?;
    Some(unescape_xml(text.trim()))
}

/// Returns the text content of the first `<name>` element.
pub fn element_text(stanza: &str, name: &str) -> Option<String> {
    let bytes = stanza.as_bytes();
    let start = find_start_tag(bytes, name, 0)?;
    let open_end = find(bytes, b">", start)?;
    let close_tag = format!("</{name}>");
    let close = find(bytes, close_tag.as_bytes(), open_end)?;
    stanza.get(open_end + 1..close).map(unescape_xml)
}

pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Resolves the predefined entities and numeric character references.
///
/// Unknown or malformed references are kept verbatim.
pub fn unescape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail.find(';').and_then(|semi| {
            let entity = &tail[1..semi];
            let c = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => {
                    if let Some(hex) = entity
                        .strip_prefix("#x")
                        .or_else(|| entity.strip_prefix("#X"))
                    {
                        u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
                    } else if let Some(dec) = entity.strip_prefix('#') {
                        dec.parse::<u32>().ok().and_then(char::from_u32)
                    } else {
                        None
                    }
                }
            };
            c.map(|c| (c, semi))
        });
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Accumulates raw stream bytes and cuts complete elements out of them.
#[derive(Debug, Default)]
pub struct StanzaBuffer {
    buf: Vec<u8>,
}

impl StanzaBuffer {
    /// Appends stream bytes. Leading whitespace keepalives are dropped.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        self.trim_leading_whitespace();
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn contains(&self, needle: &str) -> bool {
        find(&self.buf, needle.as_bytes(), 0).is_some()
    }

    /// Removes and returns the earliest complete element named in `names`.
    ///
    /// Returns the index into `names` and the element text. Anything before
    /// the element (stream headers, whitespace keepalives) is discarded. An
    /// incomplete element leaves the buffer untouched.
    pub fn next_element(&mut self, names: &[&str]) -> Option<(usize, String)> {
        let (index, start) = names
            .iter()
            .enumerate()
            .filter_map(|(i, name)| find_start_tag(&self.buf, name, 0).map(|pos| (i, pos)))
            .min_by_key(|(_, pos)| *pos)?;
        let end = element_end(&self.buf, names[index], start)?;
        let element = String::from_utf8_lossy(&self.buf[start..end]).into_owned();
        self.buf.drain(..end);
        self.trim_leading_whitespace();
        Some((index, element))
    }

    fn trim_leading_whitespace(&mut self) {
        let skip = self
            .buf
            .iter()
            .take_while(|b| b.is_ascii_whitespace())
            .count();
        if skip > 0 {
            self.buf.drain(..skip);
        }
    }
}

fn element_end(buf: &[u8], name: &str, start: usize) -> Option<usize> {
    let open_end = find(buf, b">", start)?;
    if buf[open_end - 1] == b'/' {
        return Some(open_end + 1);
    }
    let close_tag = format!("</{name}>");
    find(buf, close_tag.as_bytes(), open_end).map(|pos| pos + close_tag.len())
}

fn find_start_tag(buf: &[u8], name: &str, from: usize) -> Option<usize> {
    let mut open = Vec::with_capacity(name.len() + 1);
    open.push(b'<');
    open.extend_from_slice(name.as_bytes());
    let mut cursor = from;
    while let Some(pos) = find(buf, &open, cursor) {
        match buf.get(pos + open.len()) {
            Some(b' ' | b'>' | b'/' | b'\t' | b'\r' | b'\n') => return Some(pos),
            // incomplete: the delimiter has not arrived yet
            None => return None,
            Some(_) => cursor = pos + 1,
        }
    }
    None
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

#[cfg(test)]
mod tests {
    use super::{
        element_text, encode_gcm_message, escape_xml, extract_gcm_payload, unescape_xml,
        StanzaBuffer,
    };

    #[test]
    fn outbound_stanza_escapes_json() {
        let stanza = encode_gcm_message(r#"{"to":"a","data":{"m":"<b> & 'c'"}}"#);
        assert_eq!(
            stanza,
            "<message><gcm xmlns='google:mobile:data'>{&quot;to&quot;:&quot;a&quot;,&quot;data&quot;:{&quot;m&quot;:&quot;&lt;b&gt; &amp; &apos;c&apos;&quot;}}</gcm></message>"
        );
        assert_eq!(
            extract_gcm_payload(&stanza).as_deref(),
            Some(r#"{"to":"a","data":{"m":"<b> & 'c'"}}"#)
        );
    }

    #[test]
    fn unescape_handles_numeric_and_unknown_references() {
        assert_eq!(unescape_xml("a&#65;&#x42;c"), "aABc");
        assert_eq!(unescape_xml("x &nbsp; y & z"), "x &nbsp; y & z");
        assert_eq!(unescape_xml("&lt;&gt;&amp;&quot;&apos;"), "<>&\"'");
        assert_eq!(escape_xml("plain"), "plain");
    }

    #[test]
    fn extracts_gcm_payload_from_server_stanza() {
        let stanza = "<message id=\"\"><gcm xmlns=\"google:mobile:data\">\n{\"from\":\"dev\",\"message_id\":\"m1\",\"data\":{\"type\":\"ping\"}}\n</gcm></message>";
        assert_eq!(
            extract_gcm_payload(stanza).as_deref(),
            Some(r#"{"from":"dev","message_id":"m1","data":{"type":"ping"}}"#)
        );
        assert!(extract_gcm_payload("<message><body>hi</body></message>").is_none());
        assert!(extract_gcm_payload("<message><gcm xmlns='x'/></message>").is_none());
    }

    #[test]
    fn buffer_waits_for_complete_element_across_reads() {
        let mut buffer = StanzaBuffer::default();
        buffer.extend(b"  <message><gcm xmlns='google:mobile:data'>{\"a\"");
        assert!(buffer.next_element(&["message"]).is_none());
        buffer.extend(b":1}</gcm></mess");
        assert!(buffer.next_element(&["message"]).is_none());
        buffer.extend(b"age><message><gcm xmlns='google:mobile:data'>{}</gcm></message>");

        let (idx, first) = buffer.next_element(&["message"]).expect("first stanza");
        assert_eq!(idx, 0);
        assert_eq!(extract_gcm_payload(&first).as_deref(), Some(r#"{"a":1}"#));
        let (_, second) = buffer.next_element(&["message"]).expect("second stanza");
        assert_eq!(extract_gcm_payload(&second).as_deref(), Some("{}"));
        assert!(buffer.is_empty());
    }

    #[test]
    fn buffer_returns_earliest_of_several_names() {
        let mut buffer = StanzaBuffer::default();
        buffer.extend(b"<?xml version='1.0'?><stream:stream from='gcm.googleapis.com'>");
        buffer.extend(b"<failure xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><not-authorized/></failure>");
        let (idx, element) = buffer
            .next_element(&["success", "failure"])
            .expect("failure element");
        assert_eq!(idx, 1);
        assert!(element.contains("not-authorized"));

        buffer.extend(b"<success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/>");
        let (idx, _) = buffer
            .next_element(&["success", "failure"])
            .expect("self-closing success");
        assert_eq!(idx, 0);
    }

    #[test]
    fn whitespace_keepalives_do_not_accumulate() {
        let mut buffer = StanzaBuffer::default();
        for _ in 0..3 {
            buffer.extend(b" ");
        }
        buffer.extend(b"\r\n");
        assert!(buffer.is_empty());

        buffer.extend(b" <message/>\n ");
        let (_, element) = buffer.next_element(&["message"]).expect("message");
        assert_eq!(element, "<message/>");
        assert!(buffer.is_empty());
    }

    #[test]
    fn name_prefixes_do_not_match() {
        let mut buffer = StanzaBuffer::default();
        buffer.extend(b"<messages>x</messages>");
        assert!(buffer.next_element(&["message"]).is_none());
        buffer.extend(b"<message/>");
        let (_, element) = buffer.next_element(&["message"]).expect("message");
        assert_eq!(element, "<message/>");
    }

    #[test]
    fn element_text_reads_bound_jid() {
        let iq = "<iq type='result' id='bind-1'><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'><jid>123@gcm.googleapis.com/AB12</jid></bind></iq>";
        assert_eq!(
            element_text(iq, "jid").as_deref(),
            Some("123@gcm.googleapis.com/AB12")
        );
        assert!(element_text(iq, "session").is_none());
    }
}
