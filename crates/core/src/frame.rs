//! Segmentation of the controller's event stream into XML fragments.
//!
//! The feed has no message boundaries of its own: on the raw socket the
//! events arrive as HTTP-framed posts interleaved with headers, and any read
//! may carry part of a fragment, one fragment, or several. A fragment runs
//! from an `<?xml` processing instruction to the close of the root element
//! that follows it. Bytes outside fragments are discarded.

const MARKER: &[u8] = b"<?xml";
const DEFAULT_MAX_FRAGMENT: usize = 1 << 20;

#[derive(Debug)]
pub struct FrameExtractor {
    buf: Vec<u8>,
    max_fragment: usize,
}

impl Default for FrameExtractor {
    fn default() -> Self {
        Self::new()
    }
}

enum Scan {
    Complete(usize),
    Incomplete,
}

impl FrameExtractor {
    pub fn new() -> Self {
        Self::with_max_fragment(DEFAULT_MAX_FRAGMENT)
    }

    /// A fragment still incomplete after `max_fragment` bytes is dropped.
    pub fn with_max_fragment(max_fragment: usize) -> Self {
        Self { buf: Vec::new(), max_fragment }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Next complete fragment, or `None` when only a partial one (or
    /// nothing) is buffered. Safe to call again after more data is pushed.
    pub fn next_fragment(&mut self) -> Option<String> {
        loop {
            let Some(start) = find(&self.buf, MARKER) else {
                // keep a tail that might be the start of a split marker
                let keep = self.buf.len().min(MARKER.len() - 1);
                self.buf.drain(..self.buf.len() - keep);
                return None;
            };
            self.buf.drain(..start);

            match scan_fragment(&self.buf) {
                Scan::Complete(end) => {
                    let fragment: Vec<u8> = self.buf.drain(..end).collect();
                    return Some(String::from_utf8_lossy(&fragment).into_owned());
                }
                Scan::Incomplete if self.buf.len() > self.max_fragment => {
                    tracing::warn!(buffered = self.buf.len(), "discarding oversized event fragment");
                    // skip this marker and look for the next one
                    self.buf.drain(..MARKER.len());
                }
                Scan::Incomplete => return None,
            }
        }
    }

    /// All fragments currently complete, in stream order.
    pub fn drain(&mut self) -> Vec<String> {
        std::iter::from_fn(|| self.next_fragment()).collect()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

// End offset of the tag starting at `start` (one past '>'), honoring quotes.
fn tag_end(buf: &[u8], start: usize) -> Option<usize> {
    let mut quote = None;
    for (i, &b) in buf.iter().enumerate().skip(start + 1) {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if b == b'>' => return Some(i + 1),
            None => {}
        }
    }
    None
}

// `buf` starts with the marker.
fn scan_fragment(buf: &[u8]) -> Scan {
    let Some(pi_end) = find(buf, b"?>").map(|i| i + 2) else {
        return Scan::Incomplete;
    };
    let mut depth = 0usize;
    let mut pos = pi_end;
    while let Some(offset) = buf[pos..].iter().position(|&b| b == b'<') {
        let start = pos + offset;
        let rest = &buf[start..];
        if rest.starts_with(b"<!--") {
            match find(rest, b"-->") {
                Some(end) => {
                    pos = start + end + 3;
                    continue;
                }
                None => return Scan::Incomplete,
            }
        }
        if rest.starts_with(b"<![CDATA[") {
            match find(rest, b"]]>") {
                Some(end) => {
                    pos = start + end + 3;
                    continue;
                }
                None => return Scan::Incomplete,
            }
        }
        let Some(end) = tag_end(buf, start) else {
            return Scan::Incomplete;
        };
        let tag = &buf[start..end];
        if tag.starts_with(b"<?") || tag.starts_with(b"<!") {
            // nested declarations or doctype
        } else if tag.starts_with(b"</") {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                return Scan::Complete(end);
            }
        } else if tag.ends_with(b"/>") {
            if depth == 0 {
                return Scan::Complete(end);
            }
        } else {
            depth += 1;
        }
        pos = end;
    }
    Scan::Incomplete
}

#[cfg(test)]
mod tests {
    use super::*;

    const EVENT: &str = r#"<?xml version="1.0"?><Event seqnum="12" sid="uuid:74"><control>ST</control><action>255</action><node>1E 4 58 1</node><eventInfo></eventInfo></Event>"#;

    fn http_wrapped(body: &str) -> String {
        format!(
            "POST reuse_socket HTTP/1.1\r\nHOST:192.168.1.5:80\r\nCONTENT-TYPE:text/xml\r\nCONTENT-LENGTH:{}\r\n\r\n{}",
            body.len(),
            body
        )
    }

    #[test]
    fn extracts_fragment_from_http_framing() {
        let mut ex = FrameExtractor::new();
        ex.push(http_wrapped(EVENT).as_bytes());
        assert_eq!(ex.drain(), vec![EVENT.to_string()]);
        assert!(ex.buffered() < MARKER.len());
    }

    #[test]
    fn fragment_split_at_every_boundary_yields_one_identical_copy() {
        let data = http_wrapped(EVENT);
        let bytes = data.as_bytes();
        for split in 1..bytes.len() {
            let mut ex = FrameExtractor::new();
            let mut out = Vec::new();
            ex.push(&bytes[..split]);
            out.extend(ex.drain());
            ex.push(&bytes[split..]);
            out.extend(ex.drain());
            assert_eq!(out, vec![EVENT.to_string()], "split at {split}");
        }
    }

    #[test]
    fn byte_at_a_time() {
        let mut ex = FrameExtractor::new();
        let mut out = Vec::new();
        for b in http_wrapped(EVENT).bytes() {
            ex.push(&[b]);
            out.extend(ex.drain());
        }
        assert_eq!(out, vec![EVENT.to_string()]);
    }

    #[test]
    fn several_fragments_in_one_delivery() {
        let second = EVENT.replace("ST", "DON");
        let mut ex = FrameExtractor::new();
        ex.push(format!("{}{}{}", http_wrapped(EVENT), http_wrapped(&second), "POST reuse").as_bytes());
        assert_eq!(ex.drain(), vec![EVENT.to_string(), second]);
    }

    #[test]
    fn nothing_to_extract_is_a_no_op() {
        let mut ex = FrameExtractor::new();
        ex.push(b"");
        assert!(ex.drain().is_empty());
        ex.push(b"HTTP/1.1 200 OK\r\n\r\n");
        assert!(ex.drain().is_empty());
    }

    #[test]
    fn nested_same_name_elements_and_self_closing_children() {
        let doc = r#"<?xml version="1.0"?><Event><eventInfo><Event/><x a=">"></x></eventInfo><node>1</node></Event>"#;
        let mut ex = FrameExtractor::new();
        ex.push(doc.as_bytes());
        ex.push(b"trailing");
        assert_eq!(ex.drain(), vec![doc.to_string()]);
    }

    #[test]
    fn oversized_partial_fragment_is_dropped() {
        let mut ex = FrameExtractor::with_max_fragment(64);
        ex.push(b"<?xml version=\"1.0\"?><Event>");
        ex.push(&[b'x'; 100]);
        assert!(ex.drain().is_empty());
        ex.push(EVENT.as_bytes());
        assert_eq!(ex.drain(), vec![EVENT.to_string()]);
    }
}
