//! Lenient markup reader and writer for the document tree.
//!
//! Covers what the server renders: elements, attributes, text, comments and
//! raw-text elements. Malformed input never fails; unmatched end tags are
//! dropped and unclosed elements end with the input.

use super::{Document, NodeId, NodeKind};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style", "textarea"];

pub(super) fn is_void(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}

fn is_raw_text(tag: &str) -> bool {
    RAW_TEXT_ELEMENTS.contains(&tag)
}

/// Parses `markup` and attaches the result under `parent`, or leaves it
/// detached when `parent` is `None`. Returns the top-level nodes created.
pub(super) fn parse_into(doc: &mut Document, parent: Option<NodeId>, markup: &str) -> Vec<NodeId> {
    let mut builder = TreeBuilder {
        doc,
        base: parent,
        open: Vec::new(),
        top_level: Vec::new(),
    };
    let mut rest = markup;

    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("<!--") {
            let (comment, tail) = match after.find("-->") {
                Some(end) => (&after[..end], &after[end + 3..]),
                None => (after, ""),
            };
            let node = builder.doc.create_comment(comment);
            builder.attach(node);
            rest = tail;
        } else if rest.starts_with("<!") || rest.starts_with("<?") {
            // Doctype and processing instructions carry nothing we mirror.
            rest = match rest.find('>') {
                Some(end) => &rest[end + 1..],
                None => "",
            };
        } else if let Some(after) = rest.strip_prefix("</") {
            let end = after.find('>').unwrap_or(after.len());
            let name = after[..end].trim().to_ascii_lowercase();
            builder.close(&name);
            rest = after.get(end + 1..).unwrap_or("");
        } else if rest.starts_with('<')
            && rest[1..].chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        {
            rest = builder.start_tag(&rest[1..]);
        } else {
            // Text runs to the next '<' that could open markup.
            let end = next_markup(rest);
            let node = builder.doc.create_text(decode_entities(&rest[..end]));
            builder.attach(node);
            rest = &rest[end..];
        }
    }

    builder.top_level
}

fn next_markup(text: &str) -> usize {
    let bytes = text.as_bytes();
    let mut index = 1;
    while index < bytes.len() {
        if bytes[index] == b'<' {
            let next = bytes.get(index + 1).copied();
            if next.is_some_and(|b| b.is_ascii_alphabetic() || b == b'/' || b == b'!' || b == b'?') {
                return index;
            }
        }
        index += 1;
    }
    bytes.len()
}

struct TreeBuilder<'a> {
    doc: &'a mut Document,
    base: Option<NodeId>,
    open: Vec<(NodeId, String)>,
    top_level: Vec<NodeId>,
}

impl TreeBuilder<'_> {
    fn attach(&mut self, node: NodeId) {
        let parent = self.open.last().map(|(id, _)| *id).or(self.base);
        match parent {
            Some(parent) => {
                // Parents come from this builder, so insertion cannot fail.
                let _ = self.doc.append_child(parent, node);
                if self.open.is_empty() {
                    self.top_level.push(node);
                }
            }
            None => self.top_level.push(node),
        }
    }

    fn close(&mut self, name: &str) {
        if let Some(position) = self.open.iter().rposition(|(_, tag)| tag == name) {
            self.open.truncate(position);
        }
    }

    /// Consumes a start tag (without its leading '<') and returns the rest.
    fn start_tag<'s>(&mut self, input: &'s str) -> &'s str {
        let name_end = input
            .find(|c: char| c.is_whitespace() || c == '/' || c == '>')
            .unwrap_or(input.len());
        let tag = input[..name_end].to_ascii_lowercase();
        let element = self.doc.create_element(&tag);
        let mut rest = &input[name_end..];
        let mut self_closing = false;

        loop {
            rest = rest.trim_start();
            if rest.is_empty() {
                break;
            }
            if let Some(tail) = rest.strip_prefix("/>") {
                self_closing = true;
                rest = tail;
                break;
            }
            if let Some(tail) = rest.strip_prefix('>') {
                rest = tail;
                break;
            }
            if let Some(tail) = rest.strip_prefix('/') {
                rest = tail;
                continue;
            }

            let name_end = rest
                .find(|c: char| c.is_whitespace() || c == '=' || c == '>' || c == '/')
                .unwrap_or(rest.len());
            let name = rest[..name_end].to_ascii_lowercase();
            rest = rest[name_end..].trim_start();

            let value = if let Some(tail) = rest.strip_prefix('=') {
                let tail = tail.trim_start();
                let (raw, remaining) = match tail.chars().next() {
                    Some(quote @ ('"' | '\'')) => {
                        let body = &tail[1..];
                        match body.find(quote) {
                            Some(end) => (&body[..end], &body[end + 1..]),
                            None => (body, ""),
                        }
                    }
                    _ => {
                        let end = tail
                            .find(|c: char| c.is_whitespace() || c == '>')
                            .unwrap_or(tail.len());
                        (&tail[..end], &tail[end..])
                    }
                };
                rest = remaining;
                decode_entities(raw)
            } else {
                String::new()
            };

            if !name.is_empty() && !self.doc.has_attr(element, &name) {
                let _ = self.doc.set_attr(element, &name, value);
            }
        }

        self.attach(element);

        if is_raw_text(&tag) && !self_closing {
            let (body, tail) = split_raw_text(rest, &tag);
            if !body.is_empty() {
                let text = if tag == "textarea" {
                    decode_entities(body)
                } else {
                    body.to_string()
                };
                let node = self.doc.create_text(text);
                let _ = self.doc.append_child(element, node);
            }
            return tail;
        }

        if !self_closing && !is_void(&tag) {
            self.open.push((element, tag));
        }
        rest
    }
}

fn split_raw_text<'s>(input: &'s str, tag: &str) -> (&'s str, &'s str) {
    let closing = format!("</{tag}");
    let lowered = input.to_ascii_lowercase();
    match lowered.find(&closing) {
        Some(start) => {
            let after = &input[start..];
            let tail = match after.find('>') {
                Some(end) => &after[end + 1..],
                None => "",
            };
            (&input[..start], tail)
        }
        None => (input, ""),
    }
}

pub(super) fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let candidate = &rest[start..];
        let decoded = candidate
            .find(';')
            .filter(|end| *end <= 10)
            .and_then(|end| decode_entity(&candidate[1..end]).map(|ch| (ch, end)));
        match decoded {
            Some((ch, end)) => {
                out.push(ch);
                rest = &candidate[end + 1..];
            }
            None => {
                out.push('&');
                rest = &candidate[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => {
            let numeric = name.strip_prefix('#')?;
            let code = match numeric.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => numeric.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

fn escape_text(text: &str, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(ch),
        }
    }
}

fn escape_attr(value: &str, out: &mut String) {
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(ch),
        }
    }
}

pub(super) fn serialize(doc: &Document, id: NodeId, out: &mut String) {
    match doc.kind(id) {
        Some(NodeKind::Document) => {
            for child in doc.children(id) {
                serialize(doc, *child, out);
            }
        }
        Some(NodeKind::Text(text)) => {
            let raw_parent = doc
                .parent(id)
                .and_then(|parent| doc.tag(parent))
                .is_some_and(|tag| tag != "textarea" && is_raw_text(tag));
            if raw_parent {
                out.push_str(text);
            } else {
                escape_text(text, out);
            }
        }
        Some(NodeKind::Comment(text)) => {
            out.push_str("<!--");
            out.push_str(text);
            out.push_str("-->");
        }
        Some(NodeKind::Element(element)) => {
            out.push('<');
            out.push_str(element.tag());
            for attr in element.attrs() {
                out.push(' ');
                out.push_str(&attr.name);
                out.push_str("=\"");
                escape_attr(&attr.value, out);
                out.push('"');
            }
            out.push('>');
            if is_void(element.tag()) {
                return;
            }
            for child in doc.children(id) {
                serialize(doc, *child, out);
            }
            out.push_str("</");
            out.push_str(element.tag());
            out.push('>');
        }
        None => {}
    }
}
