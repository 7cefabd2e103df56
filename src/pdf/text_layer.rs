//! Native text-layer extraction.
//!
//! Pulls per-page plain text plus positioned text runs from the PDF's
//! content streams. Pages with no extractable text (scanned raster pages)
//! yield empty text rather than failing; only a document that cannot be
//! parsed at all is fatal for the file.

use lopdf::{Dictionary, Document, Object};
use thiserror::Error;

/// Errors from text-layer extraction.
#[derive(Debug, Error)]
pub enum TextLayerError {
    /// The bytes are not a parseable PDF. Fatal for this file.
    #[error("document unparseable: {0}")]
    Unparseable(#[from] lopdf::Error),
}

/// A positioned run of text in PDF user space (origin bottom-left).
#[derive(Debug, Clone, PartialEq)]
pub struct TextItem {
    pub text: String,
    pub x: f32,
    pub y: f32,
}

/// Extracted content of one page.
#[derive(Debug, Clone)]
pub struct PageText {
    /// 1-based page number.
    pub page_number: u32,
    /// Plain text, reading order approximated top-to-bottom.
    pub text: String,
    /// Positioned runs, sorted top-to-bottom then left-to-right.
    pub items: Vec<TextItem>,
    /// Page height in points, used to flip coordinates downstream.
    pub page_height: f32,
}

impl PageText {
    /// Non-whitespace character count; the OCR policy's yield signal.
    pub fn char_yield(&self) -> usize {
        self.text.chars().filter(|c| !c.is_whitespace()).count()
    }
}

/// The whole document's native text layer.
#[derive(Debug, Clone)]
pub struct TextLayer {
    pub page_count: u32,
    pub pages: Vec<PageText>,
}

/// Extract the native text layer from raw document bytes.
pub fn extract_text_layer(bytes: &[u8]) -> Result<TextLayer, TextLayerError> {
    let document = Document::load_mem(bytes)?;
    let pages = document.get_pages();
    let page_count = pages.len() as u32;

    let mut out = Vec::with_capacity(pages.len());
    for (&page_number, &page_id) in &pages {
        let items = match extract_page_items(&document, page_id) {
            Ok(items) => items,
            Err(e) => {
                tracing::debug!("no positioned text on page {}: {}", page_number, e);
                Vec::new()
            }
        };
        let page_height = page_height(&document, page_id).unwrap_or(792.0);
        let text = match document.extract_text(&[page_number]) {
            Ok(text) => text,
            Err(_) if !items.is_empty() => join_items(&items),
            Err(e) => {
                tracing::debug!("no text layer on page {}: {}", page_number, e);
                String::new()
            }
        };
        out.push(PageText {
            page_number,
            text,
            items,
            page_height,
        });
    }

    Ok(TextLayer {
        page_count,
        pages: out,
    })
}

/// Reassemble plain text from positioned runs, top-to-bottom.
fn join_items(items: &[TextItem]) -> String {
    let mut text = String::new();
    let mut last_y = f32::INFINITY;
    for item in items {
        if item.y < last_y - 2.0 && !text.is_empty() {
            text.push('\n');
        } else if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(&item.text);
        last_y = item.y;
    }
    text
}

fn page_height(document: &Document, page_id: lopdf::ObjectId) -> Option<f32> {
    let page = document.get_object(page_id).ok()?.as_dict().ok()?;
    let media_box = media_box(document, page)?;
    Some(media_box[3] - media_box[1])
}

fn media_box(document: &Document, page: &Dictionary) -> Option<[f32; 4]> {
    let obj = page.get(b"MediaBox").ok()?;
    let arr = match obj {
        Object::Reference(id) => match document.get_object(*id).ok()? {
            Object::Array(a) => a.clone(),
            _ => return None,
        },
        Object::Array(a) => a.clone(),
        _ => return None,
    };
    let mut bounds = [0.0f32; 4];
    if arr.len() != 4 {
        return None;
    }
    for (i, obj) in arr.iter().enumerate() {
        bounds[i] = match obj {
            Object::Integer(v) => *v as f32,
            Object::Real(v) => *v,
            _ => return None,
        };
    }
    Some(bounds)
}

/// Walk a page's content streams and collect positioned text runs.
///
/// Tracks the text matrix (Tm) and line displacements (Td/TD/T*) and emits
/// one run per Tj/TJ operator. This deliberately ignores rotation and
/// per-glyph kerning; row clustering downstream only needs stable Y bands
/// and left-to-right X order.
fn extract_page_items(
    document: &Document,
    page_id: lopdf::ObjectId,
) -> Result<Vec<TextItem>, lopdf::Error> {
    let page = document.get_object(page_id)?.as_dict()?;
    let contents = page.get(b"Contents")?;
    let content_data = content_data(document, contents)?;
    let content_str = String::from_utf8_lossy(&content_data);

    let mut items = Vec::new();
    let mut cursor_x = 0.0f32;
    let mut cursor_y = 0.0f32;
    let mut line_x = 0.0f32;
    let mut leading = 0.0f32;

    for raw_line in content_str.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_suffix(" Td").or_else(|| line.strip_suffix(" TD")) {
            let parts: Vec<&str> = rest.split_whitespace().collect();
            if parts.len() >= 2 {
                if let (Ok(tx), Ok(ty)) = (
                    parts[parts.len() - 2].parse::<f32>(),
                    parts[parts.len() - 1].parse::<f32>(),
                ) {
                    line_x += tx;
                    cursor_y += ty;
                    cursor_x = line_x;
                    if line.ends_with("TD") {
                        leading = -ty;
                    }
                }
            }
        } else if let Some(rest) = line.strip_suffix(" Tm") {
            let parts: Vec<&str> = rest.split_whitespace().collect();
            if parts.len() >= 6 {
                let vals: Vec<f32> = parts[parts.len() - 6..]
                    .iter()
                    .filter_map(|p| p.parse().ok())
                    .collect();
                if vals.len() == 6 {
                    line_x = vals[4];
                    cursor_x = vals[4];
                    cursor_y = vals[5];
                }
            }
        } else if let Some(rest) = line.strip_suffix(" TL") {
            if let Ok(tl) = rest.trim().parse::<f32>() {
                leading = tl;
            }
        } else if line == "T*" {
            cursor_y -= leading;
            cursor_x = line_x;
        } else if line.ends_with("Tj") || line.ends_with("'") {
            if let Some(text) = literal_string(line) {
                if !text.trim().is_empty() {
                    // Rough advance so consecutive Tj runs on one line keep order.
                    let advance = text.len() as f32 * 6.0;
                    items.push(TextItem {
                        text,
                        x: cursor_x,
                        y: cursor_y,
                    });
                    cursor_x += advance;
                }
            }
        } else if line.ends_with("TJ") {
            if let Some(text) = tj_array_strings(line) {
                if !text.trim().is_empty() {
                    let advance = text.len() as f32 * 6.0;
                    items.push(TextItem {
                        text,
                        x: cursor_x,
                        y: cursor_y,
                    });
                    cursor_x += advance;
                }
            }
        }
    }

    // Top-to-bottom (PDF y grows upward), then left-to-right.
    items.sort_by(|a, b| {
        b.y.partial_cmp(&a.y)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal))
    });

    Ok(items)
}

/// Resolve a Contents entry (reference, stream, or array) to raw bytes.
fn content_data(document: &Document, contents: &Object) -> Result<Vec<u8>, lopdf::Error> {
    match contents {
        Object::Reference(id) => {
            let obj = document.get_object(*id)?;
            content_data(document, obj)
        }
        Object::Stream(stream) => stream.decompressed_content(),
        Object::Array(arr) => {
            let mut data = Vec::new();
            for item in arr {
                data.extend_from_slice(&content_data(document, item)?);
            }
            Ok(data)
        }
        _ => Ok(Vec::new()),
    }
}

/// Text between the outermost parentheses of a Tj operand.
fn literal_string(line: &str) -> Option<String> {
    let start = line.find('(')?;
    let end = line.rfind(')')?;
    if end <= start {
        return None;
    }
    Some(decode_pdf_string(&line[start + 1..end]))
}

/// Concatenated string fragments from a TJ array operand.
fn tj_array_strings(line: &str) -> Option<String> {
    let start = line.find('[')?;
    let end = line.rfind(']')?;
    if end <= start {
        return None;
    }
    let mut result = String::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut current = String::new();
    for ch in line[start + 1..end].chars() {
        if in_string {
            if escaped {
                current.push(ch);
                escaped = false;
            } else if ch == '\\' {
                current.push(ch);
                escaped = true;
            } else if ch == ')' {
                in_string = false;
                result.push_str(&decode_pdf_string(&current));
            } else {
                current.push(ch);
            }
        } else if ch == '(' {
            in_string = true;
            current.clear();
        }
    }
    if result.is_empty() {
        None
    } else {
        Some(result)
    }
}

/// Decode backslash escapes in a PDF literal string.
fn decode_pdf_string(s: &str) -> String {
    let mut result = String::new();
    let mut chars = s.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('r') => result.push('\r'),
                Some('t') => result.push('\t'),
                Some(c @ ('\\' | '(' | ')')) => result.push(c),
                Some(c) => result.push(c),
                None => {}
            }
        } else {
            result.push(ch);
        }
    }
    result
}
