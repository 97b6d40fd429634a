//! Native PDF access built on `lopdf`.
//!
//! Pages are read straight from their content streams: text-showing operators
//! become positioned [`TextItem`]s, painted path segments become
//! [`LineSegment`]s, and page resources are inspected for raster images.

#[cfg(test)]
pub(crate) mod fixtures;

use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("PDF file is corrupt or invalid: {0}")]
    Corrupt(String),
    #[error("Password protected PDF not supported")]
    Encrypted,
    #[error("PDF contains no pages")]
    NoPages,
}

/// A run of text placed on the page
#[derive(Debug, Clone, PartialEq)]
pub struct TextItem {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub font_size: f32,
}

/// A straight segment of a painted path, in page space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSegment {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl LineSegment {
    const AXIS_TOLERANCE: f32 = 1.0;

    #[inline]
    pub fn is_horizontal(&self) -> bool {
        (self.y1 - self.y2).abs() <= Self::AXIS_TOLERANCE && self.length() > Self::AXIS_TOLERANCE
    }

    #[inline]
    pub fn is_vertical(&self) -> bool {
        (self.x1 - self.x2).abs() <= Self::AXIS_TOLERANCE && self.length() > Self::AXIS_TOLERANCE
    }

    #[inline]
    pub fn length(&self) -> f32 {
        (self.x2 - self.x1).hypot(self.y2 - self.y1)
    }
}

/// Everything parsed out of one page's content stream
#[derive(Debug, Clone, Default)]
pub struct PageContent {
    pub items: Vec<TextItem>,
    pub segments: Vec<LineSegment>,
    pub has_inline_image: bool,
}

/// A parsed PDF document
pub struct PdfDocument {
    document: Document,
    pages: Vec<ObjectId>,
}

impl std::fmt::Debug for PdfDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfDocument")
            .field("pages", &self.pages.len())
            .finish_non_exhaustive()
    }
}

impl PdfDocument {
    /// Parse a document from memory.
    ///
    /// Encrypted documents and documents without pages are rejected.
    #[inline]
    pub fn load(bytes: &[u8]) -> Result<Self, DocumentError> {
        let document = match Document::load_mem(bytes) {
            Ok(document) => document,
            Err(e) => {
                let message = e.to_string();
                if message.to_lowercase().contains("crypt") {
                    return Err(DocumentError::Encrypted);
                }
                return Err(DocumentError::Corrupt(message));
            }
        };

        if document.is_encrypted() || document.trailer.get(b"Encrypt").is_ok() {
            return Err(DocumentError::Encrypted);
        }

        let pages: Vec<ObjectId> = document.get_pages().into_values().collect();
        if pages.is_empty() {
            return Err(DocumentError::NoPages);
        }

        debug!("Loaded PDF with {} pages", pages.len());
        Ok(Self { document, pages })
    }

    #[inline]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Parse the content stream of a zero-based page
    #[inline]
    pub fn page_content(&self, page_index: usize) -> PageContent {
        let Some(&page_id) = self.pages.get(page_index) else {
            return PageContent::default();
        };

        let bytes = match self.document.get_page_content(page_id) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Could not read content of page {}: {}", page_index + 1, e);
                return PageContent::default();
            }
        };

        match Content::decode(&bytes) {
            Ok(content) => {
                let mut interpreter = ContentInterpreter::default();
                for operation in &content.operations {
                    interpreter.apply(&operation.operator, &operation.operands);
                }
                let mut page = interpreter.finish();
                page.has_inline_image |= contains_inline_image(&bytes);
                page
            }
            Err(e) => {
                warn!("Could not decode content of page {}: {}", page_index + 1, e);
                PageContent {
                    has_inline_image: contains_inline_image(&bytes),
                    ..PageContent::default()
                }
            }
        }
    }

    /// Native text of a zero-based page, one line per visual text line
    #[inline]
    pub fn page_text(&self, page_index: usize) -> String {
        let content = self.page_content(page_index);
        let text = lines_from_items(&content.items).join("\n");
        if !text.trim().is_empty() {
            return text;
        }

        // Text drawn through form XObjects or exotic encodings
        let page_number = u32::try_from(page_index + 1).unwrap_or(u32::MAX);
        self.document
            .extract_text(&[page_number])
            .map(|text| text.trim().to_string())
            .unwrap_or_default()
    }

    /// Whether a zero-based page draws an embedded raster image
    #[inline]
    pub fn page_has_images(&self, page_index: usize) -> bool {
        self.page_resources_have_images(page_index)
            || self.page_content(page_index).has_inline_image
    }

    /// Image XObjects in the page resources, without parsing the content stream
    #[inline]
    pub fn page_resources_have_images(&self, page_index: usize) -> bool {
        let Some(&page_id) = self.pages.get(page_index) else {
            return false;
        };

        self.page_resources(page_id)
            .is_some_and(|resources| self.resources_have_image(resources, 0))
    }

    /// Resources dictionary of a page, inherited from ancestors when absent
    fn page_resources(&self, page_id: ObjectId) -> Option<&Dictionary> {
        let mut node = self.document.get_dictionary(page_id).ok()?;
        for _ in 0..32 {
            if let Ok(resources) = node.get(b"Resources") {
                return self.resolve(resources).as_dict().ok();
            }
            let parent = node.get(b"Parent").ok()?.as_reference().ok()?;
            node = self.document.get_dictionary(parent).ok()?;
        }
        None
    }

    fn resources_have_image(&self, resources: &Dictionary, depth: usize) -> bool {
        let Some(xobjects) = resources
            .get(b"XObject")
            .ok()
            .and_then(|obj| self.resolve(obj).as_dict().ok())
        else {
            return false;
        };

        xobjects.iter().any(|(_, object)| {
            let Object::Stream(stream) = self.resolve(object) else {
                return false;
            };
            match stream.dict.get(b"Subtype").and_then(Object::as_name) {
                Ok(b"Image") => true,
                Ok(b"Form") if depth < 4 => stream
                    .dict
                    .get(b"Resources")
                    .ok()
                    .and_then(|obj| self.resolve(obj).as_dict().ok())
                    .is_some_and(|nested| self.resources_have_image(nested, depth + 1)),
                _ => false,
            }
        })
    }

    fn resolve<'a>(&'a self, object: &'a Object) -> &'a Object {
        let mut current = object;
        for _ in 0..8 {
            match current {
                Object::Reference(id) => match self.document.get_object(*id) {
                    Ok(target) => current = target,
                    Err(_) => return current,
                },
                _ => return current,
            }
        }
        current
    }
}

fn contains_inline_image(bytes: &[u8]) -> bool {
    let is_delimiter = |b: u8| b.is_ascii_whitespace();
    bytes.windows(4).any(|w| {
        is_delimiter(w[0]) && w[1] == b'B' && w[2] == b'I' && is_delimiter(w[3])
    }) && bytes
        .windows(4)
        .any(|w| is_delimiter(w[0]) && w[1] == b'I' && w[2] == b'D' && is_delimiter(w[3]))
}

/// Group text items into lines, top of page first
#[inline]
pub fn lines_from_items(items: &[TextItem]) -> Vec<String> {
    group_rows(items)
        .into_iter()
        .map(|row| {
            row.iter()
                .map(|item| item.text.trim())
                .filter(|text| !text.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|line| !line.is_empty())
        .collect()
}

/// Cluster items sharing a baseline, rows ordered top-down and items left-right
#[inline]
pub fn group_rows(items: &[TextItem]) -> Vec<Vec<&TextItem>> {
    let mut sorted: Vec<&TextItem> = items.iter().collect();
    sorted.sort_by(|a, b| b.y.total_cmp(&a.y).then(a.x.total_cmp(&b.x)));

    let mut rows: Vec<Vec<&TextItem>> = Vec::new();
    for item in sorted {
        let tolerance = (item.font_size * 0.4).max(2.0);
        match rows.last_mut() {
            Some(row) if row.first().is_some_and(|first| (first.y - item.y).abs() <= tolerance) => {
                row.push(item);
            }
            _ => rows.push(vec![item]),
        }
    }

    for row in &mut rows {
        row.sort_by(|a, b| a.x.total_cmp(&b.x));
    }
    rows
}

/// Decode PDF string bytes: UTF-16 with BOM, UTF-8, else Latin-1
#[inline]
pub fn decode_pdf_string(bytes: &[u8]) -> String {
    if let [0xFE, 0xFF, rest @ ..] = bytes {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    if let [0xFF, 0xFE, rest @ ..] = bytes {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }

    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

type Matrix = [f32; 6];

const IDENTITY: Matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

fn multiply(m: &Matrix, n: &Matrix) -> Matrix {
    [
        m[0] * n[0] + m[1] * n[2],
        m[0] * n[1] + m[1] * n[3],
        m[2] * n[0] + m[3] * n[2],
        m[2] * n[1] + m[3] * n[3],
        m[4] * n[0] + m[5] * n[2] + n[4],
        m[4] * n[1] + m[5] * n[3] + n[5],
    ]
}

fn transform(m: &Matrix, x: f32, y: f32) -> (f32, f32) {
    (m[0] * x + m[2] * y + m[4], m[1] * x + m[3] * y + m[5])
}

fn number(object: &Object) -> Option<f32> {
    object.as_float().ok()
}

fn numbers<const N: usize>(operands: &[Object]) -> Option<[f32; N]> {
    let mut values = [0.0; N];
    if operands.len() < N {
        return None;
    }
    for (slot, operand) in values.iter_mut().zip(operands) {
        *slot = number(operand)?;
    }
    Some(values)
}

/// Minimal content stream interpreter tracking text and path state
#[derive(Debug)]
struct ContentInterpreter {
    ctm: Matrix,
    ctm_stack: Vec<Matrix>,
    text_matrix: Matrix,
    line_matrix: Matrix,
    font_size: f32,
    leading: f32,
    current_point: Option<(f32, f32)>,
    subpath_start: Option<(f32, f32)>,
    pending: Vec<LineSegment>,
    output: PageContent,
}

impl Default for ContentInterpreter {
    fn default() -> Self {
        Self {
            ctm: IDENTITY,
            ctm_stack: Vec::new(),
            text_matrix: IDENTITY,
            line_matrix: IDENTITY,
            font_size: 12.0,
            leading: 0.0,
            current_point: None,
            subpath_start: None,
            pending: Vec::new(),
            output: PageContent::default(),
        }
    }
}

impl ContentInterpreter {
    fn apply(&mut self, operator: &str, operands: &[Object]) {
        match operator {
            "q" => self.ctm_stack.push(self.ctm),
            "Q" => self.ctm = self.ctm_stack.pop().unwrap_or(IDENTITY),
            "cm" => {
                if let Some(m) = numbers::<6>(operands) {
                    self.ctm = multiply(&m, &self.ctm);
                }
            }
            "BT" => {
                self.text_matrix = IDENTITY;
                self.line_matrix = IDENTITY;
            }
            "Tf" => {
                if let Some(size) = operands.get(1).and_then(number) {
                    self.font_size = size.abs();
                }
            }
            "TL" => {
                if let Some(leading) = operands.first().and_then(number) {
                    self.leading = leading;
                }
            }
            "Td" => {
                if let Some([tx, ty]) = numbers::<2>(operands) {
                    self.move_line(tx, ty);
                }
            }
            "TD" => {
                if let Some([tx, ty]) = numbers::<2>(operands) {
                    self.leading = -ty;
                    self.move_line(tx, ty);
                }
            }
            "Tm" => {
                if let Some(m) = numbers::<6>(operands) {
                    self.text_matrix = m;
                    self.line_matrix = m;
                }
            }
            "T*" => self.move_line(0.0, -self.leading),
            "Tj" => {
                if let Some(Object::String(bytes, _)) = operands.first() {
                    let text = decode_pdf_string(bytes);
                    self.show_text(text);
                }
            }
            "'" => {
                self.move_line(0.0, -self.leading);
                if let Some(Object::String(bytes, _)) = operands.first() {
                    let text = decode_pdf_string(bytes);
                    self.show_text(text);
                }
            }
            "\"" => {
                self.move_line(0.0, -self.leading);
                if let Some(Object::String(bytes, _)) = operands.get(2) {
                    let text = decode_pdf_string(bytes);
                    self.show_text(text);
                }
            }
            "TJ" => {
                if let Some(Object::Array(parts)) = operands.first() {
                    let mut text = String::new();
                    for part in parts {
                        match part {
                            Object::String(bytes, _) => text.push_str(&decode_pdf_string(bytes)),
                            // Large negative kerning is a word gap
                            other => {
                                if number(other).is_some_and(|kern| kern < -200.0)
                                    && !text.ends_with(' ')
                                {
                                    text.push(' ');
                                }
                            }
                        }
                    }
                    self.show_text(text);
                }
            }
            "m" => {
                if let Some([x, y]) = numbers::<2>(operands) {
                    let point = transform(&self.ctm, x, y);
                    self.current_point = Some(point);
                    self.subpath_start = Some(point);
                }
            }
            "l" => {
                if let (Some([x, y]), Some(from)) = (numbers::<2>(operands), self.current_point) {
                    let to = transform(&self.ctm, x, y);
                    self.push_segment(from, to);
                    self.current_point = Some(to);
                }
            }
            "re" => {
                if let Some([x, y, w, h]) = numbers::<4>(operands) {
                    let corners = [
                        transform(&self.ctm, x, y),
                        transform(&self.ctm, x + w, y),
                        transform(&self.ctm, x + w, y + h),
                        transform(&self.ctm, x, y + h),
                    ];
                    for i in 0..4 {
                        self.push_segment(corners[i], corners[(i + 1) % 4]);
                    }
                    self.current_point = Some(corners[0]);
                    self.subpath_start = Some(corners[0]);
                }
            }
            "h" => {
                if let (Some(from), Some(to)) = (self.current_point, self.subpath_start) {
                    self.push_segment(from, to);
                    self.current_point = Some(to);
                }
            }
            "S" | "s" | "f" | "F" | "f*" | "B" | "B*" | "b" | "b*" => {
                let painted = std::mem::take(&mut self.pending);
                self.output.segments.extend(painted);
                self.current_point = None;
            }
            "n" => {
                self.pending.clear();
                self.current_point = None;
            }
            "BI" | "ID" | "EI" => self.output.has_inline_image = true,
            _ => {}
        }
    }

    fn move_line(&mut self, tx: f32, ty: f32) {
        self.line_matrix = multiply(&[1.0, 0.0, 0.0, 1.0, tx, ty], &self.line_matrix);
        self.text_matrix = self.line_matrix;
    }

    fn show_text(&mut self, text: String) {
        if text.trim().is_empty() {
            return;
        }

        let rendering = multiply(&self.text_matrix, &self.ctm);
        let (x, y) = transform(&rendering, 0.0, 0.0);
        let scale = rendering[3].abs().max(rendering[0].abs());
        let font_size = if scale > 0.0 {
            self.font_size * scale
        } else {
            self.font_size
        };

        // Approximate advance so consecutive runs on a line stay ordered
        let advance = text.chars().count() as f32 * self.font_size * 0.5;
        self.text_matrix = multiply(&[1.0, 0.0, 0.0, 1.0, advance, 0.0], &self.text_matrix);

        self.output.items.push(TextItem {
            text,
            x,
            y,
            font_size,
        });
    }

    fn push_segment(&mut self, from: (f32, f32), to: (f32, f32)) {
        self.pending.push(LineSegment {
            x1: from.0,
            y1: from.1,
            x2: to.0,
            y2: to.1,
        });
    }

    fn finish(self) -> PageContent {
        self.output
    }
}
