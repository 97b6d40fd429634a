//! In-memory PDF builder for unit tests

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, Stream, dictionary};

/// A page under construction
#[derive(Debug, Default, Clone)]
pub struct PageSpec {
    pub lines: Vec<(f32, f32, String)>,
    pub segments: Vec<(f32, f32, f32, f32)>,
    pub image: bool,
}

impl PageSpec {
    pub fn text(lines: &[&str]) -> Self {
        let mut page = Self::default();
        for (i, line) in lines.iter().enumerate() {
            page.lines.push((72.0, 720.0 - 18.0 * i as f32, (*line).to_string()));
        }
        page
    }

    pub fn with_text_at(mut self, x: f32, y: f32, text: &str) -> Self {
        self.lines.push((x, y, text.to_string()));
        self
    }

    pub fn with_segment(mut self, x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        self.segments.push((x1, y1, x2, y2));
        self
    }

    /// Ruled grid with `rows` by `cols` cells
    pub fn with_grid(mut self, rows: usize, cols: usize) -> Self {
        let (left, top, width, height) = (72.0, 400.0, 60.0, 20.0);
        let right = left + width * cols as f32;
        let bottom = top - height * rows as f32;
        for r in 0..=rows {
            let y = top - height * r as f32;
            self.segments.push((left, y, right, y));
        }
        for c in 0..=cols {
            let x = left + width * c as f32;
            self.segments.push((x, top, x, bottom));
        }
        self
    }

    pub fn with_image(mut self) -> Self {
        self.image = true;
        self
    }
}

fn content_for(page: &PageSpec) -> Content {
    let mut operations = Vec::new();

    for (x1, y1, x2, y2) in &page.segments {
        operations.push(Operation::new("m", vec![(*x1).into(), (*y1).into()]));
        operations.push(Operation::new("l", vec![(*x2).into(), (*y2).into()]));
        operations.push(Operation::new("S", vec![]));
    }

    for (x, y, text) in &page.lines {
        operations.push(Operation::new("BT", vec![]));
        operations.push(Operation::new("Tf", vec!["F1".into(), 12.into()]));
        operations.push(Operation::new("Td", vec![(*x).into(), (*y).into()]));
        operations.push(Operation::new(
            "Tj",
            vec![Object::string_literal(text.as_str())],
        ));
        operations.push(Operation::new("ET", vec![]));
    }

    if page.image {
        operations.push(Operation::new("q", vec![]));
        operations.push(Operation::new(
            "cm",
            vec![100.into(), 0.into(), 0.into(), 100.into(), 72.into(), 72.into()],
        ));
        operations.push(Operation::new("Do", vec!["Im1".into()]));
        operations.push(Operation::new("Q", vec![]));
    }

    Content { operations }
}

/// Serialize a document with the given pages
pub fn build_pdf(pages: &[PageSpec]) -> Vec<u8> {
    build(pages, false)
}

/// A document whose trailer declares encryption
pub fn build_encrypted_pdf() -> Vec<u8> {
    build(&[PageSpec::text(&["secret"])], true)
}

/// A structurally valid document with an empty page tree
pub fn build_empty_pdf() -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => Vec::<Object>::new(),
            "Count" => 0,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    save(&mut doc)
}

fn build(pages: &[PageSpec], encrypted: bool) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let image_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => 1,
            "Height" => 1,
            "ColorSpace" => "DeviceGray",
            "BitsPerComponent" => 8,
        },
        vec![0x80],
    ));

    let mut kids = Vec::new();
    for page in pages {
        let content = content_for(page);
        let bytes = content.encode().unwrap_or_default();
        let content_id = doc.add_object(Stream::new(Dictionary::new(), bytes));

        let mut resources = dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        };
        if page.image {
            resources.set("XObject", dictionary! { "Im1" => image_id });
        }

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => content_id,
            "Resources" => resources,
        });
        kids.push(Object::Reference(page_id));
    }

    let count = i64::try_from(kids.len()).unwrap_or(0);
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    if encrypted {
        let encrypt_id = doc.add_object(dictionary! {
            "Filter" => "Standard",
            "V" => 1,
            "R" => 2,
            "O" => Object::string_literal(vec![0_u8; 32]),
            "U" => Object::string_literal(vec![0_u8; 32]),
            "P" => -4,
        });
        doc.trailer.set("Encrypt", encrypt_id);
    }

    save(&mut doc)
}

fn save(doc: &mut Document) -> Vec<u8> {
    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).expect("in-memory save should succeed");
    buffer
}
