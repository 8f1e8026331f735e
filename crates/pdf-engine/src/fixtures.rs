//! In-memory PDF fixtures for tests.

use lopdf::{dictionary, Document, Object};

/// One page of a generated fixture document
#[derive(Debug, Clone, Copy)]
pub struct FixturePage {
    pub width: i64,
    pub height: i64,
    pub rotate: i64,
}

impl FixturePage {
    pub fn new(width: i64, height: i64) -> Self {
        Self { width, height, rotate: 0 }
    }

    pub fn rotated(self, rotate: i64) -> Self {
        Self { rotate, ..self }
    }
}

impl FixturePage {
    fn media_box(&self) -> Vec<Object> {
        vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(self.width),
            Object::Integer(self.height),
        ]
    }
}

/// Serialize a minimal document with one empty page per entry.
pub fn pdf_bytes(pages: &[FixturePage]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let kids: Vec<Object> = pages
        .iter()
        .map(|page| {
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => page.media_box(),
                "Rotate" => Object::Integer(page.rotate),
            });
            Object::Reference(page_id)
        })
        .collect();

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => Object::Integer(count),
        }),
    );

    finish(doc, pages_id)
}

/// Serialize `count` pages that carry no box or rotation of their own; both
/// are set once on the `/Pages` node.
pub fn inherited_pdf_bytes(shared: FixturePage, count: usize) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let kids: Vec<Object> = (0..count)
        .map(|_| {
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
            });
            Object::Reference(page_id)
        })
        .collect();

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => Object::Integer(count as i64),
            "MediaBox" => shared.media_box(),
            "Rotate" => Object::Integer(shared.rotate),
        }),
    );

    finish(doc, pages_id)
}

fn finish(mut doc: Document, pages_id: lopdf::ObjectId) -> Vec<u8> {
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("fixture document should serialize");
    bytes
}
