
use tracing::debug;

use crate::extraction::pdf::{LineSegment, PdfDocument, TextItem, group_rows};

/// Horizontal distance under which two column starts count as aligned
const COLUMN_TOLERANCE: f32 = 6.0;

const TABLE_KEYWORDS: [&str; 6] = ["schedule", "table", "qty", "quantity", "item", "total"];

/// Structural hints gathered from the first pages of a document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StructureSignals {
    pub has_images: bool,
    pub has_table_layout: bool,
    pub pages_inspected: usize,
}

/// Per-page structural hints
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageSignals {
    pub has_images: bool,
    pub has_grid: bool,
    pub has_aligned_columns: bool,
}

impl PageSignals {
    #[inline]
    pub fn has_table_layout(&self) -> bool {
        self.has_grid || self.has_aligned_columns
    }
}

/// Inspect up to `page_limit` pages for raster images and table layout
#[inline]
pub fn detect_structure(document: &PdfDocument, page_limit: usize) -> StructureSignals {
    let pages = document.page_count().min(page_limit);
    let mut signals = StructureSignals {
        pages_inspected: pages,
        ..StructureSignals::default()
    };

    for page_index in 0..pages {
        let page = inspect_page(document, page_index);
        debug!("Page {} structure: {:?}", page_index + 1, page);
        signals.has_images |= page.has_images;
        signals.has_table_layout |= page.has_table_layout();

        if signals.has_images && signals.has_table_layout {
            break;
        }
    }

    signals
}

#[inline]
pub fn inspect_page(document: &PdfDocument, page_index: usize) -> PageSignals {
    let content = document.page_content(page_index);
    PageSignals {
        has_images: content.has_inline_image || document.page_resources_have_images(page_index),
        has_grid: has_grid(&content.segments),
        has_aligned_columns: has_aligned_columns(&content.items),
    }
}

/// At least three horizontal and two vertical rules
#[inline]
pub fn has_grid(segments: &[LineSegment]) -> bool {
    let horizontal = segments.iter().filter(|s| s.is_horizontal()).count();
    let vertical = segments.iter().filter(|s| s.is_vertical()).count();
    horizontal >= 3 && vertical >= 2
}

/// Several multi-column rows whose column starts line up.
///
/// Three aligned rows are required, or two when the page mentions a table
/// keyword such as "schedule".
#[inline]
pub fn has_aligned_columns(items: &[TextItem]) -> bool {
    let rows = group_rows(items);
    let multi_column: Vec<Vec<f32>> = rows
        .iter()
        .filter(|row| row.len() >= 2)
        .map(|row| row.iter().map(|item| item.x).collect())
        .collect();

    if multi_column.len() < 2 {
        return false;
    }

    let aligned_rows = multi_column
        .iter()
        .enumerate()
        .filter(|(i, starts)| {
            multi_column
                .iter()
                .enumerate()
                .any(|(j, other)| *i != j && shared_columns(starts, other) >= 2)
        })
        .count();

    let mentions_table = items.iter().any(|item| {
        let lower = item.text.to_lowercase();
        TABLE_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
    });

    aligned_rows >= 3 || (mentions_table && aligned_rows >= 2)
}

fn shared_columns(a: &[f32], b: &[f32]) -> usize {
    a.iter()
        .filter(|x| b.iter().any(|y| (*x - y).abs() <= COLUMN_TOLERANCE))
        .count()
}
