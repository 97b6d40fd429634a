//! Table recovery from page geometry.
//!
//! Strategies run in priority order on each page. The first one that yields
//! an acceptable table claims the page, and duplicates across pages and
//! strategies are dropped before the tables are dumped into the final text.

#[cfg(test)]
mod tests;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::extraction::pdf::{LineSegment, PageContent, PdfDocument, TextItem, group_rows};

const COORDINATE_TOLERANCE: f32 = 2.0;
const ALIGNMENT_TOLERANCE: f32 = 8.0;
const MAX_GRID_CELLS: usize = 10_000;
const MAX_SPARSE_RATIO: f32 = 0.7;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    #[error("Table geometry rejected: {0}")]
    Geometry(String),
}

/// A recovered table; the first row is the header
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Table {
    pub page: usize,
    pub strategy: &'static str,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    #[inline]
    pub fn column_count(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// `(rows, columns)`
    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.column_count())
    }

    #[inline]
    pub fn first_cell(&self) -> Option<&str> {
        self.rows.first()?.first().map(String::as_str)
    }

    /// Share of cells that are blank, counting short rows as padded
    #[inline]
    pub fn sparse_ratio(&self) -> f32 {
        let (rows, cols) = self.shape();
        let total = rows * cols;
        if total == 0 {
            return 1.0;
        }
        let filled = self
            .rows
            .iter()
            .flatten()
            .filter(|cell| !cell.trim().is_empty())
            .count();
        (total - filled) as f32 / total as f32
    }
}

/// Header plus at least one data row, two columns, and mostly filled cells
#[inline]
pub fn is_acceptable_table(table: &Table) -> bool {
    let (rows, cols) = table.shape();
    rows >= 2 && cols >= 2 && table.sparse_ratio() < MAX_SPARSE_RATIO
}

/// Same shape and same first cell
#[inline]
pub fn is_duplicate_table(a: &Table, b: &Table) -> bool {
    a.shape() == b.shape() && a.first_cell() == b.first_cell()
}

/// One way of finding tables on a page
pub trait TableStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn extract(&self, page: &PageContent, page_index: usize) -> Result<Vec<Table>, TableError>;
}

/// Cells bounded by ruled horizontal and vertical lines
#[derive(Debug, Clone, Copy, Default)]
pub struct GridLineStrategy;

impl TableStrategy for GridLineStrategy {
    fn name(&self) -> &'static str {
        "grid_lines"
    }

    fn extract(&self, page: &PageContent, page_index: usize) -> Result<Vec<Table>, TableError> {
        let mut ys = axis_positions(page.segments.iter().filter(|s| s.is_horizontal()), |s| {
            (s.y1 + s.y2) / 2.0
        });
        let xs = axis_positions(page.segments.iter().filter(|s| s.is_vertical()), |s| {
            (s.x1 + s.x2) / 2.0
        });
        if ys.len() < 3 || xs.len() < 3 {
            return Ok(Vec::new());
        }
        ys.reverse();

        let (rows, cols) = (ys.len() - 1, xs.len() - 1);
        if rows * cols > MAX_GRID_CELLS {
            return Err(TableError::Geometry(format!(
                "{} by {} grid is too large",
                rows, cols
            )));
        }

        let mut cells = vec![vec![String::new(); cols]; rows];
        for item in &page.items {
            let column = xs
                .windows(2)
                .position(|w| item.x >= w[0] - COORDINATE_TOLERANCE && item.x < w[1]);
            let row = ys
                .windows(2)
                .position(|w| item.y <= w[0] + COORDINATE_TOLERANCE && item.y > w[1]);
            if let (Some(row), Some(column)) = (row, column) {
                append_cell(&mut cells[row][column], &item.text);
            }
        }

        Ok(vec![Table {
            page: page_index,
            strategy: self.name(),
            rows: cells,
        }])
    }
}

/// Consecutive multi-column text rows sharing column anchors
#[derive(Debug, Clone, Copy, Default)]
pub struct TextAlignmentStrategy;

impl TableStrategy for TextAlignmentStrategy {
    fn name(&self) -> &'static str {
        "text_alignment"
    }

    fn extract(&self, page: &PageContent, page_index: usize) -> Result<Vec<Table>, TableError> {
        let mut tables = Vec::new();
        let mut run: Vec<Vec<&TextItem>> = Vec::new();

        for row in group_rows(&page.items) {
            if row.len() >= 2 {
                run.push(row);
            } else if !run.is_empty() {
                tables.extend(self.table_from_run(&std::mem::take(&mut run), page_index));
            }
        }
        tables.extend(self.table_from_run(&run, page_index));

        Ok(tables)
    }
}

impl TextAlignmentStrategy {
    fn table_from_run(&self, run: &[Vec<&TextItem>], page_index: usize) -> Option<Table> {
        if run.len() < 2 {
            return None;
        }

        let mut starts: Vec<f32> = run.iter().flatten().map(|item| item.x).collect();
        starts.sort_by(f32::total_cmp);
        let mut anchors: Vec<f32> = Vec::new();
        for x in starts {
            if anchors.last().is_none_or(|last| x - last > ALIGNMENT_TOLERANCE) {
                anchors.push(x);
            }
        }

        let rows = run
            .iter()
            .map(|row| {
                let mut cells = vec![String::new(); anchors.len()];
                for item in row {
                    let column = anchors
                        .iter()
                        .rposition(|anchor| item.x + ALIGNMENT_TOLERANCE >= *anchor)
                        .unwrap_or(0);
                    append_cell(&mut cells[column], &item.text);
                }
                cells
            })
            .collect();

        Some(Table {
            page: page_index,
            strategy: self.name(),
            rows,
        })
    }
}

fn axis_positions<'a>(
    segments: impl Iterator<Item = &'a LineSegment>,
    position: impl Fn(&LineSegment) -> f32,
) -> Vec<f32> {
    let mut values: Vec<f32> = segments.map(position).collect();
    values.sort_by(f32::total_cmp);
    values.dedup_by(|a, b| (*a - *b).abs() <= COORDINATE_TOLERANCE);
    values
}

fn append_cell(cell: &mut String, text: &str) {
    let text = text.trim();
    if text.is_empty() {
        return;
    }
    if !cell.is_empty() {
        cell.push(' ');
    }
    cell.push_str(text);
}

/// Runs the strategies over a bounded number of pages
pub struct TableRecoveryEngine {
    strategies: Vec<Box<dyn TableStrategy>>,
    page_limit: usize,
}

impl std::fmt::Debug for TableRecoveryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableRecoveryEngine")
            .field(
                "strategies",
                &self.strategies.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .field("page_limit", &self.page_limit)
            .finish()
    }
}

impl TableRecoveryEngine {
    /// Grid lines first, then text alignment
    #[inline]
    pub fn new(page_limit: usize) -> Self {
        Self::with_strategies(
            vec![Box::new(GridLineStrategy), Box::new(TextAlignmentStrategy)],
            page_limit,
        )
    }

    #[inline]
    pub fn with_strategies(strategies: Vec<Box<dyn TableStrategy>>, page_limit: usize) -> Self {
        Self {
            strategies,
            page_limit,
        }
    }

    #[inline]
    pub fn recover(&self, document: &PdfDocument) -> Vec<Table> {
        let pages: Vec<PageContent> = (0..document.page_count().min(self.page_limit))
            .map(|page_index| document.page_content(page_index))
            .collect();
        self.recover_pages(&pages)
    }

    /// Tables from already parsed pages, de-duplicated
    #[inline]
    pub fn recover_pages(&self, pages: &[PageContent]) -> Vec<Table> {
        let mut found: Vec<Table> = Vec::new();

        for (page_index, page) in pages.iter().enumerate() {
            for strategy in &self.strategies {
                match strategy.extract(page, page_index) {
                    Ok(tables) => {
                        let acceptable: Vec<Table> =
                            tables.into_iter().filter(is_acceptable_table).collect();
                        if !acceptable.is_empty() {
                            debug!(
                                "Strategy {} found {} tables on page {}",
                                strategy.name(),
                                acceptable.len(),
                                page_index + 1
                            );
                            found.extend(acceptable);
                            break;
                        }
                    }
                    Err(e) => warn!(
                        "Table strategy {} failed on page {}: {}",
                        strategy.name(),
                        page_index + 1,
                        e
                    ),
                }
            }
        }

        let mut unique: Vec<Table> = Vec::with_capacity(found.len());
        for table in found {
            if unique.iter().any(|kept| is_duplicate_table(kept, &table)) {
                debug!("Dropping duplicate table from page {}", table.page + 1);
            } else {
                unique.push(table);
            }
        }
        unique
    }
}

/// Plain-text rendering appended to the extracted text, cells separated by `|`
#[inline]
pub fn dump_tables(tables: &[Table]) -> String {
    tables
        .iter()
        .enumerate()
        .map(|(i, table)| {
            let body = table
                .rows
                .iter()
                .map(|row| row.join(" | "))
                .collect::<Vec<_>>()
                .join("\n");
            format!("[Table {} - page {}]\n{}", i + 1, table.page + 1, body)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
