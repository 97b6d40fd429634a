use super::*;

fn item(text: &str, x: f32, y: f32) -> TextItem {
    TextItem {
        text: text.to_string(),
        x,
        y,
        font_size: 10.0,
    }
}

fn table(rows: &[&[&str]]) -> Table {
    Table {
        page: 0,
        strategy: "test",
        rows: rows
            .iter()
            .map(|row| row.iter().map(ToString::to_string).collect())
            .collect(),
    }
}

fn ruled_page(rows: usize, cols: usize, items: Vec<TextItem>) -> PageContent {
    let mut segments = Vec::new();
    for r in 0..=rows {
        let y = 400.0 - 20.0 * r as f32;
        segments.push(LineSegment {
            x1: 72.0,
            y1: y,
            x2: 72.0 + 60.0 * cols as f32,
            y2: y,
        });
    }
    for c in 0..=cols {
        let x = 72.0 + 60.0 * c as f32;
        segments.push(LineSegment {
            x1: x,
            y1: 400.0,
            x2: x,
            y2: 400.0 - 20.0 * rows as f32,
        });
    }
    PageContent {
        items,
        segments,
        has_inline_image: false,
    }
}

struct FailingStrategy;

impl TableStrategy for FailingStrategy {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn extract(&self, _page: &PageContent, _page_index: usize) -> Result<Vec<Table>, TableError> {
        Err(TableError::Geometry("broken".to_string()))
    }
}

#[test]
fn acceptance_rules() {
    assert!(is_acceptable_table(&table(&[&["Door", "Size"], &["D-1", "90x210"]])));
    assert!(!is_acceptable_table(&table(&[&["Door", "Size"]])));
    assert!(!is_acceptable_table(&table(&[&["Door"], &["D-1"]])));
    assert!(!is_acceptable_table(&table(&[
        &["Door", "", ""],
        &["", "", ""],
        &["", "", ""],
    ])));
    assert!(!is_acceptable_table(&table(&[])));
}

#[test]
fn duplicates_share_shape_and_first_cell() {
    let a = table(&[&["Door", "Size"], &["D-1", "90x210"]]);
    let b = table(&[&["Door", "Width"], &["D-2", "80x200"]]);
    let c = table(&[&["Window", "Size"], &["W-1", "120x100"]]);
    let d = table(&[&["Door", "Size"], &["D-1", "90x210"], &["D-2", "80x200"]]);

    assert!(is_duplicate_table(&a, &b));
    assert!(!is_duplicate_table(&a, &c));
    assert!(!is_duplicate_table(&a, &d));
}

#[test]
fn grid_cells_collect_their_text() {
    let page = ruled_page(
        2,
        2,
        vec![
            item("Door", 75.0, 385.0),
            item("Size", 135.0, 385.0),
            item("D-1", 75.0, 365.0),
            item("90x210", 135.0, 365.0),
            item("outside", 300.0, 100.0),
        ],
    );

    let tables = GridLineStrategy.extract(&page, 0).expect("grid extraction");
    assert_eq!(tables.len(), 1);
    assert_eq!(
        tables[0].rows,
        vec![vec!["Door", "Size"], vec!["D-1", "90x210"]]
    );
}

#[test]
fn grid_needs_two_rows_and_columns() {
    let page = ruled_page(1, 1, vec![item("alone", 75.0, 385.0)]);
    let tables = GridLineStrategy.extract(&page, 0).expect("grid extraction");
    assert!(tables.is_empty());
}

#[test]
fn aligned_text_becomes_a_table() {
    let page = PageContent {
        items: vec![
            item("Door Schedule", 72.0, 720.0),
            item("Door", 72.0, 700.0),
            item("Size", 150.0, 700.0),
            item("Material", 240.0, 700.0),
            item("D-1", 72.0, 685.0),
            item("90x210", 151.0, 685.0),
            item("wood", 240.0, 685.0),
            item("D-2", 73.0, 670.0),
            item("80x200", 150.0, 670.0),
            item("Notes below", 72.0, 600.0),
        ],
        ..PageContent::default()
    };

    let tables = TextAlignmentStrategy.extract(&page, 2).expect("alignment extraction");
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].page, 2);
    assert_eq!(
        tables[0].rows,
        vec![
            vec!["Door", "Size", "Material"],
            vec!["D-1", "90x210", "wood"],
            vec!["D-2", "80x200", ""],
        ]
    );
}

#[test]
fn first_successful_strategy_claims_the_page() {
    let page = ruled_page(
        2,
        2,
        vec![
            item("Door", 75.0, 385.0),
            item("Size", 135.0, 385.0),
            item("D-1", 75.0, 365.0),
            item("90x210", 135.0, 365.0),
        ],
    );

    let tables = TableRecoveryEngine::new(10).recover_pages(&[page]);
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].strategy, "grid_lines");
}

#[test]
fn failing_strategy_is_isolated() {
    let page = PageContent {
        items: vec![
            item("Door", 72.0, 700.0),
            item("Size", 150.0, 700.0),
            item("D-1", 72.0, 685.0),
            item("90x210", 150.0, 685.0),
        ],
        ..PageContent::default()
    };

    let engine = TableRecoveryEngine::with_strategies(
        vec![Box::new(FailingStrategy), Box::new(TextAlignmentStrategy)],
        10,
    );
    let tables = engine.recover_pages(&[page]);
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].strategy, "text_alignment");
}

#[test]
fn repeated_tables_are_dropped() {
    let page = PageContent {
        items: vec![
            item("Door", 72.0, 700.0),
            item("Size", 150.0, 700.0),
            item("D-1", 72.0, 685.0),
            item("90x210", 150.0, 685.0),
        ],
        ..PageContent::default()
    };

    let tables = TableRecoveryEngine::new(10).recover_pages(&[page.clone(), page]);
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].page, 0);
}

#[test]
fn dump_uses_pipe_separated_rows() {
    let mut door_table = table(&[&["Door", "Size"], &["D-1", "90x210"]]);
    door_table.page = 1;

    assert_eq!(
        dump_tables(&[door_table]),
        "[Table 1 - page 2]\nDoor | Size\nD-1 | 90x210"
    );
    assert_eq!(dump_tables(&[]), "");
}
