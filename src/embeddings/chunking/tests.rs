use super::*;

fn numbered_words(count: usize) -> String {
    (0..count)
        .map(|i| format!("w{i}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[test]
fn rejects_overlap_not_smaller_than_size() {
    assert!(Chunker::new(10, 10).is_err());
    assert!(Chunker::new(10, 11).is_err());
    assert!(Chunker::new(0, 0).is_err());
    assert!(Chunker::new(10, 9).is_ok());
}

#[test]
fn empty_text_yields_no_chunks() {
    let chunker = Chunker::default();
    assert!(chunker.split("").is_empty());
    assert!(chunker.split("   \n\t ").is_empty());
}

#[test]
fn short_text_is_single_chunk() {
    let chunker = Chunker::default();
    let chunks = chunker.split("Door Schedule: D-1 90x210 wood");
    assert_eq!(chunks, vec!["Door Schedule: D-1 90x210 wood".to_string()]);
}

#[test]
fn windows_start_every_stride_words() {
    let chunker = Chunker::new(4, 1).expect("valid chunker");
    let chunks = chunker.split(&numbered_words(10));

    assert_eq!(
        chunks,
        vec![
            "w0 w1 w2 w3".to_string(),
            "w3 w4 w5 w6".to_string(),
            "w6 w7 w8 w9".to_string(),
            "w9".to_string(),
        ]
    );
}

#[test]
fn whitespace_is_normalized() {
    let chunker = Chunker::new(3, 0).expect("valid chunker");
    let chunks = chunker.split("a\n\nb\t c    d");
    assert_eq!(chunks, vec!["a b c".to_string(), "d".to_string()]);
}

#[test]
fn chunking_is_idempotent() {
    let chunker = Chunker::new(7, 2).expect("valid chunker");
    let text = numbered_words(53);
    assert_eq!(chunker.split(&text), chunker.split(&text));
}

#[test]
fn every_word_is_covered() {
    let chunker = Chunker::new(300, 50).expect("valid chunker");
    let text = numbered_words(1234);
    let chunks = chunker.split(&text);

    let covered: std::collections::HashSet<&str> = chunks
        .iter()
        .flat_map(|chunk| chunk.split_whitespace())
        .collect();
    for word in text.split_whitespace() {
        assert!(covered.contains(word), "{word} missing from chunks");
    }
}

#[test]
fn consecutive_chunks_share_overlap() {
    let chunker = Chunker::new(5, 2).expect("valid chunker");
    let chunks = chunker.split(&numbered_words(12));

    for pair in chunks.windows(2) {
        let first: Vec<&str> = pair[0].split_whitespace().collect();
        let second: Vec<&str> = pair[1].split_whitespace().collect();
        if first.len() == 5 {
            assert_eq!(first[3..], second[..2.min(second.len())]);
        }
    }
}

#[test]
fn chunk_document_tags_filename_and_index() {
    let chunker = Chunker::new(2, 0).expect("valid chunker");
    let chunks = chunker.chunk_document("plan.pdf", "one two three");

    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].filename, "plan.pdf");
    assert_eq!(chunks[0].chunk_index, 0);
    assert_eq!(chunks[1].chunk_index, 1);
    assert_eq!(chunks[1].text, "three");
    assert_eq!(chunks[1].char_len(), 5);
}
