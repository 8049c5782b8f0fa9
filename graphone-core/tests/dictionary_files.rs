use std::fs;

use graphone_core::{Dictionary, GraphoneError, RecordFault, Task};

#[test]
fn loads_a_dictionary_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dict.txt");
    fs::write(&path, "cat,kæt\n\nbat,bæt\nship,ʃIp\n").unwrap();

    let dict = Dictionary::load(&path).unwrap();
    assert_eq!(dict.len(), 3);
    assert_eq!(dict.entry(2).spelling, "ship");
    assert_eq!(dict.entry(2).pronunciation, "ʃIp");

    let sample = dict.clone().with_task(Task::Pronounce).sample(0).unwrap();
    assert_eq!(sample.target.len(), 3);
}

#[test]
fn malformed_record_reports_its_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dict.txt");
    fs::write(&path, "cat,kæt\nbat,bæt\n1x,kæt\n").unwrap();

    match Dictionary::load(&path) {
        Err(GraphoneError::MalformedRecord { line, fault }) => {
            assert_eq!(line, 2);
            assert_eq!(fault, RecordFault::InvalidLetter('1'));
        }
        other => panic!("expected malformed record, got {other:?}"),
    }
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        Dictionary::load(&dir.path().join("absent.txt")),
        Err(GraphoneError::Io(_))
    ));
}

#[test]
fn split_files_are_sorted_and_complete() {
    let dir = tempfile::tempdir().unwrap();
    let raw = "zoo,zu\ncat,kæt\nbat,bæt\nship,ʃIp\nfish,fIʃ\nthe,ðə\ndog,dɔg\n";
    let dict = Dictionary::parse(raw).unwrap();

    let (validation, training) = dict.hash_split(0.5);
    let validation_path = dir.path().join("validation.txt");
    let training_path = dir.path().join("training.txt");
    validation.write_sorted(&validation_path).unwrap();
    training.write_sorted(&training_path).unwrap();

    let read = |p| fs::read_to_string(p).unwrap();
    let v = read(&validation_path);
    let t = read(&training_path);
    let mut all: Vec<&str> = v.lines().chain(t.lines()).collect();
    assert_eq!(all.len(), 7);
    for text in [&v, &t] {
        let lines: Vec<&str> = text.lines().collect();
        let mut sorted = lines.clone();
        sorted.sort();
        assert_eq!(lines, sorted);
        assert!(text.is_empty() || text.ends_with('\n'));
    }

    all.sort();
    let mut expected: Vec<&str> = raw.lines().collect();
    expected.sort();
    assert_eq!(all, expected);

    // Round trip through the files keeps the partition.
    let reloaded = Dictionary::load(&validation_path).unwrap();
    let (again, rest) = reloaded.hash_split(0.5);
    assert_eq!(again.len(), reloaded.len());
    assert!(rest.is_empty());
}
