//! Tests for the file read + decode task

use offload_pool::config::EngineConfig;
use offload_pool::core::{Engine, ExecutionFailure, TaskState};
use offload_pool::tasks::ReadTask;
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(10);

fn engine() -> Engine {
    Engine::new(EngineConfig::new().with_max_threads(2)).unwrap()
}

/// Parses "x y z" vertex lines
fn decode_vertices(bytes: &[u8]) -> anyhow::Result<Vec<[f32; 3]>> {
    let text = std::str::from_utf8(bytes)?;
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| -> anyhow::Result<[f32; 3]> {
            let coords = line
                .split_whitespace()
                .map(str::parse::<f32>)
                .collect::<Result<Vec<_>, _>>()?;
            match coords.as_slice() {
                [x, y, z] => Ok([*x, *y, *z]),
                _ => anyhow::bail!("expected 3 coordinates, got {}", coords.len()),
            }
        })
        .collect()
}

#[test]
fn test_read_and_decode_delivers_to_all_handlers() {
    let mut engine = engine();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "0 0 0\n1 0 0\n0 1 0").unwrap();

    let task = Arc::new(ReadTask::new(file.path(), decode_vertices));
    let uploaded = Arc::new(Mutex::new(Vec::new()));
    let bounds = Arc::new(Mutex::new(None));

    let sink = Arc::clone(&uploaded);
    task.on_complete(move |vertices: &Vec<[f32; 3]>| sink.lock().extend_from_slice(vertices));
    let sink = Arc::clone(&bounds);
    task.on_complete(move |vertices: &Vec<[f32; 3]>| *sink.lock() = Some(vertices.len()));
    task.on_fail(|e| panic!("unexpected failure: {e}"));

    let handle = engine.add_task(Arc::clone(&task)).unwrap();
    assert!(task.is_in_flight());

    assert!(engine.wait_all(WAIT));
    assert_eq!(handle.state(), TaskState::Completed);
    assert!(!task.is_in_flight());
    assert_eq!(uploaded.lock().len(), 3);
    assert_eq!(*bounds.lock(), Some(3));
    engine.shutdown();
}

#[test]
fn test_missing_file_reaches_fail_handlers() {
    let mut engine = engine();
    let dir = tempfile::tempdir().unwrap();
    let task = Arc::new(ReadTask::new(dir.path().join("missing.obj"), decode_vertices));
    let errors = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&errors);
    task.on_fail(move |e: &ExecutionFailure| sink.lock().push(e.to_string()));
    task.on_complete(|_| panic!("should not complete"));

    let handle = engine.add_task(Arc::clone(&task)).unwrap();
    assert!(engine.wait_all(WAIT));

    assert_eq!(handle.state(), TaskState::Failed);
    let errors = errors.lock();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("missing.obj"), "{}", errors[0]);
    engine.shutdown();
}

#[test]
fn test_decode_error_reaches_fail_handlers() {
    let mut engine = engine();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "1 2").unwrap();

    let task = Arc::new(ReadTask::new(file.path(), decode_vertices));
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    task.on_fail(move |e| sink.lock().push(e.to_string()));

    engine.add_task(Arc::clone(&task)).unwrap();
    assert!(engine.wait_all(WAIT));

    let errors = errors.lock();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("expected 3 coordinates"), "{}", errors[0]);
    engine.shutdown();
}
