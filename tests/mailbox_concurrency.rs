use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use thermolink_lib::serial::link::SharedLinkState;

const WRITERS: usize = 4;
const WRITES_PER_THREAD: usize = 2_000;

fn line_for(writer: usize, seq: usize) -> String {
    format!("[{},{},{},{},1,1]", writer, seq, writer * 7, seq * 3)
}

#[test]
fn test_concurrent_writes_never_interleave() {
    let shared = SharedLinkState::new();
    let done = Arc::new(AtomicBool::new(false));

    let writers: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let shared = shared.clone();
            thread::spawn(move || {
                for seq in 0..WRITES_PER_THREAD {
                    shared.set_outbound(line_for(writer, seq));
                }
            })
        })
        .collect();

    let reader = {
        let shared = shared.clone();
        let done = done.clone();
        thread::spawn(move || {
            let mut seen = Vec::new();
            loop {
                let finished = done.load(Ordering::SeqCst);
                if let Some(line) = shared.take_outbound() {
                    seen.push(line);
                }
                if finished {
                    break;
                }
            }
            seen
        })
    };

    for handle in writers {
        handle.join().unwrap();
    }
    done.store(true, Ordering::SeqCst);
    let seen = reader.join().unwrap();

    let valid: HashSet<String> = (0..WRITERS)
        .flat_map(|w| (0..WRITES_PER_THREAD).map(move |s| line_for(w, s)))
        .collect();
    assert!(!seen.is_empty());
    for line in &seen {
        assert!(valid.contains(line), "spliced line {:?}", line);
    }
    // Each take empties the slot, so no line is read twice
    let unique: HashSet<&String> = seen.iter().collect();
    assert_eq!(unique.len(), seen.len());
    assert!(shared.take_outbound().is_none());
}

#[test]
fn test_last_write_wins_when_reader_is_slow() {
    let shared = SharedLinkState::new();
    for seq in 0..10 {
        shared.set_outbound(line_for(0, seq));
    }
    assert_eq!(shared.take_outbound(), Some(line_for(0, 9)));
    assert_eq!(shared.take_outbound(), None);
}
