//! External merge-sort over pre-sorted intermediate files (component A).
//!
//! Mirrors `Emsort` from the source system: a min-heap keyed on `KeyValue::key`
//! primes one head element per source, pops the minimum, writes it, and
//! refills from the source it came from. Once only one source is left it
//! switches to a byte-copy fast path instead of continuing to push/pop a
//! single-element heap.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::io::{self, BufRead, Write};

use thiserror::Error;

use super::kv::{parse_line, KeyValue, ParseError};

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("io error during merge: {0}")]
    Io(#[from] io::Error),
    #[error("malformed intermediate line: {0}")]
    Parse(#[from] ParseError),
}

/// Min-heap entry: ties on `kv.key` are broken by source index, which is an
/// arbitrary but consistent order (the reducer groups by key regardless).
struct HeapEntry {
    kv: KeyValue,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.kv.key == other.kv.key && self.source == other.source
    }
}
impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so `BinaryHeap` (a max-heap) behaves as a min-heap.
        other
            .kv
            .key
            .cmp(&self.kv.key)
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Reads the next non-blank `KeyValue` from `reader`, iterating over blank
/// lines rather than recursing (pathological all-blank inputs must not grow
/// the stack).
fn read_next_kv(reader: &mut impl BufRead) -> Result<Option<KeyValue>, MergeError> {
    let mut line = String::new();
    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            return Ok(None);
        }
        if let Some(kv) = parse_line(&line)? {
            return Ok(Some(kv));
        }
        // blank line: keep looping
    }
}

/// Merges `sources` (each already sorted ascending by key) into `sink` in
/// ascending key order. Returns `Ok(true)` if any bytes were written, or
/// `Ok(false)` (the `Empty` sentinel) if every source was empty.
pub fn merge_sorted<R: BufRead>(
    mut sources: Vec<R>,
    sink: &mut impl Write,
) -> Result<bool, MergeError> {
    let mut heap = BinaryHeap::new();
    let mut live = sources.len();

    for (idx, source) in sources.iter_mut().enumerate() {
        match read_next_kv(source)? {
            Some(kv) => heap.push(HeapEntry { kv, source: idx }),
            None => live -= 1,
        }
    }

    if live == 0 {
        return Ok(false);
    }

    let mut wrote_any = false;
    while live > 1 {
        let HeapEntry { kv, source } = heap.pop().expect("live > 1 implies a non-empty heap");
        sink.write_all(kv.to_line().as_bytes())?;
        wrote_any = true;
        match read_next_kv(&mut sources[source])? {
            Some(next) => heap.push(HeapEntry { kv: next, source }),
            None => live -= 1,
        }
    }

    // Fast path: exactly one source left. Drain the heap's last element,
    // then stream the remainder of that source straight through.
    if let Some(HeapEntry { kv, source }) = heap.pop() {
        sink.write_all(kv.to_line().as_bytes())?;
        wrote_any = true;
        let remainder = &mut sources[source];
        loop {
            let mut buf = String::new();
            let bytes_read = remainder.read_line(&mut buf)?;
            if bytes_read == 0 {
                break;
            }
            if buf.trim().is_empty() {
                continue;
            }
            if !buf.ends_with('\n') {
                buf.push('\n');
            }
            sink.write_all(buf.as_bytes())?;
        }
    }

    Ok(wrote_any)
}
