//! The worker's map/reduce pipeline (component B): registration, the map
//! loop, and the reduce loop, each driven by the coordinator's RPC surface.

use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use rayon::prelude::*;
use tarpc::context;
use thiserror::Error;
use tracing::{info, warn};

use super::coordinator::ServerClient;
use super::function::{MapFn, ReduceFn};
use super::kv::{self, parse_line, KeyValue};
use super::merge::{merge_sorted, MergeError};
use super::rpc::CoordinatorError;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed intermediate line: {0}")]
    Parse(#[from] kv::ParseError),
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error("rpc error: {0}")]
    Rpc(#[from] tarpc::client::RpcError),
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Runs the full worker lifecycle against an already-connected RPC client:
/// register, drain the map phase, then drain the reduce phase.
pub async fn run(client: &ServerClient, map_fn: MapFn, reduce_fn: ReduceFn) -> Result<(), WorkerError> {
    let registration = client.register(context::current()).await?;
    let n_map = registration.n_map;
    let n_reduce = registration.n_reduce;
    info!(n_map, n_reduce, "registered with coordinator");

    loop {
        match client.apply_for_map(context::current()).await? {
            Ok(task) => {
                info!(map_id = task.map_id, filename = %task.filename, "running map task");
                execute_map(map_fn, task.map_id, &task.filename, n_reduce).await?;
                client
                    .map_done(context::current(), task.map_id)
                    .await?;
            }
            Err(CoordinatorError::PhaseDrained) => {
                info!("map phase drained, advancing to reduce phase");
                break;
            }
        }
    }

    loop {
        match client.apply_for_reduce(context::current()).await? {
            Ok(task) => {
                info!(reduce_id = task.reduce_id, "running reduce task");
                execute_reduce(reduce_fn, task.reduce_id, n_map).await?;
                client
                    .reduce_done(context::current(), task.reduce_id)
                    .await?;
            }
            Err(CoordinatorError::PhaseDrained) => {
                info!("reduce phase drained, exiting");
                break;
            }
        }
    }

    Ok(())
}

/// Reads `filename`, buckets the map output by partition, sorts each bucket,
/// and persists it as `mr-<map_id>-<r>` via write-to-temp + atomic rename.
async fn execute_map(
    map_fn: MapFn,
    map_id: i32,
    filename: &str,
    n_reduce: i32,
) -> Result<(), WorkerError> {
    let contents = tokio::fs::read_to_string(filename).await?;
    let kvs = map_fn(filename, &contents);

    let mut buckets: Vec<Vec<KeyValue>> = (0..n_reduce).map(|_| Vec::new()).collect();
    for kv in kvs {
        let partition = kv::partition_of(&kv.key, n_reduce) as usize;
        buckets[partition].push(kv);
    }
    buckets
        .par_iter_mut()
        .for_each(|bucket| bucket.sort_by(|a, b| a.key.cmp(&b.key)));

    for (r, bucket) in buckets.into_iter().enumerate() {
        write_intermediate(map_id, r as i32, &bucket).await?;
    }
    Ok(())
}

/// Writes `bucket` to a uniquely-named temp file and renames it into
/// `mr-<map_id>-<r>`. Two workers racing to complete the same map id both
/// produce identical content, so whichever rename lands last wins harmlessly.
async fn write_intermediate(map_id: i32, r: i32, bucket: &[KeyValue]) -> Result<(), WorkerError> {
    let final_path = format!("mr-{map_id}-{r}");
    let tmp_path = format!("{final_path}.tmp-{}", std::process::id());

    let mut file = tokio::fs::File::create(&tmp_path).await?;
    let mut buf = String::new();
    for kv in bucket {
        buf.push_str(&kv.to_line());
    }
    use tokio::io::AsyncWriteExt;
    file.write_all(buf.as_bytes()).await?;
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, &final_path).await?;
    Ok(())
}

/// Merges `mr-<m>-<reduce_id>` for all `m`, groups by key, invokes
/// `reduce_fn` per group, and writes `mr-out-<reduce_id>`. Runs on a blocking
/// thread since it's a synchronous, heap-driven external merge.
async fn execute_reduce(reduce_fn: ReduceFn, reduce_id: i32, n_map: i32) -> Result<(), WorkerError> {
    tokio::task::spawn_blocking(move || reduce_blocking(reduce_fn, reduce_id, n_map)).await??;
    Ok(())
}

fn reduce_blocking(reduce_fn: ReduceFn, reduce_id: i32, n_map: i32) -> Result<(), WorkerError> {
    let mut readers = Vec::with_capacity(n_map as usize);
    for m in 0..n_map {
        let path = format!("mr-{m}-{reduce_id}");
        readers.push(BufReader::new(std::fs::File::open(&path)?));
    }

    let tmp_path = format!("mr-out-{reduce_id}.merge-tmp-{}", std::process::id());
    let wrote_any = {
        let mut tmp = std::fs::File::create(&tmp_path)?;
        let wrote = merge_sorted(readers, &mut tmp)?;
        tmp.flush()?;
        wrote
    };

    if !wrote_any {
        std::fs::remove_file(&tmp_path)?;
        warn!(reduce_id, "partition empty, no mr-out file written");
        return Ok(());
    }

    group_and_reduce(reduce_fn, &tmp_path, reduce_id)?;
    std::fs::remove_file(&tmp_path)?;
    Ok(())
}

/// Scans the sorted, merged temp file, accumulates values per key, and emits
/// one `key SP reduce(key, values) LF` line per distinct key.
fn group_and_reduce(reduce_fn: ReduceFn, tmp_path: &str, reduce_id: i32) -> Result<(), WorkerError> {
    let mut reader = BufReader::new(std::fs::File::open(tmp_path)?);
    let out_path = format!("mr-out-{reduce_id}");
    let mut out = BufWriter::new(std::fs::File::create(&out_path)?);

    let mut current_key: Option<String> = None;
    let mut values: Vec<String> = Vec::new();
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = std::io::BufRead::read_line(&mut reader, &mut line)?;
        if bytes_read == 0 {
            break;
        }
        let kv = match parse_line(&line)? {
            Some(kv) => kv,
            None => continue,
        };
        match &current_key {
            Some(key) if *key == kv.key => values.push(kv.value),
            Some(key) => {
                emit_group(&mut out, key, &values, reduce_fn)?;
                current_key = Some(kv.key);
                values = vec![kv.value];
            }
            None => {
                current_key = Some(kv.key);
                values = vec![kv.value];
            }
        }
    }
    if let Some(key) = current_key {
        emit_group(&mut out, &key, &values, reduce_fn)?;
    }
    out.flush()?;
    info!(reduce_id, path = %Path::new(&out_path).display(), "reduce output written");
    Ok(())
}

fn emit_group(
    out: &mut impl Write,
    key: &str,
    values: &[String],
    reduce_fn: ReduceFn,
) -> Result<(), WorkerError> {
    let result = reduce_fn(key, values);
    out.write_all(format!("{key} {result}\n").as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mr::function::wc;
    use std::sync::Mutex;
    use tempfile::tempdir;

    // These tests rely on `execute_map`/`execute_reduce` resolving relative
    // intermediate paths against the process cwd, so they serialize on this
    // lock to avoid racing each other's `set_current_dir`.
    static CWD_LOCK: Mutex<()> = Mutex::new(());

    #[tokio::test]
    async fn execute_map_partitions_and_sorts_keys() {
        let _guard = CWD_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();
        std::fs::write("input.txt", "b a b a c").unwrap();

        execute_map(wc::map, 0, "input.txt", 3).await.unwrap();

        for r in 0..3 {
            let path = format!("mr-0-{r}");
            assert!(Path::new(&path).exists(), "missing {path}");
            let contents = std::fs::read_to_string(&path).unwrap();
            let keys: Vec<&str> = contents.lines().map(|l| l.split(' ').next().unwrap()).collect();
            let mut sorted = keys.clone();
            sorted.sort();
            assert_eq!(keys, sorted, "partition {r} not sorted: {contents:?}");
        }
    }

    #[tokio::test]
    async fn execute_reduce_groups_values_by_key() {
        let _guard = CWD_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();
        std::fs::write("mr-0-0", "a 1\nb 1\n").unwrap();
        std::fs::write("mr-1-0", "a 1\n").unwrap();

        execute_reduce(wc::reduce, 0, 2).await.unwrap();

        let out = std::fs::read_to_string("mr-out-0").unwrap();
        assert_eq!(out, "a 2\nb 1\n");
        let leftover_tmp = std::fs::read_dir(".")
            .unwrap()
            .filter_map(|entry| entry.ok())
            .any(|entry| entry.file_name().to_string_lossy().contains("merge-tmp"));
        assert!(!leftover_tmp, "merge temp file was not cleaned up");
    }

    #[tokio::test]
    async fn execute_reduce_on_empty_partition_writes_no_output() {
        let _guard = CWD_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();
        std::fs::write("mr-0-0", "").unwrap();

        execute_reduce(wc::reduce, 0, 1).await.unwrap();

        assert!(!Path::new("mr-out-0").exists());
    }
}
