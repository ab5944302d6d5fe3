//! Collective file I/O: the on-disk layout is independent of the rank count.

use std::sync::Arc;

use block_vec::prelude::*;

fn spawn_ranks<F, T>(size: usize, f: F) -> Vec<T>
where
    F: Fn(ThreadComm) -> T + Send + Sync + Clone + 'static,
    T: Send + 'static,
{
    let handles: Vec<_> = ThreadComm::world(size)
        .into_iter()
        .map(|comm| {
            let f = f.clone();
            std::thread::spawn(move || f(comm))
        })
        .collect();
    handles
        .into_iter()
        .map(|h| h.join().expect("rank panicked"))
        .collect()
}

fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("block-vec-{}-{}", std::process::id(), name))
}

#[test]
fn two_rank_write_read_reproduces_local_exactly() {
    let path = temp_path("two-rank-roundtrip");
    let results = spawn_ranks(2, {
        let path = path.clone();
        move |comm| {
            let map = Arc::new(OwnerMap::new(Arc::new(comm), vec![0, 2, 4]).unwrap());
            let mut v = BlockVec::new(map.clone(), 2).unwrap();
            v.set_rand(-1.0, 1.0).unwrap();
            let original = v.local_values().to_vec();
            v.write_to_file(&path).unwrap();

            let mut w = BlockVec::new(map, 2).unwrap();
            w.read_from_file(&path).unwrap();
            (original, w.local_values().to_vec())
        }
    });
    for (original, reread) in results {
        assert_eq!(original, reread);
    }
    let _ = std::fs::remove_file(&path);
}

#[test]
fn file_written_on_two_ranks_reads_on_one() {
    let path = temp_path("cross-rank-count");
    let written = spawn_ranks(2, {
        let path = path.clone();
        move |comm| {
            let map = Arc::new(OwnerMap::new(Arc::new(comm), vec![0, 2, 4]).unwrap());
            let mut v = BlockVec::new(map, 2).unwrap();
            v.set_rand_seeded(33, -1.0, 1.0);
            v.write_to_file(&path).unwrap();
            v.local_values().to_vec()
        }
    });

    let map = Arc::new(OwnerMap::new(Arc::new(NoComm), vec![0, 4]).unwrap());
    let mut single = BlockVec::new(map, 2).unwrap();
    single.read_from_file(&path).unwrap();

    let concatenated: Vec<Scalar> = written.into_iter().flatten().collect();
    assert_eq!(single.local_values(), &concatenated[..]);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn mismatched_header_zeroes_local_on_every_rank() {
    let path = temp_path("bad-header");
    // Write a 4-node, B=2 file.
    {
        let map = Arc::new(OwnerMap::new(Arc::new(NoComm), vec![0, 4]).unwrap());
        let v = BlockVec::new(map, 2).unwrap();
        v.write_to_file(&path).unwrap();
    }
    let results = spawn_ranks(2, {
        let path = path.clone();
        move |comm| {
            let map = Arc::new(OwnerMap::new(Arc::new(comm), vec![0, 3, 6]).unwrap());
            let mut v = BlockVec::new(map, 2).unwrap();
            v.set(5.0);
            let err = v.read_from_file(&path).unwrap_err();
            assert!(matches!(err, BlockVecError::FileLengthMismatch { .. }));
            v.local_values().to_vec()
        }
    });
    for local in results {
        assert!(local.iter().all(|&x| x == 0.0));
    }
    let _ = std::fs::remove_file(&path);
}
