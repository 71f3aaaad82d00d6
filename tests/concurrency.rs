use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use geo_types::line_string;
use vmap::engine::{LineRecord, MemoryDataset, MemoryEngine};
use vmap::{DatasetIdentity, FeatureType, MapOptions, VectorMap, VectorMapStore};

fn roads() -> DatasetIdentity {
    DatasetIdentity::new("spearfish", "PERMANENT", "roads")
}

fn road(x: f64) -> LineRecord {
    LineRecord::new(
        FeatureType::LINE,
        line_string![(x: x, y: 0.), (x: x + 1., y: 0.)],
    )
    .with_cat(1, 1)
}

fn roads_store() -> (Arc<MemoryEngine>, VectorMapStore) {
    let mut dataset = MemoryDataset::new();
    for i in 0..10 {
        dataset.add_line(road(f64::from(i)));
    }
    let engine = Arc::new(MemoryEngine::new());
    engine.insert(roads(), dataset);
    let store = VectorMapStore::new(engine.clone(), MapOptions::default());
    (engine, store)
}

/// Read every line the way a feature iterator does, stopping when cancelled.
fn iterate(map: &VectorMap) -> usize {
    let token = map.register_iterator();
    let mut read = 0;
    for lid in 1..=10 {
        if token.is_cancelled() {
            break;
        }
        let Some(_section) = token.enter() else {
            break;
        };
        if map.line_geometry(lid).is_some() {
            read += 1;
        }
    }
    read
}

#[test]
fn test_update_waits_for_reading_iterator() {
    let (_engine, store) = roads_store();
    let map = store.open_map(&roads());
    map.open().unwrap();

    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let reader = {
        let map = Arc::clone(&map);
        thread::spawn(move || {
            let token = map.register_iterator();
            let section = token.enter().unwrap();
            let geometry = map.line_geometry(1);
            entered_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            drop(section);
            (geometry.is_some(), token.is_closed())
        })
    };
    entered_rx.recv().unwrap();

    let updated = Arc::new(AtomicBool::new(false));
    let updater = {
        let map = Arc::clone(&map);
        let updated = Arc::clone(&updated);
        thread::spawn(move || {
            map.update().unwrap();
            updated.store(true, Ordering::SeqCst);
        })
    };

    thread::sleep(Duration::from_millis(100));
    assert!(!updated.load(Ordering::SeqCst));
    assert_eq!(map.version(), 0);

    release_tx.send(()).unwrap();
    updater.join().unwrap();
    assert!(updated.load(Ordering::SeqCst));
    assert_eq!(map.version(), 1);
    assert_eq!(reader.join().unwrap(), (true, true));
}

#[test]
fn test_layer_churn_leaves_map_closed() {
    let (engine, store) = roads_store();
    let map = store.open_map(&roads());

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let map = Arc::clone(&map);
            thread::spawn(move || {
                for _ in 0..50 {
                    let layer = map.open_layer(1);
                    assert!(layer.user_count() > 0);
                    iterate(&map);
                    map.close_layer(&layer);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(map.user_count(), 0);
    assert!(map.layers().is_empty());
    assert!(!map.is_valid());
    assert_eq!(engine.open_handles(&roads()), 0);
}

#[test]
fn test_reads_during_edit_session() {
    let (engine, store) = roads_store();
    let map = store.open_map(&roads());
    let layer = map.open_layer(1);
    map.start_edit().unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let map = Arc::clone(&map);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut reads = 0;
                loop {
                    // line 1 is never touched by the editor
                    assert!(map.line_geometry(1).is_some());
                    reads += 1;
                    if stop.load(Ordering::SeqCst) {
                        return reads;
                    }
                }
            })
        })
        .collect();

    let mut lid = 2;
    for i in 0..100 {
        lid = map.rewrite_line(lid, &road(f64::from(i))).unwrap();
    }
    map.write_line(&road(100.)).unwrap();
    stop.store(true, Ordering::SeqCst);
    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }

    let ledger = map.close_edit(false).unwrap().unwrap();
    assert!(ledger.is_consistent());
    assert_eq!(ledger.current_id(2), Some(lid));
    assert_eq!(ledger.new_to_old().len(), 1);
    assert_eq!(
        engine.dataset(&roads()).unwrap().line_count(),
        map.num_lines()
    );
    map.close_layer(&layer);
}

#[test]
fn test_structural_changes_cancel_iterators() {
    let (_engine, store) = roads_store();
    let map = store.open_map(&roads());
    let layer = map.open_layer(1);

    let iterators: Vec<_> = (0..4)
        .map(|_| {
            let map = Arc::clone(&map);
            thread::spawn(move || {
                for _ in 0..100 {
                    assert!(iterate(&map) <= 10);
                }
            })
        })
        .collect();

    for _ in 0..10 {
        map.update().unwrap();
        map.start_edit().unwrap();
        map.write_line(&road(50.)).unwrap();
        map.close_edit(false).unwrap();
    }
    for iterator in iterators {
        iterator.join().unwrap();
    }

    assert_eq!(map.version(), 20);
    assert!(map.is_valid());
    map.close_layer(&layer);
}

#[test]
fn test_close_waits_for_every_reading_iterator() {
    let (engine, store) = roads_store();
    let map = store.open_map(&roads());
    map.open().unwrap();

    let (entered_tx, entered_rx) = mpsc::channel();
    let release = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..3)
        .map(|_| {
            let map = Arc::clone(&map);
            let entered_tx = entered_tx.clone();
            let release = Arc::clone(&release);
            thread::spawn(move || {
                let token = map.register_iterator();
                let section = token.enter().unwrap();
                entered_tx.send(()).unwrap();
                while !release.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(5));
                }
                drop(section);
            })
        })
        .collect();
    for _ in 0..3 {
        entered_rx.recv().unwrap();
    }

    let closer = {
        let map = Arc::clone(&map);
        thread::spawn(move || map.close())
    };
    thread::sleep(Duration::from_millis(100));
    assert!(!closer.is_finished());
    assert_eq!(engine.open_handles(&roads()), 1);

    release.store(true, Ordering::SeqCst);
    closer.join().unwrap();
    assert!(!map.is_valid());
    assert_eq!(engine.open_handles(&roads()), 0);
    for reader in readers {
        reader.join().unwrap();
    }
}
