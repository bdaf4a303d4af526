//! File-backed seed persistence across sampler rebuilds.
//!
//! Tests cover:
//! - First epoch without a snapshot uses the default seed and writes one
//! - A rebuilt sampler continues the stream of the one it replaces
//! - Workers never observe each other's snapshots
//! - A corrupt snapshot falls back to the default and is then repaired

use anyhow::Result;
use seq_bucketing::{
    BucketingConfig, CapacityBudget, DynamicBucketSampler, FileRngStore, LengthIndex,
    RngStateStore, SeedStream, WorkerId,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

fn template_in(dir: &Path) -> String {
    dir.join("rng-{worker}").to_string_lossy().into_owned()
}

fn lengths() -> LengthIndex {
    LengthIndex::from_input_lengths(&(0..80).map(|i| i * 13 % 47 + 1).collect::<Vec<_>>())
}

fn sampler_for(store: Arc<FileRngStore>, worker: WorkerId) -> Result<DynamicBucketSampler> {
    DynamicBucketSampler::new(
        lengths(),
        CapacityBudget::new(150, 100, 6)?,
        16,
        SeedStream::new(store, worker),
    )
}

#[test]
fn first_epoch_writes_snapshot() -> Result<()> {
    let dir = tempdir()?;
    let store = Arc::new(FileRngStore::new(template_in(dir.path()))?);
    let worker = WorkerId::new("w0")?;
    let path = store.path_for(&worker);
    assert!(!path.exists());

    let sampler = sampler_for(store.clone(), worker.clone())?;
    let epoch = sampler.produce_epoch_batches();
    assert_eq!(epoch.seed, Some(42));

    let written: u32 = serde_json::from_str(fs::read_to_string(&path)?.trim())?;
    assert_ne!(written, 42);
    assert_eq!(store.load(&worker)?, Some(written));
    Ok(())
}

#[test]
fn rebuilt_sampler_continues_stream() -> Result<()> {
    let continuous_dir = tempdir()?;
    let continuous = sampler_for(
        Arc::new(FileRngStore::new(template_in(continuous_dir.path()))?),
        WorkerId::from_index(0),
    )?;
    let expected: Vec<_> = (0..3).map(|_| continuous.produce_epoch_batches()).collect();

    // A fresh sampler per epoch, as when worker processes are respawned.
    let restart_dir = tempdir()?;
    let template = template_in(restart_dir.path());
    for want in &expected {
        let sampler = sampler_for(
            Arc::new(FileRngStore::new(template.clone())?),
            WorkerId::from_index(0),
        )?;
        assert_eq!(&sampler.produce_epoch_batches(), want);
    }
    Ok(())
}

#[test]
fn workers_keep_separate_streams() -> Result<()> {
    let dir = tempdir()?;
    let store = Arc::new(FileRngStore::new(template_in(dir.path()))?);
    let w0 = sampler_for(store.clone(), WorkerId::from_index(0))?;
    let w1 = sampler_for(store.clone(), WorkerId::from_index(1))?;

    w0.produce_epoch_batches();
    w0.produce_epoch_batches();
    let after_w0 = store.load(&WorkerId::from_index(0))?;

    // w1 has no snapshot yet, so it starts from the default seed regardless.
    assert_eq!(store.load(&WorkerId::from_index(1))?, None);
    assert_eq!(w1.produce_epoch_batches().seed, Some(42));
    assert_eq!(store.load(&WorkerId::from_index(0))?, after_w0);
    Ok(())
}

#[test]
fn corrupt_snapshot_is_repaired() -> Result<()> {
    let dir = tempdir()?;
    let store = Arc::new(FileRngStore::new(template_in(dir.path()))?);
    let worker = WorkerId::new("w0")?;
    fs::write(store.path_for(&worker), b"{\"seed\": ")?;

    let sampler = sampler_for(store.clone(), worker.clone())?;
    assert_eq!(sampler.produce_epoch_batches().seed, Some(42));
    assert!(store.load(&worker)?.is_some());
    Ok(())
}

#[test]
fn concurrent_workers_write_their_own_snapshots() -> Result<()> {
    let dir = tempdir()?;
    let store = Arc::new(FileRngStore::new(template_in(dir.path()))?);

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let store = store.clone();
            thread::spawn(move || -> Result<Vec<Option<u32>>> {
                let sampler = sampler_for(store, WorkerId::from_index(i))?;
                Ok((0..5)
                    .map(|_| sampler.produce_epoch_batches().seed)
                    .collect())
            })
        })
        .collect();

    let mut streams = Vec::new();
    for handle in handles {
        streams.push(handle.join().expect("worker thread panicked")?);
    }
    // Same default seed, same lengths: every worker walks the same stream.
    assert!(streams.windows(2).all(|w| w[0] == w[1]));
    for i in 0..4 {
        assert!(store.load(&WorkerId::from_index(i))?.is_some());
    }
    Ok(())
}

#[test]
fn config_builds_file_store_from_template() -> Result<()> {
    let dir = tempdir()?;
    let config = BucketingConfig::builder()
        .max_total_input_units(150)
        .max_total_output_units(100)
        .max_batch_elements(6)
        .rng_store_path_template(template_in(dir.path()))
        .default_seed(7)
        .build()?;

    let sampler = config.training_sampler(lengths(), WorkerId::new("gpu3")?, config.rng_store()?)?;
    assert_eq!(sampler.produce_epoch_batches().seed, Some(7));
    assert!(dir.path().join("rng-gpu3").exists());
    Ok(())
}
