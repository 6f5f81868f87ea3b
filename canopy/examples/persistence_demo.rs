//! Persistence demonstration for canopy.
//!
//! This example shows how to:
//! 1. Build a forest index
//! 2. Save it to a single file
//! 3. Load it into a fresh index via a read-only memory map
//! 4. Verify queries agree before and after the round trip

use canopy::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let index_path = "./demo_index.cnpy";

    // Clean up any previous run
    let _ = fs::remove_file(index_path);

    println!("🌲 canopy Persistence Demo\n");

    // Phase 1: Build and save
    println!("📥 Phase 1: Building and saving an index...");
    let before = {
        let mut index = ForestIndex::new(32, Metric::Euclidean);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let v: Vec<f32> = (0..32).map(|_| rng.gen_range(-1.0..1.0)).collect();
            index.add(&v)?;
        }
        index.build(10)?;

        println!("   ✅ Built {} trees over {} items", index.n_trees(), index.len());
        index.save(index_path)?;
        println!("   💾 Saved to {index_path}\n");

        index.search_by_item(0, 5, Some(100))?
        // Index is dropped here, simulating app shutdown
    };

    // Phase 2: Load and verify
    println!("🔄 Phase 2: Loading the file after 'restart'...");
    let mut index = ForestIndex::new(32, Metric::Euclidean);
    index.load(index_path)?;
    println!(
        "   ✅ Mapped {} items across {} trees\n",
        index.len(),
        index.n_trees()
    );

    let after = index.search_by_item(0, 5, Some(100))?;

    println!("📊 Neighbors of item 0, before vs after reload:");
    println!("{:-<60}", "");
    for (b, a) in before.iter().zip(after.iter()) {
        println!(
            "  [ID: {:>4}] distance {:.4}   |   [ID: {:>4}] distance {:.4}",
            b.id, b.distance, a.id, a.distance
        );
        assert_eq!(b.id, a.id);
    }
    println!("{:-<60}\n", "");

    // Phase 3: Unload releases the mapping; the file stays
    index.unload();
    assert!(matches!(
        index.search_by_item(0, 5, None),
        Err(Error::NotLoaded)
    ));
    println!("🔌 Unloaded; file remains at {index_path}");

    println!("\n✨ Done! Queries survive the save/load round trip.");
    Ok(())
}
