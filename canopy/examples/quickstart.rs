//! Quick start example for canopy.
//!
//! This example demonstrates building a small forest index and querying it.

use canopy::prelude::*;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    println!("🌲 canopy Quick Start Example\n");

    // Create an index for 8-dimensional vectors
    // (Using small dimension for demonstration; real embeddings are 384-1536 dim)
    let mut index = ForestIndex::new(8, Metric::Angular);

    // Sample documents with their "embeddings" (hand-rolled for demo)
    let documents = vec![
        (
            "Introduction to Rust programming",
            [0.9, 0.8, 0.1, 0.0, 0.1, 0.0, 0.2, 0.1],
        ),
        (
            "Advanced Rust patterns and idioms",
            [0.85, 0.9, 0.15, 0.05, 0.1, 0.0, 0.25, 0.15],
        ),
        (
            "Python for data science",
            [0.1, 0.2, 0.9, 0.85, 0.0, 0.1, 0.0, 0.2],
        ),
        (
            "Machine learning fundamentals",
            [0.2, 0.1, 0.7, 0.8, 0.6, 0.7, 0.1, 0.3],
        ),
        (
            "Systems programming with Rust",
            [0.8, 0.7, 0.2, 0.1, 0.15, 0.05, 0.3, 0.2],
        ),
    ];

    // Add documents; ids are assigned densely starting at 0
    println!("📥 Adding {} documents...", documents.len());
    let titles: Vec<&str> = documents.iter().map(|(title, _)| *title).collect();
    for (_, embedding) in &documents {
        index.add(embedding)?;
    }
    println!("✅ Index contains {} vectors\n", index.len());

    // Build the forest; more trees = better recall
    index.build(10)?;
    println!("🌲 Built {} trees\n", index.n_trees());

    // Search for documents similar to "Rust programming"
    let query = [0.88, 0.85, 0.12, 0.03, 0.12, 0.02, 0.22, 0.12];
    println!("🔍 Searching for documents similar to 'Rust programming'...\n");

    let neighbors = index.search_by_vector(&query, 3, None)?;

    println!("📊 Top 3 Results:");
    println!("{:-<60}", "");
    for (rank, neighbor) in neighbors.iter().enumerate() {
        println!(
            "  {}. [ID: {}] {} (distance: {:.4})",
            rank + 1,
            neighbor.id,
            titles[neighbor.id as usize],
            neighbor.distance
        );
    }
    println!("{:-<60}\n", "");

    // "More like this" for a stored item
    println!("🔁 Items similar to item 0 (includes the item itself)...\n");
    for neighbor in index.search_by_item(0, 3, None)? {
        println!(
            "  [ID: {}] {} (distance: {:.4})",
            neighbor.id,
            titles[neighbor.id as usize],
            neighbor.distance
        );
    }

    println!("\n✨ Done! canopy is working correctly.");
    Ok(())
}
