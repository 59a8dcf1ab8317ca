//! Example demonstrating concurrent operations on the lock-free hash set.
//!
//! Worker threads insert, look up, and erase keys while the table doubles
//! underneath them; nothing blocks except the brief spin-yield of writers
//! that catch a rehash in flight.

use durgun_set::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

fn main() {
    println!("=== Lock-Free Concurrent Hash Set Demo ===\n");

    // Start tiny so the workload drives table doublings.
    let set = Arc::new(HashSet::<u64>::with_capacity(16));

    println!("Benchmarking concurrent inserts...");
    let start = Instant::now();
    let mut handles = Vec::new();

    for thread_id in 0..8u64 {
        let set_clone = Arc::clone(&set);
        handles.push(thread::spawn(move || {
            let tid = set_clone.register_thread().unwrap();
            for i in 0..10_000 {
                set_clone.insert(thread_id * 10_000 + i, tid).unwrap();
            }
            tid
        }));
    }

    let tids: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let duration = start.elapsed();
    println!(
        "Inserted 80,000 keys from 8 threads in {:?} ({:.2} ops/sec)",
        duration,
        80_000.0 / duration.as_secs_f64()
    );
    println!("Table grew to {} buckets\n", set.bucket_count());

    println!("Benchmarking concurrent finds...");
    let start = Instant::now();
    let mut handles = Vec::new();

    // Reuse the worker ids: thread registration is one-shot per set, so
    // the second wave of threads inherits the first wave's identities.
    for &tid in &tids {
        let set_clone = Arc::clone(&set);
        handles.push(thread::spawn(move || {
            let mut found = 0u64;
            for key in 0..10_000 {
                found += u64::from(set_clone.find(&key, tid, false));
            }
            found
        }));
    }

    let mut total_found = 0;
    for handle in handles {
        total_found += handle.join().unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Performed 80,000 finds from 8 threads in {:?} ({:.2} ops/sec)",
        duration,
        80_000.0 / duration.as_secs_f64()
    );
    println!("Found {total_found} of the first 10,000 keys\n");

    println!("Benchmarking a mixed workload...");
    let start = Instant::now();
    let mut handles = Vec::new();

    for (slot, &tid) in tids.iter().enumerate() {
        let set_clone = Arc::clone(&set);
        handles.push(thread::spawn(move || match slot {
            // Half the threads read a hot range.
            0..=3 => {
                for key in 0..5_000 {
                    let _ = set_clone.find(&key, tid, false);
                }
            }
            // A quarter keep inserting fresh keys.
            4 | 5 => {
                let base = 80_000 + (slot as u64 - 4) * 5_000;
                for i in 0..5_000 {
                    set_clone.insert(base + i, tid).unwrap();
                }
            }
            // The rest erase the cold end.
            _ => {
                let base = (slot as u64 - 6) * 2_500;
                for i in 0..2_500 {
                    set_clone.erase(&(base + i), tid);
                }
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    let duration = start.elapsed();
    println!("Mixed operations completed in {:?}", duration);
    println!("Final table size: {} buckets\n", set.bucket_count());

    println!("Verifying survivors...");
    let mut verified = 0;
    for key in 5_000..10_000u64 {
        verified += u64::from(set.find(&key, tids[0], true));
    }
    println!("{verified} of 5,000 untouched keys still present");

    println!("\n=== Demo Complete ===");
}
