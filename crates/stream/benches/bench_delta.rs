use std::hint::black_box;
use std::time::Instant;

use arena_common::{BodyConfig, WorldSettings};
use arena_kernel::{World, WorldOptions};
use arena_stream::{DeltaBroadcaster, ServerMessage, SyncConfig, TickCounter};

fn make_world(body_count: usize) -> World {
    let mut world = World::new(WorldOptions {
        seed: Some(1),
        settings: WorldSettings {
            max_pucks: body_count as u32,
            ..WorldSettings::default()
        },
        ..WorldOptions::default()
    });
    for i in 0..body_count {
        world
            .add_body(BodyConfig::new(format!("p{i}")).with_diameter(8.0))
            .expect("bench world fits");
    }
    world
}

fn bench_changed_states(body_count: usize, iterations: usize) {
    let world = make_world(body_count);

    let start = Instant::now();
    for _ in 0..iterations {
        let _ = black_box(world.changed_states(black_box(6.0)));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!(
        "  changed_states ({body_count} bodies, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}"
    );
}

fn bench_broadcast_tick(body_count: usize, iterations: usize) {
    let world = make_world(body_count);
    let ticks = TickCounter::new();
    let mut broadcaster = DeltaBroadcaster::new(SyncConfig::default());

    let start = Instant::now();
    for _ in 0..iterations {
        let _ = black_box(broadcaster.next_message(black_box(&world), &ticks, 0));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!(
        "  broadcast tick ({body_count} bodies, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}"
    );
}

fn bench_encode(body_count: usize, iterations: usize) {
    let world = make_world(body_count);
    let ticks = TickCounter::new();
    let msg = ServerMessage::State(arena_stream::state_message(world.all_states(), &ticks, 0));

    let start = Instant::now();
    let mut bytes = 0;
    for _ in 0..iterations {
        bytes = black_box(msg.encode().expect("encodable")).len();
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!(
        "  encode full state ({body_count} bodies, {bytes} bytes, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}"
    );
}

fn main() {
    println!("=== Delta Broadcast Benchmarks ===\n");

    println!("Changed states:");
    bench_changed_states(100, 10000);
    bench_changed_states(1000, 1000);

    println!("\nBroadcast tick (delta/full decision + collection):");
    bench_broadcast_tick(100, 10000);
    bench_broadcast_tick(1000, 1000);

    println!("\nJSON encoding:");
    bench_encode(100, 1000);
    bench_encode(1000, 100);

    println!("\n=== Done ===");
}
