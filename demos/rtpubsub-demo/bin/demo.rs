//! Demonstration of rtpubsub's Publisher/Subscriber façades.
//!
//! Run with: `cargo run -p rtpubsub-demo --bin demo`

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rtpubsub::{PopMode, Publisher, PublisherInitializer, Subscriber, SubscriberInitializer};

fn main() {
    println!("=== rtpubsub Demo ===\n");

    demo_periodic_publish();
    demo_zero_copy_publish();
    demo_subscriber_forwarding();

    println!("\n=== All demos completed successfully! ===");
}

#[derive(Default)]
struct PublishCounters {
    starts: u32,
    elapsed: u32,
    stops: u32,
}

fn on_start(id: u32, ctx: &mut PublishCounters) {
    ctx.starts += 1;
    println!("  [msg {id}] start");
}

fn on_send(id: u32, ctx: &mut PublishCounters, payload: &[u8]) {
    ctx.elapsed += 1;
    println!("  [msg {id}] elapsed, payload = {:?}", String::from_utf8_lossy(payload));
}

fn on_stop(id: u32, ctx: &mut PublishCounters) {
    ctx.stops += 1;
    println!("  [msg {id}] stop");
}

/// Demo 1: a single periodic message, ticked on the calling thread like
/// an RT tick source would.
fn demo_periodic_publish() {
    println!("--- Demo 1: Periodic Publish ---");

    let mut init = PublisherInitializer::<PublishCounters>::new(64).unwrap();
    let msg = init.add_message(4, 0, true, Some(on_start), Some(on_send), Some(on_stop));
    let publisher = Publisher::initialize(init).unwrap();
    publisher.set_message_value(msg, b"hello-opcua").unwrap();

    let mut ctx = PublishCounters::default();
    for tick in 0..12u32 {
        publisher.heart_beat(tick, &mut ctx).unwrap();
    }
    publisher.stop_message(msg).unwrap();
    publisher.heart_beat(12, &mut ctx).unwrap();

    println!(
        "  totals: starts={} elapsed={} stops={}",
        ctx.starts, ctx.elapsed, ctx.stops
    );
    println!("  ✓ Periodic publish complete\n");
}

/// Demo 2: the zero-copy write-view path, and a concurrent writer thread
/// racing the tick thread to show that `heart_beat` never observes a torn
/// payload.
fn demo_zero_copy_publish() {
    println!("--- Demo 2: Zero-Copy Publish + Concurrent Writer ---");

    let mut init = PublisherInitializer::<PublishCounters>::new(8).unwrap();
    let msg = init.add_message(1, 0, true, None, Some(on_send), None);
    let publisher = Arc::new(Publisher::initialize(init).unwrap());

    {
        let mut view = publisher.get_buffer(msg).unwrap();
        let (buf, max, _len) = view.get();
        buf[..3].copy_from_slice(b"abc");
        println!("  zero-copy buffer max size = {max}");
        view.set_len(3).unwrap();
        view.release(false).unwrap();
    }

    let writer_pub = Arc::clone(&publisher);
    let writer = thread::spawn(move || {
        for i in 0..200u32 {
            let val: &[u8] = if i % 2 == 0 { b"A" } else { b"B" };
            writer_pub.set_message_value(msg, val).unwrap();
        }
    });

    let mut ctx = PublishCounters::default();
    for tick in 0..200u32 {
        publisher.heart_beat(tick, &mut ctx).unwrap();
    }
    writer.join().unwrap();

    println!("  elapsed callbacks observed: {}", ctx.elapsed);
    println!("  ✓ Zero-copy + race demo complete\n");
}

struct StreamTag(usize);

#[derive(Default)]
struct ForwardCounters {
    forwarded: u32,
}

fn forward_step(
    sub: &Subscriber<ForwardCounters, StreamTag>,
    ctx: &mut ForwardCounters,
    tag: &mut StreamTag,
    pin: usize,
    bytes: &[u8],
) {
    println!(
        "  [input {pin}, stream {}] forwarding {:?}",
        tag.0,
        String::from_utf8_lossy(bytes)
    );
    sub.output_write(0, bytes).unwrap();
    ctx.forwarded += 1;
}

/// Demo 3: one input pin fed by an external writer thread, forwarded by
/// the tick thread to one output pin, drained by a reader thread.
fn demo_subscriber_forwarding() {
    println!("--- Demo 3: Subscriber Forwarding ---");

    const N: usize = 20;

    let mut init = SubscriberInitializer::<ForwardCounters, StreamTag>::new(forward_step);
    init.add_input(32, 32, PopMode::Normal, StreamTag(0));
    init.add_output(1, 32, 32);
    let subscriber = Arc::new(Subscriber::initialize(init).unwrap());

    let writer_sub = Arc::clone(&subscriber);
    let writer = thread::spawn(move || {
        for i in 0..N {
            writer_sub
                .input_write(0, format!("Hello world {i}").as_bytes())
                .unwrap();
            thread::sleep(Duration::from_millis(1));
        }
    });

    let forwarded = Arc::new(AtomicU32::new(0));
    let tick_sub = Arc::clone(&subscriber);
    let tick_forwarded = Arc::clone(&forwarded);
    let ticker = thread::spawn(move || {
        let mut ctx = ForwardCounters::default();
        while (tick_forwarded.load(Ordering::Acquire) as usize) < N {
            tick_sub.heart_beat(&mut ctx).unwrap();
            tick_forwarded.store(ctx.forwarded, Ordering::Release);
            thread::sleep(Duration::from_millis(2));
        }
    });

    writer.join().unwrap();
    ticker.join().unwrap();

    let mut received = 0;
    while subscriber.output_read(0, 0, PopMode::Normal).is_ok() {
        received += 1;
    }
    println!("  reader observed {received} forwarded messages");
    println!("  ✓ Subscriber forwarding complete\n");
}
