use std::env;
use std::error::Error;
use std::time::{Duration, Instant};

use gendev::fake::FakeTransport;
use gendev::{sfnc, Device, StreamEvent};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default)]
struct Counts {
    frames: u64,
    bytes: u64,
    last_id: Option<u64>,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let seconds: u64 = match env::args().nth(1) {
        Some(value) => value.parse()?,
        None => 2,
    };

    let device = Device::new(
        FakeTransport::builder()
            .sensor_size(640, 480)
            .frame_rate(30.0)
            .build(),
    );
    device.try_set_string_feature(sfnc::PIXEL_FORMAT, "Mono8")?;
    device.try_set_float_feature(sfnc::ACQUISITION_FRAME_RATE, 50.0)?;

    let mut stream = device.create_stream(Counts::default(), |counts: &mut Counts, event| {
        match event {
            StreamEvent::Init => info!("delivery thread started"),
            StreamEvent::Frame(frame) => {
                counts.frames += 1;
                counts.bytes += frame.len() as u64;
                counts.last_id = Some(frame.frame_id);
                if counts.frames % 25 == 0 {
                    println!(
                        "frame #{} {}x{} fmt=0x{:08X} ({} bytes)",
                        frame.frame_id,
                        frame.width,
                        frame.height,
                        frame.pixel_format,
                        frame.len()
                    );
                }
            }
            StreamEvent::Exit => println!(
                "received {} frames, {} bytes, last id {:?}",
                counts.frames, counts.bytes, counts.last_id
            ),
        }
    })?;

    let started = Instant::now();
    device.try_execute_command(sfnc::ACQUISITION_START)?;
    std::thread::sleep(Duration::from_secs(seconds));
    device.try_execute_command(sfnc::ACQUISITION_STOP)?;
    stream.stop();

    let stats = stream.stats();
    let elapsed = started.elapsed().as_secs_f64();
    println!(
        "{:.1} fps over {elapsed:.1}s, {} dropped on backpressure",
        stats.frames as f64 / elapsed,
        stats.backpressure_drops
    );
    Ok(())
}
