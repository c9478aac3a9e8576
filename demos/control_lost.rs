use std::error::Error;
use std::time::Duration;

use gendev::fake::FakeTransport;
use gendev::{sfnc, Device};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let transport = FakeTransport::default();
    let link = transport.handle();
    let device = Device::new(transport);

    let observer = device.on_control_lost(|| println!("observer thread: control lost"))?;
    let mut receiver = device.subscribe_control_lost();

    // Another host grabs the camera from a background thread.
    let thief = link.clone();
    let takeover = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        thief.lose_control();
        // Same episode: no second notification.
        thief.lose_control();
    });

    match tokio::time::timeout(Duration::from_secs(2), receiver.recv()).await {
        Ok(Some(_)) => println!("async receiver: control lost"),
        Ok(None) => println!("notifier gone"),
        Err(_) => println!("no control loss within 2s"),
    }
    takeover.join().map_err(|_| "takeover thread panicked")?;
    if let Err(err) = device.try_set_integer_feature(sfnc::WIDTH, 320) {
        println!("write while not in control: {err}");
    }

    link.regain_control();
    device.try_set_integer_feature(sfnc::WIDTH, 320)?;
    println!("Width = {} after regaining control", device.get_integer_feature(sfnc::WIDTH));

    drop(receiver);
    drop(device);
    drop(link);
    observer
        .join()
        .map_err(|_| "control-lost observer panicked")?;
    Ok(())
}
