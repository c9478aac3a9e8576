use std::env;
use std::error::Error;

use gendev::fake::FakeTransport;
use gendev::genapi::Node;
use gendev::{sfnc, Device};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default)]
struct Args {
    width: Option<i64>,
    pixel_format: Option<String>,
    exposure: Option<f64>,
}

fn print_usage() {
    eprintln!("usage: get_set_feature [--width <px>] [--pixel-format <name>] [--exposure <us>]");
}

fn parse_args() -> Result<Args, Box<dyn Error>> {
    let mut args = env::args().skip(1);
    let mut parsed = Args::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--width" => {
                let value = args.next().ok_or("--width requires a value")?;
                parsed.width = Some(value.parse()?);
            }
            "--pixel-format" => {
                parsed.pixel_format = Some(args.next().ok_or("--pixel-format requires a name")?);
            }
            "--exposure" => {
                let value = args.next().ok_or("--exposure requires a value")?;
                parsed.exposure = Some(value.parse()?);
            }
            "--help" => {
                print_usage();
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {other}").into()),
        }
    }
    Ok(parsed)
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();
    let args = parse_args()?;

    let device = Device::new(FakeTransport::builder().sensor_size(1280, 1024).build());
    println!(
        "{} {} ({} bytes of GenICam XML)",
        device.get_string_feature(sfnc::DEVICE_VENDOR_NAME),
        device.get_string_feature(sfnc::DEVICE_MODEL_NAME),
        device.genicam_xml().len()
    );

    if let Some(tree) = device.feature_tree() {
        println!("Feature tree {} with {} nodes", tree.version(), tree.len());
        if let Some(Node::Category(root)) = tree.lookup("Root") {
            for child in &root.children {
                println!("  {child}");
            }
        }
        let mut names: Vec<&str> = tree.names().collect();
        names.sort_unstable();
        for name in names {
            match tree.lookup(name) {
                Some(Node::Integer(node)) => println!(
                    "    {name}: integer [{}, {}] step {} {}",
                    node.min(),
                    node.max(),
                    node.inc().unwrap_or(1),
                    node.unit().unwrap_or("")
                ),
                Some(Node::Float(node)) => println!(
                    "    {name}: float [{}, {}] {}",
                    node.min(),
                    node.max(),
                    node.unit().unwrap_or("")
                ),
                Some(Node::String(node)) => {
                    println!("    {name}: string, up to {} bytes", node.max_length())
                }
                Some(node) => println!("    {name}: {}", node.kind()),
                None => {}
            }
        }
    }

    if let Some(width) = args.width {
        device.try_set_integer_feature(sfnc::WIDTH, width)?;
    }
    if let Some(format) = args.pixel_format.as_deref() {
        device.try_set_string_feature(sfnc::PIXEL_FORMAT, format)?;
    }
    if let Some(exposure) = args.exposure {
        device.try_set_float_feature(sfnc::EXPOSURE_TIME, exposure)?;
    }

    let (min, max) = device
        .integer_feature_bounds(sfnc::WIDTH)
        .ok_or("Width has no bounds")?;
    println!(
        "Width = {} [{min}, {max}]",
        device.get_integer_feature(sfnc::WIDTH)
    );
    println!("PixelFormat = {}", device.get_string_feature(sfnc::PIXEL_FORMAT));
    if let Some((min, max)) = device.float_feature_bounds(sfnc::EXPOSURE_TIME) {
        println!(
            "ExposureTime = {:.1} us [{min}, {max}]",
            device.get_float_feature(sfnc::EXPOSURE_TIME)
        );
    }
    println!(
        "DeviceTemperature = {:.1} C",
        device.get_float_feature(sfnc::DEVICE_TEMPERATURE)
    );

    // Read-only and unknown features degrade quietly on the permissive path.
    device.set_float_feature(sfnc::DEVICE_TEMPERATURE, 20.0);
    println!("NoSuchFeature = {}", device.get_integer_feature("NoSuchFeature"));
    if let Err(err) = device.try_set_float_feature(sfnc::DEVICE_TEMPERATURE, 20.0) {
        println!("strict write to DeviceTemperature: {err}");
    }
    Ok(())
}
