//! Simulated camera transport for tests and demos without hardware.
//!
//! The fake camera keeps a flat big-endian register space, exposes a small
//! SFNC feature tree over it and generates test-pattern frames on an
//! acquisition thread while `AcquisitionStart` is in effect. A
//! [`FakeHandle`] lets tests break the link or revoke control.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::control::ControlLostNotifier;
use crate::device::{DeviceError, Transport};
use crate::frame::Frame;
use crate::genapi::{AccessMode, NodeDecl, NodeMap, Sign};
use crate::stream::{FrameCallback, FrameSink, Stream, StreamBuilder};

/// Register addresses of the fake camera.
pub mod regs {
    pub const DEVICE_VENDOR_NAME: u32 = 0x0048;
    pub const DEVICE_MODEL_NAME: u32 = 0x0068;
    pub const DEVICE_USER_ID: u32 = 0x00E8;
    pub const WIDTH: u32 = 0x0100;
    pub const HEIGHT: u32 = 0x0104;
    pub const PIXEL_FORMAT: u32 = 0x0108;
    pub const EXPOSURE_TIME: u32 = 0x010C;
    pub const GAIN: u32 = 0x0110;
    pub const REVERSE_X: u32 = 0x0114;
    pub const ACQUISITION_FRAME_RATE: u32 = 0x0118;
    pub const DEVICE_TEMPERATURE: u32 = 0x011C;
    pub const ACQUISITION_START: u32 = 0x0120;
    pub const ACQUISITION_STOP: u32 = 0x0124;
    pub const SENSOR_WIDTH: u32 = 0x0128;
    pub const SENSOR_HEIGHT: u32 = 0x012C;

    pub const STRING_LEN: u32 = 32;
    pub const USER_ID_LEN: u32 = 16;
}

/// PFNC codes of the pixel formats the fake camera renders.
pub mod pixel_format {
    pub const MONO8: u32 = 0x0108_0001;
    pub const MONO16: u32 = 0x0110_0007;
    pub const RGB8: u32 = 0x0218_0014;
}

const MEMORY_SIZE: usize = 0x1000;
const SLEEP_SLICE: Duration = Duration::from_millis(5);

/// Static configuration of a fake camera.
#[derive(Debug, Clone)]
pub struct FakeConfig {
    pub sensor_width: u32,
    pub sensor_height: u32,
    pub frame_rate: f64,
    pub vendor_name: String,
    pub model_name: String,
    /// Delivery queue depth of streams created on this transport.
    pub queue_depth: usize,
}

impl Default for FakeConfig {
    fn default() -> Self {
        Self {
            sensor_width: 640,
            sensor_height: 480,
            frame_rate: 25.0,
            vendor_name: "gendev".into(),
            model_name: "FakeCamera".into(),
            queue_depth: 8,
        }
    }
}

/// Builder for [`FakeTransport`].
#[derive(Debug, Clone, Default)]
pub struct FakeTransportBuilder {
    config: FakeConfig,
}

impl FakeTransportBuilder {
    /// Sensor resolution; also the initial and maximum ROI size.
    pub fn sensor_size(mut self, width: u32, height: u32) -> Self {
        self.config.sensor_width = width.max(1);
        self.config.sensor_height = height.max(1);
        self
    }

    /// Initial acquisition frame rate in Hz, clamped to `[1, 200]`.
    pub fn frame_rate(mut self, fps: f64) -> Self {
        self.config.frame_rate = fps.clamp(1.0, 200.0);
        self
    }

    /// Value of the read-only `DeviceVendorName` feature.
    pub fn vendor_name(mut self, name: impl Into<String>) -> Self {
        self.config.vendor_name = name.into();
        self
    }

    /// Value of the read-only `DeviceModelName` feature.
    pub fn model_name(mut self, name: impl Into<String>) -> Self {
        self.config.model_name = name.into();
        self
    }

    /// Delivery queue depth of streams created on the transport.
    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.config.queue_depth = depth.max(1);
        self
    }

    pub fn build(self) -> FakeTransport {
        FakeTransport::new(self.config)
    }
}

#[derive(Debug)]
struct Shared {
    config: FakeConfig,
    xml: Bytes,
    memory: Mutex<Vec<u8>>,
    link_up: AtomicBool,
    controlled: AtomicBool,
    acquiring: AtomicBool,
    frames_generated: AtomicU64,
    sink: Mutex<Option<FrameSink>>,
    acquisition: Mutex<Option<JoinHandle<()>>>,
    control_lost: OnceLock<ControlLostNotifier>,
}

/// In-process camera implementing [`Transport`].
#[derive(Debug)]
pub struct FakeTransport {
    shared: Arc<Shared>,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new(FakeConfig::default())
    }
}

impl FakeTransport {
    /// Builder starting from [`FakeConfig::default`].
    pub fn builder() -> FakeTransportBuilder {
        FakeTransportBuilder::default()
    }

    pub fn new(config: FakeConfig) -> Self {
        let xml = Bytes::from(format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
             <RegisterDescription ModelName=\"{}\" VendorName=\"{}\" \
             SchemaMajorVersion=\"1\" SchemaMinorVersion=\"1\" SchemaSubMinorVersion=\"0\"/>\n",
            config.model_name, config.vendor_name
        ));
        let shared = Shared {
            xml,
            memory: Mutex::new(vec![0; MEMORY_SIZE]),
            link_up: AtomicBool::new(true),
            controlled: AtomicBool::new(true),
            acquiring: AtomicBool::new(false),
            frames_generated: AtomicU64::new(0),
            sink: Mutex::new(None),
            acquisition: Mutex::new(None),
            control_lost: OnceLock::new(),
            config,
        };
        shared.reset_registers();
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Test hook controlling link and control state.
    pub fn handle(&self) -> FakeHandle {
        FakeHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn config(&self) -> &FakeConfig {
        &self.shared.config
    }
}

impl Drop for FakeTransport {
    fn drop(&mut self) {
        self.shared.stop_acquisition();
        lock(&self.shared.sink).take();
    }
}

impl Transport for FakeTransport {
    fn read_memory(&self, address: u32, buffer: &mut [u8]) -> Result<(), DeviceError> {
        self.shared.ensure_link()?;
        let memory = lock(&self.shared.memory);
        let range = memory_range(address, buffer.len())?;
        buffer.copy_from_slice(&memory[range]);
        Ok(())
    }

    fn write_memory(&self, address: u32, data: &[u8]) -> Result<(), DeviceError> {
        self.shared.ensure_link()?;
        if !self.shared.controlled.load(Ordering::Acquire) {
            return Err(DeviceError::transport("write rejected: control lost"));
        }
        let range = memory_range(address, data.len())?;
        lock(&self.shared.memory)[range.clone()].copy_from_slice(data);
        if range.contains(&(regs::ACQUISITION_START as usize)) {
            self.shared.take_command(regs::ACQUISITION_START, || {
                Shared::start_acquisition(&self.shared)
            });
        }
        if range.contains(&(regs::ACQUISITION_STOP as usize)) {
            self.shared
                .take_command(regs::ACQUISITION_STOP, || self.shared.stop_acquisition());
        }
        Ok(())
    }

    fn read_register(&self, address: u32) -> Result<u32, DeviceError> {
        let mut buf = [0u8; 4];
        self.read_memory(address, &mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    fn write_register(&self, address: u32, value: u32) -> Result<(), DeviceError> {
        self.write_memory(address, &value.to_be_bytes())
    }

    fn create_stream(&self, callback: FrameCallback) -> Result<Stream, DeviceError> {
        self.shared.ensure_link()?;
        let (stream, sink) = StreamBuilder::new()
            .queue_depth(self.shared.config.queue_depth)
            .thread_name("fake-stream")
            .spawn(callback)?;
        if lock(&self.shared.sink).replace(sink).is_some() {
            debug!("previous fake stream detached");
        }
        Ok(stream)
    }

    fn load_feature_tree(&self) -> Result<NodeMap, DeviceError> {
        self.shared.ensure_link()?;
        Ok(NodeMap::new("1.1.0", feature_decls(&self.shared.config)))
    }

    fn genicam_xml(&self) -> Bytes {
        self.shared.xml.clone()
    }

    fn attach(&mut self, control_lost: ControlLostNotifier) {
        if self.shared.control_lost.set(control_lost).is_err() {
            warn!("fake transport attached to a second device; keeping the first notifier");
        }
    }
}

/// Test hook into a [`FakeTransport`] that outlives the move into a device.
#[derive(Debug, Clone)]
pub struct FakeHandle {
    shared: Arc<Shared>,
}

impl FakeHandle {
    /// Simulate another host taking over the camera.
    ///
    /// Writes are rejected until [`regain_control`](Self::regain_control).
    /// Returns whether a control-lost notification was raised.
    pub fn lose_control(&self) -> bool {
        self.shared.controlled.store(false, Ordering::Release);
        self.shared.stop_acquisition();
        self.shared.raise_control_lost()
    }

    /// Accept writes again and rearm the notifier for the next episode.
    pub fn regain_control(&self) {
        self.shared.controlled.store(true, Ordering::Release);
        if let Some(notifier) = self.shared.control_lost.get() {
            notifier.rearm();
        }
    }

    /// Bring the link up or down. A link going down also loses control.
    pub fn set_link_up(&self, up: bool) {
        let was_up = self.shared.link_up.swap(up, Ordering::AcqRel);
        if was_up && !up {
            info!("fake link down");
            self.lose_control();
        } else if !was_up && up {
            info!("fake link up");
        }
    }

    /// Whether the acquisition thread is generating frames.
    pub fn is_acquiring(&self) -> bool {
        self.shared.acquiring.load(Ordering::Acquire)
    }

    /// Frames rendered since the transport was created, delivered or not.
    pub fn frames_generated(&self) -> u64 {
        self.shared.frames_generated.load(Ordering::Relaxed)
    }
}

impl Shared {
    fn reset_registers(&self) {
        let config = &self.config;
        let mut memory = lock(&self.memory);
        put_string(&mut memory, regs::DEVICE_VENDOR_NAME, regs::STRING_LEN, &config.vendor_name);
        put_string(&mut memory, regs::DEVICE_MODEL_NAME, regs::STRING_LEN, &config.model_name);
        put_u32(&mut memory, regs::WIDTH, config.sensor_width);
        put_u32(&mut memory, regs::HEIGHT, config.sensor_height);
        put_u32(&mut memory, regs::SENSOR_WIDTH, config.sensor_width);
        put_u32(&mut memory, regs::SENSOR_HEIGHT, config.sensor_height);
        put_u32(&mut memory, regs::PIXEL_FORMAT, pixel_format::MONO8);
        // ExposureTime in 0.1 us steps, frame rate in 0.01 Hz, temperature in 0.1 C.
        put_u32(&mut memory, regs::EXPOSURE_TIME, 10_000);
        put_u32(&mut memory, regs::ACQUISITION_FRAME_RATE, (config.frame_rate * 100.0).round() as u32);
        put_u32(&mut memory, regs::DEVICE_TEMPERATURE, 385);
    }

    fn ensure_link(&self) -> Result<(), DeviceError> {
        if self.link_up.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(DeviceError::transport("link down"))
        }
    }

    fn raise_control_lost(&self) -> bool {
        match self.control_lost.get() {
            Some(notifier) => notifier.notify(),
            None => false,
        }
    }

    /// Self-clearing command register: run `action` when it holds a nonzero
    /// value, then reset it.
    fn take_command(&self, address: u32, action: impl FnOnce()) {
        let fired = {
            let mut memory = lock(&self.memory);
            let fired = get_u32(&memory, address) != 0;
            put_u32(&mut memory, address, 0);
            fired
        };
        if fired {
            action();
        }
    }

    fn start_acquisition(shared: &Arc<Shared>) {
        if shared.acquiring.swap(true, Ordering::AcqRel) {
            return;
        }
        let worker = Arc::clone(shared);
        match thread::Builder::new()
            .name("fake-acquisition".into())
            .spawn(move || worker.acquisition_loop())
        {
            Ok(handle) => {
                *lock(&shared.acquisition) = Some(handle);
                info!("fake acquisition started");
            }
            Err(err) => {
                shared.acquiring.store(false, Ordering::Release);
                warn!(error = %err, "failed to spawn fake acquisition thread");
            }
        }
    }

    fn stop_acquisition(&self) {
        self.acquiring.store(false, Ordering::Release);
        let Some(handle) = lock(&self.acquisition).take() else {
            return;
        };
        if handle.thread().id() != thread::current().id() && handle.join().is_err() {
            warn!("fake acquisition thread panicked");
        }
        info!(
            frames = self.frames_generated.load(Ordering::Relaxed),
            "fake acquisition stopped"
        );
    }

    fn acquisition_loop(&self) {
        let mut rng = fastrand::Rng::with_seed(0x5EED);
        let started = Instant::now();
        while self.acquiring.load(Ordering::Acquire) {
            let period = self.frame_period();
            let frame = self.render_frame(&mut rng, started);
            let sink = lock(&self.sink).clone();
            if let Some(sink) = sink {
                if !sink.push(frame) {
                    debug!("fake stream closed, detaching sink");
                    lock(&self.sink).take();
                }
            }
            self.sleep_while_acquiring(period);
        }
    }

    fn frame_period(&self) -> Duration {
        let raw = get_u32(&lock(&self.memory), regs::ACQUISITION_FRAME_RATE);
        let fps = (f64::from(raw) / 100.0).clamp(1.0, 200.0);
        Duration::from_secs_f64(1.0 / fps)
    }

    fn sleep_while_acquiring(&self, period: Duration) {
        let deadline = Instant::now() + period;
        while self.acquiring.load(Ordering::Acquire) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }

    fn render_frame(&self, rng: &mut fastrand::Rng, started: Instant) -> Frame {
        let (width, height, format) = {
            let memory = lock(&self.memory);
            (
                get_u32(&memory, regs::WIDTH),
                get_u32(&memory, regs::HEIGHT),
                get_u32(&memory, regs::PIXEL_FORMAT),
            )
        };
        let bytes_per_pixel = match format {
            pixel_format::MONO16 => 2,
            pixel_format::RGB8 => 3,
            _ => 1,
        };
        let frame_id = self.frames_generated.fetch_add(1, Ordering::Relaxed);
        let mut payload = vec![0u8; width as usize * height as usize * bytes_per_pixel];
        for (index, byte) in payload.iter_mut().enumerate() {
            *byte = (index as u64).wrapping_add(frame_id) as u8 ^ rng.u8(0..4);
        }
        Frame {
            payload: Bytes::from(payload),
            frame_id,
            width,
            height,
            pixel_format: format,
            ts_dev: Some(started.elapsed().as_nanos() as u64),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn memory_range(address: u32, len: usize) -> Result<std::ops::Range<usize>, DeviceError> {
    let start = address as usize;
    match start.checked_add(len) {
        Some(end) if end <= MEMORY_SIZE => Ok(start..end),
        _ => Err(DeviceError::transport(format!(
            "access 0x{address:08X}+{len} outside device memory"
        ))),
    }
}

fn get_u32(memory: &[u8], address: u32) -> u32 {
    let at = address as usize;
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&memory[at..at + 4]);
    u32::from_be_bytes(buf)
}

fn put_u32(memory: &mut [u8], address: u32, value: u32) {
    let at = address as usize;
    memory[at..at + 4].copy_from_slice(&value.to_be_bytes());
}

fn put_string(memory: &mut [u8], address: u32, len: u32, value: &str) {
    let at = address as usize;
    let block = &mut memory[at..at + len as usize];
    block.fill(0);
    let n = value.len().min(block.len());
    block[..n].copy_from_slice(&value.as_bytes()[..n]);
}

fn feature_decls(config: &FakeConfig) -> Vec<NodeDecl> {
    let integer = |name: &str, address: u32, access: AccessMode, max: u32| NodeDecl::Integer {
        name: name.into(),
        address: address.into(),
        len: 4,
        access,
        sign: Sign::Unsigned,
        min: 1,
        max: max.into(),
        inc: None,
        unit: Some("px".into()),
    };
    let float = |name: &str,
                 address: u32,
                 access: AccessMode,
                 (min, max): (f64, f64),
                 den: i64,
                 unit: &str| NodeDecl::Float {
        name: name.into(),
        address: address.into(),
        len: 4,
        access,
        min,
        max,
        unit: Some(unit.into()),
        scale: Some((1, den)),
        offset: None,
    };
    let string = |name: &str, address: u32, len: u32, access: AccessMode| NodeDecl::String {
        name: name.into(),
        address: address.into(),
        len,
        access,
    };
    let command = |name: &str, address: u32| NodeDecl::Command {
        name: name.into(),
        address: address.into(),
        len: 4,
        value: None,
    };

    vec![
        NodeDecl::Category {
            name: "Root".into(),
            children: vec![
                "DeviceControl".into(),
                "ImageFormatControl".into(),
                "AcquisitionControl".into(),
                "AnalogControl".into(),
            ],
        },
        NodeDecl::Category {
            name: "DeviceControl".into(),
            children: vec![
                sfnc::DEVICE_VENDOR_NAME.into(),
                sfnc::DEVICE_MODEL_NAME.into(),
                sfnc::DEVICE_USER_ID.into(),
                sfnc::DEVICE_TEMPERATURE.into(),
            ],
        },
        NodeDecl::Category {
            name: "ImageFormatControl".into(),
            children: vec![
                sfnc::SENSOR_WIDTH.into(),
                sfnc::SENSOR_HEIGHT.into(),
                sfnc::WIDTH.into(),
                sfnc::HEIGHT.into(),
                sfnc::PIXEL_FORMAT.into(),
                sfnc::REVERSE_X.into(),
            ],
        },
        NodeDecl::Category {
            name: "AcquisitionControl".into(),
            children: vec![
                sfnc::ACQUISITION_START.into(),
                sfnc::ACQUISITION_STOP.into(),
                sfnc::ACQUISITION_FRAME_RATE.into(),
                sfnc::EXPOSURE_TIME.into(),
            ],
        },
        NodeDecl::Category {
            name: "AnalogControl".into(),
            children: vec![sfnc::GAIN.into()],
        },
        string(sfnc::DEVICE_VENDOR_NAME, regs::DEVICE_VENDOR_NAME, regs::STRING_LEN, AccessMode::RO),
        string(sfnc::DEVICE_MODEL_NAME, regs::DEVICE_MODEL_NAME, regs::STRING_LEN, AccessMode::RO),
        string(sfnc::DEVICE_USER_ID, regs::DEVICE_USER_ID, regs::USER_ID_LEN, AccessMode::RW),
        integer(sfnc::SENSOR_WIDTH, regs::SENSOR_WIDTH, AccessMode::RO, config.sensor_width),
        integer(sfnc::SENSOR_HEIGHT, regs::SENSOR_HEIGHT, AccessMode::RO, config.sensor_height),
        integer(sfnc::WIDTH, regs::WIDTH, AccessMode::RW, config.sensor_width),
        integer(sfnc::HEIGHT, regs::HEIGHT, AccessMode::RW, config.sensor_height),
        NodeDecl::Enumeration {
            name: sfnc::PIXEL_FORMAT.into(),
            address: regs::PIXEL_FORMAT.into(),
            len: 4,
            access: AccessMode::RW,
            sign: Sign::Unsigned,
            entries: vec![
                ("Mono8".into(), pixel_format::MONO8.into()),
                ("Mono16".into(), pixel_format::MONO16.into()),
                ("RGB8".into(), pixel_format::RGB8.into()),
            ],
        },
        NodeDecl::Boolean {
            name: sfnc::REVERSE_X.into(),
            address: regs::REVERSE_X.into(),
            len: 4,
            access: AccessMode::RW,
            on_off: None,
        },
        float(sfnc::EXPOSURE_TIME, regs::EXPOSURE_TIME, AccessMode::RW, (10.0, 1_000_000.0), 10, "us"),
        float(sfnc::GAIN, regs::GAIN, AccessMode::RW, (0.0, 24.0), 100, "dB"),
        float(sfnc::ACQUISITION_FRAME_RATE, regs::ACQUISITION_FRAME_RATE, AccessMode::RW, (1.0, 200.0), 100, "Hz"),
        float(sfnc::DEVICE_TEMPERATURE, regs::DEVICE_TEMPERATURE, AccessMode::RO, (-40.0, 125.0), 10, "C"),
        command(sfnc::ACQUISITION_START, regs::ACQUISITION_START),
        command(sfnc::ACQUISITION_STOP, regs::ACQUISITION_STOP),
    ]
}
