//! Transport-independent camera device layer.
//!
//! A [`Device`] wraps any [`Transport`] implementation and exposes raw
//! register/memory access, stream creation, and name-based feature access on
//! top of the GenApi feature tree. Feature accessors are permissive: unknown
//! names and mismatched node types degrade to a no-op or a sentinel value so
//! client code can probe for optional features without error plumbing. The
//! `try_*` twins report the precise reason instead.
//!
//! ```rust,no_run
//! use genicam::fake::FakeTransport;
//! use genicam::{Device, StreamEvent};
//!
//! let device = Device::new(FakeTransport::builder().sensor_size(320, 240).build());
//! device.set_string_feature("PixelFormat", "Mono8");
//! device.set_float_feature("ExposureTime", 5000.0);
//! println!("width = {}", device.get_integer_feature("Width"));
//!
//! let _control = device.on_control_lost(|| eprintln!("control lost")).expect("observer");
//! let mut stream = device
//!     .create_stream(0u64, |frames: &mut u64, event| {
//!         if let StreamEvent::Frame(frame) = event {
//!             *frames += 1;
//!             println!("frame {} ({} bytes)", frame.frame_id, frame.payload.len());
//!         }
//!     })
//!     .expect("stream");
//! device.execute_command("AcquisitionStart");
//! std::thread::sleep(std::time::Duration::from_millis(200));
//! device.execute_command("AcquisitionStop");
//! stream.stop();
//! ```

pub use genapi_core as genapi;
pub use sfnc;

pub mod control;
pub mod device;
pub mod fake;
mod features;
pub mod frame;
pub mod stream;

use thiserror::Error;

use crate::genapi::GenApiError;

pub use control::{ControlLost, ControlLostNotifier, ControlLostReceiver};
pub use device::{Device, DeviceError, Transport};
pub use frame::Frame;
pub use stream::{FrameCallback, FrameSink, Stream, StreamBuilder, StreamEvent, StreamStats};

/// Error type produced by the strict (`try_*`) feature accessors.
#[derive(Debug, Error)]
pub enum GenicamError {
    /// Wrapper around GenApi errors produced by the feature tree.
    #[error(transparent)]
    GenApi(#[from] GenApiError),
    /// Device level failure (closed handle, bad argument, transport error).
    #[error(transparent)]
    Device(#[from] DeviceError),
    /// The transport could not provide a feature tree.
    #[error("feature tree unavailable")]
    NoFeatureTree,
}
