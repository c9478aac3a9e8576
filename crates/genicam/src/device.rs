//! Device handle and the transport contract it forwards to.

use std::fmt;
use std::sync::OnceLock;
use std::thread::JoinHandle;

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::control::{ControlLostNotifier, ControlLostReceiver};
use crate::genapi::{GenApiError, NodeMap, RegisterIo};
use crate::stream::{FrameCallback, Stream, StreamEvent};

/// Errors reported by device and transport operations.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The device handle was closed and no longer owns a transport.
    #[error("device is closed")]
    Closed,
    /// A precondition on the call arguments was violated.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The transport or link failed to complete the operation.
    #[error("transport: {0}")]
    Transport(String),
    /// The transport does not implement the requested capability.
    #[error("not supported: {0}")]
    NotSupported(&'static str),
    /// Spawning a worker thread failed.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl DeviceError {
    /// Shorthand for [`DeviceError::Transport`].
    pub fn transport<S: Into<String>>(msg: S) -> Self {
        DeviceError::Transport(msg.into())
    }
}

/// Contract implemented once per camera transport (network, bus, simulated).
///
/// [`Device`] checks call preconditions before forwarding, so implementations
/// can assume non-empty buffers.
pub trait Transport: Send + Sync {
    /// Read `buffer.len()` bytes starting at `address`.
    fn read_memory(&self, address: u32, buffer: &mut [u8]) -> Result<(), DeviceError>;

    /// Write `data` starting at `address`.
    fn write_memory(&self, address: u32, data: &[u8]) -> Result<(), DeviceError>;

    /// Read a single 32-bit register.
    fn read_register(&self, address: u32) -> Result<u32, DeviceError>;

    /// Write a single 32-bit register.
    fn write_register(&self, address: u32, value: u32) -> Result<(), DeviceError>;

    /// Open an acquisition stream delivering events to `callback`.
    fn create_stream(&self, callback: FrameCallback) -> Result<Stream, DeviceError>;

    /// Build the feature tree describing this device.
    ///
    /// Called at most once per [`Device`], on first feature access.
    fn load_feature_tree(&self) -> Result<NodeMap, DeviceError>;

    /// Raw feature description blob. Empty when the transport keeps none.
    fn genicam_xml(&self) -> Bytes {
        Bytes::new()
    }

    /// Hand the transport the notifier it raises when it loses control of
    /// the hardware.
    fn attach(&mut self, _control_lost: ControlLostNotifier) {}
}

/// Client-facing camera handle bound to one transport.
pub struct Device {
    transport: Option<Box<dyn Transport>>,
    feature_tree: OnceLock<Option<NodeMap>>,
    control_lost: ControlLostNotifier,
}

impl Device {
    /// Bind a transport to a new device handle.
    pub fn new<T: Transport + 'static>(mut transport: T) -> Self {
        let control_lost = ControlLostNotifier::new();
        transport.attach(control_lost.clone());
        Self {
            transport: Some(Box::new(transport)),
            feature_tree: OnceLock::new(),
            control_lost,
        }
    }

    /// Whether the handle still owns its transport.
    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Release the transport. Every later call fails fast.
    pub fn close(&mut self) {
        if self.transport.take().is_some() {
            info!("device closed");
        }
    }

    fn transport(&self) -> Result<&dyn Transport, DeviceError> {
        self.transport.as_deref().ok_or(DeviceError::Closed)
    }

    /// Create a stream whose events are delivered to `callback` on a
    /// dedicated thread, together with `context`.
    pub fn create_stream<C, F>(&self, context: C, callback: F) -> Result<Stream, DeviceError>
    where
        C: Send + 'static,
        F: FnMut(&mut C, StreamEvent) + Send + 'static,
    {
        let transport = self.transport()?;
        let mut context = context;
        let mut callback = callback;
        let callback: FrameCallback = Box::new(move |event| callback(&mut context, event));
        transport.create_stream(callback)
    }

    /// Fill `buffer` from device memory at `address`.
    ///
    /// An empty buffer is rejected before the transport is reached.
    pub fn read_memory(&self, address: u32, buffer: &mut [u8]) -> Result<(), DeviceError> {
        let transport = self.transport()?;
        if buffer.is_empty() {
            return Err(DeviceError::InvalidArgument("memory read of zero bytes"));
        }
        transport.read_memory(address, buffer)
    }

    /// Write `data` to device memory at `address`.
    ///
    /// An empty slice is rejected before the transport is reached.
    pub fn write_memory(&self, address: u32, data: &[u8]) -> Result<(), DeviceError> {
        let transport = self.transport()?;
        if data.is_empty() {
            return Err(DeviceError::InvalidArgument("memory write of zero bytes"));
        }
        transport.write_memory(address, data)
    }

    /// Read one 32-bit register.
    pub fn read_register(&self, address: u32) -> Result<u32, DeviceError> {
        self.transport()?.read_register(address)
    }

    /// Write one 32-bit register.
    pub fn write_register(&self, address: u32, value: u32) -> Result<(), DeviceError> {
        self.transport()?.write_register(address, value)
    }

    /// Feature tree of the device, built on first access.
    ///
    /// `None` when the device is closed or the transport failed to provide a
    /// tree; a failed load is not retried.
    pub fn feature_tree(&self) -> Option<&NodeMap> {
        let transport = self.transport().ok()?;
        self.feature_tree
            .get_or_init(|| match transport.load_feature_tree() {
                Ok(tree) => {
                    debug!(nodes = tree.len(), version = %tree.version(), "loaded feature tree");
                    Some(tree)
                }
                Err(err) => {
                    warn!(error = %err, "failed to load feature tree");
                    None
                }
            })
            .as_ref()
    }

    /// Raw feature description blob, empty when unavailable.
    pub fn genicam_xml(&self) -> Bytes {
        match self.transport() {
            Ok(transport) => transport.genicam_xml(),
            Err(_) => Bytes::new(),
        }
    }

    /// Subscribe to control-lost notifications.
    pub fn subscribe_control_lost(&self) -> ControlLostReceiver {
        self.control_lost.subscribe()
    }

    /// Run `callback` on a dedicated observer thread for every control-lost
    /// episode. The thread ends once every notifier clone is dropped: the
    /// device's own and any the transport keeps (a [`FakeHandle`] holds one
    /// through its transport state).
    ///
    /// [`FakeHandle`]: crate::fake::FakeHandle
    pub fn on_control_lost<F>(&self, callback: F) -> Result<JoinHandle<()>, DeviceError>
    where
        F: FnMut() + Send + 'static,
    {
        self.control_lost.observe(callback)
    }

    /// Raise the control-lost notification. Returns `false` when the current
    /// episode was already reported.
    pub fn emit_control_lost(&self) -> bool {
        self.control_lost.notify()
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("open", &self.is_open())
            .field("feature_tree", &self.feature_tree.get().map(Option::is_some))
            .field("control_lost", &self.control_lost.is_lost())
            .finish()
    }
}

/// Feature nodes read and write their registers through the device memory
/// space.
impl RegisterIo for Device {
    fn read(&self, addr: u64, len: usize) -> Result<Vec<u8>, GenApiError> {
        let address = register_address(addr)?;
        let mut data = vec![0u8; len];
        self.read_memory(address, &mut data)
            .map_err(|err| GenApiError::Io(err.to_string()))?;
        Ok(data)
    }

    fn write(&self, addr: u64, data: &[u8]) -> Result<(), GenApiError> {
        let address = register_address(addr)?;
        self.write_memory(address, data)
            .map_err(|err| GenApiError::Io(err.to_string()))
    }
}

fn register_address(addr: u64) -> Result<u32, GenApiError> {
    u32::try_from(addr)
        .map_err(|_| GenApiError::Io(format!("address 0x{addr:X} exceeds the 32-bit space")))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Transport backed by a sparse register map that counts every call.
    #[derive(Default)]
    pub(crate) struct CountingTransport {
        pub(crate) memory: Mutex<HashMap<u32, u8>>,
        pub(crate) calls: Arc<AtomicUsize>,
        pub(crate) tree: Option<fn() -> NodeMap>,
    }

    impl Transport for CountingTransport {
        fn read_memory(&self, address: u32, buffer: &mut [u8]) -> Result<(), DeviceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let memory = self.memory.lock().unwrap();
            for (offset, byte) in buffer.iter_mut().enumerate() {
                *byte = *memory.get(&(address + offset as u32)).unwrap_or(&0);
            }
            Ok(())
        }

        fn write_memory(&self, address: u32, data: &[u8]) -> Result<(), DeviceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut memory = self.memory.lock().unwrap();
            for (offset, byte) in data.iter().enumerate() {
                memory.insert(address + offset as u32, *byte);
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

        fn create_stream(&self, _callback: FrameCallback) -> Result<Stream, DeviceError> {
            Err(DeviceError::NotSupported("streaming"))
        }

        fn load_feature_tree(&self) -> Result<NodeMap, DeviceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.tree
                .map(|build| build())
                .ok_or(DeviceError::NotSupported("feature tree"))
        }
    }

    #[test]
    fn register_roundtrip_through_transport() {
        let device = Device::new(CountingTransport::default());
        device.write_register(0x40, 0xDEAD_BEEF).unwrap();
        assert_eq!(device.read_register(0x40).unwrap(), 0xDEAD_BEEF);
        let mut buf = [0u8; 2];
        device.read_memory(0x42, &mut buf).unwrap();
        assert_eq!(buf, [0xBE, 0xEF]);
    }

    #[test]
    fn empty_buffers_are_rejected_before_the_transport() {
        let transport = CountingTransport::default();
        let calls = Arc::clone(&transport.calls);
        let device = Device::new(transport);
        assert!(matches!(
            device.read_memory(0x10, &mut []),
            Err(DeviceError::InvalidArgument(_))
        ));
        assert!(matches!(
            device.write_memory(0x10, &[]),
            Err(DeviceError::InvalidArgument(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn closed_device_fails_fast() {
        let transport = CountingTransport::default();
        let calls = Arc::clone(&transport.calls);
        let mut device = Device::new(transport);
        device.close();
        assert!(!device.is_open());
        assert!(matches!(device.read_register(0), Err(DeviceError::Closed)));
        assert!(matches!(
            device.write_memory(0, &[1]),
            Err(DeviceError::Closed)
        ));
        assert!(matches!(
            device.create_stream((), |_, _| {}),
            Err(DeviceError::Closed)
        ));
        assert!(device.feature_tree().is_none());
        assert!(device.genicam_xml().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn xml_defaults_to_empty_blob() {
        let device = Device::new(CountingTransport::default());
        let xml = device.genicam_xml();
        assert_eq!(xml.len(), 0);
    }

    #[test]
    fn failed_tree_load_is_cached() {
        let transport = CountingTransport::default();
        let calls = Arc::clone(&transport.calls);
        let device = Device::new(transport);
        assert!(device.feature_tree().is_none());
        assert!(device.feature_tree().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn tree_is_loaded_once() {
        let transport = CountingTransport {
            tree: Some(|| NodeMap::new("1.0", Vec::<crate::genapi::NodeDecl>::new())),
            ..Default::default()
        };
        let calls = Arc::clone(&transport.calls);
        let device = Device::new(transport);
        assert_eq!(device.feature_tree().map(NodeMap::version), Some("1.0"));
        assert!(device.feature_tree().is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn register_io_rejects_addresses_beyond_32_bits() {
        let device = Device::new(CountingTransport::default());
        let err = device.read(0x1_0000_0000, 4).unwrap_err();
        assert!(matches!(err, GenApiError::Io(_)));
    }
}
