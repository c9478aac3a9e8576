//! Name-based feature access with cross-type coercion.
//!
//! Integer-like access tries Integer, then Enumeration (entry value), then
//! Boolean (nonzero is `true`, read back as 0/1). String access covers
//! Enumeration entry names and String nodes. Float access covers Float
//! nodes only. No other coercion is attempted.
//!
//! The permissive accessors never fail: unknown names, mismatched node types
//! and IO errors leave the device untouched (setters) or return `0`, `0.0`
//! or an empty string (getters). The `try_*` accessors report the reason.

use tracing::debug;

use crate::device::{Device, DeviceError};
use crate::genapi::{GenApiError, Node, NodeMap};
use crate::GenicamError;

impl Device {
    /// Resolve a feature name to its node.
    pub fn get_feature(&self, name: &str) -> Option<&Node> {
        self.feature_tree()?.lookup(name)
    }

    fn tree(&self) -> Result<&NodeMap, GenicamError> {
        if !self.is_open() {
            return Err(DeviceError::Closed.into());
        }
        self.feature_tree().ok_or(GenicamError::NoFeatureTree)
    }

    fn node(&self, name: &str) -> Result<&Node, GenicamError> {
        self.tree()?
            .lookup(name)
            .ok_or_else(|| GenApiError::NodeNotFound(name.to_string()).into())
    }

    /// Execute a command feature.
    pub fn try_execute_command(&self, name: &str) -> Result<(), GenicamError> {
        self.tree()?.command(name)?.execute(self)?;
        Ok(())
    }

    /// Execute `name` when it is a command feature; otherwise do nothing.
    pub fn execute_command(&self, name: &str) {
        if let Err(err) = self.try_execute_command(name) {
            debug!(feature = name, error = %err, "command not executed");
        }
    }

    /// Select an enumeration entry by name or write a string feature.
    ///
    /// Fails with `Type` for any other node variant.
    pub fn try_set_string_feature(&self, name: &str, value: &str) -> Result<(), GenicamError> {
        match self.node(name)? {
            Node::Enumeration(node) => node.set_string_value(value, self)?,
            Node::String(node) => node.set_value(value, self)?,
            _ => return Err(GenApiError::Type(name.to_string()).into()),
        }
        Ok(())
    }

    /// Select an enumeration entry by name, or write a string feature.
    pub fn set_string_feature(&self, name: &str, value: &str) {
        if let Err(err) = self.try_set_string_feature(name, value) {
            debug!(feature = name, value, error = %err, "string feature not written");
        }
    }

    /// Current enumeration entry name or string feature value.
    pub fn try_get_string_feature(&self, name: &str) -> Result<String, GenicamError> {
        let value = match self.node(name)? {
            Node::Enumeration(node) => node.string_value(self)?,
            Node::String(node) => node.value(self)?,
            _ => return Err(GenApiError::Type(name.to_string()).into()),
        };
        Ok(value)
    }

    /// Current enumeration entry name or string value; empty when
    /// unavailable.
    pub fn get_string_feature(&self, name: &str) -> String {
        self.try_get_string_feature(name).unwrap_or_else(|err| {
            debug!(feature = name, error = %err, "string feature unavailable");
            String::new()
        })
    }

    /// Write an integer-like feature: Integer, then Enumeration by entry
    /// value, then Boolean (nonzero is `true`).
    pub fn try_set_integer_feature(&self, name: &str, value: i64) -> Result<(), GenicamError> {
        match self.node(name)? {
            Node::Integer(node) => node.set_value(value, self)?,
            Node::Enumeration(node) => node.set_int_value(value, self)?,
            Node::Boolean(node) => node.set_value(value != 0, self)?,
            _ => return Err(GenApiError::Type(name.to_string()).into()),
        }
        Ok(())
    }

    /// Write an integer, enumeration (by entry value) or boolean feature.
    pub fn set_integer_feature(&self, name: &str, value: i64) {
        if let Err(err) = self.try_set_integer_feature(name, value) {
            debug!(feature = name, value, error = %err, "integer feature not written");
        }
    }

    /// Read an integer-like feature; Boolean reads back as `0`/`1`.
    pub fn try_get_integer_feature(&self, name: &str) -> Result<i64, GenicamError> {
        let value = match self.node(name)? {
            Node::Integer(node) => node.value(self)?,
            Node::Enumeration(node) => node.int_value(self)?,
            Node::Boolean(node) => i64::from(node.value(self)?),
            _ => return Err(GenApiError::Type(name.to_string()).into()),
        };
        Ok(value)
    }

    /// Integer, enumeration entry value or boolean (0/1) reading; `0` when
    /// unavailable.
    pub fn get_integer_feature(&self, name: &str) -> i64 {
        self.try_get_integer_feature(name).unwrap_or_else(|err| {
            debug!(feature = name, error = %err, "integer feature unavailable");
            0
        })
    }

    /// Inclusive bounds of an Integer feature.
    pub fn try_integer_feature_bounds(&self, name: &str) -> Result<(i64, i64), GenicamError> {
        let node = self.tree()?.integer(name)?;
        Ok((node.min(), node.max()))
    }

    /// Inclusive `(min, max)` of an integer feature; `None` for any other
    /// node type or unknown name.
    pub fn integer_feature_bounds(&self, name: &str) -> Option<(i64, i64)> {
        self.try_integer_feature_bounds(name).ok()
    }

    /// Write a Float feature, rounding to the nearest register step.
    pub fn try_set_float_feature(&self, name: &str, value: f64) -> Result<(), GenicamError> {
        self.tree()?.float(name)?.set_value(value, self)?;
        Ok(())
    }

    /// Write a float feature; other node types are left untouched.
    pub fn set_float_feature(&self, name: &str, value: f64) {
        if let Err(err) = self.try_set_float_feature(name, value) {
            debug!(feature = name, value, error = %err, "float feature not written");
        }
    }

    /// Read a Float feature in engineering units.
    pub fn try_get_float_feature(&self, name: &str) -> Result<f64, GenicamError> {
        Ok(self.tree()?.float(name)?.value(self)?)
    }

    /// Float feature reading; `0.0` when unavailable.
    pub fn get_float_feature(&self, name: &str) -> f64 {
        self.try_get_float_feature(name).unwrap_or_else(|err| {
            debug!(feature = name, error = %err, "float feature unavailable");
            0.0
        })
    }

    /// Inclusive bounds of a Float feature.
    pub fn try_float_feature_bounds(&self, name: &str) -> Result<(f64, f64), GenicamError> {
        let node = self.tree()?.float(name)?;
        Ok((node.min(), node.max()))
    }

    /// Inclusive `(min, max)` of a float feature; `None` for any other node
    /// type or unknown name.
    pub fn float_feature_bounds(&self, name: &str) -> Option<(f64, f64)> {
        self.try_float_feature_bounds(name).ok()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use super::*;
    use crate::device::tests::CountingTransport;
    use crate::genapi::{AccessMode, NodeDecl, Sign};

    fn tree() -> NodeMap {
        NodeMap::new(
            "1.0.0",
            vec![
                NodeDecl::Integer {
                    name: "Width".into(),
                    address: 0x100,
                    len: 4,
                    access: AccessMode::RW,
                    sign: Sign::Signed,
                    min: 16,
                    max: 4096,
                    inc: None,
                    unit: None,
                },
                NodeDecl::Float {
                    name: "Gain".into(),
                    address: 0x110,
                    len: 4,
                    access: AccessMode::RW,
                    min: 0.0,
                    max: 24.0,
                    unit: Some("dB".into()),
                    scale: Some((1, 100)),
                    offset: None,
                },
                NodeDecl::Boolean {
                    name: "ReverseX".into(),
                    address: 0x120,
                    len: 4,
                    access: AccessMode::RW,
                    on_off: None,
                },
                NodeDecl::Enumeration {
                    name: "PixelFormat".into(),
                    address: 0x130,
                    len: 4,
                    access: AccessMode::RW,
                    sign: Sign::Unsigned,
                    entries: vec![("Mono8".into(), 0), ("RGB8".into(), 1)],
                },
                NodeDecl::String {
                    name: "DeviceUserID".into(),
                    address: 0x200,
                    len: 16,
                    access: AccessMode::RW,
                },
                NodeDecl::Command {
                    name: "AcquisitionStart".into(),
                    address: 0x140,
                    len: 4,
                    value: None,
                },
                NodeDecl::Category {
                    name: "Root".into(),
                    children: vec!["Width".into()],
                },
            ],
        )
    }

    fn device() -> (Device, Arc<std::sync::atomic::AtomicUsize>) {
        let transport = CountingTransport {
            tree: Some(tree),
            ..Default::default()
        };
        let calls = Arc::clone(&transport.calls);
        (Device::new(transport), calls)
    }

    #[test]
    fn unknown_features_return_sentinels_without_writes() {
        let (device, calls) = device();
        assert!(device.get_feature("Missing").is_none());
        let before = calls.load(Ordering::SeqCst);
        device.execute_command("Missing");
        device.set_string_feature("Missing", "x");
        device.set_integer_feature("Missing", 3);
        device.set_float_feature("Missing", 1.5);
        assert_eq!(device.get_string_feature("Missing"), "");
        assert_eq!(device.get_integer_feature("Missing"), 0);
        assert_eq!(device.get_float_feature("Missing"), 0.0);
        assert_eq!(device.integer_feature_bounds("Missing"), None);
        assert_eq!(device.float_feature_bounds("Missing"), None);
        assert_eq!(calls.load(Ordering::SeqCst), before);
        assert!(matches!(
            device.try_get_integer_feature("Missing"),
            Err(GenicamError::GenApi(GenApiError::NodeNotFound(_)))
        ));
    }

    #[test]
    fn integer_roundtrip_and_bounds() {
        let (device, _) = device();
        device.set_integer_feature("Width", 640);
        assert_eq!(device.get_integer_feature("Width"), 640);
        assert_eq!(device.integer_feature_bounds("Width"), Some((16, 4096)));
        assert_eq!(device.float_feature_bounds("Width"), None);
        device.set_integer_feature("Width", 8000);
        assert_eq!(device.get_integer_feature("Width"), 640);
    }

    #[test]
    fn boolean_coerces_through_integer_access() {
        let (device, _) = device();
        device.set_integer_feature("ReverseX", 5);
        assert_eq!(device.get_integer_feature("ReverseX"), 1);
        device.set_integer_feature("ReverseX", 0);
        assert_eq!(device.get_integer_feature("ReverseX"), 0);
    }

    #[test]
    fn enumeration_by_name_and_by_value() {
        let (device, _) = device();
        device.set_string_feature("PixelFormat", "RGB8");
        assert_eq!(device.get_integer_feature("PixelFormat"), 1);
        device.set_integer_feature("PixelFormat", 0);
        assert_eq!(device.get_string_feature("PixelFormat"), "Mono8");
    }

    #[test]
    fn string_feature_roundtrip() {
        let (device, _) = device();
        device.set_string_feature("DeviceUserID", "left-cam");
        assert_eq!(device.get_string_feature("DeviceUserID"), "left-cam");
        assert_eq!(device.get_integer_feature("DeviceUserID"), 0);
    }

    #[test]
    fn float_access_is_float_only() {
        let (device, _) = device();
        device.set_float_feature("Gain", 12.5);
        assert!((device.get_float_feature("Gain") - 12.5).abs() < 1e-9);
        assert_eq!(device.float_feature_bounds("Gain"), Some((0.0, 24.0)));
        assert_eq!(device.integer_feature_bounds("Gain"), None);

        device.set_integer_feature("Width", 640);
        device.set_float_feature("Width", 100.0);
        assert_eq!(device.get_integer_feature("Width"), 640);
        assert_eq!(device.get_float_feature("Width"), 0.0);
        device.set_integer_feature("Gain", 3);
        assert!((device.get_float_feature("Gain") - 12.5).abs() < 1e-9);
    }

    #[test]
    fn execute_command_ignores_other_types() {
        let (device, _) = device();
        device.set_integer_feature("Width", 640);
        device.execute_command("Width");
        assert_eq!(device.get_integer_feature("Width"), 640);

        device.execute_command("AcquisitionStart");
        assert_eq!(device.read_register(0x140).unwrap(), 1);
    }

    #[test]
    fn mismatched_types_are_reported_by_strict_accessors() {
        let (device, _) = device();
        assert!(matches!(
            device.try_set_string_feature("Width", "x"),
            Err(GenicamError::GenApi(GenApiError::Type(_)))
        ));
        assert!(matches!(
            device.try_get_integer_feature("Root"),
            Err(GenicamError::GenApi(GenApiError::Type(_)))
        ));
        assert!(matches!(
            device.try_set_integer_feature("PixelFormat", 9),
            Err(GenicamError::GenApi(GenApiError::Range(_)))
        ));
    }

    #[test]
    fn closed_device_degrades_to_sentinels() {
        let (mut device, calls) = device();
        device.close();
        device.set_integer_feature("Width", 640);
        assert_eq!(device.get_integer_feature("Width"), 0);
        assert!(device.get_feature("Width").is_none());
        assert!(matches!(
            device.try_get_float_feature("Gain"),
            Err(GenicamError::Device(DeviceError::Closed))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn missing_tree_is_reported() {
        let device = Device::new(CountingTransport::default());
        assert!(device.get_feature("Width").is_none());
        assert!(matches!(
            device.try_get_integer_feature("Width"),
            Err(GenicamError::NoFeatureTree)
        ));
    }
}
