//! Standard Feature Naming Convention (SFNC) feature names.
//!
//! Only the names the device layer and the simulated camera work with are
//! listed; any other name can still be passed as a plain string.

// Device control.
/// Device vendor string feature name (`DeviceVendorName`).
pub const DEVICE_VENDOR_NAME: &str = "DeviceVendorName";
/// Device model string feature name (`DeviceModelName`).
pub const DEVICE_MODEL_NAME: &str = "DeviceModelName";
/// User-assigned device name (`DeviceUserID`).
pub const DEVICE_USER_ID: &str = "DeviceUserID";
/// Device temperature float feature name (`DeviceTemperature`).
pub const DEVICE_TEMPERATURE: &str = "DeviceTemperature";

// Image format control.
pub const SENSOR_WIDTH: &str = "SensorWidth";
pub const SENSOR_HEIGHT: &str = "SensorHeight";
pub const WIDTH: &str = "Width";
pub const HEIGHT: &str = "Height";
/// Pixel format feature name (`PixelFormat`).
pub const PIXEL_FORMAT: &str = "PixelFormat";
/// Horizontal flip boolean feature name (`ReverseX`).
pub const REVERSE_X: &str = "ReverseX";

// Acquisition control.
/// Acquisition start command feature name (`AcquisitionStart`).
pub const ACQUISITION_START: &str = "AcquisitionStart";
/// Acquisition stop command feature name (`AcquisitionStop`).
pub const ACQUISITION_STOP: &str = "AcquisitionStop";
/// Frame rate float feature name (`AcquisitionFrameRate`).
pub const ACQUISITION_FRAME_RATE: &str = "AcquisitionFrameRate";
/// Exposure time feature name (`ExposureTime`).
pub const EXPOSURE_TIME: &str = "ExposureTime";

// Analog control.
/// Gain feature name (`Gain`).
pub const GAIN: &str = "Gain";
