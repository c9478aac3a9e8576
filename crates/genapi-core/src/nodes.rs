//! Per-variant node metadata and register-backed value access.

use std::collections::HashMap;

use tracing::debug;

use crate::{bytes_to_i64, i64_to_bytes, AccessMode, GenApiError, RegisterIo, Sign};

/// Integer feature stored in a signed big-endian register.
#[derive(Debug)]
pub struct IntegerNode {
    /// Unique feature name.
    pub name: String,
    /// Register address in the device memory space.
    pub address: u64,
    /// Register length in bytes.
    pub len: u32,
    /// Declared access rights.
    pub access: AccessMode,
    /// How the register bytes map to the value.
    pub sign: Sign,
    /// Minimum permitted user value.
    pub min: i64,
    /// Maximum permitted user value.
    pub max: i64,
    /// Optional increment step the value must respect.
    pub inc: Option<i64>,
    /// Optional engineering unit such as "px".
    pub unit: Option<String>,
}

impl IntegerNode {
    /// Read the current value.
    pub fn value(&self, io: &dyn RegisterIo) -> Result<i64, GenApiError> {
        let value = read_raw(&self.name, self.access, self.sign, self.address, self.len, io)?;
        debug!(node = %self.name, raw = value, "read integer feature");
        Ok(value)
    }

    /// Write a value after checking bounds and increment.
    pub fn set_value(&self, value: i64, io: &dyn RegisterIo) -> Result<(), GenApiError> {
        if value < self.min || value > self.max {
            return Err(GenApiError::Range(self.name.clone()));
        }
        if let Some(inc) = self.inc.filter(|inc| *inc != 0) {
            // Widened so full-range nodes (`min == i64::MIN`) cannot overflow.
            let steps = i128::from(value) - i128::from(self.min);
            if steps % i128::from(inc) != 0 {
                return Err(GenApiError::Range(self.name.clone()));
            }
        }
        debug!(node = %self.name, raw = value, "write integer feature");
        write_raw(&self.name, self.access, self.sign, self.address, self.len, value, io)
    }

    pub fn min(&self) -> i64 {
        self.min
    }

    pub fn max(&self) -> i64 {
        self.max
    }

    /// Step between valid values counted from `min`, if declared.
    pub fn inc(&self) -> Option<i64> {
        self.inc
    }

    /// Engineering unit, if declared.
    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }
}

/// Floating point feature encoded as a scaled integer register.
#[derive(Debug)]
pub struct FloatNode {
    pub name: String,
    pub address: u64,
    pub len: u32,
    pub access: AccessMode,
    pub min: f64,
    pub max: f64,
    pub unit: Option<String>,
    /// Optional rational scale `(numerator, denominator)` applied to the raw value.
    pub scale: Option<(i64, i64)>,
    /// Optional offset added after scaling.
    pub offset: Option<f64>,
}

impl FloatNode {
    /// Read the register and convert it to engineering units.
    pub fn value(&self, io: &dyn RegisterIo) -> Result<f64, GenApiError> {
        let raw = read_raw(&self.name, self.access, Sign::Signed, self.address, self.len, io)?;
        let value = self.apply_scale(raw as f64);
        debug!(node = %self.name, raw, value, "read float feature");
        Ok(value)
    }

    /// Write a value using the inverse scale/offset conversion.
    ///
    /// Values between two register steps are rounded to the nearest step,
    /// which must itself lie within `[min, max]`.
    pub fn set_value(&self, value: f64, io: &dyn RegisterIo) -> Result<(), GenApiError> {
        if value.is_nan() || value < self.min || value > self.max {
            return Err(GenApiError::Range(self.name.clone()));
        }
        let raw = self.encode(value)?;
        debug!(node = %self.name, raw, value, "write float feature");
        write_raw(&self.name, self.access, Sign::Signed, self.address, self.len, raw, io)
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    fn apply_scale(&self, raw: f64) -> f64 {
        let mut value = raw;
        if let Some((num, den)) = self.scale {
            value *= num as f64 / den as f64;
        }
        if let Some(offset) = self.offset {
            value += offset;
        }
        value
    }

    fn encode(&self, value: f64) -> Result<i64, GenApiError> {
        let mut raw = value;
        if let Some(offset) = self.offset {
            raw -= offset;
        }
        if let Some((num, den)) = self.scale {
            if num == 0 {
                return Err(GenApiError::Parse(format!(
                    "node {} has zero scale numerator",
                    self.name
                )));
            }
            raw *= den as f64 / num as f64;
        }
        let rounded = raw.round();
        if !rounded.is_finite() || rounded < i64::MIN as f64 || rounded >= i64::MAX as f64 {
            return Err(GenApiError::Range(self.name.clone()));
        }
        let raw = rounded as i64;
        let stored = self.apply_scale(raw as f64);
        let slack = 1e-9 * self.min.abs().max(self.max.abs()).max(1.0);
        if stored < self.min - slack || stored > self.max + slack {
            return Err(GenApiError::Range(self.name.clone()));
        }
        Ok(raw)
    }
}

/// Boolean feature stored as an integer register with on/off values.
#[derive(Debug)]
pub struct BooleanNode {
    pub name: String,
    pub address: u64,
    pub len: u32,
    pub access: AccessMode,
    pub on_value: i64,
    pub off_value: i64,
}

impl BooleanNode {
    pub fn value(&self, io: &dyn RegisterIo) -> Result<bool, GenApiError> {
        let raw = read_raw(&self.name, self.access, Sign::Signed, self.address, self.len, io)?;
        let value = raw == self.on_value;
        debug!(node = %self.name, raw, value, "read boolean feature");
        Ok(value)
    }

    pub fn set_value(&self, value: bool, io: &dyn RegisterIo) -> Result<(), GenApiError> {
        let raw = if value { self.on_value } else { self.off_value };
        debug!(node = %self.name, raw, value, "write boolean feature");
        write_raw(&self.name, self.access, Sign::Signed, self.address, self.len, raw, io)
    }
}

/// Enumeration feature mapping symbolic entries to integer register values.
#[derive(Debug)]
pub struct EnumNode {
    pub name: String,
    pub address: u64,
    pub len: u32,
    pub access: AccessMode,
    pub sign: Sign,
    /// Declared entries in declaration order.
    pub entries: Vec<(String, i64)>,
    map_by_name: HashMap<String, i64>,
    map_by_value: HashMap<i64, String>,
}

impl EnumNode {
    pub(crate) fn new(
        name: String,
        address: u64,
        len: u32,
        access: AccessMode,
        sign: Sign,
        entries: Vec<(String, i64)>,
    ) -> Self {
        let mut map_by_name = HashMap::new();
        let mut map_by_value = HashMap::new();
        for (entry, value) in &entries {
            map_by_name.insert(entry.clone(), *value);
            map_by_value.entry(*value).or_insert_with(|| entry.clone());
        }
        EnumNode {
            name,
            address,
            len,
            access,
            sign,
            entries,
            map_by_name,
            map_by_value,
        }
    }

    /// Symbolic names of all entries.
    pub fn entry_names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Read the raw integer value of the current entry.
    pub fn int_value(&self, io: &dyn RegisterIo) -> Result<i64, GenApiError> {
        let raw = read_raw(&self.name, self.access, self.sign, self.address, self.len, io)?;
        debug!(node = %self.name, raw, "read enum feature");
        Ok(raw)
    }

    /// Select the entry with the given integer value.
    pub fn set_int_value(&self, value: i64, io: &dyn RegisterIo) -> Result<(), GenApiError> {
        if !self.map_by_value.contains_key(&value) {
            return Err(GenApiError::Range(self.name.clone()));
        }
        debug!(node = %self.name, raw = value, "write enum feature");
        write_raw(&self.name, self.access, self.sign, self.address, self.len, value, io)
    }

    /// Read the symbolic name of the current entry.
    pub fn string_value(&self, io: &dyn RegisterIo) -> Result<String, GenApiError> {
        let raw = self.int_value(io)?;
        self.map_by_value.get(&raw).cloned().ok_or_else(|| {
            GenApiError::Parse(format!("unknown enum value {raw} for {}", self.name))
        })
    }

    /// Select an entry by symbolic name.
    pub fn set_string_value(&self, entry: &str, io: &dyn RegisterIo) -> Result<(), GenApiError> {
        let raw = *self
            .map_by_name
            .get(entry)
            .ok_or_else(|| GenApiError::Range(self.name.clone()))?;
        debug!(node = %self.name, raw, entry, "write enum feature");
        write_raw(&self.name, self.access, self.sign, self.address, self.len, raw, io)
    }
}

/// String feature stored in a fixed-length, NUL-padded register block.
#[derive(Debug)]
pub struct StringNode {
    pub name: String,
    pub address: u64,
    /// Register block length, the maximum string length in bytes.
    pub len: u32,
    pub access: AccessMode,
}

impl StringNode {
    pub fn value(&self, io: &dyn RegisterIo) -> Result<String, GenApiError> {
        if !self.access.is_readable() {
            return Err(GenApiError::Access(self.name.clone()));
        }
        let raw = io.read(self.address, self.len as usize)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        let value = String::from_utf8(raw[..end].to_vec())
            .map_err(|err| GenApiError::Parse(format!("node {}: {err}", self.name)))?;
        debug!(node = %self.name, value = %value, "read string feature");
        Ok(value)
    }

    pub fn set_value(&self, value: &str, io: &dyn RegisterIo) -> Result<(), GenApiError> {
        if !self.access.is_writable() {
            return Err(GenApiError::Access(self.name.clone()));
        }
        let len = self.len as usize;
        if value.len() > len {
            return Err(GenApiError::Range(self.name.clone()));
        }
        let mut data = vec![0u8; len];
        data[..value.len()].copy_from_slice(value.as_bytes());
        debug!(node = %self.name, value, "write string feature");
        io.write(self.address, &data)
    }

    /// Maximum string length in bytes.
    pub fn max_length(&self) -> usize {
        self.len as usize
    }
}

/// Command feature triggering a device-side action when written.
#[derive(Debug)]
pub struct CommandNode {
    pub name: String,
    pub address: u64,
    pub len: u32,
    /// Value written to the register to fire the command.
    pub value: i64,
}

impl CommandNode {
    pub fn execute(&self, io: &dyn RegisterIo) -> Result<(), GenApiError> {
        let data = i64_to_bytes(&self.name, self.value, self.len, Sign::Signed)?;
        debug!(node = %self.name, "execute command");
        io.write(self.address, &data)
    }
}

/// Category node describing child feature names.
#[derive(Debug)]
pub struct CategoryNode {
    pub name: String,
    pub children: Vec<String>,
}

fn read_raw(
    name: &str,
    access: AccessMode,
    sign: Sign,
    address: u64,
    len: u32,
    io: &dyn RegisterIo,
) -> Result<i64, GenApiError> {
    if !access.is_readable() {
        return Err(GenApiError::Access(name.to_string()));
    }
    let raw = io.read(address, len as usize)?;
    bytes_to_i64(name, &raw, sign)
}

fn write_raw(
    name: &str,
    access: AccessMode,
    sign: Sign,
    address: u64,
    len: u32,
    value: i64,
    io: &dyn RegisterIo,
) -> Result<(), GenApiError> {
    if !access.is_writable() {
        return Err(GenApiError::Access(name.to_string()));
    }
    let bytes = i64_to_bytes(name, value, len, sign)?;
    io.write(address, &bytes)
}
