//! GenApi feature tree: named, typed nodes backed by device register IO.

mod nodes;

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, warn};

pub use nodes::{
    BooleanNode, CategoryNode, CommandNode, EnumNode, FloatNode, IntegerNode, StringNode,
};

/// Error type produced by GenApi operations.
#[derive(Debug, Error)]
pub enum GenApiError {
    /// The requested node does not exist in the nodemap.
    #[error("node not found: {0}")]
    NodeNotFound(String),
    /// The node exists but has a different type.
    #[error("type mismatch for node: {0}")]
    Type(String),
    /// The node access mode forbids the attempted operation.
    #[error("access denied for node: {0}")]
    Access(String),
    /// The provided value violates the limits declared by the node.
    #[error("range error for node: {0}")]
    Range(String),
    /// Underlying register IO failed.
    #[error("io error: {0}")]
    Io(String),
    /// Node metadata or conversion failed.
    #[error("parse error: {0}")]
    Parse(String),
}

/// Register access abstraction backed by a device memory space.
pub trait RegisterIo {
    /// Read `len` bytes starting at `addr`.
    fn read(&self, addr: u64, len: usize) -> Result<Vec<u8>, GenApiError>;
    /// Write `data` starting at `addr`.
    fn write(&self, addr: u64, data: &[u8]) -> Result<(), GenApiError>;
}

impl<T: RegisterIo + ?Sized> RegisterIo for &T {
    fn read(&self, addr: u64, len: usize) -> Result<Vec<u8>, GenApiError> {
        (**self).read(addr, len)
    }

    fn write(&self, addr: u64, data: &[u8]) -> Result<(), GenApiError> {
        (**self).write(addr, data)
    }
}

/// Access rights declared for a register-backed node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// Read only.
    RO,
    /// Write only.
    WO,
    /// Read and write.
    #[default]
    RW,
}

impl AccessMode {
    pub fn is_readable(self) -> bool {
        !matches!(self, AccessMode::WO)
    }

    pub fn is_writable(self) -> bool {
        !matches!(self, AccessMode::RO)
    }
}

/// Interpretation of the register bytes behind an integer-valued node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sign {
    /// Two's complement, sign-extended to `i64`.
    #[default]
    Signed,
    /// Zero-extended; values above `i64::MAX` are not representable.
    Unsigned,
}

/// Closed set of node variants a feature tree can hold.
#[derive(Debug)]
pub enum Node {
    /// Signed integer feature stored in a fixed-width register block.
    Integer(IntegerNode),
    /// Floating point feature with optional scale/offset conversion.
    Float(FloatNode),
    /// Boolean feature represented as an integer register.
    Boolean(BooleanNode),
    /// Enumeration feature mapping integers to symbolic names.
    Enumeration(EnumNode),
    /// Fixed-length string register.
    String(StringNode),
    /// Command feature triggering a device-side action when written.
    Command(CommandNode),
    /// Category organising related features.
    Category(CategoryNode),
}

impl Node {
    /// Feature name of the node.
    pub fn name(&self) -> &str {
        match self {
            Node::Integer(node) => &node.name,
            Node::Float(node) => &node.name,
            Node::Boolean(node) => &node.name,
            Node::Enumeration(node) => &node.name,
            Node::String(node) => &node.name,
            Node::Command(node) => &node.name,
            Node::Category(node) => &node.name,
        }
    }

    /// Short lowercase label of the variant, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Integer(_) => "integer",
            Node::Float(_) => "float",
            Node::Boolean(_) => "boolean",
            Node::Enumeration(_) => "enumeration",
            Node::String(_) => "string",
            Node::Command(_) => "command",
            Node::Category(_) => "category",
        }
    }
}

/// Declarative description of a node, as produced by a feature description
/// loader or written by hand for simulated devices.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeDecl {
    Integer {
        name: String,
        address: u64,
        len: u32,
        access: AccessMode,
        sign: Sign,
        min: i64,
        max: i64,
        inc: Option<i64>,
        unit: Option<String>,
    },
    Float {
        name: String,
        address: u64,
        len: u32,
        access: AccessMode,
        min: f64,
        max: f64,
        unit: Option<String>,
        /// Rational scale `(numerator, denominator)` applied to the raw value.
        scale: Option<(i64, i64)>,
        offset: Option<f64>,
    },
    Boolean {
        name: String,
        address: u64,
        len: u32,
        access: AccessMode,
        /// Raw values for `true` and `false`; `(1, 0)` when absent.
        on_off: Option<(i64, i64)>,
    },
    Enumeration {
        name: String,
        address: u64,
        len: u32,
        access: AccessMode,
        sign: Sign,
        entries: Vec<(String, i64)>,
    },
    String {
        name: String,
        address: u64,
        len: u32,
        access: AccessMode,
    },
    Command {
        name: String,
        address: u64,
        len: u32,
        /// Value written to trigger the command; `1` when absent.
        value: Option<i64>,
    },
    Category {
        name: String,
        children: Vec<String>,
    },
}

impl NodeDecl {
    fn into_node(self) -> Node {
        match self {
            NodeDecl::Integer {
                name,
                address,
                len,
                access,
                sign,
                min,
                max,
                inc,
                unit,
            } => Node::Integer(IntegerNode {
                name,
                address,
                len,
                access,
                sign,
                min,
                max,
                inc,
                unit,
            }),
            NodeDecl::Float {
                name,
                address,
                len,
                access,
                min,
                max,
                unit,
                scale,
                offset,
            } => Node::Float(FloatNode {
                name,
                address,
                len,
                access,
                min,
                max,
                unit,
                scale,
                offset,
            }),
            NodeDecl::Boolean {
                name,
                address,
                len,
                access,
                on_off,
            } => {
                let (on_value, off_value) = on_off.unwrap_or((1, 0));
                Node::Boolean(BooleanNode {
                    name,
                    address,
                    len,
                    access,
                    on_value,
                    off_value,
                })
            }
            NodeDecl::Enumeration {
                name,
                address,
                len,
                access,
                sign,
                entries,
            } => Node::Enumeration(EnumNode::new(name, address, len, access, sign, entries)),
            NodeDecl::String {
                name,
                address,
                len,
                access,
            } => Node::String(StringNode {
                name,
                address,
                len,
                access,
            }),
            NodeDecl::Command {
                name,
                address,
                len,
                value,
            } => Node::Command(CommandNode {
                name,
                address,
                len,
                value: value.unwrap_or(1),
            }),
            NodeDecl::Category { name, children } => {
                Node::Category(CategoryNode { name, children })
            }
        }
    }
}

/// Feature tree mapping names to typed nodes.
///
/// The map is immutable once built; node values live in device registers and
/// are accessed through a [`RegisterIo`] supplied per call.
#[derive(Debug, Default)]
pub struct NodeMap {
    version: String,
    nodes: HashMap<String, Node>,
}

impl NodeMap {
    /// Build a nodemap from node declarations.
    pub fn new(version: impl Into<String>, decls: impl IntoIterator<Item = NodeDecl>) -> Self {
        let mut map = NodeMap {
            version: version.into(),
            nodes: HashMap::new(),
        };
        for decl in decls {
            map.insert(decl.into_node());
        }
        debug!(version = %map.version, nodes = map.nodes.len(), "built nodemap");
        map
    }

    fn insert(&mut self, node: Node) {
        let name = node.name().to_string();
        if let Some(previous) = self.nodes.insert(name.clone(), node) {
            warn!(node = %name, replaced = previous.kind(), "duplicate node declaration");
        }
    }

    /// Return the schema version string associated with the description.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Resolve a feature name to its node.
    pub fn lookup(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    /// Number of nodes in the tree.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate over all feature names, in no particular order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Resolve `name` to an integer node.
    pub fn integer(&self, name: &str) -> Result<&IntegerNode, GenApiError> {
        match self.nodes.get(name) {
            Some(Node::Integer(node)) => Ok(node),
            Some(_) => Err(GenApiError::Type(name.to_string())),
            None => Err(GenApiError::NodeNotFound(name.to_string())),
        }
    }

    /// Resolve `name` to a float node.
    pub fn float(&self, name: &str) -> Result<&FloatNode, GenApiError> {
        match self.nodes.get(name) {
            Some(Node::Float(node)) => Ok(node),
            Some(_) => Err(GenApiError::Type(name.to_string())),
            None => Err(GenApiError::NodeNotFound(name.to_string())),
        }
    }

    /// Resolve `name` to a boolean node.
    pub fn boolean(&self, name: &str) -> Result<&BooleanNode, GenApiError> {
        match self.nodes.get(name) {
            Some(Node::Boolean(node)) => Ok(node),
            Some(_) => Err(GenApiError::Type(name.to_string())),
            None => Err(GenApiError::NodeNotFound(name.to_string())),
        }
    }

    /// Resolve `name` to an enumeration node.
    pub fn enumeration(&self, name: &str) -> Result<&EnumNode, GenApiError> {
        match self.nodes.get(name) {
            Some(Node::Enumeration(node)) => Ok(node),
            Some(_) => Err(GenApiError::Type(name.to_string())),
            None => Err(GenApiError::NodeNotFound(name.to_string())),
        }
    }

    /// Resolve `name` to a string node.
    pub fn string(&self, name: &str) -> Result<&StringNode, GenApiError> {
        match self.nodes.get(name) {
            Some(Node::String(node)) => Ok(node),
            Some(_) => Err(GenApiError::Type(name.to_string())),
            None => Err(GenApiError::NodeNotFound(name.to_string())),
        }
    }

    /// Resolve `name` to a command node.
    pub fn command(&self, name: &str) -> Result<&CommandNode, GenApiError> {
        match self.nodes.get(name) {
            Some(Node::Command(node)) => Ok(node),
            Some(_) => Err(GenApiError::Type(name.to_string())),
            None => Err(GenApiError::NodeNotFound(name.to_string())),
        }
    }
}

impl FromIterator<NodeDecl> for NodeMap {
    fn from_iter<I: IntoIterator<Item = NodeDecl>>(iter: I) -> Self {
        NodeMap::new(String::new(), iter)
    }
}

pub(crate) fn bytes_to_i64(name: &str, bytes: &[u8], sign: Sign) -> Result<i64, GenApiError> {
    if bytes.is_empty() {
        return Err(GenApiError::Parse(format!(
            "node {name} returned empty payload"
        )));
    }
    if bytes.len() > 8 {
        return Err(GenApiError::Parse(format!(
            "node {name} uses unsupported width {}",
            bytes.len()
        )));
    }
    let mut buf = [0u8; 8];
    let offset = 8 - bytes.len();
    buf[offset..].copy_from_slice(bytes);
    match sign {
        Sign::Signed => {
            if (bytes[0] & 0x80) != 0 {
                for byte in &mut buf[..offset] {
                    *byte = 0xFF;
                }
            }
            Ok(i64::from_be_bytes(buf))
        }
        Sign::Unsigned => i64::try_from(u64::from_be_bytes(buf)).map_err(|_| {
            GenApiError::Parse(format!("node {name} holds an unsigned value above i64::MAX"))
        }),
    }
}

pub(crate) fn i64_to_bytes(
    name: &str,
    value: i64,
    width: u32,
    sign: Sign,
) -> Result<Vec<u8>, GenApiError> {
    if width == 0 || width > 8 {
        return Err(GenApiError::Parse(format!(
            "node {name} has unsupported width {width}"
        )));
    }
    let out_of_range = || {
        GenApiError::Range(format!(
            "value {value} does not fit {width} bytes for {name}"
        ))
    };
    if sign == Sign::Unsigned && value < 0 {
        return Err(out_of_range());
    }
    let width = width as usize;
    let data = value.to_be_bytes()[8 - width..].to_vec();
    if bytes_to_i64(name, &data, sign)? != value {
        return Err(out_of_range());
    }
    Ok(data)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use super::{GenApiError, RegisterIo};

    /// Sparse register store keyed by exact address.
    #[derive(Default)]
    pub struct MockIo {
        pub regs: RefCell<HashMap<u64, Vec<u8>>>,
        pub writes: RefCell<usize>,
    }

    impl MockIo {
        pub fn with_registers(entries: &[(u64, Vec<u8>)]) -> Self {
            let io = MockIo::default();
            for (addr, data) in entries {
                io.regs.borrow_mut().insert(*addr, data.clone());
            }
            io
        }

        pub fn register(&self, addr: u64) -> Option<Vec<u8>> {
            self.regs.borrow().get(&addr).cloned()
        }

        pub fn write_count(&self) -> usize {
            *self.writes.borrow()
        }
    }

    impl RegisterIo for MockIo {
        fn read(&self, addr: u64, len: usize) -> Result<Vec<u8>, GenApiError> {
            let regs = self.regs.borrow();
            let data = regs
                .get(&addr)
                .ok_or_else(|| GenApiError::Io(format!("read miss at 0x{addr:08X}")))?;
            if data.len() != len {
                return Err(GenApiError::Io(format!(
                    "length mismatch at 0x{addr:08X}: expected {len}, have {}",
                    data.len()
                )));
            }
            Ok(data.clone())
        }

        fn write(&self, addr: u64, data: &[u8]) -> Result<(), GenApiError> {
            *self.writes.borrow_mut() += 1;
            self.regs.borrow_mut().insert(addr, data.to_vec());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decls() -> Vec<NodeDecl> {
        vec![
            NodeDecl::Integer {
                name: "Width".into(),
                address: 0x100,
                len: 4,
                access: AccessMode::RW,
                sign: Sign::Signed,
                min: 16,
                max: 4096,
                inc: Some(2),
                unit: None,
            },
            NodeDecl::Command {
                name: "AcquisitionStart".into(),
                address: 0x500,
                len: 4,
                value: None,
            },
            NodeDecl::Category {
                name: "Root".into(),
                children: vec!["Width".into(), "AcquisitionStart".into()],
            },
        ]
    }

    #[test]
    fn lookup_resolves_declared_nodes() {
        let map = NodeMap::new("1.2.3", decls());
        assert_eq!(map.version(), "1.2.3");
        assert_eq!(map.len(), 3);
        assert!(matches!(map.lookup("Width"), Some(Node::Integer(_))));
        assert!(matches!(map.lookup("Root"), Some(Node::Category(_))));
        assert!(map.lookup("Height").is_none());
    }

    #[test]
    fn typed_resolution_distinguishes_missing_and_mismatch() {
        let map: NodeMap = decls().into_iter().collect();
        assert!(map.integer("Width").is_ok());
        assert!(matches!(
            map.float("Width").unwrap_err(),
            GenApiError::Type(_)
        ));
        assert!(matches!(
            map.command("Missing").unwrap_err(),
            GenApiError::NodeNotFound(_)
        ));
    }

    #[test]
    fn duplicate_declaration_keeps_last() {
        let mut all = decls();
        all.push(NodeDecl::String {
            name: "Width".into(),
            address: 0x800,
            len: 16,
            access: AccessMode::RO,
        });
        let map = NodeMap::new("", all);
        assert_eq!(map.lookup("Width").map(Node::kind), Some("string"));
    }

    #[test]
    fn register_codec_sign_extends_and_checks_width() {
        assert_eq!(bytes_to_i64("n", &[0xFF, 0xFE], Sign::Signed).unwrap(), -2);
        assert_eq!(bytes_to_i64("n", &[0x00, 0x80], Sign::Signed).unwrap(), 128);
        assert_eq!(
            i64_to_bytes("n", -2, 2, Sign::Signed).unwrap(),
            vec![0xFF, 0xFE]
        );
        assert!(matches!(
            i64_to_bytes("n", 70_000, 2, Sign::Signed).unwrap_err(),
            GenApiError::Range(_)
        ));
        assert!(matches!(
            i64_to_bytes("n", 1, 9, Sign::Signed).unwrap_err(),
            GenApiError::Parse(_)
        ));
    }

    #[test]
    fn unsigned_registers_zero_extend() {
        assert_eq!(
            bytes_to_i64("n", &[0x80, 0x00, 0x00, 0x00], Sign::Unsigned).unwrap(),
            0x8000_0000
        );
        assert_eq!(
            i64_to_bytes("n", 0x8000_0000, 4, Sign::Unsigned).unwrap(),
            vec![0x80, 0x00, 0x00, 0x00]
        );
        assert!(matches!(
            i64_to_bytes("n", 0x8000_0000, 4, Sign::Signed).unwrap_err(),
            GenApiError::Range(_)
        ));
        assert!(matches!(
            i64_to_bytes("n", -1, 4, Sign::Unsigned).unwrap_err(),
            GenApiError::Range(_)
        ));
        assert!(matches!(
            bytes_to_i64("n", &[0xFF; 8], Sign::Unsigned).unwrap_err(),
            GenApiError::Parse(_)
        ));
    }
}
