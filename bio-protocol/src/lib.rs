//! Wire types shared by the biometryd daemon and its clients
//!
//! The transport is an object/method bus in the spirit of D-Bus: objects live
//! at hierarchical [`ObjectPath`]s, expose named interfaces and are driven by
//! method calls carrying untyped structural [`Value`]s. Frames are exchanged
//! as newline-delimited JSON over a Unix socket.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Global serial counter for call/reply correlation
static SERIAL_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Maximum size of a single encoded frame (64KB)
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Maximum object path length for validation
const MAX_PATH_LENGTH: usize = 255;

/// Maximum length of interface and member names
const MAX_NAME_LENGTH: usize = 255;

/// Timeout applied to factory style calls (DefaultDevice, Enroll, ...)
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(1);

/// Generate a unique serial for an outgoing frame
pub fn generate_serial() -> u64 {
    SERIAL_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Interface, member and error names of the biometryd object model
pub mod names {
    pub const SERVICE: &str = "com.ubuntu.biometryd.Service";
    pub const DEVICE: &str = "com.ubuntu.biometryd.Device";
    pub const TEMPLATE_STORE: &str = "com.ubuntu.biometryd.TemplateStore";
    pub const IDENTIFIER: &str = "com.ubuntu.biometryd.Identifier";
    pub const VERIFIER: &str = "com.ubuntu.biometryd.Verifier";
    pub const OPERATION: &str = "com.ubuntu.biometryd.Operation";
    pub const OBSERVER: &str = "com.ubuntu.biometryd.Operation.Observer";

    /// Methods, grouped by the interface that declares them
    pub mod member {
        // Service
        pub const DEFAULT_DEVICE: &str = "DefaultDevice";
        // Device
        pub const TEMPLATE_STORE: &str = "TemplateStore";
        pub const IDENTIFIER: &str = "Identifier";
        pub const VERIFIER: &str = "Verifier";
        // TemplateStore
        pub const SIZE: &str = "Size";
        pub const LIST: &str = "List";
        pub const ENROLL: &str = "Enroll";
        pub const REMOVE: &str = "Remove";
        pub const CLEAR: &str = "Clear";
        // Identifier / Verifier
        pub const IDENTIFY_USER: &str = "IdentifyUser";
        pub const VERIFY_USER: &str = "VerifyUser";
        // Operation
        pub const START_WITH_OBSERVER: &str = "StartWithObserver";
        pub const CANCEL: &str = "Cancel";
        // Operation.Observer
        pub const ON_STARTED: &str = "OnStarted";
        pub const ON_PROGRESS: &str = "OnProgress";
        pub const ON_CANCELLED: &str = "OnCancelled";
        pub const ON_FAILED: &str = "OnFailed";
        pub const ON_SUCCEEDED: &str = "OnSucceeded";
    }

    /// Error names carried by error frames
    pub mod error {
        pub const NO_SUCH_OBJECT: &str = "com.ubuntu.biometryd.Error.NoSuchObject";
        pub const UNKNOWN_INTERFACE: &str = "com.ubuntu.biometryd.Error.UnknownInterface";
        pub const UNKNOWN_METHOD: &str = "com.ubuntu.biometryd.Error.UnknownMethod";
        pub const INVALID_ARGS: &str = "com.ubuntu.biometryd.Error.InvalidArgs";
        pub const ACCESS_DENIED: &str = "com.ubuntu.biometryd.Error.AccessDenied";
        pub const NOT_SUPPORTED: &str = "com.ubuntu.biometryd.Error.NotSupported";
        pub const LIMITS_EXCEEDED: &str = "com.ubuntu.biometryd.Error.LimitsExceeded";
        pub const FAILED: &str = "com.ubuntu.biometryd.Error.Failed";
    }
}

// ============================================================================
// Object paths
// ============================================================================

/// Hierarchical name of an object exposed over the bus
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectPath(String);

impl ObjectPath {
    /// The root object path `/`
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Parse and validate an object path
    pub fn parse(path: impl Into<String>) -> Result<Self, String> {
        let path = path.into();
        validate_object_path(&path)?;
        Ok(Self(path))
    }

    /// Path of a direct child object
    pub fn child(&self, segment: impl AsRef<str>) -> Result<Self, String> {
        let segment = segment.as_ref();
        validate_path_segment(segment)?;
        let joined = if self.0 == "/" {
            format!("/{}", segment)
        } else {
            format!("{}/{}", self.0, segment)
        };
        Self::parse(joined)
    }

    /// Path of a descendant several segments below this one
    pub fn join<I, S>(&self, segments: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        segments
            .into_iter()
            .try_fold(self.clone(), |path, segment| path.child(segment))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `self` lies strictly below `ancestor`
    pub fn is_descendant_of(&self, ancestor: &ObjectPath) -> bool {
        if ancestor.0 == "/" {
            return self.0 != "/";
        }
        self.0.len() > ancestor.0.len()
            && self.0.starts_with(&ancestor.0)
            && self.0.as_bytes()[ancestor.0.len()] == b'/'
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ObjectPath {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ObjectPath> for String {
    fn from(path: ObjectPath) -> Self {
        path.0
    }
}

pub fn validate_object_path(path: &str) -> Result<(), String> {
    if path.is_empty() {
        return Err("Object path cannot be empty".into());
    }

    if path.len() > MAX_PATH_LENGTH {
        return Err(format!(
            "Object path too long: {} > {} chars",
            path.len(),
            MAX_PATH_LENGTH
        ));
    }

    if !path.starts_with('/') {
        return Err("Object path must be absolute".into());
    }

    if path == "/" {
        return Ok(());
    }

    if path.ends_with('/') {
        return Err("Object path must not end with '/'".into());
    }

    for segment in path[1..].split('/') {
        validate_path_segment(segment)?;
    }

    Ok(())
}

fn validate_path_segment(segment: &str) -> Result<(), String> {
    if segment.is_empty() {
        return Err("Object path contains an empty segment".into());
    }

    for c in segment.chars() {
        if !c.is_ascii_alphanumeric() && c != '_' {
            return Err(format!("Object path contains invalid character: {:?}", c));
        }
    }

    Ok(())
}

/// Validate a dotted interface name such as `com.ubuntu.biometryd.Service`
pub fn validate_interface_name(name: &str) -> Result<(), String> {
    if name.is_empty() || name.len() > MAX_NAME_LENGTH {
        return Err("Interface name has invalid length".into());
    }

    let elements: Vec<&str> = name.split('.').collect();
    if elements.len() < 2 {
        return Err("Interface name needs at least two elements".into());
    }

    for element in elements {
        let mut chars = element.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return Err(format!("Invalid interface name element: {:?}", element)),
        }
        if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(format!("Invalid interface name element: {:?}", element));
        }
    }

    Ok(())
}

/// Validate a method name such as `StartWithObserver`
pub fn validate_member_name(name: &str) -> Result<(), String> {
    if name.is_empty() || name.len() > MAX_NAME_LENGTH {
        return Err("Member name has invalid length".into());
    }

    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return Err(format!("Invalid member name: {:?}", name)),
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(format!("Invalid member name: {:?}", name));
    }

    Ok(())
}

// ============================================================================
// Values
// ============================================================================

/// Untyped structural value carried by method calls and replies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
pub enum Value {
    Unit,
    Bool(bool),
    Byte(u8),
    Int16(i16),
    Uint16(u16),
    Int32(i32),
    Uint32(u32),
    Int64(i64),
    Uint64(u64),
    Double(f64),
    Str(String),
    ObjectPath(ObjectPath),
    /// Length-carrying byte array
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Struct(Vec<Value>),
    Dict(BTreeMap<String, Value>),
}

impl Value {
    /// Short type name used in decode error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Unit => "unit",
            Value::Bool(_) => "bool",
            Value::Byte(_) => "byte",
            Value::Int16(_) => "int16",
            Value::Uint16(_) => "uint16",
            Value::Int32(_) => "int32",
            Value::Uint32(_) => "uint32",
            Value::Int64(_) => "int64",
            Value::Uint64(_) => "uint64",
            Value::Double(_) => "double",
            Value::Str(_) => "string",
            Value::ObjectPath(_) => "object_path",
            Value::Bytes(_) => "bytes",
            Value::Array(_) => "array",
            Value::Struct(_) => "struct",
            Value::Dict(_) => "dict",
        }
    }

    /// Fields of a struct value with exactly `arity` members
    pub fn as_struct(&self, arity: usize) -> Result<&[Value], String> {
        match self {
            Value::Struct(fields) if fields.len() == arity => Ok(fields),
            Value::Struct(fields) => Err(format!(
                "expected struct of {} fields, got {}",
                arity,
                fields.len()
            )),
            other => Err(format!("expected struct, got {}", other.type_name())),
        }
    }
}

// ============================================================================
// Frames
// ============================================================================

/// A method invocation on a remote object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub path: ObjectPath,
    pub interface: String,
    pub member: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl MethodCall {
    pub fn new(
        path: ObjectPath,
        interface: impl Into<String>,
        member: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        Self {
            path,
            interface: interface.into(),
            member: member.into(),
            args,
        }
    }

    /// Validate names before a call is sent or dispatched
    pub fn validate(&self) -> Result<(), String> {
        validate_interface_name(&self.interface)?;
        validate_member_name(&self.member)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FrameBody {
    MethodCall(MethodCall),
    MethodReturn {
        reply_serial: u64,
        value: Value,
    },
    Error {
        reply_serial: u64,
        name: String,
        message: String,
    },
}

/// A single unit on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub serial: u64,
    pub body: FrameBody,
}

impl Frame {
    pub fn call(call: MethodCall) -> Self {
        Self {
            serial: generate_serial(),
            body: FrameBody::MethodCall(call),
        }
    }

    pub fn reply(reply_serial: u64, value: Value) -> Self {
        Self {
            serial: generate_serial(),
            body: FrameBody::MethodReturn {
                reply_serial,
                value,
            },
        }
    }

    pub fn error(reply_serial: u64, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            serial: generate_serial(),
            body: FrameBody::Error {
                reply_serial,
                name: name.into(),
                message: message.into(),
            },
        }
    }

    /// Encode as one newline-terminated line, enforcing the size limit
    pub fn encode(&self) -> Result<Vec<u8>, String> {
        let mut bytes =
            serde_json::to_vec(self).map_err(|e| format!("Failed to encode frame: {}", e))?;
        if bytes.len() + 1 > MAX_MESSAGE_SIZE {
            return Err(format!(
                "Frame too large: {} bytes (max {})",
                bytes.len() + 1,
                MAX_MESSAGE_SIZE
            ));
        }
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Decode one line (with or without the trailing newline)
    pub fn decode(line: &[u8]) -> Result<Self, String> {
        if line.len() > MAX_MESSAGE_SIZE {
            return Err(format!(
                "Frame too large: {} bytes (max {})",
                line.len(),
                MAX_MESSAGE_SIZE
            ));
        }
        let frame: Frame =
            serde_json::from_slice(line).map_err(|e| format!("Invalid frame: {}", e))?;
        if let FrameBody::MethodCall(call) = &frame.body {
            call.validate()?;
        }
        Ok(frame)
    }
}
