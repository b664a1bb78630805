//! Domain value types shared by every layer

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::UNCONFINED;

/// The calling component.
///
/// Server side this is always derived from the confinement label of the
/// connecting process, never taken from what the client claims.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Application(String);

impl Application {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The platform itself (lock screen, settings)
    pub fn system() -> Self {
        Self::new("system")
    }

    /// A process running without confinement
    pub fn unconfined() -> Self {
        Self::new(UNCONFINED)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Application {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Application {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A numeric OS user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct User(u32);

impl User {
    pub const fn new(uid: u32) -> Self {
        Self(uid)
    }

    pub const fn root() -> Self {
        Self(0)
    }

    /// Real uid of the running process
    pub fn current() -> Self {
        // SAFETY: getuid is always safe - it just returns the real user ID of the process.
        Self(unsafe { libc::getuid() })
    }

    pub const fn id(self) -> u32 {
        self.0
    }

    pub const fn is_root(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Human readable intent or cancellation cause
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reason(String);

impl Reason {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }

    pub fn unknown() -> Self {
        Self::new("unknown")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Reason {
    fn default() -> Self {
        Self::unknown()
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Reason {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Handle of one enrolled template within an (Application, User) scope.
///
/// Only ever an identifier; template payloads stay inside the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateId(u64);

impl TemplateId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Placeholder for operations without a meaningful progress or result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Void;

/// Pixel position on the sensor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

impl Point {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// Axis aligned area on the sensor, used to hint finger placement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rectangle {
    pub top_left: Point,
    pub bottom_right: Point,
}

impl Rectangle {
    pub const fn new(top_left: Point, bottom_right: Point) -> Self {
        Self {
            top_left,
            bottom_right,
        }
    }

    pub fn width(&self) -> u32 {
        self.bottom_right.x.saturating_sub(self.top_left.x)
    }

    pub fn height(&self) -> u32 {
        self.bottom_right.y.saturating_sub(self.top_left.y)
    }
}
