//! Closed tagged union for auxiliary progress values

use std::collections::BTreeMap;

use crate::data::types::Rectangle;

/// String keyed bag of auxiliary values
pub type Dictionary = BTreeMap<String, Variant>;

/// A typed value of one of a fixed set of kinds
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Variant {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Double(f64),
    Rectangle(Rectangle),
    String(String),
    Blob(Vec<u8>),
    Vector(Vec<Variant>),
}

/// Wire discriminants, stable across versions
pub mod discriminant {
    pub const NONE: u16 = 0;
    pub const BOOL: u16 = 1;
    pub const INT: u16 = 2;
    pub const DOUBLE: u16 = 3;
    pub const RECTANGLE: u16 = 4;
    pub const STRING: u16 = 5;
    pub const BLOB: u16 = 6;
    pub const VECTOR: u16 = 7;
}

impl Variant {
    pub fn discriminant(&self) -> u16 {
        match self {
            Variant::None => discriminant::NONE,
            Variant::Bool(_) => discriminant::BOOL,
            Variant::Int(_) => discriminant::INT,
            Variant::Double(_) => discriminant::DOUBLE,
            Variant::Rectangle(_) => discriminant::RECTANGLE,
            Variant::String(_) => discriminant::STRING,
            Variant::Blob(_) => discriminant::BLOB,
            Variant::Vector(_) => discriminant::VECTOR,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Variant::None)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Variant::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Variant::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Variant::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_rectangle(&self) -> Option<&Rectangle> {
        match self {
            Variant::Rectangle(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Variant::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Variant::Blob(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[Variant]> {
        match self {
            Variant::Vector(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for Variant {
    fn from(v: bool) -> Self {
        Variant::Bool(v)
    }
}

impl From<i64> for Variant {
    fn from(v: i64) -> Self {
        Variant::Int(v)
    }
}

impl From<f64> for Variant {
    fn from(v: f64) -> Self {
        Variant::Double(v)
    }
}

impl From<Rectangle> for Variant {
    fn from(v: Rectangle) -> Self {
        Variant::Rectangle(v)
    }
}

impl From<String> for Variant {
    fn from(v: String) -> Self {
        Variant::String(v)
    }
}

impl From<&str> for Variant {
    fn from(v: &str) -> Self {
        Variant::String(v.to_string())
    }
}

impl From<Vec<Variant>> for Variant {
    fn from(v: Vec<Variant>) -> Self {
        Variant::Vector(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::Point;

    #[test]
    fn test_discriminants_are_distinct() {
        let all = [
            Variant::None,
            Variant::Bool(true),
            Variant::Int(1),
            Variant::Double(1.0),
            Variant::Rectangle(Rectangle::default()),
            Variant::String(String::new()),
            Variant::Blob(vec![]),
            Variant::Vector(vec![]),
        ];
        let mut seen: Vec<u16> = all.iter().map(Variant::discriminant).collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), all.len());
    }

    #[test]
    fn test_accessors() {
        let rect = Rectangle::new(Point::new(0, 0), Point::new(4, 4));
        assert_eq!(Variant::from(rect).as_rectangle(), Some(&rect));
        assert_eq!(Variant::from("hi").as_str(), Some("hi"));
        assert_eq!(Variant::from(7i64).as_int(), Some(7));
        assert_eq!(Variant::from(7i64).as_bool(), None);
        assert!(Variant::default().is_none());
    }
}
