use crate::object::{DynamicProperty, PropertyValue};
use glam::{Vec2, Vec3, Vec4};
use prism_common::StringTable;
use std::collections::BTreeMap;

/// What kind of graph object a dynamic class instantiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    Effect,
    CustomMaterial,
}

/// Default value of a class property, independent of any string table.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyDefault {
    Float(f32),
    Int(i32),
    Bool(bool),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    String(String),
    Image,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDef {
    pub name: String,
    pub default: PropertyDefault,
}

impl PropertyDef {
    pub fn new(name: impl Into<String>, default: PropertyDefault) -> Self {
        Self {
            name: name.into(),
            default,
        }
    }
}

/// A registered effect or custom-material class.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    pub name: String,
    pub kind: ClassKind,
    pub properties: Vec<PropertyDef>,
    /// Backend command data copied into every instance.
    pub payload: Vec<u8>,
}

impl ClassDef {
    pub fn new(name: impl Into<String>, kind: ClassKind) -> Self {
        Self {
            name: name.into(),
            kind,
            properties: Vec::new(),
            payload: Vec::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, default: PropertyDefault) -> Self {
        self.properties.push(PropertyDef::new(name, default));
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }
}

/// The dynamic-object system: classes effects and custom materials are built
/// from. Passed to the graph at construction, never global.
#[derive(Debug, Clone, Default)]
pub struct ClassRegistry {
    classes: BTreeMap<String, ClassDef>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class. Returns `false` if the name is already taken.
    pub fn register(&mut self, class: ClassDef) -> bool {
        if self.classes.contains_key(&class.name) {
            tracing::warn!(class = %class.name, "class already registered");
            return false;
        }
        self.classes.insert(class.name.clone(), class);
        true
    }

    pub fn get(&self, name: &str) -> Option<&ClassDef> {
        self.classes.get(name)
    }

    pub fn contains(&self, name: &str, kind: ClassKind) -> bool {
        self.get(name).is_some_and(|c| c.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    /// Default property values of `name`, interned into `strings`.
    pub fn instantiate(
        &self,
        name: &str,
        kind: ClassKind,
        strings: &mut StringTable,
    ) -> Option<(Vec<DynamicProperty>, Vec<u8>)> {
        let class = self.get(name).filter(|c| c.kind == kind)?;
        let properties = class
            .properties
            .iter()
            .map(|def| DynamicProperty {
                name: strings.intern(&def.name),
                value: match &def.default {
                    PropertyDefault::Float(v) => PropertyValue::Float(*v),
                    PropertyDefault::Int(v) => PropertyValue::Int(*v),
                    PropertyDefault::Bool(v) => PropertyValue::Bool(*v),
                    PropertyDefault::Vec2(v) => PropertyValue::Vec2(*v),
                    PropertyDefault::Vec3(v) => PropertyValue::Vec3(*v),
                    PropertyDefault::Vec4(v) => PropertyValue::Vec4(*v),
                    PropertyDefault::String(v) => PropertyValue::String(strings.intern(v)),
                    PropertyDefault::Image => PropertyValue::Image(None),
                },
            })
            .collect();
        Some((properties, class.payload.clone()))
    }
}
