use std::fmt;

/// Type tag carried by every slot of an argument frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueTag {
    Int,
    Float,
    String,
    Object,
    Vector,
    Json,
}

impl fmt::Display for ValueTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::String => "string",
            Self::Object => "object",
            Self::Vector => "vector",
            Self::Json => "json",
        };
        f.write_str(name)
    }
}

/// Identifier of a host-owned game object.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u32);

impl ObjectId {
    pub const INVALID: Self = Self(0x7F00_0000);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({:#x})", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Vector {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// A single tagged value in flight.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i32),
    Float(f32),
    String(String),
    Object(ObjectId),
    Vector(Vector),
    Json(serde_json::Value),
}

impl Value {
    pub fn tag(&self) -> ValueTag {
        match self {
            Self::Int(_) => ValueTag::Int,
            Self::Float(_) => ValueTag::Float,
            Self::String(_) => ValueTag::String,
            Self::Object(_) => ValueTag::Object,
            Self::Vector(_) => ValueTag::Vector,
            Self::Json(_) => ValueTag::Json,
        }
    }
}

/// A Rust type that can occupy one slot of an argument frame.
pub trait StackValue: Sized {
    const TAG: ValueTag;

    fn into_value(self) -> Value;

    /// Converts back out of a slot. The slot is handed back untouched if its
    /// tag is not [`Self::TAG`].
    fn from_value(value: Value) -> Result<Self, Value>;
}

macro_rules! stack_value {
    ($ty:ty, $variant:ident) => {
        impl StackValue for $ty {
            const TAG: ValueTag = ValueTag::$variant;

            fn into_value(self) -> Value {
                Value::$variant(self)
            }

            fn from_value(value: Value) -> Result<Self, Value> {
                match value {
                    Value::$variant(inner) => Ok(inner),
                    other => Err(other),
                }
            }
        }
    };
}

stack_value!(i32, Int);
stack_value!(f32, Float);
stack_value!(String, String);
stack_value!(ObjectId, Object);
stack_value!(Vector, Vector);
stack_value!(serde_json::Value, Json);
