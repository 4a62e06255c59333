//! Column model

use serde::{Deserialize, Serialize};

use super::NameChain;
use crate::errors::{Error, Result};

/// Scalar data type of a column, derived from the XSD simple type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DataType {
    String,
    Token,
    #[serde(rename = "NMTOKEN")]
    NmToken,
    Duration,
    Integer,
    Int,
    Long,
    Byte,
    Decimal,
    Float,
    Boolean,
    Date,
    DateTime,
    Time,
    Binary,
    /// Unrecognized scalar type, preserved by name and treated as a
    /// string; can be replaced with a per-field type override
    Other(String),
}

impl DataType {
    /// Map an XSD simple-type local name onto a data type.
    ///
    /// Unknown names fall back to [`DataType::Other`]; the model builder
    /// logs the fallback once per column.
    pub fn from_xsd(name: &str) -> DataType {
        match name {
            "string" | "normalizedString" | "anyURI" | "ID" | "IDREF" | "language" => {
                DataType::String
            }
            "token" => DataType::Token,
            "NMTOKEN" => DataType::NmToken,
            "duration" => DataType::Duration,
            "integer" | "nonNegativeInteger" | "positiveInteger" | "negativeInteger"
            | "nonPositiveInteger" => DataType::Integer,
            "int" | "short" | "unsignedShort" | "unsignedInt" => DataType::Int,
            "long" | "unsignedLong" => DataType::Long,
            "byte" | "unsignedByte" => DataType::Byte,
            "decimal" => DataType::Decimal,
            "float" | "double" => DataType::Float,
            "boolean" => DataType::Boolean,
            "date" => DataType::Date,
            "dateTime" => DataType::DateTime,
            "time" => DataType::Time,
            "base64Binary" | "hexBinary" => DataType::Binary,
            other => DataType::Other(other.to_string()),
        }
    }

    /// Data types stored as floating point values
    pub fn is_float(&self) -> bool {
        matches!(self, DataType::Decimal | DataType::Float)
    }

    /// Data types stored as integer values
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            DataType::Integer | DataType::Int | DataType::Long | DataType::Byte
        )
    }

    /// Data types whose repeated values can be joined unambiguously into
    /// a comma-separated string
    pub fn supports_value_join(&self) -> bool {
        matches!(
            self,
            DataType::String
                | DataType::Date
                | DataType::DateTime
                | DataType::NmToken
                | DataType::Time
        )
    }

    /// XSD-style display name
    pub fn xsd_name(&self) -> &str {
        match self {
            DataType::String => "string",
            DataType::Token => "token",
            DataType::NmToken => "NMTOKEN",
            DataType::Duration => "duration",
            DataType::Integer => "integer",
            DataType::Int => "int",
            DataType::Long => "long",
            DataType::Byte => "byte",
            DataType::Decimal => "decimal",
            DataType::Float => "float",
            DataType::Boolean => "boolean",
            DataType::Date => "date",
            DataType::DateTime => "dateTime",
            DataType::Time => "time",
            DataType::Binary => "binary",
            DataType::Other(name) => name,
        }
    }
}

/// Occurrence range of a field; `max` is `None` when unbounded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurs {
    pub min: u32,
    pub max: Option<u32>,
}

impl Occurs {
    /// A required, single-valued range
    pub const ONE: Occurs = Occurs {
        min: 1,
        max: Some(1),
    };

    /// An optional, single-valued range
    pub const OPTIONAL: Occurs = Occurs {
        min: 0,
        max: Some(1),
    };

    pub fn new(min: u32, max: Option<u32>) -> Occurs {
        Occurs { min, max }
    }

    /// True when at most one value is allowed
    pub fn is_single(&self) -> bool {
        self.max == Some(1)
    }

    /// True when more than one value is allowed
    pub fn is_multiple(&self) -> bool {
        !self.is_single()
    }
}

impl std::fmt::Display for Occurs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.max {
            Some(max) => write!(f, "[{}, {}]", self.min, max),
            None => write!(f, "[{}, n]", self.min),
        }
    }
}

/// A column of a table holding scalar values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Path of original element names, accounting for elevated fields
    pub name_chain: NameChain,
    /// Scalar data type
    pub data_type: DataType,
    /// Occurrence range
    pub occurs: Occurs,
    /// Minimum length restriction, if any
    pub min_length: Option<u32>,
    /// Maximum length restriction, if any
    pub max_length: Option<u32>,
    /// Value comes from an XML attribute rather than an element
    pub is_attr: bool,
    /// Value is the text content of a mixed-content element
    pub is_content: bool,
    /// Nullable
    pub allow_empty: bool,
    /// Nested-sequence tag used to reconstruct sibling interleaving
    pub ngroup: Option<String>,
}

impl Column {
    /// Decide whether multiple values can be stored as comma-separated
    /// values in this column.
    ///
    /// Errors when the occurrence range admits multiple values but the
    /// data type cannot be joined unambiguously; a per-field type
    /// override lifts the restriction (checked by the caller).
    pub fn can_join_values_as_string(&self) -> Result<bool> {
        if self.occurs.is_single() {
            return Ok(true);
        }
        if self.data_type.supports_value_join() {
            return Ok(true);
        }
        Err(Error::SchemaConfig(format!(
            "column type '{}' with maxOccur > 1 is not supported (column '{}')",
            self.data_type.xsd_name(),
            self.name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChainLink;

    fn column(data_type: DataType, occurs: Occurs) -> Column {
        Column {
            name: "c".to_string(),
            name_chain: vec![ChainLink::column("c")],
            data_type,
            occurs,
            min_length: None,
            max_length: None,
            is_attr: false,
            is_content: false,
            allow_empty: true,
            ngroup: None,
        }
    }

    #[test]
    fn test_single_column_always_joinable() {
        let col = column(DataType::Float, Occurs::ONE);
        assert!(col.can_join_values_as_string().unwrap());
    }

    #[test]
    fn test_repeatable_string_joinable() {
        let col = column(DataType::String, Occurs::new(0, None));
        assert!(col.can_join_values_as_string().unwrap());
    }

    #[test]
    fn test_repeatable_float_rejected() {
        let col = column(DataType::Float, Occurs::new(0, Some(3)));
        let err = col.can_join_values_as_string().unwrap_err();
        assert!(err.to_string().contains("maxOccur > 1 is not supported"));
    }

    #[test]
    fn test_unknown_type_preserved() {
        assert_eq!(
            DataType::from_xsd("gYearMonth"),
            DataType::Other("gYearMonth".to_string())
        );
    }
}
