//! Backing-store column types.

/// Column type of one persisted field. Nullability comes from the column declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageType {
    Integer,
    BigInt,
    Float,
    Double,
    Varchar(u32),
    Text,
    Enum(Vec<String>),
    Json,
    Blob,
    Boolean,
    Date,
    Timestamp,
}

impl StorageType {
    /// PostgreSQL column type used in DDL. Enums are TEXT plus a CHECK constraint (see `check_clause`).
    pub fn pg_type(&self) -> String {
        match self {
            StorageType::Integer => "INTEGER".into(),
            StorageType::BigInt => "BIGINT".into(),
            StorageType::Float => "REAL".into(),
            StorageType::Double => "DOUBLE PRECISION".into(),
            StorageType::Varchar(n) => format!("VARCHAR({})", n),
            StorageType::Text | StorageType::Enum(_) => "TEXT".into(),
            StorageType::Json => "JSONB".into(),
            StorageType::Blob => "BYTEA".into(),
            StorageType::Boolean => "BOOLEAN".into(),
            StorageType::Date => "DATE".into(),
            StorageType::Timestamp => "TIMESTAMPTZ".into(),
        }
    }

    /// Cast applied to a bound parameter. Parameters travel as text and are cast to the column type.
    pub fn bind_cast(&self) -> &'static str {
        match self {
            StorageType::Integer => "integer",
            StorageType::BigInt => "bigint",
            StorageType::Float => "real",
            StorageType::Double => "double precision",
            StorageType::Varchar(_) | StorageType::Text | StorageType::Enum(_) => "text",
            StorageType::Json => "jsonb",
            StorageType::Blob => "bytea",
            StorageType::Boolean => "boolean",
            StorageType::Date => "date",
            StorageType::Timestamp => "timestamptz",
        }
    }

    /// CHECK constraint body for enum columns.
    pub fn check_clause(&self, quoted_column: &str) -> Option<String> {
        match self {
            StorageType::Enum(values) if !values.is_empty() => {
                let list: Vec<String> = values.iter().map(|v| format!("'{}'", v.replace('\'', "''"))).collect();
                Some(format!("CHECK ({} IN ({}))", quoted_column, list.join(", ")))
            }
            _ => None,
        }
    }
}
