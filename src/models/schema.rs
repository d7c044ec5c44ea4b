use std::fmt::Write;

use serde::{Deserialize, Serialize};

/// Point-in-time description of one database, produced by the schema cache.
/// Column order within a table is stable for the lifetime of the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub database: String,
    pub version: String,
    pub tables: Vec<TableInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    pub schema_name: String,
    pub table_name: String,
    pub columns: Vec<ColumnInfo>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub is_primary_key: bool,
    pub is_unique: bool,
    pub default_value: Option<String>,
}

impl TableInfo {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema_name, self.table_name)
    }
}

impl SchemaSnapshot {
    /// Render the snapshot as prompt context for SQL generation.
    pub fn prompt_context(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Database: {} ({})", self.database, self.version);
        for table in &self.tables {
            let _ = write!(out, "\nTable {}", table.qualified_name());
            if let Some(comment) = &table.comment {
                let _ = write!(out, " -- {}", comment);
            }
            out.push('\n');
            for col in &table.columns {
                let _ = write!(out, "  - {} {}", col.name, col.data_type);
                if !col.is_nullable {
                    out.push_str(" NOT NULL");
                }
                if col.is_primary_key {
                    out.push_str(" [PK]");
                } else if col.is_unique {
                    out.push_str(" [unique]");
                }
                if let Some(default) = &col.default_value {
                    let _ = write!(out, " DEFAULT {}", default);
                }
                out.push('\n');
            }
        }
        out
    }
}
