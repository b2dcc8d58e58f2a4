//! Star schema for the Involves export: four dimensions and one fact table.

use crate::frame::{normalize_nulls, Frame};
use tracing::warn;

/// Fact column kept as text for every answer, numeric-looking or not.
pub const FACT_TEXT_COLUMN: &str = "RESPOSTA";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Dimension,
    Fact,
}

/// A target table: name, fixed column list, and projection rules
#[derive(Debug)]
pub struct TargetTable {
    pub name: &'static str,
    pub kind: TableKind,
    pub columns: &'static [&'static str],
    /// Rows missing this column are left out of the projection.
    pub required: Option<&'static str>,
}

pub const DIM_PDV: TargetTable = TargetTable {
    name: "dim_pdv",
    kind: TableKind::Dimension,
    columns: &[
        "ID_PDV",
        "NOME_PDV",
        "NOME_FANTASIA",
        "RAZAO_SOCIAL",
        "BANDEIRA",
        "REDE",
        "TIPO_PDV",
        "PERFIL_PDV",
        "CANAL_PDV",
        "REGIONAL",
        "MACRO_REGIONAL",
        "CNPJ",
    ],
    required: None,
};

pub const DIM_PERGUNTA: TargetTable = TargetTable {
    name: "dim_pergunta",
    kind: TableKind::Dimension,
    columns: &[
        "ID_PERGUNTA",
        "NOME_CAMPO",
        "ROTULO_WEB",
        "FL_TIPO",
        "TIPO_CAMPO",
        "FL_REFERENCIA",
        "OBJETIVO_CAMPO",
        "OBRIGATORIO",
    ],
    required: None,
};

pub const DIM_COLABORADOR: TargetTable = TargetTable {
    name: "dim_colaborador",
    kind: TableKind::Dimension,
    columns: &[
        "ID_COLABORADOR",
        "NOME_COLABORADOR",
        "USUARIO",
        "REGIONAIS",
        "MOVEL",
        "DATA_ADMISSAO",
    ],
    required: None,
};

pub const DIM_PRODUTO: TargetTable = TargetTable {
    name: "dim_produto",
    kind: TableKind::Dimension,
    columns: &[
        "ID_PRODUTO",
        "PRODUTO",
        "LINHA_PRODUTO",
        "MARCA",
        "CATEGORIA_PRODUTO",
        "SUPER_CATEGORIA",
        "CODIGO_BARRAS",
    ],
    required: Some("ID_PRODUTO"),
};

pub const FATO_COLETA: TargetTable = TargetTable {
    name: "fato_coleta",
    kind: TableKind::Fact,
    columns: &[
        "ID_COLETA",
        "DATA",
        "ID_PDV",
        "ID_PERGUNTA",
        "ID_COLABORADOR",
        "ID_PRODUTO",
        FACT_TEXT_COLUMN,
    ],
    required: None,
};

/// Load order: dimensions first, fact last.
pub const TABLES: [&TargetTable; 5] = [
    &DIM_PDV,
    &DIM_PERGUNTA,
    &DIM_COLABORADOR,
    &DIM_PRODUTO,
    &FATO_COLETA,
];

impl TargetTable {
    pub fn is_fact(&self) -> bool {
        self.kind == TableKind::Fact
    }

    /// `"schema".name`, or the bare name when no schema is configured.
    pub fn qualified_name(&self, schema: Option<&str>) -> String {
        match schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), self.name),
            None => self.name.to_string(),
        }
    }

    /// Statements that discard any existing table and create it empty.
    pub fn replace_statements(&self, schema: Option<&str>) -> [String; 2] {
        let table = self.qualified_name(schema);
        let columns = self
            .columns
            .iter()
            .map(|c| format!("{} TEXT", c))
            .collect::<Vec<_>>()
            .join(", ");

        [
            format!("DROP TABLE IF EXISTS {}", table),
            format!("CREATE TABLE {} ({})", table, columns),
        ]
    }

    /// Distinct projection of the cleaned export onto this table's columns.
    pub fn project(&self, frame: &Frame) -> Frame {
        let missing = frame.missing_columns(self.columns);
        if !missing.is_empty() && !frame.columns().is_empty() {
            warn!(
                table = self.name,
                columns = ?missing,
                "columns absent from cleaned export, loading them as NULL"
            );
        }

        let mut projected = frame.select(self.columns);
        if let Some(column) = self.required {
            projected = projected.drop_missing_in(column);
        }
        projected.drop_duplicates()
    }

    /// Rows exactly as they will be inserted.
    ///
    /// Null-like tokens become NULL again, and dimension rows with nothing
    /// but NULLs are dropped. Fact rows are all kept, and since cells are
    /// text already, an answer of 5 is stored as "5".
    pub fn prepare_rows(&self, mut rows: Frame) -> Frame {
        normalize_nulls(&mut rows);
        if self.is_fact() {
            rows
        } else {
            rows.drop_empty_rows()
        }
    }
}

/// Double-quoted SQL identifier.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Project the cleaned export into every target table, in load order.
pub fn project_tables(frame: &Frame) -> Vec<(&'static TargetTable, Frame)> {
    TABLES
        .iter()
        .map(|table| (*table, table.project(frame)))
        .collect()
}
