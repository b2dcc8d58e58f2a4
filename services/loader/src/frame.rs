//! Text frame - the in-memory table the loader works on
//!
//! Every cell is text or missing (`None`). The CSV export is read into a
//! `Frame`, degenerate columns are dropped and null-like tokens are
//! normalized before the frame is projected into warehouse tables.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;
use tokio::fs;

/// Text tokens that mean "no value" in Involves exports.
pub const NULL_LIKE_TOKENS: &[&str] = &["", "NAN", "NaN", "nan", "NULL", "null"];

/// Field values read as missing straight from the file, before any cleaning.
/// Matches the default missing-value markers of dataframe CSV readers.
const READ_MISSING_MARKERS: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

pub type Cell = Option<String>;
pub type Row = Vec<Cell>;

/// Column-named rows of text cells
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl Frame {
    /// Build a frame, checking every row has one cell per column.
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Result<Self> {
        if let Some((idx, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            anyhow::bail!(
                "Row {} has {} cells, expected {} (columns: {:?})",
                idx,
                row.len(),
                columns.len(),
                columns
            );
        }
        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cells of one column, top to bottom.
    #[cfg(test)]
    pub fn column(&self, name: &str) -> Option<Vec<&Cell>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|row| &row[idx]).collect())
    }

    /// Project onto `names`, in that order.
    ///
    /// A requested column the frame does not have comes back entirely
    /// missing. Cleaning drops constant and all-null columns, so a projection
    /// of the cleaned export can legitimately ask for one of those.
    pub fn select(&self, names: &[&str]) -> Frame {
        let indices: Vec<Option<usize>> = names.iter().map(|n| self.column_index(n)).collect();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                indices
                    .iter()
                    .map(|idx| idx.and_then(|i| row[i].clone()))
                    .collect()
            })
            .collect();

        Frame {
            columns: names.iter().map(|n| n.to_string()).collect(),
            rows,
        }
    }

    /// Columns from `names` this frame does not have.
    pub fn missing_columns<'a>(&self, names: &[&'a str]) -> Vec<&'a str> {
        names
            .iter()
            .filter(|n| self.column_index(n).is_none())
            .copied()
            .collect()
    }

    /// Remove repeated rows, keeping the first occurrence of each.
    pub fn drop_duplicates(mut self) -> Frame {
        let mut seen: HashSet<Row> = HashSet::with_capacity(self.rows.len());
        self.rows.retain(|row| seen.insert(row.clone()));
        self
    }

    /// Remove rows whose `column` cell is missing. Unknown column removes every row.
    pub fn drop_missing_in(mut self, column: &str) -> Frame {
        match self.column_index(column) {
            Some(idx) => self.rows.retain(|row| row[idx].is_some()),
            None => self.rows.clear(),
        }
        self
    }

    /// Remove rows where every cell is missing.
    pub fn drop_empty_rows(mut self) -> Frame {
        self.rows.retain(|row| row.iter().any(Option::is_some));
        self
    }

    fn retain_columns(&mut self, keep: &[bool]) {
        let mut flags = keep.iter();
        self.columns.retain(|_| *flags.next().unwrap_or(&true));
        for row in &mut self.rows {
            let mut flags = keep.iter();
            row.retain(|_| *flags.next().unwrap_or(&true));
        }
    }
}

/// True for a text value that stands for "no value".
pub fn is_null_like(value: &str) -> bool {
    NULL_LIKE_TOKENS.contains(&value)
}

/// Map a null-like token to a missing cell. Missing stays missing.
pub fn normalize_cell(cell: Cell) -> Cell {
    cell.filter(|v| !is_null_like(v))
}

/// Replace every null-like token in the frame with a missing cell.
///
/// Shared by the cleaning step and the table loader; running it twice
/// changes nothing.
pub fn normalize_nulls(frame: &mut Frame) {
    for row in &mut frame.rows {
        for cell in row.iter_mut() {
            *cell = normalize_cell(cell.take());
        }
    }
}

/// Drop all-missing columns and columns with at most one distinct value,
/// counting missing as a value of its own. Returns the dropped column names.
///
/// A column with one value plus some missing cells has two distinct states
/// and is kept.
pub fn drop_degenerate_columns(frame: &mut Frame) -> Vec<String> {
    let keep: Vec<bool> = (0..frame.columns.len())
        .map(|idx| has_two_distinct(frame.rows.iter().map(|row| row[idx].as_deref())))
        .collect();

    let dropped = frame
        .columns
        .iter()
        .zip(&keep)
        .filter(|(_, keep)| !**keep)
        .map(|(name, _)| name.clone())
        .collect();

    frame.retain_columns(&keep);
    dropped
}

fn has_two_distinct<'a>(mut cells: impl Iterator<Item = Option<&'a str>>) -> bool {
    let Some(first) = cells.next() else {
        return false;
    };
    cells.any(|cell| cell != first)
}

/// Result of cleaning a raw export
#[derive(Debug)]
pub struct Cleaned {
    pub frame: Frame,
    pub dropped: Vec<String>,
}

/// Drop degenerate columns, then normalize null-like tokens.
/// Row count is unchanged.
pub fn clean(mut frame: Frame) -> Cleaned {
    let dropped = drop_degenerate_columns(&mut frame);
    normalize_nulls(&mut frame);
    Cleaned { frame, dropped }
}

/// Read and parse a CSV file.
pub async fn read_csv(path: &Path) -> Result<Frame> {
    let bytes = fs::read(path)
        .await
        .with_context(|| format!("Failed to read CSV file {}", path.display()))?;
    let text = decode(&bytes);
    parse_csv(&text).with_context(|| format!("Failed to parse CSV file {}", path.display()))
}

/// Decode file bytes: UTF-8 when valid, Windows-1252 otherwise.
fn decode(bytes: &[u8]) -> String {
    let text = match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    };
    match text.strip_prefix('\u{feff}') {
        Some(stripped) => stripped.to_string(),
        None => text,
    }
}

/// Parse comma-separated text with a header row.
///
/// Short records are padded with missing cells; a record longer than the
/// header is an error.
pub fn parse_csv(content: &str) -> Result<Frame> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b',')
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .context("Failed to read CSV headers")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    if headers.is_empty() || headers.iter().all(String::is_empty) {
        anyhow::bail!("CSV has no header row");
    }

    let columns = dedupe_headers(headers);
    let width = columns.len();
    let mut rows: Vec<Row> = Vec::new();

    for result in reader.records() {
        let record = result.context("Malformed CSV record")?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);

        if record.len() > width {
            anyhow::bail!(
                "Line {}: expected at most {} fields, found {}",
                line,
                width,
                record.len()
            );
        }

        let mut row: Row = record.iter().map(read_cell).collect();
        row.resize(width, None);
        rows.push(row);
    }

    Frame::new(columns, rows)
}

fn read_cell(field: &str) -> Cell {
    if READ_MISSING_MARKERS.contains(&field) {
        None
    } else {
        Some(field.to_string())
    }
}

/// Rename repeated headers to `NAME.1`, `NAME.2`, ... keeping the first as is.
fn dedupe_headers(headers: Vec<String>) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(headers.len());

    for header in headers {
        let mut name = header.clone();
        let mut n = 1;
        while taken.contains(&name) {
            name = format!("{}.{}", header, n);
            n += 1;
        }
        taken.insert(name.clone());
        out.push(name);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cell(s: &str) -> Cell {
        Some(s.to_string())
    }

    fn frame(columns: &[&str], rows: Vec<Row>) -> Frame {
        Frame::new(columns.iter().map(|c| c.to_string()).collect(), rows).unwrap()
    }

    // -------------------------------------------------------------------------
    // CSV READING
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_csv_basic() {
        let f = parse_csv("A,B\n1,x\n2,y\n").unwrap();
        assert_eq!(f.columns(), &["A".to_string(), "B".to_string()]);
        assert_eq!(f.len(), 2);
        assert_eq!(f.rows()[1], vec![cell("2"), cell("y")]);
    }

    #[test]
    fn test_parse_csv_empty_fields_are_missing() {
        let f = parse_csv("A,B\n,x\n").unwrap();
        assert_eq!(f.rows()[0], vec![None, cell("x")]);
    }

    #[test]
    fn test_parse_csv_reader_markers_are_missing() {
        let f = parse_csv("A,B,C,D\nNA,N/A,None,NAN\n").unwrap();
        // NAN is not a reader marker; it is handled by normalize_nulls
        assert_eq!(f.rows()[0], vec![None, None, None, cell("NAN")]);
    }

    #[test]
    fn test_parse_csv_keeps_whitespace() {
        let f = parse_csv("A\n  x  \n").unwrap();
        assert_eq!(f.rows()[0], vec![cell("  x  ")]);
    }

    #[test]
    fn test_parse_csv_quoted_commas() {
        let f = parse_csv("NOME,CNPJ\n\"Loja, Centro\",123\n").unwrap();
        assert_eq!(f.rows()[0][0], cell("Loja, Centro"));
    }

    #[test]
    fn test_parse_csv_with_bom() {
        let f = parse_csv("\u{feff}ID_PDV,REDE\n1,A\n").unwrap();
        assert_eq!(f.columns()[0], "ID_PDV");
    }

    #[test]
    fn test_parse_csv_short_record_padded() {
        let f = parse_csv("A,B,C\n1\n").unwrap();
        assert_eq!(f.rows()[0], vec![cell("1"), None, None]);
    }

    #[test]
    fn test_parse_csv_long_record_fails() {
        let result = parse_csv("A,B\n1,2,3\n");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("expected at most 2 fields"));
    }

    #[test]
    fn test_parse_csv_empty_input_fails() {
        assert!(parse_csv("").is_err());
    }

    #[test]
    fn test_parse_csv_header_only() {
        let f = parse_csv("A,B\n").unwrap();
        assert_eq!(f.columns().len(), 2);
        assert!(f.is_empty());
    }

    #[test]
    fn test_parse_csv_duplicate_headers() {
        let f = parse_csv("A,A,A\n1,2,3\n").unwrap();
        assert_eq!(
            f.columns(),
            &["A".to_string(), "A.1".to_string(), "A.2".to_string()]
        );
    }

    #[test]
    fn test_decode_windows_1252() {
        // "REGIÃO" with Ã encoded as 0xC3 alone is not valid UTF-8
        let bytes = b"REGI\xC3O\nSul\n";
        let text = decode(bytes);
        assert!(text.starts_with("REGIÃO"));
    }

    #[tokio::test]
    async fn test_read_csv_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "ID_PDV,REDE\n1,Rede A\n2,Rede B\n").unwrap();

        let f = read_csv(file.path()).await.unwrap();
        assert_eq!(f.len(), 2);
        assert_eq!(f.column("REDE").unwrap()[1], &cell("Rede B"));
    }

    #[tokio::test]
    async fn test_read_csv_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = read_csv(&dir.path().join("absent.csv")).await;
        assert!(result.is_err());
        assert!(format!("{:#}", result.unwrap_err()).contains("Failed to read CSV file"));
    }

    // -------------------------------------------------------------------------
    // DEGENERATE COLUMN REMOVAL
    // -------------------------------------------------------------------------

    #[test]
    fn test_clean_drops_null_and_constant_columns() {
        let f = parse_csv("A,B,C\n,x,1\n,x,2\n,x,3\n").unwrap();
        let cleaned = clean(f);

        assert_eq!(cleaned.frame.columns(), &["C".to_string()]);
        assert_eq!(cleaned.frame.len(), 3);
        assert_eq!(cleaned.dropped, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_one_value_plus_missing_is_kept() {
        let mut f = frame(&["A"], vec![vec![cell("x")], vec![None]]);
        let dropped = drop_degenerate_columns(&mut f);
        assert!(dropped.is_empty());
        assert_eq!(f.columns().len(), 1);
    }

    #[test]
    fn test_one_value_without_missing_is_dropped() {
        let mut f = frame(&["A"], vec![vec![cell("x")], vec![cell("x")]]);
        assert_eq!(drop_degenerate_columns(&mut f), vec!["A".to_string()]);
    }

    #[test]
    fn test_all_missing_is_dropped() {
        let mut f = frame(&["A", "B"], vec![vec![None, cell("1")], vec![None, cell("2")]]);
        drop_degenerate_columns(&mut f);
        assert_eq!(f.columns(), &["B".to_string()]);
        assert_eq!(f.rows()[0], vec![cell("1")]);
    }

    #[test]
    fn test_single_row_drops_every_column() {
        let f = parse_csv("A,B\n1,2\n").unwrap();
        let cleaned = clean(f);
        assert!(cleaned.frame.columns().is_empty());
        assert_eq!(cleaned.frame.len(), 1);
    }

    #[test]
    fn test_zero_rows_drops_every_column() {
        let f = parse_csv("A,B\n").unwrap();
        let cleaned = clean(f);
        assert!(cleaned.frame.columns().is_empty());
    }

    #[test]
    fn test_kept_columns_have_two_distinct_states() {
        let f = parse_csv("A,B,C,D\n1,x,,z\n1,y,,z\n1,,,\n").unwrap();
        let cleaned = clean(f);
        for name in cleaned.frame.columns() {
            let cells: HashSet<&Cell> = cleaned.frame.column(name).unwrap().into_iter().collect();
            assert!(cells.len() >= 2, "column {} is degenerate", name);
        }
        assert_eq!(cleaned.frame.columns(), &["B".to_string(), "D".to_string()]);
    }

    // -------------------------------------------------------------------------
    // NULL NORMALIZATION
    // -------------------------------------------------------------------------

    #[test]
    fn test_normalize_nulls_all_tokens() {
        let mut f = frame(
            &["A"],
            NULL_LIKE_TOKENS.iter().map(|t| vec![cell(t)]).collect(),
        );
        normalize_nulls(&mut f);
        assert!(f.rows().iter().all(|row| row[0].is_none()));
    }

    #[test]
    fn test_normalize_nulls_keeps_real_values() {
        let mut f = frame(&["A"], vec![vec![cell("Nanico")], vec![cell("0")], vec![cell(" ")]]);
        normalize_nulls(&mut f);
        assert_eq!(f.rows()[0][0], cell("Nanico"));
        assert_eq!(f.rows()[1][0], cell("0"));
        assert_eq!(f.rows()[2][0], cell(" "));
    }

    #[test]
    fn test_normalize_nulls_idempotent() {
        let mut once = frame(&["A", "B"], vec![vec![cell("NAN"), cell("1")], vec![None, cell("null")]]);
        normalize_nulls(&mut once);
        let mut twice = once.clone();
        normalize_nulls(&mut twice);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_clean_nan_token_counts_as_value_before_normalizing() {
        // "NAN" survives the reader, so the column has two states and is kept
        let f = parse_csv("A,B\nNAN,1\n,2\n").unwrap();
        let cleaned = clean(f);
        assert_eq!(cleaned.frame.columns(), &["A".to_string(), "B".to_string()]);
        assert_eq!(cleaned.frame.rows()[0][0], None);
    }

    #[test]
    fn test_normalize_cell() {
        assert_eq!(normalize_cell(cell("null")), None);
        assert_eq!(normalize_cell(None), None);
        assert_eq!(normalize_cell(cell("5")), cell("5"));
    }

    // -------------------------------------------------------------------------
    // PROJECTION HELPERS
    // -------------------------------------------------------------------------

    #[test]
    fn test_select_orders_and_fills_missing() {
        let f = frame(&["A", "B"], vec![vec![cell("1"), cell("2")]]);
        let s = f.select(&["B", "Z", "A"]);
        assert_eq!(s.columns(), &["B".to_string(), "Z".to_string(), "A".to_string()]);
        assert_eq!(s.rows()[0], vec![cell("2"), None, cell("1")]);
        assert_eq!(f.missing_columns(&["B", "Z"]), vec!["Z"]);
    }

    #[test]
    fn test_drop_duplicates_keeps_first() {
        let f = frame(
            &["A", "B"],
            vec![
                vec![cell("1"), None],
                vec![cell("2"), cell("x")],
                vec![cell("1"), None],
            ],
        );
        let d = f.drop_duplicates();
        assert_eq!(d.len(), 2);
        assert_eq!(d.rows()[0], vec![cell("1"), None]);
        assert_eq!(d.rows()[1], vec![cell("2"), cell("x")]);
    }

    #[test]
    fn test_drop_missing_in() {
        let f = frame(&["ID", "N"], vec![vec![None, cell("a")], vec![cell("1"), cell("b")]]);
        let d = f.drop_missing_in("ID");
        assert_eq!(d.len(), 1);
        assert_eq!(d.rows()[0][0], cell("1"));
    }

    #[test]
    fn test_drop_empty_rows() {
        let f = frame(&["A", "B"], vec![vec![None, None], vec![None, cell("x")]]);
        let d = f.drop_empty_rows();
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn test_frame_new_rejects_ragged_rows() {
        let result = Frame::new(vec!["A".into(), "B".into()], vec![vec![None]]);
        assert!(result.is_err());
    }
}
