/// CSV dataset parsing.
///
/// Supported format:
/// - UTF-8, comma-separated
/// - Optional header row (auto-detected: first row is a header if it contains
///   any non-numeric, non-empty cell)
/// - Double-quoted fields with embedded commas are handled correctly
/// - The last column is a 0-based integer class index; all others are features

use crate::error::DataError;

/// Parses CSV bytes into `(features, class_indices)`.
pub fn parse_csv(data: &[u8], source_name: &str) -> Result<(Vec<Vec<f64>>, Vec<usize>), DataError> {
    let err = |message: String| DataError::Parse { source_name: source_name.to_string(), message };

    let text = std::str::from_utf8(data)
        .map_err(|_| err("file is not valid UTF-8".into()))?;

    let mut lines = text.lines().peekable();

    // Auto-detect header: skip first line if any cell is non-numeric.
    if let Some(first) = lines.peek() {
        if is_header(first) {
            lines.next();
        }
    }

    let mut inputs: Vec<Vec<f64>> = Vec::new();
    let mut labels: Vec<usize> = Vec::new();

    for (row_idx, line) in lines.enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let cells = parse_csv_row(line);
        let Some((label_cell, feature_cells)) = cells.split_last() else {
            continue;
        };
        if feature_cells.is_empty() {
            return Err(err(format!(
                "Row {}: expected at least 2 columns (features + class index), got {}",
                row_idx + 1,
                cells.len()
            )));
        }

        let feats = parse_floats(feature_cells, row_idx + 1).map_err(err)?;
        let class_idx: usize = label_cell.trim().parse::<usize>().map_err(|_| {
            err(format!(
                "Row {}: class index '{}' is not a non-negative integer",
                row_idx + 1,
                label_cell
            ))
        })?;

        inputs.push(feats);
        labels.push(class_idx);
    }

    if inputs.is_empty() {
        return Err(err("no data rows after parsing".into()));
    }

    // Verify all rows have the same feature width.
    let n_feats = inputs[0].len();
    for (i, row) in inputs.iter().enumerate() {
        if row.len() != n_feats {
            return Err(err(format!(
                "Row {}: feature count {} does not match first row's {}",
                i + 1, row.len(), n_feats
            )));
        }
    }

    Ok((inputs, labels))
}

/// Quotes a field when it contains a delimiter, quote, or newline.
pub fn escape_field(field: &str) -> String {
    if field.contains(|c| matches!(c, ',' | '"' | '\n' | '\r')) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Returns `true` if the row looks like a header (any cell non-numeric).
fn is_header(line: &str) -> bool {
    let cells = parse_csv_row(line);
    cells.iter().any(|c| {
        let t = c.trim();
        !t.is_empty() && t.parse::<f64>().is_err()
    })
}

/// Parses a single CSV row, handling double-quoted fields.
pub(crate) fn parse_csv_row(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '"' => {
                if in_quotes && i + 1 < chars.len() && chars[i + 1] == '"' {
                    // Escaped quote inside quoted field.
                    current.push('"');
                    i += 2;
                    continue;
                }
                in_quotes = !in_quotes;
            }
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut current));
            }
            c => current.push(c),
        }
        i += 1;
    }
    fields.push(current);
    fields
}

fn parse_floats(cells: &[String], row_num: usize) -> Result<Vec<f64>, String> {
    cells.iter()
        .map(|c| {
            c.trim().parse::<f64>().map_err(|_| {
                format!("Row {}: '{}' is not a valid number", row_num, c)
            })
        })
        .collect()
}
