//! A best-effort tabular diagnostic sink (§6 `PrintTable`). Not a general
//! pretty-printer — just enough column alignment to make a batch of result
//! rows readable on a terminal while developing a query.
use crate::runtime::Row;
use crate::value::to_string;

/// Builds a [`crate::runtime::Sink`] that prints every result batch as a
/// simple padded table to stdout. Column set is the union of every row's
/// keys in the batch, in sorted order (rows are `BTreeMap`s already, so
/// this is just each row's natural key order merged together).
pub fn print_table_sink() -> crate::runtime::Sink {
	Box::new(|rows: &[Row]| {
		if rows.is_empty() {
			return;
		}
		print_table(rows);
	})
}

fn print_table(rows: &[Row]) {
	let mut columns: Vec<String> = Vec::new();
	for row in rows {
		for key in row.keys() {
			if !columns.contains(key) {
				columns.push(key.clone());
			}
		}
	}

	let mut widths: Vec<usize> = columns.iter().map(|c| c.len()).collect();
	let rendered: Vec<Vec<String>> = rows
		.iter()
		.map(|row| {
			columns
				.iter()
				.map(|c| row.get(c).map(to_string).unwrap_or_default())
				.collect::<Vec<_>>()
		})
		.collect();
	for row in &rendered {
		for (i, cell) in row.iter().enumerate() {
			widths[i] = widths[i].max(cell.len());
		}
	}

	print_row(&columns, &widths);
	let separator: String =
		widths.iter().map(|w| "-".repeat(w + 2)).collect::<Vec<_>>().join("+");
	println!("{separator}");
	for row in &rendered {
		print_row(row, &widths);
	}
}

fn print_row(cells: &[String], widths: &[usize]) {
	let padded: Vec<String> = cells
		.iter()
		.zip(widths)
		.map(|(cell, width)| format!(" {cell:<width$} ", width = width))
		.collect();
	println!("{}", padded.join("|"));
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::value::Value;
	use std::collections::BTreeMap;

	#[test]
	fn builds_sink_without_panicking_on_empty_batch() {
		let sink = print_table_sink();
		sink(&[]);
	}

	#[test]
	fn renders_heterogeneous_rows() {
		let mut a = BTreeMap::new();
		a.insert("device".to_owned(), Value::String("d1".into()));
		a.insert("count".to_owned(), Value::Int(3));
		let mut b = BTreeMap::new();
		b.insert("device".to_owned(), Value::String("d2".into()));
		print_table(&[a, b]);
	}
}
