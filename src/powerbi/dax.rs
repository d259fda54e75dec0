//! DAX query construction and `executeQueries` result reshaping.

// crates.io
use serde_json::{Map, Value, json};
// self
use crate::_prelude::*;

/// Request body for `POST .../executeQueries`.
pub fn execute_queries_body(query: &str) -> Value {
	json!({
		"queries": [{ "query": query }],
		"serializerSettings": { "includeNulls": true },
	})
}

/// Quotes a table name for DAX, doubling embedded single quotes.
pub fn quote_table(name: &str) -> String {
	format!("'{}'", name.replace('\'', "''"))
}

/// `EVALUATE ROW("RowCount", COUNTROWS('<table>'))`.
pub fn row_count_query(table: &str) -> String {
	format!("EVALUATE ROW(\"RowCount\", COUNTROWS({}))", quote_table(table))
}

/// `EVALUATE TOPN(<max_rows>, '<table>')`.
pub fn top_rows_query(table: &str, max_rows: u32) -> String {
	format!("EVALUATE TOPN({max_rows}, {})", quote_table(table))
}

/// Rows of the first table of the first result.
pub fn first_table_rows(result: &Value) -> Result<&[Value]> {
	result
		.pointer("/results/0/tables/0/rows")
		.and_then(Value::as_array)
		.map(Vec::as_slice)
		.ok_or_else(|| Error::Decode { reason: "query result has no `results[0].tables[0].rows`".into() })
}

/// Scalar produced by [`row_count_query`].
pub fn row_count(result: &Value) -> Result<Value> {
	first_table_rows(result)?
		.first()
		.and_then(|row| row.get("[RowCount]"))
		.cloned()
		.ok_or_else(|| Error::Decode { reason: "query result has no `[RowCount]` cell".into() })
}

/// CSV rendition of query rows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Csv {
	/// Header line followed by one line per row, joined with `\n`.
	pub content: String,
	/// Data rows rendered.
	pub row_count: usize,
	/// Columns rendered.
	pub column_count: usize,
}

/// Renders `rows` using the keys of the first row as columns.
///
/// Commas inside values become `;`, nulls and missing cells become empty fields.
pub fn rows_to_csv(rows: &[Value]) -> Csv {
	let columns: Vec<&str> = rows
		.first()
		.and_then(Value::as_object)
		.map(|row| row.keys().map(String::as_str).collect())
		.unwrap_or_default();
	let mut lines = Vec::with_capacity(rows.len() + 1);

	lines.push(columns.join(","));

	for row in rows {
		let cells = row.as_object();
		let line = columns
			.iter()
			.map(|column| render_cell(cells.and_then(|cells| cells.get(*column))))
			.collect::<Vec<_>>()
			.join(",");

		lines.push(line);
	}

	Csv { content: lines.join("\n"), row_count: rows.len(), column_count: columns.len() }
}

fn render_cell(value: Option<&Value>) -> String {
	let text = match value {
		None | Some(Value::Null) => String::new(),
		Some(Value::String(s)) => s.clone(),
		Some(other) => other.to_string(),
	};

	text.replace(',', ";")
}

/// Summary of one table as reported by `analyze_data_quality`.
pub fn table_summary(table: &Value, row_count: Value) -> Value {
	let len = |key: &str| table.get(key).and_then(Value::as_array).map_or(0, Vec::len);
	let mut summary = Map::new();

	summary.insert("row_count".into(), row_count);
	summary.insert("columns".into(), len("columns").into());
	summary.insert("measures".into(), len("measures").into());

	Value::Object(summary)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn table_names_are_quoted_for_dax() {
		assert_eq!(row_count_query("Sales"), "EVALUATE ROW(\"RowCount\", COUNTROWS('Sales'))");
		assert_eq!(top_rows_query("Bob's Orders", 10), "EVALUATE TOPN(10, 'Bob''s Orders')");
	}

	#[test]
	fn row_count_is_read_from_the_first_cell() {
		let result = json!({"results": [{"tables": [{"rows": [{"[RowCount]": 42}]}]}]});

		assert_eq!(row_count(&result).expect("Row count should be present."), json!(42));
		assert!(matches!(row_count(&json!({"results": []})), Err(Error::Decode { .. })));
	}

	#[test]
	fn csv_keeps_column_order_and_escapes_commas() {
		let rows = vec![
			json!({"Sales[Region]": "North, East", "Sales[Amount]": 10.5, "Sales[Note]": null}),
			json!({"Sales[Region]": "South", "Sales[Amount]": 3}),
		];
		let csv = rows_to_csv(&rows);

		assert_eq!(
			csv.content,
			"Sales[Region],Sales[Amount],Sales[Note]\nNorth; East,10.5,\nSouth,3,"
		);
		assert_eq!(csv.row_count, 2);
		assert_eq!(csv.column_count, 3);
	}
}
