//! PowerBI domain tools built on [`RequestGateway`].
//!
//! Each tool is a thin call-site: it picks the endpoint (workspace-scoped when a workspace id
//! is given), issues one or more gateway calls, and reshapes the response into the payload an
//! orchestration host expects. Every tool returns an [`Envelope`].

pub mod dax;

// crates.io
use serde_json::{Map, Value, json};
// self
use crate::{
	_prelude::*,
	envelope::Envelope,
	gateway::{Method, RequestGateway},
	http::{ReqwestHttpClient, TokenHttpClient},
	oauth::{ReqwestTransportErrorMapper, TransportErrorMapper},
};

/// Default number of refresh records returned by [`PowerBiTools::get_refresh_history`].
pub const DEFAULT_REFRESH_HISTORY_TOP: u32 = 5;
/// Default row cap used by [`PowerBiTools::export_data_to_csv`].
pub const DEFAULT_EXPORT_MAX_ROWS: u32 = 1_000;

/// PowerBI workspace, dataset, report, and DAX tools.
pub struct PowerBiTools<C = ReqwestHttpClient, M = ReqwestTransportErrorMapper>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	gateway: Arc<RequestGateway<C, M>>,
}
impl<C, M> PowerBiTools<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Wraps a shared gateway.
	pub fn new(gateway: Arc<RequestGateway<C, M>>) -> Self {
		Self { gateway }
	}

	/// Gateway the tools dispatch through.
	pub fn gateway(&self) -> &Arc<RequestGateway<C, M>> {
		&self.gateway
	}

	/// Lists the workspaces the service principal can access.
	pub async fn get_workspaces(&self) -> Envelope {
		self.gateway.execute(Method::GET, "/groups", None).await.map(|body| {
			let workspaces = value_list(body);
			let count = workspaces.len();

			json!({ "workspaces": workspaces, "count": count })
		})
	}

	/// Lists datasets of a workspace, or every accessible dataset.
	pub async fn get_datasets(&self, workspace_id: Option<&str>) -> Envelope {
		let path = scoped(workspace_id, "/datasets");

		self.gateway.execute(Method::GET, &path, None).await.map(|body| {
			let datasets = value_list(body);
			let count = datasets.len();

			json!({ "datasets": datasets, "workspace_id": workspace_id, "count": count })
		})
	}

	/// Reads one dataset.
	pub async fn get_dataset(&self, dataset_id: &str, workspace_id: Option<&str>) -> Envelope {
		let path = dataset_path(workspace_id, dataset_id, "");

		self.gateway.execute(Method::GET, &path, None).await.map(|dataset| {
			json!({ "dataset": dataset, "dataset_id": dataset_id, "workspace_id": workspace_id })
		})
	}

	/// Reads a dataset together with its tables.
	pub async fn get_dataset_schema(
		&self,
		dataset_id: &str,
		workspace_id: Option<&str>,
	) -> Envelope {
		let info_path = dataset_path(workspace_id, dataset_id, "");
		let dataset_info = match self.gateway.execute(Method::GET, &info_path, None).await {
			Envelope::Success(info) => info,
			failure => return failure,
		};
		let tables_path = dataset_path(workspace_id, dataset_id, "/tables");

		self.gateway.execute(Method::GET, &tables_path, None).await.map(|tables| {
			json!({
				"dataset_info": dataset_info,
				"tables": value_list(tables),
				"dataset_id": dataset_id,
			})
		})
	}

	/// Runs a DAX query.
	pub async fn query_dataset(
		&self,
		dataset_id: &str,
		dax_query: &str,
		workspace_id: Option<&str>,
	) -> Envelope {
		let path = dataset_path(workspace_id, dataset_id, "/executeQueries");
		let body = dax::execute_queries_body(dax_query);

		self.gateway.execute(Method::POST, &path, Some(&body)).await.map(|result| {
			json!({ "query": dax_query, "result": result, "dataset_id": dataset_id })
		})
	}

	/// Starts a dataset refresh.
	pub async fn refresh_dataset(&self, dataset_id: &str, workspace_id: Option<&str>) -> Envelope {
		let path = dataset_path(workspace_id, dataset_id, "/refreshes");

		self.gateway.execute(Method::POST, &path, Some(&json!({}))).await.map(|_| {
			json!({ "message": "Dataset refresh initiated", "dataset_id": dataset_id })
		})
	}

	/// Lists the `top` most recent refreshes of a dataset.
	pub async fn get_refresh_history(
		&self,
		dataset_id: &str,
		workspace_id: Option<&str>,
		top: u32,
	) -> Envelope {
		let path = format!("{}?$top={top}", dataset_path(workspace_id, dataset_id, "/refreshes"));

		self.gateway.execute(Method::GET, &path, None).await.map(|body| {
			let history = value_list(body);
			let count = history.len();

			json!({ "refresh_history": history, "dataset_id": dataset_id, "count": count })
		})
	}

	/// Creates a report bound to `dataset_id` inside `workspace_id`.
	pub async fn create_report(
		&self,
		workspace_id: &str,
		dataset_id: &str,
		report_name: &str,
	) -> Envelope {
		let path = scoped(Some(workspace_id), "/reports");
		let body = json!({ "name": report_name, "datasetId": dataset_id });

		self.gateway.execute(Method::POST, &path, Some(&body)).await.map(|report| {
			let report_id = report.get("id").cloned().unwrap_or(Value::Null);

			json!({ "report": report, "report_id": report_id, "workspace_id": workspace_id })
		})
	}

	/// Lists reports of a workspace, or every accessible report.
	pub async fn get_reports(&self, workspace_id: Option<&str>) -> Envelope {
		let path = scoped(workspace_id, "/reports");

		self.gateway.execute(Method::GET, &path, None).await.map(|body| {
			let reports = value_list(body);
			let count = reports.len();

			json!({ "reports": reports, "workspace_id": workspace_id, "count": count })
		})
	}

	/// Counts rows, columns, and measures per table.
	///
	/// A table whose query fails is reported with an `error` entry; the tool itself only
	/// fails when the schema cannot be read.
	pub async fn analyze_data_quality(
		&self,
		dataset_id: &str,
		workspace_id: Option<&str>,
	) -> Envelope {
		let schema = match self.get_dataset_schema(dataset_id, workspace_id).await {
			Envelope::Success(schema) => schema,
			failure => return failure,
		};
		let tables = schema.get("tables").and_then(Value::as_array).cloned().unwrap_or_default();
		let mut analysis = Map::new();

		for table in &tables {
			let Some(name) = table.get("name").and_then(Value::as_str) else {
				continue;
			};
			let entry =
				match self.query_dataset(dataset_id, &dax::row_count_query(name), workspace_id).await
				{
					Envelope::Success(outcome) => match dax::row_count(&outcome["result"]) {
						Ok(count) => dax::table_summary(table, count),
						Err(_) => json!({ "error": "Query execution failed" }),
					},
					Envelope::Failure(_) => json!({ "error": "Could not analyze table" }),
				};

			analysis.insert(name.to_owned(), entry);
		}

		Envelope::success(json!({
			"dataset_id": dataset_id,
			"quality_analysis": analysis,
			"total_tables": tables.len(),
		}))
	}

	/// Exports up to `max_rows` rows of a table as CSV text.
	pub async fn export_data_to_csv(
		&self,
		dataset_id: &str,
		table_name: &str,
		workspace_id: Option<&str>,
		max_rows: u32,
	) -> Envelope {
		let query = dax::top_rows_query(table_name, max_rows);
		let outcome = match self.query_dataset(dataset_id, &query, workspace_id).await {
			Envelope::Success(outcome) => outcome,
			failure => return failure,
		};
		let rows = match dax::first_table_rows(&outcome["result"]) {
			Ok(rows) => rows,
			Err(e) => return e.into(),
		};

		if rows.is_empty() {
			return Envelope::success(json!({
				"csv_content": "",
				"row_count": 0,
				"message": "No data found in table",
			}));
		}

		let csv = dax::rows_to_csv(rows);

		Envelope::success(json!({
			"csv_content": csv.content,
			"row_count": csv.row_count,
			"column_count": csv.column_count,
			"table_name": table_name,
		}))
	}

	/// Adds a calculated column to a dataset table.
	pub async fn create_calculated_column(
		&self,
		dataset_id: &str,
		table_name: &str,
		column_name: &str,
		dax_expression: &str,
		workspace_id: Option<&str>,
	) -> Envelope {
		let path = table_path(workspace_id, dataset_id, table_name, "/columns");
		let body = json!({ "name": column_name, "dataType": "String", "expression": dax_expression });

		self.gateway.execute(Method::POST, &path, Some(&body)).await.map(|column| {
			json!({ "column": column, "table_name": table_name, "dataset_id": dataset_id })
		})
	}

	/// Adds a measure to a dataset table.
	pub async fn create_measure(
		&self,
		dataset_id: &str,
		table_name: &str,
		measure_name: &str,
		dax_expression: &str,
		workspace_id: Option<&str>,
	) -> Envelope {
		let path = table_path(workspace_id, dataset_id, table_name, "/measures");
		let body = json!({ "name": measure_name, "expression": dax_expression });

		self.gateway.execute(Method::POST, &path, Some(&body)).await.map(|measure| {
			json!({ "measure": measure, "table_name": table_name, "dataset_id": dataset_id })
		})
	}
}
impl<C, M> Clone for PowerBiTools<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn clone(&self) -> Self {
		Self { gateway: self.gateway.clone() }
	}
}
impl<C, M> Debug for PowerBiTools<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("PowerBiTools").field("gateway", &self.gateway).finish()
	}
}

fn value_list(body: Value) -> Vec<Value> {
	match body {
		Value::Object(mut object) => match object.remove("value") {
			Some(Value::Array(items)) => items,
			_ => Vec::new(),
		},
		_ => Vec::new(),
	}
}

fn scoped(workspace_id: Option<&str>, rest: &str) -> String {
	match workspace_id {
		Some(workspace_id) => format!("/groups/{}{rest}", segment(workspace_id)),
		None => rest.to_owned(),
	}
}

fn dataset_path(workspace_id: Option<&str>, dataset_id: &str, rest: &str) -> String {
	scoped(workspace_id, &format!("/datasets/{}{rest}", segment(dataset_id)))
}

fn table_path(workspace_id: Option<&str>, dataset_id: &str, table: &str, rest: &str) -> String {
	dataset_path(workspace_id, dataset_id, &format!("/tables/{}{rest}", segment(table)))
}

fn segment(raw: &str) -> String {
	urlencoding::encode(raw).into_owned()
}
