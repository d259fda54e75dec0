//! Uniform result shape returned by every gateway call and tool.
//!
//! Internally an [`Envelope`] is a two-variant enum, so "success with an error" cannot be
//! represented. On the wire it becomes `{"success": bool, "data"?: value, "error"?: string}`.

// crates.io
use serde::{
	de::{Deserializer, Error as DeError},
	ser::{SerializeStruct, Serializer},
};
use serde_json::Value;
// self
use crate::_prelude::*;

/// Outcome of one gateway call or tool.
#[derive(Clone, Debug, PartialEq)]
pub enum Envelope {
	/// Call succeeded; carries the parsed response body.
	Success(Value),
	/// Call failed; carries a human-readable reason.
	Failure(String),
}
impl Envelope {
	/// Wraps a successful payload.
	pub fn success(data: impl Into<Value>) -> Self {
		Self::Success(data.into())
	}

	/// Wraps a failure reason.
	pub fn failure(error: impl Into<String>) -> Self {
		Self::Failure(error.into())
	}

	/// Returns `true` for [`Envelope::Success`].
	pub fn is_success(&self) -> bool {
		matches!(self, Self::Success(_))
	}

	/// Payload of a successful call.
	pub fn data(&self) -> Option<&Value> {
		match self {
			Self::Success(data) => Some(data),
			Self::Failure(_) => None,
		}
	}

	/// Reason of a failed call.
	pub fn error(&self) -> Option<&str> {
		match self {
			Self::Success(_) => None,
			Self::Failure(error) => Some(error),
		}
	}

	/// Converts into a plain `Result`.
	pub fn into_result(self) -> std::result::Result<Value, String> {
		match self {
			Self::Success(data) => Ok(data),
			Self::Failure(error) => Err(error),
		}
	}

	/// Applies `f` to a successful payload; failures pass through untouched.
	pub fn map(self, f: impl FnOnce(Value) -> Value) -> Self {
		match self {
			Self::Success(data) => Self::Success(f(data)),
			failure => failure,
		}
	}
}
impl From<Error> for Envelope {
	fn from(e: Error) -> Self {
		Self::Failure(e.to_string())
	}
}
impl<E> From<std::result::Result<Value, E>> for Envelope
where
	E: Into<Error>,
{
	fn from(result: std::result::Result<Value, E>) -> Self {
		match result {
			Ok(data) => Self::Success(data),
			Err(e) => Self::from(e.into()),
		}
	}
}
impl Serialize for Envelope {
	fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		let mut state = serializer.serialize_struct("Envelope", 2)?;

		match self {
			Self::Success(data) => {
				state.serialize_field("success", &true)?;
				state.serialize_field("data", data)?;
			},
			Self::Failure(error) => {
				state.serialize_field("success", &false)?;
				state.serialize_field("error", error)?;
			},
		}

		state.end()
	}
}
impl<'de> Deserialize<'de> for Envelope {
	fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		#[derive(Deserialize)]
		struct Wire {
			success: bool,
			#[serde(default)]
			data: Option<Value>,
			#[serde(default)]
			error: Option<String>,
		}

		let wire = Wire::deserialize(deserializer)?;

		match (wire.success, wire.data, wire.error) {
			(true, data, None) => Ok(Self::Success(data.unwrap_or(Value::Null))),
			(false, None, Some(error)) => Ok(Self::Failure(error)),
			(true, _, Some(_)) => Err(D::Error::custom("successful envelope carries an error")),
			(false, Some(_), _) => Err(D::Error::custom("failed envelope carries data")),
			(false, None, None) => Err(D::Error::custom("failed envelope lacks an error")),
		}
	}
}
