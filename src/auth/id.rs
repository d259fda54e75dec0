//! Validated identifiers for the Azure AD tenant and the registered application.

// std
use std::ops::Deref;
// self
use crate::_prelude::*;

macro_rules! def_id {
	($name:ident, $doc:literal, $kind:literal) => {
		#[doc = $doc]
		#[derive(Clone, PartialEq, Eq, Hash)]
		pub struct $name(String);
		impl $name {
			/// Creates a new identifier after validation.
			pub fn new(value: impl AsRef<str>) -> Result<Self, IdentifierError> {
				let view = value.as_ref();

				validate_view($kind, view)?;

				Ok(Self(view.to_owned()))
			}
		}
		impl Deref for $name {
			type Target = str;

			fn deref(&self) -> &Self::Target {
				&self.0
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				write!(f, concat!($kind, "({})"), self.0)
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
		impl FromStr for $name {
			type Err = IdentifierError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Self::new(s)
			}
		}
	};
}

const IDENTIFIER_MAX_LEN: usize = 128;
// The tenant is interpolated into the token endpoint path.
const RESERVED: &[char] = &['/', '?', '#', '%', '\\'];

/// Error returned when identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum IdentifierError {
	/// The identifier was empty.
	#[error("{kind} identifier cannot be empty.")]
	Empty {
		/// Kind of identifier (tenant, client).
		kind: &'static str,
	},
	/// The identifier contains whitespace characters.
	#[error("{kind} identifier contains whitespace.")]
	ContainsWhitespace {
		/// Kind of identifier (tenant, client).
		kind: &'static str,
	},
	/// The identifier contains a character that would alter the endpoint URL.
	#[error("{kind} identifier contains the reserved character `{found}`.")]
	ReservedCharacter {
		/// Kind of identifier (tenant, client).
		kind: &'static str,
		/// First offending character.
		found: char,
	},
	/// The identifier exceeded the allowed character count.
	#[error("{kind} identifier exceeds {max} characters.")]
	TooLong {
		/// Kind of identifier (tenant, client).
		kind: &'static str,
		/// Maximum permitted character count.
		max: usize,
	},
}

def_id! { TenantId, "Azure AD tenant (directory) identifier, either a GUID or a verified domain.", "Tenant" }
def_id! { ClientId, "Application (client) identifier registered in the tenant.", "Client" }

fn validate_view(kind: &'static str, view: &str) -> Result<(), IdentifierError> {
	if view.is_empty() {
		return Err(IdentifierError::Empty { kind });
	}
	if view.chars().any(char::is_whitespace) {
		return Err(IdentifierError::ContainsWhitespace { kind });
	}
	if let Some(found) = view.chars().find(|ch| RESERVED.contains(ch)) {
		return Err(IdentifierError::ReservedCharacter { kind, found });
	}
	if view.len() > IDENTIFIER_MAX_LEN {
		return Err(IdentifierError::TooLong { kind, max: IDENTIFIER_MAX_LEN });
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn identifiers_reject_whitespace_and_empty_values() {
		assert!(TenantId::new(" contoso.onmicrosoft.com").is_err());
		assert!(TenantId::new("contoso.onmicrosoft.com ").is_err());
		assert_eq!(ClientId::new(""), Err(IdentifierError::Empty { kind: "Client" }));

		let tenant = TenantId::new("72f988bf-86f1-41af-91ab-2d7cd011db47")
			.expect("GUID tenant fixture should be considered valid.");

		assert_eq!(tenant.as_ref(), "72f988bf-86f1-41af-91ab-2d7cd011db47");
		assert_eq!(format!("{tenant:?}"), "Tenant(72f988bf-86f1-41af-91ab-2d7cd011db47)");
	}

	#[test]
	fn tenant_cannot_escape_the_token_path() {
		assert_eq!(
			TenantId::new("common/../evil"),
			Err(IdentifierError::ReservedCharacter { kind: "Tenant", found: '/' })
		);
		assert!(TenantId::new("tenant?x=1").is_err());
		assert!(TenantId::new("contoso.onmicrosoft.com").is_ok());
	}

	#[test]
	fn unicode_whitespace_and_length_limits() {
		let nbsp = format!("client{}id", '\u{00A0}');

		assert!(ClientId::new(&nbsp).is_err());

		let exact = "a".repeat(IDENTIFIER_MAX_LEN);

		ClientId::new(&exact).expect("Exact length should succeed.");

		let too_long = "a".repeat(IDENTIFIER_MAX_LEN + 1);

		assert!(matches!(ClientId::new(&too_long), Err(IdentifierError::TooLong { .. })));
	}
}
