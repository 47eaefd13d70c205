//! Shared helpers for flow implementations.

// self
use crate::auth::ScopeSet;

/// Joins normalized scopes with the provider's delimiter when building requests.
pub(crate) fn format_scope(scope: &ScopeSet, delimiter: char) -> Option<String> {
	if scope.is_empty() {
		return None;
	}
	if delimiter == ' ' {
		return Some(scope.normalized());
	}

	let mut buf = String::new();

	for (idx, value) in scope.iter().enumerate() {
		if idx > 0 {
			buf.push(delimiter);
		}

		buf.push_str(value);
	}

	Some(buf)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn scope_formatting_handles_custom_delimiters() {
		let scope = ScopeSet::new(["openid", "email"]).expect("Failed to build test scope.");

		assert_eq!(format_scope(&scope, ' '), Some("email openid".into()));
		assert_eq!(format_scope(&scope, ','), Some("email,openid".into()));
		assert_eq!(format_scope(&ScopeSet::default(), ' '), None);
	}
}
