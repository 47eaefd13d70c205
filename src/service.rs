//! Closed catalog of upstream services and their capability profiles.

pub mod scopes;

// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, ScopeValidationError},
	error::ConfigError,
};

/// Upstream productivity service reached by tools.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
	/// Calendar events and calendars.
	Calendar,
	/// Files and folders.
	Drive,
	/// Mail messages, threads, and labels.
	Gmail,
	/// Task lists and tasks.
	Tasks,
	/// People and contact groups.
	Contacts,
}
impl Service {
	/// Every supported service, in declaration order.
	pub const ALL: [Service; 5] =
		[Service::Calendar, Service::Drive, Service::Gmail, Service::Tasks, Service::Contacts];

	/// Stable snake-case label used in configuration, logs, and metric labels.
	pub const fn as_str(self) -> &'static str {
		match self {
			Service::Calendar => "calendar",
			Service::Drive => "drive",
			Service::Gmail => "gmail",
			Service::Tasks => "tasks",
			Service::Contacts => "contacts",
		}
	}

	/// Whether the service accepts multi-item batch submissions.
	pub const fn batch_capable(self) -> bool {
		self.item_limit().is_some()
	}

	/// Maximum number of items one batch submission may carry.
	pub const fn item_limit(self) -> Option<usize> {
		match self {
			Service::Gmail | Service::Calendar => Some(50),
			Service::Drive => Some(100),
			Service::Contacts => Some(200),
			Service::Tasks => None,
		}
	}

	/// Default token bucket for the service.
	pub const fn default_quota(self) -> ServiceQuota {
		match self {
			Service::Gmail => ServiceQuota::new(50, 25),
			Service::Calendar => ServiceQuota::new(10, 100),
			Service::Drive => ServiceQuota::new(20, 50),
			Service::Tasks => ServiceQuota::new(10, 125),
			Service::Contacts => ServiceQuota::new(10, 700),
		}
	}

	/// Scopes tools of this service may request.
	pub const fn scopes(self) -> &'static [&'static str] {
		match self {
			Service::Calendar => scopes::CALENDAR,
			Service::Drive => scopes::DRIVE,
			Service::Gmail => scopes::GMAIL,
			Service::Tasks => scopes::TASKS,
			Service::Contacts => scopes::CONTACTS,
		}
	}
}
impl Display for Service {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
impl FromStr for Service {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Service::ALL
			.into_iter()
			.find(|service| service.as_str().eq_ignore_ascii_case(s.trim()))
			.ok_or_else(|| ConfigError::UnknownService { name: s.to_owned() })
	}
}

/// Token bucket parameters: `capacity` tokens, one token regained every `refill_interval_ms`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceQuota {
	/// Burst size.
	pub capacity: u32,
	/// Milliseconds needed to regain one token.
	pub refill_interval_ms: u64,
}
impl ServiceQuota {
	/// Creates a quota from its two parameters.
	pub const fn new(capacity: u32, refill_interval_ms: u64) -> Self {
		Self { capacity, refill_interval_ms }
	}

	/// Refill interval as a [`StdDuration`].
	pub const fn refill_interval(self) -> StdDuration {
		StdDuration::from_millis(self.refill_interval_ms)
	}
}

/// Base identity scopes unioned with the scopes of every service in `services`.
pub fn scopes_for_services<'a, I>(services: I) -> Result<ScopeSet, ScopeValidationError>
where
	I: IntoIterator<Item = &'a Service>,
{
	let selected = services.into_iter().flat_map(|service| service.scopes().iter().copied());

	ScopeSet::new(scopes::BASE.iter().copied().chain(selected))
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn names_round_trip_case_insensitively() {
		for service in Service::ALL {
			assert_eq!(service.as_str().parse::<Service>().ok(), Some(service));
		}

		assert_eq!("Gmail".parse::<Service>().ok(), Some(Service::Gmail));
		assert!(matches!("sheets".parse::<Service>(), Err(ConfigError::UnknownService { .. })));
	}

	#[test]
	fn only_tasks_lacks_batch_support() {
		let unbatched =
			Service::ALL.into_iter().filter(|service| !service.batch_capable()).collect::<Vec<_>>();

		assert_eq!(unbatched, [Service::Tasks]);
		assert_eq!(Service::Contacts.item_limit(), Some(200));
	}

	#[test]
	fn service_scopes_always_include_base_scopes() {
		let scope = scopes_for_services(&[Service::Tasks]).expect("Catalog scopes should be valid.");

		for base in scopes::BASE {
			assert!(scope.contains(base));
		}

		assert!(scope.contains(scopes::TASKS_READONLY));
		assert!(!scope.contains(scopes::GMAIL_SEND));

		let everything =
			scopes_for_services(&Service::ALL).expect("Catalog scopes should be valid.");

		assert_eq!(everything.len(), 3 + 3 + 3 + 5 + 2 + 2);
	}
}
