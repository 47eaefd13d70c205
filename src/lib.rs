//! Credential lifecycle and request orchestration for productivity-service tool servers - OAuth
//! Authorization Code + PKCE flows, single-flight token refresh, per-service rate limiting,
//! classified retries, and batch coalescing behind one tool invocation surface.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod batch;
pub mod broker;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod flows;
pub mod http;
pub mod oauth;
pub mod obs;
pub mod provider;
pub mod ratelimit;
pub mod registry;
pub mod server;
pub mod service;
pub mod store;

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		hash::Hash,
		pin::Pin,
		str::FromStr,
		sync::Arc,
		time::Duration as StdDuration,
	};

	pub use parking_lot::{Mutex, RwLock};
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
