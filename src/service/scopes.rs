//! Google OAuth scope catalog.

/// Account email address.
pub const USERINFO_EMAIL: &str = "https://www.googleapis.com/auth/userinfo.email";
/// Basic profile information.
pub const USERINFO_PROFILE: &str = "https://www.googleapis.com/auth/userinfo.profile";
/// OpenID Connect sign-in.
pub const OPENID: &str = "openid";

/// Full calendar access.
pub const CALENDAR_FULL: &str = "https://www.googleapis.com/auth/calendar";
/// Read-only calendar access.
pub const CALENDAR_READONLY: &str = "https://www.googleapis.com/auth/calendar.readonly";
/// Event read/write access.
pub const CALENDAR_EVENTS: &str = "https://www.googleapis.com/auth/calendar.events";

/// Full drive access.
pub const DRIVE_FULL: &str = "https://www.googleapis.com/auth/drive";
/// Read-only drive access.
pub const DRIVE_READONLY: &str = "https://www.googleapis.com/auth/drive.readonly";
/// Access to files created or opened by the app.
pub const DRIVE_FILE: &str = "https://www.googleapis.com/auth/drive.file";

/// Read-only mail access.
pub const GMAIL_READONLY: &str = "https://www.googleapis.com/auth/gmail.readonly";
/// Send mail.
pub const GMAIL_SEND: &str = "https://www.googleapis.com/auth/gmail.send";
/// Manage drafts and send.
pub const GMAIL_COMPOSE: &str = "https://www.googleapis.com/auth/gmail.compose";
/// Read, compose, and modify without deleting.
pub const GMAIL_MODIFY: &str = "https://www.googleapis.com/auth/gmail.modify";
/// Manage labels.
pub const GMAIL_LABELS: &str = "https://www.googleapis.com/auth/gmail.labels";

/// Full tasks access.
pub const TASKS_FULL: &str = "https://www.googleapis.com/auth/tasks";
/// Read-only tasks access.
pub const TASKS_READONLY: &str = "https://www.googleapis.com/auth/tasks.readonly";

/// Full contacts access.
pub const CONTACTS_FULL: &str = "https://www.googleapis.com/auth/contacts";
/// Read-only contacts access.
pub const CONTACTS_READONLY: &str = "https://www.googleapis.com/auth/contacts.readonly";

/// Scopes every identity is asked for.
pub const BASE: &[&str] = &[USERINFO_EMAIL, USERINFO_PROFILE, OPENID];
/// Calendar scopes.
pub const CALENDAR: &[&str] = &[CALENDAR_FULL, CALENDAR_READONLY, CALENDAR_EVENTS];
/// Drive scopes.
pub const DRIVE: &[&str] = &[DRIVE_FULL, DRIVE_READONLY, DRIVE_FILE];
/// Gmail scopes.
pub const GMAIL: &[&str] =
	&[GMAIL_READONLY, GMAIL_SEND, GMAIL_COMPOSE, GMAIL_MODIFY, GMAIL_LABELS];
/// Tasks scopes.
pub const TASKS: &[&str] = &[TASKS_FULL, TASKS_READONLY];
/// Contacts scopes.
pub const CONTACTS: &[&str] = &[CONTACTS_FULL, CONTACTS_READONLY];
