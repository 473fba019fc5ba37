//! Services owned by a [`Device`](crate::device::Device).
//!
//! The original emulates a class hierarchy through a hand-copied vtable
//! (`OBJECT_CLASS_PTR`): a generic `Service` "superclass" and a
//! `ContentDir` "subclass" that overrides `get_status_string` and carries
//! extra cache fields. Since the two kinds are closed and known ahead of
//! time, that is expressed here as an enum over a shared core rather than a
//! trait object, the same way this crate already prefers an enum for
//! `BrowseFlag`/`NotificationType`.

use crate::{
    content_directory::ContentDirectoryClient,
    soap::{self, ActionError, ActionResponse},
    urn::URN,
};

/// Fields every service has regardless of type: identity, the two URLs a
/// control point needs (control, event subscription), and the HTTP client
/// used to invoke actions against it.
#[derive(Debug, Clone)]
pub struct ServiceCore {
    pub service_id: String,
    pub service_type: URN,
    pub control_url: String,
    pub event_url: String,
    pub(crate) client: reqwest::Client,
}

impl ServiceCore {
    /// Invokes `action_name` with `args` against this service's control URL,
    /// returning either the parsed response or a decoded UPnP fault.
    pub async fn send_action(
        &self,
        action_name: &str,
        args: &[(&str, &str)],
        max_content_length: usize,
    ) -> anyhow::Result<Result<ActionResponse, ActionError>> {
        let mut action = soap::WritableAction::new(action_name, &self.service_type)?;
        for (name, value) in args {
            action.write_argument(name, value)?;
        }
        let body = action.finish()?;
        soap::invoke(
            &self.client,
            &self.control_url,
            &self.service_type,
            action_name,
            body,
            max_content_length,
        )
        .await
    }

    pub(crate) fn status_for_tree(&self, indent: &str, kind: &str) -> String {
        format!(
            "{indent}service {kind} ({id})\n{indent}  control: {control}\n{indent}  event:   {event}\n",
            id = self.service_id,
            control = self.control_url,
            event = self.event_url,
        )
    }
}

/// Any service that is not ContentDirectory: held so `Device::services` has
/// somewhere to put e.g. ConnectionManager, without fetching and parsing
/// anything beyond its description entry.
#[derive(Debug, Clone)]
pub struct GenericService {
    pub core: ServiceCore,
}

#[derive(Debug, Clone)]
pub enum ServiceKind {
    Generic(GenericService),
    ContentDirectory(ContentDirectoryClient),
}

impl ServiceKind {
    pub fn core(&self) -> &ServiceCore {
        match self {
            ServiceKind::Generic(s) => &s.core,
            ServiceKind::ContentDirectory(s) => &s.core,
        }
    }

    pub fn service_id(&self) -> &str {
        &self.core().service_id
    }

    pub fn service_type(&self) -> &URN {
        &self.core().service_type
    }

    pub fn control_url(&self) -> &str {
        &self.core().control_url
    }

    pub fn event_url(&self) -> &str {
        &self.core().event_url
    }

    pub fn as_content_directory(&self) -> Option<&ContentDirectoryClient> {
        match self {
            ServiceKind::ContentDirectory(cd) => Some(cd),
            ServiceKind::Generic(_) => None,
        }
    }

    /// Renders this service's block of the device status tree. ContentDirectory
    /// appends its cache counters after the common fields.
    pub fn status_string(&self, indent: &str) -> String {
        match self {
            ServiceKind::Generic(s) => s.core.status_for_tree(indent, &s.core.service_type.to_string()),
            ServiceKind::ContentDirectory(cd) => cd.status_string(indent),
        }
    }
}
