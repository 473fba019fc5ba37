//! The device table: applies discovery events, answers name lookups for the
//! REPL/VFS, and runs the periodic expiry sweep.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use tokio_util::sync::CancellationToken;

use crate::{config::Config, device::Device, device_description::Udn};

struct Entry {
    device: Arc<Device>,
    expires_at: Instant,
}

/// Holds every device currently believed alive. All mutation goes through a
/// single mutex; once a caller has cloned out an `Arc<Device>` it can read
/// that device's services without taking the registry lock again.
pub struct Registry {
    client: reqwest::Client,
    config: Config,
    devices: Mutex<HashMap<Udn, Entry>>,
}

impl Registry {
    pub fn new(client: reqwest::Client, config: Config) -> Self {
        Self {
            client,
            config,
            devices: Mutex::new(HashMap::new()),
        }
    }

    /// A device advertised itself (`ssdp:alive`) or answered an M-SEARCH. If
    /// its UDN is already known, only the expiry deadline is refreshed; the
    /// description document is not re-fetched. Otherwise the description is
    /// downloaded and the device is added.
    pub async fn alive(&self, udn: Udn, desc_url: String, max_age: Duration) {
        if self.refresh_if_known(&udn, max_age) {
            return;
        }
        match Device::fetch(&desc_url, &self.client, &self.config).await {
            Ok(device) => {
                let mut devices = self.devices.lock().unwrap();
                tracing::info!(%udn, friendly_name = %device.friendly_name, "device alive");
                devices.insert(
                    udn,
                    Entry {
                        device: Arc::new(device),
                        expires_at: Instant::now() + max_age,
                    },
                );
            }
            Err(err) => {
                tracing::warn!(%udn, desc_url, error = %err, "failed to fetch device description");
            }
        }
    }

    /// Same handling as `alive`: a search response is just an alive
    /// announcement addressed to a single control point.
    pub async fn search_response(&self, udn: Udn, desc_url: String, max_age: Duration) {
        self.alive(udn, desc_url, max_age).await;
    }

    pub fn byebye(&self, udn: &Udn) {
        let removed = self.devices.lock().unwrap().remove(udn);
        if removed.is_some() {
            tracing::info!(%udn, "device byebye");
        }
    }

    fn refresh_if_known(&self, udn: &Udn, max_age: Duration) -> bool {
        let mut devices = self.devices.lock().unwrap();
        if let Some(entry) = devices.get_mut(udn) {
            entry.expires_at = Instant::now() + max_age;
            true
        } else {
            false
        }
    }

    /// Drops every device whose advertised lifetime has passed.
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        let mut devices = self.devices.lock().unwrap();
        devices.retain(|udn, entry| {
            let keep = entry.expires_at > now;
            if !keep {
                tracing::info!(%udn, "device expired");
            }
            keep
        });
    }

    /// Runs `sweep_expired` on a fixed interval until cancelled.
    pub async fn run_expiry_sweep(self: Arc<Self>, interval: Duration, cancellation: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep_expired(),
                _ = cancellation.cancelled() => return,
            }
        }
    }

    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.devices
            .lock()
            .unwrap()
            .values()
            .map(|entry| entry.device.clone())
            .collect()
    }

    /// Resolves `name` against UDN, then exact `friendlyName`, then
    /// `friendlyName` prefix, all case-insensitive; ambiguous matches are
    /// logged and rejected rather than guessed at.
    pub fn find_by_name(&self, name: &str) -> Option<Arc<Device>> {
        let devices = self.devices.lock().unwrap();

        if let Ok(udn) = name.parse::<Udn>() {
            if let Some(entry) = devices.get(&udn) {
                return Some(entry.device.clone());
            }
        }

        let exact: Vec<_> = devices
            .values()
            .filter(|e| e.device.friendly_name.eq_ignore_ascii_case(name))
            .collect();
        match exact.len() {
            1 => return Some(exact[0].device.clone()),
            0 => {}
            _ => {
                tracing::error!(name, "ambiguous device name: multiple exact friendlyName matches");
                return None;
            }
        }

        let needle = name.to_ascii_lowercase();
        let prefix: Vec<_> = devices
            .values()
            .filter(|e| e.device.friendly_name.to_ascii_lowercase().starts_with(&needle))
            .collect();
        match prefix.len() {
            0 => None,
            1 => Some(prefix[0].device.clone()),
            _ => {
                tracing::error!(name, "ambiguous device name: multiple friendlyName prefix matches");
                None
            }
        }
    }
}

#[cfg(test)]
impl Registry {
    /// Inserts a fully-formed device directly, bypassing description
    /// download, for use by other modules' tests.
    pub(crate) fn insert_for_test(&self, device: Device) {
        let udn = device.udn.clone();
        self.devices.lock().unwrap().insert(
            udn,
            Entry {
                device: Arc::new(device),
                expires_at: Instant::now() + Duration::from_secs(1800),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        Registry::new(reqwest::Client::new(), Config::default())
    }

    fn insert(registry: &Registry, udn: &str, friendly_name: &str) {
        let device = Device {
            udn: udn.parse().unwrap(),
            device_type: "urn:schemas-upnp-org:device:MediaServer:1".to_owned(),
            friendly_name: friendly_name.to_owned(),
            desc_url: "http://example.invalid/desc.xml".to_owned(),
            presentation_url: None,
            created_at: Instant::now(),
            services: Vec::new(),
        };
        registry.devices.lock().unwrap().insert(
            device.udn.clone(),
            Entry {
                device: Arc::new(device),
                expires_at: Instant::now() + Duration::from_secs(1800),
            },
        );
    }

    #[test]
    fn finds_by_exact_and_prefix_friendly_name() {
        let registry = registry();
        insert(&registry, "uuid:dev1", "Living Room Server");
        insert(&registry, "uuid:dev2", "Bedroom Server");

        assert_eq!(
            registry.find_by_name("uuid:dev1").unwrap().udn.as_str(),
            "uuid:dev1"
        );
        assert_eq!(
            registry.find_by_name("living room server").unwrap().udn.as_str(),
            "uuid:dev1"
        );
        assert_eq!(
            registry.find_by_name("bed").unwrap().udn.as_str(),
            "uuid:dev2"
        );
        assert!(registry.find_by_name("server").is_none());
        assert!(registry.find_by_name("nope").is_none());
    }

    #[test]
    fn byebye_removes_device() {
        let registry = registry();
        insert(&registry, "uuid:dev1", "Living Room Server");
        let udn: Udn = "uuid:dev1".parse().unwrap();
        registry.byebye(&udn);
        assert!(registry.find_by_name("uuid:dev1").is_none());
    }
}
