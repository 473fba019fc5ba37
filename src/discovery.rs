//! Client-side SSDP: sends the `ssdp:all` M-SEARCH request and listens for
//! NOTIFY alive/byebye/update multicast traffic, translating both into
//! [`Registry`] events.
//!
//! Grounded in `search_client.rs`'s `SearchClient` (unicast socket, send then
//! collect responses for a bounded window) for the active half, and `ssdp.rs`'s
//! `SsdpListener` for the passive half -- minus the self-announcing machinery
//! neither half needs for a control point.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::{
    registry::Registry,
    ssdp::{self, BroadcastMessage, NotificationType, SearchMessage, SSDP_ADDR},
};

pub struct Discovery {
    registry: Arc<Registry>,
}

impl Discovery {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Sends one `ssdp:all` M-SEARCH and feeds every `200 OK` reply received
    /// within `timeout` into the registry as a `search_response`. Returns
    /// once the window elapses; malformed replies are logged and skipped.
    pub async fn search(&self, timeout: Duration) -> anyhow::Result<()> {
        let socket =
            UdpSocket::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)).await?;
        let message = SearchMessage {
            host: SSDP_ADDR,
            st: NotificationType::All,
            mx: Some(timeout.as_secs().max(1) as usize),
            user_agent: None,
            tcp_port: None,
            cp_fn: None,
            cp_uuid: None,
        };
        socket
            .send_to(message.to_string().as_bytes(), SSDP_ADDR)
            .await?;

        let mut buf = [0u8; 4096];
        let _ = tokio::time::timeout(timeout, async {
            loop {
                let Ok(read) = socket.recv(&mut buf).await else {
                    return;
                };
                let Ok(text) = std::str::from_utf8(&buf[..read]) else {
                    continue;
                };
                match ssdp::parse_search_response(text) {
                    Ok(announce) => {
                        let max_age = Duration::from_secs(announce.cache_control as u64);
                        self.registry
                            .search_response(announce.usn.udn, announce.location, max_age)
                            .await;
                    }
                    Err(err) => {
                        tracing::debug!(error = %err, "failed to parse search response");
                    }
                }
            }
        })
        .await;

        Ok(())
    }

    /// Joins the SSDP multicast group and applies every NOTIFY alive/byebye
    /// it sees to the registry until `cancellation` fires. Incoming M-SEARCH
    /// requests from other control points share the socket and are silently
    /// ignored; `ssdp:update` is logged but otherwise dropped -- this crate
    /// does not track boot/config ids across restarts.
    pub async fn listen(&self, cancellation: CancellationToken) -> anyhow::Result<()> {
        let socket = ssdp::bind_ssdp_socket(None)?;
        let mut buf = [0u8; 4096];
        loop {
            tokio::select! {
                received = socket.recv(&mut buf) => {
                    let read = match received {
                        Ok(read) => read,
                        Err(err) => {
                            tracing::warn!(error = %err, "ssdp socket read failed");
                            continue;
                        }
                    };
                    let Ok(text) = std::str::from_utf8(&buf[..read]) else { continue };
                    self.apply(text).await;
                }
                _ = cancellation.cancelled() => return Ok(()),
            }
        }
    }

    async fn apply(&self, payload: &str) {
        match BroadcastMessage::parse_ssdp_payload(payload) {
            Ok(BroadcastMessage::NotifyAlive(notify)) => {
                let max_age = Duration::from_secs(notify.cache_control as u64);
                self.registry
                    .alive(notify.usn.udn, notify.location.into_owned(), max_age)
                    .await;
            }
            Ok(BroadcastMessage::NotifyByeBye(bye)) => {
                self.registry.byebye(&bye.usn.udn);
            }
            Ok(BroadcastMessage::NotifyUpdate(update)) => {
                tracing::debug!(usn = update.usn, "ssdp:update received, ignoring");
            }
            Ok(BroadcastMessage::Search(_)) => {
                // Another control point's M-SEARCH sharing the multicast group; not ours to answer.
            }
            Err(err) => {
                tracing::trace!(error = %err, "unparsable ssdp payload");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn applies_notify_alive_and_byebye() {
        let registry = Arc::new(Registry::new(reqwest::Client::new(), Config::default()));
        let discovery = Discovery::new(registry.clone());

        let alive = "NOTIFY * HTTP/1.1\r\nHOST: 239.255.255.250:1900\r\nCACHE-CONTROL: max-age=1800\r\nLOCATION: http://192.168.1.10:8200/desc.xml\r\nNT: upnp:rootdevice\r\nNTS: ssdp:alive\r\nSERVER: test/1.0\r\nUSN: uuid:4d696e69-444c-4e41-9d41-000102030405::upnp:rootdevice\r\n\r\n";
        discovery.apply(alive).await;
        // fetch will fail against an invalid host, so no device is inserted,
        // but parsing and dispatch must not panic.
        assert!(registry.find_by_name("uuid:4d696e69-444c-4e41-9d41-000102030405").is_none());

        let byebye = "NOTIFY * HTTP/1.1\r\nHOST: 239.255.255.250:1900\r\nNT: upnp:rootdevice\r\nNTS: ssdp:byebye\r\nUSN: uuid:4d696e69-444c-4e41-9d41-000102030405::upnp:rootdevice\r\n\r\n";
        discovery.apply(byebye).await;
    }
}
