use std::{borrow::Cow, fmt::Display, str::FromStr};

use anyhow::Context;
use quick_xml::events::Event;
use serde::Deserialize;

use crate::{FromXml, XmlReaderExt};

/// Parsed `<root>` of a UPnP device description document, as downloaded from a
/// device's `descURL`. Only read from the network; this crate never serves one.
#[derive(Debug)]
pub struct DeviceDescription<'a> {
    pub config_id: Option<String>,
    pub spec_version: SpecVersion,
    pub device: Device<'a>,
    pub url_base: Option<Cow<'a, str>>,
}

#[derive(Debug, Clone, Copy)]
pub struct SpecVersion {
    pub major: u32,
    pub minor: u32,
}

impl SpecVersion {
    fn read_xml<'a>(r: &mut quick_xml::Reader<&'a [u8]>) -> anyhow::Result<Self> {
        let start = r.read_to_start()?;
        anyhow::ensure!(start.local_name().as_ref() == b"specVersion");
        let mut major = None;
        let mut minor = None;
        loop {
            let event = r.read_event_err_eof()?;
            match event {
                Event::Start(s) => {
                    let name = s.name();
                    match s.local_name().as_ref() {
                        b"major" => major = Some(r.read_text(name)?.parse()?),
                        b"minor" => minor = Some(r.read_text(name)?.parse()?),
                        _ => {
                            r.read_to_end(name)?;
                        }
                    }
                }
                Event::End(end) => {
                    anyhow::ensure!(end.local_name().as_ref() == b"specVersion");
                    break;
                }
                _ => {}
            }
        }
        Ok(Self {
            major: major.context("spec version major")?,
            minor: minor.context("spec version minor")?,
        })
    }
}

impl<'a> FromXml<'a> for DeviceDescription<'a> {
    fn read_xml(r: &mut quick_xml::Reader<&'a [u8]>) -> anyhow::Result<Self> {
        let root = r.read_to_start()?;
        anyhow::ensure!(root.local_name().as_ref() == b"root");

        let config_id = root
            .attributes()
            .flatten()
            .find_map(|attr| {
                (attr.key.local_name().as_ref() == b"configId")
                    .then(|| attr.unescape_value().map(|v| v.to_string()))
            })
            .transpose()
            .context("unescape config id")?;

        let root = root.to_owned();

        let spec_version = SpecVersion::read_xml(r)?;

        let mut url_base = None;
        let mut device = None;

        loop {
            let event = r.read_event_err_eof()?;
            match event {
                Event::Start(start) => {
                    let name = start.name();
                    match start.local_name().as_ref() {
                        b"URLBase" => {
                            url_base = Some(r.read_text(name)?);
                        }
                        b"device" => {
                            device = Some(Device::read_xml(r)?);
                        }
                        _ => {
                            r.read_to_end(name)?;
                        }
                    }
                }
                Event::End(end) if end == root.to_end() => break,
                _ => {}
            }
        }

        Ok(Self {
            config_id,
            spec_version,
            device: device.context("device element")?,
            url_base,
        })
    }
}

#[derive(Debug)]
pub struct Device<'a> {
    pub device_type: Cow<'a, str>,
    pub friendly_name: Cow<'a, str>,
    /// Manufacturer name. Should be < 64 characters.
    pub manufacturer: Cow<'a, str>,
    pub manufacturer_url: Option<Cow<'a, str>>,
    /// Should be < 128 characters
    pub model_description: Option<Cow<'a, str>>,
    pub model_name: Cow<'a, str>,
    pub model_number: Option<Cow<'a, str>>,
    pub model_url: Option<Cow<'a, str>>,
    pub serial_number: Option<Cow<'a, str>>,
    pub udn: Udn,
    pub icon_list: Vec<Icon<'a>>,
    /// Only the root device's own service list: embedded devices in `deviceList`
    /// are parsed (so lookups don't fail on unexpected elements) but not flattened
    /// into this device's services.
    pub service_list: Vec<Service<'a>>,
    pub device_list: Vec<Device<'a>>,
    pub presentation_url: Option<Cow<'a, str>>,
}

impl<'a> FromXml<'a> for Device<'a> {
    fn read_xml(r: &mut quick_xml::Reader<&'a [u8]>) -> anyhow::Result<Self> {
        let mut device_type = None;
        let mut friendly_name = None;
        let mut manufacturer = None;
        let mut manufacturer_url = None;
        let mut model_description = None;
        let mut model_name = None;
        let mut model_number = None;
        let mut model_url = None;
        let mut serial_number = None;
        let mut udn = None;
        let mut icon_list = Vec::new();
        let mut service_list = Vec::new();
        let mut device_list = Vec::new();
        let mut presentation_url = None;

        while let Ok(event) = r.read_event_err_eof() {
            match event {
                Event::Start(start) => {
                    let start = start.to_owned();
                    let end_name = start.name();
                    match start.local_name().as_ref() {
                        b"deviceType" => {
                            device_type = Some(r.read_text(end_name)?);
                        }
                        b"friendlyName" => {
                            friendly_name = Some(r.read_text(end_name)?);
                        }
                        b"manufacturer" => {
                            manufacturer = Some(r.read_text(end_name)?);
                        }
                        b"manufacturerURL" => {
                            manufacturer_url = Some(r.read_text(end_name)?);
                        }
                        b"modelDescription" => {
                            model_description = Some(r.read_text(end_name)?);
                        }
                        b"modelName" => {
                            model_name = Some(r.read_text(end_name)?);
                        }
                        b"modelNumber" => {
                            model_number = Some(r.read_text(end_name)?);
                        }
                        b"modelURL" => {
                            model_url = Some(r.read_text(end_name)?);
                        }
                        b"serialNumber" => {
                            serial_number = Some(r.read_text(end_name)?);
                        }
                        b"UDN" => {
                            let text = r.read_text(end_name)?;
                            udn = Some(Udn::from_str(&text)?);
                        }
                        b"iconList" => loop {
                            match r.read_event_err_eof()? {
                                Event::Start(start) => {
                                    anyhow::ensure!(start.local_name().as_ref() == b"icon");
                                    icon_list.push(Icon::read_xml(r)?);
                                }
                                Event::End(end) => {
                                    anyhow::ensure!(end.local_name().as_ref() == b"iconList");
                                    break;
                                }
                                Event::Text(_) => {}
                                other => anyhow::bail!(
                                    "expected icon start or list end, got {:?}",
                                    other
                                ),
                            }
                        },
                        b"serviceList" => loop {
                            match r.read_event_err_eof()? {
                                Event::Start(start) => {
                                    anyhow::ensure!(start.local_name().as_ref() == b"service");
                                    service_list.push(Service::read_xml(r)?);
                                }
                                Event::End(end) => {
                                    anyhow::ensure!(end.local_name().as_ref() == b"serviceList");
                                    break;
                                }
                                Event::Text(_) => {}
                                other => anyhow::bail!(
                                    "expected service start or list end, got {:?}",
                                    other
                                ),
                            }
                        },
                        b"deviceList" => loop {
                            match r.read_event_err_eof()? {
                                Event::Start(start) => {
                                    anyhow::ensure!(start.local_name().as_ref() == b"device");
                                    device_list.push(Device::read_xml(r)?);
                                }
                                Event::End(end) => {
                                    anyhow::ensure!(end.local_name().as_ref() == b"deviceList");
                                    break;
                                }
                                Event::Text(_) => {}
                                other => anyhow::bail!(
                                    "expected device start or list end, got {:?}",
                                    other
                                ),
                            }
                        },
                        b"presentationURL" => {
                            presentation_url = Some(r.read_text(end_name)?);
                        }
                        _ => {
                            r.read_to_end(end_name)?;
                        }
                    }
                }
                Event::End(end) => {
                    anyhow::ensure!(
                        end.local_name().as_ref() == b"device",
                        "expected device end, got {:?}",
                        end
                    );
                    break;
                }
                _ => {}
            }
        }

        Ok(Self {
            device_type: device_type.context("device type")?,
            friendly_name: friendly_name.context("friendly name")?,
            manufacturer: manufacturer.context("manufacturer name")?,
            manufacturer_url,
            model_description,
            model_name: model_name.context("model name")?,
            model_number,
            model_url,
            serial_number,
            udn: udn.context("udn")?,
            icon_list,
            service_list,
            device_list,
            presentation_url,
        })
    }
}

/// Unique Device Name. Universally-unique identifier for the device, whether root or
/// embedded. Shall be the same over time for a specific device instance (i.e., shall survive
/// reboots).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Udn(String);

impl Udn {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for Udn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Udn {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        anyhow::ensure!(s.starts_with("uuid:"), "udn should start with uuid:");
        Ok(Self(s.to_owned()))
    }
}

#[derive(Debug, Deserialize)]
pub struct Icon<'a> {
    pub mimetype: Cow<'a, str>,
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    pub url: Cow<'a, str>,
}

impl<'a> FromXml<'a> for Icon<'a> {
    fn read_xml(r: &mut quick_xml::Reader<&'a [u8]>) -> anyhow::Result<Self> {
        let mut mimetype = None;
        let mut width = None;
        let mut height = None;
        let mut depth = None;
        let mut url = None;

        while let Ok(event) = r.read_event_err_eof() {
            match event {
                Event::Start(start) => {
                    let end = start.name();
                    match start.local_name().as_ref() {
                        b"mimetype" => mimetype = Some(r.read_text(end)?),
                        b"width" => width = Some(r.read_text(end)?.parse()?),
                        b"height" => height = Some(r.read_text(end)?.parse()?),
                        b"depth" => depth = Some(r.read_text(end)?.parse()?),
                        b"url" => url = Some(r.read_text(end)?),
                        _ => {
                            r.read_to_end(end)?;
                        }
                    }
                }
                Event::End(end) => {
                    anyhow::ensure!(end.local_name().as_ref() == b"icon");
                    break;
                }
                _ => {}
            }
        }

        Ok(Self {
            mimetype: mimetype.context("get mimetype")?,
            width: width.context("get width")?,
            height: height.context("get height")?,
            depth: depth.context("get depth")?,
            url: url.context("get url")?,
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Service<'a> {
    #[serde(rename = "serviceType")]
    pub service_type: Cow<'a, str>,
    #[serde(rename = "serviceId")]
    pub service_id: Cow<'a, str>,
    #[serde(rename = "SCPDURL")]
    pub scpd_url: Cow<'a, str>,
    #[serde(rename = "controlURL")]
    pub control_url: Cow<'a, str>,
    #[serde(rename = "eventSubURL")]
    pub event_sub_url: Cow<'a, str>,
}

impl<'a> FromXml<'a> for Service<'a> {
    fn read_xml(r: &mut quick_xml::Reader<&'a [u8]>) -> anyhow::Result<Self> {
        let mut service_type = None;
        let mut service_id = None;
        let mut scpdurl = None;
        let mut control_url = None;
        let mut event_sub_url = None;

        while let Ok(event) = r.read_event_err_eof() {
            match event {
                Event::Start(start) => {
                    let end = start.name();
                    match start.local_name().as_ref() {
                        b"serviceType" => service_type = Some(r.read_text(end)?),
                        b"serviceId" => service_id = Some(r.read_text(end)?),
                        b"SCPDURL" => scpdurl = Some(r.read_text(end)?),
                        b"controlURL" => control_url = Some(r.read_text(end)?),
                        b"eventSubURL" => event_sub_url = Some(r.read_text(end)?),
                        _ => {
                            r.read_to_end(end)?;
                        }
                    }
                }
                Event::End(end) => {
                    anyhow::ensure!(end.local_name().as_ref() == b"service");
                    break;
                }
                _ => {}
            }
        }

        Ok(Self {
            service_type: service_type.context("service type")?,
            service_id: service_id.context("service id")?,
            scpd_url: scpdurl.context("scpdurl")?,
            control_url: control_url.context("control url")?,
            event_sub_url: event_sub_url.context("event sub url")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_device_description() {
        let raw = br#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
<specVersion><major>1</major><minor>0</minor></specVersion>
<URLBase>http://192.168.1.10:8200/</URLBase>
<device>
<deviceType>urn:schemas-upnp-org:device:MediaServer:1</deviceType>
<friendlyName>Living Room Server</friendlyName>
<manufacturer>Acme</manufacturer>
<modelName>Acme Media Server</modelName>
<UDN>uuid:4d696e69-444c-4e41-9d41-000102030405</UDN>
<serviceList>
<service>
<serviceType>urn:schemas-upnp-org:service:ContentDirectory:1</serviceType>
<serviceId>urn:upnp-org:serviceId:ContentDirectory</serviceId>
<SCPDURL>/cds.xml</SCPDURL>
<controlURL>/ctl/cds</controlURL>
<eventSubURL>/evt/cds</eventSubURL>
</service>
</serviceList>
</device>
</root>"#;
        let mut reader = quick_xml::Reader::from_reader(raw.as_slice());
        let desc = DeviceDescription::read_xml(&mut reader).unwrap();
        assert_eq!(desc.device.friendly_name, "Living Room Server");
        assert_eq!(desc.url_base.as_deref(), Some("http://192.168.1.10:8200/"));
        assert_eq!(desc.device.service_list.len(), 1);
        assert_eq!(
            desc.device.service_list[0].service_id,
            "urn:upnp-org:serviceId:ContentDirectory"
        );
    }
}
