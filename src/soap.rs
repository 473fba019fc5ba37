//! Client-side SOAP action invocation.
//!
//! Builds one outgoing action envelope at a time directly into a buffer
//! (mirroring the teacher's `WritableAction`, which exists there to produce
//! action *responses*; here it produces action *requests* instead) and parses
//! the two shapes a compliant service can reply with: an `...Response` body
//! or an `s:Fault` carrying a `UPnPError`.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::{urn::URN, XmlReaderExt, XmlWriter};

/// Incrementally writes `<s:Envelope><s:Body><u:ActionName xmlns:u="urn">...`.
pub struct WritableAction {
    w: XmlWriter,
    action_name: String,
}

impl WritableAction {
    pub fn new(action_name: &str, urn: &URN) -> quick_xml::Result<Self> {
        let mut w = quick_xml::Writer::new(Vec::new());
        w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        let envelope = BytesStart::new("s:Envelope").with_attributes([
            ("xmlns:s", "http://schemas.xmlsoap.org/soap/envelope/"),
            (
                "s:encodingStyle",
                "http://schemas.xmlsoap.org/soap/encoding/",
            ),
        ]);
        w.write_event(Event::Start(envelope))?;
        w.write_event(Event::Start(BytesStart::new("s:Body")))?;

        let action_name = format!("u:{action_name}");
        let urn = urn.to_string();
        let action = BytesStart::new(&action_name).with_attributes([("xmlns:u", urn.as_str())]);
        w.write_event(Event::Start(action))?;

        Ok(Self { w, action_name })
    }

    pub fn write_argument(&mut self, name: &str, value: &str) -> quick_xml::Result<()> {
        self.w
            .create_element(name)
            .write_text_content(BytesText::new(value))?;
        Ok(())
    }

    pub fn finish(mut self) -> quick_xml::Result<String> {
        self.w
            .write_event(Event::End(BytesEnd::new(self.action_name)))?;
        self.w.write_event(Event::End(BytesEnd::new("s:Body")))?;
        self.w
            .write_event(Event::End(BytesEnd::new("s:Envelope")))?;
        Ok(String::from_utf8(self.w.into_inner())?)
    }
}

/// A successfully parsed `...Response` body: the action name (without the
/// `Response` suffix) and its out-arguments in document order.
#[derive(Debug, Clone)]
pub struct ActionResponse {
    pub action_name: String,
    pub arguments: Vec<(String, String)>,
}

impl ActionResponse {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.arguments
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ActionErrorCode {
    InvalidAction,
    InvalidArguments,
    ActionFailed,
    ArgumentInvalid,
    ArgumentValueOutOfRange,
    OptionalActionNotImplemented,
    OutOfMemory,
    HumanInterventionRequired,
    StringArgumentTooLong,
    Other(u16),
}

impl ActionErrorCode {
    pub fn code(&self) -> u16 {
        match self {
            ActionErrorCode::InvalidAction => 401,
            ActionErrorCode::InvalidArguments => 402,
            ActionErrorCode::ActionFailed => 501,
            ActionErrorCode::ArgumentInvalid => 600,
            ActionErrorCode::ArgumentValueOutOfRange => 601,
            ActionErrorCode::OptionalActionNotImplemented => 602,
            ActionErrorCode::OutOfMemory => 603,
            ActionErrorCode::HumanInterventionRequired => 604,
            ActionErrorCode::StringArgumentTooLong => 605,
            ActionErrorCode::Other(code) => *code,
        }
    }
}

impl From<u16> for ActionErrorCode {
    fn from(value: u16) -> Self {
        match value {
            401 => ActionErrorCode::InvalidAction,
            402 => ActionErrorCode::InvalidArguments,
            501 => ActionErrorCode::ActionFailed,
            600 => ActionErrorCode::ArgumentInvalid,
            601 => ActionErrorCode::ArgumentValueOutOfRange,
            602 => ActionErrorCode::OptionalActionNotImplemented,
            603 => ActionErrorCode::OutOfMemory,
            604 => ActionErrorCode::HumanInterventionRequired,
            605 => ActionErrorCode::StringArgumentTooLong,
            other => ActionErrorCode::Other(other),
        }
    }
}

#[derive(Debug)]
pub struct ActionError {
    pub code: ActionErrorCode,
    pub description: Option<String>,
}

impl std::fmt::Display for ActionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.description {
            Some(description) => write!(f, "{}: {description}", self.code.code()),
            None => write!(f, "{}", self.code.code()),
        }
    }
}

impl std::error::Error for ActionError {}

impl ActionError {
    fn read_xml<'a, 'b>(
        r: &mut quick_xml::Reader<&'a [u8]>,
        end_tag: quick_xml::name::QName<'b>,
    ) -> anyhow::Result<Self> {
        let fault_code = r.read_to_start()?;
        anyhow::ensure!(fault_code.local_name().as_ref() == b"faultcode");
        r.read_to_end(fault_code.name())?;
        let fault_string = r.read_to_start()?;
        anyhow::ensure!(fault_string.local_name().as_ref() == b"faultstring");
        r.read_text(fault_string.name())?;
        let detail = r.read_to_start()?;
        anyhow::ensure!(detail.local_name().as_ref() == b"detail");
        let upnp_error = r.read_to_start()?;
        anyhow::ensure!(upnp_error.local_name().as_ref() == b"UPnPError");
        let error_code_tag = r.read_to_start()?;
        anyhow::ensure!(error_code_tag.local_name().as_ref() == b"errorCode");
        let code: u16 = r
            .read_text(error_code_tag.name())?
            .parse()
            .map_err(|_| anyhow::anyhow!("error code is not an integer"))?;
        let mut description = None;

        loop {
            match r.read_event_err_eof()? {
                Event::Start(start) => {
                    anyhow::ensure!(start.local_name().as_ref() == b"errorDescription");
                    description = Some(r.read_text(start.name())?.to_string());
                }
                Event::End(end) if end == upnp_error.to_end() => break,
                Event::End(_) | Event::Text(_) => {}
                other => anyhow::bail!("expected description or fault end, got {other:?}"),
            }
        }

        r.read_to_end(detail.name())?;
        r.read_to_end(end_tag)?;

        Ok(Self {
            code: code.into(),
            description,
        })
    }
}

/// Sends the finished envelope as an HTTP POST with the right `SOAPAction`
/// header and parses either an action response or an `s:Fault`.
pub async fn invoke(
    client: &reqwest::Client,
    control_url: &str,
    urn: &URN,
    action_name: &str,
    body: String,
    max_content_length: usize,
) -> anyhow::Result<Result<ActionResponse, ActionError>> {
    let soap_action = format!("\"{urn}#{action_name}\"");
    let response = client
        .post(control_url)
        .header("Content-Type", "text/xml; charset=\"utf-8\"")
        .header("SOAPAction", soap_action)
        .body(body)
        .send()
        .await?;
    let bytes = response.bytes().await?;
    anyhow::ensure!(
        bytes.len() <= max_content_length,
        "action response exceeds max content length ({} > {})",
        bytes.len(),
        max_content_length
    );
    let text = std::str::from_utf8(&bytes)?;
    read_soap_response(text)
}

/// Parses a complete `s:Envelope`/`s:Body` into either the action's response
/// arguments or a decoded `ActionError`.
pub fn read_soap_response(raw: &str) -> anyhow::Result<Result<ActionResponse, ActionError>> {
    let mut r = quick_xml::Reader::from_str(raw);
    let envelope = r.read_to_start()?.into_owned();
    anyhow::ensure!(envelope.local_name().as_ref() == b"Envelope");
    let body = r.read_to_start()?.into_owned();
    anyhow::ensure!(body.local_name().as_ref() == b"Body");

    let start = r.read_to_start()?;
    let result = match start.local_name().as_ref() {
        b"Fault" => Err(ActionError::read_xml(&mut r, start.name())?),
        _ => {
            let full_name = start.name().into_inner().to_vec();
            let action_name = String::from_utf8(full_name.clone())?
                .strip_suffix("Response")
                .map(str::to_owned)
                .unwrap_or_else(|| String::from_utf8_lossy(&full_name).into_owned());
            let end_tag = start.to_end().into_owned();
            let mut arguments = Vec::new();
            loop {
                match r.read_event_err_eof()? {
                    Event::Start(arg) => {
                        let name = String::from_utf8(arg.local_name().into_inner().to_vec())?;
                        let value = r.read_text(arg.name())?.into_owned();
                        arguments.push((name, value));
                    }
                    Event::Empty(arg) => {
                        let name = String::from_utf8(arg.local_name().into_inner().to_vec())?;
                        arguments.push((name, String::new()));
                    }
                    Event::End(end) if end == end_tag => break,
                    _ => {}
                }
            }
            Ok(ActionResponse {
                action_name,
                arguments,
            })
        }
    };

    r.read_to_end(body.name())?;
    r.read_to_end(envelope.name())?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_browse_request_envelope() {
        let mut action = WritableAction::new("Browse", &URN::content_directory()).unwrap();
        action.write_argument("ObjectID", "0").unwrap();
        action.write_argument("BrowseFlag", "BrowseDirectChildren").unwrap();
        let xml = action.finish().unwrap();
        assert!(xml.contains("<u:Browse xmlns:u=\"urn:schemas-upnp-org:service:ContentDirectory:1\">"));
        assert!(xml.contains("<ObjectID>0</ObjectID>"));
        assert!(xml.ends_with("</s:Envelope>"));
    }

    #[test]
    fn parses_browse_response_arguments() {
        let raw = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">
<s:Body>
<u:BrowseResponse xmlns:u="urn:schemas-upnp-org:service:ContentDirectory:1">
<Result>&lt;DIDL-Lite/&gt;</Result>
<NumberReturned>0</NumberReturned>
<TotalMatches>0</TotalMatches>
<UpdateID>1</UpdateID>
</u:BrowseResponse>
</s:Body>
</s:Envelope>"#;
        let response = read_soap_response(raw).unwrap().unwrap();
        assert_eq!(response.action_name, "u:Browse");
        assert_eq!(response.get("NumberReturned"), Some("0"));
        assert_eq!(response.get("TotalMatches"), Some("0"));
    }

    #[test]
    fn parses_fault_as_action_error() {
        let raw = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">
<s:Body>
<s:Fault>
<faultcode>s:Client</faultcode>
<faultstring>UPnPError</faultstring>
<detail>
<UPnPError xmlns="schemas-upnp-org:control-1-0">
<errorCode>701</errorCode>
<errorDescription>No such object</errorDescription>
</UPnPError>
</detail>
</s:Fault>
</s:Body>
</s:Envelope>"#;
        let err = read_soap_response(raw).unwrap().unwrap_err();
        assert_eq!(err.code.code(), 701);
        assert_eq!(err.description.as_deref(), Some("No such object"));
    }
}
