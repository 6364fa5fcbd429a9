//! Normalization of nmap XML reports (`nmap -oX -`) into findings.
//!
//! The parser is a pure function over the report text: one [`NewFinding`] per
//! `<port>` element of every `<host>`, in document order. Missing service or
//! state data defaults to `"unknown"`, a non-numeric `portid` yields a finding
//! without a port, and anything that is not a well-formed nmap report is a
//! [`ParseError`].

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::types::NewFinding;

const ROOT: &[u8] = b"nmaprun";

/// Scan output that could not be read as an nmap XML report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("malformed scan output at byte {position}: {message}")]
    Xml { position: u64, message: String },
    #[error("malformed attribute in scan output: {0}")]
    Attribute(String),
    #[error("scan output is not an nmap report (root element <{0}>)")]
    UnexpectedRoot(String),
    #[error("scan output contains no nmap report")]
    MissingRoot,
    #[error("scan output ended inside an open element")]
    Truncated,
}

/// Parse a raw nmap XML report produced for `requested_target`.
pub fn parse_scan_output(raw: &str, requested_target: &str) -> Result<Vec<NewFinding>, ParseError> {
    let mut reader = Reader::from_str(raw);
    let mut buf = Vec::new();
    let mut report = ReportBuilder::new(requested_target);
    let mut depth = 0usize;

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|e| ParseError::Xml {
            position: reader.buffer_position() as u64,
            message: e.to_string(),
        })?;
        match event {
            Event::Start(e) => {
                report.check_root(depth, &e)?;
                report.open(&e, depth, false)?;
                depth += 1;
            }
            Event::Empty(e) => {
                report.check_root(depth, &e)?;
                report.open(&e, depth, true)?;
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                report.close(e.name().as_ref());
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !report.saw_root {
        return Err(ParseError::MissingRoot);
    }
    if depth != 0 {
        return Err(ParseError::Truncated);
    }
    Ok(report.findings)
}

#[derive(Default)]
struct PortEntry {
    depth: usize,
    portid: Option<String>,
    state: Option<String>,
    service: Option<String>,
}

#[derive(Default)]
struct HostEntry {
    address: Option<String>,
    in_ports: bool,
    ports: Vec<PortEntry>,
}

struct ReportBuilder<'t> {
    requested_target: &'t str,
    saw_root: bool,
    host: Option<HostEntry>,
    port: Option<PortEntry>,
    findings: Vec<NewFinding>,
}

impl<'t> ReportBuilder<'t> {
    fn new(requested_target: &'t str) -> Self {
        Self {
            requested_target,
            saw_root: false,
            host: None,
            port: None,
            findings: Vec::new(),
        }
    }

    fn check_root(&mut self, depth: usize, e: &BytesStart<'_>) -> Result<(), ParseError> {
        if depth > 0 {
            return Ok(());
        }
        if e.name().as_ref() != ROOT {
            let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
            return Err(ParseError::UnexpectedRoot(name));
        }
        self.saw_root = true;
        Ok(())
    }

    fn open(&mut self, e: &BytesStart<'_>, depth: usize, empty: bool) -> Result<(), ParseError> {
        match e.name().as_ref() {
            // `<host/>` has nothing to report.
            b"host" if !empty => self.host = Some(HostEntry::default()),
            b"address" => {
                if let Some(host) = self.host.as_mut() {
                    if host.address.is_none() && !host.in_ports {
                        host.address = attribute(e, b"addr")?.filter(|a| !a.trim().is_empty());
                    }
                }
            }
            b"ports" if !empty => {
                if let Some(host) = self.host.as_mut() {
                    host.in_ports = true;
                }
            }
            b"port" => {
                if self.host.as_ref().is_some_and(|h| h.in_ports) {
                    self.port = Some(PortEntry {
                        depth,
                        portid: attribute(e, b"portid")?,
                        ..PortEntry::default()
                    });
                    if empty {
                        self.finish_port();
                    }
                }
            }
            b"state" => {
                if let Some(port) = self.port_child(depth) {
                    port.state = attribute(e, b"state")?;
                }
            }
            b"service" => {
                if let Some(port) = self.port_child(depth) {
                    port.service = attribute(e, b"name")?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// The open port, if an element at `depth` is one of its direct children.
    fn port_child(&mut self, depth: usize) -> Option<&mut PortEntry> {
        self.port.as_mut().filter(|p| p.depth + 1 == depth)
    }

    fn close(&mut self, name: &[u8]) {
        match name {
            b"port" => self.finish_port(),
            b"ports" => {
                if let Some(host) = self.host.as_mut() {
                    host.in_ports = false;
                }
            }
            b"host" => self.finish_host(),
            _ => {}
        }
    }

    fn finish_port(&mut self) {
        if let (Some(port), Some(host)) = (self.port.take(), self.host.as_mut()) {
            host.ports.push(port);
        }
    }

    fn finish_host(&mut self) {
        let Some(host) = self.host.take() else {
            return;
        };
        let address = host
            .address
            .unwrap_or_else(|| self.requested_target.to_string());
        for port in host.ports {
            let number = port
                .portid
                .as_deref()
                .and_then(|id| id.trim().parse::<u16>().ok());
            self.findings.push(NewFinding::new(
                address.clone(),
                number,
                port.service.as_deref(),
                port.state.as_deref(),
            ));
        }
    }
}

fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, ParseError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| ParseError::Attribute(err.to_string()))?;
        if attr.key.as_ref() == key {
            let value = attr
                .unescape_value()
                .map_err(|err| ParseError::Attribute(err.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UNKNOWN;

    fn report(hosts: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE nmaprun>
<?xml-stylesheet href="file:///usr/share/nmap/nmap.xsl" type="text/xsl"?>
<nmaprun scanner="nmap" args="nmap -oX - 10.0.0.5" version="7.94">
<scaninfo type="syn" protocol="tcp" numservices="1000" services="1-1000"/>
{hosts}
<runstats><finished time="1700000000"/><hosts up="1" down="0" total="1"/></runstats>
</nmaprun>"#
        )
    }

    #[test]
    fn two_ports_on_one_host() {
        let xml = report(
            r#"<host><status state="up"/>
<address addr="10.0.0.5" addrtype="ipv4"/>
<address addr="AA:BB:CC:DD:EE:FF" addrtype="mac"/>
<ports>
<extraports state="closed" count="998"/>
<port protocol="tcp" portid="22"><state state="open" reason="syn-ack"/><service name="ssh" method="table" conf="3"/></port>
<port protocol="tcp" portid="81"><state state="filtered" reason="no-response"/><service name="unknown-service"/></port>
</ports></host>"#,
        );
        let findings = parse_scan_output(&xml, "10.0.0.5").unwrap();
        assert_eq!(
            findings,
            vec![
                NewFinding::new("10.0.0.5", Some(22), Some("ssh"), Some("open")),
                NewFinding::new("10.0.0.5", Some(81), Some("unknown-service"), Some("filtered")),
            ]
        );
    }

    #[test]
    fn defaults_and_non_numeric_port() {
        let xml = report(
            r#"<host><address addr="192.168.1.10" addrtype="ipv4"/><ports>
<port protocol="tcp" portid="80"><state state="open"/></port>
<port protocol="tcp" portid="443"><service name="https"/></port>
<port protocol="tcp" portid="http-alt"><state state="closed"/><service name="http"/></port>
<port protocol="tcp" portid="70000"/>
</ports></host>"#,
        );
        let findings = parse_scan_output(&xml, "192.168.1.0/24").unwrap();
        assert_eq!(findings.len(), 4);
        assert_eq!(findings[0].service, UNKNOWN);
        assert_eq!(findings[0].state, "open");
        assert_eq!(findings[1].state, UNKNOWN);
        assert_eq!(findings[1].service, "https");
        assert_eq!(findings[2].port, None);
        assert_eq!(findings[2].service, "http");
        assert_eq!(findings[3].port, None);
        assert_eq!(findings[3].state, UNKNOWN);
    }

    #[test]
    fn only_direct_children_describe_a_port() {
        let xml = report(
            r#"<host><address addr="10.0.0.7" addrtype="ipv4"/><ports>
<port protocol="tcp" portid="22"><script id="x"><service name="nested"/><state state="bogus"/></script><state state="open"/></port>
</ports></host>"#,
        );
        let findings = parse_scan_output(&xml, "10.0.0.7").unwrap();
        assert_eq!(
            findings,
            vec![NewFinding::new("10.0.0.7", Some(22), None, Some("open"))]
        );
    }

    #[test]
    fn missing_address_falls_back_to_requested_target() {
        let xml = report(
            r#"<host><ports><port protocol="tcp" portid="8080"><state state="open"/></port></ports></host>"#,
        );
        let findings = parse_scan_output(&xml, "scanme.example").unwrap();
        assert_eq!(findings[0].target, "scanme.example");
    }

    #[test]
    fn host_without_ports_contributes_nothing() {
        let xml = report(r#"<host><status state="up"/><address addr="10.0.0.9" addrtype="ipv4"/></host>"#);
        assert!(parse_scan_output(&xml, "10.0.0.9").unwrap().is_empty());
    }

    #[test]
    fn hosts_keep_document_order() {
        let xml = report(
            r#"<host><address addr="10.0.0.2" addrtype="ipv4"/><ports><port portid="2"/></ports></host>
<host><address addr="10.0.0.1" addrtype="ipv4"/><ports><port portid="1"/></ports></host>"#,
        );
        let targets: Vec<_> = parse_scan_output(&xml, "10.0.0.0/30")
            .unwrap()
            .into_iter()
            .map(|f| (f.target, f.port))
            .collect();
        assert_eq!(
            targets,
            vec![("10.0.0.2".to_string(), Some(2)), ("10.0.0.1".to_string(), Some(1))]
        );
    }

    #[test]
    fn malformed_output_is_an_error() {
        assert_eq!(parse_scan_output("", "t"), Err(ParseError::MissingRoot));
        assert_eq!(
            parse_scan_output("Starting Nmap 7.94 ( https://nmap.org )", "t"),
            Err(ParseError::MissingRoot)
        );
        assert_eq!(
            parse_scan_output("<nmaprun><host><ports>", "t"),
            Err(ParseError::Truncated)
        );
        assert!(matches!(
            parse_scan_output("<nmaprun><host></ports></nmaprun>", "t"),
            Err(ParseError::Xml { .. })
        ));
        assert_eq!(
            parse_scan_output("<html><body/></html>", "t"),
            Err(ParseError::UnexpectedRoot("html".into()))
        );
    }

    #[test]
    fn deterministic_for_identical_input() {
        let xml = report(r#"<host><address addr="10.0.0.3" addrtype="ipv4"/><ports><port portid="53"><state state="open"/><service name="domain"/></port></ports></host>"#);
        assert_eq!(
            parse_scan_output(&xml, "10.0.0.3").unwrap(),
            parse_scan_output(&xml, "10.0.0.3").unwrap()
        );
    }
}
