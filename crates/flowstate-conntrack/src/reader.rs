//! Line-oriented reader producing one flow or update per call.

use std::io::{self, BufRead};

use flowstate_common::error::{FlowstateError, Result};

use crate::flow::Flow;
use crate::parser::parse_flow_line;
use crate::update::{FlowUpdate, parse_update_line};

/// Reads flows from a buffered byte stream.
///
/// End of stream is `Ok(None)`; every other outcome that is not a flow is an
/// error. Blank lines are skipped and a final line without a trailing
/// newline is still decoded.
#[derive(Debug)]
pub struct FlowReader<R> {
    inner: R,
    label: String,
    line: String,
}

impl<R: BufRead> FlowReader<R> {
    /// Wraps `inner`. `label` names the stream in error messages.
    pub fn new(inner: R, label: impl Into<String>) -> Self {
        Self {
            inner,
            label: label.into(),
            line: String::new(),
        }
    }

    /// Reads the next dump line as a [`Flow`].
    ///
    /// # Errors
    ///
    /// Returns [`FlowstateError::SourceUnavailable`] if the stream fails and
    /// [`FlowstateError::MalformedInput`] if the line cannot be decoded.
    pub fn read_flow(&mut self) -> Result<Option<Flow>> {
        if !self.fill_line()? {
            return Ok(None);
        }
        parse_flow_line(&self.line).map(Some)
    }

    /// Reads the next event-stream line as a [`FlowUpdate`].
    ///
    /// # Errors
    ///
    /// Same as [`FlowReader::read_flow`], plus unknown event tags.
    pub fn read_update(&mut self) -> Result<Option<FlowUpdate>> {
        if !self.fill_line()? {
            return Ok(None);
        }
        parse_update_line(self.line.trim_end_matches(['\r', '\n'])).map(Some)
    }

    /// Iterates over the remaining flows.
    pub const fn flows(self) -> Flows<R> {
        Flows(self)
    }

    /// Iterates over the remaining updates.
    pub const fn updates(self) -> Updates<R> {
        Updates(self)
    }

    /// Returns the wrapped stream.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Loads the next non-blank line into the buffer. `false` at end of
    /// stream.
    fn fill_line(&mut self) -> Result<bool> {
        loop {
            self.line.clear();
            let read = self
                .inner
                .read_line(&mut self.line)
                .map_err(|e| self.read_error(&e))?;
            if read == 0 {
                return Ok(false);
            }
            if !self.line.trim().is_empty() {
                return Ok(true);
            }
        }
    }

    fn read_error(&self, e: &io::Error) -> FlowstateError {
        if e.kind() == io::ErrorKind::InvalidData {
            return FlowstateError::malformed("<not utf-8>", format!("{} produced invalid text", self.label));
        }
        FlowstateError::SourceUnavailable {
            command: self.label.clone(),
            message: format!("read failed: {e}"),
        }
    }
}

/// Iterator over flows, see [`FlowReader::flows`].
#[derive(Debug)]
pub struct Flows<R>(FlowReader<R>);

impl<R: BufRead> Iterator for Flows<R> {
    type Item = Result<Flow>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.read_flow().transpose()
    }
}

/// Iterator over updates, see [`FlowReader::updates`].
#[derive(Debug)]
pub struct Updates<R>(FlowReader<R>);

impl<R: BufRead> Iterator for Updates<R> {
    type Item = Result<FlowUpdate>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.read_update().transpose()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufReader, Cursor, Read};

    use super::*;
    use crate::update::UpdateKind;

    const DUMP: &str = "\
tcp      6 431884 ESTABLISHED src=192.168.1.244 dst=216.58.213.202 sport=42412 dport=443 packets=18 bytes=2272 src=216.58.213.202 dst=85.191.222.130 sport=443 dport=42412 packets=22 bytes=15245 [ASSURED] mark=0 use=1
udp      17 19 src=192.168.1.149 dst=239.255.255.250 sport=45162 dport=1900 packets=3 bytes=1340 [UNREPLIED] src=239.255.255.250 dst=192.168.1.149 sport=1900 dport=45162 packets=0 bytes=0 mark=0 use=1
";

    // Event tags are right-aligned in a 10-column field.
    const EVENTS: &str = concat!(
        "    [NEW] tcp      6 120 SYN_SENT src=192.168.1.10 dst=93.184.216.34 sport=51234 dport=80 [UNREPLIED] src=93.184.216.34 dst=85.191.222.130 sport=80 dport=51234\n",
        " [UPDATE] tcp      6 60 SYN_RECV src=192.168.1.10 dst=93.184.216.34 sport=51234 dport=80 src=93.184.216.34 dst=85.191.222.130 sport=80 dport=51234\n",
        "[DESTROY] icmp     1 src=162.243.158.119 dst=85.191.222.130 type=8 code=0 id=8825 packets=5 bytes=230 src=85.191.222.130 dst=162.243.158.119 type=0 code=0 id=8825 packets=5 bytes=230\n",
    );

    #[test]
    fn read_flow_until_end_of_stream() {
        let mut reader = FlowReader::new(Cursor::new(DUMP), "dump");
        let first = reader.read_flow().expect("read").expect("first flow");
        assert_eq!(first.protocol, "tcp");
        assert!(first.nat);
        let second = reader.read_flow().expect("read").expect("second flow");
        assert_eq!(second.state.as_deref(), Some("UNREPLIED"));
        assert!(reader.read_flow().expect("eof").is_none());
        assert!(reader.read_flow().expect("still eof").is_none());
    }

    #[test]
    fn read_update_decodes_tags() {
        let kinds: Vec<UpdateKind> = FlowReader::new(Cursor::new(EVENTS), "events")
            .updates()
            .map(|u| u.expect("update").kind)
            .collect();
        assert_eq!(
            kinds,
            vec![UpdateKind::New, UpdateKind::Update, UpdateKind::Destroy]
        );
    }

    #[test]
    fn right_aligned_tag_on_first_line_decodes() {
        let mut reader = FlowReader::new(Cursor::new(EVENTS), "events");
        let update = reader.read_update().expect("read").expect("first update");
        assert_eq!(update.kind, UpdateKind::New);
        assert_eq!(update.flow.protocol, "tcp");
        assert_eq!(update.flow.ttl, Some(120));
        assert!(EVENTS.lines().all(|line| line.as_bytes()[9] == b' '));
    }

    #[test]
    fn blank_lines_are_skipped() {
        let input = format!("\n   \n{DUMP}\n\n");
        let flows: Vec<_> = FlowReader::new(Cursor::new(input), "dump")
            .flows()
            .collect::<Result<_>>()
            .expect("flows");
        assert_eq!(flows.len(), 2);
    }

    #[test]
    fn last_line_without_newline_is_read() {
        let input = DUMP.trim_end();
        let flows: Vec<_> = FlowReader::new(Cursor::new(input), "dump")
            .flows()
            .collect::<Result<_>>()
            .expect("flows");
        assert_eq!(flows.len(), 2);
    }

    #[test]
    fn malformed_line_is_an_error_not_end_of_stream() {
        let input = format!("{DUMP}tcp 6 300 ESTABLISHED\n");
        let mut reader = FlowReader::new(Cursor::new(input), "dump");
        assert!(reader.read_flow().expect("first").is_some());
        assert!(reader.read_flow().expect("second").is_some());
        assert!(matches!(
            reader.read_flow(),
            Err(FlowstateError::MalformedInput { .. })
        ));
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"))
        }
    }

    #[test]
    fn stream_failure_is_source_unavailable() {
        let mut reader = FlowReader::new(BufReader::new(FailingReader), "conntrack -L");
        let err = reader.read_flow().expect_err("broken pipe");
        match err {
            FlowstateError::SourceUnavailable { command, message } => {
                assert_eq!(command, "conntrack -L");
                assert!(message.contains("pipe closed"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn invalid_utf8_is_malformed() {
        let mut reader = FlowReader::new(Cursor::new(vec![0xff, 0xfe, b'\n']), "dump");
        assert!(matches!(
            reader.read_flow(),
            Err(FlowstateError::MalformedInput { .. })
        ));
    }

    #[test]
    fn into_inner_returns_stream() {
        let reader = FlowReader::new(Cursor::new("x"), "dump");
        assert_eq!(reader.into_inner().into_inner(), "x");
    }
}
