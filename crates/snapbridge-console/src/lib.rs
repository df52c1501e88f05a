// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow, bail};
use rosc::{OscMessage, OscPacket, OscType};
use snapbridge_app::PreviewRow;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

/// Spacing the console needs between consecutive commands.
pub const COMMAND_INTERVAL: Duration = Duration::from_millis(200);
pub const CREATE_PAYLOAD: i32 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotCommand {
    Create { index: u32 },
    Rename { index: u32, name: String },
}

impl SnapshotCommand {
    pub fn index(&self) -> u32 {
        match self {
            Self::Create { index } | Self::Rename { index, .. } => *index,
        }
    }

    pub fn address(&self) -> String {
        match self {
            Self::Create { index } => format!("/Snapshots/New_Snapshot/{index}"),
            Self::Rename { index, .. } => format!("/Snapshots/Rename_Snapshot/{index}"),
        }
    }

    pub fn to_message(&self) -> OscMessage {
        let args = match self {
            Self::Create { .. } => vec![OscType::Int(CREATE_PAYLOAD)],
            Self::Rename { name, .. } => vec![OscType::String(name.clone())],
        };
        OscMessage {
            addr: self.address(),
            args,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        rosc::encoder::encode(&OscPacket::Message(self.to_message()))
            .map_err(|error| anyhow!("encode OSC message {}: {error:?}", self.address()))
    }
}

/// Host and UDP port the console listens on for OSC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn parse(host: &str, port: &str) -> Result<Self> {
        let host = host.trim();
        let host = host
            .strip_prefix('[')
            .and_then(|inner| inner.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            bail!("console host is required; set [console].host or pass --host");
        }
        let port = port.trim();
        if port.is_empty() {
            bail!("console port is required; set [console].port or pass --port");
        }
        let port: u16 = port
            .parse()
            .with_context(|| format!("console port must be a number, got {port:?}"))?;
        if port == 0 {
            bail!("console port must be between 1 and 65535");
        }
        Ok(Self {
            host: host.to_owned(),
            port,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl Endpoint {
    /// First socket address the host resolves to.
    pub fn resolve(&self) -> Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .with_context(|| format!("resolve console address {self}"))?
            .next()
            .ok_or_else(|| anyhow!("console address {self} resolved to nothing"))
    }
}

pub trait Transport {
    fn send(&mut self, command: &SnapshotCommand) -> Result<()>;
}

/// Connectionless OSC sender. The host is resolved on every send, so an
/// unresolvable name fails per command rather than up front. One local
/// socket is kept per address family and bound the first time a target of
/// that family shows up.
pub struct UdpTransport {
    v4: Option<UdpSocket>,
    v6: Option<UdpSocket>,
    endpoint: Endpoint,
}

impl UdpTransport {
    /// Binds the socket for the endpoint's family when the host resolves now;
    /// otherwise binding waits for the first send.
    pub fn open(endpoint: &Endpoint) -> Result<Self> {
        let mut transport = Self {
            v4: None,
            v6: None,
            endpoint: endpoint.clone(),
        };
        if let Ok(target) = endpoint.resolve() {
            transport.socket_for(target)?;
        }
        Ok(transport)
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn socket_for(&mut self, target: SocketAddr) -> Result<&UdpSocket> {
        let slot = match target {
            SocketAddr::V4(_) => &mut self.v4,
            SocketAddr::V6(_) => &mut self.v6,
        };
        if slot.is_none() {
            let local = match target {
                SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
                SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
            };
            let socket = UdpSocket::bind(local)
                .with_context(|| format!("bind local UDP socket {local}"))?;
            *slot = Some(socket);
        }
        slot.as_ref()
            .ok_or_else(|| anyhow!("local UDP socket for {target} is unavailable"))
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, command: &SnapshotCommand) -> Result<()> {
        let packet = command.encode()?;
        let target = self.endpoint.resolve()?;
        let endpoint = self.endpoint.to_string();
        self.socket_for(target)?
            .send_to(&packet, target)
            .with_context(|| format!("send {} to {endpoint}", command.address()))?;
        Ok(())
    }
}

pub trait Pacer {
    fn wait(&mut self, interval: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SleepPacer;

impl Pacer for SleepPacer {
    fn wait(&mut self, interval: Duration) {
        if !interval.is_zero() {
            thread::sleep(interval);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Create,
    Rename,
}

impl Step {
    pub const SEQUENCE: [Self; 2] = [Self::Create, Self::Rename];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Rename => "rename",
        }
    }

    pub fn command(self, row: &PreviewRow) -> SnapshotCommand {
        match self {
            Self::Create => SnapshotCommand::Create {
                index: row.snap_index,
            },
            Self::Rename => SnapshotCommand::Rename {
                index: row.snap_index,
                name: row.name.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFailure {
    pub snap_index: u32,
    pub step: Step,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendEvent {
    Sent { snap_index: u32, name: String },
    Failed(RowFailure),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failures: Vec<RowFailure>,
}

/// Drives create/rename pairs to the console, one row at a time.
///
/// Each row runs create, wait, rename, wait. Rename is attempted even when
/// create failed locally, since the console never acknowledges either. A
/// local failure is logged and recorded; the remaining rows still go out.
pub struct Emitter<T, P> {
    transport: T,
    pacer: P,
    interval: Duration,
}

impl<T: Transport> Emitter<T, SleepPacer> {
    pub fn new(transport: T) -> Self {
        Self::with_pacer(transport, SleepPacer)
    }
}

impl<T: Transport, P: Pacer> Emitter<T, P> {
    pub fn with_pacer(transport: T, pacer: P) -> Self {
        Self {
            transport,
            pacer,
            interval: COMMAND_INTERVAL,
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn into_parts(self) -> (T, P) {
        (self.transport, self.pacer)
    }

    pub fn send(&mut self, rows: &[PreviewRow]) -> SendReport {
        self.send_with(rows, |_| {})
    }

    pub fn send_with<F>(&mut self, rows: &[PreviewRow], mut on_event: F) -> SendReport
    where
        F: FnMut(&SendEvent),
    {
        let mut report = SendReport {
            attempted: rows.len(),
            ..SendReport::default()
        };

        for row in rows {
            let mut row_failures = Vec::new();
            for step in Step::SEQUENCE {
                let command = step.command(row);
                if let Err(error) = self.transport.send(&command) {
                    warn!(
                        snap_index = row.snap_index,
                        step = step.as_str(),
                        "OSC error at index {}: {error:#}",
                        row.snap_index
                    );
                    row_failures.push(RowFailure {
                        snap_index: row.snap_index,
                        step,
                        error: format!("{error:#}"),
                    });
                }
                self.pacer.wait(self.interval);
            }

            if row_failures.is_empty() {
                report.succeeded += 1;
                info!(snap_index = row.snap_index, "snapshot {}: {}", row.snap_index, row.name);
                on_event(&SendEvent::Sent {
                    snap_index: row.snap_index,
                    name: row.name.clone(),
                });
            } else {
                for failure in &row_failures {
                    on_event(&SendEvent::Failed(failure.clone()));
                }
                report.failures.extend(row_failures);
            }
        }

        info!(
            succeeded = report.succeeded,
            attempted = report.attempted,
            "created/renamed {} snapshot(s)",
            report.succeeded
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::{
        COMMAND_INTERVAL, Emitter, Endpoint, Pacer, SendEvent, SnapshotCommand, Step, Transport,
    };
    use anyhow::{Result, bail};
    use snapbridge_app::PreviewRow;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum Recorded {
        Command(SnapshotCommand),
        Wait(Duration),
    }

    #[derive(Default)]
    struct Log {
        entries: Vec<Recorded>,
    }

    struct RecordingTransport<'a> {
        log: &'a std::cell::RefCell<Log>,
        fail: Vec<(u32, Step)>,
    }

    impl Transport for RecordingTransport<'_> {
        fn send(&mut self, command: &SnapshotCommand) -> Result<()> {
            let step = match command {
                SnapshotCommand::Create { .. } => Step::Create,
                SnapshotCommand::Rename { .. } => Step::Rename,
            };
            if self.fail.contains(&(command.index(), step)) {
                bail!("network unreachable");
            }
            self.log
                .borrow_mut()
                .entries
                .push(Recorded::Command(command.clone()));
            Ok(())
        }
    }

    struct RecordingPacer<'a> {
        log: &'a std::cell::RefCell<Log>,
    }

    impl Pacer for RecordingPacer<'_> {
        fn wait(&mut self, interval: Duration) {
            self.log.borrow_mut().entries.push(Recorded::Wait(interval));
        }
    }

    fn rows() -> Vec<PreviewRow> {
        vec![
            PreviewRow {
                seq: 1,
                name: "Opening Song".to_owned(),
                snap_index: 0,
            },
            PreviewRow {
                seq: 2,
                name: "Welcome".to_owned(),
                snap_index: 1,
            },
        ]
    }

    #[test]
    fn two_rows_issue_four_paced_commands_in_order() {
        let log = std::cell::RefCell::new(Log::default());
        let mut emitter = Emitter::with_pacer(
            RecordingTransport {
                log: &log,
                fail: Vec::new(),
            },
            RecordingPacer { log: &log },
        );

        let report = emitter.send(&rows());
        assert_eq!(report.succeeded, 2);
        assert!(report.failures.is_empty());

        let wait = Recorded::Wait(COMMAND_INTERVAL);
        assert_eq!(
            log.borrow().entries,
            vec![
                Recorded::Command(SnapshotCommand::Create { index: 0 }),
                wait.clone(),
                Recorded::Command(SnapshotCommand::Rename {
                    index: 0,
                    name: "Opening Song".to_owned(),
                }),
                wait.clone(),
                Recorded::Command(SnapshotCommand::Create { index: 1 }),
                wait.clone(),
                Recorded::Command(SnapshotCommand::Rename {
                    index: 1,
                    name: "Welcome".to_owned(),
                }),
                wait,
            ]
        );
    }

    #[test]
    fn failed_create_still_renames_and_continues() {
        let log = std::cell::RefCell::new(Log::default());
        let mut emitter = Emitter::with_pacer(
            RecordingTransport {
                log: &log,
                fail: vec![(0, Step::Create)],
            },
            RecordingPacer { log: &log },
        );

        let mut events = Vec::new();
        let report = emitter.send_with(&rows(), |event| events.push(event.clone()));
        assert_eq!(report.attempted, 2);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].snap_index, 0);
        assert_eq!(report.failures[0].step, Step::Create);
        assert!(report.failures[0].error.contains("network unreachable"));

        let commands: Vec<_> = log
            .borrow()
            .entries
            .iter()
            .filter_map(|entry| match entry {
                Recorded::Command(command) => Some(command.address()),
                Recorded::Wait(_) => None,
            })
            .collect();
        assert_eq!(
            commands,
            vec![
                "/Snapshots/Rename_Snapshot/0",
                "/Snapshots/New_Snapshot/1",
                "/Snapshots/Rename_Snapshot/1",
            ]
        );
        let waits = log
            .borrow()
            .entries
            .iter()
            .filter(|entry| matches!(entry, Recorded::Wait(_)))
            .count();
        assert_eq!(waits, 4);

        assert!(matches!(events[0], SendEvent::Failed(_)));
        assert_eq!(
            events[1],
            SendEvent::Sent {
                snap_index: 1,
                name: "Welcome".to_owned(),
            }
        );
    }

    #[test]
    fn commands_carry_console_addresses_and_payloads() -> Result<()> {
        let create = SnapshotCommand::Create { index: 12 };
        let message = create.to_message();
        assert_eq!(message.addr, "/Snapshots/New_Snapshot/12");
        assert_eq!(message.args, vec![rosc::OscType::Int(0)]);

        let rename = SnapshotCommand::Rename {
            index: 12,
            name: "He said 'hi'".to_owned(),
        };
        let message = rename.to_message();
        assert_eq!(message.addr, "/Snapshots/Rename_Snapshot/12");
        assert_eq!(
            message.args,
            vec![rosc::OscType::String("He said 'hi'".to_owned())]
        );
        assert!(!rename.encode()?.is_empty());
        Ok(())
    }

    #[test]
    fn endpoint_validation_rejects_bad_input_before_sending() {
        assert!(Endpoint::parse("", "8000").is_err());
        let error = Endpoint::parse("10.0.0.5", "eight").expect_err("non-numeric port");
        assert!(error.to_string().contains("must be a number"));
        assert!(Endpoint::parse("10.0.0.5", "0").is_err());
        assert!(Endpoint::parse("10.0.0.5", "70000").is_err());

        let endpoint = Endpoint::parse(" 10.0.0.5 ", " 8000 ").expect("valid endpoint");
        assert_eq!(endpoint.to_string(), "10.0.0.5:8000");
    }

    #[test]
    fn ipv6_hosts_are_bracketed_when_displayed() {
        let bare = Endpoint::parse("::1", "8000").expect("valid endpoint");
        assert_eq!(bare.host, "::1");
        assert_eq!(bare.to_string(), "[::1]:8000");

        let bracketed = Endpoint::parse("[fe80::1]", "9000").expect("valid endpoint");
        assert_eq!(bracketed.host, "fe80::1");
        assert_eq!(bracketed.to_string(), "[fe80::1]:9000");
    }
}
