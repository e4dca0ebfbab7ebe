pub mod errors;
pub mod probe;
pub mod stats;

use std::io::{self, Write};
use std::net::Ipv4Addr;
use std::time::Duration;

use crossbeam::channel::{after, bounded, select, Receiver};
use tracing::{debug, info, warn};

use crate::net::{self, socket::IcmpSocket};
use errors::PingError;
use probe::{MismatchPolicy, Probe, ProbeEngine, ProbeOutcome};
use stats::ProbeSummary;

pub const DEFAULT_TTL: u32 = 64;

#[derive(Debug, Clone)]
pub struct PingConfig {
    pub count: u32,
    pub timeout: Duration,
    pub interval: Duration,
    pub ttl: u32,
    pub on_mismatch: MismatchPolicy,
}

impl Default for PingConfig {
    fn default() -> Self {
        PingConfig {
            count: 10,
            timeout: Duration::from_secs(2),
            interval: Duration::from_secs(1),
            ttl: DEFAULT_TTL,
            on_mismatch: MismatchPolicy::default(),
        }
    }
}

pub struct Pinger {
    target: String,
    config: PingConfig,
}

impl Pinger {
    pub fn new(target: String, config: PingConfig) -> Self {
        Self { target, config }
    }

    /// Resolves the target, opens the raw socket and runs the whole session,
    /// printing to stdout.
    pub fn ping(&self) -> Result<ProbeSummary, PingError> {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        writeln!(out, "Ping to: {}...", self.target)?;

        let addr = net::resolve(&self.target)?;
        let socket = IcmpSocket::open(self.config.ttl)?;
        let mut engine = ProbeEngine::new(socket, self.config.on_mismatch);

        let ctrl_c_events = Self::setup_sigint_handler()?;
        let summary = run_session(&mut engine, addr, &self.config, &mut out, &ctrl_c_events)?;
        Ok(summary)
    }

    fn setup_sigint_handler() -> Result<Receiver<()>, ctrlc::Error> {
        let (sender, receiver) = bounded(1);
        ctrlc::set_handler(move || {
            let _ = sender.try_send(());
        })?;

        Ok(receiver)
    }
}

/// Drives `config.count` sequential probes against `dest`, one every
/// `config.interval`, and prints a line per probe followed by the summary.
///
/// The wait between probes is fixed and does not account for how long the
/// previous probe took. A message on `interrupt` ends the session early; the
/// summary still covers the probes already sent.
pub fn run_session<P: Probe, W: Write>(
    probe: &mut P,
    dest: Ipv4Addr,
    config: &PingConfig,
    out: &mut W,
    interrupt: &Receiver<()>,
) -> io::Result<ProbeSummary> {
    let mut summary = ProbeSummary::new();
    let ident_base = std::process::id() as u16;

    for i in 0..config.count {
        if interrupt.try_recv().is_ok() {
            info!("interrupted, stopping");
            break;
        }

        let id = ident_base.wrapping_add(i as u16);
        let seq = (i as u16).wrapping_add(1);
        summary.record_sent();

        match probe.probe(dest, id, seq, config.timeout) {
            Ok(ProbeOutcome::Success {
                rtt_ms,
                ttl,
                size,
                seq,
            }) => {
                writeln!(
                    out,
                    "{} bytes from {}: icmp_seq={} ttl={} time={:.3} ms",
                    size, dest, seq, ttl, rtt_ms
                )?;
                debug!("Delay: {} ms", rtt_ms);
                summary.record_reply(rtt_ms);
            }
            Ok(ProbeOutcome::Timeout) => writeln!(out, "Request timed out.")?,
            Ok(ProbeOutcome::IdentifierMismatch) => writeln!(out, "ID does not match request.")?,
            Ok(ProbeOutcome::Malformed) => writeln!(out, "Malformed reply.")?,
            Err(err) => {
                warn!(%err, seq, "probe failed");
                writeln!(out, "Request failed: {}", err)?;
            }
        }

        if i + 1 < config.count {
            select! {
                recv(after(config.interval)) -> _ => {}
                recv(interrupt) -> _ => {
                    info!("interrupted, stopping");
                    writeln!(out)?;
                    break;
                }
            }
        }
    }

    summary.write_to(out)?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use crossbeam::channel::{bounded, never};

    use super::probe::{Probe, ProbeOutcome};
    use super::{run_session, PingConfig};

    const DEST: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 1);

    struct ScriptedProbe {
        outcomes: VecDeque<ProbeOutcome>,
        ids: Vec<u16>,
        seqs: Vec<u16>,
    }

    impl ScriptedProbe {
        fn new(outcomes: impl IntoIterator<Item = ProbeOutcome>) -> Self {
            ScriptedProbe {
                outcomes: outcomes.into_iter().collect(),
                ids: Vec::new(),
                seqs: Vec::new(),
            }
        }
    }

    impl Probe for ScriptedProbe {
        fn probe(
            &mut self,
            _dest: Ipv4Addr,
            id: u16,
            seq: u16,
            _timeout: Duration,
        ) -> io::Result<ProbeOutcome> {
            self.ids.push(id);
            self.seqs.push(seq);
            Ok(self.outcomes.pop_front().unwrap_or(ProbeOutcome::Timeout))
        }
    }

    fn success(rtt_ms: f64, seq: u16) -> ProbeOutcome {
        ProbeOutcome::Success {
            rtt_ms,
            ttl: 57,
            size: 36,
            seq,
        }
    }

    fn config(count: u32) -> PingConfig {
        PingConfig {
            count,
            interval: Duration::ZERO,
            ..PingConfig::default()
        }
    }

    #[test]
    fn every_probe_times_out() {
        let mut probe = ScriptedProbe::new([]);
        let mut out = Vec::new();
        let summary = run_session(&mut probe, DEST, &config(4), &mut out, &never()).unwrap();

        assert_eq!(summary.loss_percent(), 100.0);
        assert!(summary.rtts().is_empty());
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Request timed out.\n".repeat(4) + "100.00% packet loss\n"
        );
    }

    #[test]
    fn two_of_ten_lost() {
        let rtts = [10.0, 12.0, 11.0, 9.0, 13.0, 10.0, 11.0, 12.0];
        let mut rtt_iter = rtts.iter();
        let outcomes: Vec<_> = (1..=10u16)
            .map(|seq| match seq {
                3 | 7 => ProbeOutcome::Timeout,
                _ => success(*rtt_iter.next().unwrap(), seq),
            })
            .collect();
        let mut probe = ScriptedProbe::new(outcomes);
        let mut out = Vec::new();
        let summary = run_session(&mut probe, DEST, &config(10), &mut out, &never()).unwrap();

        assert_eq!(summary.sent(), 10);
        assert_eq!(summary.received(), 8);
        assert_eq!(summary.loss_percent(), 20.0);
        assert_eq!(summary.min(), Some(9.0));
        assert_eq!(summary.max(), Some(13.0));
        assert_eq!(summary.avg(), Some(11.0));

        let out = String::from_utf8(out).unwrap();
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 12);
        assert_eq!(
            lines[0],
            "36 bytes from 192.0.2.1: icmp_seq=1 ttl=57 time=10.000 ms"
        );
        assert_eq!(lines[2], "Request timed out.");
        assert_eq!(lines[6], "Request timed out.");
        assert_eq!(lines[10], "20.00% packet loss");
        assert_eq!(lines[11], "rtt min/avg/max = 9.00/11.00/13.00 ms");
    }

    #[test]
    fn identifiers_are_distinct_and_sequences_increment() {
        let mut probe = ScriptedProbe::new([]);
        let mut out = Vec::new();
        run_session(&mut probe, DEST, &config(5), &mut out, &never()).unwrap();

        let mut ids = probe.ids.clone();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 5);
        assert_eq!(probe.seqs, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn mismatch_counts_as_lost() {
        let mut probe = ScriptedProbe::new([ProbeOutcome::IdentifierMismatch, success(5.0, 2)]);
        let mut out = Vec::new();
        let summary = run_session(&mut probe, DEST, &config(2), &mut out, &never()).unwrap();

        assert_eq!(summary.loss_percent(), 50.0);
        assert!(String::from_utf8(out)
            .unwrap()
            .starts_with("ID does not match request.\n"));
    }

    #[test]
    fn interrupt_stops_session_and_still_summarizes() {
        let (sender, receiver) = bounded(1);
        sender.send(()).unwrap();
        let mut probe = ScriptedProbe::new([]);
        let mut out = Vec::new();
        let summary = run_session(&mut probe, DEST, &config(10), &mut out, &receiver).unwrap();

        assert_eq!(summary.sent(), 0);
        assert_eq!(String::from_utf8(out).unwrap(), "0.00% packet loss\n");
    }
}
