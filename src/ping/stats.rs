use std::io::{self, Write};

/// Running totals for one ping session.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ProbeSummary {
    sent: u32,
    received: u32,
    rtts: Vec<f64>,
}

impl ProbeSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&mut self) {
        self.sent += 1;
    }

    pub fn record_reply(&mut self, rtt_ms: f64) {
        self.received += 1;
        self.rtts.push(rtt_ms);
    }

    pub fn sent(&self) -> u32 {
        self.sent
    }

    pub fn received(&self) -> u32 {
        self.received
    }

    pub fn rtts(&self) -> &[f64] {
        &self.rtts
    }

    pub fn loss_percent(&self) -> f64 {
        if self.sent == 0 {
            return 0.0;
        }
        f64::from(self.sent - self.received) / f64::from(self.sent) * 100.0
    }

    pub fn min(&self) -> Option<f64> {
        self.rtts.iter().copied().reduce(f64::min)
    }

    pub fn max(&self) -> Option<f64> {
        self.rtts.iter().copied().reduce(f64::max)
    }

    pub fn avg(&self) -> Option<f64> {
        if self.rtts.is_empty() {
            return None;
        }
        Some(self.rtts.iter().sum::<f64>() / self.rtts.len() as f64)
    }

    /// Writes the end of session report. The rtt line is left out unless
    /// min, avg and max are all positive.
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "{:.2}% packet loss", self.loss_percent())?;

        let min = self.min().unwrap_or_default();
        let avg = self.avg().unwrap_or_default();
        let max = self.max().unwrap_or_default();
        if min > 0.0 && avg > 0.0 && max > 0.0 {
            writeln!(out, "rtt min/avg/max = {:.2}/{:.2}/{:.2} ms", min, avg, max)?;
        }
        Ok(())
    }
}
