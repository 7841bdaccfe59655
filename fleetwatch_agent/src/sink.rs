//! Subscriber that writes each delivered sample as one JSON line.

use std::io::{self, Write};
use std::sync::Mutex;

use fleetwatch::{Sample, Subscriber, SubscriberResult};

pub struct JsonLines<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLines<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl JsonLines<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> Subscriber for JsonLines<W> {
    fn on_sample(&self, sample: &Sample) -> SubscriberResult {
        let mut out = self.out.lock().map_err(|_| "output lock poisoned")?;
        serde_json::to_writer(&mut *out, sample)?;
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(())
    }
}
