//! Prints notifications as JSON lines.

use std::io::Write;

use serde::Serialize;
use tracing::*;
use txwatch_primitives::prelude::*;
use txwatch_tracker::TxStatusSink;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Settled,
    Done,
}

#[derive(Debug, Serialize)]
struct NotificationLine<'a> {
    kind: NotificationKind,
    txid: &'a TxId,
    state: &'a TxSettlement,
}

/// Writes one JSON object per notification.
pub struct JsonLineSink<W> {
    out: W,
    written: usize,
    write_errors: usize,
}

impl<W: Write> JsonLineSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            written: 0,
            write_errors: 0,
        }
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn write_errors(&self) -> usize {
        self.write_errors
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, kind: NotificationKind, txid: &TxId, state: &TxSettlement) {
        let line = NotificationLine { kind, txid, state };
        let res = serde_json::to_writer(&mut self.out, &line)
            .map_err(std::io::Error::from)
            .and_then(|_| writeln!(self.out));

        // The tracker can't do anything about it, so just log and move on.
        match res {
            Ok(()) => self.written += 1,
            Err(e) => {
                warn!(%txid, ?kind, err = %e, "failed to write notification");
                self.write_errors += 1;
            }
        }
    }
}

impl<W: Write> TxStatusSink for JsonLineSink<W> {
    fn on_tx_settled(&mut self, txid: &TxId, settlement: &TxSettlement) {
        self.emit(NotificationKind::Settled, txid, settlement);
    }

    fn on_tx_done(&mut self, txid: &TxId, settlement: &TxSettlement) {
        self.emit(NotificationKind::Done, txid, settlement);
    }
}
