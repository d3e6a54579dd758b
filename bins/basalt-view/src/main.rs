//! Prints history from a live region without going through the service.
//!
//! ```bash
//! basalt-view /dev/shm/basalt_ohlcv                 # tickers and entry headers
//! basalt-view /dev/shm/basalt_ohlcv AAPL 20         # last 20 rows
//! basalt-view /dev/shm/basalt_ohlcv AAPL --since TS # rows newer than TS
//! ```

use anyhow::{Context, bail};
use basalt_store::RingStoreReader;
use std::io::Write;

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(path) = args.first() else {
        bail!("usage: basalt-view <region> [ticker] [n | --since <timestamp>]");
    };
    let reader = RingStoreReader::attach(path).with_context(|| format!("failed to attach to {path}"))?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    let Some(ticker) = args.get(1) else {
        for t in reader.tickers() {
            let meta = reader.entry_meta(t.as_str())?;
            writeln!(
                out,
                "{:<16} rows={:<8} epoch={:<8} last_update_ms={} writer_pid={}",
                t.as_str(),
                meta.write_cursor.min(meta.capacity),
                meta.epoch,
                meta.last_update_ms,
                meta.writer_pid
            )?;
        }
        return Ok(());
    };

    let rows = match (args.get(2).map(String::as_str), args.get(3)) {
        (Some("--since"), Some(ts)) => {
            let ts: u64 = ts.parse().with_context(|| format!("invalid timestamp '{ts}'"))?;
            reader.view_since(ticker, ts)?
        }
        (Some(n), None) => {
            let n: usize = n.parse().with_context(|| format!("invalid row count '{n}'"))?;
            reader.view_last_n(ticker, n)?
        }
        (None, _) => reader.view_last_n(ticker, reader.capacity() as usize)?,
        _ => bail!("usage: basalt-view <region> [ticker] [n | --since <timestamp>]"),
    };

    for row in rows {
        writeln!(out, "{}", serde_json::to_string(&row)?)?;
    }
    Ok(())
}
