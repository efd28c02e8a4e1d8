//! NDJSON request/response bridge for a front end driving the engine over stdio.

mod handler;
mod io;
mod protocol;

use std::io::{BufRead, BufReader, BufWriter, Write};

use crate::{cli::Args, error::AppResult};

use handler::BridgeHandler;
use io::NdjsonIo;
use protocol::BridgeRequest;

pub fn run(args: Args) -> AppResult<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| crate::error::AppError::Internal(e.to_string()))?;

    let handler = BridgeHandler::new(&args)?;
    tracing::info!(max_rows = args.max_rows, "bridge ready");
    let mut io = NdjsonIo::new(
        BufReader::new(std::io::stdin()),
        BufWriter::new(std::io::stdout()),
    );
    rt.block_on(serve(&handler, &mut io))
}

/// Answers one response line per request line until input ends.
async fn serve<R: BufRead, W: Write>(handler: &BridgeHandler, io: &mut NdjsonIo<R, W>) -> AppResult<()> {
    loop {
        let Some(line) = io.read_line()? else { break };
        if line.is_empty() {
            continue;
        }

        let req: BridgeRequest = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                // No id to echo back.
                io.protocol_error(e.to_string())?;
                continue;
            }
        };

        let resp = handler.handle(req).await;
        io.write_json_line(&resp)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Arc;

    use super::*;
    use crate::core::{registry::RegistrySettings, store::MetadataStore};

    #[tokio::test]
    async fn one_response_per_request_line() {
        let store = Arc::new(MetadataStore::open_in_memory().unwrap());
        let handler = BridgeHandler::from_parts(store, RegistrySettings::default());
        let input = concat!(
            "{\"v\":1,\"id\":\"a\",\"cmd\":\"connections.list\"}\n",
            "\n",
            "not json\n",
            "{\"v\":1,\"id\":\"b\",\"cmd\":\"schemas\",\"payload\":{\"id\":\"nope\"}}\n",
        );
        let mut io = NdjsonIo::new(Cursor::new(input), Vec::new());
        serve(&handler, &mut io).await.unwrap();

        let out = String::from_utf8(io.into_output()).unwrap();
        let lines: Vec<serde_json::Value> = out
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["id"], "a");
        assert_eq!(lines[0]["data"], serde_json::json!([]));
        assert_eq!(lines[1]["code"], "INVALID_REQUEST");
        assert_eq!(lines[2]["id"], "b");
        assert_eq!(lines[2]["code"], "NOT_CONNECTED");
    }
}
