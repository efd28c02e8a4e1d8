use std::io::{BufRead, Write};

use crate::error::{AppError, AppResult};

use super::protocol::{BridgeResponse, PROTOCOL_VERSION};

/// Newline-delimited JSON over any reader/writer pair (stdio in production).
pub struct NdjsonIo<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> NdjsonIo<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// `None` at end of input; blank lines come back as empty strings.
    pub fn read_line(&mut self) -> AppResult<Option<String>> {
        let mut line = String::new();
        let n = self.input.read_line(&mut line)?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    pub fn write_json_line<T: serde::Serialize>(&mut self, v: &T) -> AppResult<()> {
        serde_json::to_writer(&mut self.output, v)?;
        self.output.write_all(b"\n")?;
        self.output.flush()?;
        Ok(())
    }

    /// Reply to a line that could not be parsed as a request.
    pub fn protocol_error(&mut self, msg: String) -> AppResult<()> {
        let resp: BridgeResponse<()> =
            BridgeResponse::err(PROTOCOL_VERSION, String::new(), &AppError::InvalidRequest(msg));
        self.write_json_line(&resp)
    }

    #[cfg(test)]
    pub fn into_output(self) -> W {
        self.output
    }
}
