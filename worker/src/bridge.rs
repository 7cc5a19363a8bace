//! Line-delimited JSON front end: one request per input line, one response or
//! progress message per output line.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use vitals_common::protocol::{Outbound, ProgressEnvelope, RequestEnvelope, ResponseEnvelope};

use crate::actor::WorkerHandle;

/// Decodes request lines, queues them on the worker and routes every answer
/// to one outbound channel.
pub struct Bridge {
    worker: WorkerHandle,
    out: mpsc::UnboundedSender<Outbound>,
}

impl Bridge {
    pub fn new(worker: WorkerHandle, out: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { worker, out }
    }

    /// Queue one request line. The response is sent once the worker answers;
    /// undecodable lines are answered right away when their id can be read.
    pub async fn handle_line(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        let decoded = RequestEnvelope::decode(line).and_then(|request| {
            let id = request.id;
            request.into_command().map(|command| (id, command))
        });
        let (id, command) = match decoded {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(error = %e, "rejected request");
                if let Some(id) = e.id() {
                    self.send(ResponseEnvelope::err(id, e.to_string()));
                }
                return;
            }
        };

        match self.worker.enqueue(id, command).await {
            Ok(pending) => {
                // Detached: the task ends once the reply is written to `out`.
                let out = self.out.clone();
                tokio::spawn(async move {
                    let response = match pending.wait().await {
                        Ok(reply) => ResponseEnvelope::ok(id, reply),
                        Err(e) => ResponseEnvelope::err(id, e.to_string()),
                    };
                    let _ = out.send(Outbound::Response(response));
                });
            }
            Err(e) => self.send(ResponseEnvelope::err(id, e.to_string())),
        }
    }

    fn send(&self, response: ResponseEnvelope) {
        if self.out.send(Outbound::Response(response)).is_err() {
            debug!("output closed, response dropped");
        }
    }
}

/// Copy progress notifications onto the outbound channel until either side closes.
pub fn forward_progress(
    mut progress: mpsc::UnboundedReceiver<ProgressEnvelope>,
    out: mpsc::UnboundedSender<Outbound>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(p) = progress.recv().await {
            if out.send(Outbound::Progress(p)).is_err() {
                break;
            }
        }
    })
}

/// Write each outbound message as one JSON line until every sender is dropped.
pub async fn write_lines<W>(
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    mut writer: W,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let mut line = message.encode();
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}
