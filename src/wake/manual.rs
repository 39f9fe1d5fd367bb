//! Manual trigger fallback
//!
//! Used when the recognizer capability is unavailable: recording starts when
//! the operator presses Enter.

use std::io::{self, BufRead};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{TriggerEvent, TriggerSource};
use crate::{Error, Result};

/// Stdin-based trigger source
pub struct ManualTrigger;

#[async_trait]
impl TriggerSource for ManualTrigger {
    async fn wait_for_trigger(
        &self,
        cancel: CancellationToken,
    ) -> Result<Option<TriggerEvent>> {
        tracing::info!("press Enter to start recording");

        let mut wait = tokio::task::spawn_blocking(wait_for_enter);

        tokio::select! {
            () = cancel.cancelled() => {
                // A blocked stdin read cannot be interrupted; the worker
                // thread is left to finish on its own.
                Ok(None)
            }
            result = &mut wait => match result {
                Ok(Ok(())) => {
                    tracing::info!("manual trigger received");
                    Ok(Some(TriggerEvent::Manual))
                }
                Ok(Err(e)) => Err(Error::Io(e)),
                Err(e) => Err(Error::Recognizer(format!("manual trigger task panicked: {e}"))),
            }
        }
    }
}

fn wait_for_enter() -> io::Result<()> {
    let mut line = String::new();
    let bytes = io::stdin().lock().read_line(&mut line)?;
    if bytes == 0 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "stdin closed"));
    }
    Ok(())
}
