//! Blocking read-eval-print loop over operator input.
//!
//! Lines arrive over a channel fed by a dedicated reader thread, because a
//! blocking stdin read would otherwise keep the runtime alive after Ctrl-C.

use std::future::Future;
use std::io::{self, BufRead};
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error};

use super::command::{is_confirmation, Command, HELP, PROMPT, RESTART_CONFIRMATION};
use super::device_controller::{CommandError, DeviceController};
use crate::mqtt::mqtt_handler::Transport;

/// Why the command loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Quit,
    EndOfInput,
    Interrupted,
}

/// Spawns a thread that forwards stdin lines until EOF or a read error.
pub fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
        debug!("Stdin reader finished");
    });
    rx
}

pub struct CommandInterpreter<T: Transport> {
    controller: Arc<DeviceController<T>>,
}

impl<T: Transport> CommandInterpreter<T> {
    pub fn new(controller: Arc<DeviceController<T>>) -> Self {
        Self { controller }
    }

    /// Runs until `quit`, end of input or `interrupt` completes.
    pub async fn run<W, I>(
        &self,
        input: &mut mpsc::Receiver<String>,
        output: &mut W,
        interrupt: I,
    ) -> io::Result<LoopExit>
    where
        W: AsyncWrite + Unpin,
        I: Future<Output = ()>,
    {
        tokio::pin!(interrupt);

        loop {
            write_out(output, PROMPT).await?;
            let line = tokio::select! {
                biased;
                _ = &mut interrupt => return Ok(LoopExit::Interrupted),
                line = input.recv() => line,
            };
            let Some(line) = line else {
                return Ok(LoopExit::EndOfInput);
            };

            let command = Command::parse(&line);
            debug!("Operator command {:?}", command);

            let response = match command {
                Command::LedOn => led_reply(true, self.controller.control_led(true)),
                Command::LedOff => led_reply(false, self.controller.control_led(false)),
                Command::Status => reply(
                    self.controller.request_status(),
                    "Requested device status",
                    "Failed to request status",
                ),
                Command::Restart => {
                    write_out(output, RESTART_CONFIRMATION).await?;
                    let answer = tokio::select! {
                        biased;
                        _ = &mut interrupt => return Ok(LoopExit::Interrupted),
                        answer = input.recv() => answer.unwrap_or_default(),
                    };
                    if is_confirmation(&answer) {
                        reply(
                            self.controller.restart_device(),
                            "Sent restart command",
                            "Failed to send restart command",
                        )
                    } else {
                        "Restart cancelled".to_string()
                    }
                }
                Command::Help => HELP.to_string(),
                Command::Quit => return Ok(LoopExit::Quit),
                Command::Unknown(text) => format!(
                    "Unknown command: '{}'. Type 'help' for available commands.",
                    text
                ),
            };

            write_out(output, &response).await?;
            write_out(output, "\n").await?;
        }
    }
}

fn led_reply(on: bool, result: Result<(), CommandError>) -> String {
    let action = if on { "ON" } else { "OFF" };
    reply(
        result,
        &format!("Sent LED command: {}", action),
        "Failed to send LED command",
    )
}

fn reply(result: Result<(), CommandError>, success: &str, failure: &str) -> String {
    match result {
        Ok(()) => success.to_string(),
        Err(CommandError::NotConnected) => CommandError::NotConnected.to_string(),
        Err(CommandError::Rejected(_)) => failure.to_string(),
    }
}

async fn write_out<W: AsyncWrite + Unpin>(output: &mut W, text: &str) -> io::Result<()> {
    output.write_all(text.as_bytes()).await?;
    output.flush().await
}
