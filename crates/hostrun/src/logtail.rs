//! # Log Tail
//!
//! Runs the host's log command and broadcasts each line it prints.
//!
//! The optional clear command runs to completion first so clients only see
//! lines produced after the agent started. While the `LogToggle` is off, lines
//! are still read (the command keeps running) but are dropped, not buffered.

use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tokio::io::AsyncBufRead;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::dispatch::Dispatcher;

/// Process-wide switch for log streaming, shared by every session.
#[derive(Debug, Clone)]
pub struct LogToggle(Arc<AtomicBool>);

impl LogToggle {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::Relaxed);
    }
}

impl Default for LogToggle {
    fn default() -> Self {
        Self::new(true)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineStats {
    pub forwarded: usize,
    pub discarded: usize,
}

/// Broadcasts every line of `reader` until end of input.
pub async fn forward_lines<R>(reader: R, dispatcher: &Dispatcher, toggle: &LogToggle) -> io::Result<LineStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = LineStats::default();
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if toggle.is_enabled() {
            dispatcher.on_log_line(line).await;
            stats.forwarded += 1;
        } else {
            stats.discarded += 1;
        }
    }
    Ok(stats)
}

/// Handle to the background log reader. Dropping it leaves the task running.
pub struct LogTail {
    task: JoinHandle<()>,
}

impl LogTail {
    /// Spawns the reader. An empty `command` is rejected.
    pub fn start(
        command: &str,
        clear_command: Option<&str>,
        dispatcher: Arc<Dispatcher>,
        toggle: LogToggle,
    ) -> io::Result<Self> {
        let argv = split_command(command)?;
        let clear = clear_command.map(split_command).transpose()?;

        let task = tokio::spawn(async move {
            info!(command = ?argv, "log tail started");
            match run(argv, clear, &dispatcher, &toggle).await {
                Ok(stats) => info!(forwarded = stats.forwarded, discarded = stats.discarded, "log tail exited"),
                Err(e) => warn!(error = %e, "log tail failed"),
            }
        });
        Ok(Self { task })
    }

    /// Stops reading. The child process is killed with the task.
    pub fn stop(self) {
        self.task.abort();
    }
}

async fn run(
    argv: Vec<String>,
    clear: Option<Vec<String>>,
    dispatcher: &Dispatcher,
    toggle: &LogToggle,
) -> io::Result<LineStats> {
    if let Some(clear) = clear {
        match Command::new(&clear[0]).args(&clear[1..]).status().await {
            Ok(status) if status.success() => debug!("log buffer cleared"),
            Ok(status) => warn!(%status, "log clear command failed"),
            Err(e) => warn!(error = %e, "log clear command could not run"),
        }
    }

    let mut child = Command::new(&argv[0])
        .args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("log command has no stdout"))?;

    let stats = forward_lines(BufReader::new(stdout), dispatcher, toggle).await?;
    let status = child.wait().await?;
    debug!(%status, "log command exited");
    Ok(stats)
}

fn split_command(command: &str) -> io::Result<Vec<String>> {
    let argv: Vec<String> = command.split_whitespace().map(str::to_string).collect();
    if argv.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty log command"));
    }
    Ok(argv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_transport::RecordingTransport;
    use crate::tests::EchoProvider;
    use crate::registry::Registry;

    fn dispatcher() -> (Dispatcher, RecordingTransport) {
        let registry = Arc::new(Registry::new(Arc::new(EchoProvider::default())));
        let dispatcher = Dispatcher::new(registry);
        let transport = RecordingTransport::new();
        dispatcher.on_connect(Arc::new(transport.clone())).unwrap();
        (dispatcher, transport)
    }

    #[tokio::test]
    async fn test_lines_are_broadcast_in_order() {
        let (dispatcher, transport) = dispatcher();
        let input: &[u8] = b"first\nsecond\nthird\n";
        let stats = forward_lines(input, &dispatcher, &LogToggle::new(true)).await.unwrap();

        assert_eq!(stats, LineStats { forwarded: 3, discarded: 0 });
        let lines: Vec<String> = transport
            .frames()
            .iter()
            .map(|f| String::from_utf8(crate::framing::decompress(f).unwrap()).unwrap())
            .collect();
        assert_eq!(lines, vec!["event:first", "event:second", "event:third"]);
    }

    #[tokio::test]
    async fn test_disabled_toggle_discards() {
        let (dispatcher, transport) = dispatcher();
        let toggle = LogToggle::new(false);
        let input: &[u8] = b"a\nb\n";
        let stats = forward_lines(input, &dispatcher, &toggle).await.unwrap();

        assert_eq!(stats, LineStats { forwarded: 0, discarded: 2 });
        assert_eq!(transport.count(), 0);

        toggle.set(true);
        let input: &[u8] = b"c\n";
        forward_lines(input, &dispatcher, &toggle).await.unwrap();
        assert_eq!(transport.count(), 1);
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(split_command("   ").is_err());
        assert_eq!(split_command("logcat -v brief").unwrap(), vec!["logcat", "-v", "brief"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_real_command() {
        let (dispatcher, transport) = dispatcher();
        let stats = run(
            split_command("printf one\\ntwo\\n").unwrap(),
            Some(split_command("true").unwrap()),
            &dispatcher,
            &LogToggle::new(true),
        )
        .await
        .unwrap();
        assert_eq!(stats.forwarded, 2);
        assert_eq!(transport.count(), 2);
    }
}
