//! IPC server: line-framed sessions over stdin/stdout or a Unix socket.
//!
//! One s-expression per line in each direction.  Responses are written
//! first, followed by any events the message produced.  Socket clients
//! are served one at a time; while a client is idle the server ticks the
//! navigator so debounce and calibration timers keep running.

use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::{debug, error, info, warn};

use super::dispatch;
use crate::state::NavigatorState;

/// Maximum line length accepted from a client (1 MiB).
const MAX_MESSAGE_SIZE: usize = 1_048_576;

/// Rate limit window duration in seconds.
const RATE_LIMIT_WINDOW_SECS: u64 = 1;

/// Per-client rate limiter.
pub struct RateLimiter {
    window_start: Instant,
    message_count: u32,
    pub max_per_second: u32,
}

impl RateLimiter {
    pub fn new(max_per_second: u32) -> Self {
        Self {
            window_start: Instant::now(),
            message_count: 0,
            max_per_second,
        }
    }

    /// Check if a message is allowed.  Returns true if within rate limit.
    pub fn check(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.window_start);
        if elapsed.as_secs() >= RATE_LIMIT_WINDOW_SECS {
            // New window
            self.window_start = now;
            self.message_count = 1;
            true
        } else {
            self.message_count += 1;
            self.message_count <= self.max_per_second
        }
    }
}

/// Per-client protocol state.
pub struct ClientSession {
    pub id: u64,
    pub authenticated: bool,
    pub rate_limiter: RateLimiter,
}

impl ClientSession {
    pub fn new(id: u64, rate_limit: u32) -> Self {
        Self {
            id,
            authenticated: false,
            rate_limiter: RateLimiter::new(rate_limit),
        }
    }

    /// Handle one raw line.  Returns the lines to send back: the response
    /// (if any) followed by queued events.
    pub fn process_line(&mut self, state: &mut NavigatorState, line: &str) -> Vec<String> {
        let line = line.trim();
        if line.is_empty() {
            return Vec::new();
        }

        if !self.rate_limiter.check() {
            warn!(client_id = self.id, "rate limit exceeded, dropping message");
            return vec![
                "(:type :response :id 0 :status :error :reason \"rate limit exceeded\")"
                    .to_string(),
            ];
        }

        debug!(client_id = self.id, "<< {}", line);
        let mut out = Vec::new();
        if let Some(resp) = dispatch::handle_message(state, self, line) {
            debug!(client_id = self.id, ">> {}", resp);
            out.push(resp);
        }
        out.extend(drain_events(state, self));
        out
    }
}

/// Queued events as lines, dropped for unauthenticated clients.
fn drain_events(state: &mut NavigatorState, session: &ClientSession) -> Vec<String> {
    let events = state.take_events();
    if !session.authenticated {
        return Vec::new();
    }
    events.iter().map(|e| e.to_sexp()).collect()
}

fn write_lines<W: Write>(writer: &mut W, lines: &[String]) -> io::Result<()> {
    for line in lines {
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
    }
    writer.flush()
}

/// Run one line-framed session until EOF.
///
/// Read timeouts (`WouldBlock`/`TimedOut`) advance the navigator's timers
/// instead of ending the session, so a reader with a read timeout set
/// gets idle ticks.
pub fn run_session<R: BufRead, W: Write>(
    state: &mut NavigatorState,
    session: &mut ClientSession,
    reader: &mut R,
    writer: &mut W,
) -> io::Result<()> {
    let mut buf: Vec<u8> = Vec::with_capacity(4096);
    loop {
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => {
                if !buf.is_empty() {
                    let line = String::from_utf8_lossy(&buf).to_string();
                    let out = session.process_line(state, &line);
                    write_lines(writer, &out)?;
                }
                debug!(client_id = session.id, "session closed");
                return Ok(());
            }
            Ok(_) if buf.last() == Some(&b'\n') => {
                let line = String::from_utf8_lossy(&buf).to_string();
                buf.clear();
                let out = session.process_line(state, &line);
                write_lines(writer, &out)?;
            }
            Ok(_) => {}
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                let now = state.resolve_now(None);
                state.tick(now);
                let out = drain_events(state, session);
                write_lines(writer, &out)?;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }

        if buf.len() > MAX_MESSAGE_SIZE {
            error!(client_id = session.id, len = buf.len(), "message exceeds maximum size");
            buf.clear();
            write_lines(
                writer,
                &["(:type :response :id 0 :status :error :reason \"message too large\")"
                    .to_string()],
            )?;
        }
    }
}

/// Serve stdin/stdout as a single session.
pub fn serve_stdio(state: &mut NavigatorState) -> anyhow::Result<()> {
    info!("serving IPC on stdin/stdout");
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut session = ClientSession::new(1, state.config.ipc.rate_limit);
    run_session(state, &mut session, &mut stdin.lock(), &mut stdout.lock())
        .context("stdio session failed")
}

/// Compute the default socket path.
pub fn default_socket_path() -> PathBuf {
    std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join("deck-navigator.sock")
}

/// Bind `socket_path` and serve clients one at a time until the listener
/// fails.
pub fn serve_socket(state: &mut NavigatorState, socket_path: &Path) -> anyhow::Result<()> {
    // Remove stale socket
    if socket_path.exists() {
        std::fs::remove_file(socket_path)
            .with_context(|| format!("failed to remove stale socket {:?}", socket_path))?;
    }

    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("failed to bind {:?}", socket_path))?;

    // Set socket permissions to 0700
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o700))?;
    }

    info!(?socket_path, "IPC server listening");

    let tick = Duration::from_millis(state.config.ipc.tick_interval_ms.max(1));
    let mut next_client_id = 1;
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                error!("accept error: {}", e);
                continue;
            }
        };
        let client_id = next_client_id;
        next_client_id += 1;
        info!(client_id, "IPC client connected");

        if let Err(e) = serve_client(state, stream, client_id, tick) {
            debug!(client_id, "client disconnected: {}", e);
        }
        info!(client_id, "IPC client removed");
    }
    Ok(())
}

fn serve_client(
    state: &mut NavigatorState,
    stream: UnixStream,
    client_id: u64,
    tick: Duration,
) -> io::Result<()> {
    stream.set_read_timeout(Some(tick))?;
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);
    let mut session = ClientSession::new(client_id, state.config.ipc.rate_limit);
    run_session(state, &mut session, &mut reader, &mut writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::Read;

    use crate::config::NavigatorConfig;
    use crate::gesture::landmarks::make_frame;
    use crate::gesture::LandmarkFrame;
    use crate::store::MemoryStore;

    /// Serves byte chunks in order; a `None` chunk reads as a timeout, the
    /// way an idle socket with a read timeout does.
    struct StallingReader {
        chunks: VecDeque<Option<Vec<u8>>>,
        current: io::Cursor<Vec<u8>>,
    }

    impl StallingReader {
        fn new(chunks: Vec<Option<String>>) -> Self {
            Self {
                chunks: chunks.into_iter().map(|c| c.map(String::into_bytes)).collect(),
                current: io::Cursor::new(Vec::new()),
            }
        }
    }

    impl Read for StallingReader {
        fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
            let n = {
                let buf = self.fill_buf()?;
                let n = buf.len().min(out.len());
                out[..n].copy_from_slice(&buf[..n]);
                n
            };
            self.consume(n);
            Ok(n)
        }
    }

    impl BufRead for StallingReader {
        fn fill_buf(&mut self) -> io::Result<&[u8]> {
            if self.current.position() as usize >= self.current.get_ref().len() {
                match self.chunks.pop_front() {
                    Some(Some(bytes)) => self.current = io::Cursor::new(bytes),
                    Some(None) => return Err(io::ErrorKind::TimedOut.into()),
                    None => {}
                }
            }
            self.current.fill_buf()
        }

        fn consume(&mut self, amt: usize) {
            self.current.consume(amt);
        }
    }

    fn frame_line(frame: &LandmarkFrame, t: f64) -> String {
        let coords: Vec<String> = frame
            .points
            .iter()
            .map(|lm| match lm {
                Some(l) => format!("{} {} 0 {}", l.x, l.y, l.visibility.unwrap_or(1.0)),
                None => "nil nil nil nil".to_string(),
            })
            .collect();
        format!("(:type :frame :t {} :landmarks ({}))\n", t, coords.join(" "))
    }

    fn state() -> NavigatorState {
        NavigatorState::new(NavigatorConfig::default(), Box::new(MemoryStore::new()))
    }

    fn run(input: &str) -> Vec<String> {
        let mut state = state();
        let mut session = ClientSession::new(1, 200);
        let mut reader = io::Cursor::new(input.as_bytes().to_vec());
        let mut out = Vec::new();
        run_session(&mut state, &mut session, &mut reader, &mut out).unwrap();
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_idle_tick_stays_on_client_timeline() {
        let prev = make_frame((0.4, 0.4), (0.6, 0.4), (0.5, 0.45), (0.85, 0.41));
        let neutral = make_frame((0.4, 0.4), (0.6, 0.4), (0.5, 0.45), (0.5, 0.45));

        let mut first = String::from("(:type :hello :id 1 :version 1)\n");
        for i in 0..8 {
            first.push_str(&frame_line(&prev, i as f64 * 33.0));
        }
        let mut second = String::new();
        for i in 8..20 {
            second.push_str(&frame_line(&neutral, i as f64 * 33.0));
        }
        second.push_str("(:type :key :id 2 :action :next :t 1400)\n");

        let mut state = state();
        state.backdate_clock(2500);
        let mut session = ClientSession::new(1, 200);
        let mut reader = StallingReader::new(vec![Some(first), None, Some(second)]);
        let mut out = Vec::new();
        run_session(&mut state, &mut session, &mut reader, &mut out).unwrap();
        let lines: Vec<String> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect();

        let prev_event = lines
            .iter()
            .find(|l| l.contains(":event :action :action :prev"))
            .expect("prev dispatched");
        let stamp: f64 = prev_event
            .rsplit(":timestamp ")
            .next()
            .and_then(|s| s.trim_end_matches(')').parse().ok())
            .expect("timestamp");
        assert!(stamp < 1000.0, "prev dispatched at {} ms", stamp);
        assert!(
            lines.iter().any(|l| l.contains(":action :next :dispatched t")),
            "key refused after idle tick: {:?}",
            lines
        );
    }

    #[test]
    fn test_rate_limiter_within_limit() {
        let mut rl = RateLimiter::new(5);
        for _ in 0..5 {
            assert!(rl.check());
        }
        assert!(!rl.check());
    }

    #[test]
    fn test_session_responds_per_line() {
        let lines = run("(:type :hello :id 1 :version 1)\n\n(:type :status :id 2)\n");
        assert_eq!(lines.len(), 2, "{:?}", lines);
        assert!(lines[0].contains(":id 1 :status :ok"));
        assert!(lines[1].contains(":id 2 :status :ok"));
    }

    #[test]
    fn test_final_line_without_newline() {
        let lines = run("(:type :hello :id 1)\n(:type :config :id 2)");
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains(":cooldown-ms 1000"));
    }

    #[test]
    fn test_events_follow_response() {
        let lines = run("(:type :hello :id 1)\n(:type :key :id 2 :action :next :t 0)\n");
        assert_eq!(lines.len(), 3, "{:?}", lines);
        assert!(lines[1].contains(":type :response :id 2"));
        assert!(lines[2].contains(":type :event :event :action"));
    }

    #[test]
    fn test_events_withheld_before_hello() {
        let mut state = state();
        let mut session = ClientSession::new(1, 200);
        state.start_calibration(0.0);
        let out = session.process_line(&mut state, "(:type :status)");
        assert_eq!(out.len(), 1);
        assert!(out[0].contains(":status :error"));
        assert!(state.events.is_empty());
    }

    #[test]
    fn test_rate_limit_response() {
        let mut state = state();
        let mut session = ClientSession::new(1, 1);
        session.process_line(&mut state, "(:type :hello)");
        let out = session.process_line(&mut state, "(:type :status)");
        assert!(out[0].contains("rate limit exceeded"));
    }
}
