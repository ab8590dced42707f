//! Module that deals with connection and protocol related logic.
//!
//! A connection is created without any I/O and connects on its first
//! request, consuming the daemon's welcome banner. Each request writes one
//! command line and reads lines until the reply is complete. Any socket
//! error, timeout or premature EOF tears the socket down and is reported
//! as a failed [Reply]; nothing is retried, and the next request on the
//! same handle connects afresh.

use std::{
    future::Future,
    io::{self, ErrorKind, Read, Write},
    net::{Shutdown, TcpStream, ToSocketAddrs},
    os::unix::net::UnixStream,
    time::Duration,
};

use crate::{
    reader::READ_FRAME_SIZE, Command, Endpoint, LineReader, Outcome, Progress, Reply,
    ReplyBuilder, Result,
};

/// Size of the single read used to discard the welcome banner
const GREETING_SIZE: usize = 1024;

/// Something a command line can be sent to, returning the classified reply.
///
/// Implementations report transport problems as a failed [Reply] rather
/// than an error.
pub trait Transport {
    fn execute(&mut self, command: &str, blank_line_significant: bool) -> Reply;
}

/// Lines read so far for one request, and the reply they are building
struct Exchange {
    reader: LineReader,
    builder: ReplyBuilder,
}

impl Exchange {
    fn new(blank_line_significant: bool) -> Self {
        Exchange {
            reader: LineReader::new(),
            builder: ReplyBuilder::new(blank_line_significant),
        }
    }

    /// Feeds a frame, returning `true` once the reply is complete. Lines
    /// left over after completion are never looked at.
    fn consume(&mut self, frame: &[u8]) -> bool {
        self.reader.feed(frame);
        while let Some(line) = self.reader.next_line() {
            if self.builder.push(&line) == Progress::Complete {
                return true;
            }
        }
        false
    }

    /// The server closed the stream. A final unterminated line may still
    /// complete the reply, otherwise this is an error.
    fn end_of_stream(mut self) -> io::Result<Reply> {
        if let Some(line) = self.reader.finish() {
            if self.builder.push(&line) == Progress::Complete {
                return Ok(self.builder.finish());
            }
        }
        Err(io::Error::new(ErrorKind::UnexpectedEof, "premature EOF"))
    }

    /// Whether the daemon may still send output belonging to this request,
    /// which would be mistaken for the reply to the next one
    fn has_leftover(&self) -> bool {
        self.builder.ended_on_blank_line() || !self.reader.is_drained()
    }

    fn finish(self) -> Reply {
        self.builder.finish()
    }
}

fn request_line(command: &str) -> String {
    if command.ends_with('\n') {
        command.to_owned()
    } else {
        format!("{}\n", command)
    }
}

fn connection_problem(err: &io::Error) -> Reply {
    Reply::failure(format!("BIRD connection problem: {}", err))
}

enum SyncStream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl SyncStream {
    fn open(endpoint: &Endpoint, timeout: Duration) -> io::Result<Self> {
        match endpoint {
            Endpoint::Unix { path } => {
                let stream = UnixStream::connect(path)?;
                stream.set_read_timeout(Some(timeout))?;
                stream.set_write_timeout(Some(timeout))?;
                Ok(SyncStream::Unix(stream))
            }
            Endpoint::Tcp { host, port } => {
                let mut last_err = None;
                for addr in (host.as_str(), *port).to_socket_addrs()? {
                    match TcpStream::connect_timeout(&addr, timeout) {
                        Ok(stream) => {
                            stream.set_read_timeout(Some(timeout))?;
                            stream.set_write_timeout(Some(timeout))?;
                            return Ok(SyncStream::Tcp(stream));
                        }
                        Err(err) => last_err = Some(err),
                    }
                }
                Err(last_err.unwrap_or_else(|| {
                    io::Error::new(ErrorKind::NotFound, format!("{} did not resolve", host))
                }))
            }
        }
    }

    fn shutdown(&self) -> io::Result<()> {
        match self {
            SyncStream::Tcp(s) => s.shutdown(Shutdown::Both),
            SyncStream::Unix(s) => s.shutdown(Shutdown::Both),
        }
    }
}

impl Read for SyncStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            SyncStream::Tcp(s) => s.read(buf),
            SyncStream::Unix(s) => s.read(buf),
        }
    }
}

impl Write for SyncStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            SyncStream::Tcp(s) => s.write(buf),
            SyncStream::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            SyncStream::Tcp(s) => s.flush(),
            SyncStream::Unix(s) => s.flush(),
        }
    }
}

/// A blocking connection to the daemon. Requests are serial: each call to
/// [Transport::execute] returns only once the reply is complete or the
/// connection failed.
///
/// The socket is closed by [SyncConnection::close], on a transport failure,
/// or when the handle is dropped.
pub struct SyncConnection {
    endpoint: Endpoint,
    timeout: Duration,
    stream: Option<SyncStream>,
}

impl SyncConnection {
    pub(crate) fn new(endpoint: Endpoint, timeout: Duration) -> Self {
        SyncConnection {
            endpoint,
            timeout,
            stream: None,
        }
    }

    /// Opens the socket and discards the greeting. Does nothing if already
    /// connected.
    pub fn connect(&mut self) -> io::Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        log::debug!("conn: connecting to {}", self.endpoint);
        let mut stream = SyncStream::open(&self.endpoint, self.timeout)?;
        let mut greeting = [0_u8; GREETING_SIZE];
        let count = stream.read(&mut greeting)?;
        if count == 0 {
            return Err(io::Error::new(ErrorKind::UnexpectedEof, "no greeting"));
        }
        log::trace!(
            "conn: received greeting {}",
            String::from_utf8_lossy(&greeting[..count]).trim()
        );
        self.stream = Some(stream);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Closes the socket, if open
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            log::debug!("conn: closing connection to {}", self.endpoint);
            if let Err(err) = stream.shutdown() {
                log::trace!("conn: shutdown failed: {}", err);
            }
        }
    }

    /// Renders and executes `command`. A missing argument fails before
    /// anything is sent.
    pub fn run<C: Command>(
        &mut self,
        command: &C,
        args: &[(&str, &str)],
    ) -> Result<Outcome<C::Output>> {
        command.execute(self, args)
    }

    fn exchange(&mut self, command: &str, blank_line_significant: bool) -> io::Result<Reply> {
        self.connect()?;
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return Err(io::Error::new(ErrorKind::NotConnected, "not connected")),
        };

        log::trace!("conn: sending {:?}", command);
        stream.write_all(request_line(command).as_bytes())?;

        let mut exchange = Exchange::new(blank_line_significant);
        let mut frame = [0_u8; READ_FRAME_SIZE];
        loop {
            match stream.read(&mut frame) {
                Ok(0) => {
                    self.close();
                    return exchange.end_of_stream();
                }
                Ok(count) => {
                    if exchange.consume(&frame[..count]) {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }

        if exchange.has_leftover() {
            log::debug!("conn: reply to {:?} ended before the output did", command);
            self.close();
        }
        Ok(exchange.finish())
    }
}

impl Transport for SyncConnection {
    fn execute(&mut self, command: &str, blank_line_significant: bool) -> Reply {
        match self.exchange(command, blank_line_significant) {
            Ok(reply) => reply,
            Err(err) => {
                log::error!("conn: request {:?} failed: {}", command, err);
                self.close();
                connection_problem(&err)
            }
        }
    }
}

impl Drop for SyncConnection {
    fn drop(&mut self) {
        self.close();
    }
}

enum AsyncStream {
    Tcp(tokio::net::TcpStream),
    Unix(tokio::net::UnixStream),
}

impl AsyncStream {
    async fn open(endpoint: &Endpoint) -> io::Result<Self> {
        Ok(match endpoint {
            Endpoint::Unix { path } => AsyncStream::Unix(tokio::net::UnixStream::connect(path).await?),
            Endpoint::Tcp { host, port } => {
                AsyncStream::Tcp(tokio::net::TcpStream::connect((host.as_str(), *port)).await?)
            }
        })
    }

    async fn readable(&self) -> io::Result<()> {
        match self {
            AsyncStream::Tcp(s) => s.readable().await,
            AsyncStream::Unix(s) => s.readable().await,
        }
    }

    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            AsyncStream::Tcp(s) => s.try_read(buf),
            AsyncStream::Unix(s) => s.try_read(buf),
        }
    }

    async fn writable(&self) -> io::Result<()> {
        match self {
            AsyncStream::Tcp(s) => s.writable().await,
            AsyncStream::Unix(s) => s.writable().await,
        }
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        match self {
            AsyncStream::Tcp(s) => s.try_write(buf),
            AsyncStream::Unix(s) => s.try_write(buf),
        }
    }

    /// Reads whatever is available into `frame`, waiting until something is
    async fn read_frame(&self, frame: &mut [u8]) -> io::Result<usize> {
        loop {
            self.readable().await?;
            match self.try_read(frame) {
                Ok(count) => return Ok(count),
                Err(err) => {
                    if err.kind() != ErrorKind::WouldBlock {
                        return Err(err);
                    }
                }
            }
        }
    }

    /// Writes `data`, returning only after it has been written fully.
    async fn write_all(&self, data: &[u8]) -> io::Result<()> {
        let mut written_size = 0;
        while written_size < data.len() {
            self.writable().await?;
            match self.try_write(&data[written_size..]) {
                Ok(n) => written_size += n,
                Err(err) => {
                    if err.kind() != ErrorKind::WouldBlock {
                        return Err(err);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Runs `future`, failing with [ErrorKind::TimedOut] if it takes longer
/// than `timeout`
async fn within<T, F>(timeout: Duration, future: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(ErrorKind::TimedOut, "operation timed out")),
    }
}

/// The async flavour of [SyncConnection], for callers running on tokio.
///
/// The timeout applies separately to connecting, to each write and to each
/// read.
pub struct Connection {
    endpoint: Endpoint,
    timeout: Duration,
    stream: Option<AsyncStream>,
}

impl Connection {
    pub(crate) fn new(endpoint: Endpoint, timeout: Duration) -> Self {
        Connection {
            endpoint,
            timeout,
            stream: None,
        }
    }

    /// Opens the socket and discards the greeting. Does nothing if already
    /// connected.
    pub async fn connect(&mut self) -> io::Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        log::debug!("conn: connecting to {}", self.endpoint);
        let stream = within(self.timeout, AsyncStream::open(&self.endpoint)).await?;
        let mut greeting = [0_u8; GREETING_SIZE];
        let count = within(self.timeout, stream.read_frame(&mut greeting)).await?;
        if count == 0 {
            return Err(io::Error::new(ErrorKind::UnexpectedEof, "no greeting"));
        }
        log::trace!(
            "conn: received greeting {}",
            String::from_utf8_lossy(&greeting[..count]).trim()
        );
        self.stream = Some(stream);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Closes the socket, if open
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            log::debug!("conn: closing connection to {}", self.endpoint);
        }
    }

    /// Sends `command` and returns the classified reply. Transport failures
    /// close the connection and come back as a failed [Reply].
    pub async fn execute(&mut self, command: &str, blank_line_significant: bool) -> Reply {
        match self.exchange(command, blank_line_significant).await {
            Ok(reply) => reply,
            Err(err) => {
                log::error!("conn: request {:?} failed: {}", command, err);
                self.close();
                connection_problem(&err)
            }
        }
    }

    /// Renders and executes `command`. A missing argument fails before
    /// anything is sent.
    pub async fn run<C: Command>(
        &mut self,
        command: &C,
        args: &[(&str, &str)],
    ) -> Result<Outcome<C::Output>> {
        let request = command.render(args)?;
        log::debug!("cmd: executing {:?}", request);
        let reply = self
            .execute(&request, command.blank_line_significant())
            .await;
        Ok(command.finish(reply))
    }

    async fn exchange(&mut self, command: &str, blank_line_significant: bool) -> io::Result<Reply> {
        self.connect().await?;
        let stream = match self.stream.as_ref() {
            Some(stream) => stream,
            None => return Err(io::Error::new(ErrorKind::NotConnected, "not connected")),
        };

        log::trace!("conn: sending {:?}", command);
        within(self.timeout, stream.write_all(request_line(command).as_bytes())).await?;

        let mut exchange = Exchange::new(blank_line_significant);
        let mut frame = [0_u8; READ_FRAME_SIZE];
        loop {
            let count = within(self.timeout, stream.read_frame(&mut frame)).await?;
            if count == 0 {
                self.close();
                return exchange.end_of_stream();
            }
            if exchange.consume(&frame[..count]) {
                break;
            }
        }

        if exchange.has_leftover() {
            log::debug!("conn: reply to {:?} ended before the output did", command);
            self.close();
        }
        Ok(exchange.finish())
    }
}
