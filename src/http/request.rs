use crate::{
    errors::*,
    http::{
        query::Query,
        types::{self, ContentType, Header, HeaderMap},
    },
    limits::{Bufferization, ReqLimits},
    server::connection::HttpConnection,
    ConnectionData, Handler, Method, Url, Version,
};
use memchr::{memchr, memchr_iter};
use std::{
    io, mem,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};
use tokio::{io::AsyncReadExt, net::TcpStream, time::sleep};

/// An owned or zero-copy request body.
///
/// `Content-Length` bodies are sliced directly out of the connection's read
/// buffer. Chunked bodies are reassembled into an owned buffer, since the
/// `chunk-size`/CRLF framing has to be stripped out as it is read, so they
/// can no longer point into the original wire bytes.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Body {
    Slice(&'static [u8]),
    Owned(Vec<u8>),
}

impl Body {
    #[inline(always)]
    fn as_bytes(&self) -> &[u8] {
        match self {
            Body::Slice(slice) => slice,
            Body::Owned(vec) => vec,
        }
    }
}

const UNKNOWN_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);

/// High-performance HTTP request representation.
///
/// Uses strategic memory alignment for optimal cache performance.
/// All data is zero-copy referenced from the original input, except a
/// reassembled chunked body (see [`Request::body`]).
#[derive(Debug, Clone, PartialEq)]
#[repr(align(128))]
pub struct Request {
    method: Method,
    url: Url,
    version: Version,
    headers: HeaderMap,
    content_type: Option<ContentType>,
    expects_100_continue: bool,
    body: Option<Body>,
    pub(crate) client_addr: SocketAddr,
    pub(crate) server_addr: SocketAddr,
}

impl Request {
    #[inline(always)]
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        Request {
            method: Method::Get,
            url: Url::new(limits),
            version: Version::Http11,
            headers: HeaderMap::new(limits.header_count),
            content_type: None,
            expects_100_continue: false,
            body: None,
            client_addr: UNKNOWN_ADDR,
            server_addr: UNKNOWN_ADDR,
        }
    }

    /// Resets everything a keep-alive connection re-parses between requests.
    /// `client_addr`/`server_addr` are connection-scoped, set once from
    /// `accept()`, and survive this.
    #[inline(always)]
    pub(crate) fn reset(&mut self) {
        self.method = Method::Get;
        self.url.clear();
        self.version = Version::Http11;
        self.headers.reset();
        self.content_type = None;
        self.expects_100_continue = false;
        self.body = None;
    }
}

// Public API
impl Request {
    #[inline(always)]
    pub const fn method(&self) -> Method {
        self.method
    }

    #[inline(always)]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    #[inline(always)]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Returns the first header value with case-insensitive name matching
    /// (per [RFC 7230](https://tools.ietf.org/html/rfc7230#section-3.2)).
    /// Uses linear search.
    ///
    /// # Arguments
    /// - `name`: Header name bytes (e.g., `b"content-type"`)
    #[inline(always)]
    pub fn header(&self, name: &[u8]) -> Option<&[u8]> {
        self.headers.get(name)
    }

    /// Returns the value of the `Content-Length` header if present.
    ///
    /// `None` for chunked bodies: their reassembled length is only known
    /// once the whole body has been read, so use [`Request::body`] instead.
    #[inline(always)]
    pub const fn content_length(&self) -> Option<usize> {
        self.headers.content_length
    }

    /// Returns the parsed `Content-Type` header, if present and well-formed.
    #[inline(always)]
    pub const fn content_type(&self) -> Option<&ContentType> {
        self.content_type.as_ref()
    }

    /// `true` if the client sent `Expect: 100-continue`.
    ///
    /// The connection loop answers with an interim `100 Continue` response
    /// before reading the body, so handlers never need to act on this
    /// directly; it is exposed for handlers that want to know whether the
    /// client held the body back waiting for one.
    #[inline(always)]
    pub const fn expects_100_continue(&self) -> bool {
        self.expects_100_continue
    }

    /// Returns the request body if present.
    ///
    /// With [`Bufferization::None`](crate::limits::Bufferization::None) this
    /// is always `Some(&[])`: the body bytes are handed to
    /// [`Hooks::on_body_chunk`](crate::Hooks::on_body_chunk) instead.
    #[inline(always)]
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_ref().map(Body::as_bytes)
    }

    /// The address of the remote peer for this connection.
    #[inline(always)]
    pub const fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    /// The local address the connection was accepted on.
    #[inline(always)]
    pub const fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }
}

/// Signals either "not enough bytes have arrived yet, read more and retry
/// from the start" or a real protocol error.
///
/// Kept separate from [`ErrorKind`] (the crate's wire-facing error type) so
/// adding this internal control-flow case never has to touch the exhaustive
/// `as_http` match there.
enum ParseSignal {
    Incomplete,
    Fatal(ErrorKind),
}

impl From<ErrorKind> for ParseSignal {
    #[inline(always)]
    fn from(err: ErrorKind) -> Self {
        ParseSignal::Fatal(err)
    }
}

impl From<crate::http::query::Error> for ParseSignal {
    #[inline(always)]
    fn from(err: crate::http::query::Error) -> Self {
        ParseSignal::Fatal(ErrorKind::from(err))
    }
}

type PResult<T> = Result<T, ParseSignal>;

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    /// Reads and parses a full request off `stream`, resuming across
    /// multiple socket reads as needed, and answers `Expect: 100-continue`
    /// once the head is known but before the body is read.
    #[inline]
    pub(crate) async fn read_request(&mut self, stream: &mut TcpStream) -> Result<(), ErrorKind> {
        let timeout = self.conn_limits.socket_read_timeout;

        loop {
            match self.parse_head() {
                Ok(()) => break,
                Err(ParseSignal::Incomplete) => self.read_more(stream, timeout).await?,
                Err(ParseSignal::Fatal(err)) => return Err(err),
            }
        }

        if self.request.expects_100_continue {
            self.conn_limits
                .write_bytes(stream, b"HTTP/1.1 100 Continue\r\n\r\n")
                .await?;
        }

        loop {
            match self.parse_body() {
                Ok(()) => break,
                Err(ParseSignal::Incomplete) => self.read_more(stream, timeout).await?,
                Err(ParseSignal::Fatal(err)) => return Err(err),
            }
        }

        self.response.version = self.request.version;
        Ok(())
    }

    #[inline]
    async fn read_more(&mut self, stream: &mut TcpStream, timeout: Duration) -> Result<(), ErrorKind> {
        if self.parser.fill_buffer(stream, timeout).await? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed mid-request",
            )
            .into());
        }
        Ok(())
    }
}

// Parse first line + headers
impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    fn parse_head(&mut self) -> PResult<()> {
        self.parser.restart_parse();
        self.request.reset();

        self.parse_method()?;
        self.parse_url()?;
        self.check_version()?;
        self.parse_headers()?;

        Ok(())
    }

    // Basic methods
    #[inline]
    fn parse_method(&mut self) -> PResult<()> {
        // "OPTIONS " - The longest possible method with a space (8 bytes)
        let slice = self.parser.get_slice(0, 8).required(ErrorKind::InvalidMethod)?;

        (self.request.method, self.parser.position) = Method::from_bytes(slice)?;
        Ok(())
    }

    #[inline]
    fn parse_url(&mut self) -> PResult<()> {
        let window = self.req_limits.url_size + 1;
        let posit = self
            .parser
            .find_char(window, b' ')
            .required(ErrorKind::UriTooLong)?;

        let target = self
            .parser
            .get_slice_static(self.parser.position, posit)
            .required(ErrorKind::InvalidUrl)?;

        if !target.starts_with(b"/") {
            return Err(ErrorKind::InvalidUrl.into());
        }

        let (path, query) = match memchr(b'?', target) {
            Some(q) => (&target[..q], Some(&target[q + 1..])),
            None => (target, None),
        };

        let url = &mut self.request.url;
        url.target = target;
        url.path = path;
        url.query = query;

        if let Some(query) = query {
            if query.len() > self.req_limits.url_query_size {
                return Err(ErrorKind::InvalidUrl.into());
            }
            if !query.is_empty() {
                Query::parse_into(&mut url.query_parts, query, self.req_limits.url_query_parts)?;
            }
        }

        let mut start = 0;
        for pos in memchr_iter(b'/', path) {
            if pos > start {
                if url.parts.len() == self.req_limits.url_parts {
                    return Err(ErrorKind::InvalidUrl.into());
                }
                url.parts.push(&path[start..pos]);
            }
            start = pos + 1;
        }
        if start < path.len() {
            if url.parts.len() == self.req_limits.url_parts {
                return Err(ErrorKind::InvalidUrl.into());
            }
            url.parts.push(&path[start..]);
        }

        self.parser.update_position(posit);

        Ok(())
    }

    #[inline]
    fn check_version(&mut self) -> PResult<()> {
        // "HTTP/1.X\r\n" - HTTP version with line break (10 bytes)
        let slice = self
            .parser
            .find_slice(10, b'\n', ErrorKind::InvalidVersion)?;

        if !matches!(slice.len(), 8 | 9) {
            return Err(ErrorKind::InvalidVersion.into());
        }

        // Check for the use of the '\r' character
        self.parser.has_crlf = slice.last() == Some(&b'\r');
        (self.request.version, self.response.keep_alive) = Version::from_bytes(&slice[..8])?;
        self.parser.update_position(slice.len());

        Ok(())
    }
}

// Parse headers
impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    // Basic methods
    #[inline]
    fn parse_headers(&mut self) -> PResult<()> {
        for _ in 0..=self.req_limits.header_count {
            let Some(header) = self.parse_header()? else {
                return Ok(());
            };

            if !self.parse_special_header(&header)? {
                self.request.headers.headers.push(header);
            }
        }

        Err(ErrorKind::TooManyHeaders.into())
    }

    #[inline]
    fn parse_header(&mut self) -> PResult<Option<Header>> {
        // HeaderName: Someone=data\r\n
        //                            |
        let end = self
            .parser
            .find_char(self.req_limits.precalc.h_line, b'\n')
            .required(ErrorKind::InvalidHeader)?;

        match self.parser.get_slice(self.parser.position + end - 1, 2) {
            Slice::Found([b'\r', b'\n']) if self.parser.has_crlf => {}
            Slice::Found([_, b'\n']) if !self.parser.has_crlf => {}
            Slice::Incomplete => return Err(ParseSignal::Incomplete),
            _ => return Err(ErrorKind::InvalidHeader.into()),
        }

        // HeaderName: Someone=data\r\n
        //           |
        let split = match self.parser.find_char(end, b':') {
            Scan::Found(split) => split,
            Scan::NotFound => {
                self.check_end_of_headers(end)?;
                return Ok(None);
            }
            Scan::Incomplete => return Err(ParseSignal::Incomplete),
        };

        if !matches!(
            self.parser.get_slice(self.parser.position + split, 2),
            Slice::Found(b": ")
        ) {
            return Err(ErrorKind::InvalidHeader.into());
        }

        let value_start = split + 2;
        let len_value = end - value_start - self.parser.has_crlf as usize;

        if split > self.req_limits.header_name_size || len_value > self.req_limits.header_value_size
        {
            return Err(ErrorKind::InvalidHeader.into());
        }

        let name = {
            let position = self.parser.position;
            let name = self.parser.get_slice_mut(position, split)?;

            if name.is_empty() {
                return Err(ErrorKind::InvalidHeader.into());
            }

            types::to_lower_case(name);
            unsafe { Parser::into_static(name) }
        };

        let value = self
            .parser
            .get_slice_static(self.parser.position + value_start, len_value)
            .required(ErrorKind::InvalidHeader)?;

        self.parser.update_position(end);

        Ok(Some(Header::new(name, value)))
    }

    #[inline]
    fn parse_special_header(&mut self, header: &Header) -> PResult<bool> {
        match header.name {
            b"content-length" => self.parse_content_length(header.value),
            b"connection" => self.parse_connection(header.value),
            b"transfer-encoding" => self.parse_transfer_encoding(header.value),
            b"content-type" => {
                self.request.content_type = Some(ContentType::parse(header.value));
                Ok(())
            }
            b"expect" => {
                self.request.expects_100_continue = header.value.eq_ignore_ascii_case(b"100-continue");
                Ok(())
            }
            _ => return Ok(false),
        }
        .map(|_| true)
        .map_err(ParseSignal::from)
    }

    // Auxiliary methods
    #[inline]
    fn check_end_of_headers(&mut self, end: usize) -> PResult<()> {
        let parser = &mut self.parser;
        // [\r, \n, \r, \n] or [x, x, \n, \n]
        let p_end = parser
            .get_slice(parser.position + end - 3, 4)
            .required(ErrorKind::InvalidHeader)?;

        if !match parser.has_crlf {
            true => p_end.ends_with(b"\r\n\r\n"),
            false => p_end.ends_with(b"\n\n"),
        } {
            return Err(ErrorKind::InvalidHeader.into());
        }

        parser.update_position(end);

        Ok(())
    }

    #[inline]
    fn parse_content_length(&mut self, value: &[u8]) -> Result<(), ErrorKind> {
        // `Transfer-Encoding: chunked` takes precedence; a Content-Length
        // arriving before or after it is silently ignored, never rejected.
        if self.request.headers.chunked {
            return Ok(());
        }

        let len = types::slice_to_usize(value).ok_or(ErrorKind::InvalidContentLength)?;
        if len > self.req_limits.body_size {
            return Err(ErrorKind::BodyTooLarge);
        }
        self.request.headers.content_length = Some(len);
        Ok(())
    }

    #[inline]
    fn parse_connection(&mut self, value: &[u8]) -> Result<(), ErrorKind> {
        let mut normalized = [0; 32];

        for token in value.split(|&b| b == b',') {
            let token = types::trim(token);
            if token.is_empty() {
                continue;
            }

            let len = types::into_lower_case(token, &mut normalized);
            match &normalized[..len] {
                b"keep-alive" => self.response.keep_alive = true,
                b"close" => self.response.keep_alive = false,
                // Other tokens (e.g. `Upgrade`) are recognized but not
                // currently acted upon; unknown tokens are ignored as well.
                _ => {}
            }
        }

        Ok(())
    }

    #[inline]
    fn parse_transfer_encoding(&mut self, value: &[u8]) -> Result<(), ErrorKind> {
        let mut normalized = [0; 16];
        let is_chunked = value.split(|&b| b == b',').any(|token| {
            let token = types::trim(token);
            let len = types::into_lower_case(token, &mut normalized);
            &normalized[..len] == b"chunked"
        });

        if !is_chunked {
            return Err(ErrorKind::InvalidChunkEncoding);
        }

        // Chunked takes precedence: drop any previously parsed Content-Length.
        self.request.headers.chunked = true;
        self.request.headers.content_length = None;
        Ok(())
    }
}

// Parse body
impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    fn parse_body(&mut self) -> PResult<()> {
        if self.request.headers.chunked {
            self.decode_chunked_body()
        } else {
            self.decode_fixed_body()
        }
    }

    #[inline]
    fn decode_fixed_body(&mut self) -> PResult<()> {
        let position = self.parser.position;
        let available = self.parser.len.saturating_sub(position);

        match self.request.headers.content_length {
            Some(0) | None if available == 0 => Ok(()),
            Some(len) => match self.parser.get_slice_static(position, len) {
                Slice::Found(slice) if available == len => {
                    self.store_body(slice);
                    Ok(())
                }
                Slice::Found(_) => Err(ParseSignal::Fatal(ErrorKind::BodyMismatch {
                    expected: len,
                    available,
                })),
                Slice::Incomplete => Err(ParseSignal::Incomplete),
            },
            None => Err(ErrorKind::UnexpectedBody(available).into()),
        }
    }

    #[inline]
    fn store_body(&mut self, slice: &'static [u8]) {
        self.request.body = Some(match self.req_limits.bufferization {
            Bufferization::None => {
                self.hooks.on_body_chunk(slice);
                Body::Slice(&[])
            }
            Bufferization::Auto | Bufferization::Full => Body::Slice(slice),
        });
    }

    /// Reassembles a `Transfer-Encoding: chunked` body, resuming across
    /// socket reads: confirmed chunks are appended to `self.request.body`
    /// directly (never into a local buffer) so a retry after
    /// [`ParseSignal::Incomplete`] never replays or loses already-read data.
    #[inline]
    fn decode_chunked_body(&mut self) -> PResult<()> {
        let streaming = self.req_limits.bufferization == Bufferization::None;

        loop {
            let size_line = self
                .parser
                .find_char(self.req_limits.precalc.h_line, b'\n')
                .required(ErrorKind::InvalidChunkEncoding)?;

            let line = self
                .parser
                .get_slice(self.parser.position, size_line)
                .required(ErrorKind::InvalidChunkEncoding)?;

            let hex = match memchr(b';', line) {
                Some(i) => &line[..i],
                None => line,
            };
            let hex = hex.strip_suffix(b"\r").unwrap_or(hex);
            let hex = std::str::from_utf8(hex)
                .map_err(|_| ErrorKind::InvalidChunkEncoding)?
                .trim();
            let size =
                usize::from_str_radix(hex, 16).map_err(|_| ErrorKind::InvalidChunkEncoding)?;

            if size > self.req_limits.max_chunk_length {
                return Err(ErrorKind::ChunkTooLarge.into());
            }

            let crlf_len = self.parser.has_crlf as usize;
            let data_start = self.parser.position + size_line + 1;

            if size == 0 {
                // Trailer section: zero or more header lines followed by a
                // blank line. Headers are appended to the request's header
                // list through the same path as the main header block.
                let trailer_end = self.parse_trailer(data_start)?;
                self.parser.position = trailer_end;

                if self.request.body.is_none() {
                    self.request.body = Some(Body::Owned(Vec::new()));
                }
                return Ok(());
            }

            let data = self
                .parser
                .get_slice(data_start, size)
                .required(ErrorKind::InvalidChunkEncoding)?;

            let buffered_len = match &self.request.body {
                Some(Body::Owned(v)) => v.len(),
                _ => 0,
            };
            if buffered_len + size > self.req_limits.body_size {
                return Err(ErrorKind::BodyTooLarge.into());
            }

            // Confirm the trailing CRLF (or LF) after the chunk data is fully
            // buffered before committing it, so a short read can't cause the
            // same chunk to be appended twice on retry.
            match self.parser.get_slice(data_start + size, 1 + crlf_len) {
                Slice::Found(term) if term.last() == Some(&b'\n') => {}
                Slice::Found(_) => return Err(ErrorKind::InvalidChunkEncoding.into()),
                Slice::Incomplete => return Err(ParseSignal::Incomplete),
            }

            if streaming {
                self.hooks.on_body_chunk(data);
            } else {
                match self
                    .request
                    .body
                    .get_or_insert_with(|| Body::Owned(Vec::new()))
                {
                    Body::Owned(buf) => buf.extend_from_slice(data),
                    Body::Slice(_) => unreachable!("chunked body is always owned"),
                }
            }

            self.parser.position = data_start + size + crlf_len;
            self.parser.update_position(0);
        }
    }

    /// Parses the trailer section following the final zero-size chunk line,
    /// returning the position right after the terminating blank line.
    ///
    /// Runs in two passes so a retry after [`ParseSignal::Incomplete`] never
    /// partially applies a trailer line: pass one walks every line up to and
    /// including the blank line using only local positions, confirming the
    /// whole section is buffered before anything is mutated; pass two
    /// re-walks the now-confirmed range and pushes each header.
    #[inline]
    fn parse_trailer(&mut self, start: usize) -> PResult<usize> {
        let mut pos = start;
        loop {
            let end = self
                .parser
                .find_char_from(pos, self.req_limits.precalc.h_line, b'\n')
                .required(ErrorKind::InvalidChunkEncoding)?;

            let line = self
                .parser
                .get_slice(pos, end)
                .required(ErrorKind::InvalidChunkEncoding)?;

            pos += end + 1;

            let blank = match self.parser.has_crlf {
                true => line == b"\r",
                false => line.is_empty(),
            };
            if blank {
                break;
            }
        }
        let trailer_end = pos;

        let mut pos = start;
        loop {
            let end = self
                .parser
                .find_char_from(pos, self.req_limits.precalc.h_line, b'\n')
                .required(ErrorKind::InvalidChunkEncoding)?;

            let line = self
                .parser
                .get_slice(pos, end)
                .required(ErrorKind::InvalidChunkEncoding)?;

            let blank = match self.parser.has_crlf {
                true => line == b"\r",
                false => line.is_empty(),
            };
            if blank {
                break;
            }

            if self.request.headers.headers.len() >= self.req_limits.header_count {
                return Err(ErrorKind::TooManyHeaders.into());
            }

            let split = memchr(b':', line).ok_or(ErrorKind::InvalidChunkEncoding)?;
            if !matches!(self.parser.get_slice(pos + split, 2), Slice::Found(b": ")) {
                return Err(ErrorKind::InvalidChunkEncoding.into());
            }

            let value_start = split + 2;
            let len_value = end - value_start - self.parser.has_crlf as usize;

            if split > self.req_limits.header_name_size
                || len_value > self.req_limits.header_value_size
            {
                return Err(ErrorKind::InvalidChunkEncoding.into());
            }

            let name = {
                let name = self.parser.get_slice_mut(pos, split)?;
                if name.is_empty() {
                    return Err(ErrorKind::InvalidChunkEncoding.into());
                }
                types::to_lower_case(name);
                unsafe { Parser::into_static(name) }
            };

            let value = self
                .parser
                .get_slice_static(pos + value_start, len_value)
                .required(ErrorKind::InvalidChunkEncoding)?;

            self.request.headers.headers.push(Header::new(name, value));

            pos += end + 1;
        }

        Ok(trailer_end)
    }
}

//

#[derive(Debug, Clone, PartialEq)]
#[repr(align(64))]
pub(crate) struct Parser {
    position: usize,
    len: usize,
    has_crlf: bool,
    buffer: Box<[u8]>,
}

/// The result of bounding a slice request against the bytes actually read
/// so far (`len`), rather than the fixed buffer capacity.
enum Slice<'a> {
    Found(&'a [u8]),
    Incomplete,
}

impl<'a> Slice<'a> {
    #[inline(always)]
    fn required(self, err: ErrorKind) -> PResult<&'a [u8]> {
        match self {
            Slice::Found(s) => Ok(s),
            Slice::Incomplete => {
                let _ = &err;
                Err(ParseSignal::Incomplete)
            }
        }
    }
}

/// The result of scanning for a delimiter within the next `step` bytes.
enum Scan {
    Found(usize),
    NotFound,
    Incomplete,
}

impl Scan {
    #[inline(always)]
    fn required(self, err: ErrorKind) -> PResult<usize> {
        match self {
            Scan::Found(pos) => Ok(pos),
            Scan::NotFound => Err(ParseSignal::Fatal(err)),
            Scan::Incomplete => Err(ParseSignal::Incomplete),
        }
    }
}

impl Parser {
    #[inline(always)]
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        let buffer = vec![0; limits.precalc.buffer].into_boxed_slice();

        Parser {
            position: 0,
            len: 0,
            has_crlf: false,
            buffer,
        }
    }

    #[cfg(test)]
    pub(crate) fn from<V: AsRef<[u8]>>(limits: &ReqLimits, value: V) -> Self {
        let mut buffer = vec![0; limits.precalc.buffer];

        let value = value.as_ref();
        buffer[0..value.len()].copy_from_slice(value);

        Parser {
            position: 0,
            len: value.len(),
            has_crlf: false,
            buffer: buffer.into_boxed_slice(),
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.position = 0;
        self.len = 0;
        self.has_crlf = false;
        self.buffer.fill(0);
    }

    /// Rewinds the parse cursor to retry the request head from scratch after
    /// [`ParseSignal::Incomplete`], without discarding bytes already read
    /// into the buffer (those stay, and more are appended behind them).
    #[inline]
    fn restart_parse(&mut self) {
        self.position = 0;
        self.has_crlf = false;
    }
}

// Work with Buffer
impl Parser {
    // Reading level
    #[inline]
    pub(crate) async fn fill_buffer(
        &mut self,
        stream: &mut TcpStream,
        time: Duration,
    ) -> Result<usize, io::Error> {
        if self.len >= self.buffer.len() {
            return Err(io::Error::new(
                io::ErrorKind::OutOfMemory,
                "request exceeds the configured buffer capacity",
            ));
        }

        tokio::select! {
            biased;

            read_result = stream.read(&mut self.buffer[self.len..]) => {
                let n = read_result?;
                self.len += n;
                Ok(n)
            }
            _ = sleep(time) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "read timeout"))
            },
        }
    }

    // Search level
    #[inline]
    fn find_slice(&self, limit: usize, delimiter: u8, err: ErrorKind) -> PResult<&[u8]> {
        let window = match self.get_slice(self.position, limit) {
            Slice::Found(window) => window,
            Slice::Incomplete => return Err(ParseSignal::Incomplete),
        };

        match memchr(delimiter, window) {
            Some(pos) => Ok(&window[..pos]),
            None => Err(ParseSignal::Fatal(err)),
        }
    }

    #[inline]
    fn find_char(&self, step: usize, delimiter: u8) -> Scan {
        self.find_char_from(self.position, step, delimiter)
    }

    #[inline]
    fn find_char_from(&self, start: usize, step: usize, delimiter: u8) -> Scan {
        match self.get_slice(start, step) {
            Slice::Found(slice) => match memchr(delimiter, slice) {
                Some(pos) => Scan::Found(pos),
                None => Scan::NotFound,
            },
            Slice::Incomplete => Scan::Incomplete,
        }
    }

    // Low level
    #[inline(always)]
    fn get_slice(&self, start: usize, step: usize) -> Slice<'_> {
        let end = start + step;
        if end <= self.len {
            Slice::Found(&self.buffer[start..end])
        } else {
            Slice::Incomplete
        }
    }

    #[inline(always)]
    fn get_slice_mut(&mut self, start: usize, step: usize) -> PResult<&mut [u8]> {
        let end = start + step;
        if end <= self.len {
            Ok(&mut self.buffer[start..end])
        } else {
            Err(ParseSignal::Incomplete)
        }
    }

    #[inline(always)]
    fn update_position(&mut self, step: usize) -> usize {
        let old = self.position;
        self.position += step + 1;
        old
    }

    // Unsafe level
    #[inline(always)]
    fn get_slice_static(&self, start: usize, step: usize) -> Slice<'static> {
        match self.get_slice(start, step) {
            Slice::Found(value) => Slice::Found(unsafe { Self::into_static(value) }),
            Slice::Incomplete => Slice::Incomplete,
        }
    }

    #[inline(always)]
    // SAFETY: into_static creates "temporary" references for tokio integration,
    // which become invalid after Request cleanup.
    // Parser: 'static (lives for entire program lifetime), buffer cleared via .fill(0).
    // Memory remains valid even if user holds references.
    const unsafe fn into_static(src: &[u8]) -> &'static [u8] {
        // Second `unsafe` for integration with the 2024 edition
        unsafe { mem::transmute(src) }
    }
}

#[cfg(test)]
mod header_edge_cases {
    use super::*;
    use crate::server::connection::HttpConnection;

    fn parse(raw: &'static str) -> Request {
        let mut conn = HttpConnection::from_req(raw);
        conn.parse_head().expect("head should parse");
        conn.parse_body().expect("body should parse");
        conn.request
    }

    fn parse_keep_alive(raw: &'static str) -> bool {
        let mut conn = HttpConnection::from_req(raw);
        conn.parse_head().expect("head should parse");
        conn.parse_body().expect("body should parse");
        conn.response.keep_alive
    }

    #[test]
    fn connection_keeps_alive_among_other_tokens() {
        assert!(parse_keep_alive(
            "GET / HTTP/1.1\r\nConnection: keep-alive, Upgrade\r\n\r\n"
        ));
    }

    #[test]
    fn connection_close_among_other_tokens() {
        assert!(!parse_keep_alive(
            "GET / HTTP/1.1\r\nConnection: Upgrade, close\r\n\r\n"
        ));
    }

    #[test]
    fn connection_bare_upgrade_is_not_rejected() {
        // An unrecognized-but-valid token must not error out.
        let _ = parse("GET / HTTP/1.1\r\nConnection: Upgrade\r\n\r\n");
    }

    #[test]
    fn transfer_encoding_accepts_token_list() {
        let req = parse(
            "GET / HTTP/1.1\r\nTransfer-Encoding: identity, chunked\r\nContent-Length: 100\r\n\r\n0\r\n\r\n",
        );
        assert!(req.headers.chunked);
        // Chunked wins regardless of header order: Content-Length is dropped.
        assert_eq!(req.headers.content_length, None);
    }

    #[test]
    fn content_length_ignored_when_chunked_declared_first() {
        let req = parse(
            "GET / HTTP/1.1\r\nContent-Length: 100\r\nTransfer-Encoding: chunked\r\n\r\n0\r\n\r\n",
        );
        assert!(req.headers.chunked);
        assert_eq!(req.headers.content_length, None);
    }

    #[test]
    fn trailer_headers_are_appended() {
        let req = parse(
            "GET / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n0\r\nX-Trace: abc\r\n\r\n",
        );
        assert_eq!(req.body(), Some(&b"Wiki"[..]));
        assert_eq!(req.headers.get(b"x-trace"), Some(&b"abc"[..]));
    }

    #[test]
    fn trailer_section_without_headers_still_terminates() {
        let req = parse("GET / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n0\r\n\r\n");
        assert_eq!(req.body(), Some(&[][..]));
    }
}

#[cfg(test)]
mod request_self {
    use super::*;
    use crate::{http::types::Method, limits::ReqLimits};

    #[test]
    fn reset() {
        let limits = ReqLimits::default().precalculate();
        let mut req = Request::new(&limits);

        req.method = Method::Post;
        req.url.parts.push(b"a");
        req.headers.content_length = Some(5);
        req.content_type = Some(ContentType::parse(b"text/plain"));
        req.expects_100_continue = true;
        req.body = Some(Body::Slice(b"hello"));
        req.client_addr = "127.0.0.1:9000".parse().unwrap();

        req.reset();

        assert_eq!(req.method, Method::Get);
        assert!(req.url.parts.is_empty());
        assert_eq!(req.headers.content_length, None);
        assert!(req.content_type.is_none());
        assert!(!req.expects_100_continue);
        assert!(req.body.is_none());
        // connection-scoped fields are untouched by reset
        assert_eq!(req.client_addr, "127.0.0.1:9000".parse().unwrap());
    }

    #[test]
    fn content_type_accessor() {
        let limits = ReqLimits::default().precalculate();
        let mut req = Request::new(&limits);
        req.content_type = Some(ContentType::parse(b"application/json; charset=utf-8"));

        let ct = req.content_type().unwrap();
        assert_eq!(ct.media_type(), b"application/json");
        assert_eq!(ct.charset(), Some(&b"utf-8"[..]));
    }

    #[test]
    fn body_empty_slice_when_streaming() {
        let limits = ReqLimits::default().precalculate();
        let mut req = Request::new(&limits);
        req.body = Some(Body::Slice(&[]));
        assert_eq!(req.body(), Some(&[][..]));
    }
}

#[cfg(test)]
mod parser {
    use super::*;

    fn make(limits: &ReqLimits, data: &str) -> Parser {
        Parser::from(limits, data.as_bytes())
    }

    #[test]
    fn get_slice_bounds_against_len_not_capacity() {
        let limits = ReqLimits::default().precalculate();
        let parser = make(&limits, "GET");

        assert!(matches!(parser.get_slice(0, 3), Slice::Found(b"GET")));
        // buffer capacity is far larger than 3 bytes read; this must signal
        // Incomplete, not return zero-padded bytes.
        assert!(matches!(parser.get_slice(0, 4), Slice::Incomplete));
    }

    #[test]
    fn find_char_incomplete_vs_not_found() {
        let limits = ReqLimits::default().precalculate();
        let parser = make(&limits, "GET /x HTTP/1.1");

        match parser.find_char(parser.len, b' ') {
            Scan::Found(3) => {}
            _ => panic!("expected delimiter at position 3"),
        }

        // Requesting a window past what's been read: Incomplete.
        assert!(matches!(
            parser.find_char(parser.len + 10, b'\n'),
            Scan::Incomplete
        ));
    }

    #[test]
    fn find_char_not_found_within_full_window() {
        let limits = ReqLimits::default().precalculate();
        let parser = make(&limits, "no-space-here");

        assert!(matches!(parser.find_char(parser.len, b' '), Scan::NotFound));
    }

    #[test]
    fn fill_buffer_appends_across_calls() {
        let limits = ReqLimits::default().precalculate();
        let mut parser = Parser::new(&limits);
        parser.len = 3;
        parser.buffer[0..3].copy_from_slice(b"GET");

        // Simulate what a second `fill_buffer` call would do: append, not
        // overwrite, and grow `len` accordingly.
        parser.buffer[3..8].copy_from_slice(b" /foo");
        parser.len += 5;

        assert!(matches!(parser.get_slice(0, 8), Slice::Found(b"GET /foo")));
    }

    #[test]
    fn restart_parse_keeps_buffer() {
        let limits = ReqLimits::default().precalculate();
        let mut parser = make(&limits, "GET / HTTP/1.1");
        parser.position = 5;
        parser.has_crlf = true;

        parser.restart_parse();

        assert_eq!(parser.position, 0);
        assert!(!parser.has_crlf);
        assert!(matches!(parser.get_slice(0, 3), Slice::Found(b"GET")));
    }

    #[test]
    fn into_static_roundtrip() {
        let owned = vec![1u8, 2, 3];
        let borrowed: &[u8] = &owned;
        let long: &'static [u8] = unsafe { Parser::into_static(borrowed) };
        assert_eq!(long, &[1, 2, 3]);
    }
}
