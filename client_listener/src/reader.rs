use crate::ServeError;

use bytes::{Bytes, BytesMut};
use strand_network::{
    http::{FramingError, HttpError, RequestHead},
    Socket, SocketError,
};

/// Fixed-size read buffer for one client connection.
///
/// Bytes past the end of one request stay buffered and are parsed as the
/// start of the next, so pipelined requests are served in order.
pub struct RequestReader
{
    buf: Box<[u8]>,
    start: usize,
    end: usize,
}

impl RequestReader
{
    pub fn new(size: usize) -> Self
    {
        Self {
            buf: vec![0; size.max(1)].into_boxed_slice(),
            start: 0,
            end: 0,
        }
    }

    /// Bytes read from the socket but not yet parsed
    pub fn unparsed(&self) -> &[u8]
    {
        &self.buf[self.start..self.end]
    }

    pub fn has_unparsed(&self) -> bool
    {
        self.end > self.start
    }

    fn consume(&mut self, n: usize)
    {
        self.start += n;
        if self.start == self.end
        {
            self.start = 0;
            self.end = 0;
        }
    }

    fn compact(&mut self)
    {
        if self.start > 0
        {
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
    }

    async fn fill(&mut self, sock: &Socket) -> Result<usize, SocketError>
    {
        if self.end == self.buf.len()
        {
            self.compact();
        }
        let n = sock.read(&mut self.buf[self.end..]).await?;
        self.end += n;
        Ok(n)
    }

    /// Read until a complete request head is buffered, and parse it.
    pub async fn read_head(&mut self, sock: &Socket) -> Result<RequestHead, ServeError>
    {
        loop
        {
            if let Some(head) = RequestHead::parse(self.unparsed()).map_err(HttpError::from)?
            {
                self.consume(head.head_len);
                return Ok(head);
            }

            if self.start == 0 && self.end == self.buf.len()
            {
                return Err(HttpError::from(FramingError::HeadTooLarge(self.buf.len())).into());
            }

            self.fill(sock).await?;
        }
    }

    /// Read exactly `len` bytes of request content, taking what's already
    /// buffered first. Nothing past the content is consumed.
    pub async fn read_content(&mut self, sock: &Socket, len: usize) -> Result<Bytes, ServeError>
    {
        let mut content = BytesMut::with_capacity(len);

        while content.len() < len
        {
            if !self.has_unparsed()
            {
                self.fill(sock).await?;
            }

            let take = (len - content.len()).min(self.end - self.start);
            content.extend_from_slice(&self.buf[self.start..self.start + take]);
            self.consume(take);
        }

        Ok(content.freeze())
    }
}
