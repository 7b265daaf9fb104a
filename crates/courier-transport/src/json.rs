//! JSON envelope readers and writers over any async byte stream.

use std::fmt;
use std::sync::Arc;

use courier_protocol::{Codec, JsonCodec, Message, MessageRegistry};
use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::frame::{read_frame, write_frame};
use crate::{BoxedRead, BoxedWrite, MessageIoFactory, MessageReader, MessageWriter, TransportError};

/// Reads framed JSON envelopes and decodes them into `M`.
pub struct JsonMessageReader<R, M> {
    stream: Option<R>,
    codec: JsonCodec<M>,
}

impl<R, M> JsonMessageReader<R, M>
where
    R: AsyncRead + Send + Unpin + 'static,
    M: Message,
{
    pub fn new(stream: R, codec: JsonCodec<M>) -> Self {
        Self {
            stream: Some(stream),
            codec,
        }
    }
}

impl<R, M> MessageReader<M> for JsonMessageReader<R, M>
where
    R: AsyncRead + Send + Unpin + 'static,
    M: Message,
{
    fn read(&mut self) -> BoxFuture<'_, Result<M, TransportError>> {
        Box::pin(async move {
            let stream = self
                .stream
                .as_mut()
                .ok_or_else(|| TransportError::ConnectionClosed("reader closed".into()))?;
            let text = read_frame(stream).await?;
            let message = self.codec.decode(text.as_bytes())?;
            Ok(message)
        })
    }

    fn close(&mut self) -> Result<(), TransportError> {
        // Dropping the stream half releases the socket.
        self.stream.take();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.stream.is_none()
    }
}

/// Encodes `M` into JSON envelopes and writes them as frames.
pub struct JsonMessageWriter<W, M> {
    stream: Option<W>,
    codec: JsonCodec<M>,
}

impl<W, M> JsonMessageWriter<W, M>
where
    W: AsyncWrite + Send + Unpin + 'static,
    M: Message,
{
    pub fn new(stream: W, codec: JsonCodec<M>) -> Self {
        Self {
            stream: Some(stream),
            codec,
        }
    }
}

impl<W, M> MessageWriter<M> for JsonMessageWriter<W, M>
where
    W: AsyncWrite + Send + Unpin + 'static,
    M: Message,
{
    fn write(&mut self, message: &M) -> BoxFuture<'_, Result<(), TransportError>> {
        // Encode before building the future so it doesn't borrow `message`.
        let encoded = self
            .codec
            .encode(message)
            .map_err(TransportError::from)
            .and_then(|bytes| {
                String::from_utf8(bytes).map_err(|e| TransportError::MalformedFrame(e.to_string()))
            });

        Box::pin(async move {
            let text = encoded?;
            let stream = self
                .stream
                .as_mut()
                .ok_or_else(|| TransportError::ConnectionClosed("writer closed".into()))?;
            write_frame(stream, &text).await
        })
    }

    fn close(&mut self) -> Result<(), TransportError> {
        // Every write flushes, so there is nothing buffered to lose here.
        self.stream.take();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.stream.is_none()
    }
}

/// Builds JSON readers and writers sharing one message registry.
pub struct JsonMessageIoFactory<M> {
    codec: JsonCodec<M>,
}

impl<M: Message> JsonMessageIoFactory<M> {
    pub fn new(registry: Arc<MessageRegistry<M>>) -> Self {
        Self {
            codec: JsonCodec::new(registry),
        }
    }

    pub fn codec(&self) -> &JsonCodec<M> {
        &self.codec
    }
}

impl<M> Clone for JsonMessageIoFactory<M> {
    fn clone(&self) -> Self {
        Self {
            codec: self.codec.clone(),
        }
    }
}

impl<M> fmt::Debug for JsonMessageIoFactory<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonMessageIoFactory")
            .field("codec", &self.codec)
            .finish()
    }
}

impl<M: Message> MessageIoFactory<M> for JsonMessageIoFactory<M> {
    fn create_reader(&self, stream: BoxedRead) -> Box<dyn MessageReader<M>> {
        Box::new(JsonMessageReader::new(stream, self.codec.clone()))
    }

    fn create_writer(&self, stream: BoxedWrite) -> Box<dyn MessageWriter<M>> {
        Box::new(JsonMessageWriter::new(stream, self.codec.clone()))
    }
}
