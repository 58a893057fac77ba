//! Scripted transport that records every outbound request.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;

use crate::transport::{
    ByteStream, HttpTransport, StreamingResponse, TransportError, WireRequest, WireResponse,
};

enum Scripted {
    Reply(Result<WireResponse, TransportError>),
    Stream { status: u16, chunks: Vec<&'static str> },
}

#[derive(Default)]
pub(crate) struct SpyTransport {
    calls: AtomicUsize,
    requests: Mutex<Vec<WireRequest>>,
    script: Mutex<VecDeque<Scripted>>,
}

impl SpyTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, status: u16, body: &str) -> Self {
        self.script.lock().push_back(Scripted::Reply(Ok(WireResponse {
            status,
            body: body.to_string(),
        })));
        self
    }

    pub fn fail(self, error: TransportError) -> Self {
        self.script.lock().push_back(Scripted::Reply(Err(error)));
        self
    }

    pub fn stream(self, status: u16, chunks: Vec<&'static str>) -> Self {
        self.script
            .lock()
            .push_back(Scripted::Stream { status, chunks });
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<WireRequest> {
        self.requests.lock().last().cloned()
    }

    fn record(&self, request: WireRequest) -> Option<Scripted> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request);
        self.script.lock().pop_front()
    }
}

fn chunks_to_stream(chunks: Vec<&'static str>) -> ByteStream {
    futures::stream::iter(
        chunks
            .into_iter()
            .map(|c| Ok::<_, TransportError>(Bytes::from_static(c.as_bytes()))),
    )
    .boxed()
}

#[async_trait]
impl HttpTransport for SpyTransport {
    async fn execute(&self, request: WireRequest) -> Result<WireResponse, TransportError> {
        match self.record(request) {
            Some(Scripted::Reply(reply)) => reply,
            Some(Scripted::Stream { status, chunks }) => Ok(WireResponse {
                status,
                body: chunks.concat(),
            }),
            None => Err(TransportError::Other("no scripted response".into())),
        }
    }

    async fn execute_streaming(
        &self,
        request: WireRequest,
    ) -> Result<StreamingResponse, TransportError> {
        match self.record(request) {
            Some(Scripted::Stream { status, chunks }) => Ok(StreamingResponse {
                status,
                body: chunks_to_stream(chunks),
            }),
            Some(Scripted::Reply(Ok(resp))) => Ok(StreamingResponse {
                status: resp.status,
                body: futures::stream::once(async move { Ok(Bytes::from(resp.body)) }).boxed(),
            }),
            Some(Scripted::Reply(Err(e))) => Err(e),
            None => Err(TransportError::Other("no scripted response".into())),
        }
    }
}
