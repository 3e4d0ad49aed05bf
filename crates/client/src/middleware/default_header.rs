use async_trait::async_trait;
use http::{HeaderName, HeaderValue, Request, Response};

use crate::body::{RequestBody, ResponseBody};
use crate::error::ClientError;
use crate::middleware::{Middleware, SendRequest};

/// Sets a header on every request that does not carry it already.
#[derive(Debug, Clone)]
pub struct DefaultHeader {
    name: HeaderName,
    value: HeaderValue,
}

impl DefaultHeader {
    pub fn new(name: HeaderName, value: HeaderValue) -> Self {
        Self { name, value }
    }
}

#[derive(Debug, Clone)]
pub struct DefaultHeaderSender<S> {
    inner: S,
    name: HeaderName,
    value: HeaderValue,
}

impl<S: SendRequest> Middleware<S> for DefaultHeader {
    type Out = DefaultHeaderSender<S>;

    fn wrap(&self, inner: S) -> Self::Out {
        DefaultHeaderSender { inner, name: self.name.clone(), value: self.value.clone() }
    }
}

#[async_trait]
impl<S: SendRequest> SendRequest for DefaultHeaderSender<S> {
    async fn send_request(&self, mut request: Request<RequestBody>) -> Result<Response<ResponseBody>, ClientError> {
        if !request.headers().contains_key(&self.name) {
            request.headers_mut().insert(self.name.clone(), self.value.clone());
        }
        self.inner.send_request(request).await
    }
}
