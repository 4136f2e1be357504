//! The HTTP capability used to talk to keyservers.
//!
//! [`KeyServer`] does not open connections itself.  It hands fully
//! formed requests to a [`Transport`], which is implemented for
//! [`reqwest::Client`].  Timeouts, proxies and retries are configured
//! on the client that is passed in.
//!
//!   [`KeyServer`]: crate::KeyServer

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use reqwest::{
    header::HeaderMap,
    StatusCode,
    Url,
};

/// A boxed error as returned by a [`Transport`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A response as seen by the keyserver client.
#[derive(Debug, Clone)]
pub struct Response {
    /// The HTTP status code.
    pub status: StatusCode,
    /// The full response body.
    pub body: Bytes,
}

impl Response {
    /// Returns a response with the given status and body.
    pub fn new<B: Into<Bytes>>(status: StatusCode, body: B) -> Self {
        Response { status, body: body.into() }
    }
}

/// Issues HTTP requests on behalf of a [`KeyServer`].
///
/// An error is returned only if the request could not be completed.
/// Any status code the server answers with is reported in the
/// [`Response`].
///
///   [`KeyServer`]: crate::KeyServer
pub trait Transport: Send + Sync {
    /// Issues a GET request.
    fn get(&self, url: Url)
           -> impl Future<Output = Result<Response, BoxError>> + Send;

    /// Issues a POST request with the given headers and body.
    fn post(&self, url: Url, headers: HeaderMap, body: Vec<u8>)
            -> impl Future<Output = Result<Response, BoxError>> + Send;
}

impl Transport for reqwest::Client {
    fn get(&self, url: Url)
           -> impl Future<Output = Result<Response, BoxError>> + Send
    {
        let request = reqwest::Client::get(self, url);
        async move {
            let res = request.send().await?;
            let status = res.status();
            let body = res.bytes().await?;
            Ok::<_, BoxError>(Response { status, body })
        }
    }

    fn post(&self, url: Url, headers: HeaderMap, body: Vec<u8>)
            -> impl Future<Output = Result<Response, BoxError>> + Send
    {
        let request = reqwest::Client::post(self, url)
            .headers(headers)
            .body(body);
        async move {
            let res = request.send().await?;
            let status = res.status();
            let body = res.bytes().await?;
            Ok::<_, BoxError>(Response { status, body })
        }
    }
}

impl<T: Transport> Transport for Arc<T> {
    fn get(&self, url: Url)
           -> impl Future<Output = Result<Response, BoxError>> + Send
    {
        T::get(self, url)
    }

    fn post(&self, url: Url, headers: HeaderMap, body: Vec<u8>)
            -> impl Future<Output = Result<Response, BoxError>> + Send
    {
        T::post(self, url, headers, body)
    }
}
