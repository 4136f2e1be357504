//! Looking up, searching and publishing OpenPGP certificates on
//! keyservers.
//!
//! This crate provides access to keyservers using the [HKP] protocol.
//! Certificates can be fetched by key ID, searched for by email
//! address using the machine-readable index, and published.
//!
//! [HKP]: https://tools.ietf.org/html/draft-shaw-openpgp-hkp-00
//!
//! # Examples
//!
//! This example demonstrates how to fetch a certificate from the
//! default key server:
//!
//! ```no_run
//! # use hkp_client::{KeyServer, Result};
//! # async fn f() -> Result<()> {
//! let ks = KeyServer::default();
//! let cert = ks.get_by_id("0x5226FE8B").await?;
//! println!("{}", cert.fingerprint());
//! # Ok(())
//! # }
//! ```
//!
//! This example demonstrates how to search for the newest certificate
//! with a given email address on a specific keyserver:
//!
//! ```no_run
//! # use hkp_client::{KeyServer, Result};
//! # async fn f() -> Result<()> {
//! let ks = KeyServer::builder()
//!     .host("keyserver.example.org")
//!     .port(11371)
//!     .build()?;
//! let cert = ks.get_key_by_email("juliett@example.org").await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

// Re-exports of crates that we use in our API.
pub use reqwest;
pub use sequoia_openpgp as openpgp;

use std::time::SystemTime;

use percent_encoding::{percent_encode, AsciiSet, CONTROLS};

use reqwest::{
    header::{self, HeaderMap, HeaderValue},
    StatusCode,
    Url,
};

use sequoia_openpgp::{
    cert::{Cert, CertParser},
    parse::Parse,
};

use tracing::debug;

#[macro_use] mod macros;
pub mod index;
pub mod transport;

use index::Index;
pub use transport::{BoxError, Response, Transport};

/// The keyserver used if no host is given.
pub const DEFAULT_HOST: &str = "pool.sks-keyservers.net";

/// The port used for `hkp` if no port is given.
pub const DEFAULT_PORT: u16 = 11371;

/// The port used for `hkps` if no port is given.
pub const DEFAULT_HKPS_PORT: u16 = 443;

/// Identifies us to the keyserver.
const USER_AGENT: &str =
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Marks a response that contains a certificate.
const ARMOR_MARKER: &str = "-----BEGIN PGP PUBLIC KEY BLOCK";

/// Marks a response that contains an index listing.
const INDEX_MARKER: &str = "pub:";

/// <https://url.spec.whatwg.org/#fragment-percent-encode-set>
const KEYSERVER_ENCODE_SET: &AsciiSet =
    // Formerly DEFAULT_ENCODE_SET
    &CONTROLS.add(b' ').add(b'"').add(b'#').add(b'<').add(b'>').add(b'`')
    .add(b'?').add(b'{').add(b'}')
    // The SKS keyserver as of version 1.1.6 is a bit picky with
    // respect to the encoding.
    .add(b'-').add(b'+').add(b'/')
    // Form delimiters.
    .add(b'%').add(b'&').add(b'=');

/// Returns the short key ID search token for `id`.
///
/// An optional `0x` prefix is stripped, the last eight characters are
/// kept, and `0x` is prepended again.
pub fn short_key_id(id: &str) -> String {
    let id = id.strip_prefix("0x")
        .or_else(|| id.strip_prefix("0X"))
        .unwrap_or(id);
    let skip = id.chars().count().saturating_sub(8);
    format!("0x{}", id.chars().skip(skip).collect::<String>())
}

/// Returns the form body used to upload `keytext`.
fn keytext_form(keytext: &str) -> Vec<u8> {
    let mut post_data = b"keytext=".to_vec();
    post_data.extend_from_slice(
        percent_encode(keytext.as_bytes(), KEYSERVER_ENCODE_SET)
            .collect::<String>().as_bytes());
    post_data
}

/// Parses the certificates in a keyring.
///
/// Unparsable certificates are skipped.
fn parse_keyring(data: &[u8]) -> Vec<Cert> {
    match CertParser::from_bytes(data) {
        Ok(parser) => parser.filter_map(|cert| cert.map_err(|e| {
            debug!(error = %e, "skipping unparsable certificate");
        }).ok()).collect(),
        Err(e) => {
            debug!(error = %e, "response does not contain a certificate");
            Vec::new()
        },
    }
}

/// Parses the certificates returned by the server.
///
/// Servers may return several certificates, either in one armored
/// block or in several concatenated ones.
fn parse_certs(body: &[u8]) -> Vec<Cert> {
    let text = String::from_utf8_lossy(body);
    let starts: Vec<usize> =
        text.match_indices(ARMOR_MARKER).map(|(i, _)| i).collect();
    if starts.len() < 2 {
        return parse_keyring(body);
    }

    starts.iter().enumerate()
        .flat_map(|(n, &start)| {
            let end = starts.get(n + 1).copied().unwrap_or(text.len());
            parse_keyring(text[start..end].as_bytes())
        })
        .collect()
}

/// Picks a certificate from a server response.
///
/// If `id` is given, the first certificate whose key ID or fingerprint
/// ends with it is preferred.  Otherwise, or if none matches, the
/// first certificate is returned.
fn select_cert(body: &[u8], id: Option<&str>) -> Result<Cert> {
    let mut certs = parse_certs(body);
    if certs.is_empty() {
        return Err(Error::KeyUnavailable.into());
    }

    let wanted = id.map(|id| id.to_uppercase());
    let position = wanted.as_deref().and_then(|id| {
        certs.iter().position(|c| c.keyid().to_hex().ends_with(id)
                              || c.fingerprint().to_hex().ends_with(id))
    });
    if certs.len() > 1 {
        debug!(certs = certs.len(), matched = position.is_some(),
               "server returned several certificates");
    }

    Ok(certs.swap_remove(position.unwrap_or(0)))
}

/// Returns the URL requests are sent to.
fn request_url(scheme: &str, host: &str, port: Option<u16>) -> Result<Url> {
    let (scheme, port) = match scheme {
        "hkp" => ("http", port.unwrap_or(DEFAULT_PORT)),
        "hkps" => ("https", port.unwrap_or(DEFAULT_HKPS_PORT)),
        _ => return Err(Error::MalformedUrl.into()),
    };
    if host.is_empty() {
        return Err(Error::MalformedUrl.into());
    }

    Ok(format!("{}://{}:{}", scheme, host, port).parse::<Url>()
       .map_err(Error::from)?)
}

/// How [`KeyServer::put`] reports a successful upload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PutBehavior {
    /// Always fail with [`Error::KeyExists`], even right after the key
    /// has been uploaded.
    ///
    /// Callers of `put` have historically relied on this.
    #[default]
    AlwaysReportExists,
    /// Return `Ok(())` if the key was uploaded, and fail with
    /// [`Error::KeyExists`] only if the server already had it.
    ReportUpload,
}

/// The outcome of [`KeyServer::publish`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Published {
    /// The server already had the key.  Nothing was uploaded.
    AlreadyPresent,
    /// The key was not found on the server and has been uploaded.
    Uploaded,
}

/// For accessing keyservers using HKP.
#[derive(Clone, Debug)]
pub struct KeyServer<T = reqwest::Client> {
    client: T,
    /// The original URL given to the constructor.
    url: Url,
    /// The URL we use for the requests.
    request_url: Url,
    put_behavior: PutBehavior,
}

assert_send_and_sync!(KeyServer);

impl Default for KeyServer {
    fn default() -> Self {
        Self::builder().build().expect("the default keyserver is well-formed")
    }
}

impl KeyServer {
    /// Returns a handle for the given URL.
    ///
    /// The URL must use the `hkp` or `hkps` scheme.  If it has no port,
    /// 11371 respectively 443 is used.
    pub fn new(url: &str) -> Result<Self> {
        Self::with_client(url, reqwest::Client::new())
    }

    /// Returns a builder for a keyserver handle.
    ///
    /// Unless overridden, the handle talks `hkp` to
    /// [`DEFAULT_HOST`]:[`DEFAULT_PORT`] using a new
    /// [`reqwest::Client`].
    pub fn builder() -> Builder {
        Builder {
            client: reqwest::Client::new(),
            scheme: "hkp",
            host: DEFAULT_HOST.into(),
            port: None,
            put_behavior: PutBehavior::default(),
        }
    }
}

impl<T: Transport> KeyServer<T> {
    /// Returns a handle for the given URL with a custom `Client`.
    pub fn with_client(url: &str, client: T) -> Result<Self> {
        let url = reqwest::Url::parse(url).map_err(Error::from)?;

        let host = url.host().ok_or(Error::MalformedUrl)?.to_string();
        let request_url = request_url(url.scheme(), &host, url.port())?;

        Ok(KeyServer {
            client,
            url,
            request_url,
            put_behavior: PutBehavior::default(),
        })
    }

    /// Returns the keyserver's base URL.
    pub fn url(&self) -> &reqwest::Url {
        &self.url
    }

    /// Returns the URL requests are made against.
    pub fn request_url(&self) -> &reqwest::Url {
        &self.request_url
    }

    /// Returns how [`KeyServer::put`] reports uploads.
    pub fn put_behavior(&self) -> PutBehavior {
        self.put_behavior
    }

    /// Changes how [`KeyServer::put`] reports uploads.
    pub fn set_put_behavior(&mut self, behavior: PutBehavior) {
        self.put_behavior = behavior;
    }

    /// Returns a lookup URL for the given operation and search term.
    fn lookup_url(&self, op: &str, search: &str) -> Result<Url> {
        let mut url = self.request_url.join("pks/lookup")
            .map_err(Error::from)?;
        url.query_pairs_mut()
            .append_pair("op", op)
            .append_pair("options", "mr")
            .append_pair("search", search);
        Ok(url)
    }

    /// Issues a GET request and returns the body of a successful
    /// response.
    async fn fetch(&self, url: Url) -> Result<bytes::Bytes> {
        debug!(%url, "GET");
        let res = self.client.get(url).await.map_err(Error::Transport)?;
        match res.status {
            s if s.is_success() => Ok(res.body),
            StatusCode::NOT_FOUND => Err(Error::KeyUnavailable.into()),
            n => Err(Error::HttpStatus(n).into()),
        }
    }

    /// Retrieves the certificate with the given key ID.
    ///
    /// `id` may be a short or long key ID or a fingerprint, with or
    /// without a `0x` prefix.  Only the last eight characters are sent
    /// to the server.  If the server returns several certificates, the
    /// one whose key ID ends with these characters is returned.
    ///
    /// # Warning
    ///
    /// Returned certificates must be mistrusted, and be carefully
    /// interpreted under a policy and trust model.
    pub async fn get_by_id<I: AsRef<str>>(&self, id: I) -> Result<Cert> {
        let token = short_key_id(id.as_ref());
        let url = self.lookup_url("get", &token)?;
        let body = self.fetch(url).await?;
        select_cert(&body, token.strip_prefix("0x"))
    }

    /// Retrieves the newest certificate with the given email address.
    ///
    /// If the server answers with a certificate, it is returned as is.
    /// If it answers with an index listing, the newest key that is not
    /// expired and has a uid with exactly `address` is fetched using
    /// [`KeyServer::get_by_id`].
    ///
    /// # Warning
    ///
    /// Returned certificates must be mistrusted, and be carefully
    /// interpreted under a policy and trust model.
    pub async fn get_key_by_email(&self, address: &str) -> Result<Cert> {
        let url = self.lookup_url("index", address)?;
        let body = self.fetch(url).await?;
        let body = String::from_utf8_lossy(&body);

        if body.contains(ARMOR_MARKER) {
            return select_cert(body.as_bytes(), None);
        }
        if ! body.contains(INDEX_MARKER) {
            debug!("response is neither a certificate nor an index");
            return Err(Error::KeyUnavailable.into());
        }

        let index = Index::parse(&body, SystemTime::now());
        let newest = index.newest_matching(address).ok_or_else(|| {
            debug!(keys = index.entries().len(), address,
                   "no listed key matches");
            Error::KeyUnavailable
        })?;
        debug!(key_id = newest.key_id(), "selected newest matching key");

        self.get_by_id(newest.key_id()).await
    }

    /// Sends the given armored key to the server unless it is already
    /// there.
    ///
    /// The key ID is taken from the parsed key, and a lookup for it
    /// decides whether the key is uploaded.  Any failure of the lookup
    /// counts as the key being absent.  The uploaded text is `armored`
    /// with surrounding whitespace removed.
    pub async fn publish(&self, armored: &str) -> Result<Published> {
        let cert = Cert::from_bytes(armored.as_bytes())
            .map_err(|e| Error::MalformedInput(e.into()))?;
        let keyid = cert.keyid().to_hex();

        match self.get_by_id(&keyid).await {
            Ok(_) => {
                debug!(%keyid, "key is already on the keyserver");
                return Ok(Published::AlreadyPresent);
            },
            Err(e) => debug!(%keyid, error = %e, "uploading key"),
        }

        self.send(armored.trim()).await?;
        Ok(Published::Uploaded)
    }

    /// Sends the given armored key to the server.
    ///
    /// This behaves like [`KeyServer::publish`], but with the default
    /// [`PutBehavior::AlwaysReportExists`] it never succeeds: if the
    /// key is uploaded without error, [`Error::KeyExists`] is returned
    /// all the same.  Use [`PutBehavior::ReportUpload`] or
    /// [`KeyServer::publish`] to tell the cases apart.
    pub async fn put(&self, armored: &str) -> Result<()> {
        let published = self.publish(armored).await?;
        match (self.put_behavior, published) {
            (PutBehavior::ReportUpload, Published::Uploaded) => Ok(()),
            (_, published) => {
                debug!(?published, "reporting key as already present");
                Err(Error::KeyExists.into())
            },
        }
    }

    /// Uploads the given key text.
    async fn send(&self, keytext: &str) -> Result<()> {
        let url = self.request_url.join("pks/add").map_err(Error::from)?;

        // Prepare to send url-encoded data.
        let post_data = keytext_form(keytext);
        let length = post_data.len();

        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
        headers.insert(header::CONTENT_TYPE,
                       HeaderValue::from_static("application/x-www-form-urlencoded"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
        headers.insert(header::CONNECTION, HeaderValue::from_static("close"));

        debug!(%url, length, "POST");
        let res = self.client.post(url, headers, post_data).await
            .map_err(Error::Transport)?;

        match res.status {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(Error::ProtocolViolation.into()),
            n => Err(Error::HttpStatus(n).into()),
        }
    }
}

/// Builds a [`KeyServer`] from a host and port.
///
/// Created by [`KeyServer::builder`].
#[derive(Clone, Debug)]
pub struct Builder<T = reqwest::Client> {
    client: T,
    scheme: &'static str,
    host: String,
    port: Option<u16>,
    put_behavior: PutBehavior,
}

impl<T: Transport> Builder<T> {
    /// Uses the given transport.
    pub fn client<U: Transport>(self, client: U) -> Builder<U> {
        Builder {
            client,
            scheme: self.scheme,
            host: self.host,
            port: self.port,
            put_behavior: self.put_behavior,
        }
    }

    /// Sets the keyserver's hostname.
    pub fn host<S: Into<String>>(mut self, host: S) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the keyserver's port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Selects `hkps` (HKP over TLS) instead of `hkp`.
    pub fn hkps(mut self, hkps: bool) -> Self {
        self.scheme = if hkps { "hkps" } else { "hkp" };
        self
    }

    /// Sets how [`KeyServer::put`] reports uploads.
    pub fn put_behavior(mut self, behavior: PutBehavior) -> Self {
        self.put_behavior = behavior;
        self
    }

    /// Returns the keyserver handle.
    ///
    /// Fails with [`Error::MalformedUrl`] if the host is empty or does
    /// not form a valid URL.
    pub fn build(self) -> Result<KeyServer<T>> {
        let request_url = request_url(self.scheme, &self.host, self.port)?;
        let port = self.port.unwrap_or(match self.scheme {
            "hkps" => DEFAULT_HKPS_PORT,
            _ => DEFAULT_PORT,
        });
        let url = format!("{}://{}:{}", self.scheme, self.host, port)
            .parse::<Url>().map_err(Error::from)?;

        Ok(KeyServer {
            client: self.client,
            url,
            request_url,
            put_behavior: self.put_behavior,
        })
    }
}

/// Results for hkp-client.
pub type Result<T> = ::std::result::Result<T, anyhow::Error>;

#[derive(thiserror::Error, Debug)]
/// Errors returned from the network routines.
#[non_exhaustive]
pub enum Error {
    /// The server did not return a usable certificate.
    #[error("could not obtain public key")]
    KeyUnavailable,
    /// The key is already present on the server.
    #[error("key already exists")]
    KeyExists,
    /// The text given to be published is not a key.
    #[error("Malformed key")]
    MalformedInput(#[source] BoxError),
    /// A given keyserver URL was malformed.
    #[error("Malformed URL; expected hkp: or hkps:")]
    MalformedUrl,
    /// A communication partner violated the protocol.
    #[error("Protocol violation")]
    ProtocolViolation,
    /// Encountered an unexpected low-level http status.
    #[error("server returned status {0}")]
    HttpStatus(StatusCode),
    /// The request could not be completed.
    #[error("Transport error")]
    Transport(#[source] BoxError),
    /// A `url::ParseError` occurred.
    #[error(transparent)]
    UrlError(#[from] url::ParseError),
}
